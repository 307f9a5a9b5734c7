//! # Notification Dispatch
//!
//! Post-actions and escalations signal notifications through the
//! [`NotificationDispatcher`] trait. Delivery (SMS, email, push) belongs to
//! the implementor; `dispatch` should only hand the notification off.
//! Dispatch failures are logged by the caller and never undo a commit.

use crate::rules::types::{Channel, NotificationEvent, Recipient};
use crate::rules::EffectiveConfig;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub event: NotificationEvent,
    pub recipients: Vec<Recipient>,
    pub channels: Vec<Channel>,
    pub template: String,
    pub context: Value,
}

impl Notification {
    /// Every notification the tenant has configured for `event`
    pub fn for_event(config: &EffectiveConfig, event: NotificationEvent, context: &Value) -> Vec<Self> {
        config
            .notifications_for(event)
            .map(|rule| Self {
                event,
                recipients: rule.recipients.clone(),
                channels: rule.channels.clone(),
                template: rule.template.clone(),
                context: context.clone(),
            })
            .collect()
    }
}

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("Notification rejected: {reason}")]
    Rejected { reason: String },

    #[error("Notification dispatcher unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait NotificationDispatcher: Send + Sync {
    async fn dispatch(&self, notification: Notification) -> Result<(), DispatchError>;
}

/// Hand every notification to `dispatcher`, logging failures.
///
/// Returns the number handed off successfully.
pub async fn dispatch_all(
    dispatcher: &dyn NotificationDispatcher,
    notifications: Vec<Notification>,
) -> usize {
    let mut delivered = 0;
    for notification in notifications {
        let event = notification.event;
        match dispatcher.dispatch(notification).await {
            Ok(()) => delivered += 1,
            Err(e) => warn!(event = %event, error = %e, "Notification dispatch failed"),
        }
    }
    delivered
}

/// Dispatcher that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopDispatcher;

#[async_trait]
impl NotificationDispatcher for NoopDispatcher {
    async fn dispatch(&self, _notification: Notification) -> Result<(), DispatchError> {
        Ok(())
    }
}

/// Dispatcher that keeps what it receives, for tests and local runs
#[derive(Debug, Default)]
pub struct RecordingDispatcher {
    sent: Mutex<Vec<Notification>>,
    failing: AtomicBool,
}

impl RecordingDispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent dispatch fail
    pub fn fail_dispatches(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().clone()
    }

    pub fn events(&self) -> Vec<NotificationEvent> {
        self.sent.lock().iter().map(|n| n.event).collect()
    }

    pub fn clear(&self) {
        self.sent.lock().clear();
    }
}

#[async_trait]
impl NotificationDispatcher for RecordingDispatcher {
    async fn dispatch(&self, notification: Notification) -> Result<(), DispatchError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(DispatchError::Unavailable("recording dispatcher set to fail".to_string()));
        }
        self.sent.lock().push(notification);
        Ok(())
    }
}
