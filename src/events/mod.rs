//! # Events
//!
//! Two outward channels: lifecycle events broadcast to in-process observers
//! ([`publisher`]) and notification signals handed to the external dispatcher
//! ([`notification`]). Neither participates in the transaction that produced
//! it.

pub mod notification;
pub mod publisher;

pub use notification::{
    DispatchError, Notification, NotificationDispatcher, NoopDispatcher, RecordingDispatcher,
};
pub use publisher::{EventPublisher, PublishError, PublishedEvent};
