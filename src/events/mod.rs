// src/events/mod.rs

//! Job lifecycle and output events, and their fan-out to observers.

pub mod broadcaster;
pub mod event;

pub use broadcaster::{Delivery, EventBroadcaster, EventSubscription};
pub use event::{EventBody, JobEvent, QueuePayload, StatusPayload, TaskChange};
