//! Job event fan-out.
//!
//! State changes are published as JSON messages on a [`NotificationBus`]
//! channel. A [`run_bus_listener`] task relays each message to the
//! [`RealtimeHub`] room of the client that owns the job. Delivery is
//! at-most-once; clients reconcile by reading the job record.

pub mod bus;
pub mod hub;
pub mod listener;
pub mod message;
pub mod publisher;

pub use bus::{LocalBus, MessageStream, NotificationBus, PgNotifyBus};
pub use hub::{ConnectionId, RealtimeHub};
pub use listener::{handle_message, run_bus_listener, run_bus_listener_with_backoff};
pub use message::{JobCompleted, JobEvent, JobFailed, JobProgress};
pub use publisher::EventPublisher;
