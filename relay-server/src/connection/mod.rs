pub mod manager;
pub mod subscriber;

pub use manager::ConnectionManager;
pub use subscriber::{ConnectionId, OutboundMessage, SubscriberConnection};
