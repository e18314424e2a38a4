// Event ingestion: log subscription and bounded admission queue
pub mod queue;
pub mod websocket;

pub use queue::IngestQueue;
pub use websocket::{LogSubscriber, SubscriberConfig};
