//! Client-side delivery: transport, durable retry queue and local relay.

mod queue;
mod relay;
mod transport;

pub use queue::{content_hash, DeliveryQueue, DrainReport, LogStream, QueuedLogEntry, STREAM_BUFFER};
pub use relay::{Relay, RelayClient, RelayFilter, INGEST_PATHS};
pub use transport::{HttpSink, LogSink, APP_NAME_HEADER};
