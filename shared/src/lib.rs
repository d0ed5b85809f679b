pub mod event_log;
pub mod heartbeat;
pub mod protocol;
pub mod types;

pub use event_log::{LogEvent, LogLevel};
pub use heartbeat::{CodecError, HeartbeatEncoder, HeartbeatEvent, HeartbeatSchema};
pub use types::{ServiceEndpoint, ServiceStatus, StatusQueryResult};
