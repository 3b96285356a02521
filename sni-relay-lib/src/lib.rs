mod access_log;
mod buffer;
mod connection;
mod constants;
mod destination;
mod engine;
mod error;
mod listener;
mod relay;
mod socket;
mod table;
mod trace;

pub use buffer::RingBuffer;
pub use connection::ConnState;
pub use constants::{log_event_names, DEFAULT_BUFFER_SIZE, MAX_RELAY_CONNECTIONS, TCP_BACKLOG};
pub use destination::{HostPattern, Route, TargetAddr};
pub use engine::{RelayEngine, RunFlags};
pub use error::{ConfigurationError, ConnectionError, NetworkError, RelayError};
pub use listener::{ListenerSpec, ProbeProtocol};
pub use relay::{Relay, RelayBuilder};
