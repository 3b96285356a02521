use crate::{
  constants::{DEFAULT_BUFFER_SIZE, MAX_RELAY_CONNECTIONS, TCP_BACKLOG},
  engine::{RelayEngine, RunFlags},
  error::{ConfigurationError, RelayError},
  listener::ListenerSpec,
  trace::*,
};

/* ---------------------------------------------------------- */
#[derive(Debug, Clone, derive_builder::Builder)]
/// Top-level relay description: the listeners to bind plus table-wide tuning
pub struct Relay {
  /// Listeners to bind, each with its parser and backend route table
  listeners: Vec<ListenerSpec>,
  /// Per-direction ring buffer capacity in bytes
  #[builder(default = "DEFAULT_BUFFER_SIZE")]
  buffer_size: usize,
  /// Refusal threshold for live connections across all listeners
  #[builder(default = "MAX_RELAY_CONNECTIONS")]
  max_connections: usize,
  /// TCP backlog size
  #[builder(default = "TCP_BACKLOG")]
  backlog: u32,
}

impl Relay {
  /// Bind every listener and build the relay engine
  pub fn engine(&self) -> Result<RelayEngine, RelayError> {
    if self.listeners.is_empty() {
      return Err(ConfigurationError::NoListeners.into());
    }
    for spec in &self.listeners {
      if spec.routes.is_empty() {
        return Err(ConfigurationError::NoRoutes { listen_on: spec.listen_on }.into());
      }
    }
    RelayEngine::try_new(&self.listeners, self.buffer_size, self.max_connections, self.backlog)
  }

  /// Bind and serve until `flags` requests shutdown
  pub fn run(&self, flags: &RunFlags) -> Result<(), RelayError> {
    info!("Starting relay with {} listener(s)", self.listeners.len());
    let mut engine = self.engine()?;
    engine.run(flags)
  }
}
