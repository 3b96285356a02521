mod parse;
mod toml;

pub use self::{parse::parse_opts, toml::ConfigToml};

use anyhow::Context;
use sni_relay_lib::{ConfigurationError, ListenerSpec, Relay, RelayBuilder, Route};

fn missing(field: impl Into<String>) -> ConfigurationError {
  ConfigurationError::MissingRequired { field: field.into() }
}

/// Turn the deserialized configuration into a validated relay description
pub fn build_relay(config: &ConfigToml) -> Result<Relay, anyhow::Error> {
  let mut specs = Vec::new();
  for listener in config.listeners.iter().flatten() {
    let listen_on = listener.listen.ok_or_else(|| missing("listeners.listen"))?;
    let probe = listener
      .probe
      .as_deref()
      .unwrap_or("tls")
      .parse()
      .with_context(|| format!("listener on {listen_on}"))?;

    let mut routes = Vec::new();
    for route in listener.routes.iter().flatten() {
      let host = route
        .host
        .as_deref()
        .ok_or_else(|| missing(format!("routes.host (listener on {listen_on})")))?
        .parse()?;
      let target = route
        .target
        .as_deref()
        .ok_or_else(|| missing(format!("routes.target (listener on {listen_on})")))?
        .parse()?;
      routes.push(Route { host, target });
    }

    specs.push(ListenerSpec {
      listen_on,
      probe,
      routes,
    });
  }

  let mut builder = RelayBuilder::default();
  builder.listeners(specs);
  if let Some(buffer_size) = config.buffer_size {
    builder.buffer_size(buffer_size);
  }
  if let Some(max_connections) = config.max_connections {
    builder.max_connections(max_connections);
  }
  if let Some(tcp_backlog) = config.tcp_backlog {
    builder.backlog(tcp_backlog);
  }
  Ok(builder.build()?)
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::toml::{ListenerToml, RouteToml};

  #[test]
  fn builds_relay_from_config() {
    let config = ConfigToml {
      listeners: Some(vec![ListenerToml {
        listen: Some("127.0.0.1:8443".parse().unwrap()),
        probe: Some("tls".to_string()),
        routes: Some(vec![RouteToml {
          host: Some("example.com".to_string()),
          target: Some("10.0.0.1:443".to_string()),
        }]),
      }]),
      ..Default::default()
    };
    assert!(build_relay(&config).is_ok());
  }

  #[test]
  fn rejects_bad_probe_name() {
    let config = ConfigToml {
      listeners: Some(vec![ListenerToml {
        listen: Some("127.0.0.1:8443".parse().unwrap()),
        probe: Some("quic".to_string()),
        routes: Some(vec![]),
      }]),
      ..Default::default()
    };
    assert!(build_relay(&config).is_err());
  }

  #[test]
  fn rejects_missing_listen_address() {
    let config = ConfigToml {
      listeners: Some(vec![ListenerToml::default()]),
      ..Default::default()
    };
    assert!(build_relay(&config).is_err());
  }
}
