use crate::log::warn;
use serde::Deserialize;
use std::{collections::HashSet, fs, net::SocketAddr};

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct ConfigToml {
  pub buffer_size: Option<usize>,
  pub max_connections: Option<usize>,
  pub tcp_backlog: Option<u32>,
  pub listeners: Option<Vec<ListenerToml>>,
}

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct ListenerToml {
  pub listen: Option<SocketAddr>,
  pub probe: Option<String>,
  pub routes: Option<Vec<RouteToml>>,
}

#[derive(Deserialize, Debug, Default, PartialEq, Eq, Clone)]
pub struct RouteToml {
  pub host: Option<String>,
  pub target: Option<String>,
}

impl ConfigToml {
  pub fn new(config_file: &str) -> Result<Self, anyhow::Error> {
    let config_str = fs::read_to_string(config_file)?;
    Self::parse(&config_str)
  }

  fn parse(config_str: &str) -> Result<Self, anyhow::Error> {
    // Check unused fields during deserialization
    let t = toml::de::Deserializer::new(config_str);
    let mut unused = HashSet::new();

    let res = serde_ignored::deserialize(t, |path| {
      unused.insert(path.to_string());
    })
    .map_err(|e| anyhow::anyhow!(e));

    if !unused.is_empty() {
      let str = unused.iter().fold(String::new(), |acc, x| acc + x + "\n");
      warn!("Configuration file contains unsupported fields. Check typos:\n{}", str);
    }

    res
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parses_full_config() {
    let config = ConfigToml::parse(
      r#"
      buffer_size = 8192
      max_connections = 64

      [[listeners]]
      listen = "0.0.0.0:443"
      probe = "tls"

      [[listeners.routes]]
      host = "example.com"
      target = "10.0.0.1:443"

      [[listeners.routes]]
      host = "*"
      target = "fallback.internal:443"

      [[listeners]]
      listen = "0.0.0.0:80"
      probe = "http"

      [[listeners.routes]]
      host = "*.example.com"
      target = "10.0.0.2:80"
      "#,
    )
    .unwrap();

    assert_eq!(config.buffer_size, Some(8192));
    assert_eq!(config.max_connections, Some(64));
    assert_eq!(config.tcp_backlog, None);
    let listeners = config.listeners.unwrap();
    assert_eq!(listeners.len(), 2);
    assert_eq!(listeners[0].probe.as_deref(), Some("tls"));
    assert_eq!(listeners[0].routes.as_ref().unwrap().len(), 2);
    assert_eq!(listeners[1].listen, Some("0.0.0.0:80".parse().unwrap()));
  }

  #[test]
  fn unknown_fields_are_tolerated() {
    let config = ConfigToml::parse("no_such_knob = true\n").unwrap();
    assert_eq!(config, ConfigToml::default());
  }
}
