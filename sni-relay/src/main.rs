#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

mod config;
mod log;

use crate::{
  config::{build_relay, parse_opts, ConfigToml},
  log::*,
};
use sni_relay_lib::RunFlags;

fn main() {
  let Ok(parsed_opts) = parse_opts() else {
    eprintln!("Invalid command line options");
    std::process::exit(1);
  };
  init_logger();

  info!("Starting sni-relay");

  if let Err(e) = entrypoint(&parsed_opts.config_file_path) {
    error!("Service exited: {e}");
    std::process::exit(1);
  }
  std::process::exit(0);
}

/// Load the configuration, wire the signal flags and serve until terminated
fn entrypoint(config_file_path: &str) -> Result<(), anyhow::Error> {
  let config_toml = ConfigToml::new(config_file_path)?;
  let relay = build_relay(&config_toml)?;

  let flags = RunFlags::new();
  // SIGINT/SIGTERM drain and exit; SIGUSR1 dumps the connection table.
  // The handlers just raise flags: the readiness wait returns with EINTR and
  // the serve loop picks them up.
  signal_hook::flag::register(signal_hook::consts::SIGINT, flags.shutdown_flag())?;
  signal_hook::flag::register(signal_hook::consts::SIGTERM, flags.shutdown_flag())?;
  signal_hook::flag::register(signal_hook::consts::SIGUSR1, flags.dump_flag())?;

  relay.run(&flags)?;
  info!("sni-relay exited cleanly");
  Ok(())
}
