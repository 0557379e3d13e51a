//! Command-line arguments and pass configuration.

use std::env;

use anyhow::{bail, Result};
use lazy_static::lazy_static;
use serde::Deserialize;

/// Configuration for one backend run.
pub struct Config {
  pub in_file: String,
  pub out_file: String,
  /// Unset `NO_SCHEDULE` means both scheduling passes may run.
  pub schedule: bool,
}

/// Per-pass toggles, read from an optional `backend_opt.toml` next to the
/// manifest; everything is on when the file is absent.
#[derive(Deserialize)]
pub struct PassConfig {
  pub list_schedule: bool,
  pub trace_schedule: bool,
}

impl PassConfig {
  fn config_file_path() -> String {
    let source_dir = env!("CARGO_MANIFEST_DIR");
    format!("{}/{}", source_dir, "backend_opt.toml")
  }

  pub fn from_config() -> Self {
    match std::fs::read_to_string(Self::config_file_path()) {
      Ok(config) => toml::from_str(&config).unwrap(),
      Err(_) => PassConfig {
        list_schedule: true,
        trace_schedule: true,
      },
    }
  }
}

lazy_static! {
  pub static ref PASS_OPTIONS: PassConfig = PassConfig::from_config();
}

/// Exactly two positional arguments: input dump, output assembly file.
pub fn parse_args() -> Result<Config> {
  let args: Vec<String> = env::args().collect();
  parse_arg_list(&args)
}

fn parse_arg_list(args: &[String]) -> Result<Config> {
  if args.len() != 3 {
    let name = args.first().map(String::as_str).unwrap_or("rtlc");
    bail!("usage: {} in_file out_file", name);
  }
  Ok(Config {
    in_file: args[1].clone(),
    out_file: args[2].clone(),
    schedule: env::var_os("NO_SCHEDULE").is_none(),
  })
}

#[cfg(test)]
mod tests {
  use super::*;

  fn strings(args: &[&str]) -> Vec<String> {
    args.iter().map(|s| s.to_string()).collect()
  }

  #[test]
  fn wrong_arity_is_a_usage_error() {
    assert!(parse_arg_list(&strings(&["rtlc"])).is_err());
    assert!(parse_arg_list(&strings(&["rtlc", "in.rtl"])).is_err());
    assert!(parse_arg_list(&strings(&["rtlc", "a", "b", "c"])).is_err());
  }

  #[test]
  fn two_positionals_parse() {
    let config = parse_arg_list(&strings(&["rtlc", "in.rtl", "out.s"])).unwrap();
    assert_eq!(config.in_file, "in.rtl");
    assert_eq!(config.out_file, "out.s");
  }
}
