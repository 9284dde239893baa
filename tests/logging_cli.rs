// tests/logging_cli.rs

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

use watchrun::cli::{CliArgs, LogLevel};
use watchrun::logging::{parse_level_str, resolve_level};

#[test]
fn cli_level_beats_environment() {
    assert_eq!(resolve_level(Some(LogLevel::Warn), Some("trace")), Level::WARN);
    assert_eq!(resolve_level(None, Some("debug")), Level::DEBUG);
    assert_eq!(resolve_level(None, Some("nonsense")), Level::INFO);
    assert_eq!(resolve_level(None, None), Level::INFO);
}

#[test]
fn level_strings_are_lenient() {
    assert_eq!(parse_level_str(" WARNING "), Some(Level::WARN));
    assert_eq!(parse_level_str("Trace"), Some(Level::TRACE));
    assert_eq!(parse_level_str("verbose"), None);
}

#[test]
fn cli_parses_all_flags() {
    let args = CliArgs::try_parse_from([
        "watchrun",
        "--config",
        "ops/Watchrun.toml",
        "--log-level",
        "debug",
        "--dry-run",
    ])
    .expect("valid args");

    assert_eq!(args.config, Some(PathBuf::from("ops/Watchrun.toml")));
    assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    assert!(args.dry_run);
    assert!(!args.no_initial_build);
    assert_eq!(args.cmd, None);
}

#[test]
fn cli_rejects_unknown_level() {
    assert!(CliArgs::try_parse_from(["watchrun", "--log-level", "loud"]).is_err());
}
