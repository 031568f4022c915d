//! Argument parsing tests for the CLI surface.

use clap::Parser;
use std::path::PathBuf;

use crate::cli::{Cli, CliCommand};

#[test]
fn run_with_urls_and_options() {
    let cli = Cli::try_parse_from([
        "ytempo",
        "run",
        "https://example.com/v1",
        "https://example.com/v2",
        "--quality",
        "192",
        "--speed",
        "1.5",
        "--rate-limit",
        "500",
        "--dir",
        "/music",
        "--priority",
        "2",
    ])
    .unwrap();

    let CliCommand::Run { urls, opts, stay } = cli.command else {
        panic!("expected run command");
    };
    assert_eq!(urls.len(), 2);
    assert!(!stay);
    assert_eq!(opts.quality, Some(192));
    assert_eq!(opts.speed, Some(1.5));
    assert_eq!(opts.rate_limit, Some(500));
    assert_eq!(opts.dir, Some(PathBuf::from("/music")));
    assert_eq!(opts.priority, 2);

    let request = opts.to_request(&urls[0]);
    assert_eq!(request.source, "https://example.com/v1");
    assert_eq!(request.quality_kbps, Some(192));
    assert_eq!(request.priority, 2);
}

#[test]
fn run_defaults() {
    let cli = Cli::try_parse_from(["ytempo", "run", "--stay"]).unwrap();
    let CliCommand::Run { urls, opts, stay } = cli.command else {
        panic!("expected run command");
    };
    assert!(urls.is_empty());
    assert!(stay);
    assert_eq!(opts.quality, None);
    assert_eq!(opts.priority, 0);
}

#[test]
fn add_requires_url() {
    assert!(Cli::try_parse_from(["ytempo", "add"]).is_err());
    let cli = Cli::try_parse_from(["ytempo", "add", "https://example.com/v"]).unwrap();
    assert!(matches!(cli.command, CliCommand::Add { .. }));
}

#[test]
fn negative_priority_is_accepted() {
    let cli = Cli::try_parse_from([
        "ytempo",
        "add",
        "https://example.com/v",
        "--priority",
        "-3",
    ])
    .unwrap();
    let CliCommand::Add { opts, .. } = cli.command else {
        panic!("expected add command");
    };
    assert_eq!(opts.priority, -3);
}

#[test]
fn job_control_commands_parse_ids() {
    for (cmd, name) in [("pause", "pause"), ("resume", "resume"), ("cancel", "cancel")] {
        let cli = Cli::try_parse_from(["ytempo", cmd, "42"]).unwrap();
        match (name, cli.command) {
            ("pause", CliCommand::Pause { id }) => assert_eq!(id, 42),
            ("resume", CliCommand::Resume { id }) => assert_eq!(id, 42),
            ("cancel", CliCommand::Cancel { id }) => assert_eq!(id, 42),
            (name, other) => panic!("{name} parsed as {other:?}"),
        }
    }
}

#[test]
fn settings_collects_updates() {
    let cli = Cli::try_parse_from([
        "ytempo",
        "settings",
        "--set",
        "max_retries=4",
        "--set",
        "auto_retry=false",
    ])
    .unwrap();
    let CliCommand::Settings { set } = cli.command else {
        panic!("expected settings command");
    };
    assert_eq!(set, vec!["max_retries=4", "auto_retry=false"]);
}

#[test]
fn history_limit_defaults_to_twenty() {
    let cli = Cli::try_parse_from(["ytempo", "history"]).unwrap();
    let CliCommand::History { limit } = cli.command else {
        panic!("expected history command");
    };
    assert_eq!(limit, 20);
}
