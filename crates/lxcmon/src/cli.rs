//! `lxc-monitor` command line front end.
//!
//! Subscribes to one or more lxcpaths and prints every matching event,
//! either as a human readable line or as one JSON object per line.
//!
//! # Usage
//!
//! ```text
//! lxc-monitor                          # all containers under /var/lib/lxc
//! lxc-monitor -n 'web.*' -t 10         # only web*, stop after 10s of silence
//! lxc-monitor -P /srv/lxc -P /var/lib/lxc --json
//! RUST_LOG=lxcmon=debug lxc-monitor    # trace connection handling on stderr
//! ```

use std::io::{self, Write};
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Parser;
use lxcmon_core::ContainerState;
use lxcmon_protocol::{MessageKind, WireMessage};
use regex::Regex;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use crate::config::MonitorConfig;
use crate::launcher::DaemonLauncher;
use crate::subscriber::{read_any, MonitorConnection, ReadOutcome, ReadTimeout};

/// Container directory monitored when no `-P` is given.
pub const DEFAULT_LXCPATH: &str = "/var/lib/lxc";

// ============================================================================
// CLI Arguments
// ============================================================================

/// Monitor the state of containers
#[derive(Parser, Debug)]
#[command(name = "lxc-monitor", version, about)]
pub struct Args {
    /// Container directory to monitor (repeatable)
    #[arg(short = 'P', long = "lxcpath", value_name = "LXCPATH")]
    lxcpaths: Vec<String>,

    /// Only report containers whose whole name matches this regex
    #[arg(short = 'n', long = "name", value_name = "REGEX", default_value = ".*")]
    name: String,

    /// Stop after this many seconds without events (negative waits forever)
    #[arg(
        short = 't',
        long = "timeout",
        value_name = "SECS",
        default_value_t = -1,
        allow_negative_numbers = true
    )]
    timeout: i64,

    /// Print one JSON object per event
    #[arg(long)]
    json: bool,

    /// Connect to already running monitord instances only
    #[arg(long)]
    no_spawn: bool,

    /// monitord executable to start
    #[arg(long, value_name = "PATH")]
    monitord: Option<PathBuf>,
}

impl Args {
    fn lxcpaths(&self) -> Vec<String> {
        if self.lxcpaths.is_empty() {
            vec![DEFAULT_LXCPATH.to_string()]
        } else {
            self.lxcpaths.clone()
        }
    }

    fn name_filter(&self) -> Result<Regex> {
        Regex::new(&format!("^(?:{})$", self.name))
            .with_context(|| format!("Invalid name regex '{}'", self.name))
    }
}

// ============================================================================
// Output
// ============================================================================

/// JSON form of one event.
#[derive(Debug, Serialize)]
struct EventRecord<'a> {
    timestamp: DateTime<Utc>,
    lxcpath: &'a str,
    name: &'a str,
    kind: MessageKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    state: Option<ContainerState>,
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<i32>,
}

/// Renders one event as a line of output (without the newline).
fn format_event(
    message: &WireMessage,
    lxcpath: &str,
    json: bool,
    timestamp: DateTime<Utc>,
) -> Result<String> {
    if !json {
        return Ok(message.to_string());
    }

    let state = message.state();
    let record = EventRecord {
        timestamp,
        lxcpath,
        name: message.name(),
        kind: message.kind(),
        state,
        // Unknown state ordinals are still reported, as a raw value.
        value: match message.kind() {
            MessageKind::StateChanged if state.is_some() => None,
            _ => Some(message.value()),
        },
    };
    serde_json::to_string(&record).context("Failed to serialize event")
}

// ============================================================================
// Logging Setup
// ============================================================================

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    // Events go to stdout; diagnostics stay on stderr.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();
}

// ============================================================================
// Entry Points
// ============================================================================

/// Parses arguments, sets up logging and runs the monitor.
pub fn main() -> Result<()> {
    let args = Args::parse();
    init_logging();
    run(&args, &mut io::stdout().lock())
}

/// Subscribes to every configured lxcpath and writes events to `out`
/// until the timeout elapses or a connection fails.
pub fn run(args: &Args, out: &mut impl Write) -> Result<()> {
    let filter = args.name_filter()?;
    let timeout = ReadTimeout::from_secs(args.timeout);

    let mut config = MonitorConfig::from_env();
    if let Some(path) = &args.monitord {
        config.monitord_path = path.clone();
    }
    let launcher = DaemonLauncher::from_config(&config);

    let mut connections = Vec::new();
    for lxcpath in args.lxcpaths() {
        if !args.no_spawn {
            launcher
                .ensure_running(&lxcpath)
                .with_context(|| format!("Failed to start monitord for '{lxcpath}'"))?;
        }
        let connection = MonitorConnection::connect(&lxcpath, &config.connect_backoff)
            .with_context(|| format!("Failed to connect to monitord for '{lxcpath}'"))?;
        info!(lxcpath = %lxcpath, "Monitoring");
        connections.push(connection);
    }

    loop {
        match read_any(&connections, timeout)? {
            ReadOutcome::TimedOut => {
                debug!("Timed out waiting for events");
                break;
            }
            ReadOutcome::Message { index, message } => {
                if !filter.is_match(message.name()) {
                    continue;
                }
                let lxcpath = connections.get(index).map(|c| c.group()).unwrap_or_default();
                writeln!(out, "{}", format_event(&message, lxcpath, args.json, Utc::now())?)?;
                out.flush()?;
            }
        }
    }

    for connection in connections {
        connection.close();
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn parse(argv: &[&str]) -> Args {
        Args::try_parse_from(argv).unwrap()
    }

    fn fixed_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn test_defaults() {
        let args = parse(&["lxc-monitor"]);
        assert_eq!(args.lxcpaths(), vec![DEFAULT_LXCPATH.to_string()]);
        assert_eq!(args.timeout, -1);
        assert!(!args.json);
        assert!(!args.no_spawn);
        assert!(args.name_filter().unwrap().is_match("anything"));
    }

    #[test]
    fn test_repeated_lxcpaths_and_negative_timeout() {
        let args = parse(&["lxc-monitor", "-P", "/a", "-P", "/b", "-t", "-5"]);
        assert_eq!(args.lxcpaths(), vec!["/a".to_string(), "/b".to_string()]);
        assert_eq!(ReadTimeout::from_secs(args.timeout), ReadTimeout::Never);
    }

    #[test]
    fn test_name_filter_matches_whole_name() {
        let args = parse(&["lxc-monitor", "-n", "web|db"]);
        let filter = args.name_filter().unwrap();
        assert!(filter.is_match("web"));
        assert!(filter.is_match("db"));
        assert!(!filter.is_match("webserver"));
    }

    #[test]
    fn test_invalid_name_filter() {
        let args = parse(&["lxc-monitor", "-n", "("]);
        assert!(args.name_filter().is_err());
    }

    #[test]
    fn test_text_output() {
        let running = WireMessage::state_changed("c1", ContainerState::Running);
        let exited = WireMessage::exit_code("c1", 3);

        assert_eq!(
            format_event(&running, "/var/lib/lxc", false, fixed_time()).unwrap(),
            "'c1' changed state to [RUNNING]"
        );
        assert_eq!(
            format_event(&exited, "/var/lib/lxc", false, fixed_time()).unwrap(),
            "'c1' exited with status [3]"
        );
    }

    #[test]
    fn test_json_output() {
        let running = WireMessage::state_changed("c1", ContainerState::Running);
        let line = format_event(&running, "/var/lib/lxc", true, fixed_time()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["lxcpath"], "/var/lib/lxc");
        assert_eq!(value["name"], "c1");
        assert_eq!(value["kind"], "state_changed");
        assert_eq!(value["state"], "RUNNING");
        assert!(value.get("value").is_none());
        assert_eq!(value["timestamp"], "2024-05-01T12:00:00Z");
    }

    #[test]
    fn test_json_exit_code() {
        let exited = WireMessage::exit_code("c2", 137);
        let line = format_event(&exited, "/srv", true, fixed_time()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();

        assert_eq!(value["kind"], "exit_code");
        assert_eq!(value["value"], 137);
        assert!(value.get("state").is_none());
    }
}
