use std::{path::PathBuf, thread, time::Duration};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use frame_probe_core::{ProbeConfig, Sample, query};
use tracing::debug;

#[derive(Parser)]
#[command(name = "frame-probe")]
#[command(version, about = "Read render latency published by the frame probe", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the latest sample once
    Query(QueryArgs),
    /// Poll the socket repeatedly
    Watch(WatchArgs),
}

#[derive(Args)]
struct SocketArgs {
    /// Telemetry socket path
    #[arg(short, long, default_value_os_t = ProbeConfig::default().socket_path())]
    socket: PathBuf,
    /// Print JSON instead of `pid:ns`
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct QueryArgs {
    #[command(flatten)]
    socket: SocketArgs,
}

#[derive(Args)]
struct WatchArgs {
    #[command(flatten)]
    socket: SocketArgs,
    /// Delay between polls in milliseconds
    #[arg(short, long, default_value_t = 500)]
    interval_ms: u64,
    /// Stop after this many polls (runs forever if omitted)
    #[arg(short, long)]
    count: Option<u64>,
}

/// JSON output is the serialized [`Sample`] plus a derived `frame_time_ms`.
fn render(sample: &Sample, json: bool) -> serde_json::Result<String> {
    if !json {
        return Ok(format!("{sample} ({:.3} ms)", sample.frame_time_ms()));
    }
    let mut value = serde_json::to_value(sample)?;
    if let Some(fields) = value.as_object_mut() {
        fields.insert("frame_time_ms".to_string(), sample.frame_time_ms().into());
    }
    serde_json::to_string(&value)
}

fn run_query(args: &SocketArgs) -> Result<()> {
    let sample = query(&args.socket)
        .with_context(|| format!("querying {}", args.socket.display()))?;
    println!("{}", render(&sample, args.json)?);
    Ok(())
}

fn run_watch(args: &WatchArgs) -> Result<()> {
    let interval = Duration::from_millis(args.interval_ms);
    let mut polls = 0u64;
    loop {
        match query(&args.socket.socket) {
            Ok(sample) => println!("{}", render(&sample, args.socket.json)?),
            Err(err) => eprintln!("{err}"),
        }
        polls += 1;
        if args.count.is_some_and(|count| polls >= count) {
            return Ok(());
        }
        thread::sleep(interval);
    }
}

fn init_tracing() {
    let filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => tracing_subscriber::EnvFilter::new("warn"),
    };
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}

fn main() -> Result<()> {
    init_tracing();
    let Cli { command } = Cli::parse();

    match command {
        Commands::Query(args) => {
            debug!(socket = %args.socket.socket.display(), "query");
            run_query(&args.socket)
        }
        Commands::Watch(args) => {
            debug!(
                socket = %args.socket.socket.display(),
                interval_ms = args.interval_ms,
                "watch"
            );
            run_watch(&args)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn text_output_shows_wire_form_and_millis() {
        let sample = Sample {
            pid: 1234,
            frame_time_ns: 2_000_000,
        };
        assert_eq!(
            render(&sample, false).expect("render"),
            "1234:2000000 (2.000 ms)"
        );
    }

    #[test]
    fn json_output_carries_both_units() {
        let sample = Sample {
            pid: 7,
            frame_time_ns: 16_500_000,
        };
        let rendered = render(&sample, true).expect("render");
        let value: serde_json::Value = serde_json::from_str(&rendered).expect("valid json");
        assert_eq!(value["pid"], 7);
        assert_eq!(value["frame_time_ns"], 16_500_000);
        assert_eq!(value["frame_time_ms"], 16.5);
    }

    #[test]
    fn json_output_reads_back_as_the_same_sample() {
        let sample = Sample {
            pid: 4321,
            frame_time_ns: -250_000,
        };
        let rendered = render(&sample, true).expect("render");
        let parsed: Sample = serde_json::from_str(&rendered).expect("sample json");
        assert_eq!(parsed, sample);
    }

    #[test]
    fn socket_defaults_to_module_path() {
        let Cli { command } = Cli::try_parse_from(["frame-probe", "query"]).expect("parse");
        let Commands::Query(args) = command else {
            panic!("expected query");
        };
        assert_eq!(args.socket.socket, ProbeConfig::default().socket_path());
        assert!(!args.socket.json);
    }

    #[test]
    fn watch_accepts_interval_and_count() {
        let Cli { command } = Cli::try_parse_from([
            "frame-probe",
            "watch",
            "--socket",
            "/tmp/probe.sock",
            "--interval-ms",
            "100",
            "--count",
            "3",
            "--json",
        ])
        .expect("parse");
        let Commands::Watch(args) = command else {
            panic!("expected watch");
        };
        assert_eq!(args.socket.socket, PathBuf::from("/tmp/probe.sock"));
        assert_eq!(args.interval_ms, 100);
        assert_eq!(args.count, Some(3));
        assert!(args.socket.json);
    }

    #[test]
    fn watch_survives_missing_socket() {
        let args = WatchArgs {
            socket: SocketArgs {
                socket: std::env::temp_dir()
                    .join(format!("frame-probe-absent-{}.sock", std::process::id())),
                json: false,
            },
            interval_ms: 0,
            count: Some(2),
        };
        run_watch(&args).expect("errors are reported, not returned");
    }
}
