use std::time::{Duration, Instant};

use anyhow::Result;
use clap::{Parser, ValueEnum};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use zabwatch_ingest::{MalformedRowPolicy, TextAlertParser, ZabbixJsonRpc};
use zabwatch_poller::{HttpTransport, PollerConfig, PollStateMachine};

#[derive(Parser, Debug)]
#[command(name = "zabwatch")]
#[command(about = "Polls a Zabbix endpoint and logs the active alert snapshot")]
struct Args {
    /// Endpoint URL: the delimited feed for --mode feed, the JSON-RPC API
    /// for --mode jsonrpc
    #[arg(short, long, default_value = "http://localhost/api_csv.php")]
    url: String,

    /// API token, sent as a bearer credential on every request
    #[arg(short, long, env = "ZABWATCH_TOKEN", default_value = "")]
    token: String,

    /// How to talk to the endpoint
    #[arg(short, long, value_enum, default_value_t = Mode::Feed)]
    mode: Mode,

    /// Per-phase transport deadline in seconds
    #[arg(long, default_value = "15")]
    phase_timeout: u64,

    /// Delay between poll cycles in seconds, on success and failure alike
    #[arg(long, default_value = "10")]
    retry_delay: u64,

    /// Seconds after the last successful fetch before the snapshot counts
    /// as stale
    #[arg(long, default_value = "30")]
    staleness: u64,

    /// Response buffer cap in bytes
    #[arg(long, default_value = "65536")]
    max_response_bytes: usize,

    /// Parse truncated responses as-is instead of discarding them
    #[arg(long)]
    salvage_truncated: bool,

    /// Skip malformed feed rows instead of emitting placeholder records
    #[arg(long)]
    drop_malformed_rows: bool,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    /// Poll the delimited text feed through the non-blocking state machine
    Feed,
    /// Query the JSON-RPC API and correlate problems with trigger hosts
    Jsonrpc,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let args = Args::parse();

    match args.mode {
        Mode::Feed => run_feed(args).await,
        Mode::Jsonrpc => run_jsonrpc(args).await,
    }
}

/// Drive the poll state machine against the delimited feed, logging
/// snapshot changes and freshness transitions.
async fn run_feed(args: Args) -> Result<()> {
    let config = PollerConfig {
        url: args.url,
        token: args.token,
        phase_timeout: Duration::from_secs(args.phase_timeout),
        retry_delay: Duration::from_secs(args.retry_delay),
        staleness_window: Duration::from_secs(args.staleness),
        max_response_bytes: args.max_response_bytes,
        salvage_truncated: args.salvage_truncated,
    };

    let parser = TextAlertParser::new().malformed_rows(if args.drop_malformed_rows {
        MalformedRowPolicy::Skip
    } else {
        MalformedRowPolicy::Placeholder
    });

    let transport = HttpTransport::new(config.max_response_bytes);
    let mut machine = PollStateMachine::new(Box::new(transport), Box::new(parser), config);

    info!("polling feed");
    let mut was_fresh = false;
    loop {
        let now = Instant::now();
        machine.tick(now);

        let fresh = machine.is_fresh(now);
        if fresh != was_fresh {
            if fresh {
                info!(count = machine.alerts().len(), "snapshot fresh");
            } else {
                warn!("snapshot stale");
            }
            was_fresh = fresh;
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// Poll the JSON-RPC API on a fixed cadence, logging the correlated alert
/// list whenever it changes.
async fn run_jsonrpc(args: Args) -> Result<()> {
    let client = ZabbixJsonRpc::builder()
        .endpoint(&args.url)
        .token(&args.token)
        .build();

    info!("polling JSON-RPC API");
    let mut previous = Vec::new();
    loop {
        match client.get_alerts().await {
            Ok(alerts) => {
                if !zabwatch_poller::snapshots_equal(&previous, &alerts) {
                    info!(count = alerts.len(), "alerts changed");
                    for alert in &alerts {
                        info!(
                            timestamp = alert.timestamp,
                            host = %alert.host,
                            severity = alert.severity,
                            suppressed = alert.suppressed,
                            "alert"
                        );
                    }
                    previous = alerts;
                } else {
                    info!(count = alerts.len(), "no changes");
                }
            }
            Err(err) => warn!(%err, "fetch failed"),
        }

        tokio::time::sleep(Duration::from_secs(args.retry_delay)).await;
    }
}
