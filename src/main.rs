use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};

use pvforward::providers::loopback::{LoopbackBroker, LoopbackSubscriptions};
use pvforward::{CommandHandle, Config, ForwarderBuilder, LogWriter, MappingSpec, Reply, Subscribe};

/// Forward process-variable updates into broker topics.
///
/// Control messages are read from stdin, one JSON object per line, e.g.
/// `{"cmd":"add","channel":"IOC:m1.DRBV","topic":"IOC.m1"}`, `{"cmd":"list"}`.
#[derive(Parser, Debug)]
#[command(name = "pvforward", version, about)]
struct Cli {
    /// TOML configuration file.
    #[arg(long, short)]
    config: Option<PathBuf>,

    #[arg(long)]
    init_pool_max: Option<usize>,

    #[arg(long)]
    tick_interval_ms: Option<u64>,

    #[arg(long)]
    zombie_grace_secs: Option<u64>,

    #[arg(long)]
    delete_grace_secs: Option<u64>,

    /// Queue N synthetic mappings `pv.NNNNNN -> pv.NNNNNN` at startup.
    #[arg(long, default_value_t = 0)]
    synthetic: usize,

    /// Interval between simulated value updates on every channel (0 disables).
    #[arg(long, default_value_t = 500)]
    update_interval_ms: u64,

    /// Log level used when RUST_LOG is not set.
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    fn load_config(&self) -> Result<Config> {
        let mut cfg = match &self.config {
            Some(path) => Config::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => Config::default(),
        };
        if let Some(v) = self.init_pool_max {
            cfg.init_pool_max = v;
        }
        if let Some(v) = self.tick_interval_ms {
            cfg.tick_interval_ms = v;
        }
        if let Some(v) = self.zombie_grace_secs {
            cfg.zombie_grace_secs = v;
        }
        if let Some(v) = self.delete_grace_secs {
            cfg.delete_grace_secs = v;
        }
        cfg.mappings.extend(MappingSpec::synthetic(self.synthetic));
        cfg.validate().context("invalid configuration")?;
        Ok(cfg)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    pvforward::telemetry::init_tracing(&cli.log_level, cli.log_json)?;
    let cfg = cli.load_config()?;

    let rt = tokio::runtime::Runtime::new().context("building tokio runtime")?;
    let res = rt.block_on(run(cli, cfg));
    // The stdin reader sits on a blocking thread; do not wait for it.
    rt.shutdown_timeout(Duration::from_millis(100));
    res
}

async fn run(cli: Cli, cfg: Config) -> Result<()> {
    let subscriptions = LoopbackSubscriptions::new();
    let broker = LoopbackBroker::new();
    let subscribers: Vec<Arc<dyn Subscribe>> = vec![Arc::new(LogWriter::new())];
    let fwd = ForwarderBuilder::new(cfg, Arc::new(subscriptions.clone()), Arc::new(broker))
        .with_subscribers(subscribers)
        .build()?;

    if cli.update_interval_ms > 0 {
        tokio::spawn(simulate_updates(
            subscriptions,
            Duration::from_millis(cli.update_interval_ms),
        ));
    }
    tokio::spawn(read_commands(fwd.commands()));

    fwd.run().await?;
    Ok(())
}

/// Posts an increasing counter to every open channel.
async fn simulate_updates(subscriptions: LoopbackSubscriptions, every: Duration) {
    let mut interval = tokio::time::interval(every);
    let mut value: u64 = 0;
    loop {
        interval.tick().await;
        value += 1;
        subscriptions.post_all(value.to_string().as_bytes());
    }
}

async fn read_commands(commands: CommandHandle) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                tracing::warn!(error = %err, "stdin read failed");
                break;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        match commands.call(line).await {
            Ok(Reply::Listed(specs)) => {
                for spec in specs {
                    println!("{spec}");
                }
            }
            Ok(Reply::Removed(n)) => println!("removed {n}"),
            Ok(Reply::Rejected(reason)) => println!("rejected: {reason}"),
            Ok(Reply::Queued | Reply::Exiting) => {}
            Err(err) => {
                tracing::debug!(error = %err, "command channel closed");
                break;
            }
        }
    }
}
