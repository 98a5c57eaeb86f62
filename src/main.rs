use action_queue::config::{AppConfig, CliConfig, FileConfig};
use action_queue::{handlers, metrics, ActionId, ActionKind, ActionQueue, NewAction};
use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, level_filters::LevelFilter};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn parse_path(s: &str) -> Result<PathBuf> {
    let path_buf = PathBuf::from(s);
    if path_buf.is_absolute() {
        return Ok(path_buf);
    }
    let cwd = std::env::current_dir()?;
    Ok(cwd.join(path_buf))
}

#[derive(Parser, Debug)]
struct CliArgs {
    /// Path to a TOML config file. Its values override the CLI arguments.
    #[clap(long, value_parser = parse_path)]
    pub config: Option<PathBuf>,

    /// Path to the SQLite queue database file.
    #[clap(long, value_parser = parse_path)]
    pub store_path: Option<PathBuf>,

    /// The port for the metrics server (Prometheus scraping). 0 disables it.
    #[clap(long, default_value_t = 0)]
    pub metrics_port: u16,

    /// Claim batch size. Defaults to the number of CPUs.
    #[clap(long)]
    pub threads: Option<usize>,

    /// Attempts per action before it is finished with its last error.
    #[clap(long, default_value_t = 3)]
    pub max_attempts: u8,

    /// Delay between attempts in milliseconds.
    #[clap(long, default_value_t = 123)]
    pub retry_delay_ms: u64,

    /// Timeout of handler actions without their own timeout, in seconds.
    #[clap(long, default_value_t = 1800)]
    pub default_execution_timeout_secs: u64,

    /// Days finished actions are kept before being purged.
    #[clap(long, default_value_t = 3)]
    pub retention_days: u32,

    /// Interval between scheduler ticks in milliseconds.
    #[clap(long, default_value_t = 1000)]
    pub poll_interval_ms: u64,

    #[clap(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create or migrate the queue database and exit.
    Init,
    /// Add an action to the queue.
    Enqueue {
        /// Action text, e.g. `"Echo @msg = hi"` or `"[reports] DELETE FROM t"`.
        text: String,
        #[clap(long, value_enum, default_value_t = KindArg::Handler)]
        kind: KindArg,
        /// Lower runs first.
        #[clap(long, default_value_t = 0)]
        priority: i32,
        #[clap(long)]
        group: Option<String>,
        #[clap(long)]
        source: Option<String>,
        /// Per-action execution timeout in milliseconds.
        #[clap(long)]
        timeout_ms: Option<u64>,
    },
    /// Print an action as JSON.
    Get { id: i64 },
    /// Print row counts by state as JSON.
    Stats,
    /// Process the queue until interrupted.
    Run,
}

#[derive(ValueEnum, Clone, Copy, Debug)]
enum KindArg {
    Command,
    Handler,
}

impl From<KindArg> for ActionKind {
    fn from(kind: KindArg) -> Self {
        match kind {
            KindArg::Command => ActionKind::Command,
            KindArg::Handler => ActionKind::Handler,
        }
    }
}

impl CliArgs {
    fn to_cli_config(&self) -> CliConfig {
        CliConfig {
            store_path: self.store_path.clone(),
            metrics_port: self.metrics_port,
            threads: self.threads,
            max_attempts: self.max_attempts,
            retry_delay_ms: self.retry_delay_ms,
            default_execution_timeout_secs: self.default_execution_timeout_secs,
            retention_days: self.retention_days,
            poll_interval_ms: self.poll_interval_ms,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli_args = CliArgs::parse();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .with_env_var("LOG_LEVEL")
                .from_env_lossy(),
        )
        .try_init()
        .unwrap();

    let file_config = match &cli_args.config {
        Some(path) => {
            info!("Loading config from {:?}", path);
            Some(FileConfig::load(path)?)
        }
        None => None,
    };
    let config = AppConfig::resolve(&cli_args.to_cli_config(), file_config)?;

    info!("Opening action queue at {:?}...", config.queue.store_path);
    let queue = ActionQueue::open(config.queue.clone())?;

    match cli_args.command {
        Command::Init => {
            info!("Queue database ready");
        }
        Command::Enqueue {
            text,
            kind,
            priority,
            group,
            source,
            timeout_ms,
        } => {
            let mut action = NewAction::new(text, kind.into()).with_priority(priority);
            if let Some(group) = group {
                action = action.with_group(group);
            }
            if let Some(source) = source {
                action = action.with_source(source);
            }
            if let Some(timeout_ms) = timeout_ms {
                action = action.with_timeout(Duration::from_millis(timeout_ms));
            }
            let id = queue.add_action(action).await?;
            println!("{}", id.0);
        }
        Command::Get { id } => match queue.get_action(ActionId(id)).await? {
            Some(action) => println!("{}", serde_json::to_string_pretty(&action)?),
            None => bail!("Action {} not found", id),
        },
        Command::Stats => {
            let stats = queue.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Command::Run => run(queue, config.metrics_port).await?,
    }

    Ok(())
}

async fn run(queue: ActionQueue, metrics_port: u16) -> Result<()> {
    metrics::init_metrics();
    handlers::builtin::register_all(queue.handlers());

    if metrics_port > 0 {
        let listener = tokio::net::TcpListener::bind(format!("127.0.0.1:{}", metrics_port))
            .await
            .with_context(|| format!("Failed to bind metrics port {}", metrics_port))?;
        info!("Metrics available at port {}!", metrics_port);
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, metrics::metrics_router()).await {
                error!("Metrics server stopped: {}", e);
            }
        });
    }

    let shutdown = CancellationToken::new();
    let signal_shutdown = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for interrupt: {}", e);
            return;
        }
        info!("Received interrupt, shutting down...");
        signal_shutdown.cancel();
    });

    queue.run(shutdown).await;
    Ok(())
}
