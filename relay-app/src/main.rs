use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use relay_common::observability::{init_logging, LogConfig, LogFormat};
use relay_config::RelayConfigLoader;
use relay_runtime::RelayRuntime;

mod host;

const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Parser)]
#[command(name = "relay", about = "HTTP sink bridge for broker topics")]
struct Args {
    /// Path to the sink configuration file.
    #[arg(long, short = 'c', default_value = "relay.yaml")]
    config: PathBuf,
    /// Emit JSON logs instead of text.
    #[arg(long)]
    log_json: bool,
    /// Duplicate log events to stderr.
    #[arg(long)]
    log_stderr: bool,
    /// Override the log directory (RELAY_LOG_DIR also works).
    #[arg(long)]
    log_dir: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Config first: a broken deployment should fail before anything runs.
    let cfg = RelayConfigLoader::new().with_file(&args.config).load()?;
    cfg.validate()?;

    init_logging(LogConfig {
        app_name: "relay",
        log_dir: args.log_dir.clone(),
        emit_stderr: args.log_stderr,
        format: if args.log_json {
            LogFormat::Json
        } else {
            LogFormat::Text
        },
        default_filter: "info",
    })?;

    let runtime = RelayRuntime::build("relay-sink", None)?;
    let handle = runtime.handle();
    let cancel = handle.cancellation();

    let signal_cancel = cancel.clone();
    handle.spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            signal_cancel.cancel();
        }
    });

    let result = runtime.block_on(host::run(&cfg, cancel));
    runtime.shutdown(SHUTDOWN_GRACE);
    result
}
