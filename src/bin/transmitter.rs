//! transmitter - 目录监听推送 Agent
//!
//! 退出码：0 正常关闭，1 配置错误，2 监听启动失败或运行期致命错误

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use watch_transmitter::{spawn_signal_handler, Agent, AgentConfig, Error, StatusPolicy, WatchConfig};

#[derive(Parser, Debug)]
#[command(name = "transmitter", version, about = "Push file changes to a remote receiver")]
struct Args {
    /// Path to a config.json file
    #[arg(short = 'C', long = "config", env = "TRANSMITTER_CONFIG")]
    config: PathBuf,

    /// Send every existing file once at startup
    #[arg(long)]
    initial_sync: bool,

    /// Treat non-2xx responses as failed deliveries
    #[arg(long)]
    strict_status: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

fn init_logging(verbose: bool) -> Result<()> {
    let directive = if verbose {
        "watch_transmitter=debug"
    } else {
        "watch_transmitter=info"
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    if let Err(e) = init_logging(args.verbose) {
        eprintln!("failed to initialise logging: {}", e);
        return ExitCode::from(1);
    }

    tracing::info!("🚀 transmitter v{}", watch_transmitter::VERSION_FULL);

    let watch = match WatchConfig::load(&args.config) {
        Ok(w) => w,
        Err(e) => {
            tracing::error!("❌ {}", e);
            return ExitCode::from(1);
        }
    };

    let config = AgentConfig {
        initial_sync: args.initial_sync,
        status_policy: if args.strict_status {
            StatusPolicy::RequireSuccess
        } else {
            StatusPolicy::AcceptAll
        },
        ..AgentConfig::default()
    };

    let agent = match Agent::new(watch, config) {
        Ok(a) => a,
        Err(e) => return fail(e),
    };

    let shutdown = spawn_signal_handler();
    match agent.run(shutdown).await {
        Ok(()) => {
            tracing::info!("👋 transmitter exiting");
            ExitCode::SUCCESS
        }
        Err(e) => fail(e),
    }
}

fn fail(err: Error) -> ExitCode {
    tracing::error!("❌ {}", err);
    match err {
        Error::Config(_) => ExitCode::from(1),
        _ => ExitCode::from(2),
    }
}
