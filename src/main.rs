//! Daemon entry point.
//!
//! Exit codes: `0` graceful stop, `1` configuration failure, `2` a worker
//! terminated unexpectedly, `3` internal error.

use std::io::Write;
use std::process::ExitCode;

use chrono::Local;
use env_logger::{Builder, Env};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use devstate_sync::config::Config;
use devstate_sync::error::Error;
use devstate_sync::supervisor;

fn init_logging() {
    Builder::from_env(Env::new().default_filter_or("info"))
        .format(|buf, record| {
            let ts = Local::now().format("%Y-%m-%d %H:%M:%S%.3f");
            writeln!(
                buf,
                "[{} {} {}] {}",
                ts,
                record.level(),
                record.target(),
                record.args()
            )
        })
        .init();
}

fn config_path() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("DEVSTATE_CONFIG").ok())
        .unwrap_or_else(|| "devstate-sync.toml".to_string())
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    init_logging();

    let path = config_path();
    let config = match Config::load(&path) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::from(1);
        }
    };
    info!(
        "starting with {} server(s) from {path}",
        config.servers.len()
    );

    let root = CancellationToken::new();
    let shutdown = root.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("shutdown requested");
            shutdown.cancel();
        }
    });

    match supervisor::run(config, root).await {
        Ok(()) => {
            info!("stopped");
            ExitCode::SUCCESS
        }
        Err(e @ Error::Worker { .. }) => {
            error!("{e}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("{e}");
            ExitCode::from(3)
        }
    }
}
