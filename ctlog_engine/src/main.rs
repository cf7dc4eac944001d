// SPDX-License-Identifier: Apache-2.0
use std::process::ExitCode;

use log::{error, info, LevelFilter};
use tokio_util::sync::CancellationToken;

use ctlog_engine::config::Config;
use ctlog_engine::supervisor::Supervisor;

#[tokio::main]
async fn main() -> ExitCode {
    let config = Config::from_env();

    let default_level = if config.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::new()
        .filter_level(default_level)
        .parse_default_env()
        .init();

    let cancel = CancellationToken::new();

    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                info!("received shutdown signal, draining workers");
                cancel.cancel();
            }
        });
    }

    let supervisor = match Supervisor::start(config, cancel).await {
        Ok(supervisor) => supervisor,
        Err(err) => {
            error!("fatal startup error: {err}");
            return ExitCode::FAILURE;
        }
    };

    match supervisor.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("fatal error: {err}");
            ExitCode::FAILURE
        }
    }
}
