//! Process supervisor: one worker per configured server.
//!
//! Workers share a single registry and child tokens of one root. The first
//! worker to exit while the root is still live is fatal; on root
//! cancellation the supervisor drains every worker and returns cleanly.

use std::convert::Infallible;
use std::sync::Arc;

use log::{error, info};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::registry::StateRegistry;
use crate::worker::run_worker;

pub async fn run(config: Config, root: CancellationToken) -> Result<()> {
    let registry = Arc::new(StateRegistry::new());
    let mut workers: JoinSet<(String, Result<Infallible>)> = JoinSet::new();
    for server in config.servers {
        let name = server.name.clone();
        let registry = Arc::clone(&registry);
        let cancel = root.child_token();
        workers.spawn(async move {
            let outcome = run_worker(server, registry, cancel).await;
            (name, outcome)
        });
    }

    let mut failure: Option<Error> = None;
    while let Some(joined) = workers.join_next().await {
        let orderly = root.is_cancelled();
        match joined {
            Ok((_, Ok(never))) => match never {},
            Ok((name, Err(Error::Cancelled))) => {
                info!("[{name}] worker stopped");
            }
            Ok((name, Err(e))) => {
                error!("[{name}] worker failed: {e}");
                if failure.is_none() && !orderly {
                    failure = Some(Error::Worker { server: name });
                    root.cancel();
                }
            }
            Err(join_err) => {
                error!("worker task aborted: {join_err}");
                if failure.is_none() && !orderly {
                    failure = Some(Error::Internal(join_err.to_string()));
                    root.cancel();
                }
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(()),
    }
}
