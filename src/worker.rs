//! Per-server worker: session lifecycle and the retry policy.
//!
//! A worker reconnects forever. Each session logs in, seeds a [`Forwarder`]
//! from the server's device-state listing, primes the registry with the
//! server's extension states, then long-polls for changes until something
//! fails. The forwarder is torn down on every session exit; the next session
//! re-seeds from a fresh listing.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use tokio_util::sync::CancellationToken;

use crate::client::{AmiClient, StateWriter};
use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::forwarder::Forwarder;
use crate::registry::StateRegistry;

/// Run `op` once. Retryable failures are logged with the server name and
/// followed by a cancellable `retry_interval` sleep, reported as `Ok(None)`;
/// anything else propagates and ends the session.
pub(crate) async fn try_or_wait<T>(
    server: &str,
    retry_interval: Duration,
    cancel: &CancellationToken,
    op: impl std::future::Future<Output = Result<T>>,
) -> Result<Option<T>> {
    match op.await {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_retryable() => {
            warn!("[{server}] {e}; retrying in {}s", retry_interval.as_secs());
            tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(Error::Cancelled),
                _ = tokio::time::sleep(retry_interval) => Ok(None),
            }
        }
        Err(e) => Err(e),
    }
}

/// Reconnect loop for one server. Returns only on cancellation or a
/// non-retryable error.
pub async fn run_worker(
    config: ServerConfig,
    registry: Arc<StateRegistry>,
    cancel: CancellationToken,
) -> Result<Infallible> {
    info!(
        "[{}] worker starting against http://{}:{}",
        config.name, config.host, config.port
    );
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        match try_or_wait(
            &config.name,
            config.retry_interval(),
            &cancel,
            session(&config, &registry, &cancel),
        )
        .await?
        {
            Some(never) => match never {},
            None => continue,
        }
    }
}

/// One login-to-fault session.
async fn session(
    config: &ServerConfig,
    registry: &Arc<StateRegistry>,
    cancel: &CancellationToken,
) -> Result<Infallible> {
    let client = Arc::new(AmiClient::new(config, cancel.clone())?);
    client.login().await?;
    info!("[{}] logged in as {}", config.name, config.username);

    let seed = client.list_device_states().await?;
    debug!("[{}] seeded {} device states", config.name, seed.len());

    let forwarder = Forwarder::new(
        config,
        seed,
        Arc::clone(&client) as Arc<dyn StateWriter>,
        Arc::clone(registry),
        cancel,
    )
    .await;

    let err = match poll_updates(&client, registry, cancel).await {
        Ok(never) => match never {},
        Err(e) => e,
    };
    forwarder.dispose().await;
    if matches!(err, Error::Cancelled) {
        // Orderly teardown; tell the server goodbye, best effort.
        if let Err(e) = client.logoff().await {
            debug!("[{}] logoff failed: {e}", config.name);
        }
    }
    Err(err)
}

async fn poll_updates(
    client: &AmiClient,
    registry: &Arc<StateRegistry>,
    cancel: &CancellationToken,
) -> Result<Infallible> {
    // Prime the global map with everything this server can see.
    registry.update(client.list_extension_states().await?).await;
    loop {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        registry
            .update(client.wait_for_extension_changes().await?)
            .await;
    }
}
