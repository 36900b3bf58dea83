// ABOUTME: PostgreSQL connection setup for station sources and the shared target
// ABOUTME: Applies the process-wide TLS policy and retries transient connection failures

use anyhow::{Context, Result};
use std::sync::OnceLock;
use std::time::Duration;
use tokio_postgres::Client;

use crate::utils::{retry_with_backoff, sanitize_url};

static ALLOW_SELF_SIGNED: OnceLock<bool> = OnceLock::new();

/// Set whether self-signed server certificates are accepted.
///
/// Only the first call has an effect; later calls are ignored.
pub fn init_tls_policy(allow_self_signed: bool) {
    if ALLOW_SELF_SIGNED.set(allow_self_signed).is_err() {
        tracing::debug!("TLS policy already initialized, ignoring");
    }
}

fn allow_self_signed() -> bool {
    ALLOW_SELF_SIGNED.get().copied().unwrap_or(false)
}

/// Open a single connection and spawn its driver task.
pub async fn connect(url: &str) -> Result<Client> {
    let allow = allow_self_signed();
    let connector = native_tls::TlsConnector::builder()
        .danger_accept_invalid_certs(allow)
        .danger_accept_invalid_hostnames(allow)
        .build()
        .context("Failed to build TLS connector")?;
    let tls = postgres_native_tls::MakeTlsConnector::new(connector);

    let (client, connection) = tokio_postgres::connect(url, tls)
        .await
        .with_context(|| format!("Failed to connect to {}", sanitize_url(url)))?;

    tokio::spawn(async move {
        if let Err(e) = connection.await {
            tracing::error!("PostgreSQL connection error: {}", e);
        }
    });

    Ok(client)
}

/// Connect with exponential backoff: 3 retries starting at one second.
pub async fn connect_with_retry(url: &str) -> Result<Client> {
    retry_with_backoff(|| connect(url), 3, Duration::from_secs(1)).await
}
