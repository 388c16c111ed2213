//! Connection to the Redis server shared by the rule and counter stores.

use redis::aio::{ConnectionManager, ConnectionManagerConfig};
use redis::Client;
use tracing::info;

use crate::config::StorageConfig;
use crate::error::Result;

/// Open a managed connection to `url`.
///
/// Connection attempts and individual commands are bounded by the configured
/// timeouts, so a Redis host that stops answering surfaces as an error instead
/// of a stalled request.
///
/// # Errors
/// Returns error if the URL is invalid or the first connection fails.
pub async fn redis_connection(url: &str, config: &StorageConfig) -> Result<ConnectionManager> {
    let client = Client::open(url)?;
    let manager_config = ConnectionManagerConfig::new()
        .set_connection_timeout(config.connect_timeout())
        .set_response_timeout(config.response_timeout());
    let connection = ConnectionManager::new_with_config(client, manager_config).await?;

    info!(
        connect_timeout = ?config.connect_timeout(),
        response_timeout = ?config.response_timeout(),
        "Connected to Redis"
    );
    Ok(connection)
}
