//! Fixed-delay reconnection for the broker connection.
//!
//! When the connection drops, the transport calls [`reconnect_loop`],
//! which waits [`ReconnectConfig::delay`] before every attempt and keeps
//! trying until a connection succeeds or the [`CancellationToken`] is
//! triggered. The delay never grows and there is no attempt limit.

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::QueueError;

/// Default delay between reconnection attempts.
const DEFAULT_RECONNECT_DELAY: Duration = Duration::from_secs(5);

/// Default interval between liveness pings.
const DEFAULT_PING_INTERVAL: Duration = Duration::from_secs(3);

/// Default maximum `data` size of a single outbound envelope.
const DEFAULT_MAX_CHUNK_BYTES: usize = 512 * 1024;

/// Connection-maintenance parameters for the transport.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Wait before each reconnection attempt.
    pub delay: Duration,
    /// Interval between `ping` envelopes while connected.
    pub ping_interval: Duration,
    /// Outbound payloads larger than this are sent as chunks.
    pub max_chunk_bytes: usize,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            delay: DEFAULT_RECONNECT_DELAY,
            ping_interval: DEFAULT_PING_INTERVAL,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
        }
    }
}

/// Keep calling `connect` every `config.delay` until it succeeds.
///
/// Returns `Some(connection)` on success, or `None` if `cancel` fires
/// first.
pub async fn reconnect_loop<T, F, Fut>(
    config: &ReconnectConfig,
    cancel: &CancellationToken,
    mut connect: F,
) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, QueueError>>,
{
    let mut attempt = 0u32;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reconnect cancelled");
                return None;
            }
            _ = tokio::time::sleep(config.delay) => {}
        }

        attempt += 1;
        tracing::info!(
            attempt,
            delay_ms = config.delay.as_millis() as u64,
            "Reconnecting to message broker",
        );

        tokio::select! {
            _ = cancel.cancelled() => return None,
            result = connect() => match result {
                Ok(conn) => {
                    tracing::info!(attempt, "Reconnected to message broker");
                    return Some(conn);
                }
                Err(e) => {
                    tracing::warn!(error = %e, "Reconnect attempt {attempt} failed");
                }
            }
        }
    }
}
