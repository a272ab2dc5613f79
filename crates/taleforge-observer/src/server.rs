//! Binding and serving the observer API.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tracing::info;

use crate::router::build_router;
use crate::state::AppState;

/// Where the observer listens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    /// Socket address to bind.
    pub addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
        }
    }
}

impl ServerConfig {
    /// Parse an `ip:port` address such as `127.0.0.1:8080`.
    ///
    /// # Errors
    ///
    /// Returns [`ServerError::Address`] if `addr` is not a socket address.
    pub fn parse(addr: &str) -> Result<Self, ServerError> {
        addr.trim()
            .parse()
            .map(|addr| Self { addr })
            .map_err(|e| ServerError::Address(format!("{addr}: {e}")))
    }
}

/// Serve the observer API until the process exits.
///
/// # Errors
///
/// Returns [`ServerError::Bind`] if the address cannot be bound and
/// [`ServerError::Serve`] if serving fails.
pub async fn start_server(config: &ServerConfig, state: Arc<AppState>) -> Result<(), ServerError> {
    let listener = TcpListener::bind(config.addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: config.addr,
            source,
        })?;
    info!(addr = %config.addr, "observer listening");
    axum::serve(listener, build_router(state))
        .await
        .map_err(ServerError::Serve)
}

/// Observer server failure.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// The configured address is not `ip:port`.
    #[error("invalid observer address {0}")]
    Address(String),

    /// The listener could not be bound.
    #[error("cannot bind observer on {addr}: {source}")]
    Bind {
        /// Address that was refused.
        addr: SocketAddr,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("observer stopped: {0}")]
    Serve(std::io::Error),
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn parses_socket_addresses() {
        let config = ServerConfig::parse("0.0.0.0:9090").unwrap();
        assert_eq!(config.addr.port(), 9090);
        assert!(config.addr.ip().is_unspecified());
        assert_eq!(ServerConfig::default().addr.port(), 8080);
        assert!(ServerConfig::parse("localhost").is_err());
        assert!(ServerConfig::parse("127.0.0.1:http").is_err());
    }
}
