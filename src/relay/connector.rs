//! Transport boundary: how the relay obtains a byte stream to the peer.
//!
//! The relay only needs an ordered, reliable byte stream. [`TcpConnector`]
//! is the production implementation; tests substitute in-memory pipes.

use std::future::Future;
use std::io;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

/// Boxed, owned connection attempt.
pub type ConnectFuture<S> = Pin<Box<dyn Future<Output = io::Result<S>> + Send>>;

/// Factory for peer connections.
pub trait Connector: Send + Sync {
    /// Stream type produced by a successful attempt.
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    /// Start one connection attempt. The relay bounds it with its own timeout.
    fn connect(&self) -> ConnectFuture<Self::Stream>;

    /// Human-readable endpoint for log lines.
    fn endpoint(&self) -> &str;
}

/// Connects to a fixed `host:port` over TCP.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    addr: String,
}

impl TcpConnector {
    /// Create a connector for `addr` (`host:port`).
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        Self { addr: addr.into() }
    }
}

impl Connector for TcpConnector {
    type Stream = TcpStream;

    fn connect(&self) -> ConnectFuture<TcpStream> {
        let addr = self.addr.clone();
        Box::pin(async move {
            let stream = TcpStream::connect(addr).await?;
            // Protocol frames are small and latency-sensitive.
            stream.set_nodelay(true)?;
            Ok(stream)
        })
    }

    fn endpoint(&self) -> &str {
        &self.addr
    }
}
