//! WebSocket echo server.
//!
//! Accepts WebSocket upgrades on any path, echoes every text and binary
//! message back unchanged, and closes the connection once `close_after`
//! messages have been echoed. This is the counterpart the verifier expects:
//! two echoes followed by a server-initiated close.

use crate::config::ServeConfig;
use futures_util::{SinkExt, StreamExt};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::{self, Message};
use tracing::{debug, error, info, trace};

/// Listen backlog for the server socket
const LISTEN_BACKLOG: i32 = 1024;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Server instance
pub struct Server {
    listener: TcpListener,
    close_after: Option<usize>,
    connection_limit: Arc<Semaphore>,
}

impl Server {
    /// Bind the listening socket.
    pub async fn bind(config: &ServeConfig) -> io::Result<Self> {
        let addr = tokio::net::lookup_host(&config.listen)
            .await?
            .next()
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("no address for '{}'", config.listen),
                )
            })?;

        let listener = TcpListener::from_std(create_listener(addr)?)?;
        info!(address = %listener.local_addr()?, "Server listening");

        Ok(Server {
            listener,
            close_after: config.close_after,
            connection_limit: Arc::new(Semaphore::new(config.max_connections)),
        })
    }

    #[cfg(test)]
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accept connections until the listener fails.
    pub async fn run(self) -> Result<(), BoxError> {
        loop {
            // Wait for a connection slot
            let permit = self.connection_limit.clone().acquire_owned().await?;

            match self.listener.accept().await {
                Ok((stream, addr)) => {
                    debug!(peer = %addr, "New connection");
                    let close_after = self.close_after;

                    tokio::spawn(async move {
                        match handle_connection(stream, close_after).await {
                            Ok(echoed) => debug!(peer = %addr, echoed, "Connection finished"),
                            Err(e) => debug!(peer = %addr, error = %e, "Connection error"),
                        }
                        drop(permit);
                    });
                }
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }
}

/// Bind and serve with the given configuration.
pub async fn serve(config: ServeConfig) -> Result<(), BoxError> {
    let server = Server::bind(&config).await?;
    server.run().await
}

/// Handle a single WebSocket connection, returning the number of echoes.
async fn handle_connection(
    stream: TcpStream,
    close_after: Option<usize>,
) -> Result<usize, tungstenite::Error> {
    let mut ws = accept_async(stream).await?;
    let mut echoed = 0;
    let mut closing = false;

    while let Some(message) = ws.next().await {
        let message = match message {
            Ok(message) => message,
            // The peer may drop the socket right after our close frame.
            Err(tungstenite::Error::ConnectionClosed) if closing => break,
            Err(e) => return Err(e),
        };

        match message {
            Message::Text(_) | Message::Binary(_) if !closing => {
                trace!(len = message.len(), "Echoing message");
                ws.send(message).await?;
                echoed += 1;

                if close_after.is_some_and(|limit| echoed >= limit) {
                    debug!(echoed, "Echo limit reached, closing");
                    ws.close(None).await?;
                    closing = true;
                }
            }
            Message::Close(frame) => {
                trace!(?frame, "Close received");
            }
            _ => {}
        }
    }

    Ok(echoed)
}

/// Create a TCP listener with SO_REUSEADDR set.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(LISTEN_BACKLOG)?;

    Ok(socket.into())
}
