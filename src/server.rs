//! TCP server: accept loop and shutdown sequencing.
//!
//! The controller spawns the accept loop, waits for a termination request,
//! stops accepting, then waits for every open connection to finish on its
//! own. Open connections are never cancelled.

use crate::config::Config;
use crate::connection::handle_connection;
use crate::lifecycle::{InFlightSet, Phase, ShutdownSignal};
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// How the drain phase ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrainOutcome {
    /// Every connection finished.
    Drained,
    /// The drain timeout elapsed with connections still open.
    TimedOut { remaining: usize },
}

/// Source of inbound connections for the accept loop.
pub(crate) trait Accept {
    type Stream: AsyncRead + AsyncWrite + Unpin + Send + 'static;

    fn accept(&mut self) -> impl Future<Output = io::Result<(Self::Stream, SocketAddr)>> + Send;
}

impl Accept for TcpListener {
    type Stream = TcpStream;

    async fn accept(&mut self) -> io::Result<(TcpStream, SocketAddr)> {
        TcpListener::accept(self).await
    }
}

/// Server instance
pub struct Server {
    listener: TcpListener,
    local_addr: SocketAddr,
    drain_timeout: Option<Duration>,
    shutdown: ShutdownSignal,
    in_flight: InFlightSet,
}

impl Server {
    /// Bind the listening socket. Failure here is fatal to startup.
    pub fn bind(config: &Config) -> io::Result<Self> {
        let std_listener = create_listener(config.listen, config.backlog)?;
        let listener = TcpListener::from_std(std_listener)?;
        let local_addr = listener.local_addr()?;

        info!(address = %local_addr, phase = %Phase::Running, "TCP server running");

        Ok(Server {
            listener,
            local_addr,
            drain_timeout: config.drain_timeout,
            shutdown: ShutdownSignal::new(),
            in_flight: InFlightSet::new(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle on the live connection count.
    pub fn in_flight(&self) -> InFlightSet {
        self.in_flight.clone()
    }

    /// Serve until `stop` resolves, then drain.
    pub async fn run_until<F>(self, stop: F) -> DrainOutcome
    where
        F: Future<Output = ()>,
    {
        let Server {
            listener,
            drain_timeout,
            shutdown,
            in_flight,
            ..
        } = self;

        let supervisor = tokio::spawn(accept_loop(
            listener,
            shutdown.clone(),
            in_flight.clone(),
        ));

        stop.await;

        info!(phase = %Phase::Stopping, open = in_flight.len(), "Server stopped");
        shutdown.trigger();

        // The accept loop owns the listener; once it returns the socket is closed.
        if let Err(e) = supervisor.await {
            error!(error = %e, "Accept loop panicked");
        }

        let outcome = match drain_timeout {
            None => {
                in_flight.wait_idle().await;
                DrainOutcome::Drained
            }
            Some(limit) => match tokio::time::timeout(limit, in_flight.wait_idle()).await {
                Ok(()) => DrainOutcome::Drained,
                Err(_) => DrainOutcome::TimedOut {
                    remaining: in_flight.len(),
                },
            },
        };

        match outcome {
            DrainOutcome::Drained => info!(phase = %Phase::Stopped, "All connections drained"),
            DrainOutcome::TimedOut { remaining } => warn!(
                phase = %Phase::Stopped,
                remaining,
                "Drain timeout elapsed with connections still open"
            ),
        }

        outcome
    }
}

/// Accept connections until the shutdown signal fires.
///
/// An accept error while running is logged and retried. Once the signal is
/// set, an accept error means the listener is being closed and ends the loop.
async fn accept_loop<A: Accept>(
    mut listener: A,
    shutdown: ShutdownSignal,
    in_flight: InFlightSet,
) {
    loop {
        let accepted = tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            accepted = listener.accept() => accepted,
        };

        match accepted {
            Ok((stream, peer)) => {
                let guard = in_flight.track();
                info!(peer = %peer, open = in_flight.len(), "Client connected");

                tokio::spawn(async move {
                    if let Err(e) = handle_connection(stream).await {
                        warn!(peer = %peer, error = %e, "Connection error");
                    } else {
                        debug!(peer = %peer, "Connection closed");
                    }
                    drop(guard);
                });
            }
            Err(_) if shutdown.is_triggered() => break,
            Err(e) => {
                error!(error = %e, "Failed to accept connection");
            }
        }
    }

    debug!("Accept loop exited");
}

/// Create a TCP listener with SO_REUSEADDR and the configured backlog.
fn create_listener(addr: SocketAddr, backlog: u32) -> io::Result<std::net::TcpListener> {
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
    socket.listen(backlog.min(i32::MAX as u32) as i32)?;

    Ok(socket.into())
}

/// Wait for an interrupt or terminate request from the OS.
pub async fn termination_request() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
