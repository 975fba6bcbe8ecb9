//! TCP listener serving the dispatcher over HTTP/1.1 or h2c.

use crate::config::ListenProtocol;
use crate::dispatcher::Dispatcher;
use crate::error::{ProxyError, Result};
use crate::service::DispatchService;
use hyper::body::Incoming;
use hyper::server::conn::{http1, http2};
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;
use tower::Service;
use tracing::{debug, error, info, instrument, warn};

/// HTTP listener that accepts connections and spawns a task per connection.
///
/// # Example
///
/// ```no_run
/// use rust_edge_router::config::OriginSet;
/// use rust_edge_router::dispatcher::Dispatcher;
/// use rust_edge_router::listener::Listener;
/// use rust_edge_router::origin::Origin;
/// use std::sync::Arc;
/// use tokio::sync::broadcast;
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let (shutdown_tx, _) = broadcast::channel(1);
///     let dispatcher = Dispatcher::builder(OriginSet::flat(vec![
///         Origin::new("http://127.0.0.1:8080"),
///     ]))
///     .build();
///     let listener = Listener::bind("127.0.0.1:3000", Arc::new(dispatcher)).await?;
///     listener.serve(shutdown_tx.subscribe()).await?;
///     Ok(())
/// }
/// ```
pub struct Listener {
    tcp_listener: TcpListener,
    service: DispatchService,
    addr: SocketAddr,
    protocol: ListenProtocol,
}

impl Listener {
    /// Binds to the specified address and serves HTTP/1.1.
    ///
    /// # Errors
    ///
    /// Returns `ProxyError::ListenerBind` if binding fails.
    pub async fn bind(addr: &str, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        Self::bind_with_protocol(addr, dispatcher, ListenProtocol::Http1).await
    }

    /// Binds with HTTP/2 prior knowledge (h2c - HTTP/2 over cleartext).
    pub async fn bind_h2c(addr: &str, dispatcher: Arc<Dispatcher>) -> Result<Self> {
        Self::bind_with_protocol(addr, dispatcher, ListenProtocol::H2c).await
    }

    /// Binds to the specified address speaking `protocol`.
    #[instrument(level = "info", skip(dispatcher))]
    pub async fn bind_with_protocol(
        addr: &str,
        dispatcher: Arc<Dispatcher>,
        protocol: ListenProtocol,
    ) -> Result<Self> {
        let tcp_listener = TcpListener::bind(addr)
            .await
            .map_err(|e| ProxyError::ListenerBind {
                addr: addr.to_string(),
                source: e,
            })?;

        let local_addr = tcp_listener
            .local_addr()
            .map_err(|e| ProxyError::ListenerBind {
                addr: addr.to_string(),
                source: e,
            })?;

        info!("bound to {} ({:?})", local_addr, protocol);

        Ok(Self {
            tcp_listener,
            service: DispatchService::new(dispatcher),
            addr: local_addr,
            protocol,
        })
    }

    /// Returns the local address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    /// Returns the inbound protocol.
    pub fn protocol(&self) -> ListenProtocol {
        self.protocol
    }

    /// Serves incoming connections until a shutdown signal is received.
    #[instrument(level = "info", skip(self, shutdown_rx), fields(addr = %self.addr))]
    pub async fn serve(self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("serving connections");

        loop {
            tokio::select! {
                accept_result = self.tcp_listener.accept() => {
                    match accept_result {
                        Ok((stream, peer_addr)) => {
                            debug!("accepted connection from {}", peer_addr);
                            let service = self.service.clone();
                            let protocol = self.protocol;

                            tokio::spawn(async move {
                                if let Err(e) =
                                    Self::handle_connection(stream, service, protocol).await
                                {
                                    error!("connection error from {}: {}", peer_addr, e);
                                }
                            });
                        }
                        Err(e) => {
                            warn!("failed to accept connection: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("received shutdown signal, stopping listener");
                    break;
                }
            }
        }

        Ok(())
    }

    async fn handle_connection(
        stream: TcpStream,
        service: DispatchService,
        protocol: ListenProtocol,
    ) -> Result<()> {
        let io = TokioIo::new(stream);
        let service = service_fn(move |req: Request<Incoming>| {
            let mut svc = service.clone();
            async move { svc.call(req).await }
        });

        match protocol {
            ListenProtocol::Http1 => http1::Builder::new()
                .serve_connection(io, service)
                .await
                .map_err(ProxyError::Http),
            ListenProtocol::H2c => http2::Builder::new(TokioExecutor::new())
                .serve_connection(io, service)
                .await
                .map_err(ProxyError::Http),
        }
    }
}
