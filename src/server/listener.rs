use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::{TcpListener, TcpSocket, TcpStream};
use tokio::signal::unix::{signal, SignalKind};
use tokio_rustls::TlsAcceptor;
use tracing::{debug, error, info, warn};

use crate::cache::compressed::CompressionCache;
use crate::cache::ResourceCaches;
use crate::config::Config;
use crate::http::connection::{self, ConnectionContext, ConnectionStats};
use crate::http::handler::RequestHandler;
use crate::http::route::Route;
use crate::server::pool::ReactorPool;
use crate::server::tls;

const LISTEN_BACKLOG: u32 = 1024;

/// The HTTP and HTTPS acceptors plus the reactors that serve their
/// connections.
pub struct Server {
    http: TcpListener,
    https: Option<(TcpListener, TlsAcceptor)>,
    pool: ReactorPool,
    ctx: Arc<ConnectionContext>,
}

impl Server {
    /// Sets up caches, the handler, TLS, both listeners and the reactor
    /// pool. HTTPS is enabled only when a certificate directory is set.
    pub async fn bind(config: &Config, routes: Vec<Route>) -> anyhow::Result<Self> {
        let compressed = match &config.compression_dir {
            Some(dir) => Some(
                CompressionCache::new(
                    dir,
                    config.tuning.compression.level,
                    config.tuning.compression.min_size,
                )
                .with_context(|| format!("failed to prepare compression dir {}", dir.display()))?,
            ),
            None => None,
        };
        if let Some(cache) = &compressed {
            info!(dir = %cache.dir().display(), "gzip artifacts enabled");
        }
        let caches = Arc::new(ResourceCaches::new(compressed));

        let mut handler = RequestHandler::new(&config.doc_root, caches)
            .with_gzip_level(config.tuning.compression.level);
        for route in routes {
            handler.add_route(route);
        }

        let ctx = Arc::new(ConnectionContext {
            handler: Arc::new(handler),
            stats: Arc::new(ConnectionStats::new()),
            read_buffer_size: config.tuning.read_buffer_size,
        });

        let http = bind_reuse(&config.bind_address, config.http_port).await?;
        info!(addr = %http.local_addr()?, "listening for http");

        let https = match &config.cert_dir {
            Some(dir) => {
                let acceptor = tls::load_acceptor(dir, config.key_password())
                    .with_context(|| format!("failed to load TLS material from {}", dir.display()))?;
                let listener = bind_reuse(&config.bind_address, config.https_port).await?;
                info!(addr = %listener.local_addr()?, "listening for https");
                Some((listener, acceptor))
            }
            None => None,
        };

        let pool = ReactorPool::new(config.threads).context("failed to start reactors")?;
        info!(threads = pool.size(), doc_root = %config.doc_root.display(), "server ready");

        Ok(Self {
            http,
            https,
            pool,
            ctx,
        })
    }

    pub fn http_addr(&self) -> io::Result<SocketAddr> {
        self.http.local_addr()
    }

    pub fn https_addr(&self) -> Option<io::Result<SocketAddr>> {
        self.https.as_ref().map(|(listener, _)| listener.local_addr())
    }

    pub fn stats(&self) -> Arc<ConnectionStats> {
        self.ctx.stats.clone()
    }

    /// Accepts connections until `shutdown` resolves, then stops every
    /// reactor.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        tokio::pin!(shutdown);

        loop {
            let (accepted, acceptor) = tokio::select! {
                _ = &mut shutdown => break,
                accepted = self.http.accept() => (accepted, None),
                accepted = accept_secure(self.https.as_ref()) => {
                    (accepted, self.https.as_ref().map(|(_, acceptor)| acceptor.clone()))
                }
            };

            match accepted {
                Ok((socket, peer)) => self.dispatch(socket, peer, acceptor),
                Err(e) => error!(error = %e, "accept failed"),
            }
        }

        let stats = &self.ctx.stats;
        info!(
            connections = stats.connections_accepted.load(Ordering::Relaxed),
            requests = stats.requests_processed.load(Ordering::Relaxed),
            bytes_written = stats.bytes_written.load(Ordering::Relaxed),
            "shutting down"
        );
        self.pool.stop();
        Ok(())
    }

    /// Moves an accepted socket onto the next reactor.
    fn dispatch(&self, socket: TcpStream, peer: SocketAddr, tls: Option<TlsAcceptor>) {
        // The socket is re-registered with the reactor that will own it.
        let socket = match socket.into_std() {
            Ok(socket) => socket,
            Err(e) => {
                warn!(%peer, error = %e, "failed to detach socket");
                return;
            }
        };
        debug!(%peer, tls = tls.is_some(), "accepted connection");

        let ctx = self.ctx.clone();
        self.pool.spawn(async move {
            let socket = match TcpStream::from_std(socket) {
                Ok(socket) => socket,
                Err(e) => {
                    warn!(%peer, error = %e, "failed to register socket");
                    return;
                }
            };
            if let Err(e) = connection::serve(socket, peer, tls, ctx).await {
                debug!(%peer, error = %e, "connection ended with error");
            }
        });
    }
}

async fn accept_secure(
    https: Option<&(TcpListener, TlsAcceptor)>,
) -> io::Result<(TcpStream, SocketAddr)> {
    match https {
        Some((listener, _)) => listener.accept().await,
        None => std::future::pending().await,
    }
}

/// Binds a listener with SO_REUSEADDR set.
pub async fn bind_reuse(host: &str, port: u16) -> anyhow::Result<TcpListener> {
    let addr = tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("failed to resolve {host}"))?
        .next()
        .with_context(|| format!("no address for {host}"))?;

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket
        .bind(addr)
        .with_context(|| format!("failed to bind {addr}"))?;
    Ok(socket.listen(LISTEN_BACKLOG)?)
}

/// Registers SIGINT, SIGTERM and SIGQUIT handlers. The returned future
/// resolves when any of them arrives.
pub fn shutdown_signal() -> io::Result<impl Future<Output = ()>> {
    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;

    Ok(async move {
        let name = tokio::select! {
            _ = interrupt.recv() => "SIGINT",
            _ = terminate.recv() => "SIGTERM",
            _ = quit.recv() => "SIGQUIT",
        };
        info!(signal = name, "shutdown signal received");
    })
}
