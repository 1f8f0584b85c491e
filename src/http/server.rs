//! HTTP server implementation.

use std::convert::Infallible;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;

use hyper::body::Incoming;
use hyper::service::service_fn;
use hyper::Request;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use tokio::net::TcpListener;
use tracing::{debug, error, info, warn};

use super::service::RateLimitService;
use crate::error::Result;
use crate::ratelimit::Clock;
use crate::store::LimiterStore;

/// HTTP server fronting the rate limit service.
pub struct HttpServer<S: LimiterStore + ?Sized + 'static, C: Clock + 'static> {
    /// Address to bind to
    addr: SocketAddr,
    /// The admission service
    service: Arc<RateLimitService<S, C>>,
}

impl<S: LimiterStore + ?Sized + 'static, C: Clock + 'static> HttpServer<S, C> {
    /// Create a new HTTP server.
    pub fn new(addr: SocketAddr, service: Arc<RateLimitService<S, C>>) -> Self {
        Self { addr, service }
    }

    /// Bind to the configured address and serve until `signal` resolves.
    pub async fn serve_with_shutdown<F>(self, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind(self.addr).await.map_err(|e| {
            error!(addr = %self.addr, error = %e, "Failed to bind HTTP listener");
            e
        })?;
        self.serve_listener(listener, signal).await
    }

    /// Serve connections from an already bound listener until `signal` resolves.
    pub async fn serve_listener<F>(self, listener: TcpListener, signal: F) -> Result<()>
    where
        F: Future<Output = ()> + Send,
    {
        info!(addr = %listener.local_addr()?, "Starting HTTP server");
        tokio::pin!(signal);

        loop {
            tokio::select! {
                _ = &mut signal => {
                    info!("HTTP server shutting down");
                    break;
                }
                accepted = listener.accept() => {
                    let (stream, peer) = match accepted {
                        Ok(conn) => conn,
                        Err(e) => {
                            warn!(error = %e, "Failed to accept connection");
                            continue;
                        }
                    };
                    debug!(peer = %peer, "Accepted connection");
                    tokio::spawn(serve_connection(self.service.clone(), stream, peer));
                }
            }
        }

        Ok(())
    }
}

async fn serve_connection<S, C>(
    service: Arc<RateLimitService<S, C>>,
    stream: tokio::net::TcpStream,
    peer: SocketAddr,
) where
    S: LimiterStore + ?Sized + 'static,
    C: Clock + 'static,
{
    let svc = service_fn(move |req: Request<Incoming>| {
        let service = service.clone();
        async move {
            // Only the head is inspected; the body is never read.
            let (parts, _body) = req.into_parts();
            let req = Request::from_parts(parts, ());
            Ok::<_, Infallible>(service.handle(&req, peer).await)
        }
    });

    if let Err(e) = ConnBuilder::new(TokioExecutor::new())
        .serve_connection(TokioIo::new(stream), svc)
        .await
    {
        debug!(peer = %peer, error = %e, "Connection closed with error");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LimitsConfig;
    use crate::ratelimit::RateLimiter;
    use crate::store::MemoryStore;

    #[test]
    fn test_server_creation() {
        let addr: SocketAddr = "127.0.0.1:8080".parse().unwrap();
        let rate_limiter = Arc::new(RateLimiter::new(Arc::new(MemoryStore::new())));
        let service =
            Arc::new(RateLimitService::new(rate_limiter, &LimitsConfig::default()).unwrap());
        let _server = HttpServer::new(addr, service);
    }
}
