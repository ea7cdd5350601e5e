use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::OnceLock;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder;
use hyper_util::service::TowerToHyperService;
use tokio::net::TcpListener;
use tower::util::BoxCloneService;
use tower_http::compression::CompressionBody;
use tracing::{error, info};

use tools::real_ip::RealIp;

pub mod config;
mod proxy;
pub mod tools;

type Body = CompressionBody<BoxBody<Bytes, Infallible>>;
static REAL_IP: OnceLock<RealIp> = OnceLock::new();

/// Builds the real IP resolver from the static configuration.
///
/// Must succeed before [`start`] is called: an invalid exclusion list or
/// candidate header aborts startup here, so filtering never runs with a
/// partial rule set.
pub fn init() -> anyhow::Result<()> {
    let _ = rustls::crypto::ring::default_provider().install_default();

    let resolver = RealIp::new(&config::get().real_ip)?;

    REAL_IP
        .set(resolver)
        .map_err(|_| anyhow::anyhow!("Failed to register the real IP resolver"))
}

pub fn get_real_ip() -> &'static RealIp {
    REAL_IP
        .get()
        .expect("real IP resolver should be registered")
}

pub async fn start() -> anyhow::Result<()> {
    let cfg = config::get()
        .http
        .as_ref()
        .ok_or_else(|| anyhow::anyhow!("HTTP configuration is missing"))?;

    info!(address = cfg.address, "Starting HTTP entrypoint");

    let addr: SocketAddr = cfg.address.parse()?;
    let listener = TcpListener::bind(addr).await?;
    loop {
        let (stream, remote_addr) = listener.accept().await?;
        let io = TokioIo::new(stream);

        let service = TowerToHyperService::new(make_service(remote_addr));

        tokio::spawn(async move {
            if let Err(err) = Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(io, service)
                .await
            {
                error!(?err, ?remote_addr, "failed to serve connections");
            }
        });
    }
}

/// Create the service pipeline, using the proxy handler as the "final"
/// request handler
///
/// Arguments:
/// - `remote_addr`: Remote client address
///
/// Returns:
///
/// A full service pipeline for handling a client request
fn make_service(
    remote_addr: SocketAddr,
) -> BoxCloneService<proxy::Request, http::Response<Body>, anyhow::Error> {
    use tower::{ServiceBuilder, ServiceExt};
    use tower_http::compression::CompressionLayer;

    ServiceBuilder::new()
        .layer(CompressionLayer::new())
        .service_fn(move |req| async move { proxy::handle_request(req, remote_addr).await })
        .boxed_clone()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::init_test_config;
    use http::HeaderMap;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_init() {
        init_test_config();
        init().unwrap();

        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());
        let resolved = get_real_ip().resolve(&mut headers);

        assert_eq!(resolved, Some("10.0.0.1".parse().unwrap()));
    }
}
