use std::convert::Infallible;
use std::net::SocketAddr;

use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::BodyExt;
use hyper::body::Incoming;
use tracing::{error, info};

use context::{incoming::IncomingContext, proxy::ProxyContext, routing::RoutingContext};

pub(crate) mod context;
mod controller;

pub type Request = http::Request<Incoming>;
type Response = http::Response<BoxBody<Bytes, Infallible>>;

/// Handles one client request: resolve the real client IP, pick the backend
/// for the request host, forward, and relay the upstream response.
///
/// The resolver runs while the incoming context is built, so the headers
/// seen by routing and forwarding already carry its mutations.
pub async fn handle_request(
    http_request: Request,
    remote_addr: SocketAddr,
) -> anyhow::Result<Response> {
    // timer
    let timer_start = std::time::Instant::now();

    let ctx = IncomingContext::new(http_request, remote_addr);
    let request = &ctx.get_request().clone();

    // define the backend
    let routing_ctx = match RoutingContext::from_request(request) {
        None => {
            error!("backend not found");
            return controller::bad_gateway_error(request, timer_start);
        }
        Some(r) => r,
    };

    // Amend proxy request with useful headers
    let proxy_ctx = ProxyContext::new(ctx, &routing_ctx);

    // send request and get response
    match proxy_ctx.forward_request().await {
        Err(err) => {
            error!("backend request failed: {}", err);
            controller::bad_gateway_error(request, timer_start)
        }
        Ok(upstream) => {
            let (response, body) = upstream.into_parts();
            let response_body = body.collect().await?.to_bytes();

            info!(
                "{} - {} - {} {}{} - {}ms",
                response.status.as_str(),
                request.get_client_ip(),
                request.get_method(),
                request.get_host(),
                request.get_path(),
                timer_start.elapsed().as_millis()
            );

            Ok(controller::build_response(response, response_body))
        }
    }
}
