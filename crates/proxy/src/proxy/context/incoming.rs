use std::net::SocketAddr;
use std::str::FromStr;

use http::{header::HOST, uri::PathAndQuery, HeaderMap};
use hyper::body::Incoming;

pub struct IncomingContext {
    pub body: Incoming,
    pub request: RequestHandle,
}

impl IncomingContext {
    /// Splits the request into parts and runs the real IP resolver over its
    /// headers. This is the only point where the header set is mutated; the
    /// handle passed to routing and forwarding already reflects the outcome.
    pub fn new(request: http::Request<Incoming>, remote_addr: SocketAddr) -> Self {
        let (mut parts, body) = request.into_parts();

        let root_path = PathAndQuery::from_str("/").expect("'/' should be a valid path");
        let path = parts.uri.path_and_query().unwrap_or(&root_path).to_owned();

        // Behind a TLS-terminating hop the scheme arrives in x-forwarded-proto
        let proto = if parts
            .headers
            .get("x-forwarded-proto")
            .and_then(|value| value.to_str().ok())
            == Some("https")
        {
            "https"
        } else {
            "http"
        };

        let resolved_ip = crate::get_real_ip().resolve(&mut parts.headers);

        // a request whose chain resolves to nothing is attributed to the
        // peer address for logging
        let client_ip = resolved_ip
            .map(|ip| ip.to_string())
            .unwrap_or_else(|| remote_addr.ip().to_string());

        let req = RequestHandle {
            host: match (parts.headers.get(HOST), parts.uri.host()) {
                (None, Some(value)) => Some(String::from(value)),
                (Some(value), _) => value.to_str().ok().map(|host| host.to_string()),
                (None, None) => None,
            }
            .and_then(|host| host.split(':').next().map(|s| s.to_string()))
            .unwrap_or_default(),
            path: path.path().to_string(),
            method: parts.method,
            path_and_query: path,
            headers: parts.headers,
            proto: proto.to_string(),
            client_ip,
            peer_ip: remote_addr.ip().to_string(),
        };

        Self { body, request: req }
    }

    pub fn get_request(&self) -> &RequestHandle {
        &self.request
    }
}

/// Read-only view of the inbound request, with the resolver's header
/// mutations already applied.
#[derive(Debug, Clone)]
pub struct RequestHandle {
    headers: HeaderMap,
    method: http::Method,
    proto: String,
    client_ip: String,
    peer_ip: String,
    host: String,
    path: String,
    path_and_query: PathAndQuery,
}

impl Default for RequestHandle {
    fn default() -> Self {
        Self {
            headers: HeaderMap::new(),
            method: http::Method::GET,
            proto: "http".to_string(),
            client_ip: String::new(),
            peer_ip: String::new(),
            host: String::new(),
            path: "/".to_string(),
            path_and_query: PathAndQuery::from_str("/").unwrap(),
        }
    }
}

impl RequestHandle {
    pub fn get_headers(&self) -> &HeaderMap {
        &self.headers
    }

    #[cfg(test)]
    pub fn default_with_host_and_path(host: &str, path_and_query: &str) -> Self {
        Self {
            host: host.to_string(),
            path: path_and_query
                .split('?')
                .next()
                .unwrap_or(path_and_query)
                .to_string(),
            path_and_query: PathAndQuery::from_str(path_and_query).unwrap(),
            ..Default::default()
        }
    }

    pub fn get_method(&self) -> &http::Method {
        &self.method
    }

    pub fn get_proto(&self) -> &String {
        &self.proto
    }

    pub fn get_client_ip(&self) -> &String {
        &self.client_ip
    }

    pub fn get_peer_ip(&self) -> &String {
        &self.peer_ip
    }

    pub fn get_host(&self) -> &String {
        &self.host
    }

    pub fn get_path(&self) -> &String {
        &self.path
    }

    pub fn get_path_and_query(&self) -> &PathAndQuery {
        &self.path_and_query
    }
}
