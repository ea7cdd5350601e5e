use std::str::FromStr;

use http::uri::PathAndQuery;

use super::incoming::RequestHandle;
use crate::config;

/// Backend and upstream path selected for one request.
pub struct RoutingContext {
    pub backend: config::BackendConfiguration,
    pub path: PathAndQuery,
}

impl RoutingContext {
    /// Picks the routing entry matching the request host, then walks its
    /// rules in order. The first matching rule decides the backend and the
    /// upstream path; without a match the default backend receives the
    /// request path unchanged.
    pub fn from_request(request: &RequestHandle) -> Option<Self> {
        let cfg = &config::get().routing;
        let routing = cfg
            .iter()
            .find(|r| r.domain.as_str() == request.get_host().as_str())?
            .to_owned();
        let default_backend = routing.backends.iter().find(|b| b.default)?;

        let mut upstream_backend: Option<&config::BackendConfiguration> = None;
        let mut upstream_path: Option<PathAndQuery> = None;
        for rule in routing.rules {
            match (rule.path, rule.path_prefix) {
                (Some(path), _) => {
                    if *request.get_path_and_query() == path.as_str() {
                        upstream_backend = match rule.backend {
                            Some(name) => routing.backends.iter().find(|b| b.name == name),
                            None => Some(default_backend),
                        };
                        upstream_path = match rule.rewrite {
                            Some(replacement) => PathAndQuery::from_str(&replacement).ok(),
                            None => PathAndQuery::from_str(&path).ok(),
                        };
                        break;
                    }
                }
                (None, Some(prefix)) => {
                    if request
                        .get_path_and_query()
                        .to_string()
                        .starts_with(&prefix)
                    {
                        upstream_backend = match rule.backend {
                            Some(name) => routing.backends.iter().find(|b| b.name == name),
                            None => Some(default_backend),
                        };
                        upstream_path = match rule.rewrite {
                            Some(replacement) => {
                                let new_path = request.get_path_and_query().to_string().replacen(
                                    &prefix,
                                    &replacement,
                                    1,
                                );
                                PathAndQuery::from_str(&new_path).ok()
                            }
                            None => Some(request.get_path_and_query().clone()),
                        };
                        break;
                    }
                }
                (None, None) => {}
            }
        }

        let backend = upstream_backend.unwrap_or(default_backend).to_owned();
        let path = upstream_path.unwrap_or(request.get_path_and_query().clone());

        Some(Self { backend, path })
    }
}
