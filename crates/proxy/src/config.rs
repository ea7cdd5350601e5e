use std::collections::HashSet;
use std::sync::OnceLock;

use serde::Deserialize;
use tracing::level_filters::LevelFilter;

use crate::tools::real_ip::RealIp;

static CONFIG: OnceLock<StaticConfiguration> = OnceLock::new();

#[derive(Deserialize, Debug, Clone, Default)]
pub struct StaticConfiguration {
    #[serde(default)]
    pub log: LogConfiguration,

    pub http: Option<HttpConfiguration>,

    #[serde(default)]
    pub real_ip: RealIpConfiguration,

    #[serde(default)]
    pub routing: Vec<RoutingConfiguration>,
}

impl StaticConfiguration {
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let validators: Vec<Box<dyn Fn() -> Result<(), String>>> = vec![
            Box::new(|| self.validate_real_ip()),
            Box::new(|| self.validate_no_duplicate_domains()),
            Box::new(|| self.validate_backends()),
            // additional validation rules can be added here
        ];

        let errors: Vec<String> = validators
            .iter()
            .filter_map(|validate| validate().err())
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    // Fail closed: the resolver must be constructible from the exclusion
    // list before the server is allowed to start.
    fn validate_real_ip(&self) -> Result<(), String> {
        RealIp::new(&self.real_ip)
            .map(|_| ())
            .map_err(|err| err.to_string())
    }

    fn validate_no_duplicate_domains(&self) -> Result<(), String> {
        let mut seen = HashSet::new();
        let mut duplicates = HashSet::new();

        for route in &self.routing {
            if !seen.insert(&route.domain) {
                duplicates.insert(&route.domain);
            }
        }

        if !duplicates.is_empty() {
            Err(format!("duplicate domains found: {:?}", duplicates))
        } else {
            Ok(())
        }
    }

    fn validate_backends(&self) -> Result<(), String> {
        for route in &self.routing {
            if route.backends.is_empty() {
                return Err(format!("domain {} has no backend", route.domain));
            }
            if !route.backends.iter().any(|backend| backend.default) {
                return Err(format!("domain {} has no default backend", route.domain));
            }
        }

        Ok(())
    }
}

#[serde_with::serde_as]
#[derive(Deserialize, Debug, Clone)]
pub struct LogConfiguration {
    #[serde_as(as = "serde_with::DisplayFromStr")]
    pub level: LevelFilter,
    pub span: Option<String>,
}

impl Default for LogConfiguration {
    fn default() -> Self {
        Self {
            level: LevelFilter::INFO,
            span: None,
        }
    }
}

#[derive(Deserialize, Debug, Clone)]
pub struct HttpConfiguration {
    pub address: String,
}

/// Configuration of the real IP resolution step.
#[derive(Deserialize, Debug, Clone)]
pub struct RealIpConfiguration {
    /// CIDR ranges whose addresses never qualify as the client address.
    #[serde(default)]
    pub excluded_networks: Vec<String>,

    /// Headers inspected for an address chain, in priority order. The
    /// generic `x-forwarded-for` header is always kept as the last resort.
    #[serde(default = "default_candidate_headers")]
    pub candidate_headers: Vec<String>,

    /// Rewrite the header that supplied the chain to its admissible subset.
    #[serde(default)]
    pub clean_forwarded: bool,
}

impl Default for RealIpConfiguration {
    fn default() -> Self {
        Self {
            excluded_networks: Vec::new(),
            candidate_headers: default_candidate_headers(),
            clean_forwarded: false,
        }
    }
}

fn default_candidate_headers() -> Vec<String> {
    vec!["cf-connecting-ip".to_string()]
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct RoutingConfiguration {
    pub domain: String,
    #[serde(default)]
    pub rules: Vec<RoutingRulesConfiguration>,
    pub backends: Vec<BackendConfiguration>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct RoutingRulesConfiguration {
    pub path: Option<String>,
    pub path_prefix: Option<String>,
    pub rewrite: Option<String>,
    pub backend: Option<String>,
}

impl Default for RoutingRulesConfiguration {
    fn default() -> Self {
        Self {
            path: Default::default(),
            path_prefix: Some(String::from("/")),
            rewrite: Default::default(),
            backend: Default::default(),
        }
    }
}

#[derive(Deserialize, Debug, Clone, Default)]
pub struct BackendConfiguration {
    pub name: String,
    #[serde(default)]
    pub default: bool,
    pub address: String,
    #[serde(default)]
    pub enable_ssl: bool,
}

pub fn set(config: StaticConfiguration) {
    CONFIG.set(config).expect("should initialize config")
}

pub fn get() -> &'static StaticConfiguration {
    CONFIG
        .get()
        .expect("config module should have been initialized")
}

#[cfg(test)]
pub fn init_test_config() {
    let config = StaticConfiguration {
        log: Default::default(),
        http: Some(HttpConfiguration {
            address: "127.0.0.1:8080".to_string(),
        }),
        real_ip: RealIpConfiguration {
            excluded_networks: vec!["127.0.0.1/24".to_string()],
            candidate_headers: default_candidate_headers(),
            clean_forwarded: true,
        },
        routing: vec![RoutingConfiguration {
            domain: "example.com".to_string(),
            rules: vec![
                RoutingRulesConfiguration {
                    path: Some("/healthz".to_string()),
                    path_prefix: None,
                    rewrite: Some("/status".to_string()),
                    backend: None,
                },
                RoutingRulesConfiguration {
                    path: None,
                    path_prefix: Some("/api/".to_string()),
                    rewrite: Some("/".to_string()),
                    backend: Some("api".to_string()),
                },
            ],
            backends: vec![
                BackendConfiguration {
                    name: "origin".to_string(),
                    default: true,
                    address: "127.0.0.1:8000".to_string(),
                    enable_ssl: false,
                },
                BackendConfiguration {
                    name: "api".to_string(),
                    default: false,
                    address: "127.0.0.1:8001".to_string(),
                    enable_ssl: false,
                },
            ],
        }],
    };

    CONFIG.get_or_init(|| config);
}
