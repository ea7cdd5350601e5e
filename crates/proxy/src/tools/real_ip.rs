use std::net::IpAddr;
use std::str::FromStr;

use http::{HeaderMap, HeaderName, HeaderValue};
use ipnetwork::IpNetwork;

use crate::config::RealIpConfiguration;

/// Header receiving the resolved client address.
pub const REAL_IP_HEADER: HeaderName = HeaderName::from_static("x-real-ip");

/// Generic forwarding header, always kept as the last candidate source.
pub const FORWARDED_FOR_HEADER: HeaderName = HeaderName::from_static("x-forwarded-for");

/// Errors raised while building a [`RealIp`] resolver from configuration.
///
/// Construction stops at the first invalid entry so that a partially parsed
/// exclusion set never becomes active.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An excluded network entry is not a valid CIDR.
    #[error("invalid excluded network `{cidr}`: {source}")]
    InvalidNetwork {
        cidr: String,
        source: ipnetwork::IpNetworkError,
    },

    /// An excluded network entry has no explicit prefix length.
    #[error("excluded network `{0}` is missing a prefix length")]
    MissingPrefix(String),

    /// A candidate header entry is not a valid HTTP header name.
    #[error("invalid candidate header name `{0}`")]
    InvalidHeaderName(String),
}

/// Resolves the real client IP from proxy-supplied forwarding headers.
///
/// The resolver holds the parsed exclusion set and the candidate header list.
/// Both are immutable once built and can be shared across any number of
/// concurrent requests; all per-request work happens on the request's own
/// header map.
#[derive(Debug)]
pub struct RealIp {
    excluded: Vec<IpNetwork>,
    candidates: Vec<HeaderName>,
    clean_forwarded: bool,
}

impl RealIp {
    /// Builds a resolver from the `[real_ip]` configuration section.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] naming the offending entry when an excluded
    /// network is not valid CIDR notation (a bare address without a prefix
    /// length is rejected) or a candidate header is not a valid header name.
    pub fn new(config: &RealIpConfiguration) -> Result<Self, ConfigError> {
        let mut excluded = Vec::with_capacity(config.excluded_networks.len());
        for cidr in &config.excluded_networks {
            // ipnetwork promotes a bare address to a full-length prefix;
            // the exclusion list requires an explicit one.
            if !cidr.contains('/') {
                return Err(ConfigError::MissingPrefix(cidr.clone()));
            }

            let network =
                IpNetwork::from_str(cidr).map_err(|source| ConfigError::InvalidNetwork {
                    cidr: cidr.clone(),
                    source,
                })?;
            excluded.push(network);
        }

        let mut candidates = Vec::with_capacity(config.candidate_headers.len() + 1);
        for name in &config.candidate_headers {
            let header = HeaderName::from_str(name)
                .map_err(|_| ConfigError::InvalidHeaderName(name.clone()))?;
            candidates.push(header);
        }
        if !candidates.contains(&FORWARDED_FOR_HEADER) {
            candidates.push(FORWARDED_FOR_HEADER);
        }

        Ok(Self {
            excluded,
            candidates,
            clean_forwarded: config.clean_forwarded,
        })
    }

    /// Resolves the real client IP and applies the header mutations.
    ///
    /// The candidate headers are inspected in priority order and the first
    /// one carrying a non-empty address chain supplies the chain. The first
    /// admissible address of that chain is written to `x-real-ip`; when
    /// nothing is admissible, `x-real-ip` is removed even if the inbound
    /// request carried one. With cleaning enabled, the supplying header is
    /// rewritten to its admissible subset, or removed when the subset is
    /// empty.
    ///
    /// # Returns
    ///
    /// * `Option<IpAddr>` - The resolved address, or `None` when the chain
    ///   holds no admissible address.
    pub fn resolve(&self, headers: &mut HeaderMap) -> Option<IpAddr> {
        let Some((source, chain)) = self.find_chain(headers) else {
            headers.remove(REAL_IP_HEADER);
            return None;
        };

        let mut resolved = None;
        let mut admissible = Vec::new();
        for address in &chain {
            if let Some(ip) = self.admissible(address) {
                resolved.get_or_insert(ip);
                admissible.push(address.as_str());
            }
        }

        match resolved {
            Some(ip) => {
                headers.insert(
                    REAL_IP_HEADER,
                    HeaderValue::from_str(&ip.to_string()).expect("IP should be a valid value"),
                );
            }
            None => {
                headers.remove(REAL_IP_HEADER);
            }
        }

        if self.clean_forwarded {
            if admissible.is_empty() {
                headers.remove(&source);
            } else {
                headers.insert(
                    &source,
                    HeaderValue::from_str(&admissible.join(", "))
                        .expect("addresses should be valid values"),
                );
            }
        }

        resolved
    }

    /// Returns the first candidate header that yields a non-empty address
    /// chain, together with the chain.
    ///
    /// Later candidates are only consulted while headers are absent or
    /// empty. Once a chain is found it is final, even when none of its
    /// entries turn out to be admissible. A header with several values
    /// contributes them to a single chain, in field order.
    fn find_chain(&self, headers: &HeaderMap) -> Option<(HeaderName, Vec<String>)> {
        for name in &self.candidates {
            let chain: Vec<String> = headers
                .get_all(name)
                .iter()
                .filter_map(|value| value.to_str().ok())
                .flat_map(|value| value.split(','))
                .map(str::trim)
                .filter(|address| !address.is_empty())
                .map(str::to_string)
                .collect();

            if !chain.is_empty() {
                return Some((name.clone(), chain));
            }
        }

        None
    }

    /// Parses one chain entry, keeping it only when it is a syntactically
    /// valid IP outside every excluded network. Unparseable entries are
    /// skipped, never fatal.
    fn admissible(&self, address: &str) -> Option<IpAddr> {
        let ip: IpAddr = address.parse().ok()?;
        if self.is_excluded(ip) {
            return None;
        }

        Some(ip)
    }

    fn is_excluded(&self, ip: IpAddr) -> bool {
        self.excluded.iter().any(|network| network.contains(ip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn resolver(excluded: &[&str], clean_forwarded: bool) -> RealIp {
        RealIp::new(&RealIpConfiguration {
            excluded_networks: excluded.iter().map(|s| s.to_string()).collect(),
            candidate_headers: vec!["cf-connecting-ip".to_string()],
            clean_forwarded,
        })
        .unwrap()
    }

    fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
        headers.get(name).map(|value| value.to_str().unwrap())
    }

    #[test]
    fn excluded_chain_is_cleaned_and_real_ip_stays_absent() {
        let realip = resolver(&["127.0.0.1/24"], true);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "127.0.0.2".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, None);
        assert_eq!(header_str(&headers, "x-real-ip"), None);
        assert_eq!(header_str(&headers, "x-forwarded-for"), None);
    }

    #[test]
    fn admissible_address_is_forwarded_and_kept_in_cleaned_header() {
        let realip = resolver(&["127.0.0.1/24"], true);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(header_str(&headers, "x-real-ip"), Some("10.0.0.1"));
        assert_eq!(header_str(&headers, "x-forwarded-for"), Some("10.0.0.1"));
    }

    #[test]
    fn cdn_header_takes_priority_over_forwarded_for() {
        let realip = resolver(&["127.0.0.1/24"], true);
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "10.0.0.1".parse().unwrap());
        headers.insert("x-forwarded-for", "127.0.0.2".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(header_str(&headers, "x-real-ip"), Some("10.0.0.1"));
        // only the supplying header is rewritten
        assert_eq!(header_str(&headers, "cf-connecting-ip"), Some("10.0.0.1"));
        assert_eq!(header_str(&headers, "x-forwarded-for"), Some("127.0.0.2"));
    }

    #[test]
    fn disabled_cleaning_leaves_the_header_untouched_on_success() {
        let realip = resolver(&["127.0.0.1/24"], false);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(header_str(&headers, "x-real-ip"), Some("10.0.0.1"));
        assert_eq!(header_str(&headers, "x-forwarded-for"), Some("10.0.0.1"));
    }

    #[test]
    fn disabled_cleaning_preserves_excluded_addresses_verbatim() {
        let realip = resolver(&["127.0.0.1/24"], false);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "127.0.0.2".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, None);
        assert_eq!(header_str(&headers, "x-real-ip"), None);
        assert_eq!(header_str(&headers, "x-forwarded-for"), Some("127.0.0.2"));
    }

    #[test]
    fn first_admissible_address_in_chain_order_wins() {
        let realip = resolver(&["127.0.0.1/24"], false);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "127.0.0.2, 10.0.0.1, 8.8.8.8".parse().unwrap(),
        );

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn cleaning_drops_excluded_and_unparseable_entries_in_order() {
        let realip = resolver(&["127.0.0.1/24"], true);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "127.0.0.2, 10.0.0.1, not-an-ip, 8.8.8.8".parse().unwrap(),
        );

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(
            header_str(&headers, "x-forwarded-for"),
            Some("10.0.0.1, 8.8.8.8")
        );
    }

    #[test]
    fn exhausted_chain_does_not_fall_back_to_later_headers() {
        let realip = resolver(&["127.0.0.1/24"], false);
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "127.0.0.5".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, None);
        assert_eq!(header_str(&headers, "x-real-ip"), None);
        assert_eq!(header_str(&headers, "x-forwarded-for"), Some("10.0.0.1"));
    }

    #[test]
    fn empty_candidate_header_falls_through_to_the_next_one() {
        let realip = resolver(&["127.0.0.1/24"], false);
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", "".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn comma_only_candidate_header_counts_as_empty() {
        let realip = resolver(&["127.0.0.1/24"], false);
        let mut headers = HeaderMap::new();
        headers.insert("cf-connecting-ip", " , ".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("10.0.0.1".parse().unwrap()));
    }

    #[test]
    fn multiple_header_values_form_a_single_chain_in_field_order() {
        let realip = resolver(&["127.0.0.1/24"], true);
        let mut headers = HeaderMap::new();
        headers.append("x-forwarded-for", "127.0.0.2".parse().unwrap());
        headers.append("x-forwarded-for", "10.0.0.1, 8.8.8.8".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("10.0.0.1".parse().unwrap()));
        assert_eq!(
            header_str(&headers, "x-forwarded-for"),
            Some("10.0.0.1, 8.8.8.8")
        );
    }

    #[test]
    fn inbound_real_ip_header_is_cleared_when_nothing_resolves() {
        let realip = resolver(&["127.0.0.1/24"], false);
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        headers.insert("x-forwarded-for", "127.0.0.2".parse().unwrap());

        assert_eq!(realip.resolve(&mut headers), None);
        assert_eq!(header_str(&headers, "x-real-ip"), None);
    }

    #[test]
    fn inbound_real_ip_header_is_cleared_without_any_chain() {
        let realip = resolver(&["127.0.0.1/24"], false);
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());

        assert_eq!(realip.resolve(&mut headers), None);
        assert_eq!(header_str(&headers, "x-real-ip"), None);
    }

    #[test]
    fn inbound_real_ip_header_is_overwritten_on_success() {
        let realip = resolver(&["127.0.0.1/24"], false);
        let mut headers = HeaderMap::new();
        headers.insert("x-real-ip", "9.9.9.9".parse().unwrap());
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        assert_eq!(
            realip.resolve(&mut headers),
            Some("10.0.0.1".parse().unwrap())
        );
        assert_eq!(header_str(&headers, "x-real-ip"), Some("10.0.0.1"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let realip = resolver(&["127.0.0.1/24"], true);

        let mut first = HeaderMap::new();
        first.insert("x-forwarded-for", "127.0.0.2, 10.0.0.1".parse().unwrap());
        let mut second = first.clone();

        assert_eq!(realip.resolve(&mut first), realip.resolve(&mut second));
        assert_eq!(first, second);
    }

    #[test]
    fn cleaning_is_idempotent() {
        let realip = resolver(&["127.0.0.1/24"], true);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "127.0.0.2, 10.0.0.1, 8.8.8.8".parse().unwrap(),
        );

        let first = realip.resolve(&mut headers);
        let cleaned = headers.clone();
        let second = realip.resolve(&mut headers);

        assert_eq!(first, second);
        assert_eq!(headers, cleaned);
    }

    #[test]
    fn ipv6_networks_exclude_ipv6_addresses() {
        let realip = resolver(&["::1/128", "fc00::/7"], false);
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            "::1, fdab::1, 2001:db8::1".parse().unwrap(),
        );

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn exclusion_families_do_not_cross() {
        // an IPv4 range never captures an IPv6 address and vice versa
        let realip = resolver(&["10.0.0.0/8", "fc00::/7"], false);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "2001:db8::1, 10.1.2.3".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("2001:db8::1".parse().unwrap()));
    }

    #[test]
    fn overlapping_excluded_networks_still_exclude() {
        let realip = resolver(&["10.0.0.0/8", "10.1.0.0/16"], false);
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.1.2.3, 8.8.8.8".parse().unwrap());

        let resolved = realip.resolve(&mut headers);

        assert_eq!(resolved, Some("8.8.8.8".parse().unwrap()));
    }

    #[test]
    fn forwarded_for_is_always_appended_as_a_candidate() {
        let realip = RealIp::new(&RealIpConfiguration {
            excluded_networks: vec![],
            candidate_headers: vec!["true-client-ip".to_string()],
            clean_forwarded: false,
        })
        .unwrap();
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", "10.0.0.1".parse().unwrap());

        assert_eq!(
            realip.resolve(&mut headers),
            Some("10.0.0.1".parse().unwrap())
        );
    }

    #[test]
    fn invalid_cidr_aborts_construction_naming_the_entry() {
        let err = RealIp::new(&RealIpConfiguration {
            excluded_networks: vec!["10.0.0.0/8".to_string(), "300.0.0.0/8".to_string()],
            candidate_headers: vec![],
            clean_forwarded: false,
        })
        .unwrap_err();

        assert!(err.to_string().contains("300.0.0.0/8"));
    }

    #[test]
    fn bare_address_without_prefix_is_rejected() {
        let err = RealIp::new(&RealIpConfiguration {
            excluded_networks: vec!["10.0.0.1".to_string()],
            candidate_headers: vec![],
            clean_forwarded: false,
        })
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "excluded network `10.0.0.1` is missing a prefix length"
        );
    }

    #[test]
    fn invalid_candidate_header_name_is_rejected() {
        let err = RealIp::new(&RealIpConfiguration {
            excluded_networks: vec![],
            candidate_headers: vec!["not a header".to_string()],
            clean_forwarded: false,
        })
        .unwrap_err();

        assert_eq!(
            err.to_string(),
            "invalid candidate header name `not a header`"
        );
    }
}
