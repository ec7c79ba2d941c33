//! Registered-domain type and pod sharding.

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Domain(pub String);

impl Domain {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Domain {
    fn from(s: String) -> Self {
        Domain(s)
    }
}

impl From<&str> for Domain {
    fn from(s: &str) -> Self {
        Domain(s.to_string())
    }
}

/// `hash(domain) mod n`, matching the teacher's own
/// `md5::compute(bytes) -> u128 -> % len` coordinator-routing idiom.
pub fn pod_for_domain(domain: &Domain, pod_count: usize) -> usize {
    let digest = md5::compute(domain.0.as_bytes());
    let hash = u128::from_le_bytes(digest.0) as usize;
    hash % pod_count
}

/// First two hex characters of `md5(domain)`, used to shard the frontier
/// directory per §6's on-disk layout (`frontiers/{first2hex}/{domain}.frontier`).
pub fn frontier_shard_prefix(domain: &Domain) -> String {
    let digest = md5::compute(domain.0.as_bytes());
    format!("{:02x}", digest[0])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sharding_is_deterministic_and_in_range() {
        let domain = Domain::from("example.com");
        let pod_count = 8;
        let a = pod_for_domain(&domain, pod_count);
        let b = pod_for_domain(&domain, pod_count);
        assert_eq!(a, b);
        assert!(a < pod_count);
    }

    #[test]
    fn different_domains_spread_across_pods() {
        let pod_count = 4;
        let pods: std::collections::HashSet<usize> = (0..64)
            .map(|i| Domain::from(format!("site-{i}.test")))
            .map(|d| pod_for_domain(&d, pod_count))
            .collect();
        // not a strict guarantee, but md5 should not collapse 64 distinct
        // domains onto a single pod out of 4.
        assert!(pods.len() > 1);
    }

    #[test]
    fn frontier_shard_prefix_is_two_hex_chars() {
        let domain = Domain::from("example.com");
        let prefix = frontier_shard_prefix(&domain);
        assert_eq!(prefix.len(), 2);
        assert!(prefix.chars().all(|c| c.is_ascii_hexdigit()));
    }

    proptest::proptest! {
        #[test]
        fn pod_for_domain_is_always_in_range(s in "[a-z0-9.-]{1,40}", pod_count in 1usize..64) {
            let domain = Domain::from(s);
            let pod = pod_for_domain(&domain, pod_count);
            proptest::prop_assert!(pod < pod_count);
        }

        #[test]
        fn pod_for_domain_is_stable_across_calls(s in "[a-z0-9.-]{1,40}", pod_count in 1usize..64) {
            let domain = Domain::from(s);
            let a = pod_for_domain(&domain, pod_count);
            let b = pod_for_domain(&domain, pod_count);
            proptest::prop_assert_eq!(a, b);
        }
    }
}
