//! # Route Policy Resolution
//!
//! Resolves exactly one policy per request, deterministically:
//!
//! 1. an exact (wildcard-free) table entry for the path wins outright
//! 2. otherwise the matching pattern with the highest specificity wins,
//!    ties broken lexicographically by pattern text
//! 3. with no table match, default protection decides: known public paths
//!    and prefixes pass as public, everything else requires authentication
//!
//! The same path always resolves to the same policy for the life of a
//! loaded configuration.

use std::sync::Arc;
use tracing::debug;

use crate::core::config::{DefaultProtectionConfig, GatekeeperConfig};
use crate::core::types::{PolicySource, ResolvedPolicy, RoutePolicy};
use crate::routing::pattern::PathPattern;

pub struct RouteConfigResolver {
    entries: Vec<(PathPattern, Arc<RoutePolicy>)>,
    defaults: DefaultProtectionConfig,
    default_public: Arc<RoutePolicy>,
    default_protected: Arc<RoutePolicy>,
}

impl RouteConfigResolver {
    pub fn new(config: &GatekeeperConfig) -> Self {
        // BTreeMap ordering makes the entry list, and therefore lexicographic
        // tie-breaking, deterministic
        let entries = config
            .policies
            .iter()
            .map(|(pattern, policy)| (PathPattern::parse(pattern), Arc::new(policy.clone())))
            .collect();
        Self {
            entries,
            defaults: config.defaults.clone(),
            default_public: Arc::new(RoutePolicy::public()),
            default_protected: Arc::new(RoutePolicy::authenticated()),
        }
    }

    /// Attach a custom check to a policy after construction. Policies come
    /// from YAML; checks only exist in code.
    pub fn set_custom_check(
        &mut self,
        pattern: &str,
        check: Arc<dyn crate::core::types::CustomCheck>,
    ) {
        for (p, policy) in &mut self.entries {
            if p.raw() == pattern {
                let mut updated = (**policy).clone();
                updated.custom = Some(Arc::clone(&check));
                *policy = Arc::new(updated);
            }
        }
    }

    pub fn resolve(&self, path: &str) -> ResolvedPolicy {
        // exact entries short-circuit pattern scoring
        for (pattern, policy) in &self.entries {
            if pattern.is_exact() && pattern.matches(path) {
                debug!(%path, pattern = pattern.raw(), "policy resolved by exact match");
                return ResolvedPolicy {
                    source: PolicySource::Exact(pattern.raw().to_string()),
                    policy: Arc::clone(policy),
                };
            }
        }

        let best = self
            .entries
            .iter()
            .filter(|(pattern, _)| !pattern.is_exact() && pattern.matches(path))
            .max_by(|(a, _), (b, _)| {
                a.specificity()
                    .cmp(&b.specificity())
                    // reversed raw comparison: lexicographically smaller wins ties
                    .then_with(|| b.raw().cmp(a.raw()))
            });

        if let Some((pattern, policy)) = best {
            debug!(%path, pattern = pattern.raw(), "policy resolved by pattern match");
            return ResolvedPolicy {
                source: PolicySource::Pattern(pattern.raw().to_string()),
                policy: Arc::clone(policy),
            };
        }

        if self.is_default_public(path) {
            ResolvedPolicy {
                source: PolicySource::DefaultPublic,
                policy: Arc::clone(&self.default_public),
            }
        } else {
            ResolvedPolicy {
                source: PolicySource::DefaultProtected,
                policy: Arc::clone(&self.default_protected),
            }
        }
    }

    fn is_default_public(&self, path: &str) -> bool {
        let normalized = path.trim_end_matches('/');
        let normalized = if normalized.is_empty() { "/" } else { normalized };
        self.defaults
            .public_paths
            .iter()
            .any(|p| p.trim_end_matches('/') == normalized || p == path)
            || self
                .defaults
                .public_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::SecurityLevel;

    fn config_with(patterns: &[(&str, RoutePolicy)]) -> GatekeeperConfig {
        let mut config = GatekeeperConfig::default();
        for (pattern, policy) in patterns {
            config.policies.insert(pattern.to_string(), policy.clone());
        }
        config
    }

    fn role_based() -> RoutePolicy {
        RoutePolicy {
            security_level: SecurityLevel::RoleBased,
            ..RoutePolicy::public()
        }
    }

    #[test]
    fn test_exact_beats_pattern() {
        let config = config_with(&[
            ("/api/centers/special", role_based()),
            ("/api/centers/*", RoutePolicy::authenticated()),
        ]);
        let resolver = RouteConfigResolver::new(&config);

        let resolved = resolver.resolve("/api/centers/special");
        assert_eq!(
            resolved.source,
            PolicySource::Exact("/api/centers/special".to_string())
        );
        assert_eq!(resolved.policy.security_level, SecurityLevel::RoleBased);
    }

    #[test]
    fn test_most_specific_pattern_wins() {
        let config = config_with(&[
            ("/api/**", RoutePolicy::public()),
            ("/api/admin/**", role_based()),
        ]);
        let resolver = RouteConfigResolver::new(&config);

        let resolved = resolver.resolve("/api/admin/users");
        assert_eq!(
            resolved.source,
            PolicySource::Pattern("/api/admin/**".to_string())
        );

        let resolved = resolver.resolve("/api/centers");
        assert_eq!(resolved.source, PolicySource::Pattern("/api/**".to_string()));
    }

    #[test]
    fn test_tie_breaks_lexicographically() {
        // equal specificity (same non-'*' character count)
        let config = config_with(&[
            ("/x/ab/*", RoutePolicy::authenticated()),
            ("/x/aa/*", role_based()),
        ]);
        let resolver = RouteConfigResolver::new(&config);

        // only one matches here, sanity check first
        assert_eq!(
            resolver.resolve("/x/aa/1").source,
            PolicySource::Pattern("/x/aa/*".to_string())
        );

        let config = config_with(&[
            ("/x/*/b", RoutePolicy::authenticated()),
            ("/x/b/*", role_based()),
        ]);
        let resolver = RouteConfigResolver::new(&config);
        let resolved = resolver.resolve("/x/b/b");
        assert_eq!(resolved.source, PolicySource::Pattern("/x/*/b".to_string()));
    }

    #[test]
    fn test_default_public_paths_and_prefixes() {
        let resolver = RouteConfigResolver::new(&GatekeeperConfig::default());

        assert_eq!(resolver.resolve("/").source, PolicySource::DefaultPublic);
        assert_eq!(resolver.resolve("/login").source, PolicySource::DefaultPublic);
        assert_eq!(
            resolver.resolve("/assets/app.css").source,
            PolicySource::DefaultPublic
        );
    }

    #[test]
    fn test_unknown_path_defaults_to_protected() {
        let resolver = RouteConfigResolver::new(&GatekeeperConfig::default());
        let resolved = resolver.resolve("/dashboard");
        assert_eq!(resolved.source, PolicySource::DefaultProtected);
        assert_eq!(
            resolved.policy.security_level,
            SecurityLevel::Authenticated
        );
    }

    #[test]
    fn test_resolution_is_deterministic() {
        let config = config_with(&[
            ("/api/**", RoutePolicy::public()),
            ("/api/admin/**", role_based()),
        ]);
        let resolver = RouteConfigResolver::new(&config);
        let first = resolver.resolve("/api/admin/users");
        for _ in 0..10 {
            assert_eq!(resolver.resolve("/api/admin/users").source, first.source);
        }
    }
}
