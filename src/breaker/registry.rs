//! Registry of named circuit breakers

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::Config;
use crate::Result;

use super::machine::CircuitBreaker;
use super::metrics::BreakerStatus;
use super::settings::BreakerSettings;

/// Shared collection of breakers, keyed by name.
///
/// Handed around as an `Arc` by whoever owns the process wiring; there
/// is no process-global instance. Lookups that miss provision a new
/// breaker from the registry's default settings, so callers can guard
/// a dependency without declaring it up front.
#[derive(Debug, Default)]
pub struct BreakerRegistry {
    breakers: DashMap<String, Arc<CircuitBreaker>>,
    defaults: BreakerSettings,
}

impl BreakerRegistry {
    /// Empty registry with built-in default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty registry whose auto-provisioned breakers use `defaults`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`](crate::Error::InvalidSettings)
    /// when `defaults` is out of range.
    pub fn with_defaults(defaults: BreakerSettings) -> Result<Self> {
        defaults.validate("defaults")?;
        Ok(Self {
            breakers: DashMap::new(),
            defaults,
        })
    }

    /// Registry seeded from a loaded config: its `defaults` section
    /// plus one registered breaker per `breakers` entry.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`](crate::Error::InvalidSettings)
    /// when any settings entry is out of range.
    pub fn from_config(config: &Config) -> Result<Self> {
        let registry = Self::with_defaults(config.defaults.clone())?;
        for (name, settings) in &config.breakers {
            registry.register(name.clone(), settings.clone())?;
        }
        Ok(registry)
    }

    /// Register a breaker under `name`, replacing any existing one.
    ///
    /// Replacement discards the old breaker's counters and is logged
    /// at warn level.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSettings`](crate::Error::InvalidSettings)
    /// when `settings` is out of range.
    pub fn register(
        &self,
        name: impl Into<String>,
        settings: BreakerSettings,
    ) -> Result<Arc<CircuitBreaker>> {
        let name = name.into();
        settings.validate(&name)?;
        Ok(self.insert(name, settings))
    }

    /// Register a breaker under `name` with the registry's default
    /// settings, replacing any existing one.
    ///
    /// Infallible: the defaults were validated when the registry was
    /// built.
    pub fn register_default(&self, name: impl Into<String>) -> Arc<CircuitBreaker> {
        self.insert(name.into(), self.defaults.clone())
    }

    fn insert(&self, name: String, settings: BreakerSettings) -> Arc<CircuitBreaker> {
        let breaker = Arc::new(CircuitBreaker::from_validated(name.clone(), settings));
        if self
            .breakers
            .insert(name.clone(), Arc::clone(&breaker))
            .is_some()
        {
            warn!(breaker = %name, "replacing existing breaker registration");
        } else {
            info!(breaker = %name, "registered breaker");
        }
        breaker
    }

    /// Breaker registered under `name`, provisioning one with the
    /// registry defaults on a miss.
    #[must_use]
    pub fn get(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.breakers.get(name) {
            return Arc::clone(&existing);
        }
        let entry = self.breakers.entry(name.to_string()).or_insert_with(|| {
            info!(breaker = %name, "auto-provisioning breaker with default settings");
            Arc::new(CircuitBreaker::from_validated(name, self.defaults.clone()))
        });
        Arc::clone(&entry)
    }

    /// Breaker registered under `name`, without provisioning.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(name).map(|entry| Arc::clone(&entry))
    }

    /// Status snapshot of every registered breaker.
    #[must_use]
    pub fn get_all_status(&self) -> HashMap<String, BreakerStatus> {
        self.breakers
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().status()))
            .collect()
    }

    /// Force every breaker closed. Returns how many were reset.
    pub fn reset_all(&self) -> usize {
        let mut count = 0;
        for entry in &self.breakers {
            entry.value().reset();
            count += 1;
        }
        info!(count, "reset all breakers");
        count
    }

    /// Default settings applied to auto-provisioned breakers.
    #[must_use]
    pub fn defaults(&self) -> &BreakerSettings {
        &self.defaults
    }

    /// Whether a breaker is registered under `name`.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.breakers.contains_key(name)
    }

    /// Number of registered breakers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    /// Whether the registry holds no breakers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }

    /// Names of all registered breakers, in no particular order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.breakers.iter().map(|entry| entry.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn get_provisions_with_registry_defaults() {
        let defaults = BreakerSettings {
            failure_threshold: 7,
            ..Default::default()
        };
        let registry = BreakerRegistry::with_defaults(defaults).unwrap();
        assert!(registry.is_empty());

        let breaker = registry.get("vertex_ai");
        assert_eq!(breaker.settings().failure_threshold, 7);
        assert_eq!(registry.len(), 1);
        assert!(registry.contains("vertex_ai"));
    }

    #[test]
    fn lookup_does_not_provision() {
        let registry = BreakerRegistry::new();
        assert!(registry.lookup("redis").is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn register_replaces_and_discards_counters() {
        let registry = BreakerRegistry::new();
        let first = registry
            .register("supabase", BreakerSettings::default())
            .unwrap();
        first.record_failure();
        assert_eq!(first.metrics().failed_requests, 1);

        let second = registry
            .register("supabase", BreakerSettings::default())
            .unwrap();
        assert!(!Arc::ptr_eq(&first, &second));
        assert_eq!(second.metrics().failed_requests, 0);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn invalid_defaults_rejected() {
        let defaults = BreakerSettings {
            timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(BreakerRegistry::with_defaults(defaults).is_err());
    }

    #[test]
    fn register_default_uses_registry_defaults() {
        let defaults = BreakerSettings {
            failure_threshold: 9,
            ..Default::default()
        };
        let registry = BreakerRegistry::with_defaults(defaults).unwrap();
        let breaker = registry.register_default("vertex_ai");
        assert_eq!(breaker.settings().failure_threshold, 9);
        assert!(registry.contains("vertex_ai"));
    }
}
