//! Probe configuration.
//!
//! Values come from the environment first; command-line flags override them.

use anyhow::Context;
use crashme_enclave::{AffinityPolicy, EnclaveConfig, ForeignDestroy, ForeignUse};
use std::str::FromStr;

/// Default number of invocations per scenario
pub const DEFAULT_ROUNDS: usize = 5;

/// Probe configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeConfig {
    /// Invocations per scenario
    pub rounds: usize,

    /// Thread-affinity behavior of the simulated runtime
    pub policy: AffinityPolicy,

    /// Live instance limit of the simulated runtime
    pub max_instances: usize,

    /// Log filter used when `RUST_LOG` is unset
    pub log_filter: String,
}

/// Command-line overrides, applied on top of the environment
#[derive(Debug, Clone, Default)]
pub struct ProbeOverrides {
    pub rounds: Option<usize>,
    pub foreign_use: Option<ForeignUse>,
    pub foreign_destroy: Option<ForeignDestroy>,
    pub max_instances: Option<usize>,
}

impl ProbeConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let defaults = Self::default();

        let rounds = parse_var(&lookup, "CRASHME_ROUNDS")?.unwrap_or(defaults.rounds);

        let foreign_use =
            parse_var(&lookup, "CRASHME_FOREIGN_USE")?.unwrap_or(defaults.policy.foreign_use);

        let foreign_destroy = parse_var(&lookup, "CRASHME_FOREIGN_DESTROY")?
            .unwrap_or(defaults.policy.foreign_destroy);

        let max_instances =
            parse_var(&lookup, "CRASHME_MAX_INSTANCES")?.unwrap_or(defaults.max_instances);

        let log_filter = lookup("RUST_LOG").unwrap_or(defaults.log_filter);

        Ok(Self {
            rounds,
            policy: AffinityPolicy {
                foreign_use,
                foreign_destroy,
            },
            max_instances,
            log_filter,
        })
    }

    /// Apply command-line overrides
    pub fn with_overrides(mut self, overrides: &ProbeOverrides) -> Self {
        if let Some(rounds) = overrides.rounds {
            self.rounds = rounds;
        }
        if let Some(foreign_use) = overrides.foreign_use {
            self.policy.foreign_use = foreign_use;
        }
        if let Some(foreign_destroy) = overrides.foreign_destroy {
            self.policy.foreign_destroy = foreign_destroy;
        }
        if let Some(max_instances) = overrides.max_instances {
            self.max_instances = max_instances;
        }
        self
    }

    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.rounds == 0 {
            anyhow::bail!("rounds must be at least 1");
        }
        if self.max_instances == 0 {
            anyhow::bail!("max instances must be at least 1");
        }
        Ok(())
    }

    /// Runtime configuration for the simulated enclave
    pub fn enclave_config(&self) -> EnclaveConfig {
        EnclaveConfig::default()
            .with_name("crashme")
            .with_max_live_instances(self.max_instances)
    }

    /// Flags that reproduce this configuration in a child process
    pub fn child_args(&self) -> Vec<String> {
        vec![
            "--rounds".to_string(),
            self.rounds.to_string(),
            "--foreign-use".to_string(),
            self.policy.foreign_use.to_string(),
            "--foreign-destroy".to_string(),
            self.policy.foreign_destroy.to_string(),
            "--max-instances".to_string(),
            self.max_instances.to_string(),
        ]
    }
}

impl Default for ProbeConfig {
    fn default() -> Self {
        Self {
            rounds: DEFAULT_ROUNDS,
            policy: AffinityPolicy::default(),
            max_instances: EnclaveConfig::default().max_live_instances,
            log_filter: "warn".to_string(),
        }
    }
}

fn parse_var<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match lookup(key) {
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .with_context(|| format!("Invalid {}: '{}'", key, value)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_env() {
        let config = ProbeConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ProbeConfig::default());
        assert_eq!(config.rounds, 5);
        assert_eq!(config.policy.foreign_destroy, ForeignDestroy::Abort);
    }

    #[test]
    fn test_env_values() {
        let config = ProbeConfig::from_lookup(lookup(&[
            ("CRASHME_ROUNDS", "3"),
            ("CRASHME_FOREIGN_USE", "allow"),
            ("CRASHME_FOREIGN_DESTROY", "reject"),
            ("CRASHME_MAX_INSTANCES", "2"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.rounds, 3);
        assert_eq!(config.policy.foreign_use, ForeignUse::Allow);
        assert_eq!(config.policy.foreign_destroy, ForeignDestroy::Reject);
        assert_eq!(config.max_instances, 2);
        assert_eq!(config.log_filter, "debug");
    }

    #[test]
    fn test_invalid_env_value() {
        let err = ProbeConfig::from_lookup(lookup(&[("CRASHME_ROUNDS", "many")])).unwrap_err();
        assert!(err.to_string().contains("CRASHME_ROUNDS"));

        assert!(ProbeConfig::from_lookup(lookup(&[("CRASHME_FOREIGN_DESTROY", "explode")])).is_err());
    }

    #[test]
    fn test_overrides_win() {
        let config = ProbeConfig::from_lookup(lookup(&[("CRASHME_ROUNDS", "3")]))
            .unwrap()
            .with_overrides(&ProbeOverrides {
                rounds: Some(7),
                foreign_destroy: Some(ForeignDestroy::Allow),
                ..Default::default()
            });

        assert_eq!(config.rounds, 7);
        assert_eq!(config.policy.foreign_destroy, ForeignDestroy::Allow);
        assert_eq!(config.policy.foreign_use, ForeignUse::Reject);
    }

    #[test]
    fn test_validate() {
        assert!(ProbeConfig::default().validate().is_ok());

        let config = ProbeConfig {
            rounds: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_child_args_round_trip_policy() {
        let config = ProbeConfig::default().with_overrides(&ProbeOverrides {
            foreign_use: Some(ForeignUse::Allow),
            ..Default::default()
        });
        let args = config.child_args();

        assert_eq!(args[0], "--rounds");
        assert_eq!(args[3], "allow");
        assert_eq!(args[5].parse::<ForeignDestroy>().unwrap(), ForeignDestroy::Abort);
    }
}
