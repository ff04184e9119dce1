//! Node configuration from the environment.

use std::time::Duration;

use rumor_protocols::{DeliveryMode, GossipConfig, RetryPolicy};

use crate::error::{Error, Result};

/// Configuration for a Rumor node.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeConfig {
    /// Gossip delivery settings
    pub gossip: GossipConfig,
}

impl NodeConfig {
    /// Create config from environment variables with sensible defaults.
    ///
    /// - `RUMOR_DELIVERY`: `reliable` (default) or `fire-and-forget`
    /// - `RUMOR_DELIVERY_DEADLINE_MS`: per-neighbor deadline (default 5000)
    /// - `RUMOR_RETRY_BACKOFF_MS`: pause between attempts (default 500)
    /// - `RUMOR_ATTEMPT_TIMEOUT_MS`: wait for each ack (default 1000)
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Create config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = RetryPolicy::default();
        let policy = RetryPolicy {
            deadline: millis(&lookup, "RUMOR_DELIVERY_DEADLINE_MS")?.unwrap_or(defaults.deadline),
            backoff: millis(&lookup, "RUMOR_RETRY_BACKOFF_MS")?.unwrap_or(defaults.backoff),
            attempt_timeout: millis(&lookup, "RUMOR_ATTEMPT_TIMEOUT_MS")?
                .unwrap_or(defaults.attempt_timeout),
        };

        let mode = match lookup("RUMOR_DELIVERY").as_deref().map(str::trim) {
            None | Some("") | Some("reliable") => DeliveryMode::Reliable(policy),
            Some("fire-and-forget") => DeliveryMode::FireAndForget,
            Some(other) => {
                return Err(Error::Config(format!(
                    "RUMOR_DELIVERY must be 'reliable' or 'fire-and-forget', got '{}'",
                    other
                )))
            }
        };

        Ok(Self {
            gossip: GossipConfig::default().with_mode(mode),
        })
    }
}

fn millis<F>(lookup: &F, key: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map(|ms| Some(Duration::from_millis(ms)))
            .map_err(|e| Error::Config(format!("Invalid {}: {} ({})", key, raw, e))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> Result<NodeConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        NodeConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_to_reliable_delivery() {
        let config = config(&[]).unwrap();
        assert_eq!(config, NodeConfig::default());
        assert_eq!(config.gossip.mode, DeliveryMode::Reliable(RetryPolicy::default()));
    }

    #[test]
    fn reads_retry_policy() {
        let config = config(&[
            ("RUMOR_DELIVERY_DEADLINE_MS", "2000"),
            ("RUMOR_RETRY_BACKOFF_MS", "100"),
            ("RUMOR_ATTEMPT_TIMEOUT_MS", " 250 "),
        ])
        .unwrap();

        let DeliveryMode::Reliable(policy) = config.gossip.mode else {
            panic!("expected reliable mode");
        };
        assert_eq!(policy.deadline, Duration::from_secs(2));
        assert_eq!(policy.backoff, Duration::from_millis(100));
        assert_eq!(policy.attempt_timeout, Duration::from_millis(250));
    }

    #[test]
    fn selects_fire_and_forget() {
        let config = config(&[("RUMOR_DELIVERY", "fire-and-forget")]).unwrap();
        assert_eq!(config.gossip.mode, DeliveryMode::FireAndForget);
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            config(&[("RUMOR_DELIVERY", "carrier-pigeon")]),
            Err(Error::Config(_))
        ));
        assert!(matches!(
            config(&[("RUMOR_RETRY_BACKOFF_MS", "soon")]),
            Err(Error::Config(_))
        ));
    }
}
