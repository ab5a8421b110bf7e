//! Discovery configuration.

use serde::Deserialize;

/// Knobs of one discovery run. Deserializable so deployments can feed it
/// from the environment.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DiscoverConfig {
    /// Per-SMP timeout handed to the transport.
    pub timeout_ms: u32,
    /// Retries per SMP before a failure is surfaced to the walk.
    pub retries: u32,
    /// Switch layers to walk; `None` walks everything.
    pub max_hops: Option<usize>,
}

impl Default for DiscoverConfig {
    fn default() -> Self {
        DiscoverConfig {
            timeout_ms: 2000,
            retries: 3,
            max_hops: None,
        }
    }
}

impl DiscoverConfig {
    /// Load from `IBNETDISC_*` environment variables, falling back to the
    /// defaults for anything unset or unparsable.
    pub fn from_env() -> Self {
        config::Config::builder()
            .add_source(config::Environment::with_prefix("IBNETDISC").try_parsing(true))
            .build()
            .and_then(|c| c.try_deserialize())
            .unwrap_or_default()
    }
}
