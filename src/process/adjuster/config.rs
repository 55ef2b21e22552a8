/*!
 * Adjuster Configuration
 *
 * Policy knobs for the cached tier, kill quotas, timing windows and the
 * freezer. Cached bucket spacing, quotas and the low-swap threshold have
 * no built-in values and must be supplied; everything else has a default.
 *
 * Configuration is validated eagerly: `OomAdjuster::new` refuses an
 * invalid document before any pass can run.
 */

use crate::core::errors::ConfigError;
use crate::core::limits::{
    CACHED_APP_MAX_ADJ, CACHED_APP_MIN_ADJ, PERCEPTIBLE_APP_ADJ, TIERED_DECAYED_OFFSET, UNKNOWN_ADJ,
};
use crate::core::types::{Adj, InlineString};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DurationMilliSeconds};
use std::path::Path;
use std::time::Duration;

bitflags! {
    /// Optional behaviors enabled by name in the configuration
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct Features: u32 {
        const TIERED_CACHED_ADJ = 1 << 0;
        const CPU_TIME_CAPABILITY = 1 << 1;
        const PROACTIVE_KILLS = 1 << 2;
        const KILL_ISOLATED_WITHOUT_SERVICES = 1 << 3;
        const RANK_BY_MEMORY = 1 << 4;
    }
}

impl Features {
    /// Parse a list of feature names, rejecting anything unknown
    pub fn from_names<S: AsRef<str>>(names: &[S]) -> Result<Self, ConfigError> {
        names.iter().try_fold(Features::empty(), |acc, name| {
            let flag = match name.as_ref() {
                "tiered_cached_adj" => Features::TIERED_CACHED_ADJ,
                "cpu_time_capability" => Features::CPU_TIME_CAPABILITY,
                "proactive_kills" => Features::PROACTIVE_KILLS,
                "kill_isolated_without_services" => Features::KILL_ISOLATED_WITHOUT_SERVICES,
                "rank_by_memory" => Features::RANK_BY_MEMORY,
                other => return Err(ConfigError::UnknownFeature(other.into())),
            };
            Ok(acc | flag)
        })
    }
}

/// Cached tier bucket layout
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CachedTierConfig {
    /// Adj distance between a cached bucket and its empty counterpart
    pub importance_levels: Adj,
    /// Layout used when the `tiered_cached_adj` feature is on
    #[serde(default)]
    pub tiered: Option<TieredCachedConfig>,
}

/// Tiered cached layout
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TieredCachedConfig {
    /// Number of adj slots reserved for processes that have shown UI
    pub ui_tier_size: Adj,
    /// Cached processes older than this decay into the last tier
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub decay: Duration,
}

/// Kill quotas for the background tier
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuotaConfig {
    /// Total cached processes, empty ones included
    pub max_cached: usize,
    pub max_empty: usize,
}

impl QuotaConfig {
    /// Empty processes beyond this count are killed once they go stale
    #[inline]
    pub fn trim_empty(&self) -> usize {
        self.max_empty / 2
    }

    /// Cached (non-empty) share of the total quota
    #[inline]
    pub fn cached_only(&self) -> usize {
        self.max_cached.saturating_sub(self.max_empty)
    }
}

/// Proactive kill under swap pressure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProactiveKillConfig {
    /// Fraction of free swap below which one cached process is killed per pass
    pub low_swap_threshold: f64,
}

/// Time windows read by the rules
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TimingConfig {
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_service_inactivity: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub top_to_fgs_grace: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub top_to_almost_perceptible_grace: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_previous_time: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub content_provider_retain: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub perceptible_task_timeout: Duration,
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub max_empty_time: Duration,
    /// Minimum spacing between follow-up wakes
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub follow_up_wait: Duration,
    /// Quota kills are held off for this long after startup
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub no_kill_grace: Duration,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            max_service_inactivity: Duration::from_secs(30 * 60),
            top_to_fgs_grace: Duration::from_secs(15),
            top_to_almost_perceptible_grace: Duration::from_secs(15),
            max_previous_time: Duration::from_secs(60),
            content_provider_retain: Duration::from_secs(20),
            perceptible_task_timeout: Duration::from_secs(60),
            max_empty_time: Duration::from_secs(30 * 60),
            follow_up_wait: Duration::from_secs(1),
            no_kill_grace: Duration::ZERO,
        }
    }
}

/// Freezer policy
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FreezerConfig {
    pub enabled: bool,
    /// Processes at or beyond this adj may be frozen
    pub cutoff_adj: Adj,
}

impl Default for FreezerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            cutoff_adj: CACHED_APP_MIN_ADJ,
        }
    }
}

/// Service-B demotion of large services under memory pressure
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServiceBConfig {
    /// Services with a resident sample at or above this are demoted while memory is not normal
    pub high_ram_threshold_kb: Option<u64>,
}

/// Complete adjuster configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AdjusterConfig {
    pub cached: CachedTierConfig,
    pub quotas: QuotaConfig,
    pub proactive: ProactiveKillConfig,
    #[serde(default)]
    pub timing: TimingConfig,
    #[serde(default)]
    pub freezer: FreezerConfig,
    #[serde(default)]
    pub service_b: ServiceBConfig,
    #[serde(default)]
    pub features: Vec<InlineString>,
}

impl AdjusterConfig {
    /// Build a configuration from the three required policy values
    pub fn new(importance_levels: Adj, quotas: QuotaConfig, low_swap_threshold: f64) -> Self {
        Self {
            cached: CachedTierConfig {
                importance_levels,
                tiered: None,
            },
            quotas,
            proactive: ProactiveKillConfig { low_swap_threshold },
            timing: TimingConfig::default(),
            freezer: FreezerConfig::default(),
            service_b: ServiceBConfig::default(),
            features: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_features(mut self, names: &[&str]) -> Self {
        self.features = names.iter().map(|n| InlineString::from(*n)).collect();
        self
    }

    #[must_use]
    pub fn with_timing(mut self, timing: TimingConfig) -> Self {
        self.timing = timing;
        self
    }

    #[must_use]
    pub fn with_freezer(mut self, freezer: FreezerConfig) -> Self {
        self.freezer = freezer;
        self
    }

    #[must_use]
    pub fn with_tiered(mut self, tiered: TieredCachedConfig) -> Self {
        self.cached.tiered = Some(tiered);
        self
    }

    /// Parse a JSON document; the result still has to be validated
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Malformed(e.to_string().into()))
    }

    /// Read and parse a JSON file
    pub fn from_path(path: impl AsRef<Path>) -> crate::core::errors::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(Self::from_json_str(&text)?)
    }

    /// Parsed feature set
    pub fn feature_set(&self) -> Result<Features, ConfigError> {
        Features::from_names(&self.features)
    }

    /// Number of cached slots the non-tiered layout can hand out
    #[inline]
    pub fn cached_slots(&self) -> Adj {
        ((CACHED_APP_MAX_ADJ - CACHED_APP_MIN_ADJ + 1) / 2) / self.cached.importance_levels.max(1)
    }

    /// Validate the whole document
    #[must_use = "validation result must be checked"]
    pub fn validate(&self) -> Result<(), ConfigError> {
        let features = self.feature_set()?;

        let levels = self.cached.importance_levels;
        if levels <= 0 || levels > (CACHED_APP_MAX_ADJ - CACHED_APP_MIN_ADJ + 1) / 2 {
            return Err(ConfigError::InvalidBuckets(
                format!("importance_levels {} leaves no cached slots", levels).into(),
            ));
        }

        if features.contains(Features::TIERED_CACHED_ADJ) {
            let tiered = self.cached.tiered.as_ref().ok_or_else(|| {
                ConfigError::InvalidBuckets("tiered_cached_adj requires cached.tiered".into())
            })?;
            let last_tier = CACHED_APP_MIN_ADJ + TIERED_DECAYED_OFFSET + tiered.ui_tier_size;
            if tiered.ui_tier_size <= 0 || last_tier > CACHED_APP_MAX_ADJ {
                return Err(ConfigError::InvalidBuckets(
                    format!("ui_tier_size {} does not fit the cached range", tiered.ui_tier_size)
                        .into(),
                ));
            }
        }

        if self.quotas.max_cached == 0 || self.quotas.max_empty == 0 {
            return Err(ConfigError::InvalidQuota("quotas must be positive".into()));
        }
        if self.quotas.max_empty > self.quotas.max_cached {
            return Err(ConfigError::InvalidQuota(
                format!(
                    "max_empty {} exceeds max_cached {}",
                    self.quotas.max_empty, self.quotas.max_cached
                )
                .into(),
            ));
        }

        let threshold = self.proactive.low_swap_threshold;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::InvalidThreshold(
                format!("low_swap_threshold {}", threshold).into(),
            ));
        }

        let cutoff = self.freezer.cutoff_adj;
        if cutoff <= PERCEPTIBLE_APP_ADJ || cutoff >= UNKNOWN_ADJ {
            return Err(ConfigError::InvalidCutoff(cutoff));
        }

        Ok(())
    }
}

/// Millisecond view of a duration on the scheduler clock
#[inline(always)]
pub(crate) fn ms(duration: Duration) -> u64 {
    duration.as_millis() as u64
}
