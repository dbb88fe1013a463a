//! Configuration management for the rate limiter.
//!
//! Settings are layered: built-in defaults, then an optional YAML file, then
//! the declared `NINJAEXA_*` environment keys.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{NinjaexaError, Result};
use crate::ratelimit::TimeWindow;

/// Environment variable naming an optional YAML configuration file.
pub const CONFIG_FILE_ENV: &str = "NINJAEXA_CONFIG";

/// File name of the persisted limiter state inside the user cache directory.
pub const STATE_FILE_NAME: &str = "ninjaexa_rate_state.json";

/// Upper bound on penalty escalation when the multiplier never reaches the max delay.
const MAX_PENALTY_LEVEL: u32 = 32;

/// Longest delay a single violation may impose.
pub const MAX_PENALTY_SECONDS: f64 = 86_400.0;

/// Longest configurable decay period (one year).
pub const MAX_DECAY_MINUTES: u64 = 525_600;

/// Environment variables recognized as overrides, with the config key each one sets.
pub const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("NINJAEXA_RATE_PER_MIN", "limits.per_minute"),
    ("NINJAEXA_RATE_PER_10MIN", "limits.per_10min"),
    ("NINJAEXA_RATE_PER_HOUR", "limits.per_hour"),
    ("NINJAEXA_RATE_PER_DAY", "limits.per_day"),
    ("NINJAEXA_BURST_WARNING", "burst.warning_multiplier"),
    ("NINJAEXA_BURST_DELAY", "burst.delay_multiplier"),
    ("NINJAEXA_PENALTY_BASE_SECS", "penalty.base_seconds"),
    ("NINJAEXA_PENALTY_MAX_SECS", "penalty.max_seconds"),
    ("NINJAEXA_PENALTY_MULTIPLIER", "penalty.multiplier"),
    ("NINJAEXA_PENALTY_DECAY_MIN", "penalty.decay_minutes"),
    ("NINJAEXA_STATE_FILE", "storage.state_file"),
    ("NINJAEXA_LOCK_FILE", "storage.lock_file"),
    ("NINJAEXA_LOCK_TIMEOUT_MS", "storage.lock_timeout_ms"),
    ("NINJAEXA_LOCK_STALE_SECS", "storage.lock_stale_secs"),
    ("NINJAEXA_NO_RATE_LIMIT", "disabled"),
];

/// Main configuration for the rate limiter.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Request caps per window
    #[serde(default)]
    pub limits: WindowLimits,

    /// Per-minute burst thresholds
    #[serde(default)]
    pub burst: BurstConfig,

    /// Exponential backoff settings
    #[serde(default)]
    pub penalty: PenaltyConfig,

    /// State file and lock settings
    #[serde(default)]
    pub storage: StorageConfig,

    /// Bypass all rate limiting
    #[serde(default)]
    pub disabled: bool,
}

/// Request limits for each tracked window.
///
/// The per-minute value is the baseline for burst detection; the other three
/// are hard caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowLimits {
    #[serde(default = "default_per_minute")]
    pub per_minute: u64,

    #[serde(default = "default_per_10min")]
    pub per_10min: u64,

    #[serde(default = "default_per_hour")]
    pub per_hour: u64,

    #[serde(default = "default_per_day")]
    pub per_day: u64,
}

impl Default for WindowLimits {
    fn default() -> Self {
        Self {
            per_minute: default_per_minute(),
            per_10min: default_per_10min(),
            per_hour: default_per_hour(),
            per_day: default_per_day(),
        }
    }
}

fn default_per_minute() -> u64 {
    15
}

fn default_per_10min() -> u64 {
    60
}

fn default_per_hour() -> u64 {
    200
}

fn default_per_day() -> u64 {
    1000
}

impl WindowLimits {
    /// Get the configured limit for a window.
    pub fn limit_for(&self, window: TimeWindow) -> u64 {
        match window {
            TimeWindow::Minute => self.per_minute,
            TimeWindow::TenMinutes => self.per_10min,
            TimeWindow::Hour => self.per_hour,
            TimeWindow::Day => self.per_day,
        }
    }
}

/// Burst thresholds, expressed as multiples of the per-minute limit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BurstConfig {
    /// Per-minute count at which a warning is attached
    #[serde(default = "default_warning_multiplier")]
    pub warning_multiplier: f64,

    /// Per-minute count at which a violation is recorded and a delay applied
    #[serde(default = "default_delay_multiplier")]
    pub delay_multiplier: f64,
}

impl Default for BurstConfig {
    fn default() -> Self {
        Self {
            warning_multiplier: default_warning_multiplier(),
            delay_multiplier: default_delay_multiplier(),
        }
    }
}

fn default_warning_multiplier() -> f64 {
    1.5
}

fn default_delay_multiplier() -> f64 {
    2.0
}

impl BurstConfig {
    pub fn warning_threshold(&self, per_minute: u64) -> f64 {
        self.warning_multiplier * per_minute as f64
    }

    pub fn delay_threshold(&self, per_minute: u64) -> f64 {
        self.delay_multiplier * per_minute as f64
    }
}

/// Exponential backoff applied to repeated burst violations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PenaltyConfig {
    #[serde(default = "default_base_seconds")]
    pub base_seconds: f64,

    #[serde(default = "default_max_seconds")]
    pub max_seconds: f64,

    #[serde(default = "default_multiplier")]
    pub multiplier: f64,

    /// Minutes without a violation after which the level drops back to zero
    #[serde(default = "default_decay_minutes")]
    pub decay_minutes: u64,
}

impl Default for PenaltyConfig {
    fn default() -> Self {
        Self {
            base_seconds: default_base_seconds(),
            max_seconds: default_max_seconds(),
            multiplier: default_multiplier(),
            decay_minutes: default_decay_minutes(),
        }
    }
}

fn default_base_seconds() -> f64 {
    3.0
}

fn default_max_seconds() -> f64 {
    600.0
}

fn default_multiplier() -> f64 {
    2.0
}

fn default_decay_minutes() -> u64 {
    10
}

impl PenaltyConfig {
    /// Delay in seconds for a penalty level; level 0 carries no delay.
    pub fn delay_for_level(&self, level: u32) -> f64 {
        if level == 0 {
            return 0.0;
        }
        self.uncapped_delay(level).min(self.max_seconds)
    }

    /// Highest level worth reaching: the first one whose delay hits the max.
    pub fn max_level(&self) -> u32 {
        let mut level = 1;
        while level < MAX_PENALTY_LEVEL && self.uncapped_delay(level) < self.max_seconds {
            level += 1;
        }
        level
    }

    /// Decay period, clamped to `MAX_DECAY_MINUTES`.
    pub fn decay_period(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.decay_minutes.min(MAX_DECAY_MINUTES) as i64)
    }

    fn uncapped_delay(&self, level: u32) -> f64 {
        self.base_seconds * self.multiplier.powi(level.min(MAX_PENALTY_LEVEL) as i32 - 1)
    }
}

/// Where state lives and how access to it is serialized.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// State file path; defaults to the per-user cache directory
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Lock file path; defaults to `<state file>.lock`
    #[serde(default)]
    pub lock_file: Option<PathBuf>,

    /// How long to wait for the state lock before allowing the request anyway
    #[serde(default = "default_lock_timeout_ms")]
    pub lock_timeout_ms: u64,

    /// Age after which a leftover lock file is considered abandoned
    #[serde(default = "default_lock_stale_secs")]
    pub lock_stale_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            state_file: None,
            lock_file: None,
            lock_timeout_ms: default_lock_timeout_ms(),
            lock_stale_secs: default_lock_stale_secs(),
        }
    }
}

fn default_lock_timeout_ms() -> u64 {
    2000
}

fn default_lock_stale_secs() -> u64 {
    30
}

impl StorageConfig {
    /// Resolve the state file path.
    pub fn state_path(&self) -> PathBuf {
        self.state_file.clone().unwrap_or_else(default_state_path)
    }

    /// Resolve the lock file path.
    pub fn lock_path(&self) -> PathBuf {
        self.lock_file.clone().unwrap_or_else(|| {
            let mut name = self.state_path().into_os_string();
            name.push(".lock");
            PathBuf::from(name)
        })
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn stale_after(&self) -> Duration {
        Duration::from_secs(self.lock_stale_secs)
    }
}

/// Default state location: `<user cache dir>/ninjaexa_rate_state.json`.
pub fn default_state_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(STATE_FILE_NAME)
}

impl LimiterConfig {
    /// Build the configuration from defaults, an optional file and the process environment.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let env: HashMap<String, String> = std::env::vars().collect();
        Self::load_with_env(file, &env)
    }

    /// Build the configuration against an explicit environment map.
    ///
    /// Empty variables are ignored. When `file` is `None` the path in
    /// `NINJAEXA_CONFIG` is used, if any.
    pub fn load_with_env(file: Option<&Path>, env: &HashMap<String, String>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Self::default())?);

        let file = file.map(Path::to_path_buf).or_else(|| {
            env.get(CONFIG_FILE_ENV)
                .filter(|value| !value.trim().is_empty())
                .map(PathBuf::from)
        });
        if let Some(path) = file {
            info!(path = %path.display(), "Loading rate limiter configuration");
            builder = builder.add_source(File::from(path).format(FileFormat::Yaml));
        }

        for (var, key) in ENV_OVERRIDES {
            let value = env
                .get(*var)
                .map(|value| value.trim())
                .filter(|value| !value.is_empty())
                .map(str::to_owned);
            builder = builder.set_override_option(*key, value)?;
        }

        let config: LimiterConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings that would make the limiter meaningless.
    pub fn validate(&self) -> Result<()> {
        if self.limits.per_minute == 0 {
            return Err(NinjaexaError::Config(
                "per-minute limit must be greater than zero".to_string(),
            ));
        }
        let floats = [
            ("burst warning multiplier", self.burst.warning_multiplier),
            ("burst delay multiplier", self.burst.delay_multiplier),
            ("base penalty", self.penalty.base_seconds),
            ("max penalty", self.penalty.max_seconds),
            ("penalty multiplier", self.penalty.multiplier),
        ];
        if let Some((name, value)) = floats.iter().find(|(_, value)| !value.is_finite()) {
            return Err(NinjaexaError::Config(format!("{name} must be finite, got {value}")));
        }
        if self.burst.warning_multiplier <= 0.0 || self.burst.delay_multiplier <= 0.0 {
            return Err(NinjaexaError::Config(
                "burst multipliers must be positive".to_string(),
            ));
        }
        if self.burst.delay_multiplier < self.burst.warning_multiplier {
            return Err(NinjaexaError::Config(format!(
                "burst delay multiplier ({}) is below the warning multiplier ({})",
                self.burst.delay_multiplier, self.burst.warning_multiplier
            )));
        }
        if self.penalty.base_seconds <= 0.0 {
            return Err(NinjaexaError::Config(
                "base penalty must be positive".to_string(),
            ));
        }
        if self.penalty.max_seconds < self.penalty.base_seconds {
            return Err(NinjaexaError::Config(format!(
                "max penalty ({}s) is below the base penalty ({}s)",
                self.penalty.max_seconds, self.penalty.base_seconds
            )));
        }
        if self.penalty.max_seconds > MAX_PENALTY_SECONDS {
            return Err(NinjaexaError::Config(format!(
                "max penalty ({}s) exceeds {}s",
                self.penalty.max_seconds, MAX_PENALTY_SECONDS
            )));
        }
        if self.penalty.decay_minutes > MAX_DECAY_MINUTES {
            return Err(NinjaexaError::Config(format!(
                "penalty decay ({} minutes) exceeds {} minutes",
                self.penalty.decay_minutes, MAX_DECAY_MINUTES
            )));
        }
        if self.penalty.multiplier < 1.0 {
            return Err(NinjaexaError::Config(
                "penalty multiplier must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn env(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults() {
        let config = LimiterConfig::load_with_env(None, &HashMap::new()).unwrap();
        assert_eq!(config.limits.per_minute, 15);
        assert_eq!(config.limits.per_10min, 60);
        assert_eq!(config.limits.per_hour, 200);
        assert_eq!(config.limits.per_day, 1000);
        assert_eq!(config.burst.warning_multiplier, 1.5);
        assert_eq!(config.burst.delay_multiplier, 2.0);
        assert_eq!(config.penalty.base_seconds, 3.0);
        assert_eq!(config.penalty.max_seconds, 600.0);
        assert_eq!(config.penalty.decay_minutes, 10);
        assert!(!config.disabled);
        assert!(config.storage.state_file.is_none());
    }

    #[test]
    fn test_env_overrides_limits() {
        let env = env(&[
            ("NINJAEXA_RATE_PER_MIN", "5"),
            ("NINJAEXA_RATE_PER_10MIN", "20"),
            ("NINJAEXA_RATE_PER_HOUR", "100"),
            ("NINJAEXA_RATE_PER_DAY", "300"),
            ("NINJAEXA_PENALTY_BASE_SECS", "1.5"),
        ]);
        let config = LimiterConfig::load_with_env(None, &env).unwrap();
        assert_eq!(config.limits.per_minute, 5);
        assert_eq!(config.limits.per_10min, 20);
        assert_eq!(config.limits.per_hour, 100);
        assert_eq!(config.limits.per_day, 300);
        assert_eq!(config.penalty.base_seconds, 1.5);
    }

    #[test]
    fn test_disable_flag() {
        for value in ["1", "true", "yes", "TRUE"] {
            let config =
                LimiterConfig::load_with_env(None, &env(&[("NINJAEXA_NO_RATE_LIMIT", value)]))
                    .unwrap();
            assert!(config.disabled, "{value} should disable");
        }

        let config =
            LimiterConfig::load_with_env(None, &env(&[("NINJAEXA_NO_RATE_LIMIT", "0")])).unwrap();
        assert!(!config.disabled);
    }

    #[test]
    fn test_empty_env_values_are_ignored() {
        let env = env(&[("NINJAEXA_RATE_PER_MIN", ""), ("NINJAEXA_NO_RATE_LIMIT", " ")]);
        let config = LimiterConfig::load_with_env(None, &env).unwrap();
        assert_eq!(config.limits.per_minute, 15);
        assert!(!config.disabled);
    }

    #[test]
    fn test_invalid_env_value_is_config_error() {
        let env = env(&[("NINJAEXA_RATE_PER_HOUR", "lots")]);
        let err = LimiterConfig::load_with_env(None, &env).unwrap_err();
        assert!(matches!(err, NinjaexaError::Config(_)));
    }

    #[test]
    fn test_file_then_env_layering() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
limits:
  per_minute: 10
  per_day: 50
penalty:
  max_seconds: 120.0
storage:
  state_file: /tmp/ninjaexa-test-state.json
"#
        )
        .unwrap();

        let env = env(&[("NINJAEXA_RATE_PER_DAY", "75")]);
        let config = LimiterConfig::load_with_env(Some(file.path()), &env).unwrap();
        assert_eq!(config.limits.per_minute, 10);
        assert_eq!(config.limits.per_day, 75);
        assert_eq!(config.limits.per_hour, 200);
        assert_eq!(config.penalty.max_seconds, 120.0);
        assert_eq!(
            config.storage.state_path(),
            PathBuf::from("/tmp/ninjaexa-test-state.json")
        );
    }

    #[test]
    fn test_validate_rejects_inverted_thresholds() {
        let mut config = LimiterConfig::default();
        config.burst.warning_multiplier = 3.0;
        config.burst.delay_multiplier = 2.0;
        assert!(config.validate().is_err());

        let mut config = LimiterConfig::default();
        config.limits.per_minute = 0;
        assert!(config.validate().is_err());

        let mut config = LimiterConfig::default();
        config.penalty.max_seconds = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_non_finite_values() {
        let mut config = LimiterConfig::default();
        config.penalty.base_seconds = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = LimiterConfig::default();
        config.penalty.max_seconds = f64::INFINITY;
        assert!(config.validate().is_err());

        let mut config = LimiterConfig::default();
        config.penalty.multiplier = f64::NAN;
        assert!(config.validate().is_err());

        let mut config = LimiterConfig::default();
        config.burst.delay_multiplier = f64::INFINITY;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_huge_penalty_from_env_is_rejected() {
        let huge = env(&[
            ("NINJAEXA_PENALTY_BASE_SECS", "1e300"),
            ("NINJAEXA_PENALTY_MAX_SECS", "1e300"),
            ("NINJAEXA_RATE_PER_MIN", "1"),
        ]);
        let err = LimiterConfig::load_with_env(None, &huge).unwrap_err();
        assert!(matches!(err, NinjaexaError::Config(_)));

        let nan = env(&[("NINJAEXA_PENALTY_MULTIPLIER", "NaN")]);
        assert!(LimiterConfig::load_with_env(None, &nan).is_err());
    }

    #[test]
    fn test_decay_minutes_bounded() {
        let env = env(&[("NINJAEXA_PENALTY_DECAY_MIN", "18446744073709551615")]);
        assert!(LimiterConfig::load_with_env(None, &env).is_err());

        let penalty = PenaltyConfig {
            decay_minutes: u64::MAX,
            ..PenaltyConfig::default()
        };
        assert_eq!(
            penalty.decay_period(),
            chrono::Duration::minutes(MAX_DECAY_MINUTES as i64)
        );
    }

    #[test]
    fn test_lock_path_defaults_beside_state_file() {
        let mut storage = StorageConfig {
            state_file: Some(PathBuf::from("/tmp/ninjaexa/state.json")),
            ..StorageConfig::default()
        };
        assert_eq!(
            storage.lock_path(),
            PathBuf::from("/tmp/ninjaexa/state.json.lock")
        );

        storage.lock_file = Some(PathBuf::from("/run/ninjaexa.lock"));
        assert_eq!(storage.lock_path(), PathBuf::from("/run/ninjaexa.lock"));
    }

    #[test]
    fn test_penalty_delay_ladder() {
        let penalty = PenaltyConfig::default();
        let delays: Vec<f64> = (1..=11).map(|l| penalty.delay_for_level(l)).collect();
        assert_eq!(
            delays,
            vec![3.0, 6.0, 12.0, 24.0, 48.0, 96.0, 192.0, 384.0, 600.0, 600.0, 600.0]
        );
        assert_eq!(penalty.delay_for_level(0), 0.0);
        assert_eq!(penalty.max_level(), 9);
    }

    #[test]
    fn test_max_level_with_flat_multiplier() {
        let penalty = PenaltyConfig {
            multiplier: 1.0,
            ..PenaltyConfig::default()
        };
        assert_eq!(penalty.max_level(), MAX_PENALTY_LEVEL);
        assert_eq!(penalty.delay_for_level(MAX_PENALTY_LEVEL), 3.0);
    }

    #[test]
    fn test_burst_thresholds() {
        let burst = BurstConfig::default();
        assert_eq!(burst.warning_threshold(15), 22.5);
        assert_eq!(burst.delay_threshold(15), 30.0);
    }
}
