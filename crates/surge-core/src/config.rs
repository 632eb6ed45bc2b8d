use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;

const CONFIG_FILE: &str = "config.toml";

/// Default User-Agent sent on every request. Some mirrors reject unknown
/// clients, so this mimics a desktop browser.
pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) \
AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// User-level knobs from `~/.config/surge/config.toml`.
///
/// The engine's segmentation constants live in [`crate::downloader`] and have
/// no config or CLI surface.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SurgeConfig {
    /// User-Agent header sent with every request.
    pub user_agent: String,
    /// Maximum attempts per segment (including the first).
    pub retry_max_attempts: u32,
    /// Base backoff delay between segment retries, in milliseconds.
    pub retry_base_delay_ms: u64,
    /// Upper bound on the backoff delay, in seconds.
    pub retry_max_delay_secs: u64,
}

impl Default for SurgeConfig {
    fn default() -> Self {
        Self {
            user_agent: DEFAULT_USER_AGENT.to_string(),
            retry_max_attempts: 5,
            retry_base_delay_ms: 250,
            retry_max_delay_secs: 30,
        }
    }
}

impl SurgeConfig {
    /// Loads the config from the XDG search path.
    ///
    /// A missing file means first run: the defaults are returned and written
    /// out so the knobs are discoverable, but an unwritable config dir is not
    /// worth failing a download over. A file that exists but does not parse
    /// is an error — silently ignoring a user's edits would be worse.
    pub fn load() -> Result<Self> {
        let dirs = xdg::BaseDirectories::with_prefix("surge")?;

        if let Some(path) = dirs.find_config_file(CONFIG_FILE) {
            let raw = fs::read_to_string(&path)
                .with_context(|| format!("read {}", path.display()))?;
            return toml::from_str(&raw).with_context(|| format!("parse {}", path.display()));
        }

        let cfg = Self::default();
        let rendered = toml::to_string_pretty(&cfg)?;
        match dirs.place_config_file(CONFIG_FILE) {
            Ok(path) => match fs::write(&path, rendered) {
                Ok(()) => tracing::info!(path = %path.display(), "wrote default config"),
                Err(e) => {
                    tracing::debug!(path = %path.display(), error = %e, "could not write default config")
                }
            },
            Err(e) => tracing::debug!(error = %e, "no writable config dir, using defaults"),
        }
        Ok(cfg)
    }

    /// Retry policy for segment downloads derived from the configured knobs.
    pub fn retry_policy(&self) -> crate::retry::RetryPolicy {
        crate::retry::RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: std::time::Duration::from_millis(self.retry_base_delay_ms),
            max_delay: std::time::Duration::from_secs(self.retry_max_delay_secs),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let cfg = SurgeConfig::default();
        assert_eq!(cfg.retry_max_attempts, 5);
        assert_eq!(cfg.retry_base_delay_ms, 250);
        assert_eq!(cfg.retry_max_delay_secs, 30);
        assert!(cfg.user_agent.contains("Mozilla/5.0"));
    }

    #[test]
    fn config_toml_roundtrip() {
        let cfg = SurgeConfig::default();
        let toml = toml::to_string_pretty(&cfg).unwrap();
        let parsed: SurgeConfig = toml::from_str(&toml).unwrap();
        assert_eq!(parsed.user_agent, cfg.user_agent);
        assert_eq!(parsed.retry_max_attempts, cfg.retry_max_attempts);
    }

    #[test]
    fn config_toml_custom_values() {
        let toml = r#"
            user_agent = "surge-test/1.0"
            retry_max_attempts = 3
            retry_base_delay_ms = 100
            retry_max_delay_secs = 10
        "#;
        let cfg: SurgeConfig = toml::from_str(toml).unwrap();
        assert_eq!(cfg.user_agent, "surge-test/1.0");
        assert_eq!(cfg.retry_max_attempts, 3);
        let policy = cfg.retry_policy();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.base_delay.as_millis(), 100);
    }

    #[test]
    fn config_rejects_malformed_toml() {
        let toml = r#"retry_max_attempts = "not a number""#;
        assert!(toml::from_str::<SurgeConfig>(toml).is_err());
    }
}
