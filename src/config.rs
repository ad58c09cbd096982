//! Configuration for chatwarden.
//!
//! Settings are loaded with priority: env var > default. `dotenvy` is loaded
//! early in `main`, so a local `.env` file feeds the same resolution path.
//! Every knob has a safe default; `resolve()` only fails on values that are
//! present but unparseable.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Main configuration for the bot runtime.
#[derive(Debug, Clone)]
pub struct Config {
    pub session: SessionConfig,
    pub commands: CommandConfig,
    pub limits: LimitsConfig,
    pub ai: AiConfig,
    pub reconnect: ReconnectConfig,
}

/// Where credential material is persisted.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Directory of independently loadable credential records.
    pub dir: PathBuf,
}

/// Command-surface settings.
#[derive(Debug, Clone)]
pub struct CommandConfig {
    /// Prefix character that marks a message as a command.
    pub prefix: char,
    /// Sender id allowed to run administrative commands, if any.
    pub admin_id: Option<String>,
    /// Contact card served by the vcf command.
    pub vcard_path: PathBuf,
}

/// Abuse-control settings.
#[derive(Debug, Clone)]
pub struct LimitsConfig {
    /// Global command ceiling per rate window.
    pub rate_ceiling: u32,
    /// Global sliding-window length.
    pub rate_window: Duration,
    /// Minimum interval between commands from one sender.
    pub cooldown: Duration,
    /// Detection window for per-chat decryption failures.
    pub bad_mac_window: Duration,
    /// Failures within the window that mark a chat's keys desynchronized.
    pub bad_mac_threshold: usize,
}

/// External AI task settings.
#[derive(Debug, Clone)]
pub struct AiConfig {
    /// Ollama model name passed to `ollama run`.
    pub model: String,
    /// Wall-clock budget for one query.
    pub timeout: Duration,
}

/// Reconnect/backoff policy.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay after the first transient closure; grows linearly per attempt.
    pub base: Duration,
    /// Ceiling for the backoff delay.
    pub max: Duration,
}

impl Config {
    /// Resolve the full configuration from the environment.
    pub fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            session: SessionConfig::resolve()?,
            commands: CommandConfig::resolve()?,
            limits: LimitsConfig::resolve()?,
            ai: AiConfig::resolve()?,
            reconnect: ReconnectConfig::resolve()?,
        })
    }
}

impl SessionConfig {
    pub fn resolve() -> Result<Self, ConfigError> {
        let dir = match optional_env("CHATWARDEN_SESSION_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => default_session_dir(),
        };
        Ok(Self { dir })
    }
}

/// Default session directory: `~/.chatwarden/sessions`.
pub fn default_session_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".chatwarden")
        .join("sessions")
}

impl CommandConfig {
    pub fn resolve() -> Result<Self, ConfigError> {
        let prefix = match optional_env("CHATWARDEN_COMMAND_PREFIX") {
            Some(raw) => {
                let mut chars = raw.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) => c,
                    _ => {
                        return Err(ConfigError::InvalidValue {
                            key: "CHATWARDEN_COMMAND_PREFIX".to_string(),
                            message: format!("expected a single character, got '{raw}'"),
                        });
                    }
                }
            }
            None => '.',
        };
        let vcard_path = optional_env("CHATWARDEN_VCARD_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("vcard.vcf"));
        Ok(Self {
            prefix,
            admin_id: optional_env("CHATWARDEN_ADMIN_ID"),
            vcard_path,
        })
    }
}

impl LimitsConfig {
    pub fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            rate_ceiling: parse_env("CHATWARDEN_RATE_LIMIT", 30)?,
            rate_window: Duration::from_secs(60),
            cooldown: Duration::from_secs(parse_env("CHATWARDEN_COOLDOWN_SECS", 5u64)?),
            bad_mac_window: Duration::from_secs(5 * 60),
            bad_mac_threshold: 10,
        })
    }
}

impl AiConfig {
    pub fn resolve() -> Result<Self, ConfigError> {
        Ok(Self {
            model: optional_env("CHATWARDEN_OLLAMA_MODEL")
                .unwrap_or_else(|| "qwen3:0.6b".to_string()),
            timeout: Duration::from_secs(parse_env("CHATWARDEN_AI_TIMEOUT_SECS", 180u64)?),
        })
    }
}

impl ReconnectConfig {
    pub fn resolve() -> Result<Self, ConfigError> {
        let base = Duration::from_secs(parse_env("CHATWARDEN_RECONNECT_BASE_SECS", 3u64)?);
        let max = Duration::from_secs(parse_env("CHATWARDEN_RECONNECT_MAX_SECS", 30u64)?);
        if max < base {
            return Err(ConfigError::InvalidValue {
                key: "CHATWARDEN_RECONNECT_MAX_SECS".to_string(),
                message: format!(
                    "backoff ceiling ({}s) is below the base delay ({}s)",
                    max.as_secs(),
                    base.as_secs()
                ),
            });
        }
        Ok(Self { base, max })
    }

    /// Delay before reconnect attempt `attempt` (1-based), linearly increasing
    /// and clamped to the ceiling.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base.saturating_mul(attempt.max(1)).min(self.max)
    }
}

/// Read an env var, treating empty/whitespace values as unset.
fn optional_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(value) => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        }
        Err(_) => None,
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T, ConfigError> {
    match optional_env(key) {
        Some(raw) => raw.parse().map_err(|_| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("could not parse '{raw}'"),
        }),
        None => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::remove_var("CHATWARDEN_SESSION_DIR");
            std::env::remove_var("CHATWARDEN_COMMAND_PREFIX");
            std::env::remove_var("CHATWARDEN_ADMIN_ID");
            std::env::remove_var("CHATWARDEN_VCARD_PATH");
            std::env::remove_var("CHATWARDEN_RATE_LIMIT");
            std::env::remove_var("CHATWARDEN_COOLDOWN_SECS");
            std::env::remove_var("CHATWARDEN_OLLAMA_MODEL");
            std::env::remove_var("CHATWARDEN_AI_TIMEOUT_SECS");
            std::env::remove_var("CHATWARDEN_RECONNECT_BASE_SECS");
            std::env::remove_var("CHATWARDEN_RECONNECT_MAX_SECS");
        }
    }

    #[test]
    fn resolvers_use_safe_defaults() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        let config = Config::resolve().expect("resolve");
        assert_eq!(config.commands.prefix, '.');
        assert_eq!(config.commands.admin_id, None);
        assert_eq!(config.limits.rate_ceiling, 30);
        assert_eq!(config.limits.cooldown, Duration::from_secs(5));
        assert_eq!(config.limits.bad_mac_threshold, 10);
        assert_eq!(config.ai.timeout, Duration::from_secs(180));
        assert_eq!(config.reconnect.base, Duration::from_secs(3));
        assert_eq!(config.reconnect.max, Duration::from_secs(30));
    }

    #[test]
    fn resolvers_apply_env_overrides() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("CHATWARDEN_COMMAND_PREFIX", "!");
            std::env::set_var("CHATWARDEN_RATE_LIMIT", "5");
            std::env::set_var("CHATWARDEN_COOLDOWN_SECS", "1");
            std::env::set_var("CHATWARDEN_OLLAMA_MODEL", "llama3:8b");
        }

        let config = Config::resolve().expect("resolve");
        assert_eq!(config.commands.prefix, '!');
        assert_eq!(config.limits.rate_ceiling, 5);
        assert_eq!(config.limits.cooldown, Duration::from_secs(1));
        assert_eq!(config.ai.model, "llama3:8b");

        clear_env();
    }

    #[test]
    fn rejects_multi_char_prefix() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("CHATWARDEN_COMMAND_PREFIX", "!!");
        }

        let err = CommandConfig::resolve().unwrap_err();
        match err {
            ConfigError::InvalidValue { key, .. } => {
                assert_eq!(key, "CHATWARDEN_COMMAND_PREFIX")
            }
            other => panic!("unexpected error: {other}"),
        }

        clear_env();
    }

    #[test]
    fn rejects_backoff_ceiling_below_base() {
        let _guard = ENV_MUTEX.lock().expect("env mutex poisoned");
        clear_env();

        // SAFETY: Guarded by ENV_MUTEX in tests.
        unsafe {
            std::env::set_var("CHATWARDEN_RECONNECT_BASE_SECS", "10");
            std::env::set_var("CHATWARDEN_RECONNECT_MAX_SECS", "4");
        }

        assert!(ReconnectConfig::resolve().is_err());
        clear_env();
    }

    #[test]
    fn backoff_delay_is_linear_and_clamped() {
        let reconnect = ReconnectConfig {
            base: Duration::from_secs(3),
            max: Duration::from_secs(30),
        };
        assert_eq!(reconnect.delay_for(1), Duration::from_secs(3));
        assert_eq!(reconnect.delay_for(4), Duration::from_secs(12));
        assert_eq!(reconnect.delay_for(100), Duration::from_secs(30));
        // attempt 0 is treated as the first attempt
        assert_eq!(reconnect.delay_for(0), Duration::from_secs(3));
    }
}
