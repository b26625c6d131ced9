//! Configuration management

use std::{collections::HashMap, env, path::Path, time::Duration};

use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::breaker::BreakerSettings;
use crate::{Error, Result};

/// Main configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
#[derive(Default)]
pub struct Config {
    /// Environment files to load before the server starts.
    /// Paths support ~ expansion. Loaded in order; variables already set
    /// in the process environment (or by an earlier file) win.
    #[serde(default)]
    pub env_files: Vec<String>,
    /// Server configuration
    pub server: ServerConfig,
    /// Admin API configuration
    pub admin: AdminConfig,
    /// Settings for breakers provisioned on first use
    pub defaults: BreakerSettings,
    /// Pre-registered breakers, keyed by name.
    /// Fields omitted from an entry use the built-in settings defaults,
    /// not the `defaults` section.
    pub breakers: HashMap<String, BreakerSettings>,
    /// Request-path to breaker mapping
    pub routes: RoutesConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Interval between periodic breaker status log lines ("0s" disables)
    #[serde(with = "humantime_serde")]
    pub status_log_interval: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 39700,
            status_log_interval: Duration::from_secs(60),
        }
    }
}

/// Admin API configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Bearer token protecting privileged admin routes.
    /// Supports: literal value, `env:VAR_NAME`, or `auto` (generates random token).
    /// Leaving it unset disables the privileged routes.
    pub token: Option<String>,
}

impl AdminConfig {
    /// Resolve the admin token (expand env vars, generate if `auto`)
    #[must_use]
    pub fn resolve_token(&self) -> Option<String> {
        self.token.as_ref().map(|token| {
            if token == "auto" {
                // Generate a random token
                use rand::RngExt;
                let random_bytes: [u8; 32] = rand::rng().random();
                format!(
                    "fbx_{}",
                    base64::Engine::encode(
                        &base64::engine::general_purpose::URL_SAFE_NO_PAD,
                        random_bytes
                    )
                )
            } else if let Some(var_name) = token.strip_prefix("env:") {
                env::var(var_name).unwrap_or_else(|_| token.clone())
            } else {
                token.clone()
            }
        })
    }
}

/// Request-path to breaker mapping
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RoutesConfig {
    /// Prefix whose next path segment names a per-agent breaker
    pub agent_prefix: String,
    /// Ordered prefix rules, first match wins
    pub rules: Vec<RouteRule>,
}

/// One path-prefix rule
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteRule {
    /// Path prefix to match
    pub prefix: String,
    /// Breaker guarding matched requests
    pub breaker: String,
}

impl Default for RoutesConfig {
    fn default() -> Self {
        let rule = |prefix: &str, breaker: &str| RouteRule {
            prefix: prefix.to_string(),
            breaker: breaker.to_string(),
        };
        Self {
            agent_prefix: "/agents".to_string(),
            rules: vec![
                rule("/generate", "vertex_ai"),
                rule("/chat", "vertex_ai"),
                rule("/sessions", "supabase"),
                rule("/history", "supabase"),
                rule("/cache", "redis"),
            ],
        }
    }
}

impl Config {
    /// Load configuration from file and environment
    ///
    /// # Errors
    ///
    /// Returns an error if the config file does not exist, cannot be
    /// parsed, or declares out-of-range breaker settings.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut figment = Figment::new();

        // Load from file if provided
        if let Some(p) = path {
            if !p.exists() {
                return Err(Error::Config(format!(
                    "Config file not found: {}",
                    p.display()
                )));
            }
            figment = figment.merge(Yaml::file(p));
        }

        // Merge environment variables (FUSEBOX_ prefix)
        figment = figment.merge(Env::prefixed("FUSEBOX_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| Error::Config(e.to_string()))?;

        // Load env files into process environment
        config.load_env_files();

        config.validate()?;

        Ok(config)
    }

    /// Load environment files into the process environment.
    /// Supports ~ expansion. Files that don't exist are silently skipped.
    fn load_env_files(&self) {
        for path_str in &self.env_files {
            let expanded = if path_str.starts_with('~') {
                if let Some(home) = dirs::home_dir() {
                    path_str.replacen('~', &home.display().to_string(), 1)
                } else {
                    path_str.clone()
                }
            } else {
                path_str.clone()
            };

            let path = Path::new(&expanded);
            if path.exists() {
                match dotenvy::from_path(path) {
                    Ok(()) => {
                        tracing::info!("Loaded env file: {expanded}");
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load env file {expanded}: {e}");
                    }
                }
            } else {
                tracing::debug!("Env file not found (skipped): {expanded}");
            }
        }
    }

    /// Check every breaker settings block in the file.
    fn validate(&self) -> Result<()> {
        self.defaults.validate("defaults")?;
        for (name, settings) in &self.breakers {
            settings.validate(name)?;
        }
        Ok(())
    }
}

/// Custom humantime serde module for Duration
pub mod humantime_serde {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    /// Serialize Duration to a human-readable string ("30s", or "250ms"
    /// when the value is not a whole number of seconds)
    ///
    /// # Errors
    ///
    /// Returns a serialization error if the serializer fails.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        if duration.subsec_nanos() == 0 {
            serializer.serialize_str(&format!("{}s", duration.as_secs()))
        } else {
            serializer.serialize_str(&format!("{}ms", duration.as_millis()))
        }
    }

    /// Deserialize human-readable duration strings ("250ms", "30s",
    /// "5m", "1h"; a bare number means seconds)
    ///
    /// # Errors
    ///
    /// Returns a deserialization error if the value cannot be parsed as a duration.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Seconds(u64),
            Text(String),
        }

        let s = match Repr::deserialize(deserializer)? {
            Repr::Seconds(secs) => return Ok(Duration::from_secs(secs)),
            Repr::Text(s) => s,
        };

        // "ms" must be tried before "s": every millisecond string also ends in 's'.
        if let Some(ms) = s.strip_suffix("ms") {
            ms.parse::<u64>()
                .map(Duration::from_millis)
                .map_err(serde::de::Error::custom)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        } else if let Some(mins) = s.strip_suffix('m') {
            mins.parse::<u64>()
                .map(|m| Duration::from_secs(m * 60))
                .map_err(serde::de::Error::custom)
        } else if let Some(hours) = s.strip_suffix('h') {
            hours
                .parse::<u64>()
                .map(|h| Duration::from_secs(h * 3600))
                .map_err(serde::de::Error::custom)
        } else {
            // Assume seconds
            s.parse::<u64>()
                .map(Duration::from_secs)
                .map_err(serde::de::Error::custom)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn built_in_defaults() {
        let config = Config::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 39700);
        assert!(config.admin.token.is_none());
        assert_eq!(config.defaults.failure_threshold, 5);
        assert!(config.breakers.is_empty());
        assert_eq!(config.routes.agent_prefix, "/agents");
        assert_eq!(config.routes.rules.len(), 5);
    }

    #[test]
    fn breaker_table_from_yaml() {
        let yaml = r#"
server:
  host: "0.0.0.0"
  port: 8080
defaults:
  failure_threshold: 3
  timeout: 30s
breakers:
  vertex_ai:
    failure_threshold: 5
    timeout: 2m
  redis:
    timeout: 500ms
"#;
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.defaults.failure_threshold, 3);
        assert_eq!(config.defaults.timeout, Duration::from_secs(30));

        let vertex = &config.breakers["vertex_ai"];
        assert_eq!(vertex.failure_threshold, 5);
        assert_eq!(vertex.timeout, Duration::from_secs(120));
        // Omitted fields use the built-in settings defaults.
        assert_eq!(vertex.success_threshold, 2);

        assert_eq!(config.breakers["redis"].timeout, Duration::from_millis(500));
    }

    #[test]
    fn duration_suffixes_parse() {
        for (text, expected) in [
            ("250ms", Duration::from_millis(250)),
            ("30s", Duration::from_secs(30)),
            ("5m", Duration::from_secs(300)),
            ("1h", Duration::from_secs(3600)),
            ("45", Duration::from_secs(45)),
        ] {
            let yaml = format!("defaults:\n  timeout: {text}\n");
            let config: Config = serde_yaml::from_str(&yaml).unwrap();
            assert_eq!(config.defaults.timeout, expected, "parsing {text}");
        }
    }

    #[test]
    fn sub_second_durations_round_trip() {
        let settings = BreakerSettings {
            timeout: Duration::from_millis(250),
            ..Default::default()
        };
        let yaml = serde_yaml::to_string(&settings).unwrap();
        assert!(yaml.contains("250ms"));
        let parsed: BreakerSettings = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.timeout, Duration::from_millis(250));
    }

    #[test]
    fn load_rejects_missing_file() {
        let err = Config::load(Some(Path::new("/nonexistent/fusebox.yaml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn load_rejects_out_of_range_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fusebox.yaml");
        std::fs::write(&path, "breakers:\n  db:\n    failure_threshold: 0\n").unwrap();

        let err = Config::load(Some(path.as_path())).unwrap_err();
        assert!(err.to_string().contains("db"));
    }

    #[test]
    fn load_env_files_sets_env_vars() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join("test.env");
        let mut f = std::fs::File::create(&env_path).unwrap();
        writeln!(f, "FBX_TEST_KEY_A=hello_from_env_file").unwrap();
        writeln!(f, "FBX_TEST_KEY_B=42").unwrap();
        drop(f);

        let config = Config {
            env_files: vec![env_path.to_string_lossy().to_string()],
            ..Default::default()
        };
        config.load_env_files();

        assert_eq!(env::var("FBX_TEST_KEY_A").unwrap(), "hello_from_env_file");
        assert_eq!(env::var("FBX_TEST_KEY_B").unwrap(), "42");

        // Note: env::remove_var is unsafe in edition 2024 and lib forbids unsafe.
        // Test keys use unique FBX_TEST_ prefix so won't conflict.
    }

    #[test]
    fn load_env_files_skips_missing() {
        let config = Config {
            env_files: vec!["/nonexistent/path/.env".to_string()],
            ..Default::default()
        };
        // Should not panic
        config.load_env_files();
    }

    #[test]
    fn resolve_token_variants() {
        let literal = AdminConfig {
            token: Some("secret".to_string()),
        };
        assert_eq!(literal.resolve_token().unwrap(), "secret");

        let auto = AdminConfig {
            token: Some("auto".to_string()),
        };
        let token = auto.resolve_token().unwrap();
        assert!(token.starts_with("fbx_"));
        assert!(token.len() > 20);

        let unset = AdminConfig { token: None };
        assert!(unset.resolve_token().is_none());
    }

    #[test]
    fn resolve_token_missing_env_var_keeps_literal() {
        let admin = AdminConfig {
            token: Some("env:FBX_TEST_NO_SUCH_VAR".to_string()),
        };
        assert_eq!(admin.resolve_token().unwrap(), "env:FBX_TEST_NO_SUCH_VAR");
    }
}
