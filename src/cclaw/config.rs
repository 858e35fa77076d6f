//! Runtime configuration.
//!
//! Settings come from three layers, each overriding the last: built-in
//! defaults, an optional `key=value` config file, and environment variables.
//! The file grammar is deliberately tiny — `#` comments and `[section]`
//! lines are ignored, values may be double-quoted — so no config-file
//! parsing dependency is needed.

use std::fs;
use std::path::{Path, PathBuf};

/// Which provider adapter to instantiate at startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderKind {
    Anthropic,
    OpenAI,
}

impl ProviderKind {
    fn from_str(value: &str) -> ProviderKind {
        match value {
            "openai" => ProviderKind::OpenAI,
            _ => ProviderKind::Anthropic,
        }
    }
}

/// Resolved runtime configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Identity-file root and session storage root.
    pub workspace: PathBuf,
    pub provider: ProviderKind,
    pub api_key: String,
    pub model: String,
    /// Sampling temperature, clamped to 0.0–1.0.
    pub temperature: f64,
    pub telegram_enabled: bool,
    pub telegram_token: String,
    /// Allow-list of chat ids and/or usernames; empty or `*` allows all.
    pub telegram_allowed: Vec<String>,
    /// WebSocket gateway port; 0 disables the gateway.
    pub gateway_port: u16,
    /// Optional bearer token for the gateway; empty disables auth.
    pub gateway_token: String,
    /// Memory store path; `None` disables the memory tools.
    pub memory_db: Option<PathBuf>,
    /// 0=trace 1=debug 2=info 3=warn 4=error 5=fatal.
    pub log_level: u8,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            workspace: PathBuf::from("."),
            provider: ProviderKind::Anthropic,
            api_key: String::new(),
            model: "claude-sonnet-4-5".to_owned(),
            temperature: 0.7,
            telegram_enabled: false,
            telegram_token: String::new(),
            telegram_allowed: Vec::new(),
            gateway_port: 0,
            gateway_token: String::new(),
            memory_db: None,
            log_level: 2,
        }
    }
}

impl Config {
    /// Load configuration: defaults, then the file (when present), then
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Config {
        let mut config = Config::default();
        if let Some(path) = path {
            match fs::read_to_string(path) {
                Ok(contents) => config.apply_file(&contents),
                Err(e) => log::warn!("config: cannot read {}: {}", path.display(), e),
            }
        }
        config.apply_env();
        config
    }

    /// Apply `key=value` lines from a config file.
    pub fn apply_file(&mut self, contents: &str) {
        for line in contents.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with('[') {
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            self.set(key.trim(), unquote(value.trim()));
        }
    }

    fn set(&mut self, key: &str, value: &str) {
        match key {
            "workspace" => self.workspace = PathBuf::from(value),
            "provider" => self.provider = ProviderKind::from_str(value),
            "api_key" => self.api_key = value.to_owned(),
            "model" => self.model = value.to_owned(),
            "temperature" => {
                if let Ok(t) = value.parse::<f64>() {
                    self.temperature = t.clamp(0.0, 1.0);
                }
            }
            "telegram_enabled" => self.telegram_enabled = truthy(value),
            "telegram_token" => self.telegram_token = value.to_owned(),
            "telegram_allowed" => {
                self.telegram_allowed = value
                    .split(',')
                    .map(|entry| entry.trim().to_owned())
                    .filter(|entry| !entry.is_empty())
                    .collect();
            }
            "gateway_port" => {
                if let Ok(port) = value.parse::<u16>() {
                    self.gateway_port = port;
                }
            }
            "gateway_token" => self.gateway_token = value.to_owned(),
            "memory_db" => self.memory_db = Some(PathBuf::from(value)),
            "log_level" => {
                if let Ok(level) = value.parse::<u8>() {
                    self.log_level = level.min(5);
                }
            }
            other => log::debug!("config: ignoring unknown key {}", other),
        }
    }

    /// Environment variables override file values.
    fn apply_env(&mut self) {
        if let Ok(workspace) = std::env::var("CCLAW_WORKSPACE") {
            self.workspace = PathBuf::from(workspace);
        }
        if let Ok(key) = std::env::var("CCLAW_API_KEY") {
            self.api_key = key;
        }
        if self.api_key.is_empty() {
            if let Ok(key) = std::env::var("ANTHROPIC_API_KEY") {
                self.api_key = key;
            }
        }
        if self.api_key.is_empty() {
            if let Ok(key) = std::env::var("OPENAI_API_KEY") {
                // Implicit provider switch can surprise users holding both
                // keys, so say it out loud.
                log::warn!("config: using OPENAI_API_KEY; provider switched to openai");
                self.api_key = key;
                self.provider = ProviderKind::OpenAI;
            }
        }
        if let Ok(model) = std::env::var("CCLAW_MODEL") {
            self.model = model;
        }
        if let Ok(token) = std::env::var("CCLAW_TELEGRAM_TOKEN") {
            self.telegram_token = token;
            self.telegram_enabled = true;
        }
        if let Ok(level) = std::env::var("CCLAW_LOG_LEVEL") {
            if let Ok(level) = level.parse::<u8>() {
                self.log_level = level.min(5);
            }
        }
    }

    /// Is this Telegram peer allowed to talk to the agent?
    ///
    /// Matches either the numeric chat id or the username against the
    /// allow-list; an empty list or a `*` entry allows everyone.
    pub fn telegram_allows(&self, chat_id: i64, username: Option<&str>) -> bool {
        if self.telegram_allowed.is_empty() {
            return true;
        }
        let id_text = chat_id.to_string();
        self.telegram_allowed.iter().any(|entry| {
            entry == "*" || entry == &id_text || username.is_some_and(|u| entry == u)
        })
    }

    /// Map the numeric log level onto a `log` filter.
    pub fn log_filter(&self) -> log::LevelFilter {
        match self.log_level {
            0 => log::LevelFilter::Trace,
            1 => log::LevelFilter::Debug,
            2 => log::LevelFilter::Info,
            3 => log::LevelFilter::Warn,
            // 4=error and 5=fatal both map to Error; log has no fatal.
            _ => log::LevelFilter::Error,
        }
    }
}

fn truthy(value: &str) -> bool {
    matches!(value, "1" | "true" | "yes" | "on")
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2 && bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"' {
        &value[1..value.len() - 1]
    } else {
        value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_grammar_is_forgiving() {
        let mut config = Config::default();
        config.apply_file(
            r#"
# cclaw configuration
[core]
workspace = /srv/agent
provider = openai
api_key = "sk-test-123"
temperature = 0.3
not-a-pair
gateway_port = 9001
telegram_allowed = 42, alice , *
"#,
        );
        assert_eq!(config.workspace, PathBuf::from("/srv/agent"));
        assert_eq!(config.provider, ProviderKind::OpenAI);
        assert_eq!(config.api_key, "sk-test-123");
        assert_eq!(config.temperature, 0.3);
        assert_eq!(config.gateway_port, 9001);
        assert_eq!(config.telegram_allowed, ["42", "alice", "*"]);
    }

    #[test]
    fn temperature_is_clamped() {
        let mut config = Config::default();
        config.apply_file("temperature = 3.5\n");
        assert_eq!(config.temperature, 1.0);
    }

    #[test]
    fn allow_list_semantics() {
        let mut config = Config::default();
        assert!(config.telegram_allows(7, None)); // empty list allows all

        config.telegram_allowed = vec!["42".to_owned(), "alice".to_owned()];
        assert!(config.telegram_allows(42, None));
        assert!(config.telegram_allows(7, Some("alice")));
        assert!(!config.telegram_allows(7, Some("bob")));

        config.telegram_allowed = vec!["*".to_owned()];
        assert!(config.telegram_allows(7, Some("bob")));
    }

    #[test]
    fn log_levels_map_to_filters() {
        let mut config = Config::default();
        config.log_level = 0;
        assert_eq!(config.log_filter(), log::LevelFilter::Trace);
        config.log_level = 3;
        assert_eq!(config.log_filter(), log::LevelFilter::Warn);
        config.log_level = 5;
        assert_eq!(config.log_filter(), log::LevelFilter::Error);
    }
}
