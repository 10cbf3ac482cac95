//! Configuration: process [`Settings`] loaded from TOML, and the per-call
//! [`AppConfig`] that hosts pass with every conversation operation.
//!
//! Settings come from `config/default.toml` relative to the working
//! directory, then `CONVO_DATA_DIR` / `CONVO_LOG_LEVEL` env overrides.  The
//! provider API key is only ever read from `LLM_API_KEY`.

use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Conversation used when the host config names none.
pub const DEFAULT_CONVERSATION_ID: &str = "default";
/// Persona name used when the host config names none.
pub const DEFAULT_AGENT_NAME: &str = "Eliza";

const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

// ── Host-facing config ────────────────────────────────────────────────────────

/// Preferred response strategy.  The strategy actually used for a message is
/// decided per call by [`resolve_mode`](crate::subsystems::chat::resolve_mode).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderMode {
    Provider,
    #[default]
    Fallback,
}

/// Backend family.  Part of the runtime cache key: switching family builds a
/// different backend, rotating the key within a family does not.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProviderFamily {
    #[default]
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "xai")]
    Xai,
    /// Credential-free echo backend for wiring checks.
    #[serde(rename = "dummy")]
    Dummy,
}

impl ProviderFamily {
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "openai",
            ProviderFamily::Xai => "xai",
            ProviderFamily::Dummy => "dummy",
        }
    }

    pub fn default_base_url(self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "https://api.openai.com/v1",
            ProviderFamily::Xai => "https://api.x.ai/v1",
            ProviderFamily::Dummy => "",
        }
    }

    pub fn default_model(self) -> &'static str {
        match self {
            ProviderFamily::OpenAi => "gpt-5-mini",
            ProviderFamily::Xai => "grok-3-mini",
            ProviderFamily::Dummy => "dummy",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "openai" => Some(ProviderFamily::OpenAi),
            "xai" => Some(ProviderFamily::Xai),
            "dummy" => Some(ProviderFamily::Dummy),
            _ => None,
        }
    }
}

/// Provider section of [`AppConfig`].
#[derive(Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProviderSettings {
    pub family: ProviderFamily,
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

impl ProviderSettings {
    /// Endpoint root with surrounding whitespace and trailing `/` removed;
    /// the family default when unset or blank.
    pub fn endpoint(&self) -> String {
        let raw = self
            .base_url
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.family.default_base_url());
        raw.trim_end_matches('/').to_string()
    }

    pub fn model_name(&self) -> &str {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| self.family.default_model())
    }

    pub fn has_credentials(&self) -> bool {
        !self.api_key.trim().is_empty()
    }
}

// Hand-written so the API key never reaches logs through `{:?}`.
impl std::fmt::Debug for ProviderSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSettings")
            .field("family", &self.family)
            .field("api_key", &if self.has_credentials() { "<set>" } else { "<empty>" })
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .finish()
    }
}

/// Configuration supplied by the host on every call.  Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AppConfig {
    pub mode: ProviderMode,
    pub provider: ProviderSettings,
    /// Persona name shown in greetings and the provider system prompt.
    pub agent_name: String,
    pub conversation_id: Option<String>,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Fallback,
            provider: ProviderSettings::default(),
            agent_name: DEFAULT_AGENT_NAME.to_string(),
            conversation_id: None,
        }
    }
}

impl AppConfig {
    /// Conversation implied by this config, `"default"` when unnamed or blank.
    pub fn conversation_id(&self) -> &str {
        self.conversation_id
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .unwrap_or(DEFAULT_CONVERSATION_ID)
    }

    pub fn agent_name(&self) -> &str {
        let name = self.agent_name.trim();
        if name.is_empty() { DEFAULT_AGENT_NAME } else { name }
    }
}

// ── Process settings ──────────────────────────────────────────────────────────

/// Fully-resolved process settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Storage location used when a host passes no `dataDir` (already expanded).
    pub data_dir: PathBuf,
    pub log_level: String,
    /// Upper bound on one provider invocation before degrading to fallback.
    pub provider_timeout: Duration,
    /// Number of prior messages handed to providers as context.
    pub history_context: usize,
    /// FIFO cap on stored messages per conversation; `None` keeps everything.
    pub history_cap: Option<usize>,
    /// `[chat]` defaults, turned into an [`AppConfig`] by the `convo` binary.
    pub chat: AppConfig,
    /// From `LLM_API_KEY`.  Never sourced from TOML.
    pub llm_api_key: Option<String>,
}

impl Default for Settings {
    fn default() -> Self {
        resolve(RawConfig::default(), None, None)
    }
}

impl Settings {
    /// The binary's host config: `[chat]` defaults plus the env API key.
    pub fn chat_config(&self) -> AppConfig {
        let mut cfg = self.chat.clone();
        if let Some(key) = &self.llm_api_key {
            cfg.provider.api_key = key.clone();
        }
        cfg
    }
}

/// Raw TOML shape, the `serde` target before resolution.
#[derive(Deserialize, Default)]
struct RawConfig {
    #[serde(default)]
    runtime: RawRuntime,
    #[serde(default)]
    chat: RawChat,
}

#[derive(Deserialize)]
struct RawRuntime {
    #[serde(default)]
    data_dir: Option<String>,
    #[serde(default = "default_log_level")]
    log_level: String,
    #[serde(default = "default_provider_timeout_seconds")]
    provider_timeout_seconds: u64,
    #[serde(default = "default_history_context")]
    history_context: usize,
    /// `0` means unbounded.
    #[serde(default)]
    history_cap: usize,
}

impl Default for RawRuntime {
    fn default() -> Self {
        Self {
            data_dir: None,
            log_level: default_log_level(),
            provider_timeout_seconds: default_provider_timeout_seconds(),
            history_context: default_history_context(),
            history_cap: 0,
        }
    }
}

#[derive(Deserialize)]
struct RawChat {
    #[serde(default)]
    mode: ProviderMode,
    #[serde(default = "default_family")]
    family: String,
    #[serde(default)]
    base_url: String,
    #[serde(default)]
    model: String,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default = "default_agent_name")]
    agent_name: String,
    #[serde(default)]
    conversation_id: Option<String>,
}

impl Default for RawChat {
    fn default() -> Self {
        Self {
            mode: ProviderMode::Fallback,
            family: default_family(),
            base_url: String::new(),
            model: String::new(),
            temperature: None,
            agent_name: default_agent_name(),
            conversation_id: None,
        }
    }
}

fn default_log_level() -> String { "info".to_string() }
fn default_provider_timeout_seconds() -> u64 { 30 }
fn default_history_context() -> usize { 12 }
fn default_family() -> String { "openai".to_string() }
fn default_agent_name() -> String { DEFAULT_AGENT_NAME.to_string() }

/// Platform data directory for this crate, or the temp dir on platforms
/// without one.
pub fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(env::temp_dir)
        .join("convo-runtime")
}

/// Load `path` (or `config/default.toml`), then apply env overrides.
///
/// A missing default file yields built-in defaults; a missing explicit file
/// is an error.
pub fn load(path: Option<&str>) -> Result<Settings, AppError> {
    let data_dir_override = env::var("CONVO_DATA_DIR").ok();
    let log_level_override = env::var("CONVO_LOG_LEVEL").ok();
    let explicit = path.is_some();
    let path = Path::new(path.unwrap_or(DEFAULT_CONFIG_PATH));

    let mut settings = if explicit || path.exists() {
        load_from(path, data_dir_override.as_deref(), log_level_override.as_deref())?
    } else {
        resolve(
            RawConfig::default(),
            data_dir_override.as_deref(),
            log_level_override.as_deref(),
        )
    };
    settings.llm_api_key = env::var("LLM_API_KEY").ok().filter(|k| !k.trim().is_empty());
    Ok(settings)
}

/// Internal loader: explicit path plus optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    data_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;

    let parsed: RawConfig = toml::from_str(&raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    if ProviderFamily::parse(&parsed.chat.family).is_none() {
        return Err(AppError::Config(format!(
            "unknown provider family '{}' in {}",
            parsed.chat.family,
            path.display()
        )));
    }

    Ok(resolve(parsed, data_dir_override, log_level_override))
}

fn resolve(
    parsed: RawConfig,
    data_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Settings {
    let r = parsed.runtime;
    let c = parsed.chat;

    let data_dir = data_dir_override
        .map(str::to_string)
        .or(r.data_dir)
        .map(|d| expand_home(&d))
        .unwrap_or_else(default_data_dir);
    let log_level = log_level_override.unwrap_or(&r.log_level).to_string();

    let non_empty = |s: String| (!s.trim().is_empty()).then_some(s);

    Settings {
        data_dir,
        log_level,
        provider_timeout: Duration::from_secs(r.provider_timeout_seconds.max(1)),
        history_context: r.history_context,
        // Whole turns only: a user message and its reply.
        history_cap: (r.history_cap > 0).then(|| r.history_cap.max(2).next_multiple_of(2)),
        chat: AppConfig {
            mode: c.mode,
            provider: ProviderSettings {
                family: ProviderFamily::parse(&c.family).unwrap_or_default(),
                api_key: String::new(),
                base_url: non_empty(c.base_url),
                model: non_empty(c.model),
                temperature: c.temperature,
            },
            agent_name: c.agent_name,
            conversation_id: c.conversation_id,
        },
        llm_api_key: None,
    }
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

// ── test helpers ──────────────────────────────────────────────────────────────

/// Safe `Settings` for tests: short provider timeout, no API key.
impl Settings {
    pub fn test_default(data_dir: &Path) -> Self {
        Self {
            data_dir: data_dir.to_path_buf(),
            log_level: "debug".into(),
            provider_timeout: Duration::from_millis(500),
            history_context: 12,
            history_cap: None,
            chat: AppConfig::default(),
            llm_api_key: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[runtime]
data_dir = "~/.convo"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn parse_minimal_config() {
        let f = write_toml(MINIMAL_TOML);
        let s = load_from(f.path(), None, None).unwrap();
        assert_eq!(s.log_level, "info");
        assert_eq!(s.provider_timeout, Duration::from_secs(30));
        assert_eq!(s.history_context, 12);
        assert_eq!(s.history_cap, None);
        assert_eq!(s.chat.mode, ProviderMode::Fallback);
        assert!(s.data_dir.ends_with(".convo"));
    }

    #[test]
    fn parse_chat_section() {
        let f = write_toml(
            r#"
[runtime]
history_cap = 40
provider_timeout_seconds = 5

[chat]
mode = "provider"
family = "xai"
model = "grok-3"
agent_name = "Ada"
conversation_id = "kitchen"
"#,
        );
        let s = load_from(f.path(), Some("/tmp/convo-test"), Some("warn")).unwrap();
        assert_eq!(s.data_dir, PathBuf::from("/tmp/convo-test"));
        assert_eq!(s.log_level, "warn");
        assert_eq!(s.history_cap, Some(40));
        assert_eq!(s.provider_timeout, Duration::from_secs(5));
        assert_eq!(s.chat.mode, ProviderMode::Provider);
        assert_eq!(s.chat.provider.family, ProviderFamily::Xai);
        assert_eq!(s.chat.provider.model_name(), "grok-3");
        assert_eq!(s.chat.provider.endpoint(), "https://api.x.ai/v1");
        assert_eq!(s.chat.agent_name(), "Ada");
        assert_eq!(s.chat.conversation_id(), "kitchen");
    }

    #[test]
    fn shipped_default_config_parses() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join(DEFAULT_CONFIG_PATH);
        let s = load_from(&path, None, None).unwrap();
        assert_eq!(s.chat.agent_name(), DEFAULT_AGENT_NAME);
        assert_eq!(s.chat.conversation_id(), DEFAULT_CONVERSATION_ID);
        assert_eq!(s.history_cap, None);
    }

    #[test]
    fn history_cap_rounds_up_to_whole_turns() {
        for (raw, expected) in [(1, 2), (3, 4), (4, 4), (7, 8)] {
            let f = write_toml(&format!("[runtime]\nhistory_cap = {raw}\n"));
            let s = load_from(f.path(), None, None).unwrap();
            assert_eq!(s.history_cap, Some(expected), "cap {raw}");
        }
    }

    #[test]
    fn unknown_family_rejected() {
        let f = write_toml("[chat]\nfamily = \"mystery\"\n");
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("mystery"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn api_key_merged_into_chat_config() {
        let mut s = Settings::test_default(Path::new("/tmp"));
        assert!(!s.chat_config().provider.has_credentials());
        s.llm_api_key = Some("sk-test".into());
        assert_eq!(s.chat_config().provider.api_key, "sk-test");
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.convo");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".convo"));
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn app_config_deserialises_camel_case_with_defaults() {
        let cfg: AppConfig = serde_json::from_str(
            r#"{"mode":"provider","provider":{"apiKey":"k","baseUrl":"http://localhost:9/v1/"}}"#,
        )
        .unwrap();
        assert_eq!(cfg.mode, ProviderMode::Provider);
        assert!(cfg.provider.has_credentials());
        assert_eq!(cfg.provider.endpoint(), "http://localhost:9/v1");
        assert_eq!(cfg.provider.model_name(), "gpt-5-mini");
        assert_eq!(cfg.agent_name(), DEFAULT_AGENT_NAME);
        assert_eq!(cfg.conversation_id(), DEFAULT_CONVERSATION_ID);

        let empty: AppConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(empty, AppConfig::default());
    }

    #[test]
    fn debug_output_hides_api_key() {
        let p = ProviderSettings { api_key: "sk-secret".into(), ..Default::default() };
        let dbg = format!("{p:?}");
        assert!(!dbg.contains("sk-secret"));
        assert!(dbg.contains("<set>"));
    }
}
