//! YAML settings and construction of the runtime components they describe.
//!
//! Settings live in `$XDG_CONFIG_HOME/auto-commit/config.yaml` (falling back
//! to `~/.config/auto-commit/config.yaml`) unless a path is given
//! explicitly. A missing file yields the defaults. Secrets are read from
//! the environment first and from the `env` map second.

use std::collections::BTreeMap;
use std::env;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use crate::dispatch::{DispatcherConfig, DispatcherParts, FailureLedger};
use crate::git::{Git2Gateway, RepositoryGateway};
use crate::message::ai::claude::ClaudeAiClient;
use crate::message::ai::openai::OpenAiAiClient;
use crate::message::ticket::linear::LinearTicketSystem;
use crate::message::{
    AiClient, EscalationPolicy, MessageGenerator, RetryPolicy, TicketSystem,
};
use crate::message::prompts::DEFAULT_STYLE_GUIDE;
use crate::policy::{ClassificationEngine, PatternStore};
use crate::review::ReviewQueue;

/// Directory name used under the config and data directories.
pub const APP_DIR_NAME: &str = "auto-commit";

/// Settings file name.
pub const CONFIG_FILE_NAME: &str = "config.yaml";

/// Review queue file name inside the data directory.
pub const REVIEW_QUEUE_FILE: &str = "review_queue.json";

/// Failure ledger file name inside the data directory.
pub const FAILURE_LEDGER_FILE: &str = "failures.json";

/// Environment variables holding an OpenAI key.
const OPENAI_KEY_VARS: &[&str] = &["OPENAI_API_KEY"];

/// Environment variables holding an Anthropic key, in lookup order.
const ANTHROPIC_KEY_VARS: &[&str] = &["ANTHROPIC_API_KEY", "CLAUDE_API_KEY"];

/// Environment variable holding the Linear key.
const LINEAR_KEY_VAR: &str = "LINEAR_API_KEY";

/// Text-generation backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    /// Local Ollama server through its OpenAI-compatible endpoint.
    #[default]
    Ollama,
    /// OpenAI or any compatible service.
    Openai,
    /// Anthropic Messages API.
    Anthropic,
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ollama => write!(f, "ollama"),
            Self::Openai => write!(f, "openai"),
            Self::Anthropic => write!(f, "anthropic"),
        }
    }
}

/// Text-generation settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmSettings {
    /// Backend to use.
    pub provider: Provider,
    /// Model name passed to the backend.
    pub model: String,
    /// Endpoint override.
    pub base_url: Option<String>,
    /// Bound on one request.
    pub request_timeout_secs: u64,
    /// Model calls before escalating.
    pub max_attempts: u32,
    /// First retry delay.
    pub initial_backoff_ms: u64,
    /// Largest retry delay.
    pub max_backoff_ms: u64,
    /// Response token limit.
    pub max_tokens: u32,
}

impl Default for LlmSettings {
    fn default() -> Self {
        Self {
            provider: Provider::Ollama,
            model: "sequentialthought".to_string(),
            base_url: None,
            request_timeout_secs: 60,
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
            max_tokens: 1024,
        }
    }
}

/// Ticket escalation settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EscalationSettings {
    /// Whether exhausted generation escalates to a ticket.
    pub enabled: bool,
    /// Linear team that receives tickets.
    pub team_id: Option<String>,
    /// Optional Linear project.
    pub project_id: Option<String>,
    /// Wait between ticket polls.
    pub poll_interval_secs: u64,
    /// Give up polling after this many minutes; 0 polls until the event
    /// budget (`max_event_secs`) runs out.
    pub max_poll_minutes: u64,
}

impl Default for EscalationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            team_id: None,
            project_id: None,
            poll_interval_secs: 30,
            max_poll_minutes: 60,
        }
    }
}

/// Everything read from the settings file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Monitored repository roots.
    pub roots: Vec<PathBuf>,
    /// Worker count.
    pub workers: usize,
    /// Intake queue capacity.
    pub queue_capacity: usize,
    /// Producer wait before a change is dropped.
    pub enqueue_timeout_ms: u64,
    /// Quiet period before a repository's changes are committed together.
    pub debounce_ms: u64,
    /// Bound on one stage/message/commit cycle.
    pub max_event_secs: u64,
    /// Review queue and failure ledger location.
    pub data_dir: Option<PathBuf>,
    /// Global include/ignore file location.
    pub policy_dir: Option<PathBuf>,
    /// Commit style guide file.
    pub style_guide: Option<PathBuf>,
    /// Text-generation backend.
    pub llm: LlmSettings,
    /// Ticket escalation.
    pub escalation: EscalationSettings,
    /// Fallback values for environment variables.
    pub env: BTreeMap<String, String>,
}

impl Default for Settings {
    fn default() -> Self {
        let dispatcher = DispatcherConfig::default();
        Self {
            roots: Vec::new(),
            workers: dispatcher.workers,
            queue_capacity: dispatcher.queue_capacity,
            enqueue_timeout_ms: 500,
            debounce_ms: 750,
            max_event_secs: 90 * 60,
            data_dir: None,
            policy_dir: None,
            style_guide: None,
            llm: LlmSettings::default(),
            escalation: EscalationSettings::default(),
            env: BTreeMap::new(),
        }
    }
}

impl Settings {
    /// Loads from `explicit` if given, else from the default location.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match explicit {
            Some(path) => {
                if !path.exists() {
                    bail!("Settings file not found: {}", path.display());
                }
                Self::load_from_path(path)
            }
            None => Self::load_from_path(Self::default_path()?),
        }
    }

    /// Loads from a specific path; a missing file yields the defaults.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!(path = %path.display(), "No settings file, using defaults");
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
        let settings: Self = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse settings file: {}", path.display()))?;
        settings
            .validate()
            .with_context(|| format!("Invalid settings in {}", path.display()))?;
        Ok(settings)
    }

    /// Default settings file location.
    pub fn default_path() -> Result<PathBuf> {
        Ok(config_base_dir()?.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
    }

    /// Rejects values the runtime cannot work with.
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            bail!("workers must be at least 1");
        }
        if self.queue_capacity == 0 {
            bail!("queue_capacity must be at least 1");
        }
        if self.llm.max_attempts == 0 {
            bail!("llm.max_attempts must be at least 1");
        }
        if self.max_event_secs == 0 {
            bail!("max_event_secs must be at least 1");
        }
        if self.llm.request_timeout_secs == 0 {
            bail!("llm.request_timeout_secs must be at least 1");
        }
        let generation = self.generation_budget();
        if generation >= Duration::from_secs(self.max_event_secs) {
            bail!(
                "max_event_secs ({}) must exceed the worst-case generation time ({}s)",
                self.max_event_secs,
                generation.as_secs()
            );
        }
        if self.escalation.enabled {
            if self.escalation.poll_interval_secs == 0 {
                bail!("escalation.poll_interval_secs must be at least 1");
            }
            let window = Duration::from_secs(self.escalation.max_poll_minutes * 60);
            if generation + window > Duration::from_secs(self.max_event_secs) {
                bail!(
                    "escalation.max_poll_minutes ({}) does not fit in max_event_secs ({}) after {}s of generation attempts",
                    self.escalation.max_poll_minutes,
                    self.max_event_secs,
                    generation.as_secs()
                );
            }
        }
        if let Some(base_url) = &self.llm.base_url {
            let parsed = Url::parse(base_url)
                .with_context(|| format!("llm.base_url is not a valid URL: {base_url}"))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                bail!("llm.base_url must use http or https: {base_url}");
            }
        }
        if self.escalation.enabled
            && self
                .escalation
                .team_id
                .as_deref()
                .map_or(true, |id| id.trim().is_empty())
        {
            bail!("escalation.team_id is required when escalation is enabled");
        }
        Ok(())
    }

    /// Renders the settings as YAML.
    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to render settings")
    }

    /// Returns an environment variable with fallback to the `env` map.
    pub fn get_env_var(&self, key: &str) -> Option<String> {
        env::var(key)
            .ok()
            .filter(|value| !value.is_empty())
            .or_else(|| self.env.get(key).cloned())
    }

    /// First variable found among `keys`.
    pub fn get_env_vars(&self, keys: &[&str]) -> Result<String> {
        keys.iter()
            .find_map(|key| self.get_env_var(key))
            .with_context(|| format!("None of the environment variables found: {keys:?}"))
    }

    /// Directory holding the review queue and failure ledger.
    pub fn data_dir(&self) -> Result<PathBuf> {
        match &self.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => {
                let base = dirs::data_dir()
                    .or_else(|| dirs::home_dir().map(|home| home.join(".local").join("share")))
                    .context("Failed to determine data directory")?;
                Ok(base.join(APP_DIR_NAME))
            }
        }
    }

    /// Directory holding the global include/ignore files.
    pub fn policy_dir(&self) -> Result<PathBuf> {
        match &self.policy_dir {
            Some(dir) => Ok(dir.clone()),
            None => Ok(config_base_dir()?.join(APP_DIR_NAME)),
        }
    }

    /// Review queue file.
    pub fn review_queue_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(REVIEW_QUEUE_FILE))
    }

    /// Failure ledger file.
    pub fn failure_ledger_path(&self) -> Result<PathBuf> {
        Ok(self.data_dir()?.join(FAILURE_LEDGER_FILE))
    }

    /// Reads the configured style guide, or the built-in one.
    pub fn style_guide_text(&self) -> Result<String> {
        match &self.style_guide {
            Some(path) => fs::read_to_string(path)
                .with_context(|| format!("Failed to read style guide: {}", path.display())),
            None => Ok(DEFAULT_STYLE_GUIDE.to_string()),
        }
    }

    /// Worker pool settings.
    pub fn dispatcher_config(&self) -> Result<DispatcherConfig> {
        Ok(DispatcherConfig {
            workers: self.workers,
            queue_capacity: self.queue_capacity,
            enqueue_timeout: Duration::from_millis(self.enqueue_timeout_ms),
            debounce: Duration::from_millis(self.debounce_ms),
            max_event_time: Duration::from_secs(self.max_event_secs),
            style_guide: self.style_guide_text()?,
            ..DispatcherConfig::default()
        })
    }

    /// Retry limits for the text-generation backend.
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.llm.max_attempts,
            initial_backoff: Duration::from_millis(self.llm.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.llm.max_backoff_ms),
            request_timeout: Duration::from_secs(self.llm.request_timeout_secs),
        }
    }

    /// Longest time the model attempts can take before escalation starts.
    pub fn generation_budget(&self) -> Duration {
        let llm = &self.llm;
        let attempts = u64::from(llm.max_attempts);
        let requests = Duration::from_secs(llm.request_timeout_secs.saturating_mul(attempts));
        let backoff =
            Duration::from_millis(llm.max_backoff_ms.saturating_mul(attempts.saturating_sub(1)));
        requests + backoff
    }

    /// Ticket polling schedule.
    pub fn escalation_policy(&self) -> EscalationPolicy {
        EscalationPolicy {
            poll_interval: Duration::from_secs(self.escalation.poll_interval_secs.max(1)),
            max_poll_duration: match self.escalation.max_poll_minutes {
                0 => None,
                minutes => Some(Duration::from_secs(minutes * 60)),
            },
        }
    }

    /// Builds the configured text-generation client.
    pub fn build_ai_client(&self) -> Result<Arc<dyn AiClient>> {
        let llm = &self.llm;
        let timeout = Duration::from_secs(llm.request_timeout_secs);
        let client: Arc<dyn AiClient> = match llm.provider {
            Provider::Ollama => Arc::new(OpenAiAiClient::new_ollama(
                llm.model.clone(),
                llm.base_url.clone(),
                llm.max_tokens,
                timeout,
            )?),
            Provider::Openai => Arc::new(OpenAiAiClient::new_openai(
                llm.model.clone(),
                self.get_env_vars(OPENAI_KEY_VARS)?,
                llm.base_url.clone(),
                llm.max_tokens,
                timeout,
            )?),
            Provider::Anthropic => Arc::new(ClaudeAiClient::new(
                llm.model.clone(),
                self.get_env_vars(ANTHROPIC_KEY_VARS)?,
                llm.base_url.clone(),
                llm.max_tokens,
                timeout,
            )?),
        };
        info!(provider = %llm.provider, model = %llm.model, "Configured text-generation backend");
        Ok(client)
    }

    /// Builds the ticket system when escalation is enabled.
    pub fn build_ticket_system(&self) -> Result<Option<Arc<dyn TicketSystem>>> {
        if !self.escalation.enabled {
            return Ok(None);
        }
        let team_id = self
            .escalation
            .team_id
            .clone()
            .context("escalation.team_id is required when escalation is enabled")?;
        let api_key = self
            .get_env_var(LINEAR_KEY_VAR)
            .with_context(|| format!("{LINEAR_KEY_VAR} is required when escalation is enabled"))?;
        let tickets = LinearTicketSystem::new(
            api_key,
            team_id,
            self.escalation.project_id.clone(),
            Duration::from_secs(self.llm.request_timeout_secs),
        )?;
        Ok(Some(Arc::new(tickets)))
    }

    /// Builds the message generator with escalation when configured.
    pub fn build_generator(&self) -> Result<MessageGenerator> {
        let generator = MessageGenerator::new(self.build_ai_client()?, self.retry_policy());
        Ok(match self.build_ticket_system()? {
            Some(tickets) => generator.with_escalation(tickets, self.escalation_policy()),
            None => generator,
        })
    }

    /// Builds the policy engine over the libgit2 gateway.
    pub fn build_engine(&self, gateway: Arc<dyn RepositoryGateway>) -> Result<ClassificationEngine> {
        let store = PatternStore::new(self.policy_dir()?);
        Ok(ClassificationEngine::new(Arc::new(store), gateway))
    }

    /// Builds every collaborator the dispatcher needs.
    pub fn build_dispatcher_parts(&self) -> Result<DispatcherParts> {
        let gateway: Arc<dyn RepositoryGateway> = Arc::new(Git2Gateway::new());
        let engine = Arc::new(self.build_engine(gateway.clone())?);
        let review = Arc::new(ReviewQueue::open(self.review_queue_path()?, engine.clone())?);
        Ok(DispatcherParts {
            gateway,
            engine,
            review,
            generator: Arc::new(self.build_generator()?),
            ledger: Arc::new(FailureLedger::new(self.failure_ledger_path()?)),
        })
    }
}

fn config_base_dir() -> Result<PathBuf> {
    if let Some(dir) = env::var_os("XDG_CONFIG_HOME").filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }
    dirs::home_dir()
        .map(|home| home.join(".config"))
        .context("Failed to determine home directory")
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_settings(yaml: &str) -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        fs::write(&path, yaml).unwrap();
        (dir, path)
    }

    #[test]
    fn missing_file_yields_defaults() {
        let dir = TempDir::new().unwrap();
        let settings = Settings::load_from_path(dir.path().join("absent.yaml")).unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.llm.provider, Provider::Ollama);
    }

    #[test]
    fn explicit_missing_file_is_an_error() {
        let dir = TempDir::new().unwrap();
        assert!(Settings::load(Some(&dir.path().join("absent.yaml"))).is_err());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let (_dir, path) = write_settings(
            "roots:\n  - /work/site\nworkers: 2\nllm:\n  provider: anthropic\n  model: claude-test\nescalation:\n  max_poll_minutes: 0\n",
        );
        let settings = Settings::load(Some(&path)).unwrap();

        assert_eq!(settings.roots, vec![PathBuf::from("/work/site")]);
        assert_eq!(settings.workers, 2);
        assert_eq!(settings.queue_capacity, Settings::default().queue_capacity);
        assert_eq!(settings.llm.provider, Provider::Anthropic);
        assert_eq!(settings.llm.max_attempts, 3);
        assert_eq!(settings.escalation_policy().max_poll_duration, None);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let (_dir, path) = write_settings("workers: 0\n");
        assert!(Settings::load_from_path(&path).is_err());

        let (_dir, path) = write_settings("escalation:\n  enabled: true\n");
        assert!(Settings::load_from_path(&path).is_err());

        let (_dir, path) = write_settings("llm:\n  base_url: ftp://models.internal\n");
        assert!(Settings::load_from_path(&path).is_err());

        let (_dir, path) = write_settings("llm:\n  base_url: http://127.0.0.1:11434\n");
        assert!(Settings::load_from_path(&path).is_ok());
    }

    #[test]
    fn zero_budgets_are_rejected() {
        for yaml in [
            "max_event_secs: 0\n",
            "llm:\n  request_timeout_secs: 0\n",
            "max_event_secs: 100\nllm:\n  request_timeout_secs: 60\n  max_attempts: 2\n",
        ] {
            let (_dir, path) = write_settings(yaml);
            assert!(Settings::load_from_path(&path).is_err(), "{yaml}");
        }
    }

    #[test]
    fn escalation_window_must_fit_in_the_event_budget() {
        let (_dir, path) = write_settings(
            "max_event_secs: 900\nescalation:\n  enabled: true\n  team_id: TEAM\n  max_poll_minutes: 60\n",
        );
        let error = format!("{:#}", Settings::load_from_path(&path).unwrap_err());
        assert!(error.contains("max_poll_minutes"), "{error}");

        let (_dir, path) = write_settings(
            "escalation:\n  enabled: true\n  team_id: TEAM\n  max_poll_minutes: 0\n",
        );
        assert!(Settings::load_from_path(&path).is_ok());
    }

    #[test]
    fn default_escalation_window_fits_in_the_default_event_budget() {
        let settings = Settings {
            escalation: EscalationSettings {
                enabled: true,
                team_id: Some("TEAM".to_string()),
                ..EscalationSettings::default()
            },
            ..Settings::default()
        };
        settings.validate().unwrap();

        let budget = settings.dispatcher_config().unwrap().max_event_time;
        let window = settings.escalation_policy().max_poll_duration.unwrap();
        assert!(settings.generation_budget() + window <= budget);
        assert_eq!(settings.generation_budget(), Duration::from_secs(3 * 60 + 16));
    }

    #[test]
    fn env_map_is_a_fallback() {
        let mut settings = Settings::default();
        settings.env.insert(
            "AUTO_COMMIT_TEST_ONLY_IN_SETTINGS".to_string(),
            "from-settings".to_string(),
        );

        assert_eq!(
            settings
                .get_env_var("AUTO_COMMIT_TEST_ONLY_IN_SETTINGS")
                .as_deref(),
            Some("from-settings")
        );
        assert!(settings.get_env_var("AUTO_COMMIT_TEST_UNSET").is_none());
        assert_eq!(
            settings
                .get_env_vars(&["AUTO_COMMIT_TEST_UNSET", "AUTO_COMMIT_TEST_ONLY_IN_SETTINGS"])
                .unwrap(),
            "from-settings"
        );
    }

    #[test]
    fn derived_runtime_settings() {
        let data = TempDir::new().unwrap();
        let settings = Settings {
            data_dir: Some(data.path().to_path_buf()),
            debounce_ms: 10,
            ..Settings::default()
        };

        assert_eq!(
            settings.failure_ledger_path().unwrap(),
            data.path().join(FAILURE_LEDGER_FILE)
        );
        let dispatcher = settings.dispatcher_config().unwrap();
        assert_eq!(dispatcher.debounce, Duration::from_millis(10));
        assert_eq!(dispatcher.style_guide, DEFAULT_STYLE_GUIDE);
        assert_eq!(settings.retry_policy().max_attempts, 3);
    }

    #[test]
    fn ollama_client_needs_no_key() {
        assert!(Settings::default().build_ai_client().is_ok());
        assert!(Settings::default().build_ticket_system().unwrap().is_none());
    }

    #[test]
    fn rendered_settings_parse_back() {
        let settings = Settings::default();
        let rendered = settings.to_yaml().unwrap();
        let parsed: Settings = serde_yaml::from_str(&rendered).unwrap();
        assert_eq!(parsed, settings);
    }
}
