use std::env;
use std::io;
use std::path::PathBuf;
use std::time::Duration;

use assistant_module::client::OpenAiConfig;
use assistant_module::run::{RunDriverConfig, UnknownToolPolicy};

use crate::agents_config::{load_agents_config, AgentsConfig};
use crate::channel::SessionScope;

use super::BoxError;

pub const DEFAULT_AGENTS_CONFIG_PATH: &str = "agents.toml";

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub host: String,
    pub port: u16,
    pub openai: OpenAiConfig,
    /// Reuse this assistant instead of creating the generalist.
    pub employee_assistant_id: Option<String>,
    /// Reuse this assistant instead of creating the specialist.
    pub specialist_assistant_id: Option<String>,
    pub agents_config_path: PathBuf,
    pub agents: AgentsConfig,
    pub run: RunDriverConfig,
    pub session_scope: SessionScope,
    /// Slack is enabled when a bot token is present.
    pub slack_bot_token: Option<String>,
    pub slack_signing_secret: Option<String>,
    /// Notion polling and tools are enabled when a token is present.
    pub notion_token: Option<String>,
    pub notion_poll_interval: Duration,
    pub notion_database_id: Option<String>,
    /// Name the Notion integration is @-mentioned by. Defaults to the
    /// generalist's name.
    pub notion_agent_name: Option<String>,
    pub gmail_enabled: bool,
    pub gmail_poll_interval: Duration,
    pub imgur_client_id: Option<String>,
}

impl ServiceConfig {
    pub fn from_env() -> Result<Self, BoxError> {
        dotenvy::dotenv().ok();

        let host = env::var("RUST_SERVICE_HOST").unwrap_or_else(|_| "0.0.0.0".to_string());
        let port = env::var("RUST_SERVICE_PORT")
            .ok()
            .and_then(|value| value.parse::<u16>().ok())
            .unwrap_or(9001);

        let openai = OpenAiConfig::from_env().ok_or("OPENAI_API_KEY must be set")?;

        let agents_config_path = resolve_path(
            env::var("AGENTS_CONFIG_PATH")
                .unwrap_or_else(|_| DEFAULT_AGENTS_CONFIG_PATH.to_string()),
        )?;
        let agents = load_agents_config(&agents_config_path)?;

        let defaults = RunDriverConfig::default();
        let unknown_tool_policy = match env_var_non_empty("UNKNOWN_TOOL_POLICY") {
            Some(value) => value.parse::<UnknownToolPolicy>()?,
            None => defaults.unknown_tool_policy,
        };
        let run = RunDriverConfig {
            poll_interval: env_millis("RUN_POLL_INTERVAL_MS").unwrap_or(defaults.poll_interval),
            timeout: env_secs("RUN_TIMEOUT_SECS").unwrap_or(defaults.timeout),
            unknown_tool_policy,
        };

        let session_scope = match env_var_non_empty("SESSION_SCOPE") {
            Some(value) => value.parse::<SessionScope>()?,
            None => SessionScope::default(),
        };

        Ok(Self {
            host,
            port,
            openai,
            employee_assistant_id: env_var_non_empty("EMPLOYEE_ASSISTANT_ID"),
            specialist_assistant_id: env_var_non_empty("SPECIALIST_ASSISTANT_ID"),
            agents_config_path,
            agents,
            run,
            session_scope,
            slack_bot_token: env_var_non_empty("SLACK_BOT_TOKEN"),
            slack_signing_secret: env_var_non_empty("SLACK_SIGNING_SECRET"),
            notion_token: env_var_non_empty("NOTION_TOKEN"),
            notion_poll_interval: env_secs("NOTION_POLL_INTERVAL_SECS")
                .unwrap_or(Duration::from_secs(300)),
            notion_database_id: env_var_non_empty("NOTION_DATABASE_ID"),
            notion_agent_name: env_var_non_empty("NOTION_AGENT_NAME"),
            gmail_enabled: env_flag("GMAIL_ENABLED", false),
            gmail_poll_interval: env_secs("GMAIL_POLL_INTERVAL_SECS")
                .unwrap_or(Duration::from_secs(10)),
            imgur_client_id: env_var_non_empty("IMGUR_CLIENT_ID"),
        })
    }
}

fn env_flag(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "y"
        ),
        Err(_) => default,
    }
}

fn env_var_non_empty(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_secs(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<u64>().ok())
        .filter(|value| *value > 0)
        .map(Duration::from_millis)
}

fn resolve_path(raw: String) -> Result<PathBuf, io::Error> {
    let path = PathBuf::from(raw);
    if path.is_absolute() {
        Ok(path)
    } else {
        let cwd = env::current_dir()?;
        Ok(cwd.join(path))
    }
}
