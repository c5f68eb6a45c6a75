use std::fs;
use std::path::Path;

use assistant_module::agent::AgentProfile;
use serde::Deserialize;

pub const DEFAULT_EMPLOYEE_INSTRUCTIONS: &str = "You are a helpful digital employee. You answer questions from your colleagues on Slack, email and Notion, and you can create and edit Notion pages. Delegate data analysis, charts and file processing to the AI Analyst with chat_with_agent and forward their answer verbatim. Your responses may use markdown, but no other syntax, like latex, mathml, etc.";

pub const DEFAULT_SPECIALIST_INSTRUCTIONS: &str = "I am a senior data analyst here to help you answer questions. My responses may use markdown, but no other syntax, like latex, mathml, etc.";

/// Profiles of the generalist and the specialist assistants.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AgentsConfig {
    pub employee: AgentProfile,
    pub specialist: AgentProfile,
}

impl Default for AgentsConfig {
    fn default() -> Self {
        Self {
            employee: AgentProfile {
                name: "Employee".to_string(),
                instructions: DEFAULT_EMPLOYEE_INSTRUCTIONS.to_string(),
                model: "gpt-4o-mini".to_string(),
            },
            specialist: AgentProfile {
                name: "AI Analyst".to_string(),
                instructions: DEFAULT_SPECIALIST_INSTRUCTIONS.to_string(),
                model: "gpt-4o".to_string(),
            },
        }
    }
}

#[derive(Debug, Deserialize)]
struct AgentsFile {
    employee: Option<ProfileOverride>,
    specialist: Option<ProfileOverride>,
}

#[derive(Debug, Deserialize)]
struct ProfileOverride {
    name: Option<String>,
    instructions: Option<String>,
    model: Option<String>,
}

impl ProfileOverride {
    fn apply(self, profile: &mut AgentProfile) {
        if let Some(name) = self.name {
            profile.name = name;
        }
        if let Some(instructions) = self.instructions {
            profile.instructions = instructions;
        }
        if let Some(model) = self.model {
            profile.model = model;
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AgentsConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid agents config {path}: {source}")]
    Toml {
        path: String,
        source: toml::de::Error,
    },
}

/// Load profiles from a TOML file with optional `[employee]` and
/// `[specialist]` tables. A missing file yields the defaults.
pub fn load_agents_config(path: &Path) -> Result<AgentsConfig, AgentsConfigError> {
    let mut config = AgentsConfig::default();
    if !path.exists() {
        return Ok(config);
    }
    let raw = fs::read_to_string(path).map_err(|source| AgentsConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    let file: AgentsFile = toml::from_str(&raw).map_err(|source| AgentsConfigError::Toml {
        path: path.display().to_string(),
        source,
    })?;
    if let Some(employee) = file.employee {
        employee.apply(&mut config.employee);
    }
    if let Some(specialist) = file.specialist {
        specialist.apply(&mut config.specialist);
    }
    Ok(config)
}
