//! Deletes assistants by name and every file uploaded for assistants.
//!
//! Usage: `assistant-cleanup [NAME ...]` (defaults to the built-in agent names).

use std::collections::HashSet;
use std::env;

use assistant_module::client::{AssistantsApi, OpenAiAssistantsClient, OpenAiConfig};
use tracing::{error, info};

const DEFAULT_NAMES: &[&str] = &["AI Analyst", "Employee"];
const FILE_PURPOSES: &[&str] = &["assistants", "assistants_output"];

fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    tracing_subscriber::fmt().with_target(false).init();
    dotenvy::dotenv().ok();

    let config = OpenAiConfig::from_env().ok_or("OPENAI_API_KEY must be set")?;
    let api = OpenAiAssistantsClient::new(config);

    let mut names: HashSet<String> = env::args().skip(1).collect();
    if names.is_empty() {
        names = DEFAULT_NAMES.iter().map(|name| name.to_string()).collect();
    }

    let mut deleted_assistants = 0;
    for assistant in api.list_assistants()? {
        let Some(name) = assistant.name.as_deref() else {
            continue;
        };
        if !names.contains(name) {
            continue;
        }
        match api.delete_assistant(&assistant.id) {
            Ok(()) => {
                info!("deleted assistant {} ({})", assistant.id, name);
                deleted_assistants += 1;
            }
            Err(err) => error!("failed to delete assistant {}: {}", assistant.id, err),
        }
    }

    let mut deleted_files = 0;
    for purpose in FILE_PURPOSES {
        for file in api.list_files(purpose)? {
            match api.delete_file(&file.id) {
                Ok(()) => {
                    info!(
                        "deleted file {} ({})",
                        file.id,
                        file.filename.as_deref().unwrap_or("unnamed")
                    );
                    deleted_files += 1;
                }
                Err(err) => error!("failed to delete file {}: {}", file.id, err),
            }
        }
    }

    info!(
        "cleanup finished: {} assistants, {} files deleted",
        deleted_assistants, deleted_files
    );
    Ok(())
}
