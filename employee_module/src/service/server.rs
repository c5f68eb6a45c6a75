use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;

use assistant_module::agent::{ensure_assistant, AssistantAgent, MessageHandler};
use assistant_module::client::{AssistantsApi, OpenAiAssistantsClient};
use assistant_module::delegate::ChatWithAgentTool;
use assistant_module::run::CancellationToken;
use assistant_module::tools::ToolRegistry;
use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tokio::task;
use tracing::{info, warn};

use crate::gmail::{start_gmail_poller_thread, GmailClient, GmailPoller};
use crate::google_auth::GoogleAuth;
use crate::image_host::{ImageHost, ImgurHost};
use crate::notion::{
    start_notion_threads, CreatePageTool, NotionClient, NotionPoller, NotionResponder,
    UpdateBlockTool,
};
use crate::slack::{SlackBot, SlackClient};

use super::config::ServiceConfig;
use super::handlers::{health, slack_commands, slack_events};
use super::state::AppState;
use super::workers::WorkerControl;
use super::BoxError;

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(health))
        .route("/health", get(health))
        .route("/slack/events", post(slack_events))
        .route("/slack/commands", post(slack_commands))
        .with_state(state)
}

/// Create the agents, ensure their assistants exist and start the enabled
/// pollers. Blocks on remote calls.
pub fn bootstrap(config: &ServiceConfig) -> Result<(AppState, WorkerControl), BoxError> {
    let mut control = WorkerControl::new();
    let cancel = CancellationToken::from_flag(control.stop_flag());
    let api: Arc<dyn AssistantsApi> = Arc::new(OpenAiAssistantsClient::new(config.openai.clone()));
    let profiles = &config.agents;

    let specialist_tools = Arc::new(ToolRegistry::new());
    let specialist_id = ensure_assistant(
        api.as_ref(),
        &profiles.specialist,
        config.specialist_assistant_id.as_deref(),
        &specialist_tools,
    )?;
    let specialist: Arc<dyn MessageHandler> = Arc::new(
        AssistantAgent::new(
            profiles.specialist.name.clone(),
            specialist_id,
            api.clone(),
            specialist_tools,
            config.run.clone(),
        )
        .with_cancellation(cancel.clone()),
    );

    let notion = config.notion_token.as_deref().map(NotionClient::new);
    let mut employee_tools = ToolRegistry::new();
    employee_tools.register(ChatWithAgentTool::new(specialist))?;
    if let Some(client) = &notion {
        employee_tools.register(CreatePageTool::new(
            client.clone(),
            config.notion_database_id.clone(),
        ))?;
        employee_tools.register(UpdateBlockTool::new(client.clone()))?;
    }
    let employee_tools = Arc::new(employee_tools);
    let employee_id = ensure_assistant(
        api.as_ref(),
        &profiles.employee,
        config.employee_assistant_id.as_deref(),
        &employee_tools,
    )?;
    let employee: Arc<dyn MessageHandler> = Arc::new(
        AssistantAgent::new(
            profiles.employee.name.clone(),
            employee_id,
            api,
            employee_tools,
            config.run.clone(),
        )
        .with_cancellation(cancel),
    );

    let image_host: Option<Arc<dyn ImageHost>> = config
        .imgur_client_id
        .as_deref()
        .map(|client_id| Arc::new(ImgurHost::new(client_id)) as Arc<dyn ImageHost>);

    let slack = config.slack_bot_token.as_deref().map(|token| {
        let mut bot = SlackBot::new(SlackClient::new(token), employee.clone(), config.session_scope);
        if let Some(host) = &image_host {
            bot = bot.with_image_host(host.clone());
        }
        info!("slack bot enabled");
        Arc::new(bot)
    });

    if config.gmail_enabled {
        let auth = GoogleAuth::from_env()?;
        let poller = GmailPoller::new(
            GmailClient::new(auth),
            employee.clone(),
            config.session_scope,
            config.gmail_poll_interval,
        );
        let stop_flag = control.stop_flag();
        control.push(start_gmail_poller_thread(poller, stop_flag));
        info!(
            "gmail poller enabled, interval={}s",
            config.gmail_poll_interval.as_secs()
        );
    }

    if let Some(client) = notion {
        let mention_name = config
            .notion_agent_name
            .as_deref()
            .unwrap_or_else(|| employee.name());
        let poller = NotionPoller::new(client.clone(), mention_name);
        let mut responder = NotionResponder::new(client, employee.clone(), config.session_scope);
        if let Some(host) = &image_host {
            responder = responder.with_image_host(host.clone());
        }
        let stop_flag = control.stop_flag();
        control.extend(start_notion_threads(
            poller,
            responder,
            config.notion_poll_interval,
            stop_flag,
        ));
        info!(
            "notion poller enabled for mentions of {}, interval={}s",
            mention_name,
            config.notion_poll_interval.as_secs()
        );
    }

    if slack.is_none() && control.is_empty() {
        warn!("no channel is configured; set SLACK_BOT_TOKEN, NOTION_TOKEN or GMAIL_ENABLED");
    }

    let state = AppState::new(slack, config.slack_signing_secret.clone());
    Ok((state, control))
}

pub async fn run_server(
    config: ServiceConfig,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<(), BoxError> {
    let config = Arc::new(config);
    info!(
        "agents config path={}, employee={}, specialist={}",
        config.agents_config_path.display(),
        config.agents.employee.name,
        config.agents.specialist.name
    );

    let host: IpAddr = config
        .host
        .parse()
        .map_err(|_| -> BoxError { "invalid host".into() })?;
    let addr = SocketAddr::new(host, config.port);

    let bootstrap_config = config.clone();
    let (state, mut control) = task::spawn_blocking(move || bootstrap(&bootstrap_config))
        .await
        .map_err(|err| -> BoxError { err.into() })??;
    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            control.stop_and_join();
            return Err(err.into());
        }
    };
    info!("employee service listening on {}", addr);

    let serve_result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;

    info!("stopping {} worker threads", control.len());
    control.stop_and_join();
    serve_result?;
    Ok(())
}
