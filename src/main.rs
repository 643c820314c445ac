use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use secrecy::SecretString;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast;

use sqlpilot_core::events::ProgressEvent;
use sqlpilot_core::ids::ConversationId;
use sqlpilot_core::provider::{LlmProvider, StreamOptions};
use sqlpilot_core::security::ApiKey;
use sqlpilot_core::tokens::{ConversationTokens, TokenTotals};
use sqlpilot_core::tools::ToolConfig;
use sqlpilot_engine::{AgentConfig, AgentServices, ConversationHistory, Orchestrator, TurnOutcome};
use sqlpilot_llm::{models, AnthropicProvider, ReliableConfig, ReliableProvider};
use sqlpilot_retrieval::{InMemoryIndex, KnowledgeIndex, OpenSearchConfig, OpenSearchIndex, Retriever, RetrieverConfig};
use sqlpilot_settings::{load_settings, load_settings_from_path, RetrievalBackend, SqlPilotSettings};
use sqlpilot_store::{ArtifactWriter, Database, SqliteDatabase, TurnLogRepo};
use sqlpilot_telemetry::{init_telemetry, LogQuery, TelemetryConfig};

#[derive(Parser)]
#[command(name = "sqlpilot")]
#[command(about = "Ask questions of a SQL database in natural language")]
struct Cli {
    /// Settings file (defaults to $SQLPILOT_CONFIG or ./sqlpilot.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Answer a single question and exit
    Ask { question: String },
    /// Interactive session that keeps recent messages as context
    Chat,
    /// Serve the HTTP and WebSocket API
    Serve,
    /// List recent turn logs
    History {
        #[arg(short, long, default_value = "20")]
        limit: u32,
    },
    /// Show persisted warnings and errors (needs logging.logToSqlite)
    Logs {
        #[arg(long)]
        level: Option<String>,
        #[arg(long)]
        turn: Option<String>,
        #[arg(short, long, default_value = "50")]
        limit: u32,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => load_settings_from_path(path),
        None => load_settings(),
    }
    .context("failed to load settings")?;

    let telemetry = init_telemetry(TelemetryConfig {
        filter: settings.logging.level.clone(),
        json: settings.logging.json,
        log_to_sqlite: settings.logging.log_to_sqlite,
        log_db_path: PathBuf::from(&settings.logging.log_db_path),
    });

    let turn_logs = TurnLogRepo::new(
        Database::open(Path::new(&settings.logging.turn_log_db_path)).context("failed to open turn log")?,
    );

    match cli.command {
        Command::History { limit } => print_history(&turn_logs, limit),
        Command::Logs { level, turn, limit } => {
            let Some(sink) = telemetry.logs() else {
                bail!("log persistence is off; set logging.logToSqlite to true");
            };
            let query = LogQuery {
                level,
                turn_id: turn,
                limit: Some(limit),
                ..LogQuery::default()
            };
            for record in sink.query(&query)? {
                println!(
                    "{} {:<5} {} {} {}",
                    record.timestamp,
                    record.level,
                    record.target,
                    record.message,
                    record.fields.unwrap_or_default()
                );
            }
            Ok(())
        }
        Command::Ask { question } => {
            let orchestrator = build_orchestrator(&settings)?.with_turn_logs(turn_logs);
            let progress = spawn_progress_printer(orchestrator.subscribe());
            let outcome = orchestrator
                .invoke(&question, &ConversationHistory::new(settings.agent.history_messages), None)
                .await;
            progress.abort();
            let outcome = outcome?;
            println!("{}", outcome.answer);
            print_turn_cost(&settings, &outcome.tokens, None);
            Ok(())
        }
        Command::Chat => {
            let orchestrator = build_orchestrator(&settings)?.with_turn_logs(turn_logs);
            chat(&settings, orchestrator).await
        }
        Command::Serve => serve(&settings, build_orchestrator(&settings)?.with_turn_logs(turn_logs.clone()), turn_logs).await,
    }
}

fn build_orchestrator(settings: &SqlPilotSettings) -> anyhow::Result<Orchestrator> {
    let provider = build_provider(settings)?;
    let database = SqliteDatabase::open_uri(&settings.database.uri)
        .with_context(|| format!("failed to open database {}", settings.database.uri))?;
    let tools = ToolConfig::load(Path::new(&settings.agent.tool_config_path))?;

    let retrieval = &settings.retrieval;
    let retriever = Retriever::new(
        build_index(settings)?,
        RetrieverConfig {
            sample_index: retrieval.sample_index.clone(),
            schema_index: retrieval.schema_index.clone(),
            sample_k: retrieval.sample_k,
            schema_k: retrieval.schema_k,
            column_cap: retrieval.column_hit_cap,
        },
    );

    let services = AgentServices {
        provider,
        database: Arc::new(database),
        retriever,
        artifacts: ArtifactWriter::new(&settings.agent.result_dir),
        tools,
        config: AgentConfig {
            dialect: settings.database.dialect.clone(),
            language: settings.agent.language.clone(),
            stream_options: StreamOptions {
                max_tokens: Some(settings.model.max_tokens),
                temperature: settings.model.temperature,
                ..StreamOptions::default()
            },
            refine_prompt: settings.agent.refine_prompt,
            max_tool_rounds: settings.agent.max_tool_rounds,
            preview_rows: settings.agent.preview_rows,
        },
    };
    Ok(Orchestrator::new(Arc::new(services)))
}

fn build_provider(settings: &SqlPilotSettings) -> anyhow::Result<Arc<dyn LlmProvider>> {
    let model = &settings.model;
    let api_key = ApiKey::from_env(&model.api_key_env)
        .ok_or_else(|| anyhow!("{} is not set", model.api_key_env))?;
    let mut provider = AnthropicProvider::new(api_key, Some(&model.model_id))?;
    if let Some(base_url) = &model.base_url {
        provider = provider.with_base_url(base_url.clone());
    }
    let reliable = ReliableProvider::new(
        provider,
        ReliableConfig {
            max_retries: model.max_retries,
            base_delay: Duration::from_millis(model.base_delay_ms),
            ..ReliableConfig::default()
        },
    );
    Ok(Arc::new(reliable))
}

fn build_index(settings: &SqlPilotSettings) -> anyhow::Result<Arc<dyn KnowledgeIndex>> {
    let retrieval = &settings.retrieval;
    match retrieval.backend {
        RetrievalBackend::Memory => {
            let Some(path) = &retrieval.fixture_path else {
                bail!("retrieval.fixturePath is required for the memory backend");
            };
            Ok(Arc::new(InMemoryIndex::from_fixture(Path::new(path))?))
        }
        RetrievalBackend::Opensearch => {
            let password = std::env::var(&retrieval.password_env)
                .ok()
                .filter(|p| !p.is_empty())
                .map(SecretString::from);
            let index = OpenSearchIndex::new(OpenSearchConfig {
                endpoint: retrieval.endpoint.clone(),
                username: retrieval.username.clone(),
                password,
                neural_model_id: retrieval.neural_model_id.clone(),
                text_field: retrieval.text_field.clone(),
                vector_field: retrieval.vector_field.clone(),
            })?;
            Ok(Arc::new(index))
        }
    }
}

/// Tool activity goes to stderr so the answer on stdout stays clean.
fn spawn_progress_printer(mut rx: broadcast::Receiver<ProgressEvent>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(ProgressEvent::ToolStart { tool_name, retry, .. }) => {
                    eprintln!("-> {tool_name} (retry {retry})");
                }
                Ok(ProgressEvent::ToolResult { tool_name, content, .. }) => {
                    eprintln!("<- {tool_name}: {content}");
                }
                Ok(_) => {}
                Err(broadcast::error::RecvError::Lagged(_)) => {}
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

async fn chat(settings: &SqlPilotSettings, orchestrator: Orchestrator) -> anyhow::Result<()> {
    let conversation_id = ConversationId::new();
    let mut history = ConversationHistory::new(settings.agent.history_messages);
    let mut totals = ConversationTokens::default();
    let progress = spawn_progress_printer(orchestrator.subscribe());
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    eprintln!("sqlpilot chat ({conversation_id}). Empty line or Ctrl-D to quit.");
    loop {
        eprint!("> ");
        let Some(line) = lines.next_line().await? else { break };
        let question = line.trim();
        if question.is_empty() {
            break;
        }

        match orchestrator
            .invoke(question, &history, Some(conversation_id.clone()))
            .await
        {
            Ok(TurnOutcome { answer, tokens, .. }) => {
                println!("{answer}");
                totals.accumulate(&tokens);
                print_turn_cost(settings, &tokens, Some(&totals));
                history.push_user(question);
                history.push_assistant(answer);
            }
            Err(e) => {
                tracing::error!(error = %e, "turn failed");
                eprintln!("error: {e}");
            }
        }
    }
    progress.abort();
    Ok(())
}

async fn serve(settings: &SqlPilotSettings, orchestrator: Orchestrator, turn_logs: TurnLogRepo) -> anyhow::Result<()> {
    let conversations = sqlpilot_server::ConversationStore::new(
        settings.agent.history_messages,
        settings.server.max_conversations,
    );
    let state = sqlpilot_server::AppState::new(Arc::new(orchestrator), Some(turn_logs), conversations);
    let config = sqlpilot_server::ServerConfig {
        host: settings.server.host.clone(),
        port: settings.server.port,
    };
    let handle = sqlpilot_server::start(config, state)
        .await
        .context("failed to start server")?;

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl+c")?;
    tracing::info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

fn print_history(turn_logs: &TurnLogRepo, limit: u32) -> anyhow::Result<()> {
    for row in turn_logs.recent(limit)? {
        let status = if row.success { "ok" } else { "failed" };
        println!(
            "{}  {:<6}  {:>7} tokens  {}",
            row.endtime, status, row.token_used, row.user_prompt
        );
        if let Some(query) = row.record.get("final_query").and_then(|q| q.as_str()) {
            println!("    {query}");
        }
    }
    Ok(())
}

fn print_turn_cost(settings: &SqlPilotSettings, tokens: &TokenTotals, session: Option<&ConversationTokens>) {
    let Some(model) = models::find_model(&settings.model.model_id) else {
        eprintln!(
            "tokens: {} in / {} out ({} calls)",
            tokens.total_input_tokens, tokens.total_output_tokens, tokens.gateway_calls
        );
        return;
    };
    let cost = model.pricing.cost(tokens.total_input_tokens, tokens.total_output_tokens);
    eprintln!(
        "tokens: {} in / {} out ({} calls), est. ${cost:.4}",
        tokens.total_input_tokens, tokens.total_output_tokens, tokens.gateway_calls
    );
    if let Some(session) = session {
        let total = model.pricing.cost(session.total_input_tokens, session.total_output_tokens);
        eprintln!(
            "session: {} tokens over {} turns, est. ${total:.4}",
            session.total_tokens, session.turn_count
        );
    }
}
