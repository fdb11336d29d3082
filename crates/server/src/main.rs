//! Discovery Server
//!
//! Axum server for the discovery workbench plus a CLI that drives a running
//! server: inspect the project, fill in metadata, run stage analyses, talk to
//! the voice assistant and export documents.

mod api;
mod config;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::{Parser, Subcommand};
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use discovery_core::analysis::llm::OpenAiClient;
use discovery_core::analysis::scraper::WebScraper;
use discovery_core::analysis::search::SerperClient;
use discovery_core::analysis::{AnalysisBackend, Orchestrator};
use discovery_core::client::DiscoveryClient;
use discovery_core::export::{export_document, render_presentation, structured_blocks, ExportFormat};
use discovery_core::stages::DiscoveryStage;
use discovery_core::state::io::{ensure_runtime_dir, write_file};
use discovery_core::state::{
    AnalysisToggles, ControllerConfig, DiscoveryController, DiscoveryDb, InputMode, MetadataField,
    Mutation, ProjectRepository,
};
use discovery_core::voice::{AudioCapture, CapturedAudio, SpeechOutput, VoiceService, VoiceSession};

use api::AppState;
use config::ServerConfig;

#[derive(Parser, Clone)]
#[command(author, version, about = "Discovery - staged business discovery workbench")]
struct Args {
    /// Server used by the client commands
    #[arg(long, global = true)]
    server: Option<String>,

    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Discovery server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "3000")]
        port: u16,
        /// Address to bind
        #[arg(long, default_value = "127.0.0.1")]
        host: String,
    },
    /// Show metadata, stage progress and the current document outline
    Status,
    /// Show metadata, or set one field
    Metadata {
        /// Field name, e.g. companyName or key-competitors
        field: Option<String>,
        /// New value
        value: Option<String>,
    },
    /// Analyze the current stage (or --stage) and stream the document
    Analyze {
        /// Switch to this stage first
        #[arg(short, long)]
        stage: Option<String>,
        /// Stage input text
        #[arg(short, long)]
        input: Option<String>,
        /// Append --input instead of replacing
        #[arg(long)]
        append: bool,
        /// Reference URLs to scrape
        #[arg(long = "url")]
        urls: Vec<String>,
        /// Ask the model to reason step by step
        #[arg(long)]
        thinking: bool,
        /// Ground the analysis with web search
        #[arg(long)]
        search: bool,
    },
    /// Export a stage document
    Export {
        /// Stage to export, defaults to the current stage
        stage: Option<String>,
        /// doc, web or pdf
        #[arg(short, long, default_value = "web")]
        format: String,
        /// Output file
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Render a stage as a printable slide deck
    Present {
        stage: Option<String>,
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Send a recorded voice command
    Voice {
        /// Audio file (webm, wav, mp3, m4a)
        file: PathBuf,
    },
}

/// Reads a pre-recorded utterance from disk
struct FileCapture {
    path: PathBuf,
}

#[async_trait]
impl AudioCapture for FileCapture {
    async fn record(&self) -> Result<CapturedAudio> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .with_context(|| format!("Failed to read audio from {}", self.path.display()))?;
        let file_name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "audio.webm".to_string());
        Ok(CapturedAudio { bytes, file_name })
    }
}

/// Prints replies instead of speaking them
struct ConsoleSpeech;

#[async_trait]
impl SpeechOutput for ConsoleSpeech {
    async fn speak(&self, text: &str) -> Result<()> {
        println!("🔊 {}", text);
        Ok(())
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Wire repository and providers from the resolved config
fn build_state(config: &ServerConfig, db: &DiscoveryDb) -> Result<AppState> {
    let repository = Arc::new(ProjectRepository::new(db));

    let (analyzer, voice) = match &config.api_key {
        Some(key) => {
            let llm = Arc::new(OpenAiClient::new(&config.models, key.clone()));
            let mut orchestrator = Orchestrator::new(llm.clone(), config.models.clone());
            match &config.serper_api_key {
                Some(serper) => {
                    orchestrator = orchestrator.with_search(Arc::new(SerperClient::new(serper.clone())?));
                }
                None => tracing::info!("SERPER_API_KEY not set; research grounding disabled"),
            }
            let voice = VoiceService::new(llm.clone(), llm, config.models.clone());
            (
                Some(Arc::new(orchestrator) as Arc<dyn AnalysisBackend>),
                Some(Arc::new(voice)),
            )
        }
        None => {
            tracing::warn!(
                key = config.api_key_env(),
                "Provider key not set; analysis and voice will return errors"
            );
            (None, None)
        }
    };

    Ok(AppState {
        repository,
        analyzer,
        voice,
        api_key_env: config.api_key_env(),
    })
}

async fn run_server(config: ServerConfig, host: String, port: u16) -> Result<()> {
    println!("╔══════════════════════════════════════╗");
    println!("║         DISCOVERY SERVER             ║");
    println!("╚══════════════════════════════════════╝");

    let runtime = ensure_runtime_dir().await?;
    let db = DiscoveryDb::open().context("Failed to open discovery database")?;
    tracing::info!(path = %runtime.display(), schema = db.schema_version()?, "Database ready");

    let app = api::router(build_state(&config, &db)?);

    let addr: SocketAddr = format!("{}:{}", host, port)
        .parse()
        .with_context(|| format!("Invalid listen address {}:{}", host, port))?;
    println!("🚀 Discovery Server running at http://{}", addr);
    println!("   Project:  /api/project (GET, POST)");
    println!("   Analyze:  /api/analyze (SSE)");
    println!("   Voice:    /api/voice (multipart)");
    println!("   Export:   /api/export/:stage, /api/present/:stage");
    println!("   OpenAPI:  /api/openapi.json");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

/// Controller synced against the configured server
async fn connect(config: &ServerConfig) -> Result<(Arc<DiscoveryClient>, DiscoveryController)> {
    let client = Arc::new(DiscoveryClient::new(&config.server_url));
    let mut controller = DiscoveryController::new(
        client.clone(),
        ControllerConfig {
            sync_debounce: config.sync_debounce,
            track_revision: true,
        },
    );
    controller
        .load()
        .await
        .with_context(|| format!("Could not reach Discovery server at {}", config.server_url))?;
    Ok((client, controller))
}

fn resolve_stage(controller: &DiscoveryController, stage: Option<&str>) -> Result<DiscoveryStage> {
    match stage {
        Some(raw) => Ok(raw.parse()?),
        None => Ok(controller.state().current_stage),
    }
}

fn print_status(controller: &DiscoveryController) {
    let state = controller.state();
    let metadata = &state.project_metadata;

    println!("📋 Project metadata");
    for field in MetadataField::ALL {
        let value = metadata.get(field);
        println!(
            "   {:<16} {}",
            field.label(),
            if value.is_empty() { "(missing)" } else { value }
        );
    }
    if !metadata.is_complete() {
        println!("   ⚠️ Complete the metadata before analyzing or switching stages");
    }

    println!("\n🧭 Stages");
    for stage in DiscoveryStage::ALL {
        let data = state.stage(stage);
        let marker = if stage == state.current_stage { "▶" } else { " " };
        println!(
            " {} {:<7} {:<10} coherence {:>2}%  versions {}  answered {}/{}",
            marker,
            stage.as_str(),
            data.status.as_str(),
            data.coherence_score,
            data.versions.len(),
            data.answered_questions().len(),
            data.questions.len()
        );
    }

    let current = state.current();
    let blocks = structured_blocks(&current.output);
    if !blocks.is_empty() {
        println!("\n📄 {} outline", state.current_stage.config().title);
        for block in blocks {
            println!("   {}", block.lines().next().unwrap_or_default());
        }
    }
    if !current.questions.is_empty() {
        println!("\n❓ Clarification questions");
        for (i, question) in current.questions.iter().enumerate() {
            let answer = current.answers.get(&i).map(String::as_str).unwrap_or("");
            println!("   {}. {} {}", i, question, if answer.is_empty() { "" } else { "✅" });
        }
    }
}

async fn run_cli(config: ServerConfig, command: CliCommand) -> Result<()> {
    let (client, mut controller) = connect(&config).await?;

    match command {
        CliCommand::Serve { .. } => {}
        CliCommand::Status => print_status(&controller),
        CliCommand::Metadata { field, value } => match (field, value) {
            (Some(field), Some(value)) => {
                let field: MetadataField = field.parse().map_err(anyhow::Error::msg)?;
                controller
                    .apply(Mutation::SetMetadata { field, value })
                    .await?;
                println!("✅ {} updated", field.label());
            }
            (Some(field), None) => {
                let field: MetadataField = field.parse().map_err(anyhow::Error::msg)?;
                println!("{}", controller.state().project_metadata.get(field));
            }
            _ => print_status(&controller),
        },
        CliCommand::Analyze {
            stage,
            input,
            append,
            urls,
            thinking,
            search,
        } => {
            if let Some(stage) = stage {
                controller
                    .apply(Mutation::SwitchStage(stage.parse()?))
                    .await?;
            }
            let stage = controller.state().current_stage;
            if let Some(text) = input {
                let mode = if append {
                    InputMode::Append
                } else {
                    InputMode::Replace
                };
                controller
                    .apply(Mutation::SetInput { stage, text, mode })
                    .await?;
            }
            for url in urls {
                controller.apply(Mutation::AddUrl { stage, url }).await?;
            }

            let stage_config = stage.config();
            println!(
                "🤖 {} is working on {}...",
                stage_config.agent_name, stage_config.title
            );
            let scraper = WebScraper::new()?;
            controller
                .run_analysis(
                    client.as_ref(),
                    &scraper,
                    AnalysisToggles { thinking, search },
                    |delta| {
                        print!("{}", delta);
                        let _ = std::io::stdout().flush();
                    },
                )
                .await?;

            let data = controller.state().stage(stage);
            println!(
                "\n\n✅ {} complete (coherence {}%)",
                stage_config.title, data.coherence_score
            );
            for (i, question) in data.questions.iter().enumerate() {
                println!("   {}. {}", i, question);
            }
        }
        CliCommand::Export { stage, format, out } => {
            let format: ExportFormat = format.parse().map_err(anyhow::Error::msg)?;
            let stage = resolve_stage(&controller, stage.as_deref())?;
            let output = controller.state().stage(stage).output;
            match export_document(stage, &output, format) {
                Some(document) => {
                    let path = out.unwrap_or_else(|| PathBuf::from(&document.file_name));
                    write_file(&path, &document.body).await?;
                    println!("📄 Exported {} to {}", stage, path.display());
                }
                None => println!("ℹ️ {} has no output to export yet", stage),
            }
        }
        CliCommand::Present { stage, out } => {
            let stage = resolve_stage(&controller, stage.as_deref())?;
            let output = controller.state().stage(stage).output;
            match render_presentation(stage, &output) {
                Some(deck) => {
                    let path = out.unwrap_or_else(|| {
                        PathBuf::from(format!("Discovery_Deck_{}.html", stage))
                    });
                    write_file(&path, &deck).await?;
                    println!("🖥️ Deck written to {}", path.display());
                }
                None => println!("ℹ️ {} has no output to present yet", stage),
            }
        }
        CliCommand::Voice { file } => {
            let session = VoiceSession::new(
                Arc::new(FileCapture { path: file }),
                Arc::new(ConsoleSpeech),
                client.clone(),
            );
            match session.run_turn(&mut controller).await {
                Some(turn) => {
                    if !turn.user_text.is_empty() {
                        println!("🎙️ \"{}\"", turn.user_text);
                    }
                    for intent in &turn.applied {
                        println!("   ✅ {:?}", intent);
                    }
                    if turn.rejected > 0 {
                        println!("   ⚠️ {} tool call(s) skipped", turn.rejected);
                    }
                }
                None => println!("⚠️ Could not read the recording"),
            }
        }
    }

    controller.flush().await?;
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = Args::parse();
    let mut config = ServerConfig::load().await;
    if let Some(server) = args.server {
        config.server_url = server;
    }

    match args.command {
        Some(CliCommand::Serve { port, host }) => run_server(config, host, port).await,
        None => run_server(config, "127.0.0.1".to_string(), 3000).await,
        Some(command) => run_cli(config, command).await,
    }
}
