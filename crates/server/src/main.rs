//! Scholar Server
//!
//! Axum server exposing review sessions, a progress event stream and the
//! pipeline configuration. `scholar run` drives one review in the terminal
//! without a server.

mod api;
mod export;

use axum::{routing::get, Json, Router};
use clap::{Parser, Subcommand};
use scholar_core::state::CandidateItem;
use scholar_core::workflow::WorkflowEventKind;
use scholar_core::{
    backends_from_config, ConfigPatch, Language, RadkitGenerator, ReviewDriver, ScholarConfig,
    ScholarDb, SessionStatus, Stage, StageContext, StartOptions, WorkflowEvent,
};
use std::{net::SocketAddr, sync::Arc};
use tokio::{
    net::TcpListener,
    sync::{broadcast, mpsc, RwLock},
};
use tracing_subscriber::EnvFilter;
use utoipa::OpenApi;

use api::{config as config_api, error::ErrorBody, review};

/// Application state
pub struct AppState {
    /// Replaced when the configuration changes
    pub driver: RwLock<Arc<ReviewDriver>>,
    pub config: RwLock<ScholarConfig>,
    pub event_tx: broadcast::Sender<WorkflowEvent>,
}

impl AppState {
    pub async fn driver(&self) -> Arc<ReviewDriver> {
        self.driver.read().await.clone()
    }
}

pub type SharedState = Arc<AppState>;

#[derive(Parser, Clone)]
#[command(author, version, about = "Scholar - cited literature reviews with human approval")]
struct Args {
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// Start the Scholar server (default)
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
    },
    /// Run one review in the terminal (CLI mode, no server)
    Run {
        /// Research topic
        query: String,
        /// Approve every retrieved candidate without asking
        #[arg(long)]
        approve_all: bool,
        /// Output language (en, zh)
        #[arg(short, long, default_value = "en")]
        language: String,
        /// Reflection retries before the session fails
        #[arg(long)]
        max_retries: Option<u32>,
        /// Comma-separated backends to search
        #[arg(long, value_delimiter = ',')]
        sources: Vec<String>,
    },
}

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Scholar API",
        version = "1.0.0",
        description = "Workflow engine for cited literature reviews"
    ),
    paths(
        review::start_review,
        review::approve_review,
        review::continue_review,
        review::run_review,
        review::get_status,
        review::list_reviews,
        review::get_review,
        review::get_draft,
        config_api::get_config,
        config_api::update_config
    ),
    components(
        schemas(
            review::StartReviewRequest,
            review::ApproveRequest,
            review::ContinueRequest,
            review::OutcomeResponse,
            review::StatusResponse,
            review::SessionListResponse,
            review::SessionDetailResponse,
            review::DraftResponse,
            export::ReferenceEntry,
            config_api::ConfigResponse,
            config_api::ConfigUpdate,
            ErrorBody
        )
    ),
    tags(
        (name = "reviews", description = "Review session control"),
        (name = "config", description = "Configuration management")
    )
)]
struct ApiDoc;

async fn serve_openapi() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Generator, backends and limits for one configuration
pub fn stage_context(config: &ScholarConfig) -> anyhow::Result<StageContext> {
    let generator = Arc::new(RadkitGenerator::new(config.model.clone()));
    let backends = backends_from_config(&config.sources)?;
    if backends.is_empty() {
        tracing::warn!(sources = ?config.sources, "No usable search backends configured");
    }
    Ok(StageContext::new(generator, backends, config.clone()))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,scholar_core=debug,scholar_server=debug"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

pub async fn run_server(config: ScholarConfig, port: u16) -> anyhow::Result<()> {
    let (event_tx, _) = broadcast::channel::<WorkflowEvent>(256);
    let (driver_tx, mut driver_rx) = mpsc::channel::<WorkflowEvent>(256);

    // Re-broadcast driver events to every SSE subscriber
    let forward_tx = event_tx.clone();
    tokio::spawn(async move {
        while let Some(event) = driver_rx.recv().await {
            let _ = forward_tx.send(event);
        }
    });

    let db = ScholarDb::open_at(&config.database_path)?;
    let driver = ReviewDriver::new(stage_context(&config)?, &db).with_event_channel(driver_tx);

    let state: SharedState = Arc::new(AppState {
        driver: RwLock::new(Arc::new(driver)),
        config: RwLock::new(config),
        event_tx,
    });

    let app = Router::new()
        .nest("/api/v1/reviews", review::review_routes())
        .route("/api/v1/events", get(review::events))
        .route(
            "/api/v1/config",
            get(config_api::get_config).patch(config_api::update_config),
        )
        .route("/api/v1/openapi.json", get(serve_openapi))
        .with_state(state);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    tracing::info!("Scholar server running at http://{}", addr);
    tracing::info!("Reviews: /api/v1/reviews, /:id/approve, /:id/continue, /:id/draft");
    tracing::info!("Events:  /api/v1/events (SSE)");
    tracing::info!("Config:  /api/v1/config (GET, PATCH)");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

fn print_event(event: &WorkflowEvent) {
    let stage = event.stage.map(|s| s.to_string()).unwrap_or_default();
    match event.kind {
        WorkflowEventKind::StageCompleted => {
            let logs = event
                .data
                .as_ref()
                .and_then(|d| d.get("logs"))
                .and_then(|l| l.as_array())
                .cloned()
                .unwrap_or_default();
            for line in logs.iter().filter_map(|l| l.as_str()) {
                println!("   [{}] {}", stage, line);
            }
        }
        WorkflowEventKind::RetryScheduled => println!("   Retry scheduled ({})", stage),
        WorkflowEventKind::StageFailed | WorkflowEventKind::SessionFailed => {
            let data = event.data.clone().unwrap_or_default();
            eprintln!("   Failed at {}: {}", stage, data);
        }
        _ => {}
    }
}

/// Ask which candidates to keep; an empty answer keeps all of them
async fn prompt_selection(candidates: &[CandidateItem]) -> anyhow::Result<Vec<String>> {
    println!("\nCandidates:");
    for (i, item) in candidates.iter().enumerate() {
        let year = item.year.map(|y| y.to_string()).unwrap_or_else(|| "n.d.".to_string());
        println!("  {:>2}. {} ({}) [{}]", i + 1, item.title, year, item.source);
    }
    println!("Approve which? (comma-separated numbers, empty for all)");

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).map(|_| line)
    })
    .await??;

    let picks: Vec<usize> = line
        .split(',')
        .filter_map(|n| n.trim().parse::<usize>().ok())
        .filter(|n| (1..=candidates.len()).contains(n))
        .collect();
    if picks.is_empty() {
        return Ok(candidates.iter().map(|c| c.id.clone()).collect());
    }
    Ok(picks.into_iter().map(|n| candidates[n - 1].id.clone()).collect())
}

async fn run_cli(
    config: ScholarConfig,
    query: &str,
    language: Language,
    approve_all: bool,
) -> anyhow::Result<()> {
    println!("Running review: {}", query);
    let db = ScholarDb::open_at(&config.database_path)?;
    let (tx, mut rx) = mpsc::channel::<WorkflowEvent>(256);
    let driver = ReviewDriver::new(stage_context(&config)?, &db).with_event_channel(tx);

    let printer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            print_event(&event);
        }
    });

    let mut outcome = driver
        .start(
            query,
            StartOptions {
                language,
                sources: Vec::new(),
            },
        )
        .await?;

    // reflection may send the session back to the gate
    while outcome.stage == Stage::Interrupted {
        let ids = if approve_all {
            outcome.candidates.iter().map(|c| c.id.clone()).collect()
        } else {
            prompt_selection(&outcome.candidates).await?
        };
        outcome = driver
            .approve(&outcome.session_id, &ids, Some(outcome.version))
            .await?;
    }
    drop(driver);
    let _ = printer.await;

    match outcome.status {
        SessionStatus::Completed => println!("\nReview completed (retries: {})", outcome.retry_count),
        _ => eprintln!(
            "\nReview ended as {:?}: {}",
            outcome.status,
            outcome
                .error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_default()
        ),
    }
    if let Some(draft) = &outcome.draft {
        let approved: Vec<CandidateItem> = outcome
            .candidates
            .iter()
            .filter(|c| c.approved)
            .cloned()
            .collect();
        println!("\n{}", export::markdown(draft, &approved));
    }
    println!("Session: {}", outcome.session_id);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let args = Args::parse();
    let mut config = ScholarConfig::load().await;

    match args.command {
        Some(CliCommand::Run {
            query,
            approve_all,
            language,
            max_retries,
            sources,
        }) => {
            let language = Language::parse(&language)
                .ok_or_else(|| anyhow::anyhow!("unsupported language '{}'", language))?;
            config.merge(ConfigPatch {
                max_retries,
                sources: (!sources.is_empty()).then_some(sources),
                ..Default::default()
            });
            run_cli(config, &query, language, approve_all).await
        }
        Some(CliCommand::Serve { port }) => run_server(config, port).await,
        None => run_server(config, 8080).await,
    }
}
