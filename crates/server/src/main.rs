//! Chaos Lab — automated strategy-discovery server
//!
//! Usage:
//!   chaos-lab serve --port 3002        — Launch the HTTP API server
//!   chaos-lab cycle                    — Execute exactly one cycle from CLI
//!   chaos-lab status                   — Print registry statistics

use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::{get, post},
    Router,
};
use clap::{Parser, Subcommand};
use engine::{
    advance_cycle, BinanceMarketData, OrchestratorConfig, Pattern,
};
use persistence::repository::{
    CycleRepository, MatchupRepository, PatternRepository, TrialRepository,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "chaos-lab")]
#[command(about = "Automated strategy discovery from randomized trade trials", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the HTTP API server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3002)]
        port: u16,
    },
    /// Execute exactly one cycle (what the periodic trigger calls)
    Cycle,
    /// Print aggregate statistics and the pattern leaderboard
    Status {
        /// Leaderboard size
        #[arg(long, default_value_t = 10)]
        top: i64,
    },
}

#[derive(Clone)]
struct AppState {
    db: Arc<persistence::Database>,
    market: Arc<BinanceMarketData>,
    config: Arc<OrchestratorConfig>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,chaos_lab=debug")
    } else {
        EnvFilter::new("info,engine=info,chaos_lab=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
}

fn db_path() -> String {
    std::env::var("CHAOS_DB_PATH").unwrap_or_else(|_| "data/chaos.db".to_string())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    dotenvy::dotenv().ok();

    match cli.command {
        Commands::Serve { host, port } => {
            cmd_serve(&host, port).await?;
        }
        Commands::Cycle => {
            cmd_cycle().await?;
        }
        Commands::Status { top } => {
            cmd_status(top).await?;
        }
    }

    Ok(())
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("Chaos Lab v{} starting...", APP_VERSION);

    let db_path = db_path();
    let db = persistence::Database::new(&db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", db_path);

    let state = AppState {
        db: Arc::new(db),
        market: Arc::new(BinanceMarketData::new()),
        config: Arc::new(OrchestratorConfig::from_env()),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/cycle", post(api_run_cycle))
        .route("/status", get(api_status))
        .route("/leaderboard", get(api_leaderboard))
        .route("/patterns", get(api_patterns))
        .route("/patterns/:id/vote", post(api_vote))
        .route("/matchups", get(api_matchups))
        .with_state(state);

    let app = Router::new().nest("/api", api_routes).layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== Chaos Lab v{} ===", APP_VERSION);
    println!("Strategy Discovery Server");
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET  /api/health              - Health check");
    println!("  POST /api/cycle               - Execute exactly one cycle");
    println!("  GET  /api/status              - Aggregate statistics");
    println!("  GET  /api/leaderboard         - Top patterns by h2h win ratio");
    println!("  GET  /api/patterns            - Pattern registry (paginated)");
    println!("  POST /api/patterns/:id/vote   - Upvote/downvote a pattern");
    println!("  GET  /api/matchups            - Recent matchup log");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============================================================================
// Cycle command — single invocation from CLI
// ============================================================================

async fn cmd_cycle() -> anyhow::Result<()> {
    let db_path = db_path();
    let db = persistence::Database::new(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;

    let market = BinanceMarketData::new();
    let config = OrchestratorConfig::from_env();

    println!("=== Chaos Lab v{} ===", APP_VERSION);
    println!("Database: {} | Symbol: {}", db_path, config.symbol);

    match advance_cycle(db.pool(), &market, &market, &config).await {
        Ok(report) => {
            println!(
                "Cycle {} complete: {} trials, {} promoted, {} refreshed, {} tournaments ({} skipped)",
                report.cycle,
                report.trials_generated,
                report.patterns_promoted,
                report.patterns_refreshed,
                report.tournaments_run,
                report.pairings_skipped,
            );
            Ok(())
        }
        Err(e) => {
            eprintln!(
                "Cycle failed [{}]: {} (retry recommended: {})",
                e.kind(),
                e,
                e.retry_recommended()
            );
            Err(anyhow::anyhow!("cycle failed: {}", e))
        }
    }
}

// ============================================================================
// Status command — CLI statistics
// ============================================================================

async fn cmd_status(top: i64) -> anyhow::Result<()> {
    let db_path = db_path();
    let db = persistence::Database::new(&db_path)
        .await
        .map_err(|e| anyhow::anyhow!("Database initialization failed: {}", e))?;

    let trials = TrialRepository::new(db.pool());
    let patterns = PatternRepository::new(db.pool());
    let matchups = MatchupRepository::new(db.pool());
    let cycle = CycleRepository::new(db.pool());

    let stats = patterns.get_stats().await?;
    let state = cycle.load().await?;

    println!("=== Chaos Lab v{} ===", APP_VERSION);
    println!("Cycle: {} (mined through {}, tournaments through {})",
        state.cycle, state.last_mined_cycle, state.last_tournament_cycle);
    println!(
        "Trials: {} | Patterns: {} ({} winning) | Matchups: {}",
        trials.count_all().await?,
        stats.total_patterns,
        stats.winning_patterns,
        matchups.count_all().await?,
    );

    let board = patterns.leaderboard(top).await?;
    if board.is_empty() {
        println!("\nNo patterns have entered a tournament yet.");
        return Ok(());
    }

    println!("\nTop {} Patterns:", board.len());
    println!(
        "  {:>3}  {:<44} {:>7} {:>6} {:>8} {:>7}",
        "#", "Pattern", "W-L", "Runs", "WinRate", "AvgROI"
    );
    println!("  {}", "-".repeat(82));
    for (i, record) in board.iter().enumerate() {
        let pattern = Pattern::from_record(record);
        println!(
            "  {:>3}  {:<44} {:>3}-{:<3} {:>6} {:>7.1}% {:>+7.2}",
            i + 1,
            pattern.name,
            pattern.h2h_wins,
            pattern.h2h_losses,
            pattern.runs,
            pattern.win_ratio() * 100.0,
            pattern.avg_roi(),
        );
    }

    Ok(())
}

// ============================================================================
// API Handlers
// ============================================================================

/// GET /api/health
async fn api_health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "chaos-lab",
        "version": APP_VERSION,
    }))
}

/// POST /api/cycle — the manual trigger: execute exactly one cycle
async fn api_run_cycle(State(state): State<AppState>) -> Json<serde_json::Value> {
    info!("Cycle triggered via API");

    match advance_cycle(
        state.db.pool(),
        state.market.as_ref(),
        state.market.as_ref(),
        state.config.as_ref(),
    )
    .await
    {
        Ok(report) => Json(serde_json::json!({
            "success": true,
            "report": report,
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": e.to_string(),
            "kind": e.kind(),
            "retry_recommended": e.retry_recommended(),
        })),
    }
}

/// GET /api/status — aggregate counts, read-only
async fn api_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    let pool = state.db.pool();
    let trials = TrialRepository::new(pool);
    let patterns = PatternRepository::new(pool);
    let matchups = MatchupRepository::new(pool);
    let cycle = CycleRepository::new(pool);

    let result: Result<serde_json::Value, persistence::DbError> = async {
        let stats = patterns.get_stats().await?;
        let cycle_state = cycle.load().await?;
        Ok(serde_json::json!({
            "success": true,
            "total_trials": trials.count_all().await?,
            "total_patterns": stats.total_patterns,
            "winning_patterns": stats.winning_patterns,
            "total_votes": stats.total_votes,
            "total_runs": stats.total_runs,
            "total_matchups": matchups.count_all().await?,
            "cycle": cycle_state.cycle,
            "last_mined_cycle": cycle_state.last_mined_cycle,
            "last_tournament_cycle": cycle_state.last_tournament_cycle,
        }))
    }
    .await;

    match result {
        Ok(body) => Json(body),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query status: {}", e),
        })),
    }
}

/// GET /api/leaderboard — top patterns by head-to-head win ratio
async fn api_leaderboard(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit: i64 = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);

    let repo = PatternRepository::new(state.db.pool());
    match repo.leaderboard(limit).await {
        Ok(records) => {
            let rows: Vec<serde_json::Value> = records
                .iter()
                .map(|record| {
                    let pattern = Pattern::from_record(record);
                    serde_json::json!({
                        "id": pattern.id,
                        "name": pattern.name,
                        "win_ratio": pattern.win_ratio(),
                        "avg_roi": pattern.avg_roi(),
                        "h2h_wins": pattern.h2h_wins,
                        "h2h_losses": pattern.h2h_losses,
                        "runs": pattern.runs,
                        "win_rate": pattern.win_rate,
                        "sample_size": pattern.sample_size,
                        "upvotes": pattern.upvotes,
                        "downvotes": pattern.downvotes,
                        "timeframes": pattern.timeframes,
                    })
                })
                .collect();
            Json(serde_json::json!({
                "success": true,
                "data": rows,
                "total": rows.len(),
            }))
        }
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query leaderboard: {}", e),
            "data": [],
        })),
    }
}

/// GET /api/patterns — paginated registry listing with filters
async fn api_patterns(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit: i64 = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);
    let offset: i64 = params
        .get("offset")
        .and_then(|s| s.parse().ok())
        .unwrap_or(0);
    let origin = params.get("origin").map(|s| s.as_str());
    let min_win_rate: Option<f64> = params.get("min_win_rate").and_then(|s| s.parse().ok());
    let sort_by = params.get("sort_by").map(|s| s.as_str());

    let repo = PatternRepository::new(state.db.pool());
    match repo
        .get_all_paginated(limit, offset, origin, min_win_rate, sort_by)
        .await
    {
        Ok((records, total)) => Json(serde_json::json!({
            "success": true,
            "data": records,
            "total": total,
            "limit": limit,
            "offset": offset,
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query patterns: {}", e),
            "data": [],
            "total": 0,
        })),
    }
}

#[derive(Debug, Deserialize)]
struct VoteRequest {
    direction: String,
}

/// POST /api/patterns/:id/vote — atomic vote increment
async fn api_vote(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(request): Json<VoteRequest>,
) -> Json<serde_json::Value> {
    let upvote = match request.direction.as_str() {
        "up" => true,
        "down" => false,
        other => {
            return Json(serde_json::json!({
                "success": false,
                "error": format!("Unknown vote direction '{}', expected 'up' or 'down'", other),
            }));
        }
    };

    let repo = PatternRepository::new(state.db.pool());
    match repo.vote(id, upvote).await {
        Ok(true) => Json(serde_json::json!({
            "success": true,
            "pattern_id": id,
            "direction": request.direction,
        })),
        Ok(false) => Json(serde_json::json!({
            "success": false,
            "error": format!("Pattern {} not found", id),
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to record vote: {}", e),
        })),
    }
}

/// GET /api/matchups — recent head-to-head results
async fn api_matchups(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Json<serde_json::Value> {
    let limit: i64 = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(50);

    let repo = MatchupRepository::new(state.db.pool());
    match repo.recent(limit).await {
        Ok(records) => Json(serde_json::json!({
            "success": true,
            "data": records,
            "total": records.len(),
        })),
        Err(e) => Json(serde_json::json!({
            "success": false,
            "error": format!("Failed to query matchups: {}", e),
            "data": [],
        })),
    }
}
