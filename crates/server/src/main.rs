//! TradeDesk — automated strategy trading against Alpaca
//!
//! Usage:
//!   tradedesk serve --port 3001                  — Launch the REST server
//!   tradedesk backtest --strategy momentum_breakout --symbols SPY \
//!       --start 2023-01-01 --end 2024-01-01      — Headless backtest

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{NaiveDate, TimeZone, Utc};
use clap::{Parser, Subcommand};
use engine::{
    run_backtest, run_quote_stream, AlpacaBroker, AlpacaCredentials, BacktestReport,
    BacktestRequest, Broker, EngineError, QuoteStreamConfig, StrategyScheduler,
};
use persistence::repository::{BacktestRecord, BacktestRepository, StrategyRecord, StrategyRepository};
use persistence::Database;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing::{error, info, warn};

const APP_VERSION: &str = concat!(env!("CARGO_PKG_VERSION"), "-", env!("GIT_HASH"));

#[derive(Parser)]
#[command(name = "tradedesk")]
#[command(about = "Automated strategy trading and backtesting", long_about = None)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Launch the REST server
    Serve {
        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
        /// Port to listen on
        #[arg(short, long, default_value_t = 3001)]
        port: u16,
    },
    /// Run a backtest from the CLI (no web server)
    Backtest {
        /// Strategy type (momentum_breakout, mean_reversion_rsi, ...)
        #[arg(long)]
        strategy: String,
        /// Symbols to trade (comma-separated)
        #[arg(long, value_delimiter = ',')]
        symbols: Vec<String>,
        /// Strategy parameter overrides as a JSON object
        #[arg(long, default_value = "{}")]
        params: String,
        /// Start date (YYYY-MM-DD)
        #[arg(long)]
        start: String,
        /// End date (YYYY-MM-DD)
        #[arg(long)]
        end: String,
        /// Initial capital
        #[arg(long, default_value_t = 100_000.0)]
        capital: f64,
        /// Slippage percentage applied to fills
        #[arg(long, default_value_t = 0.05)]
        slippage: f64,
    },
}

#[derive(Clone)]
struct AppState {
    broker: Arc<dyn Broker>,
    scheduler: Arc<StrategyScheduler>,
    db: Arc<Database>,
}

fn init_logging(verbose: bool) {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let filter = if verbose {
        EnvFilter::new("debug,engine=debug,tradedesk=debug")
    } else {
        EnvFilter::new("info,engine=info,tradedesk=info")
    };

    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).compact())
        .with(filter)
        .init();
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
        Commands::Backtest {
            strategy,
            symbols,
            params,
            start,
            end,
            capital,
            slippage,
        } => {
            cmd_backtest(strategy, symbols, params, start, end, capital, slippage).await?;
        }
    }

    Ok(())
}

fn credentials_from_env() -> anyhow::Result<AlpacaCredentials> {
    let credentials = AlpacaCredentials::from_env().map_err(|_| {
        anyhow::anyhow!(
            "APCA_API_KEY_ID / APCA_API_SECRET_KEY must be set (APCA_PAPER=false for live)"
        )
    })?;
    if credentials.paper {
        info!("Using Alpaca paper trading host");
    } else {
        warn!("Using Alpaca LIVE trading host");
    }
    Ok(credentials)
}

/// Feed the position monitor pushed quotes for the symbols named in
/// TRADEDESK_STREAM_SYMBOLS (comma-separated); without it the monitor
/// falls back to polling.
fn attach_quote_feed(credentials: &AlpacaCredentials, scheduler: &Arc<StrategyScheduler>) {
    let Ok(raw) = std::env::var("TRADEDESK_STREAM_SYMBOLS") else {
        return;
    };
    let symbols: Vec<String> = raw
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if symbols.is_empty() {
        return;
    }

    let (tx, rx) = tokio::sync::mpsc::channel(256);
    let config = QuoteStreamConfig::new(
        credentials.api_key.clone(),
        credentials.secret_key.clone(),
        symbols.clone(),
    );
    let cancelled = Arc::new(std::sync::atomic::AtomicBool::new(false));
    tokio::spawn(run_quote_stream(config, tx, cancelled));

    let monitor = Arc::clone(scheduler.monitor());
    tokio::spawn(async move { monitor.run_quote_feed(rx).await });
    info!(symbols = ?symbols, "Live quote feed attached to position monitor");
}

// ============================================================================
// Serve command — Axum web server
// ============================================================================

async fn cmd_serve(host: &str, port: u16) -> anyhow::Result<()> {
    info!("TradeDesk v{} starting...", APP_VERSION);

    let db_path =
        std::env::var("TRADEDESK_DB_PATH").unwrap_or_else(|_| "data/tradedesk.db".to_string());
    let db = Database::new(&db_path).await.map_err(|e| {
        error!("Failed to initialize database: {}", e);
        anyhow::anyhow!("Database initialization failed: {}", e)
    })?;
    info!("Database initialized: {}", db_path);

    let credentials = credentials_from_env()?;
    let broker: Arc<dyn Broker> = Arc::new(AlpacaBroker::new(credentials.clone()));
    let scheduler = StrategyScheduler::new(Arc::clone(&broker));

    let state = AppState {
        broker,
        scheduler: Arc::clone(&scheduler),
        db: Arc::new(db),
    };

    restore_saved_strategies(&state).await;
    attach_quote_feed(&credentials, &scheduler);
    scheduler.start();

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let exe_path = std::env::current_exe().unwrap_or_default();
    let exe_dir = exe_path.parent().unwrap_or(std::path::Path::new("."));
    let dist_dir = exe_dir.join("dist");
    let static_dir = if dist_dir.exists() {
        dist_dir
    } else {
        std::path::PathBuf::from("dist")
    };

    let api_routes = Router::new()
        .route("/health", get(api_health))
        .route("/strategies", get(api_list_strategies).post(api_create_strategy))
        .route(
            "/strategies/:id",
            get(api_get_strategy)
                .put(api_update_strategy)
                .delete(api_delete_strategy),
        )
        .route("/strategies/:id/toggle", post(api_toggle_strategy))
        .route("/scheduler/status", get(api_scheduler_status))
        .route("/scheduler/start", post(api_scheduler_start))
        .route("/scheduler/stop", post(api_scheduler_stop))
        .route("/backtest/run", post(api_run_backtest))
        .route("/backtest/history", get(api_backtest_history))
        .with_state(state);

    let app = Router::new()
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new(&static_dir))
        .layer(cors);

    let addr: std::net::SocketAddr = format!("{}:{}", host, port).parse()?;
    println!("\n=== TradeDesk v{} ===", APP_VERSION);
    println!("Listening on http://{}", addr);
    println!("\nEndpoints:");
    println!("  GET    /api/health                 - Health check");
    println!("  GET    /api/strategies             - List strategies");
    println!("  POST   /api/strategies             - Create a strategy");
    println!("  GET    /api/strategies/:id         - Get a strategy");
    println!("  PUT    /api/strategies/:id         - Update a strategy");
    println!("  DELETE /api/strategies/:id         - Delete a strategy");
    println!("  POST   /api/strategies/:id/toggle  - Enable/disable a strategy");
    println!("  GET    /api/scheduler/status       - Scheduler status");
    println!("  POST   /api/scheduler/start        - Start the scheduler");
    println!("  POST   /api/scheduler/stop         - Stop the scheduler");
    println!("  POST   /api/backtest/run           - Run a backtest");
    println!("  GET    /api/backtest/history       - Stored backtest history");
    println!("\n  Database: {}", db_path);
    println!("\nPress Ctrl+C to stop\n");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

/// Re-register saved strategies with the scheduler on startup
async fn restore_saved_strategies(state: &AppState) {
    let repo = StrategyRepository::new(state.db.pool());
    let records = match repo.list().await {
        Ok(records) => records,
        Err(e) => {
            warn!(error = %e, "Could not load saved strategies");
            return;
        }
    };

    for record in records {
        let (symbols, parameters) = match (record.symbols_vec(), record.parameters_map()) {
            (Ok(symbols), Ok(parameters)) => (symbols, parameters),
            _ => {
                warn!(strategy = %record.id, "Stored strategy is corrupt, skipping");
                continue;
            }
        };
        if let Err(e) = state.scheduler.add_strategy(
            &record.id,
            &record.strategy_type,
            symbols,
            &parameters,
            record.interval_seconds.max(1) as u64,
        ) {
            warn!(strategy = %record.id, error = %e, "Stored strategy rejected, skipping");
            continue;
        }
        if record.enabled {
            if let Err(e) = state.scheduler.enable_strategy(&record.id) {
                warn!(strategy = %record.id, error = %e, "Could not enable stored strategy");
            }
        }
    }

    let status = state.scheduler.status();
    info!(
        total = status.total_strategies,
        enabled = status.active_strategies,
        "Saved strategies restored"
    );
}

// ============================================================================
// API Handlers
// ============================================================================

type ApiError = (StatusCode, Json<serde_json::Value>);

fn engine_error(e: EngineError) -> ApiError {
    let status = match &e {
        EngineError::Validation(_)
        | EngineError::InvalidAllocation { .. }
        | EngineError::SizingUnavailable(_) => StatusCode::BAD_REQUEST,
        EngineError::NotAuthenticated => StatusCode::UNAUTHORIZED,
        EngineError::DataUnavailable { .. } | EngineError::ExecutionFailure(_) => {
            StatusCode::BAD_GATEWAY
        }
    };
    (
        status,
        Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    )
}

fn db_error(e: persistence::DbError) -> ApiError {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(serde_json::json!({ "success": false, "error": e.to_string() })),
    )
}

fn not_found(what: &str) -> ApiError {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({ "success": false, "error": format!("{what} not found") })),
    )
}

/// GET /api/health
async fn api_health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": APP_VERSION,
        "scheduler_running": state.scheduler.is_running(),
    }))
}

#[derive(Debug, Deserialize)]
struct CreateStrategyRequest {
    name: String,
    strategy_type: String,
    symbols: Vec<String>,
    #[serde(default)]
    parameters: HashMap<String, serde_json::Value>,
    #[serde(default = "default_interval")]
    interval_seconds: u64,
    #[serde(default)]
    enabled: bool,
}

fn default_interval() -> u64 {
    60
}

/// POST /api/strategies
async fn api_create_strategy(
    State(state): State<AppState>,
    Json(request): Json<CreateStrategyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let id = format!("{:016x}", rand::random::<u64>());

    state
        .scheduler
        .add_strategy(
            &id,
            &request.strategy_type,
            request.symbols.clone(),
            &request.parameters,
            request.interval_seconds,
        )
        .map_err(engine_error)?;

    let record = StrategyRecord {
        id: id.clone(),
        name: request.name,
        strategy_type: request.strategy_type,
        symbols: serde_json::to_string(&request.symbols).unwrap_or_default(),
        parameters: serde_json::to_string(&request.parameters).unwrap_or_default(),
        interval_seconds: request.interval_seconds as i64,
        enabled: request.enabled,
        created_at: None,
        updated_at: None,
    };
    let repo = StrategyRepository::new(state.db.pool());
    if let Err(e) = repo.insert(&record).await {
        // Roll the scheduler back so memory and storage agree
        let _ = state.scheduler.remove_strategy(&id);
        return Err(db_error(e));
    }

    if request.enabled {
        state.scheduler.enable_strategy(&id).map_err(engine_error)?;
    }

    let strategy = state.scheduler.get_strategy(&id);
    Ok(Json(serde_json::json!({ "success": true, "strategy": strategy })))
}

/// GET /api/strategies
async fn api_list_strategies(State(state): State<AppState>) -> Json<serde_json::Value> {
    let status = state.scheduler.status();
    Json(serde_json::json!({ "strategies": status.strategies }))
}

/// GET /api/strategies/:id
async fn api_get_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let strategy = state
        .scheduler
        .get_strategy(&id)
        .ok_or_else(|| not_found("strategy"))?;
    Ok(Json(serde_json::json!({ "strategy": strategy })))
}

#[derive(Debug, Deserialize)]
struct UpdateStrategyRequest {
    name: String,
    strategy_type: String,
    symbols: Vec<String>,
    #[serde(default)]
    parameters: HashMap<String, serde_json::Value>,
    #[serde(default = "default_interval")]
    interval_seconds: u64,
    #[serde(default)]
    enabled: bool,
}

/// PUT /api/strategies/:id — replace configuration (re-created in the scheduler)
async fn api_update_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(request): Json<UpdateStrategyRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    state
        .scheduler
        .get_strategy(&id)
        .ok_or_else(|| not_found("strategy"))?;

    state.scheduler.remove_strategy(&id).map_err(engine_error)?;
    state
        .scheduler
        .add_strategy(
            &id,
            &request.strategy_type,
            request.symbols.clone(),
            &request.parameters,
            request.interval_seconds,
        )
        .map_err(engine_error)?;
    if request.enabled {
        state.scheduler.enable_strategy(&id).map_err(engine_error)?;
    }

    let record = StrategyRecord {
        id: id.clone(),
        name: request.name,
        strategy_type: request.strategy_type,
        symbols: serde_json::to_string(&request.symbols).unwrap_or_default(),
        parameters: serde_json::to_string(&request.parameters).unwrap_or_default(),
        interval_seconds: request.interval_seconds as i64,
        enabled: request.enabled,
        created_at: None,
        updated_at: None,
    };
    let repo = StrategyRepository::new(state.db.pool());
    repo.update(&record).await.map_err(db_error)?;

    let strategy = state.scheduler.get_strategy(&id);
    Ok(Json(serde_json::json!({ "success": true, "strategy": strategy })))
}

/// DELETE /api/strategies/:id
async fn api_delete_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let in_scheduler = state.scheduler.remove_strategy(&id).is_ok();
    let repo = StrategyRepository::new(state.db.pool());
    let in_db = repo.delete(&id).await.map_err(db_error)?;

    if !in_scheduler && !in_db {
        return Err(not_found("strategy"));
    }
    Ok(Json(serde_json::json!({ "success": true, "message": format!("Strategy {id} deleted") })))
}

/// POST /api/strategies/:id/toggle
async fn api_toggle_strategy(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let strategy = state
        .scheduler
        .get_strategy(&id)
        .ok_or_else(|| not_found("strategy"))?;

    let enabled = !strategy.enabled;
    if enabled {
        state.scheduler.enable_strategy(&id).map_err(engine_error)?;
    } else {
        state.scheduler.disable_strategy(&id).map_err(engine_error)?;
    }

    let repo = StrategyRepository::new(state.db.pool());
    repo.set_enabled(&id, enabled).await.map_err(db_error)?;

    Ok(Json(serde_json::json!({
        "success": true,
        "enabled": enabled,
        "strategy": state.scheduler.get_strategy(&id),
    })))
}

/// GET /api/scheduler/status
async fn api_scheduler_status(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "scheduler": state.scheduler.status() }))
}

/// POST /api/scheduler/start
async fn api_scheduler_start(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scheduler.start();
    Json(serde_json::json!({ "success": true, "is_running": true }))
}

/// POST /api/scheduler/stop
async fn api_scheduler_stop(State(state): State<AppState>) -> Json<serde_json::Value> {
    state.scheduler.stop();
    Json(serde_json::json!({ "success": true, "is_running": false }))
}

/// POST /api/backtest/run — serve from history on a fingerprint hit
async fn api_run_backtest(
    State(state): State<AppState>,
    Json(request): Json<BacktestRequest>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let fingerprint = request.fingerprint();
    let repo = BacktestRepository::new(state.db.pool());

    if let Some(stored) = repo
        .get_by_fingerprint(&fingerprint)
        .await
        .map_err(db_error)?
    {
        info!(%fingerprint, "Backtest served from history");
        let equity_curve: serde_json::Value =
            serde_json::from_str(&stored.equity_curve).unwrap_or(serde_json::json!([]));
        return Ok(Json(serde_json::json!({
            "success": true,
            "cached": true,
            "fingerprint": fingerprint,
            "metrics": stored,
            "equity_curve": equity_curve,
        })));
    }

    info!(
        strategy = %request.strategy_type,
        symbols = ?request.symbols,
        "Running backtest"
    );
    let report = run_backtest(state.broker.as_ref(), &request)
        .await
        .map_err(engine_error)?;

    if let Err(e) = repo.save(&to_record(&fingerprint, &request, &report)).await {
        warn!(error = %e, "Could not store backtest result");
    }

    Ok(Json(serde_json::json!({
        "success": true,
        "cached": false,
        "fingerprint": fingerprint,
        "metrics": report.metrics,
        "equity_curve": report.equity_curve,
        "trades": report.trades,
    })))
}

fn to_record(fingerprint: &str, request: &BacktestRequest, report: &BacktestReport) -> BacktestRecord {
    let m = &report.metrics;
    BacktestRecord {
        id: None,
        fingerprint: fingerprint.to_string(),
        strategy_type: request.strategy_type.clone(),
        symbols: serde_json::to_string(&request.symbols).unwrap_or_default(),
        parameters: serde_json::to_string(&request.parameters).unwrap_or_default(),
        start_date: request.start_date.to_rfc3339(),
        end_date: request.end_date.to_rfc3339(),
        initial_capital: request.initial_capital,
        total_return: m.total_return,
        buy_and_hold_return: m.buy_and_hold_return,
        max_drawdown: m.max_drawdown,
        sharpe_ratio: m.sharpe_ratio,
        win_rate: m.win_rate,
        total_trades: m.total_trades as i64,
        winning_trades: m.winning_trades as i64,
        losing_trades: m.losing_trades as i64,
        avg_win: m.avg_win,
        avg_loss: m.avg_loss,
        avg_trade_duration_days: m.avg_trade_duration_days,
        max_consecutive_wins: m.max_consecutive_wins as i64,
        max_consecutive_losses: m.max_consecutive_losses as i64,
        equity_curve: serde_json::to_string(&report.equity_curve).unwrap_or_default(),
        slippage_pct: Some(request.slippage_pct),
        created_at: None,
    }
}

/// GET /api/backtest/history
async fn api_backtest_history(
    State(state): State<AppState>,
    Query(params): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let limit: i64 = params
        .get("limit")
        .and_then(|s| s.parse().ok())
        .unwrap_or(20);

    let repo = BacktestRepository::new(state.db.pool());
    let records = repo.list_recent(limit).await.map_err(db_error)?;
    Ok(Json(serde_json::json!({
        "success": true,
        "data": records,
        "total": records.len(),
    })))
}

// ============================================================================
// Backtest command — CLI mode (no web server)
// ============================================================================

async fn cmd_backtest(
    strategy: String,
    symbols: Vec<String>,
    params: String,
    start: String,
    end: String,
    capital: f64,
    slippage: f64,
) -> anyhow::Result<()> {
    println!("\n=== TradeDesk v{} ===", APP_VERSION);

    let parameters: HashMap<String, serde_json::Value> = serde_json::from_str(&params)
        .map_err(|e| anyhow::anyhow!("--params must be a JSON object: {e}"))?;
    let start_date = parse_date(&start)?;
    let end_date = parse_date(&end)?;

    let broker: Arc<dyn Broker> = Arc::new(AlpacaBroker::new(credentials_from_env()?));
    let request = BacktestRequest {
        strategy_type: strategy,
        symbols,
        parameters,
        start_date,
        end_date,
        initial_capital: capital,
        slippage_pct: slippage,
    };

    println!(
        "Backtesting {} on {} from {} to {}...\n",
        request.strategy_type,
        request.symbols.join(", "),
        start,
        end
    );

    let report = run_backtest(broker.as_ref(), &request).await?;
    let m = &report.metrics;

    println!("Results:");
    println!("  Total return:        {:>10.2} %", m.total_return);
    println!("  Buy & hold return:   {:>10.2} %", m.buy_and_hold_return);
    println!("  Max drawdown:        {:>10.2} %", m.max_drawdown);
    println!("  Sharpe ratio:        {:>10.2}", m.sharpe_ratio);
    println!("  Win rate:            {:>10.2} %", m.win_rate);
    println!(
        "  Trades:              {:>10}   ({} wins / {} losses)",
        m.total_trades, m.winning_trades, m.losing_trades
    );
    println!("  Avg win / loss:      {:>10.2} / {:.2}", m.avg_win, m.avg_loss);
    println!("  Avg duration:        {:>10.2} days", m.avg_trade_duration_days);
    println!(
        "  Longest streaks:     {:>10} wins / {} losses",
        m.max_consecutive_wins, m.max_consecutive_losses
    );
    println!(
        "\nEquity: {:.2} -> {:.2} over {} trading days",
        capital,
        report
            .equity_curve
            .last()
            .map(|p| p.equity)
            .unwrap_or(capital),
        report.equity_curve.len()
    );

    Ok(())
}

fn parse_date(value: &str) -> anyhow::Result<chrono::DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .map_err(|e| anyhow::anyhow!("invalid date '{value}' (expected YYYY-MM-DD): {e}"))?;
    Ok(Utc.from_utc_datetime(&date.and_time(chrono::NaiveTime::MIN)))
}
