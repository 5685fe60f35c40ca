use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use axum::extract::{Path, Query, State as AxumState};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use promolane_engine::{
    CreditReason, EngineError, Ledger, LedgerError, MemoryStore, NullLedger, RewardEngine,
    SystemClock,
};
use promolane_types::{
    InstanceView, QueueView, RewardError, RewardEvent, RewardTemplate, StakeEvent, SweepReport,
};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio::time;
use tracing::{error, info, warn};

#[derive(Clone, Debug)]
struct RewardsApiConfig {
    host: String,
    port: u16,
    catalog_path: Option<String>,
    ledger_url: Option<String>,
    sweep_interval_secs: u64,
}

impl RewardsApiConfig {
    fn from_env() -> Self {
        Self {
            host: std::env::var("REWARDS_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
            port: std::env::var("REWARDS_PORT")
                .ok()
                .and_then(|p| p.parse().ok())
                .unwrap_or(9140),
            catalog_path: std::env::var("REWARDS_CATALOG_PATH").ok(),
            ledger_url: std::env::var("REWARDS_LEDGER_URL").ok(),
            sweep_interval_secs: std::env::var("REWARDS_SWEEP_INTERVAL_SECS")
                .ok()
                .and_then(|raw| raw.parse().ok())
                .unwrap_or(60),
        }
    }
}

/// Wallet ledger client: HTTP when an endpoint is configured, otherwise the
/// engine's logging null backend.
enum LedgerBackend {
    Http(HttpLedger),
    Null(NullLedger),
}

impl Ledger for LedgerBackend {
    async fn credit(
        &self,
        player: &str,
        amount: u64,
        reason: CreditReason,
        idempotency_key: &str,
    ) -> Result<(), LedgerError> {
        match self {
            LedgerBackend::Http(ledger) => {
                ledger.credit(player, amount, reason, idempotency_key).await
            }
            LedgerBackend::Null(ledger) => {
                ledger.credit(player, amount, reason, idempotency_key).await
            }
        }
    }
}

#[derive(Clone)]
struct HttpLedger {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreditRequest<'a> {
    player_id: &'a str,
    amount: u64,
    reason: &'a str,
    idempotency_key: &'a str,
}

impl Ledger for HttpLedger {
    async fn credit(
        &self,
        player: &str,
        amount: u64,
        reason: CreditReason,
        idempotency_key: &str,
    ) -> Result<(), LedgerError> {
        let url = format!("{}/credits", self.base_url.trim_end_matches('/'));
        let response = self
            .client
            .post(&url)
            .json(&CreditRequest {
                player_id: player,
                amount,
                reason: reason.as_str(),
                idempotency_key,
            })
            .send()
            .await
            .map_err(|err| LedgerError::Unavailable(err.to_string()))?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else if status.is_client_error() {
            Err(LedgerError::Rejected(format!("ledger returned {status}")))
        } else {
            Err(LedgerError::Unavailable(format!("ledger returned {status}")))
        }
    }
}

type Engine = RewardEngine<MemoryStore, LedgerBackend>;

#[derive(Clone)]
struct AppState {
    engine: Arc<Engine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MintRequest {
    player_id: String,
    template_id: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayerRequest {
    player_id: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StakeRequest {
    player_id: String,
    amount: u64,
    game_id: String,
    #[serde(default)]
    win_amount: u64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueParams {
    #[serde(default)]
    include_terminal: bool,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    code: &'static str,
    message: String,
}

fn error_response(err: EngineError) -> Response {
    match err.as_reward() {
        Some(reward) => {
            let status = match reward {
                RewardError::TemplateNotFound(_) | RewardError::InstanceNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                RewardError::PlayerIneligible { .. } | RewardError::NotOwner(_) => {
                    StatusCode::FORBIDDEN
                }
                RewardError::NotQueued { .. }
                | RewardError::AlreadyTerminal { .. }
                | RewardError::NotClaimable { .. }
                | RewardError::InvalidTransition { .. } => StatusCode::CONFLICT,
            };
            let body = ErrorBody {
                code: reward.code(),
                message: reward.to_string(),
            };
            (status, Json(body)).into_response()
        }
        None => {
            error!(%err, "engine operation failed");
            let body = ErrorBody {
                code: "INTERNAL",
                message: "internal error".to_string(),
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
        }
    }
}

async fn mint_handler(
    AxumState(state): AxumState<AppState>,
    Json(request): Json<MintRequest>,
) -> Response {
    match state
        .engine
        .mint(&request.player_id, request.template_id)
        .await
    {
        Ok(instance) => (StatusCode::CREATED, Json(InstanceView::from(&instance))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn promote_handler(
    AxumState(state): AxumState<AppState>,
    Path(instance_id): Path<u64>,
    Json(request): Json<PlayerRequest>,
) -> Response {
    match state.engine.promote(&request.player_id, instance_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn forfeit_handler(
    AxumState(state): AxumState<AppState>,
    Path(instance_id): Path<u64>,
    Json(request): Json<PlayerRequest>,
) -> Response {
    match state.engine.forfeit(&request.player_id, instance_id).await {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(err) => error_response(err),
    }
}

async fn claim_handler(
    AxumState(state): AxumState<AppState>,
    Path(instance_id): Path<u64>,
    Json(request): Json<PlayerRequest>,
) -> Response {
    match state.engine.claim(&request.player_id, instance_id).await {
        Ok(instance) => (StatusCode::OK, Json(InstanceView::from(&instance))).into_response(),
        Err(err) => error_response(err),
    }
}

async fn stake_handler(
    AxumState(state): AxumState<AppState>,
    Json(request): Json<StakeRequest>,
) -> StatusCode {
    let stake = StakeEvent {
        amount: request.amount,
        game_id: request.game_id,
        win_amount: request.win_amount,
    };
    // Stake application never fails visibly: gameplay must not be
    // interrupted by the promotion engine.
    if let Err(err) = state.engine.apply_stake(&request.player_id, stake).await {
        error!(player = %request.player_id, %err, "stake application failed");
    }
    StatusCode::ACCEPTED
}

async fn queue_handler(
    AxumState(state): AxumState<AppState>,
    Path(player_id): Path<String>,
    Query(params): Query<QueueParams>,
) -> Response {
    match state
        .engine
        .list_queue(&player_id, params.include_terminal)
        .await
    {
        Ok(queue) => Json::<QueueView>(queue).into_response(),
        Err(err) => error_response(err),
    }
}

async fn sweep_handler(AxumState(state): AxumState<AppState>) -> Response {
    match state.engine.run_expiration_sweep().await {
        Ok(report) => Json::<SweepReport>(report).into_response(),
        Err(err) => error_response(err),
    }
}

async fn healthz() -> &'static str {
    "ok"
}

/// Ceiling for the settlement retry delay while the ledger keeps failing.
const MAX_SETTLEMENT_BACKOFF: Duration = Duration::from_secs(15 * 60);

/// Delay before the next settlement retry pass: double while credits remain
/// pending (capped), back to the base interval once the backlog clears.
fn next_retry_delay(base: Duration, current: Duration, pending: u64) -> Duration {
    if pending == 0 {
        base
    } else {
        current.saturating_mul(2).min(MAX_SETTLEMENT_BACKOFF)
    }
}

/// Next event from the engine feed, riding out lag. Returns `None` once the
/// engine side is gone.
async fn next_feed_event(feed: &mut broadcast::Receiver<RewardEvent>) -> Option<RewardEvent> {
    loop {
        match feed.recv().await {
            Ok(event) => return Some(event),
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!(skipped, "event feed lagging, events skipped");
            }
            Err(broadcast::error::RecvError::Closed) => return None,
        }
    }
}

fn load_catalog_file(path: &str) -> anyhow::Result<Vec<RewardTemplate>> {
    let raw = std::fs::read_to_string(path).with_context(|| format!("read catalog {path}"))?;
    let templates: Vec<RewardTemplate> =
        serde_json::from_str(&raw).with_context(|| format!("parse catalog {path}"))?;
    Ok(templates)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let config = RewardsApiConfig::from_env();

    let ledger = match &config.ledger_url {
        Some(url) => {
            info!(ledger = %url, "using HTTP wallet ledger");
            LedgerBackend::Http(HttpLedger {
                client: reqwest::Client::new(),
                base_url: url.clone(),
            })
        }
        None => {
            warn!("no ledger endpoint configured, credits are log-only");
            LedgerBackend::Null(NullLedger)
        }
    };

    let engine = RewardEngine::new(MemoryStore::new(), ledger, Arc::new(SystemClock))
        .await
        .context("engine init")?;

    match &config.catalog_path {
        Some(path) => {
            let templates = load_catalog_file(path)?;
            info!(count = templates.len(), path = %path, "loading reward catalog");
            engine.load_catalog(templates).await.context("load catalog")?;
        }
        None => warn!("no catalog configured, mint will reject every template"),
    }

    let engine = Arc::new(engine);
    let state = AppState {
        engine: engine.clone(),
    };

    // Structured log of every engine event.
    let mut feed = engine.subscribe();
    tokio::spawn(async move {
        while let Some(event) = next_feed_event(&mut feed).await {
            if let Ok(payload) = serde_json::to_string(&event) {
                info!(player = event.player(), instance = event.instance(), %payload, "reward event");
            }
        }
    });

    // Built-in scheduler: expiration sweep at a fixed interval, settlement
    // retries with backoff while the ledger is down. External schedulers can
    // hit POST /internal/sweep instead.
    if config.sweep_interval_secs > 0 {
        let sweep_engine = engine.clone();
        let interval_secs = config.sweep_interval_secs;
        tokio::spawn(async move {
            let mut interval = time::interval(Duration::from_secs(interval_secs));
            loop {
                interval.tick().await;
                match sweep_engine.run_expiration_sweep().await {
                    Ok(report) if report.instances_expired > 0 => {
                        info!(
                            players = report.players_scanned,
                            expired = report.instances_expired,
                            "expiration sweep"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => error!(%err, "expiration sweep failed"),
                }
            }
        });

        let retry_engine = engine.clone();
        let base = Duration::from_secs(interval_secs);
        tokio::spawn(async move {
            let mut delay = base;
            loop {
                time::sleep(delay).await;
                match retry_engine.retry_settlements().await {
                    Ok(outcome) => {
                        if outcome.settled > 0 {
                            info!(settled = outcome.settled, "retried pending settlements");
                        }
                        delay = next_retry_delay(base, delay, outcome.pending);
                        if outcome.pending > 0 {
                            warn!(
                                pending = outcome.pending,
                                delay_secs = delay.as_secs(),
                                "ledger credits still pending, backing off"
                            );
                        }
                    }
                    Err(err) => {
                        error!(%err, "settlement retry failed");
                        delay = next_retry_delay(base, delay, 1);
                    }
                }
            }
        });
    }

    let app = Router::new()
        .route("/api/rewards/mint", post(mint_handler))
        .route("/api/rewards/:id/promote", post(promote_handler))
        .route("/api/rewards/:id/forfeit", post(forfeit_handler))
        .route("/api/rewards/:id/claim", post(claim_handler))
        .route("/api/stakes", post(stake_handler))
        .route("/api/players/:player_id/queue", get(queue_handler))
        .route("/internal/sweep", post(sweep_handler))
        .route("/healthz", get(healthz))
        .with_state(state);

    let addr: SocketAddr = format!("{}:{}", config.host, config.port)
        .parse()
        .context("invalid listen addr")?;
    info!(%addr, "rewards api listening");

    axum::serve(tokio::net::TcpListener::bind(addr).await?, app).await?;
    Ok(())
}
