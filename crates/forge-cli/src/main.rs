use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forge_core::impls::{InMemoryCheckpointStore, TracingSink};
use forge_core::ports::{DataSource, FetchError, IdGenerator, SystemClock, UlidGenerator};
use forge_core::{
    AgentConfig, AgentFilter, Handler, HandlerError, Job, OrchestratorBuilder, OrchestratorConfig,
    Outcome, TaskContext, TaskSpec,
};
use parking_lot::Mutex;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const SYMBOLS: [&str; 3] = ["ACME", "GLOBEX", "INITECH"];
const RUN_FOR: Duration = Duration::from_secs(4);

/// Prices that drift a little on every fetch. One fetch in ten fails.
struct RandomWalk {
    prices: Mutex<HashMap<String, f64>>,
}

impl RandomWalk {
    fn new() -> Self {
        let prices = SYMBOLS.iter().map(|s| (s.to_string(), 100.0)).collect();
        Self {
            prices: Mutex::new(prices),
        }
    }
}

#[async_trait]
impl DataSource for RandomWalk {
    async fn fetch(
        &self,
        source: &str,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, FetchError> {
        if source != "prices" {
            return Err(FetchError::UnknownSource(source.to_string()));
        }
        let symbol = params["symbol"]
            .as_str()
            .ok_or_else(|| FetchError::InvalidParams {
                source_name: source.to_string(),
                reason: "missing symbol".to_string(),
            })?;

        let (step, flaky) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(-2.0..2.0), rng.gen_bool(0.1))
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        if flaky {
            return Err(FetchError::Unavailable {
                source_name: source.to_string(),
                reason: "simulated outage".to_string(),
            });
        }

        let mut prices = self.prices.lock();
        let price = prices
            .get_mut(symbol)
            .ok_or_else(|| FetchError::InvalidParams {
                source_name: source.to_string(),
                reason: format!("unknown symbol {symbol}"),
            })?;
        *price = (*price + step).max(0.01);
        Ok(serde_json::json!({ "symbol": symbol, "price": *price }))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct PriceCheck {
    symbol: String,
    alert_above: f64,
}

impl Job for PriceCheck {
    const TYPE: &'static str = "market.price_check.v1";
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Report {
    round: u32,
}

impl Job for Report {
    const TYPE: &'static str = "market.report.v1";
}

/// Last price seen per symbol, shared by the two handlers.
type Board = Arc<Mutex<HashMap<String, f64>>>;

struct PriceCheckHandler {
    board: Board,
}

#[async_trait]
impl Handler<PriceCheck> for PriceCheckHandler {
    async fn handle(&self, job: PriceCheck, ctx: TaskContext) -> Result<Outcome, HandlerError> {
        let quote = ctx
            .fetch("prices", &serde_json::json!({ "symbol": job.symbol }))
            .await?;
        let price = quote["price"]
            .as_f64()
            .ok_or_else(|| HandlerError::permanent("quote without price"))?;
        if price > job.alert_above {
            warn!(symbol = %job.symbol, price, threshold = job.alert_above, "price alert");
        }
        self.board.lock().insert(job.symbol, price);
        Ok(Outcome::with_output(quote))
    }
}

struct ReportHandler {
    board: Board,
}

#[async_trait]
impl Handler<Report> for ReportHandler {
    async fn handle(&self, job: Report, _ctx: TaskContext) -> Result<Outcome, HandlerError> {
        let board = self.board.lock().clone();
        let mut symbols: Vec<_> = board.into_iter().collect();
        symbols.sort_by(|a, b| a.0.cmp(&b.0));
        for (symbol, price) in &symbols {
            info!(round = job.round, symbol = %symbol, price = format!("{price:.2}"), "report");
        }
        Ok(Outcome::with_output(serde_json::json!({
            "round": job.round,
            "symbols": symbols.len(),
        })))
    }
}

fn load_config() -> Result<OrchestratorConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            let text = std::fs::read_to_string(&path)?;
            info!(path = %path, "loading config");
            Ok(OrchestratorConfig::from_toml_str(&text)?)
        }
        None => Ok(OrchestratorConfig {
            health_check_interval_seconds: 0.5,
            checkpoint_interval_seconds: Some(1.0),
            ..OrchestratorConfig::default()
        }),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    let board: Board = Arc::new(Mutex::new(HashMap::new()));
    let store = Arc::new(InMemoryCheckpointStore::new());

    let orchestrator = OrchestratorBuilder::new()
        .config(config)
        .register::<PriceCheck, _>(PriceCheckHandler {
            board: board.clone(),
        })?
        .register::<Report, _>(ReportHandler { board })?
        .expect_tasks(&[PriceCheck::TYPE, Report::TYPE])
        .data_source(Arc::new(RandomWalk::new()))
        .checkpoint_store(store.clone())
        .notification_sink(Arc::new(TracingSink::new()))
        .build()
        .await?;

    orchestrator
        .register_agent(AgentConfig::new("watcher-1", 2))
        .await?;
    orchestrator
        .register_agent(AgentConfig::new("watcher-2", 1).with_queue_limit(8))
        .await?;

    let submitter = {
        let orchestrator = orchestrator.clone();
        let id_gen = UlidGenerator::new(Arc::new(SystemClock));
        tokio::spawn(async move {
            let mut round = 0u32;
            loop {
                round += 1;
                let mut batch = Vec::new();
                let mut checks = Vec::new();
                for symbol in SYMBOLS {
                    let job = PriceCheck {
                        symbol: symbol.to_string(),
                        alert_above: 103.0,
                    };
                    let spec = TaskSpec::for_job(format!("check {symbol} #{round}"), &job)?
                        .with_timeout(Duration::from_secs(1));
                    checks.push(spec);
                }
                // Fix ids up front so the report can depend on the checks.
                let ids: Vec<_> = checks.iter().map(|_| id_gen.task_id()).collect();
                let mut report = TaskSpec::for_job(format!("report #{round}"), &Report { round })?
                    .with_priority(-1);
                for (spec, id) in checks.into_iter().zip(&ids) {
                    batch.push(spec.with_id(*id));
                    report = report.depends_on(*id);
                }
                batch.push(report);

                if let Err(e) = orchestrator.submit_batch(batch).await {
                    warn!(error = %e, "submission stopped");
                    return Ok::<_, serde_json::Error>(());
                }
                tokio::time::sleep(Duration::from_millis(700)).await;
            }
        })
    };

    tokio::select! {
        _ = tokio::time::sleep(RUN_FOR) => {}
        _ = tokio::signal::ctrl_c() => info!("interrupted"),
    }
    submitter.abort();

    for agent in orchestrator.list_agents(AgentFilter::all()).await?.iter() {
        info!(
            agent = %agent.id,
            name = %agent.name,
            state = ?agent.state,
            active = agent.active_count,
            queued = agent.queue_depth,
            "agent"
        );
    }

    let counts = orchestrator.counts().await?;
    let checkpoint = orchestrator.shutdown().await?;
    println!(
        "completed={} failed={} cancelled={} live={} checkpointed_tasks={} saves={}",
        counts.completed,
        counts.failed,
        counts.cancelled,
        counts.live(),
        checkpoint.tasks.len(),
        store.save_count(),
    );
    Ok(())
}
