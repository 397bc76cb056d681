use std::sync::Arc;

use anyhow::{Context, Result};
use serde_json::json;
use tracing::info;

use vpp_dispatch::config::Config;
use vpp_dispatch::optimizer::{summarize, BatchRunner, DispatchEngine};
use vpp_dispatch::telemetry;

#[tokio::main]
async fn main() -> Result<()> {
    telemetry::init_tracing();

    let config = Config::load()?;
    let requests = config.run.requests()?;
    info!(
        runs = requests.len(),
        steps = config.horizon.steps,
        backend = ?config.solver.backend,
        "vpp dispatch starting"
    );

    let engine = DispatchEngine::new(config.resources.clone(), config.solver.clone())
        .context("selecting solver backend")?;
    let runner = BatchRunner::new(Arc::new(engine), config.horizon.clone(), config.series.clone());
    let entries = runner.run(requests).await;

    let rows = summarize(&entries);
    for row in &rows {
        info!(
            mode = %row.mode,
            objective = %row.objective,
            status = ?row.status,
            net_cost = ?row.net_cost,
            gap = ?row.gap,
            error = ?row.error,
            "run summary"
        );
    }

    let outcomes: Vec<_> = entries
        .iter()
        .filter_map(|entry| entry.result.as_ref().ok())
        .collect();
    let report = json!({ "comparison": rows, "outcomes": outcomes });
    println!("{}", serde_json::to_string_pretty(&report)?);

    Ok(())
}
