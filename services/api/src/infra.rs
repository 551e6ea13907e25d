use metrics_exporter_prometheus::PrometheusHandle;
use stayflow::error::AppError;
use stayflow::lifecycle::{parse_reservations, seed, EntityStore, ImportSummary, StayEngine};
use std::fs::File;
use std::path::Path;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;
use tracing::info;

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
    pub(crate) tick_secs: u64,
}

/// Loads a reservation export into a running engine.
pub(crate) async fn seed_from_path<S>(
    engine: &StayEngine<S>,
    path: &Path,
) -> Result<ImportSummary, AppError>
where
    S: EntityStore + 'static,
{
    let file = File::open(path)?;
    let plan = parse_reservations(file)?;
    let summary = seed(engine.orchestrator(), plan).await?;
    info!(
        path = %path.display(),
        bookings = summary.bookings_created,
        rejected = summary.rejected.len(),
        "reservations seeded"
    );
    Ok(summary)
}
