use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::domain::{
    Booking, BookingStatus, DigitalKey, EntityKind, EntityRef, JobStatus, KeyHolder, KeyStatus,
    MaintenanceJob, StoredEntity, Subscription, SubscriptionStatus,
};
use super::orchestrator::{Action, Command, Orchestrator, OrchestratorError};
use super::store::EntityStore;

/// Source of the current instant.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Manually driven clock for tests, demos, and replays.
#[derive(Debug)]
pub struct FixedClock {
    now: Mutex<DateTime<Utc>>,
}

impl FixedClock {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(now),
        }
    }

    pub fn set(&self, now: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner()) = now;
    }

    pub fn advance(&self, by: Duration) -> DateTime<Utc> {
        let mut now = self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        *now += by;
        *now
    }
}

impl Clock for FixedClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Counts for one scheduler pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub submitted: usize,
    pub applied: usize,
    /// Commands the entity had already moved past by the time they ran.
    pub rejected: usize,
    pub failed: usize,
}

impl TickReport {
    fn record(&mut self, outcome: &Result<(), OrchestratorError>) {
        self.submitted += 1;
        match outcome {
            Ok(()) => self.applied += 1,
            Err(OrchestratorError::InvalidTransition(_) | OrchestratorError::InvalidCommand(_)) => {
                self.rejected += 1
            }
            Err(_) => self.failed += 1,
        }
    }
}

/// Turns elapsed time boundaries into commands. It never writes state itself.
pub struct Scheduler<S> {
    orchestrator: Arc<Orchestrator<S>>,
}

impl<S> Scheduler<S>
where
    S: EntityStore + 'static,
{
    pub fn new(orchestrator: Arc<Orchestrator<S>>) -> Self {
        Self { orchestrator }
    }

    fn store(&self) -> &S {
        self.orchestrator.store().as_ref()
    }

    fn scan<T: StoredEntity>(&self) -> Result<Vec<T>, OrchestratorError> {
        Ok(self
            .store()
            .scan(T::KIND)?
            .into_iter()
            .filter_map(|record| T::from_entity(record.entity))
            .collect())
    }

    /// One pass in a fixed order: check-outs, check-ins, key openings, key closings, renewals.
    ///
    /// Departures go first so a stay ending at the instant the next one begins hands over the
    /// room before the new guest arrives. A second departure sweep catches stays whose whole
    /// window elapsed since the previous tick.
    pub async fn tick(&self, now: DateTime<Utc>) -> Result<TickReport, OrchestratorError> {
        let mut report = TickReport::default();

        self.depart(now, &mut report).await?;

        let arrivals: Vec<Booking> = self
            .scan::<Booking>()?
            .into_iter()
            .filter(|booking| booking.status == BookingStatus::Upcoming && booking.check_in <= now)
            .collect();
        let caught_up = arrivals.iter().any(|booking| booking.check_out <= now);
        for booking in arrivals {
            let outcome = self.submit(booking.entity_ref(), Action::CheckInReached).await;
            report.record(&outcome);
        }
        if caught_up {
            self.depart(now, &mut report).await?;
        }

        let mut openings = Vec::new();
        for key in self.scan::<DigitalKey>()? {
            if key.status == KeyStatus::NotAvailable
                && key.window_contains(now)
                && self.holder_is_active(&key)?
            {
                openings.push(key);
            }
        }
        for key in openings {
            let outcome = self.submit(key.entity_ref(), Action::OpenKeyWindow).await;
            report.record(&outcome);
        }

        let closings: Vec<DigitalKey> = self
            .scan::<DigitalKey>()?
            .into_iter()
            .filter(|key| key.status == KeyStatus::Active && key.expires_at <= now)
            .collect();
        for key in closings {
            let outcome = self.submit(key.entity_ref(), Action::CloseKeyWindow).await;
            report.record(&outcome);
        }

        let today = now.date_naive();
        let renewals: Vec<Subscription> = self
            .scan::<Subscription>()?
            .into_iter()
            .filter(|subscription| {
                subscription.status == SubscriptionStatus::Active
                    && subscription.next_billing_date <= today
            })
            .collect();
        for subscription in renewals {
            let outcome = self
                .submit(subscription.entity_ref(), Action::RenewSubscription)
                .await;
            report.record(&outcome);
        }

        if report.failed > 0 {
            warn!(?report, "scheduler tick had failures");
        } else if report.submitted > 0 {
            debug!(?report, "scheduler tick");
        }
        Ok(report)
    }

    async fn depart(
        &self,
        now: DateTime<Utc>,
        report: &mut TickReport,
    ) -> Result<(), OrchestratorError> {
        let departures: Vec<Booking> = self
            .scan::<Booking>()?
            .into_iter()
            .filter(|booking| booking.status == BookingStatus::Current && booking.check_out <= now)
            .collect();
        for booking in departures {
            let outcome = self.submit(booking.entity_ref(), Action::CheckOutReached).await;
            report.record(&outcome);
        }
        Ok(())
    }

    async fn submit(&self, target: EntityRef, action: Action) -> Result<(), OrchestratorError> {
        let id = target.id.clone();
        self.orchestrator
            .apply_with_retry(&target, move |version| {
                Command::targeting(&id, version, action.clone())
            })
            .await
            .map(|_| ())
    }

    fn holder_is_active(&self, key: &DigitalKey) -> Result<bool, OrchestratorError> {
        match &key.holder {
            KeyHolder::Guest { booking_id } => {
                let entity = EntityRef::new(EntityKind::Booking, booking_id);
                Ok(self
                    .store()
                    .load(&entity)?
                    .and_then(|record| Booking::from_entity(record.entity))
                    .is_some_and(|booking| booking.is_live()))
            }
            KeyHolder::Maintenance { job_id } => {
                let entity = EntityRef::new(EntityKind::MaintenanceJob, job_id);
                Ok(self
                    .store()
                    .load(&entity)?
                    .and_then(|record| MaintenanceJob::from_entity(record.entity))
                    .is_some_and(|job| job.status == JobStatus::InProgress))
            }
        }
    }

    /// Drives [`Scheduler::tick`] until `shutdown` flips to true or its sender is dropped.
    pub async fn run(&self, every: StdDuration, mut shutdown: watch::Receiver<bool>) {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(every_secs = every.as_secs(), "scheduler started");

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let now = self.orchestrator.clock().now();
                    match self.tick(now).await {
                        Ok(report) if report.applied > 0 => {
                            info!(applied = report.applied, rejected = report.rejected, "scheduler advanced lifecycle");
                        }
                        Ok(_) => {}
                        Err(err) => warn!(error = %err, "scheduler tick failed"),
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        info!("scheduler stopped");
    }
}
