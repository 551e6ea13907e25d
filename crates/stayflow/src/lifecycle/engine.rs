use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::access::{AccessController, AccessDecision, AccessError, AccessLogEntry};
use super::domain::{EntityId, EntityKind, EntityRef};
use super::events::{EventBus, NotificationRelay, TracingNotifier};
use super::ledger::{Ledger, LedgerError, LedgerTotals};
use super::machines::{MachineRegistry, MachineTable};
use super::orchestrator::{Applied, Command, Orchestrator, OrchestratorError, Pricing, RetryPolicy};
use super::scheduler::{Clock, Scheduler, TickReport};
use super::store::{EntityStore, InMemoryEntityStore, Record, StoreError};

/// Knobs the hosting process can turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    pub pricing: Pricing,
    pub retry: RetryPolicy,
    pub tick_every: Duration,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            pricing: Pricing::default(),
            retry: RetryPolicy::default(),
            tick_every: Duration::from_secs(60),
        }
    }
}

/// The assembled engine: one store, one orchestrator, and the consumers hanging off its log.
pub struct StayEngine<S> {
    store: Arc<S>,
    bus: Arc<EventBus>,
    orchestrator: Arc<Orchestrator<S>>,
    access: AccessController<S>,
    ledger: Arc<Ledger>,
    scheduler: Arc<Scheduler<S>>,
    registry: MachineRegistry,
    settings: EngineSettings,
}

impl StayEngine<InMemoryEntityStore> {
    pub fn in_memory(clock: Arc<dyn Clock>, settings: EngineSettings) -> Result<Self, StoreError> {
        Self::new(Arc::new(InMemoryEntityStore::new()), clock, settings)
    }
}

impl<S> StayEngine<S>
where
    S: EntityStore + 'static,
{
    /// Wires the engine and catches the ledger up with whatever the store already holds.
    pub fn new(
        store: Arc<S>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Result<Self, StoreError> {
        let ledger = Arc::new(Ledger::new());
        let bus = Arc::new(
            EventBus::new()
                .subscribe(ledger.clone())
                .subscribe(Arc::new(NotificationRelay::new(Arc::new(TracingNotifier)))),
        );
        let replayed = bus.pump(store.as_ref())?;

        let orchestrator = Arc::new(
            Orchestrator::new(Arc::clone(&store), Arc::clone(&bus), clock)
                .with_pricing(settings.pricing)
                .with_retry(settings.retry),
        );
        let access = AccessController::new(Arc::clone(&store));
        let scheduler = Arc::new(Scheduler::new(Arc::clone(&orchestrator)));

        info!(
            consumers = ?bus.subscribers(),
            replayed = replayed.delivered,
            "stay engine ready"
        );
        Ok(Self {
            store,
            bus,
            orchestrator,
            access,
            ledger,
            scheduler,
            registry: MachineRegistry::standard(),
            settings,
        })
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn orchestrator(&self) -> &Arc<Orchestrator<S>> {
        &self.orchestrator
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    pub fn settings(&self) -> EngineSettings {
        self.settings
    }

    pub async fn submit(&self, command: Command) -> Result<Applied, OrchestratorError> {
        self.orchestrator.apply(command).await
    }

    /// Decides an unlock at the current clock time. The decision is logged on the room either way.
    pub fn request_unlock(
        &self,
        key_id: &EntityId,
        room_id: &EntityId,
    ) -> Result<AccessDecision, AccessError> {
        let now = self.orchestrator.clock().now();
        let decision = self.access.authorize(key_id, room_id, now)?;
        if let Err(err) = self.bus.pump(self.store.as_ref()) {
            warn!(error = %err, "event fan-out deferred");
        }
        Ok(decision)
    }

    pub fn access_log(&self, room_id: &EntityId) -> Result<Vec<AccessLogEntry>, AccessError> {
        self.access.audit_trail(room_id)
    }

    pub fn entity(&self, kind: EntityKind, id: &EntityId) -> Result<Option<Record>, StoreError> {
        self.store.load(&EntityRef::new(kind, id))
    }

    pub fn totals(&self, booking_id: &EntityId) -> Result<LedgerTotals, LedgerError> {
        self.ledger.totals_for(booking_id)
    }

    pub fn machines(&self) -> &[MachineTable] {
        self.registry.tables()
    }

    /// Runs one scheduler pass at the engine clock's current time.
    pub async fn tick(&self) -> Result<TickReport, OrchestratorError> {
        let now = self.orchestrator.clock().now();
        self.scheduler.tick(now).await
    }

    /// Starts the scheduler loop on the runtime. Flip `shutdown` to stop it.
    pub fn spawn_scheduler(&self, shutdown: watch::Receiver<bool>) -> JoinHandle<()> {
        let scheduler = Arc::clone(&self.scheduler);
        let every = self.settings.tick_every;
        tokio::spawn(async move { scheduler.run(every, shutdown).await })
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};

    use super::*;
    use crate::lifecycle::domain::{Money, RoomKind};
    use crate::lifecycle::orchestrator::Action;
    use crate::lifecycle::scheduler::FixedClock;

    #[tokio::test]
    async fn ledger_follows_commands_and_survives_a_restart() {
        let clock = Arc::new(FixedClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 9, 0, 0)
                .single()
                .expect("valid timestamp"),
        ));
        let store = Arc::new(InMemoryEntityStore::new());
        let engine = StayEngine::new(Arc::clone(&store), clock.clone(), EngineSettings::default())
            .expect("engine starts");

        let room_id = EntityId::new("room-1");
        engine
            .submit(Command::create_with_id(
                room_id.clone(),
                Action::RegisterRoom {
                    room_number: "1".to_string(),
                    name: "Garden Room".to_string(),
                    kind: RoomKind::Room,
                    capacity: 2,
                },
            ))
            .await
            .expect("room registers");
        let booking_id = EntityId::new("booking-1");
        engine
            .submit(Command::create_with_id(
                booking_id.clone(),
                Action::CreateBooking {
                    guest_id: EntityId::new("guest-1"),
                    room_id,
                    check_in: Utc
                        .with_ymd_and_hms(2025, 3, 5, 15, 0, 0)
                        .single()
                        .expect("valid timestamp"),
                    check_out: Utc
                        .with_ymd_and_hms(2025, 3, 7, 10, 0, 0)
                        .single()
                        .expect("valid timestamp"),
                    nightly_rate: Money::from_dollars(90),
                    cleaning_fee: Money::ZERO,
                    bond_amount: Money::ZERO,
                    early_check_in_hours: 0,
                },
            ))
            .await
            .expect("booking created");

        let totals = engine.totals(&booking_id).expect("ledger knows the booking");
        assert_eq!(totals.subtotal, Money::from_dollars(180));
        assert_eq!(totals.outstanding_balance, Money::from_dollars(180));

        let restarted =
            StayEngine::new(store, clock, EngineSettings::default()).expect("engine restarts");
        assert_eq!(
            restarted.totals(&booking_id).expect("ledger caught up"),
            totals
        );
    }

    #[test]
    fn exposes_every_transition_table() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let engine =
            StayEngine::in_memory(clock, EngineSettings::default()).expect("engine starts");
        assert_eq!(engine.machines().len(), 9);
    }
}
