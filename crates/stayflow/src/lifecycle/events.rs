use std::collections::BTreeSet;
use std::fmt;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::access::AccessDecision;
use super::domain::{
    Charge, CleaningPriority, Entity, EntityId, EntityKind, EntityRef, KeyHolder, Money, Quote,
    RoomCondition, StayExtension,
};
use super::machines::MachineKind;
use super::store::{EntityStore, StoreError};

/// Position of an event in the store's log. Ids start at 1 and never repeat.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct EventId(pub u64);

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "evt-{:08}", self.0)
    }
}

/// An immutable entry of the event log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    pub id: EventId,
    pub entity: EntityRef,
    pub occurred_at: DateTime<Utc>,
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    Created {
        snapshot: Entity,
    },
    StatusChanged {
        machine: MachineKind,
        from: String,
        to: String,
    },
    StayExtended {
        check_out: DateTime<Utc>,
        extension: StayExtension,
    },
    ChargeAdded {
        charge: Charge,
    },
    ChargesSettled {
        charge_ids: Vec<EntityId>,
    },
    RoomConditionChanged {
        from: RoomCondition,
        to: RoomCondition,
    },
    KeyWindowShifted {
        activates_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    },
    ChecklistItemCompleted {
        item_id: String,
    },
    JobTaskCompleted {
        task_id: String,
        notes: Option<String>,
    },
    QuoteSubmitted {
        quote: Quote,
    },
    HousekeepingEscalated {
        from: CleaningPriority,
        to: CleaningPriority,
    },
    SubscriptionDatesSelected {
        dates: BTreeSet<NaiveDate>,
    },
    SubscriptionRenewed {
        next_billing_date: NaiveDate,
    },
    AccessDecided {
        key_id: EntityId,
        room_id: EntityId,
        holder: Option<KeyHolder>,
        decision: AccessDecision,
    },
    RoomAvailable {
        room_id: EntityId,
    },
    KeyActivated {
        key_id: EntityId,
        room_id: EntityId,
    },
    KeyRevoked {
        key_id: EntityId,
        room_id: EntityId,
        reason: String,
    },
    BondDeducted {
        claim_id: EntityId,
        amount: Money,
    },
    TicketEscalated {
        room_id: EntityId,
        ticket_id: EntityId,
        reason: String,
    },
}

impl EventKind {
    pub const fn name(&self) -> &'static str {
        match self {
            EventKind::Created { .. } => "created",
            EventKind::StatusChanged { .. } => "status_changed",
            EventKind::StayExtended { .. } => "stay_extended",
            EventKind::ChargeAdded { .. } => "charge_added",
            EventKind::ChargesSettled { .. } => "charges_settled",
            EventKind::RoomConditionChanged { .. } => "room_condition_changed",
            EventKind::KeyWindowShifted { .. } => "key_window_shifted",
            EventKind::ChecklistItemCompleted { .. } => "checklist_item_completed",
            EventKind::JobTaskCompleted { .. } => "job_task_completed",
            EventKind::QuoteSubmitted { .. } => "quote_submitted",
            EventKind::HousekeepingEscalated { .. } => "housekeeping_escalated",
            EventKind::SubscriptionDatesSelected { .. } => "subscription_dates_selected",
            EventKind::SubscriptionRenewed { .. } => "subscription_renewed",
            EventKind::AccessDecided { .. } => "access_decided",
            EventKind::RoomAvailable { .. } => "room_available",
            EventKind::KeyActivated { .. } => "key_activated",
            EventKind::KeyRevoked { .. } => "key_revoked",
            EventKind::BondDeducted { .. } => "bond_deducted",
            EventKind::TicketEscalated { .. } => "ticket_escalated",
        }
    }

    /// Events that leave the core for notification, wallet and UI collaborators.
    pub const fn is_outbound(&self) -> bool {
        matches!(
            self,
            EventKind::RoomAvailable { .. }
                | EventKind::KeyActivated { .. }
                | EventKind::KeyRevoked { .. }
                | EventKind::ChargeAdded { .. }
                | EventKind::BondDeducted { .. }
                | EventKind::TicketEscalated { .. }
        )
    }
}

/// Something that reacts to committed events. Delivery is at-least-once, so implementations
/// must tolerate seeing the same [`EventId`] twice.
pub trait EventConsumer: Send + Sync {
    fn name(&self) -> &str;

    /// Entity kinds this consumer wants; empty means everything.
    fn topics(&self) -> &[EntityKind] {
        &[]
    }

    fn consume(&self, event: &DomainEvent) -> Result<(), ConsumerError>;
}

#[derive(Debug, thiserror::Error)]
pub enum ConsumerError {
    #[error("consumer rejected {event}: {reason}")]
    Rejected { event: EventId, reason: String },
    #[error("consumer unavailable: {0}")]
    Unavailable(String),
}

struct Subscription {
    consumer: Arc<dyn EventConsumer>,
    cursor: Mutex<Option<EventId>>,
}

impl Subscription {
    fn wants(&self, event: &DomainEvent) -> bool {
        let topics = self.consumer.topics();
        topics.is_empty() || topics.contains(&event.entity.kind)
    }
}

/// Summary of one pass over the event log.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct PumpReport {
    pub delivered: usize,
    pub failed: Vec<String>,
}

/// Fans committed events out to subscribers, one cursor per subscriber.
pub struct EventBus {
    subscriptions: Vec<Subscription>,
    batch_size: usize,
}

impl EventBus {
    const DEFAULT_BATCH: usize = 256;

    pub fn new() -> Self {
        Self {
            subscriptions: Vec::new(),
            batch_size: Self::DEFAULT_BATCH,
        }
    }

    pub fn subscribe(mut self, consumer: Arc<dyn EventConsumer>) -> Self {
        self.subscriptions.push(Subscription {
            consumer,
            cursor: Mutex::new(None),
        });
        self
    }

    pub fn subscribers(&self) -> Vec<&str> {
        self.subscriptions
            .iter()
            .map(|subscription| subscription.consumer.name())
            .collect()
    }

    /// Delivers everything past each subscriber's cursor. A failing subscriber keeps its
    /// cursor on the failed event and is retried on the next pump.
    pub fn pump(&self, store: &dyn EntityStore) -> Result<PumpReport, StoreError> {
        let mut report = PumpReport::default();

        for subscription in &self.subscriptions {
            let mut cursor = subscription
                .cursor
                .lock()
                .map_err(|_| StoreError::Unavailable("event cursor poisoned".to_string()))?;

            'drain: loop {
                let batch = store.events_after(*cursor, self.batch_size)?;
                if batch.is_empty() {
                    break;
                }
                for event in &batch {
                    if subscription.wants(event) {
                        if let Err(err) = subscription.consumer.consume(event) {
                            warn!(
                                consumer = subscription.consumer.name(),
                                event = %event.id,
                                error = %err,
                                "event delivery failed"
                            );
                            report.failed.push(subscription.consumer.name().to_string());
                            break 'drain;
                        }
                        report.delivered += 1;
                    }
                    *cursor = Some(event.id);
                }
            }
        }

        if report.delivered > 0 {
            debug!(delivered = report.delivered, "event bus pumped");
        }
        Ok(report)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Outbound port to push, e-mail or wallet collaborators.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &DomainEvent) -> Result<(), ConsumerError>;
}

/// Notifier that only logs.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn notify(&self, event: &DomainEvent) -> Result<(), ConsumerError> {
        tracing::info!(
            event = event.kind.name(),
            entity = %event.entity,
            id = %event.id,
            "outbound notification"
        );
        Ok(())
    }
}

/// Forwards outbound events to a [`Notifier`].
pub struct NotificationRelay<N> {
    notifier: Arc<N>,
}

impl<N: Notifier> NotificationRelay<N> {
    pub fn new(notifier: Arc<N>) -> Self {
        Self { notifier }
    }
}

impl<N: Notifier + 'static> EventConsumer for NotificationRelay<N> {
    fn name(&self) -> &str {
        "notification-relay"
    }

    fn consume(&self, event: &DomainEvent) -> Result<(), ConsumerError> {
        if event.kind.is_outbound() {
            self.notifier.notify(event)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, Ordering};

    use chrono::TimeZone;

    use super::*;
    use crate::lifecycle::store::{ChangeSet, InMemoryEntityStore, PendingEvent};

    #[derive(Default)]
    struct Recorder {
        seen: Mutex<Vec<EventId>>,
        fail_once: AtomicBool,
    }

    impl EventConsumer for Recorder {
        fn name(&self) -> &str {
            "recorder"
        }

        fn topics(&self) -> &[EntityKind] {
            &[EntityKind::Room]
        }

        fn consume(&self, event: &DomainEvent) -> Result<(), ConsumerError> {
            if self.fail_once.swap(false, Ordering::SeqCst) {
                return Err(ConsumerError::Unavailable("flaky".to_string()));
            }
            self.seen.lock().expect("lock").push(event.id);
            Ok(())
        }
    }

    fn room_event(store: &InMemoryEntityStore, kind: EntityKind, id: &str) {
        let at = Utc
            .with_ymd_and_hms(2025, 1, 1, 9, 0, 0)
            .single()
            .expect("valid");
        store
            .commit(ChangeSet {
                at,
                writes: Vec::new(),
                events: vec![PendingEvent {
                    entity: EntityRef::new(kind, &EntityId::new(id)),
                    kind: EventKind::RoomAvailable {
                        room_id: EntityId::new(id),
                    },
                }],
            })
            .expect("commit");
    }

    #[test]
    fn pump_filters_by_topic_and_retries_failed_delivery() {
        let store = InMemoryEntityStore::default();
        let recorder = Arc::new(Recorder::default());
        recorder.fail_once.store(true, Ordering::SeqCst);
        let bus = EventBus::new().subscribe(recorder.clone());

        room_event(&store, EntityKind::Room, "room-1");
        room_event(&store, EntityKind::Booking, "booking-1");
        room_event(&store, EntityKind::Room, "room-2");

        let first = bus.pump(&store).expect("pump");
        assert_eq!(first.delivered, 0);
        assert_eq!(first.failed, vec!["recorder".to_string()]);

        let second = bus.pump(&store).expect("pump");
        assert_eq!(second.delivered, 2);
        assert_eq!(
            *recorder.seen.lock().expect("lock"),
            vec![EventId(1), EventId(3)]
        );

        let third = bus.pump(&store).expect("pump");
        assert_eq!(third.delivered, 0);
    }

    #[derive(Default)]
    struct CollectingNotifier {
        names: Mutex<Vec<&'static str>>,
    }

    impl Notifier for CollectingNotifier {
        fn notify(&self, event: &DomainEvent) -> Result<(), ConsumerError> {
            self.names.lock().expect("lock").push(event.kind.name());
            Ok(())
        }
    }

    #[test]
    fn relay_forwards_only_outbound_events() {
        let notifier = Arc::new(CollectingNotifier::default());
        let relay = NotificationRelay::new(notifier.clone());
        let at = Utc
            .with_ymd_and_hms(2025, 1, 1, 9, 0, 0)
            .single()
            .expect("valid");
        let room = EntityRef::new(EntityKind::Room, &EntityId::new("room-1"));

        for (id, kind) in [
            (
                1,
                EventKind::ChecklistItemCompleted {
                    item_id: "bed".to_string(),
                },
            ),
            (
                2,
                EventKind::RoomAvailable {
                    room_id: EntityId::new("room-1"),
                },
            ),
        ] {
            relay
                .consume(&DomainEvent {
                    id: EventId(id),
                    entity: room.clone(),
                    occurred_at: at,
                    kind,
                })
                .expect("relay");
        }

        assert_eq!(*notifier.names.lock().expect("lock"), vec!["room_available"]);
    }
}
