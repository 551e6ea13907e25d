//! Single writer for lifecycle state.
//!
//! Every command is resolved against the transition tables, its side-effects are staged in the
//! same change set, and the whole set is committed under the target's version check. Commands
//! on one entity are serialized by a per-entity async lock; once a command holds the lock it
//! runs to completion without yielding.

mod bookings;
mod claims;
mod command;
mod effects;
mod error;
mod housekeeping;
mod keys;
mod maintenance;
mod rooms;
mod subscriptions;
mod tx;

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, warn};

pub use command::{Action, Command};
pub use error::{CapacityLimit, OrchestratorError};

use super::domain::{EntityId, EntityKind, EntityRef, Money, StoredEntity, Version, Versioned};
use super::events::{DomainEvent, EventBus};
use super::machines::{ClaimEvent, SubscriptionEvent};
use super::scheduler::Clock;
use super::store::{EntityStore, Record, StoreError};
use tx::Tx;

/// Prices the engine charges on its own account.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pricing {
    /// Per started hour of early check-in or late check-out.
    pub hourly_rate: Money,
}

impl Default for Pricing {
    fn default() -> Self {
        Self {
            hourly_rate: Money::from_dollars(25),
        }
    }
}

/// Backoff for commands that lost an optimistic-lock race.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl RetryPolicy {
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(25),
            max_delay: Duration::from_secs(2),
        }
    }
}

/// Outcome of a committed command.
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub target: EntityRef,
    pub updated: Vec<Record>,
    pub events: Vec<DomainEvent>,
}

impl Applied {
    pub fn version_of(&self, entity: &EntityRef) -> Option<Version> {
        self.updated
            .iter()
            .find(|record| &record.entity.entity_ref() == entity)
            .map(|record| record.version)
    }

    pub fn target_version(&self) -> Option<Version> {
        self.version_of(&self.target)
    }
}

#[derive(Default)]
struct EntityLocks {
    slots: Mutex<HashMap<EntityRef, Arc<tokio::sync::Mutex<()>>>>,
}

impl EntityLocks {
    const PRUNE_AT: usize = 1024;

    async fn acquire(&self, entity: &EntityRef) -> Result<OwnedMutexGuard<()>, OrchestratorError> {
        let slot = {
            let mut slots = self.slots.lock().map_err(|_| {
                OrchestratorError::Store(StoreError::Unavailable(
                    "entity lock table poisoned".to_string(),
                ))
            })?;
            if slots.len() >= Self::PRUNE_AT {
                slots.retain(|_, slot| Arc::strong_count(slot) > 1);
            }
            slots.entry(entity.clone()).or_default().clone()
        };
        Ok(slot.lock_owned().await)
    }
}

pub struct Orchestrator<S> {
    store: Arc<S>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    locks: EntityLocks,
    pricing: Pricing,
    retry: RetryPolicy,
}

impl<S> Orchestrator<S>
where
    S: EntityStore + 'static,
{
    pub fn new(store: Arc<S>, bus: Arc<EventBus>, clock: Arc<dyn Clock>) -> Self {
        Self {
            store,
            bus,
            clock,
            locks: EntityLocks::default(),
            pricing: Pricing::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_pricing(mut self, pricing: Pricing) -> Self {
        self.pricing = pricing;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// Reads an entity together with the version a follow-up command must quote.
    pub fn read<T: StoredEntity>(&self, id: &EntityId) -> Result<Versioned<T>, OrchestratorError> {
        let entity = EntityRef::new(T::KIND, id);
        let record = self
            .store
            .load(&entity)?
            .ok_or_else(|| OrchestratorError::NotFound(entity.clone()))?;
        let version = record.version;
        T::from_entity(record.entity)
            .map(|entity| Versioned { version, entity })
            .ok_or(OrchestratorError::NotFound(entity))
    }

    pub async fn apply(&self, mut command: Command) -> Result<Applied, OrchestratorError> {
        let name = command.name();
        let lock_target = self.lock_target(&mut command)?;

        let guard = self.locks.acquire(&lock_target).await?;
        let outcome = self.execute(command);
        drop(guard);

        match &outcome {
            Ok(applied) => {
                info!(
                    command = name,
                    entity = %applied.target,
                    version = applied.target_version().unwrap_or_default(),
                    events = applied.events.len(),
                    "command applied"
                );
                if let Err(err) = self.bus.pump(self.store.as_ref()) {
                    warn!(error = %err, "event fan-out deferred");
                }
            }
            Err(err) => {
                debug!(command = name, error = %err, "command rejected");
            }
        }
        outcome
    }

    /// Re-reads the target before each attempt and retries lost races with backoff.
    pub async fn apply_with_retry<F>(
        &self,
        target: &EntityRef,
        mut build: F,
    ) -> Result<Applied, OrchestratorError>
    where
        F: FnMut(Version) -> Command,
    {
        let mut attempt = 0;
        loop {
            let version = self
                .store
                .load(target)?
                .map(|record| record.version)
                .ok_or_else(|| OrchestratorError::NotFound(target.clone()))?;

            match self.apply(build(version)).await {
                Err(err) if err.is_retryable() && attempt + 1 < self.retry.max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    debug!(
                        entity = %target,
                        attempt,
                        ?delay,
                        "retrying after concurrent modification"
                    );
                    attempt += 1;
                    tokio::time::sleep(delay).await;
                }
                outcome => return outcome,
            }
        }
    }

    /// Validates the addressing fields and picks the entity whose lock serializes the command.
    fn lock_target(&self, command: &mut Command) -> Result<EntityRef, OrchestratorError> {
        let action = &command.action;
        if action.creates() {
            if command.expected_version.is_some() {
                return Err(OrchestratorError::invalid(format!(
                    "{} creates an entity and takes no expected_version",
                    action.name()
                )));
            }
            if let Some(parent) = action.creation_parent() {
                return Ok(parent);
            }
            let id = command
                .entity_id
                .get_or_insert_with(EntityId::generate)
                .clone();
            return Ok(EntityRef::new(EntityKind::Room, &id));
        }

        match (&command.entity_id, command.expected_version) {
            (Some(id), Some(_)) => Ok(EntityRef::new(action.target_kind(), id)),
            _ => Err(OrchestratorError::invalid(format!(
                "{} needs entity_id and expected_version",
                action.name()
            ))),
        }
    }

    fn execute(&self, command: Command) -> Result<Applied, OrchestratorError> {
        let mut tx = Tx::new(self.store.as_ref(), self.clock.now());
        let target = dispatch(&mut tx, &self.pricing, command)?;
        let receipt = self.store.commit(tx.into_change_set())?;
        Ok(Applied {
            target,
            updated: receipt.records,
            events: receipt.events,
        })
    }
}

fn dispatch(
    tx: &mut Tx<'_>,
    pricing: &Pricing,
    command: Command,
) -> Result<EntityRef, OrchestratorError> {
    let Command {
        action,
        entity_id,
        expected_version,
    } = command;

    if action.creates() {
        return match action {
            Action::RegisterRoom {
                room_number,
                name,
                kind,
                capacity,
            } => {
                let id = entity_id.unwrap_or_else(EntityId::generate);
                rooms::register(tx, id, room_number, name, kind, capacity)
            }
            Action::CreateBooking {
                guest_id,
                room_id,
                check_in,
                check_out,
                nightly_rate,
                cleaning_fee,
                bond_amount,
                early_check_in_hours,
            } => bookings::create(
                tx,
                pricing,
                entity_id,
                bookings::NewBooking {
                    guest_id,
                    room_id,
                    check_in,
                    check_out,
                    nightly_rate,
                    cleaning_fee,
                    bond_amount,
                    early_check_in_hours,
                },
            ),
            Action::SubmitMaintenanceTicket {
                room_id,
                reported_by,
                summary,
                description,
                priority,
            } => maintenance::submit_ticket(
                tx,
                entity_id,
                maintenance::NewTicket {
                    room_id,
                    reported_by,
                    summary,
                    description,
                    priority,
                },
            ),
            Action::SubmitBondClaim {
                booking_id,
                kind,
                description,
                amount,
                urgent,
            } => claims::submit(
                tx,
                entity_id,
                claims::NewClaim {
                    booking_id,
                    kind,
                    description,
                    amount,
                    urgent,
                },
            ),
            Action::CreateSubscription {
                guest_id,
                room_id,
                plan,
                starts_on,
            } => subscriptions::create(tx, entity_id, guest_id, &room_id, plan, starts_on),
            other => Err(OrchestratorError::invalid(format!(
                "{} is not a creation",
                other.name()
            ))),
        };
    }

    let (Some(id), Some(expected)) = (entity_id, expected_version) else {
        return Err(OrchestratorError::invalid(format!(
            "{} needs entity_id and expected_version",
            action.name()
        )));
    };

    match action {
        Action::CancelBooking { .. } => bookings::cancel(tx, &id, expected),
        Action::ExtendStay {
            new_check_out,
            unit,
        } => bookings::extend(tx, pricing, &id, expected, new_check_out, unit),
        Action::RecordPayment { charge_ids } => {
            bookings::record_payment(tx, &id, expected, &charge_ids)
        }
        Action::CollectBond => bookings::collect_bond(tx, &id, expected),
        Action::RefundBond => bookings::refund_bond(tx, &id, expected),
        Action::AddCharge {
            kind,
            description,
            amount,
        } => bookings::add_charge(tx, &id, expected, kind, description, amount),
        Action::CheckInReached => bookings::check_in_reached(tx, &id, expected),
        Action::CheckOutReached => bookings::check_out_reached(tx, &id, expected),
        Action::OpenKeyWindow => keys::open_window(tx, &id, expected),
        Action::CloseKeyWindow => keys::close_window(tx, &id, expected),
        Action::RevokeKey { reason } => keys::revoke(tx, &id, expected, &reason),
        Action::SubmitQuote {
            labor_cost,
            materials,
            notes,
        } => maintenance::submit_quote(tx, &id, expected, labor_cost, materials, notes),
        Action::ApproveTicket {
            tasks,
            access_window,
        } => maintenance::approve_ticket(tx, &id, expected, &tasks, access_window),
        Action::StartJob => maintenance::start_job(tx, &id, expected),
        Action::CompleteJobTask { task_id, notes } => {
            maintenance::complete_task(tx, &id, expected, &task_id, notes)
        }
        Action::StartCleaning => housekeeping::start(tx, &id, expected),
        Action::CompleteChecklistItem { item_id } => {
            housekeeping::complete_item(tx, &id, expected, &item_id)
        }
        Action::ConfirmClean => housekeeping::confirm(tx, &id, expected),
        Action::ReviewBondClaim => claims::decide(tx, &id, expected, ClaimEvent::OwnerReview),
        Action::ApproveBondClaim => claims::decide(tx, &id, expected, ClaimEvent::Approve),
        Action::RejectBondClaim => claims::decide(tx, &id, expected, ClaimEvent::Reject),
        Action::SelectSubscriptionDates { dates } => {
            subscriptions::select_dates(tx, &id, expected, &dates)
        }
        Action::RenewSubscription => subscriptions::renew(tx, &id, expected),
        Action::CancelSubscription => {
            subscriptions::end(tx, &id, expected, SubscriptionEvent::Cancel)
        }
        Action::ExpireSubscription => {
            subscriptions::end(tx, &id, expected, SubscriptionEvent::Lapse)
        }
        other => Err(OrchestratorError::invalid(format!(
            "{} cannot target an existing entity",
            other.name()
        ))),
    }
}

#[cfg(test)]
mod tests;
