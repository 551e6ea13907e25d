use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::lifecycle::domain::{
    AccessWindow, ChargeKind, DamageKind, EntityId, EntityKind, EntityRef, ExtensionUnit, Money,
    MaterialItem, RoomKind, SubscriptionPlan, TicketPriority, Version,
};

/// A request to change lifecycle state.
///
/// Creation commands leave `expected_version` empty and may name the id of the entity they
/// create. Every other command names its target and the version the caller last read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    #[serde(flatten)]
    pub action: Action,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity_id: Option<EntityId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_version: Option<Version>,
}

impl Command {
    pub fn create(action: Action) -> Self {
        Self {
            action,
            entity_id: None,
            expected_version: None,
        }
    }

    pub fn create_with_id(id: EntityId, action: Action) -> Self {
        Self {
            action,
            entity_id: Some(id),
            expected_version: None,
        }
    }

    pub fn targeting(id: &EntityId, expected_version: Version, action: Action) -> Self {
        Self {
            action,
            entity_id: Some(id.clone()),
            expected_version: Some(expected_version),
        }
    }

    pub fn name(&self) -> &'static str {
        self.action.name()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum Action {
    RegisterRoom {
        room_number: String,
        name: String,
        kind: RoomKind,
        capacity: u8,
    },
    CreateBooking {
        guest_id: EntityId,
        room_id: EntityId,
        check_in: DateTime<Utc>,
        check_out: DateTime<Utc>,
        nightly_rate: Money,
        #[serde(default)]
        cleaning_fee: Money,
        #[serde(default)]
        bond_amount: Money,
        #[serde(default)]
        early_check_in_hours: u32,
    },
    CancelBooking {
        #[serde(default)]
        reason: Option<String>,
    },
    ExtendStay {
        new_check_out: DateTime<Utc>,
        unit: ExtensionUnit,
    },
    RecordPayment {
        /// Charges to settle; empty settles everything pending.
        #[serde(default)]
        charge_ids: Vec<EntityId>,
    },
    CollectBond,
    RefundBond,
    AddCharge {
        kind: ChargeKind,
        description: String,
        amount: Money,
    },
    CheckInReached,
    CheckOutReached,
    OpenKeyWindow,
    CloseKeyWindow,
    RevokeKey {
        reason: String,
    },
    SubmitMaintenanceTicket {
        room_id: EntityId,
        reported_by: String,
        summary: String,
        #[serde(default)]
        description: String,
        priority: TicketPriority,
    },
    SubmitQuote {
        labor_cost: Money,
        #[serde(default)]
        materials: Vec<MaterialItem>,
        #[serde(default)]
        notes: Option<String>,
    },
    ApproveTicket {
        tasks: Vec<String>,
        access_window: AccessWindow,
    },
    StartJob,
    CompleteJobTask {
        task_id: String,
        #[serde(default)]
        notes: Option<String>,
    },
    StartCleaning,
    CompleteChecklistItem {
        item_id: String,
    },
    ConfirmClean,
    SubmitBondClaim {
        booking_id: EntityId,
        kind: DamageKind,
        description: String,
        amount: Money,
        #[serde(default)]
        urgent: bool,
    },
    ReviewBondClaim,
    ApproveBondClaim,
    RejectBondClaim,
    CreateSubscription {
        guest_id: EntityId,
        room_id: EntityId,
        plan: SubscriptionPlan,
        starts_on: NaiveDate,
    },
    SelectSubscriptionDates {
        dates: BTreeSet<NaiveDate>,
    },
    RenewSubscription,
    CancelSubscription,
    ExpireSubscription,
}

impl Action {
    pub const fn name(&self) -> &'static str {
        match self {
            Action::RegisterRoom { .. } => "register_room",
            Action::CreateBooking { .. } => "create_booking",
            Action::CancelBooking { .. } => "cancel_booking",
            Action::ExtendStay { .. } => "extend_stay",
            Action::RecordPayment { .. } => "record_payment",
            Action::CollectBond => "collect_bond",
            Action::RefundBond => "refund_bond",
            Action::AddCharge { .. } => "add_charge",
            Action::CheckInReached => "check_in_reached",
            Action::CheckOutReached => "check_out_reached",
            Action::OpenKeyWindow => "open_key_window",
            Action::CloseKeyWindow => "close_key_window",
            Action::RevokeKey { .. } => "revoke_key",
            Action::SubmitMaintenanceTicket { .. } => "submit_maintenance_ticket",
            Action::SubmitQuote { .. } => "submit_quote",
            Action::ApproveTicket { .. } => "approve_ticket",
            Action::StartJob => "start_job",
            Action::CompleteJobTask { .. } => "complete_job_task",
            Action::StartCleaning => "start_cleaning",
            Action::CompleteChecklistItem { .. } => "complete_checklist_item",
            Action::ConfirmClean => "confirm_clean",
            Action::SubmitBondClaim { .. } => "submit_bond_claim",
            Action::ReviewBondClaim => "review_bond_claim",
            Action::ApproveBondClaim => "approve_bond_claim",
            Action::RejectBondClaim => "reject_bond_claim",
            Action::CreateSubscription { .. } => "create_subscription",
            Action::SelectSubscriptionDates { .. } => "select_subscription_dates",
            Action::RenewSubscription => "renew_subscription",
            Action::CancelSubscription => "cancel_subscription",
            Action::ExpireSubscription => "expire_subscription",
        }
    }

    /// Kind of the entity this action creates or changes.
    pub const fn target_kind(&self) -> EntityKind {
        match self {
            Action::RegisterRoom { .. } => EntityKind::Room,
            Action::CreateBooking { .. }
            | Action::CancelBooking { .. }
            | Action::ExtendStay { .. }
            | Action::RecordPayment { .. }
            | Action::CollectBond
            | Action::RefundBond
            | Action::AddCharge { .. }
            | Action::CheckInReached
            | Action::CheckOutReached => EntityKind::Booking,
            Action::OpenKeyWindow | Action::CloseKeyWindow | Action::RevokeKey { .. } => {
                EntityKind::DigitalKey
            }
            Action::SubmitMaintenanceTicket { .. }
            | Action::SubmitQuote { .. }
            | Action::ApproveTicket { .. } => EntityKind::MaintenanceTicket,
            Action::StartJob | Action::CompleteJobTask { .. } => EntityKind::MaintenanceJob,
            Action::StartCleaning
            | Action::CompleteChecklistItem { .. }
            | Action::ConfirmClean => EntityKind::HousekeepingTask,
            Action::SubmitBondClaim { .. }
            | Action::ReviewBondClaim
            | Action::ApproveBondClaim
            | Action::RejectBondClaim => EntityKind::BondClaim,
            Action::CreateSubscription { .. }
            | Action::SelectSubscriptionDates { .. }
            | Action::RenewSubscription
            | Action::CancelSubscription
            | Action::ExpireSubscription => EntityKind::Subscription,
        }
    }

    pub const fn creates(&self) -> bool {
        matches!(
            self,
            Action::RegisterRoom { .. }
                | Action::CreateBooking { .. }
                | Action::SubmitMaintenanceTicket { .. }
                | Action::SubmitBondClaim { .. }
                | Action::CreateSubscription { .. }
        )
    }

    /// Entity whose lock serializes a creation: the parent the new entity hangs off.
    pub(crate) fn creation_parent(&self) -> Option<EntityRef> {
        match self {
            Action::CreateBooking { room_id, .. }
            | Action::SubmitMaintenanceTicket { room_id, .. }
            | Action::CreateSubscription { room_id, .. } => {
                Some(EntityRef::new(EntityKind::Room, room_id))
            }
            Action::SubmitBondClaim { booking_id, .. } => {
                Some(EntityRef::new(EntityKind::Booking, booking_id))
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn commands_use_kind_and_payload_on_the_wire() {
        let command: Command = serde_json::from_value(json!({
            "kind": "extend_stay",
            "payload": { "new_check_out": "2025-03-14T10:00:00Z", "unit": "days" },
            "entity_id": "booking-1",
            "expected_version": 3
        }))
        .expect("command parses");

        assert_eq!(command.entity_id, Some(EntityId::new("booking-1")));
        assert_eq!(command.expected_version, Some(3));
        match command.action {
            Action::ExtendStay { unit, .. } => assert_eq!(unit, ExtensionUnit::Days),
            other => panic!("expected extend_stay, got {other:?}"),
        }
    }

    #[test]
    fn creations_lock_their_parent() {
        let action = Action::SubmitBondClaim {
            booking_id: EntityId::new("booking-9"),
            kind: DamageKind::BrokenItem,
            description: "Cracked lamp".to_string(),
            amount: Money::from_dollars(40),
            urgent: false,
        };
        assert!(action.creates());
        assert_eq!(action.target_kind(), EntityKind::BondClaim);
        assert_eq!(
            action.creation_parent(),
            Some(EntityRef::new(EntityKind::Booking, &EntityId::new("booking-9")))
        );
        assert!(!Action::ConfirmClean.creates());
    }
}
