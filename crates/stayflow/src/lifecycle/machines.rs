//! Transition tables for every lifecycle state machine.
//!
//! Each machine is a `const` table of `(from, event, to, effects)` rows. Anything not listed is
//! rejected with [`InvalidTransition`], which keeps legality in one place for both the
//! orchestrator and any client that asks the registry.

use serde::{Deserialize, Serialize};

use super::domain::{
    labelled_enum, BondStatus, BookingStatus, ClaimStatus, CleaningStatus, JobStatus, KeyStatus,
    Labelled, PaymentStatus, SubscriptionStatus, TicketStatus,
};

labelled_enum! {
    pub enum MachineKind {
        Booking => "booking",
        BondStatus => "bond_status",
        PaymentStatus => "payment_status",
        DigitalKey => "digital_key",
        HousekeepingTask => "housekeeping_task",
        MaintenanceTicket => "maintenance_ticket",
        MaintenanceJob => "maintenance_job",
        BondClaim => "bond_claim",
        Subscription => "subscription",
    }
}

labelled_enum! {
    /// Cross-entity work a transition asks the orchestrator to perform in the same commit.
    pub enum SideEffect {
        ActivateGuestKey => "activate_guest_key",
        CloseGuestKey => "close_guest_key",
        RevokeGuestKey => "revoke_guest_key",
        ShiftGuestKeyExpiry => "shift_guest_key_expiry",
        MarkRoomOccupied => "mark_room_occupied",
        MarkRoomDirty => "mark_room_dirty",
        MarkRoomCleaning => "mark_room_cleaning",
        MarkRoomMaintenance => "mark_room_maintenance",
        MarkRoomReady => "mark_room_ready",
        OpenTurnoverTask => "open_turnover_task",
        EscalateHousekeeping => "escalate_housekeeping",
        AnnounceKeyActivated => "announce_key_activated",
        AnnounceKeyRevoked => "announce_key_revoked",
        AnnounceRoomAvailable => "announce_room_available",
        AppendCleaningCharge => "append_cleaning_charge",
        RefundHeldBond => "refund_held_bond",
        RefundPayments => "refund_payments",
        CreateJobWithMasterKey => "create_job_with_master_key",
        StartTicketWork => "start_ticket_work",
        CompleteTicket => "complete_ticket",
        OpenMasterKey => "open_master_key",
        CloseMasterKey => "close_master_key",
        DeductBond => "deduct_bond",
        AppendBondCharge => "append_bond_charge",
        AnnounceBondDeducted => "announce_bond_deducted",
        RollBillingPeriod => "roll_billing_period",
    }
}

labelled_enum! {
    pub enum BookingEvent {
        CheckInReached => "check_in_reached",
        CheckOutReached => "check_out_reached",
        Cancel => "cancel",
        Extend => "extend",
    }
}

labelled_enum! {
    pub enum BondEvent {
        Collect => "collect",
        Refund => "refund",
        Deduct => "deduct",
    }
}

labelled_enum! {
    pub enum PaymentEvent {
        PartialPayment => "partial_payment",
        Settle => "settle",
        Reopen => "reopen",
        Refund => "refund",
    }
}

labelled_enum! {
    pub enum KeyEvent {
        WindowOpened => "window_opened",
        WindowClosed => "window_closed",
        Revoke => "revoke",
    }
}

labelled_enum! {
    pub enum CleaningEvent {
        Start => "start",
        AllItemsChecked => "all_items_checked",
        Confirm => "confirm",
        Restart => "restart",
    }
}

labelled_enum! {
    pub enum TicketEvent {
        QuoteSubmitted => "quote_submitted",
        Approved => "approved",
        JobStarted => "job_started",
        JobCompleted => "job_completed",
    }
}

labelled_enum! {
    pub enum JobEvent {
        Start => "start",
        AllTasksChecked => "all_tasks_checked",
    }
}

labelled_enum! {
    pub enum ClaimEvent {
        OwnerReview => "owner_review",
        Approve => "approve",
        Reject => "reject",
    }
}

labelled_enum! {
    pub enum SubscriptionEvent {
        Renew => "renew",
        Cancel => "cancel",
        Lapse => "lapse",
    }
}

/// One legal row of a transition table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Edge<S, E> {
    pub from: S,
    pub on: E,
    pub to: S,
    pub effects: &'static [SideEffect],
}

const fn edge<S, E>(from: S, on: E, to: S, effects: &'static [SideEffect]) -> Edge<S, E> {
    Edge {
        from,
        on,
        to,
        effects,
    }
}

/// Result of a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition<S> {
    pub from: S,
    pub to: S,
    pub effects: &'static [SideEffect],
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[error("{machine} cannot handle `{event}` while `{from}`")]
pub struct InvalidTransition {
    pub machine: MachineKind,
    pub from: String,
    pub event: String,
}

impl InvalidTransition {
    pub fn new(machine: MachineKind, from: impl Into<String>, event: impl Into<String>) -> Self {
        Self {
            machine,
            from: from.into(),
            event: event.into(),
        }
    }
}

pub trait StateMachine {
    const KIND: MachineKind;

    type State: Labelled;
    type Event: Labelled;

    const EDGES: &'static [Edge<Self::State, Self::Event>];

    fn transition(
        from: Self::State,
        on: Self::Event,
    ) -> Result<Transition<Self::State>, InvalidTransition> {
        Self::EDGES
            .iter()
            .find(|row| row.from == from && row.on == on)
            .map(|row| Transition {
                from,
                to: row.to,
                effects: row.effects,
            })
            .ok_or_else(|| InvalidTransition::new(Self::KIND, from.label(), on.label()))
    }

    fn allows(from: Self::State, on: Self::Event) -> bool {
        Self::transition(from, on).is_ok()
    }
}

pub struct BookingMachine;

impl StateMachine for BookingMachine {
    const KIND: MachineKind = MachineKind::Booking;
    type State = BookingStatus;
    type Event = BookingEvent;

    const EDGES: &'static [Edge<BookingStatus, BookingEvent>] = &[
        edge(
            BookingStatus::Upcoming,
            BookingEvent::CheckInReached,
            BookingStatus::Current,
            &[SideEffect::ActivateGuestKey, SideEffect::MarkRoomOccupied],
        ),
        edge(
            BookingStatus::Current,
            BookingEvent::CheckOutReached,
            BookingStatus::Past,
            &[
                SideEffect::CloseGuestKey,
                SideEffect::OpenTurnoverTask,
                SideEffect::MarkRoomDirty,
            ],
        ),
        edge(
            BookingStatus::Upcoming,
            BookingEvent::Cancel,
            BookingStatus::Cancelled,
            &[
                SideEffect::RevokeGuestKey,
                SideEffect::RefundHeldBond,
                SideEffect::RefundPayments,
            ],
        ),
        edge(
            BookingStatus::Current,
            BookingEvent::Cancel,
            BookingStatus::Cancelled,
            &[
                SideEffect::RevokeGuestKey,
                SideEffect::RefundHeldBond,
                SideEffect::RefundPayments,
                SideEffect::OpenTurnoverTask,
                SideEffect::MarkRoomDirty,
            ],
        ),
        edge(
            BookingStatus::Upcoming,
            BookingEvent::Extend,
            BookingStatus::Upcoming,
            &[SideEffect::ShiftGuestKeyExpiry],
        ),
        edge(
            BookingStatus::Current,
            BookingEvent::Extend,
            BookingStatus::Current,
            &[SideEffect::ShiftGuestKeyExpiry],
        ),
    ];
}

pub struct BondMachine;

impl StateMachine for BondMachine {
    const KIND: MachineKind = MachineKind::BondStatus;
    type State = BondStatus;
    type Event = BondEvent;

    const EDGES: &'static [Edge<BondStatus, BondEvent>] = &[
        edge(BondStatus::Pending, BondEvent::Collect, BondStatus::Held, &[]),
        edge(BondStatus::Held, BondEvent::Refund, BondStatus::Refunded, &[]),
        edge(BondStatus::Held, BondEvent::Deduct, BondStatus::Deducted, &[]),
    ];
}

pub struct PaymentMachine;

impl StateMachine for PaymentMachine {
    const KIND: MachineKind = MachineKind::PaymentStatus;
    type State = PaymentStatus;
    type Event = PaymentEvent;

    const EDGES: &'static [Edge<PaymentStatus, PaymentEvent>] = &[
        edge(
            PaymentStatus::Pending,
            PaymentEvent::PartialPayment,
            PaymentStatus::Partial,
            &[],
        ),
        edge(
            PaymentStatus::Partial,
            PaymentEvent::PartialPayment,
            PaymentStatus::Partial,
            &[],
        ),
        edge(PaymentStatus::Pending, PaymentEvent::Settle, PaymentStatus::Paid, &[]),
        edge(PaymentStatus::Partial, PaymentEvent::Settle, PaymentStatus::Paid, &[]),
        edge(PaymentStatus::Paid, PaymentEvent::Reopen, PaymentStatus::Partial, &[]),
        edge(PaymentStatus::Partial, PaymentEvent::Refund, PaymentStatus::Refunded, &[]),
        edge(PaymentStatus::Paid, PaymentEvent::Refund, PaymentStatus::Refunded, &[]),
    ];
}

pub struct KeyMachine;

impl StateMachine for KeyMachine {
    const KIND: MachineKind = MachineKind::DigitalKey;
    type State = KeyStatus;
    type Event = KeyEvent;

    const EDGES: &'static [Edge<KeyStatus, KeyEvent>] = &[
        edge(
            KeyStatus::NotAvailable,
            KeyEvent::WindowOpened,
            KeyStatus::Active,
            &[SideEffect::AnnounceKeyActivated],
        ),
        edge(KeyStatus::Active, KeyEvent::WindowClosed, KeyStatus::Expired, &[]),
        edge(
            KeyStatus::NotAvailable,
            KeyEvent::Revoke,
            KeyStatus::Revoked,
            &[SideEffect::AnnounceKeyRevoked],
        ),
        edge(
            KeyStatus::Active,
            KeyEvent::Revoke,
            KeyStatus::Revoked,
            &[SideEffect::AnnounceKeyRevoked],
        ),
        edge(
            KeyStatus::Expired,
            KeyEvent::Revoke,
            KeyStatus::Revoked,
            &[SideEffect::AnnounceKeyRevoked],
        ),
    ];
}

pub struct CleaningMachine;

impl StateMachine for CleaningMachine {
    const KIND: MachineKind = MachineKind::HousekeepingTask;
    type State = CleaningStatus;
    type Event = CleaningEvent;

    const EDGES: &'static [Edge<CleaningStatus, CleaningEvent>] = &[
        edge(
            CleaningStatus::Dirty,
            CleaningEvent::Start,
            CleaningStatus::InProgress,
            &[SideEffect::MarkRoomCleaning],
        ),
        edge(
            CleaningStatus::InProgress,
            CleaningEvent::AllItemsChecked,
            CleaningStatus::ReadyForInspection,
            &[],
        ),
        edge(
            CleaningStatus::ReadyForInspection,
            CleaningEvent::Confirm,
            CleaningStatus::Cleaned,
            &[
                SideEffect::MarkRoomReady,
                SideEffect::AnnounceRoomAvailable,
                SideEffect::AppendCleaningCharge,
            ],
        ),
        edge(
            CleaningStatus::InProgress,
            CleaningEvent::Restart,
            CleaningStatus::Dirty,
            &[],
        ),
        edge(
            CleaningStatus::ReadyForInspection,
            CleaningEvent::Restart,
            CleaningStatus::Dirty,
            &[],
        ),
    ];
}

pub struct TicketMachine;

impl StateMachine for TicketMachine {
    const KIND: MachineKind = MachineKind::MaintenanceTicket;
    type State = TicketStatus;
    type Event = TicketEvent;

    const EDGES: &'static [Edge<TicketStatus, TicketEvent>] = &[
        edge(
            TicketStatus::New,
            TicketEvent::QuoteSubmitted,
            TicketStatus::PendingQuote,
            &[],
        ),
        edge(
            TicketStatus::PendingQuote,
            TicketEvent::Approved,
            TicketStatus::Approved,
            &[
                SideEffect::CreateJobWithMasterKey,
                SideEffect::MarkRoomMaintenance,
            ],
        ),
        edge(
            TicketStatus::Approved,
            TicketEvent::JobStarted,
            TicketStatus::InProgress,
            &[],
        ),
        edge(
            TicketStatus::InProgress,
            TicketEvent::JobCompleted,
            TicketStatus::Completed,
            &[],
        ),
    ];
}

pub struct JobMachine;

impl StateMachine for JobMachine {
    const KIND: MachineKind = MachineKind::MaintenanceJob;
    type State = JobStatus;
    type Event = JobEvent;

    const EDGES: &'static [Edge<JobStatus, JobEvent>] = &[
        edge(
            JobStatus::Approved,
            JobEvent::Start,
            JobStatus::InProgress,
            &[
                SideEffect::StartTicketWork,
                SideEffect::OpenMasterKey,
                SideEffect::MarkRoomMaintenance,
            ],
        ),
        edge(
            JobStatus::InProgress,
            JobEvent::AllTasksChecked,
            JobStatus::Completed,
            &[
                SideEffect::CompleteTicket,
                SideEffect::CloseMasterKey,
                SideEffect::MarkRoomDirty,
                SideEffect::EscalateHousekeeping,
            ],
        ),
    ];
}

pub struct ClaimMachine;

impl StateMachine for ClaimMachine {
    const KIND: MachineKind = MachineKind::BondClaim;
    type State = ClaimStatus;
    type Event = ClaimEvent;

    const EDGES: &'static [Edge<ClaimStatus, ClaimEvent>] = &[
        edge(
            ClaimStatus::Submitted,
            ClaimEvent::OwnerReview,
            ClaimStatus::PendingApproval,
            &[],
        ),
        edge(
            ClaimStatus::PendingApproval,
            ClaimEvent::Approve,
            ClaimStatus::Approved,
            &[
                SideEffect::DeductBond,
                SideEffect::AppendBondCharge,
                SideEffect::AnnounceBondDeducted,
            ],
        ),
        edge(
            ClaimStatus::PendingApproval,
            ClaimEvent::Reject,
            ClaimStatus::Rejected,
            &[],
        ),
    ];
}

pub struct SubscriptionMachine;

impl StateMachine for SubscriptionMachine {
    const KIND: MachineKind = MachineKind::Subscription;
    type State = SubscriptionStatus;
    type Event = SubscriptionEvent;

    const EDGES: &'static [Edge<SubscriptionStatus, SubscriptionEvent>] = &[
        edge(
            SubscriptionStatus::Active,
            SubscriptionEvent::Renew,
            SubscriptionStatus::Active,
            &[SideEffect::RollBillingPeriod],
        ),
        edge(
            SubscriptionStatus::Active,
            SubscriptionEvent::Cancel,
            SubscriptionStatus::Cancelled,
            &[],
        ),
        edge(
            SubscriptionStatus::Active,
            SubscriptionEvent::Lapse,
            SubscriptionStatus::Expired,
            &[],
        ),
    ];
}

/// Label-level view of a table row, used by the HTTP and CLI surfaces.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EdgeView {
    pub from: &'static str,
    pub on: &'static str,
    pub to: &'static str,
    pub effects: Vec<&'static str>,
}

/// Label-level view of one machine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineTable {
    pub machine: MachineKind,
    pub states: Vec<&'static str>,
    pub events: Vec<&'static str>,
    pub edges: Vec<EdgeView>,
}

impl MachineTable {
    fn of<M: StateMachine>() -> Self {
        Self {
            machine: M::KIND,
            states: M::State::all().iter().map(|state| state.label()).collect(),
            events: M::Event::all().iter().map(|event| event.label()).collect(),
            edges: M::EDGES
                .iter()
                .map(|row| EdgeView {
                    from: row.from.label(),
                    on: row.on.label(),
                    to: row.to.label(),
                    effects: row.effects.iter().map(|effect| effect.label()).collect(),
                })
                .collect(),
        }
    }

    /// Transition by label; unknown labels are as illegal as missing edges.
    pub fn transition(&self, from: &str, on: &str) -> Result<&EdgeView, InvalidTransition> {
        self.edges
            .iter()
            .find(|row| row.from == from && row.on == on)
            .ok_or_else(|| InvalidTransition::new(self.machine, from, on))
    }
}

/// Dynamic registry over all tables.
#[derive(Debug, Clone)]
pub struct MachineRegistry {
    tables: Vec<MachineTable>,
}

impl MachineRegistry {
    pub fn standard() -> Self {
        Self {
            tables: vec![
                MachineTable::of::<BookingMachine>(),
                MachineTable::of::<BondMachine>(),
                MachineTable::of::<PaymentMachine>(),
                MachineTable::of::<KeyMachine>(),
                MachineTable::of::<CleaningMachine>(),
                MachineTable::of::<TicketMachine>(),
                MachineTable::of::<JobMachine>(),
                MachineTable::of::<ClaimMachine>(),
                MachineTable::of::<SubscriptionMachine>(),
            ],
        }
    }

    pub fn tables(&self) -> &[MachineTable] {
        &self.tables
    }

    pub fn table(&self, machine: MachineKind) -> Option<&MachineTable> {
        self.tables.iter().find(|table| table.machine == machine)
    }

    pub fn transition(
        &self,
        machine: MachineKind,
        from: &str,
        on: &str,
    ) -> Result<&EdgeView, InvalidTransition> {
        match self.table(machine) {
            Some(table) => table.transition(from, on),
            None => Err(InvalidTransition::new(machine, from, on)),
        }
    }
}

impl Default for MachineRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
