use std::collections::BTreeSet;
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub};

use chrono::{DateTime, Duration, Months, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Statuses and events that render to a stable snake_case label.
pub trait Labelled: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    fn label(self) -> &'static str;
    fn all() -> &'static [Self];
}

macro_rules! labelled_enum {
    ($(#[$meta:meta])* pub enum $name:ident { $($variant:ident => $label:literal),+ $(,)? }) => {
        $(#[$meta])*
        #[derive(
            Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, ::serde::Serialize, ::serde::Deserialize,
        )]
        #[serde(rename_all = "snake_case")]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const ALL: &'static [Self] = &[$(Self::$variant),+];

            pub const fn label(self) -> &'static str {
                match self {
                    $(Self::$variant => $label),+
                }
            }

            pub fn from_label(value: &str) -> Option<Self> {
                Self::ALL.iter().copied().find(|item| item.label() == value)
            }
        }

        impl $crate::lifecycle::domain::Labelled for $name {
            fn label(self) -> &'static str {
                $name::label(self)
            }

            fn all() -> &'static [Self] {
                Self::ALL
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.label())
            }
        }
    };
}

pub(crate) use labelled_enum;

/// Opaque identifier shared by every entity kind.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub String);

impl EntityId {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn generate() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Optimistic-concurrency token carried by every stored record.
pub type Version = u64;

labelled_enum! {
    pub enum EntityKind {
        Room => "room",
        Booking => "booking",
        DigitalKey => "digital_key",
        HousekeepingTask => "housekeeping_task",
        MaintenanceTicket => "maintenance_ticket",
        MaintenanceJob => "maintenance_job",
        BondClaim => "bond_claim",
        Subscription => "subscription",
    }
}

/// Fully qualified pointer to a stored entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityRef {
    pub kind: EntityKind,
    pub id: EntityId,
}

impl EntityRef {
    pub fn new(kind: EntityKind, id: &EntityId) -> Self {
        Self {
            kind,
            id: id.clone(),
        }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.kind, self.id)
    }
}

/// Amount of money in cents. Signed so discounts can be folded with charges.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_cents(cents: i64) -> Self {
        Self(cents)
    }

    pub const fn from_dollars(dollars: i64) -> Self {
        Self(dollars.saturating_mul(100))
    }

    pub const fn cents(self) -> i64 {
        self.0
    }

    pub const fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub const fn times(self, quantity: i64) -> Self {
        Self(self.0.saturating_mul(quantity))
    }

    /// Parses `150`, `150.5`, `$150.00` style inputs.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().trim_start_matches('$').replace(',', "");
        if trimmed.is_empty() {
            return None;
        }
        let (whole, fraction) = match trimmed.split_once('.') {
            Some((whole, fraction)) => (whole, fraction),
            None => (trimmed.as_str(), ""),
        };
        if fraction.len() > 2 || !fraction.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let dollars: i64 = whole.parse().ok()?;
        let cents = match fraction.len() {
            0 => 0,
            1 => fraction.parse::<i64>().ok()? * 10,
            _ => fraction.parse::<i64>().ok()?,
        };
        let sign = if dollars < 0 || whole.starts_with('-') { -1 } else { 1 };
        Some(Self(dollars.saturating_mul(100) + sign * cents))
    }
}

impl Add for Money {
    type Output = Money;

    fn add(self, rhs: Money) -> Money {
        Money(self.0.saturating_add(rhs.0))
    }
}

impl AddAssign for Money {
    fn add_assign(&mut self, rhs: Money) {
        self.0 = self.0.saturating_add(rhs.0);
    }
}

impl Sub for Money {
    type Output = Money;

    fn sub(self, rhs: Money) -> Money {
        Money(self.0.saturating_sub(rhs.0))
    }
}

impl Neg for Money {
    type Output = Money;

    fn neg(self) -> Money {
        Money(self.0.saturating_neg())
    }
}

impl Sum for Money {
    fn sum<I: Iterator<Item = Money>>(iter: I) -> Money {
        iter.fold(Money::ZERO, Add::add)
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sign = if self.0 < 0 { "-" } else { "" };
        let abs = self.0.unsigned_abs();
        write!(f, "{sign}${}.{:02}", abs / 100, abs % 100)
    }
}

labelled_enum! {
    pub enum RoomKind {
        Room => "room",
        Cabin => "cabin",
        Suite => "suite",
    }
}

labelled_enum! {
    /// Physical readiness of a room, assigned by orchestrator side-effects.
    pub enum RoomCondition {
        Ready => "ready",
        Occupied => "occupied",
        Dirty => "dirty",
        Cleaning => "cleaning",
        Maintenance => "maintenance",
        Offline => "offline",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: EntityId,
    pub room_number: String,
    pub name: String,
    pub kind: RoomKind,
    pub capacity: u8,
    pub condition: RoomCondition,
    pub registered_at: DateTime<Utc>,
}

labelled_enum! {
    pub enum BookingStatus {
        Upcoming => "upcoming",
        Current => "current",
        Past => "past",
        Cancelled => "cancelled",
    }
}

labelled_enum! {
    pub enum PaymentStatus {
        Pending => "pending",
        Paid => "paid",
        Partial => "partial",
        Refunded => "refunded",
    }
}

labelled_enum! {
    pub enum BondStatus {
        Pending => "pending",
        Held => "held",
        Refunded => "refunded",
        Deducted => "deducted",
    }
}

labelled_enum! {
    pub enum ChargeKind {
        Accommodation => "accommodation",
        Cleaning => "cleaning",
        Extra => "extra",
        Discount => "discount",
        Bond => "bond",
    }
}

labelled_enum! {
    pub enum ChargeStatus {
        Pending => "pending",
        Paid => "paid",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Charge {
    pub id: EntityId,
    pub booking_id: EntityId,
    pub kind: ChargeKind,
    pub description: String,
    pub amount: Money,
    pub status: ChargeStatus,
}

impl Charge {
    pub fn new(
        booking_id: &EntityId,
        kind: ChargeKind,
        description: impl Into<String>,
        amount: Money,
        status: ChargeStatus,
    ) -> Self {
        Self {
            id: EntityId::generate(),
            booking_id: booking_id.clone(),
            kind,
            description: description.into(),
            amount,
            status,
        }
    }

    /// Contribution to the booking subtotal; discounts count negative.
    pub fn signed_amount(&self) -> Money {
        match self.kind {
            ChargeKind::Discount => -self.amount,
            _ => self.amount,
        }
    }
}

labelled_enum! {
    pub enum ExtensionUnit {
        Hours => "hours",
        Days => "days",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StayExtension {
    pub unit: ExtensionUnit,
    pub amount: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: EntityId,
    pub guest_id: EntityId,
    pub room_id: EntityId,
    pub key_id: EntityId,
    pub check_in: DateTime<Utc>,
    pub check_out: DateTime<Utc>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub bond_amount: Money,
    pub bond_status: BondStatus,
    pub nightly_rate: Money,
    pub cleaning_fee: Money,
    pub early_check_in_hours: u32,
    pub extension: Option<StayExtension>,
    pub charges: Vec<Charge>,
    pub created_at: DateTime<Utc>,
}

impl Booking {
    /// accommodation + cleaning + extra - discount; bond deductions are tracked separately.
    pub fn subtotal(&self) -> Money {
        self.charges
            .iter()
            .filter(|charge| charge.kind != ChargeKind::Bond)
            .map(Charge::signed_amount)
            .sum()
    }

    /// Whole nights between check-in and check-out, rounding partial days up.
    pub fn nights(&self) -> i64 {
        nights_between(self.check_in, self.check_out)
    }

    pub fn is_live(&self) -> bool {
        matches!(self.status, BookingStatus::Upcoming | BookingStatus::Current)
    }

    pub fn overlaps(&self, start: DateTime<Utc>, end: DateTime<Utc>) -> bool {
        self.check_in < end && start < self.check_out
    }

    pub fn covers_night(&self, date: NaiveDate) -> bool {
        let first = self.check_in.date_naive();
        let last = self.check_out.date_naive();
        date >= first && date < last
    }

    pub fn key_activates_at(&self) -> DateTime<Utc> {
        self.check_in - Duration::hours(i64::from(self.early_check_in_hours))
    }
}

pub(crate) fn nights_between(start: DateTime<Utc>, end: DateTime<Utc>) -> i64 {
    let minutes = (end - start).num_minutes();
    let per_night = 24 * 60;
    ((minutes + per_night - 1) / per_night).max(1)
}

labelled_enum! {
    pub enum KeyStatus {
        NotAvailable => "not_available",
        Active => "active",
        Expired => "expired",
        Revoked => "revoked",
    }
}

/// Who a key was issued to; decides where its validity window comes from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum KeyHolder {
    Guest { booking_id: EntityId },
    Maintenance { job_id: EntityId },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DigitalKey {
    pub id: EntityId,
    pub room_id: EntityId,
    pub holder: KeyHolder,
    pub status: KeyStatus,
    pub activates_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub access_code: String,
}

impl DigitalKey {
    pub fn issue(
        room_id: &EntityId,
        holder: KeyHolder,
        activates_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
    ) -> Self {
        let code = Uuid::new_v4().as_u128() % 1_000_000;
        Self {
            id: EntityId::generate(),
            room_id: room_id.clone(),
            holder,
            status: KeyStatus::NotAvailable,
            activates_at,
            expires_at,
            access_code: format!("{code:06}"),
        }
    }

    pub fn window_contains(&self, now: DateTime<Utc>) -> bool {
        now >= self.activates_at && now < self.expires_at
    }

    /// Status as seen at `now`: revocation and clock-closed windows stick, everything
    /// else follows the validity window.
    pub fn derived_status(&self, now: DateTime<Utc>) -> KeyStatus {
        match self.status {
            KeyStatus::Revoked => KeyStatus::Revoked,
            KeyStatus::Expired => KeyStatus::Expired,
            KeyStatus::NotAvailable | KeyStatus::Active => {
                if now < self.activates_at {
                    KeyStatus::NotAvailable
                } else if now >= self.expires_at {
                    KeyStatus::Expired
                } else {
                    KeyStatus::Active
                }
            }
        }
    }
}

labelled_enum! {
    pub enum CleaningStatus {
        Dirty => "dirty",
        InProgress => "in_progress",
        ReadyForInspection => "ready_for_inspection",
        Cleaned => "cleaned",
    }
}

labelled_enum! {
    pub enum CleaningPriority {
        Normal => "normal",
        Urgent => "urgent",
        LateCheckout => "late_checkout",
        ExtendedStay => "extended_stay",
    }
}

impl CleaningPriority {
    const fn rank(self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::ExtendedStay => 1,
            Self::LateCheckout => 2,
            Self::Urgent => 3,
        }
    }

    pub fn max(self, other: Self) -> Self {
        if other.rank() > self.rank() {
            other
        } else {
            self
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChecklistItem {
    pub id: String,
    pub label: String,
    pub completed: bool,
}

pub fn default_checklist() -> Vec<ChecklistItem> {
    [
        ("bathroom", "Bathroom cleaned"),
        ("bed", "Bed made"),
        ("floors", "Floors vacuumed"),
        ("trash", "Trash removed"),
        ("amenities", "Amenities restocked"),
        ("kitchen", "Kitchen surfaces wiped"),
    ]
    .into_iter()
    .map(|(id, label)| ChecklistItem {
        id: id.to_string(),
        label: label.to_string(),
        completed: false,
    })
    .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HousekeepingTask {
    pub id: EntityId,
    pub room_id: EntityId,
    pub booking_id: Option<EntityId>,
    pub status: CleaningStatus,
    pub priority: CleaningPriority,
    pub checklist: Vec<ChecklistItem>,
    pub opened_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl HousekeepingTask {
    pub fn open(
        room_id: &EntityId,
        booking_id: Option<EntityId>,
        priority: CleaningPriority,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: EntityId::generate(),
            room_id: room_id.clone(),
            booking_id,
            status: CleaningStatus::Dirty,
            priority,
            checklist: default_checklist(),
            opened_at: at,
            completed_at: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.status != CleaningStatus::Cleaned
    }

    pub fn all_checked(&self) -> bool {
        self.checklist.iter().all(|item| item.completed)
    }
}

labelled_enum! {
    pub enum TicketStatus {
        New => "new",
        PendingQuote => "pending_quote",
        Approved => "approved",
        InProgress => "in_progress",
        Completed => "completed",
    }
}

labelled_enum! {
    pub enum TicketPriority {
        Low => "low",
        Normal => "normal",
        Urgent => "urgent",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaterialItem {
    pub name: String,
    pub unit_price: Money,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quote {
    pub labor_cost: Money,
    pub materials: Vec<MaterialItem>,
    pub notes: Option<String>,
    pub submitted_at: DateTime<Utc>,
}

impl Quote {
    pub fn total(&self) -> Money {
        self.labor_cost
            + self
                .materials
                .iter()
                .map(|item| item.unit_price.times(i64::from(item.quantity)))
                .sum()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceTicket {
    pub id: EntityId,
    pub room_id: EntityId,
    pub reported_by: String,
    pub summary: String,
    pub description: String,
    pub priority: TicketPriority,
    pub status: TicketStatus,
    pub quote: Option<Quote>,
    pub job_id: Option<EntityId>,
    pub created_at: DateTime<Utc>,
}

labelled_enum! {
    pub enum JobStatus {
        Approved => "approved",
        InProgress => "in_progress",
        Completed => "completed",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessWindow {
    pub starts_at: DateTime<Utc>,
    pub ends_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobTask {
    pub id: String,
    pub description: String,
    pub completed: bool,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceJob {
    pub id: EntityId,
    pub ticket_id: EntityId,
    pub room_id: EntityId,
    pub status: JobStatus,
    pub tasks: Vec<JobTask>,
    pub access_key: Option<EntityId>,
    pub access_window: AccessWindow,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl MaintenanceJob {
    pub fn all_tasks_checked(&self) -> bool {
        self.tasks.iter().all(|task| task.completed)
    }
}

labelled_enum! {
    pub enum ClaimStatus {
        Submitted => "submitted",
        PendingApproval => "pending_approval",
        Approved => "approved",
        Rejected => "rejected",
    }
}

labelled_enum! {
    pub enum DamageKind {
        PropertyDamage => "property_damage",
        BrokenItem => "broken_item",
        ExcessiveMess => "excessive_mess",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BondClaim {
    pub id: EntityId,
    pub booking_id: EntityId,
    pub kind: DamageKind,
    pub description: String,
    pub amount: Money,
    pub urgent: bool,
    pub status: ClaimStatus,
    pub created_at: DateTime<Utc>,
}

impl BondClaim {
    pub fn is_open(&self) -> bool {
        matches!(
            self.status,
            ClaimStatus::Submitted | ClaimStatus::PendingApproval
        )
    }
}

labelled_enum! {
    pub enum SubscriptionPlan {
        Basic => "basic",
        Plus => "plus",
        Premium => "premium",
    }
}

impl SubscriptionPlan {
    pub const fn nights_per_month(self) -> u32 {
        match self {
            Self::Basic => 4,
            Self::Plus => 8,
            Self::Premium => 12,
        }
    }

    pub const fn monthly_price(self) -> Money {
        match self {
            Self::Basic => Money::from_dollars(199),
            Self::Plus => Money::from_dollars(349),
            Self::Premium => Money::from_dollars(499),
        }
    }
}

labelled_enum! {
    pub enum SubscriptionStatus {
        Active => "active",
        Cancelled => "cancelled",
        Expired => "expired",
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub id: EntityId,
    pub guest_id: EntityId,
    pub room_id: EntityId,
    pub plan: SubscriptionPlan,
    pub nights_per_month: u32,
    pub monthly_price: Money,
    pub selected_dates: BTreeSet<NaiveDate>,
    pub status: SubscriptionStatus,
    pub next_billing_date: NaiveDate,
    pub created_at: DateTime<Utc>,
}

impl Subscription {
    /// First day of the billing period that ends at `next_billing_date`.
    pub fn period_start(&self) -> NaiveDate {
        self.next_billing_date
            .checked_sub_months(Months::new(1))
            .unwrap_or(self.next_billing_date)
    }

    pub fn in_current_period(&self, date: NaiveDate) -> bool {
        date >= self.period_start() && date < self.next_billing_date
    }
}

/// Any stored entity, tagged by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "entity", rename_all = "snake_case")]
pub enum Entity {
    Room(Room),
    Booking(Booking),
    DigitalKey(DigitalKey),
    HousekeepingTask(HousekeepingTask),
    MaintenanceTicket(MaintenanceTicket),
    MaintenanceJob(MaintenanceJob),
    BondClaim(BondClaim),
    Subscription(Subscription),
}

impl Entity {
    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Room(_) => EntityKind::Room,
            Entity::Booking(_) => EntityKind::Booking,
            Entity::DigitalKey(_) => EntityKind::DigitalKey,
            Entity::HousekeepingTask(_) => EntityKind::HousekeepingTask,
            Entity::MaintenanceTicket(_) => EntityKind::MaintenanceTicket,
            Entity::MaintenanceJob(_) => EntityKind::MaintenanceJob,
            Entity::BondClaim(_) => EntityKind::BondClaim,
            Entity::Subscription(_) => EntityKind::Subscription,
        }
    }

    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Room(room) => &room.id,
            Entity::Booking(booking) => &booking.id,
            Entity::DigitalKey(key) => &key.id,
            Entity::HousekeepingTask(task) => &task.id,
            Entity::MaintenanceTicket(ticket) => &ticket.id,
            Entity::MaintenanceJob(job) => &job.id,
            Entity::BondClaim(claim) => &claim.id,
            Entity::Subscription(subscription) => &subscription.id,
        }
    }

    pub fn entity_ref(&self) -> EntityRef {
        EntityRef::new(self.kind(), self.id())
    }
}

/// Typed access to one variant of [`Entity`].
pub trait StoredEntity: Clone + Sized {
    const KIND: EntityKind;

    fn id(&self) -> &EntityId;
    fn into_entity(self) -> Entity;
    fn from_entity(entity: Entity) -> Option<Self>;

    fn entity_ref(&self) -> EntityRef {
        EntityRef::new(Self::KIND, self.id())
    }
}

macro_rules! stored_entity {
    ($ty:ident) => {
        impl StoredEntity for $ty {
            const KIND: EntityKind = EntityKind::$ty;

            fn id(&self) -> &EntityId {
                &self.id
            }

            fn into_entity(self) -> Entity {
                Entity::$ty(self)
            }

            fn from_entity(entity: Entity) -> Option<Self> {
                match entity {
                    Entity::$ty(inner) => Some(inner),
                    _ => None,
                }
            }
        }
    };
}

stored_entity!(Room);
stored_entity!(Booking);
stored_entity!(DigitalKey);
stored_entity!(HousekeepingTask);
stored_entity!(MaintenanceTicket);
stored_entity!(MaintenanceJob);
stored_entity!(BondClaim);
stored_entity!(Subscription);

/// An entity together with the version it was read at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Versioned<T> {
    pub version: Version,
    pub entity: T,
}
