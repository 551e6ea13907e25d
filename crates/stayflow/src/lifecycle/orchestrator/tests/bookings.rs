use super::common::*;
use crate::lifecycle::domain::{
    BondStatus, Booking, BookingStatus, ChargeKind, CleaningPriority, DigitalKey, EntityId,
    EntityKind, ExtensionUnit, HousekeepingTask, KeyHolder, KeyStatus, Money, PaymentStatus,
    Room, RoomCondition, StayExtension, StoredEntity,
};
use crate::lifecycle::events::EventKind;
use crate::lifecycle::orchestrator::{Action, CapacityLimit, Command, OrchestratorError};
use crate::lifecycle::store::EntityStore;

#[tokio::test]
async fn create_booking_prices_the_stay_and_issues_a_dormant_key() {
    let harness = Harness::new(at(1, 9));
    let room = harness.room("101").await;

    let applied = harness
        .orchestrator
        .apply(Command::create_with_id(
            EntityId::new("booking-1"),
            Action::CreateBooking {
                guest_id: EntityId::new("guest-1"),
                room_id: room.clone(),
                check_in: at(10, 15),
                check_out: at(13, 10),
                nightly_rate: Money::from_dollars(100),
                cleaning_fee: Money::from_dollars(40),
                bond_amount: Money::from_dollars(200),
                early_check_in_hours: 2,
            },
        ))
        .await
        .expect("booking created");
    assert_eq!(applied.target.kind, EntityKind::Booking);
    assert_eq!(applied.target_version(), Some(1));

    let booking: Booking = harness.get(&EntityId::new("booking-1"));
    assert_eq!(booking.status, BookingStatus::Upcoming);
    assert_eq!(booking.payment_status, PaymentStatus::Pending);
    assert_eq!(booking.bond_status, BondStatus::Pending);
    assert_eq!(booking.charges.len(), 2);
    assert_eq!(booking.charges[0].kind, ChargeKind::Accommodation);
    assert_eq!(booking.charges[0].description, "Accommodation (3 nights)");
    assert_eq!(booking.charges[0].amount, Money::from_dollars(300));
    assert_eq!(booking.charges[1].kind, ChargeKind::Extra);
    assert_eq!(booking.charges[1].amount, Money::from_dollars(50));
    assert_eq!(booking.subtotal(), Money::from_dollars(350));

    let key: DigitalKey = harness.get(&booking.key_id);
    assert_eq!(key.status, KeyStatus::NotAvailable);
    assert_eq!(key.activates_at, at(10, 13));
    assert_eq!(key.expires_at, at(13, 10));
    assert_eq!(
        key.holder,
        KeyHolder::Guest {
            booking_id: booking.id.clone()
        }
    );
    assert_eq!(key.access_code.len(), 6);

    assert_eq!(
        event_names(&harness.events_for(&booking.entity_ref())),
        vec!["created", "charge_added", "charge_added"]
    );
}

#[tokio::test]
async fn overlapping_stays_are_rejected() {
    let harness = Harness::new(at(1, 9));
    let room = harness.room("101").await;
    harness.book("booking-1", &room, at(10, 15), at(13, 10)).await;

    let clash = harness
        .orchestrator
        .apply(Command::create_with_id(
            EntityId::new("booking-2"),
            booking_request(&room, "guest-2", at(12, 15), at(14, 10)),
        ))
        .await;
    match clash {
        Err(OrchestratorError::CapacityExceeded(CapacityLimit::RoomBooked { booking_id, .. })) => {
            assert_eq!(booking_id, EntityId::new("booking-1"))
        }
        other => panic!("expected room booked, got {other:?}"),
    }

    harness.book("booking-3", &room, at(13, 15), at(15, 10)).await;
    let bookings = harness.store.scan(EntityKind::Booking).expect("scan");
    assert_eq!(bookings.len(), 2);
}

#[tokio::test]
async fn malformed_bookings_are_invalid_commands() {
    let harness = Harness::new(at(1, 9));
    let room = harness.room("101").await;

    let backwards = harness
        .orchestrator
        .apply(Command::create(booking_request(
            &room,
            "guest-1",
            at(13, 10),
            at(10, 15),
        )))
        .await;
    assert!(matches!(backwards, Err(OrchestratorError::InvalidCommand(_))));

    let missing_room = harness
        .orchestrator
        .apply(Command::create(booking_request(
            &EntityId::new("room-404"),
            "guest-1",
            at(10, 15),
            at(13, 10),
        )))
        .await;
    match missing_room {
        Err(OrchestratorError::NotFound(entity)) => assert_eq!(entity.kind, EntityKind::Room),
        other => panic!("expected missing room, got {other:?}"),
    }
}

#[tokio::test]
async fn check_in_waits_for_the_clock_then_opens_the_key() {
    let harness = Harness::new(at(1, 9));
    let room = harness.room("101").await;
    let booking_id = harness.book("booking-1", &room, at(10, 15), at(13, 10)).await;

    let early = harness
        .try_run::<Booking>(&booking_id, Action::CheckInReached)
        .await;
    assert!(matches!(early, Err(OrchestratorError::InvalidCommand(_))));

    harness.clock.set(at(10, 15));
    let applied = harness
        .run::<Booking>(&booking_id, Action::CheckInReached)
        .await;
    assert!(has_event(&applied.events, |kind| matches!(
        kind,
        EventKind::KeyActivated { .. }
    )));

    let booking: Booking = harness.get(&booking_id);
    assert_eq!(booking.status, BookingStatus::Current);
    let key: DigitalKey = harness.get(&booking.key_id);
    assert_eq!(key.status, KeyStatus::Active);
    let room: Room = harness.get(&room);
    assert_eq!(room.condition, RoomCondition::Occupied);
}

#[tokio::test]
async fn late_checkout_moves_key_expiry_and_flags_turnover() {
    let harness = Harness::new(at(1, 9));
    let room = harness.room("101").await;
    let booking_id = harness.book("booking-1", &room, at(10, 15), at(13, 10)).await;
    harness.settle_in(&booking_id).await;

    harness
        .run::<Booking>(
            &booking_id,
            Action::ExtendStay {
                new_check_out: at(13, 13),
                unit: ExtensionUnit::Hours,
            },
        )
        .await;

    let booking: Booking = harness.get(&booking_id);
    assert_eq!(booking.check_out, at(13, 13));
    assert_eq!(
        booking.extension,
        Some(StayExtension {
            unit: ExtensionUnit::Hours,
            amount: 3
        })
    );
    let late = booking.charges.last().expect("late checkout charge");
    assert_eq!(late.description, "Late check-out (3h)");
    assert_eq!(late.amount, Money::from_dollars(75));
    let key: DigitalKey = harness.get(&booking.key_id);
    assert_eq!(key.expires_at, at(13, 13));

    harness.clock.set(at(13, 13));
    harness
        .run::<Booking>(&booking_id, Action::CheckOutReached)
        .await;

    let booking: Booking = harness.get(&booking_id);
    assert_eq!(booking.status, BookingStatus::Past);
    let key: DigitalKey = harness.get(&booking.key_id);
    assert_eq!(key.status, KeyStatus::Expired);
    let room: Room = harness.get(&room);
    assert_eq!(room.condition, RoomCondition::Dirty);

    let tasks = harness
        .store
        .scan(EntityKind::HousekeepingTask)
        .expect("scan");
    assert_eq!(tasks.len(), 1);
    let task = HousekeepingTask::from_entity(tasks[0].entity.clone()).expect("task");
    assert_eq!(task.priority, CleaningPriority::LateCheckout);
    assert_eq!(task.booking_id, Some(booking_id));
}

#[tokio::test]
async fn checkout_with_uncollected_bond_is_urgent() {
    let harness = Harness::new(at(1, 9));
    let room = harness.room("101").await;
    let booking_id = harness.book("booking-1", &room, at(10, 15), at(13, 10)).await;

    harness.clock.set(at(10, 15));
    harness
        .run::<Booking>(&booking_id, Action::CheckInReached)
        .await;
    harness.clock.set(at(13, 10));
    harness
        .run::<Booking>(&booking_id, Action::CheckOutReached)
        .await;

    let tasks = harness
        .store
        .scan(EntityKind::HousekeepingTask)
        .expect("scan");
    let task = HousekeepingTask::from_entity(tasks[0].entity.clone()).expect("task");
    assert_eq!(task.priority, CleaningPriority::Urgent);
}

#[tokio::test]
async fn payments_settle_and_new_charges_reopen_the_balance() {
    let harness = Harness::new(at(1, 9));
    let room = harness.room("101").await;
    let booking_id = harness.book("booking-1", &room, at(10, 15), at(13, 10)).await;

    harness
        .run::<Booking>(
            &booking_id,
            Action::AddCharge {
                kind: ChargeKind::Extra,
                description: "Parking".to_string(),
                amount: Money::from_dollars(30),
            },
        )
        .await;
    let accommodation = harness.get::<Booking>(&booking_id).charges[0].id.clone();

    harness
        .run::<Booking>(
            &booking_id,
            Action::RecordPayment {
                charge_ids: vec![accommodation],
            },
        )
        .await;
    assert_eq!(
        harness.get::<Booking>(&booking_id).payment_status,
        PaymentStatus::Partial
    );

    harness
        .run::<Booking>(&booking_id, Action::RecordPayment { charge_ids: Vec::new() })
        .await;
    assert_eq!(
        harness.get::<Booking>(&booking_id).payment_status,
        PaymentStatus::Paid
    );

    let nothing_owed = harness
        .try_run::<Booking>(&booking_id, Action::RecordPayment { charge_ids: Vec::new() })
        .await;
    assert!(matches!(nothing_owed, Err(OrchestratorError::InvalidCommand(_))));

    harness
        .run::<Booking>(
            &booking_id,
            Action::AddCharge {
                kind: ChargeKind::Extra,
                description: "Minibar".to_string(),
                amount: Money::from_dollars(15),
            },
        )
        .await;
    assert_eq!(
        harness.get::<Booking>(&booking_id).payment_status,
        PaymentStatus::Partial
    );

    let forged = harness
        .try_run::<Booking>(
            &booking_id,
            Action::AddCharge {
                kind: ChargeKind::Bond,
                description: "Manual bond".to_string(),
                amount: Money::from_dollars(15),
            },
        )
        .await;
    assert!(matches!(forged, Err(OrchestratorError::InvalidCommand(_))));
}

#[tokio::test]
async fn cancelling_revokes_the_key_and_refunds() {
    let harness = Harness::new(at(1, 9));
    let room = harness.room("101").await;
    let booking_id = harness.book("booking-1", &room, at(10, 15), at(13, 10)).await;
    harness
        .run::<Booking>(&booking_id, Action::CollectBond)
        .await;
    harness
        .run::<Booking>(&booking_id, Action::RecordPayment { charge_ids: Vec::new() })
        .await;

    let applied = harness
        .run::<Booking>(
            &booking_id,
            Action::CancelBooking {
                reason: Some("guest request".to_string()),
            },
        )
        .await;
    assert!(has_event(&applied.events, |kind| matches!(
        kind,
        EventKind::KeyRevoked { .. }
    )));

    let booking: Booking = harness.get(&booking_id);
    assert_eq!(booking.status, BookingStatus::Cancelled);
    assert_eq!(booking.bond_status, BondStatus::Refunded);
    assert_eq!(booking.payment_status, PaymentStatus::Refunded);
    let key: DigitalKey = harness.get(&booking.key_id);
    assert_eq!(key.status, KeyStatus::Revoked);

    harness.clock.set(at(10, 15));
    match harness
        .try_run::<Booking>(&booking_id, Action::CheckInReached)
        .await
    {
        Err(OrchestratorError::InvalidTransition(err)) => {
            assert_eq!(err.from, "cancelled");
            assert_eq!(err.event, "check_in_reached");
        }
        other => panic!("expected invalid transition, got {other:?}"),
    }
}
