use super::effects::{self, Origin};
use super::error::OrchestratorError;
use super::tx::Tx;
use crate::lifecycle::domain::{
    BondClaim, BondStatus, Booking, ClaimStatus, DamageKind, EntityId, EntityRef, Money,
    StoredEntity, Version,
};
use crate::lifecycle::machines::{ClaimEvent, ClaimMachine, InvalidTransition, MachineKind};

pub(super) struct NewClaim {
    pub booking_id: EntityId,
    pub kind: DamageKind,
    pub description: String,
    pub amount: Money,
    pub urgent: bool,
}

/// Files a claim against a held bond. The claim may not ask for more than the bond.
pub(super) fn submit(
    tx: &mut Tx<'_>,
    id: Option<EntityId>,
    request: NewClaim,
) -> Result<EntityRef, OrchestratorError> {
    let booking: Booking = tx.load(&request.booking_id)?;
    if booking.bond_status != BondStatus::Held {
        return Err(InvalidTransition::new(
            MachineKind::BondStatus,
            booking.bond_status.label(),
            "submit_bond_claim",
        )
        .into());
    }
    if !request.amount.is_positive() {
        return Err(OrchestratorError::invalid("claim amount must be positive"));
    }
    if request.amount > booking.bond_amount {
        return Err(OrchestratorError::invalid(format!(
            "claim of {} exceeds the {} bond",
            request.amount, booking.bond_amount
        )));
    }

    let id = id.unwrap_or_else(EntityId::generate);
    if tx.find::<BondClaim>(&id)?.is_some() {
        return Err(OrchestratorError::invalid(format!("claim {id} already exists")));
    }
    let claim = BondClaim {
        id,
        booking_id: booking.id.clone(),
        kind: request.kind,
        description: request.description,
        amount: request.amount,
        urgent: request.urgent,
        status: ClaimStatus::Submitted,
        created_at: tx.now(),
    };
    let entity = claim.entity_ref();
    tx.put(claim.clone());
    tx.created(&claim);
    Ok(entity)
}

pub(super) fn decide(
    tx: &mut Tx<'_>,
    id: &EntityId,
    expected: Version,
    event: ClaimEvent,
) -> Result<EntityRef, OrchestratorError> {
    let mut claim: BondClaim = tx.load_primary(id, expected)?;
    let entity = claim.entity_ref();
    let transition = tx.transition::<ClaimMachine>(&entity, claim.status, event)?;
    claim.status = transition.to;
    tx.put(claim.clone());
    effects::apply(tx, transition.effects, &Origin::Claim(&claim))?;
    Ok(entity)
}
