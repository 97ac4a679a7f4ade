//! Contract state machine and per-state field mutability enforcement
//!
//! Both the transition table and the per-state allow-lists are plain data so
//! the whole machine can be exercised by iterating (state, field) pairs.

use crate::contract::{
    AgencyInfo, Contract, ContractState, LeaseTerms, PartyInfo, TimeStamp,
};
use crate::error::ContractError;
use chrono::Utc;

/// Tag for every field a patch may touch. `Status` and `SoftDelete` are meta
/// fields permitted in every state; `Signature` writes never travel through
/// the patch path (see [`crate::service`] capture), the tag exists so the
/// allow-list table is complete.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    StartDate,
    EndDate,
    MonthlyRent,
    Deposit,
    DueDay,
    LateFee,
    Interest,
    EarlyTerminationPenalty,
    ReadjustmentIndex,
    Clauses,
    Tenant,
    Owner,
    Agency,
    BrokerRegistration,
    PropertyId,
    Signature,
    Status,
    SoftDelete,
}

impl Field {
    pub fn name(&self) -> &'static str {
        match self {
            Field::StartDate => "startDate",
            Field::EndDate => "endDate",
            Field::MonthlyRent => "monthlyRent",
            Field::Deposit => "depositAmount",
            Field::DueDay => "dueDay",
            Field::LateFee => "lateFeePercent",
            Field::Interest => "interestPercent",
            Field::EarlyTerminationPenalty => "earlyTerminationPenalty",
            Field::ReadjustmentIndex => "readjustmentIndex",
            Field::Clauses => "clauses",
            Field::Tenant => "tenant",
            Field::Owner => "owner",
            Field::Agency => "agency",
            Field::BrokerRegistration => "brokerRegistration",
            Field::PropertyId => "propertyId",
            Field::Signature => "signature",
            Field::Status => "status",
            Field::SoftDelete => "softDelete",
        }
    }

    /// Meta fields bypass the per-state table; they progress the state
    /// machine or record soft-delete bookkeeping.
    pub fn is_meta(&self) -> bool {
        matches!(self, Field::Status | Field::SoftDelete)
    }

    pub const ALL: [Field; 18] = [
        Field::StartDate,
        Field::EndDate,
        Field::MonthlyRent,
        Field::Deposit,
        Field::DueDay,
        Field::LateFee,
        Field::Interest,
        Field::EarlyTerminationPenalty,
        Field::ReadjustmentIndex,
        Field::Clauses,
        Field::Tenant,
        Field::Owner,
        Field::Agency,
        Field::BrokerRegistration,
        Field::PropertyId,
        Field::Signature,
        Field::Status,
        Field::SoftDelete,
    ];
}

/// A single requested field write carrying its new value.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldWrite {
    StartDate(TimeStamp<Utc>),
    EndDate(TimeStamp<Utc>),
    MonthlyRent(u64),
    Deposit(u64),
    DueDay(u8),
    LateFee(u32),
    Interest(u32),
    EarlyTerminationPenalty(u32),
    ReadjustmentIndex(String),
    Clauses(Vec<u8>),
    Tenant(PartyInfo),
    Owner(PartyInfo),
    Agency(Option<AgencyInfo>),
    BrokerRegistration(String),
    PropertyId(String),
    Status(ContractState),
    SoftDelete { deleted_by: String },
}

impl FieldWrite {
    pub fn field(&self) -> Field {
        match self {
            FieldWrite::StartDate(_) => Field::StartDate,
            FieldWrite::EndDate(_) => Field::EndDate,
            FieldWrite::MonthlyRent(_) => Field::MonthlyRent,
            FieldWrite::Deposit(_) => Field::Deposit,
            FieldWrite::DueDay(_) => Field::DueDay,
            FieldWrite::LateFee(_) => Field::LateFee,
            FieldWrite::Interest(_) => Field::Interest,
            FieldWrite::EarlyTerminationPenalty(_) => Field::EarlyTerminationPenalty,
            FieldWrite::ReadjustmentIndex(_) => Field::ReadjustmentIndex,
            FieldWrite::Clauses(_) => Field::Clauses,
            FieldWrite::Tenant(_) => Field::Tenant,
            FieldWrite::Owner(_) => Field::Owner,
            FieldWrite::Agency(_) => Field::Agency,
            FieldWrite::BrokerRegistration(_) => Field::BrokerRegistration,
            FieldWrite::PropertyId(_) => Field::PropertyId,
            FieldWrite::Status(_) => Field::Status,
            FieldWrite::SoftDelete { .. } => Field::SoftDelete,
        }
    }
}

/// Directed transition table; any pair not listed here is rejected.
pub const TRANSITIONS: &[(ContractState, &[ContractState])] = &[
    (
        ContractState::Draft,
        &[ContractState::AwaitingSignatures, ContractState::Revoked],
    ),
    (
        ContractState::AwaitingSignatures,
        &[
            ContractState::Signed,
            ContractState::Revoked,
            ContractState::Draft,
        ],
    ),
    (
        ContractState::Signed,
        &[ContractState::Active, ContractState::Revoked],
    ),
    (
        ContractState::Active,
        &[ContractState::Terminated, ContractState::Revoked],
    ),
    (ContractState::Revoked, &[]),
    (ContractState::Terminated, &[]),
];

pub fn transition_allowed(from: ContractState, to: ContractState) -> bool {
    TRANSITIONS
        .iter()
        .find(|(state, _)| *state == from)
        .is_some_and(|(_, targets)| targets.contains(&to))
}

pub fn check_transition(from: ContractState, to: ContractState) -> Result<(), ContractError> {
    if transition_allowed(from, to) {
        Ok(())
    } else {
        Err(ContractError::InvalidTransition { from, to })
    }
}

/// Per-state mutability as an explicit allow-list. Meta fields (status,
/// soft-delete) are permitted everywhere and intentionally absent here.
pub fn allowed_fields(state: ContractState) -> &'static [Field] {
    match state {
        ContractState::Draft => &[
            Field::StartDate,
            Field::EndDate,
            Field::MonthlyRent,
            Field::Deposit,
            Field::DueDay,
            Field::LateFee,
            Field::Interest,
            Field::EarlyTerminationPenalty,
            Field::ReadjustmentIndex,
            Field::Clauses,
            Field::Tenant,
            Field::Owner,
            Field::Agency,
            Field::BrokerRegistration,
            Field::PropertyId,
        ],
        ContractState::AwaitingSignatures => &[Field::Signature],
        ContractState::Signed
        | ContractState::Active
        | ContractState::Revoked
        | ContractState::Terminated => &[],
    }
}

/// Whether a patch touching `field` would be accepted in `state`. The final
/// hash, once present, overrides the per-state table for any non-draft
/// contract.
pub fn field_writable(state: ContractState, field: Field, sealed: bool) -> bool {
    if field.is_meta() {
        return true;
    }
    if sealed && state != ContractState::Draft {
        return false;
    }
    allowed_fields(state).contains(&field)
}

/// Result of a successfully applied patch, fed back to the caller so audit
/// and clause-history records can be appended.
#[derive(Debug, Default)]
pub struct PatchOutcome {
    pub status_change: Option<(ContractState, ContractState)>,
    pub previous_clauses: Option<Vec<u8>>,
    pub applied: Vec<&'static str>,
}

/// Enforcement contract for "apply update": validate any status change
/// against the transition table, apply the hash-presence override, then check
/// every field against the current state's allow-list. All or nothing: a
/// single blocked field rejects the entire patch.
pub fn apply_patch(
    contract: &mut Contract,
    writes: &[FieldWrite],
) -> Result<PatchOutcome, ContractError> {
    let current = contract.state;

    let requested_state = writes.iter().find_map(|w| match w {
        FieldWrite::Status(next) => Some(*next),
        _ => None,
    });
    if let Some(next) = requested_state {
        check_transition(current, next)?;
    }

    let blocked: Vec<String> = writes
        .iter()
        .map(FieldWrite::field)
        .filter(|f| !field_writable(current, *f, contract.is_sealed()))
        .map(|f| f.name().to_string())
        .collect();
    if !blocked.is_empty() {
        return Err(ContractError::FieldImmutable {
            state: current,
            fields: blocked,
        });
    }

    let mut outcome = PatchOutcome::default();
    for write in writes {
        outcome.applied.push(write.field().name());
        match write {
            FieldWrite::StartDate(v) => contract.terms.start_date = Some(v.clone()),
            FieldWrite::EndDate(v) => contract.terms.end_date = Some(v.clone()),
            FieldWrite::MonthlyRent(v) => contract.terms.monthly_rent_cents = *v,
            FieldWrite::Deposit(v) => contract.terms.deposit_cents = *v,
            FieldWrite::DueDay(v) => contract.terms.due_day = Some(*v),
            FieldWrite::LateFee(v) => contract.terms.late_fee_bps = *v,
            FieldWrite::Interest(v) => contract.terms.interest_bps = *v,
            FieldWrite::EarlyTerminationPenalty(v) => {
                contract.terms.early_termination_months = *v
            }
            FieldWrite::ReadjustmentIndex(v) => {
                contract.terms.readjustment_index = Some(v.clone())
            }
            FieldWrite::Clauses(v) => {
                outcome.previous_clauses = contract.clauses.replace(v.clone());
            }
            FieldWrite::Tenant(v) => contract.tenant = v.clone(),
            FieldWrite::Owner(v) => contract.owner = v.clone(),
            FieldWrite::Agency(v) => contract.agency = v.clone(),
            FieldWrite::BrokerRegistration(v) => {
                contract.broker_registration = Some(v.clone())
            }
            FieldWrite::PropertyId(v) => contract.property_id = Some(v.clone()),
            FieldWrite::Status(next) => {
                outcome.status_change = Some((current, *next));
                contract.state = *next;
            }
            FieldWrite::SoftDelete { deleted_by } => {
                contract.deleted = true;
                contract.deleted_at = Some(TimeStamp::new());
                contract.deleted_by = Some(deleted_by.clone());
            }
        }
    }

    Ok(outcome)
}

/// Read-side capability report: what can currently be done to a contract and
/// why not, as a pure function of state, hash presence and filled slots.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Capabilities {
    pub can_edit: bool,
    pub can_delete: bool,
    pub can_sign: bool,
    pub can_revoke: bool,
    pub can_finalize: bool,
    pub reason: String,
}

pub fn capabilities(contract: &Contract) -> Capabilities {
    let state = contract.state;
    let sealed = contract.is_sealed();

    let can_edit = state == ContractState::Draft && !sealed;
    let can_sign = state == ContractState::AwaitingSignatures;
    let can_finalize = can_sign && contract.all_required_signed();
    let can_revoke = transition_allowed(state, ContractState::Revoked);

    let can_delete = match state {
        ContractState::Revoked | ContractState::Terminated => false,
        ContractState::AwaitingSignatures => !contract.any_signature_present(),
        _ => !sealed,
    };

    let reason = if sealed {
        format!(
            "contract is sealed by its final hash (state: {})",
            state.as_str()
        )
    } else {
        match state {
            ContractState::Draft => "draft contract; terms and clauses are editable".to_string(),
            ContractState::AwaitingSignatures if contract.any_signature_present() => {
                "signature collection in progress; signed slots lock the record".to_string()
            }
            ContractState::AwaitingSignatures => {
                "awaiting signatures; only signature slots may be written".to_string()
            }
            other => format!("contract is frozen in state {}", other.as_str()),
        }
    };

    Capabilities {
        can_edit,
        can_delete,
        can_sign,
        can_revoke,
        can_finalize,
        reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn draft() -> Contract {
        Contract::new("lease_test".to_string())
    }

    const STATES: [ContractState; 6] = [
        ContractState::Draft,
        ContractState::AwaitingSignatures,
        ContractState::Signed,
        ContractState::Active,
        ContractState::Revoked,
        ContractState::Terminated,
    ];

    #[test]
    fn terminal_states_have_no_exits() {
        for from in [ContractState::Revoked, ContractState::Terminated] {
            for to in STATES {
                assert!(!transition_allowed(from, to));
            }
        }
    }

    #[test]
    fn draft_accepts_term_writes() {
        let mut contract = draft();
        let outcome = apply_patch(
            &mut contract,
            &[
                FieldWrite::MonthlyRent(150_000),
                FieldWrite::DueDay(10),
            ],
        )
        .unwrap();

        assert_eq!(contract.terms.monthly_rent_cents, 150_000);
        assert_eq!(outcome.applied, vec!["monthlyRent", "dueDay"]);
    }

    #[test]
    fn awaiting_rejects_term_writes_with_named_fields() {
        let mut contract = draft();
        contract.state = ContractState::AwaitingSignatures;

        let err = apply_patch(&mut contract, &[FieldWrite::MonthlyRent(1)]).unwrap_err();
        match err {
            ContractError::FieldImmutable { fields, .. } => {
                assert_eq!(fields, vec!["monthlyRent".to_string()]);
            }
            other => panic!("expected FieldImmutable, got {other:?}"),
        }
        // nothing was applied
        assert_eq!(contract.terms.monthly_rent_cents, 0);
    }

    #[test]
    fn blocked_patch_applies_nothing() {
        let mut contract = draft();
        contract.state = ContractState::Signed;

        let err = apply_patch(
            &mut contract,
            &[
                FieldWrite::Status(ContractState::Active),
                FieldWrite::MonthlyRent(1),
            ],
        )
        .unwrap_err();

        assert!(matches!(err, ContractError::FieldImmutable { .. }));
        assert_eq!(contract.state, ContractState::Signed);
    }

    #[test]
    fn sealed_contract_only_accepts_meta_fields() {
        let mut contract = draft();
        contract.state = ContractState::Signed;
        contract.final_hash = Some("ab".repeat(32));

        assert!(apply_patch(&mut contract, &[FieldWrite::Status(ContractState::Active)]).is_ok());
        assert!(apply_patch(&mut contract, &[FieldWrite::DueDay(5)]).is_err());
    }

    #[test]
    fn status_change_must_be_in_table() {
        let mut contract = draft();
        let err =
            apply_patch(&mut contract, &[FieldWrite::Status(ContractState::Active)]).unwrap_err();
        assert!(matches!(err, ContractError::InvalidTransition { .. }));
    }

    #[test]
    fn clause_write_reports_previous_snapshot() {
        let mut contract = draft();
        apply_patch(&mut contract, &[FieldWrite::Clauses(vec![1, 2])]).unwrap();
        let outcome = apply_patch(&mut contract, &[FieldWrite::Clauses(vec![3])]).unwrap();

        assert_eq!(outcome.previous_clauses, Some(vec![1, 2]));
        assert_eq!(contract.clauses, Some(vec![3]));
    }

    #[test]
    fn delete_blocked_once_any_slot_filled() {
        let mut contract = draft();
        contract.state = ContractState::AwaitingSignatures;
        assert!(capabilities(&contract).can_delete);

        contract.witness_signature = Some(crate::contract::SignatureSlot {
            image: vec![0],
            signed_at: TimeStamp::new(),
            ip: "198.51.100.1".into(),
            user_agent: "t".into(),
            geolocation: crate::contract::Geolocation {
                lat: 0.0,
                lng: 0.0,
                consent: true,
            },
            witness_identity: Some("w".into()),
        });
        assert!(!capabilities(&contract).can_delete);
    }

    #[test]
    fn delete_forbidden_in_terminal_states() {
        let mut contract = draft();
        contract.state = ContractState::Revoked;
        assert!(!capabilities(&contract).can_delete);
        contract.state = ContractState::Terminated;
        assert!(!capabilities(&contract).can_delete);
    }
}
