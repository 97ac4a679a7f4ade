//! Append-only audit log and clause edit history
//!
//! Both record types are insert-only; the store exposes no update or delete
//! path for them.

use crate::contract::TimeStamp;
use chrono::Utc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum AuditAction {
    #[n(0)]
    ContractCreated,
    #[n(1)]
    StatusChanged,
    #[n(2)]
    ClausesUpdated,
    #[n(3)]
    ModificationBlocked,
    #[n(4)]
    SignatureCaptured,
    #[n(5)]
    ContractFinalized,
    #[n(6)]
    ContractRevoked,
    #[n(7)]
    AmendmentCreated,
    #[n(8)]
    LinkIssued,
    #[n(9)]
    LinksRevoked,
    #[n(10)]
    SoftDeleted,
    #[n(11)]
    TransitionBlocked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::ContractCreated => "CONTRACT_CREATED",
            AuditAction::StatusChanged => "STATUS_CHANGED",
            AuditAction::ClausesUpdated => "CLAUSES_UPDATED",
            AuditAction::ModificationBlocked => "MODIFICATION_BLOCKED",
            AuditAction::SignatureCaptured => "SIGNATURE_CAPTURED",
            AuditAction::ContractFinalized => "CONTRACT_FINALIZED",
            AuditAction::ContractRevoked => "CONTRACT_REVOKED",
            AuditAction::AmendmentCreated => "AMENDMENT_CREATED",
            AuditAction::LinkIssued => "LINK_ISSUED",
            AuditAction::LinksRevoked => "LINKS_REVOKED",
            AuditAction::SoftDeleted => "SOFT_DELETED",
            AuditAction::TransitionBlocked => "TRANSITION_BLOCKED",
        }
    }
}

/// One append-only audit record. The detail is a free-form structured string
/// (key=value pairs); signature images never appear here.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct AuditEntry {
    #[n(0)]
    pub contract_id: String,
    #[n(1)]
    pub action: AuditAction,
    #[n(2)]
    pub actor_id: String,
    #[n(3)]
    pub detail: String,
    #[n(4)]
    pub at: TimeStamp<Utc>,
}

impl AuditEntry {
    pub fn new(contract_id: &str, action: AuditAction, actor_id: &str, detail: String) -> Self {
        Self {
            contract_id: contract_id.to_string(),
            action,
            actor_id: actor_id.to_string(),
            detail,
            at: TimeStamp::new(),
        }
    }
}

/// Snapshot of the clause blob as it was before an edit, so the edit trail
/// of a draft can be reconstructed.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct ClauseHistoryEntry {
    #[n(0)]
    pub contract_id: String,
    #[n(1)]
    pub previous_clauses: Vec<u8>,
    #[n(2)]
    pub edited_by: String,
    #[n(3)]
    pub ip: String,
    #[n(4)]
    pub user_agent: String,
    #[n(5)]
    pub at: TimeStamp<Utc>,
}
