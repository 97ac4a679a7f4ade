//! Public, anonymized verification read model
//!
//! Built for unauthenticated third parties: reports signature presence and
//! timestamps only, never images, raw coordinates or contact details.

use crate::contract::{Contract, ContractState, SignerRole, TimeStamp};
use crate::error::ContractError;
use chrono::Utc;

/// Base URL third parties use to re-check a contract token.
pub const VERIFICATION_BASE_URL: &str = "https://mr3x.app/verify";

/// Masked evidence about one signature slot.
#[derive(Debug, Clone, PartialEq)]
pub struct SignatureEvidence {
    pub signed: bool,
    pub signed_at: Option<TimeStamp<Utc>>,
    pub has_geolocation: bool,
    pub has_ip: bool,
}

/// Anonymized trust summary for a contract.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationSummary {
    pub token: String,
    pub status: ContractState,
    pub valid: bool,
    pub tenant: SignatureEvidence,
    pub owner: SignatureEvidence,
    pub agency: SignatureEvidence,
    pub witness: SignatureEvidence,
    pub verification_url: String,
}

fn evidence(contract: &Contract, role: SignerRole) -> SignatureEvidence {
    match contract.signature(role) {
        Some(slot) => SignatureEvidence {
            signed: true,
            signed_at: Some(slot.signed_at.clone()),
            has_geolocation: slot.geolocation.consent,
            has_ip: !slot.ip.is_empty(),
        },
        None => SignatureEvidence {
            signed: false,
            signed_at: None,
            has_geolocation: false,
            has_ip: false,
        },
    }
}

impl VerificationSummary {
    /// Requires a public token; contracts that never entered signing have
    /// nothing to verify.
    pub fn from_contract(contract: &Contract) -> Result<Self, ContractError> {
        let token = contract.token.clone().ok_or(ContractError::NotFound)?;

        let valid = contract.tenant_signature.is_some()
            && contract.owner_signature.is_some()
            && matches!(
                contract.state,
                ContractState::Signed | ContractState::Active
            );

        Ok(Self {
            verification_url: format!("{VERIFICATION_BASE_URL}/{token}"),
            token,
            status: contract.state,
            valid,
            tenant: evidence(contract, SignerRole::Tenant),
            owner: evidence(contract, SignerRole::Owner),
            agency: evidence(contract, SignerRole::Agency),
            witness: evidence(contract, SignerRole::Witness),
        })
    }
}
