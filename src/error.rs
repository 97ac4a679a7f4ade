use crate::contract::{ContractState, SignerRole};
use crate::links::LinkRejection;
use crate::validation::ValidationIssue;

/// Typed business-rule failures. Service operations wrap these in
/// `anyhow::Error`; callers may downcast to branch on the variant.
#[derive(thiserror::Error, Debug)]
pub enum ContractError {
    #[error("contract not found")]
    NotFound,

    #[error("transition not permitted: {} -> {}", from.as_str(), to.as_str())]
    InvalidTransition {
        from: ContractState,
        to: ContractState,
    },

    #[error("fields immutable in state {}: {}", state.as_str(), fields.join(", "))]
    FieldImmutable {
        state: ContractState,
        fields: Vec<String>,
    },

    #[error("contract failed legal validation with {} error(s)", errors.len())]
    ValidationFailed { errors: Vec<ValidationIssue> },

    #[error("signature slot for {} is already filled", role.as_str())]
    DuplicateSignature { role: SignerRole },

    #[error("signature link rejected: {0}")]
    LinkInvalid(LinkRejection),

    #[error("geolocation coordinates and explicit consent are required to sign")]
    GeolocationRequired,

    #[error("contract is not awaiting signatures (state: {})", state.as_str())]
    NotAwaitingSignatures { state: ContractState },

    #[error("signature slot for {} is not expected on this contract", role.as_str())]
    UnexpectedRole { role: SignerRole },

    #[error("not all required signature slots are filled")]
    SignaturesIncomplete,

    #[error("signatures already captured; the draft cannot be reopened")]
    SignaturesInProgress,

    #[error("contract has not been finalized")]
    NotFinalized,

    #[error("contract was modified while its document was being rendered")]
    ConcurrentUpdate,

    #[error("contract token {token} is already in use")]
    DuplicateToken { token: String },

    #[error("contract cannot be deleted: {reason}")]
    DeleteBlocked { reason: String },

    #[error("amendment not allowed: {reason}")]
    AmendmentNotAllowed { reason: String },
}
