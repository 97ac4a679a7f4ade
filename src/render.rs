//! External collaborator interfaces: document rendering and notifications
use crate::contract::{AgencyInfo, Contract, LeaseTerms, PartyInfo, SignatureSlot};
use crate::links::SignatureLink;

/// Produces the human-readable document bytes that get hashed. Re-rendering
/// identical signed state must yield identical bytes, so volatile data
/// (current time, render counters) must not leak into the output.
pub trait DocumentRenderer: Send + Sync {
    fn render_provisional(&self, contract: &Contract) -> anyhow::Result<Vec<u8>>;
    fn render_final(&self, contract: &Contract) -> anyhow::Result<Vec<u8>>;
}

/// Fire-and-forget invitation delivery. Failures are logged by the caller
/// and never roll back link issuance.
pub trait NotificationDispatch: Send + Sync {
    fn send_signing_invitation(&self, link: &SignatureLink, url: &str) -> anyhow::Result<()>;
}

/// Stable CBOR projection of the contract content that a rendering covers.
/// Hashes and soft-delete bookkeeping are excluded: the hash cannot cover
/// itself, and deletion must not change what was signed.
#[derive(minicbor::Encode)]
struct RenderBody<'a> {
    #[n(0)]
    token: Option<&'a str>,
    #[n(1)]
    terms: &'a LeaseTerms,
    #[n(2)]
    tenant: &'a PartyInfo,
    #[n(3)]
    owner: &'a PartyInfo,
    #[n(4)]
    agency: &'a Option<AgencyInfo>,
    #[n(5)]
    broker_registration: &'a Option<String>,
    #[n(6)]
    property_id: &'a Option<String>,
    #[n(7)]
    clauses: &'a Option<Vec<u8>>,
    #[n(8)]
    signatures: Option<[&'a Option<SignatureSlot>; 4]>,
}

/// Deterministic renderer encoding the contract content as canonical CBOR.
/// Stands in for the real PDF pipeline, which lives outside this engine.
pub struct CborRenderer;

impl CborRenderer {
    fn render(&self, contract: &Contract, with_signatures: bool) -> anyhow::Result<Vec<u8>> {
        let signatures = with_signatures.then_some([
            &contract.tenant_signature,
            &contract.owner_signature,
            &contract.agency_signature,
            &contract.witness_signature,
        ]);

        let body = RenderBody {
            token: contract.token.as_deref(),
            terms: &contract.terms,
            tenant: &contract.tenant,
            owner: &contract.owner,
            agency: &contract.agency,
            broker_registration: &contract.broker_registration,
            property_id: &contract.property_id,
            clauses: &contract.clauses,
            signatures,
        };

        Ok(minicbor::to_vec(&body)?)
    }
}

impl DocumentRenderer for CborRenderer {
    fn render_provisional(&self, contract: &Contract) -> anyhow::Result<Vec<u8>> {
        self.render(contract, false)
    }

    fn render_final(&self, contract: &Contract) -> anyhow::Result<Vec<u8>> {
        self.render(contract, true)
    }
}
