//! Service layer API for contract lifecycle operations
use crate::audit::{AuditAction, AuditEntry, ClauseHistoryEntry};
use crate::contract::{
    AgencyInfo, Contract, ContractState, Geolocation, LeaseTerms, PartyInfo, SignatureSlot,
    SignerRole, TimeStamp,
};
use crate::error::ContractError;
use crate::hashing::{self, VerificationOutcome};
use crate::links::{LinkRejection, LinkValidation, PartyInvite, SignatureLink};
use crate::render::{DocumentRenderer, NotificationDispatch};
use crate::state::{self, Capabilities, FieldWrite};
use crate::store::ContractStore;
use crate::utils;
use crate::validation::{self, ValidationReport};
use crate::verify::VerificationSummary;
use chrono::{Datelike, Duration, Utc};
use std::sync::Arc;
use tracing::{info, warn};

/// Base URL embedded in signing invitations.
pub const SIGNING_BASE_URL: &str = "https://mr3x.app/sign";

/// Input for creating a draft contract.
#[derive(Debug, Clone, Default)]
pub struct NewContract {
    pub terms: LeaseTerms,
    pub tenant: PartyInfo,
    pub owner: PartyInfo,
    pub agency: Option<AgencyInfo>,
    pub broker_registration: Option<String>,
    pub property_id: Option<String>,
    pub clauses: Option<Vec<u8>>,
}

/// Everything a signature submission must carry. Geolocation is part of the
/// type, so a caller cannot forget it.
#[derive(Debug, Clone)]
pub struct SignaturePayload {
    pub image: Vec<u8>,
    pub geolocation: Geolocation,
    pub ip: String,
    pub user_agent: String,
    pub witness_identity: Option<String>,
}

pub struct ContractService {
    store: ContractStore,
    renderer: Arc<dyn DocumentRenderer>,
    notifier: Option<Arc<dyn NotificationDispatch>>,
    link_ttl: Duration,
}

impl ContractService {
    pub fn new(
        instance: Arc<sled::Db>,
        renderer: Arc<dyn DocumentRenderer>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            store: ContractStore::open(instance)?,
            renderer,
            notifier: None,
            link_ttl: crate::links::default_ttl(),
        })
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationDispatch>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_link_ttl(mut self, ttl: Duration) -> Self {
        self.link_ttl = ttl;
        self
    }

    fn audit(
        &self,
        contract_id: &str,
        action: AuditAction,
        actor_id: &str,
        detail: String,
    ) -> anyhow::Result<()> {
        self.store
            .append_audit(&AuditEntry::new(contract_id, action, actor_id, detail))
    }

    /// Rejected transitions are logged and audited, not just surfaced.
    fn audit_blocked_transition(
        &self,
        contract_id: &str,
        actor_id: &str,
        err: &anyhow::Error,
    ) -> anyhow::Result<()> {
        if let Some(ContractError::InvalidTransition { from, to }) =
            err.downcast_ref::<ContractError>()
        {
            warn!(
                contract_id,
                from = from.as_str(),
                to = to.as_str(),
                "transition blocked"
            );
            self.audit(
                contract_id,
                AuditAction::TransitionBlocked,
                actor_id,
                format!("from={} to={}", from.as_str(), to.as_str()),
            )?;
        }
        Ok(())
    }

    /// Create a new contract in draft state.
    pub fn create_contract(
        &self,
        input: NewContract,
        actor_id: &str,
    ) -> anyhow::Result<Contract> {
        let id = utils::new_uuid_to_bech32("lease")?;
        let mut contract = Contract::new(id);
        contract.terms = input.terms;
        contract.tenant = input.tenant;
        contract.owner = input.owner;
        contract.agency = input.agency;
        contract.broker_registration = input.broker_registration;
        contract.property_id = input.property_id;
        contract.clauses = input.clauses;

        self.store.insert_contract(&contract)?;
        self.audit(
            &contract.id,
            AuditAction::ContractCreated,
            actor_id,
            "state=DRAFT".to_string(),
        )?;
        info!(contract_id = %contract.id, "contract created");

        Ok(contract)
    }

    pub fn get_contract(&self, contract_id: &str) -> anyhow::Result<Contract> {
        self.store.load_contract(contract_id)
    }

    /// Apply a field patch under the state machine's mutability rules.
    /// Rejections are audited as MODIFICATION_BLOCKED before surfacing.
    pub fn update_contract(
        &self,
        contract_id: &str,
        writes: Vec<FieldWrite>,
        actor_id: &str,
        ip: &str,
        user_agent: &str,
    ) -> anyhow::Result<Contract> {
        let result = self
            .store
            .update_contract(contract_id, |c| state::apply_patch(c, &writes));

        match result {
            Ok((contract, outcome)) => {
                let clauses_written = writes
                    .iter()
                    .any(|w| matches!(w, FieldWrite::Clauses(_)));
                if clauses_written {
                    self.store.append_clause_history(&ClauseHistoryEntry {
                        contract_id: contract_id.to_string(),
                        previous_clauses: outcome.previous_clauses.unwrap_or_default(),
                        edited_by: actor_id.to_string(),
                        ip: ip.to_string(),
                        user_agent: user_agent.to_string(),
                        at: TimeStamp::new(),
                    })?;
                    self.audit(
                        contract_id,
                        AuditAction::ClausesUpdated,
                        actor_id,
                        format!("ip={ip}"),
                    )?;
                }
                if let Some((from, to)) = outcome.status_change {
                    self.audit(
                        contract_id,
                        AuditAction::StatusChanged,
                        actor_id,
                        format!("from={} to={}", from.as_str(), to.as_str()),
                    )?;
                }
                Ok(contract)
            }
            Err(err) => {
                if let Some(ContractError::FieldImmutable { fields, state }) =
                    err.downcast_ref::<ContractError>()
                {
                    warn!(contract_id, ?fields, "modification blocked");
                    self.audit(
                        contract_id,
                        AuditAction::ModificationBlocked,
                        actor_id,
                        format!(
                            "state={} blockedFields=[{}]",
                            state.as_str(),
                            fields.join(", ")
                        ),
                    )?;
                }
                self.audit_blocked_transition(contract_id, actor_id, &err)?;
                Err(err)
            }
        }
    }

    /// Gate a draft into the signing phase: run the legal validator, mint
    /// the public token, seal the provisional render and freeze the clause
    /// set by moving to AWAITING_SIGNATURES.
    pub fn prepare_for_signing(
        &self,
        contract_id: &str,
        actor_id: &str,
    ) -> anyhow::Result<Contract> {
        // the digest must cover exactly what gets committed, so a draft edit
        // landing mid-render restarts the render against the fresh record
        let contract = loop {
            let snapshot = self.store.load_contract(contract_id)?;
            if let Err(err) =
                state::check_transition(snapshot.state, ContractState::AwaitingSignatures)
            {
                let err = anyhow::Error::from(err);
                self.audit_blocked_transition(contract_id, actor_id, &err)?;
                return Err(err);
            }

            let report = validation::validate(&snapshot);
            if !report.valid {
                return Err(ContractError::ValidationFailed {
                    errors: report.errors,
                }
                .into());
            }

            let token = snapshot
                .token
                .clone()
                .unwrap_or_else(|| utils::new_contract_token(Utc::now().year()));

            // render against a staged copy so the digest covers the token
            let mut staged = snapshot.clone();
            staged.token = Some(token.clone());
            let rendered = self.renderer.render_provisional(&staged)?;
            let digest = hashing::compute_hash(&rendered);

            let result = self.store.update_contract(contract_id, |c| {
                if *c != snapshot {
                    return Err(ContractError::ConcurrentUpdate);
                }
                c.token = Some(token.clone());
                c.provisional_hash = Some(digest.clone());
                c.state = ContractState::AwaitingSignatures;
                Ok(())
            });

            match result {
                Ok((contract, ())) => break contract,
                Err(err)
                    if matches!(
                        err.downcast_ref::<ContractError>(),
                        Some(ContractError::ConcurrentUpdate)
                    ) =>
                {
                    continue;
                }
                Err(err) => return Err(err),
            }
        };

        self.audit(
            contract_id,
            AuditAction::StatusChanged,
            actor_id,
            format!(
                "from=DRAFT to=AWAITING_SIGNATURES token={}",
                contract.token.as_deref().unwrap_or("")
            ),
        )?;
        info!(contract_id, token = ?contract.token, "contract prepared for signing");

        Ok(contract)
    }

    /// The one allowed back-edge: reopen an unsigned collection round so the
    /// draft can be corrected. Blocked as soon as any slot is filled.
    pub fn reopen_draft(&self, contract_id: &str, actor_id: &str) -> anyhow::Result<Contract> {
        let result = self.store.update_contract(contract_id, |c| {
            state::check_transition(c.state, ContractState::Draft)?;
            if c.any_signature_present() {
                return Err(ContractError::SignaturesInProgress);
            }
            c.state = ContractState::Draft;
            c.provisional_hash = None;
            Ok(())
        });
        let (contract, _) = match result {
            Ok(ok) => ok,
            Err(err) => {
                self.audit_blocked_transition(contract_id, actor_id, &err)?;
                return Err(err);
            }
        };

        self.audit(
            contract_id,
            AuditAction::StatusChanged,
            actor_id,
            "from=AWAITING_SIGNATURES to=DRAFT".to_string(),
        )?;

        Ok(contract)
    }

    /// Issue signing invitations. Issuance is idempotent per (contract,
    /// role) while an unused, unexpired link exists; notification failures
    /// never roll back issuance.
    pub fn issue_signature_links(
        &self,
        contract_id: &str,
        parties: Vec<PartyInvite>,
    ) -> anyhow::Result<Vec<SignatureLink>> {
        let contract = self.store.load_contract(contract_id)?;
        if contract.state != ContractState::AwaitingSignatures {
            return Err(ContractError::NotAwaitingSignatures {
                state: contract.state,
            }
            .into());
        }

        let mut links = Vec::with_capacity(parties.len());
        for invite in parties {
            if invite.role == SignerRole::Agency && contract.agency.is_none() {
                return Err(ContractError::UnexpectedRole { role: invite.role }.into());
            }

            let candidate = SignatureLink::new(
                contract_id.to_string(),
                invite.role,
                invite.email,
                invite.name,
                self.link_ttl,
            )?;
            let (link, fresh) = self.store.issue_link(candidate)?;

            if fresh {
                self.audit(
                    contract_id,
                    AuditAction::LinkIssued,
                    "system",
                    format!("role={}", link.role.as_str()),
                )?;
                let url = format!("{SIGNING_BASE_URL}/{}", link.token);
                if let Some(notifier) = &self.notifier {
                    if let Err(err) = notifier.send_signing_invitation(&link, &url) {
                        warn!(
                            contract_id,
                            role = link.role.as_str(),
                            error = %err,
                            "signing invitation dispatch failed"
                        );
                    }
                }
            }
            links.push(link);
        }

        Ok(links)
    }

    /// Check a signature link without consuming it, distinguishing unknown,
    /// expired and already-used tokens.
    pub fn validate_signature_link(&self, token: &str) -> anyhow::Result<LinkValidation> {
        let link = self.store.load_link(token)?;
        if let Some(reason) = link.rejection() {
            return Err(ContractError::LinkInvalid(reason).into());
        }
        Ok(LinkValidation::from(&link))
    }

    /// Record one party's signature. The slot-fill check and the write run
    /// inside a single conditional update; when the capture completes the
    /// required set, finalization runs within the same logical operation.
    pub fn capture_signature(
        &self,
        contract_id: &str,
        role: SignerRole,
        payload: SignaturePayload,
        actor_id: &str,
    ) -> anyhow::Result<Contract> {
        if !payload.geolocation.consent || !payload.geolocation.in_range() {
            return Err(ContractError::GeolocationRequired.into());
        }

        let slot = SignatureSlot {
            image: payload.image,
            signed_at: TimeStamp::new(),
            ip: payload.ip.clone(),
            user_agent: payload.user_agent,
            geolocation: payload.geolocation.clone(),
            witness_identity: payload.witness_identity,
        };

        let (contract, completed) = self.store.update_contract(contract_id, |c| {
            if c.state != ContractState::AwaitingSignatures {
                return Err(ContractError::NotAwaitingSignatures { state: c.state });
            }
            if role == SignerRole::Agency && c.agency.is_none() {
                return Err(ContractError::UnexpectedRole { role });
            }
            if c.signature(role).is_some() {
                return Err(ContractError::DuplicateSignature { role });
            }
            *c.signature_mut(role) = Some(slot.clone());
            Ok(c.all_required_signed())
        })?;

        // the image never reaches the audit log
        self.audit(
            contract_id,
            AuditAction::SignatureCaptured,
            actor_id,
            format!(
                "role={} ip={} lat={} lng={}",
                role.as_str(),
                payload.ip,
                payload.geolocation.lat,
                payload.geolocation.lng
            ),
        )?;
        info!(contract_id, role = role.as_str(), "signature captured");

        // close the outstanding invitation for this role, if one exists
        if let Some(link) = self.store.link_for_role(contract_id, role)? {
            if link.rejection().is_none() {
                if let Err(err) = self.store.consume_link(&link.token) {
                    warn!(contract_id, error = %err, "failed to consume signature link");
                }
            }
        }

        if completed {
            return self.finalize(contract_id, actor_id);
        }
        Ok(contract)
    }

    /// Remote signing entry point: validate the capability token, capture
    /// the signature for its bound role, then retire the token.
    pub fn sign_via_link(
        &self,
        token: &str,
        payload: SignaturePayload,
    ) -> anyhow::Result<Contract> {
        let validation = self.validate_signature_link(token)?;
        let actor = format!("signer:{}", validation.email);
        let contract =
            self.capture_signature(&validation.contract_id, validation.role, payload, &actor)?;

        // capture consumes the indexed link; swallow the expected Used here
        if let Err(err) = self.store.consume_link(token) {
            match err.downcast_ref::<ContractError>() {
                Some(ContractError::LinkInvalid(LinkRejection::Used)) => {}
                _ => return Err(err),
            }
        }

        Ok(contract)
    }

    /// Seal a fully signed contract: render the final document, store its
    /// hash (write-once) and transition to SIGNED. The transition is the
    /// single-winner gate; a finalize that observes SIGNED already is a
    /// no-op, not an error.
    pub fn finalize(&self, contract_id: &str, actor_id: &str) -> anyhow::Result<Contract> {
        // a late capture (witness slots stay writable here) landing between
        // the render and the swap would seal a hash that no longer matches
        // the record, so the swap only commits over the exact snapshot that
        // was rendered
        loop {
            let snapshot = self.store.load_contract(contract_id)?;
            match snapshot.state {
                ContractState::Signed | ContractState::Active => return Ok(snapshot),
                ContractState::AwaitingSignatures => {}
                state => return Err(ContractError::NotAwaitingSignatures { state }.into()),
            }
            if !snapshot.all_required_signed() {
                return Err(ContractError::SignaturesIncomplete.into());
            }

            let rendered = self.renderer.render_final(&snapshot)?;
            let digest = hashing::compute_hash(&rendered);

            let result = self.store.update_contract(contract_id, |c| {
                match c.state {
                    ContractState::Signed | ContractState::Active => return Ok(false),
                    ContractState::AwaitingSignatures => {}
                    state => return Err(ContractError::NotAwaitingSignatures { state }),
                }
                if *c != snapshot {
                    return Err(ContractError::ConcurrentUpdate);
                }
                state::check_transition(c.state, ContractState::Signed)?;
                if c.final_hash.is_none() {
                    c.final_hash = Some(digest.clone());
                }
                c.state = ContractState::Signed;
                Ok(true)
            });

            match result {
                Ok((contract, won)) => {
                    if won {
                        self.audit(
                            contract_id,
                            AuditAction::ContractFinalized,
                            actor_id,
                            format!("hashFinal={digest}"),
                        )?;
                        info!(contract_id, "contract finalized and sealed");
                    }
                    return Ok(contract);
                }
                Err(err)
                    if matches!(
                        err.downcast_ref::<ContractError>(),
                        Some(ContractError::ConcurrentUpdate)
                    ) =>
                {
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Revoke a contract from any non-terminal state and close every
    /// outstanding signing invitation.
    pub fn revoke(
        &self,
        contract_id: &str,
        actor_id: &str,
        reason: Option<&str>,
    ) -> anyhow::Result<Contract> {
        let result = self.store.update_contract(contract_id, |c| {
            state::check_transition(c.state, ContractState::Revoked)?;
            c.state = ContractState::Revoked;
            Ok(())
        });
        let (contract, _) = match result {
            Ok(ok) => ok,
            Err(err) => {
                self.audit_blocked_transition(contract_id, actor_id, &err)?;
                return Err(err);
            }
        };

        let closed = self.store.revoke_links(contract_id)?;
        self.audit(
            contract_id,
            AuditAction::ContractRevoked,
            actor_id,
            format!("reason={}", reason.unwrap_or("unspecified")),
        )?;
        if closed > 0 {
            self.audit(
                contract_id,
                AuditAction::LinksRevoked,
                actor_id,
                format!("count={closed}"),
            )?;
        }
        info!(contract_id, closed_links = closed, "contract revoked");

        Ok(contract)
    }

    /// Move a signed contract into its active (in-force) period.
    pub fn activate(&self, contract_id: &str, actor_id: &str) -> anyhow::Result<Contract> {
        self.transition_to(contract_id, ContractState::Active, actor_id, String::new())
    }

    /// End an active contract at the close of its term.
    pub fn terminate(
        &self,
        contract_id: &str,
        actor_id: &str,
        reason: Option<&str>,
    ) -> anyhow::Result<Contract> {
        self.transition_to(
            contract_id,
            ContractState::Terminated,
            actor_id,
            format!("reason={}", reason.unwrap_or("term ended")),
        )
    }

    fn transition_to(
        &self,
        contract_id: &str,
        to: ContractState,
        actor_id: &str,
        detail: String,
    ) -> anyhow::Result<Contract> {
        let result = self.store.update_contract(contract_id, |c| {
            state::check_transition(c.state, to)?;
            let from = c.state;
            c.state = to;
            Ok(from)
        });
        let (contract, from) = match result {
            Ok(ok) => ok,
            Err(err) => {
                self.audit_blocked_transition(contract_id, actor_id, &err)?;
                return Err(err);
            }
        };

        self.audit(
            contract_id,
            AuditAction::StatusChanged,
            actor_id,
            format!("from={} to={} {detail}", from.as_str(), to.as_str()),
        )?;

        Ok(contract)
    }

    /// Soft-delete, gated by the capability query.
    pub fn soft_delete(&self, contract_id: &str, actor_id: &str) -> anyhow::Result<Contract> {
        let (contract, _) = self.store.update_contract(contract_id, |c| {
            let caps = state::capabilities(c);
            if !caps.can_delete {
                return Err(ContractError::DeleteBlocked {
                    reason: caps.reason,
                });
            }
            state::apply_patch(
                c,
                &[FieldWrite::SoftDelete {
                    deleted_by: actor_id.to_string(),
                }],
            )?;
            Ok(())
        })?;

        self.audit(contract_id, AuditAction::SoftDeleted, actor_id, String::new())?;

        Ok(contract)
    }

    /// Amend an immutable contract by creating a successor record. The
    /// original is never mutated; it only receives an audit cross-link.
    pub fn create_amendment(
        &self,
        original_id: &str,
        amendments: Vec<FieldWrite>,
        actor_id: &str,
    ) -> anyhow::Result<Contract> {
        let original = self.store.load_contract(original_id)?;
        let caps = state::capabilities(&original);
        if caps.can_edit {
            return Err(ContractError::AmendmentNotAllowed {
                reason: "contract is still editable; amend the draft directly".to_string(),
            }
            .into());
        }
        let original_token = original.token.clone().ok_or_else(|| {
            ContractError::AmendmentNotAllowed {
                reason: "contract has no public token".to_string(),
            }
        })?;

        // a concurrent amendment can claim the same sequence number; the
        // token uniqueness constraint rejects the insert and the count is
        // simply taken again
        let (amendment, n) = loop {
            let n = self.store.count_amendments(&original_token)? + 1;

            let mut amendment = Contract::new(utils::new_uuid_to_bech32("lease")?);
            amendment.token = Some(utils::amendment_token(&original_token, n));
            amendment.terms = original.terms.clone();
            amendment.clauses = original.clauses.clone();
            amendment.tenant = original.tenant.clone();
            amendment.owner = original.owner.clone();
            amendment.agency = original.agency.clone();
            amendment.broker_registration = original.broker_registration.clone();
            amendment.property_id = original.property_id.clone();
            amendment.amendment_of = Some(original.id.clone());
            amendment.amendment_no = n;

            // amendments go through the same draft allow-list as any other edit
            state::apply_patch(&mut amendment, &amendments)?;

            match self.store.insert_contract(&amendment) {
                Ok(()) => break (amendment, n),
                Err(err)
                    if matches!(
                        err.downcast_ref::<ContractError>(),
                        Some(ContractError::DuplicateToken { .. })
                    ) =>
                {
                    continue;
                }
                Err(err) => return Err(err),
            }
        };
        self.audit(
            &amendment.id,
            AuditAction::ContractCreated,
            actor_id,
            format!("amendmentOf={} no={n}", original.id),
        )?;
        self.audit(
            original_id,
            AuditAction::AmendmentCreated,
            actor_id,
            format!(
                "amendmentId={} token={}",
                amendment.id,
                amendment.token.as_deref().unwrap_or("")
            ),
        )?;
        info!(original_id, amendment_id = %amendment.id, "amendment created");

        Ok(amendment)
    }

    /// Read-side capability report for a contract.
    pub fn check_immutability(&self, contract_id: &str) -> anyhow::Result<Capabilities> {
        Ok(state::capabilities(&self.store.load_contract(contract_id)?))
    }

    /// Run the legal-completeness validator without side effects.
    pub fn validate_contract(&self, contract_id: &str) -> anyhow::Result<ValidationReport> {
        Ok(validation::validate(&self.store.load_contract(contract_id)?))
    }

    /// Compare a candidate digest against the sealed contract found by its
    /// public token. Reachable without authentication.
    pub fn verify_by_token(
        &self,
        token: &str,
        candidate_hash: &str,
    ) -> anyhow::Result<VerificationOutcome> {
        let contract = self.store.load_by_token(token)?;
        Ok(hashing::verify_against(&contract, candidate_hash)?)
    }

    /// Hash an uploaded document and compare it against the sealed contract.
    pub fn verify_uploaded_document(
        &self,
        token: &str,
        bytes: &[u8],
    ) -> anyhow::Result<VerificationOutcome> {
        let contract = self.store.load_by_token(token)?;
        Ok(hashing::verify_document(&contract, bytes)?)
    }

    /// Anonymized trust summary, addressable by public token or final hash.
    pub fn verification_summary(&self, query: &str) -> anyhow::Result<VerificationSummary> {
        let contract = if hashing::is_hex_digest(query) {
            self.store.load_by_final_hash(query)?
        } else {
            self.store.load_by_token(query)?
        };
        Ok(VerificationSummary::from_contract(&contract)?)
    }

    pub fn audit_trail(&self, contract_id: &str) -> anyhow::Result<Vec<AuditEntry>> {
        self.store.audit_trail(contract_id)
    }

    pub fn clause_history(
        &self,
        contract_id: &str,
    ) -> anyhow::Result<Vec<ClauseHistoryEntry>> {
        self.store.clause_history(contract_id)
    }
}
