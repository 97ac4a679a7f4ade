//! End-to-end lifecycle scenarios against a real sled database
use lease_engine::contract::{
    Contract, ContractState, Geolocation, LeaseTerms, PartyInfo, SignatureSlot, SignerRole,
    TimeStamp,
};
use lease_engine::error::ContractError;
use lease_engine::hashing;
use lease_engine::render::{CborRenderer, DocumentRenderer};
use lease_engine::service::{ContractService, NewContract, SignaturePayload};
use lease_engine::state::FieldWrite;
use lease_engine::store::ContractStore;
use lease_engine::audit::AuditAction;
use sled::open;
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

// Sled uses file-based locking to prevent concurrent access, so only one test
// can hold the lock at a time. As is good practice in testing create separate
// databases for each test. The db is created on temp for simplified cleanup.
fn service(name: &str) -> (ContractService, TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();
    let db_path = temp_dir.path().join(format!("{name}.db"));
    let db = Arc::new(open(db_path).unwrap());
    db.clear().unwrap();

    let service = ContractService::new(db, Arc::new(CborRenderer)).unwrap();
    (service, temp_dir)
}

fn complete_draft() -> NewContract {
    NewContract {
        terms: LeaseTerms {
            start_date: Some(TimeStamp::new_with(2026, 1, 1, 0, 0, 0)),
            end_date: Some(TimeStamp::new_with(2028, 1, 1, 0, 0, 0)),
            monthly_rent_cents: 150_000,
            deposit_cents: 300_000,
            due_day: Some(10),
            late_fee_bps: 200,
            interest_bps: 100,
            early_termination_months: 3,
            readjustment_index: Some("IGPM".to_string()),
        },
        tenant: PartyInfo {
            name: "Ana Souza".into(),
            document: Some("123.456.789-00".into()),
            email: Some("ana@example.com".into()),
        },
        owner: PartyInfo {
            name: "Bruno Lima".into(),
            document: Some("987.654.321-00".into()),
            email: Some("bruno@example.com".into()),
        },
        agency: None,
        broker_registration: Some("CRECI-55555".into()),
        property_id: Some("property_1".into()),
        clauses: Some(vec![0xa1, 0x01, 0x02]),
    }
}

fn payload() -> SignaturePayload {
    SignaturePayload {
        image: vec![0x89, 0x50, 0x4e, 0x47],
        geolocation: Geolocation {
            lat: -23.5505,
            lng: -46.6333,
            consent: true,
        },
        ip: "203.0.113.10".into(),
        user_agent: "Mozilla/5.0 (test)".into(),
        witness_identity: None,
    }
}

fn sign_both(service: &ContractService, contract: &Contract) -> Contract {
    service
        .capture_signature(&contract.id, SignerRole::Tenant, payload(), "user_tenant")
        .unwrap();
    service
        .capture_signature(&contract.id, SignerRole::Owner, payload(), "user_owner")
        .unwrap()
}

#[test]
fn scenario_a_complete_draft_validates_at_100() -> anyhow::Result<()> {
    let (service, _dir) = service("scenario_a");
    let contract = service.create_contract(complete_draft(), "user_admin")?;

    let report = service.validate_contract(&contract.id)?;
    assert!(report.valid);
    assert_eq!(report.score, 100);

    Ok(())
}

#[test]
fn scenario_b_due_day_31_warns_but_validates() -> anyhow::Result<()> {
    let (service, _dir) = service("scenario_b");
    let mut input = complete_draft();
    input.terms.due_day = Some(31);
    let contract = service.create_contract(input, "user_admin")?;

    let report = service.validate_contract(&contract.id)?;
    assert!(report.valid);
    assert!(report.has_warning_on("dueDay"));

    Ok(())
}

#[test]
fn scenario_c_full_signing_finalizes_automatically() -> anyhow::Result<()> {
    let (service, _dir) = service("scenario_c");
    let contract = service.create_contract(complete_draft(), "user_admin")?;

    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;
    assert_eq!(contract.state, ContractState::AwaitingSignatures);
    let token = contract.token.clone().expect("token minted at prepare");
    assert!(token.starts_with("MR3X-CTR-"));
    assert!(contract.provisional_hash.is_some());

    let contract = sign_both(&service, &contract);

    // finalize ran inside the second capture
    assert_eq!(contract.state, ContractState::Signed);
    assert!(contract.final_hash.is_some());

    let trail = service.audit_trail(&contract.id)?;
    assert!(
        trail
            .iter()
            .any(|e| e.action == AuditAction::ContractFinalized)
    );

    Ok(())
}

#[test]
fn scenario_d_term_edit_while_awaiting_is_blocked_and_audited() -> anyhow::Result<()> {
    let (service, _dir) = service("scenario_d");
    let contract = service.create_contract(complete_draft(), "user_admin")?;
    service.prepare_for_signing(&contract.id, "user_admin")?;

    let err = service
        .update_contract(
            &contract.id,
            vec![FieldWrite::MonthlyRent(200_000)],
            "user_admin",
            "203.0.113.5",
            "test-agent",
        )
        .unwrap_err();

    match err.downcast_ref::<ContractError>() {
        Some(ContractError::FieldImmutable { fields, .. }) => {
            assert_eq!(fields, &vec!["monthlyRent".to_string()]);
        }
        other => panic!("expected FieldImmutable, got {other:?}"),
    }

    let trail = service.audit_trail(&contract.id)?;
    let blocked = trail
        .iter()
        .find(|e| e.action == AuditAction::ModificationBlocked)
        .expect("blocked modification must be audited");
    assert!(blocked.detail.contains("monthlyRent"));

    // the term itself is untouched
    let reloaded = service.get_contract(&contract.id)?;
    assert_eq!(reloaded.terms.monthly_rent_cents, 150_000);

    Ok(())
}

#[test]
fn scenario_e_signature_after_revoke_is_rejected() -> anyhow::Result<()> {
    let (service, _dir) = service("scenario_e");
    let contract = service.create_contract(complete_draft(), "user_admin")?;
    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;
    let contract = sign_both(&service, &contract);
    assert_eq!(contract.state, ContractState::Signed);

    let contract = service.revoke(&contract.id, "user_admin", Some("fraud suspected"))?;
    assert_eq!(contract.state, ContractState::Revoked);

    let err = service
        .capture_signature(&contract.id, SignerRole::Witness, payload(), "user_witness")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ContractError>(),
        Some(ContractError::NotAwaitingSignatures { .. })
    ));

    Ok(())
}

#[test]
fn verification_round_trip_and_tamper_detection() -> anyhow::Result<()> {
    let (service, _dir) = service("verify_round_trip");
    let contract = service.create_contract(complete_draft(), "user_admin")?;
    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;
    let contract = sign_both(&service, &contract);
    let token = contract.token.clone().unwrap();

    // re-render the sealed document; it must verify
    let rendered = CborRenderer.render_final(&contract)?;
    let outcome = service.verify_uploaded_document(&token, &rendered)?;
    assert!(outcome.valid);

    // any single-byte mutation flips the result
    let mut tampered = rendered.clone();
    tampered[0] ^= 1;
    let outcome = service.verify_uploaded_document(&token, &tampered)?;
    assert!(!outcome.valid);

    // the summary is anonymized but confirms validity
    let summary = service.verification_summary(&token)?;
    assert!(summary.valid);
    assert!(summary.tenant.signed && summary.owner.signed);

    // addressable by hash as well
    let by_hash = service.verification_summary(contract.final_hash.as_deref().unwrap())?;
    assert_eq!(by_hash.token, token);

    Ok(())
}

#[test]
fn amendment_never_touches_the_original() -> anyhow::Result<()> {
    let (service, _dir) = service("amendment_isolation");
    let contract = service.create_contract(complete_draft(), "user_admin")?;
    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;
    let sealed = sign_both(&service, &contract);

    // a sealed contract cannot be amended in place
    let err = service
        .update_contract(
            &sealed.id,
            vec![FieldWrite::MonthlyRent(175_000)],
            "user_admin",
            "203.0.113.5",
            "test-agent",
        )
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ContractError>(),
        Some(ContractError::FieldImmutable { .. })
    ));

    let amendment = service.create_amendment(
        &sealed.id,
        vec![FieldWrite::MonthlyRent(175_000)],
        "user_admin",
    )?;

    assert_eq!(amendment.state, ContractState::Draft);
    assert_eq!(amendment.terms.monthly_rent_cents, 175_000);
    assert_eq!(amendment.amendment_no, 1);
    assert_eq!(
        amendment.token.as_deref(),
        Some(format!("{}-AMD1", sealed.token.as_deref().unwrap()).as_str())
    );
    assert!(amendment.tenant_signature.is_none());
    assert!(amendment.final_hash.is_none());

    // original unchanged apart from a cross-link audit entry
    let original = service.get_contract(&sealed.id)?;
    assert_eq!(original.state, sealed.state);
    assert_eq!(original.final_hash, sealed.final_hash);
    assert_eq!(original.tenant_signature, sealed.tenant_signature);
    assert_eq!(original.terms.monthly_rent_cents, 150_000);

    let trail = service.audit_trail(&sealed.id)?;
    assert!(
        trail
            .iter()
            .any(|e| e.action == AuditAction::AmendmentCreated)
    );

    // numbering counts prior amendments
    let second = service.create_amendment(&sealed.id, vec![], "user_admin")?;
    assert_eq!(second.amendment_no, 2);

    Ok(())
}

#[test]
fn draft_validation_gates_signing() -> anyhow::Result<()> {
    let (service, _dir) = service("validation_gate");
    let mut input = complete_draft();
    input.terms.monthly_rent_cents = 0;
    input.tenant.email = None;
    let contract = service.create_contract(input, "user_admin")?;

    let err = service.prepare_for_signing(&contract.id, "user_admin").unwrap_err();
    match err.downcast_ref::<ContractError>() {
        Some(ContractError::ValidationFailed { errors }) => {
            // the full error list is surfaced, not just the first
            assert!(errors.iter().any(|e| e.field == "monthlyRent"));
            assert!(errors.iter().any(|e| e.field == "tenantEmail"));
        }
        other => panic!("expected ValidationFailed, got {other:?}"),
    }

    let reloaded = service.get_contract(&contract.id)?;
    assert_eq!(reloaded.state, ContractState::Draft);

    Ok(())
}

#[test]
fn geolocation_is_mandatory_for_capture() -> anyhow::Result<()> {
    let (service, _dir) = service("geolocation_required");
    let contract = service.create_contract(complete_draft(), "user_admin")?;
    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;

    let mut without_consent = payload();
    without_consent.geolocation.consent = false;
    let err = service
        .capture_signature(&contract.id, SignerRole::Tenant, without_consent, "user_t")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ContractError>(),
        Some(ContractError::GeolocationRequired)
    ));

    // nothing was persisted
    let reloaded = service.get_contract(&contract.id)?;
    assert!(reloaded.tenant_signature.is_none());

    Ok(())
}

#[test]
fn duplicate_signature_is_rejected() -> anyhow::Result<()> {
    let (service, _dir) = service("duplicate_signature");
    let contract = service.create_contract(complete_draft(), "user_admin")?;
    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;

    service.capture_signature(&contract.id, SignerRole::Tenant, payload(), "user_t")?;
    let err = service
        .capture_signature(&contract.id, SignerRole::Tenant, payload(), "user_t")
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ContractError>(),
        Some(ContractError::DuplicateSignature {
            role: SignerRole::Tenant
        })
    ));

    Ok(())
}

#[test]
fn reopen_draft_allowed_only_before_signatures() -> anyhow::Result<()> {
    let (service, _dir) = service("reopen_draft");
    let contract = service.create_contract(complete_draft(), "user_admin")?;
    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;

    let contract = service.reopen_draft(&contract.id, "user_admin")?;
    assert_eq!(contract.state, ContractState::Draft);
    // token survives the back-edge; it is immutable once set
    assert!(contract.token.is_some());

    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;
    service.capture_signature(&contract.id, SignerRole::Tenant, payload(), "user_t")?;

    let err = service.reopen_draft(&contract.id, "user_admin").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ContractError>(),
        Some(ContractError::SignaturesInProgress)
    ));

    Ok(())
}

#[test]
fn lifecycle_progresses_to_termination() -> anyhow::Result<()> {
    let (service, _dir) = service("full_lifecycle");
    let contract = service.create_contract(complete_draft(), "user_admin")?;
    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;
    let contract = sign_both(&service, &contract);

    let contract = service.activate(&contract.id, "user_admin")?;
    assert_eq!(contract.state, ContractState::Active);
    // the seal survives activation
    assert!(contract.final_hash.is_some());

    let contract = service.terminate(&contract.id, "user_admin", Some("term ended"))?;
    assert_eq!(contract.state, ContractState::Terminated);

    // terminal state: no further transitions, no deletion
    let err = service.activate(&contract.id, "user_admin").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ContractError>(),
        Some(ContractError::InvalidTransition { .. })
    ));
    let err = service.soft_delete(&contract.id, "user_admin").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ContractError>(),
        Some(ContractError::DeleteBlocked { .. })
    ));

    Ok(())
}

fn witness_slot() -> SignatureSlot {
    SignatureSlot {
        image: vec![7, 7, 7],
        signed_at: TimeStamp::new(),
        ip: "203.0.113.77".into(),
        user_agent: "Mozilla/5.0 (test)".into(),
        geolocation: Geolocation {
            lat: -23.5505,
            lng: -46.6333,
            consent: true,
        },
        witness_identity: Some("Clara Dias".into()),
    }
}

/// Writes a witness signature into the stored record while the final
/// document is being rendered, reproducing a capture landing between the
/// render and the sealing swap.
struct LateWitnessRenderer {
    store: ContractStore,
    target: Mutex<Option<String>>,
}

impl DocumentRenderer for LateWitnessRenderer {
    fn render_provisional(&self, contract: &Contract) -> anyhow::Result<Vec<u8>> {
        CborRenderer.render_provisional(contract)
    }

    fn render_final(&self, contract: &Contract) -> anyhow::Result<Vec<u8>> {
        if let Some(id) = self.target.lock().unwrap().take() {
            self.store.update_contract(&id, |c| {
                c.witness_signature = Some(witness_slot());
                Ok(())
            })?;
        }
        CborRenderer.render_final(contract)
    }
}

#[test]
fn late_witness_capture_still_verifies() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("late_witness.db"))?);
    db.clear()?;

    let renderer = Arc::new(LateWitnessRenderer {
        store: ContractStore::open(db.clone())?,
        target: Mutex::new(None),
    });
    let service = ContractService::new(db, renderer.clone())?;

    let contract = service.create_contract(complete_draft(), "user_admin")?;
    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;
    service.capture_signature(&contract.id, SignerRole::Tenant, payload(), "user_t")?;

    // the witness lands while the second capture is finalizing
    *renderer.target.lock().unwrap() = Some(contract.id.clone());
    let sealed =
        service.capture_signature(&contract.id, SignerRole::Owner, payload(), "user_o")?;

    assert_eq!(sealed.state, ContractState::Signed);
    assert!(sealed.witness_signature.is_some());

    // the sealed hash covers the record as stored, witness included
    let rendered = CborRenderer.render_final(&sealed)?;
    let outcome =
        service.verify_uploaded_document(sealed.token.as_deref().unwrap(), &rendered)?;
    assert!(outcome.valid);

    Ok(())
}

/// Rewrites the clause blob in the stored draft while the provisional
/// document is being rendered.
struct LateClauseEditRenderer {
    store: ContractStore,
    target: Mutex<Option<String>>,
}

impl DocumentRenderer for LateClauseEditRenderer {
    fn render_provisional(&self, contract: &Contract) -> anyhow::Result<Vec<u8>> {
        if let Some(id) = self.target.lock().unwrap().take() {
            self.store.update_contract(&id, |c| {
                c.clauses = Some(vec![0xa1, 0x0f, 0x0f]);
                Ok(())
            })?;
        }
        CborRenderer.render_provisional(contract)
    }

    fn render_final(&self, contract: &Contract) -> anyhow::Result<Vec<u8>> {
        CborRenderer.render_final(contract)
    }
}

#[test]
fn draft_edit_during_provisional_render_is_re_rendered() -> anyhow::Result<()> {
    let temp_dir = tempfile::tempdir()?;
    let db = Arc::new(open(temp_dir.path().join("late_clause_edit.db"))?);
    db.clear()?;

    let renderer = Arc::new(LateClauseEditRenderer {
        store: ContractStore::open(db.clone())?,
        target: Mutex::new(None),
    });
    let service = ContractService::new(db, renderer.clone())?;

    let contract = service.create_contract(complete_draft(), "user_admin")?;
    *renderer.target.lock().unwrap() = Some(contract.id.clone());
    let prepared = service.prepare_for_signing(&contract.id, "user_admin")?;

    // the edit that landed mid-render is what got sealed
    assert_eq!(prepared.clauses, Some(vec![0xa1, 0x0f, 0x0f]));
    let rendered = CborRenderer.render_provisional(&prepared)?;
    assert_eq!(
        prepared.provisional_hash.as_deref(),
        Some(hashing::compute_hash(&rendered).as_str())
    );

    Ok(())
}

#[test]
fn blocked_transition_is_audited() -> anyhow::Result<()> {
    let (service, _dir) = service("blocked_transition");
    let contract = service.create_contract(complete_draft(), "user_admin")?;

    let err = service.activate(&contract.id, "user_admin").unwrap_err();
    assert!(matches!(
        err.downcast_ref::<ContractError>(),
        Some(ContractError::InvalidTransition { .. })
    ));

    let trail = service.audit_trail(&contract.id)?;
    let blocked = trail
        .iter()
        .find(|e| e.action == AuditAction::TransitionBlocked)
        .expect("rejected transition must be audited");
    assert!(blocked.detail.contains("from=DRAFT"));
    assert!(blocked.detail.contains("to=ACTIVE"));

    Ok(())
}

#[test]
fn concurrent_amendments_get_distinct_tokens() -> anyhow::Result<()> {
    let (service, _dir) = service("amendment_race");
    let contract = service.create_contract(complete_draft(), "user_admin")?;
    let contract = service.prepare_for_signing(&contract.id, "user_admin")?;
    let sealed = sign_both(&service, &contract);

    let amendments: Vec<Contract> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..2)
            .map(|_| {
                let service = &service;
                let id = sealed.id.clone();
                scope.spawn(move || service.create_amendment(&id, vec![], "user_admin").unwrap())
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });

    assert_ne!(amendments[0].token, amendments[1].token);
    let mut numbers: Vec<u32> = amendments.iter().map(|a| a.amendment_no).collect();
    numbers.sort_unstable();
    assert_eq!(numbers, vec![1, 2]);

    Ok(())
}

#[test]
fn clause_edits_build_a_history_trail() -> anyhow::Result<()> {
    let (service, _dir) = service("clause_history");
    let contract = service.create_contract(complete_draft(), "user_admin")?;

    service.update_contract(
        &contract.id,
        vec![FieldWrite::Clauses(vec![0xa1, 0x01, 0x03])],
        "user_admin",
        "203.0.113.5",
        "test-agent",
    )?;
    service.update_contract(
        &contract.id,
        vec![FieldWrite::Clauses(vec![0xa1, 0x01, 0x04])],
        "user_admin",
        "203.0.113.5",
        "test-agent",
    )?;

    let history = service.clause_history(&contract.id)?;
    assert_eq!(history.len(), 2);
    // the second entry snapshots what the first edit wrote
    assert_eq!(history[1].previous_clauses, vec![0xa1, 0x01, 0x03]);
    assert_eq!(history[1].edited_by, "user_admin");

    Ok(())
}
