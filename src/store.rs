//! Sled-backed persistence for contracts, links and append-only logs
//!
//! Race-sensitive updates (signature slots, link consumption, the finalize
//! transition) go through compare-and-swap loops so the enforcement check
//! and the write are indivisible. Audit and clause-history trees are
//! insert-only; no update or delete is exposed for them.

use crate::audit::{AuditEntry, ClauseHistoryEntry};
use crate::contract::{Contract, SignerRole};
use crate::error::ContractError;
use crate::links::{LinkRejection, SignatureLink};
use sled::transaction::{ConflictableTransactionError, TransactionError};
use sled::{Db, Transactional, Tree};
use std::sync::Arc;

pub struct ContractStore {
    db: Arc<Db>,
    contracts: Tree,
    tokens: Tree, // public token -> contract id
    hashes: Tree, // final hash -> contract id
    links: Tree,  // link token -> SignatureLink
    link_roles: Tree, // "<contract id>/<role>" -> link token
    audit: Tree,
    clause_history: Tree,
}

impl ContractStore {
    pub fn open(db: Arc<Db>) -> anyhow::Result<Self> {
        Ok(Self {
            contracts: db.open_tree("contracts")?,
            tokens: db.open_tree("contract_tokens")?,
            hashes: db.open_tree("final_hashes")?,
            links: db.open_tree("signature_links")?,
            link_roles: db.open_tree("signature_link_roles")?,
            audit: db.open_tree("contract_audit")?,
            clause_history: db.open_tree("clause_history")?,
            db,
        })
    }

    // ---- contracts ----

    /// Insert a new contract and claim its public token in one transaction.
    /// An already-claimed token aborts the whole write, so tokens stay
    /// globally unique even under concurrent inserts.
    pub fn insert_contract(&self, contract: &Contract) -> anyhow::Result<()> {
        let body = minicbor::to_vec(contract)?;
        let result = (&self.contracts, &self.tokens).transaction(|(contracts, tokens)| {
            if let Some(token) = &contract.token {
                if tokens.get(token.as_bytes())?.is_some() {
                    return Err(ConflictableTransactionError::Abort(()));
                }
                tokens.insert(token.as_bytes(), contract.id.as_bytes())?;
            }
            contracts.insert(contract.id.as_bytes(), body.as_slice())?;
            Ok(())
        });

        match result {
            Ok(()) => Ok(()),
            Err(TransactionError::Abort(())) => Err(ContractError::DuplicateToken {
                token: contract.token.clone().unwrap_or_default(),
            }
            .into()),
            Err(TransactionError::Storage(err)) => Err(err.into()),
        }
    }

    pub fn load_contract(&self, contract_id: &str) -> anyhow::Result<Contract> {
        let bytes = self
            .contracts
            .get(contract_id.as_bytes())?
            .ok_or(ContractError::NotFound)?;
        let contract: Contract = minicbor::decode(&bytes)?;
        if contract.deleted {
            return Err(ContractError::NotFound.into());
        }
        Ok(contract)
    }

    pub fn load_by_token(&self, token: &str) -> anyhow::Result<Contract> {
        let id = self
            .tokens
            .get(token.as_bytes())?
            .ok_or(ContractError::NotFound)?;
        let id = String::from_utf8(id.to_vec())?;
        self.load_contract(&id)
    }

    pub fn load_by_final_hash(&self, hash: &str) -> anyhow::Result<Contract> {
        let id = self
            .hashes
            .get(hash.as_bytes())?
            .ok_or(ContractError::NotFound)?;
        let id = String::from_utf8(id.to_vec())?;
        self.load_contract(&id)
    }

    /// Atomically mutate a contract. The closure runs against the currently
    /// stored record; if another writer lands first the swap fails and the
    /// closure is re-run on fresh state, so its checks always hold at commit
    /// time. Soft-delete writes are the only mutation allowed on a deleted
    /// record's tail end, hence the deleted guard here.
    pub fn update_contract<T, F>(&self, contract_id: &str, mut op: F) -> anyhow::Result<(Contract, T)>
    where
        F: FnMut(&mut Contract) -> Result<T, ContractError>,
    {
        loop {
            let current = self
                .contracts
                .get(contract_id.as_bytes())?
                .ok_or(ContractError::NotFound)?;
            let mut contract: Contract = minicbor::decode(&current)?;
            if contract.deleted {
                return Err(ContractError::NotFound.into());
            }

            let out = op(&mut contract)?;
            let next = minicbor::to_vec(&contract)?;

            match self.contracts.compare_and_swap(
                contract_id.as_bytes(),
                Some(&current),
                Some(next),
            )? {
                Ok(()) => {
                    self.reindex(&contract)?;
                    return Ok((contract, out));
                }
                // lost the race; retry against the new record
                Err(_) => continue,
            }
        }
    }

    fn reindex(&self, contract: &Contract) -> anyhow::Result<()> {
        if let Some(token) = &contract.token {
            self.tokens
                .insert(token.as_bytes(), contract.id.as_bytes())?;
        }
        if let Some(hash) = &contract.final_hash {
            self.hashes
                .insert(hash.as_bytes(), contract.id.as_bytes())?;
        }
        Ok(())
    }

    /// Count existing amendments of a public token by prefix scan over the
    /// token index.
    pub fn count_amendments(&self, original_token: &str) -> anyhow::Result<u32> {
        let prefix = format!("{original_token}-AMD");
        let mut count = 0;
        for entry in self.tokens.scan_prefix(prefix.as_bytes()) {
            entry?;
            count += 1;
        }
        Ok(count)
    }

    // ---- signature links ----

    fn role_key(contract_id: &str, role: SignerRole) -> String {
        format!("{contract_id}/{}", role.as_str())
    }

    /// Issue a link for (contract, role), returning an existing unused,
    /// unexpired link unchanged. The role-index compare-and-swap is the
    /// unique constraint that makes concurrent issuance single-winner.
    /// Returns the link and whether it was freshly minted.
    ///
    /// The candidate body is staged in the links tree before the token is
    /// published in the role index, so any token read from the index always
    /// resolves to a body.
    pub fn issue_link(
        &self,
        candidate: SignatureLink,
    ) -> anyhow::Result<(SignatureLink, bool)> {
        let key = Self::role_key(&candidate.contract_id, candidate.role);
        self.links
            .insert(candidate.token.as_bytes(), minicbor::to_vec(&candidate)?)?;

        loop {
            let existing_token = self.link_roles.get(key.as_bytes())?;

            let previous = match &existing_token {
                Some(token_bytes) => match self.links.get(token_bytes)? {
                    Some(link_bytes) => {
                        let link: SignatureLink = minicbor::decode(&link_bytes)?;
                        if link.rejection().is_none() {
                            // another issuer holds the slot; drop the staged
                            // body so the candidate token never becomes live
                            self.links.remove(candidate.token.as_bytes())?;
                            return Ok((link, false));
                        }
                        Some(token_bytes.clone())
                    }
                    // indexed token with no body yet: an issuance is mid-
                    // flight, re-read rather than replace
                    None => continue,
                },
                None => None,
            };

            match self.link_roles.compare_and_swap(
                key.as_bytes(),
                previous.as_ref(),
                Some(candidate.token.as_bytes()),
            )? {
                Ok(()) => return Ok((candidate, true)),
                // another issuer won; loop and return their link
                Err(_) => continue,
            }
        }
    }

    pub fn load_link(&self, token: &str) -> anyhow::Result<SignatureLink> {
        let bytes = self
            .links
            .get(token.as_bytes())?
            .ok_or(ContractError::LinkInvalid(LinkRejection::Unknown))?;
        Ok(minicbor::decode(&bytes)?)
    }

    /// Consume a link exactly once. Concurrent consumers race on the swap;
    /// the loser re-reads and fails with `Used`.
    pub fn consume_link(&self, token: &str) -> anyhow::Result<SignatureLink> {
        loop {
            let current = self
                .links
                .get(token.as_bytes())?
                .ok_or(ContractError::LinkInvalid(LinkRejection::Unknown))?;
            let mut link: SignatureLink = minicbor::decode(&current)?;

            if let Some(reason) = link.rejection() {
                return Err(ContractError::LinkInvalid(reason).into());
            }
            link.used_at = Some(crate::contract::TimeStamp::new());

            match self.links.compare_and_swap(
                token.as_bytes(),
                Some(&current),
                Some(minicbor::to_vec(&link)?),
            )? {
                Ok(()) => return Ok(link),
                Err(_) => continue,
            }
        }
    }

    /// Force expiry on every unused link of a contract, closing outstanding
    /// invitations.
    pub fn revoke_links(&self, contract_id: &str) -> anyhow::Result<u32> {
        let prefix = format!("{contract_id}/");
        let mut revoked = 0;
        for entry in self.link_roles.scan_prefix(prefix.as_bytes()) {
            let (_, token) = entry?;
            let Some(bytes) = self.links.get(&token)? else {
                continue;
            };
            let mut link: SignatureLink = minicbor::decode(&bytes)?;
            if link.used_at.is_none() && !link.is_expired() {
                link.expires_at = crate::contract::TimeStamp::new();
                self.links.insert(&token, minicbor::to_vec(&link)?)?;
                revoked += 1;
            }
        }
        Ok(revoked)
    }

    /// Latest link for a (contract, role) pair, if any.
    pub fn link_for_role(
        &self,
        contract_id: &str,
        role: SignerRole,
    ) -> anyhow::Result<Option<SignatureLink>> {
        let key = Self::role_key(contract_id, role);
        let Some(token) = self.link_roles.get(key.as_bytes())? else {
            return Ok(None);
        };
        match self.links.get(&token)? {
            Some(bytes) => Ok(Some(minicbor::decode(&bytes)?)),
            None => Ok(None),
        }
    }

    // ---- append-only logs ----

    /// Insert-only; keys are contract id + a db-monotonic sequence so the
    /// trail reads back in write order.
    pub fn append_audit(&self, entry: &AuditEntry) -> anyhow::Result<()> {
        let seq = self.db.generate_id()?;
        let key = format!("{}/{seq:020}", entry.contract_id);
        self.audit.insert(key.as_bytes(), minicbor::to_vec(entry)?)?;
        Ok(())
    }

    pub fn audit_trail(&self, contract_id: &str) -> anyhow::Result<Vec<AuditEntry>> {
        let prefix = format!("{contract_id}/");
        let mut entries = Vec::new();
        for entry in self.audit.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = entry?;
            entries.push(minicbor::decode(&bytes)?);
        }
        Ok(entries)
    }

    pub fn append_clause_history(&self, entry: &ClauseHistoryEntry) -> anyhow::Result<()> {
        let seq = self.db.generate_id()?;
        let key = format!("{}/{seq:020}", entry.contract_id);
        self.clause_history
            .insert(key.as_bytes(), minicbor::to_vec(entry)?)?;
        Ok(())
    }

    pub fn clause_history(&self, contract_id: &str) -> anyhow::Result<Vec<ClauseHistoryEntry>> {
        let prefix = format!("{contract_id}/");
        let mut entries = Vec::new();
        for entry in self.clause_history.scan_prefix(prefix.as_bytes()) {
            let (_, bytes) = entry?;
            entries.push(minicbor::decode(&bytes)?);
        }
        Ok(entries)
    }
}
