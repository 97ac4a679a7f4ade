//! Content hashing and document authenticity checks
use crate::contract::Contract;
use crate::error::ContractError;

/// Compute the collision-resistant content hash of a rendered document as a
/// 64-char lowercase hex digest.
pub fn compute_hash(bytes: &[u8]) -> String {
    sha256::digest(bytes)
}

/// Whether a candidate string even has the shape of a digest.
pub fn is_hex_digest(candidate: &str) -> bool {
    candidate.len() == 64 && hex::decode(candidate).is_ok()
}

/// Result of an authenticity check. A mismatch is a valid negative result,
/// never an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationOutcome {
    pub valid: bool,
    pub message: String,
}

/// Compare a candidate digest against a contract's sealed final hash.
/// Fails typed if the contract was never finalized; the comparison itself
/// always produces an outcome.
pub fn verify_against(
    contract: &Contract,
    candidate: &str,
) -> Result<VerificationOutcome, ContractError> {
    let sealed = contract
        .final_hash
        .as_deref()
        .ok_or(ContractError::NotFinalized)?;

    let valid = sealed == candidate.to_ascii_lowercase();
    let message = if valid {
        "document is authentic: content hash matches the sealed contract".to_string()
    } else {
        "document does NOT match the sealed contract; it may have been altered".to_string()
    };

    Ok(VerificationOutcome { valid, message })
}

/// Hash uploaded document bytes and compare against the sealed hash.
pub fn verify_document(
    contract: &Contract,
    bytes: &[u8],
) -> Result<VerificationOutcome, ContractError> {
    verify_against(contract, &compute_hash(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_shape() {
        let digest = compute_hash(b"lease body");
        assert_eq!(digest.len(), 64);
        assert!(is_hex_digest(&digest));
        assert!(!is_hex_digest("not-a-digest"));
    }

    #[test]
    fn unfinalized_contract_cannot_verify() {
        let contract = Contract::new("lease_test".to_string());
        let err = verify_document(&contract, b"anything").unwrap_err();
        assert!(matches!(err, ContractError::NotFinalized));
    }

    #[test]
    fn single_byte_flip_invalidates() {
        let mut contract = Contract::new("lease_test".to_string());
        let body = b"final rendered document".to_vec();
        contract.final_hash = Some(compute_hash(&body));

        assert!(verify_document(&contract, &body).unwrap().valid);

        let mut tampered = body.clone();
        tampered[0] ^= 1;
        assert!(!verify_document(&contract, &tampered).unwrap().valid);
    }
}
