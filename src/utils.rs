//! Utility functions for identifiers and tokens

use bech32::Bech32m;
use uuid7::uuid7;

/// Uppercase alphabet used for the public contract token segments.
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";

// construct a unique entity id then encode using bech32
pub fn new_uuid_to_bech32(hrp: &str) -> anyhow::Result<String> {
    let hrp = bech32::Hrp::parse(hrp)?;
    let encode = bech32::encode::<Bech32m>(hrp, uuid7().as_bytes())?;
    Ok(encode)
}

/// Mint a high-entropy signature-link token. Two uuid draws are hashed down
/// to 32 bytes so the capability cannot be guessed from a single id.
pub fn new_link_token() -> anyhow::Result<String> {
    let mut seed = Vec::with_capacity(32);
    seed.extend_from_slice(uuid7().as_bytes());
    seed.extend_from_slice(uuid7().as_bytes());

    let digest = sha256::digest(&seed);
    let raw = hex::decode(&digest)?;

    let hrp = bech32::Hrp::parse("sign")?;
    let encode = bech32::encode::<Bech32m>(hrp, &raw)?;
    Ok(encode)
}

/// Generate a public contract token: `MR3X-CTR-<year>-<seg>-<seg>` with two
/// 4-char uppercase alphanumeric segments drawn from uuid entropy.
pub fn new_contract_token(year: i32) -> String {
    let id = uuid7();
    let bytes = id.as_bytes();

    format!(
        "MR3X-CTR-{:04}-{}-{}",
        year,
        token_segment(&bytes[8..12]),
        token_segment(&bytes[12..16])
    )
}

/// Derive the token of the `n`-th amendment of an original contract token.
pub fn amendment_token(original: &str, n: u32) -> String {
    format!("{original}-AMD{n}")
}

fn token_segment(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| TOKEN_ALPHABET[*b as usize % TOKEN_ALPHABET.len()] as char)
        .collect()
}
