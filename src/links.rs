//! Single-use, expiring signature invitation links
use crate::contract::{SignerRole, TimeStamp};
use crate::utils;
use chrono::{Duration, Utc};

/// Default invitation lifetime.
pub fn default_ttl() -> Duration {
    Duration::hours(48)
}

/// Why a link was rejected. The caller needs the distinction to give a
/// precise message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkRejection {
    Unknown,
    Expired,
    Used,
}

impl std::fmt::Display for LinkRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            LinkRejection::Unknown => "unknown token",
            LinkRejection::Expired => "link has expired",
            LinkRejection::Used => "link was already used",
        };
        f.write_str(s)
    }
}

/// A capability token scoped to one contract and one signer role.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct SignatureLink {
    #[n(0)]
    pub token: String,
    #[n(1)]
    pub contract_id: String,
    #[n(2)]
    pub role: SignerRole,
    #[n(3)]
    pub email: String,
    #[n(4)]
    pub name: Option<String>,
    #[n(5)]
    pub created_at: TimeStamp<Utc>,
    #[n(6)]
    pub expires_at: TimeStamp<Utc>,
    #[n(7)]
    pub used_at: Option<TimeStamp<Utc>>,
}

impl SignatureLink {
    pub fn new(
        contract_id: String,
        role: SignerRole,
        email: String,
        name: Option<String>,
        ttl: Duration,
    ) -> anyhow::Result<Self> {
        let now = Utc::now();
        Ok(Self {
            token: utils::new_link_token()?,
            contract_id,
            role,
            email,
            name,
            created_at: now.into(),
            expires_at: (now + ttl).into(),
            used_at: None,
        })
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at.to_datetime_utc() <= Utc::now()
    }

    /// Lazily evaluated usability check; `None` means the link may be
    /// consumed right now.
    pub fn rejection(&self) -> Option<LinkRejection> {
        if self.used_at.is_some() {
            Some(LinkRejection::Used)
        } else if self.is_expired() {
            Some(LinkRejection::Expired)
        } else {
            None
        }
    }
}

/// Successful link validation: what the token is bound to.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkValidation {
    pub contract_id: String,
    pub role: SignerRole,
    pub email: String,
    pub name: Option<String>,
}

impl From<&SignatureLink> for LinkValidation {
    fn from(link: &SignatureLink) -> Self {
        Self {
            contract_id: link.contract_id.clone(),
            role: link.role,
            email: link.email.clone(),
            name: link.name.clone(),
        }
    }
}

/// An invitation request for one signer role.
#[derive(Debug, Clone, PartialEq)]
pub struct PartyInvite {
    pub role: SignerRole,
    pub email: String,
    pub name: Option<String>,
}
