//! Core contract entity, lease terms and signature slot types
use chrono::{DateTime, TimeZone, Utc};

/// Lifecycle state of a contract. The set is closed; allowed transitions
/// live in [`crate::state`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum ContractState {
    #[n(0)]
    Draft,
    #[n(1)]
    AwaitingSignatures,
    #[n(2)]
    Signed,
    #[n(3)]
    Active,
    #[n(4)]
    Revoked,
    #[n(5)]
    Terminated,
}

impl ContractState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ContractState::Draft => "DRAFT",
            ContractState::AwaitingSignatures => "AWAITING_SIGNATURES",
            ContractState::Signed => "SIGNED",
            ContractState::Active => "ACTIVE",
            ContractState::Revoked => "REVOKED",
            ContractState::Terminated => "TERMINATED",
        }
    }

    /// Terminal states accept no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ContractState::Revoked | ContractState::Terminated)
    }
}

/// The parties that hold a signature slot on a contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, minicbor::Encode, minicbor::Decode)]
pub enum SignerRole {
    #[n(0)]
    Tenant,
    #[n(1)]
    Owner,
    #[n(2)]
    Agency,
    #[n(3)]
    Witness,
}

impl SignerRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignerRole::Tenant => "tenant",
            SignerRole::Owner => "owner",
            SignerRole::Agency => "agency",
            SignerRole::Witness => "witness",
        }
    }

    pub const ALL: [SignerRole; 4] = [
        SignerRole::Tenant,
        SignerRole::Owner,
        SignerRole::Agency,
        SignerRole::Witness,
    ];
}

/// Signer geolocation. All fields are required by construction so a capture
/// call cannot skip them; consent is still checked explicitly.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Geolocation {
    #[n(0)]
    pub lat: f64,
    #[n(1)]
    pub lng: f64,
    #[n(2)]
    pub consent: bool,
}

impl Geolocation {
    /// Coordinates must be finite and inside the WGS84 range.
    pub fn in_range(&self) -> bool {
        self.lat.is_finite()
            && self.lng.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// One party's captured signature and its metadata. A slot is written once
/// and never overwritten.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct SignatureSlot {
    #[n(0)]
    pub image: Vec<u8>,
    #[n(1)]
    pub signed_at: TimeStamp<Utc>,
    #[n(2)]
    pub ip: String,
    #[n(3)]
    pub user_agent: String,
    #[n(4)]
    pub geolocation: Geolocation,
    #[n(5)]
    pub witness_identity: Option<String>,
}

/// Commercial and legal terms of the lease. Monetary amounts are integer
/// cents, percentages are basis points; zero means "not set" for amounts.
#[derive(Debug, Clone, Default, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct LeaseTerms {
    #[n(0)]
    pub start_date: Option<TimeStamp<Utc>>,
    #[n(1)]
    pub end_date: Option<TimeStamp<Utc>>,
    #[n(2)]
    pub monthly_rent_cents: u64,
    #[n(3)]
    pub deposit_cents: u64,
    #[n(4)]
    pub due_day: Option<u8>,
    #[n(5)]
    pub late_fee_bps: u32,
    #[n(6)]
    pub interest_bps: u32,
    #[n(7)]
    pub early_termination_months: u32,
    #[n(8)]
    pub readjustment_index: Option<String>,
}

/// Identification of a contracting party for completeness checks.
#[derive(Debug, Clone, Default, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct PartyInfo {
    #[n(0)]
    pub name: String,
    #[n(1)]
    pub document: Option<String>,
    #[n(2)]
    pub email: Option<String>,
}

/// Associated real-estate agency, when the lease is brokered.
#[derive(Debug, Clone, Default, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct AgencyInfo {
    #[n(0)]
    pub id: String,
    #[n(1)]
    pub name: String,
    #[n(2)]
    pub registration: Option<String>,
}

/// The lease contract record progressing through the state machine.
#[derive(Debug, Clone, PartialEq, minicbor::Encode, minicbor::Decode)]
pub struct Contract {
    #[n(0)]
    pub id: String, // uuid7, bech32 encoded
    #[n(1)]
    pub token: Option<String>, // MR3X-CTR-..., minted at prepare-for-signing
    #[n(2)]
    pub state: ContractState,
    #[n(3)]
    pub terms: LeaseTerms,
    #[n(4)]
    pub clauses: Option<Vec<u8>>, // opaque CBOR blob, frozen at signing
    #[n(5)]
    pub tenant: PartyInfo,
    #[n(6)]
    pub owner: PartyInfo,
    #[n(7)]
    pub agency: Option<AgencyInfo>,
    #[n(8)]
    pub broker_registration: Option<String>,
    #[n(9)]
    pub property_id: Option<String>,
    #[n(10)]
    pub tenant_signature: Option<SignatureSlot>,
    #[n(11)]
    pub owner_signature: Option<SignatureSlot>,
    #[n(12)]
    pub agency_signature: Option<SignatureSlot>,
    #[n(13)]
    pub witness_signature: Option<SignatureSlot>,
    #[n(14)]
    pub provisional_hash: Option<String>,
    #[n(15)]
    pub final_hash: Option<String>,
    #[n(16)]
    pub deleted: bool,
    #[n(17)]
    pub deleted_at: Option<TimeStamp<Utc>>,
    #[n(18)]
    pub deleted_by: Option<String>,
    #[n(19)]
    pub amendment_of: Option<String>, // original contract id
    #[n(20)]
    pub amendment_no: u32,
    #[n(21)]
    pub created_at: TimeStamp<Utc>,
}

impl Contract {
    pub fn new(id: String) -> Self {
        Self {
            id,
            token: None,
            state: ContractState::Draft,
            terms: LeaseTerms::default(),
            clauses: None,
            tenant: PartyInfo::default(),
            owner: PartyInfo::default(),
            agency: None,
            broker_registration: None,
            property_id: None,
            tenant_signature: None,
            owner_signature: None,
            agency_signature: None,
            witness_signature: None,
            provisional_hash: None,
            final_hash: None,
            deleted: false,
            deleted_at: None,
            deleted_by: None,
            amendment_of: None,
            amendment_no: 0,
            created_at: TimeStamp::new(),
        }
    }

    pub fn signature(&self, role: SignerRole) -> &Option<SignatureSlot> {
        match role {
            SignerRole::Tenant => &self.tenant_signature,
            SignerRole::Owner => &self.owner_signature,
            SignerRole::Agency => &self.agency_signature,
            SignerRole::Witness => &self.witness_signature,
        }
    }

    pub fn signature_mut(&mut self, role: SignerRole) -> &mut Option<SignatureSlot> {
        match role {
            SignerRole::Tenant => &mut self.tenant_signature,
            SignerRole::Owner => &mut self.owner_signature,
            SignerRole::Agency => &mut self.agency_signature,
            SignerRole::Witness => &mut self.witness_signature,
        }
    }

    /// Whether `role` must sign before the contract can be finalized.
    /// The agency slot only counts when an agency is associated; the witness
    /// slot is captured but never required.
    pub fn role_required(&self, role: SignerRole) -> bool {
        match role {
            SignerRole::Tenant | SignerRole::Owner => true,
            SignerRole::Agency => self.agency.is_some(),
            SignerRole::Witness => false,
        }
    }

    /// Completion predicate for finalization: tenant AND owner AND
    /// (no agency OR agency signed).
    pub fn all_required_signed(&self) -> bool {
        SignerRole::ALL
            .iter()
            .all(|role| !self.role_required(*role) || self.signature(*role).is_some())
    }

    pub fn any_signature_present(&self) -> bool {
        SignerRole::ALL
            .iter()
            .any(|role| self.signature(*role).is_some())
    }

    /// Presence of the final hash is the system's definition of immutable.
    pub fn is_sealed(&self) -> bool {
        self.final_hash.is_some()
    }
}

#[derive(Debug, PartialEq, Eq, PartialOrd, Ord, Clone)]
pub struct TimeStamp<T: TimeZone>(DateTime<T>);

impl TimeStamp<Utc> {
    pub fn new() -> Self {
        Self(Utc::now())
    }
    pub fn new_with(year: i32, month: u32, day: u32, hour: u32, min: u32, sec: u32) -> Self {
        Utc.with_ymd_and_hms(year, month, day, hour, min, sec)
            .unwrap()
            .into()
    }
    pub fn to_datetime_utc(&self) -> DateTime<Utc> {
        self.0
    }
}

impl Default for TimeStamp<Utc> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: TimeZone> From<DateTime<T>> for TimeStamp<T> {
    fn from(value: DateTime<T>) -> Self {
        TimeStamp(value)
    }
}

impl<C> minicbor::Encode<C> for TimeStamp<Utc> {
    fn encode<W: minicbor::encode::Write>(
        &self,
        e: &mut minicbor::Encoder<W>,
        _: &mut C,
    ) -> Result<(), minicbor::encode::Error<W::Error>> {
        if let Some(nsec) = self.0.timestamp_nanos_opt() {
            return e.i64(nsec)?.ok();
        }

        Err(minicbor::encode::Error::message(
            "failed to encode timestamp. timestamp_nanos_opt returned None",
        ))
    }
}

impl<'b, C> minicbor::Decode<'b, C> for TimeStamp<Utc> {
    fn decode(d: &mut minicbor::Decoder<'b>, _: &mut C) -> Result<Self, minicbor::decode::Error> {
        let nsecs = d.i64()?;

        Ok(TimeStamp(DateTime::from_timestamp_nanos(nsecs)))
    }
}
