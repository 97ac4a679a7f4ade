//! Legal-completeness validation run before a contract may enter signing
//!
//! The required-field catalog is fixed data; each entry carries a category
//! and a field-specific rule. Errors block the signing transition, warnings
//! never do. The completeness score is passed-required / total-required.

use crate::contract::Contract;

/// Category a required field belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Financial,
    Temporal,
    Parties,
    Property,
    Legal,
}

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Financial => "financial",
            Category::Temporal => "temporal",
            Category::Parties => "parties",
            Category::Property => "property",
            Category::Legal => "legal",
        }
    }
}

/// A blocking validation failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationIssue {
    pub field: &'static str,
    pub category: Category,
    pub message: String,
}

/// A non-blocking advisory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationWarning {
    pub field: &'static str,
    pub message: String,
    pub recommendation: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationReport {
    pub valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationWarning>,
    /// passed required fields / total required fields, in percent
    pub score: u32,
}

impl ValidationReport {
    pub fn has_warning_on(&self, field: &str) -> bool {
        self.warnings.iter().any(|w| w.field == field)
    }
}

/// Readjustment indices the engine recognizes. Anything else is flagged as a
/// warning, not an error.
pub const KNOWN_INDICES: &[&str] = &["IGPM", "IPCA", "INPC", "IGP-DI", "INCC"];

/// The fixed catalog of required fields. Completeness is scored over exactly
/// this list.
pub const REQUIRED_FIELDS: &[(&str, Category)] = &[
    ("monthlyRent", Category::Financial),
    ("dueDay", Category::Financial),
    ("startDate", Category::Temporal),
    ("endDate", Category::Temporal),
    ("tenantDocument", Category::Parties),
    ("tenantEmail", Category::Parties),
    ("ownerDocument", Category::Parties),
    ("brokerRegistration", Category::Parties),
    ("propertyId", Category::Property),
    ("clauses", Category::Legal),
];

struct Checker {
    errors: Vec<ValidationIssue>,
    warnings: Vec<ValidationWarning>,
    passed: u32,
}

impl Checker {
    fn required(&mut self, ok: bool, field: &'static str, category: Category, message: &str) {
        if ok {
            self.passed += 1;
        } else {
            self.errors.push(ValidationIssue {
                field,
                category,
                message: message.to_string(),
            });
        }
    }

    fn warn(&mut self, field: &'static str, message: &str, recommendation: &str) {
        self.warnings.push(ValidationWarning {
            field,
            message: message.to_string(),
            recommendation: recommendation.to_string(),
        });
    }
}

/// Validate field completeness and legal compliance of a contract.
pub fn validate(contract: &Contract) -> ValidationReport {
    let mut c = Checker {
        errors: Vec::new(),
        warnings: Vec::new(),
        passed: 0,
    };
    let terms = &contract.terms;

    // financial
    c.required(
        terms.monthly_rent_cents > 0,
        "monthlyRent",
        Category::Financial,
        "monthly rent must be greater than zero",
    );
    c.required(
        terms.due_day.is_some_and(|d| (1..=31).contains(&d)),
        "dueDay",
        Category::Financial,
        "due day must be between 1 and 31",
    );
    if terms.due_day.is_some_and(|d| d > 28) {
        c.warn(
            "dueDay",
            "due day above 28 does not exist in every month",
            "use a due day of 28 or lower so every month has a collection date",
        );
    }
    if terms.late_fee_bps > 1_000 {
        c.warn(
            "lateFeePercent",
            "late fee above 10% may be unenforceable",
            "keep the late fee at or below 10%",
        );
    }
    if terms.interest_bps > 100 {
        c.warn(
            "interestPercent",
            "monthly interest above 1% may be unenforceable",
            "keep monthly interest at or below 1%",
        );
    }
    if terms.early_termination_months > 3 {
        c.warn(
            "earlyTerminationPenalty",
            "early termination penalty above 3 months of rent is unusual",
            "consider a penalty of at most 3 months of rent",
        );
    }
    if terms.deposit_cents > 0
        && terms.monthly_rent_cents > 0
        && terms.deposit_cents > terms.monthly_rent_cents.saturating_mul(3)
    {
        c.warn(
            "depositAmount",
            "deposit exceeds three months of rent",
            "cap the security deposit at three months of rent",
        );
    }

    // temporal
    c.required(
        terms.start_date.is_some(),
        "startDate",
        Category::Temporal,
        "start date is required",
    );
    c.required(
        terms.end_date.is_some(),
        "endDate",
        Category::Temporal,
        "end date is required",
    );
    if let (Some(start), Some(end)) = (&terms.start_date, &terms.end_date) {
        let start = start.to_datetime_utc();
        let end = end.to_datetime_utc();
        if end <= start {
            c.errors.push(ValidationIssue {
                field: "endDate",
                category: Category::Temporal,
                message: "end date must be strictly after start date".to_string(),
            });
        } else if (end - start).num_days() < 365 {
            c.warn(
                "endDate",
                "contract duration is under 12 months",
                "residential leases shorter than 12 months lose renewal protections",
            );
        }
    }

    // parties
    c.required(
        contract.tenant.document.is_some(),
        "tenantDocument",
        Category::Parties,
        "tenant tax document is required",
    );
    c.required(
        contract.tenant.email.is_some(),
        "tenantEmail",
        Category::Parties,
        "tenant email is required for the signing invitation",
    );
    c.required(
        contract.owner.document.is_some(),
        "ownerDocument",
        Category::Parties,
        "owner tax document is required",
    );
    let agency_registration = contract
        .agency
        .as_ref()
        .and_then(|a| a.registration.as_ref());
    match (&contract.broker_registration, agency_registration) {
        (Some(_), _) => c.passed += 1,
        (None, Some(_)) => {
            // downgraded: the associated agency supplies a registration
            c.passed += 1;
            c.warn(
                "brokerRegistration",
                "broker registration missing; falling back to the agency registration",
                "record the individual broker registration on the contract",
            );
        }
        (None, None) => c.errors.push(ValidationIssue {
            field: "brokerRegistration",
            category: Category::Parties,
            message: "broker registration is required when no agency registration exists"
                .to_string(),
        }),
    }

    // property
    c.required(
        contract.property_id.is_some(),
        "propertyId",
        Category::Property,
        "a property reference is required",
    );

    // legal
    c.required(
        contract.clauses.as_ref().is_some_and(|c| !c.is_empty()),
        "clauses",
        Category::Legal,
        "the clause set must be present",
    );
    if let Some(index) = &terms.readjustment_index {
        if !KNOWN_INDICES.contains(&index.as_str()) {
            c.warn(
                "readjustmentIndex",
                "readjustment index is not a recognized market index",
                "use one of IGPM, IPCA, INPC, IGP-DI or INCC",
            );
        }
    }

    let total = REQUIRED_FIELDS.len() as u32;
    ValidationReport {
        valid: c.errors.is_empty(),
        score: c.passed * 100 / total,
        errors: c.errors,
        warnings: c.warnings,
    }
}
