//! Identifier validation.
//!
//! Validation is pure and performs no network I/O.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

use crate::{ReconError, Result};

/// Outcome of validating a candidate identifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Validation {
    /// Whether the candidate is well formed.
    pub well_formed: bool,
    /// Free-form facts about the candidate, or the rejection reason.
    pub details: BTreeMap<String, String>,
}

impl Validation {
    fn rejected(reason: impl Into<String>) -> Self {
        let mut details = BTreeMap::new();
        details.insert("reason".to_string(), reason.into());
        Self {
            well_formed: false,
            details,
        }
    }

    /// The rejection reason, if any.
    pub fn reason(&self) -> Option<&str> {
        self.details.get("reason").map(String::as_str)
    }
}

/// Decides whether a candidate identifier may be searched for.
pub trait IdentifierValidator: Send + Sync {
    /// Validates a candidate. Must not perform network I/O.
    fn validate(&self, candidate: &str) -> Validation;
}

/// An identifier that passed validation. Immutable once accepted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Identifier(String);

impl Identifier {
    /// Validates `candidate` and wraps it on success.
    pub fn parse(candidate: &str, validator: &dyn IdentifierValidator) -> Result<Self> {
        let candidate = candidate.trim();
        let validation = validator.validate(candidate);
        if validation.well_formed {
            Ok(Self(candidate.to_string()))
        } else {
            Err(ReconError::InvalidIdentifier(
                validation
                    .reason()
                    .unwrap_or("rejected by validator")
                    .to_string(),
            ))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Identifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

const DISPOSABLE_DOMAINS: &[&str] = &[
    "10minutemail.com",
    "tempmail.org",
    "guerrillamail.com",
    "mailinator.com",
    "throwaway.email",
    "temp-mail.org",
    "yopmail.com",
    "maildrop.cc",
    "trashmail.com",
    "getnada.com",
    "mohmal.com",
    "sharklasers.com",
];

const PROVIDERS: &[(&str, &str)] = &[
    ("gmail.com", "Google"),
    ("yahoo.com", "Yahoo"),
    ("outlook.com", "Microsoft"),
    ("hotmail.com", "Microsoft"),
    ("live.com", "Microsoft"),
    ("msn.com", "Microsoft"),
    ("aol.com", "AOL"),
    ("icloud.com", "Apple"),
    ("me.com", "Apple"),
    ("mac.com", "Apple"),
    ("protonmail.com", "ProtonMail"),
    ("tutanota.com", "Tutanota"),
    ("zoho.com", "Zoho"),
    ("fastmail.com", "FastMail"),
];

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[a-zA-Z0-9._%+-]+@[a-zA-Z0-9.-]+\.[a-zA-Z]{2,}$")
            .expect("valid email pattern")
    })
}

/// Syntactic email address validator.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmailValidator;

impl EmailValidator {
    pub fn new() -> Self {
        Self
    }
}

impl IdentifierValidator for EmailValidator {
    fn validate(&self, candidate: &str) -> Validation {
        if candidate.is_empty() {
            return Validation::rejected("identifier is empty");
        }
        if !email_pattern().is_match(candidate) {
            return Validation::rejected("not an email address");
        }
        if candidate.matches('@').count() != 1 {
            return Validation::rejected("must contain exactly one '@'");
        }
        if candidate.contains("..") {
            return Validation::rejected("consecutive dots");
        }

        let Some((local, domain)) = candidate.split_once('@') else {
            return Validation::rejected("must contain exactly one '@'");
        };
        if local.is_empty() || local.len() > 64 {
            return Validation::rejected("local part must be 1-64 characters");
        }
        if local.starts_with('.') || local.ends_with('.') {
            return Validation::rejected("local part cannot start or end with a dot");
        }
        if domain.is_empty() || domain.len() > 255 {
            return Validation::rejected("domain must be 1-255 characters");
        }

        let domain_lower = domain.to_lowercase();
        let provider = PROVIDERS
            .iter()
            .find(|(d, _)| *d == domain_lower)
            .map(|(_, name)| *name)
            .unwrap_or("Unknown");
        let disposable = DISPOSABLE_DOMAINS.contains(&domain_lower.as_str());

        let mut details = BTreeMap::new();
        details.insert("local_part".to_string(), local.to_string());
        details.insert("domain".to_string(), domain.to_string());
        details.insert("provider".to_string(), provider.to_string());
        details.insert("disposable".to_string(), disposable.to_string());

        Validation {
            well_formed: true,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn validate(candidate: &str) -> Validation {
        EmailValidator::new().validate(candidate)
    }

    #[test]
    fn test_valid_email() {
        let v = validate("user@example.com");
        assert!(v.well_formed);
        assert_eq!(v.details["local_part"], "user");
        assert_eq!(v.details["domain"], "example.com");
        assert_eq!(v.details["provider"], "Unknown");
        assert_eq!(v.details["disposable"], "false");
    }

    #[test]
    fn test_valid_email_variants() {
        for email in [
            "first.last@example.co.uk",
            "user+tag@example.org",
            "a_b-c%d@sub.domain.io",
        ] {
            assert!(validate(email).well_formed, "{} should be valid", email);
        }
    }

    #[test]
    fn test_invalid_emails() {
        for email in [
            "",
            "plainaddress",
            "@example.com",
            "user@",
            "user@@example.com",
            "user@example",
            "user..name@example.com",
            ".user@example.com",
            "user.@example.com",
            "user@exa mple.com",
        ] {
            let v = validate(email);
            assert!(!v.well_formed, "{} should be invalid", email);
            assert!(v.reason().is_some());
        }
    }

    #[test]
    fn test_local_part_too_long() {
        let email = format!("{}@example.com", "a".repeat(65));
        assert!(!validate(&email).well_formed);
        let email = format!("{}@example.com", "a".repeat(64));
        assert!(validate(&email).well_formed);
    }

    #[test]
    fn test_provider_and_disposable() {
        let v = validate("someone@Gmail.com");
        assert_eq!(v.details["provider"], "Google");
        let v = validate("someone@mailinator.com");
        assert_eq!(v.details["disposable"], "true");
    }

    #[test]
    fn test_identifier_parse_trims() {
        let id = Identifier::parse("  user@example.com ", &EmailValidator).unwrap();
        assert_eq!(id.as_str(), "user@example.com");
        assert_eq!(id.to_string(), "user@example.com");
    }

    #[test]
    fn test_identifier_parse_rejects() {
        let err = Identifier::parse("nope", &EmailValidator).unwrap_err();
        match err {
            ReconError::InvalidIdentifier(reason) => assert_eq!(reason, "not an email address"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[test]
    fn test_identifier_serializes_as_string() {
        let id = Identifier::parse("user@example.com", &EmailValidator).unwrap();
        assert_eq!(serde_json::to_string(&id).unwrap(), "\"user@example.com\"");
    }

    #[test]
    fn test_email_pattern_compiles_once() {
        let first = email_pattern() as *const Regex;
        let second = email_pattern() as *const Regex;
        assert_eq!(first, second);
        assert!(email_pattern().is_match("user@example.com"));
    }
}
