use regex::Regex;
use serde::Deserialize;
use std::sync::OnceLock;
use thiserror::Error;

/// Subject recorded and mailed when the visitor leaves the field empty.
pub const DEFAULT_SUBJECT: &str = "No Subject";

// Loose on purpose: a typo check for the visitor, not an RFC 5322 parser.
const EMAIL_PATTERN: &str = r"^[\w.-]+@[\w.-]+\.\w+$";

static EMAIL_REGEX: OnceLock<Regex> = OnceLock::new();

/// The contact form fields as posted. Absent fields are treated like empty ones.
#[derive(Deserialize, Debug, Default, Clone)]
pub struct ContactForm {
    pub name: Option<String>,
    pub email: Option<String>,
    pub subject: Option<String>,
    pub message: Option<String>,
}

/// A contact form entry which passed validation. All fields are trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Submission {
    pub name: String,
    pub email: String,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum ValidationError {
    #[error("Please fill in all required fields.")]
    MissingFields,
    #[error("Please enter a valid email address.")]
    InvalidEmail,
}

impl ContactForm {
    pub fn validate(&self) -> Result<Submission, ValidationError> {
        let name = trimmed(&self.name);
        let email = trimmed(&self.email);
        let subject = trimmed(&self.subject);
        let message = trimmed(&self.message);

        if name.is_empty() || email.is_empty() || message.is_empty() {
            return Err(ValidationError::MissingFields);
        }
        if !is_valid_email(email) {
            return Err(ValidationError::InvalidEmail);
        }

        Ok(Submission {
            name: name.into(),
            email: email.into(),
            subject: if subject.is_empty() {
                DEFAULT_SUBJECT.into()
            } else {
                subject.into()
            },
            message: message.into(),
        })
    }
}

pub fn is_valid_email(email: &str) -> bool {
    EMAIL_REGEX
        .get_or_init(|| Regex::new(EMAIL_PATTERN).unwrap())
        .is_match(email)
}

fn trimmed(field: &Option<String>) -> &str {
    field.as_deref().map(str::trim).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::{is_valid_email, ContactForm, Submission, ValidationError, DEFAULT_SUBJECT};
    use googletest::prelude::*;

    fn form(name: &str, email: &str, subject: &str, message: &str) -> ContactForm {
        ContactForm {
            name: Some(name.into()),
            email: Some(email.into()),
            subject: Some(subject.into()),
            message: Some(message.into()),
        }
    }

    #[test]
    fn accepts_complete_form() -> Result<()> {
        let result = form("Ada", "ada@example.com", "Hello", "A message").validate();

        verify_that!(
            result,
            ok(eq(Submission {
                name: "Ada".into(),
                email: "ada@example.com".into(),
                subject: "Hello".into(),
                message: "A message".into(),
            }))
        )
    }

    #[test]
    fn trims_surrounding_whitespace() -> Result<()> {
        let result = form("  Ada \n", " ada@example.com ", "\tHello ", " A message  ").validate();

        verify_that!(
            result,
            ok(matches_pattern!(Submission {
                name: eq("Ada"),
                email: eq("ada@example.com"),
                subject: eq("Hello"),
                message: eq("A message"),
            }))
        )
    }

    #[test]
    fn substitutes_placeholder_for_empty_subject() -> Result<()> {
        let result = form("Ada", "ada@example.com", "   ", "A message").validate();

        verify_that!(
            result,
            ok(matches_pattern!(Submission {
                subject: eq(DEFAULT_SUBJECT)
            }))
        )
    }

    #[test]
    fn substitutes_placeholder_for_absent_subject() -> Result<()> {
        let result = ContactForm {
            subject: None,
            ..form("Ada", "ada@example.com", "", "A message")
        }
        .validate();

        verify_that!(
            result,
            ok(matches_pattern!(Submission {
                subject: eq(DEFAULT_SUBJECT)
            }))
        )
    }

    #[test]
    fn rejects_blank_name() -> Result<()> {
        let result = form("   ", "ada@example.com", "Hello", "A message").validate();

        verify_that!(result, err(eq(ValidationError::MissingFields)))
    }

    #[test]
    fn rejects_absent_email() -> Result<()> {
        let result = ContactForm {
            email: None,
            ..form("Ada", "", "Hello", "A message")
        }
        .validate();

        verify_that!(result, err(eq(ValidationError::MissingFields)))
    }

    #[test]
    fn rejects_blank_message() -> Result<()> {
        let result = form("Ada", "ada@example.com", "Hello", "\n\n").validate();

        verify_that!(result, err(eq(ValidationError::MissingFields)))
    }

    #[test]
    fn reports_missing_fields_before_invalid_email() -> Result<()> {
        let result = form("Ada", "not-an-email", "Hello", "").validate();

        verify_that!(result, err(eq(ValidationError::MissingFields)))
    }

    #[test]
    fn rejects_malformed_email() -> Result<()> {
        let result = form("Ada", "not-an-email", "Hello", "A message").validate();

        verify_that!(result, err(eq(ValidationError::InvalidEmail)))
    }

    #[test]
    fn user_facing_messages() -> Result<()> {
        verify_that!(
            ValidationError::MissingFields.to_string(),
            eq("Please fill in all required fields.")
        )?;
        verify_that!(
            ValidationError::InvalidEmail.to_string(),
            eq("Please enter a valid email address.")
        )
    }

    #[googletest::test]
    fn email_pattern() {
        expect_that!(is_valid_email("user@example.com"), eq(true));
        expect_that!(is_valid_email("first.last-name@mail.example.co"), eq(true));
        expect_that!(is_valid_email("under_score@example.io"), eq(true));
        expect_that!(is_valid_email("not-an-email"), eq(false));
        expect_that!(is_valid_email("a@b"), eq(false));
        expect_that!(is_valid_email("user@example."), eq(false));
        expect_that!(is_valid_email("user name@example.com"), eq(false));
        expect_that!(is_valid_email("@example.com"), eq(false));
    }
}
