//! Payload schemas.
//!
//! Forms hold raw optional strings as they arrive from the transport. Each
//! `into_*` conversion trims the values, runs the `validator` rules and
//! either yields the typed value the core works with or the full list of
//! offending fields, in declaration order.

use crate::request_store::NewRequest;
use crate::user_store::{Profile, ProfilePatch};
use serde::{Deserialize, Serialize};
use std::fmt;
use validator::{Validate, ValidationError, ValidationErrors};

/// One offending field
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for FieldError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Fields of a create-user request
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateUserForm {
    #[validate(required, length(min = 1))]
    pub name: Option<String>,
    #[validate(required, length(min = 1))]
    pub surname: Option<String>,
    #[validate(required, length(min = 1))]
    pub patronymic: Option<String>,
    #[validate(required, length(min = 1), custom(function = "validate_phone"))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(required, length(min = 1))]
    pub address: Option<String>,
}

/// Fields of an update-user request; `key` addresses the record
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct UpdateUserForm {
    #[validate(required, length(min = 1))]
    pub key: Option<String>,
    #[validate(length(min = 1))]
    pub name: Option<String>,
    #[validate(length(min = 1))]
    pub surname: Option<String>,
    #[validate(length(min = 1))]
    pub patronymic: Option<String>,
    #[validate(length(min = 1), custom(function = "validate_phone"))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(length(min = 1))]
    pub address: Option<String>,
}

/// Fields of a contact request
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct CreateRequestForm {
    #[validate(required, length(min = 1))]
    pub name: Option<String>,
    #[validate(required, length(min = 1))]
    pub surname: Option<String>,
    pub patronymic: Option<String>,
    #[validate(required, length(min = 1), custom(function = "validate_phone"))]
    pub phone: Option<String>,
    #[validate(email)]
    pub email: Option<String>,
    #[validate(required, length(min = 1))]
    pub text: Option<String>,
}

/// Digits with common separators, at least five digits
fn validate_phone(value: &str) -> Result<(), ValidationError> {
    // Blank values are reported by the length rule
    if value.is_empty() {
        return Ok(());
    }
    let digits = value.chars().filter(char::is_ascii_digit).count();
    let allowed = value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | ' ' | '(' | ')'));
    if allowed && digits >= 5 {
        Ok(())
    } else {
        Err(ValidationError::new("phone"))
    }
}

fn trimmed(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string())
}

/// Blank counts as absent
fn present(value: Option<String>) -> Option<String> {
    trimmed(value).filter(|v| !v.is_empty())
}

fn message(field: &str, error: &ValidationError) -> String {
    if let Some(message) = &error.message {
        return message.to_string();
    }
    match error.code.as_ref() {
        "required" => format!("The '{field}' field is required."),
        "length" => format!("The '{field}' field must not be empty."),
        "email" => format!("The '{field}' field must be a valid e-mail."),
        "phone" => format!("The '{field}' field must be a phone number."),
        _ => format!("The '{field}' field is invalid."),
    }
}

/// First error of every failing field, ordered as `fields`
fn field_errors(errors: &ValidationErrors, fields: &[&str]) -> Vec<FieldError> {
    let by_field = errors.field_errors();
    fields
        .iter()
        .filter_map(|field| {
            by_field
                .get(*field)
                .and_then(|list| list.first())
                .map(|error| FieldError {
                    field: field.to_string(),
                    message: message(field, error),
                })
        })
        .collect()
}

impl CreateUserForm {
    const FIELDS: [&'static str; 6] = ["name", "surname", "patronymic", "phone", "email", "address"];

    pub fn into_profile(self) -> Result<Profile, Vec<FieldError>> {
        let form = Self {
            name: trimmed(self.name),
            surname: trimmed(self.surname),
            patronymic: trimmed(self.patronymic),
            phone: trimmed(self.phone),
            email: present(self.email),
            address: trimmed(self.address),
        };
        form.validate()
            .map_err(|e| field_errors(&e, &Self::FIELDS))?;

        Ok(Profile {
            name: form.name.unwrap_or_default(),
            surname: form.surname.unwrap_or_default(),
            patronymic: form.patronymic.unwrap_or_default(),
            phone: form.phone.unwrap_or_default(),
            email: form.email,
            address: form.address.unwrap_or_default(),
        })
    }
}

impl UpdateUserForm {
    const FIELDS: [&'static str; 7] = [
        "key",
        "name",
        "surname",
        "patronymic",
        "phone",
        "email",
        "address",
    ];

    /// Returns the raw key alongside the patch; the key is parsed by the
    /// caller. A supplied blank email clears the stored one.
    pub fn into_patch(self) -> Result<(String, ProfilePatch), Vec<FieldError>> {
        let email_supplied = self.email.is_some();
        let form = Self {
            key: trimmed(self.key),
            name: trimmed(self.name),
            surname: trimmed(self.surname),
            patronymic: trimmed(self.patronymic),
            phone: trimmed(self.phone),
            email: present(self.email),
            address: trimmed(self.address),
        };
        form.validate()
            .map_err(|e| field_errors(&e, &Self::FIELDS))?;

        let patch = ProfilePatch {
            name: form.name,
            surname: form.surname,
            patronymic: form.patronymic,
            phone: form.phone,
            email: email_supplied.then_some(form.email),
            address: form.address,
        };
        Ok((form.key.unwrap_or_default(), patch))
    }
}

impl CreateRequestForm {
    const FIELDS: [&'static str; 5] = ["name", "surname", "phone", "email", "text"];

    pub fn into_request(self) -> Result<NewRequest, Vec<FieldError>> {
        let form = Self {
            name: trimmed(self.name),
            surname: trimmed(self.surname),
            patronymic: present(self.patronymic),
            phone: trimmed(self.phone),
            email: present(self.email),
            text: trimmed(self.text),
        };
        form.validate()
            .map_err(|e| field_errors(&e, &Self::FIELDS))?;

        Ok(NewRequest {
            name: form.name.unwrap_or_default(),
            surname: form.surname.unwrap_or_default(),
            patronymic: form.patronymic,
            phone: form.phone.unwrap_or_default(),
            email: form.email,
            text: form.text.unwrap_or_default(),
        })
    }
}
