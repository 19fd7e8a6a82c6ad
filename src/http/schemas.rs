//! Request and response bodies with their validation rules.

use crate::db::{Contact, ContactFilter, ContactInput, ContactPatch, User};
use crate::error::ApiError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use validator::{Validate, ValidationError};

// ============================================================================
// Custom validators
// ============================================================================

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    let mut error = ValidationError::new(code);
    error.message = Some(Cow::Borrowed(message));
    error
}

/// bcrypt only looks at the first 72 bytes, so longer passwords are refused.
fn validate_password(value: &str) -> Result<(), ValidationError> {
    if value.len() < 6 || value.len() > 72 {
        return Err(invalid("password", "must be between 6 and 72 bytes"));
    }
    Ok(())
}

fn validate_phone(value: &str) -> Result<(), ValidationError> {
    if !value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '(' | ')' | ' '))
    {
        return Err(invalid("phone", "may only contain digits, spaces and + - ( )"));
    }
    Ok(())
}

// ============================================================================
// Users and auth
// ============================================================================

#[derive(Debug, Deserialize, Validate)]
pub struct SignupRequest {
    #[validate(length(min = 3, max = 50))]
    pub username: String,
    #[validate(email, length(max = 250))]
    pub email: String,
    #[validate(custom = "validate_password")]
    pub password: String,
}

/// Public view of a user.
#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct UserDb {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    pub avatar: Option<String>,
}

impl From<User> for UserDb {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            created_at: user.created_at,
            avatar: user.avatar,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct SignupResponse {
    pub user: UserDb,
    pub detail: &'static str,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String, refresh_token: String) -> Self {
        Self {
            access_token,
            refresh_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// OAuth2 password-grant form; `username` carries the e-mail.
#[derive(Debug, Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct EmailRequest {
    #[validate(email, length(max = 250))]
    pub email: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct ChangePasswordRequest {
    pub old_password: String,
    #[validate(custom = "validate_password")]
    pub new_password: String,
}

#[derive(Debug, Deserialize, Validate)]
pub struct NewPasswordForm {
    #[validate(custom = "validate_password")]
    pub password: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

impl MessageResponse {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TimeoutLink {
    pub seconds: i64,
}

#[derive(Debug, Serialize)]
pub struct ResetRequestedResponse {
    pub message: &'static str,
    pub timeout_link: TimeoutLink,
}

// ============================================================================
// Contacts
// ============================================================================

/// Full contact body for create and replace.
#[derive(Debug, Deserialize, Validate)]
pub struct ContactModel {
    #[validate(length(min = 1, max = 100))]
    pub first_name: String,
    #[validate(length(min = 1, max = 100))]
    pub last_name: String,
    #[validate(email, length(max = 100))]
    pub email: String,
    #[validate(length(min = 3, max = 20), custom = "validate_phone")]
    pub phone_number: String,
    pub birth_date: NaiveDate,
    #[serde(default)]
    #[validate(length(max = 500))]
    pub additional_data: Option<String>,
}

impl ContactModel {
    pub fn into_input(self) -> ContactInput {
        ContactInput {
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone_number: self.phone_number,
            birth_date: self.birth_date,
            additional_data: self.additional_data,
        }
    }
}

/// Partial contact body; at least one field must be present.
#[derive(Debug, Default, Deserialize, Validate)]
pub struct ContactPatchModel {
    #[validate(length(min = 1, max = 100))]
    pub first_name: Option<String>,
    #[validate(length(min = 1, max = 100))]
    pub last_name: Option<String>,
    #[validate(email, length(max = 100))]
    pub email: Option<String>,
    #[validate(length(min = 3, max = 20), custom = "validate_phone")]
    pub phone_number: Option<String>,
    pub birth_date: Option<NaiveDate>,
    #[validate(length(max = 500))]
    pub additional_data: Option<String>,
}

impl ContactPatchModel {
    pub fn into_patch(self) -> ContactPatch {
        ContactPatch {
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
            phone_number: self.phone_number,
            birth_date: self.birth_date,
            additional_data: self.additional_data,
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
pub struct ContactResponse {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub birth_date: NaiveDate,
    pub additional_data: Option<String>,
}

impl From<Contact> for ContactResponse {
    fn from(contact: Contact) -> Self {
        Self {
            id: contact.id,
            first_name: contact.first_name,
            last_name: contact.last_name,
            email: contact.email,
            phone_number: contact.phone_number,
            birth_date: contact.birth_date,
            additional_data: contact.additional_data,
        }
    }
}

#[derive(Debug, Default, Deserialize, Validate)]
pub struct ContactQuery {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
    #[validate(length(min = 3, max = 100))]
    pub first_name: Option<String>,
    #[validate(length(min = 3, max = 100))]
    pub last_name: Option<String>,
    pub email: Option<String>,
}

impl ContactQuery {
    /// Validate and turn into a store filter.
    pub fn into_filter(self) -> Result<ContactFilter, ApiError> {
        self.validate()?;
        let defaults = ContactFilter::default();
        let skip = self.skip.unwrap_or(defaults.skip);
        if skip < 0 {
            return Err(ApiError::unprocessable("skip must be greater than or equal to 0"));
        }
        let limit = self.limit.unwrap_or(defaults.limit);
        if !(1..=100).contains(&limit) {
            return Err(ApiError::unprocessable("limit must be between 1 and 100"));
        }
        Ok(ContactFilter {
            skip,
            limit,
            first_name: self.first_name,
            last_name: self.last_name,
            email: self.email,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct BirthdayQuery {
    pub from_date: Option<NaiveDate>,
    pub to_date: Option<NaiveDate>,
}
