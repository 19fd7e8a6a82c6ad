//! Database module for persistent storage.
//!
//! Users and their contacts live behind the [`Store`] trait with two backends:
//! - [`PgStore`]: PostgreSQL via SQLx with embedded migrations
//! - [`MemoryStore`]: process-local maps, for development and tests
//!
//! Every contact operation takes the owning user's id. A contact that
//! belongs to somebody else is indistinguishable from a missing one.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Database errors.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("user already exists: {0}")]
    UserExists(String),
    #[error("contact already exists: {0}")]
    ContactExists(String),
}

/// Shared handle to the configured backend.
pub type Database = Arc<dyn Store>;

/// A registered user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub created_at: DateTime<Utc>,
    pub avatar: Option<String>,
    pub refresh_token: Option<String>,
    pub confirmed: bool,
}

/// Fields needed to register a user.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub password_hash: String,
    pub avatar: Option<String>,
}

/// A contact owned by a user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contact {
    pub id: i64,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub birth_date: NaiveDate,
    pub additional_data: Option<String>,
    pub user_id: i64,
}

/// Every user-editable field of a contact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactInput {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone_number: String,
    pub birth_date: NaiveDate,
    pub additional_data: Option<String>,
}

/// Partial contact update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContactPatch {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub phone_number: Option<String>,
    pub birth_date: Option<NaiveDate>,
    pub additional_data: Option<String>,
}

impl ContactPatch {
    pub fn is_empty(&self) -> bool {
        self.first_name.is_none()
            && self.last_name.is_none()
            && self.email.is_none()
            && self.phone_number.is_none()
            && self.birth_date.is_none()
            && self.additional_data.is_none()
    }

    /// Apply the provided fields to an existing contact.
    pub fn apply(&self, contact: &mut Contact) {
        if let Some(ref v) = self.first_name {
            contact.first_name = v.clone();
        }
        if let Some(ref v) = self.last_name {
            contact.last_name = v.clone();
        }
        if let Some(ref v) = self.email {
            contact.email = v.clone();
        }
        if let Some(ref v) = self.phone_number {
            contact.phone_number = v.clone();
        }
        if let Some(v) = self.birth_date {
            contact.birth_date = v;
        }
        if let Some(ref v) = self.additional_data {
            contact.additional_data = Some(v.clone());
        }
    }
}

/// Exact-match filters and paging for contact listings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactFilter {
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub email: Option<String>,
    pub skip: i64,
    pub limit: i64,
}

impl Default for ContactFilter {
    fn default() -> Self {
        Self {
            first_name: None,
            last_name: None,
            email: None,
            skip: 0,
            limit: 10,
        }
    }
}

impl ContactFilter {
    pub fn matches(&self, contact: &Contact) -> bool {
        self.first_name
            .as_deref()
            .is_none_or(|v| contact.first_name == v)
            && self.last_name.as_deref().is_none_or(|v| contact.last_name == v)
            && self.email.as_deref().is_none_or(|v| contact.email == v)
    }
}

/// Month and day of a date, ordered the way `MM-DD` strings sort.
pub fn month_day(date: NaiveDate) -> (u32, u32) {
    (date.month(), date.day())
}

/// Whether `birth_date`'s month-day falls inside the inclusive window
/// `[from, to]`. Windows that cross new year wrap around.
pub fn birthday_in_window(birth_date: NaiveDate, from: NaiveDate, to: NaiveDate) -> bool {
    let md = month_day(birth_date);
    let (start, end) = (month_day(from), month_day(to));
    if start <= end {
        start <= md && md <= end
    } else {
        md >= start || md <= end
    }
}

/// Sort key placing month-days in upcoming order starting at `from`.
pub fn days_until_birthday(birth_date: NaiveDate, from: NaiveDate) -> u32 {
    let (m, d) = month_day(birth_date);
    let (fm, fd) = month_day(from);
    let key = m * 32 + d;
    let start = fm * 32 + fd;
    if key >= start {
        key - start
    } else {
        key + 13 * 32 - start
    }
}

/// Storage backend for users and contacts.
#[async_trait]
pub trait Store: Send + Sync {
    /// Health probe (`SELECT 1`).
    async fn ping(&self) -> Result<(), DbError>;

    // ---- users ----

    async fn create_user(&self, user: NewUser) -> Result<User, DbError>;
    async fn user_by_email(&self, email: &str) -> Result<Option<User>, DbError>;
    async fn user_by_id(&self, id: i64) -> Result<Option<User>, DbError>;
    async fn update_refresh_token(&self, user_id: i64, token: Option<&str>)
    -> Result<(), DbError>;
    async fn update_avatar(&self, user_id: i64, url: &str) -> Result<Option<User>, DbError>;
    async fn update_password(&self, user_id: i64, hash: &str) -> Result<Option<User>, DbError>;
    /// Fails with [`DbError::UserExists`] when another user owns `email`.
    async fn update_email(&self, user_id: i64, email: &str) -> Result<Option<User>, DbError>;
    async fn confirm_email(&self, user_id: i64) -> Result<(), DbError>;

    // ---- contacts ----

    async fn contact_by_id(&self, user_id: i64, id: i64) -> Result<Option<Contact>, DbError>;
    async fn contact_by_email(&self, user_id: i64, email: &str)
    -> Result<Option<Contact>, DbError>;
    async fn list_contacts(
        &self,
        user_id: i64,
        filter: &ContactFilter,
    ) -> Result<Vec<Contact>, DbError>;
    /// Fails with [`DbError::ContactExists`] on a duplicate (user, email).
    async fn create_contact(&self, user_id: i64, input: ContactInput)
    -> Result<Contact, DbError>;
    async fn update_contact(
        &self,
        user_id: i64,
        id: i64,
        input: ContactInput,
    ) -> Result<Option<Contact>, DbError>;
    async fn patch_contact(
        &self,
        user_id: i64,
        id: i64,
        patch: ContactPatch,
    ) -> Result<Option<Contact>, DbError>;
    /// Returns the removed contact.
    async fn remove_contact(&self, user_id: i64, id: i64) -> Result<Option<Contact>, DbError>;
    /// Contacts whose birthday month-day is within `[from, to]`, upcoming first.
    async fn birthdays_between(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Contact>, DbError>;
}
