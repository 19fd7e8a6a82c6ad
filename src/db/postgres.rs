//! PostgreSQL store using SQLx.

use super::{Contact, ContactFilter, ContactInput, ContactPatch, DbError, NewUser, Store, User};
use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use tracing::info;

type UserRow = (
    i64,
    String,
    String,
    String,
    DateTime<Utc>,
    Option<String>,
    Option<String>,
    bool,
);

type ContactRow = (
    i64,
    String,
    String,
    String,
    String,
    NaiveDate,
    Option<String>,
    i64,
);

const USER_COLUMNS: &str =
    "id, username, email, password, created_at, avatar, refresh_token, confirmed";

const CONTACT_COLUMNS: &str =
    "id, first_name, last_name, email, phone_number, birth_date, additional_data, user_id";

fn user_from_row(row: UserRow) -> User {
    let (id, username, email, password_hash, created_at, avatar, refresh_token, confirmed) = row;
    User {
        id,
        username,
        email,
        password_hash,
        created_at,
        avatar,
        refresh_token,
        confirmed,
    }
}

fn contact_from_row(row: ContactRow) -> Contact {
    let (id, first_name, last_name, email, phone_number, birth_date, additional_data, user_id) =
        row;
    Contact {
        id,
        first_name,
        last_name,
        email,
        phone_number,
        birth_date,
        additional_data,
        user_id,
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db_err) if db_err.is_unique_violation())
}

/// Store backed by a PostgreSQL connection pool.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connection acquire timeout - prevents connection storms from blocking indefinitely.
    const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(5);

    /// Maximum time a connection can remain idle before being closed.
    const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

    /// Connect to the database, running migrations if needed.
    pub async fn connect(url: &str, max_connections: u32) -> Result<Self, DbError> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(Self::ACQUIRE_TIMEOUT)
            .idle_timeout(Some(Self::IDLE_TIMEOUT))
            .test_before_acquire(true)
            .connect(url)
            .await?;

        info!("Database connected");

        sqlx::migrate!("./migrations").run(&pool).await?;
        info!("Database migrations checked/applied");

        Ok(Self { pool })
    }

    async fn fetch_user(&self, sql: &str, id: i64) -> Result<Option<User>, DbError> {
        let row = sqlx::query_as::<_, UserRow>(sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }
}

#[async_trait]
impl Store for PgStore {
    async fn ping(&self) -> Result<(), DbError> {
        let _: i32 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await?;
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, DbError> {
        let sql = format!(
            "INSERT INTO users (username, email, password, avatar) VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(&user.username)
            .bind(&user.email)
            .bind(&user.password_hash)
            .bind(&user.avatar)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return DbError::UserExists(user.email.clone());
                }
                DbError::from(e)
            })?;
        Ok(user_from_row(row))
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE email = $1");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, DbError> {
        let sql = format!("SELECT {USER_COLUMNS} FROM users WHERE id = $1");
        self.fetch_user(&sql, id).await
    }

    async fn update_refresh_token(
        &self,
        user_id: i64,
        token: Option<&str>,
    ) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET refresh_token = $2 WHERE id = $1")
            .bind(user_id)
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update_avatar(&self, user_id: i64, url: &str) -> Result<Option<User>, DbError> {
        let sql = format!("UPDATE users SET avatar = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .bind(url)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn update_password(&self, user_id: i64, hash: &str) -> Result<Option<User>, DbError> {
        let sql =
            format!("UPDATE users SET password = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .bind(hash)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn update_email(&self, user_id: i64, email: &str) -> Result<Option<User>, DbError> {
        let sql = format!("UPDATE users SET email = $2 WHERE id = $1 RETURNING {USER_COLUMNS}");
        let row = sqlx::query_as::<_, UserRow>(&sql)
            .bind(user_id)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return DbError::UserExists(email.to_string());
                }
                DbError::from(e)
            })?;
        Ok(row.map(user_from_row))
    }

    async fn confirm_email(&self, user_id: i64) -> Result<(), DbError> {
        sqlx::query("UPDATE users SET confirmed = true WHERE id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn contact_by_id(&self, user_id: i64, id: i64) -> Result<Option<Contact>, DbError> {
        let sql = format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE id = $1 AND user_id = $2");
        let row = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(contact_from_row))
    }

    async fn contact_by_email(
        &self,
        user_id: i64,
        email: &str,
    ) -> Result<Option<Contact>, DbError> {
        let sql =
            format!("SELECT {CONTACT_COLUMNS} FROM contacts WHERE email = $1 AND user_id = $2");
        let row = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(email)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(contact_from_row))
    }

    async fn list_contacts(
        &self,
        user_id: i64,
        filter: &ContactFilter,
    ) -> Result<Vec<Contact>, DbError> {
        let sql = format!(
            r#"
            SELECT {CONTACT_COLUMNS}
            FROM contacts
            WHERE user_id = $1
              AND ($2::text IS NULL OR first_name = $2)
              AND ($3::text IS NULL OR last_name = $3)
              AND ($4::text IS NULL OR email = $4)
            ORDER BY id
            OFFSET $5 LIMIT $6
            "#
        );
        let rows = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(user_id)
            .bind(&filter.first_name)
            .bind(&filter.last_name)
            .bind(&filter.email)
            .bind(filter.skip)
            .bind(filter.limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(contact_from_row).collect())
    }

    async fn create_contact(
        &self,
        user_id: i64,
        input: ContactInput,
    ) -> Result<Contact, DbError> {
        let sql = format!(
            r#"
            INSERT INTO contacts
                (first_name, last_name, email, phone_number, birth_date, additional_data, user_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {CONTACT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(&input.first_name)
            .bind(&input.last_name)
            .bind(&input.email)
            .bind(&input.phone_number)
            .bind(input.birth_date)
            .bind(&input.additional_data)
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return DbError::ContactExists(input.email.clone());
                }
                DbError::from(e)
            })?;
        Ok(contact_from_row(row))
    }

    async fn update_contact(
        &self,
        user_id: i64,
        id: i64,
        input: ContactInput,
    ) -> Result<Option<Contact>, DbError> {
        let sql = format!(
            r#"
            UPDATE contacts
            SET first_name = $3, last_name = $4, email = $5, phone_number = $6,
                birth_date = $7, additional_data = $8
            WHERE id = $1 AND user_id = $2
            RETURNING {CONTACT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(&input.first_name)
            .bind(&input.last_name)
            .bind(&input.email)
            .bind(&input.phone_number)
            .bind(input.birth_date)
            .bind(&input.additional_data)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return DbError::ContactExists(input.email.clone());
                }
                DbError::from(e)
            })?;
        Ok(row.map(contact_from_row))
    }

    async fn patch_contact(
        &self,
        user_id: i64,
        id: i64,
        patch: ContactPatch,
    ) -> Result<Option<Contact>, DbError> {
        let sql = format!(
            r#"
            UPDATE contacts
            SET first_name = COALESCE($3, first_name),
                last_name = COALESCE($4, last_name),
                email = COALESCE($5, email),
                phone_number = COALESCE($6, phone_number),
                birth_date = COALESCE($7, birth_date),
                additional_data = COALESCE($8, additional_data)
            WHERE id = $1 AND user_id = $2
            RETURNING {CONTACT_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(id)
            .bind(user_id)
            .bind(&patch.first_name)
            .bind(&patch.last_name)
            .bind(&patch.email)
            .bind(&patch.phone_number)
            .bind(patch.birth_date)
            .bind(&patch.additional_data)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    return DbError::ContactExists(patch.email.clone().unwrap_or_default());
                }
                DbError::from(e)
            })?;
        Ok(row.map(contact_from_row))
    }

    async fn remove_contact(&self, user_id: i64, id: i64) -> Result<Option<Contact>, DbError> {
        let sql = format!(
            "DELETE FROM contacts WHERE id = $1 AND user_id = $2 RETURNING {CONTACT_COLUMNS}"
        );
        let row = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(id)
            .bind(user_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(contact_from_row))
    }

    async fn birthdays_between(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Contact>, DbError> {
        let start = from.format("%m-%d").to_string();
        let end = to.format("%m-%d").to_string();

        // A window crossing new year matches either side of the boundary.
        let window = if start <= end {
            "to_char(birth_date, 'MM-DD') BETWEEN $2 AND $3"
        } else {
            "(to_char(birth_date, 'MM-DD') >= $2 OR to_char(birth_date, 'MM-DD') <= $3)"
        };
        let sql = format!(
            r#"
            SELECT {CONTACT_COLUMNS}
            FROM contacts
            WHERE user_id = $1 AND {window}
            ORDER BY to_char(birth_date, 'MM-DD') < $2, to_char(birth_date, 'MM-DD'), id
            "#
        );
        let rows = sqlx::query_as::<_, ContactRow>(&sql)
            .bind(user_id)
            .bind(&start)
            .bind(&end)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(contact_from_row).collect())
    }
}
