//! `/api/contacts`: the authenticated user's address book.

use super::AppState;
use super::extract::{ApiJson, ApiPath, ApiQuery, ClientIp, CurrentUser};
use super::schemas::{BirthdayQuery, ContactModel, ContactPatchModel, ContactQuery, ContactResponse};
use crate::error::ApiError;
use crate::security::RouteClass;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use chrono::{Days, NaiveDate, Utc};
use validator::Validate;

/// Longest birthday window, in days.
const BIRTHDAY_WINDOW_DAYS: u64 = 7;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/api/contacts", get(list_contacts).post(create_contact))
        .route("/api/contacts/", get(list_contacts).post(create_contact))
        .route("/api/contacts/birthdays", get(upcoming_birthdays))
        .route(
            "/api/contacts/:contact_id",
            get(read_contact)
                .put(update_contact)
                .patch(patch_contact)
                .delete(remove_contact),
        )
}

fn not_found() -> ApiError {
    ApiError::not_found("Contact not found")
}

/// Resolve the optional query bounds to a window of at most seven days.
pub(crate) fn birthday_window(
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
    today: NaiveDate,
) -> Result<(NaiveDate, NaiveDate), ApiError> {
    let span = Days::new(BIRTHDAY_WINDOW_DAYS);
    let out_of_range = || ApiError::unprocessable("Date is out of range");
    match (from, to) {
        (Some(from), Some(to)) => {
            if from > to {
                return Err(ApiError::unprocessable(
                    "The {from_date} parameter cannot be greater than the {to_date} parameter",
                ));
            }
            let cap = from.checked_add_days(span).ok_or_else(out_of_range)?;
            Ok((from, to.min(cap)))
        }
        (Some(from), None) => Ok((from, from.checked_add_days(span).ok_or_else(out_of_range)?)),
        (None, Some(to)) => Ok((to.checked_sub_days(span).ok_or_else(out_of_range)?, to)),
        (None, None) => Ok((today, today.checked_add_days(span).ok_or_else(out_of_range)?)),
    }
}

async fn create_contact(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    ApiJson(body): ApiJson<ContactModel>,
) -> Result<(StatusCode, Json<ContactResponse>), ApiError> {
    state.admit(RouteClass::ContactsWrite, ip)?;
    body.validate()?;
    if state
        .store
        .contact_by_email(user.id, &body.email)
        .await?
        .is_some()
    {
        return Err(ApiError::Conflict(
            "A contact with this email address already exists".into(),
        ));
    }

    let contact = state.store.create_contact(user.id, body.into_input()).await?;
    Ok((StatusCode::CREATED, Json(contact.into())))
}

async fn list_contacts(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<ContactQuery>,
) -> Result<Json<Vec<ContactResponse>>, ApiError> {
    state.admit(RouteClass::ContactsRead, ip)?;
    let filter = query.into_filter()?;
    let contacts = state.store.list_contacts(user.id, &filter).await?;
    Ok(Json(contacts.into_iter().map(Into::into).collect()))
}

async fn upcoming_birthdays(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    ApiQuery(query): ApiQuery<BirthdayQuery>,
) -> Result<Json<Vec<ContactResponse>>, ApiError> {
    state.admit(RouteClass::ContactsRead, ip)?;
    let today = Utc::now().date_naive();
    let (from, to) = birthday_window(query.from_date, query.to_date, today)?;
    let contacts = state.store.birthdays_between(user.id, from, to).await?;
    Ok(Json(contacts.into_iter().map(Into::into).collect()))
}

async fn read_contact(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    ApiPath(contact_id): ApiPath<i64>,
) -> Result<Json<ContactResponse>, ApiError> {
    state.admit(RouteClass::ContactRead, ip)?;
    let contact = state
        .store
        .contact_by_id(user.id, contact_id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(contact.into()))
}

async fn update_contact(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    ApiPath(contact_id): ApiPath<i64>,
    ApiJson(body): ApiJson<ContactModel>,
) -> Result<Json<ContactResponse>, ApiError> {
    state.admit(RouteClass::ContactsWrite, ip)?;
    body.validate()?;
    let contact = state
        .store
        .update_contact(user.id, contact_id, body.into_input())
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(contact.into()))
}

async fn patch_contact(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    ApiPath(contact_id): ApiPath<i64>,
    ApiJson(body): ApiJson<ContactPatchModel>,
) -> Result<Json<ContactResponse>, ApiError> {
    state.admit(RouteClass::ContactsWrite, ip)?;
    body.validate()?;
    let patch = body.into_patch();
    if patch.is_empty() {
        return Err(ApiError::unprocessable(
            "At least one body field must be present",
        ));
    }
    let contact = state
        .store
        .patch_contact(user.id, contact_id, patch)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(contact.into()))
}

async fn remove_contact(
    State(state): State<AppState>,
    ClientIp(ip): ClientIp,
    CurrentUser(user): CurrentUser,
    ApiPath(contact_id): ApiPath<i64>,
) -> Result<Json<ContactResponse>, ApiError> {
    state.admit(RouteClass::ContactsWrite, ip)?;
    let contact = state
        .store
        .remove_contact(user.id, contact_id)
        .await?
        .ok_or_else(not_found)?;
    Ok(Json(contact.into()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    #[test]
    fn window_defaults_to_next_week() {
        let today = d(2024, 5, 1);
        assert_eq!(birthday_window(None, None, today).unwrap(), (today, d(2024, 5, 8)));
    }

    #[test]
    fn window_from_one_side() {
        let today = d(2024, 5, 1);
        assert_eq!(
            birthday_window(Some(d(2024, 12, 28)), None, today).unwrap(),
            (d(2024, 12, 28), d(2025, 1, 4))
        );
        assert_eq!(
            birthday_window(None, Some(d(2024, 3, 3)), today).unwrap(),
            (d(2024, 2, 25), d(2024, 3, 3))
        );
    }

    #[test]
    fn long_window_is_clamped() {
        let today = d(2024, 5, 1);
        assert_eq!(
            birthday_window(Some(d(2024, 6, 1)), Some(d(2024, 7, 1)), today).unwrap(),
            (d(2024, 6, 1), d(2024, 6, 8))
        );
        assert_eq!(
            birthday_window(Some(d(2024, 6, 1)), Some(d(2024, 6, 3)), today).unwrap(),
            (d(2024, 6, 1), d(2024, 6, 3))
        );
    }

    #[test]
    fn reversed_window_is_rejected() {
        let err = birthday_window(Some(d(2024, 6, 2)), Some(d(2024, 6, 1)), d(2024, 5, 1))
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert_eq!(
            err.detail(),
            "The {from_date} parameter cannot be greater than the {to_date} parameter"
        );
    }
}
