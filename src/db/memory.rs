//! In-process store used for development and tests.

use super::{
    Contact, ContactFilter, ContactInput, ContactPatch, DbError, NewUser, Store, User,
    birthday_in_window, days_until_birthday,
};
use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::BTreeMap;

#[derive(Default)]
struct Tables {
    users: BTreeMap<i64, User>,
    contacts: BTreeMap<i64, Contact>,
    next_user_id: i64,
    next_contact_id: i64,
}

impl Tables {
    fn user_mut(&mut self, id: i64) -> Option<&mut User> {
        self.users.get_mut(&id)
    }

    fn owned_contact_mut(&mut self, user_id: i64, id: i64) -> Option<&mut Contact> {
        self.contacts.get_mut(&id).filter(|c| c.user_id == user_id)
    }

    fn email_taken(&self, user_id: i64, email: &str, except: Option<i64>) -> bool {
        self.contacts
            .values()
            .any(|c| c.user_id == user_id && c.email == email && Some(c.id) != except)
    }
}

/// Store backed by in-memory maps. Data is lost on restart.
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> Result<(), DbError> {
        Ok(())
    }

    async fn create_user(&self, user: NewUser) -> Result<User, DbError> {
        let mut t = self.tables.write();
        if t.users.values().any(|u| u.email == user.email) {
            return Err(DbError::UserExists(user.email));
        }
        t.next_user_id += 1;
        let record = User {
            id: t.next_user_id,
            username: user.username,
            email: user.email,
            password_hash: user.password_hash,
            created_at: Utc::now(),
            avatar: user.avatar,
            refresh_token: None,
            confirmed: false,
        };
        t.users.insert(record.id, record.clone());
        Ok(record)
    }

    async fn user_by_email(&self, email: &str) -> Result<Option<User>, DbError> {
        let t = self.tables.read();
        Ok(t.users.values().find(|u| u.email == email).cloned())
    }

    async fn user_by_id(&self, id: i64) -> Result<Option<User>, DbError> {
        Ok(self.tables.read().users.get(&id).cloned())
    }

    async fn update_refresh_token(
        &self,
        user_id: i64,
        token: Option<&str>,
    ) -> Result<(), DbError> {
        if let Some(user) = self.tables.write().user_mut(user_id) {
            user.refresh_token = token.map(str::to_string);
        }
        Ok(())
    }

    async fn update_avatar(&self, user_id: i64, url: &str) -> Result<Option<User>, DbError> {
        let mut t = self.tables.write();
        Ok(t.user_mut(user_id).map(|u| {
            u.avatar = Some(url.to_string());
            u.clone()
        }))
    }

    async fn update_password(&self, user_id: i64, hash: &str) -> Result<Option<User>, DbError> {
        let mut t = self.tables.write();
        Ok(t.user_mut(user_id).map(|u| {
            u.password_hash = hash.to_string();
            u.clone()
        }))
    }

    async fn update_email(&self, user_id: i64, email: &str) -> Result<Option<User>, DbError> {
        let mut t = self.tables.write();
        if t.users
            .values()
            .any(|u| u.email == email && u.id != user_id)
        {
            return Err(DbError::UserExists(email.to_string()));
        }
        Ok(t.user_mut(user_id).map(|u| {
            u.email = email.to_string();
            u.clone()
        }))
    }

    async fn confirm_email(&self, user_id: i64) -> Result<(), DbError> {
        if let Some(user) = self.tables.write().user_mut(user_id) {
            user.confirmed = true;
        }
        Ok(())
    }

    async fn contact_by_id(&self, user_id: i64, id: i64) -> Result<Option<Contact>, DbError> {
        let t = self.tables.read();
        Ok(t.contacts.get(&id).filter(|c| c.user_id == user_id).cloned())
    }

    async fn contact_by_email(
        &self,
        user_id: i64,
        email: &str,
    ) -> Result<Option<Contact>, DbError> {
        let t = self.tables.read();
        Ok(t.contacts
            .values()
            .find(|c| c.user_id == user_id && c.email == email)
            .cloned())
    }

    async fn list_contacts(
        &self,
        user_id: i64,
        filter: &ContactFilter,
    ) -> Result<Vec<Contact>, DbError> {
        let t = self.tables.read();
        Ok(t.contacts
            .values()
            .filter(|c| c.user_id == user_id && filter.matches(c))
            .skip(filter.skip.max(0) as usize)
            .take(filter.limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn create_contact(
        &self,
        user_id: i64,
        input: ContactInput,
    ) -> Result<Contact, DbError> {
        let mut t = self.tables.write();
        if t.email_taken(user_id, &input.email, None) {
            return Err(DbError::ContactExists(input.email));
        }
        t.next_contact_id += 1;
        let contact = Contact {
            id: t.next_contact_id,
            first_name: input.first_name,
            last_name: input.last_name,
            email: input.email,
            phone_number: input.phone_number,
            birth_date: input.birth_date,
            additional_data: input.additional_data,
            user_id,
        };
        t.contacts.insert(contact.id, contact.clone());
        Ok(contact)
    }

    async fn update_contact(
        &self,
        user_id: i64,
        id: i64,
        input: ContactInput,
    ) -> Result<Option<Contact>, DbError> {
        let mut t = self.tables.write();
        if t.owned_contact_mut(user_id, id).is_none() {
            return Ok(None);
        }
        if t.email_taken(user_id, &input.email, Some(id)) {
            return Err(DbError::ContactExists(input.email));
        }
        Ok(t.owned_contact_mut(user_id, id).map(|c| {
            c.first_name = input.first_name;
            c.last_name = input.last_name;
            c.email = input.email;
            c.phone_number = input.phone_number;
            c.birth_date = input.birth_date;
            c.additional_data = input.additional_data;
            c.clone()
        }))
    }

    async fn patch_contact(
        &self,
        user_id: i64,
        id: i64,
        patch: ContactPatch,
    ) -> Result<Option<Contact>, DbError> {
        let mut t = self.tables.write();
        if t.owned_contact_mut(user_id, id).is_none() {
            return Ok(None);
        }
        if let Some(ref email) = patch.email
            && t.email_taken(user_id, email, Some(id))
        {
            return Err(DbError::ContactExists(email.clone()));
        }
        Ok(t.owned_contact_mut(user_id, id).map(|c| {
            patch.apply(c);
            c.clone()
        }))
    }

    async fn remove_contact(&self, user_id: i64, id: i64) -> Result<Option<Contact>, DbError> {
        let mut t = self.tables.write();
        if t.owned_contact_mut(user_id, id).is_none() {
            return Ok(None);
        }
        Ok(t.contacts.remove(&id))
    }

    async fn birthdays_between(
        &self,
        user_id: i64,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<Contact>, DbError> {
        let t = self.tables.read();
        let mut found: Vec<Contact> = t
            .contacts
            .values()
            .filter(|c| c.user_id == user_id && birthday_in_window(c.birth_date, from, to))
            .cloned()
            .collect();
        found.sort_by_key(|c| (days_until_birthday(c.birth_date, from), c.id));
        Ok(found)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_user(email: &str) -> NewUser {
        NewUser {
            username: "tester".into(),
            email: email.into(),
            password_hash: "hash".into(),
            avatar: None,
        }
    }

    fn input(email: &str, birth: (i32, u32, u32)) -> ContactInput {
        ContactInput {
            first_name: "First".into(),
            last_name: "Last".into(),
            email: email.into(),
            phone_number: "+1 555 0100".into(),
            birth_date: NaiveDate::from_ymd_opt(birth.0, birth.1, birth.2).unwrap(),
            additional_data: None,
        }
    }

    #[tokio::test]
    async fn duplicate_user_email_rejected() {
        let store = MemoryStore::new();
        store.create_user(new_user("a@example.com")).await.unwrap();
        let err = store.create_user(new_user("a@example.com")).await.unwrap_err();
        assert!(matches!(err, DbError::UserExists(_)));
    }

    #[tokio::test]
    async fn user_updates_round_trip() {
        let store = MemoryStore::new();
        let user = store.create_user(new_user("a@example.com")).await.unwrap();
        assert!(!user.confirmed);

        store.confirm_email(user.id).await.unwrap();
        store.update_refresh_token(user.id, Some("tok")).await.unwrap();
        let updated = store.update_avatar(user.id, "http://img").await.unwrap().unwrap();
        assert!(updated.confirmed);
        assert_eq!(updated.refresh_token.as_deref(), Some("tok"));
        assert_eq!(updated.avatar.as_deref(), Some("http://img"));

        store.update_refresh_token(user.id, None).await.unwrap();
        let fetched = store.user_by_id(user.id).await.unwrap().unwrap();
        assert!(fetched.refresh_token.is_none());

        assert!(store.update_password(999, "x").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn email_change_conflicts_with_other_user() {
        let store = MemoryStore::new();
        let a = store.create_user(new_user("a@example.com")).await.unwrap();
        store.create_user(new_user("b@example.com")).await.unwrap();
        let err = store.update_email(a.id, "b@example.com").await.unwrap_err();
        assert!(matches!(err, DbError::UserExists(_)));

        // Re-saving the user's own address is not a conflict.
        let same = store.update_email(a.id, "a@example.com").await.unwrap();
        assert!(same.is_some());
        let moved = store.update_email(a.id, "c@example.com").await.unwrap().unwrap();
        assert_eq!(moved.email, "c@example.com");
        assert!(store.user_by_email("a@example.com").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn contacts_are_scoped_to_owner() {
        let store = MemoryStore::new();
        let contact = store
            .create_contact(1, input("x@example.com", (1990, 5, 1)))
            .await
            .unwrap();

        assert!(store.contact_by_id(2, contact.id).await.unwrap().is_none());
        assert!(store.remove_contact(2, contact.id).await.unwrap().is_none());
        assert!(
            store
                .update_contact(2, contact.id, input("y@example.com", (1990, 5, 1)))
                .await
                .unwrap()
                .is_none()
        );
        // Another user may hold a contact with the same address.
        store
            .create_contact(2, input("x@example.com", (1990, 5, 1)))
            .await
            .unwrap();
        assert!(store.contact_by_id(1, contact.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn duplicate_contact_email_rejected() {
        let store = MemoryStore::new();
        store
            .create_contact(1, input("x@example.com", (1990, 5, 1)))
            .await
            .unwrap();
        let second = store
            .create_contact(1, input("y@example.com", (1990, 5, 1)))
            .await
            .unwrap();
        let err = store
            .create_contact(1, input("x@example.com", (1990, 5, 1)))
            .await
            .unwrap_err();
        assert!(matches!(err, DbError::ContactExists(_)));

        let patch = ContactPatch {
            email: Some("x@example.com".into()),
            ..Default::default()
        };
        let err = store.patch_contact(1, second.id, patch).await.unwrap_err();
        assert!(matches!(err, DbError::ContactExists(_)));
    }

    #[tokio::test]
    async fn list_filters_and_pages() {
        let store = MemoryStore::new();
        for i in 0..5 {
            let mut c = input(&format!("c{i}@example.com"), (1990, 1, 1));
            if i % 2 == 0 {
                c.last_name = "Even".into();
            }
            store.create_contact(1, c).await.unwrap();
        }

        let all = store
            .list_contacts(1, &ContactFilter::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 5);

        let evens = ContactFilter {
            last_name: Some("Even".into()),
            ..Default::default()
        };
        assert_eq!(store.list_contacts(1, &evens).await.unwrap().len(), 3);

        let page = ContactFilter {
            skip: 1,
            limit: 2,
            ..Default::default()
        };
        let ids: Vec<i64> = store
            .list_contacts(1, &page)
            .await
            .unwrap()
            .iter()
            .map(|c| c.id)
            .collect();
        assert_eq!(ids, vec![2, 3]);
    }

    #[tokio::test]
    async fn birthdays_ordered_from_window_start() {
        let store = MemoryStore::new();
        store
            .create_contact(1, input("jan@example.com", (1990, 1, 2)))
            .await
            .unwrap();
        store
            .create_contact(1, input("dec@example.com", (1985, 12, 30)))
            .await
            .unwrap();
        store
            .create_contact(1, input("jun@example.com", (1985, 6, 1)))
            .await
            .unwrap();

        let from = NaiveDate::from_ymd_opt(2024, 12, 28).unwrap();
        let to = NaiveDate::from_ymd_opt(2025, 1, 4).unwrap();
        let found = store.birthdays_between(1, from, to).await.unwrap();
        let emails: Vec<&str> = found.iter().map(|c| c.email.as_str()).collect();
        assert_eq!(emails, vec!["dec@example.com", "jan@example.com"]);
    }

    #[tokio::test]
    async fn remove_returns_contact() {
        let store = MemoryStore::new();
        let c = store
            .create_contact(1, input("x@example.com", (1990, 5, 1)))
            .await
            .unwrap();
        let removed = store.remove_contact(1, c.id).await.unwrap().unwrap();
        assert_eq!(removed, c);
        assert!(store.contact_by_id(1, c.id).await.unwrap().is_none());
    }
}
