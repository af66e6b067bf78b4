use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::auth::repo::{StoreError, UserStore};
use crate::auth::repo_types::{DirectoryEntry, NewUser, User, UserStatus};

/// Test double with the same uniqueness and timestamp rules as the
/// Postgres store.
#[derive(Default)]
pub struct MemoryUserStore {
    users: Mutex<HashMap<Uuid, User>>,
}

impl MemoryUserStore {
    pub fn len(&self) -> usize {
        self.users.lock().unwrap().len()
    }
}

fn email_taken(users: &HashMap<Uuid, User>, email: &str, except: Option<Uuid>) -> bool {
    users
        .values()
        .any(|u| Some(u.id) != except && u.email.eq_ignore_ascii_case(email))
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn ensure_schema(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert(&self, new: NewUser) -> Result<User, StoreError> {
        let mut users = self.users.lock().unwrap();
        if email_taken(&users, &new.email, None) {
            return Err(StoreError::Conflict("email already registered".into()));
        }
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: new.resolved_id(),
            unit_number: new.unit_number,
            email: new.email,
            hashed_password: new.hashed_password,
            profile_picture_url: new.profile_picture_url,
            is_directory_opt_in: new.is_directory_opt_in,
            is_admin: new.is_admin,
            status: new.status,
            created_at: now,
            updated_at: now,
        };
        users.insert(user.id, user.clone());
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let users = self.users.lock().unwrap();
        Ok(users
            .values()
            .find(|u| u.email.eq_ignore_ascii_case(email))
            .cloned())
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<User>, StoreError> {
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn update(&self, user: &User) -> Result<Option<User>, StoreError> {
        let mut users = self.users.lock().unwrap();
        if email_taken(&users, &user.email, Some(user.id)) {
            return Err(StoreError::Conflict("email already registered".into()));
        }
        let Some(stored) = users.get_mut(&user.id) else {
            return Ok(None);
        };
        let created_at = stored.created_at;
        let updated_at = stored.updated_at.max(OffsetDateTime::now_utc());
        *stored = User {
            created_at,
            updated_at,
            ..user.clone()
        };
        Ok(Some(stored.clone()))
    }

    async fn soft_delete(&self, id: Uuid) -> Result<bool, StoreError> {
        let mut users = self.users.lock().unwrap();
        let Some(stored) = users.get_mut(&id) else {
            return Ok(false);
        };
        stored.status = UserStatus::Inactive;
        stored.updated_at = stored.updated_at.max(OffsetDateTime::now_utc());
        Ok(true)
    }

    async fn list_directory(&self) -> Result<Vec<DirectoryEntry>, StoreError> {
        let users = self.users.lock().unwrap();
        let mut out: Vec<DirectoryEntry> = users
            .values()
            .filter(|u| u.is_directory_opt_in && u.is_active())
            .map(|u| DirectoryEntry {
                id: u.id,
                unit_number: u.unit_number.clone(),
                profile_picture_url: u.profile_picture_url.clone(),
            })
            .collect();
        out.sort_by(|a, b| a.unit_number.cmp(&b.unit_number));
        Ok(out)
    }
}
