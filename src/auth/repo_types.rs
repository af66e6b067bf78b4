use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserStatus {
    Active,
    Inactive,
}

impl UserStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            UserStatus::Active => "active",
            UserStatus::Inactive => "inactive",
        }
    }
}

impl fmt::Display for UserStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for UserStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(UserStatus::Active),
            "inactive" => Ok(UserStatus::Inactive),
            other => Err(format!("unknown user status {other:?}")),
        }
    }
}

/// User record in the database.
#[derive(Debug, Clone, Serialize)]
pub struct User {
    pub id: Uuid,
    pub unit_number: String,
    pub email: String,
    #[serde(skip_serializing)]
    pub hashed_password: String, // Argon2 PHC string
    pub profile_picture_url: Option<String>,
    pub is_directory_opt_in: bool,
    pub is_admin: bool,
    pub status: UserStatus,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl User {
    pub fn is_active(&self) -> bool {
        self.status == UserStatus::Active
    }
}

/// Input for `UserStore::insert`. A missing or nil id is generated.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub id: Option<Uuid>,
    pub unit_number: String,
    pub email: String,
    pub hashed_password: String,
    pub profile_picture_url: Option<String>,
    pub is_directory_opt_in: bool,
    pub is_admin: bool,
    pub status: UserStatus,
}

impl NewUser {
    /// Default role and status for a freshly registered resident.
    pub fn resident(email: String, unit_number: String, hashed_password: String) -> Self {
        Self {
            id: None,
            unit_number,
            email,
            hashed_password,
            profile_picture_url: None,
            is_directory_opt_in: false,
            is_admin: false,
            status: UserStatus::Active,
        }
    }

    pub(crate) fn resolved_id(&self) -> Uuid {
        match self.id {
            Some(id) if !id.is_nil() => id,
            _ => Uuid::new_v4(),
        }
    }
}

#[derive(Debug, Clone, Serialize, FromRow)]
pub struct DirectoryEntry {
    pub id: Uuid,
    pub unit_number: String,
    pub profile_picture_url: Option<String>,
}

#[derive(Debug, FromRow)]
pub(crate) struct UserRow {
    pub id: Uuid,
    pub unit_number: String,
    pub email: String,
    pub hashed_password: String,
    pub profile_picture_url: Option<String>,
    pub is_directory_opt_in: bool,
    pub is_admin: bool,
    pub status: String,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl TryFrom<UserRow> for User {
    type Error = String;

    fn try_from(r: UserRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: r.id,
            unit_number: r.unit_number,
            email: r.email,
            hashed_password: r.hashed_password,
            profile_picture_url: r.profile_picture_url,
            is_directory_opt_in: r.is_directory_opt_in,
            is_admin: r.is_admin,
            status: r.status.parse()?,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_text_matches_column_values() {
        assert_eq!("active".parse::<UserStatus>(), Ok(UserStatus::Active));
        assert_eq!("inactive".parse::<UserStatus>(), Ok(UserStatus::Inactive));
        assert!("banned".parse::<UserStatus>().is_err());
        assert_eq!(UserStatus::Inactive.to_string(), "inactive");
    }

    #[test]
    fn nil_id_is_replaced() {
        let mut new = NewUser::resident("a@b.com".into(), "1A".into(), "h".into());
        assert!(!new.resolved_id().is_nil());

        new.id = Some(Uuid::nil());
        assert!(!new.resolved_id().is_nil());

        let fixed = Uuid::new_v4();
        new.id = Some(fixed);
        assert_eq!(new.resolved_id(), fixed);
    }

    #[test]
    fn password_hash_is_never_serialized() {
        let now = OffsetDateTime::now_utc();
        let user = User {
            id: Uuid::new_v4(),
            unit_number: "4C".into(),
            email: "c@d.org".into(),
            hashed_password: "$argon2id$secret".into(),
            profile_picture_url: None,
            is_directory_opt_in: false,
            is_admin: false,
            status: UserStatus::Active,
            created_at: now,
            updated_at: now,
        };
        let json = serde_json::to_string(&user).unwrap();
        assert!(!json.contains("argon2"));
        assert!(json.contains("\"status\":\"active\""));
    }
}
