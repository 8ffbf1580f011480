//! User and role model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Role of a user. Stored as text; anything unrecognised reads back as
/// `Unknown`, which grants nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    SuperAdmin,
    Admin,
    Client,
    Subagent,
    Unknown,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::SuperAdmin => "super_admin",
            Role::Admin => "admin",
            Role::Client => "client",
            Role::Subagent => "subagent",
            Role::Unknown => "unknown",
        }
    }

    pub fn from_string(s: &str) -> Self {
        match s {
            "super_admin" => Role::SuperAdmin,
            "admin" => Role::Admin,
            "client" => Role::Client,
            "subagent" => Role::Subagent,
            _ => Role::Unknown,
        }
    }

    /// Clients and subagents work on projects they are assigned to.
    pub fn works_by_assignment(&self) -> bool {
        matches!(self, Role::Client | Role::Subagent)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub user_id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub created_by: Option<i64>,
    pub is_active: bool,
    pub created_utc: DateTime<Utc>,
}

impl User {
    pub fn role(&self) -> Role {
        Role::from_string(&self.role)
    }

    pub fn full_name(&self) -> String {
        let full = format!("{} {}", self.first_name, self.last_name);
        let full = full.trim();
        if full.is_empty() {
            self.username.clone()
        } else {
            full.to_string()
        }
    }
}

#[derive(Debug, Clone)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: Role,
    pub created_by: Option<i64>,
}

/// Fields a super admin may change. `None` leaves the column alone.
#[derive(Debug, Clone, Default)]
pub struct UpdateUser {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub role: Option<Role>,
    pub is_active: Option<bool>,
}

#[derive(Debug, Clone, Default)]
pub struct ListUsersFilter {
    pub role: Option<Role>,
    pub created_by: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct ProjectAssignment {
    pub project_id: i64,
    pub user_id: i64,
    pub assigned_utc: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unrecognised_role_is_unknown() {
        assert_eq!(Role::from_string("super_admin"), Role::SuperAdmin);
        assert_eq!(Role::from_string("subagent"), Role::Subagent);
        assert_eq!(Role::from_string("Admin"), Role::Unknown);
        assert_eq!(Role::from_string(""), Role::Unknown);
    }

    #[test]
    fn only_clients_and_subagents_work_by_assignment() {
        assert!(Role::Client.works_by_assignment());
        assert!(Role::Subagent.works_by_assignment());
        assert!(!Role::Admin.works_by_assignment());
        assert!(!Role::SuperAdmin.works_by_assignment());
        assert!(!Role::Unknown.works_by_assignment());
    }
}
