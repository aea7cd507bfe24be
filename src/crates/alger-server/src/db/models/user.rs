//! User model for database persistence.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value as Json};
use sqlx::FromRow;

/// A known user of the server.
///
/// `username` is the credential checked at handshake; `id` is a freshly
/// allocated opaque identifier. `roles` and `metadata` are JSON text columns.
///
/// # Timestamps
/// All timestamp fields are RFC 3339 strings due to SQLite type limitations.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: String,
    pub username: String,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub roles: Option<String>,
    pub metadata: Option<String>,
    pub last_login: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    /// Decoded role list, empty when unset.
    pub fn roles_list(&self) -> Vec<String> {
        self.roles
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    /// Decoded metadata object, `{}` when unset.
    pub fn metadata_json(&self) -> Json {
        self.metadata
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_else(|| json!({}))
    }

    /// The profile payload returned by the get-user-data operation.
    pub fn profile_json(&self) -> Json {
        json!({
            "id": self.username,
            "name": self.display_name.clone().unwrap_or_else(|| self.username.clone()),
            "roles": self.roles_list(),
            "email": self.email,
            "metadata": self.metadata_json(),
            "lastLogin": self.last_login,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_user() -> User {
        User {
            id: "u-1".to_string(),
            username: "admin".to_string(),
            display_name: Some("Administrator".to_string()),
            email: Some("admin@example.com".to_string()),
            roles: Some(r#"["admin","operator"]"#.to_string()),
            metadata: None,
            last_login: None,
            created_at: "2024-01-01T00:00:00Z".to_string(),
            updated_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    #[test]
    fn test_roles_decode() {
        assert_eq!(sample_user().roles_list(), vec!["admin", "operator"]);
    }

    #[test]
    fn test_profile_payload() {
        let profile = sample_user().profile_json();
        assert_eq!(profile["id"], "admin");
        assert_eq!(profile["name"], "Administrator");
        assert_eq!(profile["metadata"], json!({}));
    }
}
