//! Caller identities
//!
//! Every operation receives its caller explicitly: interactive analysts as an
//! [`Actor`], automated ingestion clients as a [`Credential`].

use serde::{Deserialize, Serialize};

/// Role of an authenticated user
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    Standard,
    Admin,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Standard => "standard",
            Role::Admin => "admin",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "standard" | "user" => Ok(Role::Standard),
            "admin" => Ok(Role::Admin),
            _ => Err(format!("Invalid role: {}", s)),
        }
    }
}

/// Authenticated caller of an interactive operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub username: String,
    pub role: Role,
    /// Engagement the actor is currently working in, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement_id: Option<i64>,
}

impl Actor {
    pub fn new(username: impl Into<String>, role: Role) -> Self {
        Self {
            username: username.into(),
            role,
            engagement_id: None,
        }
    }

    pub fn standard(username: impl Into<String>) -> Self {
        Self::new(username, Role::Standard)
    }

    pub fn admin(username: impl Into<String>) -> Self {
        Self::new(username, Role::Admin)
    }

    pub fn with_engagement(mut self, engagement_id: i64) -> Self {
        self.engagement_id = Some(engagement_id);
        self
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }

    /// Whether this actor is the named user
    pub fn is(&self, username: &str) -> bool {
        self.username == username
    }
}

/// Identity of a programmatic ingestion client
///
/// Credentials are distinct from interactive users: they are rate limited and
/// subject to the batch cap. Records they submit are attributed to `owner`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub name: String,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub engagement_id: Option<i64>,
}

impl Credential {
    pub fn new(name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            owner: owner.into(),
            engagement_id: None,
        }
    }

    pub fn with_engagement(mut self, engagement_id: i64) -> Self {
        self.engagement_id = Some(engagement_id);
        self
    }

    /// The standard-role actor records from this credential are written as
    pub fn as_actor(&self) -> Actor {
        Actor {
            username: self.owner.clone(),
            role: Role::Standard,
            engagement_id: self.engagement_id,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_round_trip() {
        assert_eq!("admin".parse::<Role>().unwrap(), Role::Admin);
        assert_eq!("STANDARD".parse::<Role>().unwrap(), Role::Standard);
        assert!("root".parse::<Role>().is_err());
        assert_eq!(Role::Admin.to_string(), "admin");
    }

    #[test]
    fn test_actor_constructors() {
        let alice = Actor::standard("alice");
        assert!(!alice.is_admin());
        assert!(alice.is("alice"));
        assert!(!alice.is("bob"));

        let root = Actor::admin("root").with_engagement(7);
        assert!(root.is_admin());
        assert_eq!(root.engagement_id, Some(7));
    }

    #[test]
    fn test_credential_as_actor() {
        let cred = Credential::new("cs-forwarder", "jsmith").with_engagement(3);
        let actor = cred.as_actor();
        assert_eq!(actor.username, "jsmith");
        assert_eq!(actor.role, Role::Standard);
        assert_eq!(actor.engagement_id, Some(3));
    }
}
