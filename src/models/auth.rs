// Authenticated caller context - identity is validated upstream

//! # Auth Context
//!
//! Conductor does not validate credentials itself; an upstream gateway does.
//! Every operation receives an opaque `AuthContext` naming the acting user,
//! their organization and their roles. The engine uses it for organization
//! scoping, role checks on transitions, and the optional create-idempotency
//! contract.

use serde::{Deserialize, Serialize};

/// Identity of the caller, supplied by the transport layer
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthContext {
    pub user_id: String,
    pub organization_id: String,

    #[serde(default)]
    pub roles: Vec<String>,

    /// When present, a duplicate `create` within the idempotency window
    /// returns the prior instance instead of creating a new one.
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl AuthContext {
    pub fn new<U, O>(user_id: U, organization_id: O) -> Self
    where
        U: Into<String>,
        O: Into<String>,
    {
        Self {
            user_id: user_id.into(),
            organization_id: organization_id.into(),
            roles: Vec::new(),
            idempotency_key: None,
        }
    }

    pub fn with_roles(mut self, roles: Vec<String>) -> Self {
        self.roles = roles;
        self
    }

    pub fn with_idempotency_key<S: Into<String>>(mut self, key: S) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    pub fn has_role(&self, role: &str) -> bool {
        self.roles.iter().any(|r| r == role)
    }

    pub fn is_admin(&self) -> bool {
        self.has_role("admin")
    }
}
