use crate::{agent_name_from_identity, DeskError};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Credentials of the acting user, resolved by the external auth provider and
/// handed explicitly to every store and route operation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub email: String,
    #[serde(default)]
    pub admin: bool,
}

impl Session {
    pub fn new(email: impl Into<String>, admin: bool) -> Self {
        Self {
            email: email.into(),
            admin,
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        Capabilities { admin: self.admin }
    }

    pub fn agent_name(&self) -> String {
        agent_name_from_identity(&self.email)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Capabilities {
    pub admin: bool,
}

impl Capabilities {
    pub fn require_admin(&self, action: &'static str) -> Result<(), DeskError> {
        if self.admin {
            Ok(())
        } else {
            Err(DeskError::PermissionDenied { action })
        }
    }
}

/// Bearer token table exported by the auth provider:
/// `{ "<token>": { "email": "...", "admin": false } }`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(transparent)]
pub struct SessionTable {
    sessions: HashMap<String, Session>,
}

impl SessionTable {
    pub fn from_json_str(content: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(content)
    }

    /// Reads the table from disk. A missing file yields an empty table, so
    /// every credential is rejected.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_json_str(&content)
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::InvalidData, err))
    }

    pub fn insert(&mut self, token: impl Into<String>, session: Session) {
        self.sessions.insert(token.into(), session);
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn authenticate(&self, token: Option<&str>) -> Result<Session, DeskError> {
        let token = token.map(str::trim).filter(|token| !token.is_empty());
        token
            .and_then(|token| self.sessions.get(token))
            .cloned()
            .ok_or(DeskError::Unauthorized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_resolves_known_tokens_only() {
        let table = SessionTable::from_json_str(
            r#"{ "t-admin": { "email": "root@desk.example", "admin": true },
                 "t-agent": { "email": "maria@desk.example" } }"#,
        )
        .expect("table");

        assert_eq!(table.len(), 2);
        let admin = table.authenticate(Some("t-admin")).expect("admin");
        assert!(admin.capabilities().admin);
        let agent = table.authenticate(Some(" t-agent ")).expect("agent");
        assert!(!agent.admin);
        assert_eq!(agent.agent_name(), "Maria");

        assert_eq!(table.authenticate(None), Err(DeskError::Unauthorized));
        assert_eq!(table.authenticate(Some("nope")), Err(DeskError::Unauthorized));
    }

    #[test]
    fn non_admin_capabilities_deny() {
        let caps = Capabilities::default();
        assert_eq!(
            caps.require_admin("delete records"),
            Err(DeskError::PermissionDenied {
                action: "delete records"
            })
        );
    }
}
