use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use llmproxy_core::obfuscate;

/// Closed vocabulary of audited actions. New operations get a new variant
/// rather than a free-form string, so a reviewer can grep the enum instead
/// of the log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    TokenCreate,
    TokenRevoke,
    TokenRevokeBatch,
    ProjectCreate,
    ProjectUpdate,
    ProxyRequest,
    CachePurge,
    AdminLogin,
}

impl AuditAction {
    pub fn as_str(self) -> &'static str {
        match self {
            AuditAction::TokenCreate => "token.create",
            AuditAction::TokenRevoke => "token.revoke",
            AuditAction::TokenRevokeBatch => "token.revoke_batch",
            AuditAction::ProjectCreate => "project.create",
            AuditAction::ProjectUpdate => "project.update",
            AuditAction::ProxyRequest => "proxy_request",
            AuditAction::CachePurge => "cache.purge",
            AuditAction::AdminLogin => "admin.login",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Success,
    Failure,
    Denied,
    Error,
}

/// Who performed the action: the system itself, the management API, an
/// interactive admin, or the (obfuscated) token that made the request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "value")]
pub enum Actor {
    System,
    ManagementApi,
    Admin,
    Token(String),
}

/// One append-only audit record. Construct through [`AuditEventBuilder`]
/// so token values are obfuscated before a record ever exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub action: AuditAction,
    pub actor: Actor,
    pub outcome: Outcome,
    pub project_id: Option<Uuid>,
    pub request_id: Option<String>,
    pub correlation_id: Option<String>,
    pub client_ip: Option<String>,
    pub method: Option<String>,
    pub path: Option<String>,
    pub user_agent: Option<String>,
    pub reason: Option<String>,
    /// Always the obfuscated form — never a raw secret.
    pub token_id: Option<String>,
    pub details: serde_json::Map<String, serde_json::Value>,
}

/// Builds an [`AuditEvent`], obfuscating any token value passed in so a raw
/// secret never reaches a constructed record.
pub struct AuditEventBuilder {
    event: AuditEvent,
}

impl AuditEventBuilder {
    pub fn new(action: AuditAction, actor: Actor, outcome: Outcome) -> Self {
        Self {
            event: AuditEvent {
                id: Uuid::new_v4(),
                timestamp: Utc::now(),
                action,
                actor,
                outcome,
                project_id: None,
                request_id: None,
                correlation_id: None,
                client_ip: None,
                method: None,
                path: None,
                user_agent: None,
                reason: None,
                token_id: None,
                details: serde_json::Map::new(),
            },
        }
    }

    pub fn project_id(mut self, id: Uuid) -> Self {
        self.event.project_id = Some(id);
        self
    }

    pub fn request_id(mut self, id: impl Into<String>) -> Self {
        self.event.request_id = Some(id.into());
        self
    }

    pub fn correlation_id(mut self, id: impl Into<String>) -> Self {
        self.event.correlation_id = Some(id.into());
        self
    }

    pub fn client_ip(mut self, ip: impl Into<String>) -> Self {
        self.event.client_ip = Some(ip.into());
        self
    }

    pub fn method(mut self, method: impl Into<String>) -> Self {
        self.event.method = Some(method.into());
        self
    }

    pub fn path(mut self, path: impl Into<String>) -> Self {
        self.event.path = Some(path.into());
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.event.user_agent = Some(ua.into());
        self
    }

    pub fn reason(mut self, reason: impl Into<String>) -> Self {
        self.event.reason = Some(reason.into());
        self
    }

    /// Obfuscates `raw_token` before storing it; the builder is the only
    /// place a caller may hand this type a secret.
    pub fn token(mut self, raw_token: &str) -> Self {
        self.event.token_id = Some(obfuscate(raw_token));
        self
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.event.details.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> AuditEvent {
        self.event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_obfuscates_token_values() {
        let event = AuditEventBuilder::new(AuditAction::ProxyRequest, Actor::System, Outcome::Success)
            .token("lpk_abcdefghijklmnopqrstuvwxyz")
            .build();
        let token_id = event.token_id.unwrap();
        assert!(!token_id.contains("abcdefghijklmnopqrstuvwxyz"));
    }

    #[test]
    fn action_strings_match_the_closed_vocabulary() {
        assert_eq!(AuditAction::ProxyRequest.as_str(), "proxy_request");
        assert_eq!(AuditAction::TokenRevokeBatch.as_str(), "token.revoke_batch");
    }
}
