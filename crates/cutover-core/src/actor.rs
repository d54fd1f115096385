//! Actor context attached to audited operations.
//!
//! Every WAL entry may carry the identity that requested the guarded
//! operation. The context is recorded verbatim for audit and replay; no
//! authorization decisions are made at this layer.

use serde::{Deserialize, Serialize};

/// Who requested an operation, and under which tenant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActorContext {
    /// Actor identity (for example `"user:ops-team"` or `"service:wave-runner"`).
    pub actor: String,

    /// Tenant scope, if the deployment is multi-tenant.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,

    /// Correlation identifier supplied by the caller, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl ActorContext {
    /// Creates a context for the given actor identity.
    #[must_use]
    pub fn new(actor: impl Into<String>) -> Self {
        Self {
            actor: actor.into(),
            tenant_id: None,
            request_id: None,
        }
    }

    /// Sets the tenant scope.
    #[must_use]
    pub fn with_tenant(mut self, tenant_id: impl Into<String>) -> Self {
        self.tenant_id = Some(tenant_id.into());
        self
    }

    /// Sets the caller-supplied correlation identifier.
    #[must_use]
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn actor_context_serializes_without_empty_fields() {
        let ctx = ActorContext::new("user:ops-team");
        let json = serde_json::to_string(&ctx).unwrap();
        assert!(json.contains("user:ops-team"));
        assert!(!json.contains("tenantId"));
        assert!(!json.contains("requestId"));
    }

    #[test]
    fn actor_context_builder() {
        let ctx = ActorContext::new("service:wave-runner")
            .with_tenant("acme-insurance")
            .with_request_id("req-42");
        assert_eq!(ctx.tenant_id.as_deref(), Some("acme-insurance"));
        assert_eq!(ctx.request_id.as_deref(), Some("req-42"));
    }
}
