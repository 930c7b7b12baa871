//! Request correlation.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identity of one operation, carried into its tracing span.
///
/// Sub-operations created with [`RequestContext::child`] share the
/// correlation ID, so an install and the sandbox calls it triggers can be
/// grouped in the logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestContext {
    /// This operation.
    pub request_id: Uuid,
    /// Shared by an operation and all its children.
    pub correlation_id: Uuid,
    /// The operation that spawned this one.
    pub parent_id: Option<Uuid>,
    /// Component that created the context (`cli`, `manager`, ...).
    pub component: String,
    /// Operation name (`install`, `execute`, ...).
    pub operation: Option<String>,
    /// Skill the operation concerns.
    pub skill_id: Option<String>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// Free-form tags.
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
}

impl RequestContext {
    /// New root context.
    #[must_use]
    pub fn new(component: impl Into<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            request_id: id,
            correlation_id: id,
            parent_id: None,
            component: component.into(),
            operation: None,
            skill_id: None,
            started_at: Utc::now(),
            metadata: BTreeMap::new(),
        }
    }

    /// Child context sharing this one's correlation ID, skill and metadata.
    #[must_use]
    pub fn child(&self, component: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            correlation_id: self.correlation_id,
            parent_id: Some(self.request_id),
            component: component.into(),
            operation: None,
            skill_id: self.skill_id.clone(),
            started_at: Utc::now(),
            metadata: self.metadata.clone(),
        }
    }

    /// Set the operation name.
    #[must_use]
    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }

    /// Set the skill.
    #[must_use]
    pub fn with_skill(mut self, skill_id: impl Into<String>) -> Self {
        self.skill_id = Some(skill_id.into());
        self
    }

    /// Set the correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = id;
        self
    }

    /// Add a tag.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Milliseconds since the context was created.
    #[must_use]
    pub fn elapsed_ms(&self) -> i64 {
        Utc::now()
            .signed_duration_since(self.started_at)
            .num_milliseconds()
    }

    /// First eight characters of the request ID.
    #[must_use]
    pub fn short_id(&self) -> String {
        self.request_id.simple().to_string().chars().take(8).collect()
    }

    /// Span carrying the context's identifiers.
    #[must_use]
    pub fn span(&self) -> tracing::Span {
        tracing::info_span!(
            "request",
            request_id = %self.request_id,
            correlation_id = %self.correlation_id,
            component = %self.component,
            operation = self.operation.as_deref(),
            skill_id = self.skill_id.as_deref(),
        )
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// Enters a context's span and logs its duration when dropped.
pub struct RequestGuard {
    context: RequestContext,
    _span: tracing::span::EnteredSpan,
}

impl RequestGuard {
    /// Enter `context`'s span.
    #[must_use]
    pub fn new(context: RequestContext) -> Self {
        let span = context.span().entered();
        tracing::debug!("Request started");
        Self {
            context,
            _span: span,
        }
    }

    /// The guarded context.
    #[must_use]
    pub fn context(&self) -> &RequestContext {
        &self.context
    }
}

impl std::fmt::Debug for RequestGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestGuard")
            .field("context", &self.context)
            .finish_non_exhaustive()
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        tracing::debug!(elapsed_ms = self.context.elapsed_ms(), "Request completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn root_context() {
        let ctx = RequestContext::new("cli");
        assert_eq!(ctx.component, "cli");
        assert_eq!(ctx.request_id, ctx.correlation_id);
        assert!(ctx.parent_id.is_none());
    }

    #[test]
    fn child_inherits_correlation() {
        let parent = RequestContext::new("manager")
            .with_operation("install")
            .with_skill("weather")
            .with_metadata("source", "github");
        let child = parent.child("sandbox");

        assert_ne!(child.request_id, parent.request_id);
        assert_eq!(child.correlation_id, parent.correlation_id);
        assert_eq!(child.parent_id, Some(parent.request_id));
        assert_eq!(child.skill_id.as_deref(), Some("weather"));
        assert!(child.operation.is_none());
        assert_eq!(child.metadata.get("source").map(String::as_str), Some("github"));
    }

    #[test]
    fn short_id_is_eight_chars() {
        assert_eq!(RequestContext::new("cli").short_id().len(), 8);
    }

    #[test]
    fn guard_exposes_context() {
        let guard = RequestGuard::new(RequestContext::new("cli").with_operation("list"));
        assert_eq!(guard.context().operation.as_deref(), Some("list"));
        assert!(guard.context().elapsed_ms() >= 0);
    }

    #[test]
    fn serde_round_trip() {
        let ctx = RequestContext::new("cli").with_skill("echo");
        let json = serde_json::to_string(&ctx).unwrap();
        let parsed: RequestContext = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, ctx);
    }
}
