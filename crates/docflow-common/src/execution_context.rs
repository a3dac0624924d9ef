use serde::{Deserialize, Serialize};

/// Identity of one workflow execution, passed explicitly through admission,
/// tracking and dispatch instead of living in ambient per-thread state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ExecutionContext {
    pub org_id: String,
    pub workflow_id: String,
    pub execution_id: String,
    /// Ties log lines from the API layer, workers and callbacks together.
    pub correlation_id: String,
}

impl ExecutionContext {
    pub fn new(
        org_id: impl Into<String>,
        workflow_id: impl Into<String>,
        execution_id: impl Into<String>,
    ) -> Self {
        Self {
            org_id: org_id.into(),
            workflow_id: workflow_id.into(),
            execution_id: execution_id.into(),
            correlation_id: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn with_correlation_id(mut self, correlation_id: impl Into<String>) -> Self {
        self.correlation_id = correlation_id.into();
        self
    }

    /// Span carrying the context fields; enter it around work done on behalf
    /// of this execution.
    pub fn span(&self, operation: &'static str) -> tracing::Span {
        tracing::info_span!(
            "execution",
            operation,
            org_id = %self.org_id,
            workflow_id = %self.workflow_id,
            execution_id = %self.execution_id,
            correlation_id = %self.correlation_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_generates_distinct_correlation_ids() {
        let a = ExecutionContext::new("org", "wf", "ex-1");
        let b = ExecutionContext::new("org", "wf", "ex-1");
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn with_correlation_id_overrides() {
        let ctx = ExecutionContext::new("org", "wf", "ex-1").with_correlation_id("req-42");
        assert_eq!(ctx.correlation_id, "req-42");
        assert_eq!(ctx.execution_id, "ex-1");
    }
}
