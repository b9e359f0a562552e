//! Tools the backend can call mid-conversation
//!
//! The backend names a tool and passes JSON arguments; the registry routes
//! the call to a handler and the handler's JSON result goes back as the
//! function response.

mod alert;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

pub use alert::{priority_from_severity, AlertFamilyTool, ALERT_FAMILY};

use crate::directory::Subject;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ToolError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("tool failed: {0}")]
    Failed(String),
}

/// Who is on the call when a tool runs.
#[derive(Debug, Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub identity: String,
    pub subject: Subject,
}

#[async_trait]
pub trait ToolHandler: Send + Sync + 'static {
    async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError>;
}

#[derive(Default)]
pub struct ToolRegistry {
    handlers: HashMap<String, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, handler: Arc<dyn ToolHandler>) {
        let name = name.into();
        if self.handlers.insert(name.clone(), handler).is_some() {
            log::warn!("Tools: replaced handler for {}", name);
        }
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn dispatch(
        &self,
        name: &str,
        ctx: &ToolContext,
        args: Value,
    ) -> Result<Value, ToolError> {
        let handler = self
            .handlers
            .get(name)
            .cloned()
            .ok_or_else(|| ToolError::UnknownTool(name.to_string()))?;
        log::info!("Tools: session {} calling {}", ctx.session_id, name);
        handler.call(ctx, args).await
    }
}

/// Wrap a tool outcome as the body of a function response.
pub fn response_body(outcome: &Result<Value, ToolError>) -> Value {
    match outcome {
        Ok(value) => serde_json::json!({ "result": value }),
        Err(e) => serde_json::json!({ "error": e.to_string() }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo;

    #[async_trait]
    impl ToolHandler for Echo {
        async fn call(&self, ctx: &ToolContext, args: Value) -> Result<Value, ToolError> {
            Ok(json!({"who": ctx.subject.name, "args": args}))
        }
    }

    fn ctx() -> ToolContext {
        ToolContext {
            session_id: "s1".into(),
            identity: "123".into(),
            subject: Subject {
                id: 1,
                identity: "123".into(),
                name: "Maria".into(),
                voice_name: None,
            },
        }
    }

    #[tokio::test]
    async fn test_dispatch_routes_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register("echo", Arc::new(Echo));

        let out = registry.dispatch("echo", &ctx(), json!({"x": 1})).await.unwrap();
        assert_eq!(out["who"], "Maria");
        assert_eq!(out["args"]["x"], 1);
        assert_eq!(registry.names(), vec!["echo".to_string()]);
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.dispatch("nope", &ctx(), json!({})).await.unwrap_err();
        assert_eq!(err, ToolError::UnknownTool("nope".into()));
    }

    #[test]
    fn test_response_body() {
        assert_eq!(response_body(&Ok(json!("ok"))), json!({"result": "ok"}));
        assert_eq!(
            response_body(&Err(ToolError::Failed("boom".into()))),
            json!({"error": "tool failed: boom"})
        );
    }
}
