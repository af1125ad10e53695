use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use agentflow_core::error::ToolInvocationError;
use agentflow_core::traits::Tool;
use agentflow_core::types::ToolSpec;

/// Registry of available tools, keyed by name.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool, replacing any tool with the same name.
    pub fn register(&mut self, tool: impl Tool) {
        self.register_arc(Arc::new(tool));
    }

    pub fn register_arc(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        if self.tools.insert(name.clone(), tool).is_some() {
            debug!(tool = %name, "Replaced registered tool");
        }
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Tool specs for sending to the model, sorted by name so requests are
    /// deterministic.
    pub fn specs(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self.tools.values().map(|t| t.spec()).collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }

    /// A registry restricted to `names`. Names that are not registered are
    /// dropped with a warning.
    pub fn subset<S: AsRef<str>>(&self, names: &[S]) -> ToolRegistry {
        let mut tools = HashMap::with_capacity(names.len());
        for name in names {
            let name = name.as_ref();
            match self.tools.get(name) {
                Some(tool) => {
                    tools.insert(name.to_string(), tool.clone());
                }
                None => warn!(tool = %name, "Configured tool is not registered, skipping"),
            }
        }
        ToolRegistry { tools }
    }

    /// Execute a tool by name.
    ///
    /// Required parameters are checked before the tool runs. A timeout is
    /// reported as a recoverable `ToolRaised`.
    pub async fn execute(
        &self,
        name: &str,
        input: serde_json::Value,
    ) -> Result<serde_json::Value, ToolInvocationError> {
        let tool = self
            .get(name)
            .ok_or_else(|| ToolInvocationError::UnknownTool(name.to_string()))?;

        check_required(name, &tool.required_parameters(), &input)?;

        let timeout_secs = tool.timeout_secs();
        match tokio::time::timeout(Duration::from_secs(timeout_secs), tool.execute(input)).await {
            Ok(result) => result,
            Err(_) => Err(ToolInvocationError::raised(
                name,
                format!("timed out after {}s", timeout_secs),
            )),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

fn check_required(
    tool: &str,
    required: &[String],
    input: &serde_json::Value,
) -> Result<(), ToolInvocationError> {
    if required.is_empty() {
        return Ok(());
    }
    let Some(obj) = input.as_object() else {
        return Err(ToolInvocationError::InvalidParameters {
            tool: tool.to_string(),
            message: "parameters must be a JSON object".into(),
        });
    };
    let missing: Vec<&str> = required
        .iter()
        .filter(|p| !obj.contains_key(p.as_str()))
        .map(|p| p.as_str())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ToolInvocationError::InvalidParameters {
            tool: tool.to_string(),
            message: format!("missing required parameter(s): {}", missing.join(", ")),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::FunctionTool;
    use serde_json::json;

    fn add_tool() -> FunctionTool {
        FunctionTool::new(
            "add",
            "Add two integers",
            json!({
                "type": "object",
                "properties": {"a": {"type": "integer"}, "b": {"type": "integer"}},
                "required": ["a", "b"]
            }),
            |params| async move {
                let a = params["a"].as_i64().unwrap_or(0);
                let b = params["b"].as_i64().unwrap_or(0);
                Ok(json!(a + b))
            },
        )
    }

    fn echo_tool() -> FunctionTool {
        FunctionTool::new("echo", "Echo input", json!({"type": "object"}), |params| async move {
            Ok(params)
        })
    }

    #[tokio::test]
    async fn execute_registered_tool() {
        let mut registry = ToolRegistry::new();
        registry.register(add_tool());
        let out = registry.execute("add", json!({"a": 2, "b": 3})).await.unwrap();
        assert_eq!(out, json!(5));
    }

    #[tokio::test]
    async fn unknown_tool() {
        let registry = ToolRegistry::new();
        let err = registry.execute("nope", json!({})).await.unwrap_err();
        assert_eq!(err, ToolInvocationError::UnknownTool("nope".into()));
    }

    #[tokio::test]
    async fn missing_required_parameter() {
        let mut registry = ToolRegistry::new();
        registry.register(add_tool());
        let err = registry.execute("add", json!({"a": 2})).await.unwrap_err();
        match err {
            ToolInvocationError::InvalidParameters { tool, message } => {
                assert_eq!(tool, "add");
                assert!(message.contains('b'));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn non_object_parameters_rejected() {
        let mut registry = ToolRegistry::new();
        registry.register(add_tool());
        let err = registry.execute("add", json!([2, 3])).await.unwrap_err();
        assert!(matches!(err, ToolInvocationError::InvalidParameters { .. }));
    }

    #[test]
    fn subset_keeps_only_known_names() {
        let mut registry = ToolRegistry::new();
        registry.register(add_tool());
        registry.register(echo_tool());
        let subset = registry.subset(&["echo", "missing"]);
        assert_eq!(subset.names(), vec!["echo"]);
        assert!(!subset.contains("add"));
    }

    #[test]
    fn specs_sorted_by_name() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());
        registry.register(add_tool());
        let specs = registry.specs();
        assert_eq!(specs[0].name, "add");
        assert_eq!(specs[0].required_parameters, vec!["a", "b"]);
        assert_eq!(specs[1].name, "echo");
    }

    #[test]
    fn unregister() {
        let mut registry = ToolRegistry::new();
        registry.register(echo_tool());
        assert!(registry.unregister("echo"));
        assert!(!registry.unregister("echo"));
        assert!(registry.is_empty());
    }
}
