use std::path::PathBuf;

use agentflow_core::config::DagSpec;
use agentflow_core::types::{Message, ToolCall};
use agentflow_tools::FunctionTool;

/// An assistant message requesting the given calls, with ids `call_0`,
/// `call_1`, ...
pub fn tool_call_message(calls: Vec<(&str, serde_json::Value)>) -> Message {
    let calls = calls
        .into_iter()
        .enumerate()
        .map(|(i, (name, params))| ToolCall::new(name, params).with_id(format!("call_{}", i)))
        .collect();
    Message::assistant_with_tools("", calls)
}

/// `add(a, b)` over integers.
pub fn add_tool() -> FunctionTool {
    FunctionTool::new(
        "add",
        "Add two integers",
        serde_json::json!({
            "type": "object",
            "properties": {
                "a": {"type": "integer"},
                "b": {"type": "integer"}
            },
            "required": ["a", "b"]
        }),
        |params| async move {
            let a = params["a"].as_i64().unwrap_or_default();
            let b = params["b"].as_i64().unwrap_or_default();
            Ok(serde_json::json!(a + b))
        },
    )
}

/// Parse a bare DAG table (`entry_point`, `final_node`, `[nodes.*]`).
pub fn dag_spec(toml_str: &str) -> DagSpec {
    toml::from_str(toml_str).expect("invalid DAG fixture")
}

/// Write `content` to `workflow.toml` in a fresh temp dir. Keep the returned
/// dir alive for as long as the file is needed.
pub fn write_config(content: &str) -> (tempfile::TempDir, PathBuf) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join("workflow.toml");
    std::fs::write(&path, content).expect("write config fixture");
    (dir, path)
}
