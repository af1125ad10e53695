//! Mocks and fixtures shared by AgentFlow tests.

mod agent;
mod fixtures;
mod provider;

pub use agent::{ConcurrencyProbe, RecordingAgent};
pub use fixtures::{add_tool, dag_spec, tool_call_message, write_config};
pub use provider::{RecordedRequest, ScriptedProvider};
