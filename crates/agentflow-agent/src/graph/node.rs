use std::collections::BTreeMap;

use agentflow_core::config::{NodeCondition, NodeSpec};
use agentflow_core::types::value_to_text;

/// Where a mapped input parameter reads its value from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSource {
    /// Mapping string as configured.
    pub raw: String,
    /// Producer node.
    pub node: String,
    /// Optional top-level field of an object output.
    pub field: Option<String>,
}

impl InputSource {
    /// An unresolved source; `WorkflowGraph::build` splits `node.field` once
    /// the node ids are known.
    pub fn new(raw: impl Into<String>) -> Self {
        let raw = raw.into();
        Self {
            node: raw.clone(),
            raw,
            field: None,
        }
    }

    /// Resolve against the set of node ids. A string naming a node is a plain
    /// source; otherwise it splits at the first `.`.
    pub(crate) fn resolve(&mut self, is_node: impl Fn(&str) -> bool) -> bool {
        if is_node(&self.raw) {
            self.node = self.raw.clone();
            self.field = None;
            return true;
        }
        match self.raw.split_once('.') {
            Some((node, field)) if is_node(node) && !field.is_empty() => {
                self.node = node.to_string();
                self.field = Some(field.to_string());
                true
            }
            _ => false,
        }
    }

    /// Pull this source's value out of the producer output. A missing field,
    /// or a non-object output, yields the whole output.
    pub fn extract(&self, output: &serde_json::Value) -> serde_json::Value {
        let Some(field) = &self.field else {
            return output.clone();
        };
        if let Some(v) = output.as_object().and_then(|obj| obj.get(field)) {
            return v.clone();
        }
        // Agents usually answer in text; a JSON object answer still counts.
        if let serde_json::Value::String(text) = output {
            if let Ok(serde_json::Value::Object(obj)) = serde_json::from_str(text) {
                if let Some(v) = obj.get(field) {
                    return v.clone();
                }
            }
        }
        output.clone()
    }
}

/// A node in the workflow graph: one agent invocation.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Unique identifier for this node.
    pub id: String,
    /// Agent invoked by this node.
    pub agent: String,
    pub description: Option<String>,
    /// Producer nodes, in declaration order, without duplicates.
    pub dependencies: Vec<String>,
    /// Named input parameter -> producer. Empty means "pass producer output
    /// through".
    pub input_mapping: BTreeMap<String, InputSource>,
    pub condition: Option<NodeCondition>,
}

impl Node {
    /// A node whose agent has the same id.
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            agent: id.clone(),
            id,
            description: None,
            dependencies: vec![],
            input_mapping: BTreeMap::new(),
            condition: None,
        }
    }

    pub fn from_spec(id: &str, spec: &NodeSpec) -> Self {
        let mut node = Node::new(id).depends_on(spec.dependencies.iter().cloned());
        if let Some(agent) = &spec.agent {
            node.agent = agent.clone();
        }
        node.description = spec.description.clone();
        for (param, source) in &spec.input_mapping {
            node = node.map_input(param.clone(), source.clone());
        }
        node.condition = spec.condition.clone();
        node
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = agent.into();
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add dependencies, ignoring ones already declared.
    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for dep in deps {
            let dep = dep.into();
            if !self.dependencies.contains(&dep) {
                self.dependencies.push(dep);
            }
        }
        self
    }

    /// Map `param` to `"<node>"` or `"<node>.<field>"`.
    pub fn map_input(mut self, param: impl Into<String>, source: impl Into<String>) -> Self {
        self.input_mapping
            .insert(param.into(), InputSource::new(source));
        self
    }

    pub fn with_condition(mut self, condition: NodeCondition) -> Self {
        self.condition = Some(condition);
        self
    }

    /// Producer whose output the condition reads.
    pub fn condition_source(&self) -> Option<&str> {
        let condition = self.condition.as_ref()?;
        condition
            .source
            .as_deref()
            .or_else(|| self.dependencies.first().map(|s| s.as_str()))
    }

    /// Short human-readable label for logs.
    pub fn label(&self) -> String {
        match &self.description {
            Some(d) => format!("{} ({})", self.id, d),
            None => self.id.clone(),
        }
    }
}

/// Render a mapped input for log lines without dumping large values.
pub(crate) fn preview(value: &serde_json::Value) -> String {
    let text = value_to_text(value);
    if text.chars().count() > 80 {
        let cut: String = text.chars().take(80).collect();
        format!("{}...", cut)
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentflow_core::config::Predicate;
    use serde_json::json;

    #[test]
    fn node_builder() {
        let node = Node::new("write")
            .with_agent("writer")
            .depends_on(["research", "outline", "research"])
            .map_input("facts", "research.findings")
            .with_description("Draft the article");

        assert_eq!(node.id, "write");
        assert_eq!(node.agent, "writer");
        assert_eq!(node.dependencies, vec!["research", "outline"]);
        assert_eq!(node.input_mapping["facts"].raw, "research.findings");
        assert_eq!(node.label(), "write (Draft the article)");
    }

    #[test]
    fn condition_source_defaults_to_first_dependency() {
        let node = Node::new("d")
            .depends_on(["b", "c"])
            .with_condition(NodeCondition::new(Predicate::Truthy));
        assert_eq!(node.condition_source(), Some("b"));

        let node = node.with_condition(NodeCondition::on("c", Predicate::Truthy));
        assert_eq!(node.condition_source(), Some("c"));
    }

    #[test]
    fn resolve_plain_and_dotted_sources() {
        let ids = ["profile", "v1.0"];
        let known = |s: &str| ids.contains(&s);

        let mut plain = InputSource::new("profile");
        assert!(plain.resolve(known));
        assert_eq!(plain.field, None);

        let mut dotted = InputSource::new("profile.interests");
        assert!(dotted.resolve(known));
        assert_eq!(dotted.node, "profile");
        assert_eq!(dotted.field.as_deref(), Some("interests"));

        // A node id containing a dot wins over splitting.
        let mut dotted_id = InputSource::new("v1.0");
        assert!(dotted_id.resolve(known));
        assert_eq!(dotted_id.node, "v1.0");

        let mut unknown = InputSource::new("ghost.field");
        assert!(!unknown.resolve(known));
    }

    #[test]
    fn extract_field_with_fallback() {
        let mut source = InputSource::new("p.interests");
        assert!(source.resolve(|s| s == "p"));

        let output = json!({"interests": ["AI"], "level": "intermediate"});
        assert_eq!(source.extract(&output), json!(["AI"]));

        let json_text = json!(r#"{"interests": ["ML"]}"#);
        assert_eq!(source.extract(&json_text), json!(["ML"]));

        let plain = json!("no structure here");
        assert_eq!(source.extract(&plain), plain);
    }

    #[test]
    fn from_spec_copies_fields() {
        let mut spec = NodeSpec::default();
        spec.agent = Some("discovery_agent".into());
        spec.dependencies = vec!["profile".into()];
        spec.input_mapping
            .insert("interests".into(), "profile".into());
        let node = Node::from_spec("discover", &spec);
        assert_eq!(node.agent, "discovery_agent");
        assert_eq!(node.dependencies, vec!["profile"]);
        assert!(node.input_mapping.contains_key("interests"));
    }

    #[test]
    fn preview_truncates() {
        let long = json!("x".repeat(200));
        assert!(preview(&long).ends_with("..."));
        assert_eq!(preview(&json!("short")), "short");
    }
}
