//! Agent definitions and contextual memory.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::model_spec::ModelId;
use super::routing::RoutingPolicy;

/// Specialization tag for an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Researcher,
    Analyst,
    Writer,
    Coder,
    Reviewer,
    Planner,
    Executor,
    Coordinator,
    Validator,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Researcher => "researcher",
            Self::Analyst => "analyst",
            Self::Writer => "writer",
            Self::Coder => "coder",
            Self::Reviewer => "reviewer",
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Coordinator => "coordinator",
            Self::Validator => "validator",
        }
    }

    /// Keywords used when scoring a role against a task description.
    pub fn keywords(&self) -> &'static [&'static str] {
        match self {
            Self::Researcher => &["research", "analyze", "investigate", "find", "gather"],
            Self::Coder => &["code", "implement", "develop", "program", "script"],
            Self::Writer => &["write", "document", "report", "explain", "summarize"],
            Self::Analyst => &["analyze", "evaluate", "assess", "review", "examine"],
            Self::Reviewer => &["review", "check", "validate", "verify", "audit"],
            Self::Planner => &["plan", "design", "strategy", "organize", "structure"],
            Self::Executor => &["execute", "run", "perform", "do", "complete"],
            Self::Coordinator => &["coordinate", "manage", "organize", "lead"],
            Self::Validator => &["validate", "test", "verify", "confirm", "check"],
        }
    }
}

/// Complete definition of an agent: identity, model preferences, and
/// generation defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentDefinition {
    pub id: Uuid,
    pub name: String,
    pub role: AgentRole,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub skills: Vec<String>,
    #[serde(default)]
    pub knowledge_domains: Vec<String>,
    /// Ordered preference list; the first entry wins when present.
    #[serde(default)]
    pub preferred_models: Vec<ModelId>,
    /// Overrides the workflow's routing policy when set.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub routing_policy: Option<RoutingPolicy>,
    pub temperature: f64,
    pub max_tokens: u64,
    pub max_iterations: u32,
    pub timeout_seconds: u64,
    pub can_delegate: bool,
    pub can_request_help: bool,
    /// Confidence in the agent's outputs, in [0, 1].
    pub trust_level: f64,
}

impl AgentDefinition {
    pub fn new(name: impl Into<String>, role: AgentRole) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            role,
            description: String::new(),
            skills: Vec::new(),
            knowledge_domains: Vec::new(),
            preferred_models: Vec::new(),
            routing_policy: None,
            temperature: 0.7,
            max_tokens: 4096,
            max_iterations: 10,
            timeout_seconds: 300,
            can_delegate: true,
            can_request_help: true,
            trust_level: 0.8,
        }
    }

    pub fn with_skill(mut self, skill: impl Into<String>) -> Self {
        self.skills.push(skill.into());
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.knowledge_domains.push(domain.into());
        self
    }

    pub fn with_preferred_model(mut self, model: ModelId) -> Self {
        self.preferred_models.push(model);
        self
    }

    pub fn with_timeout(mut self, seconds: u64) -> Self {
        self.timeout_seconds = seconds;
        self
    }

    pub fn with_trust(mut self, trust: f64) -> Self {
        self.trust_level = trust.clamp(0.0, 1.0);
        self
    }
}

/// Number of short-term entries above which compression kicks in.
const COMPRESSION_THRESHOLD: usize = 8;
/// How many of the most recent entries survive compression verbatim.
const PRESERVE_RECENT: usize = 5;

/// Contextual memory attached to a running agent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentMemory {
    /// Recent interactions, keyed by a monotonically increasing label.
    pub short_term: HashMap<String, Value>,
    pub long_term: HashMap<String, Value>,
    /// Compressed digests of evicted short-term entries.
    pub summary: HashMap<String, Value>,
    pub interaction_count: u64,
}

impl AgentMemory {
    /// Record one interaction and compress when the short-term map
    /// outgrows its threshold.
    pub fn record_interaction(&mut self, record: Value) {
        self.interaction_count += 1;
        let key = format!("interaction_{}", self.interaction_count);
        self.short_term.insert(key, record);

        if self.short_term.len() > COMPRESSION_THRESHOLD {
            self.compress();
        }
    }

    /// Fold the oldest short-term entries into the summary map, keeping
    /// the most recent [`PRESERVE_RECENT`] entries verbatim.
    pub fn compress(&mut self) {
        let mut keys: Vec<String> = self.short_term.keys().cloned().collect();
        keys.sort_by_key(|k| {
            k.rsplit('_')
                .next()
                .and_then(|n| n.parse::<u64>().ok())
                .unwrap_or(0)
        });

        if keys.len() <= PRESERVE_RECENT {
            return;
        }
        let evict_count = keys.len() - PRESERVE_RECENT;
        for key in keys.into_iter().take(evict_count) {
            if let Some(value) = self.short_term.remove(&key) {
                let digest = summarize(&value);
                self.summary.insert(key, Value::String(digest));
            }
        }
    }
}

/// One-line digest of a memory entry.
fn summarize(value: &Value) -> String {
    let text = match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    if text.len() > 120 {
        let mut end = 120;
        while !text.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &text[..end])
    } else {
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn role_keywords_nonempty() {
        for role in [
            AgentRole::Researcher,
            AgentRole::Coder,
            AgentRole::Validator,
        ] {
            assert!(!role.keywords().is_empty());
        }
    }

    #[test]
    fn memory_compresses_past_threshold() {
        let mut memory = AgentMemory::default();
        for i in 0..12 {
            memory.record_interaction(json!({ "task": format!("t{i}") }));
        }
        assert_eq!(memory.short_term.len(), PRESERVE_RECENT);
        assert!(!memory.summary.is_empty());
        // Newest entries survive verbatim.
        assert!(memory.short_term.contains_key("interaction_12"));
        assert!(memory.summary.contains_key("interaction_1"));
    }

    #[test]
    fn memory_below_threshold_untouched() {
        let mut memory = AgentMemory::default();
        for _ in 0..5 {
            memory.record_interaction(json!("x"));
        }
        assert_eq!(memory.short_term.len(), 5);
        assert!(memory.summary.is_empty());
    }

    #[test]
    fn agent_serde_round_trip() {
        let agent = AgentDefinition::new("researcher-1", AgentRole::Researcher)
            .with_skill("web-search")
            .with_domain("finance")
            .with_preferred_model(ModelId::new("openai", "gpt-4.1"))
            .with_trust(0.9);

        let json = serde_json::to_string(&agent).unwrap();
        let back: AgentDefinition = serde_json::from_str(&json).unwrap();
        assert_eq!(back.name, "researcher-1");
        assert_eq!(back.role, AgentRole::Researcher);
        assert_eq!(back.skills, vec!["web-search"]);
        assert!((back.trust_level - 0.9).abs() < 1e-9);
        assert_eq!(back.preferred_models[0].as_str(), "openai/gpt-4.1");
    }
}
