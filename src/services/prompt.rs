//! Prompt templates and model-specific envelopes.
//!
//! Templates are data: a (role, task, format) tuple with optional
//! context, constraints, and examples, rendered into a document with
//! labeled sections after `{var}` substitution.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// An RTF-structured prompt template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromptTemplate {
    pub role: String,
    pub task: String,
    pub format: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub constraints: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub examples: Vec<String>,
}

impl PromptTemplate {
    pub fn new(
        role: impl Into<String>,
        task: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            role: role.into(),
            task: task.into(),
            format: format.into(),
            context: None,
            constraints: Vec::new(),
            examples: Vec::new(),
        }
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn with_constraint(mut self, constraint: impl Into<String>) -> Self {
        self.constraints.push(constraint.into());
        self
    }

    /// Substitute `{var}` placeholders and emit the labeled document.
    /// Unknown placeholders are left verbatim.
    pub fn render(&self, variables: &HashMap<String, String>) -> String {
        let mut sections = vec![
            format!("# Role\n{}", substitute(&self.role, variables)),
            format!("# Task\n{}", substitute(&self.task, variables)),
        ];
        if let Some(context) = &self.context {
            sections.push(format!("# Context\n{}", substitute(context, variables)));
        }
        if !self.constraints.is_empty() {
            let list = self
                .constraints
                .iter()
                .map(|c| format!("- {}", substitute(c, variables)))
                .collect::<Vec<_>>()
                .join("\n");
            sections.push(format!("# Constraints\n{list}"));
        }
        sections.push(format!("# Format\n{}", substitute(&self.format, variables)));
        if !self.examples.is_empty() {
            sections.push(format!("# Examples\n{}", self.examples.join("\n")));
        }
        sections.join("\n\n")
    }
}

fn substitute(text: &str, variables: &HashMap<String, String>) -> String {
    let mut out = text.to_string();
    for (key, value) in variables {
        out = out.replace(&format!("{{{key}}}"), value);
    }
    out
}

/// Built-in template table keyed by template name.
pub struct TemplateLibrary {
    templates: HashMap<String, PromptTemplate>,
}

impl Default for TemplateLibrary {
    fn default() -> Self {
        let mut templates = HashMap::new();
        templates.insert(
            "general".to_string(),
            PromptTemplate::new(
                "You are a {agent_role} agent executing one task inside a larger workflow.",
                "{task_description}\n\nInput data:\n{input_data}\n\nExpected output:\n{expected_output}\n\nSuccess criteria:\n{success_criteria}",
                "Respond with a single JSON object matching the expected output shape.",
            )
            .with_context("Workflow context:\n{context}")
            .with_constraint("Stay within the scope of the assigned task.")
            .with_constraint("If the task cannot be completed, say so explicitly."),
        );
        templates.insert(
            "research".to_string(),
            PromptTemplate::new(
                "You are a {agent_role} agent specialized in gathering and organizing information.",
                "{task_description}\n\nInput data:\n{input_data}\n\nSuccess criteria:\n{success_criteria}",
                "Respond with a JSON object: findings (array), sources (array), confidence (0-1).",
            )
            .with_context("Workflow context:\n{context}")
            .with_constraint("Distinguish established facts from inference."),
        );
        templates.insert(
            "code".to_string(),
            PromptTemplate::new(
                "You are a {agent_role} agent producing working code.",
                "{task_description}\n\nInput data:\n{input_data}\n\nExpected output:\n{expected_output}",
                "Respond with a JSON object: code (string), language (string), explanation (string).",
            )
            .with_constraint("Prefer simple, readable implementations."),
        );
        Self { templates }
    }
}

impl TemplateLibrary {
    pub fn get(&self, name: &str) -> &PromptTemplate {
        self.templates
            .get(name)
            .unwrap_or_else(|| &self.templates["general"])
    }

    pub fn register(&mut self, name: impl Into<String>, template: PromptTemplate) {
        self.templates.insert(name.into(), template);
    }

    /// Template name appropriate for an agent role tag.
    pub fn template_for_role(role: &str) -> &'static str {
        match role {
            "researcher" => "research",
            "coder" => "code",
            _ => "general",
        }
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.templates.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Wrap a rendered prompt in the envelope the target model family
/// expects. OpenAI-family models take the document unchanged.
pub fn apply_model_envelope(prompt: &str, model_id: &str) -> String {
    let lower = model_id.to_lowercase();
    if lower.contains("claude") {
        format!("Human: {prompt}\n\nAssistant:")
    } else if lower.contains("llama") {
        format!("### Instruction:\n{prompt}\n\n### Response:")
    } else {
        prompt.to_string()
    }
}
