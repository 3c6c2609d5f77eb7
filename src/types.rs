//! Core data types shared across the gateway: messages, requests/responses,
//! agent records, and the small validated newtypes used throughout configuration.

use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

// ============================================================================
// VALIDATED NEWTYPES
// ============================================================================

/// A non-empty model identifier.
///
/// # Examples
///
/// ```
/// use llm_gateway::ModelName;
///
/// let model = ModelName::new("llama-3.1-70b-versatile").unwrap();
/// assert_eq!(model.as_str(), "llama-3.1-70b-versatile");
/// assert!(ModelName::new("").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelName(String);

impl ModelName {
    pub fn new(name: impl Into<String>) -> crate::Result<Self> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(Error::input("model name cannot be empty or whitespace"));
        }
        Ok(ModelName(name))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ModelName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for ModelName {
    type Error = Error;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        ModelName::new(value)
    }
}

impl From<ModelName> for String {
    fn from(value: ModelName) -> Self {
        value.0
    }
}

/// A task-complexity class driving cost-based provider routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Complexity {
    Simple,
    Code,
    Medium,
    Complex,
    Critical,
}

impl std::fmt::Display for Complexity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Complexity::Simple => "simple",
            Complexity::Code => "code",
            Complexity::Medium => "medium",
            Complexity::Complex => "complex",
            Complexity::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// Coarse task type hint passed to aggregator providers for model selection (C12).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskType {
    Code,
    Reasoning,
    General,
}

impl Complexity {
    /// Maps a complexity class to the task-type hint used by smart upstream discovery.
    pub fn to_task_type(self) -> TaskType {
        match self {
            Complexity::Code => TaskType::Code,
            Complexity::Complex | Complexity::Critical => TaskType::Reasoning,
            Complexity::Simple | Complexity::Medium => TaskType::General,
        }
    }
}

// ============================================================================
// CHAT MESSAGES
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageRole::System => "system",
            MessageRole::User => "user",
            MessageRole::Assistant => "assistant",
        };
        write!(f, "{s}")
    }
}

/// A single chat turn. Deliberately flat (`role` + `content` strings) rather than
/// a content-block union: the gateway's core contract has no server-side tool
/// invocation, so there is nothing to union over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: MessageRole,
    pub content: String,
}

impl Message {
    pub fn new(role: MessageRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(MessageRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(MessageRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(MessageRole::Assistant, content)
    }
}

// ============================================================================
// AGENT RECORD
// ============================================================================

/// Structured persona record consumed by the prompt assembler. The on-disk
/// markdown/front-matter parser that produces these is out of scope; callers
/// supply them via an [`crate::agent::AgentLoader`] implementation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Persona {
    pub role: String,
    pub identity: String,
    pub communication_style: String,
    pub principles: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MenuItem {
    pub cmd: String,
    pub description: Option<String>,
    pub workflow: Option<String>,
    pub exec: Option<String>,
    pub data: Option<String>,
    pub action: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: String,
    pub name: String,
    pub title: String,
    pub icon: Option<String>,
    pub persona: Persona,
    pub menu: Vec<MenuItem>,
    pub workflows: Vec<String>,
}

/// Per-request display/locale scope. Generalized from a single operator's
/// hardcoded defaults into a configurable, defaultable value (§1.2 supplement).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserScope {
    pub communication_language: String,
    pub user_name: String,
}

impl Default for UserScope {
    fn default() -> Self {
        Self {
            communication_language: "EN".to_string(),
            user_name: "User".to_string(),
        }
    }
}

// ============================================================================
// EXECUTION REQUEST / RESPONSE
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionRequest {
    pub agent_id: String,
    pub task: String,
    pub user_id: String,
    #[serde(default)]
    pub conversation_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub complexity: Option<Complexity>,
}

impl ExecutionRequest {
    /// Validates the structural constraints from the data model: required fields
    /// non-empty, `task` length within [1, 10000], `temperature` within [0.0, 2.0]
    /// when present, `max_tokens` within [1, 100000] when present.
    pub fn validate(&self) -> crate::Result<()> {
        if self.agent_id.trim().is_empty() {
            return Err(Error::input("agent_id is required"));
        }
        if self.user_id.trim().is_empty() {
            return Err(Error::input("user_id is required"));
        }
        let len = self.task.chars().count();
        if !(1..=10_000).contains(&len) {
            return Err(Error::input("task must be between 1 and 10000 characters"));
        }
        if let Some(t) = self.temperature {
            if !(0.0..=2.0).contains(&t) {
                return Err(Error::input("temperature must be between 0.0 and 2.0"));
            }
        }
        if let Some(m) = self.max_tokens {
            if !(1..=100_000).contains(&m) {
                return Err(Error::input("max_tokens must be between 1 and 100000"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetadata {
    pub request_id: Uuid,
    pub latency_ms: u64,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub fallback_used: bool,
    pub turns: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResponse {
    pub agent_id: String,
    pub agent_name: String,
    pub provider_name: String,
    pub model_name: String,
    pub response_text: String,
    pub metadata: ExecutionMetadata,
}

// ============================================================================
// LLM RESPONSE (adapter output)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmResponse {
    pub content: String,
    pub tokens_input: u32,
    pub tokens_output: u32,
    pub latency_ms: u64,
    pub model: String,
    pub finish_reason: String,
    pub provider_name: String,
}

/// Estimates token count from character length at 4 chars/token, the fallback
/// heuristic adapters use when the upstream response omits usage accounting.
pub fn estimate_tokens(text: &str) -> u32 {
    ((text.chars().count() as f64) / 4.0).ceil() as u32
}
