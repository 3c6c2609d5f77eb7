//! Agent record loading (external-parser seam). The on-disk markdown/XML-like
//! agent-definition parser is out of scope; this module models only its
//! output contract.

use std::collections::HashMap;

use crate::types::AgentRecord;
use crate::{Error, Result};

/// Loads an [`AgentRecord`] by id. The on-disk parser that produces these
/// records is an external collaborator; this trait is the seam this crate
/// consumes it through.
pub trait AgentLoader: Send + Sync {
    fn load(&self, id: &str) -> Result<AgentRecord>;
}

/// In-memory registry populated at construction, standing in for a loader
/// backed by parsed on-disk agent files.
#[derive(Debug, Clone, Default)]
pub struct StaticAgentRegistry {
    agents: HashMap<String, AgentRecord>,
}

impl StaticAgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_agents(agents: Vec<AgentRecord>) -> Self {
        let mut registry = Self::new();
        for agent in agents {
            registry.insert(agent);
        }
        registry
    }

    pub fn insert(&mut self, agent: AgentRecord) {
        self.agents.insert(agent.id.clone(), agent);
    }

    pub fn contains(&self, id: &str) -> bool {
        self.agents.contains_key(id)
    }
}

impl AgentLoader for StaticAgentRegistry {
    fn load(&self, id: &str) -> Result<AgentRecord> {
        self.agents
            .get(id)
            .cloned()
            .ok_or_else(|| Error::agent_not_found(id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::Persona;

    fn sample_agent(id: &str) -> AgentRecord {
        AgentRecord {
            id: id.to_string(),
            name: "Analyst".to_string(),
            title: "Business Analyst".to_string(),
            icon: None,
            persona: Persona {
                role: "analyst".to_string(),
                identity: "a careful analyst".to_string(),
                communication_style: "concise".to_string(),
                principles: vec!["be accurate".to_string()],
            },
            menu: Vec::new(),
            workflows: Vec::new(),
        }
    }

    #[test]
    fn load_returns_agent_not_found_for_unknown_id() {
        let registry = StaticAgentRegistry::new();
        let result = registry.load("ghost");
        assert!(matches!(result, Err(Error::AgentNotFound(_))));
    }

    #[test]
    fn load_returns_registered_agent() {
        let registry = StaticAgentRegistry::with_agents(vec![sample_agent("analyst")]);
        let agent = registry.load("analyst").unwrap();
        assert_eq!(agent.name, "Analyst");
    }
}
