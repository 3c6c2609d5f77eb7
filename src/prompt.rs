//! Prompt assembler (C14): deterministic string composition from an agent
//! record and a user scope into a single system prompt.

use crate::types::{estimate_tokens, AgentRecord, UserScope};

/// Prompts above this size are a composition bug, not a runtime error —
/// `assemble` never produces one on its own, but callers embedding large
/// agent records should check `estimate_tokens` against this before sending.
pub const MAX_PROMPT_TOKENS: u32 = 4_000;

/// Builds the five-section system prompt: intro, persona, menu (optional),
/// rules (parameterized by `scope`), activation reminder.
pub fn assemble(agent: &AgentRecord, scope: &UserScope, include_menu: bool) -> String {
    let mut sections = vec![build_intro(agent), build_persona(agent)];

    if include_menu {
        sections.push(build_menu(agent));
    }

    sections.push(build_rules(scope));
    sections.push(build_activation_reminder(agent));

    sections.join("\n\n")
}

fn build_intro(agent: &AgentRecord) -> String {
    format!("You are {}, a {}.", agent.name, agent.title)
}

fn build_persona(agent: &AgentRecord) -> String {
    let persona = &agent.persona;
    format!(
        "PERSONA:\n- Role: {}\n- Identity: {}\n- Communication Style: {}\n- Principles: {}",
        persona.role,
        persona.identity,
        persona.communication_style,
        persona.principles.join(", "),
    )
}

fn build_menu(agent: &AgentRecord) -> String {
    if agent.menu.is_empty() {
        return "MENU:\n(No menu items defined)".to_string();
    }

    let mut lines = vec!["MENU:".to_string()];
    for (idx, item) in agent.menu.iter().enumerate() {
        let cmd_part = if item.cmd.is_empty() {
            String::new()
        } else {
            format!(" ({})", item.cmd)
        };
        let desc = item.description.as_deref().unwrap_or("Menu item");
        lines.push(format!("{}. {desc}{cmd_part}", idx + 1));
    }
    lines.join("\n")
}

fn build_rules(scope: &UserScope) -> String {
    format!(
        "RULES:\n\
         - ALWAYS communicate in {}\n\
         - User's name is {}\n\
         - Stay in character until exit selected\n\
         - Menu triggers use asterisk (*) - NOT markdown\n\
         - Number all lists, use letters for sub-options\n\
         - Load files ONLY when executing menu items or workflows require it",
        scope.communication_language, scope.user_name,
    )
}

fn build_activation_reminder(agent: &AgentRecord) -> String {
    let icon = agent.icon.as_deref().unwrap_or("");
    format!(
        "You must fully embody this agent's persona and follow all instructions exactly as specified.\n\
         NEVER break character until given an exit command.\n\n\
         Your name is {}. You are a {}. {icon}",
        agent.name, agent.title,
    )
}

/// Advisory token estimate for a composed prompt; `MAX_PROMPT_TOKENS` is the
/// ceiling callers should enforce when agent records come from untrusted input.
pub fn estimate_prompt_tokens(prompt: &str) -> u32 {
    estimate_tokens(prompt)
}
