//! Hook responses and their two wire dialects.
//!
//! A hook ends with exactly one [`HookResponse`]. How it reaches the host
//! depends on the [`Dialect`]:
//!
//! ```text
//!              │ JSON dialect                       │ legacy dialect
//! ─────────────┼────────────────────────────────────┼─────────────────────────
//! allow        │ permissionDecision=allow, exit 0   │ context on stdout, exit 0
//! warn         │ allow + reason/context, exit 0     │ message on stderr, exit 1
//! ask          │ permissionDecision=ask, exit 0     │ message on stderr, exit 1
//! block        │ permissionDecision=block, exit 0   │ reason on stderr, exit 2
//! ```
//!
//! In the JSON dialect the decision lives in the body; in the legacy dialect
//! the exit status itself is the decision.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub const EXIT_ALLOW: i32 = 0;
pub const EXIT_WARN: i32 = 1;
pub const EXIT_BLOCK: i32 = 2;

/// Host lifecycle point a hook runs at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HookEvent {
    PreToolUse,
    PostToolUse,
    SessionStart,
    Other(String),
}

impl HookEvent {
    /// Accepts the host's spelling (`PreToolUse`) as well as script-style
    /// spellings (`pre-tool-use`, `pre_tool_use`).
    pub fn from_name(name: &str) -> Self {
        let folded: String = name
            .chars()
            .filter(|c| *c != '-' && *c != '_')
            .flat_map(char::to_lowercase)
            .collect();
        match folded.as_str() {
            "pretooluse" => HookEvent::PreToolUse,
            "posttooluse" => HookEvent::PostToolUse,
            "sessionstart" => HookEvent::SessionStart,
            _ => HookEvent::Other(name.to_string()),
        }
    }

    pub fn event_name(&self) -> &str {
        match self {
            HookEvent::PreToolUse => "PreToolUse",
            HookEvent::PostToolUse => "PostToolUse",
            HookEvent::SessionStart => "SessionStart",
            HookEvent::Other(name) => name,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Dialect {
    #[default]
    Json,
    Legacy,
}

impl FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Dialect::Json),
            "legacy" | "text" | "plain" => Ok(Dialect::Legacy),
            other => Err(format!("unknown dialect: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Allow,
    Warn,
    Ask,
    Block,
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Decision::Allow => "allow",
            Decision::Warn => "warn",
            Decision::Ask => "ask",
            Decision::Block => "block",
        })
    }
}

impl FromStr for Decision {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow" => Ok(Decision::Allow),
            "warn" => Ok(Decision::Warn),
            "ask" => Ok(Decision::Ask),
            "block" | "deny" => Ok(Decision::Block),
            other => Err(format!("unknown decision: {other}")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HookResponse {
    pub decision: Decision,
    pub reason: Option<String>,
    pub context: Option<String>,
}

impl HookResponse {
    pub fn allow() -> Self {
        HookResponse {
            decision: Decision::Allow,
            reason: None,
            context: None,
        }
    }

    pub fn warn(message: impl Into<String>) -> Self {
        Self::with_decision(Decision::Warn, message)
    }

    pub fn ask(reason: impl Into<String>) -> Self {
        Self::with_decision(Decision::Ask, reason)
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self::with_decision(Decision::Block, reason)
    }

    /// Allows the action and injects `text` back into the host model.
    pub fn inject(text: impl Into<String>) -> Self {
        HookResponse::allow().with_context(text)
    }

    fn with_decision(decision: Decision, reason: impl Into<String>) -> Self {
        HookResponse {
            decision,
            reason: Some(reason.into()),
            context: None,
        }
    }

    pub fn with_context(mut self, text: impl Into<String>) -> Self {
        self.context = Some(text.into());
        self
    }

    pub fn render(&self, event: &HookEvent, dialect: Dialect) -> RenderedResponse {
        match dialect {
            Dialect::Json => self.render_json(event),
            Dialect::Legacy => self.render_legacy(),
        }
    }

    fn render_json(&self, event: &HookEvent) -> RenderedResponse {
        let mut specific = Map::new();
        specific.insert("hookEventName".into(), json!(event.event_name()));
        let mut body = Map::new();

        if *event == HookEvent::PreToolUse {
            let permission = match self.decision {
                Decision::Allow | Decision::Warn => "allow",
                Decision::Ask => "ask",
                Decision::Block => "block",
            };
            specific.insert("permissionDecision".into(), json!(permission));
            if let Some(reason) = &self.reason {
                specific.insert("permissionDecisionReason".into(), json!(reason));
            }
            if let Some(context) = &self.context {
                specific.insert("additionalContext".into(), json!(context));
            }
        } else {
            if self.decision == Decision::Block {
                body.insert("decision".into(), json!("block"));
                if let Some(reason) = &self.reason {
                    body.insert("reason".into(), json!(reason));
                }
            }
            let injected = self.context.as_ref().or(match self.decision {
                Decision::Warn | Decision::Ask => self.reason.as_ref(),
                _ => None,
            });
            match injected {
                Some(text) => {
                    specific.insert("additionalContext".into(), json!(text));
                }
                None if body.is_empty() => return RenderedResponse::silent(EXIT_ALLOW),
                None => {}
            }
        }

        if specific.len() > 1 {
            body.insert("hookSpecificOutput".into(), Value::Object(specific));
        }
        RenderedResponse {
            stdout: Some(Value::Object(body).to_string()),
            stderr: None,
            exit_code: EXIT_ALLOW,
        }
    }

    fn render_legacy(&self) -> RenderedResponse {
        let message = self.reason.clone().or_else(|| self.context.clone());
        match self.decision {
            Decision::Allow => RenderedResponse {
                stdout: self.context.clone(),
                stderr: None,
                exit_code: EXIT_ALLOW,
            },
            Decision::Warn | Decision::Ask => RenderedResponse {
                stdout: None,
                stderr: message,
                exit_code: EXIT_WARN,
            },
            Decision::Block => RenderedResponse {
                stdout: None,
                stderr: message,
                exit_code: EXIT_BLOCK,
            },
        }
    }
}

/// What the process writes and exits with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResponse {
    pub stdout: Option<String>,
    pub stderr: Option<String>,
    pub exit_code: i32,
}

impl RenderedResponse {
    pub fn silent(exit_code: i32) -> Self {
        RenderedResponse {
            stdout: None,
            stderr: None,
            exit_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stdout_json(rendered: &RenderedResponse) -> Value {
        serde_json::from_str(rendered.stdout.as_deref().unwrap()).unwrap()
    }

    #[test]
    fn test_event_names_are_folded() {
        assert_eq!(HookEvent::from_name("PreToolUse"), HookEvent::PreToolUse);
        assert_eq!(HookEvent::from_name("post-tool-use"), HookEvent::PostToolUse);
        assert_eq!(HookEvent::from_name("session_start"), HookEvent::SessionStart);
        assert_eq!(
            HookEvent::from_name("check-deprecations"),
            HookEvent::Other("check-deprecations".to_string())
        );
    }

    #[test]
    fn test_pre_tool_use_block_json() {
        let rendered = HookResponse::block("uses removed API")
            .render(&HookEvent::PreToolUse, Dialect::Json);
        assert_eq!(rendered.exit_code, EXIT_ALLOW);
        assert_eq!(
            stdout_json(&rendered),
            json!({
                "hookSpecificOutput": {
                    "hookEventName": "PreToolUse",
                    "permissionDecision": "block",
                    "permissionDecisionReason": "uses removed API"
                }
            })
        );
    }

    #[test]
    fn test_pre_tool_use_allow_json() {
        let rendered = HookResponse::allow().render(&HookEvent::PreToolUse, Dialect::Json);
        let body = stdout_json(&rendered);
        assert_eq!(body["hookSpecificOutput"]["permissionDecision"], "allow");
        assert!(body["hookSpecificOutput"].get("permissionDecisionReason").is_none());
    }

    #[test]
    fn test_pre_tool_use_warn_is_allow_with_reason() {
        let rendered = HookResponse::warn("prefer async")
            .render(&HookEvent::PreToolUse, Dialect::Json);
        let body = stdout_json(&rendered);
        assert_eq!(body["hookSpecificOutput"]["permissionDecision"], "allow");
        assert_eq!(body["hookSpecificOutput"]["permissionDecisionReason"], "prefer async");
    }

    #[test]
    fn test_post_tool_use_injects_context() {
        let rendered = HookResponse::inject("Remember to run tests")
            .render(&HookEvent::PostToolUse, Dialect::Json);
        assert_eq!(
            stdout_json(&rendered),
            json!({
                "hookSpecificOutput": {
                    "hookEventName": "PostToolUse",
                    "additionalContext": "Remember to run tests"
                }
            })
        );
    }

    #[test]
    fn test_post_tool_use_allow_without_context_is_silent() {
        let rendered = HookResponse::allow().render(&HookEvent::SessionStart, Dialect::Json);
        assert_eq!(rendered, RenderedResponse::silent(EXIT_ALLOW));
    }

    #[test]
    fn test_post_tool_use_block_has_top_level_decision() {
        let rendered = HookResponse::block("bad edit")
            .render(&HookEvent::PostToolUse, Dialect::Json);
        let body = stdout_json(&rendered);
        assert_eq!(body["decision"], "block");
        assert_eq!(body["reason"], "bad edit");
        assert!(body.get("hookSpecificOutput").is_none());
    }

    #[test]
    fn test_legacy_exit_codes_carry_decision() {
        let event = HookEvent::PreToolUse;
        assert_eq!(HookResponse::allow().render(&event, Dialect::Legacy).exit_code, EXIT_ALLOW);
        assert_eq!(HookResponse::warn("w").render(&event, Dialect::Legacy).exit_code, EXIT_WARN);
        assert_eq!(HookResponse::ask("a").render(&event, Dialect::Legacy).exit_code, EXIT_WARN);

        let blocked = HookResponse::block("stop").render(&event, Dialect::Legacy);
        assert_eq!(blocked.exit_code, EXIT_BLOCK);
        assert_eq!(blocked.stderr.as_deref(), Some("stop"));
        assert_eq!(blocked.stdout, None);
    }

    #[test]
    fn test_legacy_allow_prints_context() {
        let rendered = HookResponse::inject("hint")
            .render(&HookEvent::SessionStart, Dialect::Legacy);
        assert_eq!(rendered.stdout.as_deref(), Some("hint"));
        assert_eq!(rendered.exit_code, EXIT_ALLOW);
    }

    #[test]
    fn test_decision_parsing() {
        assert_eq!("deny".parse::<Decision>().unwrap(), Decision::Block);
        assert_eq!("ASK".parse::<Decision>().unwrap(), Decision::Ask);
        assert!("maybe".parse::<Decision>().is_err());
        assert_eq!("plain".parse::<Dialect>().unwrap(), Dialect::Legacy);
    }
}
