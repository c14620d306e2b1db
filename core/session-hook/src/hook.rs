//! Subcommands that act as (or on behalf of) a hook invocation.
//!
//! `respond` and `remind` drive a full [`HookContext`] lifecycle. `input`
//! only reads stdin, and `log` and `fatal` only touch the error journal, so
//! all three work even when the session document itself is unreadable.

use std::io;

use serde_json::Value;
use session_core::types::lookup_path;
use session_core::{
    parse_hook_input, run_hook, Decision, Dialect, FailurePolicy, HookConfig, HookContext,
    HookResponse, Level, RenderedResponse, Result, SessionError,
};

use crate::state::format_value;
use crate::Target;

fn context_for(
    mut config: HookConfig,
    policy: FailurePolicy,
    target: &Target,
    dialect: Option<Dialect>,
) -> HookContext {
    if let Some(dialect) = dialect {
        config.dialect = dialect;
    }
    HookContext::with_policy(&target.plugin, &target.hook, config, policy)
}

fn parse_context(raw: Option<&str>) -> Result<Value> {
    match raw {
        None => Ok(Value::Null),
        Some(raw) => serde_json::from_str(raw).map_err(|source| SessionError::Json {
            context: "Invalid --context".to_string(),
            source,
        }),
    }
}

/// Writes a rendered response exactly as the host expects it.
pub(crate) fn emit(rendered: &RenderedResponse) -> i32 {
    if let Some(out) = &rendered.stdout {
        println!("{}", out);
    }
    if let Some(err) = &rendered.stderr {
        eprintln!("{}", err);
    }
    rendered.exit_code
}

/// Looks up a field of the host payload on stdin. Never touches the session.
pub fn input(target: &Target, path: &str, json: bool) -> Result<i32> {
    let payload = parse_hook_input(io::stdin().lock(), &target.hook);
    Ok(print_field(&payload, path, json))
}

fn print_field(payload: &Value, path: &str, json: bool) -> i32 {
    match payload.as_object().and_then(|root| lookup_path(root, path)) {
        Some(value) => {
            println!("{}", format_value(value, json));
            0
        }
        None => 1,
    }
}

pub fn log(
    config: HookConfig,
    target: &Target,
    level: Level,
    code: &str,
    message: &str,
    context: Option<&str>,
) -> Result<i32> {
    let ctx = HookContext::new(&target.plugin, &target.hook, config);
    let written = ctx.journal(level, code, message, parse_context(context)?)?;
    if !written {
        tracing::debug!(level = %level, code = %code, "Journal entry below threshold");
    }
    Ok(0)
}

pub fn fatal(
    config: HookConfig,
    target: &Target,
    code: &str,
    message: &str,
    context: Option<&str>,
) -> Result<i32> {
    let ctx = HookContext::new(&target.plugin, &target.hook, config);
    let context = parse_context(context).unwrap_or_else(|err| {
        tracing::warn!(error = %err, "Dropping unparseable fatal context");
        Value::Null
    });
    Err(ctx.fatal(code, message, context))
}

#[allow(clippy::too_many_arguments)]
pub fn respond(
    config: HookConfig,
    policy: FailurePolicy,
    target: &Target,
    decision: Decision,
    reason: Option<String>,
    context: Option<String>,
    dialect: Option<Dialect>,
) -> Result<i32> {
    let mut ctx = context_for(config, policy, target, dialect);
    ctx.init()?;
    let response = HookResponse {
        decision,
        reason,
        context,
    };
    let code = emit(ctx.respond(response)?);
    Ok(ctx.finish(code))
}

/// Injects `message` once per session; later invocations stay silent.
pub fn remind(
    config: HookConfig,
    policy: FailurePolicy,
    target: &Target,
    key: &str,
    message: &str,
    dialect: Option<Dialect>,
) -> Result<i32> {
    let ctx = context_for(config, policy, target, dialect);
    let hook = |ctx: &mut HookContext| -> Result<HookResponse> {
        if ctx.show_once(key)? {
            Ok(HookResponse::inject(message))
        } else {
            Ok(HookResponse::allow())
        }
    };
    let rendered = run_hook(ctx, &hook, io::stdin().lock());
    Ok(emit(&rendered))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_print_field_reports_presence() {
        let payload = json!({"tool_input": {"file_path": "/src/App.swift"}});
        assert_eq!(print_field(&payload, "tool_input.file_path", false), 0);
        assert_eq!(print_field(&payload, "tool_input.content", false), 1);
        assert_eq!(print_field(&json!("not an object"), "tool_input", false), 1);
    }

    #[test]
    fn test_parse_context_requires_json() {
        assert_eq!(parse_context(None).unwrap(), Value::Null);
        assert_eq!(parse_context(Some(r#"{"a":1}"#)).unwrap(), json!({"a": 1}));
        assert!(parse_context(Some("{oops")).is_err());
    }
}
