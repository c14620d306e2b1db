//! Session state subcommands.
//!
//! These talk to the [`SessionStore`] directly rather than through a hook
//! lifecycle: a shell hook calls several of them in a row, and each call is
//! one locked read-modify-write of the session document.
//!
//! Predicates (`has-shown`, `has-validated`) and lookups (`get`, `get-nested`)
//! answer through the exit status so scripts can branch on them:
//! 0 when the flag is set or the value exists, 1 otherwise. A store failure
//! (corrupt document, fail-closed lock timeout) exits 3 instead.

use serde_json::Value;
use session_core::{
    FailurePolicy, HookConfig, RecommendationTracker, Result, SessionError, SessionStore,
    ValidationTracker,
};

use crate::Target;

const FOUND: i32 = 0;
const NOT_FOUND: i32 = 1;

fn open_store(config: &HookConfig, policy: FailurePolicy) -> SessionStore {
    let (key, source) = config.resolve_session_key();
    tracing::debug!(session = %key, key_source = ?source, "Opening session store");
    SessionStore::open(
        &config.storage,
        key,
        config.lock_manager(policy.lock_policy()),
    )
}

/// `VALUE` as JSON when it parses, otherwise the literal string.
pub(crate) fn parse_value(raw: &str, force_string: bool) -> Value {
    if force_string {
        return Value::String(raw.to_string());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

/// Strings print raw unless `json` is set; everything else prints as compact JSON.
pub(crate) fn format_value(value: &Value, json: bool) -> String {
    match value {
        Value::String(text) if !json => text.clone(),
        other => other.to_string(),
    }
}

fn print_lookup(value: Option<Value>, json: bool) -> i32 {
    match value {
        Some(value) => {
            println!("{}", format_value(&value, json));
            FOUND
        }
        None => NOT_FOUND,
    }
}

fn predicate(answer: bool) -> i32 {
    if answer {
        FOUND
    } else {
        NOT_FOUND
    }
}

pub fn init(config: &HookConfig, policy: FailurePolicy, target: &Target) -> Result<i32> {
    let store = open_store(config, policy);
    store.init(&target.plugin)?;
    println!("{}", store.path().display());
    Ok(0)
}

pub fn get(
    config: &HookConfig,
    policy: FailurePolicy,
    target: &Target,
    key: &str,
    json: bool,
) -> Result<i32> {
    let value = open_store(config, policy).get_value(&target.plugin, key)?;
    Ok(print_lookup(value, json))
}

pub fn set(
    config: &HookConfig,
    policy: FailurePolicy,
    target: &Target,
    key: &str,
    raw: &str,
    force_string: bool,
) -> Result<i32> {
    open_store(config, policy).set_value(&target.plugin, key, parse_value(raw, force_string))?;
    Ok(0)
}

pub fn unset(
    config: &HookConfig,
    policy: FailurePolicy,
    target: &Target,
    key: &str,
) -> Result<i32> {
    let previous = open_store(config, policy).remove_value(&target.plugin, key)?;
    Ok(predicate(previous.is_some()))
}

pub fn get_nested(
    config: &HookConfig,
    policy: FailurePolicy,
    target: &Target,
    path: &str,
    json: bool,
) -> Result<i32> {
    let value = open_store(config, policy).get_nested(&target.plugin, path)?;
    Ok(print_lookup(value, json))
}

pub fn set_nested(
    config: &HookConfig,
    policy: FailurePolicy,
    target: &Target,
    path: &str,
    raw: &str,
    force_string: bool,
) -> Result<i32> {
    open_store(config, policy).set_nested(&target.plugin, path, parse_value(raw, force_string))?;
    Ok(0)
}

pub fn has_shown(
    config: &HookConfig,
    policy: FailurePolicy,
    target: &Target,
    key: &str,
) -> Result<i32> {
    let store = open_store(config, policy);
    let shown = RecommendationTracker::new(&store).has_shown(&target.plugin, key)?;
    Ok(predicate(shown))
}

pub fn mark_shown(
    config: &HookConfig,
    policy: FailurePolicy,
    target: &Target,
    key: &str,
) -> Result<i32> {
    let store = open_store(config, policy);
    RecommendationTracker::new(&store).mark_shown(&target.plugin, key)?;
    Ok(0)
}

pub fn has_validated(
    config: &HookConfig,
    policy: FailurePolicy,
    target: &Target,
    check: &str,
    subject: &str,
) -> Result<i32> {
    let store = open_store(config, policy);
    let passed = ValidationTracker::new(&store).has_passed(&target.plugin, check, subject)?;
    Ok(predicate(passed))
}

pub fn mark_validated(
    config: &HookConfig,
    policy: FailurePolicy,
    target: &Target,
    check: &str,
    subject: &str,
) -> Result<i32> {
    let store = open_store(config, policy);
    ValidationTracker::new(&store).mark_passed(&target.plugin, check, subject)?;
    Ok(0)
}

pub fn age(config: &HookConfig, policy: FailurePolicy) -> Result<i32> {
    let age = open_store(config, policy).age()?;
    println!("{}", age.as_secs());
    Ok(0)
}

pub fn clear(config: &HookConfig, policy: FailurePolicy) -> Result<i32> {
    open_store(config, policy).clear()?;
    Ok(0)
}

pub fn dump(config: &HookConfig, policy: FailurePolicy) -> Result<i32> {
    let Some(doc) = open_store(config, policy).snapshot()? else {
        return Ok(NOT_FOUND);
    };
    let pretty = serde_json::to_string_pretty(&doc).map_err(|source| SessionError::Json {
        context: "Failed to serialize session".to_string(),
        source,
    })?;
    println!("{}", pretty);
    Ok(FOUND)
}
