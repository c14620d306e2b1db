//! Per-invocation hook lifecycle.
//!
//! ## State Machine
//!
//! ```text
//! Uninitialized ──init──▶ Initialized ──read_input──▶ InputRead
//!                              │                          │
//!                              └────────respond───────────┤
//!                                                         ▼
//!                                                    Responding ──finish──▶ Terminated
//! ```
//!
//! `read_input` is idempotent once the input is cached. `respond` is allowed
//! exactly once. `finish` consumes the context, so nothing (store handles,
//! lock guards) outlives the invocation.
//!
//! Everything the shell hooks used to export as globals (plugin, hook name,
//! session file) is a field of [`HookContext`].

use std::io::{self, Read};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::config::{
    HookConfig, KeySource, DEBUG_LEVEL_ENV, MARKETPLACE_ROOT_ENV, SESSION_DIR_ENV, SESSION_PID_ENV,
};
use crate::error::{Result, SessionError};
use crate::journal::{ErrorJournal, JournalEntry, Level};
use crate::lock::LockPolicy;
use crate::response::{Dialect, HookEvent, HookResponse, RenderedResponse, EXIT_BLOCK};
use crate::store::SessionStore;
use crate::trackers::{RecommendationTracker, ValidationTracker};
use crate::types::{lookup_path, SessionKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initialized,
    InputRead,
    Responding,
    Terminated,
}

/// How a hook reacts when the store or the lock lets it down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FailurePolicy {
    /// Advisory hooks: log, journal, and let the action proceed.
    #[default]
    Open,
    /// Guard hooks: block the action.
    Closed,
}

impl FailurePolicy {
    /// What the session lock does when it cannot be taken in time.
    pub fn lock_policy(self) -> LockPolicy {
        match self {
            FailurePolicy::Open => LockPolicy::FailOpen,
            FailurePolicy::Closed => LockPolicy::FailClosed,
        }
    }
}

/// Everything one hook invocation knows about itself.
#[derive(Debug)]
pub struct HookContext {
    plugin: String,
    hook: String,
    event: HookEvent,
    key: SessionKey,
    key_source: KeySource,
    config: HookConfig,
    policy: FailurePolicy,
    store: SessionStore,
    journal: ErrorJournal,
    state: LifecycleState,
    input: Option<Value>,
    response: Option<RenderedResponse>,
}

impl HookContext {
    pub fn new(plugin: &str, hook: &str, config: HookConfig) -> Self {
        Self::with_policy(plugin, hook, config, FailurePolicy::default())
    }

    pub fn with_policy(
        plugin: &str,
        hook: &str,
        config: HookConfig,
        policy: FailurePolicy,
    ) -> Self {
        let (key, key_source) = config.resolve_session_key();
        let locks = config.lock_manager(policy.lock_policy());
        let store = SessionStore::open(&config.storage, key, locks);
        let journal = ErrorJournal::new(config.storage.journal_file(key), config.debug_level);

        HookContext {
            plugin: plugin.to_string(),
            hook: hook.to_string(),
            event: HookEvent::from_name(hook),
            key,
            key_source,
            config,
            policy,
            store,
            journal,
            state: LifecycleState::Uninitialized,
            input: None,
            response: None,
        }
    }

    /// Overrides the event derived from the hook name.
    pub fn with_event(mut self, event: HookEvent) -> Self {
        self.event = event;
        self
    }

    pub fn plugin(&self) -> &str {
        &self.plugin
    }

    pub fn hook(&self) -> &str {
        &self.hook
    }

    pub fn event(&self) -> &HookEvent {
        &self.event
    }

    pub fn session_key(&self) -> SessionKey {
        self.key
    }

    pub fn key_source(&self) -> KeySource {
        self.key_source
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn policy(&self) -> FailurePolicy {
        self.policy
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    pub fn error_journal(&self) -> &ErrorJournal {
        &self.journal
    }

    // ─────────────────────────────────────────────────────────────────────
    // Transitions
    // ─────────────────────────────────────────────────────────────────────

    /// Binds the session and makes sure this plugin has a namespace in it.
    pub fn init(&mut self) -> Result<()> {
        self.expect_state(&[LifecycleState::Uninitialized], "init")?;
        self.store.init(&self.plugin)?;
        self.state = LifecycleState::Initialized;
        tracing::debug!(
            plugin = %self.plugin,
            hook = %self.hook,
            session = %self.key,
            key_source = ?self.key_source,
            "Hook initialized"
        );
        Ok(())
    }

    /// Reads the host's JSON payload from stdin.
    pub fn read_input(&mut self) -> Result<&Value> {
        self.read_input_from(io::stdin().lock())
    }

    /// Reads the host payload once; later calls return the cached value.
    ///
    /// Missing, empty or unparseable input becomes an empty object.
    pub fn read_input_from<R: Read>(&mut self, reader: R) -> Result<&Value> {
        if self.input.is_none() {
            self.expect_state(&[LifecycleState::Initialized], "read input")?;
            self.input = Some(parse_hook_input(reader, &self.hook));
            self.state = LifecycleState::InputRead;
        }
        Ok(&*self.input.get_or_insert_with(|| Value::Object(Map::new())))
    }

    /// Records the hook's single response and renders it for the configured dialect.
    pub fn respond(&mut self, response: HookResponse) -> Result<&RenderedResponse> {
        self.expect_state(
            &[LifecycleState::Initialized, LifecycleState::InputRead],
            "respond",
        )?;
        tracing::debug!(
            hook = %self.hook,
            decision = %response.decision,
            "Hook responding"
        );
        let rendered = response.render(&self.event, self.config.dialect);
        Ok(self.conclude(rendered))
    }

    /// Ends the invocation and returns the process status to exit with.
    pub fn finish(mut self, code: i32) -> i32 {
        self.state = LifecycleState::Terminated;
        tracing::debug!(hook = %self.hook, code, "Hook finished");
        code
    }

    pub fn response(&self) -> Option<&RenderedResponse> {
        self.response.as_ref()
    }

    fn conclude(&mut self, rendered: RenderedResponse) -> &RenderedResponse {
        self.state = LifecycleState::Responding;
        self.response.insert(rendered)
    }

    fn expect_state(&self, allowed: &[LifecycleState], action: &'static str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(SessionError::IllegalTransition {
                state: self.state,
                action,
            })
        }
    }

    fn ensure_active(&self, action: &'static str) -> Result<()> {
        self.expect_state(
            &[
                LifecycleState::Initialized,
                LifecycleState::InputRead,
                LifecycleState::Responding,
            ],
            action,
        )
    }

    // ─────────────────────────────────────────────────────────────────────
    // Input
    // ─────────────────────────────────────────────────────────────────────

    pub fn input(&self) -> Option<&Value> {
        self.input.as_ref()
    }

    /// Dot-path lookup into the cached input (`"tool_input.file_path"`).
    pub fn input_field(&self, path: &str) -> Option<&Value> {
        self.input
            .as_ref()
            .and_then(Value::as_object)
            .and_then(|root| lookup_path(root, path))
    }

    pub fn input_str(&self, path: &str) -> Option<&str> {
        self.input_field(path).and_then(Value::as_str)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Session state, scoped to this plugin
    // ─────────────────────────────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_active("read session state")?;
        self.store.get_value(&self.plugin, key)
    }

    pub fn set(&self, key: &str, value: Value) -> Result<()> {
        self.ensure_active("write session state")?;
        self.store.set_value(&self.plugin, key, value)
    }

    pub fn remove(&self, key: &str) -> Result<Option<Value>> {
        self.ensure_active("write session state")?;
        self.store.remove_value(&self.plugin, key)
    }

    pub fn get_nested(&self, path: &str) -> Result<Option<Value>> {
        self.ensure_active("read session state")?;
        self.store.get_nested(&self.plugin, path)
    }

    pub fn set_nested(&self, path: &str, value: Value) -> Result<()> {
        self.ensure_active("write session state")?;
        self.store.set_nested(&self.plugin, path, value)
    }

    pub fn session_age(&self) -> Result<Duration> {
        self.ensure_active("read session age")?;
        self.store.age()
    }

    pub fn has_shown(&self, key: &str) -> Result<bool> {
        self.ensure_active("read recommendations")?;
        RecommendationTracker::new(&self.store).has_shown(&self.plugin, key)
    }

    pub fn mark_shown(&self, key: &str) -> Result<()> {
        self.ensure_active("write recommendations")?;
        RecommendationTracker::new(&self.store).mark_shown(&self.plugin, key)
    }

    /// True the first time it is called for `key` in this session.
    pub fn show_once(&self, key: &str) -> Result<bool> {
        self.ensure_active("write recommendations")?;
        RecommendationTracker::new(&self.store).show_once(&self.plugin, key)
    }

    pub fn has_passed_validation(&self, check: &str, subject: &str) -> Result<bool> {
        self.ensure_active("read validations")?;
        ValidationTracker::new(&self.store).has_passed(&self.plugin, check, subject)
    }

    pub fn mark_validation_passed(&self, check: &str, subject: &str) -> Result<()> {
        self.ensure_active("write validations")?;
        ValidationTracker::new(&self.store).mark_passed(&self.plugin, check, subject)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Journal
    // ─────────────────────────────────────────────────────────────────────

    pub fn journal(&self, level: Level, code: &str, message: &str, context: Value) -> Result<bool> {
        let entry =
            JournalEntry::new(level, &self.plugin, &self.hook, code, message).with_context(context);
        self.journal.append(&entry)
    }

    /// Journals a FATAL entry; return the error from the hook to end with status 2.
    pub fn fatal(&self, code: &str, message: &str, context: Value) -> SessionError {
        self.journal
            .fatal(&self.plugin, &self.hook, code, message, context)
    }

    // ─────────────────────────────────────────────────────────────────────
    // Child processes
    // ─────────────────────────────────────────────────────────────────────

    /// Resolves a script path relative to the marketplace root.
    pub fn sibling_script(&self, relative: &str) -> Option<PathBuf> {
        let path = self.config.marketplace_root.as_ref()?.join(relative);
        path.exists().then_some(path)
    }

    /// A command whose process joins this session instead of starting a new one.
    pub fn child_command(&self, program: impl AsRef<std::ffi::OsStr>) -> Command {
        let mut command = Command::new(program);
        command
            .env(SESSION_PID_ENV, self.key.to_string())
            .env(SESSION_DIR_ENV, self.config.storage.root())
            .env(DEBUG_LEVEL_ENV, self.config.debug_level.as_str());
        if let Some(root) = &self.config.marketplace_root {
            command.env(MARKETPLACE_ROOT_ENV, root);
        }
        command
    }
}

/// Parses the host's JSON payload.
///
/// Missing, empty or unparseable input becomes an empty object.
pub fn parse_hook_input<R: Read>(mut reader: R, hook: &str) -> Value {
    let mut raw = String::new();
    match reader.read_to_string(&mut raw) {
        Ok(_) if raw.trim().is_empty() => {
            tracing::debug!(hook = %hook, "No hook input, using empty object");
            Value::Object(Map::new())
        }
        Ok(_) => serde_json::from_str(&raw).unwrap_or_else(|err| {
            tracing::warn!(
                hook = %hook,
                error = %err,
                "Unparseable hook input, using empty object"
            );
            Value::Object(Map::new())
        }),
        Err(err) => {
            tracing::warn!(
                hook = %hook,
                error = %err,
                "Failed to read hook input, using empty object"
            );
            Value::Object(Map::new())
        }
    }
}

/// Domain logic of one hook.
pub trait Hook {
    fn handle(&self, ctx: &mut HookContext) -> Result<HookResponse>;
}

impl<F> Hook for F
where
    F: Fn(&mut HookContext) -> Result<HookResponse>,
{
    fn handle(&self, ctx: &mut HookContext) -> Result<HookResponse> {
        self(ctx)
    }
}

/// Drives one invocation: init, read input, run the hook, respond, finish.
///
/// Returns what the process should print and its exit status.
pub fn run_hook<H, R>(mut ctx: HookContext, hook: &H, input: R) -> RenderedResponse
where
    H: Hook + ?Sized,
    R: Read,
{
    let outcome = ctx
        .init()
        .and_then(|()| ctx.read_input_from(input).map(|_| ()))
        .and_then(|()| hook.handle(&mut ctx))
        .and_then(|response| ctx.respond(response).cloned());

    let rendered = match outcome {
        Ok(rendered) => rendered,
        Err(err) => fail(&mut ctx, err),
    };
    ctx.finish(rendered.exit_code);
    rendered
}

fn fail(ctx: &mut HookContext, err: SessionError) -> RenderedResponse {
    if let SessionError::Fatal { message, .. } = &err {
        let rendered = RenderedResponse {
            stdout: None,
            stderr: Some(message.clone()),
            exit_code: EXIT_BLOCK,
        };
        return ctx.conclude(rendered).clone();
    }

    tracing::warn!(
        plugin = %ctx.plugin,
        hook = %ctx.hook,
        policy = ?ctx.policy,
        error = %err,
        "Hook failed"
    );
    if let Err(journal_err) = ctx.journal(Level::Error, err.code(), &err.to_string(), Value::Null) {
        tracing::error!(error = %journal_err, "Failed to journal hook failure");
    }

    let response = match ctx.policy {
        FailurePolicy::Open => HookResponse::allow(),
        FailurePolicy::Closed => HookResponse::block(err.to_string()),
    };
    let rendered = response.render(&ctx.event, ctx.config.dialect);
    ctx.conclude(rendered).clone()
}
