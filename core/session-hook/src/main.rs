//! session-hook: CLI that plugin hook scripts call for shared session state.
//!
//! Every hook of a session (same `CLAUDE_SESSION_PID`) reads and writes one
//! JSON document through this binary, so concurrent hooks never lose each
//! other's updates.
//!
//! ## Subcommands
//!
//! - `init`, `get`, `set`, `unset`, `get-nested`, `set-nested`: plugin data
//! - `has-shown`, `mark-shown`, `has-validated`, `mark-validated`: once-per-session flags
//! - `age`, `clear`, `dump`: whole-session operations
//! - `input`: dot-path lookup into the host's JSON on stdin
//! - `log`, `fatal`: error journal
//! - `respond`, `remind`: hook responses for the host
//! - `lock-holder`: holds the session lock until killed (diagnostics and tests)
//!
//! Lookups and predicates answer with 0 or 1. Failures exit 3, `fatal` exits 2.

mod hook;
mod lock_holder;
mod logging;
mod state;

use std::process::ExitCode;

use clap::{Args, Parser, Subcommand};
use session_core::{Decision, Dialect, FailurePolicy, HookConfig, Level, SessionError};

const EXIT_FATAL: i32 = 2;
const EXIT_FAILURE: i32 = 3;

#[derive(Parser)]
#[command(name = "session-hook")]
#[command(about = "Shared session state for marketplace plugin hooks")]
#[command(version)]
struct Cli {
    /// Block instead of proceeding unlocked when the session lock times out
    #[arg(long, global = true)]
    fail_closed: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args, Clone)]
pub(crate) struct Target {
    /// Plugin namespace to operate on
    #[arg(long)]
    pub plugin: String,

    /// Hook name (e.g. PreToolUse, or the script's own name)
    #[arg(long, default_value = "cli")]
    pub hook: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the session (if needed) and the plugin's namespace
    Init {
        #[command(flatten)]
        target: Target,
    },

    /// Print a value from the plugin's data
    Get {
        #[command(flatten)]
        target: Target,
        key: String,
        /// Print strings as JSON (quoted) instead of raw text
        #[arg(long)]
        json: bool,
    },

    /// Store a value in the plugin's data (parsed as JSON, else kept as a string)
    Set {
        #[command(flatten)]
        target: Target,
        key: String,
        value: String,
        /// Never parse VALUE as JSON
        #[arg(long)]
        string: bool,
    },

    /// Remove a value from the plugin's data
    Unset {
        #[command(flatten)]
        target: Target,
        key: String,
    },

    /// Print a value at a dot-separated path (a.b.c)
    GetNested {
        #[command(flatten)]
        target: Target,
        path: String,
        #[arg(long)]
        json: bool,
    },

    /// Store a value at a dot-separated path, creating intermediate objects
    SetNested {
        #[command(flatten)]
        target: Target,
        path: String,
        value: String,
        #[arg(long)]
        string: bool,
    },

    /// Exit 0 if the recommendation was already shown this session, 1 otherwise
    HasShown {
        #[command(flatten)]
        target: Target,
        key: String,
    },

    /// Mark a recommendation as shown
    MarkShown {
        #[command(flatten)]
        target: Target,
        key: String,
    },

    /// Exit 0 if CHECK already passed for SUBJECT this session, 1 otherwise
    HasValidated {
        #[command(flatten)]
        target: Target,
        check: String,
        subject: String,
    },

    /// Record that CHECK passed for SUBJECT
    MarkValidated {
        #[command(flatten)]
        target: Target,
        check: String,
        subject: String,
    },

    /// Print the session age in seconds
    Age,

    /// Delete the session file and its lock
    Clear,

    /// Print the whole session document
    Dump,

    /// Read host JSON from stdin and print the field at a dot-separated path
    Input {
        #[command(flatten)]
        target: Target,
        path: String,
        #[arg(long)]
        json: bool,
    },

    /// Append an entry to the session's error journal
    Log {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value = "warn")]
        level: Level,
        #[arg(long)]
        code: String,
        message: String,
        /// JSON object with extra context
        #[arg(long)]
        context: Option<String>,
    },

    /// Journal a fatal error and exit with status 2
    Fatal {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        code: String,
        message: String,
        #[arg(long)]
        context: Option<String>,
    },

    /// Emit a hook decision for the host
    Respond {
        #[command(flatten)]
        target: Target,
        #[arg(long, default_value = "allow")]
        decision: Decision,
        #[arg(long)]
        reason: Option<String>,
        /// Text injected back to the host model
        #[arg(long)]
        context: Option<String>,
        /// json or legacy (default: CLAUDE_HOOK_DIALECT)
        #[arg(long)]
        dialect: Option<Dialect>,
    },

    /// Inject MESSAGE the first time KEY is seen this session, stay silent afterwards
    Remind {
        #[command(flatten)]
        target: Target,
        #[arg(long)]
        key: String,
        message: String,
        #[arg(long)]
        dialect: Option<Dialect>,
    },

    /// Hold the session lock until killed or the hold time elapses
    #[command(hide = true)]
    LockHolder {
        #[arg(long, default_value_t = 60)]
        hold_secs: u64,

        /// Release early once this process exits
        #[arg(long)]
        watch_pid: Option<u32>,
    },
}

fn main() -> ExitCode {
    let _logging_guard = logging::init();
    let cli = Cli::parse();
    let config = HookConfig::from_env();
    let policy = if cli.fail_closed {
        FailurePolicy::Closed
    } else {
        FailurePolicy::Open
    };

    match run(cli.command, config, policy) {
        Ok(code) => exit_code(code),
        Err(err) => {
            tracing::error!(error = %err, "session-hook failed");
            match &err {
                SessionError::Fatal { message, .. } => eprintln!("{}", message),
                other => eprintln!("session-hook: {}", other),
            }
            exit_code(failure_status(&err))
        }
    }
}

fn run(
    command: Commands,
    config: HookConfig,
    policy: FailurePolicy,
) -> Result<i32, SessionError> {
    match command {
        Commands::Init { target } => state::init(&config, policy, &target),
        Commands::Get { target, key, json } => state::get(&config, policy, &target, &key, json),
        Commands::Set {
            target,
            key,
            value,
            string,
        } => state::set(&config, policy, &target, &key, &value, string),
        Commands::Unset { target, key } => state::unset(&config, policy, &target, &key),
        Commands::GetNested { target, path, json } => {
            state::get_nested(&config, policy, &target, &path, json)
        }
        Commands::SetNested {
            target,
            path,
            value,
            string,
        } => state::set_nested(&config, policy, &target, &path, &value, string),
        Commands::HasShown { target, key } => state::has_shown(&config, policy, &target, &key),
        Commands::MarkShown { target, key } => state::mark_shown(&config, policy, &target, &key),
        Commands::HasValidated {
            target,
            check,
            subject,
        } => state::has_validated(&config, policy, &target, &check, &subject),
        Commands::MarkValidated {
            target,
            check,
            subject,
        } => state::mark_validated(&config, policy, &target, &check, &subject),
        Commands::Age => state::age(&config, policy),
        Commands::Clear => state::clear(&config, policy),
        Commands::Dump => state::dump(&config, policy),
        Commands::Input { target, path, json } => hook::input(&target, &path, json),
        Commands::Log {
            target,
            level,
            code,
            message,
            context,
        } => hook::log(config, &target, level, &code, &message, context.as_deref()),
        Commands::Fatal {
            target,
            code,
            message,
            context,
        } => hook::fatal(config, &target, &code, &message, context.as_deref()),
        Commands::Respond {
            target,
            decision,
            reason,
            context,
            dialect,
        } => hook::respond(config, policy, &target, decision, reason, context, dialect),
        Commands::Remind {
            target,
            key,
            message,
            dialect,
        } => hook::remind(config, policy, &target, &key, &message, dialect),
        Commands::LockHolder {
            hold_secs,
            watch_pid,
        } => lock_holder::run(&config, hold_secs, watch_pid),
    }
}

/// Status for a failed subcommand. Kept apart from 0/1, which lookups and
/// predicates use as their answer, so a script can tell "no" from "broken".
fn failure_status(err: &SessionError) -> i32 {
    match err {
        SessionError::Fatal { .. } => EXIT_FATAL,
        _ => EXIT_FAILURE,
    }
}

fn exit_code(code: i32) -> ExitCode {
    ExitCode::from(u8::try_from(code).unwrap_or(1))
}
