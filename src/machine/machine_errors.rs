use crate::trace_base;

use std::io::{self, Write};
use std::sync::atomic::{AtomicU8, Ordering};

use thiserror::Error;

/// Problems found while reading an option string.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("unknown option `{0}`")]
    UnknownOption(String),
    #[error("option `{0}` requires a value")]
    MissingValue(String),
    #[error("option `{option}` expects a number, got `{value}`")]
    BadNumber { option: String, value: String },
    #[error("unknown debug flag `{0}`")]
    UnknownDebugFlag(String),
}

/// Recoverable failures of the stack walker and the live variable lookup.
/// The messages are the ones a debugger shows to its user.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum IntrospectionError {
    #[error("reached unknown label")]
    UnknownLabel,
    #[error("reached label with no stack layout info")]
    NoStackLayout,
    #[error("reached procedure with no stack trace info")]
    NoStackTraceInfo,
    #[error("can only handle stackvars")]
    NotStackvar,
    #[error("not that many ancestors")]
    NotThatManyAncestors,
    #[error("no such stack frame")]
    NoSuchFrame,
    #[error("this procedure does not have debugging information")]
    NoDebugInfo,
    #[error("there is no information about live variables")]
    NoVarInfo,
    #[error("there are no names for the live variables")]
    NoVarNames,
    #[error("could not write to the output")]
    Output(#[from] std::fmt::Error),
}

/// What `fatal_error` does once the message is out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FatalPolicy {
    /// Exit the process with status 1.
    Abort,
    /// Panic with the message, so an embedding host (or a test) can observe it.
    Panic,
}

static FATAL_POLICY: AtomicU8 = AtomicU8::new(FatalPolicy::Panic as u8);

pub fn set_fatal_policy(policy: FatalPolicy) {
    FATAL_POLICY.store(policy as u8, Ordering::Relaxed);
}

pub fn fatal_policy() -> FatalPolicy {
    if FATAL_POLICY.load(Ordering::Relaxed) == FatalPolicy::Abort as u8 {
        FatalPolicy::Abort
    } else {
        FatalPolicy::Panic
    }
}

pub const FATAL_PREFIX: &str = "Mercury runtime: fatal error: ";

/// The single exit point for unrecoverable conditions. Never returns.
#[cold]
pub fn fatal_error(message: &str) -> ! {
    let _ = io::stdout().flush();

    log::error!("{}{}", FATAL_PREFIX, message);

    {
        let mut stderr = io::stderr().lock();
        let _ = writeln!(stderr, "*** {}{}", FATAL_PREFIX, message);

        if trace_base::trace_enabled() {
            let _ = writeln!(
                stderr,
                "*** last trace event was event #{}",
                trace_base::event_number()
            );
        }

        let _ = stderr.flush();
    }

    match fatal_policy() {
        FatalPolicy::Abort => std::process::exit(1),
        FatalPolicy::Panic => panic!("{}{}", FATAL_PREFIX, message),
    }
}
