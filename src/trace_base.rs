//! Process-wide debugging switches and execution-trace counters.
//!
//! These are global for the lifetime of the process. The counters only move
//! forward while tracing is on and are reset by [`trace_start`].

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DebugFlag {
    Prog = 0,
    Goto,
    Call,
    Heap,
    Detstack,
    Nondstack,
    Final,
    Mem,
    Sreg,
    Trace,
    Table,
    Agc,
}

pub const MAXFLAG: usize = 12;

const_assert!(MAXFLAG <= 32);

impl DebugFlag {
    pub const ALL: [DebugFlag; MAXFLAG] = [
        DebugFlag::Prog,
        DebugFlag::Goto,
        DebugFlag::Call,
        DebugFlag::Heap,
        DebugFlag::Detstack,
        DebugFlag::Nondstack,
        DebugFlag::Final,
        DebugFlag::Mem,
        DebugFlag::Sreg,
        DebugFlag::Trace,
        DebugFlag::Table,
        DebugFlag::Agc,
    ];

    pub fn name(self) -> &'static str {
        match self {
            DebugFlag::Prog => "prog",
            DebugFlag::Goto => "goto",
            DebugFlag::Call => "call",
            DebugFlag::Heap => "heap",
            DebugFlag::Detstack => "detstack",
            DebugFlag::Nondstack => "nondstack",
            DebugFlag::Final => "final",
            DebugFlag::Mem => "mem",
            DebugFlag::Sreg => "sreg",
            DebugFlag::Trace => "trace",
            DebugFlag::Table => "table",
            DebugFlag::Agc => "agc",
        }
    }

    pub fn from_name(name: &str) -> Option<DebugFlag> {
        DebugFlag::ALL.iter().copied().find(|flag| flag.name() == name)
    }
}

static DEBUG_FLAGS: AtomicU32 = AtomicU32::new(0);

#[inline]
pub fn debug_flag(flag: DebugFlag) -> bool {
    DEBUG_FLAGS.load(Ordering::Relaxed) & (1 << flag as u32) != 0
}

pub fn set_debug_flag(flag: DebugFlag, on: bool) {
    if on {
        DEBUG_FLAGS.fetch_or(1 << flag as u32, Ordering::Relaxed);
    } else {
        DEBUG_FLAGS.fetch_and(!(1 << flag as u32), Ordering::Relaxed);
    }
}

pub fn clear_debug_flags() {
    DEBUG_FLAGS.store(0, Ordering::Relaxed);
}

/// The ports at which an execution-trace event can occur.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TracePort {
    Call = 0,
    Exit,
    Redo,
    Fail,
    Exception,
    IteCond,
    IteThen,
    IteElse,
    NegEnter,
    NegSuccess,
    NegFailure,
    Disj,
    Switch,
    NondetPragmaFirst,
    NondetPragmaLater,
    None,
}

impl TracePort {
    pub fn name(self) -> &'static str {
        match self {
            TracePort::Call => "CALL",
            TracePort::Exit => "EXIT",
            TracePort::Redo => "REDO",
            TracePort::Fail => "FAIL",
            TracePort::Exception => "EXCP",
            TracePort::IteCond => "COND",
            TracePort::IteThen => "THEN",
            TracePort::IteElse => "ELSE",
            TracePort::NegEnter => "NEGE",
            TracePort::NegSuccess => "NEGS",
            TracePort::NegFailure => "NEGF",
            TracePort::Disj => "DISJ",
            TracePort::Switch => "SWTC",
            TracePort::NondetPragmaFirst => "FRST",
            TracePort::NondetPragmaLater => "LATR",
            TracePort::None => "NONE",
        }
    }

    /// Interface ports are the ones a procedure's caller can observe.
    pub fn is_interface(self) -> bool {
        matches!(
            self,
            TracePort::Call
                | TracePort::Exit
                | TracePort::Redo
                | TracePort::Fail
                | TracePort::Exception
        )
    }
}

impl fmt::Display for TracePort {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

static TRACE_ENABLED: AtomicBool = AtomicBool::new(false);
static CALL_SEQNO: AtomicU64 = AtomicU64::new(0);
static CALL_DEPTH: AtomicU64 = AtomicU64::new(0);
static EVENT_NUMBER: AtomicU64 = AtomicU64::new(0);

pub fn trace_start(enabled: bool) {
    CALL_SEQNO.store(0, Ordering::Relaxed);
    CALL_DEPTH.store(0, Ordering::Relaxed);
    EVENT_NUMBER.store(0, Ordering::Relaxed);
    TRACE_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn trace_end() {
    TRACE_ENABLED.store(false, Ordering::Relaxed);
}

#[inline]
pub fn trace_enabled() -> bool {
    TRACE_ENABLED.load(Ordering::Relaxed)
}

#[inline]
pub fn event_number() -> u64 {
    EVENT_NUMBER.load(Ordering::Relaxed)
}

#[inline]
pub fn call_seqno() -> u64 {
    CALL_SEQNO.load(Ordering::Relaxed)
}

#[inline]
pub fn call_depth() -> u64 {
    CALL_DEPTH.load(Ordering::Relaxed)
}

/// Counts one more trace event and returns its number.
pub fn next_event() -> u64 {
    EVENT_NUMBER.fetch_add(1, Ordering::Relaxed) + 1
}

/// Assigns a call sequence number and depth to a new procedure activation.
pub fn enter_call() -> (u64, u64) {
    let seqno = CALL_SEQNO.fetch_add(1, Ordering::Relaxed) + 1;
    let depth = CALL_DEPTH.fetch_add(1, Ordering::Relaxed) + 1;
    (seqno, depth)
}

/// Restores the depth after an activation exits, fails or is unwound; the
/// argument is the depth the activation was given on entry.
pub fn leave_call(depth: u64) {
    CALL_DEPTH.store(depth.saturating_sub(1), Ordering::Relaxed);
}

/// Counts an event at `port` when tracing is on, returning its number.
pub fn trace_event(port: TracePort) -> Option<u64> {
    if !trace_enabled() {
        return None;
    }

    let event = next_event();

    if debug_flag(DebugFlag::Trace) {
        log::trace!(
            "event {}: {} (call {}, depth {})",
            event,
            port,
            call_seqno(),
            call_depth()
        );
    }

    Some(event)
}
