//! The trail: a log of destructive updates and callbacks that backtracking,
//! commits and exceptions replay.
//!
//! Each entry is two words in the trail zone. A value entry holds the
//! updated address (primary tag 0) and the value it held before. A function
//! entry holds the index of a registered callback (primary tag 1) and the
//! callback's datum.

use crate::machine::config::EngineConfig;
use crate::machine::memory_zone::*;
use crate::machine::Engine;
use crate::types::*;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum UntrailReason {
    /// Ordinary backtracking. Values are restored and callbacks invoked.
    Undo,
    /// A pruning commit. Only callbacks are invoked.
    Commit,
    /// A non-pruning commit. Only callbacks are invoked.
    Solve,
    /// Like `Undo`, on the way to an exception handler.
    Exception,
    /// Like `Undo`, for a debugger retry.
    Retry,
    Gc,
}

impl UntrailReason {
    #[inline]
    pub fn restores_values(self) -> bool {
        matches!(
            self,
            UntrailReason::Undo | UntrailReason::Exception | UntrailReason::Retry
        )
    }
}

pub type UntrailFn = fn(&mut Engine, Word, UntrailReason);

const VALUE_ENTRY: u8 = 0;
const FUNCTION_ENTRY: u8 = 1;
const ENTRY_WORDS: u64 = 2;

/// A saved trail pointer.
pub type Ticket = Addr;

pub struct Trail {
    zone: MemoryZone,
    trail_ptr: Addr,
    ticket_counter: u64,
    ticket_high_water: u64,
    functions: Vec<UntrailFn>,
}

impl Trail {
    pub(crate) fn create(id: usize, config: &EngineConfig) -> Self {
        let redzone = if config.check_overflow {
            config.trail.redzone_bytes()
        } else {
            0
        };

        let zone = MemoryZone::create(
            "trail",
            id,
            config.trail.size_bytes(),
            0,
            redzone,
            default_handler,
        );

        let trail_ptr = zone.min();

        Trail {
            zone,
            trail_ptr,
            ticket_counter: 0,
            ticket_high_water: 0,
            functions: vec![],
        }
    }

    pub(crate) fn reset(&mut self) {
        self.trail_ptr = self.zone.min();
        self.ticket_counter = 0;
        self.ticket_high_water = 0;
        self.functions.clear();
        self.zone.reset_redzone();
    }

    pub fn zone(&self) -> &MemoryZone {
        &self.zone
    }

    pub(crate) fn zone_mut(&mut self) -> &mut MemoryZone {
        &mut self.zone
    }

    #[inline]
    pub fn trail_ptr(&self) -> Addr {
        self.trail_ptr
    }

    /// Number of entries currently on the trail.
    pub fn len(&self) -> usize {
        ((self.trail_ptr - self.zone.min()) / (ENTRY_WORDS * WORD_SIZE)) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.trail_ptr == self.zone.min()
    }

    fn push_entry(&mut self, first: Word, second: Word) {
        let ptr = self.trail_ptr;

        self.zone.write(ptr, first);
        self.zone.write(ptr + WORD_SIZE, second);
        self.trail_ptr = ptr + ENTRY_WORDS * WORD_SIZE;
    }
}

impl Engine {
    pub fn trail(&self) -> Option<&Trail> {
        self.context.trail.as_ref()
    }

    /// Records that `addr` held `old_value`, so that backtracking past this
    /// point restores it.
    pub fn trail_value(&mut self, addr: Addr, old_value: Word) {
        if let Some(trail) = self.context.trail.as_mut() {
            trail.push_entry(mkword(VALUE_ENTRY, addr), old_value);
        }
    }

    pub fn trail_current_value(&mut self, addr: Addr) {
        if self.context.trail.is_some() {
            let old_value = self.read(addr);
            self.trail_value(addr, old_value);
        }
    }

    /// Stores `value` at `addr`, trailing the value it replaces.
    pub fn trailed_write(&mut self, addr: Addr, value: Word) {
        self.trail_current_value(addr);
        self.write(addr, value);
    }

    pub fn trail_function(&mut self, untrail: UntrailFn, datum: Word) {
        if let Some(trail) = self.context.trail.as_mut() {
            let index = trail.functions.len() as u64;

            trail.functions.push(untrail);
            trail.push_entry(mkword(FUNCTION_ENTRY, mkbody(index)), datum);
        }
    }

    /// Called whenever a choice point is created.
    pub fn store_ticket(&mut self) -> Ticket {
        match self.context.trail.as_mut() {
            Some(trail) => {
                trail.ticket_high_water += 1;
                trail.ticket_counter = trail.ticket_high_water;
                trail.trail_ptr
            }
            None => 0,
        }
    }

    /// Replays the trail back to `ticket`. Restoring reasons also discard
    /// the replayed entries.
    pub fn reset_ticket(&mut self, ticket: Ticket, reason: UntrailReason) {
        let (mut ptr, bottom) = match self.context.trail.as_ref() {
            Some(trail) if trail.trail_ptr != ticket => (trail.trail_ptr, trail.zone.min()),
            _ => return,
        };

        if ticket < bottom || ticket > ptr {
            self.fatal(&format!("trail ticket {:#x} out of range", ticket));
        }

        while ptr > ticket {
            ptr -= ENTRY_WORDS * WORD_SIZE;

            let (first, second, function) = match self.context.trail.as_ref() {
                Some(trail) => {
                    let first = trail.zone.read(ptr);
                    let second = trail.zone.read(ptr + WORD_SIZE);

                    let function = if tag(first) == FUNCTION_ENTRY {
                        trail.functions.get(unmkbody(first) as usize).copied()
                    } else {
                        None
                    };

                    (first, second, function)
                }
                None => return,
            };

            match tag(first) {
                VALUE_ENTRY => {
                    if reason.restores_values() {
                        self.write(strip_tag(first), second);
                    }
                }
                _ => match function {
                    Some(untrail) => untrail(self, second, reason),
                    None => self.fatal("trail function entry without a callback"),
                },
            }
        }

        if reason.restores_values() {
            if let Some(trail) = self.context.trail.as_mut() {
                let remaining_functions = (ticket..trail.trail_ptr)
                    .step_by((ENTRY_WORDS * WORD_SIZE) as usize)
                    .filter(|addr| tag(trail.zone.read(*addr)) == FUNCTION_ENTRY)
                    .count();

                let keep = trail.functions.len() - remaining_functions;

                trail.functions.truncate(keep);
                trail.trail_ptr = ticket;
            }
        }
    }

    pub fn discard_ticket(&mut self) {
        if let Some(trail) = self.context.trail.as_mut() {
            trail.ticket_counter = trail.ticket_counter.saturating_sub(1);
            trail.ticket_high_water = trail.ticket_counter;
        }
    }

    pub fn prune_ticket(&mut self) {
        if let Some(trail) = self.context.trail.as_mut() {
            trail.ticket_counter = trail.ticket_counter.saturating_sub(1);
        }
    }

    pub fn mark_ticket_stack(&self) -> u64 {
        self.context
            .trail
            .as_ref()
            .map(|trail| trail.ticket_counter)
            .unwrap_or(0)
    }

    pub fn prune_tickets_to(&mut self, saved_counter: u64) {
        if let Some(trail) = self.context.trail.as_mut() {
            trail.ticket_counter = saved_counter;
        }
    }

    pub fn discard_tickets_to(&mut self, saved_counter: u64) {
        if let Some(trail) = self.context.trail.as_mut() {
            trail.ticket_counter = saved_counter;
            trail.ticket_high_water = saved_counter;
        }
    }

    /// Identifies the innermost choice point for callbacks that need to know
    /// whether they were registered under it.
    pub fn current_choicepoint_id(&self) -> u64 {
        self.mark_ticket_stack()
    }
}
