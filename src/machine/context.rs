//! Contexts: the stacks of one logical thread of execution.
//!
//! An engine runs one context at a time. Switching contexts saves the stack
//! registers into the outgoing context and loads those of the incoming one;
//! the heaps stay with the engine.

use crate::machine::config::EngineConfig;
use crate::machine::labels::*;
use crate::machine::memory_zone::*;
use crate::machine::registers::SavedRegisters;
use crate::machine::stack::*;
use crate::machine::trail::Trail;
use crate::machine::{create_zone, Engine};
use crate::types::*;

use std::sync::atomic::{AtomicUsize, Ordering};

static NEXT_CONTEXT_ID: AtomicUsize = AtomicUsize::new(0);

pub struct Context {
    id: usize,
    pub(crate) detstack: MemoryZone,
    pub(crate) nondetstack: MemoryZone,
    pub(crate) trail: Option<Trail>,
    saved_regs: Option<SavedRegisters>,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("id", &self.id)
            .field("detstack", &self.detstack)
            .field("nondetstack", &self.nondetstack)
            .field("trail", &self.trail.is_some())
            .finish()
    }
}

impl Context {
    pub(crate) fn create(engine_id: usize, config: &EngineConfig) -> Self {
        let id = NEXT_CONTEXT_ID.fetch_add(1, Ordering::Relaxed);
        let check = config.check_overflow;

        let detstack = create_zone("detstack", engine_id, &config.detstack, check);
        let nondetstack = create_zone("nondetstack", engine_id, &config.nondetstack, check);

        let trail = if config.use_trail {
            Some(Trail::create(engine_id, config))
        } else {
            None
        };

        Context {
            id,
            detstack,
            nondetstack,
            trail,
            saved_regs: None,
        }
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn detstack(&self) -> &MemoryZone {
        &self.detstack
    }

    pub fn nondetstack(&self) -> &MemoryZone {
        &self.nondetstack
    }

    /// The stack registers saved when the context was last switched out.
    pub fn saved_regs(&self) -> Option<&SavedRegisters> {
        self.saved_regs.as_ref()
    }
}

impl Engine {
    pub fn context(&self) -> &Context {
        &self.context
    }

    /// A fresh context with this engine's zone sizes. It must be
    /// initialized once it has been switched in.
    pub fn create_context(&self) -> Context {
        Context::create(self.id(), &self.config)
    }

    /// Empties the current context's stacks: `sp` at the bottom of the det
    /// stack, a single bottom frame on the nondet stack whose continuation
    /// and redo point are both `DO_NOT_REACHED`.
    pub fn init_context(&mut self) {
        self.context.detstack.reset_redzone();
        self.context.nondetstack.reset_redzone();

        if let Some(trail) = self.context.trail.as_mut() {
            trail.reset();
        }

        self.regs.sp = self.context.detstack.min();
        self.regs.succip = DO_NOT_REACHED;

        let bottom = self.context.nondetstack.min() + (NONDET_FIXED_SIZE - 1) * WORD_SIZE;

        self.regs.maxfr = bottom;
        self.regs.curfr = bottom;

        self.set_prevfr(bottom, 0);
        self.set_redoip(bottom, DO_NOT_REACHED);
        self.set_redofr(bottom, bottom);
        self.set_succip_slot(bottom, DO_NOT_REACHED);
        self.set_succfr(bottom, 0);

        self.context.saved_regs = None;

        memdebug!(
            "engine {}: initialized context {} (sp {:#x}, bottom frame {:#x})",
            self.id(),
            self.context.id,
            self.regs.sp,
            bottom
        );
    }

    /// Saves the stack registers into the current context.
    pub fn save_context(&mut self) {
        self.context.saved_regs = Some(self.regs.save(0));
    }

    /// Reloads the stack registers saved by the last `save_context`.
    pub fn load_context(&mut self) {
        if let Some(saved) = self.context.saved_regs.as_ref() {
            self.regs.succip = saved.succip;
            self.regs.sp = saved.sp;
            self.regs.curfr = saved.curfr;
            self.regs.maxfr = saved.maxfr;
        }
    }

    /// Suspends the current context and resumes `next`, returning the
    /// suspended one.
    pub fn switch_context(&mut self, next: Context) -> Context {
        self.save_context();

        let previous = std::mem::replace(&mut self.context, next);

        if self.context.saved_regs.is_some() {
            self.load_context();
        } else {
            self.init_context();
        }

        calldebug!(
            "engine {}: switched from context {} to context {}",
            self.id(),
            previous.id,
            self.context.id
        );

        previous
    }
}
