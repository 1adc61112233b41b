//! Exception handlers and `throw`.
//!
//! A handler is an ordinary nondet frame whose redo point is
//! `EXCEPTION_HANDLER_DO_FAIL`, so failing into it just discards it. Its
//! variables record what `throw` needs to restore:
//!
//! ```text
//!   framevar(1)  handler kind
//!   framevar(2)  handler closure (catch handlers only)
//!   framevar(3)  sp when the handler was installed
//!   framevar(4)  hp when the handler was installed
//!   framevar(5)  trail ticket
//!   framevar(6)  dispatch loop depth of the installer
//! ```

use crate::label;
use crate::machine::labels::*;
use crate::machine::trail::UntrailReason;
use crate::machine::{ControlState, Engine, HeapKind, Unwind};
use crate::type_info::TypeInfo;
use crate::type_tables::builtin;
use crate::types::*;

const HANDLER_FRAME_SLOTS: u64 = 6;

const KIND_SLOT: u64 = 1;
const CLOSURE_SLOT: u64 = 2;
const SP_SLOT: u64 = 3;
const HP_SLOT: u64 = 4;
const TICKET_SLOT: u64 = 5;
const DEPTH_SLOT: u64 = 6;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u64)]
pub enum HandlerKind {
    /// Installed by `call_engine`, which returns the exception.
    CallEngine = 0,
    /// Installed by `builtin_catch`, which calls the handler closure.
    Catch = 1,
}

impl HandlerKind {
    fn from_word(word: Word) -> Option<Self> {
        match word {
            0 => Some(HandlerKind::CallEngine),
            1 => Some(HandlerKind::Catch),
            _ => None,
        }
    }
}

impl Engine {
    /// Pushes a handler frame and returns its address.
    pub(crate) fn push_handler_frame(&mut self, kind: HandlerKind, handler: Word) -> Addr {
        let sp = self.regs.sp;
        let hp = self.regs.hp;
        let ticket = self.store_ticket();
        let depth = self.nesting_depth() as Word;

        let fr = self.mkframe(HANDLER_FRAME_SLOTS, EXCEPTION_HANDLER_DO_FAIL);

        self.set_based_framevar(fr, KIND_SLOT, kind as Word);
        self.set_based_framevar(fr, CLOSURE_SLOT, handler);
        self.set_based_framevar(fr, SP_SLOT, sp);
        self.set_based_framevar(fr, HP_SLOT, hp);
        self.set_based_framevar(fr, TICKET_SLOT, ticket);
        self.set_based_framevar(fr, DEPTH_SLOT, depth);

        calldebug!("engine {}: {:?} handler at {:#x}", self.id(), kind, fr);

        fr
    }

    /// Removes a handler frame whose protected goal finished normally,
    /// along with any choice points the goal left above it.
    pub(crate) fn pop_handler_frame(&mut self, fr: Addr) {
        if self.regs.maxfr < fr {
            return;
        }

        self.regs.maxfr = self.prevfr(fr);
        self.regs.curfr = self.succfr(fr);
        self.prune_ticket();
    }

    fn handler_kind(&self, fr: Addr) -> HandlerKind {
        let word = self.based_framevar(fr, KIND_SLOT);

        match HandlerKind::from_word(word) {
            Some(kind) => kind,
            None => self.fatal(&format!("corrupt exception handler frame at {:#x}", fr)),
        }
    }

    /// The innermost live handler frame, if any.
    pub fn find_handler(&self) -> Option<Addr> {
        let mut fr = self.regs.maxfr;

        while fr != 0 && self.prevfr(fr) != 0 {
            if self.redoip(fr) == EXCEPTION_HANDLER_DO_FAIL {
                return Some(fr);
            }

            fr = self.prevfr(fr);
        }

        None
    }

    /// Throws `value`, of type `type_info`, wrapped in a univ.
    pub fn throw_value(&mut self, value: Word, type_info: &TypeInfo) -> CodeAddr {
        let univ = self.make_univ(type_info, value);
        self.throw(univ)
    }

    /// Throws the univ `exception` to the innermost handler. The returned
    /// address must be returned by the calling body.
    pub fn throw(&mut self, exception: Word) -> CodeAddr {
        let Some(fr) = self.find_handler() else {
            let type_info = self.univ_type_info(exception);
            self.fatal(&format!("uncaught Mercury exception of type {}", type_info))
        };

        let kind = self.handler_kind(fr);
        let saved_hp = self.based_framevar(fr, HP_SLOT);
        let depth = self.based_framevar(fr, DEPTH_SLOT) as usize;

        calldebug!(
            "engine {}: throw to {:?} handler at {:#x} (level {})",
            self.id(),
            kind,
            fr,
            depth
        );

        let exception = self.salvage_exception(exception, saved_hp);

        self.regs.sp = self.based_framevar(fr, SP_SLOT);
        self.regs.maxfr = self.prevfr(fr);
        self.regs.curfr = self.succfr(fr);

        let ticket = self.based_framevar(fr, TICKET_SLOT);
        self.reset_ticket(ticket, UntrailReason::Exception);
        self.discard_ticket();

        self.context.detstack.reset_redzone();
        self.context.nondetstack.reset_redzone();

        match kind {
            HandlerKind::CallEngine => {
                self.caught_exception = Some(exception);
                self.unwind = Some(Unwind {
                    depth,
                    resume: None,
                    regs: self.regs.save(0),
                });

                ENGINE_DONE
            }
            HandlerKind::Catch => {
                self.regs.succip = self.succip_slot(fr);
                self.regs[1] = self.based_framevar(fr, CLOSURE_SLOT);
                self.regs[2] = 1;
                self.regs[3] = 1;
                self.regs[4] = exception;

                self.unwind = Some(Unwind {
                    depth,
                    resume: Some(DO_CALL_CLOSURE),
                    regs: self.regs.save(4),
                });

                DO_CALL_CLOSURE
            }
        }
    }

    /// Moves the exception out of the part of the heap the handler is about
    /// to reclaim, by way of the solutions heap.
    fn salvage_exception(&mut self, exception: Word, saved_hp: Addr) -> Word {
        let univ = builtin::univ_type();
        let hp = self.regs.hp;
        let sol_mark = self.regs.sol_hp;

        let parked = self.copy_value(HeapKind::SolutionsHeap, exception, &univ, saved_hp, hp);

        self.regs.hp = saved_hp;

        let sol_hp = self.regs.sol_hp;
        let exception = self.copy_value(HeapKind::Heap, parked, &univ, sol_mark, sol_hp);

        self.regs.sol_hp = sol_mark;
        exception
    }

    /// `EXCEPTION_HANDLER_DO_FAIL`: the protected goal failed.
    pub(crate) fn exception_handler_do_fail(&mut self) -> CodeAddr {
        let fr = self.regs.maxfr;
        let kind = self.handler_kind(fr);
        let ticket = self.based_framevar(fr, TICKET_SLOT);

        self.reset_ticket(ticket, UntrailReason::Undo);
        self.discard_ticket();

        self.regs.maxfr = self.prevfr(fr);

        match kind {
            HandlerKind::CallEngine => {
                self.regs.curfr = self.succfr(fr);
                self.control = ControlState::Failed;

                ENGINE_DONE
            }
            HandlerKind::Catch => self.fail(),
        }
    }

    /// `BUILTIN_CATCH`: calls the goal closure in r1 for a single result,
    /// calling the handler closure in r2 on the exception instead if the
    /// goal throws one.
    pub(crate) fn builtin_catch(&mut self) -> CodeAddr {
        let goal = self.regs[1];
        let handler = self.regs[2];

        self.push_handler_frame(HandlerKind::Catch, handler);

        self.regs[1] = goal;
        self.regs[2] = 0;
        self.regs[3] = 1;
        self.regs.succip = CATCH_EXIT;

        calldebug!(
            "engine {}: catch calling {}",
            self.id(),
            label::label_name(self.closure_code(goal))
        );

        DO_CALL_CLOSURE
    }

    /// `CATCH_EXIT`: the goal succeeded, with the current frame being the
    /// handler frame.
    pub(crate) fn catch_exit(&mut self) -> CodeAddr {
        self.prune_ticket();
        self.succeed_discard()
    }
}
