//! The det stack and the nondet stack.
//!
//! Det stack frames have no header: a procedure bumps `sp` by its frame
//! size and addresses its slots as `stackvar(n)`, counting down from `sp`.
//!
//! Nondet stack frames grow upwards and `curfr`/`maxfr` point at the
//! highest word of a frame, its `prevfr` slot. The fixed slots and the
//! frame's variables sit below that:
//!
//! ```text
//!   fr     prevfr
//!   fr-1   redoip
//!   fr-2   redofr
//!   fr-3   succip   (detfr in det temp frames)
//!   fr-4   succfr
//!   fr-5   framevar(1)
//!   ...
//! ```
//!
//! Temp frames carry only the first three (nondet temp) or four (det temp)
//! slots. Nothing in a frame records its kind, which is recovered from the
//! distance to the previous frame.

use crate::label;
use crate::machine::labels::*;
use crate::machine::{ControlState, Engine};
use crate::types::*;

pub const PREVFR: u64 = 0;
pub const REDOIP: u64 = 1;
pub const REDOFR: u64 = 2;
pub const SUCCIP: u64 = 3;
pub const SUCCFR: u64 = 4;
pub const DETFR: u64 = 3;

pub const NONDET_FIXED_SIZE: u64 = 5;
pub const NONDET_TEMP_SIZE: u64 = 3;
pub const DET_TEMP_SIZE: u64 = 4;

const_assert!(NONDET_TEMP_SIZE < DET_TEMP_SIZE);
const_assert!(DET_TEMP_SIZE < NONDET_FIXED_SIZE);
const_assert!(DETFR < DET_TEMP_SIZE);

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum FrameKind {
    /// The frame every context starts with.
    Bottom,
    Ordinary,
    NondetTemp,
    DetTemp,
}

#[inline(always)]
fn slot(fr: Addr, offset: u64) -> Addr {
    fr.wrapping_sub(offset * WORD_SIZE)
}

impl Engine {
    #[inline]
    pub fn prevfr(&self, fr: Addr) -> Addr {
        self.read(slot(fr, PREVFR))
    }

    #[inline]
    pub fn redoip(&self, fr: Addr) -> CodeAddr {
        CodeAddr::from_word(self.read(slot(fr, REDOIP)))
    }

    #[inline]
    pub fn redofr(&self, fr: Addr) -> Addr {
        self.read(slot(fr, REDOFR))
    }

    #[inline]
    pub fn succip_slot(&self, fr: Addr) -> CodeAddr {
        CodeAddr::from_word(self.read(slot(fr, SUCCIP)))
    }

    #[inline]
    pub fn succfr(&self, fr: Addr) -> Addr {
        self.read(slot(fr, SUCCFR))
    }

    /// The det stack pointer saved in a det temp frame.
    #[inline]
    pub fn detfr(&self, fr: Addr) -> Addr {
        self.read(slot(fr, DETFR))
    }

    #[inline]
    pub fn set_prevfr(&mut self, fr: Addr, prevfr: Addr) {
        self.write(slot(fr, PREVFR), prevfr);
    }

    #[inline]
    pub fn set_redoip(&mut self, fr: Addr, redoip: CodeAddr) {
        self.write(slot(fr, REDOIP), redoip.as_word());
    }

    #[inline]
    pub fn set_redofr(&mut self, fr: Addr, redofr: Addr) {
        self.write(slot(fr, REDOFR), redofr);
    }

    #[inline]
    pub fn set_succip_slot(&mut self, fr: Addr, succip: CodeAddr) {
        self.write(slot(fr, SUCCIP), succip.as_word());
    }

    #[inline]
    pub fn set_succfr(&mut self, fr: Addr, succfr: Addr) {
        self.write(slot(fr, SUCCFR), succfr);
    }

    #[inline]
    pub fn set_detfr(&mut self, fr: Addr, detfr: Addr) {
        self.write(slot(fr, DETFR), detfr);
    }

    /// Variable `n` (from 1) of the frame at `fr`.
    #[inline]
    pub fn based_framevar(&self, fr: Addr, n: u64) -> Word {
        self.read(slot(fr, SUCCFR + n))
    }

    #[inline]
    pub fn set_based_framevar(&mut self, fr: Addr, n: u64, value: Word) {
        self.write(slot(fr, SUCCFR + n), value);
    }

    /// Variable `n` of the current frame.
    #[inline]
    pub fn framevar(&self, n: u64) -> Word {
        self.based_framevar(self.regs.curfr, n)
    }

    #[inline]
    pub fn set_framevar(&mut self, n: u64, value: Word) {
        let curfr = self.regs.curfr;
        self.set_based_framevar(curfr, n, value);
    }

    /// Slot `n` (from 1) of the det stack frame whose top is `sp`.
    #[inline]
    pub fn based_stackvar(&self, sp: Addr, n: u64) -> Word {
        self.read(sp.wrapping_sub(n * WORD_SIZE))
    }

    #[inline]
    pub fn set_based_stackvar(&mut self, sp: Addr, n: u64, value: Word) {
        self.write(sp.wrapping_sub(n * WORD_SIZE), value);
    }

    #[inline]
    pub fn stackvar(&self, n: u64) -> Word {
        self.based_stackvar(self.regs.sp, n)
    }

    #[inline]
    pub fn set_stackvar(&mut self, n: u64, value: Word) {
        let sp = self.regs.sp;
        self.set_based_stackvar(sp, n, value);
    }

    /// Pushes a det stack frame of `n` slots.
    pub fn incr_sp(&mut self, n: u64) {
        let new_sp = self.regs.sp + n * WORD_SIZE;

        if new_sp >= self.context.detstack.top() {
            self.fatal("det stack overflow");
        }

        self.regs.sp = new_sp;

        if crate::trace_base::debug_flag(crate::trace_base::DebugFlag::Detstack) {
            log::trace!("engine {}: incr_sp({}) -> {:#x}", self.id(), n, new_sp);
        }
    }

    pub fn decr_sp(&mut self, n: u64) {
        let new_sp = self.regs.sp.wrapping_sub(n * WORD_SIZE);

        if new_sp < self.context.detstack.min() || new_sp > self.regs.sp {
            self.fatal("det stack underflow");
        }

        self.regs.sp = new_sp;

        if crate::trace_base::debug_flag(crate::trace_base::DebugFlag::Detstack) {
            log::trace!("engine {}: decr_sp({}) -> {:#x}", self.id(), n, new_sp);
        }
    }

    /// Pushes a frame of `n` slots and saves `succip` in its first slot.
    pub fn incr_sp_push_succip(&mut self, n: u64) {
        self.incr_sp(n);

        let succip = self.regs.succip;
        self.set_stackvar(1, succip.as_word());
    }

    pub fn decr_sp_pop_succip(&mut self, n: u64) {
        self.regs.succip = CodeAddr::from_word(self.stackvar(1));
        self.decr_sp(n);
    }

    fn push_nondet_frame(&mut self, size: u64) -> Addr {
        let prevfr = self.regs.maxfr;
        let fr = prevfr + size * WORD_SIZE;

        if fr >= self.context.nondetstack.top() {
            self.fatal("nondet stack overflow");
        }

        self.regs.maxfr = fr;
        self.set_prevfr(fr, prevfr);

        fr
    }

    /// Pushes an ordinary nondet frame with `num_slots` variables and makes
    /// it the current frame. Its continuation is the current `succip` and
    /// `curfr`.
    pub fn mkframe(&mut self, num_slots: u64, redoip: CodeAddr) -> Addr {
        let succfr = self.regs.curfr;
        let fr = self.push_nondet_frame(NONDET_FIXED_SIZE + num_slots);

        self.set_redoip(fr, redoip);
        self.set_redofr(fr, fr);
        self.set_succip_slot(fr, self.regs.succip);
        self.set_succfr(fr, succfr);

        self.regs.curfr = fr;

        if crate::trace_base::debug_flag(crate::trace_base::DebugFlag::Nondstack) {
            log::trace!(
                "engine {}: mkframe {:#x} ({} slots, redoip {})",
                self.id(),
                fr,
                num_slots,
                label::label_name(redoip)
            );
        }

        fr
    }

    /// Pushes a choice point for the current nondet frame.
    pub fn mktempframe(&mut self, redoip: CodeAddr) -> Addr {
        let fr = self.push_nondet_frame(NONDET_TEMP_SIZE);

        self.set_redoip(fr, redoip);
        self.set_redofr(fr, self.regs.curfr);

        fr
    }

    /// Pushes a choice point for the current det stack frame.
    pub fn mkdettempframe(&mut self, redoip: CodeAddr) -> Addr {
        let fr = self.push_nondet_frame(DET_TEMP_SIZE);

        self.set_redoip(fr, redoip);
        self.set_redofr(fr, self.regs.curfr);
        self.set_detfr(fr, self.regs.sp);

        fr
    }

    /// Returns a solution to the current frame's caller, keeping the frame
    /// for later redos.
    pub fn succeed(&mut self) -> CodeAddr {
        let fr = self.regs.curfr;
        let succip = self.succip_slot(fr);

        self.regs.curfr = self.succfr(fr);
        self.control = ControlState::Succeeded;

        calldebug!("engine {}: succeed from {:#x} to {}", self.id(), fr, label::label_name(succip));

        succip
    }

    /// Returns the last solution of the current frame, popping it.
    pub fn succeed_discard(&mut self) -> CodeAddr {
        self.regs.maxfr = self.prevfr(self.regs.curfr);
        self.succeed()
    }

    fn resume_choice_point(&mut self) -> CodeAddr {
        let maxfr = self.regs.maxfr;
        let redoip = self.redoip(maxfr);

        self.regs.curfr = self.redofr(maxfr);

        gotodebug!(
            "engine {}: backtrack into {:#x} at {}",
            self.id(),
            maxfr,
            label::label_name(redoip)
        );

        redoip
    }

    /// Backtracks into the most recent choice point.
    pub fn fail(&mut self) -> CodeAddr {
        self.control = ControlState::Failed;
        self.resume_choice_point()
    }

    /// Resumes the most recent choice point to try its next alternative.
    pub fn redo(&mut self) -> CodeAddr {
        self.control = ControlState::Redo;
        self.resume_choice_point()
    }

    /// Removes every choice point above `fr`.
    pub fn prune_to(&mut self, fr: Addr) {
        if fr > self.regs.maxfr {
            self.fatal("attempt to prune to a frame above maxfr");
        }

        calldebug!("engine {}: commit, maxfr {:#x} -> {:#x}", self.id(), self.regs.maxfr, fr);

        self.regs.maxfr = fr;
    }

    /// The bottom frame of the current context.
    pub fn bottom_nondet_frame(&self) -> Addr {
        self.context.nondetstack.min() + (NONDET_FIXED_SIZE - 1) * WORD_SIZE
    }

    /// The size in words of the frame at `fr`.
    pub fn frame_size(&self, fr: Addr) -> u64 {
        match self.prevfr(fr) {
            0 => NONDET_FIXED_SIZE,
            prevfr => (fr - prevfr) / WORD_SIZE,
        }
    }

    pub fn frame_kind(&self, fr: Addr) -> FrameKind {
        if self.prevfr(fr) == 0 {
            return FrameKind::Bottom;
        }

        match self.frame_size(fr) {
            NONDET_TEMP_SIZE => FrameKind::NondetTemp,
            DET_TEMP_SIZE => FrameKind::DetTemp,
            _ => FrameKind::Ordinary,
        }
    }

    /// The frames from `maxfr` down to, but excluding, the bottom frame.
    pub fn nondet_frames(&self) -> Vec<Addr> {
        let mut frames = vec![];
        let mut fr = self.regs.maxfr;

        while fr != 0 && self.prevfr(fr) != 0 {
            frames.push(fr);
            fr = self.prevfr(fr);
        }

        frames
    }

    /// The number of live frames above the bottom frame.
    pub fn choice_point_count(&self) -> usize {
        self.nondet_frames().len()
    }
}
