//! Walking the det and nondet stacks using the layouts of return labels.
//!
//! Each step starts from a procedure layout and the `sp`/`curfr` of that
//! procedure's frame, finds the address the procedure will return to, and
//! looks up the layout of that return label, which names the caller.

use crate::label;
use crate::layout::*;
use crate::machine::labels::*;
use crate::machine::machine_errors::IntrospectionError;
use crate::machine::stack::FrameKind;
use crate::machine::Engine;
use crate::trace_base::{self, TracePort};
use crate::types::*;

use std::fmt::{self, Write};
use std::sync::Arc;

/// Where a successful step ended up.
#[derive(Debug, Clone)]
pub enum StepResult {
    /// The procedure returns to the code that started the engine.
    Bottom,
    /// The procedure returns to this label in its caller.
    Caller(Arc<LabelLayout>),
}

impl IntrospectionError {
    /// Whether a walk stopped by this error had already passed the frame
    /// of the procedure it was stepping from.
    fn found_after_frame(self) -> bool {
        self != IntrospectionError::NoStackTraceInfo
    }
}

struct PendingRecord {
    entry: Arc<ProcLayout>,
    count: usize,
    start_level: usize,
    base: Option<(Addr, Addr)>,
}

/// Merges consecutive frames of the same procedure into one line unless
/// trace data, which differs between calls, is being shown.
struct DumpRecorder<'a, W: Write> {
    engine: &'a Engine,
    out: &'a mut W,
    pending: Option<PendingRecord>,
    level: usize,
}

impl<'a, W: Write> DumpRecorder<'a, W> {
    fn new(engine: &'a Engine, out: &'a mut W) -> Self {
        DumpRecorder {
            engine,
            out,
            pending: None,
            level: 0,
        }
    }

    fn record(&mut self, entry: &Arc<ProcLayout>, base: Option<(Addr, Addr)>) -> fmt::Result {
        let merge = base.is_none()
            && self
                .pending
                .as_ref()
                .is_some_and(|pending| Arc::ptr_eq(&pending.entry, entry));

        if merge {
            if let Some(pending) = self.pending.as_mut() {
                pending.count += 1;
            }
        } else {
            self.flush()?;

            self.pending = Some(PendingRecord {
                entry: entry.clone(),
                count: 1,
                start_level: self.level,
                base,
            });
        }

        self.level += 1;
        Ok(())
    }

    fn flush(&mut self) -> fmt::Result {
        let Some(record) = self.pending.take() else {
            return Ok(());
        };

        write!(self.out, "{:4} ", record.start_level)?;

        if record.count > 1 {
            write!(self.out, " {:3}* ", record.count)?;
        } else if record.base.is_none() {
            write!(self.out, "{:5} ", "")?;
        }

        self.engine
            .print_proc_id(self.out, &record.entry, None, record.base)
    }
}

impl Engine {
    /// Steps from the frame of the procedure described by `entry` to its
    /// caller's frame, updating `sp` and `curfr` to describe the caller.
    pub fn stack_walk_step(
        &self,
        entry: &ProcLayout,
        sp: &mut Addr,
        curfr: &mut Addr,
    ) -> Result<StepResult, IntrospectionError> {
        let Some(detism) = entry.detism else {
            return Err(IntrospectionError::NoStackTraceInfo);
        };

        let success = if detism.uses_det_stack() {
            let locn = match entry.succip_locn {
                Some(locn) if locn.get_kind() == LvalKind::Stackvar => locn,
                _ => return Err(IntrospectionError::NotStackvar),
            };

            let success = CodeAddr::from_word(self.based_stackvar(*sp, locn.get_number() as u64));
            *sp = sp.wrapping_sub(entry.stack_slots as u64 * WORD_SIZE);
            success
        } else {
            let success = self.succip_slot(*curfr);
            *curfr = self.succfr(*curfr);
            success
        };

        if success == ENGINE_DONE
            || success == DO_NOT_REACHED
            || Some(success) == self.stack_trace_bottom
        {
            return Ok(StepResult::Bottom);
        }

        let Some(internal) = label::lookup_internal_by_addr(success) else {
            return Err(IntrospectionError::UnknownLabel);
        };

        match &internal.layout {
            Some(layout) => Ok(StepResult::Caller(layout.clone())),
            None => Err(IntrospectionError::NoStackLayout),
        }
    }

    /// Writes one line per ancestor frame, starting with the frame of
    /// `entry` at `sp`/`curfr`. With `include_trace_data`, traced frames
    /// also show their event number, call number and call depth.
    pub fn dump_stack_from_layout<W: Write>(
        &self,
        out: &mut W,
        entry: &Arc<ProcLayout>,
        sp: Addr,
        curfr: Addr,
        include_trace_data: bool,
    ) -> Result<(), IntrospectionError> {
        let mut recorder = DumpRecorder::new(self, out);
        let mut entry = entry.clone();
        let (mut sp, mut curfr) = (sp, curfr);

        loop {
            let base = include_trace_data.then_some((sp, curfr));
            let step = self.stack_walk_step(&entry, &mut sp, &mut curfr);

            if let Err(error) = step {
                if error.found_after_frame() {
                    recorder.record(&entry, base)?;
                }

                recorder.flush()?;
                return Err(error);
            }

            recorder.record(&entry, base)?;

            match step {
                Ok(StepResult::Caller(layout)) => entry = layout.entry.clone(),
                _ => break,
            }
        }

        recorder.flush()?;
        Ok(())
    }

    /// Dumps the stack of the code that will continue at `succip`.
    pub fn dump_stack<W: Write>(&self, out: &mut W, include_trace_data: bool) -> Result<(), IntrospectionError> {
        writeln!(out, "Stack dump follows:")?;

        let layout = label::lookup_internal_by_addr(self.regs.succip)
            .and_then(|internal| internal.layout.clone());

        match layout {
            Some(layout) => self.dump_stack_from_layout(
                out,
                &layout.entry,
                self.regs.sp,
                self.regs.curfr,
                include_trace_data,
            ),
            None => {
                writeln!(out, "internal label not found")?;
                Ok(())
            }
        }
    }

    /// Prints a procedure's identity and determinism. When `base` gives
    /// the frame of a traced procedure, its trace slots come first.
    pub fn print_proc_id<W: Write>(
        &self,
        out: &mut W,
        entry: &ProcLayout,
        extra: Option<&str>,
        base: Option<(Addr, Addr)>,
    ) -> fmt::Result {
        if let (true, Some((sp, curfr))) = (entry.has_exec_trace(), base) {
            let (event, call, depth) = self.trace_slots(entry, sp, curfr);
            write!(out, "{:7} {:7} {:4} ", event + 1, call, depth)?;
        }

        let detism = entry.detism.map(Determinism::name).unwrap_or("");
        write!(out, "{} ({})", entry.proc_id, detism)?;

        match extra {
            Some(extra) => writeln!(out, " {}", extra),
            None => writeln!(out),
        }
    }

    fn trace_slots(&self, entry: &ProcLayout, sp: Addr, curfr: Addr) -> (Word, Word, Word) {
        let slot = |n: u32| {
            if entry.uses_det_stack() {
                self.based_stackvar(sp, n as u64)
            } else {
                self.based_framevar(curfr, n as u64)
            }
        };

        (
            slot(TRACE_EVENT_NUM_SLOT),
            slot(TRACE_CALL_NUM_SLOT),
            slot(TRACE_CALL_DEPTH_SLOT),
        )
    }

    fn set_trace_slot(&mut self, entry: &ProcLayout, n: u32, value: Word) {
        if entry.uses_det_stack() {
            let sp = self.regs.sp;
            self.set_based_stackvar(sp, n as u64, value);
        } else {
            let curfr = self.regs.curfr;
            self.set_based_framevar(curfr, n as u64, value);
        }
    }

    /// Walks `level` calls up from the point described by `layout`,
    /// updating `sp` and `curfr` to describe the frame reached.
    pub fn find_nth_ancestor(
        &self,
        layout: &Arc<LabelLayout>,
        level: i32,
        sp: &mut Addr,
        curfr: &mut Addr,
    ) -> Result<Arc<LabelLayout>, IntrospectionError> {
        if level < 0 {
            return Err(IntrospectionError::NoSuchFrame);
        }

        let mut layout = layout.clone();

        for _ in 0..level {
            match self.stack_walk_step(&layout.entry, sp, curfr)? {
                StepResult::Caller(caller) => layout = caller,
                StepResult::Bottom => return Err(IntrospectionError::NotThatManyAncestors),
            }
        }

        Ok(layout)
    }

    /// Writes one line for each nondet stack frame from `maxfr` down to
    /// the bottom frame.
    pub fn dump_nondet_stack<W: Write>(&self, out: &mut W) -> fmt::Result {
        let mut fr = self.regs.maxfr;

        while fr != 0 {
            let redoip = label::label_name(self.redoip(fr));
            let redofr = self.redofr(fr);

            match self.frame_kind(fr) {
                FrameKind::NondetTemp => writeln!(
                    out,
                    "{:#x}: nondet temp, {} words, redoip: {}, redofr: {:#x}",
                    fr,
                    self.frame_size(fr),
                    redoip,
                    redofr
                )?,
                FrameKind::DetTemp => writeln!(
                    out,
                    "{:#x}: det temp, {} words, redoip: {}, redofr: {:#x}, detfr: {:#x}",
                    fr,
                    self.frame_size(fr),
                    redoip,
                    redofr,
                    self.detfr(fr)
                )?,
                kind => writeln!(
                    out,
                    "{:#x}: {}, {} words, redoip: {}, redofr: {:#x}, succip: {}, succfr: {:#x}",
                    fr,
                    if kind == FrameKind::Bottom { "bottom" } else { "ordinary" },
                    self.frame_size(fr),
                    redoip,
                    redofr,
                    label::label_name(self.succip_slot(fr)),
                    self.succfr(fr)
                )?,
            }

            fr = self.prevfr(fr);
        }

        Ok(())
    }

    /// Records a call to a traced procedure whose frame has just been
    /// pushed: the event number before the call, and the call's sequence
    /// number and depth, go in the frame's trace slots.
    pub fn trace_call_entry(&mut self, entry: &ProcLayout) {
        if !trace_base::trace_enabled() || !entry.has_exec_trace() {
            return;
        }

        let event = trace_base::event_number();
        let (seqno, depth) = trace_base::enter_call();

        self.set_trace_slot(entry, TRACE_EVENT_NUM_SLOT, event);
        self.set_trace_slot(entry, TRACE_CALL_NUM_SLOT, seqno);
        self.set_trace_slot(entry, TRACE_CALL_DEPTH_SLOT, depth);

        trace_base::trace_event(TracePort::Call);
    }

    /// Records the exit of a traced procedure whose frame is still live.
    pub fn trace_call_exit(&mut self, entry: &ProcLayout, port: TracePort) {
        if !trace_base::trace_enabled() || !entry.has_exec_trace() {
            return;
        }

        let (_, _, depth) = self.trace_slots(entry, self.regs.sp, self.regs.curfr);

        trace_base::trace_event(port);
        trace_base::leave_call(depth);
    }
}
