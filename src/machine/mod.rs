pub mod code;
pub mod config;
pub mod context;
pub mod copier;
pub mod exceptions;
pub mod heap;
pub mod layout_util;
pub mod machine_errors;
pub mod memory_zone;
#[cfg(test)]
pub(crate) mod mock_engine;
pub mod registers;
pub mod signal;
pub mod solutions;
pub mod stack;
pub mod stack_trace;
pub mod trail;
pub mod unify;

use crate::label;
use crate::machine::code::CodeBody;
use crate::machine::config::*;
use crate::machine::context::Context;
use crate::machine::machine_errors::*;
use crate::machine::memory_zone::*;
use crate::machine::registers::*;
use crate::machine::solutions::SolutionCollector;
use crate::type_tables;
use crate::types::*;

use fxhash::FxHashMap;

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Once;

/// Code addresses of the labels the engine implements itself. They sit
/// below `code::FIRST_USER_CODE_ADDR`, so no loaded module can collide with
/// them.
pub mod labels {
    use crate::types::CodeAddr;

    /// Returning here ends the innermost `call_engine`.
    pub const ENGINE_DONE: CodeAddr = CodeAddr(0x08);
    pub const DO_NOT_REACHED: CodeAddr = CodeAddr(0x10);
    pub const DO_FAIL: CodeAddr = CodeAddr(0x18);
    pub const DO_REDO: CodeAddr = CodeAddr(0x20);
    pub const DO_SUCCEED: CodeAddr = CodeAddr(0x28);
    pub const EXCEPTION_HANDLER_DO_FAIL: CodeAddr = CodeAddr(0x30);
    /// Calls the closure in r1 with r2 extra inputs from r4 onwards and r3
    /// outputs.
    pub const DO_CALL_CLOSURE: CodeAddr = CodeAddr(0x38);
    pub const GENERIC_UNIFY: CodeAddr = CodeAddr(0x40);
    pub const GENERIC_COMPARE: CodeAddr = CodeAddr(0x48);
    pub const SOLUTIONS_COLLECT: CodeAddr = CodeAddr(0x50);
    pub const SOLUTIONS_DONE: CodeAddr = CodeAddr(0x58);
    /// Calls the goal closure in r1, running the handler closure in r2 on
    /// an exception.
    pub const BUILTIN_CATCH: CodeAddr = CodeAddr(0x60);
    pub const CATCH_EXIT: CodeAddr = CodeAddr(0x68);

    pub(crate) const ALL: [(&str, CodeAddr); 13] = [
        ("engine_done", ENGINE_DONE),
        ("do_not_reached", DO_NOT_REACHED),
        ("do_fail", DO_FAIL),
        ("do_redo", DO_REDO),
        ("do_succeed", DO_SUCCEED),
        ("exception_handler_do_fail", EXCEPTION_HANDLER_DO_FAIL),
        ("do_call_closure", DO_CALL_CLOSURE),
        ("generic_unify", GENERIC_UNIFY),
        ("generic_compare", GENERIC_COMPARE),
        ("solutions_collect", SOLUTIONS_COLLECT),
        ("solutions_done", SOLUTIONS_DONE),
        ("builtin_catch", BUILTIN_CATCH),
        ("catch_exit", CATCH_EXIT),
    ];
}

use labels::*;

const_assert!(labels::CATCH_EXIT.0 < code::FIRST_USER_CODE_ADDR);

static REGISTER_LABELS: Once = Once::new();
static NEXT_ENGINE_ID: AtomicUsize = AtomicUsize::new(0);

fn register_builtin_labels() {
    REGISTER_LABELS.call_once(|| {
        for (name, addr) in labels::ALL {
            label::insert_entry_label(name, addr, None);
        }
    });
}

/// What the last control transfer was.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ControlState {
    Running,
    Succeeded,
    Failed,
    Redo,
}

/// A pending transfer of control to an outer dispatch loop, set by `throw`.
/// Every loop nested more deeply than `depth` returns as soon as it sees
/// it; the loop at `depth` restores `regs` and continues at `resume`, or
/// returns to its `call_engine` when there is nothing to resume.
#[derive(Debug, Clone)]
pub(crate) struct Unwind {
    pub(crate) depth: usize,
    pub(crate) resume: Option<CodeAddr>,
    pub(crate) regs: SavedRegisters,
}

/// The zone a heap allocation is made in.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum HeapKind {
    Heap,
    SolutionsHeap,
    GlobalHeap,
}

pub(crate) fn create_zone(name: &str, id: usize, size: &ZoneSize, check_overflow: bool) -> MemoryZone {
    let redzone = if check_overflow {
        size.redzone_bytes()
    } else {
        0
    };

    MemoryZone::create(name, id, size.size_bytes(), 0, redzone, default_handler)
}

/// One abstract machine: its registers, its heaps and the context it is
/// currently running.
pub struct Engine {
    pub regs: RegisterFile,
    pub(crate) heap: MemoryZone,
    pub(crate) solutions_heap: MemoryZone,
    pub(crate) global_heap: MemoryZone,
    pub(crate) context: Context,
    pub(crate) config: EngineConfig,
    id: usize,
    jump_history: VecDeque<CodeAddr>,
    pub(crate) control: ControlState,
    c_depth: usize,
    pub(crate) unwind: Option<Unwind>,
    pub(crate) caught_exception: Option<Word>,
    pub(crate) collectors: Vec<SolutionCollector>,
    code_cache: FxHashMap<CodeAddr, CodeBody>,
    pub(crate) stack_trace_bottom: Option<CodeAddr>,
}

impl fmt::Debug for Engine {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Engine")
            .field("id", &self.id)
            .field("regs", &self.regs)
            .field("control", &self.control)
            .field("c_depth", &self.c_depth)
            .finish()
    }
}

impl Default for Engine {
    fn default() -> Self {
        Engine::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        type_tables::builtin::init();
        register_builtin_labels();

        let id = NEXT_ENGINE_ID.fetch_add(1, Ordering::Relaxed);
        let check = config.check_overflow;

        let heap = create_zone("heap", id, &config.heap, check);
        let solutions_heap = create_zone("solutions_heap", id, &config.solutions_heap, check);
        let global_heap = create_zone("global_heap", id, &config.global_heap, check);
        let context = Context::create(id, &config);

        let mut regs = RegisterFile::new(config.num_registers);

        regs.hp = heap.min();
        regs.sol_hp = solutions_heap.min();
        regs.global_hp = global_heap.min();

        let mut engine = Engine {
            regs,
            heap,
            solutions_heap,
            global_heap,
            context,
            id,
            jump_history: VecDeque::with_capacity(config.jump_history_len),
            config,
            control: ControlState::Running,
            c_depth: 0,
            unwind: None,
            caught_exception: None,
            collectors: vec![],
            code_cache: FxHashMap::default(),
            stack_trace_bottom: None,
        };

        engine.init_context();
        engine
    }

    #[inline]
    pub fn id(&self) -> usize {
        self.id
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[inline]
    pub fn control_state(&self) -> ControlState {
        self.control
    }

    /// How many `call_engine` activations are on the native stack.
    #[inline]
    pub fn nesting_depth(&self) -> usize {
        self.c_depth
    }

    /// True while an exception is propagating to an outer dispatch loop.
    /// Native code that called back into the engine must return promptly
    /// when this is set.
    #[inline]
    pub fn is_unwinding(&self) -> bool {
        self.unwind.is_some()
    }

    /// Makes stack walks stop at `addr` in addition to the engine's own
    /// terminal labels.
    pub fn set_stack_trace_bottom(&mut self, addr: Option<CodeAddr>) {
        self.stack_trace_bottom = addr;
    }

    pub fn jump_history(&self) -> impl Iterator<Item = CodeAddr> + '_ {
        self.jump_history.iter().copied()
    }

    #[inline]
    pub fn save_registers(&self) -> SavedRegisters {
        self.regs.save_all()
    }

    #[inline]
    pub fn restore_registers(&mut self, saved: &SavedRegisters) {
        self.regs.restore(saved);
    }

    /// Reports an unrecoverable condition along with the engine's recent
    /// jumps.
    #[cold]
    pub fn fatal(&self, message: &str) -> ! {
        if !self.jump_history.is_empty() {
            let mut stderr = io::stderr().lock();
            let _ = writeln!(stderr, "*** last jumps of engine {}:", self.id);

            for addr in &self.jump_history {
                let _ = writeln!(stderr, "***     {}", label::label_name(*addr));
            }
        }

        fatal_error(message)
    }

    pub fn heap_zone(&self, kind: HeapKind) -> &MemoryZone {
        match kind {
            HeapKind::Heap => &self.heap,
            HeapKind::SolutionsHeap => &self.solutions_heap,
            HeapKind::GlobalHeap => &self.global_heap,
        }
    }

    pub fn detstack_zone(&self) -> &MemoryZone {
        &self.context.detstack
    }

    pub fn nondetstack_zone(&self) -> &MemoryZone {
        &self.context.nondetstack
    }

    fn zone_containing(&self, addr: Addr) -> Option<&MemoryZone> {
        [
            &self.heap,
            &self.context.detstack,
            &self.context.nondetstack,
            &self.solutions_heap,
            &self.global_heap,
        ]
        .into_iter()
        .find(|zone| zone.contains(addr))
        .or_else(|| {
            self.context
                .trail
                .as_ref()
                .map(|trail| trail.zone())
                .filter(|zone| zone.contains(addr))
        })
    }

    fn zone_containing_mut(&mut self, addr: Addr) -> Option<&mut MemoryZone> {
        if self.heap.contains(addr) {
            Some(&mut self.heap)
        } else if self.context.detstack.contains(addr) {
            Some(&mut self.context.detstack)
        } else if self.context.nondetstack.contains(addr) {
            Some(&mut self.context.nondetstack)
        } else if self.solutions_heap.contains(addr) {
            Some(&mut self.solutions_heap)
        } else if self.global_heap.contains(addr) {
            Some(&mut self.global_heap)
        } else {
            self.context
                .trail
                .as_mut()
                .map(|trail| trail.zone_mut())
                .filter(|zone| zone.contains(addr))
        }
    }

    /// Loads the word at `addr`, which may be in any of the engine's zones.
    #[inline]
    pub fn read(&self, addr: Addr) -> Word {
        match self.zone_containing(addr) {
            Some(zone) => zone.read(addr),
            None => self.fatal(&format!("load from {:#x} outside every memory zone", addr)),
        }
    }

    #[inline]
    pub fn write(&mut self, addr: Addr, value: Word) {
        match self.zone_containing_mut(addr) {
            Some(zone) => zone.write(addr, value),
            None => self.fatal(&format!("store to {:#x} outside every memory zone", addr)),
        }
    }

    /// Routes a simulated protection fault at `addr` to whichever zone's
    /// guard region covers it.
    pub fn try_munprotect(&mut self, addr: Addr) -> bool {
        let Engine {
            heap,
            solutions_heap,
            global_heap,
            context,
            ..
        } = self;

        let trail = context.trail.as_mut().map(|trail| trail.zone_mut());

        memory_zone::try_munprotect(
            [
                heap,
                solutions_heap,
                global_heap,
                &mut context.detstack,
                &mut context.nondetstack,
            ]
            .into_iter()
            .chain(trail),
            addr,
        )
    }

    fn record_jump(&mut self, addr: CodeAddr) {
        let limit = self.config.jump_history_len;

        if limit == 0 {
            return;
        }

        if self.jump_history.len() == limit {
            self.jump_history.pop_front();
        }

        self.jump_history.push_back(addr);
    }

    fn code_body(&mut self, addr: CodeAddr) -> CodeBody {
        if let Some(body) = self.code_cache.get(&addr) {
            return body.clone();
        }

        match code::lookup_code(addr) {
            Some(body) => {
                self.code_cache.insert(addr, body.clone());
                body
            }
            None => self.fatal(&format!("jump to unknown code address {}", addr)),
        }
    }

    /// Executes one step of abstract machine code at `pc`, returning the
    /// next address.
    fn step(&mut self, pc: CodeAddr) -> CodeAddr {
        match pc {
            DO_NOT_REACHED => self.fatal("reached not_reached code"),
            DO_FAIL => self.fail(),
            DO_REDO => self.redo(),
            DO_SUCCEED => self.succeed(),
            EXCEPTION_HANDLER_DO_FAIL => self.exception_handler_do_fail(),
            DO_CALL_CLOSURE => self.do_call_closure(),
            GENERIC_UNIFY => self.generic_unify_entry(),
            GENERIC_COMPARE => self.generic_compare_entry(),
            SOLUTIONS_COLLECT => self.solutions_collect(),
            SOLUTIONS_DONE => self.solutions_done(),
            BUILTIN_CATCH => self.builtin_catch(),
            CATCH_EXIT => self.catch_exit(),
            _ => {
                let body = self.code_body(pc);
                self.control = ControlState::Running;
                body(self)
            }
        }
    }

    /// The trampoline: jumps from address to address until `ENGINE_DONE`.
    fn run(&mut self, entry: CodeAddr) {
        let depth = self.c_depth;
        let mut pc = entry;

        loop {
            if pc == ENGINE_DONE {
                gotodebug!("engine {} level {}: engine done", self.id, depth);
                return;
            }

            self.record_jump(pc);
            gotodebug!("engine {} level {}: goto {}", self.id, depth, label::label_name(pc));

            pc = self.step(pc);

            match self.unwind.as_ref().map(|unwind| unwind.depth) {
                Some(target) if target < depth => return,
                Some(_) => {
                    if let Some(unwind) = self.unwind.take() {
                        self.regs.restore(&unwind.regs);

                        match unwind.resume {
                            Some(resume) => pc = resume,
                            None => return,
                        }
                    }
                }
                None => {}
            }
        }
    }

    /// Runs code at `entry` in a dispatch loop one level deeper than the
    /// current one. The code must eventually return to `ENGINE_DONE`.
    pub(crate) fn run_nested(&mut self, entry: CodeAddr) {
        self.c_depth += 1;
        self.run(entry);
        self.c_depth -= 1;
    }

    /// Enters abstract machine code at `entry`, with inputs already in the
    /// argument registers, and returns when that code proceeds to its
    /// continuation. With `catch_exceptions`, an exception that escapes the
    /// code is returned instead of propagating further out; the stacks are
    /// then as they were before the call.
    pub fn call_engine(&mut self, entry: CodeAddr, catch_exceptions: bool) -> Option<Word> {
        let saved_succip = self.regs.succip;

        self.c_depth += 1;

        calldebug!(
            "engine {}: call_engine({}) at level {}",
            self.id,
            label::label_name(entry),
            self.c_depth
        );

        let handler_frame = if catch_exceptions {
            Some(self.push_handler_frame(exceptions::HandlerKind::CallEngine, 0))
        } else {
            None
        };

        self.regs.succip = ENGINE_DONE;
        self.control = ControlState::Running;

        self.run(entry);

        let depth = self.c_depth;
        self.c_depth -= 1;

        if self.unwind.as_ref().is_some_and(|unwind| unwind.depth < depth) {
            return None;
        }

        let result = match handler_frame {
            Some(frame) => match self.caught_exception.take() {
                Some(exception) => Some(exception),
                None => {
                    self.pop_handler_frame(frame);
                    None
                }
            },
            None => None,
        };

        self.regs.succip = saved_succip;
        result
    }
}
