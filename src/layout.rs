//! Layout metadata describing procedures and the labels inside them.
//!
//! Layouts are produced alongside compiled code and never change once
//! built. A `ProcLayout` gives the shape of a procedure's stack frame; a
//! `LabelLayout` gives the values live at one code address and where they
//! are stored.

use crate::trace_base::TracePort;
use crate::type_info::PseudoTypeInfo;
use crate::types::*;

use scryer_modular_bitfield::prelude::*;

use std::fmt;
use std::sync::Arc;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Determinism {
    Failure = 0,
    Semidet = 2,
    Nondet = 3,
    Erroneous = 4,
    Det = 6,
    Multidet = 7,
    CcNondet = 10,
    CcMultidet = 14,
}

const DETISM_NAMES: [&str; 15] = [
    "failure",
    "",
    "semidet",
    "nondet",
    "erroneous",
    "",
    "det",
    "multi",
    "",
    "",
    "cc_nondet",
    "",
    "",
    "",
    "cc_multi",
];

impl Determinism {
    pub fn from_code(code: u8) -> Option<Determinism> {
        Some(match code {
            0 => Determinism::Failure,
            2 => Determinism::Semidet,
            3 => Determinism::Nondet,
            4 => Determinism::Erroneous,
            6 => Determinism::Det,
            7 => Determinism::Multidet,
            10 => Determinism::CcNondet,
            14 => Determinism::CcMultidet,
            _ => return None,
        })
    }

    #[inline]
    pub fn code(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        DETISM_NAMES[self as usize]
    }

    #[inline]
    pub fn at_most_many(self) -> bool {
        self.code() & 1 != 0
    }

    #[inline]
    pub fn can_fail(self) -> bool {
        self.code() & 4 == 0
    }

    #[inline]
    pub fn first_solution(self) -> bool {
        self.code() & 8 != 0
    }

    /// Procedures of this determinism keep their frame on the det stack.
    #[inline]
    pub fn uses_det_stack(self) -> bool {
        !self.at_most_many() || self.first_solution()
    }
}

impl fmt::Display for Determinism {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum LvalKind {
    R = 0,
    F,
    Stackvar,
    Framevar,
    Succip,
    Maxfr,
    Curfr,
    Hp,
    Sp,
    Indirect,
    Unknown,
}

impl LvalKind {
    fn from_code(code: u8) -> LvalKind {
        match code {
            0 => LvalKind::R,
            1 => LvalKind::F,
            2 => LvalKind::Stackvar,
            3 => LvalKind::Framevar,
            4 => LvalKind::Succip,
            5 => LvalKind::Maxfr,
            6 => LvalKind::Curfr,
            7 => LvalKind::Hp,
            8 => LvalKind::Sp,
            9 => LvalKind::Indirect,
            _ => LvalKind::Unknown,
        }
    }
}

pub const LONG_LVAL_TAGBITS: u32 = 4;
pub const LONG_LVAL_OFFSETBITS: u32 = 6;
pub const SHORT_LVAL_TAGBITS: u32 = 2;
pub const SHORT_COUNT_BITS: u32 = 10;
pub const SHORT_COUNT_MASK: u32 = (1 << SHORT_COUNT_BITS) - 1;

/// A 32-bit location descriptor: a 4-bit kind and a 28-bit number.
#[bitfield]
#[repr(u32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct LongLval {
    kind: B4,
    number: B28,
}

impl LongLval {
    #[inline]
    pub fn build_with(kind: LvalKind, number: u32) -> Self {
        LongLval::new()
            .with_kind(kind as u8)
            .with_number(number & ((1 << 28) - 1))
    }

    pub fn r_reg(n: u32) -> Self {
        Self::build_with(LvalKind::R, n)
    }

    pub fn stackvar(n: u32) -> Self {
        Self::build_with(LvalKind::Stackvar, n)
    }

    pub fn framevar(n: u32) -> Self {
        Self::build_with(LvalKind::Framevar, n)
    }

    pub fn special(kind: LvalKind) -> Self {
        Self::build_with(kind, 0)
    }

    /// The word `offset` words past the address held in `base`.
    pub fn indirect(base: LongLval, offset: u32) -> Self {
        debug_assert!(offset < 1 << LONG_LVAL_OFFSETBITS);
        debug_assert!(base.get_kind() != LvalKind::Indirect);

        let number = (u32::from(base) << LONG_LVAL_OFFSETBITS) | offset;
        Self::build_with(LvalKind::Indirect, number)
    }

    #[inline]
    pub fn get_kind(self) -> LvalKind {
        LvalKind::from_code(self.kind())
    }

    #[inline]
    pub fn get_number(self) -> u32 {
        self.number()
    }

    pub fn indirect_offset(self) -> u32 {
        self.number() & ((1 << LONG_LVAL_OFFSETBITS) - 1)
    }

    pub fn indirect_base(self) -> LongLval {
        LongLval::from(self.number() >> LONG_LVAL_OFFSETBITS)
    }
}

impl fmt::Display for LongLval {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.get_kind() {
            LvalKind::R => write!(f, "r{}", self.get_number()),
            LvalKind::F => write!(f, "f{}", self.get_number()),
            LvalKind::Stackvar => write!(f, "stackvar{}", self.get_number()),
            LvalKind::Framevar => write!(f, "framevar{}", self.get_number()),
            LvalKind::Succip => write!(f, "succip"),
            LvalKind::Maxfr => write!(f, "maxfr"),
            LvalKind::Curfr => write!(f, "curfr"),
            LvalKind::Hp => write!(f, "hp"),
            LvalKind::Sp => write!(f, "sp"),
            LvalKind::Indirect => write!(
                f,
                "offset {} from {}",
                self.indirect_offset(),
                self.indirect_base()
            ),
            LvalKind::Unknown => write!(f, "unknown"),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ShortLvalKind {
    R = 0,
    Stackvar,
    Framevar,
    Special,
}

/// An 8-bit location descriptor for small register and slot numbers. A
/// special location's number is the `LvalKind` of the special register.
#[bitfield]
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ShortLval {
    kind: B2,
    number: B6,
}

impl ShortLval {
    #[inline]
    pub fn build_with(kind: ShortLvalKind, number: u8) -> Self {
        debug_assert!(number < 1 << 6);
        ShortLval::new().with_kind(kind as u8).with_number(number)
    }

    #[inline]
    pub fn get_kind(self) -> ShortLvalKind {
        match self.kind() {
            0 => ShortLvalKind::R,
            1 => ShortLvalKind::Stackvar,
            2 => ShortLvalKind::Framevar,
            _ => ShortLvalKind::Special,
        }
    }

    #[inline]
    pub fn get_number(self) -> u8 {
        self.number()
    }

    pub fn to_long(self) -> LongLval {
        let n = self.get_number() as u32;

        match self.get_kind() {
            ShortLvalKind::R => LongLval::r_reg(n),
            ShortLvalKind::Stackvar => LongLval::stackvar(n),
            ShortLvalKind::Framevar => LongLval::framevar(n),
            ShortLvalKind::Special => LongLval::special(LvalKind::from_code(n as u8)),
        }
    }
}

/// Packs long and short descriptor counts the way label layouts record them.
pub fn encode_var_count(long: usize, short: usize) -> u32 {
    debug_assert!(short as u32 <= SHORT_COUNT_MASK);
    ((long as u32) << SHORT_COUNT_BITS) | short as u32
}

pub fn decode_var_count(count: u32) -> (usize, usize) {
    (
        (count >> SHORT_COUNT_BITS) as usize,
        (count & SHORT_COUNT_MASK) as usize,
    )
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum PredOrFunc {
    Predicate,
    Function,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ProcId {
    User {
        pred_or_func: PredOrFunc,
        decl_module: String,
        def_module: String,
        name: String,
        arity: u16,
        mode: u16,
    },
    Compiler {
        type_name: String,
        type_module: String,
        def_module: String,
        pred_name: String,
        arity: u16,
        mode: u16,
    },
}

impl ProcId {
    pub fn user(pred_or_func: PredOrFunc, module: &str, name: &str, arity: u16, mode: u16) -> Self {
        ProcId::User {
            pred_or_func,
            decl_module: module.to_owned(),
            def_module: module.to_owned(),
            name: name.to_owned(),
            arity,
            mode,
        }
    }

    pub fn is_compiler_generated(&self) -> bool {
        matches!(self, ProcId::Compiler { .. })
    }

    pub fn name(&self) -> &str {
        match self {
            ProcId::User { name, .. } => name,
            ProcId::Compiler { pred_name, .. } => pred_name,
        }
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ProcId::Compiler {
                type_name,
                type_module,
                def_module,
                pred_name,
                arity,
                mode,
            } => {
                write!(f, "{} for {}:{}/{}-{}", pred_name, type_module, type_name, arity, mode)?;

                if type_module != def_module {
                    write!(f, " {{{}}}", def_module)?;
                }

                Ok(())
            }
            ProcId::User {
                pred_or_func,
                decl_module,
                def_module,
                name,
                arity,
                mode,
            } => {
                let kind = match pred_or_func {
                    PredOrFunc::Predicate => "pred",
                    PredOrFunc::Function => "func",
                };

                write!(f, "{} {}:{}/{}-{}", kind, decl_module, name, arity, mode)?;

                if decl_module != def_module {
                    write!(f, " {{{}}}", def_module)?;
                }

                Ok(())
            }
        }
    }
}

/// Present for procedures compiled with execution tracing. Such procedures
/// keep their event number, call number and call depth in slots 1, 2 and 3
/// of their frame.
#[derive(Clone, Debug, Default)]
pub struct ExecTrace {
    pub call_label: Option<Arc<LabelLayout>>,
    pub module_name: String,
    /// Indexed by variable number minus one. An empty name marks a
    /// compiler-introduced variable.
    pub used_var_names: Vec<String>,
    pub max_var_num: u16,
    pub max_r_num: u16,
}

pub const TRACE_EVENT_NUM_SLOT: u32 = 1;
pub const TRACE_CALL_NUM_SLOT: u32 = 2;
pub const TRACE_CALL_DEPTH_SLOT: u32 = 3;

#[derive(Clone, Debug)]
pub struct ProcLayout {
    pub code_addr: CodeAddr,
    pub succip_locn: Option<LongLval>,
    pub stack_slots: u32,
    /// `None` for handwritten code that gives no frame information.
    pub detism: Option<Determinism>,
    pub proc_id: ProcId,
    pub exec_trace: Option<ExecTrace>,
}

impl ProcLayout {
    pub fn new(
        code_addr: CodeAddr,
        proc_id: ProcId,
        detism: Determinism,
        stack_slots: u32,
        succip_locn: Option<LongLval>,
    ) -> Self {
        ProcLayout {
            code_addr,
            succip_locn,
            stack_slots,
            detism: Some(detism),
            proc_id,
            exec_trace: None,
        }
    }

    pub fn with_exec_trace(mut self, exec_trace: ExecTrace) -> Self {
        self.exec_trace = Some(exec_trace);
        self
    }

    #[inline]
    pub fn has_exec_trace(&self) -> bool {
        self.exec_trace.is_some()
    }

    pub fn uses_det_stack(&self) -> bool {
        self.detism.is_some_and(Determinism::uses_det_stack)
    }

    pub fn var_name(&self, var_num: u16) -> Option<&str> {
        let exec_trace = self.exec_trace.as_ref()?;

        if var_num == 0 || var_num > exec_trace.max_var_num {
            return None;
        }

        exec_trace
            .used_var_names
            .get(var_num as usize - 1)
            .map(String::as_str)
    }
}

/// What a live value descriptor says about the value's type: either an
/// ordinary typed variable or one of the machine's own saved registers.
#[derive(Clone, Debug, PartialEq)]
pub enum LiveType {
    Var(PseudoTypeInfo),
    Succip,
    Hp,
    Curfr,
    Maxfr,
    Redoip,
    Redofr,
    Unwanted,
}

#[derive(Clone, Debug)]
pub struct LabelVars {
    /// Types of the long descriptors first, then of the short ones.
    pub types: Vec<LiveType>,
    pub long_locns: Vec<LongLval>,
    pub short_locns: Vec<ShortLval>,
    pub var_nums: Option<Vec<u16>>,
    /// Locations of the typeinfos for type variables 1, 2, ...; `None` for
    /// type variables that need not be materialized.
    pub type_params: Option<Vec<Option<LongLval>>>,
}

impl LabelVars {
    pub fn new(long: Vec<(LiveType, LongLval)>, short: Vec<(LiveType, ShortLval)>) -> Self {
        let mut types = Vec::with_capacity(long.len() + short.len());
        let mut long_locns = Vec::with_capacity(long.len());
        let mut short_locns = Vec::with_capacity(short.len());

        for (ty, locn) in long {
            types.push(ty);
            long_locns.push(locn);
        }

        for (ty, locn) in short {
            types.push(ty);
            short_locns.push(locn);
        }

        LabelVars {
            types,
            long_locns,
            short_locns,
            var_nums: None,
            type_params: None,
        }
    }

    pub fn with_var_nums(mut self, var_nums: Vec<u16>) -> Self {
        self.var_nums = Some(var_nums);
        self
    }

    pub fn with_type_params(mut self, type_params: Vec<Option<LongLval>>) -> Self {
        self.type_params = Some(type_params);
        self
    }

    pub fn var_count(&self) -> u32 {
        encode_var_count(self.long_locns.len(), self.short_locns.len())
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// The location of live value `i`, in long form.
    pub fn locn(&self, i: usize) -> LongLval {
        let long = self.long_locns.len();

        if i < long {
            self.long_locns[i]
        } else {
            self.short_locns[i - long].to_long()
        }
    }
}

#[derive(Clone, Debug)]
pub struct LabelLayout {
    pub entry: Arc<ProcLayout>,
    pub port: Option<TracePort>,
    pub goal_path: String,
    /// `None` when nothing is known about the live values at this label.
    pub vars: Option<LabelVars>,
}

impl LabelLayout {
    pub fn new(entry: Arc<ProcLayout>) -> Self {
        LabelLayout {
            entry,
            port: None,
            goal_path: String::new(),
            vars: None,
        }
    }

    pub fn with_port(mut self, port: TracePort) -> Self {
        self.port = Some(port);
        self
    }

    pub fn with_goal_path(mut self, goal_path: &str) -> Self {
        self.goal_path = goal_path.to_owned();
        self
    }

    pub fn with_vars(mut self, vars: LabelVars) -> Self {
        self.vars = Some(vars);
        self
    }

    pub fn has_valid_var_count(&self) -> bool {
        self.vars.is_some()
    }

    pub fn has_valid_var_info(&self) -> bool {
        self.vars.as_ref().is_some_and(|vars| !vars.is_empty())
    }
}
