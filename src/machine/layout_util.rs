//! Reading the values a label layout says are live.
//!
//! Values live in registers are read from a register snapshot taken when
//! control left abstract machine code; values in stack slots are read
//! relative to the `sp` and `curfr` of the frame being inspected, which
//! need not be the innermost one.

use crate::layout::*;
use crate::machine::machine_errors::IntrospectionError;
use crate::machine::registers::SavedRegisters;
use crate::machine::Engine;
use crate::trace_base::TracePort;
use crate::type_info::{PseudoTypeInfo, TypeCtorInfo, TypeInfo};
use crate::type_tables::builtin;
use crate::types::*;

use std::cmp::Ordering;
use std::sync::Arc;

const HEAD_VAR_BASENAME: &str = "HeadVar__";

/// The frame whose slots a location refers to, plus the registers that
/// were live there (only known for the innermost frame).
#[derive(Debug, Clone, Copy)]
pub struct FrameBase<'a> {
    pub saved_regs: Option<&'a SavedRegisters>,
    pub sp: Addr,
    pub curfr: Addr,
}

impl<'a> FrameBase<'a> {
    pub fn innermost(saved_regs: &'a SavedRegisters) -> Self {
        FrameBase {
            saved_regs: Some(saved_regs),
            sp: saved_regs.sp,
            curfr: saved_regs.curfr,
        }
    }
}

/// One named variable live at a label.
#[derive(Debug, Clone)]
pub struct LiveVar {
    pub var_num: u16,
    pub name: String,
    pub basename: String,
    pub num_suffix: Option<u64>,
    pub is_headvar: bool,
    /// Set when another live variable has the same full name.
    pub is_ambiguous: bool,
    pub type_info: TypeInfo,
    pub value: Word,
}

impl LiveVar {
    fn new(var_num: u16, name: &str, type_info: TypeInfo, value: Word) -> Self {
        let (basename, num_suffix) = split_num_suffix(name);

        LiveVar {
            var_num,
            name: name.to_owned(),
            is_headvar: basename == HEAD_VAR_BASENAME,
            basename,
            num_suffix,
            is_ambiguous: false,
            type_info,
            value,
        }
    }
}

/// Splits a trailing run of digits off a variable name.
fn split_num_suffix(name: &str) -> (String, Option<u64>) {
    let basename = name.trim_end_matches(|c: char| c.is_ascii_digit());

    if basename.len() == name.len() {
        return (name.to_owned(), None);
    }

    if basename.is_empty() {
        fatal!("variable name starts with digit");
    }

    let suffix = name[basename.len()..].parse::<u64>().ok();
    (basename.to_owned(), suffix)
}

/// Head variables first, then by basename, then numerically by suffix
/// (unsuffixed names last), then by variable number.
fn compare_live_vars(a: &LiveVar, b: &LiveVar) -> Ordering {
    b.is_headvar
        .cmp(&a.is_headvar)
        .then_with(|| a.basename.cmp(&b.basename))
        .then_with(|| match (a.num_suffix, b.num_suffix) {
            (Some(x), Some(y)) => x.cmp(&y),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        })
        .then_with(|| a.var_num.cmp(&b.var_num))
}

fn is_ignored_ctor(ctor: &Arc<TypeCtorInfo>) -> bool {
    [
        builtin::type_info(),
        builtin::typeclass_info(),
        builtin::pred(),
        builtin::func(),
        builtin::void(),
    ]
    .iter()
    .any(|ignored| ignored.id() == ctor.id())
}

/// Values of these types are never shown as variables.
pub fn live_type_is_ignored(live_type: &LiveType) -> bool {
    match live_type {
        LiveType::Var(pseudo) => pseudo.type_ctor().is_some_and(is_ignored_ctor),
        _ => true,
    }
}

/// Resolves `pseudo` against materialized type parameters. A parameter
/// that was not materialized stands for `void`.
fn resolve_pseudo(params: &[Option<TypeInfo>], pseudo: &PseudoTypeInfo) -> TypeInfo {
    match pseudo {
        PseudoTypeInfo::Var(n) | PseudoTypeInfo::ExistVar(n) => (*n as usize)
            .checked_sub(1)
            .and_then(|i| params.get(i))
            .and_then(Option::clone)
            .unwrap_or_else(|| TypeInfo::ground(&builtin::void())),
        PseudoTypeInfo::Ctor { ctor, args } => {
            let args = args.iter().map(|arg| resolve_pseudo(params, arg)).collect();
            TypeInfo::new(ctor, args)
        }
    }
}

impl Engine {
    /// The value held in `locn` in the frame described by `base`, if the
    /// location can be read there.
    pub fn lookup_long_lval(&self, locn: LongLval, base: &FrameBase) -> Option<Word> {
        let n = locn.get_number();

        match locn.get_kind() {
            LvalKind::R => base.saved_regs.and_then(|regs| regs.saved_reg(n as usize)),
            LvalKind::Stackvar => Some(self.based_stackvar(base.sp, n as u64)),
            LvalKind::Framevar => Some(self.based_framevar(base.curfr, n as u64)),
            LvalKind::Succip => base.saved_regs.map(|regs| regs.succip.as_word()),
            LvalKind::Maxfr => base.saved_regs.map(|regs| regs.maxfr),
            LvalKind::Curfr => base.saved_regs.map(|regs| regs.curfr),
            LvalKind::Hp => base.saved_regs.map(|regs| regs.hp),
            LvalKind::Sp => base.saved_regs.map(|regs| regs.sp),
            LvalKind::Indirect => {
                let block = self.lookup_long_lval(locn.indirect_base(), base)?;
                let offset = locn.indirect_offset() as u64;

                Some(self.read(strip_tag(block) + offset * WORD_SIZE))
            }
            LvalKind::F | LvalKind::Unknown => None,
        }
    }

    pub fn lookup_short_lval(&self, locn: ShortLval, base: &FrameBase) -> Option<Word> {
        self.lookup_long_lval(locn.to_long(), base)
    }

    /// Reads the typeinfos of the label's type variables. Entry `i` is the
    /// binding of type variable `i + 1`.
    pub fn materialize_type_params(&self, vars: &LabelVars, base: &FrameBase) -> Vec<Option<TypeInfo>> {
        let Some(type_params) = &vars.type_params else {
            return vec![];
        };

        type_params
            .iter()
            .map(|locn| {
                let locn = (*locn)?;

                match self.lookup_long_lval(locn, base) {
                    Some(addr) => Some(self.load_type_info(addr)),
                    None => self.fatal(&format!("missing type param in {}", locn)),
                }
            })
            .collect()
    }

    /// The type and value of live value `i` of `vars`, or `None` when it
    /// is not an ordinary variable or its location cannot be read.
    pub fn get_type_and_value(
        &self,
        vars: &LabelVars,
        i: usize,
        base: &FrameBase,
        type_params: &[Option<TypeInfo>],
    ) -> Option<(TypeInfo, Word)> {
        let LiveType::Var(pseudo) = vars.types.get(i)? else {
            return None;
        };

        let type_info = resolve_pseudo(type_params, pseudo);
        let value = self.lookup_long_lval(vars.locn(i), base)?;

        Some((type_info, value))
    }

    /// The named variables live at `layout` in the frame described by
    /// `base`, sorted for display.
    pub fn live_vars(
        &self,
        layout: &LabelLayout,
        base: &FrameBase,
    ) -> Result<Vec<LiveVar>, IntrospectionError> {
        let entry = &layout.entry;

        if !entry.has_exec_trace() {
            return Err(IntrospectionError::NoDebugInfo);
        }

        let Some(vars) = &layout.vars else {
            return Err(IntrospectionError::NoVarInfo);
        };

        if vars.is_empty() {
            return Ok(vec![]);
        }

        let Some(var_nums) = &vars.var_nums else {
            return Err(IntrospectionError::NoVarNames);
        };

        let type_params = self.materialize_type_params(vars, base);
        let mut live = Vec::with_capacity(vars.len());

        for (i, &var_num) in var_nums.iter().enumerate().take(vars.len()) {
            if var_num == 0 {
                continue;
            }

            let name = match entry.var_name(var_num) {
                Some(name) => name,
                None => self.fatal(&format!("variable number {} out of range", var_num)),
            };

            if name.is_empty() || live_type_is_ignored(&vars.types[i]) {
                continue;
            }

            if let Some((type_info, value)) = self.get_type_and_value(vars, i, base, &type_params) {
                live.push(LiveVar::new(var_num, name, type_info, value));
            }
        }

        live.sort_by(compare_live_vars);
        live.dedup_by_key(|var| var.var_num);

        for i in 1..live.len() {
            if live[i].name == live[i - 1].name {
                live[i - 1].is_ambiguous = true;
                live[i].is_ambiguous = true;
            }
        }

        Ok(live)
    }

    /// The named variables live `level` frames up from the point described
    /// by `top` and `saved_regs`. Registers only describe the innermost
    /// frame, and not even that one after an exception.
    pub fn live_vars_at_level(
        &self,
        top: &Arc<LabelLayout>,
        saved_regs: &SavedRegisters,
        level: i32,
        port: TracePort,
    ) -> Result<Vec<LiveVar>, IntrospectionError> {
        let mut sp = saved_regs.sp;
        let mut curfr = saved_regs.curfr;

        let layout = self.find_nth_ancestor(top, level, &mut sp, &mut curfr)?;

        let saved_regs = if level == 0 && port != TracePort::Exception {
            Some(saved_regs)
        } else {
            None
        };

        self.live_vars(
            &layout,
            &FrameBase {
                saved_regs,
                sp,
                curfr,
            },
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::mock_engine::MockEngine;
    use crate::machine::HeapKind;

    fn traced_entry(names: &[&str]) -> Arc<ProcLayout> {
        let exec_trace = ExecTrace {
            module_name: "m".to_owned(),
            used_var_names: names.iter().map(|name| name.to_string()).collect(),
            max_var_num: names.len() as u16,
            ..ExecTrace::default()
        };

        Arc::new(
            ProcLayout::new(
                CodeAddr(0x5000),
                ProcId::user(PredOrFunc::Predicate, "m", "p", 2, 0),
                Determinism::Det,
                4,
                Some(LongLval::stackvar(4)),
            )
            .with_exec_trace(exec_trace),
        )
    }

    fn int_var() -> LiveType {
        LiveType::Var(PseudoTypeInfo::ground(&builtin::int()))
    }

    #[test]
    fn splits_numeric_suffixes() {
        assert_eq!(split_num_suffix("HeadVar__12"), ("HeadVar__".to_owned(), Some(12)));
        assert_eq!(split_num_suffix("Acc"), ("Acc".to_owned(), None));
    }

    #[test]
    #[should_panic(expected = "variable name starts with digit")]
    fn all_digit_names_are_fatal() {
        split_num_suffix("123");
    }

    #[test]
    fn reads_registers_and_slots() {
        let mut mock = MockEngine::new();
        mock.incr_sp(3);
        mock.set_stackvar(2, 77);
        mock.regs[5] = 55;

        let saved = mock.save_registers();
        let base = FrameBase::innermost(&saved);

        assert_eq!(mock.lookup_long_lval(LongLval::r_reg(5), &base), Some(55));
        assert_eq!(mock.lookup_long_lval(LongLval::stackvar(2), &base), Some(77));
        assert_eq!(mock.lookup_long_lval(LongLval::special(LvalKind::Sp), &base), Some(saved.sp));
        assert_eq!(mock.lookup_long_lval(LongLval::build_with(LvalKind::F, 1), &base), None);

        let without_regs = FrameBase {
            saved_regs: None,
            ..base
        };
        assert_eq!(mock.lookup_long_lval(LongLval::r_reg(5), &without_regs), None);

        let short = ShortLval::build_with(ShortLvalKind::Stackvar, 2);
        assert_eq!(mock.lookup_short_lval(short, &base), Some(77));
    }

    #[test]
    fn indirect_locations_index_a_block() {
        let mut mock = MockEngine::new();
        let block = mock.create_args(0, &[10, 20, 30]);
        mock.regs[2] = block;

        let saved = mock.save_registers();
        let locn = LongLval::indirect(LongLval::r_reg(2), 2);

        assert_eq!(mock.lookup_long_lval(locn, &FrameBase::innermost(&saved)), Some(30));
    }

    #[test]
    fn live_vars_are_named_filtered_and_sorted() {
        let mut mock = MockEngine::new();
        let entry = traced_entry(&["Y", "HeadVar__2", "", "X", "HeadVar__1", "TypeInfo_1"]);

        mock.regs[1] = int_to_word(1);
        mock.regs[2] = int_to_word(2);
        mock.regs[3] = int_to_word(3);
        mock.regs[4] = int_to_word(4);
        mock.regs[5] = int_to_word(5);
        mock.regs[6] = 0;

        let vars = LabelVars::new(
            vec![
                (int_var(), LongLval::r_reg(1)),
                (int_var(), LongLval::r_reg(2)),
                (int_var(), LongLval::r_reg(3)),
                (int_var(), LongLval::r_reg(4)),
                (int_var(), LongLval::r_reg(5)),
                (
                    LiveType::Var(PseudoTypeInfo::ground(&builtin::type_info())),
                    LongLval::r_reg(6),
                ),
                (LiveType::Succip, LongLval::stackvar(1)),
            ],
            vec![],
        )
        .with_var_nums(vec![1, 2, 3, 4, 5, 6, 0]);

        let layout = LabelLayout::new(entry).with_vars(vars);
        let saved = mock.save_registers();

        let live = mock.live_vars(&layout, &FrameBase::innermost(&saved)).unwrap();
        let names: Vec<&str> = live.iter().map(|var| var.name.as_str()).collect();

        assert_eq!(names, vec!["HeadVar__1", "HeadVar__2", "X", "Y"]);
        assert_eq!(word_to_int(live[0].value), 5);
        assert_eq!(live[3].type_info, builtin::int_type());
        assert!(live.iter().all(|var| !var.is_ambiguous));
    }

    #[test]
    fn repeated_names_are_ambiguous() {
        let mock = MockEngine::new();
        let entry = traced_entry(&["X", "X"]);
        let vars = LabelVars::new(
            vec![
                (int_var(), LongLval::r_reg(1)),
                (int_var(), LongLval::r_reg(2)),
            ],
            vec![],
        )
        .with_var_nums(vec![2, 1]);

        let layout = LabelLayout::new(entry).with_vars(vars);
        let saved = mock.save_registers();
        let live = mock.live_vars(&layout, &FrameBase::innermost(&saved)).unwrap();

        assert_eq!(live.len(), 2);
        assert_eq!(live[0].var_num, 1);
        assert!(live.iter().all(|var| var.is_ambiguous));
    }

    #[test]
    fn polymorphic_vars_use_materialized_params() {
        let mut mock = MockEngine::new();
        let entry = traced_entry(&["Elem", "Other"]);
        let ti_addr = mock.store_type_info(HeapKind::Heap, &builtin::string_type());

        mock.regs[1] = ti_addr;
        mock.regs[2] = mock.make_string("hi");
        mock.regs[3] = 9;

        let vars = LabelVars::new(
            vec![
                (LiveType::Var(PseudoTypeInfo::Var(1)), LongLval::r_reg(2)),
                (LiveType::Var(PseudoTypeInfo::Var(2)), LongLval::r_reg(3)),
            ],
            vec![],
        )
        .with_var_nums(vec![1, 2])
        .with_type_params(vec![Some(LongLval::r_reg(1)), None]);

        let layout = LabelLayout::new(entry).with_vars(vars);
        let saved = mock.save_registers();
        let live = mock.live_vars(&layout, &FrameBase::innermost(&saved)).unwrap();

        assert_eq!(live[0].name, "Elem");
        assert_eq!(live[0].type_info, builtin::string_type());
        assert_eq!(mock.read_string(live[0].value), "hi");
        assert_eq!(live[1].type_info, TypeInfo::ground(&builtin::void()));
    }

    #[test]
    fn missing_information_is_reported() {
        let mock = MockEngine::new();
        let saved = mock.save_registers();
        let base = FrameBase::innermost(&saved);

        let untraced = Arc::new(ProcLayout::new(
            CodeAddr(0x5100),
            ProcId::user(PredOrFunc::Function, "m", "f", 1, 0),
            Determinism::Det,
            1,
            Some(LongLval::stackvar(1)),
        ));
        let layout = LabelLayout::new(untraced);
        assert_eq!(mock.live_vars(&layout, &base).unwrap_err(), IntrospectionError::NoDebugInfo);

        let layout = LabelLayout::new(traced_entry(&["X"]));
        assert_eq!(mock.live_vars(&layout, &base).unwrap_err(), IntrospectionError::NoVarInfo);

        let vars = LabelVars::new(vec![(int_var(), LongLval::r_reg(1))], vec![]);
        let layout = LabelLayout::new(traced_entry(&["X"])).with_vars(vars);
        assert_eq!(mock.live_vars(&layout, &base).unwrap_err(), IntrospectionError::NoVarNames);

        let layout = LabelLayout::new(traced_entry(&["X"])).with_vars(LabelVars::new(vec![], vec![]));
        assert!(mock.live_vars(&layout, &base).unwrap().is_empty());
    }
}
