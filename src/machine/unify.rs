//! Generic unification and comparison, driven by typeinfos.
//!
//! Both operations walk two values in lockstep with a push-down list of
//! `(x, y, type)` triples. Arguments are pushed last to first, so the
//! leftmost difference decides a comparison. Types with user-defined
//! equality call out to their own predicates through a nested dispatch
//! loop.

use crate::machine::labels::*;
use crate::machine::{Engine, HeapKind};
use crate::type_info::*;
use crate::types::*;

use ordered_float::OrderedFloat;
use smallvec::SmallVec;

use std::cmp::Ordering;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum GenericOp {
    Unify,
    Compare,
}

impl GenericOp {
    fn verb(self) -> &'static str {
        match self {
            GenericOp::Unify => "unify",
            GenericOp::Compare => "compare",
        }
    }
}

/// The result word of a comparison predicate.
pub fn ordering_to_word(ordering: Ordering) -> Word {
    match ordering {
        Ordering::Equal => 0,
        Ordering::Less => 1,
        Ordering::Greater => 2,
    }
}

pub fn word_to_ordering(word: Word) -> Option<Ordering> {
    match word {
        0 => Some(Ordering::Equal),
        1 => Some(Ordering::Less),
        2 => Some(Ordering::Greater),
        _ => None,
    }
}

struct Comparer<'a> {
    engine: &'a mut Engine,
    op: GenericOp,
    pdl: SmallVec<[(Word, Word, TypeInfo); 16]>,
}

impl<'a> Comparer<'a> {
    fn new(engine: &'a mut Engine, op: GenericOp) -> Self {
        Comparer {
            engine,
            op,
            pdl: SmallVec::new(),
        }
    }

    fn run(mut self, x: Word, y: Word, type_info: &TypeInfo) -> Ordering {
        self.pdl.push((x, y, type_info.clone()));

        while let Some((x, y, type_info)) = self.pdl.pop() {
            let ordering = self.step(x, y, &type_info);

            if ordering != Ordering::Equal || self.engine.is_unwinding() {
                return ordering;
            }
        }

        Ordering::Equal
    }

    fn impossible(&self, what: &str) -> ! {
        self.engine
            .fatal(&format!("attempt to {} {}", self.op.verb(), what))
    }

    fn step(&mut self, x: Word, y: Word, type_info: &TypeInfo) -> Ordering {
        let type_info = collapse_equivalences(type_info);
        let ctor = type_info.ctor().clone();

        if ctor.rep().has_user_eq() {
            return self.call_user_pred(&ctor, &type_info, x, y);
        }

        match categorize_data(&ctor, x) {
            DataRepresentation::Enum | DataRepresentation::Char => x.cmp(&y),
            DataRepresentation::Int => word_to_int(x).cmp(&word_to_int(y)),
            DataRepresentation::Float => {
                OrderedFloat(word_to_float(x)).cmp(&OrderedFloat(word_to_float(y)))
            }
            DataRepresentation::String => {
                if x == y {
                    Ordering::Equal
                } else {
                    self.engine
                        .string_bytes(x)
                        .cmp(&self.engine.string_bytes(y))
                }
            }
            DataRepresentation::ComplicatedConst
            | DataRepresentation::Simple
            | DataRepresentation::Complicated => self.step_du(x, y, &type_info, &ctor),
            DataRepresentation::NoTag => match ctor.layout() {
                Some(TypeLayout::NoTag { arg_type, .. }) => {
                    self.pdl.push((x, y, create_type_info(&type_info, arg_type)));
                    Ordering::Equal
                }
                _ => self.impossible(&format!("terms of type {} which has no layout", type_info)),
            },
            DataRepresentation::Pred => self.impossible("higher-order terms"),
            DataRepresentation::Univ => {
                let x_type = self.engine.univ_type_info(x);
                let y_type = self.engine.univ_type_info(y);

                match compare_type_info(&x_type, &y_type) {
                    Ordering::Equal => {
                        let x_value = self.engine.univ_value(x);
                        let y_value = self.engine.univ_value(y);

                        self.pdl.push((x_value, y_value, x_type));
                        Ordering::Equal
                    }
                    ordering => ordering,
                }
            }
            DataRepresentation::Void => self.impossible("terms of type `void'"),
            DataRepresentation::Array => self.step_array(x, y, &type_info, &ctor),
            DataRepresentation::TypeInfo => {
                let x_type = self.engine.load_type_info(x);
                let y_type = self.engine.load_type_info(y);

                compare_type_info(&x_type, &y_type)
            }
            DataRepresentation::CPointer => x.cmp(&y),
            DataRepresentation::Tuple => {
                for (i, elem_type) in type_info.args().iter().enumerate().rev() {
                    let x_elem = self.engine.field(x, i);
                    let y_elem = self.engine.field(y, i);

                    self.pdl.push((x_elem, y_elem, elem_type.clone()));
                }

                Ordering::Equal
            }
            DataRepresentation::Equiv | DataRepresentation::EquivVar => {
                self.impossible(&format!("terms of type {} which has no layout", type_info))
            }
            DataRepresentation::Unknown => match ctor.rep() {
                TypeCtorRep::TypeClassInfo => self.impossible("typeclass_infos"),
                _ => self.impossible("terms of unknown type"),
            },
        }
    }

    fn step_du(&mut self, x: Word, y: Word, type_info: &TypeInfo, ctor: &TypeCtorInfo) -> Ordering {
        if x == y {
            return Ordering::Equal;
        }

        let (x_functor, x_args) = self.engine.deconstruct_du(ctor, x);
        let (y_functor, y_args) = self.engine.deconstruct_du(ctor, y);

        match x_functor.ordinal.cmp(&y_functor.ordinal) {
            Ordering::Equal => {}
            ordering => return ordering,
        }

        let num_extra = x_functor.num_extra_args();
        let mut exist: SmallVec<[TypeInfo; 2]> = SmallVec::new();

        for i in 0..num_extra as u64 {
            let x_type = self.engine.load_type_info(self.engine.read(x_args + i * WORD_SIZE));
            let y_type = self.engine.load_type_info(self.engine.read(y_args + i * WORD_SIZE));

            match compare_type_info(&x_type, &y_type) {
                Ordering::Equal => exist.push(x_type),
                ordering => return ordering,
            }
        }

        for (i, arg_type) in x_functor.arg_types.iter().enumerate().rev() {
            let offset = (num_extra + i) as u64 * WORD_SIZE;
            let x_arg = self.engine.read(x_args + offset);
            let y_arg = self.engine.read(y_args + offset);
            let arg_type = create_type_info_with_exist(type_info.args(), &exist, arg_type);

            self.pdl.push((x_arg, y_arg, arg_type));
        }

        Ordering::Equal
    }

    /// Arrays are ordered by size, then element by element.
    fn step_array(&mut self, x: Word, y: Word, type_info: &TypeInfo, ctor: &TypeCtorInfo) -> Ordering {
        let user_pred = match self.op {
            GenericOp::Unify => ctor.unify_pred().or(ctor.compare_pred()),
            GenericOp::Compare => ctor.compare_pred(),
        };

        if user_pred.is_some() {
            return self.call_user_pred(ctor, type_info, x, y);
        }

        let size = self.engine.array_size(x);

        match size.cmp(&self.engine.array_size(y)) {
            Ordering::Equal => {}
            ordering => return ordering,
        }

        let elem_type = type_info.arg(1);

        for i in (0..size).rev() {
            let x_elem = self.engine.array_elem(x, i);
            let y_elem = self.engine.array_elem(y, i);

            self.pdl.push((x_elem, y_elem, elem_type.clone()));
        }

        Ordering::Equal
    }

    /// A unification predicate that succeeds counts as `Equal` and one that
    /// fails as `Less`; only equality matters to `generic_unify`.
    fn call_user_pred(&mut self, ctor: &TypeCtorInfo, type_info: &TypeInfo, x: Word, y: Word) -> Ordering {
        let (pred, returns_ordering) = match (self.op, ctor.unify_pred(), ctor.compare_pred()) {
            (GenericOp::Unify, Some(pred), _) => (pred, false),
            (_, _, Some(pred)) => (pred, true),
            _ => self.engine.fatal(&format!(
                "type {} has user-defined equality but no {} predicate",
                type_info,
                self.op.verb()
            )),
        };

        let result = self.engine.call_user_pred(pred, type_info, x, y);

        if self.engine.is_unwinding() {
            return Ordering::Equal;
        }

        if returns_ordering {
            match word_to_ordering(result) {
                Some(ordering) => ordering,
                None => self.engine.fatal(&format!(
                    "comparison predicate for {} returned {}",
                    type_info, result
                )),
            }
        } else if result != 0 {
            Ordering::Equal
        } else {
            Ordering::Less
        }
    }
}

impl Engine {
    /// True if `x` and `y`, both of type `type_info`, are equal.
    pub fn generic_unify(&mut self, x: Word, y: Word, type_info: &TypeInfo) -> bool {
        Comparer::new(self, GenericOp::Unify).run(x, y, type_info) == Ordering::Equal
    }

    /// The standard order on values of type `type_info`.
    pub fn generic_compare(&mut self, x: Word, y: Word, type_info: &TypeInfo) -> Ordering {
        Comparer::new(self, GenericOp::Compare).run(x, y, type_info)
    }

    /// Calls a type-specific unification or comparison predicate with the
    /// type's parameters in the first registers, followed by `x` and `y`,
    /// and returns what it leaves in r1.
    pub(crate) fn call_user_pred(&mut self, pred: CodeAddr, type_info: &TypeInfo, x: Word, y: Word) -> Word {
        let num_params = type_info.args().len();
        let saved = self.regs.save(num_params + 2);

        for (i, param) in type_info.args().iter().enumerate() {
            let addr = self.store_type_info(HeapKind::Heap, param);
            self.regs[1 + i] = addr;
        }

        self.regs[num_params + 1] = x;
        self.regs[num_params + 2] = y;
        self.regs.succip = ENGINE_DONE;

        calldebug!(
            "engine {}: calling user equality {} on {}",
            self.id(),
            crate::label::label_name(pred),
            type_info
        );

        self.run_nested(pred);

        let result = self.regs[1];

        if !self.is_unwinding() {
            self.regs.restore(&saved);
        }

        result
    }

    /// `GENERIC_UNIFY`: r1 holds a typeinfo, r2 and r3 the values. Leaves
    /// the truth of their equality in r1.
    pub(crate) fn generic_unify_entry(&mut self) -> CodeAddr {
        let type_info = self.load_type_info(self.regs[1]);
        let (x, y) = (self.regs[2], self.regs[3]);
        let succip = self.regs.succip;

        let equal = self.generic_unify(x, y, &type_info);

        self.regs[1] = bool_to_word(equal);
        self.regs.succip = succip;

        succip
    }

    /// `GENERIC_COMPARE`: like `GENERIC_UNIFY`, leaving 0 for `=`, 1 for `<`
    /// and 2 for `>` in r1.
    pub(crate) fn generic_compare_entry(&mut self) -> CodeAddr {
        let type_info = self.load_type_info(self.regs[1]);
        let (x, y) = (self.regs[2], self.regs[3]);
        let succip = self.regs.succip;

        let ordering = self.generic_compare(x, y, &type_info);

        self.regs[1] = ordering_to_word(ordering);
        self.regs.succip = succip;

        succip
    }
}
