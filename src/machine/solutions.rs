//! Collecting all the solutions of a nondeterministic closure.
//!
//! The closure runs in a nested dispatch loop above a frame whose redo
//! point is `SOLUTIONS_DONE`. Its continuation, `SOLUTIONS_COLLECT`, copies
//! each answer into the solutions heap and fails back into the closure for
//! the next one; when the closure runs out of answers, failure reaches the
//! frame and the loop ends. The answers are then copied back to the heap,
//! everything else the closure allocated having been reclaimed.

use crate::machine::labels::*;
use crate::machine::{Engine, HeapKind};
use crate::type_info::TypeInfo;
use crate::types::*;

#[derive(Debug)]
pub(crate) struct SolutionCollector {
    elem_type: TypeInfo,
    heap_mark: Addr,
    answers: Vec<Word>,
}

impl Engine {
    /// The list of the distinct solutions of `closure`, in the standard
    /// order. The closure takes no extra inputs and leaves its single
    /// output in r1.
    pub fn solutions(&mut self, closure: Word, elem_type: &TypeInfo) -> Word {
        self.solutions_impl(closure, elem_type, true)
    }

    /// The solutions of `closure` in the order they were found, duplicates
    /// included.
    pub fn unsorted_solutions(&mut self, closure: Word, elem_type: &TypeInfo) -> Word {
        self.solutions_impl(closure, elem_type, false)
    }

    fn solutions_impl(&mut self, closure: Word, elem_type: &TypeInfo, sort: bool) -> Word {
        let sol_mark = self.regs.sol_hp;
        let mut answers = self.collect_solutions(closure, elem_type);

        if self.is_unwinding() {
            self.regs.sol_hp = sol_mark;
            return self.list_nil();
        }

        if sort {
            answers.sort_by(|x, y| self.generic_compare(*x, *y, elem_type));
            answers.dedup_by(|x, y| self.generic_unify(*x, *y, elem_type));
        }

        let sol_hp = self.regs.sol_hp;

        let copies: Vec<Word> = answers
            .into_iter()
            .map(|answer| self.copy_value(HeapKind::Heap, answer, elem_type, sol_mark, sol_hp))
            .collect();

        self.regs.sol_hp = sol_mark;
        self.make_list(&copies)
    }

    fn collect_solutions(&mut self, closure: Word, elem_type: &TypeInfo) -> Vec<Word> {
        let saved = self.regs.save(3);

        self.collectors.push(SolutionCollector {
            elem_type: elem_type.clone(),
            heap_mark: self.regs.hp,
            answers: vec![],
        });

        self.mkframe(0, SOLUTIONS_DONE);

        self.regs[1] = closure;
        self.regs[2] = 0;
        self.regs[3] = 1;
        self.regs.succip = SOLUTIONS_COLLECT;

        self.run_nested(DO_CALL_CLOSURE);

        let answers = self
            .collectors
            .pop()
            .map(|collector| collector.answers)
            .unwrap_or_default();

        if !self.is_unwinding() {
            let sol_hp = self.regs.sol_hp;

            self.regs.restore(&saved);
            self.regs.sol_hp = sol_hp;
        }

        answers
    }

    /// `SOLUTIONS_COLLECT`: saves the answer in r1 and asks for another.
    pub(crate) fn solutions_collect(&mut self) -> CodeAddr {
        let Some(collector) = self.collectors.last() else {
            self.fatal("solution collected outside of any solutions call")
        };

        let elem_type = collector.elem_type.clone();
        let heap_mark = collector.heap_mark;
        let hp = self.regs.hp;
        let answer = self.regs[1];

        let copy = self.copy_value(HeapKind::SolutionsHeap, answer, &elem_type, heap_mark, hp);

        if let Some(collector) = self.collectors.last_mut() {
            collector.answers.push(copy);
        }

        DO_FAIL
    }

    /// `SOLUTIONS_DONE`: the closure has no more solutions.
    pub(crate) fn solutions_done(&mut self) -> CodeAddr {
        let fr = self.regs.maxfr;

        self.regs.maxfr = self.prevfr(fr);
        self.regs.curfr = self.succfr(fr);

        ENGINE_DONE
    }
}
