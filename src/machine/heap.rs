//! Building and taking apart values on the heaps.
//!
//! Boxed values are blocks of words addressed by an aligned pointer:
//!
//! - strings: `[length in bytes, bytes packed eight to a word...]`
//! - univs: `[typeinfo, value]`
//! - closures: `[number of captured args, code address, args...]`
//! - arrays: `[size, elements...]`
//! - tuples: `[elements...]`
//! - typeinfos: `[ctor id, (arity of variable-arity ctors), arg typeinfos...]`
//!
//! Discriminated union values are tagged words. A constant is its primary
//! tag over its secondary tag; any other functor points at its arguments,
//! preceded by the secondary tag when that is remote and by the typeinfos of
//! its existentially typed variables.

use crate::machine::copier::{CopyTarget, HeapTarget};
use crate::machine::{Engine, HeapKind};
use crate::type_info::*;
use crate::type_tables;
use crate::types::*;

use smallvec::SmallVec;

use std::sync::Arc;

/// Writes `type_info` and the typeinfos of its arguments through `target`,
/// returning the address of the outermost block.
pub fn store_type_info<T: CopyTarget + ?Sized>(target: &mut T, type_info: &TypeInfo) -> Addr {
    let ctor = type_info.ctor();

    let args: SmallVec<[Addr; 4]> = type_info
        .args()
        .iter()
        .map(|arg| store_type_info(target, arg))
        .collect();

    let header = if ctor.rep().is_variable_arity() { 2 } else { 1 };
    let block = target.alloc(header + args.len());

    target.write(block, ctor.id());

    if header == 2 {
        target.write(block + WORD_SIZE, args.len() as Word);
    }

    for (i, arg) in args.iter().enumerate() {
        target.write(block + (header + i) as u64 * WORD_SIZE, *arg);
    }

    block
}

/// Reads back a typeinfo block written by `store_type_info`.
pub fn load_type_info<F>(read: &F, addr: Addr) -> TypeInfo
where
    F: Fn(Addr) -> Word,
{
    let id = read(addr);

    let ctor = match type_tables::lookup_type_ctor_info_by_id(id) {
        Some(ctor) => ctor,
        None => fatal!("typeinfo at {:#x} names unknown type constructor {}", addr, id),
    };

    let (arity, first) = if ctor.rep().is_variable_arity() {
        (read(addr + WORD_SIZE) as u64, 2)
    } else {
        (ctor.arity() as u64, 1)
    };

    let args = (0..arity)
        .map(|i| load_type_info(read, read(addr + (first + i) * WORD_SIZE)))
        .collect();

    TypeInfo::new(&ctor, args)
}

fn string_block_words(len: usize) -> usize {
    1 + len.div_ceil(WORD_SIZE as usize)
}

impl Engine {
    /// Reserves `num_words` words in the given heap. The words are not
    /// initialized.
    pub fn alloc(&mut self, kind: HeapKind, num_words: usize) -> Addr {
        let size = num_words as u64 * WORD_SIZE;
        let addr = *self.heap_ptr_mut(kind);
        let zone = self.heap_zone(kind);

        if addr + size > zone.hardmax() {
            let message = format!(
                "memory zone {}#{} overflowed (allocating {} words at {:#x})",
                zone.name(),
                zone.id(),
                num_words,
                addr
            );

            self.fatal(&message);
        }

        *self.heap_ptr_mut(kind) = addr + size;

        if crate::trace_base::debug_flag(crate::trace_base::DebugFlag::Heap) {
            log::trace!("engine {}: {:?} alloc {} words at {:#x}", self.id(), kind, num_words, addr);
        }

        addr
    }

    /// The allocation pointer register of the given heap.
    pub fn heap_ptr_mut(&mut self, kind: HeapKind) -> &mut Addr {
        match kind {
            HeapKind::Heap => &mut self.regs.hp,
            HeapKind::SolutionsHeap => &mut self.regs.sol_hp,
            HeapKind::GlobalHeap => &mut self.regs.global_hp,
        }
    }

    #[inline]
    pub fn incr_hp(&mut self, num_words: usize) -> Addr {
        self.alloc(HeapKind::Heap, num_words)
    }

    /// Allocates a block holding `args` and returns a pointer to it tagged
    /// with `ptag`.
    pub fn create_args(&mut self, ptag: u8, args: &[Word]) -> Word {
        let block = self.incr_hp(args.len().max(1));

        for (i, arg) in args.iter().enumerate() {
            self.write(block + i as u64 * WORD_SIZE, *arg);
        }

        mkword(ptag, block)
    }

    /// Word `i` (from 0) of the block `word` points at.
    #[inline]
    pub fn field(&self, word: Word, i: usize) -> Word {
        self.read(strip_tag(word) + i as u64 * WORD_SIZE)
    }

    #[inline]
    pub fn set_field(&mut self, word: Word, i: usize, value: Word) {
        self.write(strip_tag(word) + i as u64 * WORD_SIZE, value);
    }

    pub fn make_string(&mut self, s: &str) -> Word {
        self.make_string_in(HeapKind::Heap, s)
    }

    pub fn make_string_in(&mut self, kind: HeapKind, s: &str) -> Word {
        let bytes = s.as_bytes();
        let block = self.alloc(kind, string_block_words(bytes.len()));

        self.write(block, bytes.len() as Word);

        for (i, chunk) in bytes.chunks(WORD_SIZE as usize).enumerate() {
            let mut packed = [0u8; WORD_SIZE as usize];
            packed[..chunk.len()].copy_from_slice(chunk);

            self.write(block + (i as u64 + 1) * WORD_SIZE, Word::from_le_bytes(packed));
        }

        block
    }

    pub fn string_len(&self, s: Word) -> usize {
        self.read(s) as usize
    }

    pub fn string_bytes(&self, s: Word) -> Vec<u8> {
        let len = self.string_len(s);
        let mut bytes = Vec::with_capacity(len);

        for i in 0..len.div_ceil(WORD_SIZE as usize) {
            let word = self.read(s + (i as u64 + 1) * WORD_SIZE);
            bytes.extend_from_slice(&word.to_le_bytes());
        }

        bytes.truncate(len);
        bytes
    }

    pub fn read_string(&self, s: Word) -> String {
        String::from_utf8_lossy(&self.string_bytes(s)).into_owned()
    }

    /// Number of words in the string block at `s`.
    pub(crate) fn string_block_size(&self, s: Word) -> usize {
        string_block_words(self.string_len(s))
    }

    pub fn store_type_info(&mut self, kind: HeapKind, type_info: &TypeInfo) -> Addr {
        store_type_info(&mut HeapTarget::new(self, kind), type_info)
    }

    pub fn load_type_info(&self, addr: Addr) -> TypeInfo {
        load_type_info(&|addr| self.read(addr), addr)
    }

    pub fn make_univ(&mut self, type_info: &TypeInfo, value: Word) -> Word {
        let type_info = self.store_type_info(HeapKind::Heap, type_info);
        self.create_args(0, &[type_info, value])
    }

    pub fn univ_type_info(&self, univ: Word) -> TypeInfo {
        self.load_type_info(self.field(univ, 0))
    }

    pub fn univ_value(&self, univ: Word) -> Word {
        self.field(univ, 1)
    }

    /// A closure capturing `args`, to be called with them in the first
    /// argument registers.
    pub fn make_closure(&mut self, code: CodeAddr, args: &[Word]) -> Word {
        let block = self.incr_hp(2 + args.len());

        self.write(block, args.len() as Word);
        self.write(block + WORD_SIZE, code.as_word());

        for (i, arg) in args.iter().enumerate() {
            self.write(block + (2 + i as u64) * WORD_SIZE, *arg);
        }

        block
    }

    pub fn closure_num_args(&self, closure: Word) -> usize {
        self.field(closure, 0) as usize
    }

    pub fn closure_code(&self, closure: Word) -> CodeAddr {
        CodeAddr::from_word(self.field(closure, 1))
    }

    /// Captured argument `i`, from 0.
    pub fn closure_arg(&self, closure: Word, i: usize) -> Word {
        self.field(closure, 2 + i)
    }

    /// Calls the closure in r1. r2 holds the number of extra inputs, which
    /// start at r4, and r3 the number of outputs. The callee finds the
    /// captured arguments in r1 onwards, followed by the extra inputs, and
    /// leaves its outputs in r1 onwards.
    pub(crate) fn do_call_closure(&mut self) -> CodeAddr {
        let closure = self.regs[1];
        let num_extra = self.regs[2] as usize;
        let num_captured = self.closure_num_args(closure);

        let extra: SmallVec<[Word; 8]> = (0..num_extra).map(|i| self.regs[4 + i]).collect();

        for i in 0..num_captured {
            self.regs[1 + i] = self.closure_arg(closure, i);
        }

        for (i, word) in extra.into_iter().enumerate() {
            self.regs[1 + num_captured + i] = word;
        }

        let code = self.closure_code(closure);

        calldebug!(
            "engine {}: calling closure {} with {} captured and {} extra args",
            self.id(),
            crate::label::label_name(code),
            num_captured,
            num_extra
        );

        code
    }

    pub fn make_array(&mut self, elems: &[Word]) -> Word {
        let block = self.incr_hp(1 + elems.len());

        self.write(block, elems.len() as Word);

        for (i, elem) in elems.iter().enumerate() {
            self.write(block + (1 + i as u64) * WORD_SIZE, *elem);
        }

        block
    }

    pub fn array_size(&self, array: Word) -> usize {
        self.field(array, 0) as usize
    }

    pub fn array_elem(&self, array: Word, i: usize) -> Word {
        if i >= self.array_size(array) {
            self.fatal(&format!("array index {} out of bounds", i));
        }

        self.field(array, 1 + i)
    }

    pub fn set_array_elem(&mut self, array: Word, i: usize, value: Word) {
        if i >= self.array_size(array) {
            self.fatal(&format!("array index {} out of bounds", i));
        }

        self.set_field(array, 1 + i, value);
    }

    pub fn make_tuple(&mut self, elems: &[Word]) -> Word {
        self.create_args(0, elems)
    }

    #[inline]
    pub fn list_nil(&self) -> Word {
        mkword(0, mkbody(0))
    }

    #[inline]
    pub fn is_nil(&self, list: Word) -> bool {
        list == self.list_nil()
    }

    pub fn list_cons(&mut self, head: Word, tail: Word) -> Word {
        self.create_args(1, &[head, tail])
    }

    pub fn list_head(&self, list: Word) -> Word {
        self.field(list, 0)
    }

    pub fn list_tail(&self, list: Word) -> Word {
        self.field(list, 1)
    }

    pub fn make_list(&mut self, elems: &[Word]) -> Word {
        let mut list = self.list_nil();

        for elem in elems.iter().rev() {
            list = self.list_cons(*elem, list);
        }

        list
    }

    pub fn list_to_vec(&self, mut list: Word) -> Vec<Word> {
        let mut elems = vec![];

        while !self.is_nil(list) {
            elems.push(self.list_head(list));
            list = self.list_tail(list);
        }

        elems
    }

    /// Builds a value of a discriminated union. `args` starts with the
    /// typeinfo addresses of the functor's existential type variables.
    pub fn construct_functor(&mut self, functor: &DuFunctorDesc, args: &[Word]) -> Word {
        let expected = functor.num_extra_args() + functor.arity();

        if args.len() != expected {
            self.fatal(&format!(
                "functor {}/{} built with {} words instead of {}",
                functor.name,
                functor.arity(),
                args.len(),
                expected
            ));
        }

        match functor.sectag_locn {
            SectagLocn::Local => mkword(functor.ptag, mkbody(functor.sectag)),
            SectagLocn::None => self.create_args(functor.ptag, args),
            SectagLocn::Remote => {
                let mut block: SmallVec<[Word; 8]> = SmallVec::with_capacity(1 + args.len());

                block.push(functor.sectag);
                block.extend_from_slice(args);

                self.create_args(functor.ptag, &block)
            }
        }
    }

    /// Finds the functor of a discriminated union value and the address of
    /// its first argument word (past any remote secondary tag).
    pub fn deconstruct_du(&self, ctor: &TypeCtorInfo, data: Word) -> (Arc<DuFunctorDesc>, Addr) {
        let ptag = tag(data);

        let layout = match ctor.ptag_layout(ptag) {
            Some(layout) => layout,
            None => self.fatal(&format!(
                "value {:#x} has primary tag {} unused by type {}.{}",
                data,
                ptag,
                ctor.module_name(),
                ctor.type_name()
            )),
        };

        let (sectag, args) = match layout.sectag_locn {
            SectagLocn::None => (0, strip_tag(data)),
            SectagLocn::Local => (unmkbody(data), 0),
            SectagLocn::Remote => (self.read(strip_tag(data)), strip_tag(data) + WORD_SIZE),
        };

        match layout.alternatives.get(sectag as usize) {
            Some(functor) => (functor.clone(), args),
            None => self.fatal(&format!(
                "secondary tag {} out of range for type {}.{}",
                sectag,
                ctor.module_name(),
                ctor.type_name()
            )),
        }
    }
}
