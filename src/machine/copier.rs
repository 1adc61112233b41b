use crate::machine::heap::{load_type_info, store_type_info};
use crate::machine::{Engine, HeapKind};
use crate::type_info::*;
use crate::types::*;

use fxhash::FxHashMap;
use smallvec::SmallVec;

/// Somewhere a deep copy can allocate blocks and read its source.
pub trait CopyTarget {
    fn alloc(&mut self, num_words: usize) -> Addr;
    fn read(&self, addr: Addr) -> Word;
    fn write(&mut self, addr: Addr, value: Word);
}

/// Copies into one of an engine's heaps.
pub struct HeapTarget<'a> {
    engine: &'a mut Engine,
    kind: HeapKind,
}

impl<'a> HeapTarget<'a> {
    pub fn new(engine: &'a mut Engine, kind: HeapKind) -> Self {
        HeapTarget { engine, kind }
    }
}

impl CopyTarget for HeapTarget<'_> {
    #[inline]
    fn alloc(&mut self, num_words: usize) -> Addr {
        self.engine.alloc(self.kind, num_words)
    }

    #[inline]
    fn read(&self, addr: Addr) -> Word {
        self.engine.read(addr)
    }

    #[inline]
    fn write(&mut self, addr: Addr, value: Word) {
        self.engine.write(addr, value)
    }
}

#[derive(Debug, Clone, Copy)]
enum Dest {
    Root,
    Slot(Addr),
}

/// Copies `data`, of type `type_info`, into `target`. Only blocks lying in
/// `[lower, upper)` are copied; anything outside that range is shared with
/// the original. A block reached twice is copied once, so sharing inside
/// the copied region survives the copy.
pub fn deep_copy<T: CopyTarget>(
    target: &mut T,
    data: Word,
    type_info: &TypeInfo,
    lower: Addr,
    upper: Addr,
) -> Word {
    let mut state = CopyState::new(target, lower, upper);

    state.copy_value(Dest::Root, data, type_info.clone());

    while let Some((dest, data, type_info)) = state.pending.pop() {
        state.copy_value(dest, data, type_info);
    }

    state.root
}

struct CopyState<'a, T: CopyTarget> {
    target: &'a mut T,
    lower: Addr,
    upper: Addr,
    forwarded: FxHashMap<Addr, Word>,
    pending: SmallVec<[(Dest, Word, TypeInfo); 16]>,
    root: Word,
}

impl<'a, T: CopyTarget> CopyState<'a, T> {
    fn new(target: &'a mut T, lower: Addr, upper: Addr) -> Self {
        CopyState {
            target,
            lower,
            upper,
            forwarded: FxHashMap::default(),
            pending: SmallVec::new(),
            root: 0,
        }
    }

    #[inline]
    fn in_range(&self, addr: Addr) -> bool {
        self.lower <= addr && addr < self.upper
    }

    fn put(&mut self, dest: Dest, value: Word) {
        match dest {
            Dest::Root => self.root = value,
            Dest::Slot(addr) => self.target.write(addr, value),
        }
    }

    /// Resolves `data` against the forwarding table and the copy range.
    /// Returns the block to copy when there is one.
    fn claim(&mut self, dest: Dest, data: Word) -> Option<Addr> {
        let addr = strip_tag(data);

        if !self.in_range(addr) {
            self.put(dest, data);
            return None;
        }

        if let Some(copy) = self.forwarded.get(&addr).copied() {
            self.put(dest, copy);
            return None;
        }

        Some(addr)
    }

    /// Allocates the copy of the block at `addr`, records the forwarding
    /// entry and stores the new tagged word at `dest`.
    fn forward(&mut self, dest: Dest, addr: Addr, ptag: u8, num_words: usize) -> Addr {
        let block = self.target.alloc(num_words.max(1));
        let copy = mkword(ptag, block);

        self.forwarded.insert(addr, copy);
        self.put(dest, copy);

        block
    }

    fn copy_words(&mut self, from: Addr, to: Addr, num_words: usize) {
        for i in 0..num_words as u64 {
            let word = self.target.read(from + i * WORD_SIZE);
            self.target.write(to + i * WORD_SIZE, word);
        }
    }

    fn read_type_info(&self, addr: Addr) -> TypeInfo {
        load_type_info(&|addr| self.target.read(addr), addr)
    }

    /// A typeinfo block gets a fresh copy when it lies in the copy range.
    fn copy_type_info_block(&mut self, addr: Addr) -> (Addr, TypeInfo) {
        let type_info = self.read_type_info(addr);

        if !self.in_range(addr) {
            return (addr, type_info);
        }

        if let Some(copy) = self.forwarded.get(&addr).copied() {
            return (copy, type_info);
        }

        let copy = store_type_info(&mut *self.target, &type_info);
        self.forwarded.insert(addr, copy);

        (copy, type_info)
    }

    fn copy_value(&mut self, dest: Dest, data: Word, type_info: TypeInfo) {
        let type_info = collapse_equivalences(&type_info);
        let ctor = type_info.ctor().clone();

        match categorize_data(&ctor, data) {
            DataRepresentation::Enum
            | DataRepresentation::ComplicatedConst
            | DataRepresentation::Int
            | DataRepresentation::Char
            | DataRepresentation::Float => self.put(dest, data),
            DataRepresentation::Simple | DataRepresentation::Complicated => {
                self.copy_du(dest, data, &type_info, &ctor)
            }
            DataRepresentation::NoTag => match ctor.layout() {
                Some(TypeLayout::NoTag { arg_type, .. }) => {
                    let arg_type = create_type_info(&type_info, arg_type);
                    self.pending.push((dest, data, arg_type));
                }
                _ => fatal!("notag type {} has no layout", type_info),
            },
            DataRepresentation::Equiv | DataRepresentation::EquivVar => {
                fatal!("equivalence type {} has no layout", type_info)
            }
            DataRepresentation::String => {
                if let Some(addr) = self.claim(dest, data) {
                    let len = self.target.read(addr);
                    let num_words = 1 + (len as usize).div_ceil(WORD_SIZE as usize);
                    let block = self.forward(dest, addr, 0, num_words);

                    self.copy_words(addr, block, num_words);
                }
            }
            DataRepresentation::Pred => {
                if let Some(addr) = self.claim(dest, data) {
                    let num_args = self.target.read(addr) as usize;

                    if num_args > type_info.args().len() {
                        fatal!(
                            "closure captures {} arguments but its type {} describes {}",
                            num_args,
                            type_info,
                            type_info.args().len()
                        );
                    }

                    let block = self.forward(dest, addr, tag(data), 2 + num_args);

                    self.copy_words(addr, block, 2);

                    for (i, arg_type) in type_info.args()[..num_args].iter().enumerate() {
                        let offset = (2 + i as u64) * WORD_SIZE;
                        let arg = self.target.read(addr + offset);

                        self.pending
                            .push((Dest::Slot(block + offset), arg, arg_type.clone()));
                    }
                }
            }
            DataRepresentation::Univ => {
                if let Some(addr) = self.claim(dest, data) {
                    let block = self.forward(dest, addr, tag(data), 2);
                    let type_info_addr = self.target.read(addr);
                    let (type_info_addr, value_type) = self.copy_type_info_block(type_info_addr);

                    self.target.write(block, type_info_addr);

                    let value = self.target.read(addr + WORD_SIZE);
                    self.pending
                        .push((Dest::Slot(block + WORD_SIZE), value, value_type));
                }
            }
            DataRepresentation::Void => fatal!("cannot copy a void type"),
            DataRepresentation::Array => {
                if let Some(addr) = self.claim(dest, data) {
                    let size = self.target.read(addr) as usize;
                    let block = self.forward(dest, addr, tag(data), 1 + size);
                    let elem_type = type_info.arg(1).clone();

                    self.target.write(block, size as Word);

                    for i in 0..size as u64 {
                        let offset = (1 + i) * WORD_SIZE;
                        let elem = self.target.read(addr + offset);

                        self.pending
                            .push((Dest::Slot(block + offset), elem, elem_type.clone()));
                    }
                }
            }
            DataRepresentation::TypeInfo => {
                let (copy, _) = self.copy_type_info_block(strip_tag(data));
                self.put(dest, copy);
            }
            DataRepresentation::CPointer => {
                if self.in_range(strip_tag(data)) {
                    fatal!("cannot copy a c_pointer type that points into the copied region");
                }

                self.put(dest, data);
            }
            DataRepresentation::Tuple => {
                if let Some(addr) = self.claim(dest, data) {
                    let arity = type_info.args().len();
                    let block = self.forward(dest, addr, tag(data), arity);

                    for (i, elem_type) in type_info.args().iter().enumerate() {
                        let offset = i as u64 * WORD_SIZE;
                        let elem = self.target.read(addr + offset);

                        self.pending
                            .push((Dest::Slot(block + offset), elem, elem_type.clone()));
                    }
                }
            }
            DataRepresentation::Unknown => {
                fatal!("cannot copy a value of unknown representation (type {})", type_info)
            }
        }
    }

    fn copy_du(&mut self, dest: Dest, data: Word, type_info: &TypeInfo, ctor: &TypeCtorInfo) {
        let Some(addr) = self.claim(dest, data) else {
            return;
        };

        let ptag = tag(data);

        let (functor, header) = match ctor.ptag_layout(ptag) {
            Some(layout) => match layout.sectag_locn {
                SectagLocn::Remote => {
                    let sectag = self.target.read(addr) as usize;
                    (layout.alternatives.get(sectag).cloned(), 1)
                }
                _ => (layout.alternatives.first().cloned(), 0),
            },
            None => (None, 0),
        };

        let Some(functor) = functor else {
            fatal!("value {:#x} does not match any functor of {}", data, type_info)
        };

        let num_extra = functor.num_extra_args();
        let block = self.forward(dest, addr, ptag, header + num_extra + functor.arity());

        if header == 1 {
            self.target.write(block, functor.sectag);
        }

        let mut exist: SmallVec<[TypeInfo; 2]> = SmallVec::new();

        for i in 0..num_extra as u64 {
            let offset = (header as u64 + i) * WORD_SIZE;
            let exist_addr = self.target.read(addr + offset);
            let (copy, exist_type) = self.copy_type_info_block(exist_addr);

            self.target.write(block + offset, copy);
            exist.push(exist_type);
        }

        for (i, arg_type) in functor.arg_types.iter().enumerate() {
            let offset = (header + num_extra + i) as u64 * WORD_SIZE;
            let arg = self.target.read(addr + offset);
            let arg_type = create_type_info_with_exist(type_info.args(), &exist, arg_type);

            self.pending.push((Dest::Slot(block + offset), arg, arg_type));
        }
    }
}

impl Engine {
    /// Deep-copies `data` into the given heap, copying only the parts that
    /// lie in `[lower, upper)`.
    pub fn copy_value(
        &mut self,
        kind: HeapKind,
        data: Word,
        type_info: &TypeInfo,
        lower: Addr,
        upper: Addr,
    ) -> Word {
        deep_copy(&mut HeapTarget::new(self, kind), data, type_info, lower, upper)
    }
}
