use scryer_modular_bitfield::prelude::*;

use std::fmt;

/// A machine word. Integers, tagged pointers, unboxed floats and raw bit
/// patterns all live in one of these, told apart only by context.
pub type Word = u64;

/// A byte address in the engine's word-addressed memory.
pub type Addr = u64;

pub const WORD_SIZE: u64 = 8;
pub const TAG_BITS: u32 = 3;
pub const NUM_PTAGS: usize = 1 << TAG_BITS;
pub const TAG_MASK: Word = (1 << TAG_BITS) - 1;

const_assert!(WORD_SIZE == std::mem::size_of::<Word>() as u64);
const_assert!(1 << TAG_BITS == WORD_SIZE);

#[bitfield]
#[repr(u64)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct TaggedWord {
    ptag: B3,
    body: B61,
}

impl TaggedWord {
    #[inline(always)]
    pub fn build_with(ptag: u8, addr: Addr) -> Self {
        TaggedWord::new()
            .with_ptag(ptag & TAG_MASK as u8)
            .with_body(addr >> TAG_BITS)
    }

    #[inline(always)]
    pub fn get_ptag(self) -> u8 {
        self.ptag()
    }

    /// The untagged pointer, or the untagged body shifted back into place.
    #[inline(always)]
    pub fn get_addr(self) -> Addr {
        self.body() << TAG_BITS
    }

    #[inline(always)]
    pub fn get_body(self) -> u64 {
        self.body()
    }
}

#[inline(always)]
pub fn mkword(ptag: u8, body: Word) -> Word {
    debug_assert_eq!(body & TAG_MASK, 0);
    u64::from(TaggedWord::build_with(ptag, body))
}

#[inline(always)]
pub fn tag(w: Word) -> u8 {
    TaggedWord::from(w).get_ptag()
}

#[inline(always)]
pub fn body(w: Word, ptag: u8) -> Word {
    w.wrapping_sub(ptag as Word)
}

#[inline(always)]
pub fn strip_tag(w: Word) -> Addr {
    TaggedWord::from(w).get_addr()
}

#[inline(always)]
pub fn mkbody(i: u64) -> Word {
    i << TAG_BITS
}

#[inline(always)]
pub fn unmkbody(w: Word) -> u64 {
    TaggedWord::from(w).get_body()
}

#[inline(always)]
pub fn int_to_word(i: i64) -> Word {
    i as Word
}

#[inline(always)]
pub fn word_to_int(w: Word) -> i64 {
    w as i64
}

#[inline(always)]
pub fn float_to_word(f: f64) -> Word {
    f.to_bits()
}

#[inline(always)]
pub fn word_to_float(w: Word) -> f64 {
    f64::from_bits(w)
}

#[inline(always)]
pub fn char_to_word(c: char) -> Word {
    c as Word
}

#[inline(always)]
pub fn word_to_char(w: Word) -> Option<char> {
    u32::try_from(w).ok().and_then(char::from_u32)
}

#[inline(always)]
pub fn bool_to_word(b: bool) -> Word {
    b as Word
}

/// A code address. Labels are word aligned and never zero, so a code
/// address stored in a frame slot is indistinguishable from any other word.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CodeAddr(pub u64);

impl CodeAddr {
    #[inline(always)]
    pub fn as_word(self) -> Word {
        self.0
    }

    #[inline(always)]
    pub fn from_word(w: Word) -> Self {
        CodeAddr(w)
    }
}

impl fmt::Display for CodeAddr {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

#[inline]
pub fn round_up(n: u64, unit: u64) -> u64 {
    n.div_ceil(unit) * unit
}
