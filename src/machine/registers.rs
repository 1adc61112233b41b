use crate::types::*;

use std::ops::{Index, IndexMut};

pub const DEFAULT_NUM_REGISTERS: usize = 1024;

/// The abstract machine's registers. General registers are numbered from 1;
/// argument i of a call travels in register i.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    general: Vec<Word>,
    pub succip: CodeAddr,
    pub hp: Addr,
    pub sol_hp: Addr,
    pub global_hp: Addr,
    pub sp: Addr,
    pub curfr: Addr,
    pub maxfr: Addr,
}

impl RegisterFile {
    pub fn new(num_registers: usize) -> Self {
        RegisterFile {
            general: vec![0; num_registers + 1],
            succip: CodeAddr(0),
            hp: 0,
            sol_hp: 0,
            global_hp: 0,
            sp: 0,
            curfr: 0,
            maxfr: 0,
        }
    }

    #[inline]
    pub fn num_registers(&self) -> usize {
        self.general.len() - 1
    }

    /// Copies out the special registers and general registers `1..=max_r`.
    pub fn save(&self, max_r: usize) -> SavedRegisters {
        let max_r = max_r.min(self.num_registers());

        SavedRegisters {
            general: self.general[..=max_r].to_vec(),
            succip: self.succip,
            hp: self.hp,
            sol_hp: self.sol_hp,
            global_hp: self.global_hp,
            sp: self.sp,
            curfr: self.curfr,
            maxfr: self.maxfr,
        }
    }

    pub fn save_all(&self) -> SavedRegisters {
        self.save(self.num_registers())
    }

    pub fn restore(&mut self, saved: &SavedRegisters) {
        let n = saved.general.len().min(self.general.len());

        self.general[..n].copy_from_slice(&saved.general[..n]);
        self.restore_specials(saved);
    }

    /// Restores only the pointer registers, leaving the general registers
    /// (which may hold results) alone.
    pub fn restore_specials(&mut self, saved: &SavedRegisters) {
        self.succip = saved.succip;
        self.hp = saved.hp;
        self.sol_hp = saved.sol_hp;
        self.global_hp = saved.global_hp;
        self.sp = saved.sp;
        self.curfr = saved.curfr;
        self.maxfr = saved.maxfr;
    }
}

impl Index<usize> for RegisterFile {
    type Output = Word;

    #[inline]
    fn index(&self, n: usize) -> &Self::Output {
        if n == 0 || n >= self.general.len() {
            fatal!("register r{} out of range", n);
        }

        &self.general[n]
    }
}

impl IndexMut<usize> for RegisterFile {
    #[inline]
    fn index_mut(&mut self, n: usize) -> &mut Self::Output {
        if n == 0 || n >= self.general.len() {
            fatal!("register r{} out of range", n);
        }

        &mut self.general[n]
    }
}

/// A memory-resident copy of the register file, taken wherever control leaves
/// abstract machine code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SavedRegisters {
    general: Vec<Word>,
    pub succip: CodeAddr,
    pub hp: Addr,
    pub sol_hp: Addr,
    pub global_hp: Addr,
    pub sp: Addr,
    pub curfr: Addr,
    pub maxfr: Addr,
}

impl SavedRegisters {
    /// The saved value of `rn`, if it was saved.
    pub fn saved_reg(&self, n: usize) -> Option<Word> {
        if n == 0 {
            None
        } else {
            self.general.get(n).copied()
        }
    }

    pub fn set_saved_reg(&mut self, n: usize, value: Word) {
        if n > 0 {
            if n >= self.general.len() {
                self.general.resize(n + 1, 0);
            }

            self.general[n] = value;
        }
    }

    pub fn max_saved_reg(&self) -> usize {
        self.general.len().saturating_sub(1)
    }
}
