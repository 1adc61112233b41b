//! Process-wide tables mapping code addresses to label names and layouts.
//!
//! Loading a module inserts its labels; everything after that only looks
//! them up. Inserts are collected under a mutex and published as a fresh
//! immutable snapshot on the next lookup, so steady-state lookups never
//! take the lock.

use crate::layout::{LabelLayout, ProcLayout};
use crate::types::*;

use arcu::atomic::Arcu;
use arcu::epoch_counters::GlobalEpochCounterPool;
use arcu::Rcu;
use fxhash::FxHashMap;
use lazy_static::lazy_static;
use parking_lot::Mutex;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct Entry {
    pub addr: CodeAddr,
    pub name: String,
    pub layout: Option<Arc<ProcLayout>>,
}

#[derive(Debug, Clone)]
pub struct Internal {
    pub addr: CodeAddr,
    pub name: String,
    pub layout: Option<Arc<LabelLayout>>,
}

#[derive(Debug, Clone, Default)]
struct LabelTable {
    internals: FxHashMap<CodeAddr, Arc<Internal>>,
    // sorted by address
    entries: Vec<Arc<Entry>>,
}

#[derive(Debug, Default)]
struct PendingLabels {
    internals: Vec<Internal>,
    entries: Vec<Entry>,
}

pub struct LabelTables {
    published: Arcu<LabelTable, GlobalEpochCounterPool>,
    pending: Mutex<PendingLabels>,
    dirty: AtomicBool,
}

lazy_static! {
    static ref LABEL_TABLES: LabelTables = LabelTables::new();
}

impl LabelTables {
    fn new() -> Self {
        LabelTables {
            published: Arcu::new(LabelTable::default(), GlobalEpochCounterPool),
            pending: Mutex::new(PendingLabels::default()),
            dirty: AtomicBool::new(false),
        }
    }

    pub fn insert_entry_label(&self, name: &str, addr: CodeAddr, layout: Option<Arc<ProcLayout>>) {
        calldebug!("recording entry label {} at {}", name, addr);

        let mut pending = self.pending.lock();

        pending.entries.push(Entry {
            addr,
            name: name.to_owned(),
            layout,
        });

        self.dirty.store(true, Ordering::Release);
    }

    pub fn insert_internal_label(
        &self,
        name: &str,
        addr: CodeAddr,
        layout: Option<Arc<LabelLayout>>,
    ) {
        calldebug!("inserting internal label {} at {}", name, addr);

        let mut pending = self.pending.lock();

        pending.internals.push(Internal {
            addr,
            name: name.to_owned(),
            layout,
        });

        self.dirty.store(true, Ordering::Release);
    }

    fn publish(&self) {
        let mut pending = self.pending.lock();

        if !self.dirty.load(Ordering::Acquire) {
            return;
        }

        let mut table = LabelTable::clone(&self.published.read());

        for internal in pending.internals.drain(..) {
            // two labels at one address happen when the code between them
            // is empty; the first one inserted stays.
            table
                .internals
                .entry(internal.addr)
                .or_insert_with(|| Arc::new(internal));
        }

        if !pending.entries.is_empty() {
            table
                .entries
                .extend(pending.entries.drain(..).map(Arc::new));
            table.entries.sort_by_key(|entry| entry.addr);
        }

        self.published.replace(table);
        self.dirty.store(false, Ordering::Release);
    }

    #[inline]
    fn sync(&self) {
        if self.dirty.load(Ordering::Acquire) {
            self.publish();
        }
    }

    pub fn lookup_internal_by_addr(&self, addr: CodeAddr) -> Option<Arc<Internal>> {
        self.sync();
        self.published.read().internals.get(&addr).cloned()
    }

    pub fn lookup_entry_by_addr(&self, addr: CodeAddr) -> Option<Arc<Entry>> {
        self.sync();

        let table = self.published.read();

        table
            .entries
            .binary_search_by_key(&addr, |entry| entry.addr)
            .ok()
            .map(|index| table.entries[index].clone())
    }

    /// The entry label at or most closely preceding `addr`.
    pub fn prev_entry_by_addr(&self, addr: CodeAddr) -> Option<Arc<Entry>> {
        self.sync();

        let table = self.published.read();
        let index = table.entries.partition_point(|entry| entry.addr <= addr);

        if index == 0 {
            None
        } else {
            Some(table.entries[index - 1].clone())
        }
    }

    /// A printable name for any known label.
    pub fn label_name(&self, addr: CodeAddr) -> Option<String> {
        if let Some(internal) = self.lookup_internal_by_addr(addr) {
            return Some(internal.name.clone());
        }

        self.lookup_entry_by_addr(addr)
            .map(|entry| entry.name.clone())
    }
}

pub fn label_tables() -> &'static LabelTables {
    &LABEL_TABLES
}

pub fn insert_entry_label(name: &str, addr: CodeAddr, layout: Option<Arc<ProcLayout>>) {
    LABEL_TABLES.insert_entry_label(name, addr, layout)
}

pub fn insert_internal_label(name: &str, addr: CodeAddr, layout: Option<Arc<LabelLayout>>) {
    LABEL_TABLES.insert_internal_label(name, addr, layout)
}

pub fn lookup_internal_by_addr(addr: CodeAddr) -> Option<Arc<Internal>> {
    LABEL_TABLES.lookup_internal_by_addr(addr)
}

pub fn lookup_entry_by_addr(addr: CodeAddr) -> Option<Arc<Entry>> {
    LABEL_TABLES.lookup_entry_by_addr(addr)
}

pub fn prev_entry_by_addr(addr: CodeAddr) -> Option<Arc<Entry>> {
    LABEL_TABLES.prev_entry_by_addr(addr)
}

/// The label's name, or its address when it has none.
pub fn label_name(addr: CodeAddr) -> String {
    LABEL_TABLES
        .label_name(addr)
        .unwrap_or_else(|| addr.to_string())
}

/// The name of the procedure whose code contains `addr`.
pub fn entry_label_name(addr: CodeAddr) -> Option<String> {
    LABEL_TABLES
        .prev_entry_by_addr(addr)
        .map(|entry| entry.name.clone())
}
