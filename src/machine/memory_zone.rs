//! Bounds-checked memory regions backing every stack and heap.
//!
//! Zones live in one process-wide word-addressed space: each zone is handed
//! a disjoint, page-aligned address range, so a raw word is enough to tell
//! which zone (if any) it points into. The last part of each zone, from
//! `redzone` up, is a guard region. Stores there are routed to the zone's
//! handler exactly as a protection fault on a guard page would be; the
//! default handler grows the usable region a page at a time until `hardmax`
//! and declares an overflow after that.

use crate::types::*;

use lazy_static::lazy_static;
use parking_lot::Mutex;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Called with the zone and the faulting address. Returns true if the fault
/// was handled and the store may proceed.
pub type ZoneHandler = fn(&mut MemoryZone, Addr) -> bool;

lazy_static! {
    static ref PAGE_SIZE: u64 = {
        #[cfg(unix)]
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        #[cfg(not(unix))]
        let size = 4096;

        if size <= 0 {
            4096
        } else {
            size as u64
        }
    };
    static ref USED_ZONES: Mutex<Vec<ZoneSummary>> = Mutex::new(vec![]);
}

const ADDRESS_SPACE_BASE: u64 = 0x10_0000_0000;

static NEXT_ZONE_BASE: AtomicU64 = AtomicU64::new(ADDRESS_SPACE_BASE);

#[inline]
pub fn page_size() -> u64 {
    *PAGE_SIZE
}

// one unmapped page between neighbouring zones.
fn reserve_address_range(total: u64) -> Addr {
    NEXT_ZONE_BASE.fetch_add(total + page_size(), Ordering::Relaxed)
}

/// A snapshot of a live zone's boundaries, kept in the process-wide zone list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ZoneSummary {
    pub name: String,
    pub id: usize,
    pub bottom: Addr,
    pub top: Addr,
    pub min: Addr,
    pub redzone: Addr,
    pub hardmax: Addr,
}

impl fmt::Display for ZoneSummary {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}#{}: bottom {:#x}, top {:#x}, min {:#x}, redzone {:#x}, hardmax {:#x}",
            self.name, self.id, self.bottom, self.top, self.min, self.redzone, self.hardmax
        )
    }
}

pub struct MemoryZone {
    name: String,
    id: usize,
    bottom: Addr,
    top: Addr,
    min: Addr,
    redzone_base: Addr,
    redzone: Addr,
    hardmax: Addr,
    handler: ZoneHandler,
    guarded: bool,
    words: Vec<Word>,
}

impl fmt::Debug for MemoryZone {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("MemoryZone")
            .field("name", &self.name)
            .field("id", &self.id)
            .field("bottom", &self.bottom)
            .field("top", &self.top)
            .field("min", &self.min)
            .field("redzone", &self.redzone)
            .field("hardmax", &self.hardmax)
            .finish()
    }
}

impl MemoryZone {
    /// Creates a zone of at least `size` usable bytes, rounded up to the
    /// page size, with `min` placed `offset` bytes above the bottom and a
    /// guard region of `redzone_size` bytes.
    pub fn create(
        name: &str,
        id: usize,
        size: u64,
        offset: u64,
        redzone_size: u64,
        handler: ZoneHandler,
    ) -> Self {
        let page = page_size();
        let total = round_up(size.max(1), page) + page;

        Self::construct(
            name,
            id,
            vec![0; (total / WORD_SIZE) as usize],
            offset,
            redzone_size,
            handler,
        )
    }

    /// Builds a zone over caller-supplied words. The backing store is padded
    /// to a whole number of pages with at least one page beyond the usable
    /// region.
    pub fn construct(
        name: &str,
        id: usize,
        mut words: Vec<Word>,
        offset: u64,
        redzone_size: u64,
        handler: ZoneHandler,
    ) -> Self {
        let page = page_size();
        let words_per_page = (page / WORD_SIZE) as usize;

        let min_len = 2 * words_per_page;
        let padded = words.len().max(min_len).div_ceil(words_per_page) * words_per_page;

        words.resize(padded, 0);

        let total = words.len() as u64 * WORD_SIZE;
        let size = total - page;
        let offset = round_up(offset, WORD_SIZE);

        if offset >= size {
            fatal!(
                "memory zone {}#{}: offset {} does not fit in {} bytes",
                name,
                id,
                offset,
                size
            );
        }

        let bottom = reserve_address_range(total);
        let top = bottom + total;
        let min = bottom + offset;
        let hardmax = round_up(top - page, page);

        let redzone_size = round_up(redzone_size, page);
        let redzone = if redzone_size >= size {
            round_up(min, page).min(hardmax)
        } else {
            round_up(bottom + size - redzone_size, page).max(round_up(min, page))
        };

        let zone = MemoryZone {
            name: name.to_owned(),
            id,
            bottom,
            top,
            min,
            redzone_base: redzone,
            redzone,
            hardmax,
            handler,
            guarded: redzone_size > 0,
            words,
        };

        memdebug!("created memory zone {}", zone.summary());
        USED_ZONES.lock().push(zone.summary());

        zone
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn id(&self) -> usize {
        self.id
    }

    #[inline]
    pub fn bottom(&self) -> Addr {
        self.bottom
    }

    #[inline]
    pub fn top(&self) -> Addr {
        self.top
    }

    #[inline]
    pub fn min(&self) -> Addr {
        self.min
    }

    #[inline]
    pub fn redzone(&self) -> Addr {
        self.redzone
    }

    #[inline]
    pub fn redzone_base(&self) -> Addr {
        self.redzone_base
    }

    #[inline]
    pub fn hardmax(&self) -> Addr {
        self.hardmax
    }

    #[inline]
    pub fn is_guarded(&self) -> bool {
        self.guarded
    }

    pub fn set_handler(&mut self, handler: ZoneHandler) {
        self.handler = handler;
    }

    #[inline]
    pub fn contains(&self, addr: Addr) -> bool {
        self.bottom <= addr && addr < self.top
    }

    #[inline]
    pub fn in_guard(&self, addr: Addr) -> bool {
        self.guarded && self.redzone <= addr && addr <= self.top
    }

    #[inline]
    fn index_of(&self, addr: Addr) -> usize {
        debug_assert_eq!(addr % WORD_SIZE, 0, "unaligned access at {:#x}", addr);
        ((addr - self.bottom) / WORD_SIZE) as usize
    }

    /// Loads a word. Loads are not guarded; a page that was never stored to
    /// reads as zeroes.
    #[inline]
    pub fn read(&self, addr: Addr) -> Word {
        if !self.contains(addr) {
            fatal!(
                "load from {:#x} outside memory zone {}#{}",
                addr,
                self.name,
                self.id
            );
        }

        self.words[self.index_of(addr)]
    }

    #[inline]
    pub fn write(&mut self, addr: Addr, value: Word) {
        if addr >= self.redzone && self.guarded {
            let handler = self.handler;

            if !handler(self, addr) {
                fatal!(
                    "store to {:#x} hit the guard region of memory zone {}#{}",
                    addr,
                    self.name,
                    self.id
                );
            }
        }

        if !self.contains(addr) {
            fatal!(
                "store to {:#x} outside memory zone {}#{}",
                addr,
                self.name,
                self.id
            );
        }

        let index = self.index_of(addr);
        self.words[index] = value;
    }

    /// Unprotects the guard region up to `new_redzone`.
    fn advance_redzone(&mut self, new_redzone: Addr) {
        debug_assert!(new_redzone >= self.redzone);
        self.redzone = new_redzone;

        let summary = self.summary();
        let mut used = USED_ZONES.lock();

        if let Some(entry) = used
            .iter_mut()
            .find(|entry| entry.id == summary.id && entry.bottom == summary.bottom)
        {
            *entry = summary;
        }
    }

    /// Puts the guard region back where it was when the zone was created.
    pub fn reset_redzone(&mut self) {
        if self.redzone != self.redzone_base {
            memdebug!(
                "resetting redzone of {}#{} from {:#x} to {:#x}",
                self.name,
                self.id,
                self.redzone,
                self.redzone_base
            );
        }

        let base = self.redzone_base;
        self.redzone = base;
        self.advance_redzone(base);
    }

    /// Zeroes the words in `[from, to)`.
    pub fn clear(&mut self, from: Addr, to: Addr) {
        let from = self.index_of(from.max(self.bottom));
        let to = self.index_of(to.min(self.top));

        for word in &mut self.words[from..to] {
            *word = 0;
        }
    }

    pub fn summary(&self) -> ZoneSummary {
        ZoneSummary {
            name: self.name.clone(),
            id: self.id,
            bottom: self.bottom,
            top: self.top,
            min: self.min,
            redzone: self.redzone,
            hardmax: self.hardmax,
        }
    }

    /// Routes a fault at `addr` to this zone's handler, if the address is in
    /// its guard region.
    pub fn try_munprotect(&mut self, addr: Addr) -> bool {
        if self.in_guard(addr) {
            let handler = self.handler;
            handler(self, addr)
        } else {
            false
        }
    }
}

impl Drop for MemoryZone {
    fn drop(&mut self) {
        let mut used = USED_ZONES.lock();
        used.retain(|entry| !(entry.id == self.id && entry.bottom == self.bottom));
    }
}

/// Grows the usable part of the zone to cover `addr`, one page boundary past
/// it. Past `hardmax` the zone has overflowed and the process is aborted.
pub fn default_handler(zone: &mut MemoryZone, addr: Addr) -> bool {
    if !zone.in_guard(addr) {
        return false;
    }

    let new_redzone = round_up(addr + WORD_SIZE, page_size());

    if new_redzone <= zone.hardmax {
        memdebug!(
            "growing {}#{}: redzone {:#x} -> {:#x} (fault at {:#x})",
            zone.name,
            zone.id,
            zone.redzone,
            new_redzone,
            addr
        );

        zone.advance_redzone(new_redzone);
        true
    } else {
        fatal!(
            "memory zone {}#{} overflowed (fault at {:#x})",
            zone.name,
            zone.id,
            addr
        )
    }
}

/// A handler that never handles anything.
pub fn null_handler(_zone: &mut MemoryZone, _addr: Addr) -> bool {
    false
}

pub fn get_used_memory_zones() -> Vec<ZoneSummary> {
    USED_ZONES.lock().clone()
}

/// The zone list, one line per live zone.
pub fn debug_memory() -> String {
    let mut out = String::new();

    for zone in USED_ZONES.lock().iter() {
        out += &zone.to_string();
        out.push('\n');
    }

    out
}

/// Finds the zone whose guard region covers `addr` and invokes its handler.
pub fn try_munprotect<'a, I>(zones: I, addr: Addr) -> bool
where
    I: IntoIterator<Item = &'a mut MemoryZone>,
{
    for zone in zones {
        if zone.redzone <= addr && addr <= zone.top {
            return zone.try_munprotect(addr);
        }
    }

    false
}
