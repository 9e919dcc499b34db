use log::{debug, trace};

use crate::{
    page_replacer::{PageEvent, RecencyClock, ReplacementPolicy},
    page_table::{PageTable, TranslationEntry},
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct TlbStats {
    pub hits: u64,
    pub misses: u64,
}

impl TlbStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;

        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Small fully-associative cache of VPN -> frame translations.
///
/// The dirty bit held here is a shadow of the page table's. Whenever an entry
/// leaves the cache (replacement, flush) its dirty bit is folded back into the
/// page table entry it was caching; [`TranslationCache::invalidate`] hands the
/// removed entry back so the caller can do the same.
#[derive(Debug, Clone)]
pub struct TranslationCache {
    entries: Vec<TranslationEntry>,
    policy: ReplacementPolicy,
    clock: RecencyClock,
    stats: TlbStats,
}

impl TranslationCache {
    pub fn new(capacity: usize, policy: ReplacementPolicy) -> Self {
        TranslationCache {
            entries: vec![TranslationEntry::default(); capacity],
            policy,
            clock: RecencyClock::new(),
            stats: TlbStats::default(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    pub fn stats(&self) -> TlbStats {
        self.stats
    }

    pub fn entries(&self) -> &[TranslationEntry] {
        &self.entries
    }

    fn position(&self, page_number: usize) -> Option<usize> {
        self.entries
            .iter()
            .position(|entry| entry.valid && entry.virtual_page == page_number)
    }

    /// Looks up a translation, counting the hit or miss. Under LRU a hit
    /// refreshes the entry.
    pub fn lookup(&mut self, page_number: usize) -> Option<TranslationEntry> {
        match self.position(page_number) {
            Some(idx) => {
                self.stats.hits += 1;

                let entry = &mut self.entries[idx];
                self.policy
                    .page_event(PageEvent::Touched, entry, &mut self.clock);

                trace!("tlb hit: vpn {} -> frame {}", page_number, entry.physical_page);

                Some(*entry)
            }
            None => {
                self.stats.misses += 1;

                trace!("tlb miss: vpn {}", page_number);

                None
            }
        }
    }

    /// Looks up a translation without touching statistics or recency.
    pub fn peek(&self, page_number: usize) -> Option<&TranslationEntry> {
        self.position(page_number).map(|idx| &self.entries[idx])
    }

    /// Caches `entry`, replacing a victim if every slot is taken. The victim's
    /// dirty bit is written back into `page_table` before it is dropped, and
    /// the victim is returned.
    pub fn install(
        &mut self,
        entry: TranslationEntry,
        page_table: &mut PageTable,
    ) -> Option<TranslationEntry> {
        let page_number = entry.virtual_page;

        if let Some(idx) = self.position(page_number) {
            let slot = &mut self.entries[idx];
            slot.physical_page = entry.physical_page;
            slot.dirty |= entry.dirty;
            slot.read_only = entry.read_only;
            self.policy.page_event(PageEvent::Loaded, slot, &mut self.clock);

            return None;
        }

        let (idx, evicted) = match self.entries.iter().position(|slot| !slot.valid) {
            Some(free) => (free, None),
            None => {
                let victim_idx = self.policy.pick_replacement(&self.entries)?;
                let victim = self.entries[victim_idx];

                write_back(&victim, page_table);

                debug!(
                    "tlb: replacing vpn {} (frame {}) with vpn {}",
                    victim.virtual_page, victim.physical_page, page_number
                );

                (victim_idx, Some(victim))
            }
        };

        let slot = &mut self.entries[idx];
        *slot = TranslationEntry {
            virtual_page: page_number,
            physical_page: entry.physical_page,
            valid: true,
            dirty: entry.dirty,
            read_only: entry.read_only,
            recency: slot.recency,
        };
        self.policy.page_event(PageEvent::Loaded, slot, &mut self.clock);

        evicted
    }

    /// Drops the cached translation for `page_number`, if any, and returns it.
    /// The caller owns the dirty bit of the returned entry.
    pub fn invalidate(&mut self, page_number: usize) -> Option<TranslationEntry> {
        let idx = self.position(page_number)?;

        self.entries[idx].valid = false;

        Some(self.entries[idx])
    }

    /// Sets the shadow dirty bit. Returns `false` when the page is not cached.
    pub fn mark_dirty(&mut self, page_number: usize) -> bool {
        match self.position(page_number) {
            Some(idx) => {
                self.entries[idx].dirty = true;
                true
            }
            None => false,
        }
    }

    /// Empties the cache, writing every dirty bit back into `page_table`.
    pub fn flush(&mut self, page_table: &mut PageTable) {
        for slot in self.entries.iter_mut().filter(|slot| slot.valid) {
            write_back(slot, page_table);
            slot.valid = false;
        }
    }

    /// Empties the cache without writing anything back. Only for tearing
    /// down the address space the entries belonged to.
    pub fn discard(&mut self) {
        self.entries.iter_mut().for_each(|slot| slot.valid = false);
    }
}

fn write_back(cached: &TranslationEntry, page_table: &mut PageTable) {
    if let Some(entry) = page_table.get_mut(cached.virtual_page) {
        if entry.valid && entry.physical_page == cached.physical_page {
            entry.dirty |= cached.dirty;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table_with(pages: &[(usize, usize)]) -> PageTable {
        let mut table = PageTable::new(32);

        for &(vpn, frame) in pages {
            table.set(vpn, frame, false, false).unwrap();
        }

        table
    }

    fn cached(table: &PageTable, vpn: usize) -> TranslationEntry {
        *table.get(vpn).unwrap()
    }

    #[test]
    fn fifo_evicts_first_installed() {
        let mut table = table_with(&[(10, 0), (11, 1), (12, 2)]);
        let mut tlb = TranslationCache::new(2, ReplacementPolicy::Fifo);

        assert!(tlb.install(cached(&table, 10), &mut table).is_none());
        assert!(tlb.install(cached(&table, 11), &mut table).is_none());

        assert!(tlb.lookup(10).is_some());

        let evicted = tlb.install(cached(&table, 12), &mut table).unwrap();
        assert_eq!(evicted.virtual_page, 10);

        assert!(tlb.lookup(10).is_none());
        assert_eq!(tlb.lookup(11).unwrap().physical_page, 1);
        assert_eq!(tlb.lookup(12).unwrap().physical_page, 2);
    }

    #[test]
    fn lru_evicts_least_recently_used() {
        let mut table = table_with(&[(10, 0), (11, 1), (12, 2)]);
        let mut tlb = TranslationCache::new(2, ReplacementPolicy::Lru);

        tlb.install(cached(&table, 10), &mut table);
        tlb.install(cached(&table, 11), &mut table);
        tlb.lookup(10);

        let evicted = tlb.install(cached(&table, 12), &mut table).unwrap();
        assert_eq!(evicted.virtual_page, 11);
        assert!(tlb.peek(10).is_some());
    }

    #[test]
    fn eviction_writes_dirty_bit_back() {
        let mut table = table_with(&[(1, 0), (2, 1)]);
        let mut tlb = TranslationCache::new(1, ReplacementPolicy::Fifo);

        tlb.install(cached(&table, 1), &mut table);
        assert!(tlb.mark_dirty(1));
        assert!(!table.get(1).unwrap().dirty);

        tlb.install(cached(&table, 2), &mut table);

        assert!(table.get(1).unwrap().dirty);
        assert!(!table.get(2).unwrap().dirty);
    }

    #[test]
    fn stats_count_hits_and_misses() {
        let mut table = table_with(&[(3, 0)]);
        let mut tlb = TranslationCache::new(4, ReplacementPolicy::Lru);

        assert!(tlb.lookup(3).is_none());
        tlb.install(cached(&table, 3), &mut table);
        assert!(tlb.lookup(3).is_some());
        assert!(tlb.lookup(3).is_some());

        let stats = tlb.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
        assert!((stats.hit_rate() - 2.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn invalidate_returns_shadow_entry() {
        let mut table = table_with(&[(5, 3)]);
        let mut tlb = TranslationCache::new(2, ReplacementPolicy::Fifo);

        tlb.install(cached(&table, 5), &mut table);
        tlb.mark_dirty(5);

        let removed = tlb.invalidate(5).unwrap();
        assert!(removed.dirty);
        assert_eq!(removed.physical_page, 3);
        assert!(tlb.peek(5).is_none());
        assert!(tlb.invalidate(5).is_none());
    }

    #[test]
    fn reinstall_does_not_duplicate() {
        let mut table = table_with(&[(7, 1)]);
        let mut tlb = TranslationCache::new(2, ReplacementPolicy::Fifo);

        tlb.install(cached(&table, 7), &mut table);
        tlb.install(cached(&table, 7), &mut table);

        assert_eq!(tlb.entries().iter().filter(|e| e.valid).count(), 1);
    }

    #[test]
    fn flush_writes_back_everything() {
        let mut table = table_with(&[(0, 0), (1, 1)]);
        let mut tlb = TranslationCache::new(2, ReplacementPolicy::Fifo);

        tlb.install(cached(&table, 0), &mut table);
        tlb.install(cached(&table, 1), &mut table);
        tlb.mark_dirty(1);

        tlb.flush(&mut table);

        assert!(tlb.entries().iter().all(|e| !e.valid));
        assert!(!table.get(0).unwrap().dirty);
        assert!(table.get(1).unwrap().dirty);
    }
}
