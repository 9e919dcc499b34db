use crate::{
    error::{Result, VmError},
    page_replacer::Candidate,
};

/// One translation record. Page table entries, swap table entries and
/// translation cache entries all share this shape; what `physical_page`
/// indexes (a frame or a swap slot) depends on the table holding it.
#[derive(Copy, Clone, Default, Debug, PartialEq, Eq)]
pub struct TranslationEntry {
    pub virtual_page: usize,
    pub physical_page: usize,
    pub valid: bool,
    pub dirty: bool,
    pub read_only: bool,
    pub recency: u64,
}

pub type PageTableEntry = TranslationEntry;

/// In a swap table, `physical_page` is a swap slot and `valid` means the
/// page's only copy lives in swap.
pub type SwapTableEntry = TranslationEntry;

impl Candidate for TranslationEntry {
    fn is_candidate(&self) -> bool {
        self.valid
    }

    fn recency(&self) -> u64 {
        self.recency
    }

    fn set_recency(&mut self, value: u64) {
        self.recency = value;
    }
}

/// Flat, per-address-space array indexed by virtual page number.
#[derive(Debug, Clone)]
pub struct PageTable {
    table: Vec<TranslationEntry>,
}

impl PageTable {
    pub fn new(page_count: usize) -> Self {
        let table = (0..page_count)
            .map(|virtual_page| TranslationEntry {
                virtual_page,
                ..Default::default()
            })
            .collect();

        PageTable { table }
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn get(&self, page_number: usize) -> Option<&TranslationEntry> {
        self.table.get(page_number)
    }

    pub fn get_mut(&mut self, page_number: usize) -> Option<&mut TranslationEntry> {
        self.table.get_mut(page_number)
    }

    /// Frame (or slot) of `page_number` if it is currently valid.
    pub fn lookup(&self, page_number: usize) -> Option<usize> {
        self.get(page_number)
            .filter(|entry| entry.valid)
            .map(|entry| entry.physical_page)
    }

    pub fn entries(&self) -> &[TranslationEntry] {
        &self.table
    }

    pub fn valid_entries(&self) -> impl Iterator<Item = &TranslationEntry> {
        self.table.iter().filter(|entry| entry.valid)
    }

    fn entry_mut(&mut self, page_number: usize) -> Result<&mut TranslationEntry> {
        let len = self.table.len();

        self.table.get_mut(page_number).ok_or_else(|| {
            VmError::invariant(format!(
                "vpn {} is outside a table of {} entries",
                page_number, len
            ))
        })
    }

    pub fn set(
        &mut self,
        page_number: usize,
        physical_page: usize,
        dirty: bool,
        read_only: bool,
    ) -> Result<()> {
        let entry = self.entry_mut(page_number)?;

        entry.virtual_page = page_number;
        entry.physical_page = physical_page;
        entry.valid = true;
        entry.dirty = dirty;
        entry.read_only = read_only;

        Ok(())
    }

    pub fn invalidate(&mut self, page_number: usize) -> Option<TranslationEntry> {
        let entry = self.table.get_mut(page_number)?;

        if !entry.valid {
            return None;
        }

        entry.valid = false;

        Some(*entry)
    }

    pub fn mark_dirty(&mut self, page_number: usize) -> Result<()> {
        self.entry_mut(page_number)?.dirty = true;

        Ok(())
    }
}
