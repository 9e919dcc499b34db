use std::{fmt, ops::Range};

use crate::{
    error::{Result, VmError},
    page_loader::PageLoader,
    page_table::PageTable,
};

/// Everything the fault path needs to know about one process: its page and
/// swap tables plus the executable image that first-touch pages come from.
pub struct AddressSpace {
    pub(crate) page_table: PageTable,
    pub(crate) swap_table: PageTable,
    image: Box<dyn PageLoader>,
    image_offset: usize,
    read_only_pages: Range<usize>,
}

impl AddressSpace {
    pub fn new<L: PageLoader + 'static>(page_count: usize, image: L) -> Self {
        AddressSpace {
            page_table: PageTable::new(page_count),
            swap_table: PageTable::new(page_count),
            image: Box::new(image),
            image_offset: 0,
            read_only_pages: 0..0,
        }
    }

    /// Sizes the address space to cover the whole image.
    pub fn for_image<L: PageLoader + 'static>(image: L, page_size: usize) -> Result<Self> {
        if page_size == 0 {
            return Err(VmError::InvalidConfig("page size must be non-zero".into()));
        }

        let page_count = (image.len() + page_size - 1) / page_size;

        Ok(AddressSpace::new(page_count, image))
    }

    /// Byte offset in the image file where virtual address 0 starts.
    pub fn with_image_offset(mut self, offset: usize) -> Self {
        self.image_offset = offset;
        self
    }

    /// Pages in `pages` are loaded read-only (typically the code segment).
    pub fn with_read_only_pages(mut self, pages: Range<usize>) -> Self {
        self.read_only_pages = pages;
        self
    }

    pub fn page_count(&self) -> usize {
        self.page_table.len()
    }

    pub fn page_table(&self) -> &PageTable {
        &self.page_table
    }

    pub fn swap_table(&self) -> &PageTable {
        &self.swap_table
    }

    pub fn is_read_only_page(&self, page_number: usize) -> bool {
        self.read_only_pages.contains(&page_number)
    }

    pub fn image_offset_of(&self, page_number: usize, page_size: usize) -> usize {
        page_number * page_size + self.image_offset
    }

    pub(crate) fn image_len(&self) -> usize {
        self.image.len()
    }

    pub(crate) fn read_image(&mut self, target: &mut [u8], file_offset: usize) -> Result<usize> {
        Ok(self.image.read_at(target, file_offset)?)
    }
}

impl fmt::Debug for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddressSpace")
            .field("pages", &self.page_count())
            .field("resident", &self.page_table.valid_entries().count())
            .field("swapped", &self.swap_table.valid_entries().count())
            .field("image_len", &self.image.len())
            .field("image_offset", &self.image_offset)
            .field("read_only_pages", &self.read_only_pages)
            .finish()
    }
}
