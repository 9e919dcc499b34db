use log::{debug, info, trace};

use crate::{
    address_space::AddressSpace,
    config::MachineConfig,
    error::{Result, VmError},
    pager::{DemandPager, PagerStats},
    page_table::TranslationEntry,
    tlb::{TlbStats, TranslationCache},
};

/// Handle to an address space registered with an [`Mmu`].
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct SpaceId(usize);

impl SpaceId {
    pub fn index(&self) -> usize {
        self.0
    }
}

/// The simulated machine's memory unit: physical memory, swap, the optional
/// translation cache and the live address spaces, plus the two fault entry
/// points the trap layer calls into.
pub struct Mmu {
    config: MachineConfig,
    pager: DemandPager,
    tlb: Option<TranslationCache>,
    spaces: Vec<Option<AddressSpace>>,
    current: Option<SpaceId>,
    bad_vaddr: usize,
}

impl Mmu {
    pub fn new(config: MachineConfig) -> Result<Self> {
        config.validate()?;

        let tlb = match config.tlb_capacity {
            0 => None,
            capacity => Some(TranslationCache::new(capacity, config.tlb_policy)),
        };

        info!(
            "mmu: {} frames x {} bytes, {} swap slots, page policy {}",
            config.frame_count, config.page_size, config.swap_slot_count, config.page_policy
        );
        match &tlb {
            Some(tlb) => info!("mmu: tlb with {} entries, policy {}", tlb.capacity(), tlb.policy()),
            None => info!("mmu: tlb not used"),
        }

        Ok(Mmu {
            config,
            pager: DemandPager::new(&config),
            tlb,
            spaces: Vec::new(),
            current: None,
            bad_vaddr: 0,
        })
    }

    pub fn config(&self) -> &MachineConfig {
        &self.config
    }

    pub fn pager(&self) -> &DemandPager {
        &self.pager
    }

    pub fn tlb(&self) -> Option<&TranslationCache> {
        self.tlb.as_ref()
    }

    pub fn tlb_stats(&self) -> Option<TlbStats> {
        self.tlb.as_ref().map(TranslationCache::stats)
    }

    pub fn pager_stats(&self) -> PagerStats {
        self.pager.stats()
    }

    /// Last address handed to [`Mmu::raise_page_fault`].
    pub fn bad_vaddr(&self) -> usize {
        self.bad_vaddr
    }

    pub fn current(&self) -> Option<SpaceId> {
        self.current
    }

    pub fn space(&self, id: SpaceId) -> Result<&AddressSpace> {
        self.spaces
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(VmError::NoSuchSpace(id.0))
    }

    /// Registers a new address space. The first one created starts running.
    pub fn create_space(&mut self, space: AddressSpace) -> SpaceId {
        let id = SpaceId(self.spaces.len());

        info!("mmu: space {} created ({:?})", id.0, space);

        self.spaces.push(Some(space));

        if self.current.is_none() {
            self.current = Some(id);
        }

        id
    }

    /// Makes `id` the running address space. The translation cache is global,
    /// so it is flushed into the outgoing space's page table first.
    pub fn switch_to(&mut self, id: SpaceId) -> Result<()> {
        self.space(id)?;

        if self.current == Some(id) {
            return Ok(());
        }

        if let (Some(tlb), Some(outgoing)) = (self.tlb.as_mut(), self.current) {
            if let Some(space) = self.spaces.get_mut(outgoing.0).and_then(Option::as_mut) {
                tlb.flush(&mut space.page_table);
            }
        }

        debug!("mmu: switching to space {}", id.0);

        self.current = Some(id);

        Ok(())
    }

    /// Tears down `id`, returning all of its frames and swap slots.
    pub fn destroy_space(&mut self, id: SpaceId) -> Result<()> {
        let mut space = self
            .spaces
            .get_mut(id.0)
            .and_then(Option::take)
            .ok_or(VmError::NoSuchSpace(id.0))?;

        if self.current == Some(id) {
            if let Some(tlb) = self.tlb.as_mut() {
                let stats = tlb.stats();
                info!(
                    "mmu: tlb hit: {}    tlb miss: {}    hit rate: {:.5}",
                    stats.hits,
                    stats.misses,
                    stats.hit_rate()
                );

                tlb.discard();
            }

            self.current = None;
        }

        self.pager.release_space(&mut space)?;

        info!("mmu: space {} destroyed", id.0);

        Ok(())
    }

    fn running(&mut self) -> Result<&mut AddressSpace> {
        let id = self.current.ok_or(VmError::NoRunningSpace)?;

        self.spaces
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(VmError::NoSuchSpace(id.0))
    }

    fn check_vpn(&mut self, vaddr: usize, vpn: usize) -> Result<()> {
        if vpn >= self.running()?.page_count() {
            return Err(VmError::AddressOutOfRange { vaddr, vpn });
        }

        Ok(())
    }

    /// Trap entry: records the faulting address and routes the fault to the
    /// miss handler that matches the machine's configuration.
    pub fn raise_page_fault(&mut self, vaddr: usize) -> Result<usize> {
        self.bad_vaddr = vaddr;

        let vpn = vaddr / self.config.page_size;

        debug!("mmu: page fault at {:#x} (vpn {})", vaddr, vpn);

        if self.tlb.is_some() {
            self.on_translation_miss(vpn)
        } else {
            self.on_page_fault(vpn)
        }
    }

    /// Translation cache miss: make the page resident if needed, then cache
    /// its translation. Returns the frame.
    pub fn on_translation_miss(&mut self, vpn: usize) -> Result<usize> {
        let vaddr = self.bad_vaddr;
        self.check_vpn(vaddr, vpn)?;

        let id = self.current.ok_or(VmError::NoRunningSpace)?;
        let space = self
            .spaces
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(VmError::NoSuchSpace(id.0))?;
        let tlb = self.tlb.as_mut().ok_or_else(|| {
            VmError::invariant("translation miss raised on a machine without a tlb")
        })?;

        let frame = self.pager.ensure_resident(space, Some(&mut *tlb), vpn)?;
        self.pager.touch(space, vpn);

        let entry = *space
            .page_table
            .get(vpn)
            .ok_or_else(|| VmError::invariant(format!("vpn {} vanished after load", vpn)))?;

        tlb.install(entry, &mut space.page_table);

        Ok(frame)
    }

    /// Page fault with direct page table addressing. Returns the frame.
    pub fn on_page_fault(&mut self, vpn: usize) -> Result<usize> {
        if self.tlb.is_some() {
            return Err(VmError::invariant(
                "page fault raised on a machine that translates through a tlb",
            ));
        }

        let vaddr = self.bad_vaddr;
        self.check_vpn(vaddr, vpn)?;

        let id = self.current.ok_or(VmError::NoRunningSpace)?;
        let space = self
            .spaces
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(VmError::NoSuchSpace(id.0))?;

        let frame = self.pager.ensure_resident(space, None, vpn)?;
        self.pager.touch(space, vpn);

        Ok(frame)
    }

    /// One translation attempt with no fault handling. `None` means the
    /// hardware would trap.
    fn lookup(&mut self, vpn: usize) -> Result<Option<TranslationEntry>> {
        let id = self.current.ok_or(VmError::NoRunningSpace)?;
        let space = self
            .spaces
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(VmError::NoSuchSpace(id.0))?;

        let found = match self.tlb.as_mut() {
            Some(tlb) => tlb.lookup(vpn),
            None => space.page_table.get(vpn).filter(|entry| entry.valid).copied(),
        };

        if found.is_some() {
            self.pager.touch(space, vpn);
        }

        Ok(found)
    }

    fn mark_dirty(&mut self, vpn: usize) -> Result<()> {
        let marked = match self.tlb.as_mut() {
            Some(tlb) => tlb.mark_dirty(vpn),
            None => false,
        };

        if !marked {
            self.running()?.page_table.mark_dirty(vpn)?;
        }

        Ok(())
    }

    /// Translates `vaddr` to a physical address, faulting the page in if
    /// needed. Writes set the dirty bit and are refused on read-only pages.
    pub fn translate(&mut self, vaddr: usize, writing: bool) -> Result<usize> {
        let page_size = self.config.page_size;
        let vpn = vaddr / page_size;
        let offset = vaddr % page_size;

        self.check_vpn(vaddr, vpn)?;

        let entry = match self.lookup(vpn)? {
            Some(entry) => entry,
            None => {
                self.raise_page_fault(vaddr)?;

                self.lookup(vpn)?.ok_or_else(|| {
                    VmError::invariant(format!("vpn {} still unmapped after its fault", vpn))
                })?
            }
        };

        if writing {
            if entry.read_only {
                return Err(VmError::ReadOnly { vaddr, vpn });
            }

            self.mark_dirty(vpn)?;
        }

        trace!(
            "mmu: {:#x} -> vpn {} offset {} frame {}",
            vaddr,
            vpn,
            offset,
            entry.physical_page
        );

        Ok(entry.physical_page * page_size + offset)
    }

    pub fn read_byte(&mut self, vaddr: usize) -> Result<u8> {
        let paddr = self.translate(vaddr, false)?;
        let page_size = self.config.page_size;

        Ok(self.pager.frame(paddr / page_size)?[paddr % page_size])
    }

    pub fn write_byte(&mut self, vaddr: usize, value: u8) -> Result<()> {
        let paddr = self.translate(vaddr, true)?;
        let page_size = self.config.page_size;

        self.pager.frame_mut(paddr / page_size)?[paddr % page_size] = value;

        Ok(())
    }

    pub fn read_bytes(&mut self, vaddr: usize, buf: &mut [u8]) -> Result<()> {
        for (i, byte) in buf.iter_mut().enumerate() {
            *byte = self.read_byte(vaddr + i)?;
        }

        Ok(())
    }

    pub fn write_bytes(&mut self, vaddr: usize, bytes: &[u8]) -> Result<()> {
        for (i, &byte) in bytes.iter().enumerate() {
            self.write_byte(vaddr + i, byte)?;
        }

        Ok(())
    }

    /// Effective dirty bit of a resident page: the page table's bit or the
    /// translation cache's shadow copy.
    pub fn is_dirty(&self, id: SpaceId, vpn: usize) -> Result<bool> {
        let space = self.space(id)?;
        let table_dirty = space.page_table.get(vpn).map_or(false, |entry| entry.dirty);

        let shadow_dirty = match (&self.tlb, self.current == Some(id)) {
            (Some(tlb), true) => tlb.peek(vpn).map_or(false, |entry| entry.dirty),
            _ => false,
        };

        Ok(table_dirty || shadow_dirty)
    }

    /// Cross-checks the frame and swap bitmaps, every live page and swap
    /// table, and the translation cache.
    pub fn check_invariants(&self) -> Result<()> {
        let mut frame_owners = vec![0usize; self.config.frame_count];
        let mut slot_owners = vec![0usize; self.config.swap_slot_count];

        for (id, space) in self.spaces.iter().enumerate() {
            let Some(space) = space else { continue };

            for (resident, swapped) in space
                .page_table
                .entries()
                .iter()
                .zip(space.swap_table.entries())
            {
                if resident.valid && swapped.valid {
                    return Err(VmError::invariant(format!(
                        "space {}: vpn {} is both resident and swapped",
                        id, resident.virtual_page
                    )));
                }

                if resident.valid {
                    count_owner(&mut frame_owners, resident.physical_page, "frame")?;
                }

                if swapped.valid {
                    count_owner(&mut slot_owners, swapped.physical_page, "swap slot")?;
                }
            }
        }

        check_owners(&frame_owners, |idx| self.pager.frames().is_set(idx), "frame")?;
        check_owners(&slot_owners, |idx| self.pager.swap_slots().is_set(idx), "swap slot")?;

        let Some(tlb) = &self.tlb else { return Ok(()) };

        for cached in tlb.entries().iter().filter(|entry| entry.valid) {
            let mapped = self
                .current
                .and_then(|id| self.space(id).ok())
                .and_then(|space| space.page_table.lookup(cached.virtual_page));

            if mapped != Some(cached.physical_page) {
                return Err(VmError::invariant(format!(
                    "tlb maps vpn {} to frame {} but the page table says {:?}",
                    cached.virtual_page, cached.physical_page, mapped
                )));
            }
        }

        Ok(())
    }
}

fn count_owner(owners: &mut [usize], idx: usize, what: &str) -> Result<()> {
    let owner = owners
        .get_mut(idx)
        .ok_or_else(|| VmError::invariant(format!("{} {} does not exist", what, idx)))?;

    *owner += 1;

    Ok(())
}

fn check_owners(owners: &[usize], is_set: impl Fn(usize) -> bool, what: &str) -> Result<()> {
    for (idx, &count) in owners.iter().enumerate() {
        if count > 1 {
            return Err(VmError::invariant(format!(
                "{} {} is claimed by {} entries",
                what, idx, count
            )));
        }

        if is_set(idx) != (count == 1) {
            return Err(VmError::invariant(format!(
                "{} {} bitmap bit is {} but it has {} owners",
                what,
                idx,
                is_set(idx),
                count
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{page_loader::MemoryImage, page_replacer::ReplacementPolicy};

    const PAGE: usize = 8;

    fn config() -> MachineConfig {
        MachineConfig::default()
            .with_page_size(PAGE)
            .with_frames(2)
            .with_swap_slots(6)
    }

    fn space(pages: usize) -> AddressSpace {
        AddressSpace::new(
            pages,
            MemoryImage::new((0..pages * PAGE).map(|i| i as u8).collect()),
        )
    }

    #[test]
    fn reads_fault_pages_in_through_the_tlb() {
        let mut mmu = Mmu::new(config().with_tlb(2, ReplacementPolicy::Lru)).unwrap();
        mmu.create_space(space(4));

        assert_eq!(mmu.read_byte(9).unwrap(), 9);
        assert_eq!(mmu.bad_vaddr(), 9);
        assert_eq!(mmu.read_byte(10).unwrap(), 10);

        let stats = mmu.tlb_stats().unwrap();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        mmu.check_invariants().unwrap();
    }

    #[test]
    fn reads_fault_pages_in_without_a_tlb() {
        let mut mmu = Mmu::new(config().without_tlb()).unwrap();
        mmu.create_space(space(4));

        assert_eq!(mmu.read_byte(3 * PAGE + 1).unwrap(), 25);
        assert!(mmu.tlb_stats().is_none());
        assert_eq!(mmu.pager_stats().image_loads, 1);
        mmu.check_invariants().unwrap();
    }

    #[test]
    fn handler_must_match_configuration() {
        let mut with_tlb = Mmu::new(config()).unwrap();
        with_tlb.create_space(space(2));
        assert!(matches!(
            with_tlb.on_page_fault(0),
            Err(VmError::InvariantViolation(_))
        ));

        let mut without_tlb = Mmu::new(config().without_tlb()).unwrap();
        without_tlb.create_space(space(2));
        assert!(matches!(
            without_tlb.on_translation_miss(0),
            Err(VmError::InvariantViolation(_))
        ));
    }

    #[test]
    fn address_outside_space_is_rejected() {
        let mut mmu = Mmu::new(config()).unwrap();
        mmu.create_space(space(2));

        assert_eq!(
            mmu.read_byte(2 * PAGE),
            Err(VmError::AddressOutOfRange {
                vaddr: 2 * PAGE,
                vpn: 2
            })
        );
    }

    #[test]
    fn write_to_read_only_page_is_refused() {
        let mut mmu = Mmu::new(config()).unwrap();
        let id = mmu.create_space(space(4).with_read_only_pages(0..1));

        assert_eq!(
            mmu.write_byte(1, 0xFF),
            Err(VmError::ReadOnly { vaddr: 1, vpn: 0 })
        );
        assert_eq!(mmu.read_byte(1).unwrap(), 1);
        assert!(!mmu.is_dirty(id, 0).unwrap());

        mmu.write_byte(PAGE, 0xFF).unwrap();
        assert!(mmu.is_dirty(id, 1).unwrap());
    }

    #[test]
    fn no_running_space() {
        let mut mmu = Mmu::new(config()).unwrap();

        assert_eq!(mmu.read_byte(0), Err(VmError::NoRunningSpace));
    }

    #[test]
    fn switching_flushes_the_tlb() {
        let mut mmu = Mmu::new(config().with_swap_slots(8)).unwrap();
        let first = mmu.create_space(space(2));
        let second = mmu.create_space(space(2));

        mmu.write_byte(0, 0xAA).unwrap();
        assert!(!mmu.space(first).unwrap().page_table().get(0).unwrap().dirty);

        mmu.switch_to(second).unwrap();
        assert!(mmu.tlb().unwrap().entries().iter().all(|e| !e.valid));
        assert!(mmu.space(first).unwrap().page_table().get(0).unwrap().dirty);

        assert_eq!(mmu.read_byte(0).unwrap(), 0);
        mmu.check_invariants().unwrap();

        mmu.switch_to(first).unwrap();
        assert_eq!(mmu.read_byte(0).unwrap(), 0xAA);
        mmu.check_invariants().unwrap();
    }

    #[test]
    fn destroying_a_space_frees_its_memory() {
        let mut mmu = Mmu::new(config()).unwrap();
        let id = mmu.create_space(space(4));

        for vpn in 0..4 {
            mmu.read_byte(vpn * PAGE).unwrap();
        }
        assert_eq!(mmu.pager().frames().count_free(), 0);

        mmu.destroy_space(id).unwrap();

        assert_eq!(mmu.pager().frames().count_free(), 2);
        assert_eq!(mmu.pager().swap_slots().count_free(), 6);
        assert_eq!(mmu.current(), None);
        assert_eq!(mmu.space(id).unwrap_err(), VmError::NoSuchSpace(0));
        mmu.check_invariants().unwrap();
    }
}
