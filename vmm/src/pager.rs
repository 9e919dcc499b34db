use log::{debug, error};

use crate::{
    address_space::AddressSpace,
    bitmap::SlotBitmap,
    config::MachineConfig,
    error::{Resource, Result, VmError},
    memory::BlockStore,
    page_replacer::{PageEvent, RecencyClock, ReplacementPolicy},
    tlb::TranslationCache,
};

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct PagerStats {
    pub image_loads: u64,
    pub swap_ins: u64,
    pub swap_outs: u64,
}

/// Owns physical memory, the swap device and their allocation bitmaps, and
/// makes pages resident on demand.
///
/// Every method assumes the caller has serialized access: no other fault is
/// being serviced against the same machine while one of these runs.
#[derive(Debug)]
pub struct DemandPager {
    page_size: usize,
    memory: BlockStore,
    swap: BlockStore,
    frames: SlotBitmap,
    swap_slots: SlotBitmap,
    policy: ReplacementPolicy,
    clock: RecencyClock,
    stats: PagerStats,
}

enum Source {
    Swap { slot: usize, dirty: bool, read_only: bool },
    Image { offset: usize },
}

impl DemandPager {
    pub fn new(config: &MachineConfig) -> Self {
        DemandPager {
            page_size: config.page_size,
            memory: BlockStore::new(config.frame_count, config.page_size),
            swap: BlockStore::new(config.swap_slot_count, config.page_size),
            frames: SlotBitmap::new(config.frame_count),
            swap_slots: SlotBitmap::new(config.swap_slot_count),
            policy: config.page_policy,
            clock: RecencyClock::new(),
            stats: PagerStats::default(),
        }
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub fn policy(&self) -> ReplacementPolicy {
        self.policy
    }

    pub fn stats(&self) -> PagerStats {
        self.stats
    }

    pub fn frames(&self) -> &SlotBitmap {
        &self.frames
    }

    pub fn swap_slots(&self) -> &SlotBitmap {
        &self.swap_slots
    }

    pub fn frame(&self, frame: usize) -> Result<&[u8]> {
        self.memory.block(frame)
    }

    pub fn frame_mut(&mut self, frame: usize) -> Result<&mut [u8]> {
        self.memory.block_mut(frame)
    }

    pub fn swap_block(&self, slot: usize) -> Result<&[u8]> {
        self.swap.block(slot)
    }

    /// Makes `vpn` resident in `space` and returns its frame.
    ///
    /// When memory is full a victim is chosen among `space`'s own resident
    /// pages and pushed out to swap; its translation is removed from `tlb`.
    /// Failing with `ResourceExhausted` leaves every table and bitmap as it
    /// was.
    pub fn ensure_resident(
        &mut self,
        space: &mut AddressSpace,
        tlb: Option<&mut TranslationCache>,
        vpn: usize,
    ) -> Result<usize> {
        let entry = *space.page_table.get(vpn).ok_or_else(|| {
            VmError::invariant(format!(
                "vpn {} is outside a page table of {} entries",
                vpn,
                space.page_count()
            ))
        })?;
        let swapped = space.swap_table.get(vpn).copied().unwrap_or_default();

        if entry.valid && swapped.valid {
            return Err(VmError::invariant(format!(
                "vpn {} is valid in both the page table and the swap table",
                vpn
            )));
        }

        if entry.valid {
            return Ok(entry.physical_page);
        }

        let source = if swapped.valid {
            Source::Swap {
                slot: swapped.physical_page,
                dirty: swapped.dirty,
                read_only: swapped.read_only,
            }
        } else {
            let offset = space.image_offset_of(vpn, self.page_size);

            if offset >= space.image_len() {
                return Err(VmError::invariant(format!(
                    "demand load of vpn {} reads offset {} past the end of a {} byte image",
                    vpn,
                    offset,
                    space.image_len()
                )));
            }

            Source::Image { offset }
        };

        let frame = match self.frames.acquire() {
            Some(frame) => frame,
            None => self.evict(space, tlb)?,
        };

        let (dirty, read_only) = match self.populate(space, vpn, frame, source) {
            Ok(bits) => bits,
            Err(err) => {
                if let Err(release_err) = self.frames.release(frame) {
                    error!("frame {} leaked after failed load: {}", frame, release_err);
                }

                return Err(err);
            }
        };

        space.page_table.set(vpn, frame, dirty, read_only)?;

        if let Some(entry) = space.page_table.get_mut(vpn) {
            self.policy
                .page_event(PageEvent::Loaded, entry, &mut self.clock);
        }

        Ok(frame)
    }

    /// Records an access to a resident page. Only LRU cares.
    pub fn touch(&mut self, space: &mut AddressSpace, vpn: usize) {
        if let Some(entry) = space.page_table.get_mut(vpn).filter(|entry| entry.valid) {
            self.policy
                .page_event(PageEvent::Touched, entry, &mut self.clock);
        }
    }

    /// Pushes one of `space`'s resident pages out to swap and hands its frame
    /// over to the caller. The frame's bitmap bit stays set across the
    /// handover.
    fn evict(&mut self, space: &mut AddressSpace, tlb: Option<&mut TranslationCache>) -> Result<usize> {
        let victim_vpn = self
            .policy
            .pick_replacement(space.page_table.entries())
            .ok_or(VmError::ResourceExhausted {
                resource: Resource::Frames,
            })?;

        let slot = self.swap_slots.acquire().ok_or(VmError::ResourceExhausted {
            resource: Resource::SwapSlots,
        })?;

        let victim = space.page_table.entries()[victim_vpn];
        let frame = victim.physical_page;

        if let Err(err) = self.swap.copy_block_from(slot, &self.memory, frame) {
            if let Err(release_err) = self.swap_slots.release(slot) {
                error!("swap slot {} leaked after failed swap out: {}", slot, release_err);
            }

            return Err(err);
        }

        let mut dirty = victim.dirty;

        if let Some(tlb) = tlb {
            if let Some(shadow) = tlb.invalidate(victim_vpn) {
                if shadow.physical_page == frame {
                    dirty |= shadow.dirty;
                }
            }
        }

        space
            .swap_table
            .set(victim_vpn, slot, dirty, victim.read_only)?;
        space.page_table.invalidate(victim_vpn);

        self.stats.swap_outs += 1;

        debug!(
            "page swap out: vpn={} ppn={} spn={} dirty={}",
            victim_vpn, frame, slot, dirty
        );

        Ok(frame)
    }

    fn populate(
        &mut self,
        space: &mut AddressSpace,
        vpn: usize,
        frame: usize,
        source: Source,
    ) -> Result<(bool, bool)> {
        match source {
            Source::Swap {
                slot,
                dirty,
                read_only,
            } => {
                self.memory.copy_block_from(frame, &self.swap, slot)?;
                self.swap_slots.release(slot)?;
                space.swap_table.invalidate(vpn);

                self.stats.swap_ins += 1;

                debug!("page load from swap: vpn={} ppn={} spn={}", vpn, frame, slot);

                Ok((dirty, read_only))
            }
            Source::Image { offset } => {
                let target = self.memory.block_mut(frame)?;
                target.fill(0);

                let read = space.read_image(target, offset)?;

                self.stats.image_loads += 1;

                debug!(
                    "page load from image: vpn={} ppn={} offset={} bytes={}",
                    vpn, frame, offset, read
                );

                Ok((false, space.is_read_only_page(vpn)))
            }
        }
    }

    /// Returns every frame and swap slot `space` holds to the free pools.
    pub fn release_space(&mut self, space: &mut AddressSpace) -> Result<()> {
        for vpn in 0..space.page_count() {
            if let Some(entry) = space.page_table.invalidate(vpn) {
                self.frames.release(entry.physical_page)?;
            }

            if let Some(entry) = space.swap_table.invalidate(vpn) {
                self.swap_slots.release(entry.physical_page)?;
            }
        }

        Ok(())
    }
}
