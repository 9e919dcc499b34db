use log::warn;

use crate::{
    error::{Result, VmError},
    page_replacer::ReplacementPolicy,
};

/// Fixed at machine boot.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct MachineConfig {
    pub page_size: usize,
    pub frame_count: usize,
    pub swap_slot_count: usize,
    /// Zero disables the translation cache; the page table is then walked
    /// directly on every access.
    pub tlb_capacity: usize,
    pub page_policy: ReplacementPolicy,
    pub tlb_policy: ReplacementPolicy,
}

impl Default for MachineConfig {
    fn default() -> Self {
        MachineConfig {
            page_size: 128,
            frame_count: 32,
            swap_slot_count: 64,
            tlb_capacity: 4,
            page_policy: ReplacementPolicy::Fifo,
            tlb_policy: ReplacementPolicy::Lru,
        }
    }
}

impl MachineConfig {
    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_frames(mut self, frame_count: usize) -> Self {
        self.frame_count = frame_count;
        self
    }

    pub fn with_swap_slots(mut self, swap_slot_count: usize) -> Self {
        self.swap_slot_count = swap_slot_count;
        self
    }

    pub fn with_tlb(mut self, capacity: usize, policy: ReplacementPolicy) -> Self {
        self.tlb_capacity = capacity;
        self.tlb_policy = policy;
        self
    }

    pub fn without_tlb(mut self) -> Self {
        self.tlb_capacity = 0;
        self
    }

    pub fn with_page_policy(mut self, policy: ReplacementPolicy) -> Self {
        self.page_policy = policy;
        self
    }

    pub fn memory_size(&self) -> usize {
        self.page_size * self.frame_count
    }

    pub fn swap_size(&self) -> usize {
        self.page_size * self.swap_slot_count
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(VmError::InvalidConfig("page size must be non-zero".into()));
        }

        if self.frame_count == 0 {
            return Err(VmError::InvalidConfig(
                "at least one physical frame is required".into(),
            ));
        }

        if self.swap_slot_count <= self.frame_count {
            return Err(VmError::InvalidConfig(format!(
                "swap ({} slots) must be larger than physical memory ({} frames)",
                self.swap_slot_count, self.frame_count
            )));
        }

        if self.page_size.checked_mul(self.frame_count).is_none() {
            return Err(VmError::InvalidConfig(format!(
                "{} frames of {} bytes overflow the address space",
                self.frame_count, self.page_size
            )));
        }

        if self.page_size.checked_mul(self.swap_slot_count).is_none() {
            return Err(VmError::InvalidConfig(format!(
                "{} swap slots of {} bytes overflow the address space",
                self.swap_slot_count, self.page_size
            )));
        }

        if self.tlb_capacity > self.frame_count {
            warn!(
                "translation cache ({} entries) is larger than physical memory ({} frames)",
                self.tlb_capacity, self.frame_count
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_is_valid() {
        assert!(MachineConfig::default().validate().is_ok());
    }

    #[test]
    fn swap_must_outgrow_memory() {
        let config = MachineConfig::default().with_frames(8).with_swap_slots(8);

        assert!(matches!(config.validate(), Err(VmError::InvalidConfig(_))));
    }

    #[test]
    fn rejects_degenerate_sizes() {
        assert!(MachineConfig::default().with_page_size(0).validate().is_err());
        assert!(MachineConfig::default().with_frames(0).validate().is_err());
    }

    #[test]
    fn rejects_sizes_that_overflow() {
        let huge_memory = MachineConfig::default()
            .with_page_size(usize::MAX / 2)
            .with_frames(4)
            .with_swap_slots(8);
        assert!(matches!(huge_memory.validate(), Err(VmError::InvalidConfig(_))));

        let huge_swap = MachineConfig::default()
            .with_page_size(1 << 20)
            .with_frames(4)
            .with_swap_slots(usize::MAX / 2);
        assert!(matches!(huge_swap.validate(), Err(VmError::InvalidConfig(_))));
    }

    #[test]
    fn sizes_follow_page_size() {
        let config = MachineConfig::default()
            .with_page_size(64)
            .with_frames(4)
            .with_swap_slots(10);

        assert_eq!(config.memory_size(), 256);
        assert_eq!(config.swap_size(), 640);
    }
}
