use std::{fmt, str::FromStr};

use crate::error::VmError;

/// Something that happened to a page or cache entry that a replacement
/// policy may want to remember.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum PageEvent {
    /// The entry was just installed (page loaded, cache slot filled).
    Loaded,
    /// An existing entry was used for a translation.
    Touched,
}

/// Anything a replacement policy can rank. Both page table entries and
/// translation cache entries are candidates.
pub trait Candidate {
    fn is_candidate(&self) -> bool;

    fn recency(&self) -> u64;

    fn set_recency(&mut self, value: u64);
}

/// FIFO and LRU share the same victim selection (smallest recency value
/// wins) and only differ in which events refresh the value.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub enum ReplacementPolicy {
    #[default]
    Fifo,
    Lru,
}

impl ReplacementPolicy {
    pub fn refreshes_on(&self, event: PageEvent) -> bool {
        match (self, event) {
            (_, PageEvent::Loaded) => true,
            (ReplacementPolicy::Lru, PageEvent::Touched) => true,
            (ReplacementPolicy::Fifo, PageEvent::Touched) => false,
        }
    }

    /// Records `event` on `entry`, stamping it from `clock` when the policy
    /// cares about that kind of event.
    pub fn page_event<C: Candidate + ?Sized>(
        &self,
        event: PageEvent,
        entry: &mut C,
        clock: &mut RecencyClock,
    ) {
        if self.refreshes_on(event) {
            entry.set_recency(clock.tick());
        }
    }

    /// Index of the candidate with the smallest recency value. Ties go to the
    /// lowest index.
    pub fn pick_replacement<C: Candidate>(&self, entries: &[C]) -> Option<usize> {
        entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.is_candidate())
            .min_by_key(|(idx, entry)| (entry.recency(), *idx))
            .map(|(idx, _)| idx)
    }
}

impl fmt::Display for ReplacementPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReplacementPolicy::Fifo => write!(f, "FIFO"),
            ReplacementPolicy::Lru => write!(f, "LRU"),
        }
    }
}

impl FromStr for ReplacementPolicy {
    type Err = VmError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "fifo" => Ok(ReplacementPolicy::Fifo),
            "lru" => Ok(ReplacementPolicy::Lru),
            other => Err(VmError::InvalidConfig(format!(
                "unknown replacement policy {:?}",
                other
            ))),
        }
    }
}

/// Monotonic stamp source. Every stamp is strictly greater than the previous
/// one, so no two live entries ever share a recency value.
#[derive(Debug, Default, Clone)]
pub struct RecencyClock {
    now: u64,
}

impl RecencyClock {
    pub fn new() -> Self {
        RecencyClock::default()
    }

    pub fn tick(&mut self) -> u64 {
        self.now += 1;
        self.now
    }

    pub fn now(&self) -> u64 {
        self.now
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Slot {
        live: bool,
        stamp: u64,
    }

    impl Candidate for Slot {
        fn is_candidate(&self) -> bool {
            self.live
        }

        fn recency(&self) -> u64 {
            self.stamp
        }

        fn set_recency(&mut self, value: u64) {
            self.stamp = value;
        }
    }

    fn loaded(policy: ReplacementPolicy, clock: &mut RecencyClock, n: usize) -> Vec<Slot> {
        (0..n)
            .map(|_| {
                let mut slot = Slot { live: true, stamp: 0 };
                policy.page_event(PageEvent::Loaded, &mut slot, clock);
                slot
            })
            .collect()
    }

    #[test]
    fn fifo_ignores_touches() {
        let policy = ReplacementPolicy::Fifo;
        let mut clock = RecencyClock::new();
        let mut slots = loaded(policy, &mut clock, 3);

        policy.page_event(PageEvent::Touched, &mut slots[0], &mut clock);

        assert_eq!(policy.pick_replacement(&slots), Some(0));
    }

    #[test]
    fn lru_follows_touches() {
        let policy = ReplacementPolicy::Lru;
        let mut clock = RecencyClock::new();
        let mut slots = loaded(policy, &mut clock, 3);

        policy.page_event(PageEvent::Touched, &mut slots[0], &mut clock);

        assert_eq!(policy.pick_replacement(&slots), Some(1));
    }

    #[test]
    fn skips_dead_entries() {
        let policy = ReplacementPolicy::Fifo;
        let mut clock = RecencyClock::new();
        let mut slots = loaded(policy, &mut clock, 3);

        slots[0].live = false;
        assert_eq!(policy.pick_replacement(&slots), Some(1));

        slots.iter_mut().for_each(|s| s.live = false);
        assert_eq!(policy.pick_replacement(&slots), None);
    }

    #[test]
    fn parses_policy_names() {
        assert_eq!("FIFO".parse::<ReplacementPolicy>(), Ok(ReplacementPolicy::Fifo));
        assert_eq!(" lru ".parse::<ReplacementPolicy>(), Ok(ReplacementPolicy::Lru));
        assert!("lfu".parse::<ReplacementPolicy>().is_err());
    }
}
