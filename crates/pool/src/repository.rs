//! Slots partitioned by state.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use crate::config::{PoolConfig, ValidatePolicy};
use crate::error::{PoolError, PoolResult};
use crate::slot::{Effect, Input, Slot, SlotId, SlotState};

/// Every slot of one pool, indexed by state.
///
/// A slot is in exactly one partition, matching its state. Destroyed slots
/// are dropped; timed out slots and zombies are kept but don't count
/// towards the pool size.
#[derive(Debug)]
pub struct Repository<R> {
    slots: HashMap<SlotId, Slot<R>>,
    partitions: BTreeMap<SlotState, BTreeSet<SlotId>>,
    next_id: u64,
    peak: usize,
    min_size: usize,
    max_size: usize,
    min_idle: usize,
    max_concurrency: usize,
    policy: ValidatePolicy,
}

impl<R> Repository<R> {
    /// Create an empty repository sized by `config`.
    #[must_use]
    pub fn new(config: &PoolConfig) -> Self {
        Self {
            slots: HashMap::new(),
            partitions: SlotState::ALL
                .into_iter()
                .map(|state| (state, BTreeSet::new()))
                .collect(),
            next_id: 1,
            peak: 0,
            min_size: config.min_size,
            max_size: config.max_size,
            min_idle: config.min_idle,
            max_concurrency: config.max_concurrency,
            policy: config.validate,
        }
    }

    /// Add a fresh empty slot.
    pub fn extend(&mut self) -> SlotId {
        let id = SlotId::new(self.next_id);
        self.next_id += 1;
        self.slots.insert(id, Slot::new(id, self.policy));
        self.partition(SlotState::Empty).insert(id);
        self.peak = self.peak.max(self.size());
        id
    }

    /// Whether another slot may be added without breaching the size or
    /// creation concurrency limits.
    #[must_use]
    pub fn can_extend(&self) -> bool {
        self.size() < self.max_size && self.creating() < self.max_concurrency
    }

    /// Pick a slot for a request: the lowest unleased idle slot, or a new
    /// one if the limits allow. The slot is not leased until the caller
    /// applies `Input::Reserve`.
    pub fn reserve(&mut self) -> Option<SlotId> {
        if let Some(id) = self.first_unleased(SlotState::Idle) {
            return Some(id);
        }
        self.can_extend().then(|| self.extend())
    }

    /// Apply `input` to a slot, keeping the partitions in step.
    ///
    /// Destroying, abandoning or unreserving a slot that no longer exists
    /// is a no-op.
    pub fn transition(&mut self, id: SlotId, input: Input<R>) -> PoolResult<Vec<Effect<R>>> {
        let Some(slot) = self.slots.get_mut(&id) else {
            return match input {
                Input::Destroy | Input::Abandon | Input::Unreserve => Ok(Vec::new()),
                _ => Err(PoolError::UnknownSlot { slot: id }),
            };
        };
        let before = slot.state();
        let effects = slot.transition(input)?;
        let after = slot.state();

        if before != after {
            self.partition(before).remove(&id);
            if after == SlotState::Destroyed {
                self.slots.remove(&id);
            } else {
                self.partition(after).insert(id);
            }
        }
        Ok(effects)
    }

    /// Find the slot holding an acquired resource.
    #[must_use]
    pub fn locate(&self, id: SlotId) -> Option<&Slot<R>> {
        self.partitions
            .get(&SlotState::Acquired)
            .filter(|acquired| acquired.contains(&id))
            .and_then(|_| self.slots.get(&id))
    }

    /// Look up any slot.
    #[must_use]
    pub fn get(&self, id: SlotId) -> Option<&Slot<R>> {
        self.slots.get(&id)
    }

    /// Number of slots in `state`.
    #[must_use]
    pub fn count(&self, state: SlotState) -> usize {
        self.partitions.get(&state).map_or(0, BTreeSet::len)
    }

    /// Slot ids in `state`, lowest first.
    #[must_use]
    pub fn ids(&self, state: SlotState) -> Vec<SlotId> {
        self.partitions
            .get(&state)
            .map(|ids| ids.iter().copied().collect())
            .unwrap_or_default()
    }

    /// Slots counting towards capacity. Timed out slots are excluded, as
    /// their call may never settle, and so are zombies.
    #[must_use]
    pub fn size(&self) -> usize {
        self.slots.len() - self.count(SlotState::TimedOut) - self.count(SlotState::Zombie)
    }

    /// Largest size reached so far.
    #[must_use]
    pub fn peak(&self) -> usize {
        self.peak
    }

    /// Slots about to be, or being, created.
    #[must_use]
    pub fn creating(&self) -> usize {
        self.count(SlotState::Empty) + self.count(SlotState::Pending)
    }

    /// Unleased slots that are idle or on their way to idle.
    #[must_use]
    pub fn idle_supply(&self) -> usize {
        [
            SlotState::Empty,
            SlotState::Pending,
            SlotState::Ready,
            SlotState::Idle,
            SlotState::Reinstating,
        ]
        .into_iter()
        .flat_map(|state| self.ids(state))
        .filter(|id| self.slots.get(id).is_some_and(|slot| slot.lease().is_none()))
        .count()
    }

    /// How many slots to provision to honour the minimum size and the
    /// minimum idle supply, within the maximum size.
    #[must_use]
    pub fn deficit(&self) -> usize {
        let size = self.size();
        let wanted = self
            .min_size
            .saturating_sub(size)
            .max(self.min_idle.saturating_sub(self.idle_supply()));
        wanted.min(self.max_size.saturating_sub(size))
    }

    /// Unleased idle slots, to be destroyed on shutdown.
    #[must_use]
    pub fn cull(&self) -> Vec<SlotId> {
        self.ids(SlotState::Idle)
            .into_iter()
            .filter(|id| self.slots.get(id).is_some_and(|slot| slot.lease().is_none()))
            .collect()
    }

    /// Whether every remaining slot is timed out or a zombie.
    #[must_use]
    pub fn is_drained(&self) -> bool {
        self.slots.values().all(|slot| {
            matches!(slot.state(), SlotState::TimedOut | SlotState::Zombie)
        })
    }

    fn first_unleased(&self, state: SlotState) -> Option<SlotId> {
        self.partitions.get(&state)?.iter().copied().find(|id| {
            self.slots
                .get(id)
                .is_some_and(|slot| slot.lease().is_none())
        })
    }

    fn partition(&mut self, state: SlotState) -> &mut BTreeSet<SlotId> {
        self.partitions.entry(state).or_default()
    }
}
