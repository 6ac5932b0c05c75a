//! Fixed-length array of optionally occupied ownership slots.
//!
//! # Responsibilities
//! - Hold at most `capacity` occupants, each at a stable index
//! - Reject a second owner for an occupied index
//! - Reap occupants that report themselves terminated

use thiserror::Error;

/// Error type for slot operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SlotError {
    #[error("slot {0} is out of range")]
    OutOfRange(usize),

    #[error("slot {0} is already occupied")]
    Occupied(usize),
}

/// A fixed-capacity pool of ownership slots.
#[derive(Debug)]
pub struct SlotPool<T> {
    slots: Box<[Option<T>]>,
}

impl<T> SlotPool<T> {
    /// Create a pool with `capacity` empty slots.
    pub fn new(capacity: usize) -> Self {
        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>();
        Self {
            slots: slots.into_boxed_slice(),
        }
    }

    /// Total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of non-empty slots.
    pub fn occupied(&self) -> usize {
        self.slots.iter().filter(|slot| slot.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.iter().all(Option::is_none)
    }

    pub fn is_free(&self, idx: usize) -> bool {
        matches!(self.slots.get(idx), Some(None))
    }

    /// Index of a free slot, if any.
    ///
    /// The scan keeps the last free index it sees. Free indices are
    /// interchangeable, so this only fixes which one gets handed out.
    pub fn last_free(&self) -> Option<usize> {
        self.slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_none())
            .map(|(idx, _)| idx)
            .last()
    }

    /// Place an occupant into an empty slot.
    pub fn insert(&mut self, idx: usize, occupant: T) -> Result<(), SlotError> {
        match self.slots.get_mut(idx) {
            None => Err(SlotError::OutOfRange(idx)),
            Some(Some(_)) => Err(SlotError::Occupied(idx)),
            Some(slot) => {
                *slot = Some(occupant);
                Ok(())
            }
        }
    }

    /// Remove and return the occupant of `idx`, leaving the slot free.
    pub fn take(&mut self, idx: usize) -> Option<T> {
        self.slots.get_mut(idx).and_then(Option::take)
    }

    pub fn get(&self, idx: usize) -> Option<&T> {
        self.slots.get(idx).and_then(Option::as_ref)
    }

    pub fn get_mut(&mut self, idx: usize) -> Option<&mut T> {
        self.slots.get_mut(idx).and_then(Option::as_mut)
    }

    /// Iterate over `(index, occupant)` for every occupied slot.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_ref().map(|occupant| (idx, occupant)))
    }

    /// Iterate mutably over `(index, occupant)` for every occupied slot.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (usize, &mut T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.as_mut().map(|occupant| (idx, occupant)))
    }

    /// Free every slot whose occupant satisfies `terminated`.
    ///
    /// Returns the reaped occupants and the last free index seen during the
    /// same scan.
    pub fn reap<P>(&mut self, mut terminated: P) -> (Vec<(usize, T)>, Option<usize>)
    where
        P: FnMut(&T) -> bool,
    {
        let mut reaped = Vec::new();
        let mut free = None;
        for (idx, slot) in self.slots.iter_mut().enumerate() {
            match slot {
                None => free = Some(idx),
                Some(occupant) if terminated(occupant) => {
                    if let Some(occupant) = slot.take() {
                        reaped.push((idx, occupant));
                    }
                    free = Some(idx);
                }
                Some(_) => {}
            }
        }
        (reaped, free)
    }

    /// Empty every slot, returning whatever was still held.
    pub fn drain(&mut self) -> Vec<(usize, T)> {
        self.slots
            .iter_mut()
            .enumerate()
            .filter_map(|(idx, slot)| slot.take().map(|occupant| (idx, occupant)))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_pool_is_empty() {
        let pool: SlotPool<u32> = SlotPool::new(3);
        assert_eq!(pool.capacity(), 3);
        assert_eq!(pool.occupied(), 0);
        assert!(pool.is_empty());
    }

    #[test]
    fn insert_rejects_second_owner() {
        let mut pool = SlotPool::new(2);
        pool.insert(0, "a").unwrap();
        assert_eq!(pool.insert(0, "b"), Err(SlotError::Occupied(0)));
        assert_eq!(pool.insert(2, "c"), Err(SlotError::OutOfRange(2)));
        assert_eq!(pool.get(0), Some(&"a"));
    }

    #[test]
    fn last_free_prefers_highest_index() {
        let mut pool = SlotPool::new(3);
        assert_eq!(pool.last_free(), Some(2));

        pool.insert(2, 1).unwrap();
        assert_eq!(pool.last_free(), Some(1));

        pool.insert(0, 1).unwrap();
        pool.insert(1, 1).unwrap();
        assert_eq!(pool.last_free(), None);
    }

    #[test]
    fn reap_frees_terminated_and_reports_free_index() {
        let mut pool = SlotPool::new(3);
        pool.insert(0, 10).unwrap();
        pool.insert(1, 11).unwrap();
        pool.insert(2, 12).unwrap();

        let (reaped, free) = pool.reap(|value| *value == 11);
        assert_eq!(reaped, vec![(1, 11)]);
        assert_eq!(free, Some(1));
        assert!(pool.is_free(1));
        assert_eq!(pool.occupied(), 2);

        let (reaped, free) = pool.reap(|_| false);
        assert!(reaped.is_empty());
        assert_eq!(free, Some(1));
    }

    #[test]
    fn take_and_drain_empty_the_pool() {
        let mut pool = SlotPool::new(2);
        pool.insert(0, 'x').unwrap();
        pool.insert(1, 'y').unwrap();

        assert_eq!(pool.take(0), Some('x'));
        assert_eq!(pool.take(0), None);
        assert_eq!(pool.drain(), vec![(1, 'y')]);
        assert!(pool.is_empty());
    }
}
