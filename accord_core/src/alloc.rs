//! Handle allocation with free-list reuse.

use std::collections::BTreeSet;

use crate::error::RtiError;
use crate::handle::HandleKind;

/// Allocates handles of one kind from a monotonically increasing counter plus
/// a set of reclaimed handles. `get` prefers the smallest reclaimed handle, so
/// handle values stay dense.
#[derive(Debug, Clone)]
pub struct HandleAllocator<H: HandleKind> {
    next: u64,
    free: BTreeSet<H>,
}

impl<H: HandleKind> Default for HandleAllocator<H> {
    fn default() -> Self {
        Self {
            next: 0,
            free: BTreeSet::new(),
        }
    }
}

impl<H: HandleKind> HandleAllocator<H> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocate the smallest unused handle.
    pub fn get(&mut self) -> Result<H, RtiError> {
        if let Some(&handle) = self.free.iter().next() {
            self.free.remove(&handle);
            return Ok(handle);
        }
        if self.next >= H::LAST_INDEX {
            return Err(RtiError::ResourceError(
                "running out of handle values".into(),
            ));
        }
        let handle = H::from_index(self.next);
        self.next += 1;
        Ok(handle)
    }

    /// Take a specific handle out of the allocator. Used when a child node
    /// tracks the parent node's allocations: a handle beyond the counter
    /// fills the gap `[counter, handle)` into the free set.
    pub fn take(&mut self, handle: H) {
        if self.free.remove(&handle) {
            return;
        }
        debug_assert!(self.next <= handle.index());
        while self.next < handle.index() {
            self.free.insert(H::from_index(self.next));
            self.next += 1;
        }
        self.next = handle.index() + 1;
    }

    /// `take` the given handle if present, otherwise allocate a fresh one.
    pub fn get_or_take(&mut self, handle: Option<H>) -> Result<H, RtiError> {
        match handle {
            Some(handle) => {
                self.take(handle);
                Ok(handle)
            }
            None => self.get(),
        }
    }

    /// Reclaim a handle for reuse.
    pub fn put(&mut self, handle: H) {
        debug_assert!(handle.index() < self.next);
        self.free.insert(handle);
    }

    /// Returns true while any allocated handle is outstanding.
    pub fn used(&self) -> bool {
        debug_assert!(self.free.len() as u64 <= self.next);
        (self.free.len() as u64) < self.next
    }
}

/// An open allocation transaction: the handle is reclaimed on drop unless
/// [`Candidate::take`] commits it. Keeps multi-step fallible insertions
/// all-or-nothing.
pub struct Candidate<'a, H: HandleKind> {
    allocator: &'a mut HandleAllocator<H>,
    handle: Option<H>,
}

impl<'a, H: HandleKind> Candidate<'a, H> {
    pub fn new(
        allocator: &'a mut HandleAllocator<H>,
        handle: Option<H>,
    ) -> Result<Self, RtiError> {
        let handle = allocator.get_or_take(handle)?;
        Ok(Self {
            allocator,
            handle: Some(handle),
        })
    }

    pub fn get(&self) -> H {
        self.handle.expect("candidate already taken")
    }

    /// Commit: the handle stays allocated.
    pub fn take(mut self) -> H {
        self.handle.take().expect("candidate already taken")
    }
}

impl<H: HandleKind> Drop for Candidate<'_, H> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.allocator.put(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handle::FederateHandle;

    #[test]
    fn allocates_smallest_unused() {
        let mut alloc = HandleAllocator::<FederateHandle>::new();
        let a = alloc.get().unwrap();
        let b = alloc.get().unwrap();
        let c = alloc.get().unwrap();
        assert_eq!(a, FederateHandle::from_raw(0));
        assert_eq!(b, FederateHandle::from_raw(1));
        assert_eq!(c, FederateHandle::from_raw(2));

        alloc.put(b);
        assert_eq!(alloc.get().unwrap(), b);
        assert_eq!(alloc.get().unwrap(), FederateHandle::from_raw(3));
    }

    #[test]
    fn live_handles_are_distinct() {
        let mut alloc = HandleAllocator::<FederateHandle>::new();
        let mut live = std::collections::BTreeSet::new();
        for _ in 0..64 {
            assert!(live.insert(alloc.get().unwrap()));
        }
        // Reclaim a few and check reallocations only hand out reclaimed ones.
        for i in [3u32, 17, 42] {
            let h = FederateHandle::from_raw(i);
            live.remove(&h);
            alloc.put(h);
        }
        for _ in 0..3 {
            assert!(live.insert(alloc.get().unwrap()));
        }
        assert!(live.contains(&FederateHandle::from_raw(3)));
    }

    #[test]
    fn take_fills_gap() {
        let mut alloc = HandleAllocator::<FederateHandle>::new();
        alloc.take(FederateHandle::from_raw(4));
        // 0..4 went into the free set; the counter sits beyond 4.
        assert_eq!(alloc.get().unwrap(), FederateHandle::from_raw(0));
        assert_eq!(alloc.get().unwrap(), FederateHandle::from_raw(1));
        assert_eq!(alloc.get().unwrap(), FederateHandle::from_raw(2));
        assert_eq!(alloc.get().unwrap(), FederateHandle::from_raw(3));
        assert_eq!(alloc.get().unwrap(), FederateHandle::from_raw(5));
    }

    #[test]
    fn take_reclaimed_handle() {
        let mut alloc = HandleAllocator::<FederateHandle>::new();
        let a = alloc.get().unwrap();
        alloc.put(a);
        alloc.take(a);
        // `a` is live again, the next fresh handle comes from the counter.
        assert_eq!(alloc.get().unwrap(), FederateHandle::from_raw(1));
    }

    #[test]
    fn used_tracks_outstanding_handles() {
        let mut alloc = HandleAllocator::<FederateHandle>::new();
        assert!(!alloc.used());
        let a = alloc.get().unwrap();
        assert!(alloc.used());
        alloc.put(a);
        assert!(!alloc.used());
    }

    #[test]
    fn candidate_rolls_back_on_drop() {
        let mut alloc = HandleAllocator::<FederateHandle>::new();
        {
            let candidate = Candidate::new(&mut alloc, None).unwrap();
            assert_eq!(candidate.get(), FederateHandle::from_raw(0));
        }
        assert!(!alloc.used());

        let committed = Candidate::new(&mut alloc, None).unwrap().take();
        assert_eq!(committed, FederateHandle::from_raw(0));
        assert!(alloc.used());
    }
}
