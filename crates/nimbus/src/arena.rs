use alloc::rc::Rc;
use alloc::vec::Vec;

use core::cell::Cell;
use core::fmt;
use core::ops::{Deref, DerefMut};

use log::warn;

/// Returns the number of bytes actually reserved for a request of `len`
/// bytes.
///
/// One extra byte is always added for a terminator, and the result is
/// rounded up to a multiple of 4. Lengths within 4 bytes of [`usize::MAX`]
/// saturate to the largest multiple of 4, since no heap can satisfy them.
#[must_use]
pub const fn reserved_len(len: usize) -> usize {
    match checked_reserved_len(len) {
        Some(len) => len,
        None => usize::MAX & !3,
    }
}

const fn checked_reserved_len(len: usize) -> Option<usize> {
    let Some(blen) = len.checked_add(1) else {
        return None;
    };
    let new_len = (blen / 4) * 4;
    if new_len < blen {
        new_len.checked_add(4)
    } else {
        Some(new_len)
    }
}

/// A dedicated heap region, such as an external `PSRAM` chip.
pub trait HeapRegion {
    /// Total size of the region in bytes.
    ///
    /// A size of zero means that the region is not populated on this board.
    fn size(&self) -> usize;

    /// Reserves exactly `len` bytes from the region.
    ///
    /// Returns [`None`] when the region cannot satisfy the reservation.
    /// The content of the returned block is not required to be zeroed.
    fn reserve(&self, len: usize) -> Option<Vec<u8>>;
}

/// A switch between the default heap and a secondary heap which shares the
/// default allocator.
///
/// Some architectures expose their external memory through the default
/// allocator, which serves it only while a heap-selection mode is active.
pub trait HeapSelect {
    /// Routes the next reservations of the default allocator to the
    /// secondary heap.
    fn select_external(&self);

    /// Routes reservations back to the default heap.
    fn reset(&self);
}

/// The heap source used by an [`Arena`].
#[derive(Clone, Default)]
pub enum HeapStrategy {
    /// The default heap.
    #[default]
    Default,
    /// A dedicated heap region, used whenever it is populated.
    ///
    /// When the region reports a size of zero, the default heap is used.
    External(Rc<dyn HeapRegion>),
    /// The default allocator with a secondary heap selected for the duration
    /// of each reservation.
    Secondary(Rc<dyn HeapSelect>),
}

impl fmt::Debug for HeapStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Default => "Default",
            Self::External(_) => "External",
            Self::Secondary(_) => "Secondary",
        })
    }
}

// Reserves a zeroed block from the default heap.
fn reserve_default(len: usize) -> Option<Vec<u8>> {
    let mut block = Vec::new();
    block.try_reserve_exact(len).ok()?;
    block.resize(len, 0);
    Some(block)
}

/// A block of scratch memory reserved from an [`Arena`].
///
/// A block has exactly one owner. It is returned to its heap region when
/// it is dropped or released through [`Arena::release`].
pub struct ArenaBlock {
    data: Vec<u8>,
    len: usize,
    live: Rc<Cell<usize>>,
}

impl ArenaBlock {
    /// Returns the number of bytes reserved for the block, which is always
    /// greater than its usable length.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.data.len()
    }
}

impl Deref for ArenaBlock {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data[..self.len]
    }
}

impl DerefMut for ArenaBlock {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data[..self.len]
    }
}

impl fmt::Debug for ArenaBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArenaBlock")
            .field("len", &self.len)
            .field("reserved", &self.data.len())
            .finish()
    }
}

impl Drop for ArenaBlock {
    fn drop(&mut self) {
        self.live.set(self.live.get().saturating_sub(1));
    }
}

/// An allocator of scratch memory blocks.
///
/// The arena holds no allocation state of its own beyond a counter of the
/// blocks still alive. Cloning an arena produces a handle sharing the same
/// heap strategy and counter.
#[derive(Debug, Clone, Default)]
pub struct Arena {
    strategy: HeapStrategy,
    live: Rc<Cell<usize>>,
}

impl Arena {
    /// Creates an [`Arena`] over the default heap.
    #[must_use]
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an [`Arena`] with the given [`HeapStrategy`].
    #[must_use]
    #[inline]
    pub fn with_strategy(strategy: HeapStrategy) -> Self {
        Self {
            strategy,
            live: Rc::new(Cell::new(0)),
        }
    }

    /// Reserves a zeroed block of `len` usable bytes.
    ///
    /// Returns [`None`] when the heap cannot satisfy the reservation.
    #[must_use]
    #[inline]
    pub fn alloc(&self, len: usize) -> Option<ArenaBlock> {
        self.alloc_with(len, true)
    }

    /// Reserves a block of `len` usable bytes, zeroing it only when `clear`
    /// is set.
    ///
    /// The default heap always hands out zeroed memory, so `clear` only
    /// matters for dedicated heap regions.
    ///
    /// Returns [`None`] when the heap cannot satisfy the reservation.
    #[must_use]
    pub fn alloc_with(&self, len: usize, clear: bool) -> Option<ArenaBlock> {
        let Some(reserved) = checked_reserved_len(len) else {
            warn!("Reservation of {len} bytes exceeds the address space");
            return None;
        };

        let (data, zeroed) = match &self.strategy {
            HeapStrategy::External(region) if region.size() > 0 => {
                (region.reserve(reserved), false)
            }
            HeapStrategy::Default | HeapStrategy::External(_) => {
                (reserve_default(reserved), true)
            }
            HeapStrategy::Secondary(select) => {
                select.select_external();
                let data = reserve_default(reserved);
                select.reset();
                (data, true)
            }
        };

        let Some(mut data) = data else {
            warn!("Failed to reserve {reserved} bytes from the {:?} heap", self.strategy);
            return None;
        };

        // A region may hand out a larger block than requested.
        data.truncate(reserved);
        if data.len() < reserved {
            warn!(
                "The {:?} heap returned {} bytes instead of {reserved}",
                self.strategy,
                data.len()
            );
            return None;
        }

        if clear && !zeroed {
            data.fill(0);
        }

        self.live.set(self.live.get() + 1);

        Some(ArenaBlock {
            data,
            len,
            live: Rc::clone(&self.live),
        })
    }

    /// Releases the block held by `handle`, if any, and leaves the handle
    /// empty.
    ///
    /// Releasing an empty handle does nothing.
    #[inline]
    pub fn release(&self, handle: &mut Option<ArenaBlock>) {
        drop(handle.take());
    }

    /// Returns the number of blocks reserved from this arena which are
    /// still alive.
    #[must_use]
    pub fn live_blocks(&self) -> usize {
        self.live.get()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use alloc::rc::Rc;
    use alloc::vec;
    use alloc::vec::Vec;

    use core::cell::Cell;

    use super::{Arena, HeapRegion, HeapSelect, HeapStrategy, reserved_len};

    // A heap region which fills its blocks with a pattern, or refuses every
    // reservation when `exhausted` is set.
    pub(crate) struct PatternRegion {
        pub(crate) size: usize,
        pub(crate) exhausted: Cell<bool>,
        pub(crate) reservations: Cell<usize>,
    }

    impl PatternRegion {
        pub(crate) fn new(size: usize) -> Self {
            Self {
                size,
                exhausted: Cell::new(false),
                reservations: Cell::new(0),
            }
        }

        pub(crate) fn exhausted() -> Self {
            let region = Self::new(1024);
            region.exhausted.set(true);
            region
        }
    }

    impl HeapRegion for PatternRegion {
        fn size(&self) -> usize {
            self.size
        }

        fn reserve(&self, len: usize) -> Option<Vec<u8>> {
            if self.exhausted.get() {
                return None;
            }
            self.reservations.set(self.reservations.get() + 1);
            Some(vec![0xA5; len])
        }
    }

    #[derive(Default)]
    struct Selector {
        active: Cell<bool>,
        toggles: Cell<usize>,
    }

    impl HeapSelect for Selector {
        fn select_external(&self) {
            assert!(!self.active.get());
            self.active.set(true);
            self.toggles.set(self.toggles.get() + 1);
        }

        fn reset(&self) {
            assert!(self.active.get());
            self.active.set(false);
        }
    }

    #[test]
    fn reserved_len_is_aligned_and_terminated() {
        for len in 0..1024 {
            let reserved = reserved_len(len);
            assert_eq!(reserved % 4, 0);
            assert!(reserved > len);
            assert!(reserved <= len + 4);
        }

        assert_eq!(reserved_len(0), 4);
        assert_eq!(reserved_len(3), 4);
        assert_eq!(reserved_len(4), 8);
        assert_eq!(reserved_len(usize::MAX) % 4, 0);
    }

    #[test]
    fn alloc_default_is_zeroed() {
        let arena = Arena::new();
        let block = arena.alloc(10).unwrap();

        assert_eq!(block.len(), 10);
        assert_eq!(block.reserved(), 12);
        assert!(block.iter().all(|b| *b == 0));
        assert_eq!(arena.live_blocks(), 1);

        drop(block);
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn release_nulls_handle_and_is_idempotent() {
        let arena = Arena::new();
        let mut handle = arena.alloc(32);
        assert!(handle.is_some());

        arena.release(&mut handle);
        assert!(handle.is_none());
        assert_eq!(arena.live_blocks(), 0);

        arena.release(&mut handle);
        assert!(handle.is_none());
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn external_region_is_preferred_when_populated() {
        let region = Rc::new(PatternRegion::new(4096));
        let arena = Arena::with_strategy(HeapStrategy::External(region.clone()));

        let cleared = arena.alloc(8).unwrap();
        assert!(cleared.iter().all(|b| *b == 0));

        let raw = arena.alloc_with(8, false).unwrap();
        assert!(raw.iter().all(|b| *b == 0xA5));

        assert_eq!(region.reservations.get(), 2);
    }

    #[test]
    fn empty_external_region_falls_back_to_default() {
        let region = Rc::new(PatternRegion::new(0));
        let arena = Arena::with_strategy(HeapStrategy::External(region.clone()));

        let block = arena.alloc_with(8, false).unwrap();
        assert!(block.iter().all(|b| *b == 0));
        assert_eq!(region.reservations.get(), 0);
    }

    #[test]
    fn exhausted_region_fails_without_panicking() {
        let arena = Arena::with_strategy(HeapStrategy::External(Rc::new(
            PatternRegion::exhausted(),
        )));

        assert!(arena.alloc(16).is_none());
        assert_eq!(arena.live_blocks(), 0);
    }

    #[test]
    fn secondary_heap_is_selected_only_during_reservation() {
        let selector = Rc::new(Selector::default());
        let arena = Arena::with_strategy(HeapStrategy::Secondary(selector.clone()));

        let _first = arena.alloc(4).unwrap();
        let _second = arena.alloc(4).unwrap();

        assert!(!selector.active.get());
        assert_eq!(selector.toggles.get(), 2);
        assert_eq!(arena.live_blocks(), 2);
    }

    #[test]
    fn overflowing_reservation_fails() {
        let arena = Arena::new();
        assert!(arena.alloc(usize::MAX).is_none());
    }
}
