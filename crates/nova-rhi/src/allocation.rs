//! Sub-allocation strategies for device memory.
//!
//! A strategy hands out `(offset, size)` ranges inside a fixed-size region. It
//! knows nothing about the memory itself; [`DeviceMemoryResource`] pairs a
//! strategy with a device memory object.
//!
//! Strategies are not internally synchronized. Callers that share one between
//! threads must wrap it in a lock.
//!
//! [`DeviceMemoryResource`]: crate::DeviceMemoryResource

use slotmap::SlotMap;

slotmap::new_key_type! {
    /// Node in a [`BlockAllocationStrategy`]'s block list.
    pub struct BlockKey;
}

/// A range handed out by an [`AllocationStrategy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AllocationInfo {
    pub offset: u64,
    /// Size after rounding up to the strategy's alignment
    pub size: u64,
    pub(crate) block: Option<BlockKey>,
}

/// A policy for carving allocations out of a fixed-size region.
pub trait AllocationStrategy: Send {
    /// Allocate `size` bytes, rounded up to the strategy's alignment.
    ///
    /// Returns `None` when the region has no room. Failure leaves the strategy
    /// unchanged.
    fn allocate(&mut self, size: u64) -> Option<AllocationInfo>;

    /// Return an allocation to the strategy.
    fn free(&mut self, allocation: &AllocationInfo);

    /// Total size of the region.
    fn capacity(&self) -> u64;

    /// Bytes not currently handed out.
    fn free_bytes(&self) -> u64;
}

fn align_up(size: u64, alignment: u64) -> Option<u64> {
    size.checked_next_multiple_of(alignment)
}

#[derive(Debug, Clone)]
struct Block {
    offset: u64,
    size: u64,
    free: bool,
    prev: Option<BlockKey>,
    next: Option<BlockKey>,
}

/// Free-list allocator with coalescing.
///
/// Blocks form an offset-ordered doubly linked list that always tiles the
/// whole region. Allocation picks the smallest free block that fits (best
/// fit, lowest offset on ties) and splits off the remainder. Freeing merges
/// with the previous block first, then with the next one.
pub struct BlockAllocationStrategy {
    blocks: SlotMap<BlockKey, Block>,
    head: BlockKey,
    capacity: u64,
    alignment: u64,
    free_bytes: u64,
}

impl BlockAllocationStrategy {
    /// Create a strategy managing `capacity` bytes. An alignment of zero is
    /// treated as one.
    pub fn new(capacity: u64, alignment: u64) -> Self {
        let mut blocks = SlotMap::with_key();
        let head = blocks.insert(Block {
            offset: 0,
            size: capacity,
            free: true,
            prev: None,
            next: None,
        });

        Self {
            blocks,
            head,
            capacity,
            alignment: alignment.max(1),
            free_bytes: capacity,
        }
    }

    pub fn alignment(&self) -> u64 {
        self.alignment
    }

    /// Iterate over `(offset, size, is_free)` for every block in offset order.
    pub fn blocks(&self) -> impl Iterator<Item = (u64, u64, bool)> + '_ {
        let mut cursor = Some(self.head);
        std::iter::from_fn(move || {
            let block = &self.blocks[cursor?];
            cursor = block.next;
            Some((block.offset, block.size, block.free))
        })
    }

    /// Merge the block after `key` into `key`.
    fn absorb_next(&mut self, key: BlockKey) {
        let Some(next_key) = self.blocks[key].next else {
            return;
        };
        let Some(next) = self.blocks.remove(next_key) else {
            return;
        };

        if let Some(after) = next.next {
            self.blocks[after].prev = Some(key);
        }

        let block = &mut self.blocks[key];
        block.size += next.size;
        block.next = next.next;
    }
}

impl AllocationStrategy for BlockAllocationStrategy {
    fn allocate(&mut self, size: u64) -> Option<AllocationInfo> {
        let size = align_up(size, self.alignment)?;
        if size == 0 || size > self.free_bytes {
            return None;
        }

        let mut best: Option<(BlockKey, u64)> = None;
        let mut cursor = Some(self.head);
        while let Some(key) = cursor {
            let block = &self.blocks[key];
            if block.free
                && block.size >= size
                && best.map_or(true, |(_, best_size)| block.size < best_size)
            {
                best = Some((key, block.size));
                if block.size == size {
                    break;
                }
            }
            cursor = block.next;
        }

        let (key, block_size) = best?;

        if block_size > size {
            let (offset, next) = {
                let block = &self.blocks[key];
                (block.offset, block.next)
            };
            let remainder = self.blocks.insert(Block {
                offset: offset + size,
                size: block_size - size,
                free: true,
                prev: Some(key),
                next,
            });
            if let Some(next) = next {
                self.blocks[next].prev = Some(remainder);
            }

            let block = &mut self.blocks[key];
            block.next = Some(remainder);
            block.size = size;
        }

        let block = &mut self.blocks[key];
        block.free = false;
        self.free_bytes -= size;

        Some(AllocationInfo {
            offset: block.offset,
            size,
            block: Some(key),
        })
    }

    fn free(&mut self, allocation: &AllocationInfo) {
        let Some(mut key) = allocation.block else {
            tracing::warn!("Allocation at offset {} did not come from a block allocator", allocation.offset);
            return;
        };

        match self.blocks.get_mut(key) {
            Some(block)
                if !block.free
                    && block.offset == allocation.offset
                    && block.size == allocation.size =>
            {
                block.free = true;
                self.free_bytes += block.size;
            }
            _ => {
                tracing::warn!(
                    "Ignoring free of allocation at offset {} that is not live",
                    allocation.offset
                );
                return;
            }
        }

        if let Some(prev) = self.blocks[key].prev {
            if self.blocks[prev].free {
                self.absorb_next(prev);
                key = prev;
            }
        }

        if let Some(next) = self.blocks[key].next {
            if self.blocks[next].free {
                self.absorb_next(key);
            }
        }
    }

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn free_bytes(&self) -> u64 {
        self.free_bytes
    }
}

/// Monotonic allocator. Freeing is a no-op; the whole region is reclaimed at
/// once with [`reset`](Self::reset).
pub struct BumpPointAllocationStrategy {
    capacity: u64,
    alignment: u64,
    allocated: u64,
}

impl BumpPointAllocationStrategy {
    /// Create a strategy managing `capacity` bytes. An alignment of zero is
    /// treated as one.
    pub fn new(capacity: u64, alignment: u64) -> Self {
        Self {
            capacity,
            alignment: alignment.max(1),
            allocated: 0,
        }
    }

    /// Reclaim every allocation.
    pub fn reset(&mut self) {
        self.allocated = 0;
    }

    /// Bytes handed out since the last reset.
    pub fn allocated(&self) -> u64 {
        self.allocated
    }
}

impl AllocationStrategy for BumpPointAllocationStrategy {
    fn allocate(&mut self, size: u64) -> Option<AllocationInfo> {
        let size = align_up(size, self.alignment)?;
        let end = self.allocated.checked_add(size)?;
        if size == 0 || end > self.capacity {
            return None;
        }

        let offset = self.allocated;
        self.allocated = end;

        Some(AllocationInfo {
            offset,
            size,
            block: None,
        })
    }

    fn free(&mut self, _allocation: &AllocationInfo) {}

    fn capacity(&self) -> u64 {
        self.capacity
    }

    fn free_bytes(&self) -> u64 {
        self.capacity - self.allocated
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn assert_tiles(strategy: &BlockAllocationStrategy) {
        let mut expected_offset = 0;
        let mut free_total = 0;
        let mut previous_free = false;
        for (offset, size, free) in strategy.blocks() {
            assert_eq!(offset, expected_offset, "blocks must be contiguous");
            assert!(!(free && previous_free), "adjacent free blocks must be merged");
            expected_offset += size;
            if free {
                free_total += size;
            }
            previous_free = free;
        }
        assert_eq!(expected_offset, strategy.capacity());
        assert_eq!(free_total, strategy.free_bytes());
    }

    #[test]
    fn allocations_are_aligned_and_split() {
        let mut strategy = BlockAllocationStrategy::new(1024, 64);

        let a = strategy.allocate(10).unwrap();
        let b = strategy.allocate(100).unwrap();

        assert_eq!((a.offset, a.size), (0, 64));
        assert_eq!((b.offset, b.size), (64, 128));
        assert_eq!(strategy.free_bytes(), 1024 - 192);
        assert_eq!(
            strategy.blocks().collect::<Vec<_>>(),
            vec![(0, 64, false), (64, 128, false), (192, 832, true)]
        );
    }

    #[test]
    fn oversized_request_fails_without_mutation() {
        let mut strategy = BlockAllocationStrategy::new(256, 64);
        strategy.allocate(64).unwrap();
        let before: Vec<_> = strategy.blocks().collect();

        assert!(strategy.allocate(200).is_none());

        assert_eq!(strategy.blocks().collect::<Vec<_>>(), before);
        assert_eq!(strategy.free_bytes(), 192);
    }

    #[test]
    fn fragmented_request_fails_without_mutation() {
        let mut strategy = BlockAllocationStrategy::new(256, 64);
        let a = strategy.allocate(64).unwrap();
        let _b = strategy.allocate(64).unwrap();
        let c = strategy.allocate(64).unwrap();
        let _d = strategy.allocate(64).unwrap();
        strategy.free(&a);
        strategy.free(&c);
        let before: Vec<_> = strategy.blocks().collect();

        // 128 bytes are free, but not in one piece
        assert!(strategy.allocate(128).is_none());
        assert_eq!(strategy.blocks().collect::<Vec<_>>(), before);
    }

    #[test]
    fn freeing_neighbours_coalesces_in_either_order() {
        for reverse in [false, true] {
            let mut strategy = BlockAllocationStrategy::new(256, 64);
            let a = strategy.allocate(64).unwrap();
            let b = strategy.allocate(64).unwrap();
            let _c = strategy.allocate(128).unwrap();

            if reverse {
                strategy.free(&b);
                strategy.free(&a);
            } else {
                strategy.free(&a);
                strategy.free(&b);
            }

            assert_eq!(
                strategy.blocks().collect::<Vec<_>>(),
                vec![(0, 128, true), (128, 128, false)]
            );
        }
    }

    #[test]
    fn free_merges_backward_then_forward() {
        let mut strategy = BlockAllocationStrategy::new(192, 64);
        let a = strategy.allocate(64).unwrap();
        let b = strategy.allocate(64).unwrap();
        let c = strategy.allocate(64).unwrap();
        strategy.free(&a);
        strategy.free(&c);

        strategy.free(&b);

        assert_eq!(strategy.blocks().collect::<Vec<_>>(), vec![(0, 192, true)]);
        assert_eq!(strategy.free_bytes(), 192);
    }

    #[test]
    fn picks_the_smallest_block_that_fits() {
        let mut strategy = BlockAllocationStrategy::new(64 * 8, 64);
        let a = strategy.allocate(64 * 3).unwrap();
        let _gap = strategy.allocate(64).unwrap();
        let b = strategy.allocate(64).unwrap();
        let _rest = strategy.allocate(64 * 3).unwrap();
        strategy.free(&a);
        strategy.free(&b);

        let fit = strategy.allocate(64).unwrap();

        assert_eq!(fit.offset, b.offset);
    }

    #[test]
    fn double_free_is_ignored() {
        let mut strategy = BlockAllocationStrategy::new(256, 64);
        let a = strategy.allocate(64).unwrap();
        let _b = strategy.allocate(64).unwrap();
        strategy.free(&a);
        strategy.free(&a);

        assert_eq!(strategy.free_bytes(), 192);
        assert_tiles(&strategy);
    }

    #[test]
    fn random_sequences_keep_the_region_tiled() {
        let mut strategy = BlockAllocationStrategy::new(64 * 1024, 64);
        let mut live = Vec::new();
        let mut state = 0x2545_f491_4f6c_dd1d_u64;
        let mut next = move || {
            state ^= state << 13;
            state ^= state >> 7;
            state ^= state << 17;
            state
        };

        for _ in 0..2000 {
            if live.is_empty() || next() % 3 != 0 {
                if let Some(allocation) = strategy.allocate(next() % 4096 + 1) {
                    live.push(allocation);
                }
            } else {
                let index = (next() % live.len() as u64) as usize;
                let allocation = live.swap_remove(index);
                strategy.free(&allocation);
            }
            assert_tiles(&strategy);
        }

        for allocation in live.drain(..) {
            strategy.free(&allocation);
        }
        assert_eq!(strategy.blocks().collect::<Vec<_>>(), vec![(0, 64 * 1024, true)]);
    }

    #[test]
    fn bump_allocates_monotonically() {
        let mut strategy = BumpPointAllocationStrategy::new(256, 64);

        let a = strategy.allocate(1).unwrap();
        let b = strategy.allocate(65).unwrap();
        assert_eq!((a.offset, a.size), (0, 64));
        assert_eq!((b.offset, b.size), (64, 128));

        strategy.free(&a);
        assert_eq!(strategy.free_bytes(), 64);

        assert!(strategy.allocate(128).is_none());
        assert_eq!(strategy.allocated(), 192);

        strategy.reset();
        assert_eq!(strategy.allocate(256).unwrap().offset, 0);
    }
}
