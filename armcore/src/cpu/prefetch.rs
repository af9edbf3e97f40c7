//! Instruction prefetch ring.
//!
//! A small ring of pre-fetched words, depth 1-3 to match the modeled
//! pipeline depth. A slot whose fetch aborted under the MMU is stored with
//! its abort marker and only raises the prefetch abort when the execute
//! stage actually consumes it, the way a real pipeline discards aborting
//! fetches that a branch skips over.

use serde::{Deserialize, Serialize};

use crate::mmu::MemoryFault;

pub const MAX_DEPTH: usize = 3;

/// One fetched (or faulted) pipeline slot. A faulted slot carries the
/// translation fault so it can be latched into the CP15 fault registers
/// if and when the slot is consumed.
#[derive(Debug, Default, Clone, Copy, Serialize, Deserialize)]
pub struct FetchSlot {
    pub word: u32,
    pub address: u32,
    pub fault: Option<MemoryFault>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrefetchRing {
    slots: [FetchSlot; MAX_DEPTH],
    head: usize,
    len: usize,
    depth: usize,
    /// Virtual address the next refill fetch should read from.
    next_fetch: u32,
}

impl PrefetchRing {
    #[must_use]
    pub fn new(depth: usize) -> Self {
        assert!((1..=MAX_DEPTH).contains(&depth), "prefetch depth {depth}");
        Self {
            slots: [FetchSlot::default(); MAX_DEPTH],
            head: 0,
            len: 0,
            depth,
            next_fetch: 0,
        }
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[must_use]
    pub const fn depth(&self) -> usize {
        self.depth
    }

    /// Address the next refill should fetch from.
    #[must_use]
    pub const fn next_fetch_address(&self) -> u32 {
        self.next_fetch
    }

    #[must_use]
    pub const fn has_room(&self) -> bool {
        self.len < self.depth
    }

    /// Drops all buffered slots and restarts fetching at `pc`. Called on
    /// any branch, mode change or exception entry.
    pub const fn invalidate(&mut self, pc: u32) {
        self.head = 0;
        self.len = 0;
        self.next_fetch = pc;
    }

    /// Appends a fetched slot and advances the expected continuation
    /// address by the instruction size.
    pub const fn push(&mut self, slot: FetchSlot, instruction_size: u32) {
        debug_assert!(self.len < self.depth);
        self.slots[(self.head + self.len) % MAX_DEPTH] = slot;
        self.len += 1;
        self.next_fetch = self.next_fetch.wrapping_add(instruction_size);
    }

    /// Consumes the front slot if it matches `pc`; the caller falls back
    /// to a direct fetch (after invalidating) when the buffer does not
    /// continue from the expected address.
    pub const fn pop(&mut self, pc: u32) -> Option<FetchSlot> {
        if self.len == 0 {
            return None;
        }
        let slot = self.slots[self.head];
        if slot.address != pc {
            return None;
        }
        self.head = (self.head + 1) % MAX_DEPTH;
        self.len -= 1;
        Some(slot)
    }
}

impl Default for PrefetchRing {
    fn default() -> Self {
        Self::new(MAX_DEPTH)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn slot(address: u32, word: u32) -> FetchSlot {
        FetchSlot {
            word,
            address,
            fault: None,
        }
    }

    #[test]
    fn fifo_order() {
        let mut ring = PrefetchRing::new(3);
        ring.invalidate(0x100);
        ring.push(slot(0x100, 1), 4);
        ring.push(slot(0x104, 2), 4);
        ring.push(slot(0x108, 3), 4);
        assert!(!ring.has_room());
        assert_eq!(ring.next_fetch_address(), 0x10C);

        assert_eq!(ring.pop(0x100).unwrap().word, 1);
        assert_eq!(ring.pop(0x104).unwrap().word, 2);
        ring.push(slot(0x10C, 4), 4);
        assert_eq!(ring.pop(0x108).unwrap().word, 3);
        assert_eq!(ring.pop(0x10C).unwrap().word, 4);
        assert!(ring.is_empty());
    }

    #[test]
    fn mismatched_pc_is_rejected() {
        let mut ring = PrefetchRing::new(2);
        ring.invalidate(0x100);
        ring.push(slot(0x100, 1), 4);
        // A branch went to 0x200: the buffered slot must not be served.
        assert!(ring.pop(0x200).is_none());
    }

    #[test]
    fn invalidate_resets_continuation() {
        let mut ring = PrefetchRing::new(2);
        ring.invalidate(0x100);
        ring.push(slot(0x100, 1), 4);
        ring.invalidate(0x200);
        assert!(ring.is_empty());
        assert_eq!(ring.next_fetch_address(), 0x200);
    }

    #[test]
    fn aborted_slot_survives_until_consumed() {
        let fault = MemoryFault {
            status: 0b0101,
            address: 0x100,
        };
        let mut ring = PrefetchRing::new(2);
        ring.invalidate(0x100);
        ring.push(
            FetchSlot {
                word: 0,
                address: 0x100,
                fault: Some(fault),
            },
            4,
        );
        let front = ring.pop(0x100).unwrap();
        assert_eq!(front.fault, Some(fault));
    }
}
