//! The explicit stack of grey objects used by the marker.
//!
//! The stack has no storage of its own: it is laid over the nursery's idle
//! `from` semispace, which is guaranteed unused while the old generation is
//! being marked. Overflow is routine, not an error: a push onto a full stack
//! drops the entry and raises a sticky flag, and the marker later recovers
//! the dropped objects by re-scanning the heap for the overflow header bit.

use crate::object::HeapObject;
use crate::util::constants::BYTES_IN_WORD;
use crate::util::Address;

pub struct MarkingStack {
    low: Address,
    top: Address,
    high: Address,
    overflowed: bool,
}

impl MarkingStack {
    pub fn new() -> MarkingStack {
        MarkingStack {
            low: Address::ZERO,
            top: Address::ZERO,
            high: Address::ZERO,
            overflowed: false,
        }
    }

    /// Lay the stack over `[low, high)`. Entries are heap-object addresses,
    /// one word each.
    pub fn initialize(&mut self, low: Address, high: Address) {
        debug_assert!(low.as_usize() <= high.as_usize());
        self.low = low;
        self.top = low;
        self.high = high;
        self.overflowed = false;
    }

    pub fn capacity(&self) -> usize {
        (self.high - self.low) / BYTES_IN_WORD
    }

    pub fn is_empty(&self) -> bool {
        self.top == self.low
    }

    pub fn is_full(&self) -> bool {
        self.top == self.high
    }

    pub fn overflowed(&self) -> bool {
        self.overflowed
    }

    pub fn set_overflowed(&mut self) {
        self.overflowed = true;
    }

    pub fn clear_overflowed(&mut self) {
        self.overflowed = false;
    }

    /// Push a grey object. The caller must have checked `is_full` first; a
    /// push onto a full stack only raises the overflow flag.
    pub fn push(&mut self, object: HeapObject) {
        if self.is_full() {
            self.overflowed = true;
            return;
        }
        unsafe { self.top.store::<usize>(object.address().as_usize()) };
        self.top += BYTES_IN_WORD;
    }

    pub fn pop(&mut self) -> HeapObject {
        debug_assert!(!self.is_empty());
        self.top = self.top - BYTES_IN_WORD;
        let raw = unsafe { self.top.load::<usize>() };
        HeapObject::from_address(unsafe { Address::from_usize(raw) })
    }
}

impl Default for MarkingStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stack_over(buf: &mut [usize]) -> MarkingStack {
        let low = Address::from_mut_ptr(buf.as_mut_ptr());
        let high = low + buf.len() * BYTES_IN_WORD;
        let mut stack = MarkingStack::new();
        stack.initialize(low, high);
        stack
    }

    fn object_at(raw: usize) -> HeapObject {
        HeapObject::from_address(unsafe { Address::from_usize(raw) })
    }

    #[test]
    fn push_pop_lifo() {
        let mut buf = [0usize; 8];
        let mut stack = stack_over(&mut buf);
        assert!(stack.is_empty());
        stack.push(object_at(0x1000));
        stack.push(object_at(0x2000));
        assert_eq!(stack.pop().address().as_usize(), 0x2000);
        assert_eq!(stack.pop().address().as_usize(), 0x1000);
        assert!(stack.is_empty());
        assert!(!stack.overflowed());
    }

    #[test]
    fn overflow_is_sticky_and_drops_the_entry() {
        let mut buf = [0usize; 2];
        let mut stack = stack_over(&mut buf);
        stack.push(object_at(0x1000));
        stack.push(object_at(0x2000));
        assert!(stack.is_full());
        stack.push(object_at(0x3000));
        assert!(stack.overflowed());
        // The overflowing entry was not stored.
        assert_eq!(stack.pop().address().as_usize(), 0x2000);
        assert_eq!(stack.pop().address().as_usize(), 0x1000);
        assert!(stack.is_empty());
        // The flag stays up until explicitly cleared.
        assert!(stack.overflowed());
        stack.clear_overflowed();
        assert!(!stack.overflowed());
    }

    #[test]
    fn zero_capacity_overflows_immediately() {
        let mut buf = [0usize; 1];
        let low = Address::from_mut_ptr(buf.as_mut_ptr());
        let mut stack = MarkingStack::new();
        stack.initialize(low, low);
        assert!(stack.is_full() && stack.is_empty());
        stack.push(object_at(0x1000));
        assert!(stack.overflowed());
    }
}
