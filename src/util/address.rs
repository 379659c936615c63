use atomic::Ordering;
use atomic_traits::Atomic;
use bytemuck::NoUninit;

use std::fmt;
use std::mem;
use std::ops::*;

/// size in bytes
pub type ByteSize = usize;
/// offset in bytes
pub type ByteOffset = isize;

/// Address represents an arbitrary heap address. This is designed to do
/// address arithmetic mostly in a safe way, and to mark the raw memory
/// accesses as unsafe. The type is zero overhead, memory wise and time wise.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, Hash, PartialOrd, Ord, PartialEq, NoUninit)]
pub struct Address(usize);

/// Address + ByteSize (positive)
impl Add<ByteSize> for Address {
    type Output = Address;
    fn add(self, offset: ByteSize) -> Address {
        Address(self.0 + offset)
    }
}

/// Address += ByteSize (positive)
impl AddAssign<ByteSize> for Address {
    fn add_assign(&mut self, offset: ByteSize) {
        self.0 += offset;
    }
}

/// Address - ByteSize (positive)
impl Sub<ByteSize> for Address {
    type Output = Address;
    fn sub(self, offset: ByteSize) -> Address {
        Address(self.0 - offset)
    }
}

/// Address - Address (the first address must be higher)
impl Sub<Address> for Address {
    type Output = ByteSize;
    fn sub(self, other: Address) -> ByteSize {
        debug_assert!(
            self.0 >= other.0,
            "for (addr_a - addr_b), a({}) needs to be larger than b({})",
            self,
            other
        );
        self.0 - other.0
    }
}

/// Address & mask
impl BitAnd<usize> for Address {
    type Output = usize;
    fn bitand(self, other: usize) -> usize {
        self.0 & other
    }
}

/// Address >> shift (get an index)
impl Shr<usize> for Address {
    type Output = usize;
    fn shr(self, shift: usize) -> usize {
        self.0 >> shift
    }
}

impl Address {
    /// The lowest possible address.
    pub const ZERO: Self = Address(0);

    /// creates Address from a pointer
    pub fn from_ptr<T>(ptr: *const T) -> Address {
        Address(ptr as usize)
    }

    /// creates Address from a mutable pointer
    pub fn from_mut_ptr<T>(ptr: *mut T) -> Address {
        Address(ptr as usize)
    }

    /// creates an arbitrary Address
    /// # Safety
    /// The caller must be aware that they may create an invalid address, to
    /// be used only for hard-coded sentinels or addresses recovered from
    /// encoded words whose validity is established elsewhere.
    pub const unsafe fn from_usize(raw: usize) -> Address {
        Address(raw)
    }

    /// the raw address as a word
    pub const fn as_usize(self) -> usize {
        self.0
    }

    /// is this the zero address
    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// shifts the address by N T-typed objects (returns addr + N * size_of(T))
    pub fn shift<T>(self, offset: isize) -> Self {
        Address((self.0 as isize + mem::size_of::<T>() as isize * offset) as usize)
    }

    /// Add an offset to the address. Const variant of the `Add` impl, usable
    /// to declare constants.
    #[allow(clippy::should_implement_trait)]
    pub const fn add(self, size: usize) -> Address {
        Address(self.0 + size)
    }

    /// Align the address up to the given power-of-two boundary.
    pub const fn align_up(self, align: usize) -> Address {
        Address((self.0 + align - 1) & !(align - 1))
    }

    /// Is the address aligned to the given power-of-two boundary?
    pub const fn is_aligned_to(self, align: usize) -> bool {
        self.0 & (align - 1) == 0
    }

    /// loads a value of type T from the address
    /// # Safety
    /// The address must be valid, mapped memory holding a T.
    pub unsafe fn load<T: Copy>(self) -> T {
        *(self.0 as *mut T)
    }

    /// stores a value of type T to the address
    /// # Safety
    /// The address must be valid, mapped memory with room for a T.
    pub unsafe fn store<T>(self, value: T) {
        (self.0 as *mut T).write(value);
    }

    /// atomic load from the address
    /// # Safety
    /// The address must be valid, mapped memory holding a T.
    pub unsafe fn atomic_load<T: Atomic>(self, order: Ordering) -> T::Type {
        let loc = &*(self.0 as *const T);
        loc.load(order)
    }

    /// atomic store to the address
    /// # Safety
    /// The address must be valid, mapped memory with room for a T.
    pub unsafe fn atomic_store<T: Atomic>(self, value: T::Type, order: Ordering) {
        let loc = &*(self.0 as *const T);
        loc.store(value, order)
    }

    /// the address as a const pointer
    pub fn to_ptr<T>(self) -> *const T {
        self.0 as *const T
    }

    /// the address as a mutable pointer
    pub fn to_mut_ptr<T>(self) -> *mut T {
        self.0 as *mut T
    }
}

impl fmt::UpperHex for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:X}", self.0)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Copy a block of `size` bytes from `src` to `dst`. The regions may overlap
/// as long as `dst <= src`, which is the only direction compaction slides.
///
/// # Safety
/// Both regions must be valid mapped memory of at least `size` bytes.
pub unsafe fn copy_block(dst: Address, src: Address, size: ByteSize) {
    std::ptr::copy(src.to_ptr::<u8>(), dst.to_mut_ptr::<u8>(), size);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn align_up_is_idempotent() {
        let a = unsafe { Address::from_usize(0x1001) };
        assert_eq!(a.align_up(0x100).as_usize(), 0x1100);
        assert_eq!(a.align_up(0x100).align_up(0x100).as_usize(), 0x1100);
        assert!(a.align_up(8).is_aligned_to(8));
    }

    #[test]
    fn load_store_roundtrip() {
        let mut word: usize = 0;
        let a = Address::from_mut_ptr(&mut word);
        unsafe {
            a.store::<usize>(0xdead_beef);
            assert_eq!(a.load::<usize>(), 0xdead_beef);
        }
    }
}
