use core::{
    fmt,
    ptr::{self, NonNull},
};

struct Hex(usize);
impl fmt::Debug for Hex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

/// Physical Address
///
/// Physical memory is identity-mapped, so a physical address converts to and
/// from a kernel pointer without translation.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PhysAddr(usize);

impl fmt::Debug for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PhysAddr").field(&Hex(self.0)).finish()
    }
}

impl fmt::LowerHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::LowerHex::fmt(&self.0, f)
    }
}

impl fmt::UpperHex for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::UpperHex::fmt(&self.0, f)
    }
}

impl fmt::Pointer for PhysAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let ptr = ptr::without_provenance::<u8>(self.0);
        fmt::Pointer::fmt(&ptr, f)
    }
}

impl From<NonNull<u8>> for PhysAddr {
    fn from(ptr: NonNull<u8>) -> Self {
        Self(ptr.as_ptr().expose_provenance())
    }
}

impl PhysAddr {
    #[must_use]
    pub const fn new(addr: usize) -> Self {
        Self(addr)
    }

    #[must_use]
    pub const fn addr(self) -> usize {
        self.0
    }

    /// Returns `true` if the address is a multiple of `align`.
    ///
    /// `align` must be a power of two.
    #[must_use]
    pub const fn is_aligned(self, align: usize) -> bool {
        self.0 & (align - 1) == 0
    }

    /// Rounds the address up to the next multiple of `align`.
    ///
    /// `align` must be a power of two.
    #[must_use]
    pub const fn align_up(self, align: usize) -> Self {
        Self((self.0 + align - 1) & !(align - 1))
    }

    /// Rounds the address down to a multiple of `align`.
    ///
    /// `align` must be a power of two.
    #[must_use]
    pub const fn align_down(self, align: usize) -> Self {
        Self(self.0 & !(align - 1))
    }

    #[must_use]
    pub const fn byte_add(self, bytes: usize) -> Self {
        Self(self.0 + bytes)
    }

    /// Returns the number of bytes from `origin` up to `self`.
    ///
    /// # Panics
    ///
    /// Panics if `origin` is above `self`.
    #[must_use]
    pub const fn offset_from(self, origin: Self) -> usize {
        assert!(origin.0 <= self.0);
        self.0 - origin.0
    }

    /// Returns a pointer to the memory at this address.
    ///
    /// # Panics
    ///
    /// Panics if the address is zero.
    #[must_use]
    pub fn as_non_null(self) -> NonNull<u8> {
        NonNull::new(ptr::with_exposed_provenance_mut(self.0)).unwrap()
    }
}
