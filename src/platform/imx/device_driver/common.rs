/*
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Common device driver code.

use {
    crate::memory::{Address, Virtual},
    core::{fmt, marker::PhantomData, ops},
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// A capability around a register block: holding one is holding the right
/// to touch the device at `base_addr`.
pub struct MMIODerefWrapper<T> {
    base_addr: Address<Virtual>,
    phantom: PhantomData<fn() -> T>,
}

/// A wrapper type for usize with integrated range bound check.
#[derive(Copy, Clone)]
pub struct BoundedUsize<const MAX_INCLUSIVE: usize>(usize);

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl<T> MMIODerefWrapper<T> {
    /// Create an instance.
    ///
    /// # Safety
    ///
    /// - The caller must ensure `base_addr` maps a live register block of
    ///   layout `T` for the wrapper's whole lifetime.
    pub const unsafe fn new(base_addr: Address<Virtual>) -> Self {
        Self {
            base_addr,
            phantom: PhantomData,
        }
    }
}

/// Deref to RegisterBlock.
///
/// Allows writing
/// ```text
/// self.registers.DISP_PARA.read()
/// ```
/// instead of something along the lines of
/// ```text
/// unsafe { (*Lcdif::ptr()).DISP_PARA.read() }
/// ```
impl<T> ops::Deref for MMIODerefWrapper<T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        unsafe { &*(self.base_addr.as_usize() as *const _) }
    }
}

impl<const MAX_INCLUSIVE: usize> BoundedUsize<{ MAX_INCLUSIVE }> {
    pub const MAX_INCLUSIVE: usize = MAX_INCLUSIVE;

    /// Creates a new instance if number <= MAX_INCLUSIVE.
    pub const fn new(number: usize) -> Self {
        assert!(number <= MAX_INCLUSIVE);

        Self(number)
    }

    /// Return the wrapped number.
    pub const fn get(self) -> usize {
        self.0
    }
}

impl<const MAX_INCLUSIVE: usize> fmt::Display for BoundedUsize<{ MAX_INCLUSIVE }> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
