/*
 * SPDX-License-Identifier: MIT OR Apache-2.0
 */

//! Architecture agnostic memory attribute types and the memory-management
//! capability used to retag the framebuffer region.

use {
    super::{Address, AddressType},
    core::fmt::{self, Formatter},
    snafu::Snafu,
};

//--------------------------------------------------------------------------------------------------
// Public Definitions
//--------------------------------------------------------------------------------------------------

/// Memory attribute change errors.
#[derive(Debug, Snafu)]
pub enum MmuError {
    #[snafu(display("region is outside the translation tables"))]
    RegionOutOfRange,
    #[snafu(display("region is not aligned to the translation granule"))]
    MisalignedRegion,
    #[snafu(display("{}", err))]
    Other { err: &'static str },
}

/// Architecture agnostic memory attributes.
#[derive(Copy, Clone, Debug, Eq, PartialOrd, PartialEq)]
pub enum MemAttributes {
    /// Regular memory
    CacheableDRAM,
    /// Memory without caching
    NonCacheableDRAM,
    /// Device memory
    Device,
}

/// Architecture agnostic memory region access permissions.
#[derive(Copy, Clone, Debug, Eq, PartialOrd, PartialEq)]
pub enum AccessPermissions {
    /// Read-only access
    ReadOnly,
    /// Read-write access
    ReadWrite,
}

/// Summary structure of memory region properties.
#[derive(Copy, Clone, Debug, Eq, PartialOrd, PartialEq)]
pub struct AttributeFields {
    /// Attributes
    pub mem_attributes: MemAttributes,
    /// Permissions
    pub acc_perms: AccessPermissions,
    /// Disable executable code in this region
    pub execute_never: bool,
}

/// A region of memory described by start and exclusive end address.
#[derive(Copy, Clone, Debug, Eq, PartialOrd, PartialEq)]
pub struct MemoryRegion<ATYPE: AddressType> {
    start: Address<ATYPE>,
    end_exclusive: Address<ATYPE>,
}

/// Memory Management interfaces.
pub mod interface {
    use {super::*, crate::memory::Physical};

    /// Capability to change translation attributes of a memory region.
    ///
    /// Provided by the platform's MMU code; the display driver only consumes
    /// it to make the framebuffer write-back cacheable.
    pub trait MemoryManagement {
        /// Apply `attributes` to the given physical region.
        fn set_region_attributes(
            &mut self,
            region: MemoryRegion<Physical>,
            attributes: AttributeFields,
        ) -> Result<(), MmuError>;
    }
}

//--------------------------------------------------------------------------------------------------
// Public Code
//--------------------------------------------------------------------------------------------------

impl<ATYPE: AddressType> MemoryRegion<ATYPE> {
    /// Create an instance.
    pub fn new(start: Address<ATYPE>, end_exclusive: Address<ATYPE>) -> Self {
        assert!(start <= end_exclusive);

        Self {
            start,
            end_exclusive,
        }
    }

    /// Returns the start address.
    pub fn start_addr(&self) -> Address<ATYPE> {
        self.start
    }

    /// Returns the exclusive end address.
    pub fn end_addr_exclusive(&self) -> Address<ATYPE> {
        self.end_exclusive
    }

    /// Checks if self contains an address.
    pub fn contains(&self, addr: Address<ATYPE>) -> bool {
        self.start <= addr && addr < self.end_exclusive
    }

    /// Returns the size in bytes of this region.
    pub fn size(&self) -> usize {
        // Invariant: start <= end_exclusive, so do unchecked arithmetic.
        self.end_exclusive.as_usize() - self.start.as_usize()
    }
}

impl Default for AttributeFields {
    fn default() -> AttributeFields {
        AttributeFields {
            mem_attributes: MemAttributes::CacheableDRAM,
            acc_perms: AccessPermissions::ReadWrite,
            execute_never: true,
        }
    }
}

/// Human-readable output of AttributeFields
impl fmt::Display for AttributeFields {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let attr = match self.mem_attributes {
            MemAttributes::CacheableDRAM => "C",
            MemAttributes::NonCacheableDRAM => "NC",
            MemAttributes::Device => "Dev",
        };

        let acc_p = match self.acc_perms {
            AccessPermissions::ReadOnly => "RO",
            AccessPermissions::ReadWrite => "RW",
        };

        let xn = if self.execute_never { "PXN" } else { "PX" };

        write!(f, "{: <3} {} {: <3}", attr, acc_p, xn)
    }
}

//--------------------------------------------------------------------------------------------------
// Testing
//--------------------------------------------------------------------------------------------------
