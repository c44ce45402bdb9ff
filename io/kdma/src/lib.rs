// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! DMA bus address types, the DMA mapping interface consumed from the
//! platform, and the [`RegionStore`] that tracks externally supplied memory
//! regions shared with a device.
#![cfg_attr(not(test), no_std)]

extern crate alloc;

mod region;
#[cfg(test)]
mod tests;

use core::{alloc::Layout, ptr::NonNull};

use driver_base::DriverResult;

pub use self::region::{RegionId, RegionPin, RegionStore};

/// A bus memory address.
///
/// It's a wrapper type around an [`u64`].
#[repr(transparent)]
#[derive(Copy, Clone, Default, Ord, PartialOrd, Eq, PartialEq, Hash)]
pub struct DmaBusAddress(u64);

impl DmaBusAddress {
    /// Converts an [`u64`] to a bus address.
    pub const fn new(addr: u64) -> Self {
        Self(addr)
    }

    /// Converts the address to an [`u64`].
    pub const fn as_u64(self) -> u64 {
        self.0
    }

    /// Returns the address `offset` bytes past this one.
    pub const fn add(self, offset: usize) -> Self {
        Self(self.0 + offset as u64)
    }

    /// Low 32 bits, as programmed into a base-address-low register.
    pub const fn low_u32(self) -> u32 {
        self.0 as u32
    }

    /// High 32 bits, as programmed into a base-address-high register.
    pub const fn high_u32(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl From<u64> for DmaBusAddress {
    fn from(value: u64) -> Self {
        Self::new(value)
    }
}

impl core::fmt::Debug for DmaBusAddress {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("DmaBusAddress")
            .field(&format_args!("{:#X}", self.0))
            .finish()
    }
}

/// A block of **coherent** memory shared with a device.
#[derive(Debug, Clone, Copy)]
pub struct DmaInfo {
    /// The address at which the CPU accesses this memory region. This address
    /// is a virtual memory address used by the CPU to access memory.
    pub cpu_addr: NonNull<u8>,
    /// Represents the physical address of this memory region on the bus. The DMA
    /// controller uses this address to directly access memory.
    pub bus_addr: DmaBusAddress,
}

/// The device-visible view of an externally supplied memory handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DmaMapping {
    /// Bus address of the first byte of the handle.
    pub bus_addr: DmaBusAddress,
    /// Number of bytes mapped.
    pub len: usize,
}

impl DmaMapping {
    /// Translates `offset..offset + len` within the mapping to a bus address.
    ///
    /// Returns `None` for an empty or out-of-bounds range.
    pub fn translate(&self, offset: usize, len: usize) -> Option<DmaBusAddress> {
        let end = offset.checked_add(len)?;
        if len == 0 || end > self.len {
            return None;
        }
        Some(self.bus_addr.add(offset))
    }
}

/// The DMA services a platform provides to a driver.
///
/// Implementations turn caller memory handles into device-visible mappings
/// and allocate the coherent memory that descriptor rings live in.
pub trait DmaMapper: Send + Sync + 'static {
    /// The externally supplied memory handle type (e.g. a VMO).
    type Handle;

    /// Allocates zeroed, physically contiguous, coherent memory that meets
    /// `layout`.
    fn alloc_coherent(&self, layout: Layout) -> DriverResult<DmaInfo>;

    /// Frees memory returned by [`DmaMapper::alloc_coherent`].
    ///
    /// # Safety
    ///
    /// `dma` must come from `alloc_coherent` with the same `layout`, and
    /// the device must no longer access it.
    unsafe fn dealloc_coherent(&self, dma: DmaInfo, layout: Layout);

    /// Pins and maps `handle` for device access.
    fn map(&self, handle: &Self::Handle) -> DriverResult<DmaMapping>;

    /// Undoes [`DmaMapper::map`].
    fn unmap(&self, mapping: &DmaMapping);
}
