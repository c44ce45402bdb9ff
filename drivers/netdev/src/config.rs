// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Construction-time tunables.

use driver_base::{DriverError, DriverResult};

use crate::desc::RingDescriptor;

/// Default number of RX descriptors.
pub const DEFAULT_RX_RING_SIZE: usize = 256;
/// Default number of TX descriptors.
pub const DEFAULT_TX_RING_SIZE: usize = 256;
/// Default size of one receive space buffer.
pub const DEFAULT_RX_BUFFER_LEN: usize = 2048;
/// Default number of bytes one TX descriptor may carry.
pub const DEFAULT_TX_DESC_LEN: usize = 2048;
/// Default capacity of the region table.
pub const DEFAULT_MAX_REGIONS: usize = 32;

/// The descriptor length field is 16 bits wide.
const MAX_DESC_LEN: usize = u16::MAX as usize;

/// Ring and buffer geometry, fixed for the lifetime of a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NetdevConfig {
    /// Number of RX descriptors, a power of two.
    pub rx_ring_size: usize,
    /// Number of TX descriptors, a power of two.
    pub tx_ring_size: usize,
    /// Largest receive space buffer accepted.
    pub rx_buffer_len: usize,
    /// Largest chunk carried by one TX descriptor.
    pub tx_desc_len: usize,
    /// Maximum number of prepared memory regions.
    pub max_regions: usize,
}

impl Default for NetdevConfig {
    fn default() -> Self {
        Self {
            rx_ring_size: DEFAULT_RX_RING_SIZE,
            tx_ring_size: DEFAULT_TX_RING_SIZE,
            rx_buffer_len: DEFAULT_RX_BUFFER_LEN,
            tx_desc_len: DEFAULT_TX_DESC_LEN,
            max_regions: DEFAULT_MAX_REGIONS,
        }
    }
}

impl NetdevConfig {
    /// Checks the geometry, returning [`DriverError::InvalidInput`] if any
    /// field is unusable.
    pub fn validate(&self) -> DriverResult {
        // The ring length registers hold the size in bytes.
        let ring_ok = |size: usize| {
            size.is_power_of_two()
                && size
                    .checked_mul(core::mem::size_of::<RingDescriptor>())
                    .is_some_and(|bytes| bytes <= u32::MAX as usize)
        };
        let len_ok = |len: usize| len != 0 && len <= MAX_DESC_LEN;
        if !ring_ok(self.rx_ring_size)
            || !ring_ok(self.tx_ring_size)
            || !len_ok(self.rx_buffer_len)
            || !len_ok(self.tx_desc_len)
            || self.max_regions == 0
            || self.max_regions > usize::from(u8::MAX) + 1
        {
            return Err(DriverError::InvalidInput);
        }
        Ok(())
    }
}
