// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Hardware descriptor layouts.
//!
//! A descriptor is shared between the CPU and a bus-mastering device, so
//! every field is accessed atomically and ownership is handed over through
//! the status word: software publishes a descriptor by setting
//! [`DescStatus::OWN`] last, the device publishes a completion by setting
//! [`DescStatus::DD`] last.

use core::sync::atomic::{AtomicU16, AtomicU64, Ordering};

use bitflags::bitflags;
use kdma::DmaBusAddress;
use static_assertions::const_assert_eq;

bitflags! {
    /// Ownership and completion bits of a descriptor's status word.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DescStatus: u16 {
        /// Descriptor done, written back by the device.
        const DD = 1 << 0;
        /// End of packet.
        const EOP = 1 << 1;
        /// Owned by the device.
        const OWN = 1 << 15;
    }
}

bitflags! {
    /// Per-packet errors reported by the device in a completed descriptor.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct DescErrors: u16 {
        /// CRC or alignment error.
        const CRC = 1 << 0;
        /// Symbol error.
        const SYMBOL = 1 << 1;
        /// Frame longer than the space buffer.
        const FRAME_TOO_LONG = 1 << 2;
        /// Receive data error.
        const RX_DATA = 1 << 7;
        /// Transmit FIFO underrun.
        const TX_UNDERRUN = 1 << 8;
    }
}

/// What software hands to the device in one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Descriptor {
    /// Bus address of the buffer.
    pub addr: DmaBusAddress,
    /// Buffer length in bytes.
    pub len: u16,
    /// Last descriptor of a packet (TX only).
    pub end_of_packet: bool,
}

/// Result fields the device wrote back into a completed descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Completed {
    /// Bytes transferred.
    pub len: u16,
    /// Last descriptor of a packet or frame.
    pub end_of_packet: bool,
    /// Per-packet error bits, empty on success.
    pub errors: DescErrors,
}

/// A device-specific descriptor layout living in coherent ring memory.
///
/// # Safety
///
/// Implementors must be `#[repr(C)]` types for which the all-zero bit
/// pattern is a valid, idle descriptor, and every method must only use
/// interior mutability that stays sound while the device concurrently reads
/// and writes the same memory.
pub unsafe trait HwDescriptor: Send + Sync + 'static {
    /// Fills the descriptor and hands it to the device.
    fn post(&self, desc: &Descriptor);

    /// Returns the written-back result once the device is done with the
    /// descriptor, `None` while it is still in flight.
    fn poll(&self) -> Option<Completed>;

    /// Returns the descriptor to the idle, software-owned state.
    fn clear(&self);

    /// Whether the descriptor is posted and not yet completed.
    fn is_posted(&self) -> bool;
}

/// The legacy 16-byte descriptor shared by the RX and TX rings.
#[repr(C, align(16))]
#[derive(Debug, Default)]
pub struct RingDescriptor {
    addr: AtomicU64,
    length: AtomicU16,
    flags: AtomicU16,
    status: AtomicU16,
    errors: AtomicU16,
}

const_assert_eq!(core::mem::size_of::<RingDescriptor>(), 16);

impl RingDescriptor {
    /// Device side: reads a posted descriptor as `(addr, len, end_of_packet)`,
    /// or `None` if software has not handed it over.
    pub fn fetch(&self) -> Option<(DmaBusAddress, u16, bool)> {
        let status = DescStatus::from_bits_retain(self.status.load(Ordering::Acquire));
        if !status.contains(DescStatus::OWN) {
            return None;
        }
        let flags = DescStatus::from_bits_retain(self.flags.load(Ordering::Relaxed));
        Some((
            DmaBusAddress::new(self.addr.load(Ordering::Relaxed)),
            self.length.load(Ordering::Relaxed),
            flags.contains(DescStatus::EOP),
        ))
    }

    /// Device side: writes back a completion and gives the descriptor back
    /// to software.
    pub fn write_back(&self, len: u16, end_of_packet: bool, errors: DescErrors) {
        self.length.store(len, Ordering::Relaxed);
        self.errors.store(errors.bits(), Ordering::Relaxed);
        let mut status = DescStatus::DD;
        status.set(DescStatus::EOP, end_of_packet);
        self.status.store(status.bits(), Ordering::Release);
    }
}

unsafe impl HwDescriptor for RingDescriptor {
    fn post(&self, desc: &Descriptor) {
        let mut flags = DescStatus::empty();
        flags.set(DescStatus::EOP, desc.end_of_packet);
        self.addr.store(desc.addr.as_u64(), Ordering::Relaxed);
        self.length.store(desc.len, Ordering::Relaxed);
        self.flags.store(flags.bits(), Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.status.store(DescStatus::OWN.bits(), Ordering::Release);
    }

    fn poll(&self) -> Option<Completed> {
        let status = DescStatus::from_bits_retain(self.status.load(Ordering::Acquire));
        if !status.contains(DescStatus::DD) || status.contains(DescStatus::OWN) {
            return None;
        }
        Some(Completed {
            len: self.length.load(Ordering::Relaxed),
            end_of_packet: status.contains(DescStatus::EOP),
            errors: DescErrors::from_bits_retain(self.errors.load(Ordering::Relaxed)),
        })
    }

    fn clear(&self) {
        self.addr.store(0, Ordering::Relaxed);
        self.length.store(0, Ordering::Relaxed);
        self.flags.store(0, Ordering::Relaxed);
        self.errors.store(0, Ordering::Relaxed);
        self.status.store(0, Ordering::Release);
    }

    fn is_posted(&self) -> bool {
        DescStatus::from_bits_retain(self.status.load(Ordering::Acquire)).contains(DescStatus::OWN)
    }
}
