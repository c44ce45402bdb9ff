// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Data plane of a DMA network interface card.
//!
//! The crate manages the transmit and receive descriptor rings shared with
//! the device, pins caller memory regions while descriptors point into
//! them, and runs an interrupt reactor that turns hardware completions into
//! ordered completion queues.
//!
//! # Architecture
//!
//! - [`DescriptorRing`]: fixed-capacity circular array of hardware
//!   descriptors with a software side table; full and empty are decided by
//!   an occupancy counter.
//! - RX and TX pipelines: post caller buffers into the rings, ring the
//!   doorbell once per call, and deliver completions in post order through
//!   a [`CompletionQueue`].
//! - The interrupt reactor: a dedicated task that classifies interrupt
//!   causes and drives RX completion and TX reaping.
//! - [`Netdev`]: the `Stopped → Starting → Started → Stopping` state
//!   machine gating the data plane, exposed through the [`NetDataPlane`]
//!   and [`PortInfo`] capabilities.
//!
//! The hardware itself is reached only through [`NicTransport`] (registers
//! and the interrupt line) and [`kdma::DmaMapper`] (coherent memory and
//! region mapping).
//!
//! # Feature Flags
//!
//! - `mock`: builds [`mock`], a simulated device and a `std` thread
//!   spawner for tests.

#![cfg_attr(not(any(test, feature = "mock")), no_std)]

extern crate alloc;

mod completion;
mod config;
mod desc;
mod device;
mod reactor;
mod regs;
mod ring;
mod rx;
mod stats;
mod transport;
mod tx;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

#[doc(no_inline)]
pub use driver_base::{DriverError, DriverOps, DriverResult};
#[doc(no_inline)]
pub use kdma::{DmaBusAddress, DmaMapper, RegionId};

pub use self::{
    completion::{CompletionQueue, CompletionStatus, RxCompletion, TxCompletion},
    config::{
        DEFAULT_MAX_REGIONS, DEFAULT_RX_BUFFER_LEN, DEFAULT_RX_RING_SIZE, DEFAULT_TX_DESC_LEN,
        DEFAULT_TX_RING_SIZE, NetdevConfig,
    },
    desc::{Completed, DescErrors, DescStatus, Descriptor, HwDescriptor, RingDescriptor},
    device::{DeviceState, Netdev},
    regs::{CtrlFlags, IrqCause, Register, RingCtrl, StatusFlags},
    ring::{DescriptorRing, RingFull},
    rx::RxSpaceBuffer,
    stats::{NetdevStats, StatsSnapshot},
    transport::{IrqWait, NicTransport, TaskHandle, TaskSpawner},
    tx::{BufferRegion, TxBuffer},
};

/// The zero-copy data plane of a NIC.
///
/// Completions are not delivered through callbacks: the interrupt path
/// appends them to [`tx_completions`](Self::tx_completions) and
/// [`rx_completions`](Self::rx_completions), and the caller drains those
/// from its own context.
pub trait NetDataPlane: DriverOps {
    /// Caller memory handle accepted by [`prepare_vmo`](Self::prepare_vmo).
    type Handle;

    /// Enables DMA and interrupts and starts the interrupt reactor.
    ///
    /// Succeeds immediately if already started.
    fn start(&self) -> DriverResult;

    /// Disables the device, hands every outstanding buffer back through the
    /// completion queues and stops the reactor.
    ///
    /// Succeeds immediately if already stopped.
    fn stop(&self) -> DriverResult;

    /// Posts packets for transmission, all of them or none.
    ///
    /// Returns [`DriverError::WouldBlock`] if the TX ring lacks room; the
    /// caller keeps ownership and retries.
    fn queue_tx(&self, bufs: &[TxBuffer<'_>]) -> DriverResult;

    /// Offers empty buffers for reception. Returns how many of them, from
    /// the front, were accepted.
    fn queue_rx_space(&self, bufs: &[RxSpaceBuffer]) -> DriverResult<usize>;

    /// Maps `handle` for DMA and registers it as `region`.
    fn prepare_vmo(&self, region: RegionId, handle: &Self::Handle) -> DriverResult;

    /// Unmaps `region`. Refused with [`DriverError::ResourceBusy`] while a
    /// posted descriptor points into it.
    fn release_vmo(&self, region: RegionId) -> DriverResult;

    /// Transmit completions, in submission order.
    fn tx_completions(&self) -> &CompletionQueue<TxCompletion>;

    /// Receive completions, in post order.
    fn rx_completions(&self) -> &CompletionQueue<RxCompletion>;
}

/// Read-only port information.
pub trait PortInfo: DriverOps {
    /// Link state as of the last link-change interrupt.
    fn link_up(&self) -> bool;

    /// Size of the receive ring.
    fn rx_queue_len(&self) -> usize;

    /// Size of the transmit ring.
    fn tx_queue_len(&self) -> usize;

    /// A snapshot of the device counters.
    fn stats(&self) -> StatsSnapshot;
}
