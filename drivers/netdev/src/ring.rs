// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Fixed-capacity descriptor ring with a parallel software side table.

use alloc::{sync::Arc, vec::Vec};
use core::{alloc::Layout, ptr::NonNull};

use driver_base::{DriverError, DriverResult};
use kdma::{DmaBusAddress, DmaInfo, DmaMapper};

use crate::desc::{Completed, Descriptor, HwDescriptor};

/// Ring base alignment required by the device.
const RING_ALIGN: usize = 128;

/// Returned by [`DescriptorRing::produce`] when every slot is occupied. It
/// hands the metadata back so nothing the caller owns is dropped.
#[derive(Debug)]
pub struct RingFull<M>(pub M);

/// A circular array of hardware descriptors in coherent memory.
///
/// Each position carries an optional software slot `M` (buffer id, region
/// pin) that lives exactly as long as the descriptor is occupied. Full and
/// empty are told apart by the occupancy counter, never by comparing the
/// produce and consume indices.
pub struct DescriptorRing<D: HwDescriptor, M, A: DmaMapper> {
    mapper: Arc<A>,
    dma: DmaInfo,
    layout: Layout,
    descs: NonNull<D>,
    slots: Vec<Option<M>>,
    produce: usize,
    consume: usize,
    occupancy: usize,
}

// The descriptors are only touched through `HwDescriptor`'s atomic accessors.
unsafe impl<D: HwDescriptor, M: Send, A: DmaMapper> Send for DescriptorRing<D, M, A> {}
unsafe impl<D: HwDescriptor, M: Sync, A: DmaMapper> Sync for DescriptorRing<D, M, A> {}

impl<D: HwDescriptor, M, A: DmaMapper> DescriptorRing<D, M, A> {
    /// Allocates a ring of `capacity` idle descriptors.
    ///
    /// `capacity` must be a non-zero power of two, and the ring's size in
    /// bytes must fit the 32-bit length register.
    pub fn new(mapper: Arc<A>, capacity: usize) -> DriverResult<Self> {
        if !capacity.is_power_of_two() {
            return Err(DriverError::InvalidInput);
        }
        let layout = Layout::array::<D>(capacity)
            .and_then(|layout| layout.align_to(RING_ALIGN))
            .map_err(|_| DriverError::InvalidInput)?;
        if layout.size() > u32::MAX as usize {
            return Err(DriverError::InvalidInput);
        }
        let dma = mapper.alloc_coherent(layout)?;
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            mapper,
            descs: dma.cpu_addr.cast(),
            dma,
            layout,
            slots,
            produce: 0,
            consume: 0,
            occupancy: 0,
        })
    }

    /// Number of descriptors.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of occupied descriptors.
    pub fn len(&self) -> usize {
        self.occupancy
    }

    pub fn is_empty(&self) -> bool {
        self.occupancy == 0
    }

    pub fn is_full(&self) -> bool {
        self.occupancy == self.capacity()
    }

    /// Number of descriptors that can be produced right now.
    pub fn free(&self) -> usize {
        self.capacity() - self.occupancy
    }

    /// Next position software will fill, i.e. the tail register value.
    pub fn produce_index(&self) -> usize {
        self.produce
    }

    /// Next position software will inspect for a completion.
    pub fn consume_index(&self) -> usize {
        self.consume
    }

    /// Bus address of descriptor 0.
    pub fn bus_addr(&self) -> DmaBusAddress {
        self.dma.bus_addr
    }

    /// Size of the descriptor array in bytes.
    pub fn byte_len(&self) -> usize {
        core::mem::size_of::<D>() * self.capacity()
    }

    fn desc(&self, idx: usize) -> &D {
        debug_assert!(idx < self.capacity());
        // SAFETY: `idx` is in bounds and the memory was zeroed at allocation,
        // which `HwDescriptor` guarantees to be a valid descriptor.
        unsafe { &*self.descs.as_ptr().add(idx) }
    }

    fn advance(&self, idx: usize) -> usize {
        (idx + 1) & (self.capacity() - 1)
    }

    /// Posts `desc` at the produce index and records `meta` for it.
    ///
    /// Returns the position written, or [`RingFull`] carrying `meta` back if
    /// the ring is full.
    pub fn produce(&mut self, desc: &Descriptor, meta: M) -> Result<usize, RingFull<M>> {
        if self.is_full() {
            return Err(RingFull(meta));
        }
        let idx = self.produce;
        self.slots[idx] = Some(meta);
        self.desc(idx).post(desc);
        self.produce = self.advance(idx);
        self.occupancy += 1;
        debug_assert!(self.occupancy <= self.capacity());
        Ok(idx)
    }

    /// Takes the completion at the consume index, if the device has written
    /// one back.
    ///
    /// The slot is `None` only if the side table lost track of the
    /// descriptor, which the pipelines treat as ring corruption.
    pub fn consume(&mut self) -> Option<(Completed, Option<M>)> {
        if self.is_empty() {
            return None;
        }
        let idx = self.consume;
        let completed = self.desc(idx).poll()?;
        self.desc(idx).clear();
        let meta = self.slots[idx].take();
        self.consume = self.advance(idx);
        self.occupancy -= 1;
        Some((completed, meta))
    }

    /// Empties the ring in consume order, handing every occupied position to
    /// `f` together with its completion if the device finished it.
    ///
    /// Only call this once the device has stopped DMA.
    pub fn drain(&mut self, mut f: impl FnMut(Option<Completed>, Option<M>)) {
        while !self.is_empty() {
            let idx = self.consume;
            let completed = self.desc(idx).poll();
            self.desc(idx).clear();
            let meta = self.slots[idx].take();
            self.consume = self.advance(idx);
            self.occupancy -= 1;
            f(completed, meta);
        }
        self.rewind();
    }

    /// Rewinds both indices to position 0 and idles every descriptor.
    ///
    /// Fails with [`DriverError::BadState`] if any position is occupied.
    pub fn reset(&mut self) -> DriverResult {
        if !self.is_empty() {
            return Err(DriverError::BadState);
        }
        self.rewind();
        Ok(())
    }

    fn rewind(&mut self) {
        for idx in 0..self.capacity() {
            self.desc(idx).clear();
        }
        self.produce = 0;
        self.consume = 0;
    }
}

impl<D: HwDescriptor, M, A: DmaMapper> Drop for DescriptorRing<D, M, A> {
    fn drop(&mut self) {
        // SAFETY: allocated in `new` with the same layout; the owner stops
        // device DMA before dropping the ring.
        unsafe { self.mapper.dealloc_coherent(self.dma, self.layout) };
    }
}
