// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Receive path: space buffers in, filled buffers out in post order.

use alloc::{collections::VecDeque, sync::Arc, vec::Vec};

use driver_base::{DriverError, DriverResult};
use kdma::{DmaMapper, RegionId, RegionPin, RegionStore};
use log::{error, trace, warn};

use crate::{
    completion::{CompletionQueue, CompletionStatus, RxCompletion},
    desc::Descriptor,
    regs::Register,
    ring::{DescriptorRing, RingFull},
    stats::NetdevStats,
    transport::NicTransport,
};

/// An empty caller buffer offered to the device for receiving.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxSpaceBuffer {
    /// Caller identifier echoed back in the [`RxCompletion`].
    pub id: u32,
    pub region: RegionId,
    pub offset: usize,
    pub len: usize,
}

/// Side-table entry of a posted (or backlogged) space buffer.
pub(crate) struct RxSlot {
    buffer_id: u32,
    pin: RegionPin,
}

pub(crate) type RxRing<T, A> = DescriptorRing<<T as NicTransport>::RxDesc, RxSlot, A>;

pub(crate) struct RxPipeline<T: NicTransport, A: DmaMapper> {
    ring: RxRing<T, A>,
    /// Accepted buffers waiting for a free descriptor, bounded by the ring
    /// capacity.
    backlog: VecDeque<RxSlot>,
    buffer_len: usize,
    transport: Arc<T>,
    completions: Arc<CompletionQueue<RxCompletion>>,
    stats: Arc<NetdevStats>,
}

impl<T: NicTransport, A: DmaMapper> RxPipeline<T, A> {
    pub fn new(
        ring: RxRing<T, A>,
        buffer_len: usize,
        transport: Arc<T>,
        completions: Arc<CompletionQueue<RxCompletion>>,
        stats: Arc<NetdevStats>,
    ) -> Self {
        let backlog = VecDeque::with_capacity(ring.capacity());
        Self {
            ring,
            backlog,
            buffer_len,
            transport,
            completions,
            stats,
        }
    }

    pub fn ring(&self) -> &RxRing<T, A> {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut RxRing<T, A> {
        &mut self.ring
    }

    fn room(&self) -> usize {
        self.ring.free() + (self.ring.capacity() - self.backlog.len())
    }

    /// Accepts the longest prefix of `bufs` that fits in the ring plus the
    /// backlog and returns its length.
    ///
    /// Every buffer is validated and resolved before anything is posted; an
    /// invalid one rejects the whole call unchanged.
    pub fn queue_space(&mut self, store: &RegionStore<A>, bufs: &[RxSpaceBuffer]) -> DriverResult<usize> {
        let mut slots = Vec::with_capacity(bufs.len());
        for buf in bufs {
            if buf.len == 0 || buf.len > self.buffer_len {
                return Err(DriverError::InvalidInput);
            }
            slots.push(RxSlot {
                buffer_id: buf.id,
                pin: store.pin(buf.region, buf.offset, buf.len)?,
            });
        }
        if slots.is_empty() {
            return Ok(0);
        }

        let accepted = slots.len().min(self.room());
        if accepted == 0 {
            self.stats.backpressure();
            warn!("rx ring and backlog full, {} space buffer(s) refused", slots.len());
            return Err(DriverError::WouldBlock);
        }
        slots.truncate(accepted);

        let mut posted = self.refill();
        for slot in slots {
            if !self.backlog.is_empty() {
                self.backlog.push_back(slot);
                continue;
            }
            match self.post(slot) {
                Ok(()) => posted += 1,
                Err(RingFull(slot)) => self.backlog.push_back(slot),
            }
        }
        if posted != 0 {
            self.ring_doorbell();
        }
        Ok(accepted)
    }

    fn post(&mut self, slot: RxSlot) -> Result<(), RingFull<RxSlot>> {
        let desc = Descriptor {
            addr: slot.pin.addr(),
            len: slot.pin.len() as u16,
            end_of_packet: false,
        };
        self.ring.produce(&desc, slot).map(|_| ())
    }

    /// Moves backlogged buffers into free descriptors, oldest first.
    fn refill(&mut self) -> usize {
        let mut posted = 0;
        while let Some(slot) = self.backlog.pop_front() {
            if let Err(RingFull(slot)) = self.post(slot) {
                self.backlog.push_front(slot);
                break;
            }
            posted += 1;
        }
        posted
    }

    fn ring_doorbell(&self) {
        let tail = self.ring.produce_index() as u32;
        trace!("rx doorbell: tail {tail}");
        self.transport.write_reg(Register::Rdt, tail);
    }

    /// Delivers every completed descriptor in ring order, then reposts
    /// backlogged buffers into the freed slots.
    ///
    /// Returns the number of completions, or [`DriverError::Fatal`] if a
    /// completed descriptor has no buffer behind it.
    pub fn on_interrupt(&mut self) -> DriverResult<usize> {
        let mut done = Vec::new();
        let mut corrupted = false;
        while let Some((completed, slot)) = self.ring.consume() {
            let Some(slot) = slot else {
                error!("rx ring corrupted: completed descriptor has no buffer");
                corrupted = true;
                break;
            };
            let status = CompletionStatus::from_errors(completed.errors);
            let length = usize::from(completed.len);
            self.stats.rx_done(status.is_ok(), length);
            done.push(RxCompletion {
                buffer_id: slot.buffer_id,
                length,
                end_of_frame: completed.end_of_packet,
                status,
            });
        }
        let count = self.completions.push_all(done);
        if corrupted {
            return Err(DriverError::Fatal);
        }
        if self.refill() != 0 {
            self.ring_doorbell();
        }
        Ok(count)
    }

    /// Hands back every outstanding buffer once DMA is off: completed ones
    /// with their data, the rest (and the backlog) as cancelled.
    pub fn drain(&mut self) -> usize {
        let mut done = Vec::new();
        let stats = &self.stats;
        self.ring.drain(|completed, slot| {
            let Some(slot) = slot else {
                error!("rx ring corrupted: occupied descriptor without a buffer");
                return;
            };
            done.push(match completed {
                Some(completed) => {
                    let status = CompletionStatus::from_errors(completed.errors);
                    let length = usize::from(completed.len);
                    stats.rx_done(status.is_ok(), length);
                    RxCompletion {
                        buffer_id: slot.buffer_id,
                        length,
                        end_of_frame: completed.end_of_packet,
                        status,
                    }
                }
                None => cancelled(stats, slot.buffer_id),
            });
        });
        for slot in self.backlog.drain(..) {
            done.push(cancelled(stats, slot.buffer_id));
        }
        self.completions.push_all(done)
    }
}

fn cancelled(stats: &NetdevStats, buffer_id: u32) -> RxCompletion {
    stats.rx_cancelled();
    RxCompletion {
        buffer_id,
        length: 0,
        end_of_frame: false,
        status: CompletionStatus::Cancelled,
    }
}
