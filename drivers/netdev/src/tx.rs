// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Transmit path: packets in, one doorbell per call, completions out in
//! submission order.

use alloc::{sync::Arc, vec::Vec};

use driver_base::{DriverError, DriverResult};
use kdma::{DmaMapper, RegionId, RegionPin, RegionStore};
use log::{error, trace, warn};

use crate::{
    completion::{CompletionQueue, CompletionStatus, TxCompletion},
    desc::{DescErrors, Descriptor},
    regs::Register,
    ring::{DescriptorRing, RingFull},
    stats::NetdevStats,
    transport::NicTransport,
};

/// One contiguous piece of an outgoing packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferRegion {
    pub region: RegionId,
    pub offset: usize,
    pub len: usize,
}

/// An outgoing packet made of one or more pieces.
#[derive(Debug, Clone, Copy)]
pub struct TxBuffer<'a> {
    /// Caller identifier echoed back in the [`TxCompletion`].
    pub id: u32,
    pub regions: &'a [BufferRegion],
}

/// Side-table entry of a posted TX descriptor. Only the last descriptor of
/// a packet carries the packet's buffer id.
pub(crate) struct TxSlot {
    packet: Option<u32>,
    _pin: RegionPin,
}

pub(crate) type TxRing<T, A> = DescriptorRing<<T as NicTransport>::TxDesc, TxSlot, A>;

pub(crate) struct TxPipeline<T: NicTransport, A: DmaMapper> {
    ring: TxRing<T, A>,
    desc_len: usize,
    /// Errors of the already reaped descriptors of the packet in progress.
    pending_errors: DescErrors,
    transport: Arc<T>,
    completions: Arc<CompletionQueue<TxCompletion>>,
    stats: Arc<NetdevStats>,
}

impl<T: NicTransport, A: DmaMapper> TxPipeline<T, A> {
    pub fn new(
        ring: TxRing<T, A>,
        desc_len: usize,
        transport: Arc<T>,
        completions: Arc<CompletionQueue<TxCompletion>>,
        stats: Arc<NetdevStats>,
    ) -> Self {
        Self {
            ring,
            desc_len,
            pending_errors: DescErrors::empty(),
            transport,
            completions,
            stats,
        }
    }

    pub fn ring(&self) -> &TxRing<T, A> {
        &self.ring
    }

    pub fn ring_mut(&mut self) -> &mut TxRing<T, A> {
        &mut self.ring
    }

    /// Resolves every piece of every packet into descriptors without
    /// touching the ring.
    fn plan(&self, store: &RegionStore<A>, bufs: &[TxBuffer<'_>]) -> DriverResult<Vec<(Descriptor, TxSlot)>> {
        let mut plan = Vec::new();
        for buf in bufs {
            let Some(last) = buf.regions.len().checked_sub(1) else {
                return Err(DriverError::InvalidInput);
            };
            for (i, part) in buf.regions.iter().enumerate() {
                let pin = store.pin(part.region, part.offset, part.len)?;
                let chunks = pin.len().div_ceil(self.desc_len);
                if plan.len() + chunks > self.ring.capacity() {
                    return Err(DriverError::InvalidInput);
                }
                for chunk in 0..chunks {
                    let offset = chunk * self.desc_len;
                    let len = self.desc_len.min(pin.len() - offset);
                    let piece = pin.split(offset, len).ok_or(DriverError::InvalidInput)?;
                    let end_of_packet = i == last && chunk + 1 == chunks;
                    plan.push((
                        Descriptor {
                            addr: piece.addr(),
                            len: len as u16,
                            end_of_packet,
                        },
                        TxSlot {
                            packet: end_of_packet.then_some(buf.id),
                            _pin: piece,
                        },
                    ));
                }
            }
        }
        Ok(plan)
    }

    /// Posts all of `bufs` or none of them.
    ///
    /// Fails with [`DriverError::InvalidInput`] for an empty packet, a bad
    /// region range or a batch larger than the whole ring, and with
    /// [`DriverError::WouldBlock`] if the ring lacks room even after
    /// reaping.
    pub fn queue(&mut self, store: &RegionStore<A>, bufs: &[TxBuffer<'_>]) -> DriverResult {
        let plan = self.plan(store, bufs)?;
        if plan.is_empty() {
            return Ok(());
        }
        if plan.len() > self.ring.free() {
            self.reap()?;
            if plan.len() > self.ring.free() {
                self.stats.backpressure();
                warn!(
                    "tx ring full: {} descriptor(s) needed, {} free",
                    plan.len(),
                    self.ring.free()
                );
                return Err(DriverError::WouldBlock);
            }
        }

        let count = plan.len();
        for (desc, slot) in plan {
            if let Err(RingFull(_)) = self.ring.produce(&desc, slot) {
                error!("tx ring lost free space while posting");
                return Err(DriverError::Fatal);
            }
        }
        self.stats.tx_posted(count);
        let tail = self.ring.produce_index() as u32;
        trace!("tx doorbell: {count} descriptor(s), tail {tail}");
        self.transport.write_reg(Register::Tdt, tail);
        Ok(())
    }

    /// Completes every packet whose descriptors the device has finished,
    /// in submission order. Returns the number of packets completed.
    pub fn reap(&mut self) -> DriverResult<usize> {
        let mut done = Vec::new();
        let mut corrupted = false;
        while let Some((completed, slot)) = self.ring.consume() {
            let Some(slot) = slot else {
                error!("tx ring corrupted: completed descriptor has no slot");
                self.pending_errors = DescErrors::empty();
                corrupted = true;
                break;
            };
            if completed.end_of_packet != slot.packet.is_some() {
                error!(
                    "tx ring corrupted: end-of-packet {} on descriptor for packet {:?}",
                    completed.end_of_packet, slot.packet
                );
                if let Some(buffer_id) = slot.packet {
                    self.stats.tx_cancelled();
                    done.push(TxCompletion {
                        buffer_id,
                        status: CompletionStatus::Cancelled,
                    });
                }
                // Errors of the abandoned packet must not leak into the next one.
                self.pending_errors = DescErrors::empty();
                corrupted = true;
                break;
            }
            self.pending_errors |= completed.errors;
            if let Some(buffer_id) = slot.packet {
                let status = CompletionStatus::from_errors(core::mem::take(&mut self.pending_errors));
                self.stats.tx_done(status.is_ok());
                done.push(TxCompletion { buffer_id, status });
            }
        }
        let count = self.completions.push_all(done);
        if corrupted {
            return Err(DriverError::Fatal);
        }
        Ok(count)
    }

    /// Hands back every outstanding packet once DMA is off. A packet is
    /// reported as sent only if all of its descriptors completed.
    pub fn drain(&mut self) -> usize {
        let mut done = Vec::new();
        let mut errors = core::mem::take(&mut self.pending_errors);
        let mut incomplete = false;
        let stats = &self.stats;
        self.ring.drain(|completed, slot| {
            let Some(slot) = slot else {
                error!("tx ring corrupted: occupied descriptor without a slot");
                incomplete = true;
                return;
            };
            match completed {
                Some(completed) => errors |= completed.errors,
                None => incomplete = true,
            }
            if let Some(buffer_id) = slot.packet {
                let status = if core::mem::take(&mut incomplete) {
                    stats.tx_cancelled();
                    CompletionStatus::Cancelled
                } else {
                    let status = CompletionStatus::from_errors(errors);
                    stats.tx_done(status.is_ok());
                    status
                };
                errors = DescErrors::empty();
                done.push(TxCompletion { buffer_id, status });
            }
        });
        self.completions.push_all(done)
    }
}
