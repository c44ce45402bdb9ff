// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

use core::sync::atomic::{AtomicU64, Ordering};

/// Device counters, updated lock-free from the data plane and the reactor.
#[derive(Debug, Default)]
pub struct NetdevStats {
    tx_packets: AtomicU64,
    tx_descriptors: AtomicU64,
    tx_errors: AtomicU64,
    tx_cancelled: AtomicU64,
    rx_packets: AtomicU64,
    rx_bytes: AtomicU64,
    rx_errors: AtomicU64,
    rx_cancelled: AtomicU64,
    backpressure: AtomicU64,
    interrupts: AtomicU64,
}

/// A point-in-time copy of [`NetdevStats`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub tx_packets: u64,
    pub tx_descriptors: u64,
    pub tx_errors: u64,
    pub tx_cancelled: u64,
    pub rx_packets: u64,
    pub rx_bytes: u64,
    pub rx_errors: u64,
    pub rx_cancelled: u64,
    /// Queue calls refused because a ring or backlog was full.
    pub backpressure: u64,
    pub interrupts: u64,
}

fn bump(counter: &AtomicU64, n: u64) {
    counter.fetch_add(n, Ordering::Relaxed);
}

impl NetdevStats {
    pub(crate) fn tx_posted(&self, descriptors: usize) {
        bump(&self.tx_descriptors, descriptors as u64);
    }

    pub(crate) fn tx_done(&self, ok: bool) {
        bump(if ok { &self.tx_packets } else { &self.tx_errors }, 1);
    }

    pub(crate) fn tx_cancelled(&self) {
        bump(&self.tx_cancelled, 1);
    }

    pub(crate) fn rx_done(&self, ok: bool, len: usize) {
        if ok {
            bump(&self.rx_packets, 1);
            bump(&self.rx_bytes, len as u64);
        } else {
            bump(&self.rx_errors, 1);
        }
    }

    pub(crate) fn rx_cancelled(&self) {
        bump(&self.rx_cancelled, 1);
    }

    pub(crate) fn backpressure(&self) {
        bump(&self.backpressure, 1);
    }

    pub(crate) fn interrupt(&self) {
        bump(&self.interrupts, 1);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let load = |c: &AtomicU64| c.load(Ordering::Relaxed);
        StatsSnapshot {
            tx_packets: load(&self.tx_packets),
            tx_descriptors: load(&self.tx_descriptors),
            tx_errors: load(&self.tx_errors),
            tx_cancelled: load(&self.tx_cancelled),
            rx_packets: load(&self.rx_packets),
            rx_bytes: load(&self.rx_bytes),
            rx_errors: load(&self.rx_errors),
            rx_cancelled: load(&self.rx_cancelled),
            backpressure: load(&self.backpressure),
            interrupts: load(&self.interrupts),
        }
    }
}
