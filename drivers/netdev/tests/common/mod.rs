// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Helpers shared by the integration tests.

#![allow(dead_code)]

use std::{
    sync::Arc,
    thread,
    time::{Duration, Instant},
};

use netdev::{
    BufferRegion, CompletionQueue, NetDataPlane, Netdev, NetdevConfig, RxSpaceBuffer,
    mock::{self, MockDevice, MockVmo},
};

pub type MockNetdev = Netdev<MockDevice, MockDevice>;

/// Region every test prepares: 1 MiB at bus address 1 MiB.
pub const REGION: u8 = 0;
pub const REGION_BASE: u64 = 0x10_0000;
pub const REGION_LEN: usize = 0x10_0000;
pub const BUF_LEN: usize = 2048;

const TIMEOUT: Duration = Duration::from_secs(5);

pub fn small_config() -> NetdevConfig {
    NetdevConfig {
        rx_ring_size: 8,
        tx_ring_size: 8,
        ..Default::default()
    }
}

/// A started device with [`REGION`] prepared.
pub fn started(config: NetdevConfig) -> (Arc<MockDevice>, MockNetdev) {
    let (mock, dev) = mock::netdev(config).unwrap();
    dev.prepare_vmo(
        REGION,
        &MockVmo {
            base: REGION_BASE,
            len: REGION_LEN,
        },
    )
    .unwrap();
    dev.start().unwrap();
    (mock, dev)
}

/// Space buffer `id`, placed at slot `id` of [`REGION`].
pub fn space(id: u32) -> RxSpaceBuffer {
    RxSpaceBuffer {
        id,
        region: REGION,
        offset: id as usize * BUF_LEN,
        len: BUF_LEN,
    }
}

/// One-piece packet body for TX buffer `id`.
pub fn piece(id: u32, len: usize) -> [BufferRegion; 1] {
    [BufferRegion {
        region: REGION,
        offset: id as usize * BUF_LEN,
        len,
    }]
}

/// Polls `f` until it yields a value, panicking after a few seconds.
pub fn wait_for<T>(what: &str, mut f: impl FnMut() -> Option<T>) -> T {
    let deadline = Instant::now() + TIMEOUT;
    loop {
        if let Some(value) = f() {
            return value;
        }
        assert!(Instant::now() < deadline, "timed out waiting for {what}");
        thread::sleep(Duration::from_millis(1));
    }
}

/// Collects exactly `n` completions from `queue`, oldest first.
pub fn collect<T>(queue: &CompletionQueue<T>, n: usize) -> Vec<T> {
    let mut out = Vec::with_capacity(n);
    wait_for("completions", || {
        out.extend(queue.drain());
        (out.len() >= n).then_some(())
    });
    assert_eq!(out.len(), n, "more completions than expected");
    out
}
