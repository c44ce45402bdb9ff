// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Several callers share one device while it moves traffic, and `stop`
//! lands in the middle of it.

mod common;

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicUsize, Ordering},
    thread,
};

use common::*;
use netdev::{DriverError, NetDataPlane, RxSpaceBuffer, TxBuffer};

const TX_CALLERS: u32 = 3;
const RX_CALLERS: u32 = 2;
/// Accepted buffers across all callers before `stop` is issued.
const TRAFFIC: usize = 400;

/// Ids of caller `caller` are `caller << 24 | seq`.
fn caller_of(id: u32) -> u32 {
    id >> 24
}

fn tx_caller(dev: &MockNetdev, caller: u32, accepted: &AtomicUsize) -> Vec<u32> {
    let mut posted = Vec::new();
    for seq in 0.. {
        let id = caller << 24 | seq;
        let body = piece(seq % 64, 64);
        loop {
            match dev.queue_tx(&[TxBuffer { id, regions: &body }]) {
                Ok(()) => break,
                Err(DriverError::WouldBlock) => thread::yield_now(),
                Err(err) => {
                    assert_eq!(err, DriverError::BadState);
                    return posted;
                }
            }
        }
        posted.push(id);
        accepted.fetch_add(1, Ordering::Relaxed);
        thread::yield_now();
    }
    unreachable!()
}

fn rx_caller(dev: &MockNetdev, caller: u32, accepted: &AtomicUsize) -> Vec<u32> {
    let mut posted = Vec::new();
    let mut seq = 0;
    loop {
        let bufs: Vec<_> = (seq..seq + 3)
            .map(|s| RxSpaceBuffer {
                id: caller << 24 | s,
                ..space(s % 64)
            })
            .collect();
        match dev.queue_rx_space(&bufs) {
            Ok(n) => {
                posted.extend(bufs[..n].iter().map(|b| b.id));
                accepted.fetch_add(n, Ordering::Relaxed);
                seq += n as u32;
                thread::yield_now();
            }
            Err(DriverError::WouldBlock) => thread::yield_now(),
            Err(err) => {
                assert_eq!(err, DriverError::BadState);
                return posted;
            }
        }
    }
}

/// Checks that every posted id came back exactly once and that each
/// caller's ids came back in the order that caller posted them.
fn check_returned(posted: &HashMap<u32, Vec<u32>>, returned: &[u32]) {
    let total: usize = posted.values().map(Vec::len).sum();
    assert_eq!(returned.len(), total, "lost or duplicated buffers");
    for (caller, ids) in posted {
        let seen: Vec<_> = returned
            .iter()
            .copied()
            .filter(|&id| caller_of(id) == *caller)
            .collect();
        assert_eq!(&seen, ids, "caller {caller} reordered");
    }
}

#[test]
fn stop_during_multi_caller_traffic() {
    let (mock, dev) = started(small_config());
    let accepted = AtomicUsize::new(0);
    let done = AtomicBool::new(false);

    let (tx_posted, rx_posted) = thread::scope(|s| {
        let device = s.spawn(|| {
            while !done.load(Ordering::Acquire) {
                mock.transmit(4);
                mock.receive(&[128; 4]);
                thread::yield_now();
            }
        });
        let tx: Vec<_> = (0..TX_CALLERS)
            .map(|caller| {
                let (dev, accepted) = (&dev, &accepted);
                s.spawn(move || (caller, tx_caller(dev, caller, accepted)))
            })
            .collect();
        let rx: Vec<_> = (0..RX_CALLERS)
            .map(|caller| {
                let (dev, accepted) = (&dev, &accepted);
                s.spawn(move || (caller, rx_caller(dev, caller, accepted)))
            })
            .collect();

        wait_for("traffic", || (accepted.load(Ordering::Relaxed) >= TRAFFIC).then_some(()));
        dev.stop().unwrap();
        done.store(true, Ordering::Release);
        device.join().unwrap();

        let tx: HashMap<_, _> = tx.into_iter().map(|h| h.join().unwrap()).collect();
        let rx: HashMap<_, _> = rx.into_iter().map(|h| h.join().unwrap()).collect();
        (tx, rx)
    });

    let tx_returned: Vec<_> = dev.tx_completions().drain().iter().map(|c| c.buffer_id).collect();
    let rx_returned: Vec<_> = dev.rx_completions().drain().iter().map(|c| c.buffer_id).collect();
    check_returned(&tx_posted, &tx_returned);
    check_returned(&rx_posted, &rx_returned);
    assert!(tx_posted.values().all(|ids| !ids.is_empty()));

    let body = piece(0, 64);
    assert_eq!(dev.queue_tx(&[TxBuffer { id: 0, regions: &body }]), Err(DriverError::BadState));
    assert_eq!(dev.queue_rx_space(&[space(0)]), Err(DriverError::BadState));
}
