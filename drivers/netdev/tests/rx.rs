// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

mod common;

use common::*;
use netdev::{
    CompletionStatus, DescErrors, DriverError, IrqCause, NetDataPlane, PortInfo, Register,
    RxCompletion, RxSpaceBuffer,
    mock::RxFrame,
};

fn ok(buffer_id: u32, length: usize) -> RxCompletion {
    RxCompletion {
        buffer_id,
        length,
        end_of_frame: true,
        status: CompletionStatus::Ok,
    }
}

fn cancelled(buffer_id: u32) -> RxCompletion {
    RxCompletion {
        buffer_id,
        length: 0,
        end_of_frame: false,
        status: CompletionStatus::Cancelled,
    }
}

#[test]
fn first_two_of_four_complete_in_order() {
    let (mock, dev) = started(small_config());
    let bells = mock.doorbells(Register::Rdt);
    assert_eq!(dev.queue_rx_space(&[space(1), space(2), space(3), space(4)]), Ok(4));
    assert_eq!(mock.doorbells(Register::Rdt), bells + 1);

    assert_eq!(mock.receive(&[60, 1514]), 2);
    assert_eq!(collect(dev.rx_completions(), 2), [ok(1, 60), ok(2, 1514)]);
    assert!(dev.rx_completions().is_empty());
}

#[test]
fn round_trip_keeps_id_and_length() {
    let (mock, dev) = started(small_config());
    assert_eq!(dev.queue_rx_space(&[space(7)]), Ok(1));
    assert_eq!(mock.receive(&[1234]), 1);
    assert_eq!(collect(dev.rx_completions(), 1), [ok(7, 1234)]);
    assert_eq!(dev.stats().rx_bytes, 1234);
}

#[test]
fn tail_follows_posted_buffers() {
    let (mock, dev) = started(small_config());
    assert_eq!(mock.peek(Register::Rdt), 0);
    dev.queue_rx_space(&[space(3), space(4), space(5)]).unwrap();
    assert_eq!(mock.peek(Register::Rdt), 3);
    assert_eq!(
        dev.resolve(REGION, 3 * BUF_LEN, BUF_LEN).unwrap().as_u64(),
        REGION_BASE + 3 * BUF_LEN as u64
    );
}

#[test]
fn hardware_errors_do_not_desync_the_ring() {
    let (mock, dev) = started(small_config());
    dev.queue_rx_space(&[space(1), space(2)]).unwrap();
    let bad = RxFrame {
        errors: DescErrors::CRC,
        ..RxFrame::ok(64)
    };
    assert_eq!(mock.complete_rx(&[bad, RxFrame::ok(128)]), 2);
    mock.raise_irq(IrqCause::RXT0);

    let done = collect(dev.rx_completions(), 2);
    assert_eq!(done[0].buffer_id, 1);
    assert_eq!(done[0].status, CompletionStatus::HardwareError(DescErrors::CRC));
    assert_eq!(done[1], ok(2, 128));
    assert_eq!(dev.stats().rx_errors, 1);
}

#[test]
fn frame_spanning_buffers_marks_the_last_one() {
    let (mock, dev) = started(small_config());
    dev.queue_rx_space(&[space(1), space(2)]).unwrap();
    let head = RxFrame {
        end_of_frame: false,
        ..RxFrame::ok(BUF_LEN as u16)
    };
    mock.complete_rx(&[head, RxFrame::ok(500)]);
    mock.raise_irq(IrqCause::RXT0);

    let done = collect(dev.rx_completions(), 2);
    assert_eq!((done[0].buffer_id, done[0].end_of_frame), (1, false));
    assert_eq!((done[1].buffer_id, done[1].end_of_frame), (2, true));
}

#[test]
fn overflow_goes_to_backlog_then_reposts_in_order() {
    let (mock, dev) = started(small_config());
    let first: Vec<_> = (0..12).map(space).collect();
    assert_eq!(dev.queue_rx_space(&first), Ok(12));

    // 8 in the ring, 4 in the backlog: only 4 more fit.
    let second: Vec<_> = (12..20).map(space).collect();
    assert_eq!(dev.queue_rx_space(&second), Ok(4));
    let err = dev.queue_rx_space(&[space(20)]).unwrap_err();
    assert_eq!(err, DriverError::WouldBlock);
    assert!(err.is_retryable());
    assert_eq!(dev.stats().backpressure, 1);

    let bells = mock.doorbells(Register::Rdt);
    assert_eq!(mock.receive(&[100; 8]), 8);
    let ids: Vec<_> = collect(dev.rx_completions(), 8).iter().map(|c| c.buffer_id).collect();
    assert_eq!(ids, (0..8).collect::<Vec<_>>());

    // The reactor moves the backlog into the freed descriptors and rings
    // the doorbell once.
    wait_for("backlog repost", || (mock.doorbells(Register::Rdt) == bells + 1).then_some(()));
    assert_eq!(mock.receive(&[200; 8]), 8);
    let ids: Vec<_> = collect(dev.rx_completions(), 8).iter().map(|c| c.buffer_id).collect();
    assert_eq!(ids, (8..16).collect::<Vec<_>>());
}

#[test]
fn invalid_buffers_reject_the_whole_call() {
    let (mock, dev) = started(small_config());
    let bells = mock.doorbells(Register::Rdt);
    let zero = RxSpaceBuffer { len: 0, ..space(1) };
    let huge = RxSpaceBuffer {
        len: BUF_LEN + 1,
        ..space(1)
    };
    let unknown = RxSpaceBuffer {
        region: 9,
        ..space(1)
    };
    let outside = RxSpaceBuffer {
        offset: REGION_LEN - 16,
        ..space(1)
    };

    assert_eq!(dev.queue_rx_space(&[space(0), zero]), Err(DriverError::InvalidInput));
    assert_eq!(dev.queue_rx_space(&[space(0), huge]), Err(DriverError::InvalidInput));
    assert_eq!(dev.queue_rx_space(&[space(0), unknown]), Err(DriverError::NotFound));
    assert_eq!(dev.queue_rx_space(&[space(0), outside]), Err(DriverError::InvalidInput));
    assert_eq!(dev.queue_rx_space(&[]), Ok(0));
    assert_eq!(mock.doorbells(Register::Rdt), bells);

    // Nothing was posted, so nothing comes back on stop.
    dev.stop().unwrap();
    assert!(dev.rx_completions().is_empty());
}

#[test]
fn stop_returns_outstanding_space_buffers() {
    let (mock, dev) = started(small_config());
    let bufs: Vec<_> = (1..=10).map(space).collect();
    assert_eq!(dev.queue_rx_space(&bufs), Ok(10));
    assert_eq!(mock.receive(&[64]), 1);
    assert_eq!(collect(dev.rx_completions(), 1), [ok(1, 64)]);

    // Filled by the device but not yet seen by the reactor.
    mock.complete_rx(&[RxFrame::ok(80)]);

    dev.stop().unwrap();
    let mut expected = vec![ok(2, 80)];
    expected.extend((3..=10).map(cancelled));
    assert_eq!(dev.rx_completions().drain(), expected);
    assert_eq!(dev.stats().rx_cancelled, 8);
}
