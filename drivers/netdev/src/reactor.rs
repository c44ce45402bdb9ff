// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The interrupt reactor.
//!
//! It runs on its own execution context and reaches the device through a
//! [`Weak`] reference, upgraded once per interrupt, so a torn-down device is
//! never dereferenced. The only blocking call is
//! [`NicTransport::wait_irq`], which `Stop` cancels.

use alloc::sync::{Arc, Weak};
use core::sync::atomic::Ordering;

use driver_base::{DriverError, DriverResult};
use kdma::DmaMapper;
use log::{debug, trace, warn};

use crate::{
    device::Shared,
    regs::{IrqCause, Register, StatusFlags},
    transport::{IrqWait, NicTransport},
};

/// Reactor entry point.
pub(crate) fn run<T: NicTransport, A: DmaMapper>(shared: Weak<Shared<T, A>>, transport: Arc<T>) {
    loop {
        if transport.wait_irq() == IrqWait::Cancelled {
            debug!("irq reactor: shutdown requested");
            break;
        }
        let Some(shared) = shared.upgrade() else {
            warn!("irq reactor: device is gone");
            break;
        };
        if shared.shutdown.load(Ordering::Acquire) {
            break;
        }
        let cause = IrqCause::from_bits_retain(transport.read_reg(Register::Icr));
        trace!("irq reactor: cause {cause:?}");
        shared.stats.interrupt();
        if dispatch(&shared, cause).is_err() {
            break;
        }
        transport.ack_irq();
    }
}

/// Services one interrupt. An error means the device is now faulted and the
/// reactor must exit.
fn dispatch<T: NicTransport, A: DmaMapper>(shared: &Shared<T, A>, cause: IrqCause) -> DriverResult {
    if cause.contains(IrqCause::FATAL) {
        shared.fault("device reported a fatal interrupt");
        return Err(DriverError::Fatal);
    }
    if cause.contains(IrqCause::LSC) {
        let status = StatusFlags::from_bits_retain(shared.transport.read_reg(Register::Status));
        let up = status.contains(StatusFlags::LU);
        if shared.link_up.swap(up, Ordering::AcqRel) != up {
            debug!("{}: link {}", shared.name, if up { "up" } else { "down" });
        }
    }
    if cause.intersects(IrqCause::RX) {
        if let Err(err) = shared.rx.lock().on_interrupt() {
            shared.fault("rx ring corrupted");
            return Err(err);
        }
    }
    if cause.intersects(IrqCause::TX) {
        if let Err(err) = shared.tx.lock().reap() {
            shared.fault("tx ring corrupted");
            return Err(err);
        }
    }
    if shared.is_faulted() {
        return Err(DriverError::Fatal);
    }
    Ok(())
}
