// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Interfaces the data plane consumes from the platform: register access,
//! the interrupt line, and an execution context for the reactor.

use alloc::boxed::Box;

use driver_base::DriverResult;

use crate::{desc::HwDescriptor, regs::Register};

/// Result of blocking on the interrupt line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IrqWait {
    /// The device raised an interrupt.
    Fired,
    /// [`NicTransport::cancel_wait`] was called.
    Cancelled,
}

/// Register window and interrupt line of one NIC.
pub trait NicTransport: Send + Sync + 'static {
    /// Receive descriptor layout.
    type RxDesc: HwDescriptor;
    /// Transmit descriptor layout.
    type TxDesc: HwDescriptor;

    fn read_reg(&self, reg: Register) -> u32;

    fn write_reg(&self, reg: Register, value: u32);

    /// Blocks until the device interrupts or the wait is cancelled.
    fn wait_irq(&self) -> IrqWait;

    /// Acknowledges the interrupt just serviced and re-arms the line.
    fn ack_irq(&self);

    /// Wakes a blocked [`wait_irq`](Self::wait_irq) with
    /// [`IrqWait::Cancelled`].
    ///
    /// Cancellation is sticky: a `wait_irq` entered after this call returns
    /// `Cancelled` immediately, until [`rearm_wait`](Self::rearm_wait).
    fn cancel_wait(&self);

    /// Clears a previous cancellation.
    fn rearm_wait(&self);

    /// Interrupt number, if the platform exposes one.
    fn irq_num(&self) -> Option<usize> {
        None
    }
}

/// A joinable execution context.
pub trait TaskHandle: Send {
    /// Blocks until the task has returned.
    fn join(self: Box<Self>);
}

/// Starts dedicated execution contexts, such as the interrupt reactor.
pub trait TaskSpawner: Send + Sync {
    fn spawn(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> DriverResult<Box<dyn TaskHandle>>;
}
