// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! A simulated NIC for unit and integration testing.
//!
//! [`MockDevice`] plays both collaborators of a [`Netdev`]: it is the
//! register window and interrupt line ([`NicTransport`]) and the DMA
//! platform ([`DmaMapper`]). Coherent memory is plain heap memory whose bus
//! address equals its host address, so the device side can walk the rings
//! the driver programmed into `RDBAL`/`TDBAL` and complete descriptors on
//! demand. Region handles are [`MockVmo`]s whose bus addresses are never
//! dereferenced.

use std::{
    alloc::{Layout, alloc_zeroed, dealloc},
    boxed::Box,
    collections::HashMap,
    ptr::NonNull,
    sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError},
    thread::{self, JoinHandle},
    vec::Vec,
};

use driver_base::{DriverError, DriverResult};
use kdma::{DmaBusAddress, DmaInfo, DmaMapper, DmaMapping};
use log::error;

use crate::{
    config::NetdevConfig,
    desc::{DescErrors, RingDescriptor},
    device::Netdev,
    regs::{CtrlFlags, IrqCause, Register, RingCtrl, StatusFlags},
    transport::{IrqWait, NicTransport, TaskHandle, TaskSpawner},
};

/// A caller memory handle: `len` bytes at bus address `base`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockVmo {
    pub base: u64,
    pub len: usize,
}

/// A frame the device fetched from the TX ring.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TxFrame {
    pub addr: DmaBusAddress,
    pub len: u16,
    pub end_of_packet: bool,
}

/// How the device fills the next RX descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RxFrame {
    pub len: u16,
    pub end_of_frame: bool,
    pub errors: DescErrors,
}

impl RxFrame {
    /// A whole, error-free frame of `len` bytes.
    pub fn ok(len: u16) -> Self {
        Self {
            len,
            end_of_frame: true,
            errors: DescErrors::empty(),
        }
    }
}

#[derive(Default)]
struct MockState {
    regs: HashMap<Register, u32>,
    /// Pending interrupt causes.
    icr: u32,
    /// Enabled interrupt causes.
    ims: u32,
    rx_head: usize,
    tx_head: usize,
    irq_pending: bool,
    cancelled: bool,
    doorbells: HashMap<Register, usize>,
    acks: usize,
    transmitted: Vec<TxFrame>,
    mapped: usize,
    unmapped: Vec<DmaMapping>,
    fail_next_map: bool,
}

impl MockState {
    fn reg(&self, reg: Register) -> u32 {
        self.regs.get(&reg).copied().unwrap_or(0)
    }

    fn enabled(&self, ctl: Register) -> bool {
        RingCtrl::from_bits_retain(self.reg(ctl)).contains(RingCtrl::EN)
    }

    /// Descriptor `idx` of the ring programmed at `base`/`len`.
    ///
    /// # Safety
    ///
    /// The ring the registers point at must still be allocated.
    unsafe fn desc<'a>(&self, base: (Register, Register), len: Register, idx: usize) -> Option<&'a RingDescriptor> {
        let addr = (u64::from(self.reg(base.1)) << 32) | u64::from(self.reg(base.0));
        let count = self.reg(len) as usize / core::mem::size_of::<RingDescriptor>();
        if addr == 0 || idx >= count {
            return None;
        }
        // SAFETY: coherent memory is host memory at its bus address.
        Some(unsafe { &*(addr as *const RingDescriptor).add(idx) })
    }

    fn ring_len(&self, len: Register) -> usize {
        self.reg(len) as usize / core::mem::size_of::<RingDescriptor>()
    }

    fn raise(&mut self, cause: IrqCause) -> bool {
        self.icr |= cause.bits();
        if self.icr & self.ims != 0 {
            self.irq_pending = true;
        }
        self.irq_pending
    }
}

/// The simulated device.
#[derive(Default)]
pub struct MockDevice {
    state: Mutex<MockState>,
    irq: Condvar,
}

impl MockDevice {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Reads a register without side effects.
    pub fn peek(&self, reg: Register) -> u32 {
        let st = self.state();
        match reg {
            Register::Icr => st.icr,
            Register::Ims => st.ims,
            Register::Rdh => st.rx_head as u32,
            Register::Tdh => st.tx_head as u32,
            _ => st.reg(reg),
        }
    }

    /// Number of writes to a tail register.
    pub fn doorbells(&self, reg: Register) -> usize {
        self.state().doorbells.get(&reg).copied().unwrap_or(0)
    }

    /// Number of interrupts acknowledged.
    pub fn acks(&self) -> usize {
        self.state().acks
    }

    /// Frames fetched from the TX ring so far.
    pub fn transmitted(&self) -> Vec<TxFrame> {
        self.state().transmitted.clone()
    }

    /// Number of regions mapped and not yet unmapped.
    pub fn live_mappings(&self) -> usize {
        let st = self.state();
        st.mapped - st.unmapped.len()
    }

    /// Makes the next [`DmaMapper::map`] fail.
    pub fn fail_next_map(&self) {
        self.state().fail_next_map = true;
    }

    /// Signals `cause`; the line fires if any pending cause is enabled.
    pub fn raise_irq(&self, cause: IrqCause) {
        if self.state().raise(cause) {
            self.irq.notify_all();
        }
    }

    /// Changes the link state and signals a link-status change.
    pub fn set_link(&self, up: bool) {
        {
            let mut st = self.state();
            let mut status = StatusFlags::from_bits_retain(st.reg(Register::Status));
            status.set(StatusFlags::LU, up);
            st.regs.insert(Register::Status, status.bits());
        }
        self.raise_irq(IrqCause::LSC);
    }

    /// Fills posted RX descriptors in ring order, one per frame, stopping
    /// at the first descriptor software has not posted. Returns how many
    /// were filled. Nothing is written while receive DMA is disabled.
    pub fn complete_rx(&self, frames: &[RxFrame]) -> usize {
        let mut st = self.state();
        if !st.enabled(Register::Rctl) {
            return 0;
        }
        let count = st.ring_len(Register::Rdlen);
        let mut done = 0;
        for frame in frames {
            let idx = st.rx_head;
            // SAFETY: the driver keeps its rings alive while RX is enabled.
            let Some(desc) = (unsafe { st.desc((Register::Rdbal, Register::Rdbah), Register::Rdlen, idx) }) else {
                break;
            };
            let Some((_, buf_len, _)) = desc.fetch() else {
                break;
            };
            let mut errors = frame.errors;
            if frame.len > buf_len {
                errors |= DescErrors::FRAME_TOO_LONG;
            }
            desc.write_back(frame.len.min(buf_len), frame.end_of_frame, errors);
            st.rx_head = (idx + 1) % count;
            done += 1;
        }
        done
    }

    /// Receives whole frames of the given lengths and raises an RX
    /// interrupt. Returns how many descriptors were filled.
    pub fn receive(&self, lens: &[u16]) -> usize {
        let frames: Vec<_> = lens.iter().map(|&len| RxFrame::ok(len)).collect();
        let done = self.complete_rx(&frames);
        if done != 0 {
            self.raise_irq(IrqCause::RXT0);
        }
        done
    }

    fn complete_tx_with(&self, max: usize, errors: DescErrors, eop: Option<bool>) -> usize {
        let mut st = self.state();
        if !st.enabled(Register::Tctl) {
            return 0;
        }
        let count = st.ring_len(Register::Tdlen);
        let mut done = 0;
        while done < max {
            let idx = st.tx_head;
            // SAFETY: the driver keeps its rings alive while TX is enabled.
            let Some(desc) = (unsafe { st.desc((Register::Tdbal, Register::Tdbah), Register::Tdlen, idx) }) else {
                break;
            };
            let Some((addr, len, end_of_packet)) = desc.fetch() else {
                break;
            };
            st.transmitted.push(TxFrame {
                addr,
                len,
                end_of_packet,
            });
            desc.write_back(len, eop.unwrap_or(end_of_packet), errors);
            st.tx_head = (idx + 1) % count;
            done += 1;
        }
        done
    }

    /// Sends up to `max` posted TX descriptors in ring order without
    /// raising an interrupt. Returns how many were sent.
    pub fn complete_tx(&self, max: usize) -> usize {
        self.complete_tx_with(max, DescErrors::empty(), None)
    }

    /// Like [`complete_tx`](Self::complete_tx), reporting `errors` on every
    /// descriptor.
    pub fn fail_tx(&self, max: usize, errors: DescErrors) -> usize {
        self.complete_tx_with(max, errors, None)
    }

    /// Completes the next TX descriptor with a forged end-of-packet bit.
    pub fn corrupt_tx(&self, end_of_packet: bool) -> usize {
        self.complete_tx_with(1, DescErrors::empty(), Some(end_of_packet))
    }

    /// Sends up to `max` descriptors and raises a TX interrupt.
    pub fn transmit(&self, max: usize) -> usize {
        let done = self.complete_tx(max);
        if done != 0 {
            self.raise_irq(IrqCause::TXDW);
        }
        done
    }
}

impl NicTransport for MockDevice {
    type RxDesc = RingDescriptor;
    type TxDesc = RingDescriptor;

    fn read_reg(&self, reg: Register) -> u32 {
        let mut st = self.state();
        match reg {
            Register::Icr => core::mem::take(&mut st.icr),
            Register::Ims => st.ims,
            Register::Rdh => st.rx_head as u32,
            Register::Tdh => st.tx_head as u32,
            _ => st.reg(reg),
        }
    }

    fn write_reg(&self, reg: Register, value: u32) {
        let mut st = self.state();
        match reg {
            Register::Ctrl => {
                let ctrl = CtrlFlags::from_bits_retain(value);
                if ctrl.contains(CtrlFlags::RST) {
                    let status = st.reg(Register::Status);
                    st.regs.clear();
                    st.regs.insert(Register::Status, status);
                    st.icr = 0;
                    st.ims = 0;
                    st.rx_head = 0;
                    st.tx_head = 0;
                }
                st.regs.insert(reg, (ctrl - CtrlFlags::RST).bits());
            }
            Register::Icr => st.icr &= !value,
            Register::Ims => {
                st.ims |= value;
                if st.icr & st.ims != 0 {
                    st.irq_pending = true;
                    self.irq.notify_all();
                }
            }
            Register::Imc => st.ims &= !value,
            Register::Rdh => st.rx_head = value as usize,
            Register::Tdh => st.tx_head = value as usize,
            Register::Rdt | Register::Tdt => {
                *st.doorbells.entry(reg).or_default() += 1;
                st.regs.insert(reg, value);
            }
            _ => {
                st.regs.insert(reg, value);
            }
        }
    }

    fn wait_irq(&self) -> IrqWait {
        let mut st = self.state();
        loop {
            if st.cancelled {
                return IrqWait::Cancelled;
            }
            if st.irq_pending {
                st.irq_pending = false;
                return IrqWait::Fired;
            }
            st = self.irq.wait(st).unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn ack_irq(&self) {
        let mut st = self.state();
        st.acks += 1;
        // Causes raised while the last batch was serviced fire again.
        if st.icr & st.ims != 0 {
            st.irq_pending = true;
            self.irq.notify_all();
        }
    }

    fn cancel_wait(&self) {
        self.state().cancelled = true;
        self.irq.notify_all();
    }

    fn rearm_wait(&self) {
        self.state().cancelled = false;
    }
}

impl DmaMapper for MockDevice {
    type Handle = MockVmo;

    fn alloc_coherent(&self, layout: Layout) -> DriverResult<DmaInfo> {
        // SAFETY: ring layouts are never zero-sized.
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(DriverError::NoMemory)?;
        Ok(DmaInfo {
            cpu_addr: ptr,
            bus_addr: DmaBusAddress::new(ptr.as_ptr() as u64),
        })
    }

    unsafe fn dealloc_coherent(&self, dma: DmaInfo, layout: Layout) {
        unsafe { dealloc(dma.cpu_addr.as_ptr(), layout) }
    }

    fn map(&self, handle: &MockVmo) -> DriverResult<DmaMapping> {
        let mut st = self.state();
        if core::mem::take(&mut st.fail_next_map) {
            return Err(DriverError::Io);
        }
        st.mapped += 1;
        Ok(DmaMapping {
            bus_addr: DmaBusAddress::new(handle.base),
            len: handle.len,
        })
    }

    fn unmap(&self, mapping: &DmaMapping) {
        self.state().unmapped.push(*mapping);
    }
}

/// Runs tasks on `std` threads.
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadSpawner;

struct ThreadHandle(JoinHandle<()>);

impl TaskHandle for ThreadHandle {
    fn join(self: Box<Self>) {
        if self.0.join().is_err() {
            error!("task panicked");
        }
    }
}

impl TaskSpawner for ThreadSpawner {
    fn spawn(
        &self,
        name: &str,
        entry: Box<dyn FnOnce() + Send + 'static>,
    ) -> DriverResult<Box<dyn TaskHandle>> {
        let handle = thread::Builder::new()
            .name(name.into())
            .spawn(entry)
            .map_err(|_| DriverError::Io)?;
        Ok(Box::new(ThreadHandle(handle)))
    }
}

/// Builds a device on a fresh [`MockDevice`] with a [`ThreadSpawner`].
pub fn netdev(config: NetdevConfig) -> DriverResult<(Arc<MockDevice>, Netdev<MockDevice, MockDevice>)> {
    let mock = Arc::new(MockDevice::new());
    let dev = Netdev::init(config, mock.clone(), mock.clone(), Box::new(ThreadSpawner))?;
    Ok((mock, dev))
}
