// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! The device object: lifecycle state machine and the capability
//! interfaces composed over one shared core.

use alloc::{boxed::Box, sync::Arc};
use core::sync::atomic::{AtomicBool, Ordering};

use driver_base::{DriverError, DriverOps, DriverResult};
use kdma::{DmaBusAddress, DmaMapper, RegionId, RegionStore};
use log::{error, info, warn};
use spin::{Mutex, RwLock};

use crate::{
    NetDataPlane, PortInfo,
    completion::{CompletionQueue, RxCompletion, TxCompletion},
    config::NetdevConfig,
    reactor,
    regs::{CtrlFlags, IrqCause, Register, RingCtrl, StatusFlags},
    ring::DescriptorRing,
    rx::{RxPipeline, RxSpaceBuffer},
    stats::{NetdevStats, StatsSnapshot},
    transport::{NicTransport, TaskHandle, TaskSpawner},
    tx::{TxBuffer, TxPipeline},
};

const DEVICE_NAME: &str = "netdev";

/// Lifecycle state of a [`Netdev`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Stopped,
    Starting,
    Started,
    Stopping,
    /// A device-fatal error occurred; only [`Netdev::reinit`] recovers.
    Faulted,
}

/// State shared between the caller-facing [`Netdev`] and the reactor.
pub(crate) struct Shared<T: NicTransport, A: DmaMapper> {
    pub(crate) name: &'static str,
    pub(crate) transport: Arc<T>,
    pub(crate) regions: RegionStore<A>,
    pub(crate) rx: Mutex<RxPipeline<T, A>>,
    pub(crate) tx: Mutex<TxPipeline<T, A>>,
    pub(crate) rx_done: Arc<CompletionQueue<RxCompletion>>,
    pub(crate) tx_done: Arc<CompletionQueue<TxCompletion>>,
    pub(crate) stats: Arc<NetdevStats>,
    pub(crate) link_up: AtomicBool,
    /// Tells the reactor to exit at its next wake-up.
    pub(crate) shutdown: AtomicBool,
    faulted: AtomicBool,
}

impl<T: NicTransport, A: DmaMapper> Shared<T, A> {
    /// Takes the device offline. Only the first report is logged.
    pub(crate) fn fault(&self, reason: &str) {
        if !self.faulted.swap(true, Ordering::AcqRel) {
            error!("{}: device fatal: {reason}", self.name);
            self.transport.write_reg(Register::Imc, u32::MAX);
        }
    }

    pub(crate) fn is_faulted(&self) -> bool {
        self.faulted.load(Ordering::Acquire)
    }

    /// Masks everything, stops both DMA engines and resets the device.
    fn reset_device(&self) {
        let t = &self.transport;
        t.write_reg(Register::Imc, u32::MAX);
        t.write_reg(Register::Rctl, 0);
        t.write_reg(Register::Tctl, 0);
        t.write_reg(Register::Ctrl, CtrlFlags::RST.bits());
        t.write_reg(Register::Ctrl, CtrlFlags::SLU.bits());
        // Cause bits are read-to-clear.
        let _ = t.read_reg(Register::Icr);
    }

    fn program_rings(&self, rx_base: DmaBusAddress, rx_len: usize, tx_base: DmaBusAddress, tx_len: usize) {
        let t = &self.transport;
        t.write_reg(Register::Rdbal, rx_base.low_u32());
        t.write_reg(Register::Rdbah, rx_base.high_u32());
        t.write_reg(Register::Rdlen, rx_len as u32);
        t.write_reg(Register::Rdh, 0);
        t.write_reg(Register::Rdt, 0);
        t.write_reg(Register::Tdbal, tx_base.low_u32());
        t.write_reg(Register::Tdbah, tx_base.high_u32());
        t.write_reg(Register::Tdlen, tx_len as u32);
        t.write_reg(Register::Tdh, 0);
        t.write_reg(Register::Tdt, 0);
    }

    /// Resets the device and points it at the (empty) rings.
    fn reprogram(&self) -> DriverResult {
        let mut rx = self.rx.lock();
        let mut tx = self.tx.lock();
        rx.ring_mut().reset()?;
        tx.ring_mut().reset()?;
        self.reset_device();
        self.program_rings(
            rx.ring().bus_addr(),
            rx.ring().byte_len(),
            tx.ring().bus_addr(),
            tx.ring().byte_len(),
        );
        Ok(())
    }
}

/// A DMA network device.
///
/// Data-plane calls take the lifecycle lock shared and are refused unless
/// the device is [`DeviceState::Started`]; `start` and `stop` take it
/// exclusively only to change state, so no lock is ever held while the
/// reactor is joined.
pub struct Netdev<T: NicTransport, A: DmaMapper> {
    shared: Arc<Shared<T, A>>,
    config: NetdevConfig,
    state: RwLock<DeviceState>,
    spawner: Box<dyn TaskSpawner>,
    reactor: Mutex<Option<Box<dyn TaskHandle>>>,
}

impl<T: NicTransport, A: DmaMapper> Netdev<T, A> {
    /// Allocates both rings, resets the device and programs the ring
    /// registers. The device starts out [`DeviceState::Stopped`] with
    /// interrupts masked.
    pub fn init(
        config: NetdevConfig,
        transport: Arc<T>,
        dma: Arc<A>,
        spawner: Box<dyn TaskSpawner>,
    ) -> DriverResult<Self> {
        config.validate()?;
        let stats = Arc::new(NetdevStats::default());
        let rx_done = Arc::new(CompletionQueue::new());
        let tx_done = Arc::new(CompletionQueue::new());
        let rx = RxPipeline::new(
            DescriptorRing::new(dma.clone(), config.rx_ring_size)?,
            config.rx_buffer_len,
            transport.clone(),
            rx_done.clone(),
            stats.clone(),
        );
        let tx = TxPipeline::new(
            DescriptorRing::new(dma.clone(), config.tx_ring_size)?,
            config.tx_desc_len,
            transport.clone(),
            tx_done.clone(),
            stats.clone(),
        );
        let shared = Arc::new(Shared {
            name: DEVICE_NAME,
            transport,
            regions: RegionStore::new(dma, config.max_regions),
            rx: Mutex::new(rx),
            tx: Mutex::new(tx),
            rx_done,
            tx_done,
            stats,
            link_up: AtomicBool::new(false),
            shutdown: AtomicBool::new(false),
            faulted: AtomicBool::new(false),
        });
        shared.reprogram()?;
        info!(
            "{}: initialized, {} rx / {} tx descriptors",
            DEVICE_NAME, config.rx_ring_size, config.tx_ring_size
        );
        Ok(Self {
            shared,
            config,
            state: RwLock::new(DeviceState::Stopped),
            spawner,
            reactor: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &NetdevConfig {
        &self.config
    }

    /// Current lifecycle state.
    pub fn state(&self) -> DeviceState {
        if self.shared.is_faulted() {
            DeviceState::Faulted
        } else {
            *self.state.read()
        }
    }

    fn check_running(&self, state: DeviceState) -> DriverResult {
        if self.shared.is_faulted() {
            return Err(DriverError::Fatal);
        }
        if state != DeviceState::Started {
            return Err(DriverError::BadState);
        }
        Ok(())
    }

    /// Translates a range of a prepared region to a bus address.
    pub fn resolve(&self, region: RegionId, offset: usize, len: usize) -> DriverResult<DmaBusAddress> {
        self.shared.regions.resolve(region, offset, len)
    }

    /// Reaps finished TX descriptors now instead of waiting for the
    /// interrupt. Returns the number of packets completed.
    pub fn reap_tx(&self) -> DriverResult<usize> {
        let state = self.state.read();
        self.check_running(*state)?;
        self.shared.tx.lock().reap().inspect_err(|_| {
            self.shared.fault("tx ring corrupted");
        })
    }

    /// Declares the device hung, e.g. on a persistent doorbell timeout
    /// detected by a watchdog.
    pub fn report_fatal(&self, reason: &str) {
        self.shared.fault(reason);
    }

    /// Full re-initialization: tears down if still started, resets the
    /// device and reprograms the rings. Leaves the device `Stopped`.
    pub fn reinit(&self) -> DriverResult {
        self.stop()?;
        let state = self.state.write();
        if *state != DeviceState::Stopped {
            return Err(DriverError::ResourceBusy);
        }
        self.shared.reprogram()?;
        self.shared.link_up.store(false, Ordering::Release);
        self.shared.faulted.store(false, Ordering::Release);
        info!("{}: re-initialized", self.shared.name);
        Ok(())
    }

    fn bring_up(&self) -> DriverResult {
        let shared = &self.shared;
        let t = &shared.transport;
        {
            let mut rx = shared.rx.lock();
            let mut tx = shared.tx.lock();
            rx.ring_mut().reset()?;
            tx.ring_mut().reset()?;
            t.write_reg(Register::Rdh, 0);
            t.write_reg(Register::Rdt, 0);
            t.write_reg(Register::Tdh, 0);
            t.write_reg(Register::Tdt, 0);
        }

        shared.shutdown.store(false, Ordering::Release);
        t.rearm_wait();
        let weak = Arc::downgrade(shared);
        let transport = t.clone();
        let handle = self
            .spawner
            .spawn("netdev-irq", Box::new(move || reactor::run(weak, transport)))?;
        *self.reactor.lock() = Some(handle);

        let status = StatusFlags::from_bits_retain(t.read_reg(Register::Status));
        shared.link_up.store(status.contains(StatusFlags::LU), Ordering::Release);
        t.write_reg(Register::Rctl, RingCtrl::EN.bits());
        t.write_reg(Register::Tctl, RingCtrl::EN.bits());
        t.write_reg(Register::Ims, IrqCause::ENABLED.bits());
        Ok(())
    }

    /// Quiesces the device and hands every outstanding buffer back.
    fn tear_down(&self) {
        let shared = &self.shared;
        let t = &shared.transport;
        t.write_reg(Register::Imc, u32::MAX);
        t.write_reg(Register::Rctl, 0);
        t.write_reg(Register::Tctl, 0);

        let tx_returned = {
            let mut tx = shared.tx.lock();
            if tx.reap().is_err() {
                shared.fault("tx ring corrupted");
            }
            tx.drain()
        };
        let rx_returned = shared.rx.lock().drain();

        shared.shutdown.store(true, Ordering::Release);
        t.cancel_wait();
        let handle = self.reactor.lock().take();
        if let Some(handle) = handle {
            handle.join();
        }
        info!(
            "{}: stopped, returned {tx_returned} tx and {rx_returned} rx buffer(s)",
            shared.name
        );
    }
}

impl<T: NicTransport, A: DmaMapper> Drop for Netdev<T, A> {
    fn drop(&mut self) {
        if let Err(err) = self.stop() {
            warn!("{}: stop on drop failed: {err}", self.shared.name);
        }
    }
}

impl<T: NicTransport, A: DmaMapper> DriverOps for Netdev<T, A> {
    fn name(&self) -> &str {
        self.shared.name
    }

    fn irq(&self) -> Option<usize> {
        self.shared.transport.irq_num()
    }
}

impl<T: NicTransport, A: DmaMapper> NetDataPlane for Netdev<T, A> {
    type Handle = A::Handle;

    fn start(&self) -> DriverResult {
        {
            let mut state = self.state.write();
            if self.shared.is_faulted() {
                warn!("{}: start refused, device faulted", self.shared.name);
                return Err(DriverError::Fatal);
            }
            match *state {
                DeviceState::Started => return Ok(()),
                DeviceState::Faulted => return Err(DriverError::Fatal),
                DeviceState::Starting | DeviceState::Stopping => {
                    warn!("{}: start refused, {:?} in progress", self.shared.name, *state);
                    return Err(DriverError::ResourceBusy);
                }
                DeviceState::Stopped => *state = DeviceState::Starting,
            }
        }

        let result = self.bring_up();
        let mut state = self.state.write();
        match result {
            Ok(()) => {
                *state = DeviceState::Started;
                info!("{}: started", self.shared.name);
                Ok(())
            }
            Err(err) => {
                *state = DeviceState::Stopped;
                self.shared.transport.write_reg(Register::Imc, u32::MAX);
                warn!("{}: start failed: {err}", self.shared.name);
                Err(err)
            }
        }
    }

    fn stop(&self) -> DriverResult {
        {
            let mut state = self.state.write();
            match *state {
                DeviceState::Stopped | DeviceState::Faulted => return Ok(()),
                DeviceState::Starting | DeviceState::Stopping => {
                    warn!("{}: stop refused, {:?} in progress", self.shared.name, *state);
                    return Err(DriverError::ResourceBusy);
                }
                DeviceState::Started => *state = DeviceState::Stopping,
            }
        }
        self.tear_down();
        *self.state.write() = DeviceState::Stopped;
        Ok(())
    }

    fn queue_tx(&self, bufs: &[TxBuffer<'_>]) -> DriverResult {
        let state = self.state.read();
        self.check_running(*state)?;
        let shared = &self.shared;
        let mut tx = shared.tx.lock();
        if let Err(err) = tx.queue(&shared.regions, bufs) {
            if err == DriverError::Fatal {
                shared.fault("tx ring corrupted");
            }
            return Err(err);
        }
        if tx.reap().is_err() {
            shared.fault("tx ring corrupted");
        }
        Ok(())
    }

    fn queue_rx_space(&self, bufs: &[RxSpaceBuffer]) -> DriverResult<usize> {
        let state = self.state.read();
        self.check_running(*state)?;
        self.shared
            .rx
            .lock()
            .queue_space(&self.shared.regions, bufs)
    }

    fn prepare_vmo(&self, region: RegionId, handle: &A::Handle) -> DriverResult {
        self.shared.regions.prepare(region, handle)
    }

    fn release_vmo(&self, region: RegionId) -> DriverResult {
        self.shared.regions.release(region)
    }

    fn tx_completions(&self) -> &CompletionQueue<TxCompletion> {
        &self.shared.tx_done
    }

    fn rx_completions(&self) -> &CompletionQueue<RxCompletion> {
        &self.shared.rx_done
    }
}

impl<T: NicTransport, A: DmaMapper> PortInfo for Netdev<T, A> {
    fn link_up(&self) -> bool {
        self.shared.link_up.load(Ordering::Acquire)
    }

    fn rx_queue_len(&self) -> usize {
        self.config.rx_ring_size
    }

    fn tx_queue_len(&self) -> usize {
        self.config.tx_ring_size
    }

    fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }
}
