// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Device register map.
//!
//! The layout follows the classic e1000 family: one control/status block,
//! the interrupt cause and mask registers, and a base/length/head/tail
//! quintet per ring.

use bitflags::bitflags;

/// A 32-bit device register, identified by its offset in the register
/// window.
#[repr(u32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Register {
    Ctrl = 0x0000,
    Status = 0x0008,
    /// Interrupt cause, read to clear.
    Icr = 0x00C0,
    /// Interrupt mask set.
    Ims = 0x00D0,
    /// Interrupt mask clear.
    Imc = 0x00D8,
    Rctl = 0x0100,
    Tctl = 0x0400,
    Rdbal = 0x2800,
    Rdbah = 0x2804,
    Rdlen = 0x2808,
    Rdh = 0x2810,
    Rdt = 0x2818,
    Tdbal = 0x3800,
    Tdbah = 0x3804,
    Tdlen = 0x3808,
    Tdh = 0x3810,
    Tdt = 0x3818,
}

impl Register {
    /// Byte offset within the register window.
    pub const fn offset(self) -> u32 {
        self as u32
    }
}

bitflags! {
    /// Bits of [`Register::Ctrl`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct CtrlFlags: u32 {
        /// Set link up.
        const SLU = 1 << 6;
        /// Device reset, self-clearing.
        const RST = 1 << 26;
    }
}

bitflags! {
    /// Bits of [`Register::Status`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct StatusFlags: u32 {
        /// Link up.
        const LU = 1 << 1;
    }
}

bitflags! {
    /// Enable bit shared by [`Register::Rctl`] and [`Register::Tctl`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RingCtrl: u32 {
        const EN = 1 << 1;
    }
}

bitflags! {
    /// Interrupt causes, as reported by [`Register::Icr`] and masked by
    /// [`Register::Ims`]/[`Register::Imc`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct IrqCause: u32 {
        /// Transmit descriptor written back.
        const TXDW = 1 << 0;
        /// Link status change.
        const LSC = 1 << 2;
        /// Receive descriptor minimum threshold reached.
        const RXDMT0 = 1 << 4;
        /// Receiver overrun.
        const RXO = 1 << 6;
        /// Receive timer expired, frames are available.
        const RXT0 = 1 << 7;
        /// Unrecoverable device error (DMA fault, parity error).
        const FATAL = 1 << 31;

        /// Causes handled by the RX pipeline.
        const RX = Self::RXDMT0.bits() | Self::RXO.bits() | Self::RXT0.bits();
        /// Causes handled by the TX pipeline.
        const TX = Self::TXDW.bits();
    }
}

impl IrqCause {
    /// Every cause the reactor services.
    pub const ENABLED: IrqCause = IrqCause::RX
        .union(IrqCause::TX)
        .union(IrqCause::LSC)
        .union(IrqCause::FATAL);
}
