// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Device driver interfaces shared by the netdev crates. It provides the
//! error taxonomy every data-plane operation reports through, and the
//! capability trait common to all drivers.
//!
//! - [`kdma`][1]: DMA addresses and the memory region store.
//! - [`netdev`][2]: descriptor rings, pipelines and the device control plane.
//!
//! [1]: ../kdma/index.html
//! [2]: ../netdev/index.html

#![cfg_attr(not(test), no_std)]

/// The error type for driver operation failures.
///
/// Variants fall into four classes: retryable backpressure
/// ([`WouldBlock`], [`NoMemory`], [`ResourceBusy`]), synchronous rejection
/// of invalid input ([`InvalidInput`], [`NotFound`], [`AlreadyExists`],
/// [`BadState`]), collaborator failures ([`Io`]) and device-fatal
/// conditions ([`Fatal`]).
///
/// [`WouldBlock`]: DriverError::WouldBlock
/// [`NoMemory`]: DriverError::NoMemory
/// [`ResourceBusy`]: DriverError::ResourceBusy
/// [`InvalidInput`]: DriverError::InvalidInput
/// [`NotFound`]: DriverError::NotFound
/// [`AlreadyExists`]: DriverError::AlreadyExists
/// [`BadState`]: DriverError::BadState
/// [`Io`]: DriverError::Io
/// [`Fatal`]: DriverError::Fatal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverError {
    /// An entity already exists.
    AlreadyExists,
    /// Try again, for non-blocking APIs (ring or backlog full).
    WouldBlock,
    /// Operation not allowed in the current lifecycle state.
    BadState,
    /// Invalid parameter/argument.
    InvalidInput,
    /// The referenced entity does not exist.
    NotFound,
    /// A collaborator (DMA mapping, task spawning) failed.
    Io,
    /// Not enough space/cannot allocate memory (DMA, region table).
    NoMemory,
    /// Device or resource is busy.
    ResourceBusy,
    /// The device hit an unrecoverable error and must be re-initialized.
    Fatal,
}

impl DriverError {
    /// Stable error message for display/logging.
    pub const fn message(&self) -> &'static str {
        match self {
            DriverError::AlreadyExists => "Entity already exists",
            DriverError::WouldBlock => "Try again",
            DriverError::BadState => "Bad state",
            DriverError::InvalidInput => "Invalid parameter",
            DriverError::NotFound => "Entity not found",
            DriverError::Io => "Input/output error",
            DriverError::NoMemory => "Not enough memory",
            DriverError::ResourceBusy => "Resource is busy",
            DriverError::Fatal => "Device fatal error",
        }
    }

    /// Whether the caller may retry the same request later and expect it
    /// to succeed once resources free up.
    pub const fn is_retryable(&self) -> bool {
        matches!(
            self,
            DriverError::WouldBlock | DriverError::NoMemory | DriverError::ResourceBusy
        )
    }
}

impl core::fmt::Display for DriverError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.message())
    }
}

/// A specialized `Result` type for device operations.
pub type DriverResult<T = ()> = Result<T, DriverError>;

/// Common operations that require all device drivers to implement.
pub trait DriverOps: Send + Sync {
    /// The name of the device.
    fn name(&self) -> &str;

    /// The IRQ number of the device, if applicable.
    fn irq(&self) -> Option<usize> {
        None
    }
}
