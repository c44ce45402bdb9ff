// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Registry of caller-owned memory regions mapped for DMA.

use alloc::{collections::BTreeMap, sync::Arc};
use core::sync::atomic::{AtomicUsize, Ordering};

use driver_base::{DriverError, DriverResult};
use log::{debug, warn};
use spin::RwLock;

use crate::{DmaBusAddress, DmaMapper, DmaMapping};

/// Caller-chosen identifier of a memory region.
pub type RegionId = u8;

struct RegionEntry {
    mapping: DmaMapping,
    /// Number of live [`RegionPin`]s, i.e. descriptors (posted or
    /// backlogged) whose address points into this region.
    pins: AtomicUsize,
}

/// A counted reference into a prepared region.
///
/// While any pin exists the region cannot be released, so the address it
/// carries stays valid for the device. Dropping the pin gives the reference
/// back.
pub struct RegionPin {
    region: RegionId,
    addr: DmaBusAddress,
    len: usize,
    entry: Arc<RegionEntry>,
}

impl RegionPin {
    /// The region this pin points into.
    pub fn region(&self) -> RegionId {
        self.region
    }

    /// Bus address of the pinned range.
    pub fn addr(&self) -> DmaBusAddress {
        self.addr
    }

    /// Length of the pinned range in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Whether the pinned range is empty. Pins created by the store never
    /// are.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Pins the sub-range `offset..offset + len` of this pin's range.
    ///
    /// Used to split one region range across several descriptors.
    pub fn split(&self, offset: usize, len: usize) -> Option<RegionPin> {
        let end = offset.checked_add(len)?;
        if len == 0 || end > self.len {
            return None;
        }
        self.entry.pins.fetch_add(1, Ordering::AcqRel);
        Some(RegionPin {
            region: self.region,
            addr: self.addr.add(offset),
            len,
            entry: self.entry.clone(),
        })
    }
}

impl Drop for RegionPin {
    fn drop(&mut self) {
        self.entry.pins.fetch_sub(1, Ordering::Release);
    }
}

impl core::fmt::Debug for RegionPin {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RegionPin")
            .field("region", &self.region)
            .field("addr", &self.addr)
            .field("len", &self.len)
            .finish()
    }
}

/// The memory region store.
///
/// Resolution takes the table lock shared, so any number of callers may
/// resolve concurrently. [`prepare`](Self::prepare) and
/// [`release`](Self::release) take it exclusively, which orders them
/// against each other and against every in-flight resolution.
pub struct RegionStore<M: DmaMapper> {
    mapper: Arc<M>,
    regions: RwLock<BTreeMap<RegionId, Arc<RegionEntry>>>,
    capacity: usize,
}

impl<M: DmaMapper> RegionStore<M> {
    /// Creates an empty store holding at most `capacity` regions.
    pub fn new(mapper: Arc<M>, capacity: usize) -> Self {
        Self {
            mapper,
            regions: RwLock::new(BTreeMap::new()),
            capacity,
        }
    }

    /// Maximum number of regions.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of prepared regions.
    pub fn len(&self) -> usize {
        self.regions.read().len()
    }

    /// Returns true if no region is prepared.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `id` is prepared.
    pub fn contains(&self, id: RegionId) -> bool {
        self.regions.read().contains_key(&id)
    }

    /// Number of outstanding pins on `id`, or `None` if it is not prepared.
    pub fn pin_count(&self, id: RegionId) -> Option<usize> {
        self.regions
            .read()
            .get(&id)
            .map(|entry| entry.pins.load(Ordering::Acquire))
    }

    /// Maps `handle` for DMA and registers it as `id`.
    ///
    /// Fails with [`DriverError::AlreadyExists`] for a duplicate id,
    /// [`DriverError::NoMemory`] when the table is full, or the mapper's
    /// error. The table is left untouched on failure.
    pub fn prepare(&self, id: RegionId, handle: &M::Handle) -> DriverResult {
        let mut regions = self.regions.write();
        if regions.contains_key(&id) {
            warn!("region {id} already prepared");
            return Err(DriverError::AlreadyExists);
        }
        if regions.len() >= self.capacity {
            warn!("region table full ({} entries)", self.capacity);
            return Err(DriverError::NoMemory);
        }
        let mapping = self.mapper.map(handle)?;
        if mapping.len == 0 {
            self.mapper.unmap(&mapping);
            return Err(DriverError::InvalidInput);
        }
        debug!(
            "prepared region {id}: {:?} +{:#x}",
            mapping.bus_addr, mapping.len
        );
        regions.insert(
            id,
            Arc::new(RegionEntry {
                mapping,
                pins: AtomicUsize::new(0),
            }),
        );
        Ok(())
    }

    /// Unmaps and forgets region `id`.
    ///
    /// Fails with [`DriverError::ResourceBusy`] while any descriptor still
    /// references the region and with [`DriverError::NotFound`] if `id` is
    /// not prepared (including a second release).
    pub fn release(&self, id: RegionId) -> DriverResult {
        let mut regions = self.regions.write();
        let entry = regions.get(&id).ok_or(DriverError::NotFound)?;
        let pins = entry.pins.load(Ordering::Acquire);
        if pins != 0 {
            warn!("refusing to release region {id}: {pins} descriptor(s) still reference it");
            return Err(DriverError::ResourceBusy);
        }
        if let Some(entry) = regions.remove(&id) {
            self.mapper.unmap(&entry.mapping);
        }
        debug!("released region {id}");
        Ok(())
    }

    /// Translates `offset..offset + len` of region `id` to a bus address.
    pub fn resolve(&self, id: RegionId, offset: usize, len: usize) -> DriverResult<DmaBusAddress> {
        let regions = self.regions.read();
        let entry = regions.get(&id).ok_or(DriverError::NotFound)?;
        entry
            .mapping
            .translate(offset, len)
            .ok_or(DriverError::InvalidInput)
    }

    /// Resolves a range like [`resolve`](Self::resolve) and pins the region
    /// until the returned [`RegionPin`] is dropped.
    pub fn pin(&self, id: RegionId, offset: usize, len: usize) -> DriverResult<RegionPin> {
        let regions = self.regions.read();
        let entry = regions.get(&id).ok_or(DriverError::NotFound)?;
        let addr = entry
            .mapping
            .translate(offset, len)
            .ok_or(DriverError::InvalidInput)?;
        entry.pins.fetch_add(1, Ordering::AcqRel);
        Ok(RegionPin {
            region: id,
            addr,
            len,
            entry: entry.clone(),
        })
    }
}

impl<M: DmaMapper> Drop for RegionStore<M> {
    fn drop(&mut self) {
        let regions = core::mem::take(self.regions.get_mut());
        for (id, entry) in regions {
            let pins = entry.pins.load(Ordering::Acquire);
            if pins != 0 {
                warn!("dropping region {id} with {pins} outstanding pin(s)");
            }
            self.mapper.unmap(&entry.mapping);
        }
    }
}
