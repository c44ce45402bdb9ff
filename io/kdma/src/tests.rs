// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 KylinSoft Co., Ltd. <https://www.kylinos.cn/>
// See LICENSES for license details.

//! Test suite for kdma

use std::{
    alloc::{Layout, alloc_zeroed, dealloc},
    ptr::NonNull,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    vec::Vec,
};

use driver_base::{DriverError, DriverResult};

use super::*;

/// A mapper whose handles are plain `(bus base, len)` pairs.
#[derive(Default)]
struct FakeMapper {
    fail_next: AtomicBool,
    unmapped: Mutex<Vec<DmaMapping>>,
}

impl DmaMapper for FakeMapper {
    type Handle = (u64, usize);

    fn alloc_coherent(&self, layout: Layout) -> DriverResult<DmaInfo> {
        let ptr = NonNull::new(unsafe { alloc_zeroed(layout) }).ok_or(DriverError::NoMemory)?;
        Ok(DmaInfo {
            cpu_addr: ptr,
            bus_addr: DmaBusAddress::new(ptr.as_ptr() as u64),
        })
    }

    unsafe fn dealloc_coherent(&self, dma: DmaInfo, layout: Layout) {
        unsafe { dealloc(dma.cpu_addr.as_ptr(), layout) }
    }

    fn map(&self, handle: &Self::Handle) -> DriverResult<DmaMapping> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(DriverError::Io);
        }
        Ok(DmaMapping {
            bus_addr: DmaBusAddress::new(handle.0),
            len: handle.1,
        })
    }

    fn unmap(&self, mapping: &DmaMapping) {
        self.unmapped.lock().unwrap().push(*mapping);
    }
}

fn store(capacity: usize) -> (Arc<FakeMapper>, RegionStore<FakeMapper>) {
    let mapper = Arc::new(FakeMapper::default());
    let store = RegionStore::new(mapper.clone(), capacity);
    (mapper, store)
}

#[test]
fn bus_address_halves() {
    let addr = DmaBusAddress::new(0x1234_5678_9abc_def0);
    assert_eq!(addr.low_u32(), 0x9abc_def0);
    assert_eq!(addr.high_u32(), 0x1234_5678);
    assert_eq!(addr.add(0x10).as_u64(), 0x1234_5678_9abc_df00);
}

#[test]
fn translate_rejects_empty_and_out_of_bounds() {
    let mapping = DmaMapping {
        bus_addr: DmaBusAddress::new(0x1000),
        len: 0x100,
    };
    assert_eq!(mapping.translate(0x10, 0x20), Some(DmaBusAddress::new(0x1010)));
    assert_eq!(mapping.translate(0xf0, 0x10), Some(DmaBusAddress::new(0x10f0)));
    assert_eq!(mapping.translate(0xf0, 0x11), None);
    assert_eq!(mapping.translate(0, 0), None);
    assert_eq!(mapping.translate(usize::MAX, 2), None);
}

#[test]
fn prepare_resolve_release() {
    let (mapper, store) = store(4);
    store.prepare(5, &(0x8000, 0x1000)).unwrap();
    assert!(store.contains(5));
    assert_eq!(store.resolve(5, 0x200, 64), Ok(DmaBusAddress::new(0x8200)));
    store.release(5).unwrap();
    assert!(!store.contains(5));
    assert_eq!(mapper.unmapped.lock().unwrap().len(), 1);
}

#[test]
fn duplicate_prepare_does_not_mutate() {
    let (_mapper, store) = store(4);
    store.prepare(1, &(0x8000, 0x1000)).unwrap();
    assert_eq!(store.prepare(1, &(0x9000, 0x1000)), Err(DriverError::AlreadyExists));
    assert_eq!(store.resolve(1, 0, 1), Ok(DmaBusAddress::new(0x8000)));
    assert_eq!(store.len(), 1);
}

#[test]
fn mapping_failure_does_not_mutate() {
    let (mapper, store) = store(4);
    mapper.fail_next.store(true, Ordering::SeqCst);
    assert_eq!(store.prepare(1, &(0x8000, 0x1000)), Err(DriverError::Io));
    assert!(store.is_empty());
    store.prepare(1, &(0x8000, 0x1000)).unwrap();
}

#[test]
fn table_full_is_backpressure() {
    let (_mapper, store) = store(2);
    store.prepare(1, &(0x1000, 0x100)).unwrap();
    store.prepare(2, &(0x2000, 0x100)).unwrap();
    let err = store.prepare(3, &(0x3000, 0x100)).unwrap_err();
    assert_eq!(err, DriverError::NoMemory);
    assert!(err.is_retryable());
    store.release(1).unwrap();
    store.prepare(3, &(0x3000, 0x100)).unwrap();
}

#[test]
fn invalid_resolution() {
    let (_mapper, store) = store(2);
    store.prepare(1, &(0x1000, 0x100)).unwrap();
    assert_eq!(store.resolve(9, 0, 1), Err(DriverError::NotFound));
    assert_eq!(store.resolve(1, 0, 0), Err(DriverError::InvalidInput));
    assert_eq!(store.resolve(1, 0x80, 0x81), Err(DriverError::InvalidInput));
}

#[test]
fn pinned_region_cannot_be_released() {
    let (mapper, store) = store(2);
    store.prepare(5, &(0x1000, 0x1000)).unwrap();
    let pin = store.pin(5, 0x100, 0x200).unwrap();
    assert_eq!(pin.addr(), DmaBusAddress::new(0x1100));
    assert_eq!(store.pin_count(5), Some(1));

    assert_eq!(store.release(5), Err(DriverError::ResourceBusy));
    assert!(store.contains(5));
    assert!(mapper.unmapped.lock().unwrap().is_empty());

    drop(pin);
    assert_eq!(store.pin_count(5), Some(0));
    store.release(5).unwrap();
    assert_eq!(store.release(5), Err(DriverError::NotFound));
}

#[test]
fn split_pins_count_separately() {
    let (_mapper, store) = store(1);
    store.prepare(0, &(0x4000, 0x1000)).unwrap();
    let whole = store.pin(0, 0, 0x1000).unwrap();
    let first = whole.split(0, 0x800).unwrap();
    let second = whole.split(0x800, 0x800).unwrap();
    assert!(whole.split(0x800, 0x801).is_none());
    assert_eq!(second.addr(), DmaBusAddress::new(0x4800));
    assert_eq!(store.pin_count(0), Some(3));
    drop(whole);
    drop(first);
    assert_eq!(store.release(0), Err(DriverError::ResourceBusy));
    drop(second);
    store.release(0).unwrap();
}

#[test]
fn concurrent_resolvers() {
    const NUM_THREADS: usize = 8;
    const ITERS: usize = 1000;

    let (_mapper, store) = store(8);
    let store = Arc::new(store);
    for id in 0..4u8 {
        store
            .prepare(id, &(0x10_0000 * (id as u64 + 1), 0x1000))
            .unwrap();
    }

    let handles: Vec<_> = (0..NUM_THREADS)
        .map(|t| {
            let store = store.clone();
            thread::spawn(move || {
                for i in 0..ITERS {
                    let id = ((t + i) % 4) as u8;
                    let pin = store.pin(id, i % 0x800, 64).unwrap();
                    assert_eq!(pin.region(), id);
                    assert_eq!(
                        pin.addr().as_u64(),
                        0x10_0000 * (id as u64 + 1) + (i % 0x800) as u64
                    );
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    for id in 0..4u8 {
        assert_eq!(store.pin_count(id), Some(0));
        store.release(id).unwrap();
    }
}

#[test]
fn dropping_store_unmaps_everything() {
    let (mapper, store) = store(4);
    store.prepare(1, &(0x1000, 0x100)).unwrap();
    store.prepare(2, &(0x2000, 0x100)).unwrap();
    drop(store);
    assert_eq!(mapper.unmapped.lock().unwrap().len(), 2);
}

#[test]
fn coherent_allocation_is_zeroed() {
    let mapper = FakeMapper::default();
    let layout = Layout::from_size_align(256, 64).unwrap();
    let dma = mapper.alloc_coherent(layout).unwrap();
    let bytes = unsafe { core::slice::from_raw_parts(dma.cpu_addr.as_ptr(), 256) };
    assert!(bytes.iter().all(|&b| b == 0));
    unsafe { mapper.dealloc_coherent(dma, layout) };
}
