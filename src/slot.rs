//! 单值共享槽
//! Single-value shared slot: whole-value `Arc` swap between threads
//!
//! 写入方整体替换, 读取方拿到的永远是某一次完整写入的快照.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct SharedSlot<T: ?Sized> {
    value: Mutex<Option<Arc<T>>>,
    version: AtomicU64,
}

impl<T: ?Sized> SharedSlot<T> {
    pub fn new() -> Self {
        Self {
            value: Mutex::new(None),
            version: AtomicU64::new(0),
        }
    }

    fn guard(&self) -> MutexGuard<'_, Option<Arc<T>>> {
        self.value.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 替换当前值, 返回新版本号
    pub fn store_arc(&self, value: Arc<T>) -> u64 {
        let mut guard = self.guard();
        *guard = Some(value);
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub fn clear(&self) -> u64 {
        let mut guard = self.guard();
        *guard = None;
        self.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// 读取快照
    pub fn load(&self) -> Option<Arc<T>> {
        self.guard().clone()
    }

    /// 读取快照及其版本号 (两者一致)
    pub fn load_versioned(&self) -> (u64, Option<Arc<T>>) {
        let guard = self.guard();
        (self.version.load(Ordering::Acquire), guard.clone())
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Acquire)
    }

    pub fn is_empty(&self) -> bool {
        self.guard().is_none()
    }
}

impl<T> SharedSlot<T> {
    pub fn with_value(value: T) -> Self {
        Self {
            value: Mutex::new(Some(Arc::new(value))),
            version: AtomicU64::new(1),
        }
    }

    pub fn store(&self, value: T) -> u64 {
        self.store_arc(Arc::new(value))
    }

    /// 在锁内完成读-改-写, 避免两个写入方互相覆盖
    pub fn update(&self, f: impl FnOnce(Option<&T>) -> T) -> Arc<T> {
        let mut guard = self.guard();
        let next = Arc::new(f(guard.as_deref()));
        *guard = Some(Arc::clone(&next));
        self.version.fetch_add(1, Ordering::AcqRel);
        next
    }
}

impl<T: ?Sized> Default for SharedSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_store_load_clear() {
        let slot = SharedSlot::new();
        assert!(slot.load().is_none());
        assert_eq!(slot.store(7u32), 1);
        assert_eq!(*slot.load().unwrap(), 7);
        assert_eq!(slot.clear(), 2);
        assert!(slot.is_empty());
    }

    #[test]
    fn test_reader_keeps_its_snapshot() {
        let slot = SharedSlot::with_value(String::from("old"));
        let snapshot = slot.load().unwrap();
        slot.store(String::from("new"));
        assert_eq!(*snapshot, "old");
        assert_eq!(*slot.load().unwrap(), "new");
    }

    #[test]
    fn test_update_is_read_modify_write() {
        let slot = Arc::new(SharedSlot::with_value(0u64));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slot = Arc::clone(&slot);
                thread::spawn(move || {
                    for _ in 0..250 {
                        slot.update(|v| v.copied().unwrap_or(0) + 1);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(*slot.load().unwrap(), 1000);
    }

    #[test]
    fn test_unsized_values() {
        let slot: SharedSlot<[u8]> = SharedSlot::new();
        slot.store_arc(Arc::from(vec![1u8, 2, 3]));
        assert_eq!(slot.load().unwrap().len(), 3);
    }
}
