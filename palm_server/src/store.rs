//! In-memory cache of annotated results.
//!
use std::{
    collections::{hash_map::RandomState, HashMap, VecDeque},
    hash::{BuildHasher, Hash, Hasher},
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex,
    },
};

use bytes::Bytes;
use common::report::DetectionReport;

/// A finished detection: the report and the annotated PNG.
#[derive(Clone, Debug)]
pub struct StoredResult {
    pub report: DetectionReport,
    pub png: Bytes,
}

/// Bounded map of results. The oldest entry is evicted when full.
pub struct ResultStore {
    capacity: usize,
    inner: Mutex<Inner>,
    counter: AtomicU64,
    id_hasher: RandomState,
}

#[derive(Default)]
struct Inner {
    map: HashMap<String, StoredResult>,
    order: VecDeque<String>,
}

impl ResultStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
            counter: AtomicU64::new(0),
            id_hasher: RandomState::new(),
        }
    }

    /// Allocate a fresh id that is hard to guess from earlier ids.
    pub fn next_id(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::Relaxed);
        let mut hasher = self.id_hasher.build_hasher();
        n.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }

    pub fn insert(&self, result: StoredResult) {
        let id = result.report.id.clone();
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        if inner.map.insert(id.clone(), result).is_none() {
            inner.order.push_back(id);
        }

        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                log::debug!("Evicting result {}", oldest);
                inner.map.remove(&oldest);
            }
        }
    }

    pub fn get(&self, id: &str) -> Option<StoredResult> {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.get(id).cloned()
    }

    pub fn len(&self) -> usize {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
