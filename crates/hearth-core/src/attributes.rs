//! Attribute store with change notification fan-out.
//!
//! The store is the canonical owner of the live sensor-facing values
//! and the only state shared between the sensor and protocol contexts.
//! Writes are compare-and-set: storing the value an attribute already
//! holds is a no-op and fires nothing, so a sensor reporting the same
//! reading once a second does not flood subscribers.
//!
//! # Concurrency
//!
//! One short critical section covers the compare, the write and a
//! snapshot of the subscriber list; callbacks then run outside the lock
//! against the snapshot. A callback that re-enters the store (to read,
//! or to register another subscriber) therefore cannot deadlock against
//! a concurrent writer.

use std::sync::{Arc, Mutex, PoisonError};

use std::collections::HashMap;

/// Address of one attribute: endpoint, cluster, attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AttributePath {
    /// Endpoint hosting the cluster
    pub endpoint: u8,
    /// Cluster identifier
    pub cluster: u32,
    /// Attribute identifier within the cluster
    pub attribute: u32,
}

impl AttributePath {
    /// Shorthand constructor.
    #[must_use]
    pub fn new(endpoint: u8, cluster: u32, attribute: u32) -> Self {
        Self { endpoint, cluster, attribute }
    }
}

/// A typed attribute value.
///
/// Scalars hold the live state; the list variants reference the static
/// descriptor tables and exist so one encoder covers every readable
/// attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttributeValue {
    /// Boolean attribute (OnOff)
    Bool(bool),
    /// Unsigned 8-bit attribute (CurrentLevel)
    U8(u8),
    /// Unsigned 16-bit attribute (Tolerance, ClusterRevision)
    U16(u16),
    /// Unsigned 32-bit attribute (FeatureMap)
    U32(u32),
    /// Signed 16-bit attribute (MeasuredValue, centidegrees)
    I16(i16),
    /// Descriptor DeviceTypeList entries
    DeviceTypes(&'static [DeviceTypeEntry]),
    /// Descriptor ServerList / ClientList cluster ids
    Clusters(&'static [u32]),
    /// Descriptor PartsList endpoint ids
    Parts(&'static [u8]),
}

/// One DeviceTypeList entry: device type and revision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceTypeEntry {
    /// Matter device type identifier
    pub device_type: u32,
    /// Device type revision
    pub revision: u16,
}

/// Outcome of a compare-and-set write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SetOutcome {
    /// Value differed and was stored; subscribers were notified
    Changed,
    /// Value was already current; nothing fired
    Unchanged,
}

/// Identifier handed out by [`AttributeStore::subscribe`].
pub type SubscriberId = u32;

type Subscriber = Arc<dyn Fn(AttributePath, AttributeValue) + Send + Sync>;

struct Inner {
    values: HashMap<AttributePath, AttributeValue>,
    subscribers: Vec<(SubscriberId, Subscriber)>,
    next_subscriber: SubscriberId,
}

/// Thread-safe attribute store.
///
/// Clones share the same underlying table, so the sensor context and
/// the protocol context each hold a handle.
#[derive(Clone)]
pub struct AttributeStore {
    inner: Arc<Mutex<Inner>>,
}

impl Default for AttributeStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AttributeStore {
    /// Create a store seeded with the live attributes at their resets.
    #[must_use]
    pub fn new() -> Self {
        let mut values = HashMap::new();
        for (path, value) in crate::clusters::live_attribute_defaults() {
            values.insert(path, value);
        }
        Self {
            inner: Arc::new(Mutex::new(Inner {
                values,
                subscribers: Vec::new(),
                next_subscriber: 1,
            })),
        }
    }

    /// Current value of an attribute, if the store owns it.
    #[must_use]
    pub fn get(&self, path: AttributePath) -> Option<AttributeValue> {
        self.lock().values.get(&path).copied()
    }

    /// Compare-and-set write.
    ///
    /// Returns [`SetOutcome::Unchanged`] (and notifies nobody) when the
    /// stored value already equals `value`. Otherwise the value is
    /// stored and every subscriber runs, outside the lock, against the
    /// subscriber list snapshotted inside it.
    pub fn set(&self, path: AttributePath, value: AttributeValue) -> SetOutcome {
        let snapshot: Vec<Subscriber> = {
            let mut inner = self.lock();
            if inner.values.get(&path) == Some(&value) {
                return SetOutcome::Unchanged;
            }
            inner.values.insert(path, value);
            inner.subscribers.iter().map(|(_, cb)| Arc::clone(cb)).collect()
        };

        for callback in snapshot {
            callback(path, value);
        }
        SetOutcome::Changed
    }

    /// Register a change callback; fires synchronously on every
    /// effective write.
    pub fn subscribe(
        &self,
        callback: impl Fn(AttributePath, AttributeValue) + Send + Sync + 'static,
    ) -> SubscriberId {
        let mut inner = self.lock();
        let id = inner.next_subscriber;
        inner.next_subscriber += 1;
        inner.subscribers.push((id, Arc::new(callback)));
        id
    }

    /// Remove a change callback. Returns false if the id is unknown.
    pub fn unsubscribe(&self, id: SubscriberId) -> bool {
        let mut inner = self.lock();
        let before = inner.subscribers.len();
        inner.subscribers.retain(|(sub_id, _)| *sub_id != id);
        inner.subscribers.len() != before
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        // A poisoned lock means a subscriber snapshot panicked mid-copy;
        // the table itself is still consistent.
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::clusters;

    fn level_path() -> AttributePath {
        AttributePath::new(1, clusters::CLUSTER_LEVEL_CONTROL, clusters::ATTR_CURRENT_LEVEL)
    }

    #[test]
    fn store_seeds_live_defaults() {
        let store = AttributeStore::new();
        assert_eq!(store.get(level_path()), Some(AttributeValue::U8(0)));
        assert_eq!(
            store.get(AttributePath::new(1, clusters::CLUSTER_ON_OFF, clusters::ATTR_ON_OFF)),
            Some(AttributeValue::Bool(false))
        );
    }

    #[test]
    fn set_returns_changed_then_unchanged() {
        let store = AttributeStore::new();
        assert_eq!(store.set(level_path(), AttributeValue::U8(40)), SetOutcome::Changed);
        assert_eq!(store.set(level_path(), AttributeValue::U8(40)), SetOutcome::Unchanged);
        assert_eq!(store.set(level_path(), AttributeValue::U8(41)), SetOutcome::Changed);
    }

    #[test]
    fn idempotent_writes_fire_no_notifications() {
        let store = AttributeStore::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&fired);
        store.subscribe(move |_, _| {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        store.set(level_path(), AttributeValue::U8(75));
        store.set(level_path(), AttributeValue::U8(75));
        store.set(level_path(), AttributeValue::U8(75));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callbacks_see_path_and_value() {
        let store = AttributeStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(move |path, value| {
            sink.lock().unwrap().push((path, value));
        });

        store.set(level_path(), AttributeValue::U8(9));
        let seen = seen.lock().unwrap();
        assert_eq!(seen.as_slice(), &[(level_path(), AttributeValue::U8(9))]);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let store = AttributeStore::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let observed = Arc::clone(&fired);
        let id = store.subscribe(move |_, _| {
            observed.fetch_add(1, Ordering::SeqCst);
        });

        store.set(level_path(), AttributeValue::U8(1));
        assert!(store.unsubscribe(id));
        assert!(!store.unsubscribe(id));
        store.set(level_path(), AttributeValue::U8(2));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn callback_may_reenter_the_store() {
        let store = AttributeStore::new();
        let reader = store.clone();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        store.subscribe(move |path, _| {
            // Re-entering get() from a callback must not deadlock.
            *sink.lock().unwrap() = reader.get(path);
        });

        store.set(level_path(), AttributeValue::U8(33));
        assert_eq!(*seen.lock().unwrap(), Some(AttributeValue::U8(33)));
    }

    #[test]
    fn updates_are_observed_in_order() {
        let store = AttributeStore::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        store.subscribe(move |_, value| {
            sink.lock().unwrap().push(value);
        });

        for level in [10u8, 20, 30, 40] {
            store.set(level_path(), AttributeValue::U8(level));
        }
        let seen = seen.lock().unwrap();
        assert_eq!(
            seen.as_slice(),
            &[
                AttributeValue::U8(10),
                AttributeValue::U8(20),
                AttributeValue::U8(30),
                AttributeValue::U8(40)
            ]
        );
    }
}
