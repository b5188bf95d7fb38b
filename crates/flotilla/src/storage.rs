// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::any::{Any, TypeId};
use std::borrow::Cow;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::model::Replica;

/// Selects how long per-replica state lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReplicaStorageScope {
    /// One storage container shared by every request on the same client.
    /// Weight modifiers keep learning across requests.
    #[default]
    Process,
    /// A fresh container per request; state is discarded at pipeline exit.
    Request,
}

/// A container of typed per-replica state maps, keyed by an opaque namespace.
///
/// Each namespace is statically owned by exactly one weight modifier, so the
/// container hands out one typed map per `(namespace, type)` pair. Clones
/// share the underlying maps; with [`ReplicaStorageScope::Process`] a single
/// container lives for the client's lifetime.
#[derive(Clone, Default)]
pub struct ReplicaStorageContainer {
    spaces: Arc<RwLock<HashMap<SpaceKey, Arc<dyn Any + Send + Sync>>>>,
}

type SpaceKey = (TypeId, Cow<'static, str>);

impl ReplicaStorageContainer {
    /// Creates an empty container.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Obtains the storage for `namespace`, creating it on first use.
    ///
    /// Callers with the same namespace and value type observe the same map.
    #[must_use]
    pub fn obtain<V>(&self, namespace: impl Into<Cow<'static, str>>) -> ReplicaStorage<V>
    where
        V: Clone + PartialEq + Send + Sync + 'static,
    {
        let key = (TypeId::of::<V>(), namespace.into());

        if let Some(existing) = self.spaces.read().get(&key)
            && let Ok(inner) = Arc::clone(existing).downcast::<StorageInner<V>>()
        {
            return ReplicaStorage { inner };
        }

        let mut spaces = self.spaces.write();
        let entry = spaces
            .entry(key)
            .or_insert_with(|| Arc::new(StorageInner::<V>::default()));
        match Arc::clone(entry).downcast::<StorageInner<V>>() {
            Ok(inner) => ReplicaStorage { inner },
            // Unreachable: the key embeds the TypeId of V.
            Err(_) => ReplicaStorage {
                inner: Arc::new(StorageInner::default()),
            },
        }
    }
}

impl fmt::Debug for ReplicaStorageContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplicaStorageContainer")
            .field("spaces", &self.spaces.read().len())
            .finish()
    }
}

/// A concurrent map of per-replica values mutated through compare-and-set
/// style operations.
///
/// Updates are linearized per key: `try_update` succeeds only when the stored
/// value still equals the expected one, so a failed call signals contention
/// and the caller must re-read before deciding again.
#[derive(Debug)]
pub struct ReplicaStorage<V> {
    inner: Arc<StorageInner<V>>,
}

impl<V> Clone for ReplicaStorage<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[derive(Debug)]
struct StorageInner<V> {
    map: RwLock<HashMap<Replica, V>>,
}

impl<V> Default for StorageInner<V> {
    fn default() -> Self {
        Self {
            map: RwLock::new(HashMap::new()),
        }
    }
}

impl<V> ReplicaStorage<V>
where
    V: Clone + PartialEq,
{
    /// Returns a copy of the value stored for the replica.
    #[must_use]
    pub fn get(&self, replica: &Replica) -> Option<V> {
        self.inner.map.read().get(replica).cloned()
    }

    /// Inserts a value if the replica has none yet.
    ///
    /// Returns `false` when a value was already present.
    pub fn try_add(&self, replica: &Replica, value: V) -> bool {
        let mut map = self.inner.map.write();
        if map.contains_key(replica) {
            return false;
        }
        map.insert(replica.clone(), value);
        true
    }

    /// Replaces the stored value only if it still equals `expected`.
    ///
    /// Returns `false` when the replica has no value or the stored value no
    /// longer matches; the caller should re-read and decide again.
    pub fn try_update(&self, replica: &Replica, new: V, expected: &V) -> bool {
        let mut map = self.inner.map.write();
        match map.get_mut(replica) {
            Some(current) if current == expected => {
                *current = new;
                true
            }
            _ => false,
        }
    }

    /// Returns the stored value, installing the factory's product when the
    /// replica has none.
    ///
    /// The factory may run more than once under contention, but exactly one
    /// produced value is installed.
    pub fn get_or_add(&self, replica: &Replica, factory: impl FnOnce() -> V) -> V {
        if let Some(existing) = self.get(replica) {
            return existing;
        }

        let candidate = factory();
        let mut map = self.inner.map.write();
        map.entry(replica.clone()).or_insert(candidate).clone()
    }

    /// A snapshot of every (replica, value) pair.
    #[must_use]
    pub fn entries(&self) -> Vec<(Replica, V)> {
        self.inner
            .map
            .read()
            .iter()
            .map(|(replica, value)| (replica.clone(), value.clone()))
            .collect()
    }
}
