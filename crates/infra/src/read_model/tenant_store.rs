use std::collections::HashMap;
use std::hash::Hash;
use std::sync::{Arc, RwLock};

use forgerev_core::TenantId;

/// Tenant-isolated key/value store for read models and engine-side records
/// (source events, the contract-number directory).
pub trait TenantStore<K, V>: Send + Sync {
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V>;
    fn upsert(&self, tenant_id: TenantId, key: K, value: V);
    /// Store `value` unless the key is taken; returns whatever is stored afterwards.
    fn insert_if_absent(&self, tenant_id: TenantId, key: K, value: V) -> V;
    fn list(&self, tenant_id: TenantId) -> Vec<V>;
    /// Clear all records for a tenant (rebuild support).
    fn clear_tenant(&self, tenant_id: TenantId);
}

impl<K, V, S> TenantStore<K, V> for Arc<S>
where
    S: TenantStore<K, V> + ?Sized,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        (**self).get(tenant_id, key)
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        (**self).upsert(tenant_id, key, value)
    }

    fn insert_if_absent(&self, tenant_id: TenantId, key: K, value: V) -> V {
        (**self).insert_if_absent(tenant_id, key, value)
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        (**self).list(tenant_id)
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        (**self).clear_tenant(tenant_id)
    }
}

#[derive(Debug)]
pub struct InMemoryTenantStore<K, V> {
    inner: RwLock<HashMap<(TenantId, K), V>>,
}

impl<K, V> InMemoryTenantStore<K, V> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl<K, V> Default for InMemoryTenantStore<K, V> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> TenantStore<K, V> for InMemoryTenantStore<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn get(&self, tenant_id: TenantId, key: &K) -> Option<V> {
        let map = self.inner.read().ok()?;
        map.get(&(tenant_id, key.clone())).cloned()
    }

    fn upsert(&self, tenant_id: TenantId, key: K, value: V) {
        if let Ok(mut map) = self.inner.write() {
            map.insert((tenant_id, key), value);
        }
    }

    fn insert_if_absent(&self, tenant_id: TenantId, key: K, value: V) -> V {
        match self.inner.write() {
            Ok(mut map) => map.entry((tenant_id, key)).or_insert(value).clone(),
            Err(_) => value,
        }
    }

    fn list(&self, tenant_id: TenantId) -> Vec<V> {
        let map = match self.inner.read() {
            Ok(m) => m,
            Err(_) => return vec![],
        };

        map.iter()
            .filter_map(|((t, _k), v)| if *t == tenant_id { Some(v.clone()) } else { None })
            .collect()
    }

    fn clear_tenant(&self, tenant_id: TenantId) {
        if let Ok(mut map) = self.inner.write() {
            map.retain(|(t, _k), _v| *t != tenant_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tenants_do_not_see_each_other() {
        let store: InMemoryTenantStore<String, i64> = InMemoryTenantStore::new();
        let (a, b) = (TenantId::new(), TenantId::new());
        store.upsert(a, "C-1".into(), 1);
        store.upsert(b, "C-1".into(), 2);

        assert_eq!(store.get(a, &"C-1".to_string()), Some(1));
        assert_eq!(store.list(b), vec![2]);

        store.clear_tenant(a);
        assert!(store.list(a).is_empty());
        assert_eq!(store.list(b), vec![2]);
    }

    #[test]
    fn insert_if_absent_keeps_first_writer() {
        let store: InMemoryTenantStore<&'static str, u32> = InMemoryTenantStore::new();
        let t = TenantId::new();
        assert_eq!(store.insert_if_absent(t, "C-1", 10), 10);
        assert_eq!(store.insert_if_absent(t, "C-1", 20), 10);
        assert_eq!(store.get(t, &"C-1"), Some(10));
    }
}
