use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::Mutex;

use serde::{de::DeserializeOwned, Serialize};

use crate::follow;
use crate::posts::{self, NewPost};
use crate::users;

/// Key-value storage the social graph is persisted in.
///
/// Every single-key call is atomic. `insert_if_absent` and `remove` are the
/// conditional set-membership primitives that follow edges, likes, tag
/// associations and email claims are built on: they report whether the call
/// changed anything, so racing callers never observe a half-applied record.
pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;
    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()>;
    fn delete(&self, key: &str) -> anyhow::Result<()>;
    fn exists(&self, key: &str) -> anyhow::Result<bool>;
    fn get_keys(&self) -> anyhow::Result<Vec<String>>;
    /// Stores `value` only when `key` is vacant. Returns `true` if it was stored.
    fn insert_if_absent(&self, key: &str, value: &[u8]) -> anyhow::Result<bool>;
    /// Removes `key`. Returns `true` if it was present.
    fn remove(&self, key: &str) -> anyhow::Result<bool>;

    /// Keys starting with `prefix`, in ascending order. Backends with
    /// ordered keys should override the full listing used here.
    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .get_keys()?
            .into_iter()
            .filter(|k| k.starts_with(prefix))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

pub trait StoreExt {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>>;
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()>;
    fn insert_json_if_absent<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<bool>;
}

impl<S: KeyValueStore + ?Sized> StoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> anyhow::Result<Option<T>> {
        match self.get(key)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<()> {
        self.set(key, &serde_json::to_vec(value)?)
    }

    fn insert_json_if_absent<T: Serialize>(&self, key: &str, value: &T) -> anyhow::Result<bool> {
        self.insert_if_absent(key, &serde_json::to_vec(value)?)
    }
}

/// In-process store used by the native server and by tests.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn entries(&self) -> anyhow::Result<std::sync::MutexGuard<'_, BTreeMap<String, Vec<u8>>>> {
        self.entries
            .lock()
            .map_err(|_| anyhow::anyhow!("memory store lock poisoned"))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.entries()?.insert(key.to_string(), value.to_vec());
        Ok(())
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.entries()?.remove(key);
        Ok(())
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries()?.contains_key(key))
    }

    fn get_keys(&self) -> anyhow::Result<Vec<String>> {
        Ok(self.entries()?.keys().cloned().collect())
    }

    fn insert_if_absent(&self, key: &str, value: &[u8]) -> anyhow::Result<bool> {
        let mut entries = self.entries()?;
        if entries.contains_key(key) {
            return Ok(false);
        }
        entries.insert(key.to_string(), value.to_vec());
        Ok(true)
    }

    fn remove(&self, key: &str) -> anyhow::Result<bool> {
        Ok(self.entries()?.remove(key).is_some())
    }

    fn keys_with_prefix(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        Ok(self
            .entries()?
            .range::<str, _>((Bound::Included(prefix), Bound::Unbounded))
            .map(|(k, _)| k)
            .take_while(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// Spin key-value store backing the wasm component.
///
/// Spin offers no compare-and-swap, so the conditional calls are an exists
/// check followed by a single-key write. Membership values are idempotent,
/// which keeps a racing duplicate write harmless.
#[cfg(target_arch = "wasm32")]
pub struct SpinStore {
    inner: spin_sdk::key_value::Store,
}

#[cfg(target_arch = "wasm32")]
impl SpinStore {
    pub fn open_default() -> anyhow::Result<Self> {
        let inner = spin_sdk::key_value::Store::open_default()
            .map_err(|e| anyhow::anyhow!("failed to open KV store: {:?}", e))?;
        Ok(Self { inner })
    }
}

#[cfg(target_arch = "wasm32")]
impl KeyValueStore for SpinStore {
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.inner
            .get(key)
            .map_err(|e| anyhow::anyhow!("kv get {}: {:?}", key, e))
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        self.inner
            .set(key, value)
            .map_err(|e| anyhow::anyhow!("kv set {}: {:?}", key, e))
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner
            .delete(key)
            .map_err(|e| anyhow::anyhow!("kv delete {}: {:?}", key, e))
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.inner
            .exists(key)
            .map_err(|e| anyhow::anyhow!("kv exists {}: {:?}", key, e))
    }

    fn get_keys(&self) -> anyhow::Result<Vec<String>> {
        self.inner
            .get_keys()
            .map_err(|e| anyhow::anyhow!("kv get_keys: {:?}", e))
    }

    fn insert_if_absent(&self, key: &str, value: &[u8]) -> anyhow::Result<bool> {
        if self.exists(key)? {
            return Ok(false);
        }
        self.set(key, value)?;
        Ok(true)
    }

    fn remove(&self, key: &str) -> anyhow::Result<bool> {
        if !self.exists(key)? {
            return Ok(false);
        }
        self.delete(key)?;
        Ok(true)
    }
}

const DEMO_PASSWORD: &str = "campus-demo";

/// Creates a few demo accounts with posts and one follow edge.
/// Safe to call repeatedly: existing demo accounts are left alone.
pub fn seed_demo_data(store: &dyn KeyValueStore) -> anyhow::Result<()> {
    if users::find_by_email(store, "alice@campus.edu")?.is_some() {
        return Ok(());
    }

    let alice = users::register(store, "alice@campus.edu", "Alice", DEMO_PASSWORD)?;
    let bob = users::register(store, "bob@campus.edu", "Bob", DEMO_PASSWORD)?;

    posts::create(
        store,
        &alice.id,
        NewPost {
            content: "Welcome to the quad! Study group in the library at 6.".to_string(),
            tags: vec!["studies".to_string(), "campus".to_string()],
            image_url: None,
        },
    )?;
    posts::create(
        store,
        &bob.id,
        NewPost {
            content: "Chess club meets Thursday, all levels welcome.".to_string(),
            tags: vec!["clubs".to_string()],
            image_url: None,
        },
    )?;
    follow::follow(store, &bob.id, &alice.id)?;

    tracing::info!("seeded demo data");
    Ok(())
}

/// `MemoryStore` that runs a hook before every write, so tests can inject a
/// concurrent change or a storage failure at an exact point.
#[cfg(test)]
pub(crate) struct HookedStore<F> {
    pub inner: MemoryStore,
    on_write: F,
}

#[cfg(test)]
impl<F> HookedStore<F>
where
    F: Fn(&MemoryStore, &str) -> anyhow::Result<()> + Send + Sync,
{
    pub fn new(on_write: F) -> Self {
        Self {
            inner: MemoryStore::new(),
            on_write,
        }
    }
}

#[cfg(test)]
impl<F> KeyValueStore for HookedStore<F>
where
    F: Fn(&MemoryStore, &str) -> anyhow::Result<()> + Send + Sync,
{
    fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &[u8]) -> anyhow::Result<()> {
        (self.on_write)(&self.inner, key)?;
        self.inner.set(key, value)
    }

    fn delete(&self, key: &str) -> anyhow::Result<()> {
        self.inner.delete(key)
    }

    fn exists(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.exists(key)
    }

    fn get_keys(&self) -> anyhow::Result<Vec<String>> {
        self.inner.get_keys()
    }

    fn insert_if_absent(&self, key: &str, value: &[u8]) -> anyhow::Result<bool> {
        (self.on_write)(&self.inner, key)?;
        self.inner.insert_if_absent(key, value)
    }

    fn remove(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.remove(key)
    }
}
