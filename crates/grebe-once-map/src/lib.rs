use std::borrow::Borrow;
use std::hash::Hash;
use std::pin::pin;
use std::sync::{Arc, Mutex};

use rustc_hash::FxHashMap;
use tokio::sync::Notify;

/// Run tasks only once and store the results in a parallel hash map.
///
/// We often have jobs `Fn(K) -> V` that we only want to run once and memoize, e.g.
/// network requests for metadata. When multiple tasks start the same query in parallel,
/// we want one of them to do the fetch and the others to wait for (and share) its result.
///
/// The usual call pattern is: [`OnceMap::register`], and if it returned `true` do the
/// job and submit it with [`OnceMap::done`], otherwise [`OnceMap::wait`] for whoever
/// registered first.
pub struct OnceMap<K: Eq + Hash, V> {
    items: Mutex<FxHashMap<K, Entry<V>>>,
}

enum Entry<V> {
    /// The job was registered; the `Notify` fires once the result lands.
    InFlight(Arc<Notify>),
    Done(V),
}

impl<K: Eq + Hash, V: Clone> OnceMap<K, V> {
    /// Register that you want to start a job.
    ///
    /// If this method returns `true`, you need to start a job and call [`OnceMap::done`]
    /// eventually or other tasks will hang. If it returns `false`, this job is already
    /// in progress or finished and you can [`OnceMap::wait`] for the result.
    pub fn register(&self, key: K) -> bool {
        let mut items = self.items.lock().unwrap();
        if items.contains_key(&key) {
            false
        } else {
            items.insert(key, Entry::InFlight(Arc::new(Notify::new())));
            true
        }
    }

    /// Submit the result of a job you registered.
    pub fn done(&self, key: K, value: V) {
        let mut items = self.items.lock().unwrap();
        match items.insert(key, Entry::Done(value)) {
            Some(Entry::InFlight(notify)) => notify.notify_waiters(),
            // Results are write-once; `done` without `register` is a bug in the caller.
            _ => debug_assert!(false, "`done` called without a registered job"),
        }
    }

    /// Wait for the result of an in-flight (or already finished) job.
    ///
    /// Returns `None` if the job was never registered, or if the whole map was dropped
    /// mid-flight (the driver aborted).
    pub async fn wait<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let notify = {
            let items = self.items.lock().unwrap();
            match items.get(key) {
                Some(Entry::Done(value)) => return Some(value.clone()),
                Some(Entry::InFlight(notify)) => notify.clone(),
                None => return None,
            }
        };

        // Subscribe before re-checking, so a `done` racing between the check and the
        // await cannot be missed.
        let mut notified = pin!(notify.notified());
        notified.as_mut().enable();
        {
            let items = self.items.lock().unwrap();
            match items.get(key) {
                Some(Entry::Done(value)) => return Some(value.clone()),
                Some(Entry::InFlight(_)) => {}
                None => return None,
            }
        }
        notified.await;

        let items = self.items.lock().unwrap();
        match items.get(key) {
            Some(Entry::Done(value)) => Some(value.clone()),
            _ => None,
        }
    }

    /// Return the result of a previous job, if any.
    pub fn get<Q>(&self, key: &Q) -> Option<V>
    where
        K: Borrow<Q>,
        Q: ?Sized + Hash + Eq,
    {
        let items = self.items.lock().unwrap();
        match items.get(key) {
            Some(Entry::Done(value)) => Some(value.clone()),
            _ => None,
        }
    }
}

impl<K: Eq + Hash, V> Default for OnceMap<K, V> {
    fn default() -> Self {
        Self {
            items: Mutex::new(FxHashMap::default()),
        }
    }
}
