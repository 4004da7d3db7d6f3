//! Lazily constructed per-thread singletons with guaranteed teardown
//!
//! `PerThread<T>` hands every calling thread its own instance of `T`, built
//! on first access from a factory captured at manager construction and
//! destroyed exactly once when the thread exits. Rust offers no
//! destructor-capable native key with an opaque payload, so the keyed store
//! is a thread-local map from manager key to boxed instance; dropping the map
//! at thread exit is the teardown callback.
//!
//! The delicate part is reentrancy during teardown: the map entry becomes
//! unreachable before the instance's destructor runs, so a naive lookup from
//! inside that destructor would construct (and leak) a second instance. The
//! teardown path therefore re-arms a destructor-free thread-local slot with
//! the dying instance for the duration of the drop, and clears it afterwards.
//! Slot states per thread: unconstructed, live (in the map), destroying
//! (armed slot), cleared. No path returns from cleared to live on the same
//! thread.

use std::{
    cell::{Cell, RefCell},
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use crate::error::{LogpipeError, Result};

/// Process-wide source of manager keys, one namespace for every `PerThread`
static NEXT_KEY: AtomicUsize = AtomicUsize::new(0);

/// One thread's slot for one manager: the boxed instance, type-erased so a
/// single map serves all managers, plus the key needed to re-arm the slot
/// while the destructor runs.
struct Holder {
    key: usize,
    value: *mut (),
    drop_fn: unsafe fn(*mut ()),
}

/// Snapshot of a slot re-armed for the duration of its destructor
#[derive(Clone, Copy)]
struct ArmedSlot {
    key: usize,
    value: *mut (),
}

thread_local! {
    /// Live instances owned by this thread, keyed by manager.
    /// Dropping the map at thread exit destroys every instance.
    static SLOTS: RefCell<HashMap<usize, Holder>> = RefCell::new(HashMap::new());

    /// Reentrancy guard for teardown. Const-initialized and destructor-free,
    /// so it stays accessible for the whole thread-local destruction phase.
    static DESTROYING: Cell<Option<ArmedSlot>> = const { Cell::new(None) };
}

impl Drop for Holder {
    fn drop(&mut self) {
        // The map entry is already gone by the time we run; re-arm the slot
        // so a lookup from inside the instance's destructor finds the
        // existing object instead of building a second one. Save and restore
        // rather than set and clear, in case destructors nest.
        let armed = ArmedSlot {
            key: self.key,
            value: self.value,
        };
        let previous = match DESTROYING.try_with(|slot| slot.replace(Some(armed))) {
            Ok(previous) => previous,
            // The guard slot is unreachable while a destructor is about to
            // run against torn-down storage. There is no safe recovery:
            // continuing risks a silent second construction and a leak that
            // corrupts later. Terminate instead.
            Err(_) => std::process::abort(),
        };

        // SAFETY: `value` was produced by `Box::into_raw` for the type this
        // `drop_fn` was instantiated with, and nothing else frees it.
        unsafe { (self.drop_fn)(self.value) };

        let _ = DESTROYING.try_with(|slot| slot.set(previous));
    }
}

unsafe fn drop_boxed<T>(value: *mut ()) {
    drop(unsafe { Box::from_raw(value as *mut T) });
}

/// Manager of one lazily constructed instance of `T` per calling thread
///
/// The factory is captured once at manager construction and invoked on each
/// thread's first `get`. The manager itself is freely shared across threads;
/// the instances it hands out never are.
///
/// Dropping the manager destroys the calling thread's own instance, if any.
/// Instances owned by other threads are expected to have been destroyed by
/// those threads' own exit callbacks already; that is a documented
/// limitation, not something enforced here.
pub struct PerThread<T: 'static> {
    key: usize,
    factory: Arc<dyn Fn() -> Result<T> + Send + Sync>,
}

impl<T: 'static> PerThread<T> {
    /// Create a manager that builds each thread's instance with `factory`
    pub fn new<F>(factory: F) -> Result<Self>
    where
        F: Fn() -> Result<T> + Send + Sync + 'static,
    {
        let key = NEXT_KEY.fetch_add(1, Ordering::Relaxed);
        if key == usize::MAX {
            return Err(LogpipeError::platform("per-thread key space exhausted"));
        }
        Ok(Self {
            key,
            factory: Arc::new(factory),
        })
    }

    /// Get the calling thread's instance, constructing it on first access.
    ///
    /// Two consecutive calls on the same thread return the same instance. A
    /// call made from inside the instance's own destructor during thread
    /// exit observes the existing instance rather than creating a new one.
    /// Factory failures and unavailable thread-local storage surface as
    /// errors to the caller.
    pub fn get(&self) -> Result<&T> {
        // Teardown re-arms the slot here while the destructor runs.
        if let Some(armed) = DESTROYING.try_with(|slot| slot.get()).ok().flatten() {
            if armed.key == self.key {
                // SAFETY: the pointee stays alive for the whole destructor
                // call that armed this slot, and the key ties it to `T`.
                return Ok(unsafe { &*(armed.value as *const T) });
            }
        }

        let value = SLOTS
            .try_with(|slots| -> Result<*const T> {
                if let Some(holder) = slots.borrow().get(&self.key) {
                    return Ok(holder.value as *const T);
                }
                let value = Box::into_raw(Box::new((self.factory)()?));
                slots.borrow_mut().insert(
                    self.key,
                    Holder {
                        key: self.key,
                        value: value as *mut (),
                        drop_fn: drop_boxed::<T>,
                    },
                );
                Ok(value)
            })
            .map_err(|_| {
                LogpipeError::platform("per-thread storage unavailable during thread teardown")
            })??;

        // SAFETY: the instance lives until this thread exits or the manager
        // is dropped on this thread, both of which require the borrow of
        // `self` handed out here to have ended.
        Ok(unsafe { &*value })
    }
}

impl<T: 'static> Drop for PerThread<T> {
    fn drop(&mut self) {
        // Take the calling thread's holder out of the map first so its
        // destructor runs without the map borrowed; a reentrant lookup for a
        // different manager from inside the destructor stays legal.
        let holder = SLOTS
            .try_with(|slots| slots.borrow_mut().remove(&self.key))
            .ok()
            .flatten();
        drop(holder);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_same_thread_returns_same_instance() {
        let manager = PerThread::new(|| Ok(Box::new(42u64))).unwrap();

        let first = manager.get().unwrap() as *const Box<u64> as usize;
        let second = manager.get().unwrap() as *const Box<u64> as usize;
        assert_eq!(first, second);
    }

    #[test]
    fn test_factory_runs_once_per_thread() {
        let built = Arc::new(AtomicUsize::new(0));
        let counter = built.clone();
        let manager = PerThread::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(0u32)
        })
        .unwrap();

        manager.get().unwrap();
        manager.get().unwrap();
        manager.get().unwrap();
        assert_eq!(built.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_factory_error_propagates() {
        let manager: PerThread<u32> =
            PerThread::new(|| Err(LogpipeError::memory("no buffer space"))).unwrap();
        assert!(manager.get().is_err());
        // A later call retries construction rather than caching the failure
        assert!(manager.get().is_err());
    }

    #[test]
    fn test_manager_drop_destroys_own_instance() {
        struct Tracked(Arc<AtomicUsize>);

        impl Drop for Tracked {
            fn drop(&mut self) {
                self.0.fetch_add(1, Ordering::SeqCst);
            }
        }

        let dropped = Arc::new(AtomicUsize::new(0));
        let tracker = dropped.clone();
        let manager = PerThread::new(move || Ok(Tracked(tracker.clone()))).unwrap();

        manager.get().unwrap();
        assert_eq!(dropped.load(Ordering::SeqCst), 0);

        drop(manager);
        assert_eq!(dropped.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_distinct_managers_distinct_instances() {
        let a = PerThread::new(|| Ok(1u64)).unwrap();
        let b = PerThread::new(|| Ok(2u64)).unwrap();

        assert_eq!(*a.get().unwrap(), 1);
        assert_eq!(*b.get().unwrap(), 2);
        let pa = a.get().unwrap() as *const u64;
        let pb = b.get().unwrap() as *const u64;
        assert_ne!(pa, pb);
    }
}
