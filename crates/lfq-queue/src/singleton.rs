//! Lazily constructed single instance with explicit teardown.
//!
//! A `Singleton` is an ordinary value. Construction happens at most once,
//! even when several threads race on the first access.
//!
//! Teardown through `destroy` needs `&mut self`, which a `static` never
//! hands out: a `static Singleton` lives until the process exits and its
//! instance is never dropped. When the instance must be torn down, own the
//! `Singleton` (for example in `main`) and lend `&Singleton` to the threads
//! that use it; `destroy` then compiles only once every borrow has ended.

use std::any::type_name;
use std::fmt;
use std::sync::OnceLock;

use tracing::debug;

pub struct Singleton<T> {
    cell: OnceLock<T>,
}

impl<T> Singleton<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceLock::new(),
        }
    }

    /// The instance, constructing it with `init` on first access.
    ///
    /// Concurrent first callers block until the winner's `init` returns;
    /// only one `init` ever runs.
    pub fn get_or_init<F>(&self, init: F) -> &T
    where
        F: FnOnce() -> T,
    {
        self.cell.get_or_init(|| {
            debug!(ty = type_name::<T>(), "singleton initialized");
            init()
        })
    }

    pub fn get(&self) -> Option<&T> {
        self.cell.get()
    }

    pub fn is_initialized(&self) -> bool {
        self.cell.get().is_some()
    }

    /// Tear the instance down and hand it back. A later `get_or_init`
    /// constructs a fresh one.
    pub fn destroy(&mut self) -> Option<T> {
        let instance = self.cell.take();
        if instance.is_some() {
            debug!(ty = type_name::<T>(), "singleton destroyed");
        }
        instance
    }
}

impl<T> Default for Singleton<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: fmt::Debug> fmt::Debug for Singleton<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Singleton").field(&self.cell.get()).finish()
    }
}
