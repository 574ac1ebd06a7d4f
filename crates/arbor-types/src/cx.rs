//! Cancellation and clock context threaded through storage operations.
//!
//! Clones of a [`Cx`] share one state. Index builds, commits and trie walks
//! call [`Cx::checkpoint`] between steps and stop with
//! [`ArborError::Interrupted`] once a cancel was requested. The header switch
//! of a commit runs inside [`Cx::masked`], so a cancel request can stop a
//! commit before or after publication but never halfway through.

use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::{SystemTime, UNIX_EPOCH};

use arbor_error::{ArborError, Result};

/// Deepest allowed nesting of [`Cx::masked`].
pub const MAX_MASK_DEPTH: u32 = 64;

#[derive(Debug, Default)]
struct State {
    cancelled: AtomicBool,
    masks: AtomicU32,
    /// Pinned unix time in milliseconds; 0 reads the system clock.
    pinned_millis: AtomicU64,
    children: Mutex<Vec<Weak<State>>>,
}

impl State {
    fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        let live: Vec<Arc<Self>> = self
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter_map(Weak::upgrade)
            .collect();
        for child in live {
            child.cancel();
        }
    }
}

/// Shared cancellation flag, mask depth and clock.
#[derive(Debug, Clone, Default)]
pub struct Cx {
    state: Arc<State>,
}

impl Cx {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_cancel_requested(&self) -> bool {
        self.state.cancelled.load(Ordering::Acquire)
    }

    /// Request cancellation of this context and every live child.
    pub fn cancel(&self) {
        self.state.cancel();
    }

    /// `Err(Interrupted)` once cancelled, unless inside a masked section.
    pub fn checkpoint(&self) -> Result<()> {
        if self.is_cancel_requested() && self.mask_depth() == 0 {
            return Err(ArborError::Interrupted);
        }
        Ok(())
    }

    /// Ignore cancellation in [`Self::checkpoint`] until the guard drops.
    ///
    /// # Panics
    ///
    /// Panics beyond [`MAX_MASK_DEPTH`] nested sections.
    #[must_use]
    pub fn masked(&self) -> MaskGuard<'_> {
        let depth = self.state.masks.fetch_add(1, Ordering::AcqRel);
        if depth >= MAX_MASK_DEPTH {
            self.state.masks.fetch_sub(1, Ordering::AcqRel);
            panic!("masked sections nested deeper than {MAX_MASK_DEPTH}");
        }
        MaskGuard { state: &self.state }
    }

    #[must_use]
    pub fn mask_depth(&self) -> u32 {
        self.state.masks.load(Ordering::Acquire)
    }

    /// A context cancelled together with this one but cancellable on its
    /// own. It starts with this context's clock.
    #[must_use]
    pub fn create_child(&self) -> Self {
        let child = Self::new();
        child
            .state
            .pinned_millis
            .store(self.state.pinned_millis.load(Ordering::Acquire), Ordering::Release);
        let mut children = self
            .state
            .children
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        children.retain(|c| c.strong_count() > 0);
        children.push(Arc::downgrade(&child.state));
        drop(children);
        if self.is_cancel_requested() {
            child.cancel();
        }
        child
    }

    /// Pin the clock of this context (and of children created later).
    pub fn set_unix_millis_for_testing(&self, millis: u64) {
        self.state.pinned_millis.store(millis, Ordering::Release);
    }

    /// Milliseconds since the unix epoch, or the pinned value.
    #[must_use]
    pub fn now_unix_millis(&self) -> u64 {
        match self.state.pinned_millis.load(Ordering::Acquire) {
            0 => SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            pinned => pinned,
        }
    }
}

/// Keeps a [`Cx`] masked while alive.
#[derive(Debug)]
pub struct MaskGuard<'a> {
    state: &'a State,
}

impl Drop for MaskGuard<'_> {
    fn drop(&mut self) {
        self.state.masks.fetch_sub(1, Ordering::AcqRel);
    }
}
