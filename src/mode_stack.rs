//! Thread-local mode stack.
//!
//! Every thread owns an independent stack of active [`ModeKey`]s. Modes are
//! entered and left only through [`ModeGuard`]: constructing the guard pushes,
//! dropping it pops. Because drop runs on every exit path (normal return,
//! early return, `?` propagation, unwinding), a failing call can never leave
//! its mode behind.
//!
//! Guards may be dropped in any order (a `Vec<ModeGuard>` drops front to
//! back). A guard released while a newer one is still alive only marks its
//! own slot dead; dead slots are invisible to dispatch and the stack is
//! compacted from the top once the guards above them are gone.
//!
//! The same module holds two smaller pieces of per-thread dispatch state:
//! the set of keys masked by [`ExcludeModeGuard`], and the re-entry depth
//! used to bound handlers that call back into the dispatcher.
//!
//! ```
//! use briny_dispatch::key::ModeKey;
//! use briny_dispatch::mode_stack::{self, ModeGuard};
//!
//! assert_eq!(mode_stack::depth(), 0);
//! {
//!     let _vmap = ModeGuard::enter(ModeKey::VmapMode);
//!     assert_eq!(mode_stack::top(), Some(ModeKey::VmapMode));
//! }
//! assert_eq!(mode_stack::depth(), 0);
//! ```

use core::cell::{Cell, RefCell};
use core::marker::PhantomData;

use tracing::{trace, warn};

use crate::error::DispatchError;
use crate::key::{ModeKey, ModeKeySet};

/// One stack entry. `live` is cleared when its guard drops.
#[derive(Debug, Clone, Copy)]
struct Slot {
    key: ModeKey,
    live: bool,
}

thread_local! {
    static MODE_STACK: RefCell<Vec<Slot>> = const { RefCell::new(Vec::new()) };
    static EXCLUDED: Cell<ModeKeySet> = const { Cell::new(ModeKeySet::EMPTY) };
    static REENTRY_DEPTH: Cell<usize> = const { Cell::new(0) };
}

/// Number of active modes on this thread.
#[must_use]
pub fn depth() -> usize {
    MODE_STACK.with(|s| s.borrow().iter().filter(|slot| slot.live).count())
}

/// Innermost active mode.
#[must_use]
pub fn top() -> Option<ModeKey> {
    // The topmost slot is always live after compaction.
    MODE_STACK.with(|s| s.borrow().last().map(|slot| slot.key))
}

/// Snapshot of the active modes, outermost first.
#[must_use]
pub fn current() -> Vec<ModeKey> {
    MODE_STACK.with(|s| {
        s.borrow()
            .iter()
            .filter(|slot| slot.live)
            .map(|slot| slot.key)
            .collect()
    })
}

/// One past the highest occupied position, dead slots included.
pub(crate) fn extent() -> usize {
    MODE_STACK.with(|s| s.borrow().len())
}

/// Live key at position `i`, counting from the bottom.
pub(crate) fn key_at(i: usize) -> Option<ModeKey> {
    MODE_STACK.with(|s| {
        s.borrow()
            .get(i)
            .filter(|slot| slot.live)
            .map(|slot| slot.key)
    })
}

/// Keys currently masked on this thread.
#[must_use]
pub fn excluded() -> ModeKeySet {
    EXCLUDED.with(Cell::get)
}

/// Runs `f` with `key` pushed for its duration.
pub fn with_mode<R>(key: ModeKey, f: impl FnOnce() -> R) -> R {
    let _guard = ModeGuard::enter(key);
    f()
}

/// Scoped entry into one mode.
///
/// Not `Send`: the guard must pop the stack of the thread that pushed it.
#[derive(Debug)]
#[must_use = "the mode is left as soon as the guard is dropped"]
pub struct ModeGuard {
    key: ModeKey,
    position: usize,
    _not_send: PhantomData<*const ()>,
}

impl ModeGuard {
    /// Pushes `key` onto this thread's stack.
    pub fn enter(key: ModeKey) -> Self {
        let position = MODE_STACK.with(|s| {
            let mut stack = s.borrow_mut();
            stack.push(Slot { key, live: true });
            stack.len() - 1
        });
        trace!(%key, position, "entered mode");
        Self {
            key,
            position,
            _not_send: PhantomData,
        }
    }

    #[must_use]
    pub const fn key(&self) -> ModeKey {
        self.key
    }

    /// Position of this guard's entry, counting from the bottom.
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }
}

impl Drop for ModeGuard {
    fn drop(&mut self) {
        let (key, position) = (self.key, self.position);
        let _ = MODE_STACK.try_with(|s| {
            let Ok(mut stack) = s.try_borrow_mut() else {
                warn!(%key, position, "mode stack busy, slot not released");
                return;
            };
            match stack.get_mut(position) {
                Some(slot) if slot.live && slot.key == key => slot.live = false,
                _ => {
                    warn!(%key, position, "mode guard does not own its slot");
                    return;
                }
            }
            if position + 1 < stack.len() {
                trace!(%key, position, "mode left below a live mode");
            }
            while stack.last().is_some_and(|slot| !slot.live) {
                stack.pop();
            }
        });
        trace!(%key, "left mode");
    }
}

/// Masks keys on this thread for the guard's lifetime.
///
/// Dispatch skips masked keys as if they were not on the stack. Handlers use
/// this to re-enter the dispatcher without intercepting their own call.
#[derive(Debug)]
#[must_use = "the keys are unmasked as soon as the guard is dropped"]
pub struct ExcludeModeGuard {
    previous: ModeKeySet,
    _not_send: PhantomData<*const ()>,
}

impl ExcludeModeGuard {
    /// Masks a single key.
    pub fn new(key: ModeKey) -> Self {
        Self::with_set(ModeKeySet::single(key))
    }

    /// Masks every key in `keys`.
    pub fn with_set(keys: ModeKeySet) -> Self {
        let previous = EXCLUDED.with(|e| e.replace(e.get().union(keys)));
        Self {
            previous,
            _not_send: PhantomData,
        }
    }
}

impl Drop for ExcludeModeGuard {
    fn drop(&mut self) {
        let _ = EXCLUDED.try_with(|e| e.set(self.previous));
    }
}

/// Tracks how deeply dispatch calls are nested on this thread.
pub(crate) struct ReentryGuard {
    _not_send: PhantomData<*const ()>,
}

impl ReentryGuard {
    /// Increments the depth, failing once it would exceed `max`.
    pub(crate) fn enter(op: &str, max: usize) -> Result<Self, DispatchError> {
        REENTRY_DEPTH.with(|d| {
            let depth = d.get();
            if depth >= max {
                return Err(DispatchError::ReentryLimit {
                    op: op.to_owned(),
                    depth,
                });
            }
            d.set(depth + 1);
            Ok(Self {
                _not_send: PhantomData,
            })
        })
    }
}

impl Drop for ReentryGuard {
    fn drop(&mut self) {
        let _ = REENTRY_DEPTH.try_with(|d| d.set(d.get().saturating_sub(1)));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guards_nest_and_unwind() {
        let outer = ModeGuard::enter(ModeKey::Autograd);
        let inner = ModeGuard::enter(ModeKey::VmapMode);
        assert_eq!(current(), vec![ModeKey::Autograd, ModeKey::VmapMode]);
        assert_eq!(inner.position(), 1);
        drop(inner);
        assert_eq!(top(), Some(ModeKey::Autograd));
        drop(outer);
        assert_eq!(depth(), 0);
    }

    #[test]
    fn guards_dropped_outer_first_release_only_their_own_slot() {
        let outer = ModeGuard::enter(ModeKey::Autograd);
        let inner = ModeGuard::enter(ModeKey::Tracer);
        drop(outer);
        assert_eq!(current(), vec![ModeKey::Tracer]);
        assert_eq!(depth(), 1);
        assert_eq!(key_at(0), None);
        assert_eq!(extent(), 2);

        let newest = ModeGuard::enter(ModeKey::Python);
        assert_eq!(newest.position(), 2);
        drop(inner);
        assert_eq!(current(), vec![ModeKey::Python]);
        drop(newest);
        assert_eq!((depth(), extent()), (0, 0));
    }

    #[test]
    fn vec_of_guards_drops_cleanly() {
        let guards = vec![
            ModeGuard::enter(ModeKey::Autograd),
            ModeGuard::enter(ModeKey::Tracer),
            ModeGuard::enter(ModeKey::VmapMode),
        ];
        assert_eq!(depth(), 3);
        drop(guards);
        assert_eq!((depth(), extent()), (0, 0));
    }

    #[test]
    fn panic_inside_a_mode_still_pops() {
        let result = std::panic::catch_unwind(|| {
            with_mode(ModeKey::Tracer, || panic!("kernel exploded"));
        });
        assert!(result.is_err());
        assert_eq!(depth(), 0);
    }

    #[test]
    fn stacks_are_per_thread() {
        let _guard = ModeGuard::enter(ModeKey::Python);
        let other = std::thread::spawn(depth).join().unwrap();
        assert_eq!(other, 0);
        assert_eq!(depth(), 1);
    }

    #[test]
    fn exclusion_restores_previous_set() {
        let a = ExcludeModeGuard::new(ModeKey::Autograd);
        {
            let _b = ExcludeModeGuard::new(ModeKey::Batched);
            assert_eq!(
                excluded(),
                ModeKeySet::single(ModeKey::Autograd).with(ModeKey::Batched)
            );
        }
        assert_eq!(excluded(), ModeKeySet::single(ModeKey::Autograd));
        drop(a);
        assert!(excluded().is_empty());
    }

    #[test]
    fn reentry_depth_is_bounded() {
        let first = ReentryGuard::enter("add", 2).unwrap();
        let second = ReentryGuard::enter("add", 2).unwrap();
        assert!(matches!(
            ReentryGuard::enter("add", 2),
            Err(DispatchError::ReentryLimit { depth: 2, .. })
        ));
        drop(second);
        drop(first);
        assert!(ReentryGuard::enter("add", 1).is_ok());
    }
}
