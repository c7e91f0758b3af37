//! Thread-scoped ancestor context.
//!
//! Entering a [`Context`] pushes one or more ancestor segments onto a stack
//! private to the current thread; leaving it pops exactly the segments it
//! pushed. Every repository operation reads the stack once when it starts and
//! scopes its keys and queries beneath the resulting ancestor path.
//!
//! ```ignore
//! let _org = Context::with(PathElement::new("Org", "acme"));
//! people.save(&alice)?; // key: Org("acme")/Person("alice")
//! ```

use std::cell::RefCell;
use std::marker::PhantomData;

use dsr_types::PathElement;
use tracing::{debug, error};

use crate::error::{RepositoryError, RepositoryResult};

thread_local! {
    static ANCESTORS: RefCell<Vec<PathElement>> = const { RefCell::new(Vec::new()) };
}

/// A scope over which ancestor segments are active on the current thread.
///
/// Scopes nest LIFO. Dropping a scope pops its segments; [`Context::exit`]
/// does the same and reports an out-of-order exit as an error instead of
/// panicking. The guard cannot be sent to another thread.
#[must_use = "dropping a context immediately removes its ancestors"]
pub struct Context {
    base: usize,
    count: usize,
    active: bool,
    _thread_bound: PhantomData<*const ()>,
}

impl Context {
    /// Push a single ancestor and return the scope that owns it.
    pub fn with(ancestor: PathElement) -> Self {
        Self::with_all([ancestor])
    }

    /// Push every segment of `ancestors`, oldest first.
    pub fn with_all<I>(ancestors: I) -> Self
    where
        I: IntoIterator<Item = PathElement>,
    {
        // Collect before borrowing: the iterator may itself read the stack.
        let segments: Vec<PathElement> = ancestors.into_iter().collect();
        let count = segments.len();
        let base = ANCESTORS.with(|stack| {
            let mut stack = stack.borrow_mut();
            let base = stack.len();
            stack.extend(segments);
            base
        });
        debug!(pushed = count, depth = base + count, "entered ancestor context");
        Self {
            base,
            count,
            active: true,
            _thread_bound: PhantomData,
        }
    }

    /// Number of segments this scope pushed.
    pub fn pushed(&self) -> usize {
        self.count
    }

    /// Leave the scope, popping its segments.
    ///
    /// Fails with [`RepositoryError::UnbalancedContext`] if an inner scope is
    /// still open or an outer one already left; the stack is left untouched
    /// in that case.
    pub fn exit(mut self) -> RepositoryResult<()> {
        self.active = false;
        self.pop()
    }

    /// Snapshot of the active ancestors, oldest first.
    pub fn ancestors() -> Vec<PathElement> {
        ANCESTORS.with(|stack| stack.borrow().clone())
    }

    /// Run `f` over the active ancestors without cloning them.
    ///
    /// `f` must not enter or leave a scope.
    pub fn with_ancestors<R>(f: impl FnOnce(&[PathElement]) -> R) -> R {
        ANCESTORS.with(|stack| f(&stack.borrow()))
    }

    /// Number of active segments on this thread.
    pub fn depth() -> usize {
        ANCESTORS.with(|stack| stack.borrow().len())
    }

    fn pop(&self) -> RepositoryResult<()> {
        let expected = self.base + self.count;
        ANCESTORS.with(|stack| {
            let mut stack = stack.borrow_mut();
            if stack.len() != expected {
                return Err(RepositoryError::UnbalancedContext {
                    expected,
                    actual: stack.len(),
                });
            }
            stack.truncate(self.base);
            Ok(())
        })?;
        debug!(popped = self.count, depth = self.base, "left ancestor context");
        Ok(())
    }
}

impl Drop for Context {
    fn drop(&mut self) {
        if !self.active {
            return;
        }
        self.active = false;
        if let Err(err) = self.pop() {
            if std::thread::panicking() {
                error!(error = %err, "ancestor context unwound out of order");
            } else {
                panic!("{err}");
            }
        }
    }
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("base", &self.base)
            .field("count", &self.count)
            .finish()
    }
}
