//! Per-request extension data.
//!
//! Handlers attach named, type-erased values to a request (or to the whole
//! transaction) and read them back in later handlers or later SET phases.
//! Each entry owns its value together with a release callback. The store
//! guarantees that every release callback runs exactly once:
//!
//! - [`ExtensionData::release_all`] drains the store in reverse attachment
//!   order. The dispatcher calls it when a batch reaches a terminal state.
//! - Dropping the store releases whatever is still attached, so no exit path
//!   (cancellation, a dropped suspension, a panic unwinding through the
//!   caller) can skip cleanup.
//!
//! Handlers must never release attached values themselves.
//!
//! # Duplicate names
//!
//! Attaching a name that is already present follows the store's
//! [`DuplicatePolicy`]:
//!
//! - [`DuplicatePolicy::Reject`] (default): the attach fails with
//!   [`Error::DuplicateName`]. The store has taken ownership of the offered
//!   value, so its releaser runs immediately. The original entry is untouched.
//! - [`DuplicatePolicy::Replace`]: the old entry is released immediately and
//!   the new one is stored as the most recent attachment.
//!
//! # Example
//!
//! ```rust
//! use async_snmp_agent::agent::ExtensionData;
//!
//! let mut data = ExtensionData::new();
//! data.attach("row_lock", 17u32).unwrap();
//! data.attach_with("undo", String::from("old"), |old| drop(old)).unwrap();
//!
//! assert_eq!(data.get::<u32>("row_lock").unwrap(), &17);
//! assert_eq!(data.release_all(), 2);
//! assert!(data.is_empty());
//! ```

use std::any::Any;
use std::borrow::Cow;
use std::fmt;

use crate::error::{Error, NotFoundKind, Result};

/// How a store reacts to an attach under an existing name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Fail with `DuplicateName`, releasing the offered value.
    #[default]
    Reject,
    /// Release the old entry and keep the new one.
    Replace,
}

/// A value owned by the store together with its release operation.
trait Attached: Send + Sync {
    fn value(&self) -> &(dyn Any + Send + Sync);
    fn value_mut(&mut self) -> &mut (dyn Any + Send + Sync);
    fn release(self: Box<Self>);
}

struct WithReleaser<T, F> {
    value: T,
    releaser: F,
}

impl<T, F> Attached for WithReleaser<T, F>
where
    T: Any + Send + Sync,
    F: FnOnce(T) + Send + Sync + 'static,
{
    fn value(&self) -> &(dyn Any + Send + Sync) {
        &self.value
    }

    fn value_mut(&mut self) -> &mut (dyn Any + Send + Sync) {
        &mut self.value
    }

    fn release(self: Box<Self>) {
        let WithReleaser { value, releaser } = *self;
        releaser(value);
    }
}

struct Entry {
    name: Cow<'static, str>,
    slot: Box<dyn Attached>,
}

/// Named, owned, type-erased values attached to one request or transaction.
#[derive(Default)]
pub struct ExtensionData {
    entries: Vec<Entry>,
    policy: DuplicatePolicy,
}

impl ExtensionData {
    /// Create an empty store with the default (reject) policy.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with the given duplicate policy.
    pub fn with_policy(policy: DuplicatePolicy) -> Self {
        Self {
            entries: Vec::new(),
            policy,
        }
    }

    /// The duplicate-name policy in effect.
    pub fn policy(&self) -> DuplicatePolicy {
        self.policy
    }

    /// Change the duplicate-name policy for future attachments.
    pub fn set_policy(&mut self, policy: DuplicatePolicy) {
        self.policy = policy;
    }

    /// Attach a value that is simply dropped on release.
    pub fn attach<T>(&mut self, name: impl Into<Cow<'static, str>>, value: T) -> Result<()>
    where
        T: Any + Send + Sync,
    {
        self.attach_with(name, value, drop)
    }

    /// Attach a value with an explicit release callback.
    ///
    /// The callback receives ownership of the value exactly once.
    pub fn attach_with<T, F>(
        &mut self,
        name: impl Into<Cow<'static, str>>,
        value: T,
        releaser: F,
    ) -> Result<()>
    where
        T: Any + Send + Sync,
        F: FnOnce(T) + Send + Sync + 'static,
    {
        let name = name.into();
        let slot: Box<dyn Attached> = Box::new(WithReleaser { value, releaser });

        if let Some(pos) = self.position(&name) {
            match self.policy {
                DuplicatePolicy::Reject => {
                    slot.release();
                    return Err(Error::DuplicateName {
                        name: name.into_owned().into(),
                    });
                }
                DuplicatePolicy::Replace => {
                    let old = self.entries.remove(pos);
                    tracing::trace!(snmp.data = %name, "replacing extension data");
                    old.slot.release();
                }
            }
        }

        self.entries.push(Entry { name, slot });
        Ok(())
    }

    /// Borrow an attached value.
    pub fn get<T: Any>(&self, name: &str) -> Result<&T> {
        let entry = self
            .entries
            .iter()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::not_found(NotFoundKind::Data, name))?;
        entry
            .slot
            .value()
            .downcast_ref::<T>()
            .ok_or_else(|| Error::DataTypeMismatch { name: name.into() })
    }

    /// Mutably borrow an attached value.
    pub fn get_mut<T: Any>(&mut self, name: &str) -> Result<&mut T> {
        let entry = self
            .entries
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::not_found(NotFoundKind::Data, name))?;
        entry
            .slot
            .value_mut()
            .downcast_mut::<T>()
            .ok_or_else(|| Error::DataTypeMismatch { name: name.into() })
    }

    /// Returns `true` if an entry with this name is attached.
    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    /// Entry names in attachment order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|e| e.name.as_ref())
    }

    /// Number of attached entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if nothing is attached.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Run every release callback once, newest first, and empty the store.
    ///
    /// Returns the number of entries released. Calling it again is a no-op.
    pub fn release_all(&mut self) -> usize {
        let count = self.entries.len();
        while let Some(entry) = self.entries.pop() {
            entry.slot.release();
        }
        count
    }

    fn position(&self, name: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.name == name)
    }
}

impl Drop for ExtensionData {
    fn drop(&mut self) {
        self.release_all();
    }
}

impl fmt::Debug for ExtensionData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExtensionData")
            .field("names", &self.names().collect::<Vec<_>>())
            .field("policy", &self.policy)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use parking_lot::Mutex;

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    fn counting(c: &Arc<AtomicUsize>) -> impl FnOnce(u32) + Send + Sync + 'static {
        let c = c.clone();
        move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_attach_and_get() {
        let mut data = ExtensionData::new();
        data.attach("a", 1u32).unwrap();
        data.attach("b", String::from("two")).unwrap();

        assert_eq!(data.get::<u32>("a").unwrap(), &1);
        assert_eq!(data.get::<String>("b").unwrap(), "two");
        assert_eq!(data.len(), 2);
        assert_eq!(data.names().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn test_get_missing_and_wrong_type() {
        let mut data = ExtensionData::new();
        data.attach("a", 1u32).unwrap();

        assert!(matches!(
            data.get::<u32>("missing"),
            Err(Error::NotFound {
                kind: NotFoundKind::Data,
                ..
            })
        ));
        assert!(matches!(
            data.get::<String>("a"),
            Err(Error::DataTypeMismatch { .. })
        ));
    }

    #[test]
    fn test_get_mut() {
        let mut data = ExtensionData::new();
        data.attach("count", 1u32).unwrap();
        *data.get_mut::<u32>("count").unwrap() += 1;
        assert_eq!(data.get::<u32>("count").unwrap(), &2);
    }

    #[test]
    fn test_release_all_reverse_order_exactly_once() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut data = ExtensionData::new();
        for name in ["first", "second", "third"] {
            let order = order.clone();
            data.attach_with(name, name, move |n| order.lock().push(n))
                .unwrap();
        }

        assert_eq!(data.release_all(), 3);
        assert_eq!(data.release_all(), 0);
        drop(data);

        assert_eq!(*order.lock(), vec!["third", "second", "first"]);
    }

    #[test]
    fn test_drop_releases_remaining() {
        let released = counter();
        {
            let mut data = ExtensionData::new();
            data.attach_with("a", 1u32, counting(&released)).unwrap();
            data.attach_with("b", 2u32, counting(&released)).unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_reject_policy_keeps_first_and_releases_offered() {
        let first = counter();
        let second = counter();
        let mut data = ExtensionData::new();

        data.attach_with("dup", 1u32, counting(&first)).unwrap();
        let err = data.attach_with("dup", 2u32, counting(&second)).unwrap_err();

        assert!(matches!(err, Error::DuplicateName { .. }));
        assert_eq!(second.load(Ordering::SeqCst), 1);
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(data.get::<u32>("dup").unwrap(), &1);

        data.release_all();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_policy_releases_old_and_keeps_second() {
        let first = counter();
        let second = counter();
        let mut data = ExtensionData::with_policy(DuplicatePolicy::Replace);

        data.attach_with("dup", 1u32, counting(&first)).unwrap();
        data.attach_with("dup", 2u32, counting(&second)).unwrap();

        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 0);
        assert_eq!(data.get::<u32>("dup").unwrap(), &2);
        assert_eq!(data.len(), 1);

        data.release_all();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_replace_moves_entry_to_newest() {
        let order = Arc::new(Mutex::new(Vec::new()));
        let mut data = ExtensionData::with_policy(DuplicatePolicy::Replace);
        for (name, tag) in [("a", "a1"), ("b", "b1"), ("a", "a2")] {
            let order = order.clone();
            data.attach_with(name, tag, move |t| order.lock().push(t))
                .unwrap();
        }
        order.lock().clear();

        data.release_all();
        assert_eq!(*order.lock(), vec!["a2", "b1"]);
    }
}
