/// Subscribe/notify registry used to push change events to consumers
///
/// Callbacks run synchronously, in subscription order, on the thread applying
/// the mutation.
use derive_more::Display;

/// Handle returned by [`Observers::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
#[display("sub-{_0}")]
pub struct SubscriptionId(u64);

pub struct Observers<T: ?Sized> {
    next_id: u64,
    entries: Vec<(SubscriptionId, Box<T>)>,
}

impl<T: ?Sized> Default for Observers<T> {
    fn default() -> Self {
        Self {
            next_id: 0,
            entries: Vec::new(),
        }
    }
}

impl<T: ?Sized> std::fmt::Debug for Observers<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observers")
            .field("subscribers", &self.entries.len())
            .finish()
    }
}

impl<T: ?Sized> Observers<T> {
    pub fn subscribe(&mut self, observer: Box<T>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id);
        self.next_id += 1;
        self.entries.push((id, observer));
        id
    }

    /// Returns false if the subscription was unknown or already released
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.entries.len();
        self.entries.retain(|(entry, _)| *entry != id);
        self.entries.len() != before
    }

    pub fn for_each(&mut self, mut notify: impl FnMut(&mut T)) {
        for (_, observer) in self.entries.iter_mut() {
            notify(observer.as_mut());
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Release every subscription
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
