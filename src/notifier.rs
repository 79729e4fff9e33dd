use indexmap::IndexSet;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::collections::HashMap;
use std::collections::HashSet;
use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::debug;
use tracing::trace;

use crate::types::CacheId;
use crate::types::ChangeEvent;
use crate::types::ChangeKind;

pub type Listener = Arc<dyn Fn(&ChangeEvent) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ListenerId(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub(crate) struct SubscriptionId(u64);

struct Registration {
    subscription: SubscriptionId,
    kind:         ChangeKind,
    listener:     Listener,
    once:         bool,
    topics:       Arc<[CacheId]>,
}

#[derive(Debug, Default)]
struct Pending {
    create: IndexSet<CacheId>,
    update: IndexSet<CacheId>,
    delete: IndexSet<CacheId>,
}

impl Pending {
    fn of(&self, kind: ChangeKind) -> &IndexSet<CacheId> {
        match kind {
            ChangeKind::Create => &self.create,
            ChangeKind::Update => &self.update,
            ChangeKind::Delete => &self.delete,
        }
    }

    fn of_mut(&mut self, kind: ChangeKind) -> &mut IndexSet<CacheId> {
        match kind {
            ChangeKind::Create => &mut self.create,
            ChangeKind::Update => &mut self.update,
            ChangeKind::Delete => &mut self.delete,
        }
    }

    fn len(&self) -> usize {
        self.create.len() + self.update.len() + self.delete.len()
    }
}

#[derive(Default)]
struct NotifierState {
    pending:       Pending,
    // Open write batches. No scheduled flush runs while there are any.
    writers:       usize,
    flush_task:    Option<JoinHandle<()>>,
    registrations: BTreeMap<ListenerId, Registration>,
    index:         HashMap<CacheId, BTreeSet<ListenerId>>,
    next_id:       u64,
}

impl NotifierState {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    fn remove(&mut self, id: ListenerId) -> Option<Registration> {
        let registration = self.registrations.remove(&id)?;
        for topic in registration.topics.iter() {
            if let Some(ids) = self.index.get_mut(topic) {
                ids.remove(&id);
                if ids.is_empty() {
                    self.index.remove(topic);
                }
            }
        }
        Some(registration)
    }

    // Each distinct listener once, in registration order. One-shot registrations are dropped on the way.
    fn take_listeners(&mut self, candidates: impl IntoIterator<Item = ListenerId>, kind: ChangeKind) -> Vec<Listener> {
        let mut seen = HashSet::new();
        let mut listeners = Vec::new();
        let mut spent = Vec::new();

        for id in candidates {
            let Some(registration) = self.registrations.get(&id)
            else {
                continue;
            };
            if registration.kind != kind {
                continue;
            }
            if registration.once {
                spent.push(id);
            }
            if seen.insert(Arc::as_ptr(&registration.listener) as *const () as usize) {
                listeners.push(Arc::clone(&registration.listener));
            }
        }

        for id in spent {
            self.remove(id);
        }

        listeners
    }
}

/// Batches change events and delivers them to topic-scoped listeners.
///
/// Writes enqueue their changes inside a [`WriteBatch`]. When the last open batch closes, a single flush task is
/// scheduled on the current tokio runtime, unless automatic flushing is disabled or there is no runtime. A change
/// enqueued outside of any batch is a batch of its own. [`flush()`](Self::flush) delivers everything pending right
/// away.
pub struct ChangeNotifier {
    state:      Mutex<NotifierState>,
    auto_flush: bool,
    flushes:    watch::Sender<u64>,
}

impl ChangeNotifier {
    pub fn new(auto_flush: bool) -> Self {
        Self {
            state: Mutex::new(NotifierState::default()),
            auto_flush,
            flushes: watch::channel(0).0,
        }
    }

    pub fn auto_flush(&self) -> bool {
        self.auto_flush
    }

    /// `true` while there are changes waiting for a flush.
    pub fn is_pending(&self) -> bool {
        self.state.lock().pending.len() > 0
    }

    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.len()
    }

    /// Number of flushes done so far.
    pub fn flush_count(&self) -> u64 {
        *self.flushes.borrow()
    }

    /// Opens a write batch. Changes enqueued while any batch is open are flushed together, after the last one is
    /// dropped.
    pub fn batch(self: &Arc<Self>) -> WriteBatch {
        self.state.lock().writers += 1;
        WriteBatch {
            notifier: Arc::clone(self),
        }
    }

    pub fn notify(self: &Arc<Self>, kind: ChangeKind, id: CacheId) {
        let mut state = self.state.lock();
        trace!("enqueue {kind} '{id}'");
        state.pending.of_mut(kind).insert(id);
        self.schedule(&mut state);
    }

    fn schedule(self: &Arc<Self>, state: &mut NotifierState) {
        if !self.auto_flush || state.writers > 0 || state.flush_task.is_some() || state.pending.len() == 0 {
            return;
        }

        if let Ok(runtime) = Handle::try_current() {
            let notifier = Arc::clone(self);
            debug!("scheduling a flush of pending changes");
            state.flush_task = Some(runtime.spawn(async move {
                tokio::task::yield_now().await;
                notifier.flush_scheduled();
            }));
        }
    }

    fn flush_scheduled(&self) {
        let pending = {
            let mut state = self.state.lock();
            state.flush_task = None;
            // The batch opened since will reschedule once closed.
            if state.writers > 0 {
                return;
            }
            std::mem::take(&mut state.pending)
        };
        self.deliver(pending);
    }

    /// Delivers all pending changes: creates, then updates, then deletes. Returns the number of change events
    /// flushed.
    pub fn flush(&self) -> usize {
        let pending = {
            let mut state = self.state.lock();
            if let Some(task) = state.flush_task.take() {
                task.abort();
            }
            std::mem::take(&mut state.pending)
        };
        self.deliver(pending)
    }

    fn deliver(&self, pending: Pending) -> usize {
        let count = pending.len();
        if count > 0 {
            debug!(
                "flushing changes; create={}, update={}, delete={}",
                pending.create.len(),
                pending.update.len(),
                pending.delete.len()
            );
        }

        for kind in ChangeKind::ALL {
            for id in pending.of(kind) {
                let event = ChangeEvent::new(kind, id.clone());
                // The lock must not be held while listeners run: they're free to call back into the cache.
                let listeners = {
                    let mut state = self.state.lock();
                    let candidates = state.index.get(id).cloned().unwrap_or_default();
                    state.take_listeners(candidates, kind)
                };
                for listener in listeners {
                    listener(&event);
                }
            }
        }

        self.flushes.send_modify(|n| *n += 1);
        count
    }

    /// Resolves once the next flush is done, including flushes with nothing to deliver.
    pub fn flushed(&self) -> impl Future<Output = ()> + Send + 'static {
        let mut receiver = self.flushes.subscribe();
        async move {
            // An error means the notifier is gone; there will be no more flushes to wait for.
            let _ = receiver.changed().await;
        }
    }

    pub(crate) fn new_subscription(&self) -> SubscriptionId {
        SubscriptionId(self.state.lock().next_id())
    }

    pub(crate) fn register(
        &self,
        subscription: SubscriptionId,
        topics: &Arc<[CacheId]>,
        kind: ChangeKind,
        listener: Listener,
        once: bool,
    ) -> ListenerId {
        let mut state = self.state.lock();
        let id = ListenerId(state.next_id());
        for topic in topics.iter() {
            state.index.entry(topic.clone()).or_default().insert(id);
        }
        state.registrations.insert(
            id,
            Registration {
                subscription,
                kind,
                listener,
                once,
                topics: Arc::clone(topics),
            },
        );
        id
    }

    pub(crate) fn unregister(&self, subscription: SubscriptionId, id: ListenerId) -> bool {
        let mut state = self.state.lock();
        if state
            .registrations
            .get(&id)
            .is_some_and(|r| r.subscription == subscription)
        {
            state.remove(id).is_some()
        }
        else {
            false
        }
    }

    /// Removes the registrations of a subscription, optionally narrowed down by event kind and listener.
    pub(crate) fn unregister_matching(
        &self,
        subscription: SubscriptionId,
        kind: Option<ChangeKind>,
        listener: Option<&Listener>,
    ) -> usize {
        let mut state = self.state.lock();
        let matching = state
            .registrations
            .iter()
            .filter(|(_, r)| {
                r.subscription == subscription
                    && kind.is_none_or(|k| r.kind == k)
                    && listener.is_none_or(|l| Arc::ptr_eq(l, &r.listener))
            })
            .map(|(id, _)| *id)
            .collect::<Vec<_>>();
        for id in &matching {
            state.remove(*id);
        }
        matching.len()
    }

    pub(crate) fn listener_count(&self, subscription: SubscriptionId, kind: Option<ChangeKind>) -> usize {
        self.state
            .lock()
            .registrations
            .values()
            .filter(|r| r.subscription == subscription && kind.is_none_or(|k| r.kind == k))
            .count()
    }

    /// Immediate delivery to the listeners of one subscription, bypassing the batch.
    pub(crate) fn emit_to(&self, subscription: SubscriptionId, event: &ChangeEvent) -> usize {
        let listeners = {
            let mut state = self.state.lock();
            let candidates = state
                .registrations
                .iter()
                .filter(|(_, r)| r.subscription == subscription)
                .map(|(id, _)| *id)
                .collect::<Vec<_>>();
            state.take_listeners(candidates, event.kind)
        };
        for listener in &listeners {
            listener(event);
        }
        listeners.len()
    }
}

impl Debug for ChangeNotifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ChangeNotifier")
            .field("auto_flush", &self.auto_flush)
            .field("pending", &state.pending)
            .field("writers", &state.writers)
            .field("listeners", &state.registrations.len())
            .finish()
    }
}

/// An open write batch of a [`ChangeNotifier`]. Closes when dropped.
#[must_use = "the batch closes as soon as it is dropped"]
#[derive(Debug)]
pub struct WriteBatch {
    notifier: Arc<ChangeNotifier>,
}

impl Drop for WriteBatch {
    fn drop(&mut self) {
        let mut state = self.notifier.state.lock();
        state.writers = state.writers.saturating_sub(1);
        self.notifier.schedule(&mut state);
    }
}

impl Drop for ChangeNotifier {
    fn drop(&mut self) {
        if let Some(task) = self.state.get_mut().flush_task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    fn recorder() -> (Listener, Arc<Mutex<Vec<ChangeEvent>>>) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&events);
        let listener: Listener = Arc::new(move |e: &ChangeEvent| sink.lock().push(e.clone()));
        (listener, events)
    }

    fn topics(ids: &[&str]) -> Arc<[CacheId]> {
        ids.iter().map(|id| CacheId::from(*id)).collect::<Vec<_>>().into()
    }

    #[test]
    fn flush_order_and_coalescing() {
        let notifier = Arc::new(ChangeNotifier::new(false));
        let sub = notifier.new_subscription();
        let (listener, events) = recorder();
        let topics = topics(&["User:1"]);
        for kind in ChangeKind::ALL {
            notifier.register(sub, &topics, kind, Arc::clone(&listener), false);
        }

        notifier.notify(ChangeKind::Delete, CacheId::from("User:1"));
        notifier.notify(ChangeKind::Update, CacheId::from("User:1"));
        notifier.notify(ChangeKind::Update, CacheId::from("User:1"));
        notifier.notify(ChangeKind::Create, CacheId::from("User:1"));
        notifier.notify(ChangeKind::Update, CacheId::from("User:2"));
        assert!(notifier.is_pending());
        assert_eq!(notifier.pending_count(), 4);

        assert_eq!(notifier.flush(), 4);
        assert!(!notifier.is_pending());
        let kinds = events.lock().iter().map(|e| e.kind).collect::<Vec<_>>();
        assert_eq!(kinds, ChangeKind::ALL.to_vec());
    }

    #[test]
    fn a_listener_gets_an_event_once() {
        let notifier = Arc::new(ChangeNotifier::new(false));
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        let listener: Listener = Arc::new(move |_: &ChangeEvent| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let overlapping = topics(&["A:1", "B:1"]);
        let single = topics(&["A:1"]);
        let first = notifier.new_subscription();
        let second = notifier.new_subscription();
        notifier.register(first, &overlapping, ChangeKind::Update, Arc::clone(&listener), false);
        notifier.register(second, &single, ChangeKind::Update, Arc::clone(&listener), false);

        notifier.notify(ChangeKind::Update, CacheId::from("A:1"));
        notifier.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        notifier.notify(ChangeKind::Update, CacheId::from("B:1"));
        notifier.flush();
        assert_eq!(counter.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn once_and_unregister() {
        let notifier = Arc::new(ChangeNotifier::new(false));
        let sub = notifier.new_subscription();
        let (listener, events) = recorder();
        let t = topics(&["X:1"]);
        notifier.register(sub, &t, ChangeKind::Create, Arc::clone(&listener), true);
        let id = notifier.register(sub, &t, ChangeKind::Update, Arc::clone(&listener), false);
        assert_eq!(notifier.listener_count(sub, None), 2);

        notifier.notify(ChangeKind::Create, CacheId::from("X:1"));
        notifier.flush();
        assert_eq!(notifier.listener_count(sub, Some(ChangeKind::Create)), 0);

        assert!(notifier.unregister(sub, id));
        assert!(!notifier.unregister(sub, id));
        notifier.notify(ChangeKind::Update, CacheId::from("X:1"));
        notifier.flush();
        assert_eq!(events.lock().len(), 1);
        assert!(notifier.state.lock().index.is_empty());
    }

    #[tokio::test]
    async fn scheduled_flush_runs_after_the_burst() {
        let notifier = Arc::new(ChangeNotifier::new(true));
        let sub = notifier.new_subscription();
        let (listener, events) = recorder();
        notifier.register(sub, &topics(&["User:1"]), ChangeKind::Update, listener, false);

        let flushed = notifier.flushed();
        for _ in 0..5 {
            notifier.notify(ChangeKind::Update, CacheId::from("User:1"));
        }
        assert!(events.lock().is_empty());

        flushed.await;
        assert_eq!(events.lock().len(), 1);
        assert_eq!(notifier.flush_count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn open_batch_holds_back_the_flush() {
        let notifier = Arc::new(ChangeNotifier::new(true));
        let sub = notifier.new_subscription();
        let (listener, events) = recorder();
        for kind in ChangeKind::ALL {
            notifier.register(sub, &topics(&["User:1"]), kind, Arc::clone(&listener), false);
        }

        let flushed = notifier.flushed();
        let batch = notifier.batch();
        notifier.notify(ChangeKind::Create, CacheId::from("User:1"));
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(events.lock().is_empty());
        assert!(notifier.state.lock().flush_task.is_none());

        let nested = notifier.batch();
        notifier.notify(ChangeKind::Update, CacheId::from("User:1"));
        drop(batch);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(events.lock().is_empty());
        drop(nested);

        flushed.await;
        let kinds = events.lock().iter().map(|e| e.kind).collect::<Vec<_>>();
        assert_eq!(kinds, vec![ChangeKind::Create, ChangeKind::Update]);
        assert_eq!(notifier.flush_count(), 1);
        assert!(!notifier.is_pending());
    }

    #[test]
    fn nothing_is_scheduled_without_a_runtime() {
        let notifier = Arc::new(ChangeNotifier::new(true));
        notifier.notify(ChangeKind::Create, CacheId::from("User:1"));
        assert!(notifier.state.lock().flush_task.is_none());
        assert!(notifier.is_pending());
        assert_eq!(notifier.flush(), 1);
    }
}
