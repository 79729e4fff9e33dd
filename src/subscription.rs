use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::Stream;

use crate::notifier::ChangeNotifier;
use crate::notifier::Listener;
use crate::notifier::ListenerId;
use crate::notifier::SubscriptionId;
use crate::types::CacheId;
use crate::types::ChangeEvent;
use crate::types::ChangeKind;

/// A view of the cache's change notifications scoped to a fixed set of identities.
///
/// The topic set is computed once, when the subscription is created. Listeners registered through the handle stay
/// registered when the handle is dropped; use [`remove_all_listeners()`](Self::remove_all_listeners) to detach them.
#[derive(Debug)]
pub struct Subscription {
    id:       SubscriptionId,
    notifier: Arc<ChangeNotifier>,
    topics:   Arc<[CacheId]>,
}

impl Subscription {
    pub(crate) fn new(notifier: Arc<ChangeNotifier>, topics: Vec<CacheId>) -> Self {
        Self {
            id: notifier.new_subscription(),
            notifier,
            topics: topics.into(),
        }
    }

    /// Sorted identities this subscription listens to.
    pub fn topics(&self) -> &[CacheId] {
        &self.topics
    }

    pub fn on(&self, kind: ChangeKind, listener: Listener) -> ListenerId {
        self.notifier.register(self.id, &self.topics, kind, listener, false)
    }

    /// Like [`on()`](Self::on) but the listener is removed after its first invocation.
    pub fn once(&self, kind: ChangeKind, listener: Listener) -> ListenerId {
        self.notifier.register(self.id, &self.topics, kind, listener, true)
    }

    /// Registers a listener for all kinds of changes.
    pub fn on_any(&self, listener: Listener) -> Vec<ListenerId> {
        ChangeKind::ALL
            .iter()
            .map(|kind| self.on(*kind, Arc::clone(&listener)))
            .collect()
    }

    /// Removes a listener registered with this subscription for the given kind. Returns `true` if anything was
    /// removed.
    pub fn off(&self, kind: ChangeKind, listener: &Listener) -> bool {
        self.notifier.unregister_matching(self.id, Some(kind), Some(listener)) > 0
    }

    pub fn off_listener(&self, id: ListenerId) -> bool {
        self.notifier.unregister(self.id, id)
    }

    /// Delivers an event to this subscription's listeners right away, bypassing the batch. Returns the number of
    /// listeners invoked.
    pub fn emit(&self, kind: ChangeKind, id: impl Into<CacheId>) -> usize {
        self.notifier.emit_to(self.id, &ChangeEvent::new(kind, id.into()))
    }

    /// Listeners of a kind, or all of them with `None`.
    pub fn listener_count(&self, kind: Option<ChangeKind>) -> usize {
        self.notifier.listener_count(self.id, kind)
    }

    pub fn remove_all_listeners(&self) -> usize {
        self.notifier.unregister_matching(self.id, None, None)
    }

    /// Streams every change delivered to this subscription.
    ///
    /// The stream ends only if its listeners are removed with
    /// [`remove_all_listeners()`](Self::remove_all_listeners). Dropping it unregisters them.
    pub fn stream(&self) -> SubscriptionStream {
        let (tx, rx) = mpsc::unbounded_channel();
        let listeners = self.on_any(Arc::new(move |event: &ChangeEvent| {
            // Fails only when the stream is gone.
            let _ = tx.send(event.clone());
        }));
        SubscriptionStream {
            events: UnboundedReceiverStream::new(rx),
            subscription: self.id,
            listeners,
            notifier: Arc::clone(&self.notifier),
        }
    }
}

/// Change events of a [`Subscription`], returned by [`Subscription::stream()`].
#[derive(Debug)]
pub struct SubscriptionStream {
    events:       UnboundedReceiverStream<ChangeEvent>,
    subscription: SubscriptionId,
    listeners:    Vec<ListenerId>,
    notifier:     Arc<ChangeNotifier>,
}

impl Stream for SubscriptionStream {
    type Item = ChangeEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<ChangeEvent>> {
        Pin::new(&mut self.events).poll_next(cx)
    }
}

impl Drop for SubscriptionStream {
    fn drop(&mut self) {
        for id in &self.listeners {
            self.notifier.unregister(self.subscription, *id);
        }
    }
}
