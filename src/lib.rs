//! # docstore-cache
//!
//! Normalized client-side document cache.
//!
//! API responses and query results tend to carry the same entities over and over, nested at arbitrary depths. This
//! crate keeps one copy of each: every *document* found in a value (a map with a resolvable type and id) is stored
//! flat under its cache identity, `"<type>:<id>"`, and wherever it was nested it is replaced with a reference. Reading
//! a record back re-expands the references against the store, so all readers observe the latest version of every
//! document.
//!
//! # The Basics
//!
//! - A [`Value`] is a tagged union of plain data plus a [`Value::Reference`] variant. Converting from
//!   [`serde_json::Value`] never produces references.
//! - Type and id are found by probing configured fields, `["__typename", "_type"]` and `["__id", "_id", "id"]` by
//!   default. Per-type [`TypePolicy`] overrides or a custom [`IdentityResolver`] can change the rules.
//! - Adding a document merges it over the previous version field by field. Fields the new version doesn't have are
//!   kept.
//! - A removed document leaves dangling references behind. When denormalized, a dangling reference becomes `null` in
//!   a map field and is dropped from a list.
//! - Storage is pluggable through the [`Store`] trait. [`MemoryStore`] and the bounded [`MokaStore`] are included.
//!
//! # Change Notifications
//!
//! Writes enqueue `create`, `update` or `delete` events per identity. Everything enqueued within one burst of writes
//! is coalesced and delivered by a single flush, creates first, then updates, then deletes. Flushes run on their own
//! on the tokio runtime, or on demand with [`DocumentCache::flush_pending_updates()`].
//!
//! A [`Subscription`] is scoped to one identity or to every document found in a value:
//!
//! ```ignore
//! let subscription = cache.subscription(&response)?;
//! subscription.on(ChangeKind::Update, Arc::new(|event: &ChangeEvent| println!("{} updated", event.id)));
//! ```

pub mod cache;
pub mod error;
pub mod extract;
pub mod identity;
pub mod normalize;
pub mod notifier;
pub mod shape;
pub mod store;
pub mod subscription;
pub mod traits;
pub mod types;
pub mod value;

#[doc(inline)]
pub use cache::DocumentCache;
#[doc(inline)]
pub use error::DocCacheError;
#[doc(inline)]
pub use identity::FieldResolver;
#[doc(inline)]
pub use identity::TypePolicy;
#[doc(inline)]
pub use shape::Shape;
#[doc(inline)]
pub use store::MemoryStore;
#[doc(inline)]
pub use store::MokaStore;
#[doc(inline)]
pub use subscription::Subscription;
#[doc(inline)]
pub use traits::IdentityResolver;
#[doc(inline)]
pub use traits::Store;
#[doc(inline)]
pub use value::Value;

pub mod prelude {
    pub use crate::cache::DocumentCache;
    pub use crate::error::DocCacheError;
    pub use crate::identity::Policies;
    pub use crate::identity::TypePolicy;
    pub use crate::notifier::Listener;
    pub use crate::notifier::ListenerId;
    pub use crate::store::MemoryStore;
    pub use crate::store::MokaStore;
    pub use crate::subscription::Subscription;
    pub use crate::subscription::SubscriptionStream;
    pub use crate::traits::IdentityResolver;
    pub use crate::traits::Store;
    pub use crate::types::*;
    pub use crate::value::Map;
    pub use crate::value::Value;
}
