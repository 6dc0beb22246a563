//! Reactive query layer.
//!
//! Every committed mutation batch is announced on a [`ChangeBus`] as a
//! [`ChangeSet`] naming the collections it wrote to. A [`LiveQuery`] declares
//! which collections it reads and re-runs only when a change set touches one
//! of them.

use std::{collections::BTreeSet, future::Future, pin::Pin};

use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};

use crate::{Result, model::Collection};

/// Default number of change sets buffered per subscriber.
pub const DEFAULT_CAPACITY: usize = 256;

// ─── Change sets ─────────────────────────────────────────────────────────────

/// The set of collections touched by one mutation batch.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet(BTreeSet<Collection>);

impl ChangeSet {
  pub fn new() -> Self { Self::default() }

  pub fn of(collections: impl IntoIterator<Item = Collection>) -> Self {
    collections.into_iter().collect()
  }

  pub fn insert(&mut self, collection: Collection) { self.0.insert(collection); }

  pub fn extend(&mut self, other: &ChangeSet) { self.0.extend(other.0.iter().copied()); }

  pub fn contains(&self, collection: Collection) -> bool { self.0.contains(&collection) }

  pub fn intersects(&self, other: &ChangeSet) -> bool { !self.0.is_disjoint(&other.0) }

  pub fn is_empty(&self) -> bool { self.0.is_empty() }

  pub fn iter(&self) -> impl Iterator<Item = Collection> + '_ { self.0.iter().copied() }
}

impl FromIterator<Collection> for ChangeSet {
  fn from_iter<I: IntoIterator<Item = Collection>>(iter: I) -> Self {
    Self(iter.into_iter().collect())
  }
}

// ─── Bus ─────────────────────────────────────────────────────────────────────

/// Broadcasts change sets to every subscriber.
///
/// Cloning is cheap; all clones publish on the same channel.
#[derive(Debug, Clone)]
pub struct ChangeBus {
  tx: broadcast::Sender<ChangeSet>,
}

impl Default for ChangeBus {
  fn default() -> Self { Self::new(DEFAULT_CAPACITY) }
}

impl ChangeBus {
  pub fn new(capacity: usize) -> Self {
    let (tx, _) = broadcast::channel(capacity.max(1));
    Self { tx }
  }

  /// Announce a committed batch. Empty change sets are dropped.
  pub fn publish(&self, changes: ChangeSet) {
    if changes.is_empty() {
      return;
    }
    tracing::trace!(?changes, subscribers = self.tx.receiver_count(), "publishing change set");
    // No subscribers is not an error.
    let _ = self.tx.send(changes);
  }

  pub fn subscribe(&self) -> broadcast::Receiver<ChangeSet> { self.tx.subscribe() }
}

// ─── Live queries ────────────────────────────────────────────────────────────

pub type QueryFuture<T> = Pin<Box<dyn Future<Output = Result<T>> + Send>>;

/// A query that is re-evaluated whenever one of its dependencies changes.
///
/// The subscription starts when the live query is created, so no change
/// committed afterwards is missed.
pub struct LiveQuery<T> {
  deps:  ChangeSet,
  rx:    broadcast::Receiver<ChangeSet>,
  query: Box<dyn Fn() -> QueryFuture<T> + Send + Sync>,
}

impl<T: Send + 'static> LiveQuery<T> {
  pub fn new<F, Fut>(
    bus: &ChangeBus,
    deps: impl IntoIterator<Item = Collection>,
    query: F,
  ) -> Self
  where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T>> + Send + 'static,
  {
    Self {
      deps:  ChangeSet::of(deps),
      rx:    bus.subscribe(),
      query: Box::new(move || Box::pin(query())),
    }
  }

  pub fn dependencies(&self) -> &ChangeSet { &self.deps }

  /// Run the query now.
  pub async fn current(&self) -> Result<T> { (self.query)().await }

  /// Wait for a relevant change, then re-run the query.
  ///
  /// Change sets already queued behind the triggering one are coalesced into
  /// a single refresh. A subscriber that fell behind the channel refreshes
  /// unconditionally. Returns `None` once every bus handle is dropped.
  pub async fn changed(&mut self) -> Option<Result<T>> {
    loop {
      match self.rx.recv().await {
        Ok(changes) if changes.intersects(&self.deps) => break,
        Ok(_) => continue,
        Err(RecvError::Lagged(skipped)) => {
          tracing::debug!(skipped, "live query lagged behind the change bus");
          break;
        }
        Err(RecvError::Closed) => return None,
      }
    }
    self.drain();
    Some(self.current().await)
  }

  fn drain(&mut self) {
    loop {
      match self.rx.try_recv() {
        Ok(_) | Err(TryRecvError::Lagged(_)) => continue,
        Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => break,
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use std::{
    sync::{
      Arc,
      atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
  };

  use super::*;

  fn counting_query(bus: &ChangeBus, deps: &[Collection]) -> (LiveQuery<usize>, Arc<AtomicUsize>) {
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let live = LiveQuery::new(bus, deps.iter().copied(), move || {
      let counter = counter.clone();
      async move { Ok(counter.fetch_add(1, Ordering::SeqCst) + 1) }
    });
    (live, runs)
  }

  #[tokio::test]
  async fn reruns_only_on_intersecting_changes() {
    let bus = ChangeBus::default();
    let (mut live, runs) = counting_query(&bus, &[Collection::PublishedAssignments]);

    bus.publish(ChangeSet::of([Collection::Responses]));
    bus.publish(ChangeSet::of([Collection::PublishedAssignments, Collection::Surveys]));

    let n = live.changed().await.unwrap().unwrap();
    assert_eq!(n, 1);
    assert_eq!(runs.load(Ordering::SeqCst), 1);
  }

  #[tokio::test]
  async fn queued_batches_coalesce_into_one_refresh() {
    let bus = ChangeBus::default();
    let (mut live, runs) = counting_query(&bus, &[Collection::Surveys]);

    for _ in 0..5 {
      bus.publish(ChangeSet::of([Collection::Surveys]));
    }
    live.changed().await.unwrap().unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 1);

    let pending = tokio::time::timeout(Duration::from_millis(20), live.changed()).await;
    assert!(pending.is_err(), "no further refresh expected");
  }

  #[tokio::test]
  async fn lagged_subscriber_still_refreshes() {
    let bus = ChangeBus::new(2);
    let (mut live, _) = counting_query(&bus, &[Collection::Questions]);

    // Overflow the buffer with unrelated changes.
    for _ in 0..10 {
      bus.publish(ChangeSet::of([Collection::Responses]));
    }
    assert!(live.changed().await.unwrap().is_ok());
  }

  #[tokio::test]
  async fn closed_bus_ends_the_subscription() {
    let bus = ChangeBus::default();
    let (mut live, _) = counting_query(&bus, &[Collection::Surveys]);
    drop(bus);
    assert!(live.changed().await.is_none());
  }

  #[test]
  fn empty_change_sets_are_not_published() {
    let bus = ChangeBus::default();
    let mut rx = bus.subscribe();
    bus.publish(ChangeSet::new());
    assert!(matches!(rx.try_recv(), Err(TryRecvError::Empty)));
  }
}
