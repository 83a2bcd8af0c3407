//! Per-resource watch state and the transitions applied to it.
//!
//! The registry is pure data behind one mutex: the subscription map, each
//! entry's state, its expiry timer handle, and its watchers. Every mutation
//! happens under the lock; watcher notifications are decided under the same
//! lock but delivered through the callback serializer, so the lock is never
//! held across watcher code. The stream coordinator, timer tasks, and caller
//! threads all serialize through here.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use crate::authority::expiry::ExpiryTimer;
use crate::authority::watch::{ResourceWatcher, WatcherId};
use crate::error::Error;
use crate::resource::{DecodedResource, ResourceType};
use crate::runtime::Runtime;
use crate::sync::CallbackSerializer;

/// Watch state of one (type, name) subscription.
///
/// Invariant: an expiry timer is running iff the state is `Requested`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WatchState {
    /// A watcher exists; no request has been confirmed sent since the state
    /// last reset. Initial state, and the state after a stream error.
    Started,
    /// A request naming this resource was confirmed sent; the expiry timer
    /// is running.
    Requested,
    /// A response for this resource was received and delivered.
    Received,
    /// The expiry timer fired before any response arrived.
    TimedOut,
}

/// What a response said about one subscribed resource.
pub(crate) enum WatchUpdate {
    /// The resource was present and decoded.
    Resource(DecodedResource),
    /// The server authoritatively confirmed the resource does not exist.
    DoesNotExist,
}

struct WatchEntry {
    state: WatchState,
    expiry: Option<ExpiryTimer>,
    watchers: HashMap<WatcherId, Arc<dyn ResourceWatcher>>,
}

impl WatchEntry {
    fn new() -> Self {
        Self {
            state: WatchState::Started,
            expiry: None,
            watchers: HashMap::new(),
        }
    }
}

/// The subscription map for one authority.
pub(crate) struct WatchRegistry {
    resources: Mutex<HashMap<ResourceType, HashMap<String, WatchEntry>>>,
    serializer: CallbackSerializer,
    watch_expiry: Duration,
    // Handed to expiry timer tasks so a fire after the authority is gone
    // upgrades to nothing instead of keeping the registry alive.
    weak_self: Weak<WatchRegistry>,
}

impl WatchRegistry {
    pub(crate) fn new(serializer: CallbackSerializer, watch_expiry: Duration) -> Arc<Self> {
        Arc::new_cyclic(|weak| Self {
            resources: Mutex::new(HashMap::new()),
            serializer,
            watch_expiry,
            weak_self: weak.clone(),
        })
    }

    /// Register a watcher for `(rtype, name)`.
    ///
    /// Returns the watcher's id and whether this created the entry, in which
    /// case the stream coordinator must be told to include the name in its
    /// next request for the type.
    pub(crate) fn add_watch(
        &self,
        rtype: &ResourceType,
        name: &str,
        watcher: Arc<dyn ResourceWatcher>,
    ) -> (WatcherId, bool) {
        let mut resources = self.resources.lock().unwrap();
        let entries = resources.entry(rtype.clone()).or_default();

        let first_watch = !entries.contains_key(name);
        let entry = entries
            .entry(name.to_string())
            .or_insert_with(WatchEntry::new);

        let id = WatcherId::next();
        entry.watchers.insert(id, watcher);
        (id, first_watch)
    }

    /// Remove one watcher. Unknown keys are no-ops: a watch may be cancelled
    /// concurrently with a transition that already removed it.
    ///
    /// Returns true if this removed the last watcher for the name, deleting
    /// the entry (and cancelling any running timer).
    pub(crate) fn cancel_watch(&self, rtype: &ResourceType, name: &str, id: WatcherId) -> bool {
        let mut resources = self.resources.lock().unwrap();
        let Some(entries) = resources.get_mut(rtype) else {
            return false;
        };
        let Some(entry) = entries.get_mut(name) else {
            return false;
        };

        entry.watchers.remove(&id);
        if !entry.watchers.is_empty() {
            return false;
        }

        entries.remove(name);
        if entries.is_empty() {
            resources.remove(rtype);
        }
        true
    }

    /// Confirmation that a request enumerating `names` was sent: every name
    /// still in `Started` moves to `Requested` and gets a fresh expiry
    /// timer. Names already past `Started` are untouched.
    pub(crate) fn mark_requested<R: Runtime>(
        &self,
        runtime: &R,
        rtype: &ResourceType,
        names: &[String],
    ) {
        let mut resources = self.resources.lock().unwrap();
        let Some(entries) = resources.get_mut(rtype) else {
            return;
        };

        for name in names {
            let Some(entry) = entries.get_mut(name) else {
                continue;
            };
            if entry.state != WatchState::Started {
                continue;
            }

            entry.state = WatchState::Requested;
            let registry = self.weak_self.clone();
            let rtype = rtype.clone();
            let name = name.clone();
            entry.expiry = Some(ExpiryTimer::spawn(runtime, self.watch_expiry, move || {
                if let Some(registry) = registry.upgrade() {
                    registry.handle_watch_expiry(&rtype, &name);
                }
            }));
        }
    }

    /// A response said something about `(rtype, name)`. Names not currently
    /// subscribed are ignored; no entry is created.
    pub(crate) fn apply_update(&self, rtype: &ResourceType, name: &str, update: WatchUpdate) {
        let mut resources = self.resources.lock().unwrap();
        let Some(entry) = resources.get_mut(rtype).and_then(|e| e.get_mut(name)) else {
            return;
        };

        match update {
            WatchUpdate::Resource(resource) => {
                // Delivered unconditionally: a resource that arrives after a
                // timeout or a re-delivery of a known resource still reaches
                // the watchers.
                entry.expiry = None;
                entry.state = WatchState::Received;
                for watcher in entry.watchers.values() {
                    let watcher = Arc::clone(watcher);
                    let resource = resource.clone();
                    self.serializer.schedule(move || watcher.on_update(resource));
                }
            }
            WatchUpdate::DoesNotExist => {
                // Only a pending resource is told it does not exist. An
                // entry already `Received` keeps its last good value when a
                // later full-state response omits it; deletion propagation
                // belongs to an outer caching layer.
                if entry.state != WatchState::Requested {
                    return;
                }
                entry.expiry = None;
                entry.state = WatchState::Received;
                for watcher in entry.watchers.values() {
                    let watcher = Arc::clone(watcher);
                    self.serializer
                        .schedule(move || watcher.on_resource_does_not_exist());
                }
            }
        }
    }

    /// The stream broke. Every `Requested` entry loses its timer, resets to
    /// `Started`, and its watchers are told about the connection error.
    /// `Received` entries reset silently: their delivered value stands, they
    /// only become eligible for a fresh request (and timer) on reconnect.
    pub(crate) fn handle_stream_error(&self, err: &Error) {
        let mut resources = self.resources.lock().unwrap();
        for entries in resources.values_mut() {
            for entry in entries.values_mut() {
                match entry.state {
                    WatchState::Requested => {
                        entry.expiry = None;
                        entry.state = WatchState::Started;
                        for watcher in entry.watchers.values() {
                            let watcher = Arc::clone(watcher);
                            let err = err.clone();
                            self.serializer.schedule(move || watcher.on_error(err));
                        }
                    }
                    WatchState::Received => {
                        entry.state = WatchState::Started;
                    }
                    WatchState::Started | WatchState::TimedOut => {}
                }
            }
        }
    }

    /// The expiry timer for `(rtype, name)` fired. Valid only while still
    /// `Requested`; a fire that lost the race against a receive, a stream
    /// error, or a cancellation observes a different state (or no entry)
    /// and does nothing.
    pub(crate) fn handle_watch_expiry(&self, rtype: &ResourceType, name: &str) {
        let mut resources = self.resources.lock().unwrap();
        let Some(entry) = resources.get_mut(rtype).and_then(|e| e.get_mut(name)) else {
            return;
        };
        if entry.state != WatchState::Requested {
            return;
        }

        entry.expiry = None;
        entry.state = WatchState::TimedOut;
        let err = Error::WatchExpired {
            type_url: rtype.type_url().to_string(),
            name: name.to_string(),
            timeout: self.watch_expiry,
        };
        for watcher in entry.watchers.values() {
            let watcher = Arc::clone(watcher);
            let err = err.clone();
            self.serializer.schedule(move || watcher.on_error(err));
        }
    }

    /// Snapshot of every subscribed type with its (sorted) names.
    pub(crate) fn subscriptions(&self) -> Vec<(ResourceType, Vec<String>)> {
        let resources = self.resources.lock().unwrap();
        resources
            .iter()
            .map(|(rtype, entries)| {
                let mut names: Vec<String> = entries.keys().cloned().collect();
                names.sort();
                (rtype.clone(), names)
            })
            .collect()
    }

    /// Sorted names currently subscribed for one type.
    pub(crate) fn subscribed_names(&self, rtype: &ResourceType) -> Vec<String> {
        let resources = self.resources.lock().unwrap();
        let mut names: Vec<String> = resources
            .get(rtype)
            .map(|entries| entries.keys().cloned().collect())
            .unwrap_or_default();
        names.sort();
        names
    }

    pub(crate) fn has_subscriptions(&self) -> bool {
        !self.resources.lock().unwrap().is_empty()
    }

    /// Drop every running timer. Used on authority shutdown; states are left
    /// as they are since nothing will transition them again.
    pub(crate) fn cancel_all_timers(&self) {
        let mut resources = self.resources.lock().unwrap();
        for entries in resources.values_mut() {
            for entry in entries.values_mut() {
                entry.expiry = None;
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn watch_state(&self, rtype: &ResourceType, name: &str) -> Option<WatchState> {
        let resources = self.resources.lock().unwrap();
        resources
            .get(rtype)
            .and_then(|e| e.get(name))
            .map(|entry| entry.state)
    }

    #[cfg(test)]
    pub(crate) fn timer_running(&self, rtype: &ResourceType, name: &str) -> bool {
        let resources = self.resources.lock().unwrap();
        resources
            .get(rtype)
            .and_then(|e| e.get(name))
            .is_some_and(|entry| entry.expiry.is_some())
    }
}

#[cfg(all(test, feature = "rt-tokio"))]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::authority::test_util::{
        RecordingWatcher, WatchEvent, decoded, settle, test_resource_type,
    };
    use crate::runtime::tokio::TokioRuntime;

    const EXPIRY: Duration = Duration::from_secs(15);

    fn new_registry() -> Arc<WatchRegistry> {
        WatchRegistry::new(CallbackSerializer::new(&TokioRuntime), EXPIRY)
    }

    fn names(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[tokio::test(start_paused = true)]
    async fn add_watch_creates_entry_in_started_state() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        let (watcher, _events) = RecordingWatcher::new();

        let (_id, first) = registry.add_watch(&rtype, "a", watcher);
        assert!(first);
        assert_eq!(registry.watch_state(&rtype, "a"), Some(WatchState::Started));
        assert!(!registry.timer_running(&rtype, "a"));

        let (watcher2, _events2) = RecordingWatcher::new();
        let (_id2, first2) = registry.add_watch(&rtype, "a", watcher2);
        assert!(!first2);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_requested_starts_timer_once() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        let (watcher, _events) = RecordingWatcher::new();
        registry.add_watch(&rtype, "a", watcher);

        registry.mark_requested(&TokioRuntime, &rtype, &names(&["a"]));
        assert_eq!(
            registry.watch_state(&rtype, "a"),
            Some(WatchState::Requested)
        );
        assert!(registry.timer_running(&rtype, "a"));

        // A second confirmation (e.g. a re-sent request) is a no-op past
        // `Started`.
        registry.mark_requested(&TokioRuntime, &rtype, &names(&["a"]));
        assert_eq!(
            registry.watch_state(&rtype, "a"),
            Some(WatchState::Requested)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn receive_cancels_timer_and_notifies_each_watcher_once() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        let (watcher1, mut events1) = RecordingWatcher::new();
        let (watcher2, mut events2) = RecordingWatcher::new();
        registry.add_watch(&rtype, "a", watcher1);
        registry.add_watch(&rtype, "a", watcher2);

        registry.mark_requested(&TokioRuntime, &rtype, &names(&["a"]));
        registry.apply_update(&rtype, "a", WatchUpdate::Resource(decoded("a")));
        settle().await;

        assert_eq!(registry.watch_state(&rtype, "a"), Some(WatchState::Received));
        assert!(!registry.timer_running(&rtype, "a"));
        for events in [&mut events1, &mut events2] {
            match events.try_recv() {
                Ok(WatchEvent::Update(r)) => assert_eq!(r.name(), "a"),
                other => panic!("want one update, got {other:?}"),
            }
            assert!(events.try_recv().is_err());
        }
    }

    #[tokio::test(start_paused = true)]
    async fn update_for_unsubscribed_name_is_ignored() {
        let registry = new_registry();
        let rtype = test_resource_type(true);

        registry.apply_update(&rtype, "ghost", WatchUpdate::Resource(decoded("ghost")));
        assert_eq!(registry.watch_state(&rtype, "ghost"), None);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_exist_only_affects_requested_entries() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        let (watcher, mut events) = RecordingWatcher::new();
        registry.add_watch(&rtype, "a", watcher);

        // Still `Started`: absence from a response means nothing yet.
        registry.apply_update(&rtype, "a", WatchUpdate::DoesNotExist);
        assert_eq!(registry.watch_state(&rtype, "a"), Some(WatchState::Started));

        registry.mark_requested(&TokioRuntime, &rtype, &names(&["a"]));
        registry.apply_update(&rtype, "a", WatchUpdate::DoesNotExist);
        settle().await;

        assert_eq!(registry.watch_state(&rtype, "a"), Some(WatchState::Received));
        assert!(!registry.timer_running(&rtype, "a"));
        assert!(matches!(events.try_recv(), Ok(WatchEvent::DoesNotExist)));

        // A repeat of the same full-state omission does not re-notify.
        registry.apply_update(&rtype, "a", WatchUpdate::DoesNotExist);
        settle().await;
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn stream_error_resets_requested_with_error_and_received_silently() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        let (watcher_a, mut events_a) = RecordingWatcher::new();
        let (watcher_b, mut events_b) = RecordingWatcher::new();
        registry.add_watch(&rtype, "a", watcher_a);
        registry.add_watch(&rtype, "b", watcher_b);

        registry.mark_requested(&TokioRuntime, &rtype, &names(&["a", "b"]));
        registry.apply_update(&rtype, "a", WatchUpdate::Resource(decoded("a")));
        settle().await;
        assert!(matches!(events_a.try_recv(), Ok(WatchEvent::Update(_))));

        registry.handle_stream_error(&Error::Connection("server went away".into()));
        settle().await;

        // Both reset to Started, no timers anywhere.
        assert_eq!(registry.watch_state(&rtype, "a"), Some(WatchState::Started));
        assert_eq!(registry.watch_state(&rtype, "b"), Some(WatchState::Started));
        assert!(!registry.timer_running(&rtype, "a"));
        assert!(!registry.timer_running(&rtype, "b"));

        // Only the pending watch hears about it.
        assert!(events_a.try_recv().is_err());
        match events_b.try_recv() {
            Ok(WatchEvent::Error(e)) => assert!(e.is_connection_error()),
            other => panic!("want connection error, got {other:?}"),
        }
        assert!(events_b.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn expiry_fires_exactly_once_and_marks_timed_out() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        let (watcher, mut events) = RecordingWatcher::new();
        registry.add_watch(&rtype, "a", watcher);
        registry.mark_requested(&TokioRuntime, &rtype, &names(&["a"]));

        tokio::time::advance(EXPIRY + Duration::from_millis(1)).await;
        settle().await;

        assert_eq!(registry.watch_state(&rtype, "a"), Some(WatchState::TimedOut));
        assert!(!registry.timer_running(&rtype, "a"));
        match events.try_recv() {
            Ok(WatchEvent::Error(Error::WatchExpired { name, .. })) => assert_eq!(name, "a"),
            other => panic!("want expiry error, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn receive_beats_expiry() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        let (watcher, mut events) = RecordingWatcher::new();
        registry.add_watch(&rtype, "a", watcher);
        registry.mark_requested(&TokioRuntime, &rtype, &names(&["a"]));

        registry.apply_update(&rtype, "a", WatchUpdate::Resource(decoded("a")));
        tokio::time::advance(EXPIRY * 2).await;
        settle().await;

        assert_eq!(registry.watch_state(&rtype, "a"), Some(WatchState::Received));
        assert!(matches!(events.try_recv(), Ok(WatchEvent::Update(_))));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn late_update_after_timeout_still_delivers() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        let (watcher, mut events) = RecordingWatcher::new();
        registry.add_watch(&rtype, "a", watcher);
        registry.mark_requested(&TokioRuntime, &rtype, &names(&["a"]));

        tokio::time::advance(EXPIRY * 2).await;
        settle().await;
        assert!(matches!(events.try_recv(), Ok(WatchEvent::Error(_))));

        registry.apply_update(&rtype, "a", WatchUpdate::Resource(decoded("a")));
        settle().await;
        assert_eq!(registry.watch_state(&rtype, "a"), Some(WatchState::Received));
        assert!(matches!(events.try_recv(), Ok(WatchEvent::Update(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_last_watcher_removes_entry_and_timer() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        let (watcher1, _events1) = RecordingWatcher::new();
        let (watcher2, mut events2) = RecordingWatcher::new();
        let (id1, _) = registry.add_watch(&rtype, "a", watcher1);
        let (id2, _) = registry.add_watch(&rtype, "a", watcher2);
        registry.mark_requested(&TokioRuntime, &rtype, &names(&["a"]));

        assert!(!registry.cancel_watch(&rtype, "a", id1));
        assert_eq!(
            registry.watch_state(&rtype, "a"),
            Some(WatchState::Requested)
        );

        assert!(registry.cancel_watch(&rtype, "a", id2));
        assert_eq!(registry.watch_state(&rtype, "a"), None);
        assert!(!registry.has_subscriptions());

        // The cancelled timer never fires.
        tokio::time::advance(EXPIRY * 2).await;
        settle().await;
        assert!(events2.try_recv().is_err());

        // Cancelling again is a no-op.
        assert!(!registry.cancel_watch(&rtype, "a", id2));
    }

    #[tokio::test(start_paused = true)]
    async fn subscriptions_snapshot_is_sorted() {
        let registry = new_registry();
        let rtype = test_resource_type(true);
        for name in ["zeta", "alpha", "mid"] {
            let (watcher, _events) = RecordingWatcher::new();
            registry.add_watch(&rtype, name, watcher);
        }

        assert_eq!(
            registry.subscribed_names(&rtype),
            names(&["alpha", "mid", "zeta"])
        );
        let subs = registry.subscriptions();
        assert_eq!(subs.len(), 1);
        assert_eq!(subs[0].1, names(&["alpha", "mid", "zeta"]));
    }
}
