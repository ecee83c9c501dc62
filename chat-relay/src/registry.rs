//! Shared mapping between live sessions and their display names.
//!
//! The registry holds both directions of the mapping (name to session, session to
//! name and mailbox) behind one lock so that they always change together. Names held
//! by registered sessions are pairwise distinct at every instant.

use std::{
    collections::{BTreeMap, HashMap},
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use tokio::sync::{Mutex, Notify, mpsc};

use crate::error::DeliveryError;

/// Opaque identity of one connection, allocated in accept order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Sending half of a session's outbound queue.
///
/// Cloned into the registry so the router can reach the session; the session's writer
/// task owns the matching [`Inbox`].
#[derive(Debug, Clone)]
pub struct Mailbox {
    sender: Outbox,
    evict: Arc<Notify>,
}

#[derive(Debug, Clone)]
enum Outbox {
    Unbounded(mpsc::UnboundedSender<String>),
    Bounded(mpsc::Sender<String>),
}

/// Receiving half of a session's outbound queue.
#[derive(Debug)]
pub enum Inbox {
    Unbounded(mpsc::UnboundedReceiver<String>),
    Bounded(mpsc::Receiver<String>),
}

impl Inbox {
    pub async fn recv(&mut self) -> Option<String> {
        match self {
            Self::Unbounded(rx) => rx.recv().await,
            Self::Bounded(rx) => rx.recv().await,
        }
    }

    /// Takes a queued line if one is ready.
    pub fn try_recv(&mut self) -> Option<String> {
        match self {
            Self::Unbounded(rx) => rx.try_recv().ok(),
            Self::Bounded(rx) => rx.try_recv().ok(),
        }
    }
}

/// Creates an outbound queue. `None` gives the legacy unbounded queue.
pub fn mailbox(capacity: Option<usize>) -> (Mailbox, Inbox) {
    let (sender, inbox) = match capacity {
        None => {
            let (tx, rx) = mpsc::unbounded_channel();
            (Outbox::Unbounded(tx), Inbox::Unbounded(rx))
        }
        Some(capacity) => {
            let (tx, rx) = mpsc::channel(capacity.max(1));
            (Outbox::Bounded(tx), Inbox::Bounded(rx))
        }
    };

    let mailbox = Mailbox {
        sender,
        evict: Arc::new(Notify::new()),
    };
    (mailbox, inbox)
}

impl Mailbox {
    /// Queues one line without waiting.
    ///
    /// A full bounded queue marks the owning session for eviction; see [`Mailbox::evicted`].
    pub fn deliver(&self, line: String) -> Result<(), DeliveryError> {
        match &self.sender {
            Outbox::Unbounded(tx) => tx.send(line).map_err(|_| DeliveryError::Closed),
            Outbox::Bounded(tx) => match tx.try_send(line) {
                Ok(()) => Ok(()),
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.evict.notify_one();
                    Err(DeliveryError::Full)
                }
                Err(mpsc::error::TrySendError::Closed(_)) => Err(DeliveryError::Closed),
            },
        }
    }

    /// Resolves once a delivery has overflowed this mailbox.
    pub async fn evicted(&self) {
        self.evict.notified().await;
    }
}

/// A registered session as seen by the router.
#[derive(Debug, Clone)]
pub struct Registered {
    pub session: SessionId,
    pub name: String,
    pub mailbox: Mailbox,
}

#[derive(Debug)]
struct Slot {
    /// Position in registration order.
    seq: u64,
    entry: Registered,
}

#[derive(Debug, Default)]
struct Entries {
    by_name: HashMap<String, SessionId>,
    by_session: HashMap<SessionId, Slot>,
    order: BTreeMap<u64, SessionId>,
    next_seq: u64,
}

impl Entries {
    fn remove(&mut self, session: SessionId) -> Option<Registered> {
        let slot = self.by_session.remove(&session)?;
        self.by_name.remove(&slot.entry.name);
        self.order.remove(&slot.seq);
        Some(slot.entry)
    }
}

#[derive(Debug)]
pub struct ConnectionRegistry {
    entries: Mutex<Entries>,
    next_id: AtomicU64,
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Entries::default()),
            next_id: AtomicU64::new(1),
        }
    }

    pub fn next_id(&self) -> SessionId {
        SessionId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Registers `session` under `candidate`, or under a suffixed variant when the name is
    /// taken, and returns the name actually stored.
    ///
    /// The suffix is `(size + 1)` where `size` is the number of registered sessions at the
    /// time of the collision. If that variant is itself taken the number is bumped until a
    /// free name is found.
    pub async fn register(&self, session: SessionId, candidate: &str, mailbox: Mailbox) -> String {
        let mut entries = self.entries.lock().await;
        entries.remove(session);

        let name = if entries.by_name.contains_key(candidate) {
            let mut suffix = entries.by_session.len() + 1;
            loop {
                let name = format!("{candidate}({suffix})");
                if !entries.by_name.contains_key(&name) {
                    break name;
                }
                suffix += 1;
            }
        } else {
            candidate.to_string()
        };

        let seq = entries.next_seq;
        entries.next_seq += 1;
        entries.by_name.insert(name.clone(), session);
        entries.order.insert(seq, session);
        entries.by_session.insert(
            session,
            Slot {
                seq,
                entry: Registered {
                    session,
                    name: name.clone(),
                    mailbox,
                },
            },
        );
        name
    }

    /// Removes the session and returns the name it held, if it was registered.
    pub async fn unregister(&self, session: SessionId) -> Option<String> {
        let mut entries = self.entries.lock().await;
        entries.remove(session).map(|entry| entry.name)
    }

    /// All registered sessions in the order their `register` calls completed.
    pub async fn snapshot(&self) -> Vec<Registered> {
        let entries = self.entries.lock().await;
        entries
            .order
            .values()
            .filter_map(|session| entries.by_session.get(session))
            .map(|slot| slot.entry.clone())
            .collect()
    }

    pub async fn find(&self, name: &str) -> Option<Registered> {
        let entries = self.entries.lock().await;
        let session = entries.by_name.get(name)?;
        entries
            .by_session
            .get(session)
            .map(|slot| slot.entry.clone())
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.by_session.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn register(registry: &ConnectionRegistry, name: &str) -> (SessionId, String, Inbox) {
        let id = registry.next_id();
        let (mailbox, inbox) = mailbox(None);
        let name = registry.register(id, name, mailbox).await;
        (id, name, inbox)
    }

    #[tokio::test]
    async fn unused_name_is_kept_verbatim() {
        let registry = ConnectionRegistry::new();
        let (_, name, _inbox) = register(&registry, "alice").await;
        assert_eq!(name, "alice");
    }

    #[tokio::test]
    async fn collision_suffix_uses_registry_size() {
        let registry = ConnectionRegistry::new();
        let (_, _, _a) = register(&registry, "alice").await;
        let (_, _, _c) = register(&registry, "carol").await;
        let (_, second, _b) = register(&registry, "alice").await;

        // Two sessions were registered when the collision happened.
        assert_eq!(second, "alice(3)");
    }

    #[tokio::test]
    async fn suffix_skips_names_already_taken() {
        let registry = ConnectionRegistry::new();
        let (_, _, _a) = register(&registry, "alice").await;
        let (dan, _, _d) = register(&registry, "dan").await;
        let (_, third, _c) = register(&registry, "alice").await;
        assert_eq!(third, "alice(3)");

        registry.unregister(dan).await;
        // Size is back to two, so the first candidate is alice(3), which is taken.
        let (_, fourth, _e) = register(&registry, "alice").await;
        assert_eq!(fourth, "alice(4)");
    }

    #[tokio::test]
    async fn concurrent_identical_names_are_distinct() {
        let registry = Arc::new(ConnectionRegistry::new());
        let mut tasks = Vec::new();
        for _ in 0..32 {
            let registry = Arc::clone(&registry);
            tasks.push(tokio::spawn(async move {
                let id = registry.next_id();
                let (mailbox, _inbox) = mailbox(None);
                registry.register(id, "alice", mailbox).await
            }));
        }

        let mut names = Vec::new();
        for task in tasks {
            names.push(task.await.expect("register task"));
        }
        names.sort();
        names.dedup();
        assert_eq!(names.len(), 32);
        assert_eq!(registry.len().await, 32);
    }

    #[tokio::test]
    async fn unregister_frees_the_name() {
        let registry = ConnectionRegistry::new();
        let (alice, _, _inbox) = register(&registry, "alice").await;

        assert_eq!(registry.unregister(alice).await.as_deref(), Some("alice"));
        assert_eq!(registry.unregister(alice).await, None);
        assert!(registry.find("alice").await.is_none());

        let (_, again, _inbox) = register(&registry, "alice").await;
        assert_eq!(again, "alice");
    }

    #[tokio::test]
    async fn snapshot_follows_registration_order() {
        let registry = ConnectionRegistry::new();
        let (_, _, _a) = register(&registry, "zed").await;
        let (_, _, _b) = register(&registry, "amy").await;
        let (_, _, _c) = register(&registry, "mia").await;

        let names: Vec<_> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|entry| entry.name)
            .collect();
        assert_eq!(names, ["zed", "amy", "mia"]);
    }

    #[tokio::test]
    async fn snapshot_orders_by_registration_not_connection() {
        let registry = ConnectionRegistry::new();
        let early = registry.next_id();
        let late = registry.next_id();

        // The connection accepted first sends its name last.
        let (mailbox_late, _inbox_late) = mailbox(None);
        registry.register(late, "first", mailbox_late).await;
        let (mailbox_early, _inbox_early) = mailbox(None);
        registry.register(early, "second", mailbox_early).await;

        let sessions: Vec<_> = registry
            .snapshot()
            .await
            .into_iter()
            .map(|entry| entry.session)
            .collect();
        assert_eq!(sessions, [late, early]);
    }

    #[tokio::test]
    async fn find_returns_deliverable_mailbox() {
        let registry = ConnectionRegistry::new();
        let (bob, _, mut inbox) = register(&registry, "bob").await;

        let entry = registry.find("bob").await.expect("bob registered");
        assert_eq!(entry.session, bob);
        entry.mailbox.deliver("hi".into()).expect("deliver");
        assert_eq!(inbox.recv().await.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn full_bounded_mailbox_requests_eviction() {
        let (mailbox, mut inbox) = mailbox(Some(1));
        mailbox.deliver("one".into()).expect("first fits");
        assert_eq!(mailbox.deliver("two".into()), Err(DeliveryError::Full));

        // The eviction permit is stored even though nobody was waiting yet.
        mailbox.evicted().await;
        assert_eq!(inbox.recv().await.as_deref(), Some("one"));

        drop(inbox);
        assert_eq!(mailbox.deliver("three".into()), Err(DeliveryError::Closed));
    }
}
