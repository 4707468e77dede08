//! Keyed rendezvous between a waiting thread and a completing thread.
use std::borrow::Borrow;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::time::Duration;

use crossbeam_channel::Receiver;
use crossbeam_channel::RecvTimeoutError;
use crossbeam_channel::Sender;
use crossbeam_channel::TrySendError;
use parking_lot::Mutex;

use crate::error::Result;
use crate::error::SessionError;

/// Registry of pending sessions, each waiting for a single value.
///
/// The usual flow is: [`add`](WaitSession::add) a key, hand the key to whoever produces the
/// result, and [`wait`](WaitSession::wait) on it. The producer calls
/// [`done`](WaitSession::done) with the value. Whichever of `wait` receiving the value or `wait`
/// timing out happens first removes the session, after which the key can be added again.
///
/// The internal mutex is held only while the map is read or modified, never while waiting, so a
/// slow waiter does not hold up sessions under other keys.
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use std::time::Duration;
///
/// use lockwatch::WaitSession;
///
/// let sessions = Arc::new(WaitSession::<u32, &str>::new());
/// sessions.add(7).unwrap();
///
/// let producer = Arc::clone(&sessions);
/// thread::spawn(move || producer.done(&7, "ready").unwrap());
///
/// assert_eq!(sessions.wait(&7, Some(Duration::from_secs(3))), Ok("ready"));
/// assert!(sessions.is_empty());
/// ```
pub struct WaitSession<K, V> {
    sessions: Mutex<Sessions<K, V>>,
}

struct Sessions<K, V> {
    slots: HashMap<K, Slot<V>>,
    next_generation: u64,
}

/// Delivery slot with room for exactly one value.
struct Slot<V> {
    /// Distinguishes this session from later ones registered under the same key.
    generation: u64,
    sender: Sender<V>,
    receiver: Receiver<V>,
}

impl<K, V> WaitSession<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    pub fn new() -> Self {
        Self {
            sessions: Mutex::new(Sessions {
                slots: HashMap::new(),
                next_generation: 0,
            }),
        }
    }

    /// Register a new pending session under `key`.
    ///
    /// Fails with [`SessionError::AlreadyExists`] if a session for `key` is still live; the
    /// existing session is left untouched.
    pub fn add(&self, key: K) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.slots.contains_key(&key) {
            return Err(SessionError::AlreadyExists { key: render(&key) });
        }

        let generation = sessions.next_generation;
        sessions.next_generation += 1;

        let (sender, receiver) = crossbeam_channel::bounded(1);
        sessions.slots.insert(
            key,
            Slot {
                generation,
                sender,
                receiver,
            },
        );

        Ok(())
    }

    /// Deliver `value` to the session registered under `key`.
    ///
    /// The session stays registered until it is waited on. Fails with
    /// [`SessionError::NotFound`] if there is no such session, and with
    /// [`SessionError::AlreadyDone`] if it already holds an undelivered value. Never blocks.
    pub fn done<Q>(&self, key: &Q, value: V) -> Result<()>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + fmt::Debug + ?Sized,
    {
        let sender = match self.sessions.lock().slots.get(key) {
            Some(slot) => slot.sender.clone(),
            None => return Err(SessionError::NotFound { key: render(key) }),
        };

        match sender.try_send(value) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => Err(SessionError::AlreadyDone { key: render(key) }),
            // The session was consumed between the lookup and the send
            Err(TrySendError::Disconnected(_)) => Err(SessionError::NotFound { key: render(key) }),
        }
    }

    /// Block until the session under `key` receives a value, then remove the session.
    ///
    /// `None` or a zero `timeout` waits indefinitely. When the timeout expires first, the
    /// session is removed and [`SessionError::Timeout`] is returned, so a late
    /// [`done`](WaitSession::done) fails with [`SessionError::NotFound`]. Returns
    /// [`SessionError::NotFound`] without blocking if no session is registered under `key`.
    pub fn wait<Q>(&self, key: &Q, timeout: Option<Duration>) -> Result<V>
    where
        K: Borrow<Q>,
        Q: Eq + Hash + fmt::Debug + ?Sized,
    {
        let (generation, receiver) = match self.sessions.lock().slots.get(key) {
            Some(slot) => (slot.generation, slot.receiver.clone()),
            None => return Err(SessionError::NotFound { key: render(key) }),
        };

        let received = match timeout.filter(|timeout| !timeout.is_zero()) {
            Some(timeout) => receiver.recv_timeout(timeout).map_err(|error| match error {
                RecvTimeoutError::Timeout => SessionError::Timeout {
                    key: render(key),
                    timeout,
                },
                RecvTimeoutError::Disconnected => SessionError::NotFound { key: render(key) },
            }),
            None => receiver
                .recv()
                .map_err(|_| SessionError::NotFound { key: render(key) }),
        };

        self.remove(key, generation);
        received
    }

    /// Number of live sessions.
    pub fn len(&self) -> usize {
        self.sessions.lock().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a live session is registered under `key`.
    pub fn contains<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        self.sessions.lock().slots.contains_key(key)
    }

    /// Remove the session under `key` if it is still the one identified by `generation`.
    fn remove<Q>(&self, key: &Q, generation: u64)
    where
        K: Borrow<Q>,
        Q: Eq + Hash + ?Sized,
    {
        let removed = {
            let mut sessions = self.sessions.lock();
            match sessions.slots.get(key) {
                Some(slot) if slot.generation == generation => sessions.slots.remove(key),
                _ => None,
            }
        };
        // Any undelivered value is dropped outside the lock
        drop(removed);
    }
}

impl<K, V> Default for WaitSession<K, V>
where
    K: Eq + Hash + fmt::Debug,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<K, V> fmt::Debug for WaitSession<K, V>
where
    K: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let sessions = self.sessions.lock();
        f.debug_struct("WaitSession")
            .field("keys", &sessions.slots.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn render<Q: fmt::Debug + ?Sized>(key: &Q) -> String {
    format!("{key:?}")
}
