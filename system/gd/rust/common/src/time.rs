//! Keyed one-shot timers for message driven state machines.
//!
//! A timer does not call back into its owner. When it expires it posts a message built from
//! its key and a generation number onto the owner's channel. The owner hands the pair back to
//! [`Timers::expire`], which only accepts the generation of the currently armed timer, so an
//! expiry that raced with a cancel or a restart is dropped.

use std::collections::HashMap;
use std::hash::Hash;
use std::time::Duration;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;

/// A set of one-shot timers keyed by `K` that deliver `M` on expiry.
pub struct Timers<K, M>
where
    K: Copy + Eq + Hash + Send + 'static,
    M: Send + 'static,
{
    tx: UnboundedSender<M>,
    make_message: fn(K, u64) -> M,
    active: HashMap<K, (u64, JoinHandle<()>)>,
    last_generation: u64,
}

impl<K, M> Timers<K, M>
where
    K: Copy + Eq + Hash + Send + 'static,
    M: Send + 'static,
{
    /// Creates an empty timer set.
    ///
    /// Parameters:
    /// `tx`: Sender used to deliver expirations.
    /// `make_message`: Constructor of the expiry message from a key and its generation.
    pub fn new(tx: UnboundedSender<M>, make_message: fn(K, u64) -> M) -> Self {
        Timers { tx, make_message, active: HashMap::new(), last_generation: 0 }
    }

    /// Arms the timer for `key`, replacing any timer already armed for it.
    ///
    /// Must be called from within a tokio runtime. Returns the generation of the new timer.
    pub fn start(&mut self, key: K, duration: Duration) -> u64 {
        self.cancel(key);

        self.last_generation = self.last_generation.wrapping_add(1);
        let generation = self.last_generation;
        let tx = self.tx.clone();
        let message = (self.make_message)(key, generation);
        let handle = tokio::spawn(async move {
            tokio::time::sleep(duration).await;
            let _ = tx.send(message);
        });

        self.active.insert(key, (generation, handle));
        generation
    }

    /// Disarms the timer for `key`.
    ///
    /// Returns true if a timer was armed.
    pub fn cancel(&mut self, key: K) -> bool {
        match self.active.remove(&key) {
            Some((_, handle)) => {
                handle.abort();
                true
            }
            None => false,
        }
    }

    /// Disarms every timer.
    pub fn cancel_all(&mut self) {
        for (_, (_, handle)) in self.active.drain() {
            handle.abort();
        }
    }

    /// Returns true if a timer is armed for `key`.
    pub fn is_active(&self, key: K) -> bool {
        self.active.contains_key(&key)
    }

    /// Consumes an expiry message.
    ///
    /// Returns true if `generation` belongs to the timer currently armed for `key`. The timer is
    /// then considered fired and no longer active. Stale expirations return false.
    pub fn expire(&mut self, key: K, generation: u64) -> bool {
        match self.active.get(&key) {
            Some((armed, _)) if *armed == generation => {
                self.active.remove(&key);
                true
            }
            _ => false,
        }
    }
}

impl<K, M> Drop for Timers<K, M>
where
    K: Copy + Eq + Hash + Send + 'static,
    M: Send + 'static,
{
    fn drop(&mut self) {
        self.cancel_all();
    }
}

#[cfg(test)]
mod tests {
    use super::Timers;
    use std::time::Duration;
    use tokio::sync::mpsc::unbounded_channel;

    #[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
    enum Key {
        Short,
        Long,
    }

    #[derive(Debug, PartialEq)]
    enum Msg {
        Expired(Key, u64),
    }

    fn make(key: Key, generation: u64) -> Msg {
        Msg::Expired(key, generation)
    }

    #[test]
    fn timer_fires_once() {
        tokio_test::block_on(async {
            tokio::time::pause();
            let (tx, mut rx) = unbounded_channel();
            let mut timers = Timers::new(tx, make);
            let generation = timers.start(Key::Short, Duration::from_millis(100));
            assert!(timers.is_active(Key::Short));

            tokio::time::sleep(Duration::from_millis(150)).await;
            assert_eq!(rx.try_recv().ok(), Some(Msg::Expired(Key::Short, generation)));
            assert!(timers.expire(Key::Short, generation));
            assert!(!timers.is_active(Key::Short));
            assert!(!timers.expire(Key::Short, generation));
        });
    }

    #[test]
    fn cancelled_timer_never_delivers() {
        tokio_test::block_on(async {
            tokio::time::pause();
            let (tx, mut rx) = unbounded_channel();
            let mut timers = Timers::new(tx, make);
            timers.start(Key::Short, Duration::from_millis(100));
            assert!(timers.cancel(Key::Short));
            assert!(!timers.cancel(Key::Short));

            tokio::time::sleep(Duration::from_millis(500)).await;
            assert!(rx.try_recv().is_err());
        });
    }

    #[test]
    fn restart_makes_old_generation_stale() {
        tokio_test::block_on(async {
            tokio::time::pause();
            let (tx, mut rx) = unbounded_channel();
            let mut timers = Timers::new(tx, make);
            let first = timers.start(Key::Long, Duration::from_millis(100));
            let second = timers.start(Key::Long, Duration::from_millis(300));
            assert_ne!(first, second);
            assert!(!timers.expire(Key::Long, first));

            tokio::time::sleep(Duration::from_millis(200)).await;
            assert!(rx.try_recv().is_err());

            tokio::time::sleep(Duration::from_millis(200)).await;
            assert_eq!(rx.try_recv().ok(), Some(Msg::Expired(Key::Long, second)));
            assert!(timers.expire(Key::Long, second));
        });
    }

    #[test]
    fn keys_are_independent() {
        tokio_test::block_on(async {
            tokio::time::pause();
            let (tx, mut rx) = unbounded_channel();
            let mut timers = Timers::new(tx, make);
            let short = timers.start(Key::Short, Duration::from_millis(10));
            timers.start(Key::Long, Duration::from_millis(1000));
            timers.cancel(Key::Long);

            tokio::time::sleep(Duration::from_millis(2000)).await;
            assert_eq!(rx.try_recv().ok(), Some(Msg::Expired(Key::Short, short)));
            assert!(rx.try_recv().is_err());
            assert!(timers.is_active(Key::Short));
            timers.cancel_all();
            assert!(!timers.is_active(Key::Short));
        });
    }
}
