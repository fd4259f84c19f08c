use std::{
    sync::{
        Arc,
        atomic::{AtomicU8, AtomicU64, Ordering},
    },
    time::Duration,
};

use dashmap::DashMap;
use futures::future::BoxFuture;
use tokio::{
    sync::Notify,
    time::{Instant, sleep_until},
};
use tracing::debug;
use uuid::Uuid;

const PENDING: u8 = 0;
const FIRED: u8 = 1;
const CANCELLED: u8 = 2;

/// Callback run once when a question timer expires.
pub type ExpiryCallback = Box<dyn FnOnce() -> BoxFuture<'static, ()> + Send>;

/// Shared firing state of a single timer. Whoever wins the swap out of
/// `PENDING` decides the outcome, so fire and cancel never both happen.
struct TimerState {
    status: AtomicU8,
    wake: Notify,
}

impl TimerState {
    fn new() -> Self {
        Self {
            status: AtomicU8::new(PENDING),
            wake: Notify::new(),
        }
    }

    fn claim(&self, outcome: u8) -> bool {
        self.status
            .compare_exchange(PENDING, outcome, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

/// Handle returned by [`TimerManager::create_timer`]; cancelling it is
/// idempotent and a no-op after expiry.
#[derive(Clone)]
pub struct TimerHandle {
    session_id: Uuid,
    question_id: Uuid,
    generation: u64,
    state: Arc<TimerState>,
}

impl TimerHandle {
    /// Session the timer belongs to.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Question the timer counts down.
    pub fn question_id(&self) -> Uuid {
        self.question_id
    }

    /// Whether the expiry callback has been (or is being) run.
    pub fn has_fired(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == FIRED
    }

    /// Whether the timer was cancelled before it fired.
    pub fn is_cancelled(&self) -> bool {
        self.state.status.load(Ordering::Acquire) == CANCELLED
    }
}

struct TimerEntry {
    generation: u64,
    state: Arc<TimerState>,
}

/// Per-(session, question) countdowns with exactly-once expiry.
#[derive(Default)]
pub struct TimerManager {
    timers: Arc<DashMap<(Uuid, Uuid), TimerEntry>>,
    generation: AtomicU64,
}

impl TimerManager {
    /// Create an empty manager.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `on_expire` to run once after `time_limit`.
    ///
    /// An existing timer for the same session and question is cancelled
    /// first; it will not fire.
    pub fn create_timer(
        &self,
        session_id: Uuid,
        question_id: Uuid,
        time_limit: Duration,
        on_expire: ExpiryCallback,
    ) -> TimerHandle {
        let key = (session_id, question_id);
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let state = Arc::new(TimerState::new());

        let previous = self.timers.insert(
            key,
            TimerEntry {
                generation,
                state: state.clone(),
            },
        );
        if let Some(previous) = previous {
            if previous.state.claim(CANCELLED) {
                previous.state.wake.notify_one();
                debug!(%session_id, %question_id, "replaced live question timer");
            }
        }

        let deadline = Instant::now() + time_limit;
        let timers = self.timers.clone();
        let task_state = state.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = sleep_until(deadline) => {}
                _ = task_state.wake.notified() => {}
            }

            timers.remove_if(&key, |_, entry| entry.generation == generation);
            if task_state.claim(FIRED) {
                debug!(%session_id, %question_id, "question timer expired");
                on_expire().await;
            }
        });

        TimerHandle {
            session_id,
            question_id,
            generation,
            state,
        }
    }

    /// Cancel a timer. Returns `true` only when this call prevented the expiry.
    pub fn cancel(&self, handle: &TimerHandle) -> bool {
        let cancelled = handle.state.claim(CANCELLED);
        if cancelled {
            handle.state.wake.notify_one();
        }
        self.timers.remove_if(&(handle.session_id, handle.question_id), |_, entry| {
            entry.generation == handle.generation
        });
        cancelled
    }

    /// Cancel whichever timer is live for the given session and question.
    pub fn cancel_for(&self, session_id: Uuid, question_id: Uuid) -> bool {
        let Some((_, entry)) = self.timers.remove(&(session_id, question_id)) else {
            return false;
        };
        let cancelled = entry.state.claim(CANCELLED);
        if cancelled {
            entry.state.wake.notify_one();
        }
        cancelled
    }

    /// Cancel every live timer of a session.
    pub fn cancel_session(&self, session_id: Uuid) -> usize {
        let keys: Vec<_> = self
            .timers
            .iter()
            .filter(|entry| entry.key().0 == session_id)
            .map(|entry| *entry.key())
            .collect();
        keys.into_iter()
            .filter(|(session, question)| self.cancel_for(*session, *question))
            .count()
    }

    /// Whether a timer is pending for the given session and question.
    pub fn is_active(&self, session_id: Uuid, question_id: Uuid) -> bool {
        self.timers
            .get(&(session_id, question_id))
            .is_some_and(|entry| entry.state.status.load(Ordering::Acquire) == PENDING)
    }

    /// Number of pending timers.
    pub fn active_count(&self) -> usize {
        self.timers.len()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    fn counting_callback(counter: &Arc<AtomicUsize>) -> ExpiryCallback {
        let counter = counter.clone();
        Box::new(move || {
            Box::pin(async move {
                counter.fetch_add(1, Ordering::SeqCst);
            })
        })
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test(start_paused = true)]
    async fn fires_once_after_deadline() {
        let manager = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = manager.create_timer(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Duration::from_secs(30),
            counting_callback(&fired),
        );

        tokio::time::advance(Duration::from_secs(29)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(handle.has_fired());
        assert_eq!(manager.active_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_prevents_expiry_and_is_idempotent() {
        let manager = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let (session_id, question_id) = (Uuid::new_v4(), Uuid::new_v4());
        let handle = manager.create_timer(
            session_id,
            question_id,
            Duration::from_secs(5),
            counting_callback(&fired),
        );

        assert!(manager.is_active(session_id, question_id));
        assert!(manager.cancel(&handle));
        assert!(!manager.is_active(session_id, question_id));
        assert!(!manager.cancel(&handle));
        tokio::time::advance(Duration::from_secs(10)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(handle.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_after_fire_is_a_noop() {
        let manager = TimerManager::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let handle = manager.create_timer(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Duration::from_secs(1),
            counting_callback(&fired),
        );

        tokio::time::advance(Duration::from_secs(2)).await;
        settle().await;
        assert!(!manager.cancel(&handle));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn replacing_a_timer_never_double_fires() {
        let manager = TimerManager::new();
        let (session, question) = (Uuid::new_v4(), Uuid::new_v4());
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let old = manager.create_timer(
            session,
            question,
            Duration::from_secs(5),
            counting_callback(&first),
        );
        manager.create_timer(
            session,
            question,
            Duration::from_secs(10),
            counting_callback(&second),
        );
        assert_eq!(manager.active_count(), 1);

        tokio::time::advance(Duration::from_secs(11)).await;
        settle().await;
        assert!(old.is_cancelled());
        assert_eq!(first.load(Ordering::SeqCst), 0);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_session_only_touches_that_session() {
        let manager = TimerManager::new();
        let (session, other) = (Uuid::new_v4(), Uuid::new_v4());
        let fired = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            manager.create_timer(
                session,
                Uuid::new_v4(),
                Duration::from_secs(3),
                counting_callback(&fired),
            );
        }
        manager.create_timer(
            other,
            Uuid::new_v4(),
            Duration::from_secs(3),
            counting_callback(&fired),
        );

        assert_eq!(manager.cancel_session(session), 2);
        tokio::time::advance(Duration::from_secs(4)).await;
        settle().await;
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }
}
