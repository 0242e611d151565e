// Worker lifecycle state machine.
//
// One `WorkerLifecycle` is shared (via `Arc`) between a facade and its worker
// thread. The state only ever moves forward:
//
//   PendingInitialization -> Initializing -> Working -> Shutdown
//            \                     \            \
//             +---------------------+------------+--> PendingShutdown -> Shutdown
//
// Every transition is a single compare-exchange on an `AtomicU8`, so a stop
// racing with startup resolves cleanly: whichever side moves the state first
// wins, and the loser's CAS fails without side effects. The state is the only
// atomic the facade and worker share; everything else crosses threads through
// conduits or the error channel.
//
// The lifecycle also owns the worker's `Doorbell`. An idle worker parks on it
// for at most `ClientTimings::idle_wait`; the facade rings it on every call
// and on stop so new work and shutdown are noticed without waiting out the
// full interval.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

use log::{debug, error};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WorkerState {
    PendingInitialization = 0,
    Initializing = 1,
    Working = 2,
    PendingShutdown = 3,
    Shutdown = 4,
}

impl WorkerState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => WorkerState::PendingInitialization,
            1 => WorkerState::Initializing,
            2 => WorkerState::Working,
            3 => WorkerState::PendingShutdown,
            _ => WorkerState::Shutdown,
        }
    }

    /// States from which a stop request is accepted.
    pub fn accepts_stop(self) -> bool {
        matches!(
            self,
            WorkerState::PendingInitialization | WorkerState::Initializing | WorkerState::Working
        )
    }
}

/// Shared lifecycle of one worker.
#[derive(Debug)]
pub struct WorkerLifecycle {
    state: AtomicU8,
    doorbell: Doorbell,
}

impl Default for WorkerLifecycle {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerLifecycle {
    pub fn new() -> Self {
        Self {
            state: AtomicU8::new(WorkerState::PendingInitialization as u8),
            doorbell: Doorbell::default(),
        }
    }

    pub fn state(&self) -> WorkerState {
        WorkerState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn advance(&self, from: WorkerState, to: WorkerState) -> Result<(), WorkerState> {
        self.state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(WorkerState::from_u8)
    }

    /// PendingInitialization -> Initializing. On failure returns the state
    /// that was found instead.
    pub fn begin_initialization(&self) -> Result<(), WorkerState> {
        self.advance(WorkerState::PendingInitialization, WorkerState::Initializing)
    }

    /// Initializing -> Working. Fails harmlessly if a stop got there first.
    pub fn begin_working(&self) -> Result<(), WorkerState> {
        self.advance(WorkerState::Initializing, WorkerState::Working)
    }

    pub fn is_working(&self) -> bool {
        self.state() == WorkerState::Working
    }

    /// Request shutdown. Returns the state observed before the request.
    ///
    /// Only the first three states accept the request; from any other state
    /// the call is logged and leaves the state unchanged.
    pub fn mark_pending_stopped(&self) -> WorkerState {
        let result = self
            .state
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |raw| {
                WorkerState::from_u8(raw)
                    .accepts_stop()
                    .then_some(WorkerState::PendingShutdown as u8)
            });
        self.doorbell.ring();
        match result {
            Ok(prior) => {
                let prior = WorkerState::from_u8(prior);
                debug!("worker: stop requested while {prior:?}");
                prior
            }
            Err(current) => {
                let current = WorkerState::from_u8(current);
                error!("worker: stop requested while already {current:?}; ignoring");
                current
            }
        }
    }

    pub fn is_pending_stopped(&self) -> bool {
        self.state() == WorkerState::PendingShutdown
    }

    /// Terminal transition, taken by the worker thread on exit.
    pub fn finish(&self) {
        self.state
            .store(WorkerState::Shutdown as u8, Ordering::Release);
        self.doorbell.ring();
    }

    pub fn is_shut_down(&self) -> bool {
        self.state() == WorkerState::Shutdown
    }

    pub fn doorbell(&self) -> &Doorbell {
        &self.doorbell
    }
}

/// A latched wakeup: `ring` sets it, `wait` consumes it or times out.
#[derive(Debug, Default)]
pub struct Doorbell {
    rung: Mutex<bool>,
    cond: Condvar,
}

impl Doorbell {
    pub fn ring(&self) {
        let mut rung = self.rung.lock().unwrap_or_else(PoisonError::into_inner);
        *rung = true;
        self.cond.notify_all();
    }

    /// Wait until rung or `timeout` elapses. Returns whether it was rung.
    pub fn wait(&self, timeout: Duration) -> bool {
        let guard = self.rung.lock().unwrap_or_else(PoisonError::into_inner);
        let (mut rung, _) = self
            .cond
            .wait_timeout_while(guard, timeout, |rung| !*rung)
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *rung, false)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    use super::*;

    #[test]
    fn forward_sequence() {
        let life = WorkerLifecycle::new();
        assert_eq!(life.state(), WorkerState::PendingInitialization);
        life.begin_initialization().unwrap();
        assert_eq!(life.state(), WorkerState::Initializing);
        life.begin_working().unwrap();
        assert!(life.is_working());
        assert_eq!(life.mark_pending_stopped(), WorkerState::Working);
        assert!(life.is_pending_stopped());
        life.finish();
        assert!(life.is_shut_down());
    }

    #[test]
    fn transitions_never_go_backward() {
        let life = WorkerLifecycle::new();
        life.begin_initialization().unwrap();
        assert_eq!(
            life.begin_initialization(),
            Err(WorkerState::Initializing)
        );
        life.begin_working().unwrap();
        assert_eq!(life.begin_working(), Err(WorkerState::Working));
        life.finish();
        // A stop after shutdown must not resurrect PendingShutdown.
        assert_eq!(life.mark_pending_stopped(), WorkerState::Shutdown);
        assert_eq!(life.state(), WorkerState::Shutdown);
    }

    #[test]
    fn stop_preempts_startup() {
        let life = WorkerLifecycle::new();
        life.mark_pending_stopped();
        assert_eq!(
            life.begin_initialization(),
            Err(WorkerState::PendingShutdown)
        );

        let life = WorkerLifecycle::new();
        life.begin_initialization().unwrap();
        life.mark_pending_stopped();
        assert_eq!(life.begin_working(), Err(WorkerState::PendingShutdown));
    }

    #[test]
    fn double_stop_is_harmless() {
        let life = WorkerLifecycle::new();
        assert_eq!(
            life.mark_pending_stopped(),
            WorkerState::PendingInitialization
        );
        assert_eq!(life.mark_pending_stopped(), WorkerState::PendingShutdown);
        assert!(life.is_pending_stopped());
    }

    #[test]
    fn doorbell_times_out_when_not_rung() {
        let bell = Doorbell::default();
        let start = Instant::now();
        assert!(!bell.wait(Duration::from_millis(30)));
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn doorbell_latches_and_wakes() {
        let bell = Arc::new(Doorbell::default());
        bell.ring();
        assert!(bell.wait(Duration::from_secs(5)));
        // Consumed.
        assert!(!bell.wait(Duration::from_millis(1)));

        let ringer = Arc::clone(&bell);
        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            ringer.ring();
        });
        let start = Instant::now();
        assert!(bell.wait(Duration::from_secs(5)));
        assert!(start.elapsed() < Duration::from_secs(4));
        handle.join().unwrap();
    }
}
