// Generic worker driver and the out-of-band error channel.
//
// A service plugs into the driver by implementing `ServiceWorker`:
// - `acquire_producers()` binds the worker ends of the service's conduits to
//   the worker thread (called first, on that thread);
// - `establish_connection()` produces the service's connection, once;
// - `pump_once()` makes one non-blocking pass over every method and reports
//   how many requests it handled.
//
// `run_worker()` is the worker thread's entry point:
// 1. PendingInitialization -> Initializing, or return `Preempted` if a stop
//    got there first (the state is left as the stopper set it).
// 2. Establish the connection. On failure send one "Connection failure"
//    `RpcError` and return `ConnectionFailed`; the state stays Initializing.
// 3. Initializing -> Working (a concurrent stop makes this fail harmlessly).
// 4. While Working: pump; after a pass with no work, wait on the doorbell for
//    at most `idle_wait`.
// 5. Shutdown, unconditionally.
//
// Errors travel to the facade over an mpsc channel (`ErrorSink` on the worker,
// the receiver on the facade); the facade dispatches them ahead of responses.

use std::fmt;
use std::sync::Arc;
use std::sync::mpsc::{self, Receiver, Sender};

use log::{debug, error, info};

use crate::config::StartupConfig;
use crate::error::ConnectError;
use crate::lifecycle::WorkerLifecycle;

/// Prefix of the error reported when the connection cannot be established.
pub const CONNECTION_FAILURE: &str = "Connection failure";

/// An out-of-band failure, dispatched to the application on the next tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    pub message: String,
}

impl RpcError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn connection_failure(cause: &ConnectError) -> Self {
        Self::new(format!("{CONNECTION_FAILURE}: {cause}"))
    }
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Worker-side handle of the error channel.
#[derive(Debug)]
pub struct ErrorSink {
    tx: Sender<RpcError>,
}

impl ErrorSink {
    pub fn report(&self, error: RpcError) {
        error!("worker: {error}");
        if self.tx.send(error).is_err() {
            debug!("worker: error dropped, facade is gone");
        }
    }
}

/// Create the worker-to-facade error channel.
pub fn error_channel() -> (ErrorSink, Receiver<RpcError>) {
    let (tx, rx) = mpsc::channel();
    (ErrorSink { tx }, rx)
}

/// How a worker thread ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunOutcome {
    /// Ran until stopped.
    Completed,
    /// A stop arrived before the worker started connecting, or while it was
    /// connecting.
    Preempted,
    /// The connection could not be established.
    ConnectionFailed,
}

/// Per-service capabilities injected into `run_worker`.
pub trait ServiceWorker: Send + 'static {
    type Connection;

    /// Bind every worker-side conduit end to the current thread.
    fn acquire_producers(&mut self);

    fn establish_connection(
        &mut self,
        config: &StartupConfig,
        lifecycle: &WorkerLifecycle,
    ) -> Result<Self::Connection, ConnectError>;

    /// One pass over every method. Must not block except inside a call.
    fn pump_once(&mut self, connection: &mut Self::Connection, lifecycle: &WorkerLifecycle)
    -> usize;

    /// Called once after the pump loop exits.
    fn close(&mut self, _connection: Self::Connection) {}
}

pub fn run_worker<W: ServiceWorker>(
    mut worker: W,
    config: Arc<StartupConfig>,
    lifecycle: Arc<WorkerLifecycle>,
    errors: ErrorSink,
) -> RunOutcome {
    worker.acquire_producers();

    if let Err(state) = lifecycle.begin_initialization() {
        info!("worker: not starting, state is already {state:?}");
        // Never reaches Shutdown from here; `stop(true)` must not wait for it.
        return RunOutcome::Preempted;
    }

    let mut connection = match worker.establish_connection(&config, &lifecycle) {
        Ok(connection) => connection,
        Err(ConnectError::Cancelled) => {
            info!("worker: stopped while connecting to {}", config.endpoint);
            // Never reaches Shutdown from here; `stop(true)` must not wait for it.
            return RunOutcome::Preempted;
        }
        Err(e) => {
            errors.report(RpcError::connection_failure(&e));
            // Never reaches Shutdown from here; `stop(true)` must not wait for it.
            return RunOutcome::ConnectionFailed;
        }
    };

    if let Err(state) = lifecycle.begin_working() {
        debug!("worker: connected but state moved to {state:?}");
    }

    let idle_wait = config.timings.idle_wait;
    while lifecycle.is_working() {
        let handled = worker.pump_once(&mut connection, &lifecycle);
        if handled == 0 {
            lifecycle.doorbell().wait(idle_wait);
        }
    }

    worker.close(connection);
    lifecycle.finish();
    info!("worker: {} shut down", config.endpoint);
    RunOutcome::Completed
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;
    use std::time::Duration;

    use super::*;
    use crate::credentials::ChannelCredentials;
    use crate::lifecycle::WorkerState;

    /// Counts passes; fails to connect when told to.
    struct FakeWorker {
        fail: bool,
        cancelled: bool,
        passes: Arc<AtomicUsize>,
        acquired: bool,
    }

    impl ServiceWorker for FakeWorker {
        type Connection = ();

        fn acquire_producers(&mut self) {
            self.acquired = true;
        }

        fn establish_connection(
            &mut self,
            config: &StartupConfig,
            _lifecycle: &WorkerLifecycle,
        ) -> Result<(), ConnectError> {
            assert!(self.acquired, "producers are acquired before connecting");
            if self.cancelled {
                return Err(ConnectError::Cancelled);
            }
            if self.fail {
                return Err(ConnectError::Timeout {
                    endpoint: config.endpoint.clone(),
                    waited_ms: 3000,
                    last_failure: "refused".into(),
                });
            }
            Ok(())
        }

        fn pump_once(&mut self, _connection: &mut (), _lifecycle: &WorkerLifecycle) -> usize {
            self.passes.fetch_add(1, Ordering::SeqCst);
            0
        }
    }

    fn fake(fail: bool) -> (FakeWorker, Arc<AtomicUsize>) {
        let passes = Arc::new(AtomicUsize::new(0));
        let worker = FakeWorker {
            fail,
            cancelled: false,
            passes: Arc::clone(&passes),
            acquired: false,
        };
        (worker, passes)
    }

    fn config() -> Arc<StartupConfig> {
        StartupConfig::new("127.0.0.1:50051", ChannelCredentials::insecure())
    }

    #[test]
    fn connection_failure_is_reported_once() {
        let (worker, passes) = fake(true);
        let life = Arc::new(WorkerLifecycle::new());
        let (sink, source) = error_channel();
        let outcome = run_worker(worker, config(), Arc::clone(&life), sink);
        assert_eq!(outcome, RunOutcome::ConnectionFailed);
        assert_eq!(life.state(), WorkerState::Initializing);
        assert_eq!(passes.load(Ordering::SeqCst), 0);

        let error = source.try_recv().unwrap();
        assert!(error.message.starts_with(CONNECTION_FAILURE), "{error}");
        assert!(source.try_recv().is_err());
    }

    #[test]
    fn stop_before_start_preempts() {
        let (worker, _) = fake(false);
        let life = Arc::new(WorkerLifecycle::new());
        life.mark_pending_stopped();
        let (sink, _source) = error_channel();
        assert_eq!(
            run_worker(worker, config(), Arc::clone(&life), sink),
            RunOutcome::Preempted
        );
        assert_eq!(life.state(), WorkerState::PendingShutdown);
    }

    #[test]
    fn runs_until_stopped_then_shuts_down() {
        let (worker, passes) = fake(false);
        let life = Arc::new(WorkerLifecycle::new());
        let (sink, _source) = error_channel();
        let thread_life = Arc::clone(&life);
        let handle = thread::spawn(move || run_worker(worker, config(), thread_life, sink));

        while passes.load(Ordering::SeqCst) < 2 {
            thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(life.state(), WorkerState::Working);
        life.mark_pending_stopped();
        assert_eq!(handle.join().unwrap(), RunOutcome::Completed);
        assert_eq!(life.state(), WorkerState::Shutdown);
    }

    #[test]
    fn stop_while_connecting_preempts_without_shutdown() {
        let (mut worker, passes) = fake(false);
        worker.cancelled = true;
        let life = Arc::new(WorkerLifecycle::new());
        let (sink, source) = error_channel();
        assert_eq!(
            run_worker(worker, config(), Arc::clone(&life), sink),
            RunOutcome::Preempted
        );
        assert_eq!(life.state(), WorkerState::Initializing);
        assert_eq!(passes.load(Ordering::SeqCst), 0);
        assert!(source.try_recv().is_err());
    }
}
