// Main-thread facade for one RPC service client.
//
// `RpcClient<B>` is owned by the engine's main thread and never blocks it.
// It owns the main-thread end of one conduit per RPC method (bundled in the
// binding's `Conduits`), the receiving side of the error channel, and the
// worker thread's join handle.
//
// Lifecycle:
// - `init(endpoint, credentials)` validates the endpoint (logging, never
//   failing), builds the immutable `StartupConfig`, opens the conduits, and
//   spawns the worker thread running `run_worker`. A second `init` is a
//   logged no-op that returns the current sendability.
// - `call(...)` enqueues a request on one method's conduit and rings the
//   worker's doorbell. Returns `false` only when sends are disabled.
// - `update(listener)` is called once per frame. If an error is pending,
//   exactly one error is dispatched and responses wait for the next tick;
//   otherwise every method's responses are drained in arrival order.
// - `stop(synchronous)` takes the join handle under a lock, so at most one
//   caller actually stops the worker. Asynchronous stop detaches the thread:
//   the worker may still be finishing a call after `stop` returns.
// - Dropping a running client stops it synchronously.
//
// Per-service code implements `ServiceBinding` (see the hello service crate)
// to say which conduits exist, how to build the worker, and how to turn
// drained responses into events.

use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc::Receiver;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

use log::{debug, error, info, warn};

use crate::conduit::RequestsEnd;
use crate::config::{ClientTimings, StartupConfig};
use crate::context::CallContext;
use crate::credentials::ChannelCredentials;
use crate::endpoint;
use crate::executor::{CallResult, RequestWithContext};
use crate::lifecycle::{WorkerLifecycle, WorkerState};
use crate::worker::{RpcError, RunOutcome, ServiceWorker, error_channel, run_worker};

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

/// Identity of one facade, passed to every dispatched event.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u64);

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "client-{}", self.0)
    }
}

/// What `update()` hands to the listener.
#[derive(Clone, Debug, PartialEq)]
pub enum ClientEvent<E> {
    Response(E),
    Error(RpcError),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopOutcome {
    /// The worker was stopped and joined.
    Stopped,
    /// The worker was told to stop and left to finish on its own.
    Detached,
    /// Nothing to stop: never started, or stopped earlier.
    AlreadyStopped,
}

/// The service-specific half of a client.
pub trait ServiceBinding: 'static {
    /// Main-thread conduit ends, one per method.
    type Conduits;
    type Worker: ServiceWorker;
    /// One dispatched response.
    type Event;

    /// Name used in thread names and logs.
    const SERVICE_NAME: &'static str;

    /// Create every conduit and the worker that holds their far ends.
    fn open(timings: ClientTimings) -> (Self::Conduits, Self::Worker);

    /// Bind every main-thread end to the current thread.
    fn acquire_producers(conduits: &Self::Conduits);

    /// Dequeue all pending responses, method by method.
    fn drain(conduits: &Self::Conduits, dispatch: &mut dyn FnMut(Self::Event));
}

pub struct RpcClient<B: ServiceBinding> {
    id: ClientId,
    timings: ClientTimings,
    lifecycle: Arc<WorkerLifecycle>,
    conduits: Option<B::Conduits>,
    errors: Option<Receiver<RpcError>>,
    worker: Mutex<Option<JoinHandle<RunOutcome>>>,
    can_send: AtomicBool,
    started: bool,
}

impl<B: ServiceBinding> Default for RpcClient<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: ServiceBinding> RpcClient<B> {
    pub fn new() -> Self {
        Self::with_timings(ClientTimings::default())
    }

    pub fn with_timings(timings: ClientTimings) -> Self {
        Self {
            id: ClientId(NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed)),
            timings,
            lifecycle: Arc::new(WorkerLifecycle::new()),
            conduits: None,
            errors: None,
            worker: Mutex::new(None),
            can_send: AtomicBool::new(false),
            started: false,
        }
    }

    /// Construct and initialize in one step.
    pub fn create(endpoint: impl Into<String>, credentials: ChannelCredentials) -> Self {
        let mut client = Self::new();
        client.init(endpoint, credentials);
        client
    }

    pub fn client_id(&self) -> ClientId {
        self.id
    }

    pub fn worker_state(&self) -> WorkerState {
        self.lifecycle.state()
    }

    pub fn can_send_requests(&self) -> bool {
        self.can_send.load(Ordering::Acquire)
    }

    pub fn is_initialized(&self) -> bool {
        self.started
    }

    /// Start the worker. Returns whether requests can now be sent.
    pub fn init(&mut self, endpoint: impl Into<String>, credentials: ChannelCredentials) -> bool {
        if self.started {
            warn!(
                "{} {}: init called again; keeping the running worker",
                B::SERVICE_NAME,
                self.id
            );
            return self.can_send_requests();
        }
        self.started = true;

        let endpoint = endpoint.into();
        if let Err(e) = endpoint::validate(&endpoint) {
            error!("{} {}: {e}", B::SERVICE_NAME, self.id);
        }

        let config = Arc::new(StartupConfig {
            endpoint,
            credentials,
            timings: self.timings,
        });
        let (conduits, worker) = B::open(self.timings);
        B::acquire_producers(&conduits);
        let (sink, errors) = error_channel();

        let lifecycle = Arc::clone(&self.lifecycle);
        let thread_config = Arc::clone(&config);
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", B::SERVICE_NAME, self.id.0))
            .spawn(move || run_worker(worker, thread_config, lifecycle, sink));
        let handle = match spawned {
            Ok(handle) => handle,
            Err(e) => {
                error!(
                    "{} {}: failed to spawn worker thread: {e}",
                    B::SERVICE_NAME,
                    self.id
                );
                return false;
            }
        };

        info!(
            "{} {}: started worker for {} ({})",
            B::SERVICE_NAME,
            self.id,
            config.endpoint,
            config.credentials.kind()
        );
        self.conduits = Some(conduits);
        self.errors = Some(errors);
        *self.worker.lock().unwrap_or_else(PoisonError::into_inner) = Some(handle);
        self.can_send.store(true, Ordering::Release);
        true
    }

    /// Enqueue one call on the method chosen by `select`. Never blocks.
    pub fn call<Req, Resp>(
        &self,
        select: impl FnOnce(&B::Conduits) -> &RequestsEnd<RequestWithContext<Req>, CallResult<Resp>>,
        request: Req,
        context: CallContext,
    ) -> bool {
        if !self.can_send_requests() {
            debug!("{} {}: call rejected, sends disabled", B::SERVICE_NAME, self.id);
            return false;
        }
        let Some(conduits) = &self.conduits else {
            return false;
        };
        // A worker that already exited (failed connection) simply never
        // answers; the error channel says why.
        select(conduits).enqueue(RequestWithContext { request, context });
        self.lifecycle.doorbell().ring();
        true
    }

    /// Dispatch pending events. Errors take priority over responses.
    pub fn update(&self, mut listener: impl FnMut(ClientId, ClientEvent<B::Event>)) {
        let id = self.id;
        if let Some(errors) = &self.errors {
            if let Ok(error) = errors.try_recv() {
                listener(id, ClientEvent::Error(error));
                return;
            }
        }
        if let Some(conduits) = &self.conduits {
            B::drain(conduits, &mut |event| listener(id, ClientEvent::Response(event)));
        }
    }

    /// Stop the worker. Only the first caller does any work.
    pub fn stop(&self, synchronous: bool) -> StopOutcome {
        let handle = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(handle) = handle else {
            info!("{} {}: already stopped", B::SERVICE_NAME, self.id);
            return StopOutcome::AlreadyStopped;
        };

        self.lifecycle.mark_pending_stopped();
        self.can_send.store(false, Ordering::Release);

        if !synchronous {
            debug!("{} {}: worker detached", B::SERVICE_NAME, self.id);
            return StopOutcome::Detached;
        }
        match handle.join() {
            Ok(outcome) => info!("{} {}: worker finished ({outcome:?})", B::SERVICE_NAME, self.id),
            Err(_) => error!("{} {}: worker thread panicked", B::SERVICE_NAME, self.id),
        }
        StopOutcome::Stopped
    }
}

impl<B: ServiceBinding> Drop for RpcClient<B> {
    fn drop(&mut self) {
        self.stop(true);
    }
}

impl<B: ServiceBinding> fmt::Debug for RpcClient<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RpcClient")
            .field("service", &B::SERVICE_NAME)
            .field("id", &self.id)
            .field("state", &self.worker_state())
            .field("can_send", &self.can_send_requests())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, Instant};

    use grove_rpc_protocol::StatusCode;

    use super::*;
    use crate::conduit::{ResponsesEnd, conduit};
    use crate::error::ConnectError;

    // A binding whose worker "connects" to nothing and doubles numbers.
    // Endpoint "unreachable" fails the connection.
    struct Doubler;

    struct DoublerConduits {
        double: RequestsEnd<RequestWithContext<u32>, CallResult<u32>>,
    }

    struct DoublerWorker {
        double: ResponsesEnd<RequestWithContext<u32>, CallResult<u32>>,
    }

    impl ServiceWorker for DoublerWorker {
        type Connection = ();

        fn acquire_producers(&mut self) {
            self.double.acquire_producer();
        }

        fn establish_connection(
            &mut self,
            config: &StartupConfig,
            _lifecycle: &WorkerLifecycle,
        ) -> Result<(), ConnectError> {
            if config.endpoint == "unreachable" {
                return Err(ConnectError::Timeout {
                    endpoint: config.endpoint.clone(),
                    waited_ms: 0,
                    last_failure: "refused".into(),
                });
            }
            Ok(())
        }

        fn pump_once(&mut self, _: &mut (), lifecycle: &WorkerLifecycle) -> usize {
            if lifecycle.is_pending_stopped() {
                return 0;
            }
            match self.double.dequeue() {
                Some(call) => {
                    self.double.enqueue(CallResult::ok(call.request * 2));
                    1
                }
                None => 0,
            }
        }
    }

    impl ServiceBinding for Doubler {
        type Conduits = DoublerConduits;
        type Worker = DoublerWorker;
        type Event = CallResult<u32>;

        const SERVICE_NAME: &'static str = "doubler";

        fn open(_timings: ClientTimings) -> (DoublerConduits, DoublerWorker) {
            let (double, far) = conduit();
            (DoublerConduits { double }, DoublerWorker { double: far })
        }

        fn acquire_producers(conduits: &DoublerConduits) {
            conduits.double.acquire_producer();
        }

        fn drain(conduits: &DoublerConduits, dispatch: &mut dyn FnMut(CallResult<u32>)) {
            while let Some(result) = conduits.double.dequeue() {
                dispatch(result);
            }
        }
    }

    fn collect_until<B: ServiceBinding>(
        client: &RpcClient<B>,
        wanted: usize,
    ) -> Vec<ClientEvent<B::Event>> {
        let mut events = Vec::new();
        let start = Instant::now();
        while events.len() < wanted && start.elapsed() < Duration::from_secs(5) {
            client.update(|_, event| events.push(event));
            std::thread::sleep(Duration::from_millis(5));
        }
        events
    }

    #[test]
    fn responses_arrive_in_submission_order() {
        let client = RpcClient::<Doubler>::create("localhost:1", ChannelCredentials::insecure());
        for n in 0..20 {
            assert!(client.call(|c| &c.double, n, CallContext::new()));
        }
        let events = collect_until(&client, 20);
        let values: Vec<u32> = events
            .into_iter()
            .map(|event| match event {
                ClientEvent::Response(result) => result.response,
                ClientEvent::Error(e) => panic!("unexpected error {e}"),
            })
            .collect();
        assert_eq!(values, (0..20).map(|n| n * 2).collect::<Vec<_>>());
    }

    #[test]
    fn second_init_is_a_no_op() {
        let mut client = RpcClient::<Doubler>::new();
        assert!(!client.can_send_requests());
        assert!(!client.call(|c| &c.double, 1, CallContext::new()));
        assert!(client.init("localhost:1", ChannelCredentials::insecure()));
        let first = client.client_id();
        assert!(client.init("elsewhere:2", ChannelCredentials::insecure()));
        assert_eq!(client.client_id(), first);
    }

    #[test]
    fn connection_failure_is_dispatched_as_an_error() {
        let client = RpcClient::<Doubler>::create("unreachable", ChannelCredentials::insecure());
        // Still accepted; nobody will answer.
        assert!(client.call(|c| &c.double, 5, CallContext::new()));
        let events = collect_until(&client, 1);
        match &events[..] {
            [ClientEvent::Error(e)] => assert!(e.message.starts_with("Connection failure")),
            other => panic!("expected one error, got {other:?}"),
        }
        assert_eq!(client.worker_state(), WorkerState::Initializing);
    }

    #[test]
    fn errors_take_priority_over_responses() {
        let client = RpcClient::<Doubler>::create("localhost:1", ChannelCredentials::insecure());
        assert!(client.call(|c| &c.double, 4, CallContext::new()));
        // Let the response land first, then queue an error behind it.
        std::thread::sleep(Duration::from_millis(200));
        let (sink, errors) = error_channel();
        sink.report(RpcError::new("synthetic"));
        let mut client = client;
        client.errors = Some(errors);

        let mut first = Vec::new();
        client.update(|_, event| first.push(event));
        assert_eq!(first, vec![ClientEvent::Error(RpcError::new("synthetic"))]);

        let mut second = Vec::new();
        client.update(|_, event| second.push(event));
        assert_eq!(second, vec![ClientEvent::Response(CallResult::ok(8))]);
    }

    #[test]
    fn stop_twice_reports_already_stopped() {
        let client = RpcClient::<Doubler>::create("localhost:1", ChannelCredentials::insecure());
        assert_eq!(client.stop(true), StopOutcome::Stopped);
        assert!(!client.can_send_requests());
        assert_eq!(client.worker_state(), WorkerState::Shutdown);
        assert_eq!(client.stop(true), StopOutcome::AlreadyStopped);
        assert!(!client.call(|c| &c.double, 1, CallContext::new()));
    }

    #[test]
    fn asynchronous_stop_detaches() {
        let client = RpcClient::<Doubler>::create("localhost:1", ChannelCredentials::insecure());
        assert_eq!(client.stop(false), StopOutcome::Detached);
        assert_eq!(client.stop(false), StopOutcome::AlreadyStopped);
        let start = Instant::now();
        while client.worker_state() != WorkerState::Shutdown {
            assert!(start.elapsed() < Duration::from_secs(5));
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    #[test]
    fn failed_status_is_still_a_response() {
        let failed: CallResult<u32> = CallResult::failed(StatusCode::NotFound, "gone");
        assert_eq!(failed.response, 0);
        assert_eq!(failed.status.code, StatusCode::NotFound);
    }
}
