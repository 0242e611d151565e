// Client binding for the hello service.
//
// `HelloService` implements `ServiceBinding`: two methods, so two conduits
// (`HelloConduits` on the main thread, `HelloServiceWorker` holding the far
// ends on the worker thread). Each worker pass offers one request per method
// to the shared `CallExecutor`, so a burst of `hello` calls cannot starve
// `server_time`.
//
// `HelloServiceClient` wraps `RpcClient<HelloService>` with the per-method
// call surfaces (`hello`, `server_time`). Responses come out of `update()` as
// `HelloEvent`s.

use grove_rpc_client::channel::Channel;
use grove_rpc_client::connect::establish_channel;
use grove_rpc_client::{
    CallContext, CallExecutor, CallResult, ChannelCredentials, ClientEvent, ClientId,
    ClientTimings, ConnectError, RequestWithContext, RequestsEnd, ResponsesEnd, RpcClient,
    ServiceBinding, ServiceWorker, StartupConfig, StopOutcome, WorkerLifecycle, WorkerState,
    conduit, pump_method,
};

use crate::messages::{
    HELLO_METHOD, HelloRequest, HelloResponse, SERVER_TIME_METHOD, ServerTimeRequest,
    ServerTimeResponse,
};

type HelloCall = RequestWithContext<HelloRequest>;
type HelloResult = CallResult<HelloResponse>;
type ServerTimeCall = RequestWithContext<ServerTimeRequest>;
type ServerTimeResult = CallResult<ServerTimeResponse>;

/// One completed hello-service call.
#[derive(Clone, Debug, PartialEq)]
pub enum HelloEvent {
    Hello(HelloResult),
    ServerTime(ServerTimeResult),
}

pub struct HelloConduits {
    hello: RequestsEnd<HelloCall, HelloResult>,
    server_time: RequestsEnd<ServerTimeCall, ServerTimeResult>,
}

pub struct HelloServiceWorker {
    hello: ResponsesEnd<HelloCall, HelloResult>,
    server_time: ResponsesEnd<ServerTimeCall, ServerTimeResult>,
    executor: CallExecutor,
}

impl ServiceWorker for HelloServiceWorker {
    type Connection = Channel;

    fn acquire_producers(&mut self) {
        self.hello.acquire_producer();
        self.server_time.acquire_producer();
    }

    fn establish_connection(
        &mut self,
        config: &StartupConfig,
        lifecycle: &WorkerLifecycle,
    ) -> Result<Channel, ConnectError> {
        establish_channel(config, lifecycle)
    }

    fn pump_once(&mut self, channel: &mut Channel, lifecycle: &WorkerLifecycle) -> usize {
        pump_method(
            &self.hello,
            HELLO_METHOD,
            channel,
            &self.executor,
            lifecycle,
        ) + pump_method(
            &self.server_time,
            SERVER_TIME_METHOD,
            channel,
            &self.executor,
            lifecycle,
        )
    }

    fn close(&mut self, mut channel: Channel) {
        channel.shutdown();
    }
}

/// Marker type binding the hello service into `RpcClient`.
pub struct HelloService;

impl ServiceBinding for HelloService {
    type Conduits = HelloConduits;
    type Worker = HelloServiceWorker;
    type Event = HelloEvent;

    const SERVICE_NAME: &'static str = "hello";

    fn open(timings: ClientTimings) -> (HelloConduits, HelloServiceWorker) {
        let (hello, hello_far) = conduit();
        let (server_time, server_time_far) = conduit();
        (
            HelloConduits { hello, server_time },
            HelloServiceWorker {
                hello: hello_far,
                server_time: server_time_far,
                executor: CallExecutor::new(timings),
            },
        )
    }

    fn acquire_producers(conduits: &HelloConduits) {
        conduits.hello.acquire_producer();
        conduits.server_time.acquire_producer();
    }

    fn drain(conduits: &HelloConduits, dispatch: &mut dyn FnMut(HelloEvent)) {
        while let Some(result) = conduits.hello.dequeue() {
            dispatch(HelloEvent::Hello(result));
        }
        while let Some(result) = conduits.server_time.dequeue() {
            dispatch(HelloEvent::ServerTime(result));
        }
    }
}

/// Main-thread client for the hello service.
#[derive(Debug, Default)]
pub struct HelloServiceClient {
    inner: RpcClient<HelloService>,
}

impl HelloServiceClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timings(timings: ClientTimings) -> Self {
        Self {
            inner: RpcClient::with_timings(timings),
        }
    }

    /// Construct and start in one step.
    pub fn create(endpoint: impl Into<String>, credentials: ChannelCredentials) -> Self {
        Self {
            inner: RpcClient::create(endpoint, credentials),
        }
    }

    pub fn init(&mut self, endpoint: impl Into<String>, credentials: ChannelCredentials) -> bool {
        self.inner.init(endpoint, credentials)
    }

    pub fn hello(&self, request: HelloRequest, context: CallContext) -> bool {
        self.inner.call(|c| &c.hello, request, context)
    }

    pub fn server_time(&self, request: ServerTimeRequest, context: CallContext) -> bool {
        self.inner.call(|c| &c.server_time, request, context)
    }

    pub fn update(&self, listener: impl FnMut(ClientId, ClientEvent<HelloEvent>)) {
        self.inner.update(listener);
    }

    pub fn stop(&self, synchronous: bool) -> StopOutcome {
        self.inner.stop(synchronous)
    }

    pub fn can_send_requests(&self) -> bool {
        self.inner.can_send_requests()
    }

    pub fn client_id(&self) -> ClientId {
        self.inner.client_id()
    }

    pub fn worker_state(&self) -> WorkerState {
        self.inner.worker_state()
    }
}
