// RPC call executor: run one unary call to completion on the worker thread.
//
// `CallExecutor::execute` is the only place the worker blocks on the network.
// The sequence for one call:
// 1. Turn the `CallContext` into wire options (metadata filtering, deadline
//    budget, authority, compression, flags).
// 2. Serialize the request. Payloads are JSON.
// 3. Make sure the channel is Ready. With `wait_for_ready` the executor keeps
//    reconnecting in `connect_poll` slices until the deadline or a stop;
//    without it, one reconnect attempt is allowed to finish and the call
//    then fails fast with Unavailable.
// 4. Send the call and wait for the reply in `call_wait_slice` slices. After
//    each empty slice, if shutdown is pending, a `Cancel` is sent; if a second
//    slice passes with no answer, the call completes locally as Cancelled.
//    Either the server's own completion or the cancellation is accepted.
// 5. Pass the status through value-for-value and decode the payload. A
//    non-Ok status yields the response type's default value.
//
// Deadlines are also enforced locally: past the deadline the executor sends
// `Cancel` and completes the call as DeadlineExceeded. Calls are never retried.
//
// `pump_method` connects one method's conduit to the executor: at most one
// request per pass, so methods sharing a worker take turns.

use std::time::{Duration, Instant};

use grove_rpc_protocol::{RpcStatus, StatusCode};
use log::{debug, trace, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::channel::{Channel, ConnectivityState, Reply};
use crate::conduit::ResponsesEnd;
use crate::config::ClientTimings;
use crate::context::CallContext;
use crate::lifecycle::WorkerLifecycle;

/// A response payload paired with its status.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CallResult<T> {
    pub response: T,
    pub status: RpcStatus,
}

impl<T: Default> CallResult<T> {
    pub fn ok(response: T) -> Self {
        Self {
            response,
            status: RpcStatus::ok(),
        }
    }

    pub fn failed(code: StatusCode, message: impl Into<String>) -> Self {
        Self {
            response: T::default(),
            status: RpcStatus::new(code, message),
        }
    }
}

/// What the facade enqueues for one call.
#[derive(Debug)]
pub struct RequestWithContext<T> {
    pub request: T,
    pub context: CallContext,
}

#[derive(Clone, Copy, Debug)]
pub struct CallExecutor {
    timings: ClientTimings,
}

impl CallExecutor {
    pub fn new(timings: ClientTimings) -> Self {
        Self { timings }
    }

    pub fn execute<Req, Resp>(
        &self,
        channel: &mut Channel,
        method: &str,
        request: &Req,
        context: CallContext,
        lifecycle: &WorkerLifecycle,
    ) -> CallResult<Resp>
    where
        Req: Serialize,
        Resp: DeserializeOwned + Default,
    {
        let deadline = context.deadline;
        let wait_for_ready = context.wait_for_ready();
        let options = context.into_options(Instant::now());

        let payload = match serde_json::to_vec(request) {
            Ok(payload) => payload,
            Err(e) => {
                return CallResult::failed(
                    StatusCode::Internal,
                    format!("failed to encode request: {e}"),
                );
            }
        };

        if let Err(status) = self.ensure_ready(channel, wait_for_ready, deadline, lifecycle) {
            return CallResult {
                response: Resp::default(),
                status,
            };
        }

        let call_id = match channel.start_call(method, payload, options) {
            Ok(call_id) => call_id,
            Err(e) => {
                return CallResult::failed(StatusCode::Unavailable, format!("send failed: {e}"));
            }
        };

        let mut cancel_sent = false;
        loop {
            let mut slice = self.timings.call_wait_slice;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    if let Err(e) = channel.cancel(call_id) {
                        debug!("executor: cancel of {method} {call_id} not sent: {e}");
                    }
                    return CallResult::failed(StatusCode::DeadlineExceeded, "deadline exceeded");
                }
                slice = slice.min(remaining);
            }

            match channel.poll_reply(call_id, slice) {
                Ok(Some(reply)) => return decode_reply(method, reply),
                Ok(None) => {
                    if !lifecycle.is_pending_stopped() {
                        continue;
                    }
                    if cancel_sent {
                        return CallResult::failed(
                            StatusCode::Cancelled,
                            "call cancelled by client shutdown",
                        );
                    }
                    debug!("executor: cancelling {method} {call_id} for shutdown");
                    if let Err(e) = channel.cancel(call_id) {
                        debug!("executor: cancel of {method} {call_id} not sent: {e}");
                    }
                    cancel_sent = true;
                }
                Err(e) => {
                    return CallResult::failed(StatusCode::Unavailable, e.to_string());
                }
            }
        }
    }

    /// Bring the channel to Ready within the call's limits.
    ///
    /// Without `wait_for_ready`, only the first attempt counts: once it has
    /// failed (or `connect_timeout` has passed) the call is Unavailable.
    fn ensure_ready(
        &self,
        channel: &mut Channel,
        wait_for_ready: bool,
        deadline: Option<Instant>,
        lifecycle: &WorkerLifecycle,
    ) -> Result<(), RpcStatus> {
        let started = Instant::now();
        let mut state = channel.state();
        let mut attempted = false;
        while !channel.is_ready() {
            if lifecycle.is_pending_stopped() {
                return Err(RpcStatus::new(
                    StatusCode::Cancelled,
                    "client shut down while waiting for the channel",
                ));
            }
            let gave_up = (attempted && state == ConnectivityState::TransientFailure)
                || started.elapsed() >= self.timings.connect_timeout;
            if !wait_for_ready && gave_up {
                return Err(RpcStatus::new(
                    StatusCode::Unavailable,
                    format!(
                        "channel not ready: {}",
                        channel.last_failure().unwrap_or("not connected")
                    ),
                ));
            }
            let mut slice: Duration = self.timings.connect_poll;
            if let Some(deadline) = deadline {
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return Err(RpcStatus::new(
                        StatusCode::DeadlineExceeded,
                        "deadline exceeded while waiting for the channel",
                    ));
                }
                slice = slice.min(remaining);
            }
            state = channel.wait_for_state_change(state, slice);
            attempted = true;
        }
        Ok(())
    }
}

fn decode_reply<Resp>(method: &str, reply: Reply) -> CallResult<Resp>
where
    Resp: DeserializeOwned + Default,
{
    if !reply.status.is_ok() {
        trace!("executor: {method} finished with {}", reply.status);
        return CallResult {
            response: Resp::default(),
            status: reply.status,
        };
    }
    match serde_json::from_slice(&reply.payload) {
        Ok(response) => CallResult {
            response,
            status: reply.status,
        },
        Err(e) => {
            warn!("executor: undecodable {method} response: {e}");
            CallResult::failed(
                StatusCode::Internal,
                format!("failed to decode response: {e}"),
            )
        }
    }
}

/// Handle at most one pending request on `end`. Returns how many were handled.
///
/// Nothing is dequeued once shutdown is pending.
pub fn pump_method<Req, Resp>(
    end: &ResponsesEnd<RequestWithContext<Req>, CallResult<Resp>>,
    method: &str,
    channel: &mut Channel,
    executor: &CallExecutor,
    lifecycle: &WorkerLifecycle,
) -> usize
where
    Req: Serialize,
    Resp: DeserializeOwned + Default,
{
    if lifecycle.is_pending_stopped() || end.is_empty() {
        return 0;
    }
    let Some(RequestWithContext { request, context }) = end.dequeue() else {
        return 0;
    };
    let result = executor.execute(channel, method, &request, context, lifecycle);
    end.enqueue(result);
    1
}
