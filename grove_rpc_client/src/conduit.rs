// Bidirectional single-producer handoff between the main thread and a worker.
//
// A conduit is two FIFO queues: Requests (main -> worker) and Responses
// (worker -> main). `conduit()` returns the two ends as distinct types:
// - `RequestsEnd`: enqueues requests, dequeues responses. Lives on the main
//   thread inside the facade.
// - `ResponsesEnd`: enqueues responses, dequeues requests. Moved into the
//   worker thread.
//
// Sending in the wrong direction does not compile. Thread affinity is checked
// at runtime: each end is bound to one thread by `acquire_producer()`, once,
// and every later operation on that end must come from the bound thread.
// Unbound or foreign access panics with the expected and actual thread ids.
// These are programming errors, never runtime conditions.
//
// The queue bodies are `std::sync::mpsc` channels with exactly one sender and
// one receiver per direction. `mpsc::Receiver` has no emptiness query, so each
// direction also keeps a pending counter shared by both ends.

use std::fmt;
use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::{self, ThreadId};

use log::debug;

/// Create a connected pair of conduit ends.
///
/// The main-thread end cannot enqueue a response:
///
/// ```compile_fail
/// let (requests, _responses) = grove_rpc_client::conduit::conduit::<u32, String>();
/// requests.acquire_producer();
/// requests.enqueue(String::from("nope"));
/// ```
pub fn conduit<Req, Resp>() -> (RequestsEnd<Req, Resp>, ResponsesEnd<Req, Resp>) {
    let (request_tx, request_rx) = mpsc::channel();
    let (response_tx, response_rx) = mpsc::channel();
    let pending_requests = Arc::new(AtomicUsize::new(0));
    let pending_responses = Arc::new(AtomicUsize::new(0));

    let requests = RequestsEnd {
        role: Binding::new("requests"),
        outgoing: request_tx,
        incoming: response_rx,
        outgoing_pending: Arc::clone(&pending_requests),
        incoming_pending: Arc::clone(&pending_responses),
    };
    let responses = ResponsesEnd {
        role: Binding::new("responses"),
        outgoing: response_tx,
        incoming: request_rx,
        outgoing_pending: pending_responses,
        incoming_pending: pending_requests,
    };
    (requests, responses)
}

/// Thread identity slot for one end.
struct Binding {
    name: &'static str,
    thread: OnceLock<ThreadId>,
}

impl Binding {
    fn new(name: &'static str) -> Self {
        Self {
            name,
            thread: OnceLock::new(),
        }
    }

    fn acquire(&self) {
        let current = thread::current().id();
        if let Err(existing) = self.thread.set(current) {
            // OnceLock::set hands the rejected value back; report what is bound.
            let bound = self.thread.get().copied().unwrap_or(existing);
            panic!(
                "conduit {} producer already acquired by thread {bound:?} (attempted from {current:?})",
                self.name
            );
        }
    }

    fn check(&self, operation: &str) {
        let current = thread::current().id();
        match self.thread.get() {
            Some(bound) if *bound == current => {}
            Some(bound) => panic!(
                "conduit {} end: {operation} from thread {current:?}, but the end is bound to {bound:?}",
                self.name
            ),
            None => panic!(
                "conduit {} end: {operation} from thread {current:?} before acquire_producer()",
                self.name
            ),
        }
    }

    fn is_bound(&self) -> bool {
        self.thread.get().is_some()
    }
}

impl fmt::Debug for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Binding")
            .field("name", &self.name)
            .field("thread", &self.thread.get())
            .finish()
    }
}

fn send_counted<T>(tx: &Sender<T>, pending: &AtomicUsize, item: T) -> bool {
    pending.fetch_add(1, Ordering::AcqRel);
    if tx.send(item).is_err() {
        pending.fetch_sub(1, Ordering::AcqRel);
        return false;
    }
    true
}

fn recv_counted<T>(rx: &Receiver<T>, pending: &AtomicUsize) -> Option<T> {
    let item = rx.try_recv().ok()?;
    pending.fetch_sub(1, Ordering::AcqRel);
    Some(item)
}

/// Main-thread end: produces requests, consumes responses.
pub struct RequestsEnd<Req, Resp> {
    role: Binding,
    outgoing: Sender<Req>,
    incoming: Receiver<Resp>,
    outgoing_pending: Arc<AtomicUsize>,
    incoming_pending: Arc<AtomicUsize>,
}

impl<Req, Resp> RequestsEnd<Req, Resp> {
    /// Bind this end to the calling thread. Panics if already bound.
    pub fn acquire_producer(&self) {
        self.role.acquire();
    }

    pub fn is_bound(&self) -> bool {
        self.role.is_bound()
    }

    /// Append a request. Returns `false` if the worker end is gone.
    pub fn enqueue(&self, request: Req) -> bool {
        self.role.check("enqueue");
        let delivered = send_counted(&self.outgoing, &self.outgoing_pending, request);
        if !delivered {
            debug!("conduit: request dropped, worker end is gone");
        }
        delivered
    }

    /// Pop the oldest response, if any.
    pub fn dequeue(&self) -> Option<Resp> {
        self.role.check("dequeue");
        recv_counted(&self.incoming, &self.incoming_pending)
    }

    /// True when no responses are waiting.
    pub fn is_empty(&self) -> bool {
        self.role.check("is_empty");
        self.incoming_pending.load(Ordering::Acquire) == 0
    }
}

/// Worker-thread end: produces responses, consumes requests.
pub struct ResponsesEnd<Req, Resp> {
    role: Binding,
    outgoing: Sender<Resp>,
    incoming: Receiver<Req>,
    outgoing_pending: Arc<AtomicUsize>,
    incoming_pending: Arc<AtomicUsize>,
}

impl<Req, Resp> ResponsesEnd<Req, Resp> {
    /// Bind this end to the calling thread. Panics if already bound.
    pub fn acquire_producer(&self) {
        self.role.acquire();
    }

    pub fn is_bound(&self) -> bool {
        self.role.is_bound()
    }

    /// Append a response. Returns `false` if the main-thread end is gone.
    pub fn enqueue(&self, response: Resp) -> bool {
        self.role.check("enqueue");
        let delivered = send_counted(&self.outgoing, &self.outgoing_pending, response);
        if !delivered {
            debug!("conduit: response dropped, main-thread end is gone");
        }
        delivered
    }

    /// Pop the oldest request, if any.
    pub fn dequeue(&self) -> Option<Req> {
        self.role.check("dequeue");
        recv_counted(&self.incoming, &self.incoming_pending)
    }

    /// True when no requests are waiting.
    pub fn is_empty(&self) -> bool {
        self.role.check("is_empty");
        self.incoming_pending.load(Ordering::Acquire) == 0
    }
}

impl<Req, Resp> fmt::Debug for RequestsEnd<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestsEnd")
            .field("role", &self.role)
            .field("requests_pending", &self.outgoing_pending.load(Ordering::Relaxed))
            .field("responses_pending", &self.incoming_pending.load(Ordering::Relaxed))
            .finish()
    }
}

impl<Req, Resp> fmt::Debug for ResponsesEnd<Req, Resp> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResponsesEnd")
            .field("role", &self.role)
            .field("responses_pending", &self.outgoing_pending.load(Ordering::Relaxed))
            .field("requests_pending", &self.incoming_pending.load(Ordering::Relaxed))
            .finish()
    }
}
