//! Runs requests inline or on bounded background workers.
//!
//! # Design
//! A `Dispatcher` owns a transport, a retry policy and a `PermitPool`.
//! Synchronous requests run the retry loop on the caller's thread and need
//! no permit. Asynchronous requests take a permit on the caller's thread
//! (blocking while the pool is exhausted), then start one worker thread.
//!
//! The worker runs the retry loop, hands the outcome to the completion
//! callback, releases its permit and finally sets the `CompletionSignal`.
//! The last two steps live in `WorkerGuard::drop`, so they also happen when
//! the transport or the callback panics.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::{DispatcherConfig, TransportConfig};
use crate::error::FetchError;
use crate::http::{HttpMethod, HttpRequest, HttpResponse, RequestOptions};
use crate::limiter::{Permit, PermitPool};
use crate::retry::RetryPolicy;
use crate::signal::CompletionSignal;
use crate::transport::{Transport, UreqTransport};

/// Result of one logical request.
///
/// `Ok(Some(_))` is a response of any status, `Ok(None)` means every attempt
/// timed out, and `Err(_)` is a failure that was not retried.
pub type Outcome = Result<Option<HttpResponse>, FetchError>;

type Callback = Box<dyn FnOnce(Outcome) + Send + 'static>;

/// What `FetchBuilder::dispatch` produced.
#[derive(Debug)]
pub enum Dispatched {
    /// The request ran inline.
    Completed(Outcome),
    /// The request runs on a worker; the signal is set when it finishes.
    Pending(CompletionSignal),
}

/// Cloneable handle; clones share the transport, the permit pool and the
/// set of tracked workers.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

struct Shared {
    transport: Arc<dyn Transport>,
    config: DispatcherConfig,
    retry: RetryPolicy,
    permits: PermitPool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let handles = std::mem::take(self.workers.get_mut().unwrap_or_else(PoisonError::into_inner));
        join_handles(handles);
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("config", &self.shared.config)
            .field("in_flight", &self.in_flight())
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn Transport>, config: DispatcherConfig) -> Self {
        let retry = RetryPolicy::new(config.max_attempts);
        let permits = PermitPool::new(config.max_in_flight);
        Self {
            shared: Arc::new(Shared {
                transport,
                config,
                retry,
                permits,
                workers: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Dispatcher backed by `UreqTransport`.
    pub fn with_ureq(config: DispatcherConfig, transport: TransportConfig) -> Result<Self, FetchError> {
        config.validate()?;
        transport.validate()?;
        let transport = UreqTransport::new(transport)?;
        Ok(Self::new(Arc::new(transport), config))
    }

    pub fn get(&self, url: impl Into<String>) -> FetchBuilder<'_> {
        self.request(HttpMethod::Get, url)
    }

    pub fn post(&self, url: impl Into<String>) -> FetchBuilder<'_> {
        self.request(HttpMethod::Post, url)
    }

    pub fn request(&self, method: HttpMethod, url: impl Into<String>) -> FetchBuilder<'_> {
        FetchBuilder {
            dispatcher: self,
            method,
            url: url.into(),
            options: RequestOptions::default(),
            asynchronous: true,
            daemon: false,
            callback: None,
        }
    }

    pub fn config(&self) -> &DispatcherConfig {
        &self.shared.config
    }

    /// Asynchronous requests currently holding a permit.
    pub fn in_flight(&self) -> usize {
        self.shared.permits.in_use()
    }

    pub fn available_permits(&self) -> usize {
        self.shared.permits.available()
    }

    /// Stop accepting background requests. Callers blocked waiting for a
    /// permit wake with `FetchError::Closed`; running workers finish
    /// normally. Synchronous requests are unaffected.
    pub fn close(&self) {
        self.shared.permits.close();
    }

    /// Block until every non-daemon worker started so far has finished.
    pub fn join(&self) {
        let handles = {
            let mut workers = self.shared.workers.lock().unwrap_or_else(PoisonError::into_inner);
            std::mem::take(&mut *workers)
        };
        join_handles(handles);
    }

    fn run_inline(&self, request: &HttpRequest) -> Outcome {
        execute(self.shared.transport.as_ref(), self.shared.retry, request, Uuid::new_v4())
    }

    fn run_background(&self, request: HttpRequest, daemon: bool, callback: Option<Callback>) -> Result<CompletionSignal, FetchError> {
        let request_id = Uuid::new_v4();
        let permit = self.shared.permits.acquire().map_err(|_| FetchError::Closed)?;
        let signal = CompletionSignal::new();
        let guard = WorkerGuard {
            permit: Some(permit),
            signal: signal.clone(),
        };
        let transport = Arc::clone(&self.shared.transport);
        let retry = self.shared.retry;

        debug!(%request_id, url = %request.url, method = request.method.as_str(), daemon, "spawning crawl worker");

        let mut short_id = request_id.simple().to_string();
        short_id.truncate(8);
        let handle = thread::Builder::new()
            .name(format!("crawler-{short_id}"))
            .spawn(move || {
                let _guard = guard;
                let outcome = execute(transport.as_ref(), retry, &request, request_id);
                if let Some(callback) = callback {
                    callback(outcome);
                }
            })
            .map_err(FetchError::Spawn)?;

        if !daemon {
            let mut workers = self.shared.workers.lock().unwrap_or_else(PoisonError::into_inner);
            workers.retain(|worker| !worker.is_finished());
            workers.push(handle);
        }
        Ok(signal)
    }
}

fn execute(transport: &dyn Transport, retry: RetryPolicy, request: &HttpRequest, request_id: Uuid) -> Outcome {
    retry
        .run(&request.url, request_id, || transport.perform(request))
        .map_err(FetchError::from)
}

fn join_handles(handles: Vec<JoinHandle<()>>) {
    let current = thread::current().id();
    for handle in handles {
        // A worker may drop the last dispatcher handle from inside its own
        // callback; it cannot join itself.
        if handle.thread().id() == current {
            continue;
        }
        if handle.join().is_err() {
            warn!("crawl worker panicked");
        }
    }
}

/// Releases the worker's permit, then sets its signal, on every exit path.
struct WorkerGuard {
    permit: Option<Permit>,
    signal: CompletionSignal,
}

impl Drop for WorkerGuard {
    fn drop(&mut self) {
        drop(self.permit.take());
        self.signal.set();
    }
}

/// A request being configured. Created by `Dispatcher::get`,
/// `Dispatcher::post` or `Dispatcher::request`.
#[must_use = "a request does nothing until it is sent, spawned or dispatched"]
pub struct FetchBuilder<'a> {
    dispatcher: &'a Dispatcher,
    method: HttpMethod,
    url: String,
    options: RequestOptions,
    asynchronous: bool,
    daemon: bool,
    callback: Option<Callback>,
}

impl FetchBuilder<'_> {
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.options = self.options.header(name, value);
        self
    }

    pub fn body(mut self, body: impl Into<String>) -> Self {
        self.options = self.options.body(body);
        self
    }

    pub fn proxy(mut self, proxy: impl Into<String>) -> Self {
        self.options = self.options.proxy(proxy);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.options = self.options.timeout(timeout);
        self
    }

    /// Replace all transport options at once.
    pub fn options(mut self, options: RequestOptions) -> Self {
        self.options = options;
        self
    }

    /// Whether `dispatch` runs the request on a worker. Defaults to `true`.
    pub fn asynchronous(mut self, asynchronous: bool) -> Self {
        self.asynchronous = asynchronous;
        self
    }

    /// A daemon worker is detached: neither `Dispatcher::join` nor dropping
    /// the dispatcher waits for it. Defaults to `false`.
    pub fn daemon(mut self, daemon: bool) -> Self {
        self.daemon = daemon;
        self
    }

    /// Called on the worker with the outcome, before the permit is released
    /// and the signal is set. Only background requests invoke it; `send`
    /// returns the outcome directly.
    ///
    /// The worker still holds its permit while the callback runs. A callback
    /// that calls `spawn` on the same dispatcher blocks until another permit
    /// frees, so when every permit is held by such callbacks none of them can
    /// proceed. Chain follow-up crawls with `send`, a daemon thread, or a
    /// separate dispatcher instead.
    pub fn on_complete<F>(mut self, callback: F) -> Self
    where
        F: FnOnce(Outcome) + Send + 'static,
    {
        self.callback = Some(Box::new(callback));
        self
    }

    /// Run the request on the calling thread.
    pub fn send(self) -> Outcome {
        let request = HttpRequest::new(self.method, self.url, self.options);
        self.dispatcher.run_inline(&request)
    }

    /// Run the request on a worker thread. Blocks only while all permits are
    /// taken.
    pub fn spawn(self) -> Result<CompletionSignal, FetchError> {
        let request = HttpRequest::new(self.method, self.url, self.options);
        self.dispatcher.run_background(request, self.daemon, self.callback)
    }

    /// Run inline or on a worker, according to `asynchronous`.
    pub fn dispatch(self) -> Result<Dispatched, FetchError> {
        if self.asynchronous {
            self.spawn().map(Dispatched::Pending)
        } else {
            Ok(Dispatched::Completed(self.send()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TransportError;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Answers 200 with the request body after `delay`, counting calls.
    struct Echo {
        delay: Duration,
        calls: AtomicUsize,
    }

    impl Echo {
        fn new(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl Transport for Echo {
        fn perform(&self, request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            thread::sleep(self.delay);
            Ok(HttpResponse {
                status: 200,
                headers: request.headers.clone(),
                body: request.body.clone().unwrap_or_default().into_bytes(),
            })
        }
    }

    struct Refused;

    impl Transport for Refused {
        fn perform(&self, _request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            Err(TransportError::Failed("connection refused".into()))
        }
    }

    struct Panics;

    impl Transport for Panics {
        fn perform(&self, _request: &HttpRequest) -> Result<HttpResponse, TransportError> {
            panic!("transport blew up");
        }
    }

    fn dispatcher(transport: Arc<dyn Transport>) -> Dispatcher {
        Dispatcher::new(transport, DispatcherConfig::default())
    }

    #[test]
    fn send_passes_options_through() {
        let echo = Echo::new(Duration::ZERO);
        let d = dispatcher(echo.clone());
        let response = d
            .post("http://test/echo")
            .header("x-crawler", "1")
            .body("hello")
            .send()
            .unwrap()
            .unwrap();
        assert_eq!(response.text(), "hello");
        assert_eq!(response.header("x-crawler"), Some("1"));
        assert_eq!(echo.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn send_takes_no_permit() {
        let d = Dispatcher::new(
            Echo::new(Duration::ZERO),
            DispatcherConfig {
                max_in_flight: 1,
                ..DispatcherConfig::default()
            },
        );
        let _held = d.shared.permits.acquire().unwrap();
        assert!(d.get("http://test/").send().unwrap().is_some());
    }

    #[test]
    fn sync_non_timeout_failure_is_returned() {
        let d = dispatcher(Arc::new(Refused));
        let err = d.get("http://test/").send().unwrap_err();
        assert!(matches!(err, FetchError::Transport(TransportError::Failed(_))));
    }

    #[test]
    fn dispatch_honours_async_flag() {
        let d = dispatcher(Echo::new(Duration::ZERO));
        match d.get("http://test/").asynchronous(false).dispatch().unwrap() {
            Dispatched::Completed(outcome) => assert!(outcome.unwrap().is_some()),
            Dispatched::Pending(_) => panic!("expected inline completion"),
        }
        match d.get("http://test/").dispatch().unwrap() {
            Dispatched::Pending(signal) => assert!(signal.wait_timeout(Duration::from_secs(5))),
            Dispatched::Completed(_) => panic!("expected background dispatch"),
        }
    }

    #[test]
    fn spawn_returns_before_work_finishes() {
        let d = dispatcher(Echo::new(Duration::from_millis(100)));
        let signal = d.get("http://test/").spawn().unwrap();
        assert!(!signal.is_set());
        assert_eq!(d.in_flight(), 1);
        assert!(signal.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn callback_runs_before_permit_release_and_signal() {
        let d = dispatcher(Echo::new(Duration::ZERO));
        let observed = Arc::new(Mutex::new(None));

        let signal = {
            let observed = Arc::clone(&observed);
            let probe = d.clone();
            d.get("http://test/")
                .on_complete(move |outcome| {
                    thread::sleep(Duration::from_millis(30));
                    *observed.lock().unwrap() = Some((outcome.is_ok(), probe.in_flight()));
                })
                .spawn()
                .unwrap()
        };

        signal.wait();
        assert_eq!(*observed.lock().unwrap(), Some((true, 1)));
        assert_eq!(d.in_flight(), 0);
    }

    #[test]
    fn async_failure_reaches_callback() {
        let d = dispatcher(Arc::new(Refused));
        let failed = Arc::new(AtomicBool::new(false));
        let signal = {
            let failed = Arc::clone(&failed);
            d.get("http://test/")
                .on_complete(move |outcome| {
                    failed.store(matches!(outcome, Err(FetchError::Transport(_))), Ordering::SeqCst);
                })
                .spawn()
                .unwrap()
        };
        signal.wait();
        assert!(failed.load(Ordering::SeqCst));
    }

    #[test]
    fn panicking_transport_still_releases_and_signals() {
        let d = dispatcher(Arc::new(Panics));
        let signal = d.get("http://test/").spawn().unwrap();
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        d.join();
        assert_eq!(d.available_permits(), 5);
    }

    #[test]
    fn panicking_callback_still_releases_and_signals() {
        let d = dispatcher(Echo::new(Duration::ZERO));
        let signal = d
            .get("http://test/")
            .on_complete(|_| panic!("callback blew up"))
            .spawn()
            .unwrap();
        assert!(signal.wait_timeout(Duration::from_secs(5)));
        d.join();
        assert_eq!(d.available_permits(), 5);
    }

    #[test]
    fn join_waits_for_non_daemon_workers() {
        let d = dispatcher(Echo::new(Duration::from_millis(50)));
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..3 {
            let done = Arc::clone(&done);
            d.get("http://test/")
                .on_complete(move |_| {
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .spawn()
                .unwrap();
        }
        d.join();
        assert_eq!(done.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn dropping_dispatcher_waits_for_non_daemon_workers() {
        let d = dispatcher(Echo::new(Duration::from_millis(50)));
        let done = Arc::new(AtomicBool::new(false));
        {
            let done = Arc::clone(&done);
            d.get("http://test/")
                .on_complete(move |_| done.store(true, Ordering::SeqCst))
                .spawn()
                .unwrap();
        }
        drop(d);
        assert!(done.load(Ordering::SeqCst));
    }

    #[test]
    fn daemon_workers_are_not_tracked() {
        let d = dispatcher(Echo::new(Duration::from_millis(200)));
        let signal = d.get("http://test/").daemon(true).spawn().unwrap();
        d.join();
        assert!(!signal.is_set());
        assert!(signal.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn worker_may_drop_last_handle() {
        let d = dispatcher(Echo::new(Duration::from_millis(20)));
        let carried = d.clone();
        let signal = d
            .get("http://test/")
            .on_complete(move |_| drop(carried))
            .spawn()
            .unwrap();
        drop(d);
        assert!(signal.wait_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn closed_dispatcher_refuses_background_requests() {
        let d = Dispatcher::new(
            Echo::new(Duration::from_millis(100)),
            DispatcherConfig {
                max_in_flight: 1,
                ..DispatcherConfig::default()
            },
        );
        let running = d.get("http://test/").spawn().unwrap();

        let blocked = {
            let d = d.clone();
            thread::spawn(move || d.get("http://test/").spawn())
        };
        thread::sleep(Duration::from_millis(30));
        d.close();

        assert!(matches!(blocked.join().unwrap(), Err(FetchError::Closed)));
        assert!(running.wait_timeout(Duration::from_secs(5)));
        assert!(matches!(d.get("http://test/").spawn(), Err(FetchError::Closed)));
        assert!(d.get("http://test/").send().unwrap().is_some());
    }

    #[test]
    fn callback_can_chain_with_send_while_holding_the_only_permit() {
        let d = Dispatcher::new(
            Echo::new(Duration::ZERO),
            DispatcherConfig {
                max_in_flight: 1,
                ..DispatcherConfig::default()
            },
        );
        let chained = Arc::new(Mutex::new(None));
        let signal = {
            let chained = Arc::clone(&chained);
            let follow_up = d.clone();
            d.post("http://test/first")
                .body("first")
                .on_complete(move |_| {
                    let outcome = follow_up.post("http://test/second").body("second").send();
                    *chained.lock().unwrap() = outcome.ok().flatten().map(|r| r.text().into_owned());
                })
                .spawn()
                .unwrap()
        };

        assert!(signal.wait_timeout(Duration::from_secs(5)));
        assert_eq!(chained.lock().unwrap().as_deref(), Some("second"));
        assert_eq!(d.available_permits(), 1);
    }
}
