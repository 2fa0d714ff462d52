//! Concurrency-bounded HTTP fetch helper.
//!
//! # Overview
//! Issues GET and POST requests either on the calling thread or on a
//! background worker. Timeouts are retried up to a fixed number of
//! attempts; other failures are returned at once. Background requests are
//! capped by a per-dispatcher permit pool and report completion through a
//! `CompletionSignal` and an optional callback.
//!
//! # Design
//! - `Transport` is the only I/O seam. `UreqTransport` does real HTTP(S)
//!   with optional HTTP or SOCKS proxies; tests plug in stubs.
//! - `Dispatcher` owns its `PermitPool`, so independent dispatchers have
//!   independent limits.
//! - Permit release and signal completion run from a drop guard, so they
//!   happen on every exit path of a worker, panics included.
//!
//! ```no_run
//! use crawler_core::{Dispatcher, DispatcherConfig, TransportConfig};
//!
//! let crawler = Dispatcher::with_ureq(DispatcherConfig::default(), TransportConfig::default())?;
//! let signal = crawler
//!     .get("http://example.com/")
//!     .on_complete(|outcome| match outcome {
//!         Ok(Some(response)) => println!("{} bytes", response.body.len()),
//!         Ok(None) => println!("gave up after retries"),
//!         Err(err) => println!("failed: {err}"),
//!     })
//!     .spawn()?;
//! signal.wait();
//! # Ok::<(), crawler_core::FetchError>(())
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod http;
pub mod limiter;
pub mod logging;
pub mod retry;
pub mod signal;
pub mod transport;

pub use config::{DispatcherConfig, TransportConfig};
pub use dispatcher::{Dispatched, Dispatcher, FetchBuilder, Outcome};
pub use error::{FetchError, TransportError};
pub use http::{HttpMethod, HttpRequest, HttpResponse, RequestOptions};
pub use limiter::{Permit, PermitPool};
pub use retry::RetryPolicy;
pub use signal::CompletionSignal;
pub use transport::{Transport, UreqTransport};
