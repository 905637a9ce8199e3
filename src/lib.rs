//! Per-phase timing of a single HTTP request: DNS lookup, TCP connect, TLS
//! handshake, server processing and content transfer, plus curl-style
//! cumulative checkpoints measured from the first lifecycle event.
//!
//! ```no_run
//! # async fn run() {
//! use bytes::Bytes;
//! use http_body_util::Full;
//! use httpmetrics::{MetricResult, ReportFormat};
//!
//! let request = hyper::Request::get("https://example.com/")
//!     .body(Full::new(Bytes::new()))
//!     .unwrap();
//! let (metric, outcome) = MetricResult::new(request).send().await;
//! if outcome.is_ok() {
//!     print!("{}", metric.report(ReportFormat::Detailed));
//! }
//! # }
//! ```
#[macro_use]
extern crate anyhow;
#[macro_use]
extern crate tracing;

pub mod config;
pub mod http;
pub mod metric;
pub mod result;
pub mod tls;
pub mod trace;

pub use config::ClientConfig;
pub use http::client::Client;
pub use metric::{Metric, ReportFormat, Timestamps};
pub use result::MetricResult;
pub use trace::{
    with_http_metrics, ClientTrace, DnsDoneInfo, DnsStartInfo, GotConnInfo, NoTrace, TlsState,
    TracedRequest,
};
