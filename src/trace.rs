//! Connection lifecycle hooks invoked by the dispatcher.
//!
//! The [`crate::Client`] calls these in temporal order for a single request
//! and never concurrently: DNS, TCP connect, TLS handshake (fresh connections
//! only), then `got_conn`, `wrote_request` and `got_first_response_byte`.
//! Each hook receives the instant at which the transition happened.

use crate::metric::Metric;
use bytes::Bytes;
use http_body_util::Full;
use hyper::Request;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
pub struct DnsStartInfo<'a> {
    pub host: &'a str,
}

#[derive(Debug, Clone, Copy)]
pub struct DnsDoneInfo<'a> {
    pub addrs: &'a [SocketAddr],
    pub error: Option<&'a io::Error>,
}

/// Negotiated parameters of a completed TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsState {
    pub protocol_version: String,
    pub cipher_suite: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GotConnInfo {
    /// The connection was taken from the keep-alive pool.
    pub reused: bool,
    pub was_idle: bool,
    /// How long the connection sat in the pool. Zero unless `was_idle`.
    pub idle_time: Duration,
}

pub trait ClientTrace: Send {
    fn dns_start(&mut self, _info: &DnsStartInfo<'_>, _at: Instant) {}

    fn dns_done(&mut self, _info: &DnsDoneInfo<'_>, _at: Instant) {}

    fn connect_start(&mut self, _addr: SocketAddr, _at: Instant) {}

    fn connect_done(&mut self, _addr: SocketAddr, _error: Option<&io::Error>, _at: Instant) {}

    fn tls_handshake_start(&mut self, _at: Instant) {}

    /// `state` is `None` when the handshake failed or timed out.
    fn tls_handshake_done(&mut self, _state: Option<&TlsState>, _at: Instant) {}

    fn got_conn(&mut self, _info: GotConnInfo, _at: Instant) {}

    fn wrote_request(&mut self, _at: Instant) {}

    fn got_first_response_byte(&mut self, _at: Instant) {}
}

/// Hook set that records nothing.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoTrace;

impl ClientTrace for NoTrace {}

/// A request bound to the hook set that observes its lifecycle.
///
/// Holds the trace by unique borrow, so whatever it records cannot be read
/// until the request has been dispatched and the binding dropped.
pub struct TracedRequest<'a> {
    pub(crate) request: Request<Full<Bytes>>,
    pub(crate) trace: &'a mut dyn ClientTrace,
}

impl<'a> TracedRequest<'a> {
    pub fn new(request: Request<Full<Bytes>>, trace: &'a mut dyn ClientTrace) -> Self {
        Self { request, trace }
    }

    pub fn request(&self) -> &Request<Full<Bytes>> {
        &self.request
    }

    pub fn into_parts(self) -> (Request<Full<Bytes>>, &'a mut dyn ClientTrace) {
        (self.request, self.trace)
    }
}

/// Binds `metric` to `request`; dispatching the result fills the metric in.
pub fn with_http_metrics(request: Request<Full<Bytes>>, metric: &mut Metric) -> TracedRequest<'_> {
    TracedRequest::new(request, metric)
}
