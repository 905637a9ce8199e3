use crate::http::timed_io::IoEvent;
use crate::trace::ClientTrace;
use bytes::Bytes;
use http_body_util::Full;
use hyper::client::conn::http1::SendRequest;
use hyper::Uri;
use std::collections::HashMap;
use std::net::IpAddr;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::time::timeout;

/// How long checkout waits for a pooled connection to finish its previous
/// exchange before treating it as busy.
const READY_WAIT: Duration = Duration::from_millis(100);

/// Origin a connection is bound to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PoolKey {
    pub https: bool,
    /// Host without IPv6 brackets.
    pub host: String,
    pub port: u16,
}

impl PoolKey {
    pub fn from_uri(uri: &Uri) -> Result<Self, anyhow::Error> {
        let https = match uri.scheme_str() {
            Some("https") => true,
            Some("http") => false,
            Some(other) => bail!("Unsupported scheme '{}' in uri: {}", other, uri),
            None => bail!("Can not find scheme in the uri: {}", uri),
        };
        let host = uri
            .host()
            .ok_or_else(|| anyhow!("Can not find host in the uri: {}", uri))?
            .trim_start_matches('[')
            .trim_end_matches(']')
            .to_string();
        let port = uri.port_u16().unwrap_or(if https { 443 } else { 80 });
        Ok(Self { https, host, port })
    }

    /// The host parsed as an address, when no resolution is needed.
    pub fn ip_literal(&self) -> Option<IpAddr> {
        self.host.parse().ok()
    }
}

pub struct PooledConnection {
    pub sender: SendRequest<Full<Bytes>>,
    events: UnboundedReceiver<IoEvent>,
    idle_since: Instant,
}

impl PooledConnection {
    pub fn new(sender: SendRequest<Full<Bytes>>, events: UnboundedReceiver<IoEvent>) -> Self {
        Self {
            sender,
            events,
            idle_since: Instant::now(),
        }
    }

    pub fn idle_time(&self) -> Duration {
        self.idle_since.elapsed()
    }

    /// Drops wire events left over from an earlier exchange.
    pub fn discard_events(&mut self) {
        while self.events.try_recv().is_ok() {}
    }

    /// Hands the wire instants of the current exchange to `trace`, request
    /// write first.
    pub fn replay_events(&mut self, trace: &mut dyn ClientTrace) {
        let mut written = None;
        let mut first_byte = None;
        while let Ok(event) = self.events.try_recv() {
            match event {
                IoEvent::RequestWritten(at) if first_byte.is_none() => written = Some(at),
                IoEvent::FirstByte(at) if first_byte.is_none() => first_byte = Some(at),
                _ => {}
            }
        }
        if let Some(at) = written {
            trace.wrote_request(at);
        }
        if let Some(at) = first_byte {
            trace.got_first_response_byte(at);
        }
    }
}

/// Keep-alive connections, most recently used first.
pub struct Pool {
    idle: HashMap<PoolKey, Vec<PooledConnection>>,
    idle_timeout: Duration,
    max_idle_per_host: usize,
}

impl Pool {
    pub fn new(idle_timeout: Duration, max_idle_per_host: usize) -> Self {
        Self {
            idle: HashMap::new(),
            idle_timeout,
            max_idle_per_host,
        }
    }

    pub fn idle_count(&self, key: &PoolKey) -> usize {
        self.idle.get(key).map_or(0, Vec::len)
    }

    pub fn check_in(&mut self, key: PoolKey, mut conn: PooledConnection) {
        if self.idle_count(&key) >= self.max_idle_per_host {
            trace!("idle pool full, dropping connection");
            return;
        }
        conn.idle_since = Instant::now();
        self.idle.entry(key).or_default().push(conn);
    }

    /// Takes a live connection for `key`, discarding closed and expired ones.
    /// Connections still busy with an earlier response stay pooled.
    pub async fn checkout(&mut self, key: &PoolKey) -> Option<PooledConnection> {
        let idle = self.idle.get_mut(key)?;
        let mut busy = Vec::new();
        let mut found = None;

        while let Some(mut conn) = idle.pop() {
            if conn.sender.is_closed() {
                trace!("discarding closed connection");
                continue;
            }
            if conn.idle_time() > self.idle_timeout {
                debug!(idle_time = ?conn.idle_time(), "discarding expired connection");
                continue;
            }
            match timeout(READY_WAIT, conn.sender.ready()).await {
                Ok(Ok(())) => {
                    found = Some(conn);
                    break;
                }
                Ok(Err(e)) => trace!("discarding failed connection: {}", e),
                Err(_) => busy.push(conn),
            }
        }

        // Keep most-recently-used order for the ones left behind.
        idle.extend(busy.into_iter().rev());
        if idle.is_empty() {
            self.idle.remove(key);
        }
        found
    }
}
