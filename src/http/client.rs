use crate::config::ClientConfig;
use crate::http::dns;
use crate::http::pool::{Pool, PoolKey, PooledConnection};
use crate::http::timed_io::TimedIo;
use crate::tls;
use crate::trace::{ClientTrace, DnsDoneInfo, DnsStartInfo, GotConnInfo, NoTrace, TracedRequest};
use anyhow::Context;
use bytes::Bytes;
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::client::conn::http1;
use hyper::header::{HeaderValue, CONNECTION, HOST, USER_AGENT};
use hyper::{Request, Response, Uri};
use hyper_util::rt::TokioIo;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_rustls::TlsConnector;
use tracing::Instrument;

/// HTTP/1.1 client that reports connection lifecycle events to a
/// [`ClientTrace`] and keeps connections alive between requests.
///
/// Requests are dispatched one at a time through `&mut self`; the hooks of a
/// traced request therefore never interleave with another request's.
pub struct Client {
    config: ClientConfig,
    tls: TlsConnector,
    pool: Pool,
}

impl Client {
    pub fn new(config: ClientConfig) -> Result<Self, anyhow::Error> {
        let tls = tls::build_connector(&config)?;
        let pool = Pool::new(config.idle_timeout, config.max_idle_per_host);
        Ok(Self { config, tls, pool })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Sends `request` without tracing.
    pub async fn request(
        &mut self,
        request: Request<Full<Bytes>>,
    ) -> Result<Response<Incoming>, anyhow::Error> {
        let mut trace = NoTrace;
        self.execute(TracedRequest::new(request, &mut trace)).await
    }

    /// Sends a traced request and returns once the response headers arrived.
    /// The body is left for the caller to drain.
    pub async fn execute(
        &mut self,
        traced: TracedRequest<'_>,
    ) -> Result<Response<Incoming>, anyhow::Error> {
        let (mut request, trace) = traced.into_parts();
        let key = PoolKey::from_uri(request.uri())?;
        prepare_request(&mut request, &self.config.user_agent)?;

        let span = debug_span!(
            "request",
            method = %request.method(),
            host = %key.host,
            port = key.port
        );
        self.dispatch(key, request, trace).instrument(span).await
    }

    async fn dispatch(
        &mut self,
        key: PoolKey,
        request: Request<Full<Bytes>>,
        trace: &mut dyn ClientTrace,
    ) -> Result<Response<Incoming>, anyhow::Error> {
        let mut conn = match self.pool.checkout(&key).await {
            Some(conn) => {
                let idle_time = conn.idle_time();
                debug!(?idle_time, "reusing pooled connection");
                let info = GotConnInfo {
                    reused: true,
                    was_idle: true,
                    idle_time,
                };
                trace.got_conn(info, Instant::now());
                conn
            }
            None => {
                let conn = self.connect(&key, trace).await?;
                let info = GotConnInfo {
                    reused: false,
                    was_idle: false,
                    idle_time: Duration::ZERO,
                };
                trace.got_conn(info, Instant::now());
                conn
            }
        };

        conn.discard_events();
        trace!("> {} {} {:?}", request.method(), request.uri(), request.version());
        let sent = timeout(
            self.config.response_header_timeout,
            conn.sender.send_request(request),
        )
        .await;
        conn.replay_events(trace);

        let response = sent
            .map_err(|_| {
                anyhow!(
                    "Timed out after {:?} waiting for response headers",
                    self.config.response_header_timeout
                )
            })?
            .context("Failed to execute request")?;
        debug!("< {:?} {}", response.version(), response.status());

        if keep_alive(&response) {
            self.pool.check_in(key.clone(), conn);
            trace!(idle = self.pool.idle_count(&key), "connection returned to pool");
        }
        Ok(response)
    }

    async fn connect(
        &self,
        key: &PoolKey,
        trace: &mut dyn ClientTrace,
    ) -> Result<PooledConnection, anyhow::Error> {
        let addrs = match key.ip_literal() {
            Some(ip) => vec![SocketAddr::new(ip, key.port)],
            None => {
                trace.dns_start(&DnsStartInfo { host: &key.host }, Instant::now());
                let resolved = dns::resolve(&key.host, key.port).await;
                let info = match &resolved {
                    Ok(addrs) => DnsDoneInfo { addrs, error: None },
                    Err(e) => DnsDoneInfo {
                        addrs: &[],
                        error: Some(e),
                    },
                };
                trace.dns_done(&info, Instant::now());
                resolved.with_context(|| format!("Failed to resolve host {}", key.host))?
            }
        };

        let stream = self.dial(&addrs, trace).await?;

        if !key.https {
            return handshake(stream, key).await;
        }

        let domain = pki_types::ServerName::try_from(key.host.clone())
            .map_err(|e| anyhow!("Invalid server name {}: {}", key.host, e))?;
        trace.tls_handshake_start(Instant::now());
        let tls_stream = match timeout(
            self.config.tls_handshake_timeout,
            self.tls.connect(domain, stream),
        )
        .await
        {
            Ok(Ok(tls_stream)) => tls_stream,
            Ok(Err(e)) => {
                trace.tls_handshake_done(None, Instant::now());
                return Err(anyhow::Error::new(e)
                    .context(format!("TLS handshake with {} failed", key.host)));
            }
            Err(_) => {
                trace.tls_handshake_done(None, Instant::now());
                bail!(
                    "TLS handshake with {} timed out after {:?}",
                    key.host,
                    self.config.tls_handshake_timeout
                );
            }
        };
        let state = tls::negotiated(&tls_stream);
        trace.tls_handshake_done(Some(&state), Instant::now());
        debug!(
            version = %state.protocol_version,
            cipher_suite = %state.cipher_suite,
            "TLS handshake complete"
        );

        handshake(tls_stream, key).await
    }

    /// Connects to the first address that accepts, in resolver order.
    async fn dial(
        &self,
        addrs: &[SocketAddr],
        trace: &mut dyn ClientTrace,
    ) -> Result<TcpStream, anyhow::Error> {
        let mut last_error = None;
        for addr in addrs {
            trace.connect_start(*addr, Instant::now());
            let attempt = match timeout(self.config.dial_timeout, TcpStream::connect(addr)).await {
                Ok(attempt) => attempt,
                Err(_) => Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    format!("connect to {} timed out", addr),
                )),
            };
            match attempt {
                Ok(stream) => {
                    trace.connect_done(*addr, None, Instant::now());
                    debug!(%addr, "connected");
                    if let Err(e) = stream.set_nodelay(true) {
                        trace!("set_nodelay failed: {}", e);
                    }
                    return Ok(stream);
                }
                Err(e) => {
                    trace.connect_done(*addr, Some(&e), Instant::now());
                    debug!(%addr, error = %e, "connect failed");
                    last_error = Some(e);
                }
            }
        }

        Err(match last_error {
            Some(e) => anyhow::Error::new(e).context("Failed to connect"),
            None => anyhow!("No addresses to connect to"),
        })
    }
}

/// Runs the HTTP/1.1 handshake over `io` and spawns the connection task.
async fn handshake<T>(io: T, key: &PoolKey) -> Result<PooledConnection, anyhow::Error>
where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let (timed, events) = TimedIo::new(io);
    let (sender, conn) = http1::handshake(TokioIo::new(timed))
        .await
        .context("HTTP/1.1 handshake failed")?;

    tokio::spawn(
        async move {
            if let Err(err) = conn.await {
                debug!("Connection failed: {:?}", err);
            }
        }
        .instrument(info_span!("connection", host = %key.host, port = key.port)),
    );

    Ok(PooledConnection::new(sender, events))
}

/// Adds `Host` and `User-Agent` when missing and rewrites the target to
/// origin-form.
fn prepare_request(
    request: &mut Request<Full<Bytes>>,
    user_agent: &str,
) -> Result<(), anyhow::Error> {
    let uri = request.uri().clone();

    if !request.headers().contains_key(HOST) {
        let host = uri
            .host()
            .ok_or_else(|| anyhow!("Can not find host in the uri: {}", uri))?;
        let value = match uri.port_u16() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        request
            .headers_mut()
            .insert(HOST, HeaderValue::from_str(&value)?);
    }
    if !request.headers().contains_key(USER_AGENT) {
        request
            .headers_mut()
            .insert(USER_AGENT, HeaderValue::from_str(user_agent)?);
    }

    let target = match uri.path_and_query().map(|pq| pq.as_str()) {
        None | Some("") => "/".to_string(),
        Some(pq) if pq.starts_with('?') => format!("/{}", pq),
        Some(pq) => pq.to_string(),
    };
    *request.uri_mut() = target.parse::<Uri>()?;
    Ok(())
}

fn keep_alive(response: &Response<Incoming>) -> bool {
    !response
        .headers()
        .get_all(CONNECTION)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .any(|v| v.split(',').any(|t| t.trim().eq_ignore_ascii_case("close")))
}
