use crate::trace::{ClientTrace, DnsDoneInfo, DnsStartInfo, GotConnInfo, TlsState};
use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Output layout produced by [`Metric::report`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportFormat {
    /// One labelled value per line, fixed order, newline-terminated.
    Detailed,
    /// `Name: N ms` pairs joined by `, `.
    Compact,
}

/// Raw instants observed while tracing one request. `None` means the owning
/// event never fired.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Timestamps {
    pub dns_start: Option<Instant>,
    pub dns_done: Option<Instant>,
    pub tcp_start: Option<Instant>,
    pub tcp_done: Option<Instant>,
    pub tls_start: Option<Instant>,
    pub tls_done: Option<Instant>,
    pub server_start: Option<Instant>,
    pub server_done: Option<Instant>,
    pub transfer_start: Option<Instant>,
    pub transfer_done: Option<Instant>,
}

/// Phase durations and cumulative checkpoints of a single HTTP request.
///
/// A `Metric` is filled in by the lifecycle callbacks of [`ClientTrace`] and
/// completed by [`Metric::finish`] once the response body has been drained.
/// Every cumulative checkpoint is measured from `dns_start`, the first
/// lifecycle event observed.
///
/// One instance per request. Reusing it for a second request mixes the two
/// timelines.
#[derive(Debug, Default, Clone)]
pub struct Metric {
    dns_lookup: Duration,
    tcp_connection: Duration,
    tls_handshake: Duration,
    server_processing: Duration,
    content_transfer: Duration,

    name_lookup: Duration,
    connect: Duration,
    pretransfer: Duration,
    start_transfer: Duration,
    total: Duration,

    at: Timestamps,

    is_tls: bool,
    is_reused: bool,
}

fn between(later: Option<Instant>, earlier: Option<Instant>) -> Duration {
    match (later, earlier) {
        (Some(later), Some(earlier)) => later.saturating_duration_since(earlier),
        _ => Duration::ZERO,
    }
}

fn millis(d: Duration) -> u128 {
    d.as_millis()
}

impl Metric {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records the end of the content transfer and computes `ContentTransfer`
    /// and `Total`.
    ///
    /// Call once, after the response body has been read to completion. When
    /// no lifecycle event was ever observed only `transfer_done` is recorded.
    pub fn finish(&mut self, at: Instant) {
        self.at.transfer_done = Some(at);
        if self.at.dns_start.is_none() {
            return;
        }
        self.content_transfer = between(self.at.transfer_done, self.at.transfer_start);
        self.total = between(self.at.transfer_done, self.at.dns_start);
    }

    pub fn dns_lookup(&self) -> Duration {
        self.dns_lookup
    }

    pub fn tcp_connection(&self) -> Duration {
        self.tcp_connection
    }

    pub fn tls_handshake(&self) -> Duration {
        self.tls_handshake
    }

    pub fn server_processing(&self) -> Duration {
        self.server_processing
    }

    pub fn content_transfer(&self) -> Duration {
        self.content_transfer
    }

    pub fn name_lookup(&self) -> Duration {
        self.name_lookup
    }

    pub fn connect(&self) -> Duration {
        self.connect
    }

    pub fn pretransfer(&self) -> Duration {
        self.pretransfer
    }

    pub fn start_transfer(&self) -> Duration {
        self.start_transfer
    }

    pub fn total(&self) -> Duration {
        self.total
    }

    /// True once a TLS handshake started on the traced connection.
    pub fn is_tls(&self) -> bool {
        self.is_tls
    }

    /// True when the request went out on a pooled connection.
    pub fn is_reused(&self) -> bool {
        self.is_reused
    }

    pub fn timestamps(&self) -> Timestamps {
        self.at
    }

    fn named(&self) -> [(&'static str, Duration); 10] {
        [
            ("DNSLookup", self.dns_lookup),
            ("TCPConnection", self.tcp_connection),
            ("TLSHandshake", self.tls_handshake),
            ("ServerProcessing", self.server_processing),
            ("ContentTransfer", self.content_transfer),
            ("NameLookup", self.name_lookup),
            ("Connect", self.connect),
            ("Pretransfer", self.pretransfer),
            ("StartTransfer", self.start_transfer),
            ("Total", self.total),
        ]
    }

    /// All ten measurements keyed by name.
    pub fn durations(&self) -> HashMap<&'static str, Duration> {
        self.named().into_iter().collect()
    }

    pub fn report(&self, format: ReportFormat) -> String {
        match format {
            ReportFormat::Detailed => format!("{}", self),
            ReportFormat::Compact => format!("{:#}", self),
        }
    }

    fn pin_setup_to(&mut self, at: Instant, include_tls: bool) {
        self.at.dns_start = Some(at);
        self.at.dns_done = Some(at);
        self.at.tcp_start = Some(at);
        self.at.tcp_done = Some(at);
        if include_tls {
            self.at.tls_start = Some(at);
            self.at.tls_done = Some(at);
        }
    }
}

impl ClientTrace for Metric {
    fn dns_start(&mut self, _info: &DnsStartInfo<'_>, at: Instant) {
        self.at.dns_start = Some(at);
    }

    fn dns_done(&mut self, _info: &DnsDoneInfo<'_>, at: Instant) {
        self.at.dns_done = Some(at);
        self.dns_lookup = between(self.at.dns_done, self.at.dns_start);
        self.name_lookup = between(self.at.dns_done, self.at.dns_start);
    }

    fn connect_start(&mut self, _addr: SocketAddr, at: Instant) {
        self.at.tcp_start = Some(at);
        // No DNS phase observed: anchor the timeline at the dial.
        if self.at.dns_start.is_none() {
            self.at.dns_start = Some(at);
            self.at.dns_done = Some(at);
        }
    }

    fn connect_done(&mut self, _addr: SocketAddr, _error: Option<&io::Error>, at: Instant) {
        self.at.tcp_done = Some(at);
        self.tcp_connection = between(self.at.tcp_done, self.at.tcp_start);
        self.connect = between(self.at.tcp_done, self.at.dns_start);
    }

    fn tls_handshake_start(&mut self, at: Instant) {
        self.is_tls = true;
        self.at.tls_start = Some(at);
    }

    fn tls_handshake_done(&mut self, _state: Option<&TlsState>, at: Instant) {
        self.at.tls_done = Some(at);
        self.tls_handshake = between(self.at.tls_done, self.at.tls_start);
        self.pretransfer = between(self.at.tls_done, self.at.dns_start);
    }

    fn got_conn(&mut self, info: GotConnInfo, _at: Instant) {
        if info.reused {
            self.is_reused = true;
        }
    }

    fn wrote_request(&mut self, at: Instant) {
        self.at.server_start = Some(at);

        if self.at.dns_start.is_none() && self.at.tcp_start.is_none() {
            self.pin_setup_to(at, false);
        }

        // A pooled connection does no resolution, dial or handshake.
        if self.is_reused {
            self.pin_setup_to(at, true);
        }

        if self.is_tls {
            return;
        }

        self.tls_handshake = Duration::ZERO;
        self.pretransfer = self.connect;
    }

    fn got_first_response_byte(&mut self, at: Instant) {
        self.at.server_done = Some(at);

        self.server_processing = between(self.at.server_done, self.at.server_start);
        self.start_transfer = between(self.at.server_done, self.at.dns_start);

        self.at.transfer_start = self.at.server_done;
    }
}

/// `{}` renders the detailed report, `{:#}` the compact list.
impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if f.alternate() {
            let list: Vec<String> = self
                .named()
                .iter()
                .map(|(name, d)| format!("{}: {} ms", name, millis(*d)))
                .collect();
            return write!(f, "{}", list.join(", "));
        }

        writeln!(f, "DNS lookup:        {:>4} ms", millis(self.dns_lookup))?;
        writeln!(f, "TCP connection:    {:>4} ms", millis(self.tcp_connection))?;
        writeln!(f, "TLS handshake:     {:>4} ms", millis(self.tls_handshake))?;
        writeln!(f, "Server processing: {:>4} ms", millis(self.server_processing))?;
        writeln!(f, "Content transfer:  {:>4} ms", millis(self.content_transfer))?;
        writeln!(f, "Name Lookup:    {:>4} ms", millis(self.name_lookup))?;
        writeln!(f, "Connect:        {:>4} ms", millis(self.connect))?;
        writeln!(f, "Pre Transfer:   {:>4} ms", millis(self.pretransfer))?;
        writeln!(f, "Start Transfer: {:>4} ms", millis(self.start_transfer))?;
        writeln!(f, "Total:          {:>4} ms", millis(self.total))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    fn addr() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 443)
    }

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    fn fresh(reused: bool) -> GotConnInfo {
        GotConnInfo {
            reused,
            was_idle: reused,
            idle_time: Duration::ZERO,
        }
    }

    /// Drives a full TLS request timeline starting at `base`.
    fn tls_timeline(base: Instant) -> Metric {
        let mut m = Metric::new();
        m.dns_start(&DnsStartInfo { host: "example.com" }, base);
        m.dns_done(
            &DnsDoneInfo {
                addrs: &[addr()],
                error: None,
            },
            base + ms(10),
        );
        m.connect_start(addr(), base + ms(10));
        m.connect_done(addr(), None, base + ms(40));
        m.tls_handshake_start(base + ms(40));
        m.tls_handshake_done(None, base + ms(90));
        m.got_conn(fresh(false), base + ms(90));
        m.wrote_request(base + ms(90));
        m.got_first_response_byte(base + ms(190));
        m.finish(base + ms(290));
        m
    }

    #[test]
    fn detailed_report_layout() {
        let d = ms(100);
        let m = Metric {
            dns_lookup: d,
            tcp_connection: d,
            tls_handshake: d,
            server_processing: d,
            content_transfer: d,
            name_lookup: d,
            connect: d,
            pretransfer: d,
            start_transfer: d,
            total: d,
            ..Metric::default()
        };

        let want = "\
DNS lookup:         100 ms
TCP connection:     100 ms
TLS handshake:      100 ms
Server processing:  100 ms
Content transfer:   100 ms
Name Lookup:     100 ms
Connect:         100 ms
Pre Transfer:    100 ms
Start Transfer:  100 ms
Total:           100 ms
";
        assert_eq!(m.report(ReportFormat::Detailed), want);
        assert_eq!(format!("{}", m), want);
    }

    #[test]
    fn detailed_report_keeps_label_order() {
        let m = tls_timeline(Instant::now());

        let want = "\
DNS lookup:          10 ms
TCP connection:      30 ms
TLS handshake:       50 ms
Server processing:  100 ms
Content transfer:   100 ms
Name Lookup:      10 ms
Connect:          40 ms
Pre Transfer:     90 ms
Start Transfer:  190 ms
Total:           290 ms
";
        assert_eq!(m.report(ReportFormat::Detailed), want);
    }

    #[test]
    fn detailed_report_floors_to_millis() {
        let m = Metric {
            dns_lookup: Duration::from_micros(1999),
            total: Duration::from_micros(12_345_678),
            ..Metric::default()
        };
        let report = m.report(ReportFormat::Detailed);
        assert!(report.starts_with("DNS lookup:           1 ms\n"));
        assert!(report.ends_with("Total:          12345 ms\n"));
        assert_eq!(report.lines().count(), 10);
    }

    #[test]
    fn compact_list_has_every_name() {
        let m = tls_timeline(Instant::now());
        let compact = m.report(ReportFormat::Compact);
        let pairs: Vec<&str> = compact.split(", ").collect();
        assert_eq!(pairs.len(), 10);
        for (name, d) in m.durations() {
            let pair = format!("{}: {} ms", name, d.as_millis());
            assert!(pairs.contains(&pair.as_str()), "missing {pair}");
        }
        assert_eq!(format!("{:#}", m), compact);
    }

    #[test]
    fn synthetic_tls_timeline() {
        let m = tls_timeline(Instant::now());

        assert_eq!(m.dns_lookup(), ms(10));
        assert_eq!(m.tcp_connection(), ms(30));
        assert_eq!(m.tls_handshake(), ms(50));
        assert_eq!(m.server_processing(), ms(100));
        assert_eq!(m.content_transfer(), ms(100));
        assert_eq!(m.name_lookup(), ms(10));
        assert_eq!(m.connect(), ms(40));
        assert_eq!(m.pretransfer(), ms(90));
        assert_eq!(m.start_transfer(), ms(190));
        assert_eq!(m.total(), ms(290));
        assert!(m.is_tls());
        assert!(!m.is_reused());
    }

    #[test]
    fn durations_map_matches_accessors() {
        let m = tls_timeline(Instant::now());
        let d = m.durations();

        assert_eq!(d.len(), 10);
        assert_eq!(d["DNSLookup"], m.dns_lookup());
        assert_eq!(d["Pretransfer"], m.pretransfer());
        assert_eq!(d["Total"], m.total());
        assert_eq!(m.durations(), d);
    }

    #[test]
    fn plaintext_request_has_no_handshake() {
        let base = Instant::now();
        let mut m = Metric::new();
        m.dns_start(&DnsStartInfo { host: "example.com" }, base);
        m.dns_done(
            &DnsDoneInfo {
                addrs: &[addr()],
                error: None,
            },
            base + ms(5),
        );
        m.connect_start(addr(), base + ms(5));
        m.connect_done(addr(), None, base + ms(25));
        m.got_conn(fresh(false), base + ms(25));
        m.wrote_request(base + ms(26));
        m.got_first_response_byte(base + ms(76));
        m.finish(base + ms(80));

        assert!(!m.is_tls());
        assert_eq!(m.tls_handshake(), Duration::ZERO);
        assert_eq!(m.pretransfer(), m.connect());
        assert_eq!(m.pretransfer(), ms(25));
        for (name, d) in m.durations() {
            if name != "TLSHandshake" {
                assert!(d > Duration::ZERO, "{name} should be positive");
            }
        }
    }

    #[test]
    fn reused_connection_collapses_setup() {
        let base = Instant::now();
        let mut m = Metric::new();
        m.got_conn(fresh(true), base);
        m.wrote_request(base + ms(1));
        m.got_first_response_byte(base + ms(41));
        m.finish(base + ms(61));

        let at = m.timestamps();
        let pinned = Some(base + ms(1));
        assert_eq!(at.dns_start, pinned);
        assert_eq!(at.dns_done, pinned);
        assert_eq!(at.tcp_start, pinned);
        assert_eq!(at.tcp_done, pinned);
        assert_eq!(at.tls_start, pinned);
        assert_eq!(at.tls_done, pinned);

        assert!(m.is_reused());
        assert_eq!(m.dns_lookup(), Duration::ZERO);
        assert_eq!(m.tcp_connection(), Duration::ZERO);
        assert_eq!(m.tls_handshake(), Duration::ZERO);
        assert_eq!(m.server_processing(), ms(40));
        assert_eq!(m.content_transfer(), ms(20));
        assert_eq!(m.total(), ms(60));
    }

    #[test]
    fn connect_start_anchors_timeline_without_dns() {
        let base = Instant::now();
        let mut m = Metric::new();
        m.connect_start(addr(), base);
        m.connect_done(addr(), None, base + ms(30));

        let at = m.timestamps();
        assert_eq!(at.dns_start, Some(base));
        assert_eq!(at.dns_done, Some(base));
        assert_eq!(m.name_lookup(), Duration::ZERO);
        assert_eq!(m.connect(), ms(30));
        assert_eq!(m.tcp_connection(), ms(30));
    }

    #[test]
    fn wrote_request_backfills_when_no_early_hooks() {
        let base = Instant::now();
        let mut m = Metric::new();
        m.wrote_request(base);
        m.got_first_response_byte(base + ms(10));
        m.finish(base + ms(15));

        let at = m.timestamps();
        assert_eq!(at.dns_start, Some(base));
        assert_eq!(at.tcp_done, Some(base));
        assert_eq!(at.tls_start, None);
        assert_eq!(m.start_transfer(), ms(10));
        assert_eq!(m.total(), ms(15));
    }

    #[test]
    fn finish_without_events_leaves_totals_zero() {
        let now = Instant::now();
        let mut m = Metric::new();
        m.finish(now);

        assert_eq!(m.timestamps().transfer_done, Some(now));
        assert_eq!(m.timestamps().dns_start, None);
        assert_eq!(m.content_transfer(), Duration::ZERO);
        assert_eq!(m.total(), Duration::ZERO);
    }

    #[test]
    fn out_of_order_instants_saturate() {
        let base = Instant::now();
        let mut m = Metric::new();
        m.dns_start(&DnsStartInfo { host: "example.com" }, base + ms(10));
        m.dns_done(
            &DnsDoneInfo {
                addrs: &[],
                error: None,
            },
            base,
        );
        assert_eq!(m.dns_lookup(), Duration::ZERO);
    }
}
