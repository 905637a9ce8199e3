use crate::config::ClientConfig;
use crate::http::client::Client;
use crate::metric::Metric;
use crate::trace::with_http_metrics;
use anyhow::Context;
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::Request;
use std::time::Instant;

/// One request together with the metric that will time it.
///
/// Sending consumes the value: a metric is never carried over to a second
/// request.
pub struct MetricResult {
    metric: Metric,
    request: Request<Full<Bytes>>,
}

impl MetricResult {
    pub fn new(request: Request<Full<Bytes>>) -> Self {
        Self {
            metric: Metric::new(),
            request,
        }
    }

    /// Sends the request on a default-configured client, drains the response
    /// body and finishes the metric.
    ///
    /// The metric is returned even when the exchange fails; it is then
    /// partial and only the error should be trusted.
    pub async fn send(self) -> (Metric, Result<(), anyhow::Error>) {
        match Client::new(ClientConfig::default()) {
            Ok(mut client) => self.send_with(&mut client).await,
            Err(e) => (self.metric, Err(e)),
        }
    }

    /// Like [`MetricResult::send`], on a caller-owned client so pooled
    /// connections carry over between requests.
    pub async fn send_with(self, client: &mut Client) -> (Metric, Result<(), anyhow::Error>) {
        let MetricResult {
            mut metric,
            request,
        } = self;
        let outcome = exchange(client, request, &mut metric).await;
        if let Err(e) = &outcome {
            debug!("request failed: {:#}", e);
        }
        (metric, outcome)
    }
}

async fn exchange(
    client: &mut Client,
    request: Request<Full<Bytes>>,
    metric: &mut Metric,
) -> Result<(), anyhow::Error> {
    let response = client.execute(with_http_metrics(request, metric)).await?;

    let body = response
        .into_body()
        .collect()
        .await
        .context("Failed to read response body")?
        .to_bytes();
    trace!(bytes = body.len(), "response body drained");

    metric.finish(Instant::now());
    Ok(())
}
