//! InfluxDB v2 HTTP write API sink.

use super::{PointSink, WriteError, WriteFuture};
use crate::config::RunConfiguration;
use crate::point::MeasurementPoint;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Url};
use std::time::Duration;

const WRITE_PATH: &str = "api/v2/write";
const LINE_PROTOCOL_CONTENT_TYPE: &str = "text/plain; charset=utf-8";

/// Writes line protocol records to `POST /api/v2/write`.
///
/// One sink is created per run. The request timeout is the only deadline a
/// write is subject to. Building the sink never fails: an unusable URL or
/// client is kept and returned as [`WriteError::Setup`] from every write.
#[derive(Debug, Clone)]
pub struct InfluxDbSink {
    endpoint: Result<Endpoint, WriteError>,
    token: String,
}

#[derive(Debug, Clone)]
struct Endpoint {
    client: Client,
    write_url: Url,
}

impl InfluxDbSink {
    pub fn new(config: &RunConfiguration, timeout: Duration) -> Self {
        Self {
            endpoint: Endpoint::new(&config.sink_url, timeout),
            token: config.sink_token.clone(),
        }
    }

    async fn send(
        &self,
        bucket: &str,
        org: &str,
        point: &MeasurementPoint,
    ) -> Result<(), WriteError> {
        let Endpoint { client, write_url: url } = self.endpoint.as_ref().map_err(Clone::clone)?;

        let response = client
            .post(url.clone())
            .query(&[("org", org), ("bucket", bucket)])
            .header(AUTHORIZATION, format!("Token {}", self.token))
            .header(CONTENT_TYPE, LINE_PROTOCOL_CONTENT_TYPE)
            .body(point.to_string())
            .send()
            .await
            .map_err(|e| WriteError::Transport(e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        Err(WriteError::Rejected {
            status: status.as_u16(),
            body,
        })
    }
}

impl PointSink for InfluxDbSink {
    fn write<'a>(
        &'a self,
        bucket: &'a str,
        org: &'a str,
        point: &'a MeasurementPoint,
    ) -> WriteFuture<'a> {
        Box::pin(self.send(bucket, org, point))
    }
}

impl Endpoint {
    fn new(base: &str, timeout: Duration) -> Result<Self, WriteError> {
        let write_url = write_url(base)?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| WriteError::Setup(e.to_string()))?;
        Ok(Self { client, write_url })
    }
}

/// Resolve the write endpoint below `base`, keeping any path prefix.
fn write_url(base: &str) -> Result<Url, WriteError> {
    let mut base = Url::parse(base).map_err(|e| WriteError::Setup(format!("{base}: {e}")))?;
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join(WRITE_PATH).map_err(|e| WriteError::Setup(e.to_string()))
}
