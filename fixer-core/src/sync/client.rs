//! Remote API boundary and its HTTP implementation.

use crate::queue::SubmissionPayload;
use crate::sync::models::ResourceRecord;
use crate::{FixerError, Result};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::time::Duration;

/// Header carrying the per-item deduplication key.
pub const IDEMPOTENCY_HEADER: &str = "Idempotency-Key";

/// Remote backend the sync engine and geo cache talk to.
///
/// Every write carries an idempotency key that stays the same across retries
/// of the same queued item.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait RemoteApi: Send + Sync {
    async fn create_report(&self, payload: &SubmissionPayload, idempotency_key: &str)
        -> Result<()>;

    async fn create_verification(
        &self,
        payload: &SubmissionPayload,
        idempotency_key: &str,
    ) -> Result<()>;

    /// Fetch resource records, optionally restricted to one resource type.
    async fn list_resources(&self, resource_type: Option<String>) -> Result<Vec<ResourceRecord>>;

    /// Whether the backend is reachable and healthy.
    async fn health(&self) -> Result<bool>;
}

/// HTTP client for the FIXER REST backend.
pub struct HttpRemoteApi {
    client: reqwest::Client,
    base_url: String,
}

impl HttpRemoteApi {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FixerError::Remote(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    async fn post(&self, path: &str, body: &Value, idempotency_key: &str) -> Result<()> {
        let url = format!("{}{}", self.base_url, path);
        let resp = self
            .client
            .post(&url)
            .header(IDEMPOTENCY_HEADER, idempotency_key)
            .json(body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_else(|_| "unknown".to_string());
            return Err(FixerError::Remote(format!(
                "Server error {}: {}",
                status, body
            )));
        }
        Ok(())
    }
}

/// Request body for a new report. The device id is withheld for anonymous
/// reports.
pub fn report_body(payload: &SubmissionPayload) -> Value {
    let mut body = json!({
        "type": payload.report_type,
        "location": payload.location,
        "description": payload.description,
        "is_anonymous": payload.anonymous,
    });
    if !payload.anonymous {
        body["device_id"] = json!(payload.device_id);
    }
    body
}

/// Request body for a verification of an existing report.
pub fn verification_body(payload: &SubmissionPayload) -> Value {
    json!({
        "report_id": payload.report_id,
        "type": payload.report_type,
        "location": payload.location,
        "is_accurate": payload.is_accurate.unwrap_or(true),
        "device_id": payload.device_id,
    })
}

#[async_trait]
impl RemoteApi for HttpRemoteApi {
    async fn create_report(
        &self,
        payload: &SubmissionPayload,
        idempotency_key: &str,
    ) -> Result<()> {
        self.post("/reports", &report_body(payload), idempotency_key)
            .await
    }

    async fn create_verification(
        &self,
        payload: &SubmissionPayload,
        idempotency_key: &str,
    ) -> Result<()> {
        self.post("/verifications", &verification_body(payload), idempotency_key)
            .await
    }

    async fn list_resources(&self, resource_type: Option<String>) -> Result<Vec<ResourceRecord>> {
        let url = format!("{}/resources", self.base_url);
        let mut request = self.client.get(&url);
        if let Some(resource_type) = &resource_type {
            request = request.query(&[("type", resource_type)]);
        }

        let resp = request.send().await?;
        if !resp.status().is_success() {
            return Err(FixerError::Remote(format!(
                "Resource fetch failed: {}",
                resp.status()
            )));
        }
        Ok(resp.json().await?)
    }

    async fn health(&self) -> Result<bool> {
        let url = format!("{}/health", self.base_url);
        let resp = self.client.get(&url).send().await?;
        Ok(resp.status().is_success())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::LatLng;

    #[test]
    fn base_url_is_normalized() {
        let api = HttpRemoteApi::new("https://fixer.example/api/v1/", Duration::from_secs(5))
            .unwrap();
        assert_eq!(api.base_url(), "https://fixer.example/api/v1");
    }

    #[test]
    fn anonymous_report_omits_device() {
        let mut payload = SubmissionPayload::report("danger", LatLng::new(50.45, 30.52))
            .with_description("Shelling near the station")
            .anonymous();
        payload.device_id = "0123456789abcdef0123456789abcdef".to_string();

        let body = report_body(&payload);
        assert_eq!(body["type"], "danger");
        assert_eq!(body["is_anonymous"], true);
        assert_eq!(body["description"], "Shelling near the station");
        assert!(body.get("device_id").is_none());
    }

    #[test]
    fn named_report_carries_device() {
        let mut payload = SubmissionPayload::report("safe", LatLng::new(49.84, 24.03));
        payload.device_id = "abc".to_string();

        let body = report_body(&payload);
        assert_eq!(body["device_id"], "abc");
        assert_eq!(body["location"]["lat"], 49.84);
    }

    #[test]
    fn verification_body_references_report() {
        let payload =
            SubmissionPayload::verification("report-9", "checkpoint", LatLng::new(48.0, 35.0), false);
        let body = verification_body(&payload);
        assert_eq!(body["report_id"], "report-9");
        assert_eq!(body["is_accurate"], false);
    }

    #[tokio::test]
    async fn mock_records_idempotency_key() {
        let mut api = MockRemoteApi::new();
        api.expect_create_report()
            .withf(|_, key| key.to_string() == "report-1234")
            .times(1)
            .returning(|_, _| Ok(()));

        let payload = SubmissionPayload::report("danger", LatLng::new(50.0, 30.0));
        api.create_report(&payload, "report-1234").await.unwrap();
    }
}
