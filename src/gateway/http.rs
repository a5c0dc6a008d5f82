//! HTTP telemetry publisher.

use super::{GatewayError, Publisher, TelemetrySnapshot};

use std::time::Duration;

/// POSTs snapshots as JSON to the gateway.
pub struct HttpPublisher {
    client: reqwest::Client,
    url: String,
}

impl HttpPublisher {
    pub fn new(url: &str, timeout: Duration) -> Result<Self, GatewayError> {
        let url = if url.starts_with("http://") || url.starts_with("https://") {
            url.to_string()
        } else {
            format!("http://{}", url)
        };

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()
            .map_err(|e| GatewayError::Disconnect(e.to_string()))?;

        Ok(Self { client, url })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Publisher for HttpPublisher {
    async fn publish(&self, snapshot: &TelemetrySnapshot) -> Result<(), GatewayError> {
        let response = self
            .client
            .post(&self.url)
            .json(snapshot)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    GatewayError::ConnectTimeout
                } else {
                    GatewayError::Disconnect(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GatewayError::Rejected(status.as_u16()));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_added() {
        let p = HttpPublisher::new("gateway.local:9000/telemetry", Duration::from_secs(1)).unwrap();
        assert_eq!(p.url(), "http://gateway.local:9000/telemetry");
    }

    #[tokio::test]
    async fn test_publish_to_unreachable_host_fails() {
        let p = HttpPublisher::new("http://256.256.256.256", Duration::from_millis(100)).unwrap();
        let result = p.publish(&TelemetrySnapshot::sample()).await;
        assert!(result.is_err());
    }
}
