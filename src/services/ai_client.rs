//! Client for the optional anomaly detection service.
//!
//! Every call fails open: when the service is unset, unreachable or returns
//! something unexpected, the login is treated as normal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct AiClient {
    client: reqwest::Client,
    base_url: Option<String>,
}

#[derive(Debug, Serialize)]
struct LoginAnalysisRequest<'a> {
    user_id: Uuid,
    ip_address: Option<&'a str>,
    timestamp: DateTime<Utc>,
    user_agent: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct LoginAnalysisResponse {
    is_suspicious: bool,
    #[serde(default)]
    confidence: f64,
    #[serde(default)]
    risk_factors: Vec<String>,
}

/// Context sent to the anomaly detection endpoint.
#[derive(Debug, Serialize)]
pub struct AnomalyRequest<'a> {
    pub user_id: Uuid,
    pub user_email: &'a str,
    pub user_role: &'a str,
    pub ip_address: Option<&'a str>,
    pub user_agent: Option<&'a str>,
    pub login_success: bool,
    pub timestamp: DateTime<Utc>,
    pub recent_activity: serde_json::Value,
    pub analysis_type: &'static str,
}

/// Anomaly reported by the service.
#[derive(Debug, Clone, Deserialize)]
pub struct AiAnomaly {
    #[serde(rename = "type")]
    pub anomaly_type: String,
    pub severity: String,
    pub description: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Default, Deserialize)]
struct AnomalyResponse {
    #[serde(default)]
    anomalies: Vec<AiAnomaly>,
}

impl AiClient {
    pub fn new(base_url: Option<String>) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .map_err(|e| AppError::Internal(format!("HTTP client error: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.map(|url| url.trim_end_matches('/').to_string()),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.base_url.is_some()
    }

    /// `true` when the service flags the login as suspicious.
    pub async fn is_login_suspicious(
        &self,
        user_id: Uuid,
        ip_address: Option<&str>,
        user_agent: Option<&str>,
    ) -> bool {
        let Some(base_url) = &self.base_url else {
            return false;
        };

        let request = LoginAnalysisRequest {
            user_id,
            ip_address,
            timestamp: Utc::now(),
            user_agent,
        };

        let response = self
            .client
            .post(format!("{base_url}/api/v1/analyze/login"))
            .json(&request)
            .send()
            .await;

        let verdict = match response {
            Ok(resp) if resp.status().is_success() => resp.json::<LoginAnalysisResponse>().await,
            Ok(resp) => {
                tracing::warn!("Login analysis returned {}", resp.status());
                return false;
            }
            Err(e) => {
                tracing::warn!("Login analysis unavailable: {}", e);
                return false;
            }
        };

        match verdict {
            Ok(v) if v.is_suspicious => {
                tracing::warn!(
                    "Suspicious login for {} (confidence {:.2}): {}",
                    user_id,
                    v.confidence,
                    v.risk_factors.join(", ")
                );
                true
            }
            Ok(_) => false,
            Err(e) => {
                tracing::warn!("Login analysis response unreadable: {}", e);
                false
            }
        }
    }

    /// Anomalies the service finds in a login event. Empty on any failure.
    pub async fn detect_anomalies(&self, request: &AnomalyRequest<'_>) -> Vec<AiAnomaly> {
        let Some(base_url) = &self.base_url else {
            return Vec::new();
        };

        let response = self
            .client
            .post(format!("{base_url}/api/v1/anomaly/detect"))
            .json(request)
            .send()
            .await;

        match response {
            Ok(resp) if resp.status().is_success() => resp
                .json::<AnomalyResponse>()
                .await
                .map(|r| r.anomalies)
                .unwrap_or_else(|e| {
                    tracing::warn!("Anomaly detection response unreadable: {}", e);
                    Vec::new()
                }),
            Ok(resp) => {
                tracing::warn!("Anomaly detection returned {}", resp.status());
                Vec::new()
            }
            Err(e) => {
                tracing::warn!("Anomaly detection unavailable: {}", e);
                Vec::new()
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_client_fails_open() {
        let client = AiClient::new(None).unwrap();
        assert!(!client.is_enabled());
        assert!(!client.is_login_suspicious(Uuid::new_v4(), None, None).await);
    }

    #[tokio::test]
    async fn unreachable_service_fails_open() {
        // Port 9 (discard) is closed on test machines.
        let client = AiClient::new(Some("http://127.0.0.1:9/".to_string())).unwrap();
        let request = AnomalyRequest {
            user_id: Uuid::new_v4(),
            user_email: "a@example.com",
            user_role: "USER",
            ip_address: Some("10.0.0.1"),
            user_agent: None,
            login_success: false,
            timestamp: Utc::now(),
            recent_activity: serde_json::json!({}),
            analysis_type: "security",
        };
        assert!(client.detect_anomalies(&request).await.is_empty());
    }

    #[test]
    fn anomaly_payload_uses_type_key() {
        let anomaly: AiAnomaly = serde_json::from_value(serde_json::json!({
            "type": "IMPOSSIBLE_TRAVEL",
            "severity": "HIGH",
            "description": "Two countries within an hour"
        }))
        .unwrap();
        assert_eq!(anomaly.anomaly_type, "IMPOSSIBLE_TRAVEL");
        assert!(anomaly.metadata.is_null());
    }
}
