//! Transport for optimisation requests
//!
//! The optimisation service exposes `POST /runopt` for the initial plan
//! and `POST /reoptimization` for a plan recomputed from the athlete's
//! live state. Both reply with `{"result": "Success"}` once the new plan
//! has been published.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;

use crate::config::OptimizationConfig;
use crate::error::ReoptError;

/// Live state the new plan should start from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LiveState {
    /// Distance covered, net of the lead-in offset
    pub distance: f64,
    pub speed: f64,
    pub w_bal: f64,
    /// Attempt number within the session, starting at 1
    pub attempt: u32,
}

/// Payload of `POST /reoptimization`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReoptimizationRequest {
    #[serde(flatten)]
    pub config: OptimizationConfig,
    #[serde(flatten)]
    pub state: LiveState,
}

/// Reply of the optimisation service
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReoptimizationResponse {
    pub result: String,
}

impl ReoptimizationResponse {
    pub const SUCCESS: &'static str = "Success";

    pub fn success() -> Self {
        Self {
            result: Self::SUCCESS.to_string(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.result == Self::SUCCESS
    }
}

/// Request/response channel to the optimisation service
#[async_trait]
pub trait ReoptClient: Send + Sync {
    /// Ask for a plan recomputed from the athlete's live state
    async fn reoptimize(
        &self,
        request: &ReoptimizationRequest,
    ) -> Result<ReoptimizationResponse, ReoptError>;

    /// Ask for the initial plan of a race
    async fn run_optimization(
        &self,
        config: &OptimizationConfig,
    ) -> Result<ReoptimizationResponse, ReoptError>;
}

/// HTTP client for the optimisation service
#[derive(Debug, Clone)]
pub struct HttpReoptClient {
    http: reqwest::Client,
    base_url: String,
}

impl HttpReoptClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, ReoptError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ReoptError::Transport(e.to_string()))?;

        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    async fn post<T: Serialize + Sync>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<ReoptimizationResponse, ReoptError> {
        let url = format!("{}{}", self.base_url, endpoint);
        debug!(%url, "Posting optimisation request");

        let response = self
            .http
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| ReoptError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ReoptError::Status {
                status: status.as_u16(),
            });
        }

        response
            .json::<ReoptimizationResponse>()
            .await
            .map_err(|e| ReoptError::MalformedResponse(e.to_string()))
    }
}

#[async_trait]
impl ReoptClient for HttpReoptClient {
    async fn reoptimize(
        &self,
        request: &ReoptimizationRequest,
    ) -> Result<ReoptimizationResponse, ReoptError> {
        self.post("/reoptimization", request).await
    }

    async fn run_optimization(
        &self,
        config: &OptimizationConfig,
    ) -> Result<ReoptimizationResponse, ReoptError> {
        self.post("/runopt", config).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{IntegrationMethod, Route};

    #[test]
    fn test_request_wire_format() {
        let request = ReoptimizationRequest {
            config: OptimizationConfig {
                route: Route::HillyRoute,
                integration_method: IntegrationMethod::Rk4,
                ..OptimizationConfig::default()
            },
            state: LiveState {
                distance: 4200.0,
                speed: 9.5,
                w_bal: 12000.0,
                attempt: 2,
            },
        };

        let value = serde_json::to_value(&request).unwrap();
        assert_eq!(value["route"], "hilly_route");
        assert_eq!(value["integration_method"], "RK4");
        assert_eq!(value["w_prime"], 26630.0);
        assert_eq!(value["num_laps"], 1);
        assert_eq!(value["max_power"], 1000.0);
        assert_eq!(value["negative_split"], false);
        assert_eq!(value["bound_start"], 0.0);
        assert_eq!(value["distance"], 4200.0);
        assert_eq!(value["w_bal"], 12000.0);
        assert_eq!(value["attempt"], 2);
    }

    #[test]
    fn test_response_success_tag() {
        let ok: ReoptimizationResponse = serde_json::from_str(r#"{"result":"Success"}"#).unwrap();
        assert!(ok.is_success());

        let other: ReoptimizationResponse =
            serde_json::from_str(r#"{"result":"Infeasible"}"#).unwrap();
        assert!(!other.is_success());
    }

    #[test]
    fn test_base_url_trailing_slash() {
        let client = HttpReoptClient::new("http://localhost:5000/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url, "http://localhost:5000");
    }
}
