//! Client for the external mastery-estimation service.
//!
//! The service keeps a per (user, skill) knowledge-tracing state. After each
//! answered question we post the outcome to `/update` and read the refreshed
//! estimate back from `/next`.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum MasteryError {
    #[error("Mastery service request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Mastery service returned {0}")]
    Status(reqwest::StatusCode),
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UpdateRequest<'a> {
    user_id: Uuid,
    skill_id: &'a str,
    correct: bool,
}

#[derive(Debug, Deserialize)]
pub struct UpdateResponse {
    pub posterior_mastery: f64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct NextRequest<'a> {
    user_id: Uuid,
    skill_id: &'a str,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NextResponse {
    pub mastery: f64,
    #[serde(default)]
    pub recommended_difficulty: Option<String>,
}

#[derive(Debug, Clone)]
pub struct MasteryClient {
    http: reqwest::Client,
    base_url: String,
}

impl MasteryClient {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, MasteryError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub async fn update(
        &self,
        user_id: Uuid,
        skill_id: &str,
        correct: bool,
    ) -> Result<UpdateResponse, MasteryError> {
        let body = UpdateRequest {
            user_id,
            skill_id,
            correct,
        };
        self.post("update", &body).await
    }

    pub async fn next(&self, user_id: Uuid, skill_id: &str) -> Result<NextResponse, MasteryError> {
        self.post("next", &NextRequest { user_id, skill_id }).await
    }

    /// Report an answer and fetch the resulting estimate.
    ///
    /// Never fails: any service error is logged and yields `None`, which
    /// leaves the stored mastery untouched.
    pub async fn estimate_after_answer(
        &self,
        user_id: Uuid,
        skill_id: &str,
        correct: bool,
    ) -> Option<f64> {
        let posterior = match self.update(user_id, skill_id, correct).await {
            Ok(update) => Some(update.posterior_mastery),
            Err(e) => {
                warn!(%user_id, skill_id, error = %e, "mastery update failed");
                return None;
            }
        };

        let estimate = match self.next(user_id, skill_id).await {
            Ok(next) => {
                debug!(
                    %user_id,
                    skill_id,
                    mastery = next.mastery,
                    difficulty = next.recommended_difficulty.as_deref().unwrap_or("-"),
                    "mastery estimate refreshed"
                );
                Some(next.mastery)
            }
            Err(e) => {
                warn!(%user_id, skill_id, error = %e, "mastery lookup failed");
                posterior
            }
        };
        estimate.map(|m| m.clamp(0.0, 1.0))
    }

    async fn post<B, R>(&self, path: &str, body: &B) -> Result<R, MasteryError>
    where
        B: Serialize + ?Sized,
        R: serde::de::DeserializeOwned,
    {
        let url = format!("{}/{path}", self.base_url);
        let response = self.http.post(&url).json(body).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MasteryError::Status(status));
        }
        Ok(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{json, Value};

    async fn mock_service(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[test]
    fn test_wire_shapes() {
        let user_id = Uuid::new_v4();
        let body = serde_json::to_value(UpdateRequest {
            user_id,
            skill_id: "algebra",
            correct: true,
        })
        .unwrap();
        assert_eq!(body["userId"], user_id.to_string());
        assert_eq!(body["skillId"], "algebra");
        assert_eq!(body["correct"], true);

        let next: NextResponse = serde_json::from_value(json!({
            "userId": "u",
            "skillId": "algebra",
            "mastery": 0.42,
            "recommendedDifficulty": "medium"
        }))
        .unwrap();
        assert_eq!(next.mastery, 0.42);
        assert_eq!(next.recommended_difficulty.as_deref(), Some("medium"));
    }

    #[tokio::test]
    async fn test_estimate_uses_next() {
        let router = Router::new()
            .route(
                "/update",
                post(|Json(body): Json<Value>| async move {
                    assert_eq!(body["correct"], true);
                    Json(json!({ "posterior_mastery": 0.5 }))
                }),
            )
            .route(
                "/next",
                post(|| async {
                    Json(json!({ "mastery": 0.61, "recommendedDifficulty": "hard" }))
                }),
            );
        let base = mock_service(router).await;
        let client = MasteryClient::new(&base, Duration::from_secs(5)).unwrap();

        let estimate = client
            .estimate_after_answer(Uuid::new_v4(), "algebra", true)
            .await;
        assert_eq!(estimate, Some(0.61));
    }

    #[tokio::test]
    async fn test_estimate_tolerates_failures() {
        let router = Router::new()
            .route(
                "/update",
                post(|| async { Json(json!({ "posterior_mastery": 0.3 })) }),
            )
            .route(
                "/next",
                post(|| async { axum::http::StatusCode::INTERNAL_SERVER_ERROR }),
            );
        let base = mock_service(router).await;
        let client = MasteryClient::new(&base, Duration::from_secs(5)).unwrap();
        let user = Uuid::new_v4();

        // /next failed: fall back to the posterior from /update.
        assert_eq!(client.estimate_after_answer(user, "algebra", false).await, Some(0.3));

        // Nothing listening at all.
        let dead = MasteryClient::new("http://127.0.0.1:9", Duration::from_millis(500)).unwrap();
        assert_eq!(dead.estimate_after_answer(user, "algebra", true).await, None);
    }
}
