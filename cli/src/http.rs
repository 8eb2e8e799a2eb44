use anyhow::{Context, Result, anyhow};
use reqwest::{Client, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use rollin_core::error::WriteFailure;
use rollin_core::models::{DayKey, DerivedHistory, EntityKey, FieldValue, Snapshot, WriteAck};
use rollin_core::remote::{PlanStore, RemoteStore};

/// [`RemoteStore`] over the `rollin serve` REST API.
pub struct HttpRemoteStore {
    client: Client,
    base: Url,
}

#[derive(Serialize)]
struct WriteBody {
    value: FieldValue,
}

#[derive(Serialize)]
struct ProtocolBody<'a> {
    foods: &'a [String],
}

#[derive(Serialize)]
struct PlanBody<'a> {
    exercises: &'a [String],
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

impl HttpRemoteStore {
    pub fn new(base: &str) -> Result<Self> {
        let base = Url::parse(base).with_context(|| format!("Invalid remote URL: {base}"))?;
        if base.cannot_be_a_base() {
            anyhow::bail!("Invalid remote URL: {base}");
        }
        let client = Client::builder()
            .user_agent(format!(
                "rollin-cli/{} (compliance tracker)",
                env!("CARGO_PKG_VERSION")
            ))
            .connect_timeout(std::time::Duration::from_secs(5))
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, base })
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|()| anyhow!("Invalid remote URL: {}", self.base))?
            .pop_if_empty()
            .push("api")
            .extend(segments);
        Ok(url)
    }

    fn entity_url(&self, key: EntityKey, rest: &[&str]) -> Result<Url> {
        let date = key.day.to_string();
        let mut segments = vec!["days", date.as_str(), key.kind.as_str()];
        segments.extend_from_slice(rest);
        self.url(&segments)
    }

    fn request_id() -> String {
        Uuid::new_v4().to_string()
    }

    async fn send_put<T: Serialize + ?Sized>(&self, url: Url, body: &T) -> Result<()> {
        let response = self
            .client
            .put(url)
            .header("x-request-id", Self::request_id())
            .json(body)
            .send()
            .await
            .context("Failed to reach rollin server")?;
        ensure_success(response).await?;
        Ok(())
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    match response.json::<ErrorBody>().await {
        Ok(body) => body.error,
        Err(_) => status
            .canonical_reason()
            .unwrap_or("request failed")
            .to_string(),
    }
}

async fn ensure_success(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let message = error_message(response).await;
    Err(anyhow!("Server returned {status}: {message}"))
}

impl RemoteStore for HttpRemoteStore {
    async fn fetch_snapshot(&self, key: EntityKey) -> Result<Snapshot> {
        let response = self
            .client
            .get(self.entity_url(key, &[])?)
            .header("x-request-id", Self::request_id())
            .send()
            .await
            .context("Failed to reach rollin server")?;
        ensure_success(response)
            .await?
            .json()
            .await
            .context("Failed to parse snapshot response")
    }

    async fn write_field(
        &self,
        key: EntityKey,
        field: String,
        value: FieldValue,
    ) -> Result<WriteAck, WriteFailure> {
        let url = self
            .entity_url(key, &["fields", field.as_str()])
            .map_err(|e| WriteFailure::Permanent {
                status: StatusCode::BAD_REQUEST.as_u16(),
                message: format!("{e:#}"),
            })?;
        let response = self
            .client
            .put(url)
            .header("x-request-id", Self::request_id())
            .json(&WriteBody { value })
            .send()
            .await
            .map_err(|e| WriteFailure::Transient(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let message = error_message(response).await;
            return Err(WriteFailure::from_status(status.as_u16(), message));
        }
        response
            .json()
            .await
            .map_err(|e| WriteFailure::Transient(format!("unreadable acknowledgment: {e}")))
    }

    async fn fetch_derived_history(&self, range_days: u32) -> Result<DerivedHistory> {
        let mut url = self.url(&["history"])?;
        url.query_pairs_mut()
            .append_pair("days", &range_days.to_string());
        let response = self
            .client
            .get(url)
            .header("x-request-id", Self::request_id())
            .send()
            .await
            .context("Failed to reach rollin server")?;
        ensure_success(response)
            .await?
            .json()
            .await
            .context("Failed to parse history response")
    }
}

impl PlanStore for HttpRemoteStore {
    async fn record_protocol(&self, day: DayKey, foods: Vec<String>) -> Result<()> {
        let date = day.to_string();
        let url = self.url(&["days", date.as_str(), "protocol"])?;
        self.send_put(url, &ProtocolBody { foods: &foods }).await
    }

    async fn record_workout_plan(&self, day: DayKey, exercises: Vec<String>) -> Result<()> {
        let date = day.to_string();
        let url = self.url(&["days", date.as_str(), "plan"])?;
        self.send_put(url, &PlanBody {
            exercises: &exercises,
        })
        .await
    }
}
