use std::thread;
use std::time::Duration;

use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::{json, Value};
use tracing::debug;

use crate::{error_chain_text, truncate_text, GenerationError, GenerationInput, ImageProvider};

const DEFAULT_API_BASE: &str = "https://api.replicate.com/v1";
const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Replicate predictions API. Predictions that outlive the `Prefer: wait`
/// window are polled until they reach a terminal status; there is no timeout.
pub struct ReplicateProvider {
    api_base: String,
    api_token: String,
    poll_interval: Duration,
    http: HttpClient,
}

impl ReplicateProvider {
    pub fn new(api_token: impl Into<String>) -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_token: api_token.into(),
            poll_interval: POLL_INTERVAL,
            http: HttpClient::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/predictions", self.api_base)
    }

    /// `owner/name:version` pins a version; a bare `owner/name` runs the
    /// model's latest version.
    fn prediction_payload(model: &str, input: &GenerationInput) -> Value {
        match model.split_once(':') {
            Some((_, version)) => json!({"version": version, "input": input}),
            None => json!({"model": model, "input": input}),
        }
    }

    fn poll_prediction(&self, poll_url: &str) -> Result<Value, GenerationError> {
        loop {
            thread::sleep(self.poll_interval);
            let response = self
                .http
                .get(poll_url)
                .bearer_auth(&self.api_token)
                .send()
                .map_err(|err| transport_error("Replicate poll request failed", poll_url, &err))?;
            let payload = response_json_or_error("Replicate poll", response)?;
            match prediction_status(&payload).as_str() {
                "succeeded" => return Ok(payload),
                "failed" | "canceled" => return Err(prediction_failed(&payload)),
                status => debug!(status, poll_url, "Replicate prediction still running"),
            }
        }
    }
}

impl ImageProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
    }

    fn run(&self, model: &str, input: &GenerationInput) -> Result<Value, GenerationError> {
        let endpoint = self.predictions_endpoint();
        let payload = Self::prediction_payload(model, input);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&self.api_token)
            .header("Prefer", "wait")
            .json(&payload)
            .send()
            .map_err(|err| transport_error("Replicate request failed", &endpoint, &err))?;
        let mut prediction = response_json_or_error("Replicate", response)?;

        match prediction_status(&prediction).as_str() {
            "succeeded" => {}
            "starting" | "processing" => {
                let poll_url = prediction
                    .get("urls")
                    .and_then(|urls| urls.get("get"))
                    .and_then(Value::as_str)
                    .map(str::trim)
                    .filter(|value| !value.is_empty())
                    .map(str::to_string)
                    .ok_or_else(|| {
                        GenerationError::Provider(
                            "Replicate prediction missing poll URL".to_string(),
                        )
                    })?;
                prediction = self.poll_prediction(&poll_url)?;
            }
            _ => return Err(prediction_failed(&prediction)),
        }

        Ok(prediction.get("output").cloned().unwrap_or(Value::Null))
    }
}

fn prediction_status(prediction: &Value) -> String {
    prediction
        .get("status")
        .and_then(Value::as_str)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default()
}

fn prediction_failed(prediction: &Value) -> GenerationError {
    let detail = prediction
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| truncate_text(&prediction.to_string(), 512));
    GenerationError::Provider(format!("Replicate prediction failed: {detail}"))
}

fn transport_error(context: &str, url: &str, err: &reqwest::Error) -> GenerationError {
    GenerationError::Transport(format!("{context} ({url}): {}", error_chain_text(err, 512)))
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value, GenerationError> {
    let status = response.status();
    let code = status.as_u16();
    let body = response.text().map_err(|err| {
        GenerationError::Transport(format!(
            "{provider} response body read failed: {}",
            error_chain_text(&err, 512)
        ))
    })?;
    if !status.is_success() {
        return Err(GenerationError::Provider(format!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        )));
    }
    serde_json::from_str(&body).map_err(|err| {
        GenerationError::Provider(format!("{provider} returned invalid JSON payload: {err}"))
    })
}
