use reqwest::blocking::Client;
use std::sync::OnceLock;
use std::time::Duration;
use thiserror::Error;

/// Whole-request timeout for a script-initiated JSON POST.
const TOTAL_TIMEOUT: Duration = Duration::from_secs(60);
/// Connection-establishment timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Error)]
#[error("http post failed: {0}")]
pub struct HttpPostError(String);

/// Posts JSON payloads for the script host's `httpJsonPost`.
///
/// The call is synchronous inside the script evaluation with its own
/// timeouts; failures are reported on the event stream and never abort the
/// migration. The client is built on first use and reused.
#[derive(Default)]
pub struct HttpPoster {
    client: OnceLock<Option<Client>>,
}

impl HttpPoster {
    pub fn new() -> Self {
        Self::default()
    }

    fn client(&self) -> Option<&Client> {
        self.client
            .get_or_init(|| {
                Client::builder()
                    .timeout(TOTAL_TIMEOUT)
                    .connect_timeout(CONNECT_TIMEOUT)
                    .build()
                    .map_err(|e| log::error!("http client init failed: {}", e))
                    .ok()
            })
            .as_ref()
    }

    /// POST the payload as `application/json`; returns the response status.
    pub fn post_json(&self, url: &str, payload: &str) -> Result<u16, HttpPostError> {
        let client = self
            .client()
            .ok_or_else(|| HttpPostError("client unavailable".to_string()))?;

        let response = client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_string())
            .send()
            .map_err(|e| HttpPostError(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}
