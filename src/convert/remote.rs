//! HTTP client for the remote conversion service
//!
//! POSTs a JSON [`ConversionRequest`] to `<endpoint>/convert/` and reads the
//! converted recording back from the JSON response.

use super::{ConversionRequest, ConversionResponse, Converter};
use crate::config::RemoteConfig;
use crate::error::ConversionError;
use std::time::Duration;

#[derive(Debug)]
pub struct RemoteConverter {
    /// Full URL of the convert route
    url: String,
    /// Optional bearer token
    api_key: Option<String>,
    timeout: Duration,
}

impl RemoteConverter {
    pub fn new(config: &RemoteConfig) -> Result<Self, ConversionError> {
        let endpoint = config.endpoint.trim();
        if endpoint.is_empty() {
            return Err(ConversionError::Config(
                "remote.endpoint is required for conversion".into(),
            ));
        }
        if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
            return Err(ConversionError::Config(format!(
                "remote.endpoint must start with http:// or https://, got: {}",
                endpoint
            )));
        }
        if config.timeout_secs == 0 {
            return Err(ConversionError::Config(
                "remote.timeout_secs must be greater than zero".into(),
            ));
        }

        if endpoint.starts_with("http://") && !is_local(endpoint) {
            tracing::warn!(
                "Conversion endpoint uses HTTP without TLS. Recordings will be transmitted unencrypted!"
            );
        }

        let url = convert_url(endpoint);
        let timeout = Duration::from_secs(config.timeout_secs);

        tracing::debug!(
            "Configured conversion client: url={}, timeout={}s",
            url,
            timeout.as_secs()
        );

        Ok(Self {
            url,
            api_key: config.api_key.clone(),
            timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

fn is_local(endpoint: &str) -> bool {
    endpoint.contains("localhost") || endpoint.contains("127.0.0.1") || endpoint.contains("[::1]")
}

fn convert_url(endpoint: &str) -> String {
    format!("{}/convert/", endpoint.trim_end_matches('/'))
}

impl Converter for RemoteConverter {
    fn convert(&self, request: &ConversionRequest) -> Result<ConversionResponse, ConversionError> {
        tracing::debug!(
            "Sending {} bytes of {} audio for speaker {}",
            request.audio_data.len(),
            request.audio_format,
            request.target_speaker
        );
        let start = std::time::Instant::now();

        let mut http = ureq::post(&self.url)
            .timeout(self.timeout)
            .set("Accept", "application/json");
        if let Some(ref key) = self.api_key {
            http = http.set("Authorization", &format!("Bearer {}", key));
        }

        let response = http.send_json(request).map_err(|e| match e {
            ureq::Error::Status(status, resp) => {
                let body = resp.into_string().unwrap_or_default();
                ConversionError::Server { status, body }
            }
            ureq::Error::Transport(t) => ConversionError::Network(format!("Request failed: {}", t)),
        })?;

        let converted: ConversionResponse = response.into_json().map_err(|e| {
            ConversionError::BadResponse(format!("Failed to parse response: {}", e))
        })?;

        tracing::info!(
            "Conversion completed in {:.2}s ({} bytes received)",
            start.elapsed().as_secs_f32(),
            converted.audio_data.len()
        );

        Ok(converted)
    }
}
