//! Backend adapters: typed API transports plus the client-level
//! operations built on top of them.

pub mod assistants;
pub mod fine_tuning;
pub mod gemini;
pub mod openai;
pub mod vertex;

use futures_util::StreamExt;
use reqwest::{Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use crate::ProviderError;

/// Maps a reqwest failure onto the backend error class.
pub(crate) fn transport_error(error: reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::backend_retryable(error.to_string())
    } else {
        ProviderError::backend(error.to_string())
    }
}

/// Turns a non-success response into a backend error, preserving the
/// upstream message and status.
pub(crate) async fn response_error(response: Response) -> ProviderError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = extract_error_message(&body)
        .unwrap_or_else(|| format!("backend request failed with status {status}"));

    classify_status(status, message)
}

pub(crate) fn classify_status(status: StatusCode, message: String) -> ProviderError {
    let retryable = matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::REQUEST_TIMEOUT
            | StatusCode::GATEWAY_TIMEOUT
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::INTERNAL_SERVER_ERROR
    );

    let error = if retryable {
        ProviderError::backend_retryable(message)
    } else {
        ProviderError::backend(message)
    };

    error.with_status(status.as_u16())
}

/// Awaits and decodes a JSON response, routing failures through the
/// shared error classification.
pub(crate) async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    if !response.status().is_success() {
        return Err(response_error(response).await);
    }

    response.json::<T>().await.map_err(transport_error)
}

/// Collects the `data:` payloads of a server-sent event stream. The
/// `[DONE]` sentinel (when the backend sends one) terminates the read.
pub(crate) async fn read_sse_payloads(response: Response) -> Result<Vec<String>, ProviderError> {
    if !response.status().is_success() {
        return Err(response_error(response).await);
    }

    let mut chunks = response.bytes_stream();
    let mut buffer = String::new();
    let mut payloads = Vec::new();

    while let Some(item) = chunks.next().await {
        let bytes = item.map_err(transport_error)?;
        let text = std::str::from_utf8(&bytes)
            .map_err(|err| ProviderError::backend(err.to_string()))?;
        buffer.push_str(text);

        while let Some(newline_index) = buffer.find('\n') {
            let line = buffer.drain(..=newline_index).collect::<String>();
            let line = line.trim();

            if !line.starts_with("data:") {
                continue;
            }

            let payload = line.trim_start_matches("data:").trim();
            if payload == "[DONE]" {
                return Ok(payloads);
            }

            payloads.push(payload.to_string());
        }
    }

    Ok(payloads)
}

fn extract_error_message(body: &str) -> Option<String> {
    let parsed = serde_json::from_str::<ApiErrorEnvelope>(body).ok()?;
    Some(parsed.error.message)
}

#[derive(Debug, Deserialize)]
struct ApiErrorEnvelope {
    error: ApiError,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_marks_transient_failures_retryable() {
        let error = classify_status(StatusCode::TOO_MANY_REQUESTS, "slow down".to_string());
        assert!(error.retryable);
        assert_eq!(error.status, Some(429));

        let error = classify_status(StatusCode::BAD_REQUEST, "bad input".to_string());
        assert!(!error.retryable);
        assert_eq!(error.status, Some(400));
    }

    #[test]
    fn error_messages_are_extracted_from_the_envelope() {
        let body = "{\"error\":{\"message\":\"model overloaded\"}}";
        assert_eq!(
            extract_error_message(body),
            Some("model overloaded".to_string())
        );
        assert_eq!(extract_error_message("not json"), None);
    }
}
