use std::time::Duration;

use switchboard_core::errors::AdapterError;

const MAX_ERROR_BODY: usize = 500;

pub(crate) fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(timeout)
        .user_agent(concat!("switchboard/", env!("CARGO_PKG_VERSION")))
        .build()
        .unwrap_or_default()
}

/// Map a transport-level failure onto the adapter taxonomy.
pub(crate) fn classify(err: reqwest::Error, timeout: Duration) -> AdapterError {
    if err.is_timeout() {
        AdapterError::Timeout(timeout)
    } else if err.is_decode() {
        AdapterError::Rejected(format!("unreadable response body: {err}"))
    } else {
        AdapterError::Network(err.to_string())
    }
}

/// Pass successful responses through; turn HTTP errors into adapter errors.
pub(crate) async fn check_status(
    response: reqwest::Response,
) -> Result<reqwest::Response, AdapterError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let mut body = response.text().await.unwrap_or_default();
    if body.len() > MAX_ERROR_BODY {
        let mut end = MAX_ERROR_BODY;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        body.truncate(end);
    }
    Err(AdapterError::from_status(status.as_u16(), body))
}

/// Join a configured base URL and an API path.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}{}", base_url.trim_end_matches('/'), path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_joins_without_double_slash() {
        assert_eq!(
            endpoint("https://restapi.amap.com/", "/v3/weather/weatherInfo"),
            "https://restapi.amap.com/v3/weather/weatherInfo"
        );
        assert_eq!(endpoint("http://127.0.0.1:9", "/x"), "http://127.0.0.1:9/x");
    }

    #[tokio::test]
    async fn connection_refused_is_retryable() {
        let client = build_client(Duration::from_secs(2));
        // Port 9 (discard) is closed on test hosts.
        let err = client.get("http://127.0.0.1:9/").send().await.unwrap_err();
        let classified = classify(err, Duration::from_secs(2));
        assert!(classified.is_retryable(), "got {classified:?}");
    }
}
