//! Outbound HTTP over `reqwest`'s blocking client.
//!
//! Calls arrive on the blocking pool, never on a runtime worker, so the
//! blocking client is safe to build per request with that request's
//! timeout.

use std::time::Duration;

use deskhog_core::{DownloadStream, HttpClient, HttpError};
use reqwest::blocking::{Client, Response};
use tracing::debug;

const USER_AGENT: &str = concat!("deskhog-portal/", env!("CARGO_PKG_VERSION"));

#[derive(Debug, Default)]
pub struct ReqwestHttp;

impl ReqwestHttp {
    pub fn new() -> Self {
        Self
    }

    fn get(&self, url: &str, timeout: Duration) -> Result<Response, HttpError> {
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| HttpError::Transport(e.to_string()))?;

        let response = client.get(url).send().map_err(map_error)?;
        let status = response.status();
        debug!(url, %status, "HTTP response");
        if !status.is_success() {
            return Err(HttpError::Status(status.as_u16()));
        }
        Ok(response)
    }
}

fn map_error(e: reqwest::Error) -> HttpError {
    if e.is_timeout() {
        HttpError::Timeout
    } else {
        HttpError::Transport(e.to_string())
    }
}

impl HttpClient for ReqwestHttp {
    fn get_text(&self, url: &str, timeout: Duration) -> Result<String, HttpError> {
        self.get(url, timeout)?.text().map_err(map_error)
    }

    fn open_download(&self, url: &str, timeout: Duration) -> Result<DownloadStream, HttpError> {
        let response = self.get(url, timeout)?;
        Ok(DownloadStream {
            content_length: response.content_length(),
            body: Box::new(response),
        })
    }
}
