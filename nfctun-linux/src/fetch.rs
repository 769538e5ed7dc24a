//! HTTP fetch port: GET the locator, buffer the whole body.

use std::time::Duration;

use nfctun_core::{FetchError, Fetcher, Locator};
use tokio::runtime::Handle;
use tracing::debug;

const MAX_REDIRECTS: usize = 10;

/// Blocking adapter over an async `reqwest` client; runs requests on the given runtime.
pub struct HttpFetcher {
    client: reqwest::Client,
    handle: Handle,
}

impl HttpFetcher {
    pub fn new(
        handle: Handle,
        user_agent: &str,
        timeout: Option<Duration>,
    ) -> Result<Self, reqwest::Error> {
        let mut builder = reqwest::Client::builder()
            .user_agent(user_agent)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS));
        if let Some(t) = timeout {
            builder = builder.timeout(t);
        }
        Ok(Self {
            client: builder.build()?,
            handle,
        })
    }

    async fn get(&self, locator: &str) -> Result<Vec<u8>, FetchError> {
        let url = reqwest::Url::parse(locator)
            .map_err(|e| FetchError::InvalidLocator(format!("{locator:?}: {e}")))?;
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::Status(status.as_u16()));
        }
        let body = resp
            .bytes()
            .await
            .map_err(|e| FetchError::Network(e.to_string()))?;
        debug!(bytes = body.len(), "download complete");
        Ok(body.to_vec())
    }
}

impl Fetcher for HttpFetcher {
    /// Must be called from outside the runtime's async context, on a multi-thread runtime.
    fn fetch(&mut self, locator: &Locator) -> Result<Vec<u8>, FetchError> {
        let handle = self.handle.clone();
        handle.block_on(self.get(locator.as_str()))
    }
}
