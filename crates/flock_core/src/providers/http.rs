//! HTTP seam shared by all adapters
use crate::providers::Lookup;
use crate::providers::errors::FetchError;
use async_trait::async_trait;
use core::time::Duration;
use reqwest::redirect::Policy;
use reqwest::{ClientBuilder, header};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Status and raw body of a completed HTTP exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl HttpResponse {
    #[must_use]
    #[inline]
    pub const fn new(status: u16, body: Vec<u8>) -> Self {
        Self { status, body }
    }

    #[must_use]
    #[inline]
    pub const fn is_success(&self) -> bool {
        self.status >= 200 && self.status < 300
    }

    /// # Errors
    /// Fails if the body is not JSON of the requested shape.
    #[inline]
    pub fn json<T: DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }
}

/// Everything the adapters need from the network. Any non-transport outcome, including 4xx and
/// 5xx statuses, is returned as a response.
#[async_trait]
pub trait HttpFetch: Send + Sync {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, FetchError>;

    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<HttpResponse, FetchError>;
}

/// GET a JSON document and map the exchange onto a [`Lookup`]: transport failures and
/// non-success statuses are "not found", an unparsable body is "malformed".
#[allow(clippy::missing_inline_in_public_items, reason = "Shared by every adapter")]
pub async fn get_json<T: DeserializeOwned>(
    fetch: &dyn HttpFetch,
    url: &str,
    headers: &[(&str, &str)],
) -> Lookup<T> {
    let response = match fetch.get(url, headers).await {
        Ok(response) => response,
        Err(error) => {
            tracing::warn!(%url, %error, "provider request failed");
            return Lookup::NotFound;
        }
    };

    if !response.is_success() {
        tracing::debug!(%url, status = response.status, "provider returned no data");
        return Lookup::NotFound;
    }

    match response.json::<T>() {
        Ok(value) => Lookup::Found(value),
        Err(error) => {
            tracing::warn!(%url, %error, "provider response has unexpected shape");
            Lookup::Malformed(error.to_string())
        }
    }
}

pub struct ReqwestFetcher {
    /// A HTTP client used to execute all provider requests
    http_client: reqwest::Client,
}

impl ReqwestFetcher {
    /// Create a new HTTP request client, to be used for all subsequent provider requests
    /// # Errors
    /// Fails in case any of the reqwest `ClientBuilder` methods fail
    #[allow(
        clippy::missing_inline_in_public_items,
        reason = "Called once per program run"
    )]
    pub fn new() -> Result<Self, FetchError> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static("application/json, image/*;q=0.9, */*;q=0.8"),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("en-US,en;q=0.9"),
        );
        let client = ClientBuilder::new()
            .user_agent(concat!("flock-worker/", env!("CARGO_PKG_VERSION")))
            .default_headers(headers)
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(25))
            .redirect(Policy::limited(10))
            .pool_idle_timeout(Duration::from_secs(30))
            .build();

        client
            .map(|http_client| Self { http_client })
            .map_err(|err| FetchError::Client(err.to_string()))
    }

    async fn complete(
        url: &str,
        request: reqwest::RequestBuilder,
    ) -> Result<HttpResponse, FetchError> {
        let transport = |source| FetchError::Transport {
            url: url.to_owned(),
            source,
        };
        let response = request.send().await.map_err(transport)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(transport)?;
        Ok(HttpResponse::new(status, body.to_vec()))
    }
}

#[async_trait]
impl HttpFetch for ReqwestFetcher {
    async fn get(&self, url: &str, headers: &[(&str, &str)]) -> Result<HttpResponse, FetchError> {
        let mut request = self.http_client.get(url);
        for &(name, value) in headers {
            request = request.header(name, value);
        }
        Self::complete(url, request).await
    }

    async fn post_json(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: &Value,
    ) -> Result<HttpResponse, FetchError> {
        let mut request = self
            .http_client
            .post(url)
            .header(header::CONTENT_TYPE, "application/json")
            .body(serde_json::to_vec(body)?);
        for &(name, value) in headers {
            request = request.header(name, value);
        }
        Self::complete(url, request).await
    }
}

#[cfg(test)]
pub mod fake {
    //! In-memory stand-in for the network, keyed by exact URL
    use super::{HttpFetch, HttpResponse};
    use crate::providers::errors::FetchError;
    use async_trait::async_trait;
    use serde_json::Value;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeFetch {
        routes: Mutex<HashMap<String, HttpResponse>>,
        calls: Mutex<Vec<String>>,
    }

    #[allow(clippy::unwrap_used, reason = "Test helper, lock is never poisoned")]
    impl FakeFetch {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn json(&self, url: &str, body: &Value) -> &Self {
            self.respond(url, 200, serde_json::to_vec(body).unwrap())
        }

        pub fn respond(&self, url: &str, status: u16, body: Vec<u8>) -> &Self {
            self.routes
                .lock()
                .unwrap()
                .insert(url.to_owned(), HttpResponse::new(status, body));
            self
        }

        pub fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        pub fn calls_starting_with(&self, prefix: &str) -> Vec<String> {
            self.calls()
                .into_iter()
                .filter(|url| url.starts_with(prefix))
                .collect()
        }

        fn lookup(&self, url: &str) -> HttpResponse {
            self.calls.lock().unwrap().push(url.to_owned());
            self.routes
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .unwrap_or_else(|| HttpResponse::new(404, b"{}".to_vec()))
        }
    }

    #[async_trait]
    impl HttpFetch for FakeFetch {
        async fn get(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
        ) -> Result<HttpResponse, FetchError> {
            Ok(self.lookup(url))
        }

        async fn post_json(
            &self,
            url: &str,
            _headers: &[(&str, &str)],
            _body: &Value,
        ) -> Result<HttpResponse, FetchError> {
            Ok(self.lookup(url))
        }
    }
}
