// REST client — header injection, GET response caching, and error normalisation.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::error_body::extract_error_message;
use crate::auth::token::TokenStore;
use crate::config::ClientConfig;
use crate::error::{ApiError, ApiResult};
use crate::store::cache::{cache_key, ResponseCache};
use crate::store::stats::RequestStats;
use crate::transport::http_transport::HttpUploadTransport;
use crate::transport::traits::UploadTransport;

/// Per-call request description. Constructed per call, never persisted.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    /// Applied after the default headers, so they may override them.
    pub headers: Vec<(String, String)>,
    /// Bypass the response cache for both lookup and store.
    pub skip_cache: bool,
    /// Abandon the request after this long; `None` waits indefinitely.
    pub timeout: Option<Duration>,
}

impl Default for RequestOptions {
    fn default() -> Self {
        Self {
            method: Method::GET,
            body: None,
            headers: Vec::new(),
            skip_cache: false,
            timeout: None,
        }
    }
}

impl RequestOptions {
    pub fn get() -> Self {
        Self::default()
    }

    pub fn with_method(method: Method) -> Self {
        Self {
            method,
            ..Self::default()
        }
    }

    pub fn json(mut self, body: Value) -> Self {
        self.body = Some(body);
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn skip_cache(mut self) -> Self {
        self.skip_cache = true;
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    fn is_cacheable(&self) -> bool {
        self.method == Method::GET && !self.skip_cache
    }
}

pub struct ApiClient {
    pub(crate) http: Client,
    pub(crate) base_url: String,
    pub(crate) tokens: Arc<dyn TokenStore>,
    pub(crate) cache: Arc<ResponseCache>,
    pub(crate) stats: Arc<RequestStats>,
    pub(crate) transport: Arc<dyn UploadTransport>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, tokens: Arc<dyn TokenStore>) -> Self {
        let http = Client::new();
        let cache = Arc::new(ResponseCache::with_ttl(config.cache_ttl()));
        let transport = Arc::new(HttpUploadTransport::new(http.clone()));
        Self::with_parts(http, config, tokens, cache, transport)
    }

    /// Assemble a client from explicitly owned collaborators.
    pub fn with_parts(
        http: Client,
        config: &ClientConfig,
        tokens: Arc<dyn TokenStore>,
        cache: Arc<ResponseCache>,
        transport: Arc<dyn UploadTransport>,
    ) -> Self {
        Self {
            http,
            base_url: config.clone().normalized().base_url,
            tokens,
            cache,
            stats: Arc::new(RequestStats::new()),
            transport,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn cache(&self) -> &Arc<ResponseCache> {
        &self.cache
    }

    pub fn stats(&self) -> &Arc<RequestStats> {
        &self.stats
    }

    pub fn tokens(&self) -> &Arc<dyn TokenStore> {
        &self.tokens
    }

    /// Resolve an endpoint path against the base URL.
    pub fn url_for(&self, endpoint: &str) -> String {
        if endpoint.starts_with('/') {
            format!("{}{}", self.base_url, endpoint)
        } else {
            format!("{}/{}", self.base_url, endpoint)
        }
    }

    /// Resolve an endpoint with query parameters, sorted by name so equivalent
    /// requests share one cache key.
    pub fn url_with_query(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ApiResult<String> {
        let mut sorted: Vec<(&str, &str)> =
            params.iter().map(|(k, v)| (*k, v.as_str())).collect();
        sorted.sort_by(|a, b| a.0.cmp(b.0).then(a.1.cmp(b.1)));
        let url = Url::parse_with_params(&self.url_for(endpoint), sorted)
            .map_err(|e| ApiError::Application(format!("Invalid request URL: {}", e)))?;
        Ok(url.to_string())
    }

    /// Current bearer token; an unreadable store counts as unauthenticated.
    pub fn bearer_token(&self) -> Option<String> {
        match self.tokens.token() {
            Ok(token) => token,
            Err(e) => {
                warn!("token store read failed: {:#}", e);
                None
            }
        }
    }

    fn build_headers(&self, overrides: &[(String, String)]) -> ApiResult<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(token) = self.bearer_token() {
            let value = HeaderValue::from_str(&format!("Bearer {}", token)).map_err(|_| {
                ApiError::Application("Stored token is not a valid header value".into())
            })?;
            headers.insert(AUTHORIZATION, value);
        }
        for (name, value) in overrides {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| ApiError::Application(format!("Invalid header name: {}", name)))?;
            let value = HeaderValue::from_str(value).map_err(|_| {
                ApiError::Application(format!("Invalid value for header {}", name.as_str()))
            })?;
            headers.insert(name, value);
        }
        Ok(headers)
    }

    /// Issue a request and decode the JSON response as `T`.
    ///
    /// The decoded type is a compile-time contract with the caller; no schema
    /// validation happens beyond what `serde` needs to build `T`.
    pub async fn request<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        options: RequestOptions,
    ) -> ApiResult<T> {
        let url = self.url_for(endpoint);
        let value = self.request_url(&url, options).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Issue a request against a fully resolved URL and return the raw JSON value.
    pub async fn request_url(&self, url: &str, options: RequestOptions) -> ApiResult<Value> {
        let cacheable = options.is_cacheable();
        let key = cache_key(&options.method, url);

        if cacheable {
            if let Some(value) = self.cache.get(&key) {
                self.stats.record_cache_hit();
                debug!("cache hit {}", key);
                return Ok(value);
            }
            self.stats.record_cache_miss();
        }

        let headers = self.build_headers(&options.headers)?;
        let mut req = self
            .http
            .request(options.method.clone(), url)
            .headers(headers);
        if let Some(body) = &options.body {
            req = req.body(serde_json::to_vec(body)?);
        }
        if let Some(timeout) = options.timeout {
            req = req.timeout(timeout);
        }

        debug!(
            "{} {} cacheable={} skip_cache={}",
            options.method, url, cacheable, options.skip_cache
        );
        self.stats.record_network_request();
        let resp = req.send().await.map_err(|e| match options.timeout {
            Some(timeout) if e.is_timeout() => ApiError::Timeout(timeout),
            _ => ApiError::from(e),
        })?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            let message = extract_error_message(&body);
            warn!(
                "{} {} failed status={} message={:?}",
                options.method,
                url,
                status.as_u16(),
                message
            );
            return Err(ApiError::Status { status, message });
        }

        let bytes = resp.bytes().await?;
        let value = if bytes.iter().all(u8::is_ascii_whitespace) {
            Value::Null
        } else {
            serde_json::from_slice::<Value>(&bytes)?
        };

        if cacheable {
            self.cache.set(key, value.clone());
        }
        Ok(value)
    }

    pub async fn get<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        self.request(endpoint, RequestOptions::get()).await
    }

    /// GET that always goes to the network and does not refresh the cache.
    pub async fn get_fresh<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        self.request(endpoint, RequestOptions::get().skip_cache()).await
    }

    pub async fn get_with_query<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, String)],
    ) -> ApiResult<T> {
        let url = self.url_with_query(endpoint, params)?;
        let value = self.request_url(&url, RequestOptions::get()).await?;
        Ok(serde_json::from_value(value)?)
    }

    pub async fn post<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ApiResult<T> {
        self.send_with_body(Method::POST, endpoint, body).await
    }

    pub async fn put<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ApiResult<T> {
        self.send_with_body(Method::PUT, endpoint, body).await
    }

    pub async fn patch<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &B,
    ) -> ApiResult<T> {
        self.send_with_body(Method::PATCH, endpoint, body).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, endpoint: &str) -> ApiResult<T> {
        self.request(endpoint, RequestOptions::with_method(Method::DELETE))
            .await
    }

    async fn send_with_body<T: DeserializeOwned, B: Serialize + ?Sized>(
        &self,
        method: Method,
        endpoint: &str,
        body: &B,
    ) -> ApiResult<T> {
        let body = serde_json::to_value(body)?;
        self.request(endpoint, RequestOptions::with_method(method).json(body))
            .await
    }

    /// Drop every cached response.
    pub fn clear_cache(&self) {
        self.cache.clear();
    }

    /// Drop one cached response by its full cache key.
    pub fn invalidate_cache(&self, key: &str) {
        self.cache.delete(key);
    }

    /// Drop the cached GET response for `endpoint`.
    pub fn invalidate_endpoint(&self, endpoint: &str) {
        self.cache.delete(&cache_key(&Method::GET, &self.url_for(endpoint)));
    }
}
