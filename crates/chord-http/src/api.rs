//! The rate-limit-aware request engine.
//!
//! [`DiscordApi::query`] is the whole contract the entity layer depends on:
//! header assembly, bucket gating, the retry loop, and error classification
//! all happen here, on top of the [`Transport`] seam.

use std::sync::Arc;
use std::time::Duration;

use http::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use http::Method;
use parking_lot::Mutex;
use percent_encoding::{utf8_percent_encode, AsciiSet, CONTROLS};
use serde::Deserialize;
use serde_json::Value;
use tokio::time::sleep;
use tracing::{debug, instrument, warn};

use chord_ratelimit::{bucket_key, retry_delay, BucketMap};

use crate::config::ApiConfig;
use crate::error::{classify_bad_request, ErrorBody, HttpError};
use crate::response::{HttpResponse, ResMethod};
use crate::transport::{ReqwestTransport, Transport};
use crate::HttpResult;

/// Retry budget for deterministic failure classes (5xx, custom retry codes,
/// transient transport errors). 429s deliberately do not consume it.
const MAX_TRIES: u32 = 5;

/// Bytes percent-encoded inside the `X-Audit-Log-Reason` header value.
const REASON_ENCODE_SET: &AsciiSet = &CONTROLS
    .add(b' ')
    .add(b'"')
    .add(b'%')
    .add(b'<')
    .add(b'>')
    .add(b'\\')
    .add(b'^')
    .add(b'`')
    .add(b'{')
    .add(b'|')
    .add(b'}');

/// Per-request options for [`DiscordApi::query`].
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    /// JSON request body.
    pub json: Option<Value>,

    /// Extra headers, merged over the engine defaults.
    pub headers: HeaderMap,

    /// Audit-log reason, percent-encoded into `X-Audit-Log-Reason`.
    pub reason: Option<String>,

    /// Response decode mode.
    pub res_method: ResMethod,

    /// Status codes the caller opts into the backoff-retry path,
    /// e.g. 404 while an interaction response propagates.
    pub retry_codes: Vec<u16>,

    /// Use the unversioned base URL (webhook routes).
    pub webhook_base: bool,
}

impl RequestOptions {
    /// Options with engine defaults (JSON decode, no retries beyond 5xx).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a JSON body.
    #[must_use]
    pub fn with_json(mut self, json: Value) -> Self {
        self.json = Some(json);
        self
    }

    /// Attach an audit-log reason.
    #[must_use]
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Select the response decode mode.
    #[must_use]
    pub const fn with_res_method(mut self, res_method: ResMethod) -> Self {
        self.res_method = res_method;
        self
    }

    /// Opt extra status codes into the retry path.
    #[must_use]
    pub fn with_retry_codes(mut self, codes: impl Into<Vec<u16>>) -> Self {
        self.retry_codes = codes.into();
        self
    }
}

/// Response of `GET /gateway/bot`.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayBot {
    /// WebSocket URL to connect shards to.
    pub url: String,

    /// Recommended shard count.
    pub shards: u32,

    /// IDENTIFY concurrency budget.
    pub session_start_limit: SessionStartLimit,
}

/// IDENTIFY budget reported by Discord.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionStartLimit {
    /// Total session starts allowed in the window.
    pub total: u32,

    /// Session starts remaining.
    pub remaining: u32,

    /// Milliseconds until the limit resets.
    pub reset_after: u64,

    /// How many shards may IDENTIFY per 5 seconds.
    pub max_concurrency: u32,
}

/// The current application, from `GET /applications/@me`.
#[derive(Debug, Clone, Deserialize)]
pub struct CurrentApplication {
    /// Application ID.
    pub id: String,

    /// Application name.
    pub name: String,

    /// Application flags (gateway intent allowances live here).
    #[serde(default)]
    pub flags: u64,
}

/// Rate-limit-aware Discord API client.
///
/// Owns the bucket map explicitly and threads it through every call site;
/// there is no process-global state.
pub struct DiscordApi {
    config: ApiConfig,
    api_url: String,
    transport: Arc<dyn Transport>,
    buckets: Arc<BucketMap>,
    sweeper: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DiscordApi {
    /// Build an engine backed by the production transport.
    pub fn new(config: ApiConfig) -> HttpResult<Self> {
        let transport = Arc::new(ReqwestTransport::new(config.timeout)?);
        Ok(Self::with_transport(config, transport))
    }

    /// Build an engine over an explicit transport (test seam).
    #[must_use]
    pub fn with_transport(config: ApiConfig, transport: Arc<dyn Transport>) -> Self {
        let api_url = config.api_url();
        Self {
            config,
            api_url,
            transport,
            buckets: Arc::new(BucketMap::new()),
            sweeper: Mutex::new(None),
        }
    }

    /// The engine configuration.
    #[must_use]
    pub const fn config(&self) -> &ApiConfig {
        &self.config
    }

    /// The bucket map backing this engine.
    #[must_use]
    pub fn buckets(&self) -> &Arc<BucketMap> {
        &self.buckets
    }

    /// Start the periodic bucket cleanup sweep. Idempotent.
    pub fn start_bucket_sweeper(&self) {
        let mut sweeper = self.sweeper.lock();
        if sweeper.is_none() {
            *sweeper = Some(self.buckets.spawn_sweeper());
        }
    }

    /// Stop background work. The engine stays usable for requests.
    pub fn close(&self) {
        if let Some(handle) = self.sweeper.lock().take() {
            handle.abort();
        }
    }

    /// Make a request to the Discord API.
    ///
    /// Applies default headers, acquires the route's rate-limit bucket, and
    /// runs the retry loop: 2xx returns; 5xx and caller-supplied
    /// `retry_codes` back off and retry up to five attempts; 429 with a
    /// structured body waits out `retry_after` without consuming the budget;
    /// everything else raises a typed [`HttpError`].
    #[instrument(skip(self, opts), fields(method = %method, path))]
    pub async fn query(
        &self,
        method: Method,
        path: &str,
        opts: RequestOptions,
    ) -> HttpResult<HttpResponse> {
        let headers = self.build_headers(&opts)?;

        let base = if opts.webhook_base {
            self.config.base_url.trim_end_matches('/')
        } else {
            &self.api_url
        };
        let url = format!("{base}{path}");

        let bucket = self.buckets.get(&bucket_key(method.as_str(), path));
        bucket.acquire().await;

        let mut attempt: u32 = 0;
        while attempt < MAX_TRIES {
            let result = self
                .transport
                .request(
                    method.clone(),
                    &url,
                    &headers,
                    opts.json.as_ref(),
                    opts.res_method,
                )
                .await;

            let response = match result {
                Ok(response) => response,
                Err(e) if e.is_transient() => {
                    attempt += 1;
                    if attempt >= MAX_TRIES {
                        return Err(e.into());
                    }
                    warn!(error = %e, attempt, "transient transport error, retrying");
                    sleep(retry_delay(attempt - 1)).await;
                    continue;
                }
                Err(e) => return Err(e.into()),
            };

            // Header-driven correction happens on every attempt, any status,
            // so the bucket self-heals even on error paths.
            bucket.update(&response.ratelimit_headers());
            debug!(status = response.status, "request completed");

            match response.status {
                200..=299 => return Ok(response),

                status if opts.retry_codes.contains(&status) || matches!(status, 500 | 502 | 503 | 504) => {
                    attempt += 1;
                    if attempt >= MAX_TRIES {
                        return Err(HttpError::ServerError(ErrorBody::from_response(&response)));
                    }
                    warn!(status, attempt, "server error, backing off");
                    sleep(retry_delay(attempt - 1)).await;
                }

                429 => {
                    let retry_after = response
                        .body
                        .as_json()
                        .and_then(|v| v.get("retry_after"))
                        .and_then(Value::as_f64);

                    match retry_after {
                        // A 429 with a structured body is Discord's own
                        // limiter: wait it out, budget untouched.
                        Some(secs) => {
                            warn!(retry_after = secs, "rate limit hit, waiting");
                            sleep(Duration::from_secs_f64(secs + 0.1)).await;
                        }
                        // No structured body means edge/CDN throttling.
                        None => {
                            return Err(HttpError::Ratelimited(ErrorBody::from_response(&response)))
                        }
                    }
                }

                400 => return Err(classify_bad_request(&response)),
                403 => return Err(HttpError::Forbidden(ErrorBody::from_response(&response))),
                404 => return Err(HttpError::NotFound(ErrorBody::from_response(&response))),
                _ => return Err(HttpError::Response(ErrorBody::from_response(&response))),
            }
        }

        Err(HttpError::RetriesExhausted)
    }

    fn build_headers(&self, opts: &RequestOptions) -> HttpResult<HeaderMap> {
        let mut headers = opts.headers.clone();

        if !headers.contains_key(AUTHORIZATION) {
            let value = HeaderValue::from_str(&format!("Bot {}", self.config.token))
                .map_err(|_| HttpError::InvalidHeader("authorization"))?;
            headers.insert(AUTHORIZATION, value);
        }

        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&ApiConfig::user_agent())
                .map_err(|_| HttpError::InvalidHeader("user-agent"))?,
        );

        if opts.res_method == ResMethod::Json && !headers.contains_key(CONTENT_TYPE) {
            headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if let Some(reason) = &opts.reason {
            let encoded = utf8_percent_encode(reason, REASON_ENCODE_SET).to_string();
            headers.insert(
                HeaderName::from_static("x-audit-log-reason"),
                HeaderValue::from_str(&encoded)
                    .map_err(|_| HttpError::InvalidHeader("x-audit-log-reason"))?,
            );
        }

        Ok(headers)
    }

    /// Fetch the recommended shard count and IDENTIFY concurrency budget.
    pub async fn get_gateway_bot(&self) -> HttpResult<GatewayBot> {
        let response = self.query(Method::GET, "/gateway/bot", RequestOptions::new()).await?;
        Self::decode(response)
    }

    /// Fetch the current application, a cheap token sanity check.
    pub async fn me(&self) -> HttpResult<CurrentApplication> {
        let response = self
            .query(Method::GET, "/applications/@me", RequestOptions::new())
            .await?;
        Self::decode(response)
    }

    fn decode<T: serde::de::DeserializeOwned>(response: HttpResponse) -> HttpResult<T> {
        let Some(json) = response.body.as_json().cloned() else {
            return Err(HttpError::Response(ErrorBody::from_response(&response)));
        };
        Ok(serde_json::from_value(json)?)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::time::Instant;

    use super::*;
    use crate::response::ResponseBody;
    use crate::transport::TransportError;

    /// Transport returning a fixed status a number of times, then 200.
    struct ScriptedTransport {
        calls: AtomicU32,
        status: u16,
        failures: u32,
        body: Value,
    }

    impl ScriptedTransport {
        fn always(status: u16, body: Value) -> Self {
            Self {
                calls: AtomicU32::new(0),
                status,
                failures: u32::MAX,
                body,
            }
        }

        fn failing_n_times(status: u16, failures: u32, body: Value) -> Self {
            Self {
                calls: AtomicU32::new(0),
                status,
                failures,
                body,
            }
        }

        fn calls(&self) -> u32 {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn request(
            &self,
            _method: Method,
            _url: &str,
            _headers: &HeaderMap,
            _body: Option<&Value>,
            _res_method: ResMethod,
        ) -> Result<HttpResponse, TransportError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            let (status, body) = if call < self.failures {
                (self.status, self.body.clone())
            } else {
                (200, serde_json::json!({}))
            };
            Ok(HttpResponse {
                status,
                reason: None,
                headers: HeaderMap::new(),
                body: ResponseBody::Json(body),
            })
        }
    }

    fn api_over(transport: Arc<ScriptedTransport>) -> DiscordApi {
        DiscordApi::with_transport(ApiConfig::new("test-token"), transport)
    }

    #[tokio::test(start_paused = true)]
    async fn persistent_503_fails_after_exactly_five_attempts() {
        let transport = Arc::new(ScriptedTransport::always(503, serde_json::json!({})));
        let api = api_over(Arc::clone(&transport));

        let err = api
            .query(Method::GET, "/channels/1", RequestOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::ServerError(_)), "got {err:?}");
        assert_eq!(transport.calls(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn transient_5xx_recovers_within_budget() {
        let transport = Arc::new(ScriptedTransport::failing_n_times(
            502,
            3,
            serde_json::json!({}),
        ));
        let api = api_over(Arc::clone(&transport));

        let response = api
            .query(Method::GET, "/channels/1", RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn caller_retry_codes_join_the_backoff_path() {
        let transport = Arc::new(ScriptedTransport::failing_n_times(
            404,
            2,
            serde_json::json!({"message": "Unknown Webhook"}),
        ));
        let api = api_over(Arc::clone(&transport));

        // 404 normally raises immediately; opted in, it retries to success.
        let response = api
            .query(
                Method::GET,
                "/webhooks/1/wkn/messages/@original",
                RequestOptions::new().with_retry_codes(vec![404]),
            )
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn structured_429_retries_without_consuming_budget() {
        // Six 429s in a row would exhaust a budgeted class; 429 must not.
        let transport = Arc::new(ScriptedTransport::failing_n_times(
            429,
            6,
            serde_json::json!({"retry_after": 0.2}),
        ));
        let api = api_over(Arc::clone(&transport));

        let start = Instant::now();
        let response = api
            .query(Method::POST, "/channels/1/messages", RequestOptions::new())
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(transport.calls(), 7);
        // Each wait is retry_after + 0.1s under a paused clock.
        assert!(start.elapsed() >= Duration::from_millis(1800));
    }

    #[tokio::test(start_paused = true)]
    async fn unbudgeted_404_raises_not_found() {
        let transport = Arc::new(ScriptedTransport::always(
            404,
            serde_json::json!({"code": 10008, "message": "Unknown Message"}),
        ));
        let api = api_over(Arc::clone(&transport));

        let err = api
            .query(Method::GET, "/channels/1/messages/2", RequestOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(err, HttpError::NotFound(_)));
        assert_eq!(transport.calls(), 1);
    }
}
