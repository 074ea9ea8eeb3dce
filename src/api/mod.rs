//! 外部 HTTP 数据源：通用注册表（DefiLlama）、协议探针（Yearn、Beefy）与顾问服务。

pub mod advisory;
pub mod beefy;
pub mod defillama;
pub mod yearn;

use std::time::{Duration, Instant};

use metrics::{counter, histogram};
use reqwest::StatusCode;
use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::{trace, warn};
use url::Url;

use crate::monitoring::metrics::prometheus_enabled;

pub use advisory::HttpAdvisoryClient;
pub use beefy::BeefySource;
pub use defillama::DefiLlamaClient;
pub use yearn::YearnSource;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("failed to call {endpoint}: {source}")]
    Http {
        endpoint: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("request to {endpoint} timed out after {timeout_ms} ms")]
    Timeout { endpoint: String, timeout_ms: u64 },
    #[error("failed to parse response body from {endpoint}: {source}")]
    Json {
        endpoint: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("API request to {endpoint} failed with status {status}: {body}")]
    ApiStatus {
        endpoint: String,
        status: StatusCode,
        body: String,
    },
    #[error("rate limited when calling {endpoint}: status {status}, body: {body}")]
    RateLimited {
        endpoint: String,
        status: StatusCode,
        body: String,
    },
    #[error("invalid base url `{url}`: {reason}")]
    InvalidUrl { url: String, reason: String },
}

impl ApiError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, ApiError::Timeout { .. })
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// 各数据源共用的 JSON-over-HTTP 客户端：统一超时、状态码与指标处理。
#[derive(Debug, Clone)]
pub struct JsonHttp {
    label: &'static str,
    base: Url,
    client: reqwest::Client,
    timeout: Duration,
}

impl JsonHttp {
    pub fn new(
        label: &'static str,
        client: reqwest::Client,
        base_url: &str,
        timeout: Duration,
    ) -> ApiResult<Self> {
        let normalized = format!("{}/", base_url.trim_end_matches('/'));
        let base = Url::parse(&normalized).map_err(|err| ApiError::InvalidUrl {
            url: base_url.to_string(),
            reason: err.to_string(),
        })?;
        Ok(Self {
            label,
            base,
            client,
            timeout,
        })
    }

    pub fn label(&self) -> &'static str {
        self.label
    }

    pub fn endpoint(&self, path: &str) -> ApiResult<Url> {
        self.base
            .join(path.trim_start_matches('/'))
            .map_err(|err| ApiError::InvalidUrl {
                url: format!("{}{}", self.base, path),
                reason: err.to_string(),
            })
    }

    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> ApiResult<T> {
        let url = self.endpoint(path)?;
        let request = self.client.get(url.clone()).timeout(self.timeout);
        let body = self.send(url.as_str(), request).await?;
        self.decode(url.as_str(), &body)
    }

    pub async fn post_json<B: Serialize + ?Sized>(&self, path: &str, payload: &B) -> ApiResult<String> {
        let url = self.endpoint(path)?;
        let request = self
            .client
            .post(url.clone())
            .timeout(self.timeout)
            .json(payload);
        self.send(url.as_str(), request).await
    }

    async fn send(&self, endpoint: &str, request: reqwest::RequestBuilder) -> ApiResult<String> {
        let started = Instant::now();
        let timeout_ms = self.timeout.as_millis() as u64;
        let map_err = |err: reqwest::Error, stage: &'static str| {
            if err.is_timeout() {
                self.record("timeout", Some(started.elapsed()));
                warn!(
                    target: "api::http",
                    source = self.label,
                    endpoint,
                    stage,
                    timeout_ms,
                    "请求超时"
                );
                ApiError::Timeout {
                    endpoint: endpoint.to_string(),
                    timeout_ms,
                }
            } else {
                self.record("transport_error", Some(started.elapsed()));
                ApiError::Http {
                    endpoint: endpoint.to_string(),
                    source: err,
                }
            }
        };

        let response = request.send().await.map_err(|err| map_err(err, "send"))?;
        let status = response.status();
        let body = response.text().await.map_err(|err| map_err(err, "read"))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            self.record("rate_limited", None);
            return Err(ApiError::RateLimited {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }

        if !status.is_success() {
            self.record("http_error", None);
            return Err(ApiError::ApiStatus {
                endpoint: endpoint.to_string(),
                status,
                body,
            });
        }

        let elapsed = started.elapsed();
        trace!(
            target: "api::http",
            source = self.label,
            endpoint,
            elapsed_ms = elapsed.as_millis() as u64,
            bytes = body.len(),
            "请求完成"
        );
        self.record("ok", Some(elapsed));
        Ok(body)
    }

    fn decode<T: DeserializeOwned>(&self, endpoint: &str, body: &str) -> ApiResult<T> {
        serde_json::from_str(body).map_err(|source| {
            self.record("decode_error", None);
            ApiError::Json {
                endpoint: endpoint.to_string(),
                source,
            }
        })
    }

    fn record(&self, status: &'static str, elapsed: Option<Duration>) {
        if !prometheus_enabled() {
            return;
        }
        counter!("meridian_http_requests_total", "source" => self.label, "status" => status)
            .increment(1);
        if let Some(elapsed) = elapsed {
            histogram!("meridian_http_latency_ms", "source" => self.label)
                .record(elapsed.as_secs_f64() * 1000.0);
        }
    }
}

/// 解析 JSON 中既可能是数字也可能是字符串的数值字段。
pub(crate) fn value_as_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::Number(number) => number.as_f64(),
        serde_json::Value::String(raw) => raw.trim().parse().ok(),
        _ => None,
    }
    .filter(|parsed: &f64| parsed.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn endpoint_joins_paths_under_base() {
        let http = JsonHttp::new(
            "test",
            reqwest::Client::new(),
            "https://yields.llama.fi/",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            http.endpoint("/pools").unwrap().as_str(),
            "https://yields.llama.fi/pools"
        );

        let nested = JsonHttp::new(
            "test",
            reqwest::Client::new(),
            "https://api.yearn.finance/v1",
            Duration::from_secs(1),
        )
        .unwrap();
        assert_eq!(
            nested.endpoint("chains/1/vaults/all").unwrap().as_str(),
            "https://api.yearn.finance/v1/chains/1/vaults/all"
        );
    }

    #[test]
    fn rejects_invalid_base_url() {
        let err = JsonHttp::new("test", reqwest::Client::new(), "not a url", Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(err, ApiError::InvalidUrl { .. }));
    }

    #[test]
    fn value_as_f64_accepts_numbers_and_strings() {
        assert_eq!(value_as_f64(&json!(1.5)), Some(1.5));
        assert_eq!(value_as_f64(&json!("2.25")), Some(2.25));
        assert_eq!(value_as_f64(&json!(null)), None);
        assert_eq!(value_as_f64(&json!("abc")), None);
    }
}
