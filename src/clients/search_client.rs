//! 网页检索客户端（Tavily 兼容接口）
//!
//! `POST {base_url}/search`，请求体 `{api_key, query, max_results}`，
//! 返回 `{results: [{url, content}]}`。客户端不重试，只归类错误。

use async_trait::async_trait;
use reqwest::{header::RETRY_AFTER, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::Config;
use crate::error::CapabilityError;
use crate::services::{SearchHit, WebSearch};

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResultItem>,
}

#[derive(Debug, Deserialize)]
struct SearchResultItem {
    url: String,
    #[serde(default)]
    content: String,
}

/// 检索客户端
pub struct SearchClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
    max_results: usize,
}

impl SearchClient {
    pub fn new(config: &Config) -> Result<Self, CapabilityError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.call_timeout_secs.max(1)))
            .build()
            .map_err(|e| CapabilityError::invalid_request(format!("无法创建 HTTP 客户端: {}", e)))?;

        Ok(Self {
            http,
            endpoint: format!("{}/search", config.search_api_base_url.trim_end_matches('/')),
            api_key: config.search_api_key.clone(),
            max_results: config.search_max_results,
        })
    }
}

#[async_trait]
impl WebSearch for SearchClient {
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>, CapabilityError> {
        let body = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results: self.max_results,
        };

        let response = self
            .http
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(classify_transport_error)?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.trim().parse::<u64>().ok());
            let text = response.text().await.unwrap_or_default();
            warn!("检索接口返回 {}: {}", status, text);
            return Err(classify_status(status, retry_after, text));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| CapabilityError::network(format!("检索结果解析失败: {}", e)))?;

        debug!("检索 '{}' 返回 {} 条结果", query, parsed.results.len());
        Ok(parsed
            .results
            .into_iter()
            .map(|item| SearchHit {
                url: item.url,
                excerpt: item.content,
            })
            .collect())
    }
}

fn classify_transport_error(error: reqwest::Error) -> CapabilityError {
    if error.is_timeout() {
        CapabilityError::timeout(error.to_string())
    } else if error.is_builder() {
        CapabilityError::invalid_request(error.to_string())
    } else {
        CapabilityError::network(error.to_string())
    }
}

/// 按 HTTP 状态码归类
pub fn classify_status(
    status: StatusCode,
    retry_after_secs: Option<u64>,
    body: String,
) -> CapabilityError {
    let message = format!("{}: {}", status, body);
    match status.as_u16() {
        429 => CapabilityError::rate_limited(message, retry_after_secs),
        408 => CapabilityError::timeout(message),
        402 | 432 | 433 => CapabilityError::quota(message),
        500..=599 => CapabilityError::network(message),
        _ => CapabilityError::invalid_request(message),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_keeps_retry_after() {
        let err = classify_status(StatusCode::TOO_MANY_REQUESTS, Some(3), String::new());
        assert!(err.is_transient());
        assert_eq!(err.retry_after(), Some(Duration::from_secs(3)));
    }

    #[test]
    fn test_plan_limit_is_quota() {
        let err = classify_status(StatusCode::from_u16(432).unwrap(), None, "plan limit".into());
        assert_eq!(err.class(), "quota");
    }

    #[test]
    fn test_auth_failure_is_invalid_request() {
        assert_eq!(
            classify_status(StatusCode::UNAUTHORIZED, None, String::new()).class(),
            "invalid_request"
        );
        assert_eq!(
            classify_status(StatusCode::FORBIDDEN, None, String::new()).class(),
            "invalid_request"
        );
    }

    #[test]
    fn test_server_error_is_transient() {
        assert!(classify_status(StatusCode::BAD_GATEWAY, None, String::new()).is_transient());
    }

    #[test]
    fn test_search_response_tolerates_missing_fields() {
        let parsed: SearchResponse =
            serde_json::from_str(r#"{"results": [{"url": "https://example.org/a"}]}"#).unwrap();
        assert_eq!(parsed.results[0].content, "");

        let empty: SearchResponse = serde_json::from_str(r#"{"query": "x"}"#).unwrap();
        assert!(empty.results.is_empty());
    }
}
