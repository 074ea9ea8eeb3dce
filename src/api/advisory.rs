use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::advisory::{AdvisoryContext, AdvisoryResult, AdvisoryService};

use super::{ApiResult, JsonHttp};

const LABEL: &str = "advisory";

#[derive(Debug, Serialize)]
struct ProposeRequest<'a> {
    context: &'a AdvisoryContext,
    response_format: &'static str,
}

/// 服务端可能把提案包在 `{"text": ...}` 里，也可能直接返回正文。
#[derive(Debug, Deserialize)]
struct TextEnvelope {
    text: String,
}

/// 基于 HTTP 的顾问服务客户端，`POST {endpoint}/propose`。
#[derive(Debug, Clone)]
pub struct HttpAdvisoryClient {
    http: JsonHttp,
}

impl HttpAdvisoryClient {
    pub fn new(client: reqwest::Client, endpoint: &str, timeout: Duration) -> ApiResult<Self> {
        Ok(Self {
            http: JsonHttp::new(LABEL, client, endpoint, timeout)?,
        })
    }

    fn unwrap_text(body: String) -> String {
        match serde_json::from_str::<TextEnvelope>(&body) {
            Ok(envelope) => envelope.text,
            Err(_) => body,
        }
    }
}

#[async_trait]
impl AdvisoryService for HttpAdvisoryClient {
    async fn propose(&self, context: &AdvisoryContext) -> AdvisoryResult<String> {
        let request = ProposeRequest {
            context,
            response_format: "json",
        };
        let body = self.http.post_json("propose", &request).await?;
        Ok(Self::unwrap_text(body))
    }
}
