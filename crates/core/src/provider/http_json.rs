//! Generic POST-JSON-body / JSON-response MT adapter.
//!
//! Grounded in the teacher's JSON-API rental-provider pattern (a templated request body plus
//! JSON-pointer response mapping) — generalized from "submit an onchain rental order" to
//! "submit a translation request" against any HTTP MT API shaped like
//! `{ translatedText, usage?: { tokensIn, tokensOut } }`.

use super::{Chunk, Provider, Quota, UsageCounters};
use crate::error::ProviderError;
use crate::types::{ProviderSnapshot, TranslationRequest, TranslationResult};
use async_trait::async_trait;
use futures::stream::{self, BoxStream};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct HttpJsonProviderConfig {
    pub name: String,
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    /// JSON body template; `{{text}}`, `{{source}}`, `{{target}}`, `{{model}}` are
    /// substituted as string leaves before the request is sent.
    pub body_template: Value,
}

pub struct HttpJsonProvider {
    cfg: HttpJsonProviderConfig,
    client: reqwest::Client,
    usage: UsageCounters,
}

#[derive(Debug, Deserialize)]
struct JsonResponse {
    #[serde(rename = "translatedText")]
    translated_text: String,
    #[serde(default)]
    usage: Option<JsonUsage>,
}

#[derive(Debug, Deserialize, Default)]
struct JsonUsage {
    #[serde(rename = "tokensIn", default)]
    tokens_in: u64,
    #[serde(rename = "tokensOut", default)]
    tokens_out: u64,
}

impl HttpJsonProvider {
    pub fn new(cfg: HttpJsonProviderConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            cfg,
            usage: UsageCounters::new(Duration::from_secs(60)),
        }
    }

    fn render_body(&self, request: &TranslationRequest) -> Value {
        let mut vars = BTreeMap::new();
        vars.insert("text", request.text.as_str());
        vars.insert("source", request.source.as_str());
        vars.insert("target", request.target.as_str());
        vars.insert("model", request.model.as_str());
        substitute(self.cfg.body_template.clone(), &vars)
    }
}

fn substitute(value: Value, vars: &BTreeMap<&str, &str>) -> Value {
    match value {
        Value::String(s) => {
            let mut out = s;
            for (k, v) in vars {
                out = out.replace(&format!("{{{{{k}}}}}"), v);
            }
            Value::String(out)
        }
        Value::Array(items) => {
            Value::Array(items.into_iter().map(|v| substitute(v, vars)).collect())
        }
        Value::Object(map) => Value::Object(
            map.into_iter()
                .map(|(k, v)| (k, substitute(v, vars)))
                .collect(),
        ),
        other => other,
    }
}

#[async_trait]
impl Provider for HttpJsonProvider {
    fn name(&self) -> &str {
        &self.cfg.name
    }

    async fn translate_unary(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> Result<TranslationResult, ProviderError> {
        if self.cfg.api_key.as_deref().unwrap_or("").is_empty() {
            return Err(ProviderError::AuthMissing);
        }
        let body = self.render_body(request);
        let mut builder = self.client.post(&self.cfg.endpoint).json(&body);
        if let Some(key) = &self.cfg.api_key {
            builder = builder.bearer_auth(key);
        }

        let send = builder.send();
        let response = tokio::select! {
            res = send => res.map_err(|err| ProviderError::Network(err.to_string()))?,
            _ = cancel.cancelled() => return Err(ProviderError::Cancelled),
        };

        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ProviderError::AuthMissing);
        }
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after_ms = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(|secs| secs * 1000)
                .unwrap_or(1_000);
            return Err(ProviderError::RateLimited { retry_after_ms });
        }
        if status.is_server_error() {
            return Err(ProviderError::ServerError {
                status: status.as_u16(),
            });
        }
        if status.is_client_error() {
            return Err(ProviderError::BadRequest(format!("status {status}")));
        }

        let parsed: JsonResponse = response
            .json()
            .await
            .map_err(|err| ProviderError::Network(err.to_string()))?;
        let usage = parsed.usage.unwrap_or_default();
        let tokens_in = if usage.tokens_in > 0 {
            usage.tokens_in
        } else {
            self.approx_tokens(&request.text) as u64
        };
        let tokens_out = if usage.tokens_out > 0 {
            usage.tokens_out
        } else {
            self.approx_tokens(&parsed.translated_text) as u64
        };

        self.usage.record(tokens_in + tokens_out);

        Ok(TranslationResult {
            text: parsed.translated_text,
            provider: self.cfg.name.clone(),
            model: self.cfg.model.clone(),
            cached: false,
            tokens_in,
            tokens_out,
            chars_in: request.text.chars().count() as u64,
            chars_out: 0,
        })
    }

    /// This adapter has no native streaming transport; it degrades to "call unary, then
    /// emit the whole result as a single chunk" so it still satisfies the `Provider`
    /// contract for callers that request `stream: true`.
    async fn translate_stream(
        &self,
        request: &TranslationRequest,
        cancel: &CancellationToken,
    ) -> BoxStream<'static, Result<Chunk, ProviderError>> {
        use futures::StreamExt;
        let outcome = self.translate_unary(request, cancel).await;
        match outcome {
            Ok(result) => stream::once(async move { Ok(Chunk { text: result.text }) }).boxed(),
            Err(err) => stream::once(async move { Err(err) }).boxed(),
        }
    }

    async fn get_quota(&self) -> Option<Quota> {
        None
    }

    fn snapshot(&self) -> ProviderSnapshot {
        let (requests, tokens) = self.usage.windowed();
        let (total_requests, total_tokens) = self.usage.totals();
        ProviderSnapshot {
            api_key_present: self.cfg.api_key.is_some(),
            model: self.cfg.model.clone(),
            endpoint: self.cfg.endpoint.clone(),
            requests,
            tokens,
            total_requests,
            total_tokens,
        }
    }
}
