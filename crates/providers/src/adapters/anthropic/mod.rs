//! Anthropic Messages API adapter (spec §4.5), grounded on the
//! request/dispatch/response shape of the teacher's original Anthropic
//! provider.

mod stream;

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use genai_config::{ModelFilter, ModelManager, ProviderConfig, apply_header_rules};
use genai_core::{
    Error, FinishReason, GenResult, Message, Modality, Options, Reply, Request, Role, Score, ToolCall, Usage,
    message::Doc,
};
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;

use crate::{
    adapters::common::{check_model_filter, filter_allowed, provider_option, text_options, validate_options},
    auth,
    error::decode_api_error,
    http::default_http_client_builder,
    messages::anthropic::{
        AnthropicChatRequest, AnthropicChatResponse, AnthropicContent, AnthropicImageSource, AnthropicMessage,
        AnthropicMetadata, AnthropicRole, AnthropicStopReason, AnthropicTool, AnthropicToolChoice,
        AnthropicToolResultContent,
    },
    provider::{GenStreamResult, Model, Provider, ReplyStream},
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const ENV_VAR: &str = "ANTHROPIC_API_KEY";

pub struct AnthropicAdapter {
    client: Client,
    base_url: String,
    model_id: String,
    api_key: Option<secrecy::SecretString>,
    model_manager: ModelManager,
    model_filter: Option<ModelFilter>,
    scoreboard: Score,
}

impl AnthropicAdapter {
    pub fn new(model_id: impl Into<String>, config: ProviderConfig, scoreboard: Score) -> GenResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("anthropic-version", ANTHROPIC_VERSION.parse().expect("static header value"));
        apply_header_rules(&config.headers, &mut headers, None);

        let client = default_http_client_builder(headers)
            .build()
            .map_err(|err| Error::Transport(format!("failed to build Anthropic HTTP client: {err}")))?;

        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model_manager = ModelManager::new("anthropic", config.models.clone());
        let api_key = auth::resolve("anthropic", &config.api_key, ENV_VAR).ok();

        Ok(Self {
            client,
            base_url,
            model_id: model_id.into(),
            api_key,
            model_manager,
            model_filter: config.model_filter.clone(),
            scoreboard,
        })
    }

    fn resolved_model(&self) -> String {
        self.model_manager
            .resolve_model(&self.model_id)
            .or_else(|| self.model_manager.resolve_tier(&self.scoreboard, &self.model_id))
            .unwrap_or_else(|| self.model_id.clone())
    }

    fn require_key(&self) -> GenResult<&secrecy::SecretString> {
        self.api_key.as_ref().ok_or_else(|| Error::KeyRequired {
            provider: "anthropic".to_string(),
            env_var: ENV_VAR.to_string(),
        })
    }

    fn build_request(&self, messages: &[Message], options: &[Options], stream: bool) -> GenResult<AnthropicChatRequest> {
        validate_options(options, "anthropic", &["thinking"])?;
        check_model_filter(&self.model_manager, self.model_filter.as_ref(), &self.model_id)?;

        let text_opts = text_options(options);

        if text_opts.is_some_and(|o| o.seed.is_some()) {
            return Err(Error::UnsupportedContinuable("anthropic has no request-level seed parameter".to_string()));
        }
        if text_opts.is_some_and(|o| o.top_logprobs.is_some()) {
            return Err(Error::UnsupportedContinuable(
                "anthropic's Messages API does not return token logprobs".to_string(),
            ));
        }
        if text_opts.is_some_and(|o| o.reply_as_json || o.decode_as.is_some()) {
            return Err(Error::UnsupportedContinuable(
                "anthropic has no response_format/json-mode equivalent".to_string(),
            ));
        }

        let system = text_opts.and_then(|o| o.system_prompt.clone());
        let thinking = provider_option(options, "anthropic", "thinking").cloned();

        let mut anthropic_messages = Vec::new();
        for message in messages {
            match message.role {
                Role::User => {
                    let content = message.requests.iter().map(request_to_content).collect::<GenResult<Vec<_>>>()?;
                    anthropic_messages.push(AnthropicMessage {
                        role: AnthropicRole::User,
                        content,
                    });
                }
                Role::Assistant => {
                    let content = message.replies.iter().filter(|r| !r.is_empty()).map(reply_to_content).collect();
                    anthropic_messages.push(AnthropicMessage {
                        role: AnthropicRole::Assistant,
                        content,
                    });
                }
                Role::Computer => {
                    let content = message
                        .tool_call_results
                        .iter()
                        .map(|result| AnthropicContent::ToolResult {
                            tool_use_id: result.id.clone(),
                            content: vec![AnthropicToolResultContent::Text {
                                text: result.result.clone(),
                            }],
                        })
                        .collect();
                    anthropic_messages.push(AnthropicMessage {
                        role: AnthropicRole::User,
                        content,
                    });
                }
            }
        }

        let (tools, tool_choice) = match text_opts {
            Some(opts) if !opts.tools.is_empty() => {
                let tools = opts
                    .tools
                    .iter()
                    .map(|tool| AnthropicTool {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        input_schema: tool.parameters.clone(),
                    })
                    .collect();
                let choice = opts.tool_force.map(|force| match force {
                    genai_core::ToolForce::Required => AnthropicToolChoice::Any,
                    genai_core::ToolForce::Any | genai_core::ToolForce::None => AnthropicToolChoice::Auto,
                });
                (Some(tools), choice)
            }
            _ => (None, None),
        };

        Ok(AnthropicChatRequest {
            model: self.resolved_model(),
            messages: anthropic_messages,
            max_tokens: text_opts.and_then(|o| o.max_tokens).unwrap_or(4096),
            system,
            temperature: text_opts.and_then(|o| o.temperature),
            top_p: text_opts.and_then(|o| o.top_p),
            top_k: text_opts.and_then(|o| o.top_k),
            stop_sequences: text_opts.filter(|o| !o.stop.is_empty()).map(|o| o.stop.clone()),
            stream: Some(stream),
            metadata: None::<AnthropicMetadata>,
            tools,
            tool_choice,
            thinking,
        })
    }

    async fn send(&self, body: Vec<u8>) -> GenResult<reqwest::Response> {
        let url = format!("{}/messages", self.base_url);
        let key = self.require_key()?;

        let response = self
            .client
            .post(url)
            .header("x-api-key", key.expose_secret())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| Error::Transport(format!("failed to reach Anthropic: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(decode_api_error("anthropic", status.as_u16(), &text));
        }

        Ok(response)
    }
}

fn request_to_content(request: &Request) -> GenResult<AnthropicContent> {
    match request {
        Request::Text(text) => Ok(AnthropicContent::Text { text: text.clone() }),
        Request::Doc(doc) => doc_to_content(doc),
    }
}

fn doc_to_content(doc: &Doc) -> GenResult<AnthropicContent> {
    if !doc.mime_type.starts_with("image/") {
        return Err(Error::NotSupported(format!(
            "Anthropic adapter has no wire representation for MIME type '{}'",
            doc.mime_type
        )));
    }

    let Some(data) = doc.data.as_ref() else {
        return Err(Error::NotSupported(
            "Anthropic requires inline image bytes; URL-only images are not supported".to_string(),
        ));
    };

    Ok(AnthropicContent::Image {
        source: AnthropicImageSource {
            source_type: "base64".to_string(),
            media_type: doc.mime_type.clone(),
            data: base64_encode(data),
        },
    })
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn reply_to_content(reply: &Reply) -> AnthropicContent {
    if let Some(call) = &reply.tool_call {
        return AnthropicContent::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: serde_json::from_str(&call.arguments).unwrap_or(serde_json::Value::Object(Default::default())),
        };
    }
    AnthropicContent::Text {
        text: reply.text.clone().or_else(|| reply.reasoning.clone()).unwrap_or_default(),
    }
}

fn stop_reason_to_finish(reason: Option<AnthropicStopReason>) -> FinishReason {
    match reason {
        Some(AnthropicStopReason::EndTurn | AnthropicStopReason::StopSequence) => FinishReason::Stop,
        Some(AnthropicStopReason::MaxTokens) => FinishReason::Length,
        Some(AnthropicStopReason::ToolUse) => FinishReason::ToolCalls,
        None => FinishReason::Empty,
    }
}

fn response_to_replies(response: &AnthropicChatResponse) -> Vec<Reply> {
    response
        .content
        .iter()
        .filter_map(|block| match block {
            AnthropicContent::Text { text } if !text.is_empty() => Some(Reply::text(text.clone())),
            AnthropicContent::ToolUse { id, name, input } => Some(Reply::tool_call(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: serde_json::to_string(input).unwrap_or_else(|_| "{}".to_string()),
                opaque: None,
            })),
            _ => None,
        })
        .collect()
}

#[async_trait]
impl Provider for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn model_id(&self) -> &str {
        &self.model_id
    }

    fn output_modalities(&self) -> &[Modality] {
        &[Modality::Text]
    }

    fn scoreboard(&self) -> &Score {
        &self.scoreboard
    }

    async fn list_models(&self) -> anyhow::Result<Vec<Model>> {
        let key = self.require_key().map_err(|err| anyhow::anyhow!(err.to_string()))?;

        let response = self
            .client
            .get(format!("{}/models", self.base_url))
            .header("x-api-key", key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Anthropic models request failed ({status}): {body}"));
        }

        let body: crate::messages::anthropic::AnthropicModelsResponse = response.json().await?;
        Ok(body
            .data
            .into_iter()
            .filter(|m| filter_allowed(self.model_filter.as_ref(), &m.id))
            .map(|m| Model {
                id: m.id,
                owned_by: "anthropic".to_string(),
                created: m.created_at,
            })
            .collect())
    }

    async fn gen_sync(&self, messages: &[Message], options: &[Options]) -> GenResult<genai_core::message::Result> {
        let request = self.build_request(messages, options, false)?;
        let body = serde_json::to_vec(&request).map_err(|err| Error::Transport(err.to_string()))?;
        let response = self.send(body).await?;

        let text = response
            .text()
            .await
            .map_err(|err| Error::Transport(format!("failed to read Anthropic response body: {err}")))?;
        let parsed: AnthropicChatResponse =
            serde_json::from_str(&text).map_err(|err| Error::BadInternal(format!("failed to decode Anthropic response: {err}")))?;

        let replies = response_to_replies(&parsed);
        let finish_reason = stop_reason_to_finish(parsed.stop_reason);

        Ok(genai_core::message::Result {
            message: Message::from_replies(replies),
            usage: Usage {
                input_tokens: parsed.usage.input_tokens.max(0) as u64,
                output_tokens: parsed.usage.output_tokens.max(0) as u64,
                total_tokens: (parsed.usage.input_tokens.max(0) + parsed.usage.output_tokens.max(0)) as u64,
                finish_reason,
                ..Default::default()
            },
            logprobs: Vec::new(),
        })
    }

    async fn gen_stream(&self, messages: &[Message], options: &[Options]) -> GenResult<GenStreamResult> {
        let request = self.build_request(messages, options, true)?;
        let body = serde_json::to_vec(&request).map_err(|err| Error::Transport(err.to_string()))?;
        let response = self.send(body).await?;

        let message = Arc::new(Mutex::new(Message::from_replies(Vec::new())));
        let usage = Arc::new(Mutex::new(Usage::default()));

        let shadow_message = Arc::clone(&message);
        let shadow_usage = Arc::clone(&usage);

        let byte_stream = response.bytes_stream();
        let events = eventsource_stream::Eventsource::eventsource(byte_stream);

        let fragments = futures::stream::unfold((Box::pin(events), stream::StreamState::default()), move |(mut events, mut state)| {
            let shadow_message = Arc::clone(&shadow_message);
            let shadow_usage = Arc::clone(&shadow_usage);
            async move {
                loop {
                    let Some(event) = events.next().await else {
                        return None;
                    };

                    let Ok(event) = event else {
                        log::warn!("SSE parsing error in Anthropic stream");
                        continue;
                    };

                    let Ok(parsed) = serde_json::from_str::<stream::AnthropicStreamEvent<'_>>(&event.data) else {
                        log::warn!("failed to parse Anthropic streaming event: {}", event.data);
                        continue;
                    };

                    let fragment = state.process(parsed);
                    *shadow_usage.lock().await = state.usage();

                    let Some(fragment) = fragment else {
                        continue;
                    };

                    shadow_message.lock().await.accumulate(fragment.clone());
                    return Some((Ok(fragment), (events, state)));
                }
            }
        });

        let fragments: ReplyStream = Box::pin(fragments);

        Ok(GenStreamResult { fragments, message, usage })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{Json, Router, extract::State, response::IntoResponse, routing::post};
    use genai_core::{Options, OptionsText};
    use serde_json::{Value, json};
    use std::sync::{Arc as StdArc, Mutex as StdMutex};
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct CaptureState {
        captured: StdArc<StdMutex<Option<Value>>>,
    }

    async fn handle_messages(State(state): State<CaptureState>, Json(body): Json<Value>) -> impl IntoResponse {
        *state.captured.lock().unwrap() = Some(body);
        Json(json!({
            "id": "msg_123",
            "type": "message",
            "role": "assistant",
            "content": [{"type": "text", "text": "hi"}],
            "model": "claude-3-haiku-20240307",
            "stop_reason": "end_turn",
            "stop_sequence": null,
            "usage": {"input_tokens": 5, "output_tokens": 2}
        }))
    }

    #[tokio::test]
    async fn gen_sync_sends_request_and_parses_response() {
        let state = CaptureState {
            captured: StdArc::new(StdMutex::new(None)),
        };
        let app = Router::new()
            .route("/v1/messages", post(handle_messages))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = ProviderConfig::default()
            .with_api_key("test-key")
            .with_base_url(format!("http://{addr}/v1"));
        let adapter = AnthropicAdapter::new(
            "claude-3-haiku-20240307",
            config,
            Score {
                provider: "anthropic".to_string(),
                scenarios: Vec::new(),
            },
        )
        .unwrap();

        let messages = vec![Message::new_text("hello")];
        let options = vec![Options::Text(OptionsText::default())];
        let result = adapter.gen_sync(&messages, &options).await.unwrap();

        assert_eq!(result.message.as_text(), "hi");
        assert_eq!(result.usage.finish_reason, FinishReason::Stop);

        let captured = state.captured.lock().unwrap().clone().unwrap();
        assert_eq!(captured["model"], "claude-3-haiku-20240307");
    }

    #[tokio::test]
    async fn missing_api_key_yields_key_required_without_sending() {
        // SAFETY: test-local env mutation, isolated var name.
        unsafe { std::env::remove_var("ANTHROPIC_API_KEY") };
        let adapter = AnthropicAdapter::new(
            "claude-3-haiku-20240307",
            ProviderConfig::default(),
            Score {
                provider: "anthropic".to_string(),
                scenarios: Vec::new(),
            },
        )
        .unwrap();

        let messages = vec![Message::new_text("hello")];
        let err = adapter.gen_sync(&messages, &[]).await.unwrap_err();
        assert!(matches!(err, Error::KeyRequired { .. }));
    }
}
