//! Generic OpenAI-compatible adapter (spec §4.5) for backends that speak the
//! OpenAI Chat Completions wire format with only cosmetic deviations: Groq,
//! Together, DashScope, Baseten, Pollinations, Ollama. Rather than duplicate
//! [`crate::adapters::openai`]'s request building, response parsing, and
//! streaming demux logic, this adapter is parameterized by provider name,
//! default base URL, and API key env var, and reuses that module's wire
//! types and helper functions directly.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use genai_config::{ModelFilter, ModelManager, ProviderConfig, apply_header_rules};
use genai_core::{Error, GenResult, Message, Modality, Options, Role, Score, Usage};
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;

use crate::{
    adapters::{
        common::{check_model_filter, filter_allowed, normalize_finish_reason, text_options, validate_options},
        openai::{base64_encode, choice_logprobs_to_core, finish_reason_from_wire, request_to_part, response_to_replies, simplify_parts},
    },
    auth,
    error::decode_api_error,
    http::default_http_client_builder,
    messages::openai::{
        ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ContentField, FunctionCall,
        FunctionDef, ModelListResponse, ResponseFormat, StreamOptions, Tool, ToolCall as WireToolCall, ToolChoice,
    },
    provider::{GenStreamResult, Model, Provider, ReplyStream},
    stream::{DeltaEvent, Demuxer},
};

/// Static identity of one OpenAI-compatible backend: its provider name (used
/// for error tagging, key resolution, and scoreboard lookup), default base
/// URL, and the environment variable its API key is read from.
pub struct CompatibleBackend {
    pub provider_name: &'static str,
    pub default_base_url: &'static str,
    pub env_var: &'static str,
}

pub const GROQ: CompatibleBackend = CompatibleBackend {
    provider_name: "groq",
    default_base_url: "https://api.groq.com/openai/v1",
    env_var: "GROQ_API_KEY",
};

pub const TOGETHER: CompatibleBackend = CompatibleBackend {
    provider_name: "together",
    default_base_url: "https://api.together.xyz/v1",
    env_var: "TOGETHER_API_KEY",
};

pub const DASHSCOPE: CompatibleBackend = CompatibleBackend {
    provider_name: "dashscope",
    default_base_url: "https://dashscope.aliyuncs.com/compatible-mode/v1",
    env_var: "DASHSCOPE_API_KEY",
};

pub const BASETEN: CompatibleBackend = CompatibleBackend {
    provider_name: "baseten",
    default_base_url: "https://inference.baseten.co/v1",
    env_var: "BASETEN_API_KEY",
};

pub const POLLINATIONS: CompatibleBackend = CompatibleBackend {
    provider_name: "pollinations",
    default_base_url: "https://text.pollinations.ai/openai",
    env_var: "POLLINATIONS_API_KEY",
};

/// Ollama has no API key by convention (it's a local daemon); `env_var`
/// names the host override instead, and the adapter treats a missing key as
/// "no auth header" rather than `Error::KeyRequired`.
pub const OLLAMA: CompatibleBackend = CompatibleBackend {
    provider_name: "ollama",
    default_base_url: "http://localhost:11434/v1",
    env_var: "OLLAMA_HOST",
};

pub struct CompatibleAdapter {
    backend: &'static CompatibleBackend,
    client: Client,
    base_url: String,
    model_id: String,
    api_key: Option<secrecy::SecretString>,
    model_manager: ModelManager,
    model_filter: Option<ModelFilter>,
    scoreboard: Score,
}

impl CompatibleAdapter {
    pub fn new(backend: &'static CompatibleBackend, model_id: impl Into<String>, config: ProviderConfig, scoreboard: Score) -> GenResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        apply_header_rules(&config.headers, &mut headers, None);
        let client = default_http_client_builder(headers)
            .build()
            .map_err(|err| Error::Transport(format!("failed to build {} HTTP client: {err}", backend.provider_name)))?;

        let base_url = config.base_url.clone().unwrap_or_else(|| backend.default_base_url.to_string());
        let model_manager = ModelManager::new(backend.provider_name, config.models.clone());
        let api_key = auth::resolve(backend.provider_name, &config.api_key, backend.env_var).ok();

        Ok(Self {
            backend,
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

    /// Unlike the dedicated OpenAI adapter, a missing key is only an error
    /// for backends that require one (Ollama runs unauthenticated locally).
    fn require_key(&self) -> GenResult<()> {
        if self.backend.provider_name == "ollama" {
            return Ok(());
        }
        if self.api_key.is_none() {
            return Err(Error::KeyRequired {
                provider: self.backend.provider_name.to_string(),
                env_var: self.backend.env_var.to_string(),
            });
        }
        Ok(())
    }

    fn build_request(&self, messages: &[Message], options: &[Options], stream: bool) -> GenResult<ChatCompletionRequest> {
        validate_options(options, self.backend.provider_name, &[])?;
        check_model_filter(&self.model_manager, self.model_filter.as_ref(), &self.model_id)?;

        let text_opts = text_options(options);
        let mut chat_messages = Vec::new();

        if let Some(system) = text_opts.and_then(|o| o.system_prompt.clone()) {
            chat_messages.push(ChatMessage {
                role: "system".to_string(),
                content: Some(ContentField::Text(system)),
                tool_calls: None,
                tool_call_id: None,
            });
        }

        for message in messages {
            match message.role {
                Role::User => {
                    let parts = message.requests.iter().map(request_to_part).collect::<GenResult<Vec<_>>>()?;
                    chat_messages.push(ChatMessage {
                        role: "user".to_string(),
                        content: Some(simplify_parts(parts)),
                        tool_calls: None,
                        tool_call_id: None,
                    });
                }
                Role::Assistant => {
                    let text = message
                        .replies
                        .iter()
                        .filter_map(|reply| reply.text.clone().or_else(|| reply.reasoning.clone()))
                        .collect::<Vec<_>>()
                        .join("");
                    let tool_calls = message
                        .replies
                        .iter()
                        .filter_map(|reply| reply.tool_call.as_ref())
                        .map(|call| WireToolCall {
                            id: Some(call.id.clone()),
                            index: None,
                            kind: Some("function".to_string()),
                            function: FunctionCall {
                                name: Some(call.name.clone()),
                                arguments: Some(call.arguments.clone()),
                            },
                        })
                        .collect::<Vec<_>>();

                    chat_messages.push(ChatMessage {
                        role: "assistant".to_string(),
                        content: if text.is_empty() { None } else { Some(ContentField::Text(text)) },
                        tool_calls: if tool_calls.is_empty() { None } else { Some(tool_calls) },
                        tool_call_id: None,
                    });
                }
                Role::Computer => {
                    for result in &message.tool_call_results {
                        chat_messages.push(ChatMessage {
                            role: "tool".to_string(),
                            content: Some(ContentField::Text(result.result.clone())),
                            tool_calls: None,
                            tool_call_id: Some(result.id.clone()),
                        });
                    }
                }
            }
        }

        let (tools, tool_choice) = match text_opts {
            Some(opts) if !opts.tools.is_empty() => {
                let tools = opts
                    .tools
                    .iter()
                    .map(|tool| Tool {
                        kind: "function".to_string(),
                        function: FunctionDef {
                            name: tool.name.clone(),
                            description: Some(tool.description.clone()),
                            parameters: tool.parameters.clone(),
                        },
                    })
                    .collect();
                let choice = opts.tool_force.map(|force| match force {
                    genai_core::ToolForce::Required => ToolChoice::Mode("required".to_string()),
                    genai_core::ToolForce::Any => ToolChoice::Mode("auto".to_string()),
                    genai_core::ToolForce::None => ToolChoice::Mode("none".to_string()),
                });
                (Some(tools), choice)
            }
            _ => (None, None),
        };

        if text_opts.is_some_and(|opts| opts.decode_as.is_some()) {
            return Err(Error::UnsupportedContinuable(format!(
                "{} does not support strict JSON-schema decoding",
                self.backend.provider_name
            )));
        }
        let response_format = text_opts.and_then(|opts| if opts.reply_as_json { Some(ResponseFormat::JsonObject) } else { None });

        Ok(ChatCompletionRequest {
            model: self.resolved_model(),
            messages: chat_messages,
            max_tokens: text_opts.and_then(|o| o.max_tokens),
            temperature: text_opts.and_then(|o| o.temperature),
            top_p: text_opts.and_then(|o| o.top_p),
            seed: text_opts.and_then(|o| o.seed),
            stop: text_opts.filter(|o| !o.stop.is_empty()).map(|o| o.stop.clone()),
            stream: Some(stream),
            stream_options: if stream { Some(StreamOptions { include_usage: true }) } else { None },
            tools,
            tool_choice,
            parallel_tool_calls: None,
            response_format,
            logprobs: text_opts.map(|o| o.top_logprobs.is_some()),
            top_logprobs: text_opts.and_then(|o| o.top_logprobs),
        })
    }

    async fn send(&self, body: Vec<u8>) -> GenResult<reqwest::Response> {
        self.require_key()?;
        let url = format!("{}/chat/completions", self.base_url);

        let mut request = self.client.post(url).header(CONTENT_TYPE, "application/json");
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }

        let response = request
            .body(body)
            .send()
            .await
            .map_err(|err| Error::Transport(format!("failed to reach {}: {err}", self.backend.provider_name)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(decode_api_error(self.backend.provider_name, status.as_u16(), &text));
        }

        Ok(response)
    }
}

#[async_trait]
impl Provider for CompatibleAdapter {
    fn name(&self) -> &str {
        self.backend.provider_name
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
        let mut request = self.client.get(format!("{}/models", self.base_url));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key.expose_secret());
        }
        let response = request.send().await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("{} models request failed ({status}): {body}", self.backend.provider_name));
        }

        let body: ModelListResponse = response.json().await?;
        Ok(body
            .data
            .into_iter()
            .filter(|m| filter_allowed(self.model_filter.as_ref(), &m.id))
            .map(|m| Model {
                id: m.id,
                owned_by: m.owned_by,
                created: m.created,
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
            .map_err(|err| Error::Transport(format!("failed to read {} response body: {err}", self.backend.provider_name)))?;
        let parsed: ChatCompletionResponse = serde_json::from_str(&text)
            .map_err(|err| Error::BadInternal(format!("failed to decode {} response: {err}", self.backend.provider_name)))?;

        if parsed.choices.len() > 1 {
            return Err(Error::BadInternal(format!(
                "{} response carried {} choices, expected exactly one",
                self.backend.provider_name,
                parsed.choices.len()
            )));
        }
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::BadInternal(format!("{} response carried no choices", self.backend.provider_name)))?;

        let logprobs = choice_logprobs_to_core(choice.logprobs.as_ref());
        let replies = response_to_replies(&choice.message);
        let has_tool_call = replies.iter().any(|r| r.tool_call.is_some());
        let finish_reason = normalize_finish_reason(finish_reason_from_wire(choice.finish_reason.as_deref()), has_tool_call);

        let usage = parsed.usage.unwrap_or_default();

        Ok(genai_core::message::Result {
            message: Message::from_replies(replies),
            usage: Usage {
                input_tokens: usage.prompt_tokens,
                input_cached_tokens: usage.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or_default(),
                output_tokens: usage.completion_tokens,
                reasoning_tokens: usage.completion_tokens_details.map(|d| d.reasoning_tokens).unwrap_or_default(),
                total_tokens: usage.total_tokens,
                finish_reason,
                ..Default::default()
            },
            logprobs,
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

        let fragments = futures::stream::unfold((Box::pin(events), Demuxer::new(), false), move |(mut events, mut demux, mut tool_call_seen)| {
            let shadow_message = Arc::clone(&shadow_message);
            let shadow_usage = Arc::clone(&shadow_usage);
            async move {
                loop {
                    let Some(event) = events.next().await else {
                        let fragment = demux.finish();
                        return fragment.map(|fragment| (Ok(fragment), (events, demux, tool_call_seen)));
                    };

                    let Ok(event) = event else {
                        log::warn!("SSE parsing error in compatible-adapter stream");
                        continue;
                    };

                    if event.data == "[DONE]" {
                        let fragment = demux.finish();
                        return fragment.map(|fragment| (Ok(fragment), (events, demux, tool_call_seen)));
                    }

                    let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
                        log::warn!("failed to parse compatible-adapter streaming chunk: {}", event.data);
                        continue;
                    };

                    if let Some(usage) = chunk.usage {
                        demux.apply(DeltaEvent::UsageUpdate(Usage {
                            input_tokens: usage.prompt_tokens,
                            output_tokens: usage.completion_tokens,
                            total_tokens: usage.total_tokens,
                            ..Default::default()
                        }));
                        *shadow_usage.lock().await = demux.usage().clone();
                    }

                    let Some(choice) = chunk.choices.into_iter().next() else {
                        continue;
                    };

                    let mut emitted = None;
                    if let Some(text) = choice.delta.content {
                        emitted = demux.apply(DeltaEvent::TextDelta(text));
                    } else if let Some(reasoning) = choice.delta.reasoning_content {
                        emitted = demux.apply(DeltaEvent::ReasoningDelta(reasoning));
                    } else if let Some(calls) = choice.delta.tool_calls {
                        tool_call_seen = true;
                        for call in calls {
                            emitted = demux.apply(DeltaEvent::ToolCallDelta {
                                id: call.id,
                                name: call.function.name,
                                arguments: call.function.arguments,
                            });
                            if emitted.is_some() {
                                break;
                            }
                        }
                    }

                    if let Some(reason) = choice.finish_reason.as_deref() {
                        demux.apply(DeltaEvent::Finish(normalize_finish_reason(
                            finish_reason_from_wire(Some(reason)),
                            tool_call_seen,
                        )));
                    }

                    let Some(fragment) = emitted else { continue };
                    shadow_message.lock().await.accumulate(fragment.clone());
                    return Some((Ok(fragment), (events, demux, tool_call_seen)));
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
    use genai_core::{FinishReason, Options, OptionsText};
    use serde_json::{Value, json};
    use std::sync::{Arc as StdArc, Mutex as StdMutex};
    use tokio::net::TcpListener;

    #[derive(Clone)]
    struct CaptureState {
        captured: StdArc<StdMutex<Option<Value>>>,
    }

    async fn handle_chat(State(state): State<CaptureState>, Json(body): Json<Value>) -> impl IntoResponse {
        *state.captured.lock().unwrap() = Some(body);
        Json(json!({
            "id": "chatcmpl_abc",
            "model": "llama-3.3-70b-versatile",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi from groq"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 4, "completion_tokens": 3, "total_tokens": 7}
        }))
    }

    #[tokio::test]
    async fn gen_sync_sends_request_to_configured_base_url() {
        let state = CaptureState {
            captured: StdArc::new(StdMutex::new(None)),
        };
        let app = Router::new().route("/v1/chat/completions", post(handle_chat)).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = ProviderConfig::default()
            .with_api_key("test-key")
            .with_base_url(format!("http://{addr}/v1"));
        let adapter = CompatibleAdapter::new(
            &GROQ,
            "llama-3.3-70b-versatile",
            config,
            Score {
                provider: "groq".to_string(),
                scenarios: Vec::new(),
            },
        )
        .unwrap();

        let messages = vec![Message::new_text("hello")];
        let options = vec![Options::Text(OptionsText::default())];
        let result = adapter.gen_sync(&messages, &options).await.unwrap();

        assert_eq!(result.message.as_text(), "hi from groq");
        assert_eq!(result.usage.finish_reason, FinishReason::Stop);

        let captured = state.captured.lock().unwrap().clone().unwrap();
        assert_eq!(captured["model"], "llama-3.3-70b-versatile");
    }

    #[tokio::test]
    async fn missing_api_key_yields_key_required_for_keyed_backend() {
        let adapter = CompatibleAdapter::new(
            &TOGETHER,
            "meta-llama/Llama-3-70b",
            ProviderConfig::default(),
            Score {
                provider: "together".to_string(),
                scenarios: Vec::new(),
            },
        )
        .unwrap();

        let messages = vec![Message::new_text("hello")];
        let err = adapter.gen_sync(&messages, &[]).await.unwrap_err();
        assert!(matches!(err, Error::KeyRequired { .. }));
    }

    #[tokio::test]
    async fn ollama_backend_does_not_require_a_key() {
        let state = CaptureState {
            captured: StdArc::new(StdMutex::new(None)),
        };
        let app = Router::new().route("/v1/chat/completions", post(handle_chat)).with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = ProviderConfig::default().with_base_url(format!("http://{addr}/v1"));
        let adapter = CompatibleAdapter::new(
            &OLLAMA,
            "llama3",
            config,
            Score {
                provider: "ollama".to_string(),
                scenarios: Vec::new(),
            },
        )
        .unwrap();

        let messages = vec![Message::new_text("hello")];
        let result = adapter.gen_sync(&messages, &[]).await;
        assert!(result.is_ok());
    }
}
