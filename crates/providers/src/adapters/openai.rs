//! OpenAI Chat Completions adapter (spec §4.5), grounded on the
//! request/dispatch/response shape of the teacher's original OpenAI
//! provider. Unlike Anthropic, OpenAI's streaming protocol is a flat delta
//! array, so this adapter routes every streamed chunk through
//! [`crate::stream::Demuxer`] instead of emitting fragments itself.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use genai_config::{ModelFilter, ModelManager, ProviderConfig, apply_header_rules};
use genai_core::{
    Error, FinishReason, GenResult, Logprob, Message, Modality, Options, Reply, Request, Role, Score, ToolCall,
    ToolForce, Usage, message::Doc,
};
use reqwest::{Client, header::CONTENT_TYPE};
use secrecy::ExposeSecret;
use tokio::sync::Mutex;

use crate::{
    adapters::common::{check_model_filter, filter_allowed, normalize_finish_reason, text_options, validate_options},
    auth,
    error::decode_api_error,
    http::default_http_client_builder,
    messages::openai::{
        ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ChatMessage, ChoiceLogprobs, ContentField,
        ContentPart, FilePart, FunctionCall, FunctionDef, ImageUrl, InputAudio, JsonSchemaFormat, ModelListResponse,
        ResponseFormat, StreamOptions, Tool, ToolCall as WireToolCall, ToolChoice,
    },
    provider::{GenStreamResult, Model, Provider, ReplyStream},
    stream::{DeltaEvent, Demuxer},
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const ENV_VAR: &str = "OPENAI_API_KEY";

pub struct OpenAiAdapter {
    client: Client,
    base_url: String,
    model_id: String,
    api_key: Option<secrecy::SecretString>,
    model_manager: ModelManager,
    model_filter: Option<ModelFilter>,
    scoreboard: Score,
}

impl OpenAiAdapter {
    pub fn new(model_id: impl Into<String>, config: ProviderConfig, scoreboard: Score) -> GenResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        apply_header_rules(&config.headers, &mut headers, None);
        let client = default_http_client_builder(headers)
            .build()
            .map_err(|err| Error::Transport(format!("failed to build OpenAI HTTP client: {err}")))?;

        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model_manager = ModelManager::new("openai", config.models.clone());
        let api_key = auth::resolve("openai", &config.api_key, ENV_VAR).ok();

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
            provider: "openai".to_string(),
            env_var: ENV_VAR.to_string(),
        })
    }

    fn build_request(&self, messages: &[Message], options: &[Options], stream: bool) -> GenResult<ChatCompletionRequest> {
        validate_options(options, "openai", &[])?;
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
                    ToolForce::Required => ToolChoice::Mode("required".to_string()),
                    ToolForce::Any => ToolChoice::Mode("auto".to_string()),
                    ToolForce::None => ToolChoice::Mode("none".to_string()),
                });
                (Some(tools), choice)
            }
            _ => (None, None),
        };

        let response_format = text_opts.and_then(|opts| {
            if let Some(schema) = &opts.decode_as {
                Some(ResponseFormat::JsonSchema {
                    json_schema: JsonSchemaFormat {
                        name: "response".to_string(),
                        schema: schema.clone(),
                        strict: true,
                    },
                })
            } else if opts.reply_as_json {
                Some(ResponseFormat::JsonObject)
            } else {
                None
            }
        });

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
        let url = format!("{}/chat/completions", self.base_url);
        let key = self.require_key()?;

        let response = self
            .client
            .post(url)
            .bearer_auth(key.expose_secret())
            .header(CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| Error::Transport(format!("failed to reach OpenAI: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(decode_api_error("openai", status.as_u16(), &text));
        }

        Ok(response)
    }
}

pub(crate) fn request_to_part(request: &Request) -> GenResult<ContentPart> {
    match request {
        Request::Text(text) => Ok(ContentPart::Text { text: text.clone() }),
        Request::Doc(doc) => doc_to_part(doc),
    }
}

fn doc_to_part(doc: &Doc) -> GenResult<ContentPart> {
    if doc.mime_type.starts_with("image/") {
        let url = match (&doc.url, &doc.data) {
            (Some(url), _) => url.clone(),
            (None, Some(data)) => format!("data:{};base64,{}", doc.mime_type, base64_encode(data)),
            (None, None) => return Err(Error::BadInternal("document has neither inline data nor a url".to_string())),
        };
        return Ok(ContentPart::ImageUrl { image_url: ImageUrl { url } });
    }

    if doc.mime_type.starts_with("audio/") {
        let data = doc
            .data
            .as_ref()
            .ok_or_else(|| Error::NotSupported("OpenAI requires inline audio bytes, not a url".to_string()))?;
        let format = doc.mime_type.rsplit('/').next().unwrap_or("wav").to_string();
        return Ok(ContentPart::InputAudio {
            input_audio: InputAudio {
                data: base64_encode(data),
                format,
            },
        });
    }

    let data = doc.data.as_ref().ok_or_else(|| {
        Error::NotSupported(format!(
            "OpenAI adapter has no url-based wire representation for MIME type '{}'",
            doc.mime_type
        ))
    })?;
    Ok(ContentPart::File {
        file: FilePart {
            filename: doc.filename.clone(),
            file_data: format!("data:{};base64,{}", doc.mime_type, base64_encode(data)),
        },
    })
}

pub(crate) fn simplify_parts(mut parts: Vec<ContentPart>) -> ContentField {
    if parts.len() == 1
        && let ContentPart::Text { .. } = &parts[0]
        && let ContentPart::Text { text } = parts.remove(0)
    {
        return ContentField::Text(text);
    }
    ContentField::Parts(parts)
}

pub(crate) fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

pub(crate) fn finish_reason_from_wire(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("stop") => FinishReason::Stop,
        Some("length") => FinishReason::Length,
        Some("tool_calls") => FinishReason::ToolCalls,
        Some("content_filter") => FinishReason::ContentFilter,
        _ => FinishReason::Empty,
    }
}

pub(crate) fn response_to_replies(message: &ChatMessage) -> Vec<Reply> {
    let mut replies = Vec::new();

    if let Some(ContentField::Text(text)) = &message.content
        && !text.is_empty()
    {
        replies.push(Reply::text(text.clone()));
    }

    for call in message.tool_calls.iter().flatten() {
        replies.push(Reply::tool_call(ToolCall {
            id: call.id.clone().unwrap_or_default(),
            name: call.function.name.clone().unwrap_or_default(),
            arguments: call.function.arguments.clone().unwrap_or_default(),
            opaque: None,
        }));
    }

    replies
}

/// Maps the wire per-token logprobs list (OpenAI and OpenAI-compatible
/// backends share this shape) into a single-choice `Result.logprobs` row.
pub(crate) fn choice_logprobs_to_core(logprobs: Option<&ChoiceLogprobs>) -> Vec<Vec<Logprob>> {
    let Some(logprobs) = logprobs else { return Vec::new() };
    if logprobs.content.is_empty() {
        return Vec::new();
    }

    let tokens = logprobs
        .content
        .iter()
        .map(|token| Logprob {
            token: token.token.clone(),
            logprob: token.logprob,
            top: token.top_logprobs.iter().map(|top| (top.token.clone(), top.logprob)).collect(),
        })
        .collect();

    vec![tokens]
}

#[async_trait]
impl Provider for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
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
            .bearer_auth(key.expose_secret())
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("OpenAI models request failed ({status}): {body}"));
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
            .map_err(|err| Error::Transport(format!("failed to read OpenAI response body: {err}")))?;
        let parsed: ChatCompletionResponse =
            serde_json::from_str(&text).map_err(|err| Error::BadInternal(format!("failed to decode OpenAI response: {err}")))?;

        if parsed.choices.len() > 1 {
            return Err(Error::BadInternal(format!(
                "OpenAI response carried {} choices, expected exactly one",
                parsed.choices.len()
            )));
        }
        let choice = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| Error::BadInternal("OpenAI response carried no choices".to_string()))?;

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
                        return fragment.map(|fragment| {
                            let event_state = (events, demux, tool_call_seen);
                            (Ok(fragment), event_state)
                        });
                    };

                    let Ok(event) = event else {
                        log::warn!("SSE parsing error in OpenAI stream");
                        continue;
                    };

                    if event.data == "[DONE]" {
                        let fragment = demux.finish();
                        return fragment.map(|fragment| (Ok(fragment), (events, demux, tool_call_seen)));
                    }

                    let Ok(chunk) = serde_json::from_str::<ChatCompletionChunk>(&event.data) else {
                        log::warn!("failed to parse OpenAI streaming chunk: {}", event.data);
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
    use genai_core::{Options, OptionsText};
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
            "id": "chatcmpl_123",
            "model": "gpt-4o-mini",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "hi"},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 5, "completion_tokens": 2, "total_tokens": 7}
        }))
    }

    #[tokio::test]
    async fn gen_sync_sends_request_and_parses_response() {
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
        let adapter = OpenAiAdapter::new(
            "gpt-4o-mini",
            config,
            Score {
                provider: "openai".to_string(),
                scenarios: Vec::new(),
            },
        )
        .unwrap();

        let messages = vec![Message::new_text("hello")];
        let options = vec![Options::Text(OptionsText::default())];
        let result = adapter.gen_sync(&messages, &options).await.unwrap();

        assert_eq!(result.message.as_text(), "hi");
        assert_eq!(result.usage.finish_reason, FinishReason::Stop);
        assert_eq!(result.usage.total_tokens, 7);

        let captured = state.captured.lock().unwrap().clone().unwrap();
        assert_eq!(captured["model"], "gpt-4o-mini");
    }

    #[tokio::test]
    async fn missing_api_key_yields_key_required_without_sending() {
        // SAFETY: test-local env mutation, isolated var name.
        unsafe { std::env::remove_var("OPENAI_API_KEY") };
        let adapter = OpenAiAdapter::new(
            "gpt-4o-mini",
            ProviderConfig::default(),
            Score {
                provider: "openai".to_string(),
                scenarios: Vec::new(),
            },
        )
        .unwrap();

        let messages = vec![Message::new_text("hello")];
        let err = adapter.gen_sync(&messages, &[]).await.unwrap_err();
        assert!(matches!(err, Error::KeyRequired { .. }));
    }

    #[test]
    fn finish_reason_tool_calls_normalizes_stop_when_tool_present() {
        let reason = normalize_finish_reason(finish_reason_from_wire(Some("stop")), true);
        assert_eq!(reason, FinishReason::ToolCalls);
    }
}
