//! Gemini `generateContent`/`streamGenerateContent` adapter (spec §4.5),
//! grounded on the teacher's original Google provider. Two deviations from
//! the other adapters, both dictated by Gemini's wire protocol: the API key
//! travels in the URL's `key` query parameter rather than a header, and
//! streamed function calls arrive whole in a single chunk rather than
//! fragmented — emitted as a one-shot [`crate::stream::DeltaEvent::ToolCallDelta`]
//! with a locally generated id rather than continuation-tracked.

use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use genai_config::{ModelFilter, ModelManager, ProviderConfig, apply_header_rules};
use genai_core::{
    Error, FinishReason, GenResult, Logprob, Message, Modality, Options, Reply, Request, Role, Score, ToolCall,
    ToolForce, Usage, message::Doc,
};
use reqwest::Client;
use secrecy::ExposeSecret;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::{
    adapters::common::{check_model_filter, filter_allowed, normalize_finish_reason, text_options, validate_options},
    auth,
    error::decode_api_error,
    http::default_http_client_builder,
    messages::google::{
        Candidate, Content, FunctionCall, FunctionCallingConfig, FunctionCallingMode, FunctionDeclaration,
        FunctionResponse, GenerateRequest, GenerateResponse, GenerationConfig, InlineData, Part, Role as GoogleRole,
        Tool, ToolConfig, strip_unsupported_schema_fields,
    },
    provider::{GenStreamResult, Model, Provider, ReplyStream},
    stream::{DeltaEvent, Demuxer},
};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";
const ENV_VAR: &str = "GOOGLE_API_KEY";

pub struct GoogleAdapter {
    client: Client,
    base_url: String,
    model_id: String,
    api_key: Option<secrecy::SecretString>,
    model_manager: ModelManager,
    model_filter: Option<ModelFilter>,
    scoreboard: Score,
}

impl GoogleAdapter {
    pub fn new(model_id: impl Into<String>, config: ProviderConfig, scoreboard: Score) -> GenResult<Self> {
        let mut headers = reqwest::header::HeaderMap::new();
        apply_header_rules(&config.headers, &mut headers, None);
        let client = default_http_client_builder(headers)
            .build()
            .map_err(|err| Error::Transport(format!("failed to build Google HTTP client: {err}")))?;

        let base_url = config.base_url.clone().unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        let model_manager = ModelManager::new("google", config.models.clone());
        let api_key = auth::resolve("google", &config.api_key, ENV_VAR).ok();

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
            provider: "google".to_string(),
            env_var: ENV_VAR.to_string(),
        })
    }

    fn build_request(&self, messages: &[Message], options: &[Options]) -> GenResult<GenerateRequest> {
        validate_options(options, "google", &[])?;
        check_model_filter(&self.model_manager, self.model_filter.as_ref(), &self.model_id)?;

        let text_opts = text_options(options);

        let system_instruction = text_opts.and_then(|o| o.system_prompt.clone()).map(|text| Content {
            role: GoogleRole::User,
            parts: vec![Part {
                text: Some(text),
                ..Default::default()
            }],
        });

        let mut contents = Vec::new();
        for message in messages {
            match message.role {
                Role::User => {
                    let parts = message.requests.iter().map(request_to_part).collect::<GenResult<Vec<_>>>()?;
                    contents.push(Content {
                        parts,
                        role: GoogleRole::User,
                    });
                }
                Role::Assistant => {
                    let parts = message
                        .replies
                        .iter()
                        .filter(|reply| !reply.is_empty())
                        .map(reply_to_part)
                        .collect::<GenResult<Vec<_>>>()?;
                    contents.push(Content {
                        parts,
                        role: GoogleRole::Model,
                    });
                }
                Role::Computer => {
                    for result in &message.tool_call_results {
                        contents.push(Content {
                            parts: vec![Part {
                                function_response: Some(FunctionResponse {
                                    name: result.name.clone(),
                                    response: tool_result_response_value(&result.result),
                                }),
                                ..Default::default()
                            }],
                            role: GoogleRole::User,
                        });
                    }
                }
            }
        }

        let (tools, tool_config) = match text_opts {
            Some(opts) if !opts.tools.is_empty() => {
                let declarations = opts
                    .tools
                    .iter()
                    .map(|tool| FunctionDeclaration {
                        name: tool.name.clone(),
                        description: tool.description.clone(),
                        parameters: strip_unsupported_schema_fields(tool.parameters.clone()),
                    })
                    .collect();
                let tools = vec![Tool {
                    function_declarations: declarations,
                }];
                let config = opts.tool_force.map(|force| ToolConfig {
                    function_calling_config: FunctionCallingConfig {
                        mode: match force {
                            ToolForce::Required => FunctionCallingMode::Any,
                            ToolForce::Any => FunctionCallingMode::Auto,
                            ToolForce::None => FunctionCallingMode::None,
                        },
                        allowed_function_names: None,
                    },
                });
                (Some(tools), config)
            }
            _ => (None, None),
        };

        let generation_config = text_opts.map(|opts| GenerationConfig {
            stop_sequences: (!opts.stop.is_empty()).then(|| opts.stop.clone()),
            response_mime_type: (opts.decode_as.is_some() || opts.reply_as_json).then(|| "application/json".to_string()),
            response_schema: opts.decode_as.clone(),
            candidate_count: None,
            max_output_tokens: opts.max_tokens.map(|t| t as i32),
            temperature: opts.temperature,
            top_p: opts.top_p,
            top_k: opts.top_k.map(|t| t as i32),
            seed: opts.seed,
            response_logprobs: opts.top_logprobs.map(|_| true),
            logprobs: opts.top_logprobs.map(|t| t as i32),
        });

        Ok(GenerateRequest {
            contents,
            generation_config,
            tools,
            tool_config,
            system_instruction,
        })
    }

    async fn send(&self, verb: &str, stream: bool, body: Vec<u8>) -> GenResult<reqwest::Response> {
        let key = self.require_key()?;
        let alt = if stream { "alt=sse&" } else { "" };
        let url = format!(
            "{}/models/{}:{verb}?{alt}key={}",
            self.base_url,
            self.resolved_model(),
            key.expose_secret()
        );

        let response = self
            .client
            .post(url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(body)
            .send()
            .await
            .map_err(|err| Error::Transport(format!("failed to reach Google: {err}")))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(decode_api_error("google", status.as_u16(), &text));
        }

        Ok(response)
    }
}

fn request_to_part(request: &Request) -> GenResult<Part> {
    match request {
        Request::Text(text) => Ok(Part {
            text: Some(text.clone()),
            ..Default::default()
        }),
        Request::Doc(doc) => doc_to_part(doc),
    }
}

fn doc_to_part(doc: &Doc) -> GenResult<Part> {
    let data = doc
        .data
        .as_ref()
        .ok_or_else(|| Error::NotSupported("Gemini requires inline document bytes, not a url".to_string()))?;

    Ok(Part {
        inline_data: Some(InlineData {
            mime_type: doc.mime_type.clone(),
            data: base64_encode(data),
        }),
        ..Default::default()
    })
}

fn reply_to_part(reply: &Reply) -> GenResult<Part> {
    if let Some(call) = &reply.tool_call {
        let args = serde_json::from_str(&call.arguments).unwrap_or_else(|_| Value::Object(Default::default()));
        return Ok(Part {
            function_call: Some(FunctionCall {
                name: call.name.clone(),
                args,
            }),
            ..Default::default()
        });
    }

    Ok(Part {
        text: reply.text.clone().or_else(|| reply.reasoning.clone()),
        ..Default::default()
    })
}

/// Gemini requires `function_response.response` to be a JSON object; a tool
/// result that isn't already one gets wrapped under a `result` key.
fn tool_result_response_value(result: &str) -> Value {
    match serde_json::from_str::<Value>(result) {
        Ok(value) if value.is_object() => value,
        _ => serde_json::json!({ "result": result }),
    }
}

fn base64_encode(data: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(data)
}

fn finish_reason_from_wire(reason: Option<&str>) -> FinishReason {
    match reason {
        Some("STOP") => FinishReason::Stop,
        Some("MAX_TOKENS") => FinishReason::Length,
        Some("SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII") => FinishReason::ContentFilter,
        _ => FinishReason::Empty,
    }
}

fn response_to_replies(candidate: &Candidate) -> Vec<Reply> {
    let Some(content) = &candidate.content else {
        return Vec::new();
    };

    content
        .parts
        .iter()
        .filter_map(|part| {
            if let Some(call) = &part.function_call {
                return Some(Reply::tool_call(ToolCall {
                    id: format!("call_{}", uuid::Uuid::new_v4()),
                    name: call.name.clone(),
                    arguments: serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string()),
                    opaque: None,
                }));
            }
            part.text.as_ref().filter(|t| !t.is_empty()).map(|text| Reply::text(text.clone()))
        })
        .collect()
}

/// Pairs Gemini's `chosenCandidates` (the token emitted at each position)
/// with that position's `topCandidates` (its alternates) into a single-row
/// `Result.logprobs` list.
fn candidate_logprobs(candidate: &Candidate) -> Vec<Vec<Logprob>> {
    let Some(logprobs) = &candidate.logprobs_result else { return Vec::new() };
    if logprobs.chosen_candidates.is_empty() {
        return Vec::new();
    }

    let tokens = logprobs
        .chosen_candidates
        .iter()
        .enumerate()
        .map(|(i, chosen)| Logprob {
            token: chosen.token.clone(),
            logprob: chosen.log_probability,
            top: logprobs
                .top_candidates
                .get(i)
                .map(|top| top.candidates.iter().map(|c| (c.token.clone(), c.log_probability)).collect())
                .unwrap_or_default(),
        })
        .collect();

    vec![tokens]
}

#[async_trait]
impl Provider for GoogleAdapter {
    fn name(&self) -> &str {
        "google"
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
        #[derive(serde::Deserialize)]
        struct ModelsResponse {
            models: Vec<ModelInfo>,
        }

        #[derive(serde::Deserialize)]
        struct ModelInfo {
            name: String,
        }

        let key = self.require_key().map_err(|err| anyhow::anyhow!(err.to_string()))?;
        let response = self
            .client
            .get(format!("{}/models?key={}", self.base_url, key.expose_secret()))
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(anyhow::anyhow!("Google models request failed ({status}): {body}"));
        }

        let body: ModelsResponse = response.json().await?;
        Ok(body
            .models
            .into_iter()
            .map(|m| m.name.strip_prefix("models/").unwrap_or(&m.name).to_string())
            .filter(|id| filter_allowed(self.model_filter.as_ref(), id))
            .map(|id| Model {
                id,
                owned_by: "google".to_string(),
                created: 0,
            })
            .collect())
    }

    async fn gen_sync(&self, messages: &[Message], options: &[Options]) -> GenResult<genai_core::message::Result> {
        let request = self.build_request(messages, options)?;
        let body = serde_json::to_vec(&request).map_err(|err| Error::Transport(err.to_string()))?;
        let response = self.send("generateContent", false, body).await?;

        let text = response
            .text()
            .await
            .map_err(|err| Error::Transport(format!("failed to read Google response body: {err}")))?;
        let parsed: GenerateResponse =
            serde_json::from_str(&text).map_err(|err| Error::BadInternal(format!("failed to decode Google response: {err}")))?;

        if parsed.candidates.len() > 1 {
            return Err(Error::BadInternal(format!(
                "Google response carried {} candidates, expected exactly one",
                parsed.candidates.len()
            )));
        }
        let candidate = parsed
            .candidates
            .first()
            .ok_or_else(|| Error::BadInternal("Google response carried no candidates".to_string()))?;

        let logprobs = candidate_logprobs(candidate);
        let replies = response_to_replies(candidate);
        let has_tool_call = replies.iter().any(|r| r.tool_call.is_some());
        let finish_reason = normalize_finish_reason(finish_reason_from_wire(candidate.finish_reason.as_deref()), has_tool_call);

        let usage = parsed.usage_metadata.unwrap_or_default();

        Ok(genai_core::message::Result {
            message: Message::from_replies(replies),
            usage: Usage {
                input_tokens: usage.prompt_token_count as u64,
                output_tokens: usage.candidates_token_count as u64,
                reasoning_tokens: usage.thoughts_token_count as u64,
                total_tokens: usage.total_token_count as u64,
                finish_reason,
                ..Default::default()
            },
            logprobs,
        })
    }

    async fn gen_stream(&self, messages: &[Message], options: &[Options]) -> GenResult<GenStreamResult> {
        let request = self.build_request(messages, options)?;
        let body = serde_json::to_vec(&request).map_err(|err| Error::Transport(err.to_string()))?;
        let response = self.send("streamGenerateContent", true, body).await?;

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
                        log::warn!("SSE parsing error in Google stream");
                        continue;
                    };

                    let Ok(chunk) = serde_json::from_str::<GenerateResponse>(&event.data) else {
                        log::warn!("failed to parse Google streaming chunk: {}", event.data);
                        continue;
                    };

                    if let Some(usage) = chunk.usage_metadata {
                        demux.apply(DeltaEvent::UsageUpdate(Usage {
                            input_tokens: usage.prompt_token_count as u64,
                            output_tokens: usage.candidates_token_count as u64,
                            reasoning_tokens: usage.thoughts_token_count as u64,
                            total_tokens: usage.total_token_count as u64,
                            ..Default::default()
                        }));
                        *shadow_usage.lock().await = demux.usage().clone();
                    }

                    let Some(candidate) = chunk.candidates.into_iter().next() else {
                        continue;
                    };

                    let mut emitted = None;
                    if let Some(content) = candidate.content {
                        for part in content.parts {
                            if let Some(call) = part.function_call {
                                tool_call_seen = true;
                                emitted = demux.apply(DeltaEvent::ToolCallDelta {
                                    id: Some(format!("call_{}", uuid::Uuid::new_v4())),
                                    name: Some(call.name),
                                    arguments: Some(serde_json::to_string(&call.args).unwrap_or_else(|_| "{}".to_string())),
                                });
                            } else if let Some(text) = part.text.filter(|t| !t.is_empty()) {
                                emitted = demux.apply(DeltaEvent::TextDelta(text));
                            }

                            if emitted.is_some() {
                                break;
                            }
                        }
                    }

                    if let Some(reason) = candidate.finish_reason.as_deref() {
                        demux.apply(DeltaEvent::Finish(normalize_finish_reason(finish_reason_from_wire(Some(reason)), tool_call_seen)));
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

    async fn handle_generate(State(state): State<CaptureState>, Json(body): Json<Value>) -> impl IntoResponse {
        *state.captured.lock().unwrap() = Some(body);
        Json(json!({
            "candidates": [{
                "content": {"role": "model", "parts": [{"text": "hi"}]},
                "finishReason": "STOP"
            }],
            "usageMetadata": {"promptTokenCount": 5, "candidatesTokenCount": 2, "totalTokenCount": 7}
        }))
    }

    #[tokio::test]
    async fn gen_sync_sends_request_and_parses_response() {
        let state = CaptureState {
            captured: StdArc::new(StdMutex::new(None)),
        };
        let app = Router::new()
            .route("/v1beta/models/gemini-1.5-flash:generateContent", post(handle_generate))
            .with_state(state.clone());
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        let config = ProviderConfig::default()
            .with_api_key("test-key")
            .with_base_url(format!("http://{addr}/v1beta"));
        let adapter = GoogleAdapter::new(
            "gemini-1.5-flash",
            config,
            Score {
                provider: "google".to_string(),
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
        assert_eq!(captured["contents"][0]["parts"][0]["text"], "hello");
    }

    #[tokio::test]
    async fn missing_api_key_yields_key_required_without_sending() {
        // SAFETY: test-local env mutation, isolated var name.
        unsafe { std::env::remove_var("GOOGLE_API_KEY") };
        let adapter = GoogleAdapter::new(
            "gemini-1.5-flash",
            ProviderConfig::default(),
            Score {
                provider: "google".to_string(),
                scenarios: Vec::new(),
            },
        )
        .unwrap();

        let messages = vec![Message::new_text("hello")];
        let err = adapter.gen_sync(&messages, &[]).await.unwrap_err();
        assert!(matches!(err, Error::KeyRequired { .. }));
    }

    #[test]
    fn wraps_non_object_tool_result_under_result_key() {
        let value = tool_result_response_value("42");
        assert_eq!(value, json!({"result": "42"}));
    }

    #[test]
    fn passes_through_object_tool_result() {
        let value = tool_result_response_value(r#"{"ok":true}"#);
        assert_eq!(value, json!({"ok": true}));
    }
}
