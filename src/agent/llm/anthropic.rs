//! Anthropic Messages API client.

use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use tracing::debug;

use crate::config::Config;
use crate::error::Error;
use crate::tools::ToolDefinition;
use crate::Result;

use super::super::message::{Message, Role, ToolCallRequest};
use super::types::{ApiErrorBody, ApiMessage, ApiTool, ContentBlock, MessagesRequest, MessagesResponse};
use super::{LlmClient, LlmResponse, ModelProvider, Usage};

pub const ANTHROPIC_API_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 8192;

/// Messages API client bound to one model.
#[derive(Clone)]
pub struct AnthropicClient {
    api_key: String,
    base_url: String,
    model: String,
    client: Client,
}

impl AnthropicClient {
    pub fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            base_url: ANTHROPIC_API_URL.to_string(),
            model: model.to_string(),
            client: Client::new(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }
}

fn system_prompt(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .find(|m| m.role == Role::System)
        .map(|m| m.content.as_str())
}

/// History in API shape. Tool results travel as user turns, and consecutive
/// turns of the same role are merged since the API requires alternation.
fn convert_messages(messages: &[Message]) -> Vec<ApiMessage> {
    let mut out: Vec<ApiMessage> = Vec::new();

    for m in messages {
        let (role, blocks) = match m.role {
            Role::System => continue,
            Role::User => ("user", text_block(&m.content)),
            Role::Tool => (
                "user",
                vec![ContentBlock::ToolResult {
                    tool_use_id: m.tool_call_id.clone().unwrap_or_default(),
                    content: m.content.clone(),
                }],
            ),
            Role::Assistant => {
                let mut blocks = text_block(&m.content);
                for call in m.tool_calls.iter().flatten() {
                    blocks.push(ContentBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    });
                }
                ("assistant", blocks)
            }
        };
        if blocks.is_empty() {
            continue;
        }

        match out.last_mut() {
            Some(last) if last.role == role => last.content.extend(blocks),
            _ => out.push(ApiMessage { role, content: blocks }),
        }
    }
    out
}

fn text_block(text: &str) -> Vec<ContentBlock> {
    if text.trim().is_empty() {
        Vec::new()
    } else {
        vec![ContentBlock::Text { text: text.to_string() }]
    }
}

fn parse_response(response: MessagesResponse) -> LlmResponse {
    let mut texts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            ContentBlock::Text { text } => texts.push(text),
            ContentBlock::ToolUse { id, name, input } => tool_calls.push(ToolCallRequest {
                id,
                name,
                arguments: input,
            }),
            ContentBlock::ToolResult { .. } | ContentBlock::Other => {}
        }
    }

    let content = if texts.is_empty() { None } else { Some(texts.join("\n")) };
    let usage = Usage {
        prompt_tokens: response.usage.input_tokens,
        completion_tokens: response.usage.output_tokens,
        total_tokens: response.usage.input_tokens + response.usage.output_tokens,
    };

    LlmResponse {
        content,
        tool_calls,
        finish_reason: response.stop_reason.unwrap_or_else(|| "end_turn".to_string()),
        usage,
    }
}

#[async_trait]
impl LlmClient for AnthropicClient {
    async fn chat(&self, messages: &[Message], tools: &[ToolDefinition]) -> Result<LlmResponse> {
        let request = MessagesRequest {
            model: &self.model,
            max_tokens: MAX_TOKENS,
            system: system_prompt(messages),
            messages: convert_messages(messages),
            tools: tools
                .iter()
                .map(|t| ApiTool {
                    name: &t.name,
                    description: &t.description,
                    input_schema: &t.parameters,
                })
                .collect(),
        };

        debug!(model = %self.model, messages = request.messages.len(), "Submitting to Anthropic");
        let response = self
            .client
            .post(format!("{}/v1/messages", self.base_url))
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&request)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await?;
            let detail = serde_json::from_str::<ApiErrorBody>(&body)
                .map(|e| format!("{}: {}", e.error.kind, e.error.message))
                .unwrap_or(body);
            return Err(Error::Llm(format!("Anthropic API error ({status}): {detail}")));
        }

        let parsed: MessagesResponse = response.json().await?;
        Ok(parse_response(parsed))
    }

    fn model(&self) -> &str {
        &self.model
    }
}

/// Connects Anthropic clients for any model id.
pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: Client,
}

impl AnthropicProvider {
    pub fn from_config(config: &Config) -> Result<Self> {
        if config.anthropic_api_key.is_empty() {
            return Err(Error::Config(
                "ANTHROPIC_API_KEY is not set. Add it to .env or run `mediagram onboard`.".to_string(),
            ));
        }
        Ok(Self {
            api_key: config.anthropic_api_key.clone(),
            base_url: config
                .anthropic_base_url
                .clone()
                .unwrap_or_else(|| ANTHROPIC_API_URL.to_string()),
            client: Client::new(),
        })
    }
}

impl ModelProvider for AnthropicProvider {
    fn connect(&self, model_id: &str) -> Result<Arc<dyn LlmClient>> {
        let client = AnthropicClient::new(&self.api_key, model_id)
            .with_base_url(self.base_url.clone())
            .with_client(self.client.clone());
        Ok(Arc::new(client))
    }
}
