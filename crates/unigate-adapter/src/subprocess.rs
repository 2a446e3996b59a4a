use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::time::Instant;
use unigate_common::GatewayError;
use unigate_protocol::{ChatChoice, ChatChunk, ChatMessage, ChatRequest, ChatResponse, ModelDescriptor};

use crate::adapter::{remaining, Adapter, ChatStream};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputFormat {
    OpenaiJson,
    MessagesOnlyJson,
    PromptText,
    LastUserText,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    OpenaiJson,
    ContentJson,
    Text,
}

fn openai_json(request: &ChatRequest) -> Result<Vec<u8>, GatewayError> {
    serde_json::to_vec(request).map_err(|e| GatewayError::InternalError(e.to_string()))
}

fn messages_only_json(request: &ChatRequest) -> Result<Vec<u8>, GatewayError> {
    serde_json::to_vec(&request.messages).map_err(|e| GatewayError::InternalError(e.to_string()))
}

fn prompt_text(request: &ChatRequest) -> Vec<u8> {
    let transcript = request
        .messages
        .iter()
        .map(|m| format!("{}: {}", m.role, m.text()))
        .collect::<Vec<_>>()
        .join("\n");
    transcript.into_bytes()
}

fn last_user_text(request: &ChatRequest) -> Vec<u8> {
    request
        .messages
        .iter()
        .rev()
        .find(|m| m.role == "user")
        .map(|m| m.text())
        .unwrap_or_default()
        .into_bytes()
}

fn build_stdin(request: &ChatRequest, format: InputFormat) -> Result<Vec<u8>, GatewayError> {
    match format {
        InputFormat::OpenaiJson => openai_json(request),
        InputFormat::MessagesOnlyJson => messages_only_json(request),
        InputFormat::PromptText => Ok(prompt_text(request)),
        InputFormat::LastUserText => Ok(last_user_text(request)),
    }
}

fn content_response(model: &str, text: String) -> ChatResponse {
    ChatResponse {
        id: format!("subprocess-{}", now_unix()),
        object: "chat.completion".to_string(),
        created: now_unix(),
        model: model.to_string(),
        choices: vec![ChatChoice {
            index: 0,
            message: ChatMessage {
                role: "assistant".to_string(),
                content: serde_json::Value::String(text),
                name: None,
            },
            finish_reason: Some("stop".to_string()),
        }],
        usage: None,
    }
}

fn parse_stdout(
    model: &str,
    format: OutputFormat,
    stdout: &[u8],
) -> Result<ChatResponse, GatewayError> {
    match format {
        OutputFormat::OpenaiJson => serde_json::from_slice(stdout).map_err(|e| {
            GatewayError::UpstreamProtocolError(format!("invalid subprocess output: {e}"))
        }),
        OutputFormat::ContentJson => {
            let value: serde_json::Value = serde_json::from_slice(stdout).map_err(|e| {
                GatewayError::UpstreamProtocolError(format!("invalid subprocess output: {e}"))
            })?;
            let text = value
                .get("content")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            Ok(content_response(model, text))
        }
        OutputFormat::Text => {
            let text = String::from_utf8_lossy(stdout).trim_end().to_string();
            Ok(content_response(model, text))
        }
    }
}

fn now_unix() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Spawns the configured command for every `chat` call. Wraps a single
/// invocation in a deadline; the child is killed if it overruns. Not
/// streaming-capable: `chat_stream` synthesizes a
/// single-chunk SSE sequence from the aggregated response.
pub struct SubprocessAdapter {
    command: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    env: HashMap<String, String>,
    input_format: InputFormat,
    output_format: OutputFormat,
    timeout: Duration,
    local_model_id: String,
}

impl SubprocessAdapter {
    pub fn new(
        command: impl Into<String>,
        args: Vec<String>,
        cwd: Option<PathBuf>,
        env: HashMap<String, String>,
        input_format: InputFormat,
        output_format: OutputFormat,
        timeout: Duration,
        local_model_id: impl Into<String>,
    ) -> Self {
        Self {
            command: command.into(),
            args,
            cwd,
            env,
            input_format,
            output_format,
            timeout,
            local_model_id: local_model_id.into(),
        }
    }
}

#[async_trait]
impl Adapter for SubprocessAdapter {
    async fn chat(&self, request: &ChatRequest, deadline: Instant) -> Result<ChatResponse, GatewayError> {
        let stdin_payload = build_stdin(request, self.input_format)?;

        let mut command = Command::new(&self.command);
        command
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &self.cwd {
            command.current_dir(cwd);
        }

        let mut child = command
            .spawn()
            .map_err(|e| GatewayError::UpstreamTransient(format!("spawn failed: {e}")))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&stdin_payload)
                .await
                .map_err(|e| GatewayError::UpstreamTransient(format!("stdin write failed: {e}")))?;
        }

        let budget = self.timeout.min(remaining(deadline));
        let output = tokio::time::timeout(budget, child.wait_with_output())
            .await
            .map_err(|_| GatewayError::Timeout)?
            .map_err(|e| GatewayError::UpstreamTransient(format!("wait failed: {e}")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(GatewayError::UpstreamTransient(format!(
                "subprocess exited with {}: {}",
                output.status, stderr
            )));
        }

        parse_stdout(&self.local_model_id, self.output_format, &output.stdout)
    }

    async fn chat_stream(
        &self,
        request: &ChatRequest,
        deadline: Instant,
    ) -> Result<ChatStream, GatewayError> {
        let response = self.chat(request, deadline).await?;
        let text = response
            .choices
            .first()
            .map(|c| c.message.text())
            .unwrap_or_default();
        let created = response.created;
        let id = response.id.clone();
        let model = response.model.clone();
        let stream = async_stream::stream! {
            yield Ok::<ChatChunk, GatewayError>(ChatChunk::delta_text(&id, &model, created, 0, &text));
            yield Ok(ChatChunk::finish(&id, &model, created, 0, "stop"));
        };
        Ok(Box::pin(stream))
    }

    fn is_available(&self) -> bool {
        !self.command.is_empty()
    }

    fn model_info(&self) -> ModelDescriptor {
        ModelDescriptor::new(self.local_model_id.clone(), "subprocess")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use unigate_protocol::ChatRequest;

    fn sample_request() -> ChatRequest {
        ChatRequest {
            model: "m".to_string(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: serde_json::Value::String("be terse".to_string()),
                    name: None,
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: serde_json::Value::String("hi".to_string()),
                    name: None,
                },
            ],
            temperature: None,
            max_tokens: None,
            top_p: None,
            frequency_penalty: None,
            presence_penalty: None,
            stop: None,
            user: None,
            stream: false,
        }
    }

    #[test]
    fn last_user_text_picks_most_recent_user_message() {
        let text = last_user_text(&sample_request());
        assert_eq!(String::from_utf8(text).unwrap(), "hi");
    }

    #[test]
    fn prompt_text_joins_transcript() {
        let text = String::from_utf8(prompt_text(&sample_request())).unwrap();
        assert_eq!(text, "system: be terse\nuser: hi");
    }

    #[test]
    fn content_json_output_wraps_into_response() {
        let response =
            parse_stdout("m", OutputFormat::ContentJson, br#"{"content":"pong"}"#).unwrap();
        assert_eq!(response.choices[0].message.text(), "pong");
    }

    #[test]
    fn text_output_trims_trailing_newline() {
        let response = parse_stdout("m", OutputFormat::Text, b"pong\n").unwrap();
        assert_eq!(response.choices[0].message.text(), "pong");
    }
}
