//! Repair oracle client.
//!
//! The [`RepairOracle`] trait decouples the repair loop from the model backend
//! (currently Ollama's chat endpoint). Tests use scripted oracles that return
//! canned replies without network access.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::cancel::{CallAborted, CancelToken, call_with_deadline};
use crate::io::config::OracleConfig;

const REPAIR_TEMPLATE: &str = include_str!("prompts/repair.md");

/// Extra time the HTTP client waits past the call deadline before dropping
/// the connection of an abandoned call.
const CLIENT_TIMEOUT_GRACE: Duration = Duration::from_secs(5);

/// Longest error body kept in [`OracleError::Status`].
const ERROR_BODY_LIMIT: usize = 2_000;

/// What the oracle is asked to fix.
#[derive(Debug, Clone)]
pub struct RepairRequest {
    pub script_path: PathBuf,
    /// Language name used in the prompt (e.g. `python`).
    pub language: String,
    /// Error text from the failing run, verbatim.
    pub error_text: String,
    /// Full script content at the moment of failure.
    pub original_content: String,
}

/// The oracle could not be asked or did not answer with a chat reply.
#[derive(Debug, Error)]
pub enum OracleError {
    #[error("could not render repair prompt: {0}")]
    Prompt(#[from] minijinja::Error),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("oracle returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("oracle call aborted: {0}")]
    Aborted(#[from] CallAborted),
}

/// Abstraction over code-repair backends.
pub trait RepairOracle {
    /// Ask for a corrected script. Returns the raw reply text.
    fn repair(&self, request: &RepairRequest) -> Result<String, OracleError>;
}

/// Render the prompt sent to the oracle.
pub fn render_repair_prompt(request: &RepairRequest) -> Result<String, minijinja::Error> {
    let mut env = Environment::new();
    env.add_template("repair", REPAIR_TEMPLATE)?;
    let template = env.get_template("repair")?;
    let script_name = request
        .script_path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| request.script_path.display().to_string());
    template.render(context! {
        language => request.language,
        fence_tag => request.language.to_lowercase(),
        script_name => script_name,
        error_text => request.error_text,
        source => request.original_content,
        source_ends_with_newline => request.original_content.ends_with('\n'),
    })
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    #[serde(default)]
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatMessage,
}

/// Oracle backed by an Ollama server (`POST {base_url}/api/chat`).
pub struct OllamaOracle {
    client: Client,
    endpoint: String,
    model: String,
    deadline: Option<Duration>,
    cancel: CancelToken,
}

impl OllamaOracle {
    /// Build a client for `config`. `cancel` aborts an in-flight call when fired.
    pub fn new(config: &OracleConfig, cancel: CancelToken) -> Result<Self> {
        let deadline = config.deadline();
        let client = Client::builder()
            .timeout(deadline.map(|limit| limit + CLIENT_TIMEOUT_GRACE))
            .build()
            .context("build oracle http client")?;
        Ok(Self {
            client,
            endpoint: format!("{}/api/chat", config.base_url.trim_end_matches('/')),
            model: config.model.clone(),
            deadline,
            cancel,
        })
    }
}

impl RepairOracle for OllamaOracle {
    #[instrument(skip_all, fields(model = %self.model, script = %request.script_path.display()))]
    fn repair(&self, request: &RepairRequest) -> Result<String, OracleError> {
        let prompt = render_repair_prompt(request)?;
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt,
            }],
            stream: false,
        };

        info!(endpoint = %self.endpoint, "sending repair request");
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let reply = call_with_deadline(self.deadline, &self.cancel, move || {
            send_chat(&client, &endpoint, &body)
        })??;
        debug!(reply_bytes = reply.len(), "oracle replied");
        Ok(reply)
    }
}

fn send_chat(client: &Client, endpoint: &str, body: &ChatRequest) -> Result<String, OracleError> {
    let response = client.post(endpoint).json(body).send()?;
    let status = response.status();
    let text = response.text()?;
    if !status.is_success() {
        warn!(status = status.as_u16(), "oracle returned error status");
        return Err(OracleError::Status {
            status: status.as_u16(),
            body: truncate(&text, ERROR_BODY_LIMIT),
        });
    }
    let chat: ChatResponse = serde_json::from_str(&text)
        .map_err(|err| OracleError::InvalidResponse(format!("decode chat response: {err}")))?;
    Ok(chat.message.content)
}

fn truncate(text: &str, limit: usize) -> String {
    if text.len() <= limit {
        return text.to_string();
    }
    let mut end = limit;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated {} bytes]", &text[..end], text.len() - end)
}
