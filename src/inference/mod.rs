//! One-shot inference calls: grounded chat, image and video generation.

pub mod gemini;

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;

use crate::config::InferenceConfig;
use crate::error::{LivevoxError, Result};

pub type InferenceFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Reply used when the model returns no text at all.
pub const EMPTY_REPLY: &str = "I'm sorry, I couldn't generate a response.";

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub message: String,
    /// Overrides the configured system instruction.
    pub system_instruction: Option<String>,
}

impl ChatRequest {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            system_instruction: None,
        }
    }
}

/// Web page the answer was grounded on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub title: String,
    pub uri: String,
}

#[derive(Debug, Clone)]
pub struct ChatReply {
    pub text: String,
    pub sources: Vec<Source>,
}

#[derive(Debug, Clone)]
pub struct GeneratedImage {
    pub mime_type: String,
    /// Decoded image bytes.
    pub data: Vec<u8>,
}

impl GeneratedImage {
    #[must_use]
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.data))
    }
}

/// State of a long-running video generation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VideoOperation {
    pub name: String,
    pub done: bool,
    pub error: Option<String>,
    pub video_uri: Option<String>,
}

pub trait InferenceClient: Send + Sync {
    fn chat_complete(&self, request: ChatRequest) -> InferenceFuture<'_, Result<ChatReply>>;

    /// First image the model returns, if any.
    fn generate_image(&self, prompt: String) -> InferenceFuture<'_, Result<Option<GeneratedImage>>>;

    fn generate_video(&self, prompt: String) -> InferenceFuture<'_, Result<VideoOperation>>;

    fn poll_video(&self, operation: VideoOperation) -> InferenceFuture<'_, Result<VideoOperation>>;

    fn download_video(&self, uri: String) -> InferenceFuture<'_, Result<Vec<u8>>>;
}

/// Start a video generation and poll it every `interval` until it finishes.
/// Returns the uri of the first generated video, if the operation has one.
pub async fn wait_for_video(
    client: &dyn InferenceClient,
    prompt: &str,
    interval: Duration,
) -> Result<Option<String>> {
    let mut operation = client.generate_video(prompt.to_string()).await?;
    tracing::info!("video generation started: {}", operation.name);

    while !operation.done {
        tokio::time::sleep(interval).await;
        operation = client.poll_video(operation).await?;
        tracing::debug!("video operation {} done={}", operation.name, operation.done);
    }

    if let Some(error) = operation.error {
        return Err(LivevoxError::Inference(format!("video generation failed: {error}")));
    }

    Ok(operation.video_uri)
}

pub fn create_client(config: &InferenceConfig, api_key: String) -> Box<dyn InferenceClient> {
    Box::new(gemini::GeminiClient::new(config, api_key))
}
