use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::config::InferenceConfig;
use crate::error::{LivevoxError, Result};

use super::{
    ChatReply, ChatRequest, EMPTY_REPLY, GeneratedImage, InferenceClient, InferenceFuture, Source,
    VideoOperation,
};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Inference over the Gemini REST API.
pub struct GeminiClient {
    client: Client,
    api_key: String,
    config: InferenceConfig,
}

impl GeminiClient {
    #[must_use]
    pub fn new(config: &InferenceConfig, api_key: String) -> Self {
        Self {
            client: Client::new(),
            api_key,
            config: config.clone(),
        }
    }

    fn model_url(&self, model: &str, method: &str) -> String {
        format!(
            "{}/models/{model}:{method}",
            self.config.base_url.trim_end_matches('/')
        )
    }

    async fn post_json<T: DeserializeOwned>(&self, url: &str, body: serde_json::Value) -> Result<T> {
        let resp = self
            .client
            .post(url)
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| LivevoxError::Inference(format!("request failed: {e}")))?;
        read_json(resp).await
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let resp = self
            .client
            .get(url)
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(|e| LivevoxError::Inference(format!("request failed: {e}")))?;
        check_status(resp).await
    }
}

async fn check_status(resp: reqwest::Response) -> Result<reqwest::Response> {
    if resp.status().is_success() {
        return Ok(resp);
    }
    let status = resp.status();
    let body = resp.text().await.unwrap_or_default();
    Err(LivevoxError::Inference(format!("API returned {status}: {body}")))
}

async fn read_json<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    check_status(resp)
        .await?
        .json::<T>()
        .await
        .map_err(|e| LivevoxError::Inference(format!("failed to parse response: {e}")))
}

impl InferenceClient for GeminiClient {
    fn chat_complete(&self, request: ChatRequest) -> InferenceFuture<'_, Result<ChatReply>> {
        Box::pin(async move {
            let instruction = request
                .system_instruction
                .unwrap_or_else(|| self.config.chat_system_instruction.clone());
            let body = json!({
                "contents": [{ "role": "user", "parts": [{ "text": request.message }] }],
                "systemInstruction": { "parts": [{ "text": instruction }] },
                "tools": [{ "googleSearch": {} }],
            });

            let url = self.model_url(&self.config.chat_model, "generateContent");
            let response: GenerateContentResponse = self.post_json(&url, body).await?;
            Ok(response.into_chat_reply())
        })
    }

    fn generate_image(&self, prompt: String) -> InferenceFuture<'_, Result<Option<GeneratedImage>>> {
        Box::pin(async move {
            let body = json!({
                "contents": [{ "role": "user", "parts": [{ "text": prompt }] }],
            });

            let url = self.model_url(&self.config.image_model, "generateContent");
            let response: GenerateContentResponse = self.post_json(&url, body).await?;
            response.first_image()
        })
    }

    fn generate_video(&self, prompt: String) -> InferenceFuture<'_, Result<VideoOperation>> {
        Box::pin(async move {
            let body = json!({
                "instances": [{ "prompt": format!("{}{prompt}", self.config.video_prompt_prefix) }],
                "parameters": { "aspectRatio": "16:9", "resolution": "1080p" },
            });

            let url = self.model_url(&self.config.video_model, "predictLongRunning");
            let raw: RawOperation = self.post_json(&url, body).await?;
            Ok(raw.into())
        })
    }

    fn poll_video(&self, operation: VideoOperation) -> InferenceFuture<'_, Result<VideoOperation>> {
        Box::pin(async move {
            let url = format!(
                "{}/{}",
                self.config.base_url.trim_end_matches('/'),
                operation.name
            );
            let raw: RawOperation = read_json(self.get(&url).await?).await?;
            Ok(raw.into())
        })
    }

    fn download_video(&self, uri: String) -> InferenceFuture<'_, Result<Vec<u8>>> {
        Box::pin(async move {
            let bytes = self
                .get(&uri)
                .await?
                .bytes()
                .await
                .map_err(|e| LivevoxError::Inference(format!("video download failed: {e}")))?;
            Ok(bytes.to_vec())
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GenerateContentResponse {
    candidates: Vec<Candidate>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Candidate {
    content: Option<Content>,
    grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct Part {
    text: Option<String>,
    inline_data: Option<InlineData>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GroundingMetadata {
    grounding_chunks: Vec<GroundingChunk>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GroundingChunk {
    web: Option<WebSource>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WebSource {
    title: Option<String>,
    uri: Option<String>,
}

impl GenerateContentResponse {
    fn parts(&self) -> &[Part] {
        self.candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(|c| c.parts.as_slice())
            .unwrap_or_default()
    }

    fn into_chat_reply(self) -> ChatReply {
        let text: String = self
            .parts()
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect();
        let text = if text.trim().is_empty() {
            EMPTY_REPLY.to_string()
        } else {
            text
        };

        let sources = self
            .candidates
            .into_iter()
            .next()
            .and_then(|c| c.grounding_metadata)
            .map(|m| m.grounding_chunks)
            .unwrap_or_default()
            .into_iter()
            .filter_map(|chunk| chunk.web)
            .map(|web| Source {
                title: web.title.unwrap_or_else(|| "Source".to_string()),
                uri: web.uri.unwrap_or_else(|| "#".to_string()),
            })
            .collect();

        ChatReply { text, sources }
    }

    fn first_image(&self) -> Result<Option<GeneratedImage>> {
        let Some(inline) = self.parts().iter().find_map(|p| p.inline_data.as_ref()) else {
            return Ok(None);
        };
        let data = STANDARD
            .decode(&inline.data)
            .map_err(|e| LivevoxError::Inference(format!("invalid image data: {e}")))?;
        Ok(Some(GeneratedImage {
            mime_type: inline.mime_type.clone(),
            data,
        }))
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct RawOperation {
    name: String,
    done: bool,
    error: Option<OperationError>,
    response: Option<OperationResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct OperationError {
    code: Option<i64>,
    message: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OperationResponse {
    generate_video_response: Option<GenerateVideoResponse>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GenerateVideoResponse {
    generated_samples: Vec<GeneratedSample>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GeneratedSample {
    video: Option<VideoRef>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct VideoRef {
    uri: Option<String>,
}

impl From<RawOperation> for VideoOperation {
    fn from(raw: RawOperation) -> Self {
        let error = raw.error.map(|e| {
            e.message
                .unwrap_or_else(|| format!("operation error {}", e.code.unwrap_or_default()))
        });
        let video_uri = raw
            .response
            .and_then(|r| r.generate_video_response)
            .and_then(|r| r.generated_samples.into_iter().next())
            .and_then(|s| s.video)
            .and_then(|v| v.uri);

        Self {
            name: raw.name,
            done: raw.done,
            error,
            video_uri,
        }
    }
}
