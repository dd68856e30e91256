//! REST collaborators and typed stream endpoints.
//!
//! Everything outside the streaming core — upload handling, template
//! storage, persistence — lives behind these request/response calls; this
//! client only knows the entity shapes and paths.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{Result, ScribeError};
use crate::protocol::{
    decode_generate_event, decode_transcribe_event, GenerateEvent, TranscribeEvent, Transcript,
};
use crate::transport::{self, StreamItem, StreamTransport};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct TemplateInfo {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub is_custom: bool,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct NoteRequest {
    pub transcript_id: String,
    pub template_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_sections: Option<serde_json::Value>,
}

#[derive(Clone, Debug, Default)]
pub struct ApiClientBuilder {
    base_url: Option<String>,
    auth_token: Option<String>,
}

impl ApiClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    pub fn auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }

    pub fn build(self) -> Result<ApiClient> {
        let base = self
            .base_url
            .ok_or_else(|| ScribeError::Message("base url is required".to_string()))?;
        let base = Url::parse(&base).map_err(|e| ScribeError::Message(e.to_string()))?;

        Ok(ApiClient {
            http: reqwest::Client::new(),
            base,
            auth_token: self.auth_token,
        })
    }
}

#[derive(Clone, Debug)]
pub struct ApiClient {
    http: reqwest::Client,
    base: Url,
    auth_token: Option<String>,
}

impl ApiClient {
    pub fn builder() -> ApiClientBuilder {
        ApiClientBuilder::new()
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| ScribeError::Message(e.to_string()))
    }

    fn get(&self, url: Url) -> reqwest::RequestBuilder {
        self.authorize(self.http.get(url))
    }

    fn post(&self, url: Url) -> reqwest::RequestBuilder {
        self.authorize(self.http.post(url))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth_token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn expect_success(response: reqwest::Response) -> Result<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(ScribeError::Status { status: status.as_u16(), body })
    }

    pub async fn list_transcripts(&self) -> Result<Vec<Transcript>> {
        let response = self.get(self.endpoint("api/transcribe/")?).send().await?;
        Ok(Self::expect_success(response).await?.json().await?)
    }

    pub async fn get_transcript(&self, id: &str) -> Result<Transcript> {
        let response = self
            .get(self.endpoint(&format!("api/transcribe/{id}"))?)
            .send()
            .await?;
        Ok(Self::expect_success(response).await?.json().await?)
    }

    pub async fn list_templates(&self) -> Result<Vec<TemplateInfo>> {
        let response = self.get(self.endpoint("api/templates/")?).send().await?;
        Ok(Self::expect_success(response).await?.json().await?)
    }

    pub async fn template_info(&self, name: &str) -> Result<TemplateInfo> {
        let response = self
            .get(self.endpoint(&format!("api/templates/{name}"))?)
            .send()
            .await?;
        Ok(Self::expect_success(response).await?.json().await?)
    }

    /// The template's declared default strings; the section patcher treats
    /// them as placeholders.
    pub async fn template_defaults(&self, name: &str) -> Result<Vec<String>> {
        let response = self
            .get(self.endpoint(&format!("api/templates/{name}/defaults"))?)
            .send()
            .await?;
        Ok(Self::expect_success(response).await?.json().await?)
    }

    /// Render the template skeleton shown before any content is generated.
    pub async fn template_preview(&self, name: &str) -> Result<String> {
        let response = self
            .post(self.endpoint(&format!("api/templates/{name}/preview"))?)
            .json(&serde_json::json!({}))
            .send()
            .await?;
        let value: serde_json::Value = Self::expect_success(response).await?.json().await?;
        preview_markdown(&value)
    }

    /// Upload an audio file and subscribe to its transcription stream.
    pub fn stream_transcription(
        &self,
        filename: &str,
        audio: Vec<u8>,
        mime: &str,
    ) -> Result<TranscribeStream> {
        let part = reqwest::multipart::Part::bytes(audio)
            .file_name(filename.to_string())
            .mime_str(mime)
            .map_err(|e| ScribeError::Message(e.to_string()))?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let request = self
            .post(self.endpoint("api/transcribe/stream")?)
            .multipart(form);
        Ok(TranscribeStream { inner: transport::open(request) })
    }

    /// Re-subscribe to the stream of an already-uploaded transcript.
    pub fn resume_transcription(&self, transcript_id: &str) -> Result<TranscribeStream> {
        let request = self.get(self.endpoint(&format!("api/transcribe/stream/{transcript_id}"))?);
        Ok(TranscribeStream { inner: transport::open(request) })
    }

    /// Subscribe to a note-generation stream.
    pub fn stream_generation(&self, request: &NoteRequest) -> Result<GenerateStream> {
        let req = self.post(self.endpoint("api/notes/stream")?).json(request);
        Ok(GenerateStream { inner: transport::open(req) })
    }

    /// Non-streaming generation, the fallback when the streaming transport
    /// fails. Returns the final note markdown.
    pub async fn generate_note(&self, request: &NoteRequest) -> Result<String> {
        let response = self
            .post(self.endpoint("api/notes/")?)
            .json(request)
            .send()
            .await?;
        let value: serde_json::Value = Self::expect_success(response).await?.json().await?;
        match value.get("note_markdown").and_then(|n| n.as_str()) {
            Some(markdown) => Ok(markdown.to_string()),
            None => Err(ScribeError::Decode("note response missing `note_markdown`".to_string())),
        }
    }
}

/// The preview endpoint returns `rendered_content`; older deployments used
/// `rendered`.
fn preview_markdown(value: &serde_json::Value) -> Result<String> {
    value
        .get("rendered_content")
        .or_else(|| value.get("rendered"))
        .and_then(|r| r.as_str())
        .map(str::to_string)
        .ok_or_else(|| {
            ScribeError::Decode("preview response missing `rendered_content`".to_string())
        })
}

/// Typed view over a transcription stream. Malformed lines are logged and
/// dropped; the stream continues.
#[derive(Debug)]
pub struct TranscribeStream {
    inner: StreamTransport,
}

impl TranscribeStream {
    pub async fn next_event(&mut self) -> Option<Result<TranscribeEvent>> {
        next_decoded(&mut self.inner, decode_transcribe_event).await
    }

    pub fn close(&mut self) {
        self.inner.close();
    }

    pub fn transport(&self) -> &StreamTransport {
        &self.inner
    }
}

/// Typed view over a generation stream, same drop-and-continue policy.
#[derive(Debug)]
pub struct GenerateStream {
    inner: StreamTransport,
}

impl GenerateStream {
    pub async fn next_event(&mut self) -> Option<Result<GenerateEvent>> {
        next_decoded(&mut self.inner, decode_generate_event).await
    }

    pub fn close(&mut self) {
        self.inner.close();
    }

    pub fn transport(&self) -> &StreamTransport {
        &self.inner
    }
}

async fn next_decoded<T>(
    transport: &mut StreamTransport,
    decode: fn(&str) -> Result<T>,
) -> Option<Result<T>> {
    loop {
        match transport.recv().await? {
            StreamItem::Message(line) => match decode(&line) {
                Ok(event) => return Some(Ok(event)),
                Err(e) => {
                    // Parse errors drop the line, not the stream.
                    tracing::warn!(error = %e, "dropping malformed stream line");
                    continue;
                }
            },
            StreamItem::Error(e) => return Some(Err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_base_url() {
        assert!(ApiClient::builder().build().is_err());
        assert!(ApiClient::builder()
            .base_url("http://localhost:8000/")
            .build()
            .is_ok());
    }

    #[test]
    fn preview_reads_rendered_content_with_legacy_fallback() {
        let current = serde_json::json!({"template_name": "soap", "rendered_content": "## Plan\n"});
        assert_eq!(preview_markdown(&current).unwrap(), "## Plan\n");

        let legacy = serde_json::json!({"rendered": "## Plan\n"});
        assert_eq!(preview_markdown(&legacy).unwrap(), "## Plan\n");

        let neither = serde_json::json!({"template_name": "soap"});
        assert!(matches!(preview_markdown(&neither), Err(ScribeError::Decode(_))));
    }

    #[test]
    fn note_request_serializes_without_empty_custom_sections() {
        let req = NoteRequest {
            transcript_id: "t1".to_string(),
            template_name: "soap".to_string(),
            custom_sections: None,
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"transcript_id": "t1", "template_name": "soap"})
        );
    }
}
