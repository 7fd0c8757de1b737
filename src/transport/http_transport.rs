use std::time::Duration;

use futures_util::StreamExt;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::config::{ApiMode, AppConfig, DecoderConfig, LivenessConfig, ServerConfig};
use crate::error::DecodeError;
use crate::stream::{FragmentStream, RequestMeta, StreamDecoder};

use super::retry_policy::{
    error_chain_message, retry_transport_delay, should_retry_transport_message,
    RETRY_MAX_ATTEMPTS,
};

fn build_reqwest_client(server: &ServerConfig) -> Result<reqwest::Client, DecodeError> {
    reqwest::Client::builder()
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(server.connect_timeout_secs))
        .timeout(Duration::from_secs(server.timeout_secs))
        .redirect(reqwest::redirect::Policy::none())
        .no_proxy()
        .build()
        .map_err(|err| DecodeError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// One prompt to send to the model server.
#[derive(Debug, Clone, Default)]
pub struct GenerationRequest {
    pub prompt: String,
    pub system: Option<String>,
}

impl GenerationRequest {
    #[must_use]
    pub fn new(prompt: impl Into<String>) -> Self {
        Self {
            prompt: prompt.into(),
            system: None,
        }
    }

    #[must_use]
    pub fn with_system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }
}

#[derive(Serialize)]
struct GenerateBody<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessageBody<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    messages: Vec<ChatMessageBody<'a>>,
    stream: bool,
}

/// HTTP client for a local model server's streaming endpoints.
///
/// The transport only moves bytes: every delivery, status and failure is
/// handed to a [`StreamDecoder`], which owns the outcome.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    server: ServerConfig,
    decoder: DecoderConfig,
    liveness: LivenessConfig,
}

impl HttpTransport {
    /// Build a transport from the full application config.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &AppConfig) -> Result<Self, DecodeError> {
        Ok(Self {
            client: build_reqwest_client(&config.server)?,
            server: config.server.clone(),
            decoder: config.decoder.clone(),
            liveness: config.liveness.clone(),
        })
    }

    #[must_use]
    pub fn server(&self) -> &ServerConfig {
        &self.server
    }

    /// A fresh decoder for one request against this server.
    #[must_use]
    pub fn decoder(&self) -> (StreamDecoder, FragmentStream) {
        StreamDecoder::new(
            self.decoder.clone(),
            &self.liveness,
            RequestMeta {
                model: Some(self.server.model.clone()),
            },
        )
    }

    /// Start `request` on a background task and return its decoder and
    /// fragment stream. Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(&self, request: GenerationRequest) -> (StreamDecoder, FragmentStream) {
        let (decoder, fragments) = self.decoder();
        let transport = self.clone();
        let driven = decoder.clone();
        tokio::spawn(async move {
            transport.run(&request, &driven).await;
        });
        (decoder, fragments)
    }

    /// Send `request` and feed the response into `decoder` until the body
    /// ends, fails, or the decoder's cancellation token fires.
    pub async fn run(&self, request: &GenerationRequest, decoder: &StreamDecoder) {
        let cancel = decoder.cancellation_token();
        decoder.begin();

        let body = match self.request_body(request) {
            Ok(body) => body,
            Err(err) => {
                decoder.fail(err);
                return;
            }
        };
        let url = self.server.endpoint_url();

        let response = tokio::select! {
            () = cancel.cancelled() => {
                decoder.cancel();
                return;
            }
            response = self.send_with_retry(&url, body, &cancel) => response,
        };
        let response = match response {
            Ok(response) => response,
            Err(err) => {
                decoder.fail(err);
                return;
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            tracing::debug!(status = status.as_u16(), body_len = text.len(), "server returned error status");
            decoder.fail_http(status.as_u16(), &text);
            return;
        }

        let mut body = Box::pin(response.bytes_stream());
        loop {
            let chunk = tokio::select! {
                () = cancel.cancelled() => {
                    decoder.cancel();
                    return;
                }
                chunk = body.next() => chunk,
            };
            match chunk {
                Some(Ok(bytes)) => decoder.deliver(&bytes),
                Some(Err(err)) => {
                    decoder.fail_transport(error_chain_message(&err));
                    return;
                }
                None => {
                    decoder.complete();
                    return;
                }
            }
        }
    }

    fn request_body(&self, request: &GenerationRequest) -> Result<bytes::Bytes, DecodeError> {
        let model = self.server.model.as_str();
        let encoded = match self.server.api {
            ApiMode::Generate => serde_json::to_vec(&GenerateBody {
                model,
                prompt: &request.prompt,
                system: request.system.as_deref(),
                stream: true,
            }),
            ApiMode::Chat => {
                let mut messages = Vec::with_capacity(2);
                if let Some(system) = request.system.as_deref() {
                    messages.push(ChatMessageBody {
                        role: "system",
                        content: system,
                    });
                }
                messages.push(ChatMessageBody {
                    role: "user",
                    content: &request.prompt,
                });
                serde_json::to_vec(&ChatBody {
                    model,
                    messages,
                    stream: true,
                })
            }
        };
        encoded
            .map(bytes::Bytes::from)
            .map_err(|err| DecodeError::Transport(format!("Failed to encode request: {err}")))
    }

    /// Send the request, retrying only while no response has been received.
    async fn send_with_retry(
        &self,
        url: &str,
        body: bytes::Bytes,
        cancel: &CancellationToken,
    ) -> Result<reqwest::Response, DecodeError> {
        let mut attempt = 0;
        loop {
            let request = self
                .client
                .post(url)
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.clone());

            match request.send().await {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let message = error_chain_message(&err);
                    let retriable = err.is_connect() || should_retry_transport_message(&message);
                    if attempt >= RETRY_MAX_ATTEMPTS || !retriable || cancel.is_cancelled() {
                        return Err(DecodeError::Transport(message));
                    }

                    let delay = retry_transport_delay(&message, attempt);
                    tracing::debug!(
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis() as u64,
                        error = %message,
                        "retrying request after transport error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn transport(api: ApiMode) -> HttpTransport {
        let mut config = AppConfig::default();
        config.server.api = api;
        config.server.model = "llama3:8b".to_string();
        HttpTransport::new(&config).unwrap()
    }

    #[test]
    fn generate_body_carries_prompt_and_stream_flag() {
        let body = transport(ApiMode::Generate)
            .request_body(&GenerationRequest::new("Why is the sky blue?"))
            .unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["model"], "llama3:8b");
        assert_eq!(value["prompt"], "Why is the sky blue?");
        assert_eq!(value["stream"], true);
        assert!(value.get("system").is_none());
    }

    #[test]
    fn chat_body_puts_system_first() {
        let request = GenerationRequest::new("hi").with_system("be brief");
        let body = transport(ApiMode::Chat).request_body(&request).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["messages"][0]["role"], "system");
        assert_eq!(value["messages"][0]["content"], "be brief");
        assert_eq!(value["messages"][1]["role"], "user");
        assert_eq!(value["messages"][1]["content"], "hi");
    }
}
