//! Concrete translation backends

use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::{TranslationJob, Translator};
use crate::config::TranslationConfig;
use crate::context::ContextPair;
use crate::error::{Result, ServerError};

/// Returns its input unchanged. Useful for exercising clients without a model.
pub struct EchoTranslator {
    model: String,
}

impl EchoTranslator {
    pub fn new() -> Self {
        Self {
            model: "echo".to_string(),
        }
    }
}

impl Default for EchoTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl Translator for EchoTranslator {
    fn translate(&mut self, job: &TranslationJob) -> Result<String> {
        Ok(job.text.trim().to_string())
    }

    fn is_ready(&self) -> bool {
        true
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn device(&self) -> String {
        "cpu".to_string()
    }
}

#[derive(Debug, Serialize)]
struct HttpTranslateRequest<'a> {
    text: &'a str,
    source_lang: &'a str,
    target_lang: &'a str,
    max_length: usize,
    context: &'a [ContextPair],
}

#[derive(Debug, Deserialize)]
struct HttpTranslateResponse {
    #[serde(alias = "translation")]
    translated: String,
}

/// Forwards jobs to a remote translation service.
///
/// `POST {endpoint}/translate` with
/// `{"text", "source_lang", "target_lang", "max_length", "context": [{"original", "translated"}]}`
/// and expects `{"translated": "..."}` back. History is sent as structured
/// pairs, never spliced into the text.
///
/// Uses a blocking client, so it must be constructed and used off the async
/// runtime (the translator worker thread does exactly that).
pub struct HttpTranslator {
    client: reqwest::blocking::Client,
    url: String,
    model: String,
    device: String,
    reachable: bool,
}

impl HttpTranslator {
    pub fn new(config: &TranslationConfig) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ServerError::backend(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            url: format!("{}/translate", config.endpoint.trim_end_matches('/')),
            model: config.model_name.clone(),
            device: config.device.clone(),
            reachable: true,
        })
    }

    fn post(&mut self, job: &TranslationJob, context: &[ContextPair]) -> Result<String> {
        let body = HttpTranslateRequest {
            text: &job.text,
            source_lang: &job.source_lang,
            target_lang: &job.target_lang,
            max_length: job.max_length,
            context,
        };

        let response = match self.client.post(&self.url).json(&body).send() {
            Ok(response) => {
                self.reachable = true;
                response
            }
            Err(e) => {
                self.reachable = false;
                return Err(ServerError::backend(format!(
                    "Translation service unreachable: {}",
                    e
                )));
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(ServerError::backend(format!(
                "Translation service returned {}",
                status
            )));
        }

        let parsed: HttpTranslateResponse = response
            .json()
            .map_err(|e| ServerError::backend(format!("Malformed translation reply: {}", e)))?;
        Ok(parsed.translated.trim().to_string())
    }
}

impl Translator for HttpTranslator {
    fn translate(&mut self, job: &TranslationJob) -> Result<String> {
        self.post(job, &[])
    }

    fn translate_with_context(
        &mut self,
        job: &TranslationJob,
        context: &[ContextPair],
    ) -> Result<String> {
        self.post(job, context)
    }

    fn is_ready(&self) -> bool {
        self.reachable
    }

    fn model_name(&self) -> String {
        self.model.clone()
    }

    fn device(&self) -> String {
        self.device.clone()
    }
}

/// Build the backend named in the configuration
pub fn from_config(config: &TranslationConfig) -> Result<Box<dyn Translator>> {
    match config.backend.as_str() {
        "echo" => Ok(Box::new(EchoTranslator::new())),
        "http" => Ok(Box::new(HttpTranslator::new(config)?)),
        other => Err(ServerError::config(format!(
            "Unknown translation backend: {}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_echo_returns_input() {
        let mut echo = EchoTranslator::new();
        let job = TranslationJob {
            text: " hello ".to_string(),
            source_lang: "eng_Latn".to_string(),
            target_lang: "jpn_Jpan".to_string(),
            max_length: 16,
        };
        assert_eq!(echo.translate(&job).unwrap(), "hello");
        assert_eq!(
            echo.translate_with_context(&job, &[ContextPair::new("a", "b")]).unwrap(),
            "hello"
        );
    }

    #[test]
    fn test_request_body_carries_structured_context() {
        let context = vec![ContextPair::new("hi", "やあ")];
        let body = HttpTranslateRequest {
            text: "bye",
            source_lang: "eng_Latn",
            target_lang: "jpn_Jpan",
            max_length: 32,
            context: &context,
        };

        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["context"][0]["original"], "hi");
        assert_eq!(json["context"][0]["translated"], "やあ");
        assert_eq!(json["max_length"], 32);
    }

    #[test]
    fn test_reply_accepts_translation_alias() {
        let reply: HttpTranslateResponse =
            serde_json::from_str(r#"{"translation": "こんにちは"}"#).unwrap();
        assert_eq!(reply.translated, "こんにちは");
    }

    #[test]
    fn test_from_config_rejects_unknown_backend() {
        let config = TranslationConfig {
            backend: "gpu".to_string(),
            ..TranslationConfig::default()
        };
        assert!(from_config(&config).is_err());
    }
}
