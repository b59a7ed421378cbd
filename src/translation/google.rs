//! Google Cloud Translation v2 backend.

use crate::translation::{TranslationError, Translator};
use async_trait::async_trait;
use serde::Deserialize;

const ENDPOINT: &str = "https://translation.googleapis.com/language/translate/v2";

const BACKEND_NAME: &str = "Google Translate";

/// Stateless wrapper around the Cloud Translation v2 REST API.
///
/// The API key travels as the `key` query parameter. Language tags are passed
/// through unchanged; the v2 API accepts the generic lowercase forms
/// (`en`, `zh-TW`, ...) directly.
pub struct GoogleTranslator {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    data: TranslateData,
}

#[derive(Debug, Deserialize)]
struct TranslateData {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    #[serde(rename = "translatedText")]
    translated_text: String,
}

impl GoogleTranslator {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Translator for GoogleTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        let response = self
            .client
            .get(ENDPOINT)
            .query(&[
                ("q", text),
                ("source", source_lang),
                ("target", target_lang),
                ("key", &self.api_key),
                ("format", "text"),
            ])
            .send()
            .await
            .map_err(|err| TranslationError::Backend {
                backend: BACKEND_NAME,
                status: None,
                message: err.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TranslationError::Backend {
                backend: BACKEND_NAME,
                status: Some(status.as_u16()),
                message: body,
            });
        }

        let parsed: TranslateResponse =
            response
                .json()
                .await
                .map_err(|err| TranslationError::Backend {
                    backend: BACKEND_NAME,
                    status: None,
                    message: format!("invalid response body: {}", err),
                })?;

        let translation = parsed
            .data
            .translations
            .into_iter()
            .next()
            .ok_or(TranslationError::EmptyResult {
                backend: BACKEND_NAME,
            })?;

        Ok(translation.translated_text)
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_deserialization() {
        let body = r#"{"data":{"translations":[{"translatedText":"哈囉"}]}}"#;
        let parsed: TranslateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.data.translations[0].translated_text, "哈囉");
    }

    #[test]
    fn test_empty_translations_deserialize() {
        let body = r#"{"data":{"translations":[]}}"#;
        let parsed: TranslateResponse = serde_json::from_str(body).unwrap();
        assert!(parsed.data.translations.is_empty());
    }
}
