//! DeepL v2 backend.

use crate::translation::{TranslationError, Translator};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const ENDPOINT: &str = "https://api-free.deepl.com/v2/translate";

const BACKEND_NAME: &str = "DeepL";

/// Stateless wrapper around the DeepL v2 REST API.
///
/// The API key travels in a `DeepL-Auth-Key` authorization header. DeepL
/// wants its own uppercase language codes (Traditional Chinese is `ZH-HANT`,
/// not `zh-TW`), so tags are normalized through [`deepl_lang_code`] before
/// the request is built.
pub struct DeepLTranslator {
    api_key: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct TranslateRequest {
    text: Vec<String>,
    target_lang: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    source_lang: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TranslateResponse {
    translations: Vec<Translation>,
}

#[derive(Debug, Deserialize)]
struct Translation {
    text: String,
}

impl DeepLTranslator {
    pub fn new(api_key: String) -> Self {
        Self {
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Translator for DeepLTranslator {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        let request = TranslateRequest {
            text: vec![text.to_string()],
            target_lang: deepl_lang_code(target_lang),
            source_lang: if source_lang.is_empty() {
                None
            } else {
                Some(deepl_lang_code(source_lang))
            },
        };

        let response = self
            .client
            .post(ENDPOINT)
            .header("Authorization", format!("DeepL-Auth-Key {}", self.api_key))
            .json(&request)
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
            .translations
            .into_iter()
            .next()
            .ok_or(TranslationError::EmptyResult {
                backend: BACKEND_NAME,
            })?;

        Ok(translation.text)
    }

    fn name(&self) -> &'static str {
        BACKEND_NAME
    }
}

/// Map a generic language tag to the code DeepL expects.
///
/// Unmapped tags fall back to an uppercased pass-through, which matches what
/// DeepL accepts for plain two-letter codes.
pub fn deepl_lang_code(lang: &str) -> String {
    match lang {
        "zh-TW" => "ZH-HANT".to_string(),
        "zh-CN" | "zh" => "ZH-HANS".to_string(),
        "en" => "EN".to_string(),
        "ja" => "JA".to_string(),
        "id" => "ID".to_string(),
        "ko" => "KO".to_string(),
        "es" => "ES".to_string(),
        "fr" => "FR".to_string(),
        "de" => "DE".to_string(),
        "pt" => "PT-BR".to_string(),
        "ru" => "RU".to_string(),
        other => other.to_uppercase(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lang_code_mapping() {
        assert_eq!(deepl_lang_code("zh-TW"), "ZH-HANT");
        assert_eq!(deepl_lang_code("zh-CN"), "ZH-HANS");
        assert_eq!(deepl_lang_code("zh"), "ZH-HANS");
        assert_eq!(deepl_lang_code("pt"), "PT-BR");
    }

    #[test]
    fn test_lang_code_passthrough_uppercases() {
        assert_eq!(deepl_lang_code("xx"), "XX");
        assert_eq!(deepl_lang_code("nl"), "NL");
    }

    #[test]
    fn test_request_serialization_omits_empty_source() {
        let request = TranslateRequest {
            text: vec!["hello".to_string()],
            target_lang: "ZH-HANT".to_string(),
            source_lang: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(!json.contains("source_lang"));
        assert!(json.contains("ZH-HANT"));
    }

    #[test]
    fn test_response_deserialization() {
        let body = r#"{"translations":[{"detected_source_language":"EN","text":"哈囉"}]}"#;
        let parsed: TranslateResponse = serde_json::from_str(body).unwrap();
        assert_eq!(parsed.translations[0].text, "哈囉");
    }
}
