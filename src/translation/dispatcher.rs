//! Failover dispatch over the registered translation backends.

use crate::config::TranslationConfig;
use crate::translation::{DeepLTranslator, GoogleTranslator, TranslationError, Translator};
use std::time::Instant;
use tracing::{info, warn};

/// Ordered registry of translation backends with failover.
///
/// Backends sit in registration order (the order their credentials were
/// configured, Google first). Every `translate` call starts from index 0 and
/// walks the list until one backend succeeds; there is no rotation state
/// carried between calls.
pub struct FailoverTranslator {
    backends: Vec<Box<dyn Translator>>,
}

impl FailoverTranslator {
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Build the registry from whichever credentials are configured.
    pub fn from_config(config: &TranslationConfig) -> Self {
        let mut dispatcher = Self::new();

        if !config.google_api_key.is_empty() {
            dispatcher.register(Box::new(GoogleTranslator::new(
                config.google_api_key.clone(),
            )));
        }
        if !config.deepl_api_key.is_empty() {
            dispatcher.register(Box::new(DeepLTranslator::new(config.deepl_api_key.clone())));
        }

        dispatcher
    }

    pub fn register(&mut self, backend: Box<dyn Translator>) {
        info!("Registered translation backend: {}", backend.name());
        self.backends.push(backend);
    }

    /// True when at least one backend is registered. Callers must check this
    /// before starting a session rather than discovering an empty registry on
    /// the first transcript.
    pub fn available(&self) -> bool {
        !self.backends.is_empty()
    }

    /// Translate `text`, trying each backend in registration order.
    ///
    /// Returns the first success. Every per-backend failure is attributed to
    /// that backend in the log and the next one is tried; only exhaustion of
    /// the whole registry is an error to the caller.
    pub async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError> {
        if self.backends.is_empty() {
            return Err(TranslationError::NoBackendAvailable);
        }

        for backend in &self.backends {
            let start = Instant::now();
            match backend.translate(text, source_lang, target_lang).await {
                Ok(translated) => {
                    info!(
                        "[{}] translation completed in {}ms",
                        backend.name(),
                        start.elapsed().as_millis()
                    );
                    return Ok(translated);
                }
                Err(err) => {
                    warn!(
                        "[{}] translation failed after {}ms: {}; trying next backend",
                        backend.name(),
                        start.elapsed().as_millis(),
                        err
                    );
                }
            }
        }

        Err(TranslationError::AllBackendsFailed)
    }
}

impl Default for FailoverTranslator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct StubBackend {
        name: &'static str,
        result: Result<&'static str, ()>,
        calls: Arc<AtomicUsize>,
    }

    impl StubBackend {
        fn ok(name: &'static str, result: &'static str) -> (Box<dyn Translator>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    name,
                    result: Ok(result),
                    calls: Arc::clone(&calls),
                }),
                calls,
            )
        }

        fn failing(name: &'static str) -> (Box<dyn Translator>, Arc<AtomicUsize>) {
            let calls = Arc::new(AtomicUsize::new(0));
            (
                Box::new(Self {
                    name,
                    result: Err(()),
                    calls: Arc::clone(&calls),
                }),
                calls,
            )
        }
    }

    #[async_trait]
    impl Translator for StubBackend {
        async fn translate(
            &self,
            _text: &str,
            _source_lang: &str,
            _target_lang: &str,
        ) -> Result<String, TranslationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.result {
                Ok(text) => Ok(text.to_string()),
                Err(()) => Err(TranslationError::Backend {
                    backend: self.name,
                    status: Some(500),
                    message: "stub failure".to_string(),
                }),
            }
        }

        fn name(&self) -> &'static str {
            self.name
        }
    }

    #[tokio::test]
    async fn test_failover_to_second_backend() {
        let (a, a_calls) = StubBackend::failing("A");
        let (b, b_calls) = StubBackend::ok("B", "result-b");

        let mut dispatcher = FailoverTranslator::new();
        dispatcher.register(a);
        dispatcher.register(b);

        let result = dispatcher.translate("hello", "en", "zh-TW").await.unwrap();
        assert_eq!(result, "result-b");
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_exhaustion_attempts_each_backend_once() {
        let (a, a_calls) = StubBackend::failing("A");
        let (b, b_calls) = StubBackend::failing("B");

        let mut dispatcher = FailoverTranslator::new();
        dispatcher.register(a);
        dispatcher.register(b);

        let err = dispatcher.translate("hello", "en", "ja").await.unwrap_err();
        assert!(matches!(err, TranslationError::AllBackendsFailed));
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_every_call_restarts_from_first_backend() {
        let (a, a_calls) = StubBackend::ok("A", "result-a");
        let (b, b_calls) = StubBackend::ok("B", "result-b");

        let mut dispatcher = FailoverTranslator::new();
        dispatcher.register(a);
        dispatcher.register(b);

        for _ in 0..3 {
            let result = dispatcher.translate("hi", "en", "de").await.unwrap();
            assert_eq!(result, "result-a");
        }
        assert_eq!(a_calls.load(Ordering::SeqCst), 3);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_empty_registry() {
        let dispatcher = FailoverTranslator::new();
        assert!(!dispatcher.available());

        let err = dispatcher.translate("hello", "en", "fr").await.unwrap_err();
        assert!(matches!(err, TranslationError::NoBackendAvailable));
    }

    #[test]
    fn test_from_config_registers_by_credential() {
        let config = TranslationConfig {
            google_api_key: String::new(),
            deepl_api_key: "dl-key".to_string(),
            forward_interim: false,
        };
        let dispatcher = FailoverTranslator::from_config(&config);
        assert!(dispatcher.available());
        assert_eq!(dispatcher.backends.len(), 1);
        assert_eq!(dispatcher.backends[0].name(), "DeepL");

        let empty = FailoverTranslator::from_config(&TranslationConfig {
            google_api_key: String::new(),
            deepl_api_key: String::new(),
            forward_interim: false,
        });
        assert!(!empty.available());
    }
}
