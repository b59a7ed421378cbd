//! # Translation Module
//!
//! Routes finalized transcripts through external translation APIs.
//!
//! ## Key Components:
//! - **Translator trait**: uniform `translate`/`name` contract over providers
//!   with very different wire formats
//! - **Google backend**: Cloud Translation v2, key passed as a query parameter
//! - **DeepL backend**: DeepL v2, key passed in an `Authorization` header,
//!   with its own language-code normalization
//! - **Failover dispatcher**: ordered registry of configured backends, tried
//!   in turn until one succeeds
//!
//! Backends are registered per session based on which credentials are present
//! in process configuration; a backend without a credential is simply absent
//! from the registry, not present-but-disabled.

pub mod deepl;
pub mod dispatcher;
pub mod google;

pub use deepl::DeepLTranslator;
pub use dispatcher::FailoverTranslator;
pub use google::GoogleTranslator;

use async_trait::async_trait;
use std::fmt;

/// One external translation provider behind the uniform contract.
///
/// Implementations are stateless request/response wrappers making one
/// outbound HTTP call per `translate`, with the credential passed through
/// the provider's native auth mechanism. Any language-code normalization the
/// provider needs happens inside the implementation.
#[async_trait]
pub trait Translator: Send + Sync {
    async fn translate(
        &self,
        text: &str,
        source_lang: &str,
        target_lang: &str,
    ) -> Result<String, TranslationError>;

    fn name(&self) -> &'static str;
}

/// Failures in the translation subsystem.
#[derive(Debug)]
pub enum TranslationError {
    /// Transport or HTTP failure talking to one backend.
    Backend {
        backend: &'static str,
        status: Option<u16>,
        message: String,
    },

    /// A well-formed response that contained zero translations.
    EmptyResult { backend: &'static str },

    /// The dispatcher registry is empty (no credentials configured).
    NoBackendAvailable,

    /// Every registered backend was tried and failed.
    AllBackendsFailed,
}

impl fmt::Display for TranslationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TranslationError::Backend {
                backend,
                status: Some(code),
                message,
            } => write!(f, "{} returned HTTP {}: {}", backend, code, message),
            TranslationError::Backend {
                backend,
                status: None,
                message,
            } => write!(f, "{} request failed: {}", backend, message),
            TranslationError::EmptyResult { backend } => {
                write!(f, "{} returned no translations", backend)
            }
            TranslationError::NoBackendAvailable => {
                write!(f, "no translation backend is configured")
            }
            TranslationError::AllBackendsFailed => {
                write!(f, "all translation backends failed")
            }
        }
    }
}

impl std::error::Error for TranslationError {}
