//! # WebSocket Subtitle Relay Handler
//!
//! Handles one live-captioning client per WebSocket connection on `/ws`.
//! The client streams raw audio; the server relays it to the upstream
//! speech-to-text service and streams transcripts and translations back.
//!
//! ## WebSocket Protocol:
//! 1. **Connection**: token and origin checks, then per-address admission
//! 2. **Configuration**: the first message must be
//!    `{"type":"config","sourceLanguage":...,"targetLanguage":...,"sampleRate"?:...}`
//! 3. **Audio Streaming**: subsequent binary messages carry linear-PCM audio
//!    at the negotiated sample rate, mono
//! 4. **Results**: the server sends `transcript`, `translation` and `error`
//!    JSON messages, in upstream event order
//!
//! ## Session Teardown:
//! Client close, upstream failure, a fatal relay error or the inactivity
//! timeout all converge on stopping the actor, which closes the upstream
//! session and releases the admission slot exactly once.

use crate::admission::ConnectionGuard;
use crate::error::AppError;
use crate::state::AppState;
use crate::stt::{DeepgramClient, ResultCallback};
use crate::translation::FailoverTranslator;

use actix::prelude::*;
use actix_web::{web, HttpRequest, HttpResponse, Result as ActixResult};
use actix_web_actors::ws;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Valid sample-rate range for client audio, in Hz.
const MIN_SAMPLE_RATE: u32 = 8000;
const MAX_SAMPLE_RATE: u32 = 48000;

/// How often the session checks for client inactivity.
const INACTIVITY_CHECK_INTERVAL: Duration = Duration::from_secs(5);

/// Upper bound on audio frames buffered while the upstream connection is
/// still being established; overflow drops the oldest frame (best-effort
/// delivery, never backpressure on the client).
const MAX_PENDING_FRAMES: usize = 64;

/// Messages a client may send as text frames.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientMessage {
    /// Initial handshake carrying the session configuration.
    Config(SessionConfig),
}

/// Immutable per-session configuration, parsed from the handshake message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    pub source_language: String,
    pub target_language: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sample_rate: Option<u32>,
}

impl SessionConfig {
    /// Validate the handshake parameters.
    ///
    /// Both language tags must be non-empty; the sample rate, when supplied,
    /// must fall within the supported range.
    pub fn validate(&self) -> Result<(), String> {
        if self.source_language.is_empty() || self.target_language.is_empty() {
            return Err("Source and target languages must not be empty".to_string());
        }
        if let Some(rate) = self.sample_rate {
            if !(MIN_SAMPLE_RATE..=MAX_SAMPLE_RATE).contains(&rate) {
                return Err(format!(
                    "Invalid sample rate: {} (expected {}-{})",
                    rate, MIN_SAMPLE_RATE, MAX_SAMPLE_RATE
                ));
            }
        }
        Ok(())
    }
}

/// Messages the server sends to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum SubtitleMessage {
    /// Raw recognized text from the speech service.
    Transcript { text: String },

    /// Translated text together with the original transcript.
    Translation { text: String, original: String },

    /// A failure the client should know about.
    Error { message: String },
}

/// Handle one transcript event from the upstream reader.
///
/// Interim results are forwarded only when the `forward_interim` policy is
/// on. Final results always emit a `transcript` message followed by either a
/// `translation` or a non-fatal `error` message, so per-session ordering of
/// responses mirrors upstream event order.
async fn relay_transcript_event<F>(
    transcript: String,
    is_final: bool,
    config: &SessionConfig,
    translator: &FailoverTranslator,
    forward_interim: bool,
    emit: &F,
) where
    F: Fn(SubtitleMessage),
{
    if !is_final {
        debug!("[STT] interim transcript: {:?}", transcript);
        if forward_interim {
            emit(SubtitleMessage::Transcript { text: transcript });
        }
        return;
    }

    info!("[STT] final transcript: {:?}", transcript);
    emit(SubtitleMessage::Transcript {
        text: transcript.clone(),
    });

    match translator
        .translate(&transcript, &config.source_language, &config.target_language)
        .await
    {
        Ok(translated) => {
            info!("[translation] {:?} -> {:?}", transcript, translated);
            emit(SubtitleMessage::Translation {
                text: translated,
                original: transcript,
            });
        }
        Err(err) => {
            // Translation failure is non-fatal; the session keeps streaming.
            emit(SubtitleMessage::Error {
                message: format!("Translation failed: {}", err),
            });
        }
    }
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq)]
enum SessionPhase {
    /// Waiting for the handshake message.
    AwaitingConfig,
    /// Handshake accepted; upstream connection being established.
    ConnectingUpstream,
    /// Audio is flowing to the upstream session.
    Streaming,
}

/// WebSocket actor for one relay session.
pub struct RelaySession {
    session_id: String,
    state: AppState,
    /// Admission slot; released when the actor is dropped, on any exit path.
    _guard: ConnectionGuard,
    phase: SessionPhase,
    stt: Option<Arc<DeepgramClient>>,
    audio_tx: Option<mpsc::UnboundedSender<Vec<u8>>>,
    pending_audio: Vec<Vec<u8>>,
    last_activity: Instant,
}

impl RelaySession {
    pub fn new(state: AppState, guard: ConnectionGuard) -> Self {
        Self {
            session_id: Uuid::new_v4().to_string(),
            state,
            _guard: guard,
            phase: SessionPhase::AwaitingConfig,
            stt: None,
            audio_tx: None,
            pending_audio: Vec::new(),
            last_activity: Instant::now(),
        }
    }

    fn send_message(&self, ctx: &mut ws::WebsocketContext<Self>, message: SubtitleMessage) {
        match serde_json::to_string(&message) {
            Ok(json) => ctx.text(json),
            Err(err) => error!("[{}] Failed to serialize response: {}", self.session_id, err),
        }
    }

    fn fail_session(&self, ctx: &mut ws::WebsocketContext<Self>, message: String) {
        warn!("[{}] {}", self.session_id, message);
        self.send_message(ctx, SubtitleMessage::Error { message });
        ctx.stop();
    }

    /// Handle the handshake message and kick off the upstream connection.
    fn handle_config_message(&mut self, text: &str, ctx: &mut ws::WebsocketContext<Self>) {
        let config = match serde_json::from_str::<ClientMessage>(text) {
            Ok(ClientMessage::Config(config)) => config,
            Err(_) => {
                self.fail_session(
                    ctx,
                    "Invalid configuration message; expected type \"config\"".to_string(),
                );
                return;
            }
        };

        if let Err(reason) = config.validate() {
            self.fail_session(ctx, format!("Configuration rejected: {}", reason));
            return;
        }

        info!(
            "[{}] Session configured: {} -> {}",
            self.session_id, config.source_language, config.target_language
        );

        let translator = FailoverTranslator::from_config(&self.state.config.translation);
        if !translator.available() {
            self.fail_session(
                ctx,
                "No translation backend available; check API key configuration".to_string(),
            );
            return;
        }

        // Build and connect the upstream session off the actor context; audio
        // that arrives in the meantime is buffered and flushed on ready.
        let mut client = DeepgramClient::new(
            self.state.config.speech.api_key.clone(),
            self.state.config.speech.model.clone(),
            config.source_language.clone(),
            config.sample_rate,
        );
        client.set_on_result(build_result_callback(
            ctx.address(),
            config,
            Arc::new(translator),
            self.state.config.translation.forward_interim,
            self.state.clone(),
        ));

        self.phase = SessionPhase::ConnectingUpstream;

        let addr = ctx.address();
        let session_id = self.session_id.clone();
        tokio::spawn(async move {
            match client.connect().await {
                Ok(()) => {
                    let client = Arc::new(client);
                    // The client may have disconnected while we were dialing;
                    // close the fresh upstream session instead of leaking it.
                    if addr
                        .try_send(UpstreamReady {
                            client: Arc::clone(&client),
                        })
                        .is_err()
                    {
                        client.close().await;
                    }
                }
                Err(err) => {
                    error!("[{}] {}", session_id, err);
                    addr.do_send(FatalError {
                        message: format!("Speech service connection failed: {}", err),
                    });
                }
            }
        });
    }

    fn handle_audio_frame(&mut self, data: &[u8], ctx: &mut ws::WebsocketContext<Self>) {
        match self.phase {
            SessionPhase::AwaitingConfig => {
                self.fail_session(
                    ctx,
                    "Received audio before configuration; send the config message first"
                        .to_string(),
                );
            }
            SessionPhase::ConnectingUpstream => {
                if self.pending_audio.len() >= MAX_PENDING_FRAMES {
                    self.pending_audio.remove(0);
                }
                self.pending_audio.push(data.to_vec());
            }
            SessionPhase::Streaming => {
                let forwarded = self
                    .audio_tx
                    .as_ref()
                    .map(|tx| tx.send(data.to_vec()).is_ok())
                    .unwrap_or(false);
                if !forwarded {
                    self.fail_session(ctx, "Audio processing failed".to_string());
                }
            }
        }
    }
}

/// Result message delivered back onto the actor from the reader task.
#[derive(Message)]
#[rtype(result = "()")]
struct Outbound(SubtitleMessage);

/// Upstream connection established.
#[derive(Message)]
#[rtype(result = "()")]
struct UpstreamReady {
    client: Arc<DeepgramClient>,
}

/// A non-recoverable relay failure; reported to the client, then the session
/// stops.
#[derive(Message)]
#[rtype(result = "()")]
struct FatalError {
    message: String,
}

impl Actor for RelaySession {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        info!("[{}] Relay session started", self.session_id);
        self.state.increment_active_sessions();

        let timeout = Duration::from_secs(self.state.config.limits.read_timeout_secs);
        ctx.run_interval(INACTIVITY_CHECK_INTERVAL, move |act, ctx| {
            if Instant::now().duration_since(act.last_activity) > timeout {
                warn!(
                    "[{}] Client inactive for over {}s, closing session",
                    act.session_id,
                    timeout.as_secs()
                );
                ctx.stop();
            }
        });
    }

    fn stopped(&mut self, _ctx: &mut Self::Context) {
        info!("[{}] Relay session stopped", self.session_id);
        self.state.decrement_active_sessions();

        // Stop the audio pump, then close the upstream session in the
        // background; the client connection is already going down with the
        // actor.
        self.audio_tx = None;
        if let Some(client) = self.stt.take() {
            tokio::spawn(async move {
                client.close().await;
            });
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for RelaySession {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        match msg {
            Ok(ws::Message::Text(text)) => {
                self.last_activity = Instant::now();
                match self.phase {
                    SessionPhase::AwaitingConfig => self.handle_config_message(&text, ctx),
                    // Text after the handshake is a no-op.
                    _ => debug!("[{}] Ignoring text message after handshake", self.session_id),
                }
            }
            Ok(ws::Message::Binary(data)) => {
                self.last_activity = Instant::now();
                self.handle_audio_frame(&data, ctx);
            }
            Ok(ws::Message::Ping(data)) => {
                self.last_activity = Instant::now();
                ctx.pong(&data);
            }
            Ok(ws::Message::Pong(_)) => {
                self.last_activity = Instant::now();
            }
            Ok(ws::Message::Close(reason)) => {
                info!("[{}] Client closed connection: {:?}", self.session_id, reason);
                ctx.stop();
            }
            Ok(ws::Message::Continuation(_)) => {
                warn!("[{}] Unexpected continuation frame", self.session_id);
            }
            Ok(ws::Message::Nop) => {}
            Err(err) => {
                error!("[{}] WebSocket protocol error: {}", self.session_id, err);
                ctx.stop();
            }
        }
    }
}

impl Handler<Outbound> for RelaySession {
    type Result = ();

    fn handle(&mut self, msg: Outbound, ctx: &mut Self::Context) {
        self.send_message(ctx, msg.0);
    }
}

impl Handler<UpstreamReady> for RelaySession {
    type Result = ();

    fn handle(&mut self, msg: UpstreamReady, ctx: &mut Self::Context) {
        info!("[{}] Upstream session ready, streaming audio", self.session_id);

        let (tx, mut rx) = mpsc::unbounded_channel::<Vec<u8>>();
        for frame in self.pending_audio.drain(..) {
            let _ = tx.send(frame);
        }

        // Pump task: keeps client-frame order and isolates upstream sends
        // from the actor context.
        let client = Arc::clone(&msg.client);
        let addr = ctx.address();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                if let Err(err) = client.send(&frame).await {
                    warn!("Audio forwarding failed: {}", err);
                    addr.do_send(FatalError {
                        message: "Audio processing failed".to_string(),
                    });
                    break;
                }
            }
        });

        self.stt = Some(msg.client);
        self.audio_tx = Some(tx);
        self.phase = SessionPhase::Streaming;
    }
}

impl Handler<FatalError> for RelaySession {
    type Result = ();

    fn handle(&mut self, msg: FatalError, ctx: &mut Self::Context) {
        self.fail_session(ctx, msg.message);
    }
}

/// Build the callback the upstream reader invokes for every transcript
/// event. Runs on the reader task: translation latency delays later
/// transcript delivery but never blocks inbound audio forwarding.
fn build_result_callback(
    addr: Addr<RelaySession>,
    config: SessionConfig,
    translator: Arc<FailoverTranslator>,
    forward_interim: bool,
    state: AppState,
) -> ResultCallback {
    Arc::new(move |transcript, is_final| {
        let addr = addr.clone();
        let config = config.clone();
        let translator = Arc::clone(&translator);
        let state = state.clone();
        Box::pin(async move {
            state.record_stt_event();
            let emit = move |message: SubtitleMessage| {
                match &message {
                    SubtitleMessage::Translation { .. } => state.record_translation(true),
                    SubtitleMessage::Error { .. } => state.record_translation(false),
                    SubtitleMessage::Transcript { .. } => {}
                }
                addr.do_send(Outbound(message));
            };
            relay_transcript_event(
                transcript,
                is_final,
                &config,
                &translator,
                forward_interim,
                &emit,
            )
            .await;
        })
    })
}

/// Resolve the client's source address for the admission gate, preferring a
/// forwarded address (first entry) over the transport peer address.
fn source_address(req: &HttpRequest) -> String {
    let info = req.connection_info();
    let addr = info.realip_remote_addr().unwrap_or("unknown");
    match addr.parse::<std::net::SocketAddr>() {
        Ok(socket) => socket.ip().to_string(),
        Err(_) => addr.to_string(),
    }
}

/// WebSocket endpoint handler: auth, origin and admission checks, then the
/// upgrade into a [`RelaySession`] actor.
pub async fn ws_relay(
    req: HttpRequest,
    stream: web::Payload,
    state: web::Data<AppState>,
) -> ActixResult<HttpResponse> {
    let server_config = &state.config.server;

    // Origin allow-list; an empty list accepts any origin, and requests
    // without an Origin header (non-browser clients) are always accepted.
    if !server_config.allowed_origins.is_empty() {
        if let Some(origin) = req.headers().get("Origin").and_then(|v| v.to_str().ok()) {
            if !server_config.allowed_origins.iter().any(|o| o == origin) {
                warn!("Rejected WebSocket upgrade from disallowed origin: {}", origin);
                return Err(AppError::Forbidden("Origin not allowed".to_string()).into());
            }
        }
    }

    // Optional shared-secret token in the query string; absent on both sides
    // counts as authenticated.
    if !server_config.auth_token.is_empty() {
        let query =
            web::Query::<HashMap<String, String>>::from_query(req.query_string())
                .unwrap_or_else(|_| web::Query(HashMap::new()));
        if query.get("token").map(String::as_str) != Some(server_config.auth_token.as_str()) {
            warn!("WebSocket authentication failed: token mismatch");
            return Err(AppError::Unauthorized("Invalid authentication token".to_string()).into());
        }
    }

    let peer = source_address(&req);
    let guard = state.tracker.try_acquire(&peer).ok_or_else(|| {
        AppError::TooManyConnections(format!("Connection limit reached for {}", peer))
    })?;

    info!(
        "New WebSocket connection from {} ({} active)",
        guard.addr(),
        state.tracker.active_count(guard.addr())
    );
    let session = RelaySession::new(state.get_ref().clone(), guard);
    ws::start(session, &req, stream)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::translation::{TranslationError, Translator};
    use async_trait::async_trait;
    use std::sync::Mutex;

    struct StaticBackend {
        reply: &'static str,
    }

    #[async_trait]
    impl Translator for StaticBackend {
        async fn translate(
            &self,
            _text: &str,
            _source_lang: &str,
            _target_lang: &str,
        ) -> Result<String, TranslationError> {
            Ok(self.reply.to_string())
        }

        fn name(&self) -> &'static str {
            "Static"
        }
    }

    struct EchoBackend;

    #[async_trait]
    impl Translator for EchoBackend {
        async fn translate(
            &self,
            text: &str,
            _source_lang: &str,
            _target_lang: &str,
        ) -> Result<String, TranslationError> {
            Ok(format!("<{}>", text))
        }

        fn name(&self) -> &'static str {
            "Echo"
        }
    }

    struct BrokenBackend;

    #[async_trait]
    impl Translator for BrokenBackend {
        async fn translate(
            &self,
            _text: &str,
            _source_lang: &str,
            _target_lang: &str,
        ) -> Result<String, TranslationError> {
            Err(TranslationError::Backend {
                backend: "Broken",
                status: Some(503),
                message: "unavailable".to_string(),
            })
        }

        fn name(&self) -> &'static str {
            "Broken"
        }
    }

    fn test_config() -> SessionConfig {
        SessionConfig {
            source_language: "en".to_string(),
            target_language: "zh-TW".to_string(),
            sample_rate: None,
        }
    }

    fn dispatcher_with(backend: Box<dyn Translator>) -> FailoverTranslator {
        let mut dispatcher = FailoverTranslator::new();
        dispatcher.register(backend);
        dispatcher
    }

    #[test]
    fn test_session_config_validation() {
        assert!(test_config().validate().is_ok());

        let mut config = test_config();
        config.sample_rate = Some(16000);
        assert!(config.validate().is_ok());
        config.sample_rate = Some(8000);
        assert!(config.validate().is_ok());
        config.sample_rate = Some(48000);
        assert!(config.validate().is_ok());

        config.sample_rate = Some(7999);
        assert!(config.validate().is_err());
        config.sample_rate = Some(48001);
        let err = config.validate().unwrap_err();
        assert!(!err.is_empty());

        let mut config = test_config();
        config.source_language.clear();
        assert!(config.validate().is_err());

        let mut config = test_config();
        config.target_language.clear();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_handshake_parsing() {
        let valid = r#"{"type":"config","sourceLanguage":"en","targetLanguage":"zh-TW"}"#;
        let ClientMessage::Config(config) = serde_json::from_str(valid).unwrap();
        assert_eq!(config.source_language, "en");
        assert_eq!(config.target_language, "zh-TW");
        assert_eq!(config.sample_rate, None);

        let with_rate =
            r#"{"type":"config","sourceLanguage":"ja","targetLanguage":"en","sampleRate":44100}"#;
        let ClientMessage::Config(config) = serde_json::from_str(with_rate).unwrap();
        assert_eq!(config.sample_rate, Some(44100));

        // A message that is not a configuration is a protocol error.
        let wrong_type = r#"{"type":"audio","sourceLanguage":"en","targetLanguage":"ja"}"#;
        assert!(serde_json::from_str::<ClientMessage>(wrong_type).is_err());

        assert!(serde_json::from_str::<ClientMessage>("not json").is_err());
    }

    #[test]
    fn test_subtitle_message_serialization() {
        let message = SubtitleMessage::Translation {
            text: "哈囉".to_string(),
            original: "hello".to_string(),
        };
        let json = serde_json::to_string(&message).unwrap();
        assert!(json.contains(r#""type":"translation""#));
        assert!(json.contains("哈囉"));
        assert!(json.contains(r#""original":"hello""#));

        let error = SubtitleMessage::Error {
            message: "translation failed".to_string(),
        };
        let json = serde_json::to_string(&error).unwrap();
        assert!(json.contains(r#""type":"error""#));
    }

    #[tokio::test]
    async fn test_final_transcript_emits_transcript_then_translation() {
        let translator = dispatcher_with(Box::new(StaticBackend { reply: "哈囉" }));
        let received = Mutex::new(Vec::new());
        let emit = |message: SubtitleMessage| received.lock().unwrap().push(message);

        relay_transcript_event("hello".to_string(), true, &test_config(), &translator, false, &emit)
            .await;

        let messages = received.into_inner().unwrap();
        assert_eq!(
            messages,
            vec![
                SubtitleMessage::Transcript {
                    text: "hello".to_string()
                },
                SubtitleMessage::Translation {
                    text: "哈囉".to_string(),
                    original: "hello".to_string()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_interim_suppressed_by_default() {
        let translator = dispatcher_with(Box::new(StaticBackend { reply: "x" }));
        let received = Mutex::new(Vec::new());
        let emit = |message: SubtitleMessage| received.lock().unwrap().push(message);

        relay_transcript_event("hel".to_string(), false, &test_config(), &translator, false, &emit)
            .await;

        assert!(received.into_inner().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_interim_forwarded_when_policy_on() {
        let translator = dispatcher_with(Box::new(StaticBackend { reply: "x" }));
        let received = Mutex::new(Vec::new());
        let emit = |message: SubtitleMessage| received.lock().unwrap().push(message);

        relay_transcript_event("hel".to_string(), false, &test_config(), &translator, true, &emit)
            .await;

        let messages = received.into_inner().unwrap();
        assert_eq!(
            messages,
            vec![SubtitleMessage::Transcript {
                text: "hel".to_string()
            }]
        );
    }

    #[tokio::test]
    async fn test_translation_failure_is_nonfatal_error_message() {
        let translator = dispatcher_with(Box::new(BrokenBackend));
        let received = Mutex::new(Vec::new());
        let emit = |message: SubtitleMessage| received.lock().unwrap().push(message);

        relay_transcript_event("hello".to_string(), true, &test_config(), &translator, false, &emit)
            .await;

        let messages = received.into_inner().unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            SubtitleMessage::Transcript {
                text: "hello".to_string()
            }
        );
        assert!(matches!(messages[1], SubtitleMessage::Error { .. }));
    }

    #[tokio::test]
    async fn test_response_order_follows_event_order() {
        let translator = dispatcher_with(Box::new(EchoBackend));
        let received = Mutex::new(Vec::new());
        let emit = |message: SubtitleMessage| received.lock().unwrap().push(message);

        for text in ["one", "two", "three"] {
            relay_transcript_event(
                text.to_string(),
                true,
                &test_config(),
                &translator,
                false,
                &emit,
            )
            .await;
        }

        let messages = received.into_inner().unwrap();
        let expected: Vec<SubtitleMessage> = ["one", "two", "three"]
            .iter()
            .flat_map(|text| {
                vec![
                    SubtitleMessage::Transcript {
                        text: text.to_string(),
                    },
                    SubtitleMessage::Translation {
                        text: format!("<{}>", text),
                        original: text.to_string(),
                    },
                ]
            })
            .collect();
        assert_eq!(messages, expected);
    }
}
