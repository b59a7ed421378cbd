//! Streaming client for the Deepgram live transcription API.

use futures_util::future::BoxFuture;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio::sync::{watch, Mutex};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

const LISTEN_ENDPOINT: &str = "wss://api.deepgram.com/v1/listen";

type WsSink = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<TcpStream>>,
    Message,
>;

/// Callback invoked by the background reader for every transcript event.
///
/// The reader awaits the returned future before decoding the next upstream
/// message, so invocations are strictly sequential per session and event
/// order is preserved all the way through translation dispatch.
pub type ResultCallback = Arc<dyn Fn(String, bool) -> BoxFuture<'static, ()> + Send + Sync>;

/// Errors from the upstream STT session.
#[derive(Debug)]
pub enum SttError {
    /// Transport or handshake failure while connecting.
    Connect(String),

    /// `send` called before `connect` succeeded or after `close`.
    NotConnected,

    /// Failed to forward an audio frame on an established connection.
    Send(String),
}

impl fmt::Display for SttError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SttError::Connect(msg) => write!(f, "failed to connect to speech service: {}", msg),
            SttError::NotConnected => write!(f, "speech session is not connected"),
            SttError::Send(msg) => write!(f, "failed to forward audio upstream: {}", msg),
        }
    }
}

impl std::error::Error for SttError {}

/// One streaming transcription session.
///
/// ## Thread Safety:
/// The write half of the connection sits behind an async mutex so `send` and
/// `close` can race safely; the read half is consumed by a background reader
/// task that stops on connection loss or on the shutdown signal raised by
/// `close`. `close` is idempotent: the sink slot is taken on the first call
/// and the shutdown signal is a watch channel, so signalling twice is a
/// harmless no-op.
pub struct DeepgramClient {
    api_key: String,
    model: String,
    language: String,
    sample_rate: u32,
    on_result: Option<ResultCallback>,
    sink: Arc<Mutex<Option<WsSink>>>,
    shutdown: watch::Sender<bool>,
}

impl DeepgramClient {
    /// Create a session for one language/sample-rate pair. A missing sample
    /// rate defaults to 16 kHz.
    pub fn new(api_key: String, model: String, language: String, sample_rate: Option<u32>) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            api_key,
            model,
            language,
            sample_rate: sample_rate.unwrap_or(16000),
            on_result: None,
            sink: Arc::new(Mutex::new(None)),
            shutdown,
        }
    }

    /// Register the callback invoked for every transcript event.
    ///
    /// Must be called before `connect`; events decoded while no callback is
    /// registered are dropped.
    pub fn set_on_result(&mut self, callback: ResultCallback) {
        self.on_result = Some(callback);
    }

    /// The fully-parameterized streaming URL for this session.
    fn listen_url(&self) -> String {
        format!(
            "{}?language={}&model={}&encoding=linear16&sample_rate={}&channels=1&punctuate=true&interim_results=true",
            LISTEN_ENDPOINT, self.language, self.model, self.sample_rate
        )
    }

    /// Open the upstream connection and start the background reader.
    pub async fn connect(&mut self) -> Result<(), SttError> {
        let mut request = self
            .listen_url()
            .into_client_request()
            .map_err(|err| SttError::Connect(err.to_string()))?;

        let auth = HeaderValue::from_str(&format!("Token {}", self.api_key))
            .map_err(|err| SttError::Connect(err.to_string()))?;
        request.headers_mut().insert("Authorization", auth);

        let (stream, _) = connect_async(request)
            .await
            .map_err(|err| SttError::Connect(err.to_string()))?;

        info!("Connected to speech service (language: {})", self.language);

        let (sink, source) = stream.split();
        *self.sink.lock().await = Some(sink);

        let callback = self.on_result.clone();
        let shutdown_rx = self.shutdown.subscribe();
        tokio::spawn(read_results(source, callback, shutdown_rx));

        Ok(())
    }

    /// Forward one binary audio frame upstream.
    pub async fn send(&self, audio: &[u8]) -> Result<(), SttError> {
        let mut sink = self.sink.lock().await;
        match sink.as_mut() {
            Some(sink) => sink
                .send(Message::Binary(audio.to_vec()))
                .await
                .map_err(|err| SttError::Send(err.to_string())),
            None => Err(SttError::NotConnected),
        }
    }

    /// End the stream gracefully and stop the background reader.
    ///
    /// Safe to call more than once; after the first call the session stays
    /// closed and further calls do nothing.
    pub async fn close(&self) {
        let mut sink = self.sink.lock().await;
        if let Some(mut sink) = sink.take() {
            // Tell the upstream the stream is complete; failure here only
            // means the connection is already gone.
            let close_frame = serde_json::json!({"type": "CloseStream"}).to_string();
            let _ = sink.send(Message::Text(close_frame)).await;
            let _ = sink.close().await;
            debug!("Speech session closed");
        }
        drop(sink);

        self.shutdown.send_replace(true);
    }
}

/// Background reader: decode upstream messages until the connection ends or
/// shutdown is signalled. Never propagates errors across its boundary.
async fn read_results(
    mut source: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    callback: Option<ResultCallback>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => break,
            message = source.next() => {
                match message {
                    Some(Ok(Message::Text(text))) => {
                        if let Some((transcript, is_final)) = parse_transcript(&text) {
                            if let Some(ref callback) = callback {
                                callback(transcript, is_final).await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) => {
                        debug!("Upstream closed the transcription stream");
                        break;
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => {
                        warn!("Upstream read error: {}", err);
                        break;
                    }
                    None => break,
                }
            }
        }
    }
    debug!("Upstream reader stopped");
}

#[derive(Debug, Deserialize)]
struct TranscriptEvent {
    #[serde(default)]
    channel: Channel,
    #[serde(default)]
    is_final: bool,
}

#[derive(Debug, Default, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
}

/// Extract the best non-empty transcript from one upstream message.
///
/// Malformed payloads and events without a usable transcript yield `None`;
/// they are logged and skipped, never surfaced.
fn parse_transcript(raw: &str) -> Option<(String, bool)> {
    let event: TranscriptEvent = match serde_json::from_str(raw) {
        Ok(event) => event,
        Err(err) => {
            debug!("Ignoring undecodable upstream message: {}", err);
            return None;
        }
    };

    let best = event.channel.alternatives.into_iter().next()?;
    if best.transcript.is_empty() {
        return None;
    }
    Some((best.transcript, event.is_final))
}
