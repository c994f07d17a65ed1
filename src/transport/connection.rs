//! WebSocket connection handling for the streaming transport
//!
//! Manages the single live connection to the recognition service: a send
//! task forwards audio frames and keepalives, a receive task turns service
//! messages into stream events. There is no reconnection - once the
//! connection errors it is unusable and the caller decides what happens next.

use super::error::{TransportError, WS_CONNECT_TIMEOUT_SECS};
use super::messages::{ClientMessage, ServerMessage};
use super::{StreamEvent, StreamOptions, TranscriptEvent};
use base64::Engine;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::{interval, timeout};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, trace, warn};

/// Keepalive interval in seconds
const KEEPALIVE_INTERVAL_SECS: u64 = 30;

/// Bounded send buffer: two minutes of chunks at the capture cadence
const AUDIO_BUFFER_CHUNKS: usize = 120;

/// A live streaming connection to the recognition service
///
/// Obtained from [`LiveConnection::open`]; events arrive on the broadcast
/// receiver returned alongside it. Audio goes out through [`send`], the
/// stream ends through [`close`].
///
/// [`send`]: LiveConnection::send
/// [`close`]: LiveConnection::close
pub struct LiveConnection {
    is_open: Arc<AtomicBool>,
    close_requested: AtomicBool,
    audio_tx: mpsc::Sender<Vec<u8>>,
    close_tx: mpsc::Sender<()>,
    tasks: Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl LiveConnection {
    /// Open a streaming connection
    ///
    /// Performs the websocket handshake against the configured endpoint with
    /// the recognition options encoded verbatim in the query string. The
    /// returned event receiver is subscribed before the transport tasks
    /// start, so no event is lost; `Opened` is always the first event.
    ///
    /// # Errors
    /// - `AuthenticationFailed` if the service rejects the handshake
    /// - `ConnectionTimeout` if the handshake does not complete in time
    /// - `ConnectionFailed` for any other handshake failure
    pub async fn open(
        endpoint: &str,
        api_key: &str,
        options: &StreamOptions,
    ) -> Result<(Self, broadcast::Receiver<StreamEvent>), TransportError> {
        let ws_url = build_stream_url(endpoint, options)?;

        let parsed_url = url::Url::parse(&ws_url)
            .map_err(|e| TransportError::ConnectionFailed(e.to_string()))?;
        let host = parsed_url
            .host_str()
            .ok_or_else(|| TransportError::ConnectionFailed("Invalid URL: no host".to_string()))?
            .to_string();

        info!(
            endpoint = %endpoint,
            model = %options.model,
            language = %options.language,
            "Connecting to recognition service"
        );

        let request = build_stream_request(&ws_url, &host, api_key)
            .map_err(TransportError::ConnectionFailed)?;

        let ws_result = timeout(
            Duration::from_secs(WS_CONNECT_TIMEOUT_SECS),
            connect_async(request),
        )
        .await;

        let ws_stream = match ws_result {
            Ok(Ok((stream, _response))) => stream,
            Ok(Err(e)) => {
                error!("WebSocket connection failed: {}", e);
                return Err(classify_handshake_error(e));
            }
            Err(_) => {
                error!("WebSocket connection timed out");
                return Err(TransportError::ConnectionTimeout);
            }
        };

        info!("Connected to recognition service");

        let (ws_sink, ws_stream) = ws_stream.split();
        let (event_tx, event_rx) = broadcast::channel(100);
        let (audio_tx, audio_rx) = mpsc::channel(AUDIO_BUFFER_CHUNKS);
        let (close_tx, close_rx) = mpsc::channel(1);
        let is_open = Arc::new(AtomicBool::new(true));

        let send_task = spawn_send_task(ws_sink, audio_rx, close_rx, is_open.clone());
        let recv_task = spawn_receive_task(ws_stream, event_tx, is_open.clone());

        let connection = Self {
            is_open,
            close_requested: AtomicBool::new(false),
            audio_tx,
            close_tx,
            tasks: Mutex::new(vec![send_task, recv_task]),
        };

        Ok((connection, event_rx))
    }

    /// Forward an audio payload to the service
    ///
    /// Fails fast instead of queuing unboundedly: `NotReady` when the
    /// connection is not open, `Backpressure` when the bounded send buffer
    /// is full.
    pub fn send(&self, bytes: Vec<u8>) -> Result<(), TransportError> {
        if !self.is_open.load(Ordering::SeqCst) {
            return Err(TransportError::NotReady);
        }
        // An empty binary frame means end-of-stream to the service
        if bytes.is_empty() {
            warn!("Dropping empty audio payload");
            return Ok(());
        }
        match self.audio_tx.try_send(bytes) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => Err(TransportError::Backpressure),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(TransportError::NotReady),
        }
    }

    /// Close the connection
    ///
    /// Flushes any buffered audio, tells the service the stream is done and
    /// waits for both transport tasks to finish, so remaining results are
    /// still delivered before the `Closed` event. Closing an already-closed
    /// connection is a no-op.
    pub async fn close(&self) {
        if self.close_requested.swap(true, Ordering::SeqCst) {
            return;
        }
        self.is_open.store(false, Ordering::SeqCst);
        let _ = self.close_tx.send(()).await;

        let mut tasks = self.tasks.lock().await;
        for task in tasks.drain(..) {
            let _ = task.await;
        }
        info!("Transport connection closed");
    }
}

/// Build the streaming URL with the recognition options as query parameters
///
/// Option names are passed through to the service unmodified; interim
/// results are always requested because partial hypotheses drive the
/// document updates.
pub(crate) fn build_stream_url(
    endpoint: &str,
    options: &StreamOptions,
) -> Result<String, TransportError> {
    let mut url = url::Url::parse(endpoint)
        .map_err(|e| TransportError::ConnectionFailed(format!("Invalid endpoint: {}", e)))?;

    url.query_pairs_mut()
        .append_pair("model", &options.model)
        .append_pair("language", &options.language)
        .append_pair("smart_format", bool_param(options.smart_format))
        .append_pair("punctuation", bool_param(options.punctuation))
        .append_pair("paragraphs", bool_param(options.paragraphs))
        .append_pair("utterances", bool_param(options.utterances))
        .append_pair("filler_words", bool_param(options.filler_words))
        .append_pair("summarize", bool_param(options.summarize))
        .append_pair("topic_detection", bool_param(options.topic_detection))
        .append_pair("intent_detection", bool_param(options.intent_detection))
        .append_pair("sentiment", bool_param(options.sentiment))
        .append_pair("interim_results", "true");

    Ok(url.into())
}

fn bool_param(value: bool) -> &'static str {
    if value {
        "true"
    } else {
        "false"
    }
}

/// Build the WebSocket request with token authentication
pub(crate) fn build_stream_request(
    ws_url: &str,
    host: &str,
    api_key: &str,
) -> Result<http::Request<()>, String> {
    http::Request::builder()
        .uri(ws_url)
        .header("Host", host)
        .header("Authorization", format!("Token {}", api_key))
        .header("Upgrade", "websocket")
        .header("Connection", "Upgrade")
        .header("Sec-WebSocket-Key", generate_ws_key())
        .header("Sec-WebSocket-Version", "13")
        .body(())
        .map_err(|e| e.to_string())
}

/// Generate a random WebSocket key
fn generate_ws_key() -> String {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let mut key = [0u8; 16];
    rng.fill(&mut key);
    base64::engine::general_purpose::STANDARD.encode(key)
}

/// Map a handshake failure to a transport error
fn classify_handshake_error(err: tokio_tungstenite::tungstenite::Error) -> TransportError {
    use tokio_tungstenite::tungstenite::Error as WsError;
    match err {
        WsError::Http(response) if matches!(response.status().as_u16(), 401 | 403) => {
            TransportError::AuthenticationFailed
        }
        other => TransportError::ConnectionFailed(other.to_string()),
    }
}

/// Spawn the send task that forwards audio frames and keepalives
fn spawn_send_task<S>(
    mut ws_sink: S,
    mut audio_rx: mpsc::Receiver<Vec<u8>>,
    mut close_rx: mpsc::Receiver<()>,
    is_open: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        debug!("Transport send task started");
        let mut chunks_sent = 0u64;
        let mut bytes_sent = 0u64;

        let mut keepalive = interval(Duration::from_secs(KEEPALIVE_INTERVAL_SECS));
        keepalive.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                _ = close_rx.recv() => {
                    // Flush whatever is still buffered before ending the stream
                    while let Ok(bytes) = audio_rx.try_recv() {
                        chunks_sent += 1;
                        bytes_sent += bytes.len() as u64;
                        if ws_sink.send(Message::Binary(bytes)).await.is_err() {
                            break;
                        }
                    }
                    if let Err(e) = send_control(&mut ws_sink, &ClientMessage::CloseStream).await {
                        warn!("Failed to send close-stream message: {}", e);
                    }
                    let _ = ws_sink.close().await;
                    break;
                }
                _ = keepalive.tick() => {
                    if let Err(e) = send_control(&mut ws_sink, &ClientMessage::KeepAlive).await {
                        warn!("Failed to send keepalive: {}", e);
                        is_open.store(false, Ordering::SeqCst);
                        break;
                    }
                    trace!("Sent keepalive");
                }
                chunk = audio_rx.recv() => match chunk {
                    Some(bytes) => {
                        chunks_sent += 1;
                        bytes_sent += bytes.len() as u64;
                        if chunks_sent == 1 || chunks_sent % 60 == 0 {
                            debug!("Sending audio chunk #{} ({} bytes)", chunks_sent, bytes.len());
                        }
                        if ws_sink.send(Message::Binary(bytes)).await.is_err() {
                            error!("Failed to send audio chunk");
                            is_open.store(false, Ordering::SeqCst);
                            break;
                        }
                    }
                    None => {
                        // All senders gone - finish the stream normally
                        if let Err(e) = send_control(&mut ws_sink, &ClientMessage::CloseStream).await {
                            warn!("Failed to send close-stream message: {}", e);
                        }
                        let _ = ws_sink.close().await;
                        break;
                    }
                }
            }
        }

        info!(
            "Transport send task exiting after {} chunks ({} bytes)",
            chunks_sent, bytes_sent
        );
    })
}

/// Send a JSON control message
async fn send_control<S>(ws_sink: &mut S, msg: &ClientMessage) -> Result<(), String>
where
    S: SinkExt<Message, Error = tokio_tungstenite::tungstenite::Error> + Unpin,
{
    let json = serde_json::to_string(msg).map_err(|e| e.to_string())?;
    ws_sink
        .send(Message::Text(json))
        .await
        .map_err(|e| e.to_string())
}

/// Spawn the receive task that turns service messages into stream events
///
/// Emits `Opened` first, then transcripts, and always ends with exactly one
/// terminal event: `Error` or `Closed`.
fn spawn_receive_task(
    mut ws_stream: impl StreamExt<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Unpin
        + Send
        + 'static,
    event_tx: broadcast::Sender<StreamEvent>,
    is_open: Arc<AtomicBool>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let _ = event_tx.send(StreamEvent::Opened);
        let mut terminal_sent = false;

        while let Some(msg_result) = ws_stream.next().await {
            match msg_result {
                Ok(Message::Text(text)) => {
                    trace!("Service message: {}", text);
                    match serde_json::from_str::<ServerMessage>(&text) {
                        Ok(msg) => {
                            if let Some(description) = msg.error_message() {
                                error!("Recognition service error: {}", description);
                                is_open.store(false, Ordering::SeqCst);
                                let _ = event_tx.send(StreamEvent::Error {
                                    message: description,
                                });
                                terminal_sent = true;
                                break;
                            }

                            if let Some((is_final, transcript)) = msg.to_transcript() {
                                if is_final {
                                    debug!("Final hypothesis: {}", transcript);
                                } else {
                                    trace!("Partial hypothesis: {}", transcript);
                                }
                                let _ = event_tx.send(StreamEvent::Transcript(TranscriptEvent {
                                    text: transcript,
                                    is_final,
                                }));
                                continue;
                            }

                            match msg {
                                ServerMessage::Metadata { request_id } => {
                                    debug!(?request_id, "Stream metadata");
                                }
                                ServerMessage::SpeechStarted => trace!("Speech started"),
                                ServerMessage::UtteranceEnd => debug!("Utterance end"),
                                _ => {}
                            }
                        }
                        Err(e) => {
                            warn!("Failed to parse service message: {} - {}", e, text);
                        }
                    }
                }
                Ok(Message::Close(frame)) => {
                    info!("Connection closed by service: {:?}", frame);
                    is_open.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(StreamEvent::Closed);
                    terminal_sent = true;
                    break;
                }
                Ok(Message::Ping(_)) => {
                    trace!("Received WebSocket ping");
                }
                Ok(Message::Pong(_)) => {
                    trace!("Received WebSocket pong");
                }
                Err(e) => {
                    error!("WebSocket receive error: {}", e);
                    is_open.store(false, Ordering::SeqCst);
                    let _ = event_tx.send(StreamEvent::Error {
                        message: e.to_string(),
                    });
                    terminal_sent = true;
                    break;
                }
                _ => {}
            }
        }

        is_open.store(false, Ordering::SeqCst);
        if !terminal_sent {
            let _ = event_tx.send(StreamEvent::Closed);
        }
        debug!("Transport receive task exiting");
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options() -> StreamOptions {
        StreamOptions {
            model: "nova-2".to_string(),
            language: "en-US".to_string(),
            smart_format: true,
            punctuation: false,
            paragraphs: false,
            utterances: false,
            filler_words: false,
            summarize: false,
            topic_detection: false,
            intent_detection: false,
            sentiment: false,
        }
    }

    #[test]
    fn test_build_stream_url() {
        let url = build_stream_url("wss://api.deepgram.com/v1/listen", &options()).unwrap();
        assert!(url.starts_with("wss://api.deepgram.com/v1/listen?"));
        assert!(url.contains("model=nova-2"));
        assert!(url.contains("language=en-US"));
        assert!(url.contains("smart_format=true"));
        assert!(url.contains("punctuation=false"));
        assert!(url.contains("interim_results=true"));
    }

    #[test]
    fn test_build_stream_url_rejects_invalid_endpoint() {
        assert!(build_stream_url("not a url", &options()).is_err());
    }

    #[test]
    fn test_build_stream_request_headers() {
        let url = build_stream_url("wss://api.deepgram.com/v1/listen", &options()).unwrap();
        let request = build_stream_request(&url, "api.deepgram.com", "secret-key").unwrap();
        assert_eq!(
            request.headers().get("Authorization").unwrap(),
            "Token secret-key"
        );
        assert_eq!(request.headers().get("Sec-WebSocket-Version").unwrap(), "13");
    }

    #[test]
    fn test_ws_key_is_16_random_bytes() {
        let key = generate_ws_key();
        let decoded = base64::engine::general_purpose::STANDARD
            .decode(key)
            .unwrap();
        assert_eq!(decoded.len(), 16);
    }
}
