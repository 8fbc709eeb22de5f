//! Negotiation session lifecycle
//!
//! [`Negotiator`] is the single owner of all session state: the transport
//! handle, both audio devices, the playback cursor, the transcript and the
//! observable signals. Its [`run`](Negotiator::run) loop handles one event at a
//! time (captured chunk, transport event, playback end, host command), so the
//! scheduling cursor is never touched concurrently.

use secrecy::{ExposeSecret, SecretString};
use tokio::sync::{mpsc, watch};

use crate::config::Config;
use crate::transcript::{ConversationEntry, Speaker, Transcript};
use crate::transport::{Connector, Inbound, LiveConnector, Session, SessionEvent};
use crate::voice::codec::{decode_pcm16, media_rate};
use crate::voice::{
    AudioBackend, CaptureDevice, CpalBackend, EncodedChunk, FragmentResampler, PlaybackEvent,
    PlaybackOutput, PlaybackScheduler,
};
use crate::{Error, Result};

/// Lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// No session
    Idle,
    /// Opening the session and acquiring devices
    Connecting,
    /// Live
    Connected,
    /// User-initiated teardown in progress
    Closing,
    /// Last attempt or session failed; reconnect is manual
    Error,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Connecting => write!(f, "connecting"),
            Self::Connected => write!(f, "connected"),
            Self::Closing => write!(f, "closing"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Snapshot of the observable state
#[derive(Debug, Clone, PartialEq)]
pub struct Status {
    pub state: SessionState,
    pub connected: bool,
    pub speaking: bool,
    /// Microphone level, roughly `0..=100`
    pub volume: f32,
    /// Text of the last failure, kept until the next connect
    pub last_error: Option<String>,
}

/// Receivers for the three live signals
#[derive(Debug, Clone)]
pub struct SignalReceivers {
    pub connected: watch::Receiver<bool>,
    pub speaking: watch::Receiver<bool>,
    pub volume: watch::Receiver<f32>,
}

struct Signals {
    connected: watch::Sender<bool>,
    speaking: watch::Sender<bool>,
    volume: watch::Sender<f32>,
}

impl Signals {
    fn new() -> Self {
        Self {
            connected: watch::channel(false).0,
            speaking: watch::channel(false).0,
            volume: watch::channel(0.0).0,
        }
    }

    fn reset(&self) {
        self.connected.send_replace(false);
        self.speaking.send_replace(false);
        self.volume.send_replace(0.0);
    }
}

/// Requests from other tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Tear the session down
    Disconnect,
}

/// Cloneable, `Send` handle for controlling a running negotiator
#[derive(Debug, Clone)]
pub struct NegotiatorHandle {
    commands: mpsc::UnboundedSender<Command>,
}

impl NegotiatorHandle {
    /// Ask the negotiator to disconnect; a no-op once it is gone
    pub fn disconnect(&self) {
        let _ = self.commands.send(Command::Disconnect);
    }
}

/// Resources held while connected
struct Live {
    session: Session,
    capture: Box<dyn CaptureDevice>,
    chunks: mpsc::UnboundedReceiver<EncodedChunk>,
    playback: Box<dyn PlaybackOutput>,
    playback_events: mpsc::UnboundedReceiver<PlaybackEvent>,
}

enum Event {
    Command(Command),
    Captured(EncodedChunk),
    Session(Option<SessionEvent>),
    Playback(PlaybackEvent),
}

/// Live voice negotiation channel
pub struct Negotiator {
    config: Config,
    connector: Box<dyn Connector>,
    audio: Box<dyn AudioBackend>,
    state: SessionState,
    last_error: Option<String>,
    signals: Signals,
    transcript: Transcript,
    scheduler: PlaybackScheduler,
    resampler: Option<FragmentResampler>,
    live: Option<Live>,
    commands_tx: mpsc::UnboundedSender<Command>,
    commands_rx: mpsc::UnboundedReceiver<Command>,
}

impl Negotiator {
    /// Create a negotiator with explicit transport and audio backends
    pub fn new(
        config: Config,
        connector: impl Connector + 'static,
        audio: impl AudioBackend + 'static,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();

        Self {
            config,
            connector: Box::new(connector),
            audio: Box::new(audio),
            state: SessionState::Idle,
            last_error: None,
            signals: Signals::new(),
            transcript: Transcript::new(),
            scheduler: PlaybackScheduler::new(),
            resampler: None,
            live: None,
            commands_tx,
            commands_rx,
        }
    }

    /// Create a negotiator using the live WebSocket transport and host audio
    #[must_use]
    pub fn with_defaults(config: Config) -> Self {
        Self::new(config, LiveConnector, CpalBackend)
    }

    /// Open the session and acquire the audio devices
    ///
    /// Calling this while already connected does nothing.
    ///
    /// # Errors
    ///
    /// - `Error::Config` if no credential is configured; nothing is touched
    /// - `Error::Transport` if the session cannot be opened
    /// - `Error::Device` / `Error::Permission` if an audio device is unavailable
    ///
    /// Every failure releases whatever was acquired and leaves the state at
    /// [`SessionState::Error`] with the message retained.
    pub async fn connect(&mut self) -> Result<()> {
        if self.live.is_some() {
            tracing::debug!("connect ignored, session already live");
            return Ok(());
        }

        let Some(credential) = self
            .config
            .credential()
            .map(|key| SecretString::from(key.expose_secret().to_string()))
        else {
            let err = Error::Config(
                "missing API key (set PARLEY_API_KEY or GEMINI_API_KEY)".to_string(),
            );
            self.state = SessionState::Error;
            self.last_error = Some(err.to_string());
            return Err(err);
        };

        self.state = SessionState::Connecting;
        self.last_error = None;

        let setup = self.config.session_setup();
        let mut session = match self.connector.open(&credential, &setup).await {
            Ok(session) => session,
            Err(e) => return Err(self.fail_connect(e)),
        };

        let (chunk_tx, chunks) = mpsc::unbounded_channel();
        let mut capture = match self.audio.open_capture(self.config.frame_size, chunk_tx) {
            Ok(capture) => capture,
            Err(e) => {
                session.close();
                return Err(self.fail_connect(e));
            }
        };

        let (events_tx, playback_events) = mpsc::unbounded_channel();
        let playback = match self.audio.open_playback(events_tx) {
            Ok(playback) => playback,
            Err(e) => {
                if let Err(stop) = capture.stop() {
                    tracing::warn!(error = %stop, "failed to release microphone");
                }
                session.close();
                return Err(self.fail_connect(e));
            }
        };

        self.live = Some(Live {
            session,
            capture,
            chunks,
            playback,
            playback_events,
        });
        self.state = SessionState::Connected;
        self.signals.connected.send_replace(true);

        tracing::info!(
            persona = %self.config.persona.name,
            voice = %self.config.voice,
            "negotiation connected"
        );
        Ok(())
    }

    /// Tear down the session
    ///
    /// Idempotent and infallible: safe before `connect`, after a failure, and
    /// repeatedly.
    pub fn disconnect(&mut self) {
        if self.live.is_some() {
            self.state = SessionState::Closing;
            tracing::info!("disconnecting");
        }
        self.cleanup();
        self.state = SessionState::Idle;
    }

    /// Process events until the session ends
    pub async fn run(&mut self) {
        while self.step().await {}
    }

    /// Process one event
    ///
    /// Returns `false` once there is no live session.
    pub async fn step(&mut self) -> bool {
        let event = {
            let Self {
                live, commands_rx, ..
            } = self;
            let Some(live) = live.as_mut() else {
                return false;
            };

            tokio::select! {
                biased;
                Some(command) = commands_rx.recv() => Event::Command(command),
                event = live.session.next_event() => Event::Session(event),
                Some(event) = live.playback_events.recv() => Event::Playback(event),
                Some(chunk) = live.chunks.recv() => Event::Captured(chunk),
            }
        };

        self.handle_event(event);
        self.live.is_some()
    }

    /// Current status snapshot
    #[must_use]
    pub fn status(&self) -> Status {
        Status {
            state: self.state,
            connected: *self.signals.connected.borrow(),
            speaking: *self.signals.speaking.borrow(),
            volume: *self.signals.volume.borrow(),
            last_error: self.last_error.clone(),
        }
    }

    /// Lifecycle state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Text of the last failure
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Subscribe to the live signals
    #[must_use]
    pub fn signals(&self) -> SignalReceivers {
        SignalReceivers {
            connected: self.signals.connected.subscribe(),
            speaking: self.signals.speaking.subscribe(),
            volume: self.signals.volume.subscribe(),
        }
    }

    /// Handle for requesting disconnect from another task
    #[must_use]
    pub fn handle(&self) -> NegotiatorHandle {
        NegotiatorHandle {
            commands: self.commands_tx.clone(),
        }
    }

    /// Register the transcript callback
    pub fn on_entry(&mut self, callback: impl FnMut(&ConversationEntry) + Send + 'static) {
        self.transcript.on_entry(Box::new(callback));
    }

    /// Conversation so far
    #[must_use]
    pub fn transcript(&self) -> &[ConversationEntry] {
        self.transcript.entries()
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Command(Command::Disconnect) => self.disconnect(),
            Event::Captured(chunk) => self.forward_chunk(chunk),
            Event::Playback(PlaybackEvent::Ended(id)) => {
                if self.scheduler.finish(id) {
                    self.signals.speaking.send_replace(false);
                }
            }
            Event::Session(Some(SessionEvent::Inbound(inbound))) => {
                for event in inbound {
                    self.handle_inbound(event);
                }
            }
            Event::Session(Some(SessionEvent::Malformed(reason))) => {
                tracing::warn!(reason = %reason, "dropping malformed server message");
            }
            Event::Session(Some(SessionEvent::Error(reason))) => {
                self.fail_session(Error::Transport(reason));
            }
            Event::Session(Some(SessionEvent::Closed { reason })) => {
                let message = reason.map_or_else(
                    || "session closed unexpectedly".to_string(),
                    |reason| format!("session closed unexpectedly: {reason}"),
                );
                self.fail_session(Error::Transport(message));
            }
            Event::Session(None) => {
                self.fail_session(Error::Transport("session ended".to_string()));
            }
        }
    }

    fn forward_chunk(&mut self, chunk: EncodedChunk) {
        self.signals.volume.send_replace(chunk.rms);

        let Some(live) = self.live.as_ref() else {
            return;
        };

        if let Err(e) = live.session.send_audio(chunk) {
            self.fail_session(e);
        }
    }

    fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::SetupComplete => tracing::debug!("session setup complete"),
            Inbound::Audio { data, mime_type } => self.enqueue_audio(&data, media_rate(&mime_type)),
            Inbound::Text(text) => {
                self.transcript.append(Speaker::Ai, &text);
                self.signals.speaking.send_replace(false);
            }
            Inbound::InputTranscript(fragment) => {
                self.transcript.push_fragment(Speaker::Intruder, &fragment);
            }
            Inbound::OutputTranscript(fragment) => {
                self.transcript.push_fragment(Speaker::Ai, &fragment);
            }
            Inbound::TurnComplete => {
                self.flush_resampler();
                self.transcript.flush();
            }
            Inbound::Interrupted => {
                tracing::debug!("model interrupted, stopping playback");
                self.stop_playback();
                self.transcript.flush();
            }
            Inbound::GoAway { time_left } => {
                tracing::warn!(time_left = ?time_left, "server will close the session soon");
            }
            Inbound::Unknown => tracing::trace!("ignoring unrecognized server message"),
        }
    }

    /// Decode one audio fragment and place it on the output timeline
    fn enqueue_audio(&mut self, data: &str, sample_rate: u32) {
        let audio = match decode_pcm16(data, sample_rate) {
            Ok(audio) => audio,
            Err(e) => {
                tracing::warn!(error = %e, "dropping audio fragment");
                return;
            }
        };

        if audio.samples.is_empty() {
            return;
        }

        let Some(output_rate) = self.live.as_ref().map(|live| live.playback.sample_rate()) else {
            return;
        };

        let samples = if output_rate == audio.sample_rate {
            self.flush_resampler();
            audio.samples
        } else {
            match self.resample_fragment(&audio.samples, audio.sample_rate, output_rate) {
                Ok(samples) => samples,
                Err(e) => {
                    tracing::warn!(error = %e, "dropping audio fragment");
                    return;
                }
            }
        };

        self.play(samples, output_rate);
    }

    /// Convert a fragment with the resampler kept for its rate pair
    fn resample_fragment(&mut self, samples: &[f32], from: u32, to: u32) -> Result<Vec<f32>> {
        let reusable = self
            .resampler
            .as_ref()
            .is_some_and(|r| r.from_rate() == from && r.to_rate() == to);

        if !reusable {
            self.flush_resampler();
            self.resampler = Some(FragmentResampler::new(from, to)?);
        }

        self.resampler
            .as_mut()
            .map_or_else(|| Ok(Vec::new()), |r| r.push(samples))
    }

    /// Play whatever the resampler is still holding
    fn flush_resampler(&mut self) {
        let Some(resampler) = self.resampler.as_mut() else {
            return;
        };

        let output_rate = resampler.to_rate();
        match resampler.flush() {
            Ok(tail) => self.play(tail, output_rate),
            Err(e) => {
                tracing::warn!(error = %e, "dropping resampler tail");
                self.resampler = None;
            }
        }
    }

    /// Schedule samples at the output rate right after the previous buffer
    #[allow(clippy::cast_precision_loss)]
    fn play(&mut self, samples: Vec<f32>, output_rate: u32) {
        if samples.is_empty() {
            return;
        }

        let Some(live) = self.live.as_mut() else {
            return;
        };
        let playback = &mut live.playback;

        let duration = samples.len() as f64 / f64::from(output_rate);
        let buffer = self.scheduler.schedule(playback.current_time(), duration);

        match playback.start(&buffer, samples) {
            Ok(actual_start) => {
                self.scheduler.settle(buffer.id, actual_start);
                self.signals.speaking.send_replace(true);
            }
            Err(e) => {
                tracing::warn!(error = %e, id = buffer.id, "failed to start playback buffer");
                if self.scheduler.finish(buffer.id) {
                    self.signals.speaking.send_replace(false);
                }
            }
        }
    }

    /// Stop every live buffer and rewind the cursor
    fn stop_playback(&mut self) {
        self.resampler = None;
        let ids = self.scheduler.drain();
        if let Some(live) = self.live.as_mut() {
            for id in ids {
                if let Err(e) = live.playback.stop(id) {
                    tracing::warn!(error = %e, id, "failed to stop playback buffer");
                }
            }
        }
        self.signals.speaking.send_replace(false);
    }

    /// Release everything, best-effort; each step runs even if an earlier one failed
    fn cleanup(&mut self) {
        self.stop_playback();
        self.transcript.flush();

        if let Some(mut live) = self.live.take() {
            if let Err(e) = live.playback.close() {
                tracing::warn!(error = %e, "failed to release output device");
            }
            if let Err(e) = live.capture.stop() {
                tracing::warn!(error = %e, "failed to release microphone");
            }
            live.session.close();
            tracing::debug!("session resources released");
        }

        self.signals.reset();
    }

    fn fail_connect(&mut self, err: Error) -> Error {
        tracing::error!(error = %err, "connect failed");
        self.cleanup();
        self.state = SessionState::Error;
        self.last_error = Some(err.to_string());
        err
    }

    fn fail_session(&mut self, err: Error) {
        tracing::error!(error = %err, "session failed");
        self.cleanup();
        self.state = SessionState::Error;
        self.last_error = Some(err.to_string());
    }
}

impl Drop for Negotiator {
    fn drop(&mut self) {
        self.cleanup();
    }
}
