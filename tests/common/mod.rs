//! Shared test utilities
//!
//! In-memory stand-ins for the remote session and the host audio devices, so
//! the negotiator can be driven event by event without network or hardware.

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use parley::transport::SessionPeer;
use parley::voice::{
    AudioBackend, BufferId, CaptureDevice, EncodedChunk, PlaybackEvent, PlaybackOutput,
    ScheduledBuffer, encode_pcm16,
};
use parley::{Config, Connector, Error, Inbound, Result, Session, SessionEvent, SessionSetup};
use secrecy::SecretString;
use tokio::sync::mpsc;

/// Configuration with a usable credential
#[must_use]
pub fn config_with_key() -> Config {
    Config {
        api_key: Some(SecretString::from("test-key".to_string())),
        ..Config::default()
    }
}

/// Configuration without a credential
#[must_use]
pub fn config_without_key() -> Config {
    Config::default()
}

/// Captured chunk with the given level
#[must_use]
pub fn chunk(rms: f32) -> EncodedChunk {
    EncodedChunk {
        data: encode_pcm16(&[0.25; 16]),
        mime_type: "audio/pcm;rate=16000".to_string(),
        rms,
    }
}

/// Inbound audio fragment of `samples` constant-level samples at 24 kHz
#[must_use]
pub fn audio_fragment(samples: usize) -> Inbound {
    Inbound::Audio {
        data: encode_pcm16(&vec![0.1; samples]),
        mime_type: "audio/pcm;rate=24000".to_string(),
    }
}

#[derive(Default)]
struct ConnectorState {
    peer: Option<SessionPeer>,
    opens: usize,
    last_setup: Option<SessionSetup>,
    fail: bool,
}

/// Connector that hands out in-memory sessions
#[derive(Clone, Default)]
pub struct FakeConnector {
    state: Arc<Mutex<ConnectorState>>,
}

impl FakeConnector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every later `open` fail with a transport error
    pub fn fail_opens(&self) {
        self.state.lock().unwrap().fail = true;
    }

    /// Remote half of the most recently opened session
    pub fn take_peer(&self) -> SessionPeer {
        self.state
            .lock()
            .unwrap()
            .peer
            .take()
            .expect("no session opened")
    }

    #[must_use]
    pub fn opens(&self) -> usize {
        self.state.lock().unwrap().opens
    }

    #[must_use]
    pub fn last_setup(&self) -> Option<SessionSetup> {
        self.state.lock().unwrap().last_setup.clone()
    }
}

#[async_trait]
impl Connector for FakeConnector {
    async fn open(&self, _credential: &SecretString, setup: &SessionSetup) -> Result<Session> {
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        state.last_setup = Some(setup.clone());

        if state.fail {
            return Err(Error::Transport("connection refused".to_string()));
        }

        let (session, peer) = Session::pair();
        state.peer = Some(peer);
        Ok(session)
    }
}

struct AudioState {
    capture_sink: Option<mpsc::UnboundedSender<EncodedChunk>>,
    playback_events: Option<mpsc::UnboundedSender<PlaybackEvent>>,
    clock: f64,
    output_rate: u32,
    render_lag: f64,
    started: Vec<(ScheduledBuffer, usize)>,
    placed: Vec<(ScheduledBuffer, Vec<f32>)>,
    stopped: Vec<BufferId>,
    capture_opens: usize,
    capture_stops: usize,
    playback_opens: usize,
    playback_closes: usize,
    deny_microphone: bool,
}

/// Audio backend with a manual clock that records every buffer it is given
#[derive(Clone)]
pub struct FakeAudio {
    state: Arc<Mutex<AudioState>>,
}

impl Default for FakeAudio {
    fn default() -> Self {
        Self {
            state: Arc::new(Mutex::new(AudioState {
                capture_sink: None,
                playback_events: None,
                clock: 0.0,
                output_rate: 24000,
                render_lag: 0.0,
                started: Vec::new(),
                placed: Vec::new(),
                stopped: Vec::new(),
                capture_opens: 0,
                capture_stops: 0,
                playback_opens: 0,
                playback_closes: 0,
                deny_microphone: false,
            })),
        }
    }
}

impl FakeAudio {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the microphone refuse access
    pub fn deny_microphone(&self) {
        self.state.lock().unwrap().deny_microphone = true;
    }

    /// Set the output clock, in seconds
    pub fn set_clock(&self, seconds: f64) {
        self.state.lock().unwrap().clock = seconds;
    }

    /// Set the output device rate
    pub fn set_output_rate(&self, rate: u32) {
        self.state.lock().unwrap().output_rate = rate;
    }

    /// Advance the clock by `seconds` each time a buffer is handed over, as a
    /// running output would between scheduling and placement
    pub fn set_render_lag(&self, seconds: f64) {
        self.state.lock().unwrap().render_lag = seconds;
    }

    /// Deliver a chunk as if the microphone had produced it
    pub fn capture(&self, chunk: EncodedChunk) {
        let state = self.state.lock().unwrap();
        state
            .capture_sink
            .as_ref()
            .expect("microphone not open")
            .send(chunk)
            .expect("capture receiver dropped");
    }

    /// Report that a buffer finished playing
    pub fn end_buffer(&self, id: BufferId) {
        let state = self.state.lock().unwrap();
        state
            .playback_events
            .as_ref()
            .expect("output not open")
            .send(PlaybackEvent::Ended(id))
            .expect("playback receiver dropped");
    }

    /// Buffers started so far with their sample counts
    #[must_use]
    pub fn started(&self) -> Vec<(ScheduledBuffer, usize)> {
        self.state.lock().unwrap().started.clone()
    }

    /// Buffers as actually placed on the timeline, with their samples
    #[must_use]
    pub fn placed(&self) -> Vec<(ScheduledBuffer, Vec<f32>)> {
        self.state.lock().unwrap().placed.clone()
    }

    #[must_use]
    pub fn stopped(&self) -> Vec<BufferId> {
        self.state.lock().unwrap().stopped.clone()
    }

    #[must_use]
    pub fn capture_opens(&self) -> usize {
        self.state.lock().unwrap().capture_opens
    }

    #[must_use]
    pub fn capture_stops(&self) -> usize {
        self.state.lock().unwrap().capture_stops
    }

    #[must_use]
    pub fn playback_opens(&self) -> usize {
        self.state.lock().unwrap().playback_opens
    }

    #[must_use]
    pub fn playback_closes(&self) -> usize {
        self.state.lock().unwrap().playback_closes
    }
}

impl AudioBackend for FakeAudio {
    fn open_capture(
        &self,
        _frame_size: usize,
        sink: mpsc::UnboundedSender<EncodedChunk>,
    ) -> Result<Box<dyn CaptureDevice>> {
        let mut state = self.state.lock().unwrap();
        if state.deny_microphone {
            return Err(Error::Permission("microphone access denied".to_string()));
        }

        state.capture_opens += 1;
        state.capture_sink = Some(sink);
        Ok(Box::new(FakeCapture {
            state: Arc::clone(&self.state),
        }))
    }

    fn open_playback(
        &self,
        events: mpsc::UnboundedSender<PlaybackEvent>,
    ) -> Result<Box<dyn PlaybackOutput>> {
        let mut state = self.state.lock().unwrap();
        state.playback_opens += 1;
        state.playback_events = Some(events);
        Ok(Box::new(FakePlayback {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeCapture {
    state: Arc<Mutex<AudioState>>,
}

impl CaptureDevice for FakeCapture {
    fn stop(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.capture_stops += 1;
        state.capture_sink = None;
        Ok(())
    }
}

struct FakePlayback {
    state: Arc<Mutex<AudioState>>,
}

impl PlaybackOutput for FakePlayback {
    fn sample_rate(&self) -> u32 {
        self.state.lock().unwrap().output_rate
    }

    fn current_time(&self) -> f64 {
        self.state.lock().unwrap().clock
    }

    fn start(&mut self, buffer: &ScheduledBuffer, samples: Vec<f32>) -> Result<f64> {
        let mut state = self.state.lock().unwrap();
        state.clock += state.render_lag;

        let actual = ScheduledBuffer {
            start: buffer.start.max(state.clock),
            ..*buffer
        };
        state.started.push((*buffer, samples.len()));
        state.placed.push((actual, samples));
        Ok(actual.start)
    }

    fn stop(&mut self, id: BufferId) -> Result<()> {
        self.state.lock().unwrap().stopped.push(id);
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.playback_closes += 1;
        state.playback_events = None;
        Ok(())
    }
}

/// Push one server event into the session
pub fn send(peer: &SessionPeer, event: SessionEvent) {
    peer.events.send(event).expect("negotiator dropped the session");
}
