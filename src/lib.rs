//! Parley - live voice negotiation channel for security consoles
//!
//! Streams the console microphone to a remote conversational model and plays
//! its spoken replies back without gaps, while keeping a speaker-tagged
//! transcript and live speaking/volume signals.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────┐  frames   ┌──────────────┐  chunks   ┌─────────────┐
//! │Microphone├──────────►│   Capture    ├──────────►│             │
//! └──────────┘           │ (codec, RMS) │           │             │   WebSocket
//!                        └──────────────┘           │ Negotiator  │◄────────────► remote model
//! ┌──────────┐  samples  ┌──────────────┐  buffers  │   (actor)   │
//! │ Speakers │◄──────────┤ Mixer/Sched. │◄──────────┤             │
//! └──────────┘           └──────────────┘           └──────┬──────┘
//!                                                          │ entries, signals
//!                                                          ▼
//!                                                        host UI
//! ```

pub mod config;
pub mod error;
pub mod negotiator;
pub mod persona;
pub mod transcript;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
pub use negotiator::{Negotiator, NegotiatorHandle, SessionState, SignalReceivers, Status};
pub use persona::Persona;
pub use transcript::{ConversationEntry, Speaker, Transcript};
pub use transport::{Connector, Inbound, LiveConnector, Session, SessionEvent, SessionSetup};
