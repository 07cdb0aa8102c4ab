//! Read-aloud support.
//!
//! [`SpeechController`] owns the single active playback session and talks to
//! the host speech engine through [`SpeechPlatform`]. Engines report progress
//! by sending [`SpeechEvent`]s on a channel handed to them per utterance; the
//! controller applies them in [`SpeechController::process_events`].

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::mpsc::Sender;

pub mod controller;
pub mod voices;

#[cfg(test)]
pub mod testing;

#[cfg(all(feature = "native-tts", not(target_arch = "wasm32")))]
pub mod native;
#[cfg(target_arch = "wasm32")]
pub mod web;

pub use controller::{EndCallback, ErrorCallback, QueueStatus, SpeechController};
pub use voices::VoiceDirectory;

/// A synthesis voice as exposed by the host platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Voice {
    pub name: String,
    pub lang: String,
    #[serde(default)]
    pub default: bool,
    #[serde(rename = "voiceURI")]
    pub voice_uri: String,
    /// Rendered on-device rather than by a network service.
    #[serde(default)]
    pub local_service: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct UtteranceId {
    pub session: u64,
    pub index: usize,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Utterance {
    pub id: UtteranceId,
    pub text: String,
    pub lang: String,
    pub voice: Option<Voice>,
}

/// Error codes reported by speech engines (the Web Speech API set).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpeechErrorKind {
    Canceled,
    Interrupted,
    AudioBusy,
    AudioHardware,
    Network,
    SynthesisUnavailable,
    SynthesisFailed,
    LanguageUnavailable,
    VoiceUnavailable,
    TextTooLong,
    InvalidArgument,
    NotAllowed,
    Other(String),
}

impl SpeechErrorKind {
    pub fn from_code(code: &str) -> Self {
        match code {
            "canceled" => SpeechErrorKind::Canceled,
            "interrupted" => SpeechErrorKind::Interrupted,
            "audio-busy" => SpeechErrorKind::AudioBusy,
            "audio-hardware" => SpeechErrorKind::AudioHardware,
            "network" => SpeechErrorKind::Network,
            "synthesis-unavailable" => SpeechErrorKind::SynthesisUnavailable,
            "synthesis-failed" => SpeechErrorKind::SynthesisFailed,
            "language-unavailable" => SpeechErrorKind::LanguageUnavailable,
            "voice-unavailable" => SpeechErrorKind::VoiceUnavailable,
            "text-too-long" => SpeechErrorKind::TextTooLong,
            "invalid-argument" => SpeechErrorKind::InvalidArgument,
            "not-allowed" => SpeechErrorKind::NotAllowed,
            other => SpeechErrorKind::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            SpeechErrorKind::Canceled => "canceled",
            SpeechErrorKind::Interrupted => "interrupted",
            SpeechErrorKind::AudioBusy => "audio-busy",
            SpeechErrorKind::AudioHardware => "audio-hardware",
            SpeechErrorKind::Network => "network",
            SpeechErrorKind::SynthesisUnavailable => "synthesis-unavailable",
            SpeechErrorKind::SynthesisFailed => "synthesis-failed",
            SpeechErrorKind::LanguageUnavailable => "language-unavailable",
            SpeechErrorKind::VoiceUnavailable => "voice-unavailable",
            SpeechErrorKind::TextTooLong => "text-too-long",
            SpeechErrorKind::InvalidArgument => "invalid-argument",
            SpeechErrorKind::NotAllowed => "not-allowed",
            SpeechErrorKind::Other(code) => code,
        }
    }

    /// Errors engines raise when playback is cut short by a cancel.
    pub fn is_cancellation(&self) -> bool {
        matches!(self, SpeechErrorKind::Canceled | SpeechErrorKind::Interrupted)
    }
}

impl fmt::Display for SpeechErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SpeechEventKind {
    End,
    Error(SpeechErrorKind),
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpeechEvent {
    pub utterance: UtteranceId,
    pub kind: SpeechEventKind,
}

impl SpeechEvent {
    pub fn end(utterance: UtteranceId) -> Self {
        Self {
            utterance,
            kind: SpeechEventKind::End,
        }
    }

    pub fn error(utterance: UtteranceId, kind: SpeechErrorKind) -> Self {
        Self {
            utterance,
            kind: SpeechEventKind::Error(kind),
        }
    }
}

pub type EventSender = Sender<SpeechEvent>;

#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum SpeechError {
    #[error("Speech synthesis is not supported: {0}")]
    Unsupported(String),
    #[error("Speech synthesis error: {0}")]
    Synthesis(SpeechErrorKind),
    #[error("Voice with URI \"{0}\" not found.")]
    VoiceNotFound(String),
    #[error("Speech engine error: {0}")]
    Platform(String),
}

/// The host speech engine.
///
/// `speak` queues one utterance; the engine reports its end or failure on
/// `events`. `cancel` stops everything the engine is playing.
pub trait SpeechPlatform {
    fn voices(&self) -> Vec<Voice>;
    fn speak(&mut self, utterance: &Utterance, events: EventSender) -> Result<(), SpeechError>;
    fn cancel(&mut self);
    fn pause(&mut self) -> Result<(), SpeechError>;
    fn resume(&mut self) -> Result<(), SpeechError>;
    /// Whether `pause` can ever succeed on this engine.
    fn supports_pause(&self) -> bool {
        true
    }
    fn is_speaking(&self) -> bool;
    fn is_paused(&self) -> bool;
}

impl<P: SpeechPlatform + ?Sized> SpeechPlatform for Box<P> {
    fn voices(&self) -> Vec<Voice> {
        (**self).voices()
    }
    fn speak(&mut self, utterance: &Utterance, events: EventSender) -> Result<(), SpeechError> {
        (**self).speak(utterance, events)
    }
    fn cancel(&mut self) {
        (**self).cancel()
    }
    fn pause(&mut self) -> Result<(), SpeechError> {
        (**self).pause()
    }
    fn resume(&mut self) -> Result<(), SpeechError> {
        (**self).resume()
    }
    fn supports_pause(&self) -> bool {
        (**self).supports_pause()
    }
    fn is_speaking(&self) -> bool {
        (**self).is_speaking()
    }
    fn is_paused(&self) -> bool {
        (**self).is_paused()
    }
}

/// The speech engine for this build.
pub fn create_platform() -> Result<Box<dyn SpeechPlatform>, SpeechError> {
    #[cfg(target_arch = "wasm32")]
    let platform = web::WebSpeech::new().map(|p| Box::new(p) as Box<dyn SpeechPlatform>);

    #[cfg(all(feature = "native-tts", not(target_arch = "wasm32")))]
    let platform = native::NativeSpeech::new().map(|p| Box::new(p) as Box<dyn SpeechPlatform>);

    #[cfg(all(not(feature = "native-tts"), not(target_arch = "wasm32")))]
    let platform = Err(SpeechError::Unsupported(
        "this build has no speech engine (rebuild with the `native-tts` feature)".to_string(),
    ));

    platform
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_roundtrip() {
        for code in ["canceled", "interrupted", "audio-busy", "network", "not-allowed", "weird"] {
            assert_eq!(SpeechErrorKind::from_code(code).as_str(), code);
        }
        assert!(SpeechErrorKind::Interrupted.is_cancellation());
        assert!(SpeechErrorKind::Canceled.is_cancellation());
        assert!(!SpeechErrorKind::Network.is_cancellation());
    }

    #[test]
    fn test_error_messages() {
        let err = SpeechError::Synthesis(SpeechErrorKind::AudioBusy);
        assert_eq!(err.to_string(), "Speech synthesis error: audio-busy");
    }

    #[test]
    fn test_voice_json_shape() {
        let voice = Voice {
            name: "Samantha".to_string(),
            lang: "en-US".to_string(),
            default: true,
            voice_uri: "com.apple.samantha".to_string(),
            local_service: true,
        };
        let value = serde_json::to_value(&voice).unwrap();
        assert_eq!(value["voiceURI"], "com.apple.samantha");
    }
}
