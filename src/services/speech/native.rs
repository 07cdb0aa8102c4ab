//! OS speech engine through the `tts` crate (Speech Dispatcher, AVFoundation,
//! WinRT and friends).

use super::{
    EventSender, SpeechError, SpeechErrorKind, SpeechEvent, SpeechPlatform, Utterance,
    UtteranceId, Voice,
};
use log::{debug, warn};
use std::sync::{Arc, Mutex};
use tts::Tts;

struct InFlight {
    utterance: UtteranceId,
    events: EventSender,
}

pub struct NativeSpeech {
    tts: Tts,
    current: Arc<Mutex<Option<InFlight>>>,
}

impl NativeSpeech {
    pub fn new() -> Result<Self, SpeechError> {
        debug!("Creating native speech engine");
        let tts = Tts::default()
            .map_err(|e| SpeechError::Unsupported(format!("failed to initialize TTS: {}", e)))?;

        let current: Arc<Mutex<Option<InFlight>>> = Arc::new(Mutex::new(None));
        if tts.supported_features().utterance_callbacks {
            let ended = current.clone();
            tts.on_utterance_end(Some(Box::new(move |_| {
                Self::report(&ended, SpeechEvent::end);
            })))
            .map_err(|e| SpeechError::Platform(e.to_string()))?;

            let stopped = current.clone();
            tts.on_utterance_stop(Some(Box::new(move |_| {
                Self::report(&stopped, |id| {
                    SpeechEvent::error(id, SpeechErrorKind::Interrupted)
                });
            })))
            .map_err(|e| SpeechError::Platform(e.to_string()))?;
        } else {
            warn!("This speech engine does not report when an utterance ends");
        }

        Ok(Self { tts, current })
    }

    fn report(current: &Mutex<Option<InFlight>>, event: impl FnOnce(UtteranceId) -> SpeechEvent) {
        let Ok(mut guard) = current.lock() else {
            return;
        };
        if let Some(in_flight) = guard.take() {
            let _ = in_flight.events.send(event(in_flight.utterance));
        }
    }

    fn bind_voice(&mut self, voice: &Voice) -> Result<(), SpeechError> {
        let voices = self
            .tts
            .voices()
            .map_err(|e| SpeechError::Platform(format!("failed to list voices: {}", e)))?;
        let Some(found) = voices.iter().find(|v| v.id() == voice.voice_uri) else {
            return Err(SpeechError::VoiceNotFound(voice.voice_uri.clone()));
        };
        self.tts
            .set_voice(found)
            .map_err(|e| SpeechError::Platform(format!("failed to set voice: {}", e)))
    }
}

impl SpeechPlatform for NativeSpeech {
    fn voices(&self) -> Vec<Voice> {
        match self.tts.voices() {
            Ok(voices) => voices
                .into_iter()
                .map(|v| Voice {
                    name: v.name(),
                    lang: v.language().as_str().to_string(),
                    default: false,
                    voice_uri: v.id(),
                    local_service: true,
                })
                .collect(),
            Err(e) => {
                warn!("Failed to list voices: {}", e);
                Vec::new()
            }
        }
    }

    fn speak(&mut self, utterance: &Utterance, events: EventSender) -> Result<(), SpeechError> {
        if let Some(voice) = &utterance.voice {
            if self.tts.supported_features().voice {
                self.bind_voice(voice)?;
            }
        }

        if let Ok(mut guard) = self.current.lock() {
            *guard = Some(InFlight {
                utterance: utterance.id,
                events,
            });
        }

        debug!("Speaking utterance {:?}", utterance.id);
        self.tts
            .speak(utterance.text.as_str(), false)
            .map_err(|e| SpeechError::Synthesis(SpeechErrorKind::Other(e.to_string())))?;
        Ok(())
    }

    fn cancel(&mut self) {
        // Forget the utterance first so the stop callback has nobody to notify.
        if let Ok(mut guard) = self.current.lock() {
            guard.take();
        }
        if let Err(e) = self.tts.stop() {
            warn!("Failed to cancel speech: {}", e);
        }
    }

    fn pause(&mut self) -> Result<(), SpeechError> {
        Err(SpeechError::Unsupported(
            "pausing is not available with the native engine".to_string(),
        ))
    }

    fn resume(&mut self) -> Result<(), SpeechError> {
        Err(SpeechError::Unsupported(
            "resuming is not available with the native engine".to_string(),
        ))
    }

    fn supports_pause(&self) -> bool {
        false
    }

    fn is_speaking(&self) -> bool {
        self.tts.is_speaking().unwrap_or(false)
    }

    fn is_paused(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_native_speech() {
        // Needs a speech daemon; CI boxes usually have none.
        match NativeSpeech::new() {
            Ok(speech) => {
                assert!(!speech.is_paused());
                assert!(!speech.supports_pause());
                let _ = speech.voices();
            }
            Err(e) => println!("Native speech unavailable (expected in CI): {}", e),
        }
    }

    #[test]
    fn test_report_delivers_once() {
        let (tx, rx) = std::sync::mpsc::channel();
        let id = UtteranceId {
            session: 3,
            index: 0,
        };
        let current = Mutex::new(Some(InFlight {
            utterance: id,
            events: tx,
        }));
        NativeSpeech::report(&current, SpeechEvent::end);
        NativeSpeech::report(&current, SpeechEvent::end);
        let events: Vec<_> = rx.try_iter().collect();
        assert_eq!(events, vec![SpeechEvent::end(id)]);
    }
}
