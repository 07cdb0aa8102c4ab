//! In-memory speech engine shared by the controller and CLI tests.

use super::{
    EventSender, SpeechError, SpeechErrorKind, SpeechEvent, SpeechEventKind, SpeechPlatform,
    Utterance, UtteranceId, Voice,
};
use std::time::Duration;

#[derive(Default)]
pub struct FakePlatform {
    pub catalog: Vec<Voice>,
    pub spoken: Vec<Utterance>,
    pub in_flight: Vec<(UtteranceId, EventSender)>,
    pub cancels: usize,
    pub pausable: bool,
    pub paused: bool,
    pub reject: bool,
    /// Reports not speaking until audio would have started, like
    /// speech-dispatcher before its begin callback.
    pub slow_start: bool,
    /// Answers every utterance with this event after the delay, from
    /// another thread unless the delay is zero.
    pub reply: Option<(Duration, SpeechEventKind)>,
}

pub fn voice(uri: &str, lang: &str, local: bool) -> Voice {
    Voice {
        name: uri.to_string(),
        lang: lang.to_string(),
        default: false,
        voice_uri: uri.to_string(),
        local_service: local,
    }
}

impl FakePlatform {
    pub fn with_voices() -> Self {
        Self {
            catalog: vec![
                voice("local-en", "en-US", true),
                voice("remote-es", "es-ES", false),
                voice("local-es", "es-MX", true),
            ],
            ..Default::default()
        }
    }

    pub fn replying(mut self, after: Duration, kind: SpeechEventKind) -> Self {
        self.reply = Some((after, kind));
        self
    }

    pub fn finish(&mut self) {
        let (id, sender) = self.in_flight.remove(0);
        let _ = sender.send(SpeechEvent::end(id));
    }

    pub fn fail(&mut self, kind: SpeechErrorKind) {
        let (id, sender) = self.in_flight.remove(0);
        let _ = sender.send(SpeechEvent::error(id, kind));
    }
}

impl SpeechPlatform for FakePlatform {
    fn voices(&self) -> Vec<Voice> {
        self.catalog.clone()
    }

    fn speak(&mut self, utterance: &Utterance, events: EventSender) -> Result<(), SpeechError> {
        if self.reject {
            return Err(SpeechError::Platform("engine offline".to_string()));
        }
        self.spoken.push(utterance.clone());

        match self.reply.clone() {
            Some((after, kind)) if after.is_zero() => {
                let _ = events.send(SpeechEvent {
                    utterance: utterance.id,
                    kind,
                });
            }
            Some((after, kind)) => {
                let id = utterance.id;
                std::thread::spawn(move || {
                    std::thread::sleep(after);
                    let _ = events.send(SpeechEvent {
                        utterance: id,
                        kind,
                    });
                });
            }
            None => self.in_flight.push((utterance.id, events)),
        }
        Ok(())
    }

    fn cancel(&mut self) {
        self.cancels += 1;
        self.paused = false;
        for (id, sender) in self.in_flight.drain(..) {
            let _ = sender.send(SpeechEvent::error(id, SpeechErrorKind::Interrupted));
        }
    }

    fn pause(&mut self) -> Result<(), SpeechError> {
        if !self.pausable {
            return Err(SpeechError::Unsupported("pause".to_string()));
        }
        self.paused = true;
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SpeechError> {
        if !self.pausable {
            return Err(SpeechError::Unsupported("resume".to_string()));
        }
        self.paused = false;
        Ok(())
    }

    fn supports_pause(&self) -> bool {
        self.pausable
    }

    fn is_speaking(&self) -> bool {
        !self.slow_start && !self.in_flight.is_empty()
    }

    fn is_paused(&self) -> bool {
        self.paused
    }
}
