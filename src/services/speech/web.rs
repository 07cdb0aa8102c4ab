//! Browser speech engine (`window.speechSynthesis`).

use super::{
    EventSender, SpeechError, SpeechErrorKind, SpeechEvent, SpeechPlatform, Utterance, Voice,
};
use log::{debug, warn};
use wasm_bindgen::closure::Closure;
use wasm_bindgen::JsCast;
use web_sys::{
    SpeechSynthesis, SpeechSynthesisErrorCode, SpeechSynthesisErrorEvent, SpeechSynthesisEvent,
    SpeechSynthesisUtterance, SpeechSynthesisVoice,
};

/// A queued utterance plus the JS handlers that must outlive it.
struct Pending {
    utterance: SpeechSynthesisUtterance,
    _on_end: Closure<dyn FnMut(SpeechSynthesisEvent)>,
    _on_error: Closure<dyn FnMut(SpeechSynthesisErrorEvent)>,
}

impl Pending {
    fn detach(&self) {
        self.utterance.set_onend(None);
        self.utterance.set_onerror(None);
    }
}

pub struct WebSpeech {
    synth: SpeechSynthesis,
    pending: Vec<Pending>,
    voices_changed: Option<Closure<dyn FnMut()>>,
}

fn error_kind(code: SpeechSynthesisErrorCode) -> SpeechErrorKind {
    match code {
        SpeechSynthesisErrorCode::Canceled => SpeechErrorKind::Canceled,
        SpeechSynthesisErrorCode::Interrupted => SpeechErrorKind::Interrupted,
        SpeechSynthesisErrorCode::AudioBusy => SpeechErrorKind::AudioBusy,
        SpeechSynthesisErrorCode::AudioHardware => SpeechErrorKind::AudioHardware,
        SpeechSynthesisErrorCode::Network => SpeechErrorKind::Network,
        SpeechSynthesisErrorCode::SynthesisUnavailable => SpeechErrorKind::SynthesisUnavailable,
        SpeechSynthesisErrorCode::SynthesisFailed => SpeechErrorKind::SynthesisFailed,
        SpeechSynthesisErrorCode::LanguageUnavailable => SpeechErrorKind::LanguageUnavailable,
        SpeechSynthesisErrorCode::VoiceUnavailable => SpeechErrorKind::VoiceUnavailable,
        SpeechSynthesisErrorCode::TextTooLong => SpeechErrorKind::TextTooLong,
        SpeechSynthesisErrorCode::InvalidArgument => SpeechErrorKind::InvalidArgument,
        SpeechSynthesisErrorCode::NotAllowed => SpeechErrorKind::NotAllowed,
        other => SpeechErrorKind::Other(format!("{:?}", other)),
    }
}

impl WebSpeech {
    pub fn new() -> Result<Self, SpeechError> {
        let window = web_sys::window()
            .ok_or_else(|| SpeechError::Unsupported("no browser window".to_string()))?;
        let synth = window.speech_synthesis().map_err(|_| {
            SpeechError::Unsupported("this browser does not support speech synthesis".to_string())
        })?;
        Ok(Self {
            synth,
            pending: Vec::new(),
            voices_changed: None,
        })
    }

    /// Browsers load voices lazily and fire `voiceschanged` when ready.
    pub fn on_voices_changed(&mut self, callback: impl FnMut() + 'static) {
        let closure = Closure::<dyn FnMut()>::new(callback);
        self.synth
            .set_onvoiceschanged(Some(closure.as_ref().unchecked_ref()));
        self.voices_changed = Some(closure);
    }

    fn js_voice(&self, voice_uri: &str) -> Option<SpeechSynthesisVoice> {
        self.synth
            .get_voices()
            .iter()
            .filter_map(|v| v.dyn_into::<SpeechSynthesisVoice>().ok())
            .find(|v| v.voice_uri() == voice_uri)
    }

    fn release_pending(&mut self) {
        for pending in self.pending.drain(..) {
            pending.detach();
        }
    }
}

impl SpeechPlatform for WebSpeech {
    fn voices(&self) -> Vec<Voice> {
        self.synth
            .get_voices()
            .iter()
            .filter_map(|v| v.dyn_into::<SpeechSynthesisVoice>().ok())
            .map(|v| Voice {
                name: v.name(),
                lang: v.lang(),
                default: v.default(),
                voice_uri: v.voice_uri(),
                local_service: v.local_service(),
            })
            .collect()
    }

    fn speak(&mut self, utterance: &Utterance, events: EventSender) -> Result<(), SpeechError> {
        let js_utterance = SpeechSynthesisUtterance::new_with_text(&utterance.text)
            .map_err(|e| SpeechError::Platform(format!("{:?}", e)))?;
        js_utterance.set_lang(&utterance.lang);
        if let Some(voice) = &utterance.voice {
            match self.js_voice(&voice.voice_uri) {
                Some(js_voice) => js_utterance.set_voice(Some(&js_voice)),
                None => warn!("Voice {} vanished from the browser catalog", voice.voice_uri),
            }
        }

        let id = utterance.id;
        let end_sender = events.clone();
        let on_end = Closure::<dyn FnMut(SpeechSynthesisEvent)>::new(move |_| {
            let _ = end_sender.send(SpeechEvent::end(id));
        });
        let on_error = Closure::<dyn FnMut(SpeechSynthesisErrorEvent)>::new(
            move |event: SpeechSynthesisErrorEvent| {
                let _ = events.send(SpeechEvent::error(id, error_kind(event.error())));
            },
        );
        js_utterance.set_onend(Some(on_end.as_ref().unchecked_ref()));
        js_utterance.set_onerror(Some(on_error.as_ref().unchecked_ref()));

        debug!("Queueing utterance {:?} ({})", id, utterance.lang);
        self.synth.speak(&js_utterance);
        self.pending.push(Pending {
            utterance: js_utterance,
            _on_end: on_end,
            _on_error: on_error,
        });
        Ok(())
    }

    fn cancel(&mut self) {
        self.release_pending();
        self.synth.cancel();
    }

    fn pause(&mut self) -> Result<(), SpeechError> {
        self.synth.pause();
        Ok(())
    }

    fn resume(&mut self) -> Result<(), SpeechError> {
        self.synth.resume();
        Ok(())
    }

    fn is_speaking(&self) -> bool {
        self.synth.speaking()
    }

    fn is_paused(&self) -> bool {
        self.synth.paused()
    }
}

impl Drop for WebSpeech {
    fn drop(&mut self) {
        self.synth.set_onvoiceschanged(None);
        self.release_pending();
    }
}
