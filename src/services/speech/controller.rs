use super::{
    EventSender, SpeechError, SpeechEvent, SpeechEventKind, SpeechPlatform, Utterance, UtteranceId,
    Voice, VoiceDirectory,
};
use crate::core::language::to_locale_tag;
use log::{debug, info, warn};
use std::sync::mpsc::{channel, Receiver};

pub type EndCallback = Box<dyn FnOnce()>;
pub type ErrorCallback = Box<dyn FnOnce(SpeechError)>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueStatus {
    Idle,
    Playing,
    Paused,
}

/// One `speak` call. Exists only while playing or paused; dropping it drops
/// the event subscription and both callbacks.
struct SpeechSession {
    id: u64,
    segments: Vec<Utterance>,
    cursor: usize,
    status: QueueStatus,
    events: Receiver<SpeechEvent>,
    sender: EventSender,
    on_end: Option<EndCallback>,
    on_error: Option<ErrorCallback>,
}

struct Preview {
    id: u64,
    events: Receiver<SpeechEvent>,
    on_error: Option<ErrorCallback>,
}

/// Single owner of read-aloud playback.
///
/// Callbacks only ever fire from [`speak`](Self::speak), [`test`](Self::test)
/// or [`process_events`](Self::process_events), never from inside the engine.
pub struct SpeechController<P: SpeechPlatform> {
    platform: P,
    voices: VoiceDirectory,
    session: Option<SpeechSession>,
    preview: Option<Preview>,
    next_session: u64,
}

impl<P: SpeechPlatform> SpeechController<P> {
    pub fn new(platform: P) -> Self {
        let mut voices = VoiceDirectory::new();
        voices.refresh(platform.voices());
        Self {
            platform,
            voices,
            session: None,
            preview: None,
            next_session: 1,
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn platform_mut(&mut self) -> &mut P {
        &mut self.platform
    }

    pub fn status(&self) -> QueueStatus {
        self.session
            .as_ref()
            .map(|s| s.status)
            .unwrap_or(QueueStatus::Idle)
    }

    pub fn is_speaking(&self) -> bool {
        self.platform.is_speaking() && !self.platform.is_paused()
    }

    pub fn is_paused(&self) -> bool {
        self.status() == QueueStatus::Paused || self.platform.is_paused()
    }

    /// A voice sample from [`test`](Self::test) has not ended or failed yet.
    pub fn is_previewing(&self) -> bool {
        self.preview.is_some()
    }

    pub fn can_pause(&self) -> bool {
        self.platform.supports_pause()
    }

    /// Current catalog, pulled from the engine if the cache is stale.
    pub fn voices(&mut self) -> &[Voice] {
        self.voices.sync(self.platform.voices());
        self.voices.list()
    }

    pub fn notify_voices_changed(&mut self) {
        self.voices.refresh(self.platform.voices());
    }

    pub fn find_voice(&mut self, voice_uri: &str) -> Option<Voice> {
        if self.voices.find(voice_uri).is_none() {
            self.voices.sync(self.platform.voices());
        }
        self.voices.find(voice_uri).cloned()
    }

    fn allocate_session(&mut self) -> u64 {
        let id = self.next_session;
        self.next_session += 1;
        id
    }

    /// Reads `text` aloud in `language`, replacing whatever is playing.
    pub fn speak(
        &mut self,
        text: &str,
        language: &str,
        on_end: EndCallback,
        on_error: ErrorCallback,
        voice_uri: Option<&str>,
    ) {
        self.stop();

        let locale = to_locale_tag(language);
        if self.voices.is_empty() {
            self.voices.refresh(self.platform.voices());
        }

        if text.trim().is_empty() {
            debug!("Nothing to read aloud");
            on_end();
            return;
        }

        let voice = self.voices.select(&locale, voice_uri).cloned();
        match &voice {
            Some(v) => debug!("Speaking {} chars in {} with {}", text.len(), locale, v.name),
            None => debug!("Speaking {} chars in {} with the default voice", text.len(), locale),
        }

        let id = self.allocate_session();
        let segment = Utterance {
            id: UtteranceId {
                session: id,
                index: 0,
            },
            text: text.to_string(),
            lang: locale,
            voice,
        };

        let (sender, events) = channel();
        if let Err(err) = self.platform.speak(&segment, sender.clone()) {
            warn!("Speech engine rejected the utterance: {}", err);
            on_error(err);
            return;
        }

        self.session = Some(SpeechSession {
            id,
            segments: vec![segment],
            cursor: 0,
            status: QueueStatus::Playing,
            events,
            sender,
            on_end: Some(on_end),
            on_error: Some(on_error),
        });
    }

    pub fn pause(&mut self) {
        if self.status() != QueueStatus::Playing {
            return;
        }
        match self.platform.pause() {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.status = QueueStatus::Paused;
                }
            }
            Err(err) => warn!("Could not pause speech: {}", err),
        }
    }

    pub fn resume(&mut self) {
        if self.status() != QueueStatus::Paused {
            return;
        }
        match self.platform.resume() {
            Ok(()) => {
                if let Some(session) = self.session.as_mut() {
                    session.status = QueueStatus::Playing;
                }
            }
            Err(err) => warn!("Could not resume speech: {}", err),
        }
    }

    /// Halts all playback. Late engine events for the dropped session or
    /// preview are never delivered.
    pub fn stop(&mut self) {
        let had_session = self.session.take().is_some();
        let had_preview = self.preview.take().is_some();
        if had_session || had_preview || self.platform.is_speaking() {
            debug!("Cancelling speech");
        }
        self.platform.cancel();
    }

    /// Plays a short sample with one specific voice, outside the main queue.
    pub fn test(&mut self, voice_uri: &str, text: &str, language: &str, on_error: ErrorCallback) {
        self.stop();

        let Some(voice) = self.find_voice(voice_uri) else {
            warn!("Voice {:?} not found for preview", voice_uri);
            on_error(SpeechError::VoiceNotFound(voice_uri.to_string()));
            return;
        };

        let id = self.allocate_session();
        let utterance = Utterance {
            id: UtteranceId {
                session: id,
                index: 0,
            },
            text: text.to_string(),
            lang: to_locale_tag(language),
            voice: Some(voice),
        };

        let (sender, events) = channel();
        if let Err(err) = self.platform.speak(&utterance, sender) {
            on_error(err);
            return;
        }
        self.preview = Some(Preview {
            id,
            events,
            on_error: Some(on_error),
        });
    }

    /// Applies everything the engine reported since the last call.
    pub fn process_events(&mut self) {
        self.drain_preview();

        let pending: Vec<SpeechEvent> = match &self.session {
            Some(session) => session.events.try_iter().collect(),
            None => return,
        };
        for event in pending {
            self.apply(event);
        }
    }

    fn drain_preview(&mut self) {
        let Some(preview) = self.preview.as_mut() else {
            return;
        };
        let pending: Vec<SpeechEvent> = preview.events.try_iter().collect();
        for event in pending {
            if event.utterance.session != preview.id {
                continue;
            }
            match event.kind {
                SpeechEventKind::End => {}
                SpeechEventKind::Error(kind) if kind.is_cancellation() => {
                    info!("Voice preview {}", kind);
                }
                SpeechEventKind::Error(kind) => {
                    if let Some(on_error) = preview.on_error.take() {
                        on_error(SpeechError::Synthesis(kind));
                    }
                }
            }
            self.preview = None;
            return;
        }
    }

    fn apply(&mut self, event: SpeechEvent) {
        let Some(session) = self.session.as_mut() else {
            match &event.kind {
                SpeechEventKind::Error(kind) if kind.is_cancellation() => {
                    info!("Speech {} after playback ended", kind)
                }
                _ => debug!("Ignoring event for finished utterance {:?}", event.utterance),
            }
            return;
        };

        if event.utterance.session != session.id || event.utterance.index != session.cursor {
            debug!("Ignoring stale speech event {:?}", event.utterance);
            return;
        }

        match event.kind {
            SpeechEventKind::End => {
                session.cursor += 1;
                let next = session.segments.get(session.cursor).cloned();
                let sender = session.sender.clone();
                match next {
                    Some(segment) => {
                        if let Err(err) = self.platform.speak(&segment, sender) {
                            self.fail(err);
                        }
                    }
                    None => {
                        if let Some(mut finished) = self.session.take() {
                            debug!("Finished reading aloud");
                            if let Some(on_end) = finished.on_end.take() {
                                on_end();
                            }
                        }
                    }
                }
            }
            SpeechEventKind::Error(kind) => self.fail(SpeechError::Synthesis(kind)),
        }
    }

    fn fail(&mut self, err: SpeechError) {
        if let Some(mut failed) = self.session.take() {
            warn!("Speech playback failed: {}", err);
            if let Some(on_error) = failed.on_error.take() {
                on_error(err);
            }
        }
    }
}

impl<P: SpeechPlatform> Drop for SpeechController<P> {
    fn drop(&mut self) {
        if self.session.is_some() || self.preview.is_some() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::speech::testing::FakePlatform;
    use crate::services::speech::SpeechErrorKind;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    #[derive(Clone, Default)]
    struct Calls {
        ends: Rc<Cell<usize>>,
        errors: Rc<RefCell<Vec<SpeechError>>>,
    }

    impl Calls {
        fn on_end(&self) -> EndCallback {
            let ends = self.ends.clone();
            Box::new(move || ends.set(ends.get() + 1))
        }

        fn on_error(&self) -> ErrorCallback {
            let errors = self.errors.clone();
            Box::new(move |err| errors.borrow_mut().push(err))
        }

        fn ends(&self) -> usize {
            self.ends.get()
        }

        fn errors(&self) -> Vec<SpeechError> {
            self.errors.borrow().clone()
        }
    }

    fn controller() -> SpeechController<FakePlatform> {
        SpeechController::new(FakePlatform::with_voices())
    }

    #[test]
    fn test_speak_then_end() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.speak("Plants eat light.", "English", calls.on_end(), calls.on_error(), None);
        assert_eq!(speech.status(), QueueStatus::Playing);

        let spoken = &speech.platform().spoken[0];
        assert_eq!(spoken.lang, "en-US");
        assert_eq!(spoken.voice.as_ref().unwrap().voice_uri, "local-en");

        speech.platform_mut().finish();
        speech.process_events();
        assert_eq!(calls.ends(), 1);
        assert!(calls.errors().is_empty());
        assert_eq!(speech.status(), QueueStatus::Idle);
    }

    #[test]
    fn test_local_voice_preferred() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.speak("Hola", "Spanish", calls.on_end(), calls.on_error(), None);
        let spoken = &speech.platform().spoken[0];
        assert_eq!(spoken.lang, "es-ES");
        assert_eq!(spoken.voice.as_ref().unwrap().voice_uri, "local-es");
    }

    #[test]
    fn test_explicit_voice_uri() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.speak("Hola", "Spanish", calls.on_end(), calls.on_error(), Some("remote-es"));
        let spoken = &speech.platform().spoken[0];
        assert_eq!(spoken.voice.as_ref().unwrap().voice_uri, "remote-es");
    }

    #[test]
    fn test_stop_drops_callbacks() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.speak("Long story", "English", calls.on_end(), calls.on_error(), None);
        speech.stop();
        speech.process_events();

        assert_eq!(speech.status(), QueueStatus::Idle);
        assert_eq!(calls.ends(), 0);
        assert!(calls.errors().is_empty(), "interruption after stop is not an error");
        assert!(!speech.is_speaking());
    }

    #[test]
    fn test_blank_text_ends_immediately() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.speak("   ", "English", calls.on_end(), calls.on_error(), None);
        assert_eq!(calls.ends(), 1);
        assert!(calls.errors().is_empty());
        assert!(speech.platform().spoken.is_empty());
        assert_eq!(speech.status(), QueueStatus::Idle);
    }

    #[test]
    fn test_new_speak_preempts_old() {
        let mut speech = controller();
        let first = Calls::default();
        let second = Calls::default();
        speech.speak("First", "English", first.on_end(), first.on_error(), None);
        speech.speak("Second", "English", second.on_end(), second.on_error(), None);
        speech.platform_mut().finish();
        speech.process_events();

        assert_eq!(first.ends(), 0);
        assert!(first.errors().is_empty());
        assert_eq!(second.ends(), 1);
        assert_eq!(speech.platform().spoken.len(), 2);
    }

    #[test]
    fn test_error_surfaces_once() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.speak("Text", "English", calls.on_end(), calls.on_error(), None);
        speech.platform_mut().fail(SpeechErrorKind::AudioBusy);
        speech.process_events();
        speech.process_events();

        assert_eq!(
            calls.errors(),
            vec![SpeechError::Synthesis(SpeechErrorKind::AudioBusy)]
        );
        assert_eq!(calls.ends(), 0);
        assert_eq!(speech.status(), QueueStatus::Idle);
    }

    #[test]
    fn test_interruption_while_playing_is_reported() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.speak("Text", "English", calls.on_end(), calls.on_error(), None);
        speech.platform_mut().fail(SpeechErrorKind::Interrupted);
        speech.process_events();
        assert_eq!(
            calls.errors(),
            vec![SpeechError::Synthesis(SpeechErrorKind::Interrupted)]
        );
    }

    #[test]
    fn test_rejected_utterance() {
        let mut speech = controller();
        speech.platform_mut().reject = true;
        let calls = Calls::default();
        speech.speak("Text", "English", calls.on_end(), calls.on_error(), None);
        assert_eq!(calls.errors().len(), 1);
        assert_eq!(speech.status(), QueueStatus::Idle);
    }

    #[test]
    fn test_stale_event_ignored() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.speak("Text", "English", calls.on_end(), calls.on_error(), None);
        let (id, sender) = speech.platform().in_flight[0].clone();
        sender
            .send(SpeechEvent::end(UtteranceId {
                session: id.session + 7,
                index: 0,
            }))
            .unwrap();
        speech.process_events();
        assert_eq!(calls.ends(), 0);
        assert_eq!(speech.status(), QueueStatus::Playing);
    }

    #[test]
    fn test_pause_and_resume() {
        let mut speech = controller();
        speech.pause();
        assert_eq!(speech.status(), QueueStatus::Idle);
        assert!(!speech.platform().paused, "pause while idle does nothing");

        speech.platform_mut().pausable = true;
        let calls = Calls::default();
        speech.speak("Text", "English", calls.on_end(), calls.on_error(), None);
        speech.resume();
        assert_eq!(speech.status(), QueueStatus::Playing);

        speech.pause();
        assert_eq!(speech.status(), QueueStatus::Paused);
        assert!(speech.is_paused());
        assert!(!speech.is_speaking());

        speech.resume();
        assert_eq!(speech.status(), QueueStatus::Playing);
        assert!(speech.is_speaking());
    }

    #[test]
    fn test_unsupported_pause_keeps_playing() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.speak("Text", "English", calls.on_end(), calls.on_error(), None);
        speech.pause();
        assert_eq!(speech.status(), QueueStatus::Playing);
    }

    #[test]
    fn test_preview_lifetime() {
        let mut speech = controller();
        let calls = Calls::default();
        assert!(!speech.is_previewing());
        speech.test("local-en", "Hello", "English", calls.on_error());
        assert!(speech.is_previewing());

        speech.process_events();
        assert!(speech.is_previewing(), "no event yet");
        speech.platform_mut().finish();
        speech.process_events();
        assert!(!speech.is_previewing());
        assert!(calls.errors().is_empty());
    }

    #[test]
    fn test_can_pause_follows_engine() {
        let mut speech = controller();
        assert!(!speech.can_pause());
        speech.platform_mut().pausable = true;
        assert!(speech.can_pause());
    }

    #[test]
    fn test_preview_unknown_voice() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.test("nope", "Hello", "English", calls.on_error());
        assert_eq!(
            calls.errors(),
            vec![SpeechError::VoiceNotFound("nope".to_string())]
        );
    }

    #[test]
    fn test_preview_halts_main_playback() {
        let mut speech = controller();
        let main = Calls::default();
        let preview = Calls::default();
        speech.speak("Story", "English", main.on_end(), main.on_error(), None);
        speech.test("remote-es", "Hola", "Spanish", preview.on_error());

        assert_eq!(speech.status(), QueueStatus::Idle);
        assert_eq!(speech.platform().cancels, 2);
        let spoken = speech.platform().spoken.last().unwrap();
        assert_eq!(spoken.voice.as_ref().unwrap().voice_uri, "remote-es");

        speech.process_events();
        assert!(main.errors().is_empty());
        assert_eq!(main.ends(), 0);
    }

    #[test]
    fn test_preview_cancellation_swallowed() {
        let mut speech = controller();
        let calls = Calls::default();
        speech.test("local-en", "Hello", "English", calls.on_error());
        speech.platform_mut().fail(SpeechErrorKind::Canceled);
        speech.process_events();
        assert!(calls.errors().is_empty());

        speech.test("local-en", "Hello", "English", calls.on_error());
        speech.platform_mut().fail(SpeechErrorKind::Network);
        speech.process_events();
        speech.process_events();
        assert_eq!(
            calls.errors(),
            vec![SpeechError::Synthesis(SpeechErrorKind::Network)]
        );
    }

    #[test]
    fn test_voices_follow_platform() {
        let mut speech = SpeechController::new(FakePlatform::default());
        assert!(speech.voices().is_empty());
        speech.platform_mut().catalog = FakePlatform::with_voices().catalog;
        assert_eq!(speech.voices().len(), 3);
        speech.platform_mut().catalog.pop();
        speech.notify_voices_changed();
        assert_eq!(speech.voices().len(), 2);
    }
}
