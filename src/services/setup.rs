//! The `voices` command: list the speech engine's voices, preview them and
//! remember the learner's pick.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::time::{Duration, Instant};

use anyhow::Result;
use inquire::{Confirm, InquireError, Select};
use log::debug;
use tokio::time::sleep;

use crate::core::history::HistoryStore;
use crate::core::language::{base_language, to_locale_tag};
use crate::services::speech::{SpeechController, SpeechError, SpeechPlatform, Voice};

const PREVIEW_TIMEOUT: Duration = Duration::from_secs(15);
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One row of the voice picker. `None` means "match the explanation language".
struct VoiceChoice {
    voice: Option<Voice>,
    selected: bool,
}

impl fmt::Display for VoiceChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let marker = if self.selected { "★ " } else { "" };
        match &self.voice {
            Some(v) => write!(f, "{}{}", marker, format_voice(v)),
            None => write!(f, "{}Automatic (match the explanation language)", marker),
        }
    }
}

pub fn format_voice(voice: &Voice) -> String {
    let mut line = format!("{} ({})", voice.name, voice.lang);
    if voice.default {
        line.push_str(" [default]");
    }
    if !voice.local_service {
        line.push_str(" [online]");
    }
    line
}

/// Voices whose base language matches `language` (a name or locale tag).
pub fn filter_voices(voices: &[Voice], language: Option<&str>) -> Vec<Voice> {
    let Some(language) = language else {
        return voices.to_vec();
    };
    let locale = to_locale_tag(language);
    let base = base_language(&locale);
    voices
        .iter()
        .filter(|v| base_language(&v.lang).eq_ignore_ascii_case(base))
        .cloned()
        .collect()
}

/// Plays a sample of `voice` until it ends, fails or `limit` passes.
/// Returns the failure, if any; cancellations are not failures.
async fn preview<P: SpeechPlatform>(
    speech: &mut SpeechController<P>,
    voice: &Voice,
    limit: Duration,
) -> Option<SpeechError> {
    let failure: Rc<RefCell<Option<SpeechError>>> = Rc::new(RefCell::new(None));
    let sink = failure.clone();
    let sample = format!("Hi! I'm {}. Let's explore science together!", voice.name);
    speech.test(
        &voice.voice_uri,
        &sample,
        &voice.lang,
        Box::new(move |e| *sink.borrow_mut() = Some(e)),
    );

    let started = Instant::now();
    loop {
        speech.process_events();
        if !speech.is_previewing() {
            break;
        }
        if started.elapsed() > limit {
            debug!("Voice preview timed out after {:?}", limit);
            break;
        }
        sleep(POLL_INTERVAL).await;
    }
    speech.stop();
    failure.take()
}

pub async fn run_voice_setup<P: SpeechPlatform>(
    speech: &mut SpeechController<P>,
    store: &HistoryStore,
    select: bool,
    language: Option<&str>,
) -> Result<()> {
    let voices = filter_voices(speech.voices(), language);
    let current = store.load_selected_voice().await?;

    if voices.is_empty() {
        match language {
            Some(lang) => println!("No voices found for language: {}", lang),
            None => println!("The speech engine reported no voices."),
        }
        return Ok(());
    }

    for voice in &voices {
        let marker = if current.as_deref() == Some(voice.voice_uri.as_str()) {
            "★"
        } else {
            " "
        };
        println!("{} {}  {}", marker, format_voice(voice), voice.voice_uri);
    }
    if !select {
        return Ok(());
    }

    loop {
        let mut options = vec![VoiceChoice {
            voice: None,
            selected: current.is_none(),
        }];
        options.extend(voices.iter().map(|v| VoiceChoice {
            selected: current.as_deref() == Some(v.voice_uri.as_str()),
            voice: Some(v.clone()),
        }));

        let choice = match Select::new("Select a voice:", options).prompt() {
            Ok(choice) => choice,
            Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => {
                return Ok(())
            }
            Err(e) => return Err(e.into()),
        };

        let Some(voice) = choice.voice else {
            store.save_selected_voice(None).await?;
            println!("Voice selection reset to automatic.");
            return Ok(());
        };

        if let Some(e) = preview(speech, &voice, PREVIEW_TIMEOUT).await {
            println!("🔇 {}", e);
        }
        if Confirm::new(&format!("Use {}?", voice.name))
            .with_default(true)
            .prompt()
            .unwrap_or(false)
        {
            store.save_selected_voice(Some(&voice.voice_uri)).await?;
            println!("Voice saved: {}", voice.name);
            return Ok(());
        }
    }
}
