//! Interactive terminal session: pick a topic, read or listen to the
//! explanation, take quizzes, follow suggested topics.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use inquire::{Confirm, CustomType, InquireError, Select, Text};
use log::info;

use crate::core::config::Config;
use crate::core::history::{HistoryEntry, HistoryLog, HistoryStore};
use crate::core::io::Storage;
use crate::core::state::{
    ExplanationFormat, GeneratedContent, GenerationOutput, LearningRequest, QuizQuestion,
    APP_TITLE, MAX_AGE_LEVEL, MIN_AGE_LEVEL,
};
use crate::services::generation::Explainer;
use crate::services::llm::LlmClient;
use crate::services::quiz::QuizSession;
use crate::services::speech::{QueueStatus, SpeechController, SpeechError, SpeechPlatform};

pub type Speech = SpeechController<Box<dyn SpeechPlatform>>;

/// Maps Esc / Ctrl-C to `None` so callers can back out quietly.
fn ask<T>(answer: Result<T, InquireError>) -> Result<Option<T>> {
    match answer {
        Ok(value) => Ok(Some(value)),
        Err(InquireError::OperationCanceled | InquireError::OperationInterrupted) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn confirm(message: &str, default: bool) -> Result<bool> {
    Ok(ask(Confirm::new(message).with_default(default).prompt())?.unwrap_or(false))
}

pub struct WorkflowManager {
    config: Config,
    explainer: Explainer,
    store: HistoryStore,
    history: HistoryLog,
    speech: Option<Speech>,
    voice_uri: Option<String>,
}

impl WorkflowManager {
    pub async fn new(
        config: Config,
        llm: Box<dyn LlmClient>,
        storage: Arc<dyn Storage>,
    ) -> Result<Self> {
        let store = HistoryStore::new(storage, config.history.max_items);
        let history = store.load().await?;
        let voice_uri = store.load_selected_voice().await?;
        info!("Loaded {} history entries", history.len());

        Ok(Self {
            config,
            explainer: Explainer::new(llm),
            store,
            history,
            speech: None,
            voice_uri,
        })
    }

    pub fn with_speech(mut self, speech: Speech) -> Self {
        self.speech = Some(speech);
        self
    }

    pub fn history(&self) -> &HistoryLog {
        &self.history
    }

    /// Generates content for `request` and records it in the history log.
    pub async fn explore(&mut self, request: &LearningRequest) -> Result<GenerationOutput> {
        let pb = ProgressBar::new_spinner();
        pb.set_style(ProgressStyle::default_spinner().template("{spinner:.green} {msg}")?);
        pb.set_message(format!(
            "Sparking up a {} about {}...",
            request.format.short_label().to_lowercase(),
            request.topic
        ));
        pb.enable_steady_tick(Duration::from_millis(120));

        let result = self.explainer.generate(request).await;
        pb.finish_and_clear();
        let output = result?;

        self.history.record(HistoryEntry::new(request, &output));
        self.store.save(&self.history).await?;
        Ok(output)
    }

    pub async fn run(&mut self) -> Result<()> {
        println!("✨ {} ✨", APP_TITLE);
        let mut defaults = self.config.learning.to_request();

        loop {
            let Some(request) = prompt_request(&defaults)? else {
                break;
            };

            match self.explore(&request).await {
                Ok(output) => {
                    self.present(&request, &output)?;
                    if let Some(next) = &output.suggested_topic {
                        if confirm(&format!("Explore \"{}\" next?", next), true)? {
                            defaults = LearningRequest {
                                topic: next.clone(),
                                ..request
                            };
                            continue;
                        }
                    }
                    defaults = request;
                }
                Err(e) => {
                    println!("❌ {}", e);
                    defaults = request;
                }
            }

            if !confirm("Learn something else?", true)? {
                break;
            }
        }

        if let Some(speech) = self.speech.as_mut() {
            speech.stop();
        }
        println!("Keep exploring! 🚀");
        Ok(())
    }

    fn present(&mut self, request: &LearningRequest, output: &GenerationOutput) -> Result<()> {
        match &output.content {
            GeneratedContent::Text(text) => {
                println!("\n📖 {} · {}\n", request.topic, request.format.label());
                println!("{}\n", text);
                if request.read_aloud {
                    self.read_aloud(text, &request.language)?;
                }
            }
            GeneratedContent::Quiz(questions) => run_quiz(questions.clone())?,
        }
        Ok(())
    }

    fn read_aloud(&mut self, text: &str, language: &str) -> Result<()> {
        let Some(speech) = self.speech.as_mut() else {
            println!("(Read aloud is not available on this system.)");
            return Ok(());
        };
        let outcome = play(
            speech,
            text,
            language,
            self.voice_uri.as_deref(),
            &mut PromptControls,
        )?;
        if let Playback::Failed(e) = outcome {
            println!("🔇 {}", e);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackAction {
    Pause,
    Resume,
    Stop,
}

impl fmt::Display for PlaybackAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            PlaybackAction::Pause => "Pause",
            PlaybackAction::Resume => "Resume",
            PlaybackAction::Stop => "Stop",
        };
        f.write_str(label)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Playback {
    Finished,
    Failed(SpeechError),
    Stopped,
}

/// Source of the learner's read-aloud choices.
pub trait PlaybackControls {
    /// `Ok(None)` when the learner backs out.
    fn choose(&mut self, actions: Vec<PlaybackAction>) -> Result<Option<PlaybackAction>>;
}

struct PromptControls;

impl PlaybackControls for PromptControls {
    fn choose(&mut self, actions: Vec<PlaybackAction>) -> Result<Option<PlaybackAction>> {
        ask(Select::new("🔊 Reading aloud", actions).prompt())
    }
}

/// Reads `text` aloud, offering pause/resume/stop until playback ends.
pub fn play<P: SpeechPlatform>(
    speech: &mut SpeechController<P>,
    text: &str,
    language: &str,
    voice_uri: Option<&str>,
    controls: &mut dyn PlaybackControls,
) -> Result<Playback> {
    let outcome: Rc<RefCell<Option<Playback>>> = Rc::new(RefCell::new(None));
    let ended = outcome.clone();
    let failed = outcome.clone();
    speech.speak(
        text,
        language,
        Box::new(move || *ended.borrow_mut() = Some(Playback::Finished)),
        Box::new(move |e| *failed.borrow_mut() = Some(Playback::Failed(e))),
        voice_uri,
    );

    loop {
        speech.process_events();
        if let Some(done) = outcome.take() {
            return Ok(done);
        }

        let actions = match speech.status() {
            QueueStatus::Playing if speech.can_pause() => {
                vec![PlaybackAction::Pause, PlaybackAction::Stop]
            }
            QueueStatus::Playing => vec![PlaybackAction::Stop],
            QueueStatus::Paused => vec![PlaybackAction::Resume, PlaybackAction::Stop],
            QueueStatus::Idle => return Ok(Playback::Stopped),
        };
        let choice = controls.choose(actions)?;

        // Playback may have ended while the menu was open.
        speech.process_events();
        if let Some(done) = outcome.take() {
            return Ok(done);
        }
        match choice {
            Some(PlaybackAction::Pause) => speech.pause(),
            Some(PlaybackAction::Resume) => speech.resume(),
            Some(PlaybackAction::Stop) | None => {
                speech.stop();
                return Ok(Playback::Stopped);
            }
        }
    }
}

/// Asks for the next request, re-asking until it validates. `None` on Esc.
pub fn prompt_request(defaults: &LearningRequest) -> Result<Option<LearningRequest>> {
    let age_help = format!("{} to {}", MIN_AGE_LEVEL, MAX_AGE_LEVEL);
    loop {
        let Some(topic) = ask(
            Text::new("What do you want to learn about?")
                .with_default(&defaults.topic)
                .prompt(),
        )?
        else {
            return Ok(None);
        };
        let Some(age_level) = ask(
            CustomType::<u8>::new("Age level:")
                .with_default(defaults.age_level)
                .with_help_message(&age_help)
                .prompt(),
        )?
        else {
            return Ok(None);
        };
        let cursor = ExplanationFormat::ALL
            .iter()
            .position(|f| *f == defaults.format)
            .unwrap_or(0);
        let Some(format) = ask(
            Select::new("Explanation style:", ExplanationFormat::ALL.to_vec())
                .with_starting_cursor(cursor)
                .prompt(),
        )?
        else {
            return Ok(None);
        };
        let Some(language) = ask(
            Text::new("Language:")
                .with_default(&defaults.language)
                .prompt(),
        )?
        else {
            return Ok(None);
        };
        let read_aloud = match format {
            ExplanationFormat::Quiz => false,
            ExplanationFormat::Plain
            | ExplanationFormat::Analogy
            | ExplanationFormat::Story
            | ExplanationFormat::Comic => confirm("Read it aloud?", defaults.read_aloud)?,
        };

        let request = LearningRequest {
            topic: topic.trim().to_string(),
            age_level,
            format,
            language: language.trim().to_string(),
            read_aloud,
        };
        match request.validate() {
            Ok(()) => return Ok(Some(request)),
            Err(e) => println!("⚠️  {}", e),
        }
    }
}

/// Walks through a quiz one question at a time, offering a retry at the end.
pub fn run_quiz(questions: Vec<QuizQuestion>) -> Result<()> {
    let mut quiz = QuizSession::new(questions);
    if quiz.is_empty() {
        println!("This quiz has no questions.");
        return Ok(());
    }

    loop {
        while let Some(question) = quiz.current_question().cloned() {
            println!("\n❓ Question {} of {}", quiz.current_index() + 1, quiz.len());
            let Some(choice) =
                ask(Select::new(&question.question, question.options.clone()).raw_prompt())?
            else {
                return Ok(());
            };

            if let Some(feedback) = quiz.select_answer(choice.index) {
                if feedback.correct {
                    println!("✅ Correct!");
                } else {
                    let answer = question
                        .options
                        .get(feedback.correct_index)
                        .map(String::as_str)
                        .unwrap_or_default();
                    println!("❌ Not quite. The answer was: {}", answer);
                }
                println!("💡 {}", feedback.explanation);
            }
            quiz.advance();
        }

        println!("\n🏆 You scored {} out of {}!", quiz.score(), quiz.len());
        if !confirm("Try again?", false)? {
            break;
        }
        quiz.restart();
    }
    Ok(())
}

pub fn describe_entry(entry: &HistoryEntry) -> String {
    format!(
        "{} · {} · age {} · {} ({})",
        entry.topic,
        entry.format.short_label(),
        entry.age_level,
        entry.language,
        entry.created_at()
    )
}

fn show_entry(entry: &HistoryEntry) -> Result<()> {
    match &entry.output {
        GeneratedContent::Text(text) => {
            println!("\n📖 {} · {}\n", entry.topic, entry.format.label());
            println!("{}\n", text);
            if let Some(next) = &entry.suggested_topic {
                println!("💡 Next time, try: {}", next);
            }
        }
        GeneratedContent::Quiz(questions) => {
            println!("\n📝 {} quiz with {} questions", entry.topic, questions.len());
            if confirm("Take this quiz?", true)? {
                run_quiz(questions.clone())?;
            }
        }
    }
    Ok(())
}

/// The `history` command: list and view past explanations, or wipe them.
pub async fn browse_history(store: &HistoryStore, clear: bool) -> Result<()> {
    let mut log = store.load().await?;
    if clear {
        log.clear();
        store.save(&log).await?;
        println!("History cleared.");
        return Ok(());
    }
    if log.is_empty() {
        println!("No history yet. Run `stem-spark learn` to get started.");
        return Ok(());
    }

    let labels: Vec<String> = log.entries().iter().map(describe_entry).collect();
    let Some(choice) = ask(Select::new("View an entry:", labels).raw_prompt())? else {
        return Ok(());
    };
    if let Some(entry) = log.entries().get(choice.index) {
        show_entry(entry)?;
    }
    Ok(())
}
