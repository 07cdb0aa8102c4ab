use serde::{Deserialize, Serialize};
use std::fmt;

pub const APP_TITLE: &str = "STEM Spark Kids";

pub const DEFAULT_TOPIC: &str = "Photosynthesis";
pub const MIN_AGE_LEVEL: u8 = 4;
pub const MAX_AGE_LEVEL: u8 = 12;
pub const DEFAULT_AGE_LEVEL: u8 = 8;
pub const DEFAULT_FORMAT: ExplanationFormat = ExplanationFormat::Story;
pub const DEFAULT_LANGUAGE: &str = "English";
pub const DEFAULT_READ_ALOUD: bool = true;

pub const MAX_HISTORY_ITEMS: usize = 20;

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ExplanationFormat {
    Plain,
    Analogy,
    Story,
    Comic,
    Quiz,
}

impl ExplanationFormat {
    pub const ALL: [ExplanationFormat; 5] = [
        ExplanationFormat::Plain,
        ExplanationFormat::Analogy,
        ExplanationFormat::Story,
        ExplanationFormat::Comic,
        ExplanationFormat::Quiz,
    ];

    /// Wire name, as used in prompts and persisted history.
    pub fn as_str(&self) -> &'static str {
        match self {
            ExplanationFormat::Plain => "plain",
            ExplanationFormat::Analogy => "analogy",
            ExplanationFormat::Story => "story",
            ExplanationFormat::Comic => "comic",
            ExplanationFormat::Quiz => "quiz",
        }
    }

    /// Label shown in the format picker.
    pub fn label(&self) -> &'static str {
        match self {
            ExplanationFormat::Plain => "Plain Explanation",
            ExplanationFormat::Analogy => "Analogy",
            ExplanationFormat::Story => "Story Time",
            ExplanationFormat::Comic => "Comic Dialogue",
            ExplanationFormat::Quiz => "Quick Quiz",
        }
    }

    /// Compact label used in history listings.
    pub fn short_label(&self) -> &'static str {
        match self {
            ExplanationFormat::Plain => "Plain",
            ExplanationFormat::Analogy => "Analogy",
            ExplanationFormat::Story => "Story",
            ExplanationFormat::Comic => "Comic",
            ExplanationFormat::Quiz => "Quiz",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|f| f.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for ExplanationFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QuizQuestion {
    pub question: String,
    pub options: Vec<String>,
    pub correct_answer_index: usize,
    pub explanation: String,
}

/// What the generator produced: prose, or a validated list of quiz questions.
///
/// Serialized untagged so persisted history stays a plain string or array.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(untagged)]
pub enum GeneratedContent {
    Text(String),
    Quiz(Vec<QuizQuestion>),
}

impl GeneratedContent {
    pub fn as_text(&self) -> Option<&str> {
        match self {
            GeneratedContent::Text(text) => Some(text),
            GeneratedContent::Quiz(_) => None,
        }
    }

    pub fn as_quiz(&self) -> Option<&[QuizQuestion]> {
        match self {
            GeneratedContent::Text(_) => None,
            GeneratedContent::Quiz(questions) => Some(questions),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GenerationOutput {
    pub content: GeneratedContent,
    pub suggested_topic: Option<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum RequestError {
    #[error("Please enter a topic to learn about.")]
    MissingTopic,
    #[error("Age level must be between {min} and {max}, got {0}.", min = MIN_AGE_LEVEL, max = MAX_AGE_LEVEL)]
    AgeOutOfRange(u8),
}

/// The inputs of one generation: what to explain, to whom, and how.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LearningRequest {
    pub topic: String,
    pub age_level: u8,
    pub format: ExplanationFormat,
    pub language: String,
    pub read_aloud: bool,
}

impl Default for LearningRequest {
    fn default() -> Self {
        Self {
            topic: DEFAULT_TOPIC.to_string(),
            age_level: DEFAULT_AGE_LEVEL,
            format: DEFAULT_FORMAT,
            language: DEFAULT_LANGUAGE.to_string(),
            read_aloud: DEFAULT_READ_ALOUD,
        }
    }
}

impl LearningRequest {
    pub fn validate(&self) -> Result<(), RequestError> {
        if self.topic.trim().is_empty() {
            return Err(RequestError::MissingTopic);
        }
        if !(MIN_AGE_LEVEL..=MAX_AGE_LEVEL).contains(&self.age_level) {
            return Err(RequestError::AgeOutOfRange(self.age_level));
        }
        Ok(())
    }
}
