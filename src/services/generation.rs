use crate::core::state::{
    ExplanationFormat, GeneratedContent, GenerationOutput, LearningRequest, QuizQuestion,
    RequestError,
};
use crate::services::llm::{LlmClient, LlmError, PromptRequest};
use log::{error, info, warn};
use serde_json::Value;

const SYSTEM_INSTRUCTION: &str = "You are a friendly, patient, and enthusiastic AI assistant for a children's STEM learning app. \
Your goal is to explain scientific and technical concepts to children in an engaging, encouraging, and easily understandable way. \
Always use a warm, positive, and encouraging tone. Keep sentences short, use simple language, and focus on the main ideas. \
Avoid complex jargon unless you explain it very simply. For quizzes, strictly adhere to the requested JSON format. \
For other formats, aim for a maximum of 500 words unless the specific format (like a story or comic) inherently requires more length to be coherent, but still prioritize conciseness.";

const READ_ALOUD_INSTRUCTION: &str = "Craft the explanation to be easily read aloud. Use smooth, natural phrasing, simple vocabulary suitable for the age, \
and structure sentences with clear pauses or breaks where appropriate (e.g., after sentences or distinct ideas). \
The goal is a text that sounds good and is easy to follow when spoken.";

const CONCISE_INSTRUCTION: &str = "Ensure the explanation is clear and concise.";
const WORD_LIMIT_INSTRUCTION: &str = "Keep the explanation concise, ideally under 500 words.";

const TEMPERATURE: f32 = 0.7;
const SUGGESTION_TEMPERATURE: f32 = 0.8;
const TOP_P: f32 = 0.95;
const TOP_K: u32 = 40;

#[derive(thiserror::Error, Debug)]
pub enum GenerationError {
    #[error(transparent)]
    InvalidRequest(#[from] RequestError),
    #[error(transparent)]
    Llm(#[from] LlmError),
    #[error("AI returned an invalid quiz format ({0}). Please try generating again.")]
    InvalidQuizFormat(String),
}

/// Builds prompts for a [`LearningRequest`] and turns model output into content.
#[derive(Debug)]
pub struct Explainer {
    llm: Box<dyn LlmClient>,
}

impl Explainer {
    pub fn new(llm: Box<dyn LlmClient>) -> Self {
        Self { llm }
    }

    pub async fn generate(
        &self,
        request: &LearningRequest,
    ) -> Result<GenerationOutput, GenerationError> {
        request.validate()?;
        info!(
            "Generating {} about {:?} for age {} in {}",
            request.format.as_str(),
            request.topic,
            request.age_level,
            request.language
        );

        let prompt = PromptRequest {
            system: Some(SYSTEM_INSTRUCTION.to_string()),
            json: request.format == ExplanationFormat::Quiz,
            temperature: Some(TEMPERATURE),
            top_p: Some(TOP_P),
            top_k: Some(TOP_K),
            ..PromptRequest::new(construct_prompt(request))
        };
        let response = self.llm.generate(&prompt).await?;
        if response.trim().is_empty() {
            return Err(LlmError::EmptyResponse("EMPTY_TEXT".to_string()).into());
        }

        match request.format {
            ExplanationFormat::Quiz => {
                let questions = parse_quiz(&response).map_err(|e| {
                    error!("Original raw response from AI: {}", response);
                    e
                })?;
                Ok(GenerationOutput {
                    content: GeneratedContent::Quiz(questions),
                    suggested_topic: None,
                })
            }
            ExplanationFormat::Plain
            | ExplanationFormat::Analogy
            | ExplanationFormat::Story
            | ExplanationFormat::Comic => {
                let suggested_topic = self.suggest_topic(request).await;
                Ok(GenerationOutput {
                    content: GeneratedContent::Text(response),
                    suggested_topic,
                })
            }
        }
    }

    /// A related topic to explore next. Failures only cost the suggestion.
    pub async fn suggest_topic(&self, request: &LearningRequest) -> Option<String> {
        let prompt = PromptRequest {
            temperature: Some(SUGGESTION_TEMPERATURE),
            top_p: Some(TOP_P),
            top_k: Some(TOP_K),
            ..PromptRequest::new(suggestion_prompt(request))
        };
        match self.llm.generate(&prompt).await {
            Ok(text) => clean_suggestion(&text),
            Err(e) => {
                warn!("Error generating suggested topic: {}", e);
                None
            }
        }
    }
}

fn format_instructions(request: &LearningRequest) -> String {
    match request.format {
        ExplanationFormat::Plain => "Provide a clear, simplified explanation with relatable examples appropriate for the child's age.".to_string(),
        ExplanationFormat::Analogy => "Compare the topic to something familiar to a child of that age. Make the analogy easy to understand and directly relevant to the core concept.".to_string(),
        ExplanationFormat::Story => "Tell a short, imaginative narrative or scenario featuring the topic. The story should be simple, engaging for a child, and directly related to explaining the concept. Ensure the story has a clear beginning, middle, and end that helps illustrate the topic.".to_string(),
        ExplanationFormat::Comic => format!(
            "Write a script for a short, engaging comic dialogue aimed at children.\n\
The comic should explain the topic: \"{topic}\" in a fun, visual, and easy-to-understand way for a {age}-year-old.\n\
The script should feature 2-3 simple, friendly characters (e.g., \"Pip\" the curious mouse, \"Sparky\" the energetic squirrel, \"Professor Whiskers\" the wise old owl).\n\
The script must:\n\
- Clearly label speaker turns (e.g., \"Pip:\", \"Sparky:\", \"Professor Whiskers:\").\n\
- Include brief, parenthetical descriptions for simple actions, expressions, or scene settings (e.g., \"(Pip scratches head, looking confused)\", \"(Panel: They are looking at a large diagram of a plant cell)\").\n\
- Ensure the language is age-appropriate, engaging, and uses simple vocabulary.\n\
- The main goal is to explain the topic effectively through their dialogue and the described visual cues.\n\
- Keep the overall comic dialogue concise, ideally fitting into a few panels if it were drawn.",
            topic = request.topic,
            age = request.age_level
        ),
        ExplanationFormat::Quiz => format!(
            "Create an age-appropriate multiple-choice quiz about the topic \"{topic}\" for a {age}-year-old.\n\
The quiz should consist of 3 to 4 questions.\n\
For each question, provide:\n\
1.  A \"question\" text.\n\
2.  An array of \"options\" (strings), typically 3 or 4 choices.\n\
3.  A \"correctAnswerIndex\" (a zero-based number indicating which option is correct).\n\
4.  A brief \"explanation\" for why the answer is correct, to be shown after the user answers.\n\
\n\
Return the quiz as a JSON array of objects, where each object represents a question and follows this exact structure:\n\
{{\n  \"question\": \"string\",\n  \"options\": [\"string\", \"string\", ...],\n  \"correctAnswerIndex\": number,\n  \"explanation\": \"string\"\n}}\n\
Ensure the entire response is a single valid JSON array. The language for the quiz content (questions, options, explanations) should be {language}.",
            topic = request.topic,
            age = request.age_level,
            language = request.language
        ),
    }
}

/// The user prompt for a generation. Quiz prompts stand alone.
pub fn construct_prompt(request: &LearningRequest) -> String {
    let instructions = format_instructions(request);
    if request.format == ExplanationFormat::Quiz {
        return instructions;
    }

    let style = if request.read_aloud {
        READ_ALOUD_INSTRUCTION
    } else {
        CONCISE_INSTRUCTION
    };

    format!(
        "Explain the topic: \"{topic}\"\n\
To a child who is {age} years old.\n\
Use the \"{format}\" format.\n\
The explanation should be in {language}.\n\
{style}\n\
{limit}\n\
\n\
Specific instructions for the \"{format}\" format:\n\
{instructions}\n\
\n\
Please generate the content now.",
        topic = request.topic,
        age = request.age_level,
        format = request.format.as_str(),
        language = request.language,
        style = style,
        limit = WORD_LIMIT_INSTRUCTION,
        instructions = instructions,
    )
}

fn suggestion_prompt(request: &LearningRequest) -> String {
    format!(
        "A child (age {age}) just learned about the topic: '{topic}' in {language}.\n\
Suggest one engaging and closely related STEM topic that this child might be curious to learn about next.\n\
Provide ONLY the name of the suggested topic as a short, concise string (e.g., 'Volcanoes', 'The Life Cycle of a Butterfly', 'Simple Machines').\n\
The suggested topic should also be in {language}.\n\
Do not add any introductory phrases like 'A good next topic could be:' or any explanation for your suggestion. Just the topic name itself.",
        age = request.age_level,
        topic = request.topic,
        language = request.language
    )
}

fn clean_suggestion(text: &str) -> Option<String> {
    let cleaned = text
        .trim()
        .trim_matches(|c| c == '"' || c == '\'' || c == '`')
        .trim();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned.to_string())
    }
}

/// Removes a surrounding ``` fence, with or without a language tag.
pub fn strip_code_blocks(s: &str) -> &str {
    let s = s.trim();
    let Some(inner) = s.strip_prefix("```") else {
        return s;
    };
    let Some(inner) = inner.strip_suffix("```") else {
        return s;
    };
    // Drop the info string ("json") on the opening line, if any.
    match inner.find('\n') {
        Some(pos) if inner[..pos].trim().chars().all(|c| c.is_ascii_alphanumeric()) => {
            inner[pos + 1..].trim()
        }
        _ => inner.trim(),
    }
}

/// Parses and validates a quiz. One malformed question rejects the whole quiz.
pub fn parse_quiz(response: &str) -> Result<Vec<QuizQuestion>, GenerationError> {
    let text = strip_code_blocks(response);
    let value: Value = serde_json::from_str(text)
        .map_err(|e| GenerationError::InvalidQuizFormat(format!("not valid JSON: {}", e)))?;

    let items = value
        .as_array()
        .ok_or_else(|| GenerationError::InvalidQuizFormat("expected a JSON array".to_string()))?;
    if items.is_empty() {
        return Err(GenerationError::InvalidQuizFormat("the quiz has no questions".to_string()));
    }
    if !(3..=4).contains(&items.len()) {
        warn!("Quiz has {} questions, expected 3 to 4", items.len());
    }

    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            validate_question(item)
                .map_err(|reason| GenerationError::InvalidQuizFormat(format!("question {}: {}", i + 1, reason)))
        })
        .collect()
}

fn validate_question(item: &Value) -> Result<QuizQuestion, String> {
    let question = item
        .get("question")
        .and_then(Value::as_str)
        .filter(|q| !q.trim().is_empty())
        .ok_or("missing question text")?;

    let options = item
        .get("options")
        .and_then(Value::as_array)
        .ok_or("missing options")?
        .iter()
        .map(|o| o.as_str().map(str::to_string))
        .collect::<Option<Vec<String>>>()
        .ok_or("options must be strings")?;
    if options.len() < 2 {
        return Err("needs at least two options".to_string());
    }

    let correct_answer_index = item
        .get("correctAnswerIndex")
        .and_then(Value::as_u64)
        .ok_or("correctAnswerIndex must be a non-negative integer")? as usize;
    if correct_answer_index >= options.len() {
        return Err(format!(
            "correctAnswerIndex {} is out of range for {} options",
            correct_answer_index,
            options.len()
        ));
    }

    let explanation = item
        .get("explanation")
        .and_then(Value::as_str)
        .filter(|e| !e.trim().is_empty())
        .ok_or("missing explanation")?;

    Ok(QuizQuestion {
        question: question.to_string(),
        options,
        correct_answer_index,
        explanation: explanation.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays canned responses and records the prompts it was given.
    #[derive(Debug)]
    struct ScriptedLlm {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        seen: Mutex<Vec<PromptRequest>>,
    }

    impl ScriptedLlm {
        fn new(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            }
        }
    }

    #[cfg_attr(target_arch = "wasm32", async_trait(?Send))]
    #[cfg_attr(not(target_arch = "wasm32"), async_trait)]
    impl LlmClient for std::sync::Arc<ScriptedLlm> {
        async fn generate(&self, request: &PromptRequest) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(request.clone());
            let mut responses = self.responses.lock().unwrap();
            if responses.is_empty() {
                return Err(LlmError::InvalidResponse("no scripted response".to_string()));
            }
            responses.remove(0)
        }
    }

    const VALID_QUIZ: &str = r#"[
        {"question": "What do plants need?", "options": ["Sun", "Pizza", "Socks"], "correctAnswerIndex": 0, "explanation": "Plants use sunlight."},
        {"question": "What gas do plants take in?", "options": ["Oxygen", "Carbon dioxide"], "correctAnswerIndex": 1, "explanation": "They breathe in CO2."},
        {"question": "Where does it happen?", "options": ["Roots", "Leaves", "Flowers"], "correctAnswerIndex": 1, "explanation": "In the leaves."}
    ]"#;

    fn request(format: ExplanationFormat) -> LearningRequest {
        LearningRequest {
            topic: "Volcanoes".to_string(),
            age_level: 6,
            format,
            language: "English".to_string(),
            read_aloud: true,
        }
    }

    #[test]
    fn test_every_format_prompt_mentions_topic_and_language() {
        for format in ExplanationFormat::ALL {
            let mut req = request(format);
            req.language = "Spanish".to_string();
            let prompt = construct_prompt(&req);
            assert!(prompt.contains("Volcanoes"), "{:?}", format);
            assert!(prompt.contains("Spanish"), "{:?}", format);
        }
    }

    #[test]
    fn test_read_aloud_changes_style() {
        let mut req = request(ExplanationFormat::Story);
        assert!(construct_prompt(&req).contains("easily read aloud"));
        req.read_aloud = false;
        let prompt = construct_prompt(&req);
        assert!(prompt.contains(CONCISE_INSTRUCTION));
        assert!(!prompt.contains("easily read aloud"));
    }

    #[test]
    fn test_quiz_prompt_is_standalone() {
        let prompt = construct_prompt(&request(ExplanationFormat::Quiz));
        assert!(prompt.starts_with("Create an age-appropriate multiple-choice quiz"));
        assert!(prompt.contains("correctAnswerIndex"));
        assert!(!prompt.contains("Please generate the content now."));
    }

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n[1]\n```"), "[1]");
        assert_eq!(strip_code_blocks("```\n[1]\n```"), "[1]");
        assert_eq!(strip_code_blocks("  [1]  "), "[1]");
        assert_eq!(strip_code_blocks("```[1]```"), "[1]");
    }

    #[test]
    fn test_parse_quiz_fenced_and_bare_agree() {
        let bare = parse_quiz(VALID_QUIZ).unwrap();
        let fenced = parse_quiz(&format!("```json\n{}\n```", VALID_QUIZ)).unwrap();
        assert_eq!(bare, fenced);
        assert_eq!(bare.len(), 3);
        assert_eq!(bare[1].correct_answer_index, 1);
    }

    #[test]
    fn test_parse_quiz_rejects_bad_shapes() {
        let cases = [
            "not json",
            r#"{"question": "Q"}"#,
            "[]",
            r#"[{"question": "Q", "options": ["only one"], "correctAnswerIndex": 0, "explanation": "E"}]"#,
            r#"[{"question": "Q", "options": ["a", "b"], "correctAnswerIndex": 2, "explanation": "E"}]"#,
            r#"[{"question": "Q", "options": ["a", "b"], "correctAnswerIndex": "0", "explanation": "E"}]"#,
            r#"[{"question": "Q", "options": ["a", "b"], "correctAnswerIndex": -1, "explanation": "E"}]"#,
            r#"[{"question": "Q", "options": ["a", 2], "correctAnswerIndex": 0, "explanation": "E"}]"#,
            r#"[{"question": "", "options": ["a", "b"], "correctAnswerIndex": 0, "explanation": "E"}]"#,
            r#"[{"question": "Q", "options": ["a", "b"], "correctAnswerIndex": 0}]"#,
        ];
        for case in cases {
            assert!(
                matches!(parse_quiz(case), Err(GenerationError::InvalidQuizFormat(_))),
                "accepted: {}",
                case
            );
        }
    }

    #[test]
    fn test_one_bad_question_rejects_whole_quiz() {
        let mut items: Vec<Value> = serde_json::from_str(VALID_QUIZ).unwrap();
        items[2]["correctAnswerIndex"] = Value::from(7);
        let text = serde_json::to_string(&items).unwrap();
        let err = parse_quiz(&text).unwrap_err();
        assert!(err.to_string().contains("invalid quiz format"));
        assert!(err.to_string().contains("question 3"));
    }

    #[test]
    fn test_clean_suggestion() {
        assert_eq!(clean_suggestion(" \"Volcanoes\" \n").as_deref(), Some("Volcanoes"));
        assert_eq!(clean_suggestion("`Simple Machines`").as_deref(), Some("Simple Machines"));
        assert_eq!(clean_suggestion("''"), None);
    }

    #[tokio::test]
    async fn test_generate_quiz() {
        let llm = std::sync::Arc::new(ScriptedLlm::new(vec![Ok(format!("```json\n{}\n```", VALID_QUIZ))]));
        let explainer = Explainer::new(Box::new(llm.clone()));

        let output = explainer.generate(&request(ExplanationFormat::Quiz)).await.unwrap();
        assert_eq!(output.content.as_quiz().unwrap().len(), 3);
        assert_eq!(output.suggested_topic, None);

        let seen = llm.seen.lock().unwrap();
        assert_eq!(seen.len(), 1, "quizzes do not ask for a suggestion");
        assert!(seen[0].json);
        assert!(seen[0].system.is_some());
    }

    #[tokio::test]
    async fn test_generate_text_with_suggestion() {
        let llm = std::sync::Arc::new(ScriptedLlm::new(vec![
            Ok("Once upon a time, a volcano woke up...".to_string()),
            Ok("'Earthquakes'".to_string()),
        ]));
        let explainer = Explainer::new(Box::new(llm.clone()));

        let output = explainer.generate(&request(ExplanationFormat::Story)).await.unwrap();
        assert_eq!(output.content.as_text(), Some("Once upon a time, a volcano woke up..."));
        assert_eq!(output.suggested_topic.as_deref(), Some("Earthquakes"));

        let seen = llm.seen.lock().unwrap();
        assert!(!seen[0].json);
        assert_eq!(seen[0].prompt, construct_prompt(&request(ExplanationFormat::Story)));
        assert_eq!(seen[1].temperature, Some(SUGGESTION_TEMPERATURE));
        assert_eq!(seen[1].prompt, suggestion_prompt(&request(ExplanationFormat::Story)));
        assert!(seen[1].system.is_none());
    }

    #[tokio::test]
    async fn test_failed_suggestion_keeps_text() {
        let llm = std::sync::Arc::new(ScriptedLlm::new(vec![
            Ok("Magnets pull on iron.".to_string()),
            Err(LlmError::Upstream { status: 503, message: "busy".to_string() }),
        ]));
        let explainer = Explainer::new(Box::new(llm));

        let output = explainer.generate(&request(ExplanationFormat::Plain)).await.unwrap();
        assert_eq!(output.content.as_text(), Some("Magnets pull on iron."));
        assert_eq!(output.suggested_topic, None);
    }

    #[tokio::test]
    async fn test_upstream_error_propagates() {
        let llm = std::sync::Arc::new(ScriptedLlm::new(vec![Err(LlmError::Upstream {
            status: 401,
            message: "bad key".to_string(),
        })]));
        let explainer = Explainer::new(Box::new(llm));

        match explainer.generate(&request(ExplanationFormat::Plain)).await {
            Err(GenerationError::Llm(LlmError::Upstream { status, .. })) => assert_eq!(status, 401),
            other => panic!("unexpected: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_invalid_request_never_calls_llm() {
        let llm = std::sync::Arc::new(ScriptedLlm::new(vec![]));
        let explainer = Explainer::new(Box::new(llm.clone()));
        let mut req = request(ExplanationFormat::Plain);
        req.topic = " ".to_string();

        assert!(matches!(
            explainer.generate(&req).await,
            Err(GenerationError::InvalidRequest(RequestError::MissingTopic))
        ));
        assert!(llm.seen.lock().unwrap().is_empty());
    }
}
