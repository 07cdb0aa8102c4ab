//! Quiz walk-through: one question at a time, feedback after each answer,
//! results at the end.

use crate::core::state::QuizQuestion;

/// What the learner sees right after answering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnswerFeedback {
    pub selected_index: usize,
    pub correct_index: usize,
    pub correct: bool,
    pub explanation: String,
}

#[derive(Debug, Clone)]
pub struct QuizSession {
    questions: Vec<QuizQuestion>,
    current_index: usize,
    selected_answer: Option<usize>,
    revealed: bool,
    score: usize,
    finished: bool,
}

impl QuizSession {
    pub fn new(questions: Vec<QuizQuestion>) -> Self {
        Self {
            questions,
            current_index: 0,
            selected_answer: None,
            revealed: false,
            score: 0,
            finished: false,
        }
    }

    pub fn questions(&self) -> &[QuizQuestion] {
        &self.questions
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn current_index(&self) -> usize {
        self.current_index
    }

    pub fn current_question(&self) -> Option<&QuizQuestion> {
        if self.finished {
            return None;
        }
        self.questions.get(self.current_index)
    }

    pub fn selected_answer(&self) -> Option<usize> {
        self.selected_answer
    }

    pub fn is_revealed(&self) -> bool {
        self.revealed
    }

    pub fn score(&self) -> usize {
        self.score
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_last_question(&self) -> bool {
        self.current_index + 1 >= self.questions.len()
    }

    /// Feedback for the current question, once it has been answered.
    pub fn feedback(&self) -> Option<AnswerFeedback> {
        let question = self.current_question()?;
        let selected_index = self.selected_answer.filter(|_| self.revealed)?;
        Some(AnswerFeedback {
            selected_index,
            correct_index: question.correct_answer_index,
            correct: selected_index == question.correct_answer_index,
            explanation: question.explanation.clone(),
        })
    }

    /// Records the first answer to the current question.
    ///
    /// Returns `None` without touching the score if the question was already
    /// answered, the quiz is over, or `index` is not one of the options.
    pub fn select_answer(&mut self, index: usize) -> Option<AnswerFeedback> {
        if self.revealed {
            return None;
        }
        let question = self.current_question()?;
        if index >= question.options.len() {
            return None;
        }
        let correct = index == question.correct_answer_index;

        self.selected_answer = Some(index);
        self.revealed = true;
        if correct {
            self.score += 1;
        }
        self.feedback()
    }

    /// Moves on after an answer; past the last question the quiz finishes.
    pub fn advance(&mut self) {
        if self.finished || !self.revealed {
            return;
        }
        if self.current_index + 1 < self.questions.len() {
            self.current_index += 1;
            self.selected_answer = None;
            self.revealed = false;
        } else {
            self.finished = true;
        }
    }

    /// Starts over with the same questions.
    pub fn restart(&mut self) {
        self.current_index = 0;
        self.selected_answer = None;
        self.revealed = false;
        self.score = 0;
        self.finished = false;
    }
}
