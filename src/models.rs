// Domain records shared across the parser, cache, orchestrator and pipeline.
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DocumentKind {
    Pdf,
    DocxLike,
    TextLike,
}

impl DocumentKind {
    pub fn from_extension(extension: &str) -> Self {
        match extension.trim_start_matches('.').to_lowercase().as_str() {
            "pdf" => DocumentKind::Pdf,
            "docx" | "doc" => DocumentKind::DocxLike,
            _ => DocumentKind::TextLike,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuizState {
    Pending,
    Processing,
    Completed,
    NeedsReview,
    WaitingAi,
    Failed,
}

impl QuizState {
    pub fn as_str(&self) -> &'static str {
        match self {
            QuizState::Pending => "Pending",
            QuizState::Processing => "Processing",
            QuizState::Completed => "Completed",
            QuizState::NeedsReview => "Needs_Review",
            QuizState::WaitingAi => "Waiting_AI",
            QuizState::Failed => "Failed",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        Some(match value {
            "Pending" => QuizState::Pending,
            "Processing" => QuizState::Processing,
            "Completed" => QuizState::Completed,
            "Needs_Review" => QuizState::NeedsReview,
            "Waiting_AI" => QuizState::WaitingAi,
            "Failed" => QuizState::Failed,
            _ => return None,
        })
    }
}

/// Preserved per spec.md's Open Question: fallback-to-"A" is still labelled
/// `AiGenerated`, even though a dedicated `Fallback` variant would read
/// cleaner — changing it would change the data contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AnswerSource {
    StyleDetected,
    AiGenerated,
    Manual,
}

impl AnswerSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnswerSource::StyleDetected => "StyleDetected",
            AnswerSource::AiGenerated => "AI_Generated",
            AnswerSource::Manual => "Manual",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub key: char,
    pub text: String,
    pub is_visually_marked: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Question {
    pub index: usize,
    pub stem: String,
    pub choices: Vec<Choice>,
    pub correct_answer_key: String,
    pub explanation: Option<String>,
    pub source: AnswerSource,
    pub section: String,
}

impl Question {
    pub fn choice_keys(&self) -> Vec<char> {
        self.choices.iter().map(|c| c.key).collect()
    }

    pub fn has_valid_correct_key(&self) -> bool {
        self.correct_answer_key.is_empty()
            || self
                .choices
                .iter()
                .any(|c| c.key.to_string() == self.correct_answer_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SectionCount {
    pub name: String,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quiz {
    pub id: String,
    pub title: String,
    pub source_document: String,
    pub document_kind: DocumentKind,
    pub content_hash: String,
    pub state: QuizState,
    pub total_questions: usize,
    pub processed_questions: usize,
    pub questions: Vec<Question>,
    pub sections: Vec<String>,
    pub section_counts: Vec<SectionCount>,
    pub created_by: String,
    pub created_at: i64,
    pub updated_at: i64,
    pub deleted: bool,
}

impl Quiz {
    /// §3's invariants, checked defensively wherever a Quiz is persisted.
    pub fn check_invariants(&self) -> Result<(), String> {
        if self.processed_questions > self.total_questions {
            return Err(format!(
                "processed_questions ({}) exceeds total_questions ({})",
                self.processed_questions, self.total_questions
            ));
        }
        if self.state == QuizState::Completed && self.processed_questions != self.total_questions {
            return Err("Completed quiz must have processed_questions == total_questions".into());
        }
        for section_count in &self.section_counts {
            if !self.sections.contains(&section_count.name) {
                return Err(format!(
                    "section_counts references unknown section '{}'",
                    section_count.name
                ));
            }
        }
        let counted: usize = self.section_counts.iter().map(|s| s.count).sum();
        if counted != self.total_questions {
            return Err(format!(
                "sum(section_counts.count) == {counted} but total_questions == {}",
                self.total_questions
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachedAnswer {
    pub stem_hash: String,
    pub choices_hash: String,
    pub correct_key: String,
    pub explanation: Option<String>,
    pub confidence: Option<f32>,
    pub provider: String,
    pub hit_count: u64,
    pub last_hit_at: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub quiz_id: String,
    pub document_url: String,
    pub document_type: String,
    pub retry_count: u32,
    pub next_attempt_at: i64,
}

/// Queue message shape from spec.md §6.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobPayload {
    pub quiz_id: String,
    pub document_url: String,
    pub document_type: String,
}

/// The source models `isDuplicate`/`existingQuizId` as extra fields smuggled
/// onto a Quiz via `any`. This repo models it as a distinct return type
/// instead (Design Notes §9).
pub enum UploadOutcome {
    New(Quiz),
    Duplicate(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_choice(key: char) -> Choice {
        Choice {
            key,
            text: format!("choice {key}"),
            is_visually_marked: false,
        }
    }

    fn sample_quiz() -> Quiz {
        Quiz {
            id: "quiz-1".into(),
            title: "Sample".into(),
            source_document: "file://sample.pdf".into(),
            document_kind: DocumentKind::Pdf,
            content_hash: "abc123".into(),
            state: QuizState::Completed,
            total_questions: 2,
            processed_questions: 2,
            questions: vec![],
            sections: vec!["Nội dung chung".into()],
            section_counts: vec![SectionCount {
                name: "Nội dung chung".into(),
                count: 2,
            }],
            created_by: "owner-1".into(),
            created_at: 0,
            updated_at: 0,
            deleted: false,
        }
    }

    #[test]
    fn test_invariants_hold_for_well_formed_quiz() {
        assert!(sample_quiz().check_invariants().is_ok());
    }

    #[test]
    fn test_invariant_rejects_processed_exceeding_total() {
        let mut quiz = sample_quiz();
        quiz.processed_questions = 3;
        assert!(quiz.check_invariants().is_err());
    }

    #[test]
    fn test_invariant_rejects_unknown_section_in_counts() {
        let mut quiz = sample_quiz();
        quiz.section_counts.push(SectionCount {
            name: "CLO 1".into(),
            count: 0,
        });
        assert!(quiz.check_invariants().is_err());
    }

    #[test]
    fn test_has_valid_correct_key() {
        let question = Question {
            index: 1,
            stem: "2+2?".into(),
            choices: vec![sample_choice('A'), sample_choice('B')],
            correct_answer_key: "B".into(),
            explanation: None,
            source: AnswerSource::AiGenerated,
            section: "Nội dung chung".into(),
        };
        assert!(question.has_valid_correct_key());
        let mut bad = question;
        bad.correct_answer_key = "Z".into();
        assert!(!bad.has_valid_correct_key());
    }

    #[test]
    fn test_document_kind_from_extension() {
        assert_eq!(DocumentKind::from_extension(".pdf"), DocumentKind::Pdf);
        assert_eq!(DocumentKind::from_extension("docx"), DocumentKind::DocxLike);
        assert_eq!(DocumentKind::from_extension(".doc"), DocumentKind::DocxLike);
        assert_eq!(DocumentKind::from_extension(".txt"), DocumentKind::TextLike);
        assert_eq!(DocumentKind::from_extension(".rtf"), DocumentKind::TextLike);
    }
}
