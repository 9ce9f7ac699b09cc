//! Critique messages appended to the conversation between attempts.

use vizeval_client::Evaluator;

use super::attempt::AttemptRecord;
use crate::request::ChatMessage;

/// Build the critique for a rejected attempt.
///
/// Includes:
/// - Attempt counter (e.g., "Attempt 2/4")
/// - The score with three decimals, or `N/A` when unscored
/// - Evaluator feedback, when there is any
/// - Instruction to rewrite the previous answer
///
/// ```
/// use vizeval_client::Evaluator;
/// use vizeval_gate::retry::build_retry_feedback;
///
/// let critique = build_retry_feedback(Some(0.42), "Missing dosage", 1, 3, &Evaluator::Medical);
/// assert!(critique.contains("Attempt 1/3"));
/// assert!(critique.contains("0.420"));
/// ```
#[must_use]
pub fn build_retry_feedback(
    score: Option<f64>,
    feedback: &str,
    attempt: usize,
    max_attempts: usize,
    evaluator: &Evaluator,
) -> String {
    let score_str = score.map_or_else(|| "N/A".to_string(), |s| format!("{s:.3}"));

    let mut critique = format!(
        "Attempt {attempt}/{max_attempts}: your last answer was rejected by the {evaluator} quality evaluation (score {score_str}).\n"
    );

    let feedback = feedback.trim();
    if !feedback.is_empty() {
        critique.push_str("\nEvaluator feedback:\n  ");
        critique.push_str(feedback);
        critique.push('\n');
    }

    critique.push_str(&format!(
        "\nRewrite your previous answer to improve its {evaluator} quality."
    ));

    critique
}

/// Messages to append after a rejected attempt: the rejected answer as an
/// assistant turn, then a system critique.
///
/// Returns nothing for attempts that never produced text.
#[must_use]
pub fn feedback_messages(
    record: &AttemptRecord,
    max_attempts: usize,
    evaluator: &Evaluator,
) -> Vec<ChatMessage> {
    let Some(text) = record.response_text() else {
        return Vec::new();
    };

    let score = record.evaluation.scored.then_some(record.evaluation.score);
    vec![
        ChatMessage::assistant(text),
        ChatMessage::system(build_retry_feedback(
            score,
            &record.evaluation.feedback,
            record.attempt_number,
            max_attempts,
            evaluator,
        )),
    ]
}
