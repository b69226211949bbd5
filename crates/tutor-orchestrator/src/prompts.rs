//! Prompt templates for each tutoring phase.

use tutor_generator::Prompt;

/// Appended to Walk feedback when the practice answer was wrong.
pub const WALK_CONTINUATION_NOTE: &str =
    "Let's keep going. The next question will check this again.";

/// Appended to Run feedback when the assessment answer was wrong.
pub const RUN_RETRY_NOTE: &str = "Not quite yet. Let's practice this once more.";

const FORMATTING: &str =
    "Use Markdown for formatting: bold key terms, use lists, and wrap all math in `code blocks`.";

const JUDGMENT_FORMAT: &str = "{\"is_correct\": boolean, \"feedback\": \"Your short, encouraging feedback here.\"}";

/// Line appended to Run feedback after mastery is recorded.
#[must_use]
pub fn mastery_note(skill_name: &str) -> String {
    format!("**You've mastered: {skill_name}!** Send any message to continue.")
}

/// Reply for a student who has nothing left to learn.
#[must_use]
pub fn completion_message(path_name: &str) -> String {
    format!("### Congratulations!\n\nYou have mastered the entire {path_name} path! Great work.")
}

/// Crawl: explain the concept.
#[must_use]
pub fn explain(skill_name: &str) -> Prompt {
    Prompt::text(format!(
        "You are a teacher. Your task is to EXPLAIN the concept of '{skill_name}'. \
         {FORMATTING} Keep it simple. End by asking if the student understands and is ready to try an example."
    ))
}

/// Walk_Ask: one guided practice question.
#[must_use]
pub fn walk_question(skill_name: &str, student_message: &str) -> Prompt {
    Prompt::text(format!(
        "You are a friendly tutor. The student has just learned the definition of '{skill_name}' \
         and replied: '{student_message}'. Ask exactly ONE simple practice question about \
         '{skill_name}', with a leading hint toward the first step. Do NOT solve it. {FORMATTING}"
    ))
}

/// Walk_Evaluate: judge the practice answer. The reply must be JSON only.
#[must_use]
pub fn walk_evaluation(skill_name: &str, question: &str, answer: &str) -> Prompt {
    Prompt::json(format!(
        "You are a friendly tutor teaching '{skill_name}'. You asked the student this practice \
         question:\n\n{question}\n\nThe student answered: '{answer}'\n\n\
         Decide whether the answer is correct. If it is not, explain the mistake gently and show \
         the right approach. Respond ONLY with a single JSON object in the format: {JUDGMENT_FORMAT}"
    ))
}

/// Run_Ask: one direct assessment question.
#[must_use]
pub fn run_question(skill_name: &str) -> Prompt {
    Prompt::text(format!(
        "You are an examiner. Assess whether the student has mastered '{skill_name}'. \
         Ask exactly ONE direct question that tests the skill. Do NOT include the answer or any hints. \
         {FORMATTING}"
    ))
}

/// Run_Evaluate: grade the assessment answer with reasoning first.
#[must_use]
pub fn run_evaluation(skill_name: &str, question: &str, answer: &str) -> Prompt {
    Prompt::text(format!(
        "You are an examiner grading a question on '{skill_name}'.\n\nQuestion:\n{question}\n\n\
         Student's answer: '{answer}'\n\n\
         First solve the question yourself step by step and compare your result with the \
         student's answer. Then, on the final line, output a single minified JSON object in the \
         format: {JUDGMENT_FORMAT}. Example: {{\"is_correct\":true,\"feedback\":\"Perfect!\"}}"
    ))
}

/// Summary: congratulate and introduce the next skill.
#[must_use]
pub fn next_topic(mastered_skill: &str, next_skill: &str) -> Prompt {
    Prompt::text(format!(
        "The student just mastered '{mastered_skill}'. Briefly congratulate them and introduce the \
         next topic: '{next_skill}'. Explain why it's the next logical step. End by asking if they \
         are ready to continue."
    ))
}

/// Summary: congratulate on finishing the whole path.
#[must_use]
pub fn path_complete(mastered_skill: &str, path_name: &str) -> Prompt {
    Prompt::text(format!(
        "The student has just mastered '{mastered_skill}', the final skill of the {path_name} \
         path. Congratulate them on completing the entire learning path."
    ))
}
