//! System prompts for VLM-based question detection.
//!
//! Centralising every prompt here serves two purposes:
//!
//! 1. **Single source of truth** — the response schema the parser expects is
//!    described in exactly one place per [`DetectionSchema`].
//!
//! 2. **Testability** — unit tests can inspect the prompts directly without
//!    spinning up a real VLM.
//!
//! Callers can override the prompt via
//! [`crate::config::ExtractionConfig::system_prompt`]; the constants here are
//! used only when no override is provided.

use crate::detection::{DetectionSchema, CONTINUATION_ID};

/// Shared rules for both schemas. `{continuation}` is replaced with
/// [`CONTINUATION_ID`].
const DETECTION_RULES: &str = r#"You are an exam-paper layout analyst. You receive one scanned page of an exam paper. Locate every question on the page.

Follow these rules precisely:

1. COORDINATES
   - Every box is [ymin, xmin, ymax, xmax] in a 0-1000 space relative to the page
     (0,0 is the top-left corner, 1000,1000 the bottom-right)
   - Boxes must enclose the whole question: stem, options, figures, tables, formulae

2. MULTI-COLUMN LAYOUT
   - A question that flows from one column into the next gets one box per column
   - List its boxes in reading order (left column first, then right column)
   - Never merge two columns into one wide box

3. CONTINUATIONS
   - Content at the top of the page that finishes a question begun on the previous
     page gets the id "{continuation}"
   - Use "{continuation}" for nothing else

4. IDS
   - Use the question number exactly as printed (e.g. "12", "3(b)")
   - If no number is printed, use a short sequential id ("q1", "q2", ...)

5. WHAT TO IGNORE
   - Page headers, footers, page numbers, section titles and instructions that are
     not part of a question
   - Answer sheets and blank answer areas below the last line of a question

6. OUTPUT FORMAT
   - Output ONLY a JSON array, no commentary
   - Do NOT wrap the array in ```json fences"#;

const BASIC_SCHEMA: &str = r#"
   - Each element: {"id": "<question id>", "boxes": [[ymin, xmin, ymax, xmax], ...]}"#;

const DETAILED_SCHEMA: &str = r#"
   - Each element: {"id": "<question id>", "boxes": [[ymin, xmin, ymax, xmax], ...],
     "type": "<multiple_choice | fill_in | short_answer | essay | other>",
     "summary": "<one-line summary of what the question asks>"}"#;

/// Instruction sent with the page image in the user turn.
pub const USER_INSTRUCTION: &str = "Detect every question on this page.";

/// Build the default system prompt for a schema.
pub fn detection_prompt(schema: DetectionSchema) -> String {
    let rules = DETECTION_RULES.replace("{continuation}", CONTINUATION_ID);
    let shape = match schema {
        DetectionSchema::Basic => BASIC_SCHEMA,
        DetectionSchema::Detailed => DETAILED_SCHEMA,
    };
    format!("{rules}{shape}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompts_name_the_continuation_sentinel() {
        for schema in [DetectionSchema::Basic, DetectionSchema::Detailed] {
            let p = detection_prompt(schema);
            assert!(p.contains("\"continuation\""));
            assert!(!p.contains("{continuation}"));
        }
    }

    #[test]
    fn detailed_prompt_asks_for_extra_fields() {
        assert!(detection_prompt(DetectionSchema::Detailed).contains("\"summary\""));
        assert!(!detection_prompt(DetectionSchema::Basic).contains("\"summary\""));
    }
}
