//! Prompt templates

/// Prefixed to the first user turn of every windowed conversation
pub const SYSTEM_PREAMBLE: &str = "You are an assistant in a Telegram chat. Give clear answers and a short conclusion in simple words. \
Keep responses brief and to the point. Format text for a Telegram message.\n\n";

/// Extracted document text beyond this many characters is dropped
pub const MAX_DOCUMENT_CHARS: usize = 30_000;

pub fn pitch_prompt(idea: &str) -> String {
    format!(
        "You are a startup mentor. Create a short pitch deck for the idea: \"{}\".\n\
         Include:\n\
         1. Elevator pitch (1-2 sentences)\n\
         2. Problem\n\
         3. Solution\n\
         4. Target audience\n\
         5. Business model",
        idea
    )
}

pub fn educational_guide_prompt(document: &str, file_name: &str, kind_label: &str) -> String {
    let text = truncate_chars(document, MAX_DOCUMENT_CHARS);
    format!(
        "You are a patient teacher. Turn the {} file \"{}\" below into a short study guide for a student.\n\
         Include:\n\
         1. A summary in 3-5 sentences\n\
         2. Key concepts with one-line explanations\n\
         3. Important facts or formulas\n\
         4. Three self-check questions\n\n\
         Document:\n{}",
        kind_label, file_name, text
    )
}

/// Frame a generated guide for delivery
pub fn wrap_guide(file_name: &str, guide: &str) -> String {
    format!(
        "*Educational Guide*\n`{}`\n\n{}\n\n_You can now ask me questions about this document!_",
        file_name, guide
    )
}

/// Question about a previously uploaded document
pub fn document_question_prompt(document: &str, question: &str) -> String {
    format!(
        "Answer the question using the document below.\n\nDocument:\n{}\n\nQuestion: {}",
        truncate_chars(document, MAX_DOCUMENT_CHARS),
        question
    )
}

fn truncate_chars(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
