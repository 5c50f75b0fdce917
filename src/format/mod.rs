//! Reply Formatter
//!
//! Turns raw model output into transport-safe message bodies:
//!
//! 1. [`sanitize`] balances stray inline backticks and unterminated fences
//! 2. [`chunk`] splits long text on line boundaries, keeping code fences
//!    well-formed in every chunk
//! 3. [`ReplyFormatter::deliver`] sends each chunk with a three-tier markup
//!    fallback (see `deliver.rs`)

mod deliver;

pub use deliver::ReplyFormatter;

use std::borrow::Cow;

/// Safe per-message length, below Telegram's hard 4096 limit
pub const DEFAULT_CHUNK_LIMIT: usize = 4000;

const FENCE: &str = "```";
const FENCE_CLOSE: &str = "\n```";

/// One transport-safe segment of a reply
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageChunk {
    pub text: String,
    /// 1-based
    pub part_index: usize,
    pub total_parts: usize,
    /// Language tag of a code block that was closed at the end of this chunk
    /// and reopened at the start of the next (empty string = no tag)
    pub code_block_carry: Option<String>,
}

impl MessageChunk {
    fn single(text: &str) -> Self {
        Self {
            text: text.to_string(),
            part_index: 1,
            total_parts: 1,
            code_block_carry: None,
        }
    }

    pub fn is_multipart(&self) -> bool {
        self.total_parts > 1
    }

    /// Final message body, with the "Part i/N" marker on multi-part replies
    pub fn render(&self) -> String {
        if self.is_multipart() {
            format!("{}{}", part_prefix(self.part_index, self.total_parts), self.text)
        } else {
            self.text.clone()
        }
    }
}

fn part_prefix(index: usize, total: usize) -> String {
    format!("*Part {}/{}*\n\n", index, total)
}

fn is_fence_line(line: &str) -> bool {
    line.trim().starts_with(FENCE)
}

/// Fix markdown that would break Telegram's parser.
///
/// Outside fenced blocks, a line with an odd number of backticks gets one
/// appended. If the whole text has an odd number of fences, a closing fence
/// is appended. Applying it twice changes nothing.
pub fn sanitize(text: &str) -> String {
    let mut in_code_block = false;
    let mut lines: Vec<Cow<'_, str>> = Vec::new();

    for line in text.split('\n') {
        if is_fence_line(line) {
            in_code_block = !in_code_block;
            lines.push(Cow::Borrowed(line));
            continue;
        }

        if !in_code_block && line.matches('`').count() % 2 != 0 {
            lines.push(Cow::Owned(format!("{}`", line)));
        } else {
            lines.push(Cow::Borrowed(line));
        }
    }

    let mut result = lines.join("\n");
    if result.matches(FENCE).count() % 2 != 0 {
        result.push_str(FENCE_CLOSE);
    }
    result
}

/// Split text into chunks whose rendered form (prefix included) is at most
/// `limit` characters.
///
/// Text within the limit comes back as a single chunk. Otherwise lines are
/// packed greedily; a split inside a fenced block closes the block and
/// reopens it, with the same language tag, in the next chunk. Lines longer
/// than a whole chunk are cut at character boundaries.
pub fn chunk(text: &str, limit: usize) -> Vec<MessageChunk> {
    if text.chars().count() <= limit {
        return vec![MessageChunk::single(text)];
    }

    // The prefix width depends on the part count, which depends on the
    // budget. Re-split until the digit count settles.
    let mut assumed_parts = 2;
    let pieces = loop {
        let reserve = part_prefix(assumed_parts, assumed_parts).chars().count();
        let pieces = split_lines(text, limit.saturating_sub(reserve));
        if digits(pieces.len()) <= digits(assumed_parts) {
            break pieces;
        }
        assumed_parts = pieces.len();
    };

    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, (text, carry))| MessageChunk {
            text,
            part_index: i + 1,
            total_parts: total,
            code_block_carry: carry,
        })
        .collect()
}

fn digits(n: usize) -> usize {
    n.max(1).to_string().len()
}

/// Greedy line packer. Every returned body is at most `budget` chars.
fn split_lines(text: &str, budget: usize) -> Vec<(String, Option<String>)> {
    let capacity = budget.saturating_sub(FENCE_CLOSE.len()).max(1);
    let mut packer = Packer::new(capacity);

    for line in text.split('\n') {
        if is_fence_line(line) {
            packer.push_fence(line);
        } else {
            packer.push_line(line);
        }
    }

    packer.finish()
}

struct Packer {
    capacity: usize,
    chunks: Vec<(String, Option<String>)>,
    current: String,
    current_len: usize,
    has_lines: bool,
    /// Language of the fenced block we are inside, if any
    open_lang: Option<String>,
}

impl Packer {
    fn new(capacity: usize) -> Self {
        Self {
            capacity,
            chunks: Vec::new(),
            current: String::new(),
            current_len: 0,
            has_lines: false,
            open_lang: None,
        }
    }

    /// Fence lines are never split; longer ones lose the tail of their tag
    fn max_fence_len(&self) -> usize {
        (self.capacity / 2).max(FENCE.len())
    }

    fn reopen_header_len(&self) -> usize {
        self.open_lang
            .as_ref()
            .map(|lang| FENCE.len() + lang.chars().count())
            .unwrap_or(0)
    }

    fn push_fence(&mut self, line: &str) {
        let limit = self.max_fence_len();
        let too_long = line.chars().count() > limit;

        if self.open_lang.is_some() {
            // Closing fence goes in while the block is still open
            self.append(if too_long { FENCE } else { line });
            self.open_lang = None;
            return;
        }

        let lang: String = line
            .trim()
            .trim_start_matches('`')
            .trim()
            .chars()
            .take(limit - FENCE.len())
            .collect();
        if too_long {
            self.append(&format!("{}{}", FENCE, lang));
        } else {
            self.append(line);
        }
        self.open_lang = Some(lang);
    }

    fn push_line(&mut self, line: &str) {
        let header = self.reopen_header_len();
        let max_piece = if header > 0 {
            self.capacity.saturating_sub(header + 1).max(1)
        } else {
            self.capacity
        };

        for piece in split_at_chars(line, max_piece) {
            self.append(piece);
        }
    }

    fn append(&mut self, piece: &str) {
        let piece_len = piece.chars().count();
        if self.has_lines && self.current_len + 1 + piece_len > self.capacity {
            self.flush();
        }
        if self.has_lines {
            self.current.push('\n');
            self.current_len += 1;
        }
        self.current.push_str(piece);
        self.current_len += piece_len;
        self.has_lines = true;
    }

    fn flush(&mut self) {
        let mut body = std::mem::take(&mut self.current);
        let carry = self.open_lang.clone();
        if carry.is_some() {
            body.push_str(FENCE_CLOSE);
        }
        self.chunks.push((body, carry));

        self.current_len = 0;
        self.has_lines = false;
        if let Some(lang) = &self.open_lang {
            self.current = format!("{}{}", FENCE, lang);
            self.current_len = self.current.chars().count();
            self.has_lines = true;
        }
    }

    fn finish(mut self) -> Vec<(String, Option<String>)> {
        if self.has_lines {
            self.chunks.push((self.current, None));
        }
        self.chunks
    }
}

/// Cut a line into pieces of at most `max` chars (UTF-8 safe).
///
/// A cut is moved back when the next piece would start with a fence, so no
/// piece reads as a fence line on its own.
fn split_at_chars(line: &str, max: usize) -> Vec<&str> {
    if line.chars().count() <= max {
        return vec![line];
    }

    let mut pieces = Vec::new();
    let mut rest = line;
    while !rest.is_empty() {
        let bounds: Vec<usize> = rest
            .char_indices()
            .map(|(i, _)| i)
            .skip(1)
            .take(max)
            .collect();
        let mut cut = if rest.chars().count() <= max {
            rest.len()
        } else {
            bounds.last().copied().unwrap_or(rest.len())
        };

        if cut < rest.len() {
            let safe = bounds
                .iter()
                .rev()
                .copied()
                .find(|&i| i <= cut && !rest[i..].trim_start().starts_with(FENCE));
            if let Some(i) = safe {
                cut = i;
            }
        }

        let (piece, tail) = rest.split_at(cut);
        pieces.push(piece);
        rest = tail;
    }
    pieces
}

/// Remove markdown sentinels for the last-resort plain send
pub fn strip_markup(text: &str) -> String {
    text.replace(FENCE, "")
        .replace('`', "")
        .replace('*', "")
        .replace('_', "")
}
