//! Deterministic text normalization applied before matching.
//!
//! Matching results must be reproducible for a given (text, lexicon version)
//! pair, so the normalization rules are versioned: any change to the folding
//! table or tokenization below must bump [`NORMALIZER_VERSION`].

/// Bumped whenever the normalization rules change.
pub const NORMALIZER_VERSION: u32 = 1;

/// Longest run of one character kept after collapsing ("heyyyy" -> "heyy",
/// "meet" keeps its double e).
const MAX_CHAR_RUN: usize = 2;

/// A normalized token plus the byte span of the raw text it came from.
#[derive(Debug, Clone)]
pub(crate) struct NormToken {
    pub text: String,
    pub start: usize,
    pub end: usize,
}

#[derive(Debug, Clone)]
pub(crate) struct NormalizedText {
    pub tokens: Vec<NormToken>,
}

impl NormalizedText {
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Byte span in the raw text covered by tokens [from, to).
    pub fn span(&self, from: usize, to: usize) -> (usize, usize) {
        let start = self.tokens[from].start;
        let end = self.tokens[to - 1].end;
        (start, end)
    }

    /// Tokens [from, to) joined with single spaces, the form similarity is
    /// computed on.
    pub fn window_text(&self, from: usize, to: usize) -> String {
        let mut out = String::new();
        for token in &self.tokens[from..to] {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(&token.text);
        }
        out
    }
}

/// Common leetspeak substitutions, folded before tokenization.
fn fold_char(c: char) -> char {
    match c {
        '0' => 'o',
        '1' => 'i',
        '3' => 'e',
        '4' => 'a',
        '5' => 's',
        '7' => 't',
        '@' => 'a',
        '$' => 's',
        _ => c,
    }
}

/// Case-folds, maps leetspeak, collapses long character runs and splits on
/// anything non-alphanumeric. Each token remembers the raw byte range it was
/// derived from so match spans can point back into the original message.
pub(crate) fn normalize(raw: &str) -> NormalizedText {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut tok_start = 0usize;

    let flush = |tokens: &mut Vec<NormToken>, current: &mut String, start: usize, end: usize| {
        if !current.is_empty() {
            tokens.push(NormToken {
                text: std::mem::take(current),
                start,
                end,
            });
        }
    };

    let mut last_end = 0usize;
    for (idx, ch) in raw.char_indices() {
        let ch_end = idx + ch.len_utf8();
        let lowered = ch.to_lowercase().next().unwrap_or(ch);
        let folded = fold_char(lowered);

        if folded.is_alphanumeric() {
            if current.is_empty() {
                tok_start = idx;
            }
            let run = current.chars().rev().take_while(|c| *c == folded).count();
            if run < MAX_CHAR_RUN {
                current.push(folded);
            }
            last_end = ch_end;
        } else {
            flush(&mut tokens, &mut current, tok_start, last_end);
        }
    }
    flush(&mut tokens, &mut current, tok_start, last_end);

    NormalizedText { tokens }
}

/// Normalized token texts for a lexicon pattern (span information is not
/// needed on the lexicon side).
pub(crate) fn normalize_pattern(pattern: &str) -> Vec<String> {
    normalize(pattern).tokens.into_iter().map(|t| t.text).collect()
}

/// Coarse character signature over a-z / 0-9, used as a prefilter so most
/// candidate windows never pay the edit-distance cost.
pub(crate) fn signature(text: &str) -> u64 {
    let mut bits = 0u64;
    for c in text.chars() {
        match c {
            'a'..='z' => bits |= 1 << (c as u32 - 'a' as u32),
            '0'..='9' => bits |= 1 << (26 + c as u32 - '0' as u32),
            _ => {}
        }
    }
    bits
}
