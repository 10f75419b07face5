/*!
 * Quotation mark and apostrophe normalization for translated markup.
 *
 * Models mix straight, curly and foreign quotes freely. Every quote-like
 * character outside tags is folded to `"` or `'` and then re-emitted with
 * the target language's typographic pairs, nesting one level deeper for
 * each quote opened inside another. A `'` between two letters or digits
 * is an apostrophe. Tags and attribute values are never touched.
 *
 * Running the normalization on its own output changes nothing.
 */

const DOUBLE_QUOTES: &[char] = &[
    '"', '\u{201c}', '\u{201d}', '\u{201e}', '\u{201f}', '\u{00ab}', '\u{00bb}', '\u{2039}', '\u{203a}',
    '\u{275d}', '\u{275e}', '\u{301d}', '\u{301e}', '\u{ff02}',
];
const SINGLE_QUOTES: &[char] = &[
    '\'', '\u{2018}', '\u{2019}', '\u{201a}', '\u{201b}', '`', '\u{00b4}', '\u{02bc}', '\u{02bb}', '\u{02b9}',
    '\u{02bd}',
];
const OPEN_HINTS: &[char] = &['(', '[', '{', '-', '\u{2013}', '\u{2014}', '/', ':'];
const CLOSE_HINTS: &[char] = &['.', ',', '!', '?', ';', ':', ')', ']', '}', '>', '\u{2026}'];

const APOSTROPHE: char = '\u{2019}';

/// Quote pairs of a language, outermost first
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QuoteProfile {
    pub pairs: &'static [(char, char)],
    pub apostrophe: char,
}

const ENGLISH: QuoteProfile = QuoteProfile {
    pairs: &[('\u{201c}', '\u{201d}'), ('\u{2018}', '\u{2019}')],
    apostrophe: APOSTROPHE,
};

impl QuoteProfile {
    /// Profile for a language code; unknown codes use English quotes
    pub fn for_language(code: &str) -> Self {
        let pairs: &'static [(char, char)] = match code.trim().to_ascii_lowercase().as_str() {
            "pl" => &[('\u{201e}', '\u{201d}'), ('\u{00ab}', '\u{00bb}'), ('\u{201a}', '\u{2019}')],
            "de" => &[('\u{201e}', '\u{201c}'), ('\u{201a}', '\u{2018}')],
            "fr" => &[('\u{00ab}', '\u{00bb}'), ('\u{2039}', '\u{203a}'), ('\u{201c}', '\u{201d}')],
            "es" | "pt" => &[('\u{00ab}', '\u{00bb}'), ('\u{201c}', '\u{201d}'), ('\u{2018}', '\u{2019}')],
            "ro" => &[('\u{201e}', '\u{201d}'), ('\u{00ab}', '\u{00bb}'), ('\u{2018}', '\u{2019}')],
            _ => return ENGLISH,
        };
        Self { pairs, apostrophe: APOSTROPHE }
    }
}

/// Result of one normalization
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NormalizedQuotes {
    pub text: String,
    pub quote_replacements: usize,
    pub apostrophe_replacements: usize,
}

impl NormalizedQuotes {
    pub fn replacements(&self) -> usize {
        self.quote_replacements + self.apostrophe_replacements
    }
}

/// Normalize quotes in inner markup for `profile`
pub fn normalize_quotes(markup: &str, profile: QuoteProfile) -> NormalizedQuotes {
    let original: Vec<char> = markup.chars().collect();
    if original.is_empty() {
        return NormalizedQuotes::default();
    }

    let mut in_tag = vec![false; original.len()];
    let mut inside = false;
    for (i, c) in original.iter().enumerate() {
        if inside {
            in_tag[i] = true;
            if *c == '>' {
                inside = false;
            }
        } else if *c == '<' {
            in_tag[i] = true;
            inside = true;
        }
    }

    let folded: Vec<char> = original
        .iter()
        .zip(&in_tag)
        .map(|(c, tag)| match c {
            _ if *tag => *c,
            c if DOUBLE_QUOTES.contains(c) => '"',
            c if SINGLE_QUOTES.contains(c) => '\'',
            c => *c,
        })
        .collect();

    let text_before = |i: usize| (0..i).rev().find(|j| !in_tag[*j]).map(|j| folded[j]);
    let text_after = |i: usize| (i + 1..folded.len()).find(|j| !in_tag[*j]).map(|j| folded[j]);

    let mut result = NormalizedQuotes {
        text: String::with_capacity(markup.len()),
        ..Default::default()
    };
    let mut closers: Vec<char> = Vec::new();

    for (i, c) in original.iter().enumerate() {
        let kind = folded[i];
        if in_tag[i] || (kind != '"' && kind != '\'') {
            result.text.push(*c);
            continue;
        }

        let prev = text_before(i);
        let next = text_after(i);

        if kind == '\'' && prev.is_some_and(char::is_alphanumeric) && next.is_some_and(char::is_alphanumeric) {
            result.text.push(profile.apostrophe);
            if profile.apostrophe != *c {
                result.apostrophe_replacements += 1;
            }
            continue;
        }

        let open_hint = prev.map_or(true, |p| p.is_whitespace() || OPEN_HINTS.contains(&p));
        let close_hint = next.map_or(true, |n| n.is_whitespace() || CLOSE_HINTS.contains(&n));
        let opens = closers.is_empty() || (open_hint && !close_hint);

        let replacement = if opens {
            let (open, close) = profile.pairs[closers.len().min(profile.pairs.len() - 1)];
            closers.push(close);
            open
        } else {
            closers.pop().unwrap_or(profile.pairs[0].1)
        };
        result.text.push(replacement);
        if replacement != *c {
            result.quote_replacements += 1;
        }
    }

    result
}
