/*!
 * Heuristic language guard.
 *
 * Each language profile lists characters that are diagnostic for it and a
 * closed list of frequent short words. A text "looks like" the target when:
 * - it is empty, or no profile exists for the target
 * - it contains any target-specific character
 * - at least two of its words are target hint words
 *
 * It is rejected when it is long enough and matches the source hints but no
 * target hints, or when it is long and matches no target hint at all.
 */

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

use crate::language_utils;

/// Target hint hits that settle the question
const TARGET_HITS_ACCEPT: usize = 2;
/// Tokens needed before source hints can reject
const SOURCE_REJECT_MIN_TOKENS: usize = 8;
/// Source hint hits needed to reject
const SOURCE_REJECT_MIN_HITS: usize = 2;
/// Tokens needed before zero target hints rejects
const NO_TARGET_HINTS_MIN_TOKENS: usize = 10;

/// Diagnostic characters and hint words of one language
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageProfile {
    #[serde(default)]
    pub special_chars: String,
    #[serde(default)]
    pub hint_words: Vec<String>,
}

impl LanguageProfile {
    fn new(special_chars: &str, hint_words: &[&str]) -> Self {
        Self {
            special_chars: special_chars.to_string(),
            hint_words: hint_words.iter().map(|w| w.to_string()).collect(),
        }
    }

    fn hint_set(&self) -> HashSet<String> {
        self.hint_words.iter().map(|w| w.to_lowercase()).collect()
    }
}

/// Built-in profiles for en, pl, de, fr, es, pt and ro
pub fn builtin_profiles() -> HashMap<String, LanguageProfile> {
    let mut profiles = HashMap::new();
    profiles.insert(
        "en".to_string(),
        LanguageProfile::new(
            "",
            &["the", "and", "of", "to", "is", "was", "that", "with", "for", "his", "her", "not", "you", "this",
              "are", "have", "but", "they", "from", "which", "had", "were", "she", "he"],
        ),
    );
    profiles.insert(
        "pl".to_string(),
        LanguageProfile::new(
            "ąćęłńśźżĄĆĘŁŃŚŹŻ",
            &["nie", "się", "na", "że", "to", "jest", "do", "jak", "ale", "co", "tak", "był", "była", "jego",
              "jej", "przez", "od", "po", "za", "już"],
        ),
    );
    profiles.insert(
        "de".to_string(),
        LanguageProfile::new(
            "äöüßÄÖÜ",
            &["der", "die", "das", "und", "nicht", "ist", "ein", "eine", "zu", "mit", "sich", "auf", "dem",
              "den", "von", "war", "sie", "es", "ich", "auch"],
        ),
    );
    profiles.insert(
        "fr".to_string(),
        LanguageProfile::new(
            "àâçèêëîïôœùûÿÀÂÇÈÊËÎÏÔŒÙÛŸ",
            &["le", "la", "les", "et", "est", "une", "des", "du", "que", "qui", "dans", "pour", "pas", "sur",
              "avec", "il", "elle", "au", "ce", "ne"],
        ),
    );
    profiles.insert(
        "es".to_string(),
        LanguageProfile::new(
            "ñÑ¿¡",
            &["el", "la", "los", "las", "que", "de", "en", "es", "una", "por", "con", "para", "no", "se", "del",
              "pero", "su", "como", "al", "lo"],
        ),
    );
    profiles.insert(
        "pt".to_string(),
        LanguageProfile::new(
            "ãõÃÕ",
            &["de", "que", "não", "em", "um", "uma", "os", "as", "com", "para", "por", "se", "na", "no", "do",
              "da", "mais", "mas", "ele", "ela"],
        ),
    );
    profiles.insert(
        "ro".to_string(),
        LanguageProfile::new(
            "ășşțţĂȘŞȚŢ",
            &["și", "în", "nu", "este", "un", "care", "cu", "la", "pe", "de", "se", "mai", "din", "pentru",
              "dar", "ce", "sunt", "lui", "fost", "au"],
        ),
    );
    profiles
}

/// Canonical key for profile lookup: ISO 639-1 when one exists
pub fn profile_key(code: &str) -> String {
    language_utils::normalize_to_part1_or_part2t(code).unwrap_or_else(|_| code.trim().to_lowercase())
}

/// Lower-cased letter-only words of at least two characters
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphabetic())
        .filter(|w| w.chars().count() >= 2)
        .map(|w| w.to_lowercase())
        .collect()
}

/// Guard for one language pair
#[derive(Debug, Clone)]
pub struct LanguageGuard {
    source: String,
    target: String,
    source_profile: Option<(LanguageProfile, HashSet<String>)>,
    target_profile: Option<(LanguageProfile, HashSet<String>)>,
}

impl LanguageGuard {
    /// Guard using the built-in profiles
    pub fn new(source_language: &str, target_language: &str) -> Self {
        Self::with_profiles(source_language, target_language, &builtin_profiles())
    }

    pub fn with_profiles(
        source_language: &str,
        target_language: &str,
        profiles: &HashMap<String, LanguageProfile>,
    ) -> Self {
        let source = profile_key(source_language);
        let target = profile_key(target_language);
        let lookup = |key: &str| profiles.get(key).map(|p| (p.clone(), p.hint_set()));
        Self {
            source_profile: lookup(&source),
            target_profile: lookup(&target),
            source,
            target,
        }
    }

    /// Built-in profiles overridden per language by a JSON file
    pub fn from_file(source_language: &str, target_language: &str, path: Option<&Path>) -> Result<Self> {
        let mut profiles = builtin_profiles();
        if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read language profiles: {:?}", path))?;
            let overrides: HashMap<String, LanguageProfile> = serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse language profiles: {:?}", path))?;
            for (code, profile) in overrides {
                profiles.insert(profile_key(&code), profile);
            }
        }
        Ok(Self::with_profiles(source_language, target_language, &profiles))
    }

    pub fn target_language(&self) -> &str {
        &self.target
    }

    /// Whether `text` plausibly is in the target language
    pub fn looks_like_target(&self, text: &str) -> bool {
        if text.trim().is_empty() {
            return true;
        }
        let Some((target_profile, target_hints)) = &self.target_profile else {
            return true;
        };
        if text.chars().any(|c| target_profile.special_chars.contains(c)) {
            return true;
        }

        let tokens = tokenize(text);
        let target_hits = tokens.iter().filter(|t| target_hints.contains(*t)).count();
        if target_hits >= TARGET_HITS_ACCEPT {
            return true;
        }

        if self.source != self.target && tokens.len() >= SOURCE_REJECT_MIN_TOKENS {
            if let Some((_, source_hints)) = &self.source_profile {
                let source_hits = tokens.iter().filter(|t| source_hints.contains(*t)).count();
                if source_hits >= SOURCE_REJECT_MIN_HITS && target_hits == 0 {
                    return false;
                }
            }
        }

        if !target_hints.is_empty() && tokens.len() >= NO_TARGET_HINTS_MIN_TOKENS && target_hits == 0 {
            return false;
        }

        true
    }
}
