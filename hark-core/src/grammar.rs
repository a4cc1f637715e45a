//! Pronunciation-dictionary compiler for grammar-constrained listening.
//!
//! A [`GrammarSpec`] maps key-phrases to phoneme strings, one `.`-separated
//! phoneme group per word:
//!
//! ```text
//! "hey mycroft" => "HH EY.M AY K R AO F T"
//! ```
//!
//! [`compile`] flattens it into the decoder's dictionary format, one
//! `WORD PHONEMES` line per word, inside a temporary file whose lifetime is
//! tied to the returned [`CompiledGrammar`].

use std::fs;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use tempfile::TempPath;
use tracing::debug;

use crate::error::{ListenerError, Result};

/// Built-in English digit table used for number recognition.
const ENGLISH_DIGITS: [(&str, &str); 10] = [
    ("ONE", "W AH N"),
    ("TWO", "T UW"),
    ("THREE", "TH R IY"),
    ("FOUR", "F AO R"),
    ("FIVE", "F AY V"),
    ("SIX", "S IH K S"),
    ("SEVEN", "S EH V AH N"),
    ("EIGHT", "EY T"),
    ("NINE", "N AY N"),
    ("TEN", "T EH N"),
];

/// One key-phrase and its phoneme groups.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrammarEntry {
    pub phrase: String,
    pub phonemes: String,
}

impl GrammarEntry {
    /// Words of the phrase paired with their phoneme group.
    pub fn words(&self) -> impl Iterator<Item = (&str, &str)> {
        self.phrase
            .split_whitespace()
            .zip(self.phonemes.split('.'))
    }
}

/// Ordered mapping of key-phrase → phoneme string.
///
/// Every entry is validated on insertion: the number of words must equal the
/// number of non-empty phoneme groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GrammarSpec {
    entries: Vec<GrammarEntry>,
}

impl GrammarSpec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a grammar from `(phrase, phonemes)` pairs, failing on the first
    /// malformed entry.
    pub fn from_pairs<I, P, Q>(pairs: I) -> Result<Self>
    where
        I: IntoIterator<Item = (P, Q)>,
        P: Into<String>,
        Q: Into<String>,
    {
        let mut spec = Self::new();
        for (phrase, phonemes) in pairs {
            spec.insert(phrase, phonemes)?;
        }
        Ok(spec)
    }

    /// Add or replace a key-phrase.
    ///
    /// # Errors
    /// `ListenerError::Grammar` when the word count and phoneme-group count
    /// differ, or when either side is empty.
    pub fn insert(&mut self, phrase: impl Into<String>, phonemes: impl Into<String>) -> Result<()> {
        let phrase: String = phrase.into();
        let phonemes: String = phonemes.into();

        let words: Vec<&str> = phrase.split_whitespace().collect();
        let groups: Vec<String> = phonemes
            .split('.')
            .map(|g| g.split_whitespace().collect::<Vec<_>>().join(" "))
            .collect();
        let non_empty = groups.iter().filter(|g| !g.is_empty()).count();
        let word_count = words.len();

        if word_count == 0 || non_empty != groups.len() || word_count != groups.len() {
            return Err(ListenerError::Grammar {
                phrase: phrase.clone(),
                words: word_count,
                groups: non_empty,
            });
        }

        let entry = GrammarEntry {
            phrase: words.join(" "),
            phonemes: groups.join("."),
        };

        match self.entries.iter_mut().find(|e| e.phrase == entry.phrase) {
            Some(existing) => *existing = entry,
            None => self.entries.push(entry),
        }
        Ok(())
    }

    pub fn entries(&self) -> &[GrammarEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Total number of dictionary lines this grammar compiles to.
    pub fn word_count(&self) -> usize {
        self.entries.iter().map(|e| e.words().count()).sum()
    }
}

/// A dictionary file produced by [`compile`].
///
/// The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct CompiledGrammar {
    path: TempPath,
    lines: usize,
}

impl CompiledGrammar {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of `WORD PHONEMES` lines written.
    pub fn lines(&self) -> usize {
        self.lines
    }

    /// Persist the file past this value's lifetime and hand its path over.
    pub fn keep(self) -> Result<PathBuf> {
        self.path.keep().map_err(|e| ListenerError::Io(e.error))
    }
}

/// Write `grammar` to a fresh temporary dictionary file.
///
/// The file is flushed and its handle closed before this returns.
///
/// # Errors
/// `ListenerError::Io` if the file cannot be created or written.
pub fn compile(grammar: &GrammarSpec) -> Result<CompiledGrammar> {
    let mut file = tempfile::Builder::new()
        .prefix("hark-grammar-")
        .suffix(".dict")
        .tempfile()?;

    let mut lines = 0usize;
    {
        let mut writer = BufWriter::new(file.as_file_mut());
        for entry in grammar.entries() {
            for (word, phonemes) in entry.words() {
                writeln!(writer, "{word} {phonemes}")?;
                lines += 1;
            }
        }
        writer.flush()?;
    }

    let path = file.into_temp_path();
    debug!(path = %path.display(), lines, "compiled grammar dictionary");
    Ok(CompiledGrammar { path, lines })
}

/// Parse a dictionary file back into `(word, phonemes)` pairs.
pub fn read_dictionary(path: &Path) -> Result<Vec<(String, String)>> {
    let raw = fs::read_to_string(path)?;
    let pairs = raw
        .lines()
        .filter_map(|line| {
            let mut tokens = line.split_whitespace();
            let word = tokens.next()?;
            Some((word.to_string(), tokens.collect::<Vec<_>>().join(" ")))
        })
        .collect();
    Ok(pairs)
}

/// The built-in `ONE`…`TEN` grammar.
pub fn english_digits() -> GrammarSpec {
    GrammarSpec {
        entries: ENGLISH_DIGITS
            .iter()
            .map(|(phrase, phonemes)| GrammarEntry {
                phrase: (*phrase).to_string(),
                phonemes: (*phonemes).to_string(),
            })
            .collect(),
    }
}

/// Digit grammar for a language tag.
///
/// # Errors
/// `ListenerError::UnsupportedLanguage` for anything other than English.
pub fn digit_grammar(lang: &str) -> Result<GrammarSpec> {
    if lang.trim().to_ascii_lowercase().starts_with("en") {
        Ok(english_digits())
    } else {
        Err(ListenerError::UnsupportedLanguage(lang.to_string()))
    }
}
