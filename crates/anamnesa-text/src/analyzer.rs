//! Tokenization pipeline for the keyword index.
//!
//! `SimpleTokenizer` splits on non-alphanumeric characters (any script), then
//! text is lowercased, Indonesian and English stop
//! words are removed and English words are stemmed. Indonesian particles and
//! possessive suffixes are stripped last. Both length limits count chars:
//! `max_token_len` applies to the token as written, `min_token_len` to the
//! final term.
use std::fmt;

use anamnesa_core::config::TokenizerConfig;
use tantivy::tokenizer::{
    Language, LowerCaser, SimpleTokenizer, Stemmer, StopWordFilter, TextAnalyzer, TokenStream,
};

pub const INDONESIAN_STOPWORDS: &[&str] = &[
    "yang", "dan", "di", "ke", "dari", "untuk", "pada", "dengan", "dalam", "adalah", "ini", "itu", "atau", "jika",
    "dapat", "akan", "tidak", "ada", "bila", "oleh", "satu", "dua", "tiga", "juga", "sudah", "telah", "masih",
    "hanya", "sama", "bisa", "maka", "agar", "supaya", "ia", "dia", "kita", "kami", "mereka", "saya", "anda", "nya",
    "apa", "saja", "karena", "sebagai", "seperti", "para", "serta", "secara", "tersebut", "lebih", "belum", "kalau",
];

pub const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "by", "for", "from", "has", "he", "in", "is", "it", "its", "of", "on",
    "that", "the", "to", "was", "will", "with", "or", "but", "not", "this", "these", "they", "them", "their", "there",
    "then", "than", "so", "if", "when", "where", "why", "how", "what", "which", "who", "whom", "whose", "can", "could",
    "should", "would", "may", "might", "must", "shall", "do", "does", "did", "have", "had", "having",
];

const PARTICLES: &[&str] = &["lah", "kah", "tah", "pun"];
const POSSESSIVES: &[&str] = &["nya", "ku", "mu"];
/// Suffixes are only stripped when at least this many chars remain.
const MIN_STEM_CHARS: usize = 4;

/// The one tokenizer used at build and query time.
#[derive(Clone)]
pub struct Analyzer {
    settings: TokenizerConfig,
    inner: TextAnalyzer,
}

impl Analyzer {
    pub fn new(settings: TokenizerConfig) -> Self {
        let stop_words: Vec<String> = INDONESIAN_STOPWORDS
            .iter()
            .chain(ENGLISH_STOPWORDS)
            .map(|s| (*s).to_string())
            .chain(settings.extra_stopwords.iter().map(|s| s.to_lowercase()))
            .collect();

        let base = TextAnalyzer::builder(SimpleTokenizer::default())
            .filter(LowerCaser)
            .filter(StopWordFilter::remove(stop_words));
        let inner = if settings.stem { base.filter(Stemmer::new(Language::English)).build() } else { base.build() };
        Self { settings, inner }
    }

    pub fn settings(&self) -> &TokenizerConfig {
        &self.settings
    }

    /// Normalized terms of `text`, in order, duplicates kept.
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let mut analyzer = self.inner.clone();
        let mut stream = analyzer.token_stream(text);
        let mut terms = Vec::new();
        let max_chars = self.settings.max_token_len.max(1);
        while stream.advance() {
            let token = stream.token();
            let written = text.get(token.offset_from..token.offset_to).map_or(0, |w| w.chars().count());
            if written > max_chars {
                continue;
            }
            let term = strip_indonesian_suffixes(&token.text);
            if term.chars().count() >= self.settings.min_token_len {
                terms.push(term);
            }
        }
        terms
    }
}

impl Default for Analyzer {
    fn default() -> Self {
        Self::new(TokenizerConfig::default())
    }
}

impl fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Analyzer").field("settings", &self.settings).finish_non_exhaustive()
    }
}

/// Strip one particle then one possessive suffix (`batuknyalah` -> `batuk`).
fn strip_indonesian_suffixes(term: &str) -> String {
    let mut word = term;
    for group in [PARTICLES, POSSESSIVES] {
        if let Some(stem) = group.iter().find_map(|suffix| word.strip_suffix(suffix)) {
            if stem.chars().count() >= MIN_STEM_CHARS {
                word = stem;
            }
        }
    }
    word.to_string()
}
