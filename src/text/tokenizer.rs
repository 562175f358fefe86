//! Index term normalization

use super::segment::{DictionarySegmenter, Segmenter, UnicodeSegmenter};
use super::stopwords::{CHINESE_STOPWORDS, ENGLISH_STOPWORDS};
use crate::config::{SegmenterKind, TokenizerConfig};
use crate::error::{Result, RetrievalError};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::debug;

/// Turns raw text into the ordered list of terms BM25 indexes
///
/// Output is a pure function of the input and the tokenizer's settings, so
/// identical text always produces identical terms.
#[derive(Debug, Clone)]
pub struct Tokenizer {
    segmenter: Arc<dyn Segmenter>,
    stopwords: HashSet<String>,
    remove_stopwords: bool,
    max_token_length: usize,
    single_char_allow_list: HashSet<char>,
}

impl Default for Tokenizer {
    fn default() -> Self {
        let config = TokenizerConfig::default();
        Self::with_segmenter(&config, Arc::new(UnicodeSegmenter))
    }
}

impl Tokenizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a tokenizer, loading the dictionary if one is configured
    pub fn from_config(config: &TokenizerConfig) -> Result<Self> {
        let segmenter: Arc<dyn Segmenter> = match config.segmenter {
            SegmenterKind::Unicode => Arc::new(UnicodeSegmenter),
            SegmenterKind::Dictionary => {
                let path = config.dictionary_path.as_deref().ok_or_else(|| {
                    RetrievalError::config("dictionary segmenter requires dictionary_path")
                })?;
                let dict = DictionarySegmenter::from_file(path)?;
                debug!("Loaded {} dictionary words from {}", dict.len(), path.display());
                Arc::new(dict)
            }
        };
        Ok(Self::with_segmenter(config, segmenter))
    }

    pub fn with_segmenter(config: &TokenizerConfig, segmenter: Arc<dyn Segmenter>) -> Self {
        let mut stopwords: HashSet<String> = CHINESE_STOPWORDS
            .iter()
            .chain(ENGLISH_STOPWORDS)
            .map(|w| w.to_string())
            .collect();
        stopwords.extend(config.extra_stopwords.iter().map(|w| w.to_lowercase()));

        Self {
            segmenter,
            stopwords,
            remove_stopwords: config.remove_stopwords,
            max_token_length: config.max_token_length,
            single_char_allow_list: config.single_char_allow_list.iter().copied().collect(),
        }
    }

    /// Tokenize a single text
    pub fn tokenize(&self, text: &str) -> Vec<String> {
        let lowered = text.to_lowercase();
        self.segmenter
            .segment(&lowered)
            .into_iter()
            .filter_map(|raw| self.normalize(&raw))
            .collect()
    }

    /// Tokenize several texts
    pub fn tokenize_batch<S: AsRef<str>>(&self, texts: &[S]) -> Vec<Vec<String>> {
        texts.iter().map(|t| self.tokenize(t.as_ref())).collect()
    }

    pub fn add_stopwords<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.stopwords
            .extend(words.into_iter().map(|w| w.as_ref().to_lowercase()));
    }

    pub fn remove_stopwords<I, S>(&mut self, words: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        for word in words {
            self.stopwords.remove(&word.as_ref().to_lowercase());
        }
    }

    pub fn is_stopword(&self, word: &str) -> bool {
        self.remove_stopwords && self.stopwords.contains(word)
    }

    pub fn segmenter_name(&self) -> &str {
        self.segmenter.name()
    }

    /// Strip punctuation and apply the drop rules. `None` means drop.
    fn normalize(&self, raw: &str) -> Option<String> {
        let token: String = raw.chars().filter(|c| c.is_alphanumeric()).collect();
        if token.is_empty() {
            return None;
        }

        let char_count = token.chars().count();
        if char_count == 1 {
            let c = token.chars().next()?;
            if !self.single_char_allow_list.contains(&c) {
                return None;
            }
        }
        if self.is_stopword(&token) {
            return None;
        }
        if token.chars().all(char::is_numeric) {
            return None;
        }
        if char_count > self.max_token_length {
            return None;
        }
        Some(token)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lowercases_and_drops_stopwords() {
        let tokenizer = Tokenizer::new();
        let tokens = tokenizer.tokenize("The Quick brown FOX is here");
        assert_eq!(tokens, vec!["quick", "brown", "fox", "here"]);
    }

    #[test]
    fn test_drops_numbers_and_long_tokens() {
        let tokenizer = Tokenizer::new();
        let tokens = tokenizer.tokenize("clause 2024 v2 abcdefghijklmnopqrstuvwxyz");
        assert_eq!(tokens, vec!["clause", "v2"]);
    }

    #[test]
    fn test_single_char_allow_list() {
        let tokenizer = Tokenizer::new();
        // isolated CJK chars stay unigrams; only the numeral survives
        let tokens = tokenizer.tokenize("第 十 x");
        assert_eq!(tokens, vec!["十"]);
    }

    #[test]
    fn test_cjk_bigrams() {
        let tokenizer = Tokenizer::new();
        assert_eq!(tokenizer.tokenize("违约金"), vec!["违约", "约金"]);
    }

    #[test]
    fn test_chinese_stopword_removed() {
        let tokenizer = Tokenizer::new();
        // 我们 is a stopword bigram; 们支 and 支付 survive
        let tokens = tokenizer.tokenize("我们支付");
        assert_eq!(tokens, vec!["们支", "支付"]);
    }

    #[test]
    fn test_deterministic() {
        let tokenizer = Tokenizer::new();
        let text = "甲方应于 2024年 支付违约金 and penalties.";
        assert_eq!(tokenizer.tokenize(text), tokenizer.tokenize(text));
    }

    #[test]
    fn test_add_and_remove_stopwords() {
        let mut tokenizer = Tokenizer::new();
        tokenizer.add_stopwords(["Contract"]);
        assert!(tokenizer.tokenize("contract terms").iter().all(|t| t != "contract"));

        tokenizer.remove_stopwords(["contract", "the"]);
        assert_eq!(tokenizer.tokenize("the contract"), vec!["the", "contract"]);
    }

    #[test]
    fn test_stopwords_disabled() {
        let config = TokenizerConfig {
            remove_stopwords: false,
            ..Default::default()
        };
        let tokenizer = Tokenizer::from_config(&config).unwrap();
        assert_eq!(tokenizer.tokenize("the end"), vec!["the", "end"]);
    }

    #[test]
    fn test_tokenize_batch() {
        let tokenizer = Tokenizer::new();
        let batch = tokenizer.tokenize_batch(&["alpha beta", "", "gamma"]);
        assert_eq!(batch.len(), 3);
        assert!(batch[1].is_empty());
        assert_eq!(batch[2], vec!["gamma"]);
    }

    #[test]
    fn test_dictionary_config_requires_path() {
        let config = TokenizerConfig {
            segmenter: SegmenterKind::Dictionary,
            ..Default::default()
        };
        assert!(Tokenizer::from_config(&config).is_err());
    }
}
