//! Word segmentation
//!
//! Alphabetic scripts are split on UAX#29 word boundaries. Runs of CJK
//! ideographs carry no word boundaries, so they are handled by the
//! segmenter's own strategy.

use crate::error::{Result, RetrievalError};
use crate::util::is_cjk;
use std::collections::HashSet;
use std::fmt::Debug;
use std::path::Path;
use unicode_segmentation::UnicodeSegmentation;

/// Splits text into raw (un-normalized) word candidates
pub trait Segmenter: Send + Sync + Debug {
    fn segment(&self, text: &str) -> Vec<String>;

    /// Short name for logs and stats
    fn name(&self) -> &str;
}

/// Split `text` into maximal runs of CJK and non-CJK characters
fn script_runs(text: &str) -> Vec<(bool, &str)> {
    let mut runs = Vec::new();
    let mut start = 0;
    let mut current: Option<bool> = None;

    for (idx, c) in text.char_indices() {
        let cjk = is_cjk(c);
        if let Some(prev) = current {
            if prev != cjk {
                runs.push((prev, &text[start..idx]));
                start = idx;
            }
        }
        current = Some(cjk);
    }
    if let Some(prev) = current {
        runs.push((prev, &text[start..]));
    }
    runs
}

/// Default segmenter: UAX#29 words plus overlapping CJK bigrams
#[derive(Debug, Clone, Default)]
pub struct UnicodeSegmenter;

impl Segmenter for UnicodeSegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for (cjk, run) in script_runs(text) {
            if cjk {
                let chars: Vec<char> = run.chars().collect();
                if chars.len() == 1 {
                    out.push(chars[0].to_string());
                } else {
                    out.extend(chars.windows(2).map(|w| w.iter().collect::<String>()));
                }
            } else {
                out.extend(run.unicode_words().map(str::to_string));
            }
        }
        out
    }

    fn name(&self) -> &str {
        "unicode"
    }
}

/// Forward maximum matching against a word list
///
/// CJK runs are matched greedily against the dictionary, longest word first.
/// Characters not covered by any entry are emitted one by one.
#[derive(Debug, Clone)]
pub struct DictionarySegmenter {
    words: HashSet<String>,
    max_word_chars: usize,
}

impl DictionarySegmenter {
    pub fn new<I, S>(words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let words: HashSet<String> = words
            .into_iter()
            .map(Into::into)
            .filter(|w| !w.is_empty())
            .collect();
        let max_word_chars = words.iter().map(|w| w.chars().count()).max().unwrap_or(1);
        Self {
            words,
            max_word_chars,
        }
    }

    /// Load a word list. The first whitespace-separated field of each line is
    /// the word, so jieba-style `word freq tag` files also work.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RetrievalError::config(format!(
                "Failed to read dictionary '{}': {}",
                path.display(),
                e
            ))
        })?;
        let words = content
            .lines()
            .filter_map(|line| line.split_whitespace().next())
            .map(str::to_string);
        Ok(Self::new(words))
    }

    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    fn match_run(&self, run: &str, out: &mut Vec<String>) {
        let chars: Vec<char> = run.chars().collect();
        let mut pos = 0;
        while pos < chars.len() {
            let longest = self.max_word_chars.min(chars.len() - pos);
            let matched = (2..=longest).rev().find_map(|len| {
                let candidate: String = chars[pos..pos + len].iter().collect();
                self.words.contains(&candidate).then_some((candidate, len))
            });
            match matched {
                Some((word, len)) => {
                    out.push(word);
                    pos += len;
                }
                None => {
                    out.push(chars[pos].to_string());
                    pos += 1;
                }
            }
        }
    }
}

impl Segmenter for DictionarySegmenter {
    fn segment(&self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        for (cjk, run) in script_runs(text) {
            if cjk {
                self.match_run(run, &mut out);
            } else {
                out.extend(run.unicode_words().map(str::to_string));
            }
        }
        out
    }

    fn name(&self) -> &str {
        "dictionary"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_script_runs() {
        let runs = script_runs("BM25检索 test");
        assert_eq!(runs, vec![(false, "BM25"), (true, "检索"), (false, " test")]);
    }

    #[test]
    fn test_unicode_segmenter_bigrams() {
        let tokens = UnicodeSegmenter.segment("违约金");
        assert_eq!(tokens, vec!["违约", "约金"]);
    }

    #[test]
    fn test_unicode_segmenter_mixed() {
        let tokens = UnicodeSegmenter.segment("Hello, 世界! rust");
        assert_eq!(tokens, vec!["Hello", "世界", "rust"]);
    }

    #[test]
    fn test_unicode_segmenter_single_cjk() {
        assert_eq!(UnicodeSegmenter.segment("第 十"), vec!["第", "十"]);
    }

    #[test]
    fn test_dictionary_segmenter_max_match() {
        let seg = DictionarySegmenter::new(["甲方", "支付", "违约金", "违约"]);
        assert_eq!(seg.segment("甲方支付违约金"), vec!["甲方", "支付", "违约金"]);
    }

    #[test]
    fn test_dictionary_segmenter_unknown_chars() {
        let seg = DictionarySegmenter::new(["服务"]);
        assert_eq!(seg.segment("乙方提供服务"), vec!["乙", "方", "提", "供", "服务"]);
    }

    #[test]
    fn test_dictionary_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "违约金 100 n").unwrap();
        writeln!(file, "条款").unwrap();
        writeln!(file).unwrap();
        let seg = DictionarySegmenter::from_file(file.path()).unwrap();
        assert_eq!(seg.len(), 2);
        assert_eq!(seg.segment("违约金条款"), vec!["违约金", "条款"]);
    }

    #[test]
    fn test_dictionary_missing_file() {
        let err = DictionarySegmenter::from_file(Path::new("/nonexistent/dict.txt")).unwrap_err();
        assert!(matches!(err, RetrievalError::Configuration(_)));
    }
}
