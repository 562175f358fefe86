//! Text analysis for the lexical index

mod segment;
mod stopwords;
mod tokenizer;

pub use segment::{DictionarySegmenter, Segmenter, UnicodeSegmenter};
pub use stopwords::{CHINESE_STOPWORDS, ENGLISH_STOPWORDS};
pub use tokenizer::Tokenizer;
