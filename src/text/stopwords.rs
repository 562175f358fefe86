//! Built-in stopword lists

/// Chinese function words
pub const CHINESE_STOPWORDS: &[&str] = &[
    "的", "了", "在", "是", "我", "有", "和", "就", "不", "人", "都", "一", "一个", "上", "也",
    "很", "到", "说", "要", "去", "你", "会", "着", "没有", "看", "好", "自己", "这", "那", "里",
    "给", "把", "被", "这个", "我们", "你们", "他们", "它们", "它", "他", "她", "及", "其", "等",
    "与", "或", "但", "而", "且", "若", "否则", "因此", "所以", "但是", "虽然", "尽管", "如果",
    "那么", "由于", "按照", "根据", "依据", "为了", "关于", "对", "对于", "向", "往", "从", "由",
    "于", "至", "直到", "以上", "以下", "之中", "之间", "之外", "以内", "以外",
];

/// English stopwords (Lucene's default set)
pub const ENGLISH_STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "if", "in", "into", "is", "it",
    "no", "not", "of", "on", "or", "such", "that", "the", "their", "then", "there", "these",
    "they", "this", "to", "was", "will", "with",
];
