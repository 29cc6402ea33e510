use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

static KEYWORD_STEMS: &[&str] = &[
    "sport", "news", "tech", "finance", "health", "travel", "music", "video",
    "game", "food", "fashion", "auto", "science", "education", "weather",
    "entertainment", "politics", "business", "culture", "lifestyle", "cloud",
    "data", "web", "smart", "digital", "cyber", "global", "info", "open",
    "fast", "meta", "hyper", "micro", "nano", "mega", "ultra", "super",
    "prime", "core", "edge", "next", "rapid", "pulse", "pixel", "byte",
    "code", "flex", "keen", "pure", "apex", "nova",
];

static FILLER_WORDS: &[&str] = &[
    "the", "quick", "brown", "fox", "jumps", "over", "lazy", "dog", "and",
    "then", "runs", "back", "again", "while", "rain", "falls", "on", "green",
    "hills", "under", "grey", "clouds", "before", "night", "comes", "with",
    "cold", "wind", "from", "north", "fields", "where", "rivers", "bend",
    "toward", "old", "stone", "bridges", "near", "quiet", "towns",
];

/// Deterministic generator for keyword sets and texts to scan.
pub struct DataGenerator {
    rng: StdRng,
}

impl DataGenerator {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Generates `count` distinct keywords: a random stem plus a unique
    /// numeric suffix.
    pub fn generate_keywords(&mut self, count: usize) -> Vec<String> {
        (0..count)
            .map(|i| {
                let stem = KEYWORD_STEMS[self.rng.gen_range(0..KEYWORD_STEMS.len())];
                format!("{}{}", stem, i)
            })
            .collect()
    }

    /// Generates a space-separated text of `words` words, roughly one in
    /// `keyword_gap` of them drawn from `keywords`.
    pub fn generate_text(&mut self, keywords: &[String], words: usize, keyword_gap: usize) -> String {
        let mut parts = Vec::with_capacity(words);
        for _ in 0..words {
            if !keywords.is_empty() && self.rng.gen_range(0..keyword_gap) == 0 {
                parts.push(keywords[self.rng.gen_range(0..keywords.len())].as_str());
            } else {
                parts.push(FILLER_WORDS[self.rng.gen_range(0..FILLER_WORDS.len())]);
            }
        }
        parts.join(" ")
    }

    /// Generates `count` independent lines of text.
    pub fn generate_lines(
        &mut self,
        keywords: &[String],
        count: usize,
        words_per_line: usize,
    ) -> Vec<String> {
        (0..count)
            .map(|_| self.generate_text(keywords, words_per_line, 4))
            .collect()
    }
}
