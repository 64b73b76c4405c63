// Content filtering for published news.

// Denylist applied to every publish; matching is case-insensitive substring.
pub const DEFAULT_FORBIDDEN_WORDS: &[&str] = &["spam", "hack", "virus", "malware", "phishing", "scam"];

#[derive(Debug, Clone)]
pub struct ContentFilter {
    words: Vec<String>,
}

impl Default for ContentFilter {
    fn default() -> Self {
        Self::new(DEFAULT_FORBIDDEN_WORDS.iter().copied())
    }
}

impl ContentFilter {
    pub fn new<I, W>(words: I) -> Self
    where
        I: IntoIterator<Item = W>,
        W: Into<String>,
    {
        // Store lowercase so `allows` only folds the content once.
        Self {
            words: words
                .into_iter()
                .map(|word| word.into().to_lowercase())
                .collect(),
        }
    }

    /// True when `content` contains none of the forbidden words.
    pub fn allows(&self, content: &str) -> bool {
        let content = content.to_lowercase();
        !self.words.iter().any(|word| content.contains(word.as_str()))
    }
}
