use tiktoken_rs::CoreBPE;

const PRIMARY_MODEL: &str = "gpt-4";

/// Anything that can estimate how many model tokens a string costs.
pub trait TokenCount: Send + Sync {
    fn count(&self, text: &str) -> usize;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    /// Encoding registered for the `gpt-4` model.
    Model,
    /// Generic `cl100k_base` table.
    Cl100kBase,
    /// Roughly four characters per token; used when no BPE table loads.
    CharEstimate,
}

/// Token counter backed by a BPE table, loaded once.
pub struct TokenCounter {
    bpe: Option<CoreBPE>,
    scheme: Scheme,
}

impl TokenCounter {
    pub fn new() -> Self {
        match tiktoken_rs::get_bpe_from_model(PRIMARY_MODEL) {
            Ok(bpe) => Self::with_bpe(bpe, Scheme::Model),
            Err(err) => {
                tracing::warn!("no encoding for {PRIMARY_MODEL} ({err}), using cl100k_base");
                match tiktoken_rs::cl100k_base() {
                    Ok(bpe) => Self::with_bpe(bpe, Scheme::Cl100kBase),
                    Err(err) => {
                        tracing::warn!("cl100k_base unavailable ({err}), estimating by length");
                        Self::char_estimate()
                    }
                }
            }
        }
    }

    fn with_bpe(bpe: CoreBPE, scheme: Scheme) -> Self {
        Self {
            bpe: Some(bpe),
            scheme,
        }
    }

    pub fn char_estimate() -> Self {
        Self {
            bpe: None,
            scheme: Scheme::CharEstimate,
        }
    }

    pub fn scheme(&self) -> Scheme {
        self.scheme
    }
}

impl Default for TokenCounter {
    fn default() -> Self {
        Self::new()
    }
}

impl TokenCount for TokenCounter {
    fn count(&self, text: &str) -> usize {
        match &self.bpe {
            Some(bpe) => bpe.encode_ordinary(text).len(),
            None => text.chars().count().div_ceil(4),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_costs_nothing() {
        assert_eq!(TokenCounter::new().count(""), 0);
        assert_eq!(TokenCounter::char_estimate().count(""), 0);
    }

    #[test]
    fn counting_is_deterministic() {
        let counter = TokenCounter::new();
        let text = "It was a bright cold day in April, and the clocks were striking thirteen.";
        let first = counter.count(text);
        assert!(first > 0);
        assert_eq!(first, counter.count(text));
    }

    #[test]
    fn longer_text_never_counts_less() {
        let counter = TokenCounter::new();
        let short = "The cat sat.";
        let long = "The cat sat. The cat sat on the mat and looked at the dog.";
        assert!(counter.count(long) >= counter.count(short));
    }

    #[test]
    fn char_estimate_rounds_up() {
        let counter = TokenCounter::char_estimate();
        assert_eq!(counter.scheme(), Scheme::CharEstimate);
        assert_eq!(counter.count("abcd"), 1);
        assert_eq!(counter.count("abcde"), 2);
        assert_eq!(counter.count("日本語"), 1);
    }
}
