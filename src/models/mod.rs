use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

pub const DEFAULT_LANGUAGE: &str = "English (British)";
pub const DEFAULT_TOKEN_BUDGET: usize = 5000;
pub const MIN_RECOMMENDED_BUDGET: usize = 500;
pub const MAX_RECOMMENDED_BUDGET: usize = 32768;

pub const LANGUAGES: &[&str] = &[
    "English (British)",
    "Albanian",
    "Amharic",
    "Arabic",
    "Armenian",
    "Bengali",
    "Bosnian",
    "Bulgarian",
    "Burmese",
    "Catalan",
    "Chinese",
    "Croatian",
    "Czech",
    "Danish",
    "Dutch",
    "Estonian",
    "Finnish",
    "French",
    "Georgian",
    "German",
    "Greek",
    "Gujarati",
    "Hindi",
    "Hungarian",
    "Icelandic",
    "Indonesian",
    "Italian",
    "Japanese",
    "Kannada",
    "Kazakh",
    "Korean",
    "Latvian",
    "Lithuanian",
    "Macedonian",
    "Malay",
    "Malayalam",
    "Marathi",
    "Mongolian",
    "Norwegian",
    "Persian",
    "Polish",
    "Portuguese",
    "Punjabi",
    "Romanian",
    "Russian",
    "Serbian",
    "Slovak",
    "Slovenian",
    "Somali",
    "Spanish",
    "Swahili",
    "Swedish",
    "Tagalog",
    "Tamil",
    "Telugu",
    "Thai",
    "Turkish",
    "Ukrainian",
    "Urdu",
    "Vietnamese",
];

/// A trimmed, non-empty paragraph of the source document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Paragraph(String);

impl Paragraph {
    /// Returns `None` for blank input; there is nothing to correct in it.
    pub fn new(text: &str) -> Option<Self> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(Self(trimmed.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Paragraphs sent together in one correction request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub paragraphs: Vec<Paragraph>,
    pub tokens: usize,
}

impl Chunk {
    pub fn text(&self) -> String {
        self.paragraphs
            .iter()
            .map(Paragraph::as_str)
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StyleTag {
    #[default]
    Normal,
    Heading,
    Italic,
    Bold,
    Quote,
}

impl StyleTag {
    /// Unknown names fall back to `Normal`.
    pub fn parse(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "heading" => StyleTag::Heading,
            "italic" => StyleTag::Italic,
            "bold" => StyleTag::Bold,
            "quote" => StyleTag::Quote,
            _ => StyleTag::Normal,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StyledParagraph {
    pub text: String,
    pub style: StyleTag,
}

impl StyledParagraph {
    pub fn new(text: impl Into<String>, style: StyleTag) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

/// Result of one chunk's correction call. Empty means the call failed.
pub type CorrectionResult = Vec<StyledParagraph>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CorrectionCategory {
    Grammar,
    Typos,
    Formatting,
}

impl CorrectionCategory {
    pub fn all() -> BTreeSet<CorrectionCategory> {
        [
            CorrectionCategory::Grammar,
            CorrectionCategory::Typos,
            CorrectionCategory::Formatting,
        ]
        .into_iter()
        .collect()
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "grammar" => Some(CorrectionCategory::Grammar),
            "typos" | "typo" => Some(CorrectionCategory::Typos),
            "formatting" | "format" => Some(CorrectionCategory::Formatting),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CorrectionCategory::Grammar => "grammar",
            CorrectionCategory::Typos => "typos",
            CorrectionCategory::Formatting => "formatting",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Language(&'static str);

impl Language {
    /// Matches case-insensitively against [`LANGUAGES`].
    pub fn parse(name: &str) -> Option<Self> {
        let wanted = name.trim();
        LANGUAGES
            .iter()
            .copied()
            .find(|lang| lang.eq_ignore_ascii_case(wanted))
            .map(Language)
    }

    pub fn as_str(&self) -> &'static str {
        self.0
    }
}

impl Default for Language {
    fn default() -> Self {
        Language(DEFAULT_LANGUAGE)
    }
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Docx,
    Epub,
}

impl OutputFormat {
    pub fn parse(name: &str) -> Option<Self> {
        match name.trim().trim_start_matches('.').to_ascii_lowercase().as_str() {
            "docx" => Some(OutputFormat::Docx),
            "epub" => Some(OutputFormat::Epub),
            _ => None,
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            OutputFormat::Docx => "docx",
            OutputFormat::Epub => "epub",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            OutputFormat::Docx => {
                "application/vnd.openxmlformats-officedocument.wordprocessingml.document"
            }
            OutputFormat::Epub => "application/epub+zip",
        }
    }
}

/// Everything the user chose for one run. Built once, never mutated.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub language: Language,
    pub categories: BTreeSet<CorrectionCategory>,
    pub extra_instructions: String,
    pub token_budget: usize,
    pub format: OutputFormat,
    pub title: String,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            language: Language::default(),
            categories: CorrectionCategory::all(),
            extra_instructions: String::new(),
            token_budget: DEFAULT_TOKEN_BUDGET,
            format: OutputFormat::default(),
            title: "Corrected document".to_string(),
        }
    }
}

/// Opaque bearer credential for the remote service.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiKey(String);

impl ApiKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ApiKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ApiKey(***)")
    }
}

/// Pipeline position, published to whoever is watching the run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Reading,
    Chunking,
    Correcting { chunk: usize, total: usize },
    Assembling,
    Done,
    NothingToWrite,
    Cancelled,
    Failed { error: String },
}

impl RunState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunState::Done | RunState::NothingToWrite | RunState::Cancelled | RunState::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub total_chunks: usize,
    pub corrected_chunks: usize,
    /// 1-based indices of chunks whose call failed without aborting the run.
    pub failed_chunks: Vec<usize>,
    pub paragraphs_written: usize,
}
