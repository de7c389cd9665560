use crate::models::{Paragraph, StyleTag};
use crate::services::docx;
use crate::utils::{decode_utf8, split_blank_lines};
use anyhow::{Context, Result, bail};
use tracing::debug;

/// An uploaded or on-disk document, not yet parsed.
#[derive(Debug, Clone)]
pub struct SourceDocument {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl SourceDocument {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
        }
    }

    /// Non-empty, trimmed paragraphs in reading order.
    ///
    /// DOCX packages are detected by their zip signature; anything else must
    /// be UTF-8 text with paragraphs separated by blank lines.
    pub fn paragraphs(&self) -> Result<Vec<Paragraph>> {
        if self.bytes.is_empty() {
            bail!("{} is empty", self.name);
        }

        if docx::is_docx(&self.bytes) {
            let paragraphs = docx::read_paragraphs(&self.bytes)
                .with_context(|| format!("failed to read {} as docx", self.name))?;
            let headings = paragraphs
                .iter()
                .filter(|p| p.style_tag() == StyleTag::Heading)
                .count();
            debug!(source = %self.name, paragraphs = paragraphs.len(), headings, "read docx source");
            return Ok(paragraphs
                .iter()
                .filter_map(|p| Paragraph::new(&p.text))
                .collect());
        }

        let lower = self.name.to_ascii_lowercase();
        if lower.ends_with(".docx") {
            bail!("{} is not a valid .docx package", self.name);
        }

        let text = decode_utf8(&self.bytes)
            .with_context(|| format!("{} is neither a .docx package nor UTF-8 text", self.name))?;
        Ok(split_blank_lines(&text)
            .into_iter()
            .filter_map(Paragraph::new)
            .collect())
    }
}
