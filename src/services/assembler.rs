use crate::error::RunError;
use crate::models::{OutputFormat, StyleTag, StyledParagraph};
use crate::services::docx;
use crate::services::epub;
use std::collections::HashMap;

const BODY_STYLE: &str = "Normal";

/// Preferred paragraph styles per tag, best first. `Normal` is the last resort.
const STYLE_PREFERENCES: [(StyleTag, &[&str]); 5] = [
    (StyleTag::Normal, &["Normal"]),
    (StyleTag::Heading, &["Heading1"]),
    (StyleTag::Italic, &["Normal"]),
    (StyleTag::Bold, &["Normal"]),
    (StyleTag::Quote, &["IntenseQuote", "Quote"]),
];

/// A paragraph ready for a format writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedParagraph {
    pub text: String,
    pub style_id: &'static str,
    pub bold: bool,
    pub italic: bool,
}

#[derive(Debug, Clone)]
pub struct OutputDocument {
    pub format: OutputFormat,
    pub bytes: Vec<u8>,
}

pub struct DocumentAssembler {
    format: OutputFormat,
    styles: HashMap<StyleTag, &'static str>,
}

impl DocumentAssembler {
    /// Resolves the style table once against what the target format offers.
    pub fn new(format: OutputFormat) -> Self {
        let available = match format {
            OutputFormat::Docx => docx::STYLES,
            OutputFormat::Epub => epub::STYLES,
        };
        Self::with_available(format, available)
    }

    fn with_available(format: OutputFormat, available: &[&'static str]) -> Self {
        let styles = STYLE_PREFERENCES
            .iter()
            .map(|(tag, preferred)| {
                let resolved = preferred
                    .iter()
                    .find_map(|name| available.iter().copied().find(|a| a == name))
                    .unwrap_or(BODY_STYLE);
                (*tag, resolved)
            })
            .collect();
        DocumentAssembler { format, styles }
    }

    pub fn style_for(&self, tag: StyleTag) -> &'static str {
        self.styles.get(&tag).copied().unwrap_or(BODY_STYLE)
    }

    /// One rendered paragraph per input paragraph, same order.
    pub fn render(&self, merged: &[StyledParagraph]) -> Vec<RenderedParagraph> {
        merged
            .iter()
            .map(|p| RenderedParagraph {
                text: p.text.clone(),
                style_id: self.style_for(p.style),
                bold: p.style == StyleTag::Bold,
                italic: p.style == StyleTag::Italic,
            })
            .collect()
    }

    pub fn assemble(
        &self,
        merged: &[StyledParagraph],
        title: &str,
    ) -> Result<OutputDocument, RunError> {
        let rendered = self.render(merged);
        let bytes = match self.format {
            OutputFormat::Docx => docx::write(&rendered),
            OutputFormat::Epub => epub::write(&rendered, title),
        }
        .map_err(RunError::output)?;

        Ok(OutputDocument {
            format: self.format,
            bytes,
        })
    }
}
