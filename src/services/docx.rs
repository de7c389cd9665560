//! DOCX reading and writing.
//!
//! Reading walks `word/document.xml` and keeps, per paragraph, its text, its
//! paragraph style id and whether any run is bold or italic. Writing builds a
//! package with one run per paragraph and a fixed style sheet.

use crate::models::StyleTag;
use crate::services::assembler::RenderedParagraph;
use crate::utils::xml_safe;
use anyhow::{Context, Result};
use docx_rs::{BreakType, Docx, Paragraph, Run, RunFonts, Style, StyleType};
use quick_xml::events::{BytesStart, Event};
use quick_xml::reader::Reader;
use std::io::{Cursor, Read};
use zip::ZipArchive;

/// Paragraph styles defined by the written style sheet.
pub const STYLES: &[&str] = &["Normal", "Heading1", "Quote", "IntenseQuote"];

const BODY_FONT: &str = "Times New Roman";
// Half-points: 12pt body, 16pt headings.
const BODY_SIZE: usize = 24;
const HEADING_SIZE: usize = 32;
const TEXT_COLOR: &str = "000000";

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocxParagraph {
    pub text: String,
    pub style_id: Option<String>,
    pub bold: bool,
    pub italic: bool,
}

impl DocxParagraph {
    /// The formatting role this paragraph was written with.
    pub fn style_tag(&self) -> StyleTag {
        match self.style_id.as_deref() {
            Some(id) if id.starts_with("Heading") => StyleTag::Heading,
            Some("Quote") | Some("IntenseQuote") => StyleTag::Quote,
            _ if self.bold => StyleTag::Bold,
            _ if self.italic => StyleTag::Italic,
            _ => StyleTag::Normal,
        }
    }
}

pub fn is_docx(bytes: &[u8]) -> bool {
    bytes.starts_with(b"PK\x03\x04")
}

pub fn read_paragraphs(bytes: &[u8]) -> Result<Vec<DocxParagraph>> {
    let mut archive = ZipArchive::new(Cursor::new(bytes)).context("not a zip package")?;
    let mut xml = String::new();
    archive
        .by_name("word/document.xml")
        .context("package has no word/document.xml")?
        .read_to_string(&mut xml)
        .context("word/document.xml is not UTF-8")?;
    parse_document_xml(&xml)
}

/// A paragraph still being read, with any text-box paragraphs found inside it.
#[derive(Default)]
struct OpenParagraph {
    paragraph: DocxParagraph,
    nested: Vec<DocxParagraph>,
}

/// Text-box paragraphs follow the paragraph that anchors them. The
/// `mc:Fallback` copy of alternate content is skipped.
fn parse_document_xml(xml: &str) -> Result<Vec<DocxParagraph>> {
    let mut reader = Reader::from_str(xml);
    let mut paragraphs = Vec::new();
    let mut open: Vec<OpenParagraph> = Vec::new();
    let mut fallback_depth = 0usize;
    let mut in_text = false;
    let mut in_run_props = false;
    let mut in_para_props = false;

    loop {
        let event = reader.read_event().context("malformed word/document.xml")?;

        if fallback_depth > 0 {
            match &event {
                Event::Start(e) if e.name().as_ref() == b"mc:Fallback" => fallback_depth += 1,
                Event::End(e) if e.name().as_ref() == b"mc:Fallback" => fallback_depth -= 1,
                Event::Eof => break,
                _ => {}
            }
            continue;
        }

        match event {
            Event::Start(e) => match e.name().as_ref() {
                b"mc:Fallback" => fallback_depth = 1,
                b"w:p" => open.push(OpenParagraph::default()),
                b"w:t" => in_text = true,
                b"w:rPr" => in_run_props = true,
                b"w:pPr" => in_para_props = true,
                _ => {}
            },
            Event::Empty(e) => {
                let Some(current) = open.last_mut() else {
                    continue;
                };
                let paragraph = &mut current.paragraph;
                match e.name().as_ref() {
                    b"w:pStyle" => paragraph.style_id = attribute(&e, "w:val")?,
                    b"w:b" if in_run_props && !in_para_props => {
                        paragraph.bold |= toggle_on(&e)?
                    }
                    b"w:i" if in_run_props && !in_para_props => {
                        paragraph.italic |= toggle_on(&e)?
                    }
                    b"w:tab" if !in_run_props && !in_para_props => paragraph.text.push('\t'),
                    b"w:br" | b"w:cr" => paragraph.text.push('\n'),
                    _ => {}
                }
            }
            Event::Text(t) if in_text => {
                if let Some(current) = open.last_mut() {
                    current.paragraph.text.push_str(&t.unescape()?);
                }
            }
            Event::End(e) => match e.name().as_ref() {
                b"w:t" => in_text = false,
                b"w:rPr" => in_run_props = false,
                b"w:pPr" => in_para_props = false,
                b"w:p" => {
                    if let Some(done) = open.pop() {
                        let finished = std::iter::once(done.paragraph).chain(done.nested);
                        match open.last_mut() {
                            Some(host) => host.nested.extend(finished),
                            None => paragraphs.extend(finished),
                        }
                    }
                }
                _ => {}
            },
            Event::Eof => break,
            _ => {}
        }
    }

    Ok(paragraphs)
}

fn attribute(e: &BytesStart<'_>, name: &str) -> Result<Option<String>> {
    Ok(match e.try_get_attribute(name)? {
        Some(attr) => Some(attr.unescape_value()?.into_owned()),
        None => None,
    })
}

/// `<w:b/>` is on; `<w:b w:val="0"/>` or `"false"` is off.
fn toggle_on(e: &BytesStart<'_>) -> Result<bool> {
    Ok(!matches!(
        attribute(e, "w:val")?.as_deref(),
        Some("0") | Some("false") | Some("off")
    ))
}

fn body_fonts() -> RunFonts {
    RunFonts::new()
        .ascii(BODY_FONT)
        .hi_ansi(BODY_FONT)
        .east_asia(BODY_FONT)
        .cs(BODY_FONT)
}

fn paragraph_style(id: &str, name: &str) -> Style {
    Style::new(id, StyleType::Paragraph)
        .name(name)
        .size(BODY_SIZE)
        .color(TEXT_COLOR)
}

/// Times New Roman 12pt, black, for every style.
fn style_sheet(docx: Docx) -> Docx {
    docx.default_fonts(body_fonts())
        .default_size(BODY_SIZE)
        .add_style(paragraph_style("Normal", "Normal"))
        .add_style(
            paragraph_style("Heading1", "heading 1")
                .size(HEADING_SIZE)
                .bold(),
        )
        .add_style(paragraph_style("Quote", "Quote").italic())
        .add_style(paragraph_style("IntenseQuote", "Intense Quote").italic().bold())
}

fn run(paragraph: &RenderedParagraph) -> Run {
    let mut run = Run::new()
        .fonts(body_fonts())
        .size(BODY_SIZE)
        .color(TEXT_COLOR);
    for (i, line) in paragraph.text.split('\n').enumerate() {
        if i > 0 {
            run = run.add_break(BreakType::TextWrapping);
        }
        run = run.add_text(xml_safe(line));
    }
    if paragraph.bold {
        run = run.bold();
    }
    if paragraph.italic {
        run = run.italic();
    }
    run
}

pub fn write(paragraphs: &[RenderedParagraph]) -> Result<Vec<u8>> {
    let docx = paragraphs
        .iter()
        .fold(style_sheet(Docx::new()), |docx, paragraph| {
            docx.add_paragraph(
                Paragraph::new()
                    .style(paragraph.style_id)
                    .add_run(run(paragraph)),
            )
        });

    let mut buffer = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut buffer)
        .context("failed to pack docx package")?;
    Ok(buffer.into_inner())
}
