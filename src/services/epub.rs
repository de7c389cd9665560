use crate::services::assembler::RenderedParagraph;
use crate::utils::xml_safe;
use anyhow::{Result, anyhow};
use epub_builder::{EpubBuilder, EpubContent, ZipLibrary};

/// Paragraph styles this writer knows how to render. No intense quote.
pub const STYLES: &[&str] = &["Normal", "Heading1", "Quote"];

const STYLESHEET: &str = "body { font-family: \"Times New Roman\", serif; font-size: 12pt; color: #000000; }\n\
h1 { font-size: 16pt; margin: 1.5em 0 1em 0; }\n\
blockquote { margin: 1em 3em; font-style: italic; }\n";

struct Section<'a> {
    title: String,
    paragraphs: Vec<&'a RenderedParagraph>,
}

/// Each heading opens a new section of the book.
fn sections<'a>(paragraphs: &'a [RenderedParagraph], title: &str) -> Vec<Section<'a>> {
    let mut sections: Vec<Section<'a>> = Vec::new();
    for paragraph in paragraphs {
        let is_heading = paragraph.style_id == "Heading1";
        match sections.last_mut() {
            Some(section) if !is_heading => section.paragraphs.push(paragraph),
            _ => sections.push(Section {
                title: if is_heading {
                    paragraph.text.clone()
                } else {
                    title.to_string()
                },
                paragraphs: vec![paragraph],
            }),
        }
    }
    sections
}

fn section_xhtml(section: &Section<'_>) -> String {
    let mut body = String::new();
    for paragraph in &section.paragraphs {
        let text = html_escape::encode_text(&xml_safe(&paragraph.text)).replace('\n', "<br/>");
        let inner = if paragraph.bold {
            format!("<strong>{text}</strong>")
        } else if paragraph.italic {
            format!("<em>{text}</em>")
        } else {
            text
        };
        match paragraph.style_id {
            "Heading1" => body.push_str(&format!("<h1>{inner}</h1>\n")),
            "Quote" => body.push_str(&format!("<blockquote><p>{inner}</p></blockquote>\n")),
            _ => body.push_str(&format!("<p>{inner}</p>\n")),
        }
    }

    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n\
         <html xmlns=\"http://www.w3.org/1999/xhtml\">\n\
         <head><title>{}</title><link rel=\"stylesheet\" type=\"text/css\" href=\"stylesheet.css\"/></head>\n\
         <body>\n{body}</body>\n</html>\n",
        html_escape::encode_text(&xml_safe(&section.title))
    )
}

pub fn write(paragraphs: &[RenderedParagraph], title: &str) -> Result<Vec<u8>> {
    let zip = ZipLibrary::new().map_err(|e| anyhow!("epub zip backend: {e}"))?;
    let mut builder = EpubBuilder::new(zip).map_err(|e| anyhow!("epub builder: {e}"))?;
    builder
        .metadata("title", xml_safe(title))
        .map_err(|e| anyhow!("epub metadata: {e}"))?;
    builder
        .stylesheet(STYLESHEET.as_bytes())
        .map_err(|e| anyhow!("epub stylesheet: {e}"))?;

    for (i, section) in sections(paragraphs, title).iter().enumerate() {
        let xhtml = section_xhtml(section);
        builder
            .add_content(
                EpubContent::new(format!("section_{}.xhtml", i + 1), xhtml.as_bytes())
                    .title(section.title.as_str()),
            )
            .map_err(|e| anyhow!("epub section {}: {e}", i + 1))?;
    }

    let mut bytes = Vec::new();
    builder
        .generate(&mut bytes)
        .map_err(|e| anyhow!("epub generation: {e}"))?;
    Ok(bytes)
}
