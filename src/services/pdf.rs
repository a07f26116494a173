//! Minimal PDF 1.4 writer for text documents.
//!
//! Produces A4 pages of left-aligned Helvetica text with word wrapping.
//! Only WinAnsi-safe ASCII is written; other characters become `?`.

use std::fmt::Write as _;

const PAGE_WIDTH: f32 = 595.0;
const PAGE_HEIGHT: f32 = 842.0;
const MARGIN: f32 = 56.0;
/// Average Helvetica glyph width as a fraction of the font size.
const AVG_GLYPH_WIDTH: f32 = 0.5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Style {
    Title,
    Heading,
    Body,
}

impl Style {
    fn size(&self) -> f32 {
        match self {
            Style::Title => 18.0,
            Style::Heading => 12.0,
            Style::Body => 10.0,
        }
    }

    fn font(&self) -> &'static str {
        match self {
            Style::Title | Style::Heading => "F2",
            Style::Body => "F1",
        }
    }

    fn leading(&self) -> f32 {
        self.size() * 1.45
    }
}

/// Text blocks laid out top to bottom.
#[derive(Debug, Default)]
pub struct PdfDocument {
    blocks: Vec<(Style, String)>,
}

impl PdfDocument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn title(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push((Style::Title, text.into()));
        self
    }

    pub fn heading(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push((Style::Heading, text.into()));
        self
    }

    pub fn paragraph(&mut self, text: impl Into<String>) -> &mut Self {
        self.blocks.push((Style::Body, text.into()));
        self
    }

    /// Empty line of body height.
    pub fn spacer(&mut self) -> &mut Self {
        self.blocks.push((Style::Body, String::new()));
        self
    }

    /// Serialize to PDF bytes.
    pub fn render(&self) -> Vec<u8> {
        let pages = self.layout();
        write_pdf(&pages)
    }

    /// Break blocks into positioned lines, one `Vec` per page.
    fn layout(&self) -> Vec<Vec<(Style, f32, String)>> {
        let mut pages = vec![Vec::new()];
        let mut y = PAGE_HEIGHT - MARGIN;

        for (style, text) in &self.blocks {
            let max_chars = ((PAGE_WIDTH - 2.0 * MARGIN) / (style.size() * AVG_GLYPH_WIDTH)) as usize;
            let lines = wrap(text, max_chars);

            for line in lines {
                if y - style.leading() < MARGIN {
                    pages.push(Vec::new());
                    y = PAGE_HEIGHT - MARGIN;
                }
                y -= style.leading();
                if let Some(page) = pages.last_mut() {
                    page.push((*style, y, line));
                }
            }
        }

        pages
    }
}

/// Greedy word wrap. Words longer than a line are split.
fn wrap(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut lines = Vec::new();
    let mut current = String::new();

    for word in text.split_whitespace() {
        let mut word = word.to_string();
        while word.chars().count() > max_chars {
            if !current.is_empty() {
                lines.push(std::mem::take(&mut current));
            }
            let split: String = word.chars().take(max_chars).collect();
            word = word.chars().skip(max_chars).collect();
            lines.push(split);
        }

        let needed = if current.is_empty() {
            word.chars().count()
        } else {
            current.chars().count() + 1 + word.chars().count()
        };
        if needed > max_chars && !current.is_empty() {
            lines.push(std::mem::take(&mut current));
        }
        if !current.is_empty() {
            current.push(' ');
        }
        current.push_str(&word);
    }

    if !current.is_empty() || lines.is_empty() {
        lines.push(current);
    }
    lines
}

/// Escape a string for a PDF literal.
fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '(' | ')' | '\\' => {
                out.push('\\');
                out.push(c);
            }
            ' '..='~' => out.push(c),
            _ => out.push('?'),
        }
    }
    out
}

fn content_stream(lines: &[(Style, f32, String)]) -> String {
    let mut stream = String::new();
    for (style, y, text) in lines {
        if text.is_empty() {
            continue;
        }
        let _ = writeln!(
            stream,
            "BT /{} {} Tf {} {:.2} Td ({}) Tj ET",
            style.font(),
            style.size(),
            MARGIN,
            y,
            escape(text)
        );
    }
    stream
}

fn write_pdf(pages: &[Vec<(Style, f32, String)>]) -> Vec<u8> {
    // Objects: 1 catalog, 2 page tree, 3 regular font, 4 bold font,
    // then a page and a content stream per page.
    let page_count = pages.len();
    let first_page_obj = 5;
    let mut objects: Vec<String> = Vec::with_capacity(4 + 2 * page_count);

    objects.push("<< /Type /Catalog /Pages 2 0 R >>".to_string());

    let kids: Vec<String> = (0..page_count)
        .map(|i| format!("{} 0 R", first_page_obj + 2 * i))
        .collect();
    objects.push(format!(
        "<< /Type /Pages /Kids [{}] /Count {} >>",
        kids.join(" "),
        page_count
    ));

    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );
    objects.push(
        "<< /Type /Font /Subtype /Type1 /BaseFont /Helvetica-Bold /Encoding /WinAnsiEncoding >>"
            .to_string(),
    );

    for (i, lines) in pages.iter().enumerate() {
        let content_obj = first_page_obj + 2 * i + 1;
        objects.push(format!(
            "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
             /Resources << /Font << /F1 3 0 R /F2 4 0 R >> >> /Contents {content_obj} 0 R >>"
        ));

        let stream = content_stream(lines);
        objects.push(format!(
            "<< /Length {} >>\nstream\n{}endstream",
            stream.len(),
            stream
        ));
    }

    let mut out = String::from("%PDF-1.4\n");
    let mut offsets = Vec::with_capacity(objects.len());
    for (i, body) in objects.iter().enumerate() {
        offsets.push(out.len());
        let _ = write!(out, "{} 0 obj\n{}\nendobj\n", i + 1, body);
    }

    let xref_offset = out.len();
    let _ = write!(out, "xref\n0 {}\n0000000000 65535 f \n", objects.len() + 1);
    for offset in offsets {
        let _ = write!(out, "{:010} 00000 n \n", offset);
    }
    let _ = write!(
        out,
        "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{}\n%%EOF\n",
        objects.len() + 1,
        xref_offset
    );

    out.into_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Vec<u8> {
        let mut doc = PdfDocument::new();
        doc.title("Rental Agreement")
            .heading("Parties")
            .paragraph("Landlord: Aina (aina@example.com)")
            .spacer()
            .paragraph("Rent: MYR 2,500.00 per month");
        doc.render()
    }

    #[test]
    fn document_has_pdf_framing() {
        let bytes = sample();
        let text = String::from_utf8(bytes).unwrap();

        assert!(text.starts_with("%PDF-1.4\n"));
        assert!(text.ends_with("%%EOF\n"));
        assert!(text.contains("/Type /Catalog"));
        assert!(text.contains("(Rental Agreement) Tj"));
        assert!(text.contains("\\(aina@example.com\\)"));
    }

    #[test]
    fn xref_offsets_point_at_objects() {
        let text = String::from_utf8(sample()).unwrap();

        let start: usize = text
            .rsplit("startxref\n")
            .next()
            .and_then(|rest| rest.lines().next())
            .unwrap()
            .parse()
            .unwrap();
        assert!(text[start..].starts_with("xref"));

        let entries: Vec<&str> = text[start..].lines().skip(3).take_while(|l| l.ends_with(" n ")).collect();
        for (i, entry) in entries.iter().enumerate() {
            let offset: usize = entry[..10].parse().unwrap();
            assert!(text[offset..].starts_with(&format!("{} 0 obj", i + 1)));
        }
    }

    #[test]
    fn long_documents_span_pages() {
        let mut doc = PdfDocument::new();
        for i in 0..200 {
            doc.paragraph(format!("Clause {i}"));
        }
        let text = String::from_utf8(doc.render()).unwrap();
        assert!(!text.contains("/Count 1 "));
        assert!(text.matches("/Type /Page ").count() > 1);
    }

    #[test]
    fn wrapping_respects_width() {
        let lines = wrap("the quick brown fox jumps over the lazy dog", 10);
        assert!(lines.iter().all(|l| l.chars().count() <= 10));
        assert_eq!(lines.join(" "), "the quick brown fox jumps over the lazy dog");

        assert_eq!(wrap("abcdefghij", 4), vec!["abcd", "efgh", "ij"]);
        assert_eq!(wrap("", 10), vec![""]);
    }

    #[test]
    fn non_ascii_is_replaced() {
        assert_eq!(escape("Café (1)"), "Caf? \\(1\\)");
    }
}
