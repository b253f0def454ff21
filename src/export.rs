//! Output sinks for rendered reports.
//!
//! The composer hands over plain text; each sink only decides how that text
//! leaves the tool: a `.txt` file, a paginated layout a PDF renderer can draw
//! line by line, or a `mailto:` link that opens a prefilled draft.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::Serialize;

use crate::report::SECTION_HEADERS;

pub const FIRST_LINE_Y: u32 = 20;
pub const FIRST_LINE_Y_WITH_LOGO: u32 = 50;
pub const LINE_STEP: u32 = 6;
pub const PAGE_BOTTOM: u32 = 280;
pub const MARGIN_X: u32 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogoPlacement {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

const LOGO: LogoPlacement = LogoPlacement {
    x: 10,
    y: 10,
    width: 30,
    height: 30,
};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LayoutLine {
    pub text: String,
    pub x: u32,
    pub y: u32,
    pub bold: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LayoutPage {
    pub lines: Vec<LayoutLine>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PdfLayout {
    pub font: &'static str,
    pub font_size: u32,
    pub logo: Option<String>,
    pub logo_placement: Option<LogoPlacement>,
    pub pages: Vec<LayoutPage>,
}

fn is_separator(line: &str) -> bool {
    line.trim().is_empty() || line.contains("---") || line.contains("===")
}

fn is_header(line: &str) -> bool {
    SECTION_HEADERS.iter().any(|header| line.contains(header))
}

/// Lays report text out on A4-sized pages. Only the first page carries the logo.
pub fn layout_pdf(content: &str, logo: Option<&str>) -> PdfLayout {
    let mut pages = vec![LayoutPage::default()];
    let mut y = if logo.is_some() {
        FIRST_LINE_Y_WITH_LOGO
    } else {
        FIRST_LINE_Y
    };

    for line in content.lines().filter(|line| !is_separator(line)) {
        if y > PAGE_BOTTOM {
            pages.push(LayoutPage::default());
            y = FIRST_LINE_Y;
        }
        if let Some(page) = pages.last_mut() {
            page.lines.push(LayoutLine {
                text: line.to_string(),
                x: MARGIN_X,
                y,
                bold: is_header(line),
            });
        }
        y += LINE_STEP;
    }

    PdfLayout {
        font: "helvetica",
        font_size: 11,
        logo: logo.map(str::to_string),
        logo_placement: logo.map(|_| LOGO),
        pages,
    }
}

pub fn write_text(dir: &Path, stem: &str, content: &str) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("{stem}.txt"));
    std::fs::write(&path, content)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Writes the layout as JSON next to where the PDF is expected.
pub fn write_pdf_layout(dir: &Path, stem: &str, layout: &PdfLayout) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("{stem}.pdf.json"));
    let body = serde_json::to_string_pretty(layout)?;
    std::fs::write(&path, body)
        .with_context(|| format!("failed to write {}", path.display()))?;
    Ok(path)
}

/// Percent-encodes everything outside the URI-component unreserved set.
pub fn encode_component(value: &str) -> String {
    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z'
            | b'a'..=b'z'
            | b'0'..=b'9'
            | b'-'
            | b'_'
            | b'.'
            | b'!'
            | b'~'
            | b'*'
            | b'\''
            | b'('
            | b')' => encoded.push(byte as char),
            _ => encoded.push_str(&format!("%{byte:02X}")),
        }
    }
    encoded
}

pub fn mailto_link(recipient: Option<&str>, subject: &str, body: &str) -> String {
    format!(
        "mailto:{}?subject={}&body={}",
        recipient.unwrap_or_default(),
        encode_component(subject),
        encode_component(body)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_drops_blank_and_separator_lines() {
        let layout = layout_pdf("TÉMOINS\n\n-----\n- M. Leroy\n=====\n", None);
        let texts: Vec<&str> = layout.pages[0]
            .lines
            .iter()
            .map(|line| line.text.as_str())
            .collect();
        assert_eq!(texts, vec!["TÉMOINS", "- M. Leroy"]);
        assert!(layout.pages[0].lines[0].bold);
        assert!(!layout.pages[0].lines[1].bold);
    }

    #[test]
    fn logo_pushes_first_line_down() {
        let with_logo = layout_pdf("ligne", Some("data:image/png;base64,AAAA"));
        assert_eq!(with_logo.pages[0].lines[0].y, FIRST_LINE_Y_WITH_LOGO);
        assert_eq!(with_logo.logo_placement, Some(LOGO));

        let without = layout_pdf("ligne", None);
        assert_eq!(without.pages[0].lines[0].y, FIRST_LINE_Y);
        assert!(without.logo_placement.is_none());
    }

    #[test]
    fn long_reports_break_onto_new_pages() {
        let content: String = (0..60).map(|i| format!("ligne {i}\n")).collect();
        let layout = layout_pdf(&content, None);

        // 20, 26, ... 278 fits 44 lines on the first page.
        assert_eq!(layout.pages.len(), 2);
        assert_eq!(layout.pages[0].lines.len(), 44);
        assert_eq!(layout.pages[1].lines[0].y, FIRST_LINE_Y);
        assert_eq!(layout.pages[1].lines[0].text, "ligne 44");
    }

    #[test]
    fn mailto_encodes_subject_and_body() {
        let link = mailto_link(None, "Rapport d'incident - Vol", "Ligne 1\nÉlève");
        assert_eq!(
            link,
            "mailto:?subject=Rapport%20d'incident%20-%20Vol&body=Ligne%201%0A%C3%89l%C3%A8ve"
        );
    }

    #[test]
    fn text_and_layout_land_in_target_dir() {
        let dir = tempfile::tempdir().unwrap();
        let text = write_text(dir.path(), "rapport_synthese_2026-03-01", "contenu").unwrap();
        assert_eq!(std::fs::read_to_string(&text).unwrap(), "contenu");

        let layout = layout_pdf("LISTE DES INCIDENTS\nAucun incident", None);
        let json = write_pdf_layout(dir.path(), "rapport_synthese_2026-03-01", &layout).unwrap();
        let parsed: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(json).unwrap()).unwrap();
        assert_eq!(parsed["pages"][0]["lines"][0]["bold"], true);
    }
}
