//! PDF inspection: page count, outline and positioned text lines
//!
//! Only what header-level resolution needs is read from the PDF; layout
//! analysis is the conversion engine's job.

use lopdf::content::{Content, Operation};
use lopdf::{Document, Encoding, Object, ObjectId};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};

/// Outline entries in document order: title and 1-based nesting level
pub type Outline = Vec<(String, usize)>;

/// A line of text on a page with its dominant font size
#[derive(Debug, Clone, PartialEq)]
pub struct LayoutLine {
    pub text: String,
    pub font_size: Option<f32>,
}

/// Trait for reading structural hints from a PDF
pub trait PdfInspector: Send + Sync {
    /// Number of pages
    fn page_count(&self, path: &Path) -> Result<usize>;

    /// Outline (table of contents), `None` when the PDF has none
    fn outline(&self, path: &Path) -> Result<Option<Outline>>;

    /// Text lines of the requested 1-based pages, top to bottom
    fn page_lines(&self, path: &Path, pages: &[u32]) -> Result<BTreeMap<u32, Vec<LayoutLine>>>;
}

/// `PdfInspector` backed by lopdf
#[derive(Debug, Clone, Copy, Default)]
pub struct LopdfInspector;

impl LopdfInspector {
    pub fn new() -> Self {
        Self
    }

    fn load(path: &Path) -> Result<Document> {
        Document::load(path).map_err(|e| Error::pdf(format!("Failed to load {}: {}", path.display(), e)))
    }
}

impl PdfInspector for LopdfInspector {
    fn page_count(&self, path: &Path) -> Result<usize> {
        Ok(Self::load(path)?.get_pages().len())
    }

    fn outline(&self, path: &Path) -> Result<Option<Outline>> {
        let doc = Self::load(path)?;

        let toc = match doc.get_toc() {
            Ok(toc) => toc,
            Err(e) => {
                tracing::debug!("No outline in {}: {}", path.display(), e);
                return Ok(None);
            }
        };

        let outline: Outline = toc
            .toc
            .into_iter()
            .map(|entry| (entry.title.trim().to_string(), entry.level.max(1)))
            .filter(|(title, _)| !title.is_empty())
            .collect();

        Ok(if outline.is_empty() { None } else { Some(outline) })
    }

    fn page_lines(&self, path: &Path, pages: &[u32]) -> Result<BTreeMap<u32, Vec<LayoutLine>>> {
        let doc = Self::load(path)?;
        let page_ids = doc.get_pages();
        let mut result = BTreeMap::new();

        for page_no in pages {
            let Some(page_id) = page_ids.get(page_no) else {
                continue;
            };
            let encodings = page_encodings(&doc, *page_id);
            let lines = match doc.get_page_content(*page_id) {
                Ok(bytes) => Content::decode(&bytes)
                    .map(|content| layout_lines(&content.operations, &encodings))
                    .unwrap_or_else(|e| {
                        tracing::debug!("Could not decode page {} of {}: {}", page_no, path.display(), e);
                        Vec::new()
                    }),
                Err(e) => {
                    tracing::debug!("Could not get content for page {}: {}", page_no, e);
                    Vec::new()
                }
            };
            result.insert(*page_no, lines);
        }

        Ok(result)
    }
}

/// Text encodings of the fonts a page references, keyed by resource name
fn page_encodings(doc: &Document, page_id: ObjectId) -> BTreeMap<Vec<u8>, Encoding<'_>> {
    let fonts = match doc.get_page_fonts(page_id) {
        Ok(fonts) => fonts,
        Err(e) => {
            tracing::debug!("Could not read fonts of page {:?}: {}", page_id, e);
            return BTreeMap::new();
        }
    };

    fonts
        .into_iter()
        .filter_map(|(name, font)| match font.get_font_encoding(doc) {
            Ok(encoding) => Some((name, encoding)),
            Err(e) => {
                tracing::debug!("No encoding for font {}: {}", String::from_utf8_lossy(&name), e);
                None
            }
        })
        .collect()
}

/// A shown string with its baseline and effective size
struct Span {
    y: f32,
    text: String,
    size: f32,
}

/// Group text-showing operations into lines keyed by baseline
fn layout_lines(operations: &[Operation], encodings: &BTreeMap<Vec<u8>, Encoding>) -> Vec<LayoutLine> {
    let mut spans = Vec::new();
    let mut encoding: Option<&Encoding> = None;
    let mut font_size = 0.0f32;
    let mut scale = 1.0f32;
    let mut line_y = 0.0f32;
    let mut leading = 0.0f32;

    for op in operations {
        let operands = &op.operands;
        match op.operator.as_str() {
            "BT" => {
                scale = 1.0;
                line_y = 0.0;
            }
            "Tf" => {
                if let Some(Object::Name(name)) = operands.first() {
                    encoding = encodings.get(name);
                }
                if let Some(size) = operands.get(1).and_then(as_number) {
                    font_size = size;
                }
            }
            "TL" => {
                if let Some(value) = operands.first().and_then(as_number) {
                    leading = value;
                }
            }
            "Tm" => {
                if operands.len() == 6 {
                    let d = as_number(&operands[3]).unwrap_or(1.0);
                    scale = if d == 0.0 { 1.0 } else { d.abs() };
                    line_y = as_number(&operands[5]).unwrap_or(line_y);
                }
            }
            "Td" | "TD" => {
                let ty = operands.get(1).and_then(as_number).unwrap_or(0.0);
                if op.operator == "TD" {
                    leading = -ty;
                }
                line_y += ty * scale;
            }
            "T*" => line_y -= leading * scale,
            "Tj" | "'" | "\"" => {
                if op.operator != "Tj" {
                    line_y -= leading * scale;
                }
                if let Some(text) = operands.last().and_then(|o| shown_text(o, encoding)) {
                    spans.push(Span { y: line_y, text, size: font_size * scale });
                }
            }
            "TJ" => {
                if let Some(Object::Array(items)) = operands.first() {
                    let text: String = items.iter().filter_map(|o| shown_text(o, encoding)).collect();
                    spans.push(Span { y: line_y, text, size: font_size * scale });
                }
            }
            _ => {}
        }
    }

    // Lines keyed by y rounded to 0.1, top of page first
    let mut grouped: BTreeMap<i64, Vec<Span>> = BTreeMap::new();
    for span in spans.into_iter().filter(|s| !s.text.trim().is_empty()) {
        let key = -(span.y * 10.0).round() as i64;
        grouped.entry(key).or_default().push(span);
    }

    grouped
        .into_values()
        .map(|spans| {
            let text = spans
                .iter()
                .map(|s| s.text.trim())
                .collect::<Vec<_>>()
                .join(" ");
            LayoutLine {
                text,
                font_size: dominant_size(&spans),
            }
        })
        .collect()
}

/// Most common span size on a line, rounded to 0.01
fn dominant_size(spans: &[Span]) -> Option<f32> {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for span in spans.iter().filter(|s| s.size > 0.0) {
        *counts.entry((span.size * 100.0).round() as i64).or_default() += 1;
    }
    counts
        .into_iter()
        .max_by_key(|(_, count)| *count)
        .map(|(size, _)| size as f32 / 100.0)
}

fn as_number(object: &Object) -> Option<f32> {
    match object {
        Object::Integer(v) => Some(*v as f32),
        Object::Real(v) => Some(*v as f32),
        _ => None,
    }
}

/// Decode a string operand with the current font's encoding when it has one
fn shown_text(object: &Object, encoding: Option<&Encoding>) -> Option<String> {
    if let (Object::String(bytes, _), Some(encoding)) = (object, encoding) {
        match Document::decode_text(encoding, bytes) {
            Ok(text) => return Some(text),
            Err(e) => tracing::debug!("Font decoding failed, falling back to raw bytes: {}", e),
        }
    }
    decode_string(object)
}

/// Decode a PDF string operand (UTF-16BE with BOM, otherwise byte-per-char)
fn decode_string(object: &Object) -> Option<String> {
    let Object::String(bytes, _) = object else {
        return None;
    };

    if bytes.len() >= 2 && bytes[0] == 0xFE && bytes[1] == 0xFF {
        let units: Vec<u16> = bytes[2..]
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .collect();
        return Some(String::from_utf16_lossy(&units));
    }

    Some(bytes.iter().map(|b| *b as char).collect())
}
