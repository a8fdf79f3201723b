//! Text extraction with header-level resolution
//!
//! Section headers get their level from the PDF outline when there is one
//! (`#` markers prefixed to the text), otherwise from the font size of the
//! matching line on the page, which the chunker ranks later.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Instant;

use crate::error::Result;
use crate::processing::SourceFile;
use crate::types::{BlockLabel, ConvertedDocument, TextBlock};

use super::artifact;
use super::fuzz;
use super::pdf::{LayoutLine, Outline, PdfInspector};

/// Minimum `partial_ratio` for a fuzzy match
pub const MATCH_THRESHOLD: f64 = 80.0;

/// Extracted blocks of one document
#[derive(Debug, Clone, Default)]
pub struct TextExtraction {
    pub blocks: Vec<TextBlock>,
    pub page_count: usize,
}

/// Turns a converted document into labeled text blocks
pub struct TextExtractor {
    inspector: Arc<dyn PdfInspector>,
}

impl TextExtractor {
    pub fn new(inspector: Arc<dyn PdfInspector>) -> Self {
        Self { inspector }
    }

    /// Extract blocks; inspector failures degrade header levels but never fail
    pub fn extract(&self, doc: &ConvertedDocument, pdf_path: &Path) -> TextExtraction {
        let page_count = self.inspector.page_count(pdf_path).unwrap_or_else(|e| {
            tracing::debug!("Page count unavailable for {}: {}", pdf_path.display(), e);
            doc.page_count()
        });

        if doc.texts.is_empty() {
            tracing::debug!("No text content found in '{}'", pdf_path.display());
            return TextExtraction { blocks: Vec::new(), page_count };
        }

        let outline = match self.inspector.outline(pdf_path) {
            Ok(outline) => outline,
            Err(e) => {
                tracing::debug!("No TOC found or failed to load TOC: {}", e);
                None
            }
        };

        let page_lines = if outline.is_none() {
            self.header_page_lines(doc, pdf_path)
        } else {
            BTreeMap::new()
        };

        let mut blocks = Vec::new();
        let mut last_level = 0usize;

        for item in &doc.texts {
            if item.label.is_excluded() {
                continue;
            }

            if item.label != BlockLabel::SectionHeader {
                blocks.push(TextBlock::new(item.label, item.text.clone(), item.first_page()));
                continue;
            }

            for prov in &item.prov {
                let page = prov.page_no;
                match &outline {
                    Some(outline) => {
                        let level = match outline_level(outline, &item.text) {
                            Some(level) => {
                                last_level = level;
                                level
                            }
                            None => last_level + 1,
                        };
                        let text = format!("{} {}", "#".repeat(level), item.text);
                        blocks.push(TextBlock::new(item.label, text, page));
                    }
                    None => {
                        let lines = page_lines.get(&page).map(Vec::as_slice).unwrap_or(&[]);
                        let mut block = TextBlock::new(item.label, item.text.clone(), page);
                        block.font_size = header_font_size(lines, &item.text);
                        blocks.push(block);
                    }
                }
            }
        }

        TextExtraction { blocks, page_count }
    }

    /// Extract and persist the text artifact, returning page count and seconds
    pub fn process_file(&self, doc: &ConvertedDocument, file: &SourceFile) -> Result<(usize, f64)> {
        let start = Instant::now();
        let extraction = self.extract(doc, &file.path);
        artifact::write_json(&file.artifacts.text, &extraction.blocks)?;

        let seconds = start.elapsed().as_secs_f64();
        tracing::debug!(
            "[{}] Extracted {} text blocks in {:.2}s",
            file.filename(),
            extraction.blocks.len(),
            seconds
        );
        Ok((extraction.page_count, seconds))
    }

    /// Lines of every page that carries a section header
    fn header_page_lines(&self, doc: &ConvertedDocument, pdf_path: &Path) -> BTreeMap<u32, Vec<LayoutLine>> {
        let mut pages: Vec<u32> = doc
            .texts
            .iter()
            .filter(|item| item.label == BlockLabel::SectionHeader)
            .flat_map(|item| item.prov.iter().map(|p| p.page_no))
            .collect();
        pages.sort_unstable();
        pages.dedup();

        if pages.is_empty() {
            return BTreeMap::new();
        }

        self.inspector.page_lines(pdf_path, &pages).unwrap_or_else(|e| {
            tracing::debug!("Could not read page layout of {}: {}", pdf_path.display(), e);
            BTreeMap::new()
        })
    }
}

/// Level of the first outline entry matching `title`
fn outline_level(outline: &Outline, title: &str) -> Option<usize> {
    outline
        .iter()
        .find(|(entry, _)| fuzz::partial_ratio_ci(title, entry) >= MATCH_THRESHOLD)
        .map(|(_, level)| *level)
}

/// Average font size of the lines matching `text` exactly, rounded to 0.01
fn header_font_size(lines: &[LayoutLine], text: &str) -> Option<f32> {
    let exact: Vec<f32> = lines
        .iter()
        .filter(|line| fuzz::partial_ratio_ci(&line.text, text) >= 100.0)
        .filter_map(|line| line.font_size)
        .collect();

    if exact.is_empty() {
        return None;
    }

    let avg = exact.iter().sum::<f32>() / exact.len() as f32;
    Some((avg * 100.0).round() / 100.0)
}
