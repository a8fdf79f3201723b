//! Converted document model produced by the conversion engine
//!
//! The layout follows the docling JSON export closely enough that the
//! engine's output can be deserialized directly; fields the pipeline does not
//! use are ignored.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Structural label attached to every text item
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockLabel {
    Title,
    SectionHeader,
    Text,
    Paragraph,
    ListItem,
    Code,
    Formula,
    Caption,
    Footnote,
    PageHeader,
    PageFooter,
    Reference,
    #[serde(other)]
    Other,
}

impl BlockLabel {
    /// Labels dropped during text extraction
    pub fn is_excluded(&self) -> bool {
        matches!(
            self,
            Self::PageHeader | Self::PageFooter | Self::Caption | Self::Reference | Self::Footnote
        )
    }

    /// Labels whose text is accumulated into chunk content
    pub fn is_content(&self) -> bool {
        matches!(self, Self::Text | Self::ListItem | Self::Code | Self::Formula)
    }
}

/// Where an item was found in the source PDF
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provenance {
    /// 1-based page number
    pub page_no: u32,
}

/// A text item of the converted document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextItem {
    pub label: BlockLabel,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub prov: Vec<Provenance>,
}

impl TextItem {
    /// Page of the first provenance entry, 0 when unknown
    pub fn first_page(&self) -> u32 {
        self.prov.first().map(|p| p.page_no).unwrap_or(0)
    }
}

/// JSON pointer style reference (`#/texts/12`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RefItem {
    #[serde(rename = "$ref")]
    pub cref: String,
}

impl RefItem {
    /// Index into `texts` when the reference points there
    pub fn text_index(&self) -> Option<usize> {
        self.cref.strip_prefix("#/texts/")?.parse().ok()
    }
}

/// One cell of a table grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableCell {
    #[serde(default)]
    pub text: String,
    pub start_row_offset_idx: usize,
    pub end_row_offset_idx: usize,
    pub start_col_offset_idx: usize,
    pub end_col_offset_idx: usize,
    #[serde(default)]
    pub column_header: bool,
    #[serde(default)]
    pub row_header: bool,
}

impl TableCell {
    fn row_span(&self) -> usize {
        self.end_row_offset_idx.saturating_sub(self.start_row_offset_idx).max(1)
    }

    fn col_span(&self) -> usize {
        self.end_col_offset_idx.saturating_sub(self.start_col_offset_idx).max(1)
    }
}

/// Table grid data
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TableData {
    #[serde(default)]
    pub table_cells: Vec<TableCell>,
    #[serde(default)]
    pub num_rows: usize,
    #[serde(default)]
    pub num_cols: usize,
}

/// A table of the converted document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableItem {
    #[serde(default)]
    pub captions: Vec<RefItem>,
    #[serde(default)]
    pub prov: Vec<Provenance>,
    #[serde(default)]
    pub data: TableData,
}

impl TableItem {
    /// Caption text resolved through the document's text items
    pub fn caption_text(&self, doc: &ConvertedDocument) -> String {
        self.captions
            .iter()
            .filter_map(|r| r.text_index())
            .filter_map(|idx| doc.texts.get(idx))
            .map(|item| item.text.trim())
            .filter(|text| !text.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Render the table grid as HTML, spanning cells emitted once
    pub fn to_html(&self, doc: &ConvertedDocument) -> String {
        let mut cells: Vec<&TableCell> = self.data.table_cells.iter().collect();
        cells.sort_by_key(|c| (c.start_row_offset_idx, c.start_col_offset_idx));

        let rows = self
            .data
            .num_rows
            .max(cells.iter().map(|c| c.end_row_offset_idx).max().unwrap_or(0));

        let mut html = String::from("<table>");
        let caption = self.caption_text(doc);
        if !caption.is_empty() {
            html.push_str(&format!("<caption>{}</caption>", escape_html(&caption)));
        }
        html.push_str("<tbody>");

        for row in 0..rows {
            let row_cells: Vec<&&TableCell> = cells
                .iter()
                .filter(|c| c.start_row_offset_idx == row)
                .collect();
            if row_cells.is_empty() {
                continue;
            }

            html.push_str("<tr>");
            for cell in row_cells {
                let tag = if cell.column_header || cell.row_header { "th" } else { "td" };
                html.push('<');
                html.push_str(tag);
                if cell.row_span() > 1 {
                    html.push_str(&format!(" rowspan=\"{}\"", cell.row_span()));
                }
                if cell.col_span() > 1 {
                    html.push_str(&format!(" colspan=\"{}\"", cell.col_span()));
                }
                html.push('>');
                html.push_str(&escape_html(cell.text.trim()));
                html.push_str(&format!("</{}>", tag));
            }
            html.push_str("</tr>");
        }

        html.push_str("</tbody></table>");
        html
    }
}

/// Page metadata as exported by the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageItem {
    pub page_no: u32,
}

/// Structured document produced by the conversion engine
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConvertedDocument {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub texts: Vec<TextItem>,
    #[serde(default)]
    pub tables: Vec<TableItem>,
    #[serde(default)]
    pub pages: BTreeMap<String, PageItem>,
}

impl ConvertedDocument {
    /// Number of pages known to the engine
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
