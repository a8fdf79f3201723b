//! Intermediate and final records written by the pipeline stages

use serde::{Deserialize, Serialize};

use super::BlockLabel;

/// A labeled block emitted by text extraction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBlock {
    pub label: BlockLabel,
    pub text: String,
    /// 1-based page number, 0 when unknown
    pub page: u32,
    /// Average font size of the header on the page, when resolved
    pub font_size: Option<f32>,
}

impl TextBlock {
    /// Create a block without font information
    pub fn new(label: BlockLabel, text: impl Into<String>, page: u32) -> Self {
        Self {
            label,
            text: text.into(),
            page,
            font_size: None,
        }
    }
}

/// A table kept after LLM classification
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub html: String,
    pub caption: String,
    pub summary: String,
}

/// A retrieval-ready text chunk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    pub chapter_title: Option<String>,
    pub section_title: Option<String>,
    pub subsection_title: Option<String>,
    pub subsubsection_title: Option<String>,
    pub content: String,
    /// Sorted, deduplicated page numbers
    pub page_range: Vec<u32>,
    /// References back to the originating text blocks (`#texts/<idx>`)
    pub source_nodes: Vec<String>,
    /// 1-based part index when one section was split into several chunks
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub part_id: Option<u32>,
}

impl Chunk {
    /// Human readable heading trail, e.g. `Chapter: Intro Section: Scope `
    pub fn breadcrumb(&self) -> String {
        let mut trail = String::new();
        let levels = [
            ("Chapter", &self.chapter_title),
            ("Section", &self.section_title),
            ("Subsection", &self.subsection_title),
            ("Subsubsection", &self.subsubsection_title),
        ];
        for (name, title) in levels {
            if let Some(title) = title.as_deref().filter(|t| !t.is_empty()) {
                trail.push_str(&format!("{}: {} ", name, title));
            }
        }
        trail
    }
}

/// Kind of a retrieval document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentKind {
    Text,
    Table,
}

/// Final document handed to the vector store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievalDocument {
    pub page_content: String,
    pub filename: String,
    #[serde(rename = "type")]
    pub kind: DocumentKind,
    /// Heading trail for text, table HTML for tables
    pub source: String,
    pub language: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_breadcrumb_skips_missing_levels() {
        let chunk = Chunk {
            chapter_title: Some("Intro".to_string()),
            subsection_title: Some("Details".to_string()),
            ..Default::default()
        };
        assert_eq!(chunk.breadcrumb(), "Chapter: Intro Subsection: Details ");
        assert_eq!(Chunk::default().breadcrumb(), "");
    }

    #[test]
    fn test_part_id_omitted_when_absent() {
        let json = serde_json::to_value(Chunk::default()).unwrap();
        assert!(json.get("part_id").is_none());
        assert!(json.get("chapter_title").unwrap().is_null());
    }

    #[test]
    fn test_document_kind_serialized_as_type() {
        let doc = RetrievalDocument {
            page_content: "summary".to_string(),
            filename: "a.pdf".to_string(),
            kind: DocumentKind::Table,
            source: "<table></table>".to_string(),
            language: "en".to_string(),
        };
        let json = serde_json::to_value(&doc).unwrap();
        assert_eq!(json["type"], "table");
    }
}
