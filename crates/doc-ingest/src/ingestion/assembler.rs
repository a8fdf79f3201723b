//! Merges chunk and table artifacts into retrieval documents

use std::collections::BTreeMap;
use std::path::Path;

use crate::error::Result;
use crate::types::{Chunk, DocumentKind, RetrievalDocument, TableRecord};

use super::artifact;

const LANGUAGE: &str = "en";

/// Build the retrieval documents of one file: text chunks first, then tables
/// in index order
pub fn assemble(chunks_path: &Path, tables_path: &Path, filename: &str) -> Result<Vec<RetrievalDocument>> {
    tracing::debug!(
        "Creating combined chunk documents from '{}' & '{}'",
        chunks_path.display(),
        tables_path.display()
    );

    let chunks: Vec<Chunk> = artifact::read_json(chunks_path)?;
    let tables: BTreeMap<usize, TableRecord> = artifact::read_json(tables_path)?;

    Ok(assemble_records(&chunks, &tables, filename))
}

/// `assemble` over in-memory records
pub fn assemble_records(
    chunks: &[Chunk],
    tables: &BTreeMap<usize, TableRecord>,
    filename: &str,
) -> Vec<RetrievalDocument> {
    let text_docs = chunks.iter().map(|chunk| {
        let breadcrumb = chunk.breadcrumb();
        let page_content = if breadcrumb.is_empty() {
            chunk.content.clone()
        } else {
            format!("{}\n{}", breadcrumb, chunk.content)
        };
        RetrievalDocument {
            page_content,
            filename: filename.to_string(),
            kind: DocumentKind::Text,
            source: breadcrumb,
            language: LANGUAGE.to_string(),
        }
    });

    let table_docs = tables.values().map(|table| RetrievalDocument {
        page_content: table.summary.clone(),
        filename: filename.to_string(),
        kind: DocumentKind::Table,
        source: table.html.clone(),
        language: LANGUAGE.to_string(),
    });

    text_docs.chain(table_docs).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(summary: &str) -> TableRecord {
        TableRecord {
            html: format!("<table><tbody><tr><td>{}</td></tr></tbody></table>", summary),
            caption: String::new(),
            summary: summary.to_string(),
        }
    }

    #[test]
    fn test_text_before_tables_in_index_order() {
        let chunks = vec![
            Chunk {
                chapter_title: Some("Intro".to_string()),
                section_title: Some("Scope".to_string()),
                content: "Hello world.".to_string(),
                ..Default::default()
            },
            Chunk {
                content: "Preface text.".to_string(),
                ..Default::default()
            },
        ];
        let mut tables = BTreeMap::new();
        tables.insert(7, table("later"));
        tables.insert(2, table("earlier"));

        let docs = assemble_records(&chunks, &tables, "guide.pdf");
        assert_eq!(docs.len(), 4);

        assert_eq!(docs[0].page_content, "Chapter: Intro Section: Scope \nHello world.");
        assert_eq!(docs[0].source, "Chapter: Intro Section: Scope ");
        assert_eq!(docs[1].page_content, "Preface text.");
        assert_eq!(docs[1].source, "");

        assert_eq!(docs[2].kind, DocumentKind::Table);
        assert_eq!(docs[2].page_content, "earlier");
        assert!(docs[2].source.starts_with("<table>"));
        assert_eq!(docs[3].page_content, "later");
        assert!(docs.iter().all(|d| d.language == "en" && d.filename == "guide.pdf"));
    }

    #[test]
    fn test_assemble_reads_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let chunks_path = dir.path().join("a_chunks.json");
        let tables_path = dir.path().join("a_clean_tables.json");
        artifact::write_json(
            &chunks_path,
            &vec![Chunk {
                content: "Body.".to_string(),
                ..Default::default()
            }],
        )
        .unwrap();
        std::fs::write(&tables_path, "{}").unwrap();

        let docs = assemble(&chunks_path, &tables_path, "a.pdf").unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].kind, DocumentKind::Text);
    }

    #[test]
    fn test_missing_artifact_is_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(assemble(&dir.path().join("x"), &dir.path().join("y"), "x.pdf").is_err());
    }
}
