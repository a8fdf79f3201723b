//! Hierarchical, token-budgeted chunking
//!
//! Blocks are folded into sections under a four-level heading trail
//! (chapter, section, subsection, subsubsection). Each section's content is
//! split into sentences and greedily packed into chunks that fit the token
//! budget of the embedding model.

use std::sync::Arc;
use std::time::Instant;
use unicode_segmentation::UnicodeSegmentation;

use crate::config::ChunkingConfig;
use crate::error::Result;
use crate::processing::SourceFile;
use crate::providers::Tokenizer;
use crate::types::{BlockLabel, Chunk, TextBlock};

use super::artifact;

/// Current heading trail
#[derive(Debug, Clone, Default)]
struct Headings {
    chapter: Option<String>,
    section: Option<String>,
    subsection: Option<String>,
    subsubsection: Option<String>,
}

impl Headings {
    /// Record a header; deeper levels are reset by shallower ones
    fn update(&mut self, level: usize, title: String) {
        match level {
            1 => {
                self.chapter = Some(title);
                self.section = None;
                self.subsection = None;
                self.subsubsection = None;
            }
            2 => {
                self.section = Some(title);
                self.subsection = None;
                self.subsubsection = None;
            }
            3 => {
                self.subsection = Some(title);
                self.subsubsection = None;
            }
            _ => self.subsubsection = Some(title),
        }
    }
}

/// Content accumulated since the last header
#[derive(Debug, Default)]
struct SectionBuffer {
    headings: Headings,
    content: String,
    pages: Vec<u32>,
    source_nodes: Vec<String>,
}

impl SectionBuffer {
    /// Fill heading fields that are still unset
    fn backfill(&mut self, state: &Headings) {
        let fields = [
            (&mut self.headings.chapter, &state.chapter),
            (&mut self.headings.section, &state.section),
            (&mut self.headings.subsection, &state.subsection),
            (&mut self.headings.subsubsection, &state.subsubsection),
        ];
        for (field, value) in fields {
            if field.is_none() {
                *field = value.clone();
            }
        }
    }

    fn push(&mut self, block: &TextBlock, idx: usize) {
        let text = block.text.trim();
        match block.label {
            BlockLabel::Code => self.content.push_str(&format!("```\n{}\n``` ", text)),
            BlockLabel::Formula => self.content.push_str(&format!("${}$ ", text)),
            _ => self.content.push_str(&format!("{} ", text)),
        }
        if block.page > 0 {
            self.pages.push(block.page);
        }
        self.source_nodes.push(format!("#texts/{}", idx));
    }
}

/// Splits extracted text blocks into retrieval chunks
pub struct Chunker {
    tokenizer: Arc<dyn Tokenizer>,
    config: ChunkingConfig,
}

impl Chunker {
    pub fn new(tokenizer: Arc<dyn Tokenizer>, config: ChunkingConfig) -> Self {
        Self { tokenizer, config }
    }

    /// Chunk an ordered list of blocks
    pub async fn chunk(&self, blocks: &[TextBlock]) -> Result<Vec<Chunk>> {
        let font_ranks = header_font_ranks(blocks);
        let mut chunks = Vec::new();
        let mut state = Headings::default();
        let mut buffer = SectionBuffer::default();

        for (idx, block) in blocks.iter().enumerate() {
            match block.label {
                BlockLabel::SectionHeader => {
                    let (level, title) = header_level(&block.text, block.font_size, &font_ranks);
                    state.update(level, title);

                    self.flush(std::mem::take(&mut buffer), &mut chunks).await?;
                    buffer.headings = state.clone();
                }
                label if label.is_content() => {
                    buffer.backfill(&state);
                    buffer.push(block, idx);
                }
                label => {
                    tracing::debug!("Skipping adding {:?}", label);
                }
            }
        }

        self.flush(buffer, &mut chunks).await?;
        Ok(chunks)
    }

    /// Chunk the file's text artifact into its chunk artifact
    ///
    /// Returns the seconds spent, or `None` when chunking failed.
    pub async fn chunk_file(&self, file: &SourceFile) -> Option<f64> {
        let filename = file.filename();

        if file.flags.chunked {
            tracing::debug!("[{}] Already chunked", filename);
            return Some(0.0);
        }

        let start = Instant::now();
        let result = async {
            let blocks: Vec<TextBlock> = artifact::load_json(file.artifacts.text.clone()).await?;
            let chunks = self.chunk(&blocks).await?;
            let count = chunks.len();
            artifact::store_json(file.artifacts.chunks.clone(), chunks).await?;
            Ok::<usize, crate::error::Error>(count)
        }
        .await;

        match result {
            Ok(count) => {
                let seconds = start.elapsed().as_secs_f64();
                tracing::debug!("[{}] {} chunks saved in {:.2}s", filename, count, seconds);
                Some(seconds)
            }
            Err(e) => {
                tracing::error!("[{}] Error chunking: {}", filename, e);
                None
            }
        }
    }

    /// Split the buffered section into budgeted chunks
    async fn flush(&self, buffer: SectionBuffer, chunks: &mut Vec<Chunk>) -> Result<()> {
        let content = buffer.content.trim();
        if content.is_empty() {
            return Ok(());
        }

        let parts = self.pack_sentences(content).await?;

        let mut pages = buffer.pages;
        pages.sort_unstable();
        pages.dedup();

        let multi_part = parts.len() > 1;
        for (i, part) in parts.into_iter().enumerate() {
            chunks.push(Chunk {
                chapter_title: buffer.headings.chapter.clone(),
                section_title: buffer.headings.section.clone(),
                subsection_title: buffer.headings.subsection.clone(),
                subsubsection_title: buffer.headings.subsubsection.clone(),
                content: part,
                page_range: pages.clone(),
                source_nodes: buffer.source_nodes.clone(),
                part_id: multi_part.then_some(i as u32 + 1),
            });
        }

        Ok(())
    }

    /// Greedy sentence packing with optional one-sentence overlap
    async fn pack_sentences(&self, text: &str) -> Result<Vec<String>> {
        let budget = self.config.token_budget();
        let sentences: Vec<&str> = text
            .split_sentence_bounds()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect();

        let mut parts = Vec::new();
        let mut current: Vec<(&str, usize)> = Vec::new();
        let mut current_tokens = 0usize;

        for sentence in sentences {
            let tokens = self.tokenizer.count_tokens(sentence).await?;

            if !current.is_empty() && current_tokens + tokens > budget {
                parts.push(join(&current));

                let carried = if self.config.sentence_overlap {
                    current.last().copied().filter(|(_, last)| last + tokens <= budget)
                } else {
                    None
                };
                current.clear();
                current_tokens = 0;
                if let Some((last, last_tokens)) = carried {
                    current.push((last, last_tokens));
                    current_tokens = last_tokens;
                }
            }

            current.push((sentence, tokens));
            current_tokens += tokens;
        }

        if !current.is_empty() {
            parts.push(join(&current));
        }

        Ok(parts)
    }
}

fn join(sentences: &[(&str, usize)]) -> String {
    sentences
        .iter()
        .map(|(s, _)| *s)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Distinct header font sizes, largest first
fn header_font_ranks(blocks: &[TextBlock]) -> Vec<f32> {
    let mut sizes: Vec<f32> = blocks
        .iter()
        .filter(|b| b.label == BlockLabel::SectionHeader)
        .filter_map(|b| b.font_size)
        .collect();
    sizes.sort_by(|a, b| b.total_cmp(a));
    sizes.dedup();
    sizes
}

/// Header level from `#` markers, else from the font size rank
fn header_level(text: &str, font_size: Option<f32>, ranks: &[f32]) -> (usize, String) {
    let text = text.trim();

    if text.starts_with('#') {
        let title = text.trim_start_matches('#');
        let level = text.len() - title.len();
        return (level, title.trim().to_string());
    }

    let level = font_size
        .and_then(|size| ranks.iter().position(|r| *r == size))
        .map(|pos| pos + 1)
        .unwrap_or(ranks.len());

    (level, text.to_string())
}
