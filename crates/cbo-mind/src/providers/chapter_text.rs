use super::body_sentences;
use cbo_core::brain_contracts::{chapter_sort_key, Confidence, FileMetadata, KnowledgeFile};
use cbo_core::capability::{
    CapabilityError, CapabilityFailureKind, CapabilityGuardrails, ExtractionCapability,
    ExtractionOutput, ExtractionRequest, FileAction, FileOperation,
};
use cbo_core::text::{literal_terms, term_set, truncate_chars};
use std::collections::BTreeSet;
use std::fs;
use std::io::ErrorKind;
use std::path::PathBuf;

const DEFAULT_MAX_FACTS: usize = 8;
const MIN_FACT_WORDS: usize = 4;
const SUMMARY_CHARS: usize = 160;
const MAX_KEY_ENTITIES: usize = 10;

/// Offline extractor: keeps the chapter sentences that mention the objective's terms.
#[derive(Debug, Clone)]
pub struct ChapterTextExtractor {
    chapters_dir: PathBuf,
    max_facts: usize,
}

impl ChapterTextExtractor {
    pub fn new(chapters_dir: impl Into<PathBuf>) -> Self {
        Self {
            chapters_dir: chapters_dir.into(),
            max_facts: DEFAULT_MAX_FACTS,
        }
    }

    fn read_chapter(&self, chapter_id: &str) -> Result<String, CapabilityError> {
        for extension in ["md", "txt"] {
            let path = self.chapters_dir.join(format!("{chapter_id}.{extension}"));
            match fs::read_to_string(&path) {
                Ok(raw) => return Ok(raw),
                Err(err) if err.kind() == ErrorKind::NotFound => continue,
                Err(err) => {
                    return Err(CapabilityError::new(
                        CapabilityFailureKind::ProviderError,
                        format!("failed to read {}: {err}", path.display()),
                    ))
                }
            }
        }
        Err(CapabilityError::new(
            CapabilityFailureKind::Unavailable,
            format!(
                "no text for chapter {chapter_id} under {}",
                self.chapters_dir.display()
            ),
        ))
    }
}

impl ExtractionCapability for ChapterTextExtractor {
    fn extract(
        &self,
        request: &ExtractionRequest,
        _guardrails: &CapabilityGuardrails,
    ) -> Result<ExtractionOutput, CapabilityError> {
        let chapter_id = request.chapter_id.trim();
        if chapter_id.is_empty()
            || !chapter_id
                .chars()
                .all(|ch| ch.is_ascii_alphanumeric() || ch == '-' || ch == '_')
        {
            return Err(CapabilityError::new(
                CapabilityFailureKind::InvalidOutput,
                format!("unsupported chapter id: {chapter_id:?}"),
            ));
        }
        let text = self.read_chapter(chapter_id)?;
        let terms = term_set(&request.objective);
        let facts = body_sentences(&text)
            .into_iter()
            .filter(|sentence| sentence.split_whitespace().count() >= MIN_FACT_WORDS)
            .filter(|sentence| !term_set(sentence).is_disjoint(&terms))
            .take(self.max_facts)
            .collect::<Vec<_>>();
        if facts.is_empty() {
            return Ok(ExtractionOutput {
                file_operations: Vec::new(),
                summary: format!(
                    "chapter {chapter_id} has nothing on: {}",
                    request.objective.trim()
                ),
                key_entities: Vec::new(),
            });
        }

        let locator = format!("chapter_{chapter_id}");
        let chapter_number = u32::try_from(chapter_sort_key(chapter_id).0).ok();
        let metadata = FileMetadata {
            source: Some(locator.clone()),
            source_chapter: chapter_number,
            last_updated_chapter: chapter_number,
            confidence: Some(Confidence::Medium),
            tags: literal_terms(&request.objective)
                .into_iter()
                .filter(|term| !term.contains(' '))
                .collect(),
            summary: Some(truncate_chars(&facts[0], SUMMARY_CHARS)),
            ..FileMetadata::default()
        };

        let mut body = format!("# Chapter {chapter_id} notes\n\n");
        for fact in &facts {
            body.push_str(&format!("- {fact}.\n"));
        }
        body.push('\n');
        for fact in &facts {
            body.push_str(&format!("> {fact}. (Source: {locator})\n\n"));
        }

        let path = format!("facts/enriched_chapter_{chapter_id}.md");
        let content = KnowledgeFile::new(path.clone(), metadata, body)
            .render()
            .map_err(|err| {
                CapabilityError::new(CapabilityFailureKind::ProviderError, err.to_string())
            })?;

        Ok(ExtractionOutput {
            file_operations: vec![FileOperation {
                action: FileAction::Create,
                path,
                content,
                reason: format!("facts relevant to: {}", request.objective.trim()),
            }],
            summary: format!(
                "extracted {} facts from chapter {chapter_id} for: {}",
                facts.len(),
                request.objective.trim()
            ),
            key_entities: key_entities(&facts),
        })
    }
}

/// Capitalised words that are not sentence-initial.
fn key_entities(facts: &[String]) -> Vec<String> {
    let mut seen = BTreeSet::new();
    let mut entities = Vec::new();
    for fact in facts {
        for word in fact.split_whitespace().skip(1) {
            let word = word.trim_matches(|ch: char| !ch.is_alphanumeric());
            let capitalised = word.chars().next().is_some_and(char::is_uppercase);
            if capitalised && word.chars().count() >= 3 && seen.insert(word.to_string()) {
                entities.push(word.to_string());
            }
            if entities.len() >= MAX_KEY_ENTITIES {
                return entities;
            }
        }
    }
    entities
}
