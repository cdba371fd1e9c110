use crate::RetrievalError;
use cbo_core::brain_contracts::IndexedFile;
use cbo_core::text::{query_terms, quoted_phrases, term_set, words};
use cbo_storage::BrainStore;
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

const SCORE_TAG_TERM: u32 = 1_200;
const SCORE_SUMMARY_TERM: u32 = 1_000;
const SCORE_TITLE_TERM: u32 = 800;
const SCORE_PHRASE: u32 = 1_500;
const SCORE_CATEGORY_PRIOR: u32 = 250;
const SCORE_RECENCY_MAX: u32 = 100;
const SCORE_RELEVANCE_FLOOR: u32 = 500;

#[derive(Debug, Clone)]
pub struct SelectorConfig {
    pub tag_term_bps: u32,
    pub summary_term_bps: u32,
    pub title_term_bps: u32,
    pub phrase_bps: u32,
    pub category_prior_bps: u32,
    pub recency_max_bps: u32,
    pub relevance_floor_bps: u32,
    /// Question word -> knowledge category it biases toward.
    pub category_priors: BTreeMap<String, String>,
}

impl Default for SelectorConfig {
    fn default() -> Self {
        let mut category_priors = BTreeMap::new();
        for word in ["who", "whom", "whose"] {
            category_priors.insert(word.to_string(), "characters".to_string());
        }
        category_priors.insert("when".to_string(), "timeline".to_string());
        category_priors.insert("what".to_string(), "facts".to_string());
        category_priors.insert("why".to_string(), "themes".to_string());

        Self {
            tag_term_bps: SCORE_TAG_TERM,
            summary_term_bps: SCORE_SUMMARY_TERM,
            title_term_bps: SCORE_TITLE_TERM,
            phrase_bps: SCORE_PHRASE,
            category_prior_bps: SCORE_CATEGORY_PRIOR,
            recency_max_bps: SCORE_RECENCY_MAX,
            relevance_floor_bps: SCORE_RELEVANCE_FLOOR,
            category_priors,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScoredFile {
    pub path: String,
    pub score_bps: u32,
    pub reasons: Vec<String>,
}

pub struct FileSelector {
    config: SelectorConfig,
}

impl FileSelector {
    pub fn new(config: SelectorConfig) -> Self {
        Self { config }
    }

    /// Top `limit` file paths for `question`; empty when nothing clears the relevance floor.
    pub fn select_relevant_files(
        &self,
        store: &BrainStore,
        brain: &str,
        question: &str,
        limit: usize,
    ) -> Result<Vec<String>, RetrievalError> {
        Ok(self
            .score_brain(store, brain, question, limit)?
            .into_iter()
            .map(|scored| scored.path)
            .collect())
    }

    pub fn score_brain(
        &self,
        store: &BrainStore,
        brain: &str,
        question: &str,
        limit: usize,
    ) -> Result<Vec<ScoredFile>, RetrievalError> {
        let index = store.knowledge_index(brain)?;
        let ranked = self.rank(&index, question, limit);
        debug!(
            brain,
            indexed = index.len(),
            selected = ranked.len(),
            "files_selected"
        );
        Ok(ranked)
    }

    pub fn rank(&self, index: &[IndexedFile], question: &str, limit: usize) -> Vec<ScoredFile> {
        if limit == 0 || index.is_empty() {
            return Vec::new();
        }
        let terms = query_terms(question);
        let phrases = quoted_phrases(question);
        if terms.is_empty() && phrases.is_empty() {
            return Vec::new();
        }
        let preferred_category = self.preferred_category(question);
        let recency = recency_bonuses(index, self.config.recency_max_bps);

        let mut scored = index
            .iter()
            .map(|file| {
                let mut candidate = self.score_terms(file, &terms, &phrases);
                if let (Some(preferred), Some(category)) =
                    (preferred_category.as_deref(), file.category)
                {
                    if preferred == category {
                        candidate.score_bps += self.config.category_prior_bps;
                        candidate.reasons.push(format!("category_prior:{category}"));
                    }
                }
                let bonus = recency.get(file.path.as_str()).copied().unwrap_or(0);
                if bonus > 0 {
                    candidate.score_bps += bonus;
                    candidate.reasons.push(format!("recency:{bonus}"));
                }
                candidate
            })
            .filter(|candidate| candidate.score_bps >= self.config.relevance_floor_bps)
            .collect::<Vec<_>>();

        scored.sort_by(|left, right| {
            right
                .score_bps
                .cmp(&left.score_bps)
                .then(left.path.cmp(&right.path))
        });
        scored.truncate(limit);
        scored
    }

    fn score_terms(&self, file: &IndexedFile, terms: &[String], phrases: &[String]) -> ScoredFile {
        let tag_terms = file
            .metadata
            .tags
            .iter()
            .flat_map(|tag| term_set(tag))
            .collect::<BTreeSet<_>>();
        let summary = file.metadata.summary.as_deref().unwrap_or_default();
        let summary_terms = term_set(summary);
        let title_text = path_words(&file.path);
        let title_terms = term_set(&title_text);

        let mut score_bps = 0u32;
        let mut reasons = Vec::new();
        for term in terms {
            let hit = if tag_terms.contains(term) {
                Some(("tag", self.config.tag_term_bps))
            } else if summary_terms.contains(term) {
                Some(("summary", self.config.summary_term_bps))
            } else if title_terms.contains(term) {
                Some(("title", self.config.title_term_bps))
            } else {
                None
            };
            if let Some((field, weight)) = hit {
                score_bps += weight;
                reasons.push(format!("{field}:{term}"));
            }
        }

        if !phrases.is_empty() {
            let haystack = format!(
                "{} {} {}",
                summary.to_lowercase(),
                file.metadata
                    .tags
                    .iter()
                    .cloned()
                    .collect::<Vec<_>>()
                    .join(" "),
                title_text
            );
            for phrase in phrases {
                if haystack.contains(phrase.as_str()) {
                    score_bps += self.config.phrase_bps;
                    reasons.push(format!("phrase:{phrase}"));
                }
            }
        }

        ScoredFile {
            path: file.path.clone(),
            score_bps,
            reasons,
        }
    }

    fn preferred_category(&self, question: &str) -> Option<String> {
        words(question)
            .into_iter()
            .find_map(|word| self.config.category_priors.get(&word).cloned())
    }
}

impl Default for FileSelector {
    fn default() -> Self {
        Self::new(SelectorConfig::default())
    }
}

fn path_words(path: &str) -> String {
    let trimmed = path.strip_suffix(".md").unwrap_or(path);
    let mut segments = trimmed.split('/').collect::<Vec<_>>();
    if segments.len() > 1 {
        segments.remove(0);
    }
    segments
        .join(" ")
        .replace(['_', '-'], " ")
        .to_lowercase()
}

/// Rank-proportional bonus in `[0, max_bps]`; newest update chapter, then newest mtime, earns the most.
fn recency_bonuses(index: &[IndexedFile], max_bps: u32) -> BTreeMap<&str, u32> {
    let key = |file: &IndexedFile| -> (u32, Option<DateTime<Utc>>) {
        (
            file.metadata
                .last_updated_chapter
                .or(file.metadata.source_chapter)
                .unwrap_or(0),
            file.modified_at,
        )
    };
    let distinct = index.iter().map(key).collect::<BTreeSet<_>>();
    let mut bonuses = BTreeMap::new();
    if distinct.len() < 2 || max_bps == 0 {
        return bonuses;
    }
    let ranks = distinct
        .into_iter()
        .enumerate()
        .map(|(rank, value)| (value, rank as u32))
        .collect::<BTreeMap<_, _>>();
    let top = (ranks.len() - 1) as u32;
    for file in index {
        let rank = ranks.get(&key(file)).copied().unwrap_or(0);
        bonuses.insert(file.path.as_str(), max_bps * rank / top);
    }
    bonuses
}
