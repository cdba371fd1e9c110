use crate::bounded::call_bounded;
use crate::GapError;
use cbo_core::brain_contracts::{chapter_sort_key, ChapterStatus, Confidence};
use cbo_core::capability::{CapabilityGuardrails, ChapterDigest, ReasoningCapability};
use cbo_core::text::literal_terms;
use cbo_storage::BrainStore;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use tracing::debug;

pub const NO_SKIPPED_CHAPTERS: &str = "no skipped chapters";

/// The answer that prompted gap detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedAnswer {
    pub answer: String,
    pub confidence: Confidence,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GapReport {
    /// Numeric chapter order.
    pub candidate_chapters: Vec<String>,
    pub rationale: String,
    /// Chapter id -> question terms that hit its reason or index terms.
    pub literal_hits: BTreeMap<String, Vec<String>>,
    pub capability_hits: Vec<String>,
}

impl GapReport {
    pub fn is_empty(&self) -> bool {
        self.candidate_chapters.is_empty()
    }
}

/// Decides which skipped chapters might answer a question the brain could not.
pub struct GapDetector {
    reasoner: Arc<dyn ReasoningCapability>,
    guardrails: CapabilityGuardrails,
}

impl GapDetector {
    pub fn new(reasoner: Arc<dyn ReasoningCapability>, guardrails: CapabilityGuardrails) -> Self {
        Self {
            reasoner,
            guardrails,
        }
    }

    /// Union of a literal term pass and a capability relevance pass over skipped chapters.
    pub fn detect_gap(
        &self,
        store: &BrainStore,
        brain: &str,
        question: &str,
        failed: Option<&FailedAnswer>,
    ) -> Result<GapReport, GapError> {
        let log = store.read_processing_log(brain)?;
        let skipped = log.chapters_with_status(ChapterStatus::Skipped);
        if skipped.is_empty() {
            debug!(brain, "gap_no_skipped_chapters");
            return Ok(GapReport {
                rationale: NO_SKIPPED_CHAPTERS.to_string(),
                ..GapReport::default()
            });
        }

        let terms = literal_terms(question);
        let mut literal_hits = BTreeMap::new();
        for chapter_id in &skipped {
            let Some(state) = log.state(chapter_id) else {
                continue;
            };
            let haystack = format!(
                "{} {}",
                state.reason.as_deref().unwrap_or_default(),
                state.index_terms.join(" ")
            )
            .to_lowercase();
            let hits = terms
                .iter()
                .filter(|term| haystack.contains(term.as_str()))
                .cloned()
                .collect::<Vec<_>>();
            if !hits.is_empty() {
                literal_hits.insert(chapter_id.clone(), hits);
            }
        }

        let mut capability_hits = Vec::new();
        for chapter_id in skipped.iter().filter(|id| !literal_hits.contains_key(*id)) {
            let Some(state) = log.state(chapter_id) else {
                continue;
            };
            let digest = ChapterDigest {
                chapter_id: chapter_id.clone(),
                reason: state.reason.clone().unwrap_or_default(),
                index_terms: state.index_terms.clone(),
            };
            if self.classify(digest, question)? {
                capability_hits.push(chapter_id.clone());
            }
        }

        let mut candidates = literal_hits
            .keys()
            .chain(capability_hits.iter())
            .cloned()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        candidates.sort_by(|left, right| chapter_sort_key(left).cmp(&chapter_sort_key(right)));

        let rationale = rationale(skipped.len(), &literal_hits, &capability_hits, failed);
        debug!(
            brain,
            skipped = skipped.len(),
            literal = literal_hits.len(),
            capability = capability_hits.len(),
            candidates = candidates.len(),
            "gap_detected"
        );
        Ok(GapReport {
            candidate_chapters: candidates,
            rationale,
            literal_hits,
            capability_hits,
        })
    }

    fn classify(&self, digest: ChapterDigest, question: &str) -> Result<bool, GapError> {
        let reasoner = Arc::clone(&self.reasoner);
        let guardrails = self.guardrails.clone();
        let objective = question.to_string();
        Ok(call_bounded(self.guardrails.timeout_ms, move || {
            reasoner.classify_relevance(&digest, &objective, &guardrails)
        })?)
    }
}

fn rationale(
    skipped: usize,
    literal_hits: &BTreeMap<String, Vec<String>>,
    capability_hits: &[String],
    failed: Option<&FailedAnswer>,
) -> String {
    let mut parts = Vec::new();
    if let Some(failed) = failed {
        parts.push(format!("answer confidence was {}", failed.confidence));
    }
    if literal_hits.is_empty() && capability_hits.is_empty() {
        parts.push(format!("none of {skipped} skipped chapters looks relevant"));
        return parts.join("; ");
    }
    for (chapter_id, terms) in literal_hits {
        parts.push(format!(
            "chapter {chapter_id} matched terms: {}",
            terms.join(", ")
        ));
    }
    if !capability_hits.is_empty() {
        parts.push(format!(
            "relevance check flagged chapters: {}",
            capability_hits.join(", ")
        ));
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbo_core::capability::{
        AnswerDraft, AnswerRequest, CapabilityError, CapabilityFailureKind,
    };
    use cbo_storage::StoreConfig;
    use std::sync::Mutex;

    /// Relevance verdicts per chapter id; anything unlisted is irrelevant.
    struct ScriptedClassifier {
        verdicts: BTreeMap<String, Result<bool, CapabilityError>>,
        asked: Mutex<Vec<String>>,
    }

    impl ScriptedClassifier {
        fn new(verdicts: &[(&str, Result<bool, CapabilityError>)]) -> Arc<Self> {
            Arc::new(Self {
                verdicts: verdicts
                    .iter()
                    .map(|(id, verdict)| (id.to_string(), verdict.clone()))
                    .collect(),
                asked: Mutex::new(Vec::new()),
            })
        }
    }

    impl ReasoningCapability for ScriptedClassifier {
        fn answer(
            &self,
            _request: &AnswerRequest,
            _guardrails: &CapabilityGuardrails,
        ) -> Result<AnswerDraft, CapabilityError> {
            Err(CapabilityError::new(
                CapabilityFailureKind::Unavailable,
                "not scripted",
            ))
        }

        fn classify_relevance(
            &self,
            chapter: &ChapterDigest,
            _objective: &str,
            _guardrails: &CapabilityGuardrails,
        ) -> Result<bool, CapabilityError> {
            self.asked
                .lock()
                .expect("lock")
                .push(chapter.chapter_id.clone());
            self.verdicts
                .get(&chapter.chapter_id)
                .cloned()
                .unwrap_or(Ok(false))
        }
    }

    fn seeded_store() -> (tempfile::TempDir, BrainStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BrainStore::open(dir.path(), StoreConfig::default()).expect("open");
        store.create_brain("acme", "Company history").expect("create");
        store
            .register_chapters(
                "acme",
                &["1".to_string(), "2".to_string()],
                ChapterStatus::Extracted,
                None,
            )
            .expect("extracted");
        store
            .register_chapters(
                "acme",
                &["10".to_string(), "3".to_string(), "4".to_string()],
                ChapterStatus::Skipped,
                Some("financial appendix".to_string()),
            )
            .expect("skipped");
        store
            .set_chapter_index_terms("acme", "4", vec!["founding".to_string(), "Jane".to_string()])
            .expect("terms");
        (dir, store)
    }

    #[test]
    fn all_extracted_means_no_gap() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BrainStore::open(dir.path(), StoreConfig::default()).expect("open");
        store.create_brain("acme", "Company history").expect("create");
        store
            .register_chapters("acme", &["1".to_string()], ChapterStatus::Extracted, None)
            .expect("extracted");
        let classifier = ScriptedClassifier::new(&[]);
        let detector = GapDetector::new(classifier.clone(), CapabilityGuardrails::default());

        let report = detector
            .detect_gap(&store, "acme", "Who founded Acme?", None)
            .expect("detect");
        assert!(report.candidate_chapters.is_empty());
        assert_eq!(report.rationale, NO_SKIPPED_CHAPTERS);
        assert!(classifier.asked.lock().expect("lock").is_empty());
    }

    #[test]
    fn literal_and_capability_passes_are_unioned() {
        let (_dir, store) = seeded_store();
        let classifier = ScriptedClassifier::new(&[("10", Ok(true))]);
        let detector = GapDetector::new(classifier.clone(), CapabilityGuardrails::default());

        let report = detector
            .detect_gap(&store, "acme", "Who is Jane?", None)
            .expect("detect");
        assert_eq!(report.candidate_chapters, vec!["4".to_string(), "10".to_string()]);
        assert_eq!(report.literal_hits["4"], vec!["jane".to_string()]);
        assert_eq!(report.capability_hits, vec!["10".to_string()]);
        // Chapters already flagged literally are not sent to the capability.
        assert_eq!(
            *classifier.asked.lock().expect("lock"),
            vec!["3".to_string(), "10".to_string()]
        );
    }

    #[test]
    fn skip_reason_is_searched_and_failed_confidence_is_noted() {
        let (_dir, store) = seeded_store();
        let detector = GapDetector::new(ScriptedClassifier::new(&[]), CapabilityGuardrails::default());
        let failed = FailedAnswer {
            answer: "I couldn't find relevant information in the current brain.".to_string(),
            confidence: Confidence::None,
        };

        let report = detector
            .detect_gap(&store, "acme", "What was in the \"financial appendix\"?", Some(&failed))
            .expect("detect");
        assert_eq!(
            report.candidate_chapters,
            vec!["3".to_string(), "4".to_string(), "10".to_string()]
        );
        assert!(report.rationale.starts_with("answer confidence was none"));
        assert!(report.literal_hits["3"].contains(&"financial appendix".to_string()));
    }

    #[test]
    fn capability_errors_propagate() {
        let (_dir, store) = seeded_store();
        let classifier = ScriptedClassifier::new(&[(
            "3",
            Err(CapabilityError::new(CapabilityFailureKind::ProviderError, "boom")),
        )]);
        let detector = GapDetector::new(classifier, CapabilityGuardrails::default());

        let err = detector
            .detect_gap(&store, "acme", "Unrelated question", None)
            .expect_err("propagates");
        assert!(matches!(err, GapError::Capability(_)));
        assert_eq!(err.kind(), "external_capability_error");
    }
}
