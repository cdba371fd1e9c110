use super::body_sentences;
use cbo_core::brain_contracts::{Confidence, KnowledgeFile};
use cbo_core::capability::{
    AnswerDraft, AnswerRequest, CapabilityError, CapabilityGuardrails, ChapterDigest,
    ReasoningCapability, StatementCitation,
};
use cbo_core::text::{overlap_tokens, term_set};
use std::collections::BTreeSet;

pub const UNANSWERED: &str = "The provided context does not answer this question.";

const DEFAULT_MAX_SENTENCES: usize = 3;
const MIN_SENTENCE_WORDS: usize = 3;
const CITATION_OVERLAP: usize = 2;

/// Offline reasoner that answers with the context sentences sharing the most question terms.
#[derive(Debug, Clone)]
pub struct LexicalReasoner {
    max_sentences: usize,
}

impl Default for LexicalReasoner {
    fn default() -> Self {
        Self {
            max_sentences: DEFAULT_MAX_SENTENCES,
        }
    }
}

struct Candidate {
    score: usize,
    order: usize,
    path: String,
    sentence: String,
    matched: BTreeSet<String>,
}

impl LexicalReasoner {
    pub fn new(max_sentences: usize) -> Self {
        Self {
            max_sentences: max_sentences.max(1),
        }
    }

    fn candidates(&self, request: &AnswerRequest, terms: &BTreeSet<String>) -> Vec<Candidate> {
        let mut candidates = Vec::new();
        for file in &request.context {
            let body = KnowledgeFile::parse(file.path.clone(), &file.content).body;
            for sentence in body_sentences(&body) {
                if sentence.split_whitespace().count() < MIN_SENTENCE_WORDS {
                    continue;
                }
                let matched = term_set(&sentence)
                    .intersection(terms)
                    .cloned()
                    .collect::<BTreeSet<_>>();
                if matched.is_empty() {
                    continue;
                }
                candidates.push(Candidate {
                    score: matched.len(),
                    order: candidates.len(),
                    path: file.path.clone(),
                    sentence,
                    matched,
                });
            }
        }
        candidates.sort_by(|left, right| {
            right
                .score
                .cmp(&left.score)
                .then(left.order.cmp(&right.order))
        });
        candidates.truncate(self.max_sentences);
        candidates
    }
}

impl ReasoningCapability for LexicalReasoner {
    fn answer(
        &self,
        request: &AnswerRequest,
        _guardrails: &CapabilityGuardrails,
    ) -> Result<AnswerDraft, CapabilityError> {
        let terms = term_set(&request.question);
        let chosen = self.candidates(request, &terms);
        if terms.is_empty() || chosen.is_empty() {
            return Ok(AnswerDraft {
                answer: UNANSWERED.to_string(),
                confidence: Confidence::None,
                sources: Vec::new(),
                citations: Vec::new(),
            });
        }

        let matched = chosen
            .iter()
            .flat_map(|candidate| candidate.matched.iter().cloned())
            .collect::<BTreeSet<_>>();
        let coverage = matched.len() as f64 / terms.len() as f64;
        let confidence = if coverage >= 0.75 {
            Confidence::High
        } else if coverage >= 0.5 {
            Confidence::Medium
        } else {
            Confidence::Low
        };

        let mut statements = Vec::new();
        let mut sources: Vec<String> = Vec::new();
        let mut citations = Vec::new();
        for candidate in &chosen {
            let statement = format!("{} [{}]", candidate.sentence, candidate.path);
            if !sources.contains(&candidate.path) {
                sources.push(candidate.path.clone());
            }
            if request.require_citations {
                let tokens = overlap_tokens(&candidate.sentence);
                let claim_ids = request
                    .candidate_claims
                    .iter()
                    .filter(|claim| claim.file_path == candidate.path)
                    .filter(|claim| {
                        overlap_tokens(&claim.claim_text)
                            .intersection(&tokens)
                            .count()
                            >= CITATION_OVERLAP
                    })
                    .map(|claim| claim.claim_id.clone())
                    .take(1)
                    .collect::<Vec<_>>();
                if !claim_ids.is_empty() {
                    citations.push(StatementCitation {
                        statement: statement.clone(),
                        claim_ids,
                    });
                }
            }
            statements.push(format!("{statement}."));
        }

        Ok(AnswerDraft {
            answer: statements.join(" "),
            confidence,
            sources,
            citations,
        })
    }

    fn classify_relevance(
        &self,
        chapter: &ChapterDigest,
        objective: &str,
        _guardrails: &CapabilityGuardrails,
    ) -> Result<bool, CapabilityError> {
        let digest = term_set(&format!(
            "{} {}",
            chapter.reason,
            chapter.index_terms.join(" ")
        ));
        Ok(!digest.is_disjoint(&term_set(objective)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbo_core::capability::ContextFile;
    use cbo_core::claim_contracts::ClaimTraceItem;

    fn request(question: &str, files: &[(&str, &str)]) -> AnswerRequest {
        AnswerRequest {
            question: question.to_string(),
            objective: String::new(),
            context: files
                .iter()
                .map(|(path, content)| ContextFile {
                    path: path.to_string(),
                    content: content.to_string(),
                })
                .collect(),
            candidate_claims: Vec::new(),
            require_citations: false,
        }
    }

    #[test]
    fn answers_with_cited_best_sentences() {
        let req = request(
            "Who founded Acme?",
            &[
                ("facts/revenue.md", "Revenue grew in 2003 for Acme."),
                (
                    "characters/jane.md",
                    "---\ntags: [founder]\n---\n\n- Jane founded Acme in 1999.\n",
                ),
            ],
        );
        let draft = LexicalReasoner::default()
            .answer(&req, &CapabilityGuardrails::default())
            .expect("answer");
        assert!(draft
            .answer
            .starts_with("Jane founded Acme in 1999 [characters/jane.md]."));
        assert_eq!(draft.confidence, Confidence::High);
        assert_eq!(
            draft.sources,
            vec!["characters/jane.md".to_string(), "facts/revenue.md".to_string()]
        );
    }

    #[test]
    fn nothing_relevant_yields_no_confidence() {
        let req = request("Who founded Acme?", &[("facts/weather.md", "It rained all week long.")]);
        let draft = LexicalReasoner::default()
            .answer(&req, &CapabilityGuardrails::default())
            .expect("answer");
        assert_eq!(draft.answer, UNANSWERED);
        assert_eq!(draft.confidence, Confidence::None);
        assert!(draft.sources.is_empty());
    }

    #[test]
    fn partial_coverage_lowers_confidence() {
        let req = request(
            "When did Acme open the Berlin office?",
            &[("facts/acme.md", "Acme makes anvils for coyotes.")],
        );
        let draft = LexicalReasoner::default()
            .answer(&req, &CapabilityGuardrails::default())
            .expect("answer");
        assert_eq!(draft.confidence, Confidence::Low);
    }

    #[test]
    fn citations_name_overlapping_candidate_claims() {
        let mut req = request("Who founded Acme?", &[("characters/jane.md", "- Jane founded Acme in 1999.")]);
        req.require_citations = true;
        req.candidate_claims = vec![ClaimTraceItem {
            claim_id: "clm_jane".to_string(),
            file_path: "characters/jane.md".to_string(),
            claim_text: "Jane founded Acme in 1999.".to_string(),
            evidence_quote: String::new(),
            source_locator: "chapter_2".to_string(),
            confidence: Confidence::Medium,
            user_override: false,
        }];
        let draft = LexicalReasoner::default()
            .answer(&req, &CapabilityGuardrails::default())
            .expect("answer");
        assert_eq!(draft.citations.len(), 1);
        assert_eq!(draft.citations[0].claim_ids, vec!["clm_jane".to_string()]);
        assert_eq!(
            draft.citations[0].statement,
            "Jane founded Acme in 1999 [characters/jane.md]"
        );
    }

    #[test]
    fn relevance_uses_stemmed_overlap() {
        let digest = ChapterDigest {
            chapter_id: "4".to_string(),
            reason: "the founding years".to_string(),
            index_terms: Vec::new(),
        };
        let reasoner = LexicalReasoner::default();
        let guardrails = CapabilityGuardrails::default();
        assert!(reasoner
            .classify_relevance(&digest, "Who founded Acme?", &guardrails)
            .expect("classify"));
        assert!(!reasoner
            .classify_relevance(&digest, "What about revenue?", &guardrails)
            .expect("classify"));
    }
}
