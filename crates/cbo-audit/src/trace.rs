//! Links answer statements to claims and records immutable query runs.

use crate::policy::resolve_policy;
use crate::{AuditConfig, AuditError};
use cbo_core::capability::StatementCitation;
use cbo_core::claim_contracts::{
    sort_by_recency, Claim, ClaimEvent, ClaimSnapshot, ClaimStatus, ClaimTraceItem,
    ProvenancePolicy, QueryMode, RunRecord, TraceCompleteness,
};
use cbo_core::text::{normalize_whitespace, overlap_tokens};
use cbo_storage::BrainStore;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::OnceLock;
use tracing::debug;

const MIN_LINK_OVERLAP: usize = 2;

#[derive(Debug, Clone, Copy)]
pub struct TraceInput<'a> {
    pub question: &'a str,
    pub answer: &'a str,
    /// Expanded context files, in selection order.
    pub files: &'a [String],
    pub citations: &'a [StatementCitation],
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TraceOutcome {
    pub claim_trace: Vec<ClaimTraceItem>,
    pub linked_claim_ids: Vec<String>,
    pub unlinked_statements: Vec<String>,
    pub completeness: TraceCompleteness,
}

fn file_citation_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[([^\]]+\.md)\]").expect("valid regex"))
}

/// Answer statements: pieces between `\n . ! ?` runs, trimmed. Bracketed `[path.md]` citations stay whole.
pub fn split_statements(answer: &str) -> Vec<String> {
    let mut statements = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    for ch in answer.chars() {
        match ch {
            '[' => {
                depth += 1;
                current.push(ch);
            }
            ']' => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            '\n' | '.' | '!' | '?' if depth == 0 => {
                push_statement(&mut statements, &current);
                current.clear();
            }
            '\n' => {
                depth = 0;
                current.push(' ');
            }
            _ => current.push(ch),
        }
    }
    push_statement(&mut statements, &current);
    statements
}

fn push_statement(out: &mut Vec<String>, candidate: &str) {
    let trimmed = candidate.trim();
    if !trimmed.is_empty() {
        out.push(trimmed.to_string());
    }
}

pub fn completeness(total_statements: usize, linked_statements: usize) -> TraceCompleteness {
    let completeness_ratio = if total_statements == 0 {
        0.0
    } else {
        let raw = linked_statements.min(total_statements) as f64 / total_statements as f64;
        (raw * 10_000.0).round() / 10_000.0
    };
    TraceCompleteness {
        total_statements,
        linked_statements: linked_statements.min(total_statements),
        completeness_ratio,
    }
}

fn normalize_statement(statement: &str) -> String {
    normalize_whitespace(statement)
        .trim_end_matches(['.', '!', '?'])
        .trim()
        .to_lowercase()
}

fn claim_tokens(claim: &Claim) -> BTreeSet<String> {
    overlap_tokens(&format!("{} {}", claim.claim_text, claim.evidence_quote))
}

pub struct ClaimAuditor {
    config: AuditConfig,
}

impl ClaimAuditor {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn resolve_policy(&self, mode: QueryMode) -> ProvenancePolicy {
        resolve_policy(&self.config, mode)
    }

    /// Top claims per file by `2 * question overlap + answer overlap`, files in order.
    pub fn considered_claims<'s>(
        &self,
        snapshot: &'s ClaimSnapshot,
        files: &[String],
        question: &str,
        answer: &str,
    ) -> Vec<&'s Claim> {
        let question_tokens = overlap_tokens(question);
        let answer_tokens = overlap_tokens(answer);
        let mut scored = Vec::new();
        for path in files {
            for claim in snapshot.active_for_path(path) {
                let tokens = claim_tokens(claim);
                let score = tokens.intersection(&question_tokens).count() * 2
                    + tokens.intersection(&answer_tokens).count();
                scored.push((score, claim));
            }
        }
        scored.sort_by(|left, right| right.0.cmp(&left.0));

        let mut per_file: BTreeMap<&str, usize> = BTreeMap::new();
        let mut considered = Vec::new();
        for (_, claim) in scored {
            let count = per_file.entry(claim.file_path.as_str()).or_insert(0);
            if *count >= self.config.max_claims_per_file {
                continue;
            }
            *count += 1;
            considered.push(claim);
        }
        considered
    }

    /// Claims offered to the reasoning capability so it can cite ids.
    pub fn candidate_claims(
        &self,
        snapshot: &ClaimSnapshot,
        files: &[String],
        question: &str,
    ) -> Vec<ClaimTraceItem> {
        self.considered_claims(snapshot, files, question, "")
            .into_iter()
            .map(ClaimTraceItem::from)
            .collect()
    }

    pub fn build_trace(&self, snapshot: &ClaimSnapshot, input: TraceInput<'_>) -> TraceOutcome {
        let mut pool = input
            .files
            .iter()
            .flat_map(|path| snapshot.active_for_path(path))
            .collect::<Vec<_>>();
        sort_by_recency(&mut pool);
        let pool_tokens = pool
            .iter()
            .map(|claim| claim_tokens(claim))
            .collect::<Vec<_>>();
        let citations = input
            .citations
            .iter()
            .map(|citation| (normalize_statement(&citation.statement), citation))
            .collect::<Vec<_>>();

        let statements = split_statements(input.answer);
        let mut linked_claim_ids: Vec<String> = Vec::new();
        let mut unlinked_statements = Vec::new();
        let mut linked_count = 0usize;

        for statement in &statements {
            let normalized = normalize_statement(statement);
            let cited = citations
                .iter()
                .filter(|(text, _)| *text == normalized)
                .flat_map(|(_, citation)| citation.claim_ids.iter())
                .find_map(|id| {
                    snapshot
                        .get(id)
                        .filter(|claim| claim.status == ClaimStatus::Active)
                });
            let by_file = || {
                file_citation_regex()
                    .captures_iter(statement)
                    .filter_map(|caps| caps.get(1))
                    .find_map(|path| {
                        snapshot
                            .active_for_path(path.as_str().trim())
                            .into_iter()
                            .next()
                    })
            };
            let by_overlap = || {
                let statement_tokens = overlap_tokens(statement);
                pool.iter().zip(&pool_tokens).find_map(|(claim, tokens)| {
                    let required = MIN_LINK_OVERLAP.min(tokens.len());
                    let overlap = tokens.intersection(&statement_tokens).count();
                    (required > 0 && overlap >= required).then_some(*claim)
                })
            };

            match cited.or_else(by_file).or_else(by_overlap) {
                Some(claim) => {
                    linked_count += 1;
                    if !linked_claim_ids.contains(&claim.claim_id) {
                        linked_claim_ids.push(claim.claim_id.clone());
                    }
                }
                None => unlinked_statements.push(statement.clone()),
            }
        }

        let mut claim_trace = Vec::new();
        let mut seen = BTreeSet::new();
        let linked = linked_claim_ids.iter().filter_map(|id| snapshot.get(id));
        let considered = self.considered_claims(snapshot, input.files, input.question, input.answer);
        for claim in linked.chain(considered) {
            if claim_trace.len() >= self.config.max_trace_items {
                break;
            }
            if seen.insert(claim.claim_id.clone()) {
                claim_trace.push(ClaimTraceItem::from(claim));
            }
        }

        TraceOutcome {
            claim_trace,
            linked_claim_ids,
            unlinked_statements,
            completeness: completeness(statements.len(), linked_count),
        }
    }

    /// Persists the run and one `claim_cited` event per linked claim under a single lock.
    pub fn record_trace(
        &self,
        store: &BrainStore,
        run: &RunRecord,
        linked_claim_ids: &[String],
    ) -> Result<TraceCompleteness, AuditError> {
        store.with_write_lock(&run.brain, |guard| {
            guard.append_run_record(run)?;
            let events = linked_claim_ids
                .iter()
                .map(|claim_id| ClaimEvent::cited(&run.brain, claim_id, &run.run_id, run.created_at))
                .collect::<Vec<_>>();
            if !events.is_empty() {
                guard.append_claim_events(events)?;
            }
            Ok(())
        })?;
        debug!(
            brain = %run.brain,
            run_id = %run.run_id,
            cited = linked_claim_ids.len(),
            ratio = run.trace_completeness.completeness_ratio,
            "query_run_recorded"
        );
        Ok(run.trace_completeness)
    }
}

impl Default for ClaimAuditor {
    fn default() -> Self {
        Self::new(AuditConfig::default())
    }
}
