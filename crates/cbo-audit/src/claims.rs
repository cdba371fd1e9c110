//! Claim extraction from knowledge files and the per-file version chain.

use crate::{AuditConfig, AuditError};
use cbo_core::brain_contracts::{Confidence, KnowledgeFile};
use cbo_core::claim_contracts::{
    sort_by_recency, Claim, ClaimEvent, ClaimEventKind, ClaimSnapshot, ClaimStatus,
    ProvenancePolicy, CLAIM_ID_HASH_LEN, CLAIM_ID_PREFIX, NOTES_PREFIX,
};
use cbo_core::short_hash_id;
use cbo_core::text::{normalize_whitespace, overlap_tokens, truncate_chars};
use cbo_storage::{BrainStore, BrainWriteGuard, StorageError};
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use tracing::debug;

const MIN_CLAIM_CHARS: usize = 8;
const FALLBACK_MIN_WORDS: usize = 6;
const FALLBACK_MAX_SENTENCES: usize = 5;
const UNKNOWN_LOCATOR: &str = "unknown";
const WARNING_EXCERPT_CHARS: usize = 120;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedClaim {
    pub claim_text: String,
    pub evidence_quote: String,
    pub source_locator: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackReport {
    pub inserted: usize,
    pub superseded: usize,
    pub retired: usize,
    pub unchanged: usize,
    pub warnings: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClaimFilter {
    pub file_path: Option<String>,
    pub status: Option<ClaimStatus>,
    /// Case-insensitive substring over claim text and evidence.
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimHistory {
    /// Version chain, oldest first.
    pub chain: Vec<String>,
    pub events: Vec<ClaimEvent>,
}

fn source_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\(\s*source:\s*([^)]+)\)").expect("valid regex"))
}

fn list_item_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^(?:-|\*|\+|\d+\.)\s+(.+)$").expect("valid regex"))
}

/// Claim candidates of a file with their best-matching evidence quote.
pub fn extract_claims(file: &KnowledgeFile) -> Vec<ExtractedClaim> {
    let quotes = extract_quotes(&file.body);
    let default_locator = file
        .metadata
        .source
        .as_deref()
        .map(str::trim)
        .filter(|source| !source.is_empty())
        .unwrap_or(UNKNOWN_LOCATOR);

    claim_lines(&file.body)
        .into_iter()
        .map(|claim_text| {
            let (evidence_quote, quote_source) = choose_quote(&claim_text, &quotes);
            let source_locator = if quote_source.is_empty() {
                default_locator.to_string()
            } else {
                quote_source
            };
            ExtractedClaim {
                claim_text,
                evidence_quote,
                source_locator,
            }
        })
        .collect()
}

fn extract_quotes(body: &str) -> Vec<(String, String)> {
    let mut quotes = Vec::new();
    for line in body.lines() {
        let Some(rest) = line.trim().strip_prefix('>') else {
            continue;
        };
        let mut quote = rest.trim_start_matches('>').trim().to_string();
        let mut source = String::new();
        if let Some(caps) = source_regex().captures(&quote) {
            source = caps
                .get(1)
                .map(|m| m.as_str().trim().to_string())
                .unwrap_or_default();
            let stripped = source_regex().replace_all(&quote, "").trim().to_string();
            quote = stripped;
        }
        let quote = quote.trim_matches('"').trim().to_string();
        if !quote.is_empty() {
            quotes.push((quote, source));
        }
    }
    quotes
}

fn claim_lines(body: &str) -> Vec<String> {
    let mut claims: Vec<String> = Vec::new();
    let mut section = String::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        if trimmed.starts_with('#') {
            section = trimmed.trim_start_matches('#').trim().to_lowercase();
            continue;
        }
        if section.starts_with("related") {
            continue;
        }
        let candidate = if let Some(caps) = list_item_regex().captures(trimmed) {
            let text = caps.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            if text.starts_with("[[") {
                continue;
            }
            strip_claim_marker(text)
        } else if trimmed.to_lowercase().starts_with("**claim**") {
            strip_claim_marker(trimmed)
        } else {
            continue;
        };
        let candidate = normalize_whitespace(&candidate);
        if candidate.chars().count() >= MIN_CLAIM_CHARS && !claims.contains(&candidate) {
            claims.push(candidate);
        }
    }
    if !claims.is_empty() {
        return claims;
    }

    let mut fallback = Vec::new();
    for line in body.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with(['#', '>', '-', '*']) {
            continue;
        }
        for sentence in split_after_terminators(trimmed) {
            if sentence.split_whitespace().count() >= FALLBACK_MIN_WORDS {
                fallback.push(sentence);
            }
        }
    }
    let mut claims = Vec::new();
    for sentence in fallback.into_iter().take(FALLBACK_MAX_SENTENCES) {
        if !claims.contains(&sentence) {
            claims.push(sentence);
        }
    }
    claims
}

fn strip_claim_marker(text: &str) -> String {
    if text.to_lowercase().starts_with("**claim**") {
        text.split_once(':')
            .map(|(_, rest)| rest.trim().to_string())
            .unwrap_or_default()
    } else {
        text.to_string()
    }
}

/// Splits prose after `.`, `!` or `?` followed by whitespace, keeping the terminator.
fn split_after_terminators(line: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    let mut chars = line.chars().peekable();
    while let Some(ch) = chars.next() {
        current.push(ch);
        let at_boundary = matches!(ch, '.' | '!' | '?')
            && chars.peek().map(|next| next.is_whitespace()).unwrap_or(true);
        if at_boundary {
            let sentence = current.trim().to_string();
            if !sentence.is_empty() {
                sentences.push(sentence);
            }
            current.clear();
        }
    }
    let rest = current.trim();
    if !rest.is_empty() {
        sentences.push(rest.to_string());
    }
    sentences
}

/// First quote with the highest token overlap; any quote beats none.
fn choose_quote(claim_text: &str, quotes: &[(String, String)]) -> (String, String) {
    let claim_tokens = overlap_tokens(claim_text);
    let mut best: Option<(usize, &(String, String))> = None;
    for quote in quotes {
        let score = overlap_tokens(&quote.0).intersection(&claim_tokens).count();
        if best.map(|(top, _)| score > top).unwrap_or(true) {
            best = Some((score, quote));
        }
    }
    best.map(|(_, (quote, source))| (quote.clone(), source.clone()))
        .unwrap_or_default()
}

/// Id of the `revision`-th occurrence of identical claim content; revision 0 is the plain content hash.
pub fn claim_version_id(
    brain: &str,
    claim: &ExtractedClaim,
    file_path: &str,
    revision: u32,
) -> String {
    let revision_tag = format!("rev{revision}");
    let mut parts = vec![
        brain,
        file_path,
        claim.claim_text.as_str(),
        claim.evidence_quote.as_str(),
        claim.source_locator.as_str(),
    ];
    if revision > 0 {
        parts.push(revision_tag.as_str());
    }
    short_hash_id(CLAIM_ID_PREFIX, &parts, CLAIM_ID_HASH_LEN)
}

fn same_content(claim: &Claim, extracted: &ExtractedClaim) -> bool {
    claim.claim_text == extracted.claim_text
        && claim.evidence_quote == extracted.evidence_quote
        && claim.source_locator == extracted.source_locator
}

/// First id for this content that no earlier version and no claim minted in this pass has used.
fn fresh_claim_id(
    snapshot: &ClaimSnapshot,
    minted: &BTreeSet<String>,
    brain: &str,
    claim: &ExtractedClaim,
    file_path: &str,
) -> String {
    let mut revision = 0;
    loop {
        let id = claim_version_id(brain, claim, file_path, revision);
        if snapshot.get(&id).is_none() && !minted.contains(&id) {
            return id;
        }
        revision += 1;
    }
}

/// Versions the claims of knowledge files and answers claim queries.
pub struct ClaimLedger {
    config: AuditConfig,
}

impl ClaimLedger {
    pub fn new(config: AuditConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    pub fn track_file(
        &self,
        store: &BrainStore,
        brain: &str,
        path: &str,
        run_id: Option<&str>,
    ) -> Result<TrackReport, AuditError> {
        let report = store.with_write_lock(brain, |guard| {
            self.track_file_locked(guard, path, run_id, Utc::now())
        })?;
        Ok(report)
    }

    /// Diffs the file's current claims against its active ones and appends the lifecycle events.
    pub fn track_file_locked(
        &self,
        guard: &mut BrainWriteGuard<'_>,
        path: &str,
        run_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<TrackReport, StorageError> {
        let brain = guard.brain().to_string();
        let store = guard.store();
        let file = match store.read_knowledge_file(&brain, path) {
            Ok(file) => Some(file),
            Err(StorageError::NotFound { .. }) => None,
            Err(err) => return Err(err),
        };
        let snapshot = store.current_claims(&brain)?;
        let events = match &file {
            Some(file) => self.diff_events(&snapshot, &brain, file, run_id, now),
            None => retire_all(&snapshot, &brain, path, run_id, now),
        };

        let mut report = TrackReport::default();
        for event in &events {
            match event.kind {
                ClaimEventKind::ClaimInserted => report.inserted += 1,
                ClaimEventKind::ClaimSuperseded => report.superseded += 1,
                ClaimEventKind::ClaimRetired => report.retired += 1,
                ClaimEventKind::ProvenanceWarning => report.warnings += 1,
                ClaimEventKind::ClaimCited => {}
            }
        }
        report.unchanged = snapshot
            .active_for_path(path)
            .len()
            .saturating_sub(report.superseded + report.retired);
        if !events.is_empty() {
            guard.append_claim_events(events)?;
        }
        debug!(
            brain = %brain,
            path,
            inserted = report.inserted,
            superseded = report.superseded,
            retired = report.retired,
            warnings = report.warnings,
            "claims_tracked"
        );
        Ok(report)
    }

    fn diff_events(
        &self,
        snapshot: &ClaimSnapshot,
        brain: &str,
        file: &KnowledgeFile,
        run_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Vec<ClaimEvent> {
        let path = file.path.as_str();
        let confidence = file.metadata.confidence.unwrap_or(Confidence::Medium);
        let active = snapshot.active_for_path(path);
        let mut kept = BTreeSet::new();
        let mut events = Vec::new();
        let warn_enabled = self.config.provenance != ProvenancePolicy::Off;

        let mut minted = BTreeSet::new();

        for extracted in extract_claims(file) {
            if let Some(unchanged) = active
                .iter()
                .find(|claim| !kept.contains(&claim.claim_id) && same_content(claim, &extracted))
            {
                kept.insert(unchanged.claim_id.clone());
                continue;
            }
            let id = fresh_claim_id(snapshot, &minted, brain, &extracted, path);
            let previous = active.iter().find(|claim| {
                !kept.contains(&claim.claim_id) && claim.claim_text == extracted.claim_text
            });

            let claim = Claim {
                claim_id: id.clone(),
                brain: brain.to_string(),
                file_path: path.to_string(),
                claim_text: extracted.claim_text.clone(),
                evidence_quote: extracted.evidence_quote.clone(),
                source_locator: extracted.source_locator.clone(),
                confidence,
                user_override: path.starts_with(NOTES_PREFIX),
                status: ClaimStatus::Active,
                supersedes: previous.map(|claim| claim.claim_id.clone()),
                run_id: run_id.map(str::to_string),
                extracted_at: now,
            };

            if warn_enabled {
                let excerpt = truncate_chars(&claim.claim_text, WARNING_EXCERPT_CHARS);
                if !claim.has_evidence() {
                    events.push(ClaimEvent::provenance_warning(
                        brain,
                        path,
                        Some(&id),
                        format!("missing direct quote for claim: {excerpt}"),
                        now,
                    ));
                }
                if claim.source_locator == UNKNOWN_LOCATOR {
                    events.push(ClaimEvent::provenance_warning(
                        brain,
                        path,
                        Some(&id),
                        format!("missing source locator for claim: {excerpt}"),
                        now,
                    ));
                }
            }

            match previous {
                Some(previous) => {
                    kept.insert(previous.claim_id.clone());
                    events.push(ClaimEvent::superseded(claim, &previous.claim_id, now));
                }
                None => events.push(ClaimEvent::inserted(claim, now)),
            }
            minted.insert(id);
        }

        for claim in active {
            if !kept.contains(&claim.claim_id) {
                events.push(ClaimEvent::retired(
                    brain,
                    &claim.claim_id,
                    path,
                    run_id,
                    now,
                ));
            }
        }

        if warn_enabled && events.is_empty() && kept.is_empty() && minted.is_empty() {
            events.push(ClaimEvent::provenance_warning(
                brain,
                path,
                None,
                "no claim candidates extracted from file content",
                now,
            ));
        }
        events
    }

    pub fn list_claims(
        &self,
        store: &BrainStore,
        brain: &str,
        filter: &ClaimFilter,
        limit: usize,
    ) -> Result<Vec<Claim>, AuditError> {
        let snapshot = store.current_claims(brain)?;
        let needle = filter.text.as_deref().map(str::to_lowercase);
        let mut claims = snapshot
            .claims
            .values()
            .filter(|claim| {
                filter
                    .file_path
                    .as_deref()
                    .map(|path| claim.file_path == path)
                    .unwrap_or(true)
            })
            .filter(|claim| filter.status.map(|status| claim.status == status).unwrap_or(true))
            .filter(|claim| {
                needle
                    .as_deref()
                    .map(|needle| {
                        claim.claim_text.to_lowercase().contains(needle)
                            || claim.evidence_quote.to_lowercase().contains(needle)
                    })
                    .unwrap_or(true)
            })
            .collect::<Vec<_>>();
        sort_by_recency(&mut claims);
        Ok(claims.into_iter().take(limit).cloned().collect())
    }

    pub fn get_claim(
        &self,
        store: &BrainStore,
        brain: &str,
        claim_id: &str,
    ) -> Result<Claim, AuditError> {
        store
            .current_claims(brain)?
            .get(claim_id)
            .cloned()
            .ok_or_else(|| {
                StorageError::not_found(format!("claim {claim_id} in brain {brain}")).into()
            })
    }

    /// Events of every version linked to `claim_id` through `supersedes`, in log order.
    pub fn claim_history(
        &self,
        store: &BrainStore,
        brain: &str,
        claim_id: &str,
    ) -> Result<ClaimHistory, AuditError> {
        let snapshot = store.current_claims(brain)?;
        if snapshot.get(claim_id).is_none() {
            return Err(StorageError::not_found(format!("claim {claim_id} in brain {brain}")).into());
        }

        let mut chain = vec![claim_id.to_string()];
        let mut cursor = snapshot.get(claim_id).and_then(|claim| claim.supersedes.clone());
        while let Some(previous) = cursor {
            if chain.contains(&previous) {
                break;
            }
            cursor = snapshot.get(&previous).and_then(|claim| claim.supersedes.clone());
            chain.insert(0, previous);
        }
        let mut head = claim_id.to_string();
        while let Some(next) = snapshot
            .claims
            .values()
            .find(|claim| claim.supersedes.as_deref() == Some(head.as_str()))
        {
            if chain.contains(&next.claim_id) {
                break;
            }
            chain.push(next.claim_id.clone());
            head = next.claim_id.clone();
        }

        let log = store.read_claim_events(brain)?;
        let events = log
            .events()
            .iter()
            .filter(|event| {
                event
                    .claim_id
                    .as_ref()
                    .map(|id| chain.contains(id))
                    .unwrap_or(false)
            })
            .cloned()
            .collect();
        Ok(ClaimHistory { chain, events })
    }
}

impl Default for ClaimLedger {
    fn default() -> Self {
        Self::new(AuditConfig::default())
    }
}

fn retire_all(
    snapshot: &ClaimSnapshot,
    brain: &str,
    path: &str,
    run_id: Option<&str>,
    now: DateTime<Utc>,
) -> Vec<ClaimEvent> {
    snapshot
        .active_for_path(path)
        .into_iter()
        .map(|claim| ClaimEvent::retired(brain, &claim.claim_id, path, run_id, now))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbo_storage::{StoreConfig, WriteMode};

    const JANE: &str = "---\nsource: chapter_3\nconfidence: high\ntags: [founder]\n---\n# Jane Doe\n\n- Jane Doe founded Acme in 1999\n- Jane served as chief executive until 2010\n\n> \"I started Acme in my garage in 1999.\" (Source: chapter_3, p.12)\n> Jane stepped down as executive in 2010.\n\n## Related\n- Acme Corporation history notes\n- [[founding]]\n";

    fn store_with(path: &str, raw: &str) -> (tempfile::TempDir, BrainStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BrainStore::open(dir.path(), StoreConfig::default()).expect("open");
        store.create_brain("acme", "company history").expect("create");
        store
            .write_markdown("acme", path, raw, WriteMode::Overwrite)
            .expect("write");
        (dir, store)
    }

    #[test]
    fn extracts_bullets_outside_related_with_best_quote() {
        let file = KnowledgeFile::parse("characters/jane.md", JANE);
        let claims = extract_claims(&file);
        assert_eq!(claims.len(), 2);
        assert_eq!(claims[0].claim_text, "Jane Doe founded Acme in 1999");
        assert_eq!(claims[0].evidence_quote, "I started Acme in my garage in 1999.");
        assert_eq!(claims[0].source_locator, "chapter_3, p.12");
        assert_eq!(
            claims[1].evidence_quote,
            "Jane stepped down as executive in 2010."
        );
        assert_eq!(claims[1].source_locator, "chapter_3");
    }

    #[test]
    fn claim_marker_lines_and_prose_fallback() {
        let marked = KnowledgeFile::parse(
            "facts/acme.md",
            "Intro text.\n**Claim**: Acme shipped its first product in 2001\n",
        );
        assert_eq!(
            extract_claims(&marked)[0].claim_text,
            "Acme shipped its first product in 2001"
        );

        let prose = KnowledgeFile::parse(
            "facts/acme.md",
            "Acme grew quickly during the early years. Short one. It opened offices in three new cities!\n",
        );
        let texts = extract_claims(&prose)
            .into_iter()
            .map(|claim| claim.claim_text)
            .collect::<Vec<_>>();
        assert_eq!(
            texts,
            vec![
                "Acme grew quickly during the early years.",
                "It opened offices in three new cities!"
            ]
        );
        assert_eq!(extract_claims(&prose)[0].source_locator, UNKNOWN_LOCATOR);
    }

    #[test]
    fn tracking_is_idempotent_and_versions_changes() {
        let (_dir, store) = store_with("characters/jane.md", JANE);
        let ledger = ClaimLedger::default();

        let first = ledger
            .track_file(&store, "acme", "characters/jane.md", Some("run_1"))
            .expect("track");
        assert_eq!(first.inserted, 2);
        assert_eq!(first.warnings, 0);

        let again = ledger
            .track_file(&store, "acme", "characters/jane.md", Some("run_2"))
            .expect("track again");
        assert_eq!(again, TrackReport { unchanged: 2, ..TrackReport::default() });

        let revised = JANE.replace("(Source: chapter_3, p.12)", "(Source: chapter_4)");
        store
            .write_markdown("acme", "characters/jane.md", &revised, WriteMode::Overwrite)
            .expect("rewrite");
        let third = ledger
            .track_file(&store, "acme", "characters/jane.md", Some("run_3"))
            .expect("track revision");
        assert_eq!(third.superseded, 1);
        assert_eq!(third.unchanged, 1);

        let snapshot = store.current_claims("acme").expect("claims");
        let active = snapshot.active_for_path("characters/jane.md");
        assert_eq!(active.len(), 2);
        let replacement = active
            .iter()
            .find(|claim| claim.source_locator == "chapter_4")
            .expect("replacement claim");
        let previous_id = replacement.supersedes.clone().expect("supersedes link");
        assert_eq!(
            snapshot.get(&previous_id).map(|claim| claim.status),
            Some(ClaimStatus::Superseded)
        );

        let history = ledger
            .claim_history(&store, "acme", &previous_id)
            .expect("history");
        assert_eq!(history.chain, vec![previous_id.clone(), replacement.claim_id.clone()]);
        assert!(history
            .events
            .iter()
            .any(|event| event.kind == ClaimEventKind::ClaimSuperseded));
    }

    #[test]
    fn reverted_edit_mints_a_new_version_instead_of_reviving_the_old_one() {
        let v1 = "- Acme opened its first office in 1999\n\n> Acme opened its first office in 1999. (Source: chapter_1)\n";
        let v2 = "- Acme opened its first office in 1999\n\n> The first Acme office opened that spring. (Source: chapter_2)\n";
        let path = "facts/acme.md";
        let (_dir, store) = store_with(path, v1);
        let ledger = ClaimLedger::default();
        let track = |raw: &str| {
            store
                .write_markdown("acme", path, raw, WriteMode::Overwrite)
                .expect("write");
            ledger.track_file(&store, "acme", path, None).expect("track")
        };

        track(v1);
        let first = store.current_claims("acme").expect("claims").active_for_path(path)[0].clone();
        track(v2);
        let second = store.current_claims("acme").expect("claims").active_for_path(path)[0].clone();
        let reverted = track(v1);
        assert_eq!(reverted.superseded, 1);

        let snapshot = store.current_claims("acme").expect("claims");
        let third = snapshot.active_for_path(path)[0].clone();
        assert_ne!(third.claim_id, first.claim_id);
        assert_eq!(third.supersedes.as_deref(), Some(second.claim_id.as_str()));
        assert_eq!(third.evidence_quote, first.evidence_quote);

        let original = snapshot.get(&first.claim_id).expect("first version");
        assert_eq!(original.supersedes, None);
        assert_eq!(original.status, ClaimStatus::Superseded);
        assert_eq!(original.extracted_at, first.extracted_at);

        let history = ledger
            .claim_history(&store, "acme", &first.claim_id)
            .expect("history");
        assert_eq!(
            history.chain,
            vec![first.claim_id.clone(), second.claim_id.clone(), third.claim_id.clone()]
        );

        let settled = ledger.track_file(&store, "acme", path, None).expect("track");
        assert_eq!(settled, TrackReport { unchanged: 1, ..TrackReport::default() });
    }

    #[test]
    fn removed_claims_retire_and_missing_quotes_warn() {
        let (_dir, store) = store_with("notes/idea.md", "- Acme might expand into robotics soon\n");
        let ledger = ClaimLedger::default();
        let report = ledger
            .track_file(&store, "acme", "notes/idea.md", None)
            .expect("track");
        assert_eq!(report.inserted, 1);
        assert_eq!(report.warnings, 2);

        let claims = ledger
            .list_claims(&store, "acme", &ClaimFilter::default(), 10)
            .expect("list");
        assert!(claims[0].user_override);
        assert!(!claims[0].has_evidence());

        store.delete_file("acme", "notes/idea.md").expect("delete");
        let retired = ledger
            .track_file(&store, "acme", "notes/idea.md", None)
            .expect("track deletion");
        assert_eq!(retired.retired, 1);

        let filter = ClaimFilter {
            status: Some(ClaimStatus::Active),
            ..ClaimFilter::default()
        };
        assert!(ledger
            .list_claims(&store, "acme", &filter, 10)
            .expect("list")
            .is_empty());
    }

    #[test]
    fn off_policy_suppresses_warnings_and_unknown_claims_are_not_found() {
        let (_dir, store) = store_with("notes/idea.md", "- Acme might expand into robotics soon\n");
        let ledger = ClaimLedger::new(AuditConfig {
            provenance: ProvenancePolicy::Off,
            ..AuditConfig::default()
        });
        let report = ledger
            .track_file(&store, "acme", "notes/idea.md", None)
            .expect("track");
        assert_eq!(report.warnings, 0);

        let err = ledger
            .get_claim(&store, "acme", "clm_missing")
            .expect_err("unknown claim");
        assert_eq!(err.kind(), "not_found");
    }
}
