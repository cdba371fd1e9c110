use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value as YamlValue};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

pub const KNOWLEDGE_CATEGORIES: [&str; 5] = ["characters", "timeline", "themes", "facts", "notes"];
pub const META_DIR: &str = "meta";
pub const OBJECTIVE_FILE: &str = "_objective.md";
pub const RESPONSE_FILE: &str = "_response.md";
pub const INDEX_FILE: &str = "_index.md";
pub const PROCESSING_LOG_FILE: &str = "processing_log.json";

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BrainContractError {
    #[error("invalid brain name: {0:?}")]
    InvalidBrainName(String),
    #[error("invalid knowledge path: {0:?}")]
    InvalidPath(String),
    #[error("illegal chapter transition for {chapter}: {from} -> {to}")]
    IllegalTransition {
        chapter: String,
        from: ChapterStatus,
        to: ChapterStatus,
    },
    #[error("frontmatter render failed: {0}")]
    Render(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    #[serde(alias = "uncertain")]
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }
}

impl fmt::Display for Confidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Confidence {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" | "uncertain" => Ok(Self::Low),
            "none" => Ok(Self::None),
            other => Err(format!("unknown confidence: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ChapterStatus {
    Pending,
    Extracted,
    Skipped,
}

impl ChapterStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracted => "extracted",
            Self::Skipped => "skipped",
        }
    }

    /// `extracted` is terminal for a chapter; `skipped` may only move forward.
    pub fn allows(self, next: ChapterStatus) -> bool {
        match self {
            Self::Pending => true,
            Self::Skipped => matches!(next, Self::Skipped | Self::Extracted),
            Self::Extracted => next == Self::Extracted,
        }
    }
}

impl fmt::Display for ChapterStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChapterStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(Self::Pending),
            "extracted" => Ok(Self::Extracted),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown chapter status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChapterState {
    pub status: ChapterStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(
        default,
        alias = "source_objective",
        skip_serializing_if = "Option::is_none"
    )]
    pub source_objective: Option<String>,
    #[serde(default, alias = "updated_at", skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default, alias = "index_terms", skip_serializing_if = "Vec::is_empty")]
    pub index_terms: Vec<String>,
}

impl ChapterState {
    pub fn new(status: ChapterStatus) -> Self {
        Self {
            status,
            reason: None,
            source_objective: None,
            updated_at: None,
            index_terms: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingLog {
    #[serde(default)]
    pub objective: String,
    #[serde(default, alias = "book_path", skip_serializing_if = "Option::is_none")]
    pub book_path: Option<String>,
    #[serde(default, alias = "secondary_objectives")]
    pub secondary_objectives: Vec<String>,
    #[serde(default, alias = "chapter_map")]
    pub chapter_map: BTreeMap<String, ChapterState>,
}

impl ProcessingLog {
    pub fn new(objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            ..Self::default()
        }
    }

    pub fn state(&self, chapter_id: &str) -> Option<&ChapterState> {
        self.chapter_map.get(chapter_id)
    }

    /// Applies a chapter transition and returns the previous status, if any.
    pub fn apply_transition(
        &mut self,
        chapter_id: &str,
        next: ChapterStatus,
        reason: Option<String>,
        source_objective: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Option<ChapterStatus>, BrainContractError> {
        let previous = self.chapter_map.get(chapter_id).map(|state| state.status);
        if let Some(current) = previous {
            if !current.allows(next) {
                return Err(BrainContractError::IllegalTransition {
                    chapter: chapter_id.to_string(),
                    from: current,
                    to: next,
                });
            }
        }

        let entry = self
            .chapter_map
            .entry(chapter_id.to_string())
            .or_insert_with(|| ChapterState::new(next));
        entry.status = next;
        if reason.is_some() {
            entry.reason = reason;
        }
        if source_objective.is_some() {
            entry.source_objective = source_objective;
        }
        entry.updated_at = Some(now);
        Ok(previous)
    }

    /// Append-only; returns false when the objective is already recorded.
    pub fn append_secondary_objective(&mut self, objective: &str) -> bool {
        let objective = objective.trim();
        if objective.is_empty()
            || self.objective.trim() == objective
            || self
                .secondary_objectives
                .iter()
                .any(|existing| existing == objective)
        {
            return false;
        }
        self.secondary_objectives.push(objective.to_string());
        true
    }

    pub fn chapters_with_status(&self, status: ChapterStatus) -> Vec<String> {
        let mut chapters = self
            .chapter_map
            .iter()
            .filter(|(_, state)| state.status == status)
            .map(|(chapter_id, _)| chapter_id.clone())
            .collect::<Vec<_>>();
        chapters.sort_by(|left, right| chapter_sort_key(left).cmp(&chapter_sort_key(right)));
        chapters
    }

    pub fn status_counts(&self) -> BTreeMap<ChapterStatus, usize> {
        let mut counts = BTreeMap::new();
        for state in self.chapter_map.values() {
            *counts.entry(state.status).or_insert(0) += 1;
        }
        counts
    }
}

/// Orders chapter ids numerically when they are numeric, otherwise after all numeric ids.
pub fn chapter_sort_key(chapter_id: &str) -> (u64, String) {
    let digits = chapter_id
        .chars()
        .filter(|ch| ch.is_ascii_digit())
        .collect::<String>();
    let number = digits.parse::<u64>().unwrap_or(u64::MAX);
    (number, chapter_id.to_string())
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct FileMetadata {
    pub source: Option<String>,
    pub source_chapter: Option<u32>,
    pub last_updated_chapter: Option<u32>,
    pub confidence: Option<Confidence>,
    pub tags: BTreeSet<String>,
    pub summary: Option<String>,
    pub related: Vec<String>,
    pub extra: BTreeMap<String, YamlValue>,
}

const KNOWN_KEYS: [&str; 8] = [
    "source",
    "source_chapter",
    "last_updated_chapter",
    "last_updated",
    "confidence",
    "tags",
    "summary",
    "related",
];

impl FileMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }

    /// Lenient parse: malformed YAML yields empty metadata.
    pub fn from_yaml(header: &str) -> Self {
        let Ok(YamlValue::Mapping(mapping)) = serde_yaml::from_str::<YamlValue>(header) else {
            return Self::default();
        };

        let field = |key: &str| mapping.get(key);
        let source = field("source").and_then(yaml_scalar_string);
        let source_chapter = field("source_chapter")
            .and_then(yaml_chapter_number)
            .or_else(|| source.as_deref().and_then(chapter_number_from_text));
        let last_updated_chapter = field("last_updated_chapter")
            .or_else(|| field("last_updated"))
            .and_then(yaml_chapter_number);
        let confidence = field("confidence")
            .and_then(yaml_scalar_string)
            .and_then(|value| value.parse::<Confidence>().ok());
        let tags = field("tags")
            .map(yaml_string_list)
            .unwrap_or_default()
            .into_iter()
            .map(|tag| tag.to_lowercase())
            .collect::<BTreeSet<_>>();
        let summary = field("summary")
            .and_then(yaml_scalar_string)
            .filter(|summary| !summary.trim().is_empty());
        let mut related = Vec::new();
        for link in field("related").map(yaml_string_list).unwrap_or_default() {
            if !related.contains(&link) {
                related.push(link);
            }
        }

        let mut extra = BTreeMap::new();
        for (key, value) in &mapping {
            let Some(key) = key.as_str() else {
                continue;
            };
            if !KNOWN_KEYS.contains(&key) {
                extra.insert(key.to_string(), value.clone());
            }
        }

        Self {
            source,
            source_chapter,
            last_updated_chapter,
            confidence,
            tags,
            summary,
            related,
            extra,
        }
    }

    pub fn to_yaml(&self) -> Result<String, BrainContractError> {
        let mut mapping = Mapping::new();
        let mut put = |key: &str, value: YamlValue| {
            mapping.insert(YamlValue::String(key.to_string()), value);
        };
        if let Some(source) = &self.source {
            put("source", YamlValue::String(source.clone()));
        }
        if let Some(chapter) = self.source_chapter {
            put("source_chapter", YamlValue::Number(chapter.into()));
        }
        if let Some(chapter) = self.last_updated_chapter {
            put("last_updated_chapter", YamlValue::Number(chapter.into()));
        }
        if let Some(confidence) = self.confidence {
            put("confidence", YamlValue::String(confidence.as_str().to_string()));
        }
        if !self.tags.is_empty() {
            put(
                "tags",
                YamlValue::Sequence(self.tags.iter().cloned().map(YamlValue::String).collect()),
            );
        }
        if let Some(summary) = &self.summary {
            put("summary", YamlValue::String(summary.clone()));
        }
        if !self.related.is_empty() {
            put(
                "related",
                YamlValue::Sequence(self.related.iter().cloned().map(YamlValue::String).collect()),
            );
        }
        for (key, value) in &self.extra {
            put(key.as_str(), value.clone());
        }
        serde_yaml::to_string(&YamlValue::Mapping(mapping))
            .map_err(|err| BrainContractError::Render(err.to_string()))
    }

    pub fn merge(&mut self, incoming: FileMetadata) {
        if self.source.is_none() {
            self.source = incoming.source;
        }
        if self.source_chapter.is_none() {
            self.source_chapter = incoming.source_chapter;
        }
        if incoming.last_updated_chapter.is_some() {
            self.last_updated_chapter = incoming.last_updated_chapter;
        }
        if incoming.confidence.is_some() {
            self.confidence = incoming.confidence;
        }
        if incoming.summary.is_some() {
            self.summary = incoming.summary;
        }
        self.tags.extend(incoming.tags);
        for link in incoming.related {
            if !self.related.contains(&link) {
                self.related.push(link);
            }
        }
        self.extra.extend(incoming.extra);
    }
}

fn yaml_scalar_string(value: &YamlValue) -> Option<String> {
    match value {
        YamlValue::String(text) => Some(text.trim().to_string()),
        YamlValue::Number(number) => Some(number.to_string()),
        YamlValue::Bool(flag) => Some(flag.to_string()),
        _ => None,
    }
}

fn yaml_chapter_number(value: &YamlValue) -> Option<u32> {
    match value {
        YamlValue::Number(number) => number.as_u64().and_then(|n| u32::try_from(n).ok()),
        YamlValue::String(text) => chapter_number_from_text(text),
        _ => None,
    }
}

fn chapter_number_from_text(text: &str) -> Option<u32> {
    let digits = text
        .chars()
        .skip_while(|ch| !ch.is_ascii_digit())
        .take_while(|ch| ch.is_ascii_digit())
        .collect::<String>();
    digits.parse().ok()
}

/// Accepts a YAML sequence or a bare string such as `"[a.md, b.md]"` / `"a.md, b.md"`.
fn yaml_string_list(value: &YamlValue) -> Vec<String> {
    match value {
        YamlValue::Sequence(items) => items
            .iter()
            .filter_map(yaml_scalar_string)
            .map(|item| clean_list_item(&item))
            .filter(|item| !item.is_empty())
            .collect(),
        YamlValue::String(text) => text
            .trim()
            .trim_start_matches('[')
            .trim_end_matches(']')
            .split(',')
            .map(clean_list_item)
            .filter(|item| !item.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}

fn clean_list_item(item: &str) -> String {
    item.trim()
        .trim_matches(|ch| ch == '"' || ch == '\'')
        .trim()
        .to_string()
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct KnowledgeFile {
    pub path: String,
    pub metadata: FileMetadata,
    pub body: String,
}

impl KnowledgeFile {
    pub fn new(path: impl Into<String>, metadata: FileMetadata, body: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            metadata,
            body: body.into(),
        }
    }

    pub fn parse(path: impl Into<String>, raw: &str) -> Self {
        let (header, body) = split_frontmatter(raw);
        Self {
            path: path.into(),
            metadata: header.map(FileMetadata::from_yaml).unwrap_or_default(),
            body: body.to_string(),
        }
    }

    pub fn render(&self) -> Result<String, BrainContractError> {
        if self.metadata.is_empty() {
            return Ok(self.body.clone());
        }
        let yaml = self.metadata.to_yaml()?;
        let yaml = yaml.strip_prefix("---\n").unwrap_or(&yaml);
        Ok(format!("---\n{yaml}---\n\n{}", self.body.trim_start()))
    }

    /// Keeps the prior body and appends the incoming one after a blank line.
    pub fn merge_append(&mut self, incoming: KnowledgeFile) {
        let prior = self.body.trim_end();
        let addition = incoming.body.trim();
        self.body = match (prior.is_empty(), addition.is_empty()) {
            (true, _) => format!("{addition}\n"),
            (false, true) => format!("{prior}\n"),
            (false, false) => format!("{prior}\n\n{addition}\n"),
        };
        self.metadata.merge(incoming.metadata);
    }

    pub fn title(&self) -> String {
        file_stem(&self.path)
    }

    pub fn category(&self) -> Option<&'static str> {
        category_of(&self.path)
    }

    pub fn wiki_links(&self) -> Vec<String> {
        let mut links = Vec::new();
        for caps in wiki_link_regex().captures_iter(&self.body) {
            let Some(target) = caps.get(1) else {
                continue;
            };
            let target = target.as_str().trim().to_string();
            if !target.is_empty() && !links.contains(&target) {
                links.push(target);
            }
        }
        links
    }
}

fn wiki_link_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[\[([^\]|#]+)(?:[|#][^\]]*)?\]\]").expect("valid regex"))
}

/// Splits a `---` fenced YAML header from the body. Returns `(None, raw)` when absent or unterminated.
pub fn split_frontmatter(raw: &str) -> (Option<&str>, &str) {
    let content = raw.strip_prefix('\u{feff}').unwrap_or(raw);
    let Some(rest) = content.strip_prefix("---") else {
        return (None, raw);
    };
    let rest = rest.strip_prefix('\r').unwrap_or(rest);
    let Some(rest) = rest.strip_prefix('\n') else {
        return (None, raw);
    };

    let mut offset = 0usize;
    for line in rest.split_inclusive('\n') {
        if line.trim_end() == "---" {
            let header = &rest[..offset];
            let body = rest[offset + line.len()..].trim_start_matches(['\r', '\n']);
            return (Some(header), body);
        }
        offset += line.len();
    }
    (None, raw)
}

pub fn category_of(path: &str) -> Option<&'static str> {
    let first = path.split('/').next()?;
    KNOWLEDGE_CATEGORIES
        .iter()
        .copied()
        .find(|category| *category == first)
}

pub fn file_stem(path: &str) -> String {
    let name = path.rsplit('/').next().unwrap_or(path);
    name.strip_suffix(".md").unwrap_or(name).to_string()
}

pub fn validate_brain_name(name: &str) -> Result<String, BrainContractError> {
    let trimmed = name.trim();
    let valid = !trimmed.is_empty()
        && trimmed == name
        && !trimmed.starts_with('.')
        && trimmed
            .chars()
            .all(|ch| ch.is_alphanumeric() || matches!(ch, '-' | '_' | '.' | ' '));
    if valid {
        Ok(trimmed.to_string())
    } else {
        Err(BrainContractError::InvalidBrainName(name.to_string()))
    }
}

/// Normalizes a brain-relative knowledge path. Rejects absolute paths, traversal and non-markdown files.
pub fn normalize_knowledge_path(path: &str) -> Result<String, BrainContractError> {
    let replaced = path.trim().replace('\\', "/");
    let mut cleaned = replaced.as_str();
    while let Some(rest) = cleaned.strip_prefix("./") {
        cleaned = rest;
    }
    let invalid = cleaned.is_empty()
        || cleaned.starts_with('/')
        || !cleaned.ends_with(".md")
        || cleaned
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if invalid {
        return Err(BrainContractError::InvalidPath(path.to_string()));
    }
    Ok(cleaned.to_string())
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexedFile {
    pub path: String,
    pub category: Option<&'static str>,
    pub title: String,
    pub metadata: FileMetadata,
    pub modified_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ProcessingSummary {
    pub brain_name: String,
    pub objective: String,
    pub secondary_objectives: Vec<String>,
    pub counts: BTreeMap<ChapterStatus, usize>,
    pub skipped_chapters: Vec<String>,
    pub file_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[test]
    fn frontmatter_parses_lists_and_chapter_locator() {
        let raw = "---\nsource: chapter_3\ntags: [Founder, origin]\nsummary: \"Jane started Acme.\"\nrelated: [timeline/founding.md, facts/acme.md]\nconfidence: high\n---\n\n# Jane\n\nBody text.\n";
        let file = KnowledgeFile::parse("characters/jane.md", raw);

        assert_eq!(file.metadata.source.as_deref(), Some("chapter_3"));
        assert_eq!(file.metadata.source_chapter, Some(3));
        assert_eq!(file.metadata.confidence, Some(Confidence::High));
        assert!(file.metadata.tags.contains("founder"));
        assert_eq!(
            file.metadata.related,
            vec!["timeline/founding.md", "facts/acme.md"]
        );
        assert_eq!(file.metadata.summary.as_deref(), Some("Jane started Acme."));
        assert!(file.body.starts_with("# Jane"));
        assert_eq!(file.category(), Some("characters"));
        assert_eq!(file.title(), "jane");
    }

    #[test]
    fn related_given_as_bare_string_is_split_on_commas() {
        let raw = "---\nrelated: \"[themes/power.md, 'facts/acme.md']\"\n---\nbody";
        let file = KnowledgeFile::parse("facts/x.md", raw);
        assert_eq!(file.metadata.related, vec!["themes/power.md", "facts/acme.md"]);
    }

    #[test]
    fn malformed_frontmatter_yields_empty_metadata() {
        let raw = "---\ntags: [unterminated\n---\nbody";
        let file = KnowledgeFile::parse("facts/x.md", raw);
        assert!(file.metadata.is_empty());
        assert_eq!(file.body, "body");

        let unterminated = KnowledgeFile::parse("facts/y.md", "---\nsource: a\nno fence");
        assert!(unterminated.metadata.is_empty());
        assert!(unterminated.body.starts_with("---"));
    }

    #[test]
    fn render_then_parse_preserves_metadata() {
        let mut metadata = FileMetadata {
            source: Some("chapter_2".to_string()),
            source_chapter: Some(2),
            confidence: Some(Confidence::Medium),
            summary: Some("Summary: with colon".to_string()),
            related: vec!["facts/b.md".to_string()],
            ..FileMetadata::default()
        };
        metadata.tags.insert("finance".to_string());
        let file = KnowledgeFile::new("facts/a.md", metadata.clone(), "Body\n");

        let rendered = file.render().expect("render");
        assert!(rendered.starts_with("---\n"));
        let parsed = KnowledgeFile::parse("facts/a.md", &rendered);
        assert_eq!(parsed.metadata, metadata);
        assert_eq!(parsed.body, "Body\n");
    }

    #[test]
    fn merge_append_keeps_prior_body_and_unions_metadata() {
        let mut prior = KnowledgeFile::parse(
            "characters/jane.md",
            "---\nsource_chapter: 1\ntags: [founder]\nrelated: [facts/a.md]\n---\nFirst.\n",
        );
        let incoming = KnowledgeFile::parse(
            "characters/jane.md",
            "---\nsource_chapter: 5\nlast_updated_chapter: 5\ntags: [ceo]\nrelated: [facts/a.md, facts/b.md]\n---\nSecond.\n",
        );
        prior.merge_append(incoming);

        assert_eq!(prior.body, "First.\n\nSecond.\n");
        assert_eq!(prior.metadata.source_chapter, Some(1));
        assert_eq!(prior.metadata.last_updated_chapter, Some(5));
        assert_eq!(prior.metadata.tags.len(), 2);
        assert_eq!(prior.metadata.related, vec!["facts/a.md", "facts/b.md"]);
    }

    #[test]
    fn wiki_links_are_collected_once() {
        let file = KnowledgeFile::new(
            "themes/power.md",
            FileMetadata::default(),
            "See [[Jane]] and [[timeline/founding|the founding]] and [[Jane]] again.",
        );
        assert_eq!(file.wiki_links(), vec!["Jane", "timeline/founding"]);
    }

    #[test]
    fn knowledge_paths_reject_traversal_and_non_markdown() {
        assert_eq!(
            normalize_knowledge_path("./facts\\acme.md").expect("normalized"),
            "facts/acme.md"
        );
        assert!(normalize_knowledge_path("../escape.md").is_err());
        assert!(normalize_knowledge_path("/abs.md").is_err());
        assert!(normalize_knowledge_path("facts/acme.txt").is_err());
        assert!(normalize_knowledge_path("facts//acme.md").is_err());
    }

    #[test]
    fn brain_names_reject_separators() {
        assert!(validate_brain_name("moby-dick").is_ok());
        assert!(validate_brain_name("a/b").is_err());
        assert!(validate_brain_name("..").is_err());
        assert!(validate_brain_name("").is_err());
    }

    #[test]
    fn extracted_chapters_never_revert() {
        let mut log = ProcessingLog::new("Track the founders");
        log.apply_transition("1", ChapterStatus::Skipped, Some("finance only".into()), None, ts())
            .expect("pending to skipped");
        log.apply_transition(
            "1",
            ChapterStatus::Extracted,
            None,
            Some("revenue".into()),
            ts(),
        )
        .expect("skipped to extracted");

        for next in [ChapterStatus::Pending, ChapterStatus::Skipped] {
            let err = log
                .apply_transition("1", next, None, None, ts())
                .expect_err("extracted must not revert");
            assert!(matches!(err, BrainContractError::IllegalTransition { .. }));
        }
        let state = log.state("1").expect("state");
        assert_eq!(state.status, ChapterStatus::Extracted);
        assert_eq!(state.reason.as_deref(), Some("finance only"));
        assert_eq!(state.source_objective.as_deref(), Some("revenue"));
    }

    #[test]
    fn secondary_objectives_are_append_only_and_deduplicated() {
        let mut log = ProcessingLog::new("main");
        assert!(log.append_secondary_objective("who funded it?"));
        assert!(!log.append_secondary_objective("who funded it?"));
        assert!(!log.append_secondary_objective("main"));
        assert!(log.append_secondary_objective("when did it close?"));
        assert_eq!(log.secondary_objectives, vec!["who funded it?", "when did it close?"]);
    }

    #[test]
    fn chapters_sort_numerically() {
        let mut log = ProcessingLog::new("main");
        for chapter in ["10", "2", "1"] {
            log.apply_transition(chapter, ChapterStatus::Skipped, None, None, ts())
                .expect("seed");
        }
        assert_eq!(log.chapters_with_status(ChapterStatus::Skipped), vec!["1", "2", "10"]);
    }

    #[test]
    fn processing_log_accepts_snake_case_keys() {
        let raw = r#"{"objective":"o","secondary_objectives":["q"],"chapter_map":{"3":{"status":"skipped","reason":"r","source_objective":null}}}"#;
        let log: ProcessingLog = serde_json::from_str(raw).expect("parse");
        assert_eq!(log.secondary_objectives, vec!["q"]);
        assert_eq!(
            log.state("3").map(|state| state.status),
            Some(ChapterStatus::Skipped)
        );
        let rendered = serde_json::to_string(&log).expect("render");
        assert!(rendered.contains("\"chapterMap\""));
        assert!(rendered.contains("\"secondaryObjectives\""));
    }
}
