use crate::RetrievalError;
use cbo_core::brain_contracts::{category_of, file_stem, KnowledgeFile};
use cbo_storage::{BrainStore, StorageError};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};
use tracing::{debug, warn};

const DEFAULT_MAX_DEPTH: usize = 1;
const DEFAULT_MAX_NODES: usize = 12;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpanderConfig {
    pub max_depth: usize,
    pub max_nodes: usize,
    pub follow_wiki_links: bool,
}

impl Default for ExpanderConfig {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
            follow_wiki_links: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrokenLink {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpansionReport {
    /// Seeds first, then breadth-first discovery order; never contains duplicates.
    pub files: Vec<String>,
    pub broken_links: Vec<BrokenLink>,
    pub truncated: bool,
    pub depth_reached: usize,
}

impl ExpansionReport {
    pub fn broken_link_count(&self) -> usize {
        self.broken_links.len()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphNode {
    pub id: String,
    pub label: String,
    pub category: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphLink {
    pub source: String,
    pub target: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphData {
    pub nodes: Vec<GraphNode>,
    pub links: Vec<GraphLink>,
}

/// Maps raw link text onto existing knowledge paths.
struct LinkResolver {
    paths: BTreeSet<String>,
    by_stem: BTreeMap<String, String>,
}

impl LinkResolver {
    fn new(files: Vec<String>) -> Self {
        let mut by_stem = BTreeMap::new();
        for path in &files {
            by_stem
                .entry(file_stem(path).to_lowercase())
                .or_insert_with(|| path.clone());
        }
        Self {
            paths: files.into_iter().collect(),
            by_stem,
        }
    }

    fn resolve(&self, raw: &str) -> Option<String> {
        let trimmed = raw.trim().replace('\\', "/");
        let mut link = trimmed.as_str();
        while let Some(rest) = link.strip_prefix("./") {
            link = rest;
        }
        if link.is_empty() {
            return None;
        }
        if self.paths.contains(link) {
            return Some(link.to_string());
        }
        let with_extension = format!("{link}.md");
        if self.paths.contains(&with_extension) {
            return Some(with_extension);
        }
        self.by_stem.get(&file_stem(link).to_lowercase()).cloned()
    }

    fn contains(&self, path: &str) -> bool {
        self.paths.contains(path)
    }
}

pub struct GraphExpander {
    config: ExpanderConfig,
}

impl GraphExpander {
    pub fn new(config: ExpanderConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &ExpanderConfig {
        &self.config
    }

    pub fn expand_seeds(
        &self,
        store: &BrainStore,
        brain: &str,
        seeds: &[String],
    ) -> Result<ExpansionReport, RetrievalError> {
        self.expand(store, brain, seeds, self.config.max_depth, self.config.max_nodes)
    }

    /// Breadth-first walk over `related` (and wiki) links, bounded by hop count and total files.
    pub fn expand(
        &self,
        store: &BrainStore,
        brain: &str,
        seeds: &[String],
        max_depth: usize,
        max_nodes: usize,
    ) -> Result<ExpansionReport, RetrievalError> {
        let resolver = LinkResolver::new(store.list_files(brain)?);
        let mut report = ExpansionReport::default();
        let mut visited = BTreeSet::new();
        let mut queue = VecDeque::new();

        for seed in seeds {
            let Some(path) = resolver.resolve(seed) else {
                report.broken_links.push(BrokenLink {
                    source: String::new(),
                    target: seed.clone(),
                });
                continue;
            };
            if !visited.insert(path.clone()) {
                continue;
            }
            if report.files.len() >= max_nodes {
                report.truncated = true;
                break;
            }
            report.files.push(path.clone());
            queue.push_back((path, 0usize));
        }

        while let Some((path, depth)) = queue.pop_front() {
            if depth >= max_depth {
                continue;
            }
            let file = match store.read_knowledge_file(brain, &path) {
                Ok(file) => file,
                Err(StorageError::NotFound { .. }) => continue,
                Err(err) => return Err(err.into()),
            };
            for target in self.outgoing_links(&file) {
                let Some(resolved) = resolver.resolve(&target) else {
                    warn!(brain, path = %path, target = %target, "broken_related_link");
                    report.broken_links.push(BrokenLink {
                        source: path.clone(),
                        target,
                    });
                    continue;
                };
                if resolved == path || visited.contains(&resolved) {
                    continue;
                }
                if report.files.len() >= max_nodes {
                    report.truncated = true;
                    break;
                }
                visited.insert(resolved.clone());
                report.files.push(resolved.clone());
                report.depth_reached = report.depth_reached.max(depth + 1);
                queue.push_back((resolved, depth + 1));
            }
            if report.truncated {
                break;
            }
        }

        debug!(
            brain,
            seeds = seeds.len(),
            files = report.files.len(),
            broken = report.broken_links.len(),
            truncated = report.truncated,
            "graph_expanded"
        );
        Ok(report)
    }

    /// Whole-brain node/link export; broken and duplicate links are dropped.
    pub fn graph_data(&self, store: &BrainStore, brain: &str) -> Result<GraphData, RetrievalError> {
        let files = store.list_files(brain)?;
        self.graph_for_listing(store, brain, files)
    }

    /// Files in `listed` that can no longer be read are left out, along with links to them.
    fn graph_for_listing(
        &self,
        store: &BrainStore,
        brain: &str,
        listed: Vec<String>,
    ) -> Result<GraphData, RetrievalError> {
        let mut readable = Vec::new();
        for path in listed {
            match store.read_knowledge_file(brain, &path) {
                Ok(file) => readable.push((path, file)),
                Err(StorageError::NotFound { .. }) => {
                    debug!(brain, path = %path, "graph_file_vanished");
                }
                Err(err) => return Err(err.into()),
            }
        }

        let resolver = LinkResolver::new(readable.iter().map(|(path, _)| path.clone()).collect());
        let mut graph = GraphData::default();
        let mut seen = BTreeSet::new();

        for (path, file) in readable {
            for target in self.outgoing_links(&file) {
                let Some(resolved) = resolver.resolve(&target) else {
                    continue;
                };
                if resolved != path && resolver.contains(&resolved) {
                    seen.insert((path.clone(), resolved));
                }
            }
            graph.nodes.push(GraphNode {
                label: file.title(),
                category: category_of(&path).map(str::to_string),
                id: path,
            });
        }

        graph.links = seen
            .into_iter()
            .map(|(source, target)| GraphLink { source, target })
            .collect();
        Ok(graph)
    }

    fn outgoing_links(&self, file: &KnowledgeFile) -> Vec<String> {
        let mut links = file.metadata.related.clone();
        if self.config.follow_wiki_links {
            for link in file.wiki_links() {
                if !links.contains(&link) {
                    links.push(link);
                }
            }
        }
        links
    }
}

impl Default for GraphExpander {
    fn default() -> Self {
        Self::new(ExpanderConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cbo_storage::{StoreConfig, WriteMode};

    fn brain_with(files: &[(&str, &str)]) -> (tempfile::TempDir, BrainStore) {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = BrainStore::open(dir.path(), StoreConfig::default()).expect("open");
        store.create_brain("acme", "company history").expect("create");
        for (path, raw) in files {
            store
                .write_markdown("acme", path, raw, WriteMode::Overwrite)
                .expect("write");
        }
        (dir, store)
    }

    fn seeds(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|path| path.to_string()).collect()
    }

    #[test]
    fn cycles_terminate_without_duplicates() {
        let (_dir, store) = brain_with(&[
            ("characters/a.md", "---\nrelated: [characters/b.md]\n---\nA\n"),
            ("characters/b.md", "---\nrelated: [characters/c.md]\n---\nB\n"),
            ("characters/c.md", "---\nrelated: [characters/a.md, characters/b.md]\n---\nC\n"),
        ]);
        let report = GraphExpander::default()
            .expand(&store, "acme", &seeds(&["characters/a.md"]), 10, 10)
            .expect("expand");
        assert_eq!(
            report.files,
            vec!["characters/a.md", "characters/b.md", "characters/c.md"]
        );
        assert_eq!(report.depth_reached, 2);
        assert!(!report.truncated);
        assert!(report.broken_links.is_empty());
    }

    #[test]
    fn broken_links_are_counted_not_fatal() {
        let (_dir, store) = brain_with(&[(
            "facts/acme.md",
            "---\nrelated: [facts/missing.md, timeline/founding]\n---\nSee [[Ghost]] and [[founding|the founding]].\n",
        ), ("timeline/founding.md", "Founded in 1999.\n")]);
        let report = GraphExpander::default()
            .expand_seeds(&store, "acme", &seeds(&["facts/acme.md"]))
            .expect("expand");
        assert_eq!(report.files, vec!["facts/acme.md", "timeline/founding.md"]);
        assert_eq!(report.broken_link_count(), 2);
        assert_eq!(report.broken_links[0].target, "facts/missing.md");
        assert_eq!(report.broken_links[1].target, "Ghost");
    }

    #[test]
    fn depth_and_node_limits_bound_the_walk() {
        let (_dir, store) = brain_with(&[
            ("facts/a.md", "---\nrelated: [facts/b.md, facts/c.md, facts/d.md]\n---\nA\n"),
            ("facts/b.md", "---\nrelated: [facts/e.md]\n---\nB\n"),
            ("facts/c.md", "C\n"),
            ("facts/d.md", "D\n"),
            ("facts/e.md", "E\n"),
        ]);
        let expander = GraphExpander::default();

        let shallow = expander
            .expand(&store, "acme", &seeds(&["facts/a.md"]), 1, 12)
            .expect("expand");
        assert_eq!(shallow.files.len(), 4);
        assert!(!shallow.files.contains(&"facts/e.md".to_string()));

        let capped = expander
            .expand(&store, "acme", &seeds(&["facts/a.md"]), 3, 2)
            .expect("expand");
        assert_eq!(capped.files, vec!["facts/a.md", "facts/b.md"]);
        assert!(capped.truncated);

        let seeds_only = expander
            .expand(&store, "acme", &seeds(&["facts/a.md"]), 0, 12)
            .expect("expand");
        assert_eq!(seeds_only.files, vec!["facts/a.md"]);
        assert_eq!(seeds_only.depth_reached, 0);
    }

    #[test]
    fn graph_export_dedups_and_skips_broken_links() {
        let (_dir, store) = brain_with(&[
            (
                "characters/jane.md",
                "---\nrelated: [timeline/founding.md, facts/nowhere.md]\n---\nJane, see [[founding]].\n",
            ),
            ("timeline/founding.md", "---\nrelated: [characters/jane.md]\n---\nFounding.\n"),
        ]);
        let graph = GraphExpander::default()
            .graph_data(&store, "acme")
            .expect("graph");
        assert_eq!(graph.nodes.len(), 2);
        assert_eq!(graph.nodes[0].id, "characters/jane.md");
        assert_eq!(graph.nodes[0].label, "jane");
        assert_eq!(graph.nodes[0].category.as_deref(), Some("characters"));
        assert_eq!(
            graph.links,
            vec![
                GraphLink {
                    source: "characters/jane.md".to_string(),
                    target: "timeline/founding.md".to_string(),
                },
                GraphLink {
                    source: "timeline/founding.md".to_string(),
                    target: "characters/jane.md".to_string(),
                },
            ]
        );
        let json = serde_json::to_value(&graph).expect("serialize");
        assert_eq!(json["links"].as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn graph_export_skips_files_deleted_after_listing() {
        let (_dir, store) = brain_with(&[
            ("characters/jane.md", "---\nrelated: [facts/gone.md]\n---\nJane.\n"),
            ("facts/gone.md", "---\nrelated: [characters/jane.md]\n---\nGone.\n"),
        ]);
        let listed = store.list_files("acme").expect("list");
        store.delete_file("acme", "facts/gone.md").expect("delete");

        let graph = GraphExpander::default()
            .graph_for_listing(&store, "acme", listed)
            .expect("graph");
        let ids = graph.nodes.iter().map(|node| node.id.as_str()).collect::<Vec<_>>();
        assert_eq!(ids, vec!["characters/jane.md"]);
        assert!(graph.links.is_empty());
    }
}
