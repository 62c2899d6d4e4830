//! Include dependency graph.
//!
//! Every MQL4 source is scanned for `#include` directives. Angle-bracket
//! includes (`#include <Lib.mqh>`) are looked up under `<root>/Include`,
//! quoted ones (`#include "../Lib.mqh"`) next to the including file.
//!
//! Nodes live in an arena and are keyed by their normalized absolute path, so
//! a header shared by many programs is parsed once and include cycles end at
//! the first node that is already known. Dirty state is kept outside the
//! graph in a [`DirtySet`].

use super::log::decode_utf16le;
use regex::Regex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::LazyLock;
use tracing::{debug, warn};

const INCLUDE_TOKEN: &str = "#include";

/// Subdirectory of the root searched for `<...>` includes.
pub const INCLUDE_DIR: &str = "Include";

static INCLUDE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(?:<([A-Za-z0-9_/\\.\-]+)>|"([A-Za-z0-9_/\\.\-]+)")"#)
        .expect("include pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IncludeStyle {
    /// `#include <file>`
    System,
    /// `#include "file"`
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncludeDirective {
    pub style: IncludeStyle,
    pub target: String,
}

/// How an include target ended up in the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeKind {
    /// Parsed for further includes.
    Source,
    /// Named by an include but not on disk.
    Missing,
    /// Exists, but outside the source root; tracked without parsing.
    OutsideRoot,
}

#[derive(Debug)]
pub struct DependencyNode {
    file: PathBuf,
    children: Vec<NodeId>,
    kind: NodeKind,
}

impl DependencyNode {
    pub fn file(&self) -> &Path {
        &self.file
    }

    pub fn children(&self) -> &[NodeId] {
        &self.children
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    /// True for includes that were not parsed (missing, or outside the root).
    pub fn is_placeholder(&self) -> bool {
        self.kind != NodeKind::Source
    }
}

#[derive(Debug)]
pub struct DependencyGraph {
    root: PathBuf,
    nodes: Vec<DependencyNode>,
    index: HashMap<PathBuf, NodeId>,
}

impl DependencyGraph {
    pub fn new(root: &Path) -> Self {
        Self {
            root: normalize_path(root),
            nodes: Vec::new(),
            index: HashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Adds `file` and everything it includes.
    ///
    /// Returns `None` when the root is not a directory, the file does not
    /// exist, or the file lies outside the root.
    pub fn insert(&mut self, file: &Path) -> Option<NodeId> {
        if !self.root.is_dir() {
            return None;
        }

        let file = normalize_path(file);
        if !file.is_file() || !file.starts_with(&self.root) {
            return None;
        }

        Some(self.visit(file))
    }

    fn visit(&mut self, file: PathBuf) -> NodeId {
        // Already built, or still being built further up the stack (cycle)
        if let Some(&id) = self.index.get(&file) {
            return id;
        }

        let id = self.push(file.clone(), NodeKind::Source);
        let mut children = Vec::new();

        for target in resolve_includes(&file, &self.root) {
            let child = if !target.is_file() {
                debug!("include {} not found, tracking as placeholder", target.display());
                self.placeholder(target, NodeKind::Missing)
            } else if !target.starts_with(&self.root) {
                debug!("include {} is outside the root, not parsed", target.display());
                self.placeholder(target, NodeKind::OutsideRoot)
            } else {
                self.visit(target)
            };

            if !children.contains(&child) {
                children.push(child);
            }
        }

        self.nodes[id.0].children = children;
        id
    }

    fn placeholder(&mut self, file: PathBuf, kind: NodeKind) -> NodeId {
        match self.index.get(&file) {
            Some(&id) => id,
            None => self.push(file, kind),
        }
    }

    fn push(&mut self, file: PathBuf, kind: NodeKind) -> NodeId {
        let id = NodeId(self.nodes.len());
        self.index.insert(file.clone(), id);
        self.nodes.push(DependencyNode {
            file,
            children: Vec::new(),
            kind,
        });
        id
    }

    pub fn node(&self, id: NodeId) -> &DependencyNode {
        &self.nodes[id.0]
    }

    pub fn file(&self, id: NodeId) -> &Path {
        &self.nodes[id.0].file
    }

    pub fn lookup(&self, path: &Path) -> Option<NodeId> {
        self.index.get(&normalize_path(path)).copied()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn is_self(&self, id: NodeId, path: &Path) -> bool {
        self.file(id) == normalize_path(path)
    }

    /// Every file reachable from `id` through include edges, without `id`'s
    /// own file.
    pub fn dependencies(&self, id: NodeId) -> BTreeSet<PathBuf> {
        let mut seen = HashSet::from([id]);
        let mut stack = self.node(id).children.clone();
        let mut files = BTreeSet::new();

        while let Some(next) = stack.pop() {
            if !seen.insert(next) {
                continue;
            }
            let node = self.node(next);
            files.insert(node.file.clone());
            stack.extend(node.children.iter().copied());
        }

        files
    }

    pub fn dependencies_with_self(&self, id: NodeId) -> BTreeSet<PathBuf> {
        let mut files = self.dependencies(id);
        files.insert(self.file(id).to_path_buf());
        files
    }

    /// Parent lists, indexed by child.
    fn reverse_edges(&self) -> Vec<Vec<NodeId>> {
        let mut parents = vec![Vec::new(); self.nodes.len()];
        for (idx, node) in self.nodes.iter().enumerate() {
            for child in &node.children {
                parents[child.0].push(NodeId(idx));
            }
        }
        parents
    }
}

/// Dirty flags for one build. Flags are only ever added.
///
/// Marking a node also flags every node that includes it, directly or not,
/// so [`DirtySet::is_dirty`] is a plain lookup.
#[derive(Debug)]
pub struct DirtySet<'g> {
    graph: &'g DependencyGraph,
    parents: Vec<Vec<NodeId>>,
    marked: HashSet<NodeId>,
    dirty: HashSet<NodeId>,
}

impl<'g> DirtySet<'g> {
    pub fn new(graph: &'g DependencyGraph) -> Self {
        Self {
            graph,
            parents: graph.reverse_edges(),
            marked: HashSet::new(),
            dirty: HashSet::new(),
        }
    }

    /// Flags the node whose own file is `changed`. Returns false when no node
    /// in the graph has that identity.
    pub fn mark_dirty(&mut self, changed: &Path) -> bool {
        let Some(id) = self.graph.lookup(changed) else {
            return false;
        };

        self.marked.insert(id);

        let mut pending = vec![id];
        while let Some(next) = pending.pop() {
            if self.dirty.insert(next) {
                pending.extend(self.parents[next.0].iter().copied());
            }
        }

        true
    }

    /// True if the node itself or anything it includes was marked.
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.dirty.contains(&id)
    }

    /// True only for nodes marked by their own path.
    pub fn is_marked(&self, id: NodeId) -> bool {
        self.marked.contains(&id)
    }
}

/// Extracts the include directive from one source line, if any.
pub fn parse_include(line: &str) -> Option<IncludeDirective> {
    let idx = line.find(INCLUDE_TOKEN)?;
    let caps = INCLUDE_RE.captures(&line[idx + INCLUDE_TOKEN.len()..])?;

    if let Some(target) = caps.get(1) {
        Some(IncludeDirective {
            style: IncludeStyle::System,
            target: target.as_str().to_string(),
        })
    } else {
        caps.get(2).map(|target| IncludeDirective {
            style: IncludeStyle::Local,
            target: target.as_str().to_string(),
        })
    }
}

/// Maps a directive to the file it names.
pub fn resolve_include(directive: &IncludeDirective, including_file: &Path, root: &Path) -> PathBuf {
    let mut path = match directive.style {
        IncludeStyle::System => root.join(INCLUDE_DIR),
        IncludeStyle::Local => including_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| root.to_path_buf()),
    };

    for part in directive.target.split(['/', '\\']).filter(|p| !p.is_empty()) {
        path.push(part);
    }

    normalize_path(&path)
}

/// Resolved, de-duplicated include targets of `file` in source order.
fn resolve_includes(file: &Path, root: &Path) -> Vec<PathBuf> {
    let text = match read_source(file) {
        Ok(text) => text,
        Err(e) => {
            warn!("failed to read {}: {}; assuming no includes", file.display(), e);
            return Vec::new();
        }
    };

    let mut seen = HashSet::new();
    text.lines()
        .filter_map(parse_include)
        .map(|directive| resolve_include(&directive, file, root))
        .filter(|target| seen.insert(target.clone()))
        .collect()
}

/// Reads a source file saved either as UTF-16LE (with BOM) or as 8-bit text.
/// 8-bit text that is not valid UTF-8 is decoded lossily.
fn read_source(file: &Path) -> anyhow::Result<String> {
    let bytes = fs::read(file)?;

    if let Some(rest) = bytes.strip_prefix(&[0xff, 0xfe]) {
        return Ok(decode_utf16le(rest)?);
    }

    let bytes = bytes.strip_prefix(&[0xef, 0xbb, 0xbf]).unwrap_or(&bytes);
    Ok(String::from_utf8_lossy(bytes).into_owned())
}

/// Absolute path with `.` and `..` folded. Symlinks are left alone.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf());
    let mut normalized = PathBuf::new();

    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if matches!(normalized.components().next_back(), Some(Component::Normal(_))) {
                    normalized.pop();
                }
            }
            other => normalized.push(other.as_os_str()),
        }
    }

    normalized
}
