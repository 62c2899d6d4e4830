//! Include tree visualization.
//!
//! `mqbuild tree Indicators/Test2.mq4` prints the include graph below one
//! source file:
//!
//! ```text
//! Indicators/Test2.mq4
//! ├── Include/Inc1.mqh
//! ├── Include/Inc2.mqh
//! │   └── Include/Inc1.mqh (shown above)
//! └── Include/Inc3.mqh (missing)
//! ```

use crate::build::deps::{DependencyGraph, NodeId, NodeKind};
use colored::*;
use std::collections::HashSet;
use std::path::Path;

/// Renders the tree without colors, one line per entry.
pub fn render_tree(graph: &DependencyGraph, id: NodeId, label: &str) -> Vec<String> {
    let mut lines = vec![label.to_string()];
    let mut expanded = HashSet::from([id]);
    render_children(graph, id, "", &mut expanded, &mut lines);
    lines
}

fn render_children(
    graph: &DependencyGraph,
    id: NodeId,
    indent: &str,
    expanded: &mut HashSet<NodeId>,
    lines: &mut Vec<String>,
) {
    let children = graph.node(id).children();
    for (i, &child) in children.iter().enumerate() {
        let is_last = i == children.len() - 1;
        let prefix = if is_last { "└──" } else { "├──" };
        let node = graph.node(child);
        let name = display_path(graph.root(), node.file());

        if node.kind() == NodeKind::Missing {
            lines.push(format!("{indent}{prefix} {name} (missing)"));
        } else if node.kind() == NodeKind::OutsideRoot {
            lines.push(format!("{indent}{prefix} {name} (outside root)"));
        } else if !expanded.insert(child) {
            lines.push(format!("{indent}{prefix} {name} (shown above)"));
        } else {
            lines.push(format!("{indent}{prefix} {name}"));
            let next = format!("{indent}{}", if is_last { "    " } else { "│   " });
            render_children(graph, child, &next, expanded, lines);
        }
    }
}

fn display_path(root: &Path, file: &Path) -> String {
    match file.strip_prefix(root) {
        Ok(rel) => rel.to_string_lossy().replace('\\', "/"),
        Err(_) => file.display().to_string(),
    }
}

pub fn print_tree(graph: &DependencyGraph, id: NodeId, label: &str) {
    let lines = render_tree(graph, id, label);
    let mut iter = lines.into_iter();

    if let Some(first) = iter.next() {
        println!("{}", first.bold().cyan());
    }
    for line in iter {
        if line.ends_with("(missing)") {
            println!("{}", line.red());
        } else if line.ends_with("(outside root)") {
            println!("{}", line.yellow());
        } else if line.ends_with("(shown above)") {
            println!("{}", line.dimmed());
        } else {
            println!("{}", line);
        }
    }

    if graph.node(id).children().is_empty() {
        println!("└── (no includes)");
    }
}
