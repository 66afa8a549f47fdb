//! Read-only graph visualization: DOT (Graphviz), Mermaid, and ASCII
//! renderers over an already-validated [`Graph`]. Grounded on the teacher's
//! `langgraph_core::visualization` module, adapted to this crate's node/edge
//! shape — a flat `Vec<Edge>` instead of a `HashMap<NodeId, Vec<Edge>>`, and
//! `NodeKind` instead of a `reads`/`writes`/`subgraph` node spec. Has no
//! effect on execution; it only reads a [`Graph`] after the fact.

use crate::graph::{Edge, Graph, END, START};
use crate::node::NodeKind;
use std::collections::HashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VisualizationFormat {
    Dot,
    Mermaid,
    Ascii,
}

#[derive(Debug, Clone)]
pub struct VisualizationOptions {
    pub format: VisualizationFormat,
    pub include_details: bool,
    pub title: Option<String>,
}

impl Default for VisualizationOptions {
    fn default() -> Self {
        Self { format: VisualizationFormat::Dot, include_details: false, title: None }
    }
}

impl VisualizationOptions {
    pub fn dot() -> Self {
        Self { format: VisualizationFormat::Dot, ..Default::default() }
    }

    pub fn mermaid() -> Self {
        Self { format: VisualizationFormat::Mermaid, ..Default::default() }
    }

    pub fn ascii() -> Self {
        Self { format: VisualizationFormat::Ascii, ..Default::default() }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_details(mut self) -> Self {
        self.include_details = true;
        self
    }
}

pub fn visualize(graph: &Graph, options: &VisualizationOptions) -> String {
    match options.format {
        VisualizationFormat::Dot => visualize_dot(graph, options),
        VisualizationFormat::Mermaid => visualize_mermaid(graph, options),
        VisualizationFormat::Ascii => visualize_ascii(graph),
    }
}

fn node_label(id: &str, kind: &NodeKind, include_details: bool) -> String {
    if include_details {
        format!("{}\\n{}", id, kind.label())
    } else {
        id.to_string()
    }
}

fn visualize_dot(graph: &Graph, options: &VisualizationOptions) -> String {
    let mut out = String::new();
    out.push_str("digraph G {\n");
    out.push_str("    rankdir=TB;\n");
    out.push_str("    node [shape=box, style=rounded];\n");
    if let Some(title) = &options.title {
        out.push_str("    labelloc=\"t\";\n");
        out.push_str(&format!("    label=\"{}\";\n", escape_dot(title)));
    }
    out.push_str(&format!("    \"{START}\" [shape=circle, style=filled, fillcolor=green];\n"));
    out.push_str(&format!("    \"{END}\" [shape=circle, style=filled, fillcolor=red];\n"));

    for (id, spec) in &graph.nodes {
        let label = node_label(id, &spec.kind, options.include_details);
        let color = match spec.kind {
            NodeKind::Subagent { .. } => ", fillcolor=lightblue, style=\"rounded,filled\"",
            NodeKind::Router { .. } => ", fillcolor=lightyellow, style=\"rounded,filled\"",
            _ => "",
        };
        out.push_str(&format!(
            "    \"{}\" [label=\"{}\"{}];\n",
            escape_dot(id),
            escape_dot(&label),
            color
        ));
    }

    for edge in &graph.edges {
        match edge {
            Edge::Direct { from, to } => {
                out.push_str(&format!("    \"{}\" -> \"{}\";\n", escape_dot(from), escape_dot(to)));
            }
            Edge::OnFailure { from, to } => {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"on failure\", color=red, style=dashed];\n",
                    escape_dot(from),
                    escape_dot(to)
                ));
            }
            Edge::Conditional { from, then, otherwise, .. } => {
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"true\", style=dashed];\n",
                    escape_dot(from),
                    escape_dot(then)
                ));
                out.push_str(&format!(
                    "    \"{}\" -> \"{}\" [label=\"false\", style=dashed];\n",
                    escape_dot(from),
                    escape_dot(otherwise)
                ));
            }
        }
    }

    out.push_str("}\n");
    out
}

fn visualize_mermaid(graph: &Graph, options: &VisualizationOptions) -> String {
    let mut out = String::new();
    out.push_str("graph TD\n");
    if let Some(title) = &options.title {
        out.push_str(&format!("    title[\"{}\"]\n", escape_mermaid(title)));
    }

    out.push_str(&format!("    {}((START))\n", sanitize_id(START)));
    out.push_str(&format!("    style {} fill:#90EE90,stroke:#228B22,stroke-width:3px\n", sanitize_id(START)));
    out.push_str(&format!("    {}((END))\n", sanitize_id(END)));
    out.push_str(&format!("    style {} fill:#FFB6C1,stroke:#DC143C,stroke-width:3px\n", sanitize_id(END)));

    for (id, spec) in &graph.nodes {
        let label = node_label(id, &spec.kind, options.include_details);
        let (open, close, fill, stroke) = match spec.kind {
            NodeKind::Router { .. } => ("{", "}", "#FFE4B5", "#FF8C00"),
            NodeKind::Subagent { .. } => ("[[", "]]", "#ADD8E6", "#4682B4"),
            NodeKind::Pause => ("([", "])", "#E6E6FA", "#8A2BE2"),
            _ => ("[", "]", "#F0F0F0", "#666"),
        };
        out.push_str(&format!("    {}{}\"{}\"{}\n", sanitize_id(id), open, escape_mermaid(&label), close));
        out.push_str(&format!("    style {} fill:{fill},stroke:{stroke},stroke-width:2px\n", sanitize_id(id)));
    }

    for edge in &graph.edges {
        match edge {
            Edge::Direct { from, to } => {
                out.push_str(&format!("    {} --> {}\n", sanitize_id(from), sanitize_id(to)));
            }
            Edge::OnFailure { from, to } => {
                out.push_str(&format!("    {} -.\"on failure\"..-> {}\n", sanitize_id(from), sanitize_id(to)));
            }
            Edge::Conditional { from, then, otherwise, .. } => {
                out.push_str(&format!("    {} -.\"true\"..-> {}\n", sanitize_id(from), sanitize_id(then)));
                out.push_str(&format!("    {} -.\"false\"..-> {}\n", sanitize_id(from), sanitize_id(otherwise)));
            }
        }
    }

    out
}

fn visualize_ascii(graph: &Graph) -> String {
    let mut out = String::new();
    out.push_str("Graph Structure:\n");
    out.push_str("================\n\n");
    out.push_str(&format!("START ({}) ->\n", graph.entry));

    let mut seen = HashSet::new();
    for (id, spec) in &graph.nodes {
        if !seen.insert(id.clone()) {
            continue;
        }
        out.push_str(&format!("\n[{}] ({})\n", id, spec.kind.label()));
        for edge in graph.edges_from(id) {
            match edge {
                Edge::Direct { to, .. } => out.push_str(&format!("  -> {to}\n")),
                Edge::OnFailure { to, .. } => out.push_str(&format!("  -> (on failure) {to}\n")),
                Edge::Conditional { then, otherwise, .. } => {
                    out.push_str(&format!("  -> (conditional) true: {then}, false: {otherwise}\n"));
                }
            }
        }
    }

    out.push_str("\nEND\n");
    out
}

fn escape_dot(s: &str) -> String {
    s.replace('\\', "\\\\").replace('"', "\\\"").replace('\n', "\\n")
}

fn escape_mermaid(s: &str) -> String {
    s.replace('"', "&quot;").replace('<', "&lt;").replace('>', "&gt;")
}

fn sanitize_id(s: &str) -> String {
    s.replace("__", "").replace('-', "_").replace('.', "_")
}
