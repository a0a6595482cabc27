//! DOT rendering of the global task graph: one cluster per process,
//! dotted arrows for cross-process communications, and the critical path
//! in red. Node fill follows scheduling order, early tasks dark.

use std::fs::File;
use std::io::{BufWriter, Write};

use log::info;

use crate::config::Config;
use crate::graph::{GlobalGraph, Node, NodeId, ProcessGraph};
use crate::pass::{Env, Pass};

const GRADIENT_FROM: [u8; 3] = [180, 0, 0];
const GRADIENT_TO: [u8; 3] = [255, 255, 255];

fn fill_color(node: &Node, last_schedule_id: u32) -> String {
    let f = if last_schedule_id == 0 {
        1.0
    } else {
        let linear = node.schedule_id as f64 / last_schedule_id as f64;
        linear * linear
    };
    let channel = |i: usize| {
        ((1.0 - f) * GRADIENT_FROM[i] as f64 + f * GRADIENT_TO[i] as f64).round() as u8
    };
    format!("#{:02x}{:02x}{:02x}", channel(0), channel(1), channel(2))
}

fn on_critical_edge(a: &Node, b: &Node) -> bool {
    match (a.critical_index, b.critical_index) {
        (Some(i), Some(j)) => j == i + 1,
        _ => false,
    }
}

pub struct DotPass;

impl DotPass {
    pub fn new() -> DotPass {
        DotPass
    }

    fn render_process<W: Write>(
        &self,
        out: &mut W,
        graph: &ProcessGraph,
    ) -> std::io::Result<()> {
        writeln!(out, "    subgraph cluster_P{}", graph.pid)?;
        writeln!(out, "    {{")?;
        writeln!(out, "        label=\"Process {}\";", graph.pid)?;
        writeln!(out, "        color=\"#aaaaaa\";")?;
        for node in graph.nodes.values() {
            let mut label = node.label.clone();
            label.push_str(&format!("\\n{:.6}", node.time as f64 * 1e-6));
            let mut attrs = format!(
                "style=filled, fillcolor=\"{}\", label=\"{}\"",
                fill_color(node, graph.last_schedule_id),
                label
            );
            if node.critical_index.is_some() {
                attrs.push_str(", color=red, penwidth=2");
            }
            writeln!(out, "        {} [{}];", node.id, attrs)?;
        }
        for node in graph.nodes.values() {
            for succ_uid in &node.successors {
                let succ = match graph.nodes.get(succ_uid) {
                    Some(succ) => succ,
                    None => continue,
                };
                let mut line = format!("        {} -> {}", node.id, succ.id);
                if on_critical_edge(node, succ) {
                    line.push_str(" [color=red, penwidth=2]");
                }
                writeln!(out, "{line};")?;
            }
        }
        writeln!(out, "    }}")?;
        Ok(())
    }

    fn render<W: Write>(&self, out: &mut W, graph: &GlobalGraph) -> std::io::Result<()> {
        writeln!(out, "digraph G")?;
        writeln!(out, "{{")?;
        for process in graph.graphs.values() {
            self.render_process(out, process)?;
        }
        for (from, targets) in &graph.send_to_recv {
            for to in targets {
                let mut attrs = vec!["style=dotted"];
                if self.critical_remote(graph, *from, *to) {
                    attrs.push("color=red");
                }
                writeln!(out, "    {from} -> {to} [{}];", attrs.join(", "))?;
            }
        }
        writeln!(out, "}}")?;
        Ok(())
    }

    fn critical_remote(&self, graph: &GlobalGraph, from: NodeId, to: NodeId) -> bool {
        match (graph.node(from), graph.node(to)) {
            (Some(a), Some(b)) => on_critical_edge(a, b),
            _ => false,
        }
    }
}

impl Default for DotPass {
    fn default() -> Self {
        Self::new()
    }
}

impl Pass for DotPass {
    fn name(&self) -> &'static str {
        "dot"
    }

    fn requires(&self) -> &'static [&'static str] {
        &["critical"]
    }

    fn on_end(&mut self, env: &mut Env, config: &Config) -> anyhow::Result<()> {
        let path = config.artifact(".dot");
        info!("writing `{}` to disk...", path.display());
        let file = File::create(&path)?;
        let mut writer = BufWriter::new(file);
        self.render(&mut writer, &env.graph)?;
        writer.flush()?;
        Ok(())
    }
}
