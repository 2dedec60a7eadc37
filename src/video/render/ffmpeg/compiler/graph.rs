//! Labelled filter graph.
//!
//! Stages are appended in dependency order, each naming the pads it reads
//! and the labels it produces. Insertion order is a topological order, so
//! the graph is acyclic by construction; [`FilterGraph::validate`] checks
//! the label contract before the graph is rendered for ffmpeg.

use std::collections::{HashMap, HashSet};
use std::fmt;

use anyhow::{Result, bail};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamKind {
    Video,
    Audio,
}

impl StreamKind {
    fn specifier(self) -> &'static str {
        match self {
            StreamKind::Video => "v",
            StreamKind::Audio => "a",
        }
    }
}

/// Where a stage reads from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Pad {
    /// First stream of the given kind in input file `index`
    Input { index: usize, kind: StreamKind },
    /// Output of an earlier stage
    Label(String),
}

impl Pad {
    pub fn video(index: usize) -> Self {
        Pad::Input {
            index,
            kind: StreamKind::Video,
        }
    }

    pub fn audio(index: usize) -> Self {
        Pad::Input {
            index,
            kind: StreamKind::Audio,
        }
    }

    pub fn label(name: impl Into<String>) -> Self {
        Pad::Label(name.into())
    }
}

impl fmt::Display for Pad {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Pad::Input { index, kind } => write!(f, "[{index}:{}]", kind.specifier()),
            Pad::Label(name) => write!(f, "[{name}]"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Stage {
    pub kind: StreamKind,
    pub inputs: Vec<Pad>,
    pub filters: Vec<String>,
    pub outputs: Vec<String>,
}

impl Stage {
    fn render(&self) -> String {
        let inputs: String = self.inputs.iter().map(Pad::to_string).collect();
        let outputs: String = self.outputs.iter().map(|o| format!("[{o}]")).collect();
        format!("{inputs}{}{outputs}", self.filters.join(","))
    }
}

#[derive(Debug, Clone, Default)]
pub struct FilterGraph {
    stages: Vec<Stage>,
    mapped: Vec<String>,
}

impl FilterGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a stage: a comma-joined filter chain from `inputs` to `outputs`.
    pub fn push(
        &mut self,
        kind: StreamKind,
        inputs: Vec<Pad>,
        filters: Vec<String>,
        outputs: &[&str],
    ) {
        self.stages.push(Stage {
            kind,
            inputs,
            filters,
            outputs: outputs.iter().map(|o| o.to_string()).collect(),
        });
    }

    /// Single-input, single-output convenience; returns the output pad.
    pub fn chain(&mut self, kind: StreamKind, input: Pad, filters: Vec<String>, output: &str) -> Pad {
        self.push(kind, vec![input], filters, &[output]);
        Pad::label(output)
    }

    /// Mark a label as a `-map` target.
    pub fn map_output(&mut self, label: &str) {
        self.mapped.push(label.to_string());
    }

    pub fn mapped_outputs(&self) -> &[String] {
        &self.mapped
    }

    #[cfg(test)]
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Whether any stage uses a filter with this name.
    #[cfg(test)]
    pub fn uses_filter(&self, name: &str) -> bool {
        self.count_filter(name) > 0
    }

    #[cfg(test)]
    pub fn count_filter(&self, name: &str) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.filters.iter())
            .filter(|f| f.split(['=', '@']).next() == Some(name))
            .count()
    }

    /// How many times a label is read by later stages.
    #[cfg(test)]
    pub fn consumers_of(&self, label: &str) -> usize {
        self.stages
            .iter()
            .flat_map(|s| s.inputs.iter())
            .filter(|p| matches!(p, Pad::Label(l) if l == label))
            .count()
    }

    /// Check the label contract: every read label was produced earlier with
    /// the same stream kind, every produced label is read exactly once or
    /// mapped, and input pads refer to existing input files.
    pub fn validate(&self, input_count: usize) -> Result<()> {
        let mut produced: HashMap<&str, StreamKind> = HashMap::new();
        let mut consumed: HashSet<&str> = HashSet::new();

        for (idx, stage) in self.stages.iter().enumerate() {
            if stage.filters.is_empty() {
                bail!("filter stage {idx} has no filters");
            }
            for pad in &stage.inputs {
                match pad {
                    Pad::Input { index, .. } if *index >= input_count => {
                        bail!("stage {idx} reads input {index} but only {input_count} inputs exist");
                    }
                    Pad::Input { .. } => {}
                    Pad::Label(label) => {
                        match produced.get(label.as_str()) {
                            None => bail!("stage {idx} reads undefined label [{label}]"),
                            Some(kind) if *kind != stage.kind => {
                                bail!("stage {idx} reads [{label}] of the wrong stream kind")
                            }
                            Some(_) => {}
                        }
                        if !consumed.insert(label.as_str()) {
                            bail!("label [{label}] is consumed more than once");
                        }
                    }
                }
            }
            for output in &stage.outputs {
                if produced.insert(output.as_str(), stage.kind).is_some() {
                    bail!("label [{output}] is produced more than once");
                }
            }
        }

        for label in &self.mapped {
            if !produced.contains_key(label.as_str()) {
                bail!("mapped label [{label}] is never produced");
            }
            if consumed.contains(label.as_str()) {
                bail!("mapped label [{label}] is also consumed by a filter");
            }
        }
        for label in produced.keys() {
            if !consumed.contains(label) && !self.mapped.iter().any(|m| m == label) {
                bail!("label [{label}] is produced but never used");
            }
        }
        Ok(())
    }

    /// The `-filter_complex` argument.
    pub fn render(&self) -> String {
        self.stages
            .iter()
            .map(Stage::render)
            .collect::<Vec<_>>()
            .join(";")
    }
}
