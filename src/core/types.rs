//! Plan tree and wire types.
//!
//! A molecule compiles into a [`Plan`]: a binary tree whose leaves are
//! [`Block`]s (one repeated dispatch each) and whose inner nodes are
//! [`Operator`]s joining two sub-plans sequentially or in parallel.
//! [`Capture`] is the JSON document every service answers with.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// Plan tree
// ============================================================================

/// How the repetitions of a block are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    /// Each repetition waits for the previous one (`s`).
    #[default]
    Sequential,
    /// All repetitions run together (`p`).
    Parallel,
}

impl Mode {
    /// Parse a mode word. Only `s` and `p` are accepted.
    pub fn from_word(word: &str) -> Option<Self> {
        match word {
            "s" => Some(Self::Sequential),
            "p" => Some(Self::Parallel),
            _ => None,
        }
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sequential => write!(f, "s"),
            Self::Parallel => write!(f, "p"),
        }
    }
}

/// The work a block dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Leaf {
    /// Content names an atom; handled by that atom's service.
    Atom,
    /// Content is molecule text, evaluated by a peer engine.
    Bond,
}

impl fmt::Display for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Atom => write!(f, "atom"),
            Self::Bond => write!(f, "bond"),
        }
    }
}

/// A repeated, moded unit wrapping one dispatch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    /// Repetition count (always >= 1)
    pub times: usize,

    /// Scheduling of the repetitions
    pub mode: Mode,

    /// Atom symbol (with inline annotations) or raw nested molecule text
    pub content: String,

    /// Annotations following the closing bracket
    pub annotations: IndexMap<String, String>,

    /// Parsed view of atom content (`symbol,key:value,...`); set by the
    /// molecule parser on atom leaves
    pub atom: Option<AtomCall>,
}

/// Atom symbol plus the annotations written inside its brackets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AtomCall {
    pub symbol: String,
    pub annotations: IndexMap<String, String>,
}

impl Block {
    /// A single sequential block with no annotations.
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            times: 1,
            mode: Mode::Sequential,
            content: content.into(),
            annotations: IndexMap::new(),
            atom: None,
        }
    }

    /// Classify the content: a leading letter means an atom, anything else
    /// is forwarded to a bond.
    pub fn leaf(&self) -> Leaf {
        match self.content.chars().next() {
            Some(c) if c.is_alphabetic() => Leaf::Atom,
            _ => Leaf::Bond,
        }
    }

    pub fn leaf_count(&self) -> usize {
        self.times
    }
}

impl fmt::Display for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}[{}]", self.times, self.mode, self.content)?;
        for (key, value) in &self.annotations {
            write!(f, ",{}:{}", key, value)?;
        }
        Ok(())
    }
}

/// Joining rule of an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperatorKind {
    /// `^`: left fully, then right fully.
    SequentialThen,
    /// `*`: left and right concurrently.
    ParallelBoth,
}

impl OperatorKind {
    pub fn symbol(self) -> char {
        match self {
            Self::SequentialThen => '^',
            Self::ParallelBoth => '*',
        }
    }
}

/// Binary join of two sub-plans.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operator {
    pub left: Box<Plan>,
    pub right: Box<Plan>,
    pub kind: OperatorKind,
}

impl Operator {
    pub fn new(kind: OperatorKind, left: Plan, right: Plan) -> Self {
        Self {
            left: Box::new(left),
            right: Box::new(right),
            kind,
        }
    }

    /// Saturates at `usize::MAX` instead of wrapping.
    pub fn leaf_count(&self) -> usize {
        self.left.leaf_count().saturating_add(self.right.leaf_count())
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.left, self.kind.symbol(), self.right)
    }
}

/// Compiled molecule, ready for execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Plan {
    Block(Block),
    Operator(Operator),
}

impl Plan {
    /// Number of dispatches a fault-free run performs. Sizes the result sink.
    pub fn leaf_count(&self) -> usize {
        match self {
            Self::Block(block) => block.leaf_count(),
            Self::Operator(op) => op.leaf_count(),
        }
    }

    /// Canonical textual form, e.g. `5s[Ur,log:1]^1p[H]`.
    pub fn render(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block(block) => block.fmt(f),
            Self::Operator(op) => op.fmt(f),
        }
    }
}

impl From<Block> for Plan {
    fn from(block: Block) -> Self {
        Self::Block(block)
    }
}

impl From<Operator> for Plan {
    fn from(op: Operator) -> Self {
        Self::Operator(op)
    }
}

// ============================================================================
// Wire types
// ============================================================================

/// Terminal descriptor returned by an atom service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtomDescriptor {
    pub symbol: String,
    pub name: String,
    pub number: u32,
    pub period: u32,
    pub group: u32,
}

/// Structured capture of one service hop and everything below it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capture {
    /// Service identity
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,

    /// Inbound request path
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub path: String,

    /// Inbound header snapshot (multi-values joined with `|`)
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub headers: BTreeMap<String, String>,

    /// Child captures, one per successful dispatch
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub bonds: Vec<Capture>,

    /// Set on atom responses
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub atom: Option<AtomDescriptor>,
}

impl Capture {
    /// Total number of atom captures in this subtree.
    pub fn atom_count(&self) -> usize {
        let own = usize::from(self.atom.is_some());
        own + self.bonds.iter().map(Capture::atom_count).sum::<usize>()
    }
}
