//! # Parse Tree Types
//!
//! The generic labelled tree handed to the semantic analyser.
//!
//! ## Shape
//! ```text
//! Node
//!   ├── kind: NodeKind      (closed vocabulary: Score, Note, Barline, ...)
//!   ├── value: Option<String>  (literal text of atoms: "c4", "q", "2")
//!   ├── children: Vec<Node>
//!   └── locator: Locator    (line/column of the opening token)
//! ```
//!
//! Elements are written `(name child child ...)`. Atoms inside an element
//! become leaf nodes of kind `Label`, `Number` or `String`.

use serde::Serialize;

/// Source position of a node, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Locator {
    pub line: usize,
    pub column: usize,
}

/// Node types. Element kinds map one-to-one onto element names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Document,
    Version,
    Content,
    Score,
    Opt,
    Title,
    Paragraph,
    Instrument,
    Name,
    InfoMidi,
    Staves,
    MusicData,
    Note,
    Rest,
    Chord,
    Clef,
    Key,
    Time,
    Barline,
    Times,
    Volta,
    GoBack,
    GoFwd,
    Tie,
    Slur,
    Beam,
    Tuplet,
    // atoms
    Label,
    Number,
    String,
}

impl NodeKind {
    /// Element kind for an element name, `None` if outside the vocabulary.
    pub fn from_name(name: &str) -> Option<Self> {
        let kind = match name {
            "lenmusdoc" => NodeKind::Document,
            "vers" => NodeKind::Version,
            "content" => NodeKind::Content,
            "score" => NodeKind::Score,
            "opt" => NodeKind::Opt,
            "title" => NodeKind::Title,
            "para" => NodeKind::Paragraph,
            "instrument" => NodeKind::Instrument,
            "name" => NodeKind::Name,
            "infoMIDI" => NodeKind::InfoMidi,
            "staves" => NodeKind::Staves,
            "musicData" => NodeKind::MusicData,
            "n" => NodeKind::Note,
            "r" => NodeKind::Rest,
            "chord" => NodeKind::Chord,
            "clef" => NodeKind::Clef,
            "key" => NodeKind::Key,
            "time" => NodeKind::Time,
            "barline" => NodeKind::Barline,
            "times" => NodeKind::Times,
            "volta" => NodeKind::Volta,
            "goBack" => NodeKind::GoBack,
            "goFwd" => NodeKind::GoFwd,
            "tie" => NodeKind::Tie,
            "slur" => NodeKind::Slur,
            "beam" => NodeKind::Beam,
            "t" => NodeKind::Tuplet,
            _ => return None,
        };
        Some(kind)
    }

    pub fn name(self) -> &'static str {
        match self {
            NodeKind::Document => "lenmusdoc",
            NodeKind::Version => "vers",
            NodeKind::Content => "content",
            NodeKind::Score => "score",
            NodeKind::Opt => "opt",
            NodeKind::Title => "title",
            NodeKind::Paragraph => "para",
            NodeKind::Instrument => "instrument",
            NodeKind::Name => "name",
            NodeKind::InfoMidi => "infoMIDI",
            NodeKind::Staves => "staves",
            NodeKind::MusicData => "musicData",
            NodeKind::Note => "n",
            NodeKind::Rest => "r",
            NodeKind::Chord => "chord",
            NodeKind::Clef => "clef",
            NodeKind::Key => "key",
            NodeKind::Time => "time",
            NodeKind::Barline => "barline",
            NodeKind::Times => "times",
            NodeKind::Volta => "volta",
            NodeKind::GoBack => "goBack",
            NodeKind::GoFwd => "goFwd",
            NodeKind::Tie => "tie",
            NodeKind::Slur => "slur",
            NodeKind::Beam => "beam",
            NodeKind::Tuplet => "t",
            NodeKind::Label => "label",
            NodeKind::Number => "number",
            NodeKind::String => "string",
        }
    }

    pub fn is_atom(self) -> bool {
        matches!(self, NodeKind::Label | NodeKind::Number | NodeKind::String)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    pub kind: NodeKind,
    pub value: Option<String>,
    pub children: Vec<Node>,
    pub locator: Locator,
}

impl Node {
    pub fn element(kind: NodeKind, children: Vec<Node>, locator: Locator) -> Self {
        Self {
            kind,
            value: None,
            children,
            locator,
        }
    }

    pub fn atom(kind: NodeKind, value: impl Into<String>, locator: Locator) -> Self {
        Self {
            kind,
            value: Some(value.into()),
            children: Vec::new(),
            locator,
        }
    }

    pub fn is(&self, kind: NodeKind) -> bool {
        self.kind == kind
    }

    /// Literal text of an atom, empty for elements.
    pub fn text(&self) -> &str {
        self.value.as_deref().unwrap_or("")
    }

    /// First child of the given kind.
    pub fn child(&self, kind: NodeKind) -> Option<&Node> {
        self.children.iter().find(|c| c.kind == kind)
    }

    /// Integer value of a `Number` atom.
    pub fn as_integer(&self) -> Option<i64> {
        if self.kind != NodeKind::Number {
            return None;
        }
        self.text().parse().ok()
    }

    /// Atoms that are labels or numbers, in order.
    pub fn atoms(&self) -> impl Iterator<Item = &Node> {
        self.children.iter().filter(|c| c.kind.is_atom())
    }
}
