//! # Semantic Analysis Module
//!
//! Turns a parse tree into the linked internal model ([`Document`]).
//!
//! ## Purpose
//! The parse tree only knows element names and atoms. This module walks it
//! once, pre-order and left to right, and:
//! - validates each node against the grammar of its construct
//! - lays notes, rests and other staff objects on per-instrument timelines
//! - resolves relations whose endpoints are separate notes (ties, slurs,
//!   beams, tuplets) through one [`RelationBuilder`] per kind
//! - resolves the keyless legacy `l` and `g+`/`g-` markers
//! - fills beam segment types with [`auto_beam`] when none are written
//!
//! ## Error Policy
//! A node whose shape is wrong is reported as a grammar error and skipped
//! (no object is produced for it). Relation problems are reported and
//! recovered locally. Only a root that is not a document fails the run.
//!
//! ## State
//! Everything mutable lives in the analysis context of the score being
//! analysed: relation registries, legacy resolvers, the time cursor and the
//! inherited defaults (staff, voice, tuplet display) that are saved on
//! instrument and `musicData` entry and restored on exit. Scores in one
//! document are therefore independent.
//!
//! ## Example
//! ```rust
//! use scorec::{analyse, parse, Config};
//!
//! let tree = parse("(score (vers 2.0) (instrument (musicData (n c4 q (tie 1 start))(n c4 e (tie 1 stop)))))")?;
//! let analysis = analyse(&tree, &Config::default())?;
//! let score = analysis.document.score(0).unwrap();
//! assert_eq!(score.relations.len(), 1);
//! assert!(analysis.diagnostics.is_empty());
//! # Ok::<(), scorec::ScoreError>(())
//! ```

mod autobeam;
mod legacy;
mod relations;

use std::collections::HashMap;

pub use autobeam::auto_beam;
pub use legacy::{OldBeamResolver, OldTieResolver};
pub use relations::{
    BeamRules, Closed, Endpoint, RelationBuilder, RelationRules, Role, SlurRules, TieRules,
    TupletRules, TupletSpec,
};

use crate::config::Config;
use crate::error::{DiagnosticKind, Diagnostics, ScoreError};
use crate::model::*;
use crate::tree::{Locator, Node, NodeKind};

/// Result of one analysis run: exactly one document plus the recoverable
/// problems found on the way.
#[derive(Debug)]
pub struct Analysis {
    pub document: Document,
    pub diagnostics: Diagnostics,
}

/// Analyse a parse tree. A bare `score` root is wrapped into a one-score
/// document; any other root that is not `lenmusdoc` is rejected.
pub fn analyse(tree: &Node, config: &Config) -> Result<Analysis, ScoreError> {
    let mut diagnostics = Diagnostics::new();
    let document = match tree.kind {
        NodeKind::Document => {
            let mut analyser = DocumentAnalyser::new(config, &mut diagnostics);
            analyser.analyse(tree);
            analyser.document
        }
        NodeKind::Score => {
            let score = ScoreContext::new(config, &mut diagnostics).analyse(tree);
            Document {
                version: String::new(),
                content: vec![ContentItem::Score(score)],
            }
        }
        other => {
            return Err(ScoreError::NotADocument {
                found: other.name().to_string(),
            })
        }
    };
    log::debug!(
        "analysed document with {} content items, {} diagnostics",
        document.content.len(),
        diagnostics.len()
    );
    Ok(Analysis {
        document,
        diagnostics,
    })
}

fn grammar_error(diagnostics: &mut Diagnostics, node: &Node, message: impl Into<String>) {
    diagnostics.record(DiagnosticKind::GrammarError, Some(node.locator), message);
}

/// Text of the first string atom of an element.
fn string_atom(node: &Node) -> Option<String> {
    node.child(NodeKind::String).map(|s| s.text().to_string())
}

/// Leading numeric key of a relation marker (0 when absent) and the
/// remaining atoms.
fn split_key(node: &Node) -> (u32, Vec<&Node>) {
    let atoms: Vec<&Node> = node.atoms().collect();
    match atoms.first().and_then(|a| a.as_integer()) {
        Some(key) if key >= 0 => (key as u32, atoms[1..].to_vec()),
        _ => (0, atoms),
    }
}

fn small_integer(node: Option<&&Node>, range: std::ops::RangeInclusive<i64>) -> Option<u8> {
    node.and_then(|n| n.as_integer())
        .filter(|v| range.contains(v))
        .map(|v| v as u8)
}

struct DocumentAnalyser<'a> {
    config: &'a Config,
    diagnostics: &'a mut Diagnostics,
    document: Document,
    /// Index in `document.content` of the last analysed score
    last_score: Option<usize>,
}

impl<'a> DocumentAnalyser<'a> {
    fn new(config: &'a Config, diagnostics: &'a mut Diagnostics) -> Self {
        Self {
            config,
            diagnostics,
            document: Document::default(),
            last_score: None,
        }
    }

    fn analyse(&mut self, node: &Node) {
        for child in &node.children {
            match child.kind {
                NodeKind::Version => match child.atoms().next() {
                    Some(v) => self.document.version = v.text().to_string(),
                    None => grammar_error(self.diagnostics, child, "'vers' requires a version number"),
                },
                NodeKind::Content => self.content(child),
                other => grammar_error(
                    self.diagnostics,
                    child,
                    format!("'{}' is not allowed in 'lenmusdoc'", other.name()),
                ),
            }
        }
    }

    fn content(&mut self, node: &Node) {
        for child in &node.children {
            match child.kind {
                NodeKind::Score => {
                    let score = ScoreContext::new(self.config, self.diagnostics).analyse(child);
                    self.document.content.push(ContentItem::Score(score));
                    self.last_score = Some(self.document.content.len() - 1);
                }
                NodeKind::Paragraph => {
                    let text: Vec<&str> = child
                        .children
                        .iter()
                        .filter(|c| c.kind == NodeKind::String)
                        .map(|c| c.text())
                        .collect();
                    self.document.content.push(ContentItem::Paragraph(text.join(" ")));
                }
                NodeKind::Title => {
                    let score = self.last_score.and_then(|i| match self.document.content.get_mut(i) {
                        Some(ContentItem::Score(score)) => Some(score),
                        _ => None,
                    });
                    match (string_atom(child), score) {
                        (Some(title), Some(score)) => score.title = Some(title),
                        (None, _) => grammar_error(self.diagnostics, child, "'title' requires a string"),
                        (_, None) => grammar_error(self.diagnostics, child, "'title' has no preceding score"),
                    }
                }
                other => grammar_error(
                    self.diagnostics,
                    child,
                    format!("'{}' is not allowed in 'content'", other.name()),
                ),
            }
        }
    }
}

/// Inherited context, saved and restored around instruments and `musicData`.
#[derive(Debug, Clone, Copy)]
struct Defaults {
    staff: u8,
    voice: u8,
    tuplet_bracket: bool,
    tuplet_number: bool,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            staff: 1,
            voice: 1,
            tuplet_bracket: true,
            tuplet_number: true,
        }
    }
}

/// Time position inside the instrument being analysed.
#[derive(Debug, Clone, Copy)]
struct Cursor {
    time: f64,
    measure_start: f64,
    /// Furthest time reached in the current measure by any voice
    max_time: f64,
    measure: u32,
}

impl Default for Cursor {
    fn default() -> Self {
        Self {
            time: 0.0,
            measure_start: 0.0,
            max_time: 0.0,
            measure: 1,
        }
    }
}

impl Cursor {
    fn advance(&mut self, duration: f64) {
        self.time += duration;
        self.max_time = self.max_time.max(self.time);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OldBeamMark {
    Open,
    Close,
}

#[derive(Debug)]
enum Marker {
    Tie(u32, Role),
    Slur(u32, Role),
    Beam(u32, Role, Vec<BeamType>),
    Tuplet(u32, Role, Option<TupletSpec>),
}

/// Validated content of an `n` or `r` element.
#[derive(Debug)]
struct NoteSpec {
    pitch: Option<Pitch>,
    duration: NoteDuration,
    voice: Option<u8>,
    staff: Option<u8>,
    visible: bool,
    old_tie: bool,
    old_beam: Option<OldBeamMark>,
    markers: Vec<Marker>,
}

/// Analysis context of one score.
struct ScoreContext<'a> {
    config: &'a Config,
    diagnostics: &'a mut Diagnostics,
    model: ScoreModel,
    ties: RelationBuilder<TieRules>,
    slurs: RelationBuilder<SlurRules>,
    beams: RelationBuilder<BeamRules>,
    tuplets: RelationBuilder<TupletRules>,
    old_ties: OldTieResolver,
    old_beams: OldBeamResolver,
    defaults: Defaults,
    saved_defaults: Vec<Defaults>,
    timeline: Vec<StaffObject>,
    cursor: Cursor,
    key: KeySignature,
    /// Accidentals written earlier in the current measure, by (step, octave)
    accidentals: HashMap<(Step, i8), i8>,
}

impl<'a> ScoreContext<'a> {
    fn new(config: &'a Config, diagnostics: &'a mut Diagnostics) -> Self {
        Self {
            config,
            diagnostics,
            model: ScoreModel::default(),
            ties: RelationBuilder::new(),
            slurs: RelationBuilder::new(),
            beams: RelationBuilder::new(),
            tuplets: RelationBuilder::new(),
            old_ties: OldTieResolver::new(),
            old_beams: OldBeamResolver::new(),
            defaults: Defaults::default(),
            saved_defaults: Vec::new(),
            timeline: Vec::new(),
            cursor: Cursor::default(),
            key: KeySignature::default(),
            accidentals: HashMap::new(),
        }
    }

    fn error(&mut self, node: &Node, message: impl Into<String>) {
        grammar_error(self.diagnostics, node, message);
    }

    fn push_defaults(&mut self) {
        self.saved_defaults.push(self.defaults);
    }

    fn pop_defaults(&mut self) {
        if let Some(saved) = self.saved_defaults.pop() {
            self.defaults = saved;
        }
    }

    fn analyse(mut self, node: &Node) -> ScoreModel {
        for child in &node.children {
            match child.kind {
                NodeKind::Version => {
                    match child.atoms().next().and_then(|v| ScoreVersion::parse(v.text())) {
                        Some(version) => self.model.version = version,
                        None => self.error(child, "'vers' requires a version number"),
                    }
                }
                NodeKind::Opt => {
                    let atoms: Vec<&Node> = child.atoms().collect();
                    match atoms.as_slice() {
                        [name, value] => {
                            self.model
                                .options
                                .insert(name.text().to_string(), value.text().to_string());
                        }
                        _ => self.error(child, "expected (opt <name> <value>)"),
                    }
                }
                NodeKind::Title => match string_atom(child) {
                    Some(title) => self.model.title = Some(title),
                    None => self.error(child, "'title' requires a string"),
                },
                NodeKind::Instrument => self.instrument(child),
                other => self.error(child, format!("'{}' is not allowed in 'score'", other.name())),
            }
        }

        self.ties.finish(self.diagnostics);
        self.slurs.finish(self.diagnostics);
        self.beams.finish(self.diagnostics);
        self.tuplets.finish(self.diagnostics);
        self.old_ties.finish(self.diagnostics);
        self.old_beams.finish(self.diagnostics);

        log::debug!(
            "score v{}: {} instruments, {} notes/rests, {} relations",
            self.model.version.number(),
            self.model.instruments.len(),
            self.model.notes.len(),
            self.model.relations.len()
        );
        self.model
    }

    fn instrument(&mut self, node: &Node) {
        let mut name = None;
        let mut midi = MidiInfo {
            program: self.config.default_program,
            channel: self.config.default_channel,
        };
        let mut staves = 1;

        self.push_defaults();
        self.timeline.clear();
        self.cursor = Cursor::default();
        self.key = KeySignature::default();
        self.accidentals.clear();

        for child in &node.children {
            match child.kind {
                NodeKind::Name => match string_atom(child) {
                    Some(text) => name = Some(text),
                    None => self.error(child, "'name' requires a string"),
                },
                NodeKind::InfoMidi => {
                    let atoms: Vec<&Node> = child.atoms().collect();
                    let program = small_integer(atoms.first(), 0..=127);
                    let channel = match atoms.get(1) {
                        Some(_) => small_integer(atoms.get(1), 0..=15),
                        None => Some(midi.channel),
                    };
                    match (program, channel, atoms.len()) {
                        (Some(program), Some(channel), 1..=2) => midi = MidiInfo { program, channel },
                        _ => self.error(child, "expected (infoMIDI <program 0..127> [<channel 0..15>])"),
                    }
                }
                NodeKind::Staves => match small_integer(child.atoms().next().as_ref(), 1..=16) {
                    Some(n) => staves = n,
                    None => self.error(child, "'staves' requires a number of staves"),
                },
                NodeKind::MusicData => self.music_data(child),
                other => self.error(child, format!("'{}' is not allowed in 'instrument'", other.name())),
            }
        }

        self.pop_defaults();
        self.model.instruments.push(Instrument {
            name,
            midi,
            staves,
            timeline: std::mem::take(&mut self.timeline),
        });
    }

    fn music_data(&mut self, node: &Node) {
        self.push_defaults();
        for child in &node.children {
            match child.kind {
                NodeKind::Note | NodeKind::Rest => {
                    if let Some(duration) = self.note_rest(child, false) {
                        self.cursor.advance(duration);
                    }
                }
                NodeKind::Chord => self.chord(child),
                NodeKind::Clef => self.clef(child),
                NodeKind::Key => self.key(child),
                NodeKind::Time => self.time_signature(child),
                NodeKind::Barline => self.barline(child),
                NodeKind::Volta => self.volta(child),
                NodeKind::GoBack => self.go_back(child),
                NodeKind::GoFwd => self.go_forward(child),
                other => self.error(child, format!("'{}' is not allowed in 'musicData'", other.name())),
            }
        }
        self.pop_defaults();
    }

    /// All notes of a chord share the cursor time; the cursor then advances
    /// by the duration of the first valid note.
    fn chord(&mut self, node: &Node) {
        let mut advance = None;
        for child in &node.children {
            if child.kind != NodeKind::Note {
                self.error(child, format!("'{}' is not allowed in 'chord'", child.kind.name()));
                continue;
            }
            let duration = self.note_rest(child, advance.is_some());
            if advance.is_none() {
                advance = duration;
            }
        }
        match advance {
            Some(duration) => self.cursor.advance(duration),
            None => self.error(node, "'chord' has no valid notes"),
        }
    }

    /// Place one note or rest at the cursor. Returns its sounding duration;
    /// the caller advances the cursor.
    fn note_rest(&mut self, node: &Node, chord_member: bool) -> Option<f64> {
        let spec = self.read_note_rest(node)?;
        if let Some(voice) = spec.voice {
            self.defaults.voice = voice;
        }
        if let Some(staff) = spec.staff {
            self.defaults.staff = staff;
        }

        let pitch = spec.pitch.map(|p| self.resolve_pitch(p));
        let duration = spec.duration.units() * self.tuplet_scale(&spec.markers);
        let time = self.cursor.time;
        let locator = node.locator;

        let id = self.model.push_note(NoteRest {
            pitch,
            written: spec.duration,
            duration,
            visible: spec.visible,
            voice: self.defaults.voice,
            staff: self.defaults.staff,
            in_chord: chord_member,
            relations: Vec::new(),
            beam: Vec::new(),
            locator,
        });
        self.timeline.push(StaffObject {
            time,
            duration,
            kind: StaffObjectKind::NoteRest(id),
            measure: self.cursor.measure,
            voice: self.defaults.voice,
            staff: self.defaults.staff,
            locator,
        });

        if pitch.is_some() {
            if let Some(pair) = self.old_ties.try_close(id, time, &self.model.notes, self.diagnostics) {
                self.model.push_relation(Relation {
                    kind: RelationKind::Tie,
                    parts: pair.to_vec(),
                    data: RelationData::Tie,
                });
            }
            if spec.old_tie {
                self.old_ties.start(id, time, self.defaults.voice, locator, self.diagnostics);
            }
        }

        match spec.old_beam {
            Some(OldBeamMark::Open) => self.old_beams.open(id, locator),
            Some(OldBeamMark::Close) => {
                if let Some(members) = self.old_beams.close(id, locator, self.diagnostics) {
                    self.add_beam(members, None);
                }
            }
            None if !chord_member => self.old_beams.add(id),
            None => {}
        }

        let mut has_tuplet_marker = false;
        for marker in spec.markers {
            has_tuplet_marker |= matches!(marker, Marker::Tuplet(..));
            self.apply_marker(marker, id, locator);
        }
        if !has_tuplet_marker && !chord_member {
            self.tuplets.continue_all(id, locator);
        }

        Some(duration)
    }

    fn apply_marker(&mut self, marker: Marker, note: NoteRestId, locator: Locator) {
        match marker {
            Marker::Tie(key, role) => {
                let endpoint = Endpoint { key, role, note, locator, payload: () };
                if let Some(closed) = self.ties.add(endpoint, &self.model.notes, self.diagnostics) {
                    self.model.push_relation(closed.relation);
                }
            }
            Marker::Slur(key, role) => {
                let endpoint = Endpoint { key, role, note, locator, payload: () };
                if let Some(closed) = self.slurs.add(endpoint, &self.model.notes, self.diagnostics) {
                    self.model.push_relation(closed.relation);
                }
            }
            Marker::Beam(key, role, levels) => {
                let endpoint = Endpoint { key, role, note, locator, payload: levels };
                if let Some(closed) = self.beams.add(endpoint, &self.model.notes, self.diagnostics) {
                    let explicit = closed.endpoints.into_iter().map(|e| e.payload).collect();
                    self.add_beam(closed.relation.parts, Some(explicit));
                }
            }
            Marker::Tuplet(key, role, spec) => {
                let endpoint = Endpoint { key, role, note, locator, payload: spec };
                if let Some(closed) = self.tuplets.add(endpoint, &self.model.notes, self.diagnostics) {
                    self.model.push_relation(closed.relation);
                }
            }
        }
    }

    /// Store a beam. Explicit segment types are used when every note of the
    /// group has them; otherwise they are computed from the note types.
    fn add_beam(&mut self, parts: Vec<NoteRestId>, explicit: Option<Vec<Vec<BeamType>>>) {
        let explicit = explicit.filter(|levels| {
            parts
                .iter()
                .zip(levels)
                .all(|(id, l)| self.model.note(*id).is_rest() || !l.is_empty())
        });
        match explicit {
            Some(levels) => {
                for (id, l) in parts.iter().zip(levels) {
                    self.model.notes[id.0].beam = l;
                }
            }
            None if self.config.auto_beam => {
                let heads: Vec<NoteRestId> = parts
                    .iter()
                    .copied()
                    .filter(|id| self.model.note(*id).is_note())
                    .collect();
                let types: Vec<NoteType> = heads
                    .iter()
                    .map(|id| self.model.note(*id).written.note_type)
                    .collect();
                for (id, levels) in heads.iter().zip(auto_beam(&types)) {
                    self.model.notes[id.0].beam = levels;
                }
            }
            None => {}
        }
        self.model.push_relation(Relation {
            kind: RelationKind::Beam,
            parts,
            data: RelationData::Beam,
        });
    }

    /// Apply key signature and measure accidentals.
    fn resolve_pitch(&mut self, mut pitch: Pitch) -> Pitch {
        let slot = (pitch.step, pitch.octave);
        pitch.alter = match pitch.accidental {
            Some(alter) => {
                self.accidentals.insert(slot, alter);
                alter
            }
            None => self
                .accidentals
                .get(&slot)
                .copied()
                .unwrap_or_else(|| self.key.alter_for_step(pitch.step)),
        };
        pitch
    }

    /// Product of the ratios of the tuplets open at this note, including
    /// one it starts. An open tuplet whose key this note starts again is
    /// replaced and does not count.
    fn tuplet_scale(&self, markers: &[Marker]) -> f64 {
        let restarted: Vec<u32> = markers
            .iter()
            .filter_map(|m| match m {
                Marker::Tuplet(key, Role::Start, _) => Some(*key),
                _ => None,
            })
            .collect();
        let open: f64 = self
            .tuplets
            .open_starts()
            .filter(|e| !restarted.contains(&e.key))
            .filter_map(|e| e.payload)
            .map(|spec| spec.scale())
            .product();
        let starting: f64 = markers
            .iter()
            .filter_map(|m| match m {
                Marker::Tuplet(_, Role::Start, Some(spec)) => Some(spec.scale()),
                _ => None,
            })
            .product();
        open * starting
    }

    fn read_note_rest(&mut self, node: &Node) -> Option<NoteSpec> {
        let is_note = node.kind == NodeKind::Note;
        let mut items = node.children.iter();

        let pitch = if is_note {
            let pitch = items
                .next()
                .filter(|n| n.kind == NodeKind::Label)
                .and_then(|n| Pitch::parse(n.text()));
            if pitch.is_none() {
                self.error(node, "expected (n <pitch> <duration> ...)");
                return None;
            }
            pitch
        } else {
            None
        };

        let Some(duration) = items
            .next()
            .filter(|n| n.kind == NodeKind::Label)
            .and_then(|n| NoteDuration::parse(n.text()))
        else {
            self.error(node, format!("'{}' requires a valid duration", node.kind.name()));
            return None;
        };

        let mut spec = NoteSpec {
            pitch,
            duration,
            voice: None,
            staff: None,
            visible: true,
            old_tie: false,
            old_beam: None,
            markers: Vec::new(),
        };
        for item in items {
            if let Err(message) = self.read_note_option(item, is_note, &mut spec) {
                self.error(item, message);
            }
        }
        Some(spec)
    }

    fn read_note_option(&mut self, item: &Node, is_note: bool, spec: &mut NoteSpec) -> Result<(), String> {
        match item.kind {
            NodeKind::Label => {
                let text = item.text();
                match text {
                    "noVisible" => spec.visible = false,
                    "l" | "g+" | "g-" if !self.config.legacy_syntax => {
                        return Err(format!("legacy option '{}' is disabled", text));
                    }
                    "l" if is_note => spec.old_tie = true,
                    "l" => return Err("legacy tie 'l' is only allowed on notes".to_string()),
                    "g+" => spec.old_beam = Some(OldBeamMark::Open),
                    "g-" => spec.old_beam = Some(OldBeamMark::Close),
                    _ => {
                        if let Some(voice) = numbered_option(text, 'v') {
                            spec.voice = Some(voice);
                        } else if let Some(staff) = numbered_option(text, 'p') {
                            spec.staff = Some(staff);
                        } else {
                            return Err(format!("unknown option '{}'", text));
                        }
                    }
                }
            }
            NodeKind::Tie if is_note => spec.markers.push(read_tie(item)?),
            NodeKind::Slur => spec.markers.push(read_slur(item)?),
            NodeKind::Beam => spec.markers.push(read_beam(item)?),
            NodeKind::Tuplet => {
                let marker = self.read_tuplet(item)?;
                spec.markers.push(marker);
            }
            other => {
                return Err(format!(
                    "'{}' is not allowed in '{}'",
                    if other.is_atom() { item.text() } else { other.name() },
                    if is_note { "n" } else { "r" }
                ));
            }
        }
        Ok(())
    }

    /// `(t [K] + <actual> <normal> [bracket|noBracket] [number|noNumber])` or `(t [K] -)`.
    /// Display options given here become the inherited defaults.
    fn read_tuplet(&mut self, node: &Node) -> Result<Marker, String> {
        const USAGE: &str = "expected (t [<key>] + <actual> <normal> [options]) or (t [<key>] -)";
        let (key, atoms) = split_key(node);
        let Some((sign, rest)) = atoms.split_first() else {
            return Err(USAGE.to_string());
        };
        match sign.text() {
            "-" if rest.is_empty() => Ok(Marker::Tuplet(key, Role::End, None)),
            "+" => {
                let actual = small_integer(rest.first(), 1..=255).ok_or(USAGE)?;
                let normal = small_integer(rest.get(1), 1..=255).ok_or(USAGE)?;
                let mut bracket = self.defaults.tuplet_bracket;
                let mut number = self.defaults.tuplet_number;
                for option in rest.iter().skip(2) {
                    match option.text() {
                        "bracket" => bracket = true,
                        "noBracket" => bracket = false,
                        "number" => number = true,
                        "noNumber" => number = false,
                        other => return Err(format!("unknown tuplet option '{}'", other)),
                    }
                }
                self.defaults.tuplet_bracket = bracket;
                self.defaults.tuplet_number = number;
                Ok(Marker::Tuplet(
                    key,
                    Role::Start,
                    Some(TupletSpec {
                        actual,
                        normal,
                        show_bracket: bracket,
                        show_number: number,
                    }),
                ))
            }
            _ => Err(USAGE.to_string()),
        }
    }

    fn clef(&mut self, node: &Node) {
        match node.atoms().next().and_then(|a| ClefType::from_name(a.text())) {
            Some(clef) => self.push_control(node, StaffObjectKind::Clef(clef)),
            None => self.error(node, "unknown clef"),
        }
    }

    fn key(&mut self, node: &Node) {
        match node.atoms().next().and_then(|a| KeySignature::from_name(a.text())) {
            Some(key) => {
                self.key = key;
                self.push_control(node, StaffObjectKind::KeySignature(key));
            }
            None => self.error(node, "unknown key signature"),
        }
    }

    fn time_signature(&mut self, node: &Node) {
        let atoms: Vec<&Node> = node.atoms().collect();
        let top = small_integer(atoms.first(), 1..=64);
        let bottom = small_integer(atoms.get(1), 1..=64).filter(|b| b.is_power_of_two());
        match (top, bottom, atoms.len()) {
            (Some(top), Some(bottom), 2) => {
                self.push_control(node, StaffObjectKind::TimeSignature(TimeSignature { top, bottom }))
            }
            _ => self.error(node, "expected (time <beats> <beat type>)"),
        }
    }

    fn push_control(&mut self, node: &Node, kind: StaffObjectKind) {
        self.timeline.push(StaffObject {
            time: self.cursor.time,
            duration: 0.0,
            kind,
            measure: self.cursor.measure,
            voice: 0,
            staff: self.defaults.staff,
            locator: node.locator,
        });
    }

    /// A barline sits at the end of the longest voice and opens the next measure.
    fn barline(&mut self, node: &Node) {
        let mut barline = BarlineType::Simple;
        let mut times = self.config.default_repeat_times;
        for child in &node.children {
            match child.kind {
                NodeKind::Label => match BarlineType::from_name(child.text()) {
                    Some(t) => barline = t,
                    None => return self.error(child, format!("unknown barline type '{}'", child.text())),
                },
                NodeKind::Times => match child
                    .atoms()
                    .next()
                    .and_then(|a| a.as_integer())
                    .and_then(|n| u32::try_from(n).ok())
                {
                    Some(n) if n >= 1 => times = n,
                    _ => return self.error(child, "'times' requires a positive repeat count"),
                },
                other => {
                    return self.error(child, format!("'{}' is not allowed in 'barline'", other.name()))
                }
            }
        }

        let end = self.cursor.max_time;
        self.timeline.push(StaffObject {
            time: end,
            duration: 0.0,
            kind: StaffObjectKind::Barline { barline, times },
            measure: self.cursor.measure,
            voice: 0,
            staff: self.defaults.staff,
            locator: node.locator,
        });
        self.cursor = Cursor {
            time: end,
            measure_start: end,
            max_time: end,
            measure: self.cursor.measure + 1,
        };
        self.accidentals.clear();
    }

    /// `(volta <ending> [<span>])`
    fn volta(&mut self, node: &Node) {
        let atoms: Vec<&Node> = node.atoms().collect();
        let ending = small_integer(atoms.first(), 1..=255);
        let span = match atoms.get(1) {
            Some(a) => a
                .as_integer()
                .and_then(|s| u32::try_from(s).ok())
                .filter(|s| *s >= 1),
            None => Some(1),
        };
        match (ending, span, atoms.len()) {
            (Some(ending), Some(span), 1..=2) => self.push_control(node, StaffObjectKind::Volta { ending, span }),
            _ => self.error(node, "expected (volta <ending> [<measures>])"),
        }
    }

    /// Amount of time named by a `goBack`/`goFwd` argument: a duration
    /// letter or a number of time units.
    fn cursor_shift(arg: &Node) -> Option<f64> {
        match arg.kind {
            NodeKind::Number => arg.text().parse::<f64>().ok().filter(|u| *u >= 0.0),
            NodeKind::Label => NoteDuration::parse(arg.text()).map(|d| d.units()),
            _ => None,
        }
    }

    fn go_back(&mut self, node: &Node) {
        let target = match node.atoms().next() {
            Some(arg) if arg.text() == "start" => Some(self.cursor.measure_start),
            Some(arg) => Self::cursor_shift(arg).map(|units| self.cursor.time - units),
            None => None,
        };
        match target {
            Some(time) => self.cursor.time = time.max(self.cursor.measure_start),
            None => self.error(node, "expected (goBack start|<duration>|<units>)"),
        }
    }

    fn go_forward(&mut self, node: &Node) {
        let target = match node.atoms().next() {
            Some(arg) if arg.text() == "end" => Some(self.cursor.max_time),
            Some(arg) => Self::cursor_shift(arg).map(|units| self.cursor.time + units),
            None => None,
        };
        match target {
            Some(time) => {
                self.cursor.time = time;
                self.cursor.max_time = self.cursor.max_time.max(time);
            }
            None => self.error(node, "expected (goFwd end|<duration>|<units>)"),
        }
    }
}

/// `v2`, `p1`, ...: a letter prefix followed by a number from 1.
fn numbered_option(text: &str, prefix: char) -> Option<u8> {
    text.strip_prefix(prefix)
        .and_then(|n| n.parse::<u8>().ok())
        .filter(|n| *n >= 1)
}

/// `(tie [K] start|stop)`
fn read_tie(node: &Node) -> Result<Marker, String> {
    let (key, atoms) = split_key(node);
    let role = match atoms.as_slice() {
        [role] => match role.text() {
            "start" => Role::Start,
            "stop" | "end" => Role::End,
            _ => return Err("tie role must be 'start' or 'stop'".to_string()),
        },
        _ => return Err("expected (tie <key> start|stop)".to_string()),
    };
    Ok(Marker::Tie(key, role))
}

/// `(slur [K] start|continue|stop)`
fn read_slur(node: &Node) -> Result<Marker, String> {
    let (key, atoms) = split_key(node);
    let role = match atoms.as_slice() {
        [role] => match role.text() {
            "start" => Role::Start,
            "continue" => Role::Continue,
            "stop" | "end" => Role::End,
            _ => return Err("slur role must be 'start', 'continue' or 'stop'".to_string()),
        },
        _ => return Err("expected (slur <key> start|continue|stop)".to_string()),
    };
    Ok(Marker::Slur(key, role))
}

/// `(beam [K] begin|continue|end [<level type>...])`
fn read_beam(node: &Node) -> Result<Marker, String> {
    let (key, atoms) = split_key(node);
    let Some((role, levels)) = atoms.split_first() else {
        return Err("expected (beam <key> begin|continue|end [levels])".to_string());
    };
    let role = match role.text() {
        "begin" | "start" => Role::Start,
        "continue" => Role::Continue,
        "end" | "stop" => Role::End,
        other => return Err(format!("unknown beam role '{}'", other)),
    };
    let levels = levels
        .iter()
        .map(|l| BeamType::from_name(l.text()).ok_or_else(|| format!("unknown beam type '{}'", l.text())))
        .collect::<Result<Vec<_>, _>>()?;
    Ok(Marker::Beam(key, role, levels))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse;
    use pretty_assertions::assert_eq;

    fn run(source: &str) -> Analysis {
        run_with(source, &Config::default())
    }

    fn run_with(source: &str, config: &Config) -> Analysis {
        let tree = parse(source).unwrap();
        analyse(&tree, config).unwrap()
    }

    fn music(data: &str) -> String {
        format!("(score (vers 2.0) (instrument (musicData {})))", data)
    }

    fn timeline_summary(score: &ScoreModel) -> Vec<(f64, u32, &'static str)> {
        score.instruments[0]
            .timeline
            .iter()
            .map(|so| {
                let label = match &so.kind {
                    StaffObjectKind::NoteRest(id) if score.note(*id).is_rest() => "rest",
                    StaffObjectKind::NoteRest(_) => "note",
                    StaffObjectKind::Barline { .. } => "barline",
                    StaffObjectKind::Clef(_) => "clef",
                    StaffObjectKind::KeySignature(_) => "key",
                    StaffObjectKind::TimeSignature(_) => "time",
                    StaffObjectKind::Volta { .. } => "volta",
                };
                (so.time, so.measure, label)
            })
            .collect()
    }

    #[test]
    fn test_timeline_and_measures() {
        let analysis = run(&music("(clef G)(n c4 q)(r e)(barline)(n e4 h)"));
        let score = analysis.document.score(0).unwrap();
        assert_eq!(
            timeline_summary(score),
            vec![
                (0.0, 1, "clef"),
                (0.0, 1, "note"),
                (64.0, 1, "rest"),
                (96.0, 1, "barline"),
                (96.0, 2, "note"),
            ]
        );
        assert!(analysis.diagnostics.is_empty());
    }

    #[test]
    fn test_root_must_be_document() {
        let tree = parse("(n c4 q)").unwrap();
        match analyse(&tree, &Config::default()) {
            Err(ScoreError::NotADocument { found }) => assert_eq!(found, "n"),
            other => panic!("Expected NotADocument, got {:?}", other),
        }
    }

    #[test]
    fn test_key_and_measure_accidentals() {
        let analysis = run(&music("(key D)(n f4 q)(n =f4 q)(n f4 q)(barline)(n f4 q)(n -b4 q)"));
        let score = analysis.document.score(0).unwrap();
        let midi: Vec<u8> = score.notes.iter().map(|n| n.pitch.unwrap().midi()).collect();
        assert_eq!(midi, vec![66, 65, 65, 66, 70]);
    }

    #[test]
    fn test_explicit_tie_and_slur() {
        let analysis = run(&music(
            "(n c4 q (tie 1 start)(slur 2 start))(n c4 e (tie 1 stop))(n d4 e (slur 2 stop))",
        ));
        let score = analysis.document.score(0).unwrap();
        let ties: Vec<_> = score.relations_of(RelationKind::Tie).collect();
        let slurs: Vec<_> = score.relations_of(RelationKind::Slur).collect();
        assert_eq!(ties.len(), 1);
        assert_eq!(ties[0].parts, vec![NoteRestId(0), NoteRestId(1)]);
        assert_eq!(slurs[0].parts, vec![NoteRestId(0), NoteRestId(2)]);
        assert_eq!(score.note(NoteRestId(0)).relations.len(), 2);
        assert!(score.tie_after(NoteRestId(0)).is_some());
        assert!(score.tie_before(NoteRestId(1)).is_some());
    }

    #[test]
    fn test_open_relation_reported_at_score_end() {
        let analysis = run(&music("(n c4 q (slur 1 start))(n d4 q)"));
        let score = analysis.document.score(0).unwrap();
        assert!(score.relations.is_empty());
        assert_eq!(analysis.diagnostics.count(DiagnosticKind::UnterminatedRelation), 1);
    }

    #[test]
    fn test_legacy_tie() {
        let analysis = run(&music("(n c4 q l)(n c4 q)"));
        let score = analysis.document.score(0).unwrap();
        assert_eq!(score.relations_of(RelationKind::Tie).count(), 1);

        let analysis = run(&music("(n c4 q l)(n d4 q)"));
        let score = analysis.document.score(0).unwrap();
        assert_eq!(score.relations_of(RelationKind::Tie).count(), 0);
        assert_eq!(analysis.diagnostics.count(DiagnosticKind::InvalidOldTie), 1);
    }

    #[test]
    fn test_legacy_tie_needs_same_sounding_pitch() {
        let analysis = run(&music("(n c4 q l)(n +c4 q)"));
        let score = analysis.document.score(0).unwrap();
        assert_eq!(score.relations_of(RelationKind::Tie).count(), 0);
        assert_eq!(analysis.diagnostics.count(DiagnosticKind::InvalidOldTie), 1);

        // The measure accidental carries to the second note
        let analysis = run(&music("(n +c4 q l)(n c4 q)"));
        let score = analysis.document.score(0).unwrap();
        assert_eq!(score.relations_of(RelationKind::Tie).count(), 1);
    }

    #[test]
    fn test_legacy_tie_stays_in_its_voice() {
        let analysis = run(&music("(n c4 h l v1)(goBack start)(n e4 q v2)(n c4 q v2)(n c4 q v1)"));
        let score = analysis.document.score(0).unwrap();
        let ties: Vec<_> = score.relations_of(RelationKind::Tie).collect();
        assert_eq!(ties.len(), 1);
        assert_eq!(ties[0].parts, vec![NoteRestId(0), NoteRestId(3)]);
        assert!(analysis.diagnostics.is_empty());
    }

    #[test]
    fn test_legacy_syntax_disabled() {
        let config = Config {
            legacy_syntax: false,
            ..Config::default()
        };
        let analysis = run_with(&music("(n c4 q l)(n c4 q)"), &config);
        let score = analysis.document.score(0).unwrap();
        assert_eq!(score.notes.len(), 2);
        assert!(score.relations.is_empty());
        assert_eq!(analysis.diagnostics.count(DiagnosticKind::GrammarError), 1);
    }

    #[test]
    fn test_legacy_beam_gets_auto_levels() {
        let analysis = run(&music("(n c4 e g+)(n d4 s)(n e4 s g-)"));
        let score = analysis.document.score(0).unwrap();
        let beam = score.relations_of(RelationKind::Beam).next().unwrap();
        assert_eq!(beam.parts.len(), 3);
        let counts: Vec<usize> = score.notes.iter().map(|n| n.beam.len()).collect();
        assert_eq!(counts, vec![1, 2, 2]);
    }

    #[test]
    fn test_explicit_beam_levels_kept() {
        let analysis = run(&music(
            "(n c4 e (beam 1 begin forward))(n d4 e (beam 1 end backward))",
        ));
        let score = analysis.document.score(0).unwrap();
        assert_eq!(score.notes[0].beam, vec![BeamType::ForwardHook]);
        assert_eq!(score.notes[1].beam, vec![BeamType::BackwardHook]);
    }

    #[test]
    fn test_tuplet_scales_durations() {
        let analysis = run(&music("(n c4 e (t + 3 2))(n d4 e)(n e4 e (t -))(n f4 q)"));
        let score = analysis.document.score(0).unwrap();
        let tuplet = score.relations_of(RelationKind::Tuplet).next().unwrap();
        assert_eq!(tuplet.parts.len(), 3);
        for note in &score.notes[..3] {
            assert!((note.duration - 64.0 / 3.0).abs() < 1e-9);
        }
        assert_eq!(score.notes[3].duration, 64.0);
        let last = score.instruments[0].timeline.last().unwrap();
        assert!((last.time - 64.0).abs() < 1e-9);
    }

    #[test]
    fn test_restarted_tuplet_scales_once() {
        let analysis = run(&music("(n c4 e (t + 3 2))(n d4 e (t + 3 2))(n e4 e)(n f4 e (t -))"));
        let score = analysis.document.score(0).unwrap();
        assert_eq!(analysis.diagnostics.count(DiagnosticKind::DuplicatedRelation), 1);
        for note in &score.notes {
            assert!((note.duration - 64.0 / 3.0).abs() < 1e-9);
        }
        let tuplet = score.relations_of(RelationKind::Tuplet).next().unwrap();
        assert_eq!(tuplet.parts, vec![NoteRestId(1), NoteRestId(2), NoteRestId(3)]);
    }

    #[test]
    fn test_tuplet_display_is_inherited() {
        let analysis = run(&music(
            "(n c4 e (t + 3 2 noBracket))(n d4 e)(n e4 e (t -))(n c4 e (t + 3 2))(n d4 e)(n e4 e (t -))",
        ));
        let score = analysis.document.score(0).unwrap();
        let brackets: Vec<bool> = score
            .relations_of(RelationKind::Tuplet)
            .map(|r| match r.data {
                RelationData::Tuplet { show_bracket, .. } => show_bracket,
                _ => true,
            })
            .collect();
        assert_eq!(brackets, vec![false, false]);
    }

    #[test]
    fn test_chord_shares_time() {
        let analysis = run(&music("(chord (n c4 q)(n e4 q)(n g4 q))(n c5 q)"));
        let score = analysis.document.score(0).unwrap();
        let times: Vec<f64> = score.instruments[0].timeline.iter().map(|so| so.time).collect();
        assert_eq!(times, vec![0.0, 0.0, 0.0, 64.0]);
        assert!(score.notes[1].in_chord);
        assert!(!score.notes[0].in_chord);
    }

    #[test]
    fn test_go_back_second_voice() {
        let analysis = run(&music("(n c5 h v1)(goBack start)(n c4 q v2)(n d4 q)(barline)(n e4 q v1)"));
        let score = analysis.document.score(0).unwrap();
        let summary: Vec<(f64, u8)> = score.instruments[0]
            .timeline
            .iter()
            .map(|so| (so.time, so.voice))
            .collect();
        assert_eq!(
            summary,
            vec![(0.0, 1), (0.0, 2), (64.0, 2), (128.0, 0), (128.0, 1)]
        );
    }

    #[test]
    fn test_out_of_range_counts_are_grammar_errors() {
        let analysis = run(&music(
            "(n c4 w)(barline endRepetition (times 4294967296))(volta 1 4294967296)(n d4 w)",
        ));
        let score = analysis.document.score(0).unwrap();
        assert_eq!(analysis.diagnostics.count(DiagnosticKind::GrammarError), 2);
        // Both elements are dropped
        assert_eq!(
            timeline_summary(score),
            vec![(0.0, 1, "note"), (256.0, 1, "note")]
        );
    }

    #[test]
    fn test_grammar_error_drops_subtree() {
        let analysis = run(&music("(n h9 q)(n c4 q (tie start start))(clef X)(n d4 q)"));
        let score = analysis.document.score(0).unwrap();
        assert_eq!(score.notes.len(), 2);
        assert_eq!(analysis.diagnostics.count(DiagnosticKind::GrammarError), 3);
    }

    #[test]
    fn test_scores_are_independent() {
        let source = r#"(lenmusdoc (vers 0.0) (content
            (score (vers 1.6) (instrument (musicData (n c4 q (tie 1 start)))))
            (title "First")
            (para "Between" "scores")
            (score (vers 2.0) (instrument (infoMIDI 2 1) (musicData (n c4 q (tie 1 stop)))))))"#;
        let analysis = run(source);
        let doc = &analysis.document;
        assert_eq!(doc.content.len(), 3);
        assert_eq!(doc.score(0).unwrap().title.as_deref(), Some("First"));
        assert!(matches!(&doc.content[1], ContentItem::Paragraph(p) if p == "Between scores"));
        let second = doc.score(1).unwrap();
        assert_eq!(second.version.number(), 200);
        assert_eq!(second.instruments[0].midi, MidiInfo { program: 2, channel: 1 });
        assert_eq!(analysis.diagnostics.count(DiagnosticKind::UnterminatedRelation), 1);
        assert_eq!(analysis.diagnostics.count(DiagnosticKind::UnmatchedEnd), 1);
    }
}
