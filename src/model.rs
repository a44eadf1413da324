//! # Internal Score Model
//!
//! The fully linked model produced by the semantic analyser.
//!
//! ## Type Hierarchy
//! ```text
//! Document
//!   └── Vec<ContentItem> (Score | Paragraph)
//!
//! ScoreModel
//!   ├── version, options, title
//!   ├── notes: Vec<NoteRest>        (arena, indexed by NoteRestId)
//!   ├── relations: Vec<Relation>    (arena, indexed by RelationId)
//!   └── Vec<Instrument>
//!         ├── midi: MidiInfo (program, channel)
//!         └── timeline: Vec<StaffObject>
//!               └── kind: NoteRest(id) | Barline | Clef | Key | Time | Volta
//! ```
//!
//! ## Key Concepts
//!
//! ### Arena
//! Notes and rests live in one arena per score. Relations (ties, slurs, beams,
//! tuplets) are lists of arena indices, and every note lists the relations it
//! takes part in. A relation therefore cannot outlive the notes it links.
//!
//! ### Time Units
//! Durations are `f64` units where a quarter note is 64 (whole = 256). Dots
//! and tuplet ratios are applied by the analyser, so `NoteRest::duration` is
//! the sounding duration.
//!
//! ### Timeline
//! Each instrument keeps its staff objects in analysis order. Time stamps are
//! non-decreasing per voice and measure numbers never decrease. Objects that
//! are not voice-specific (barlines, clefs, keys, time signatures, voltas)
//! use voice 0.

use std::cell::OnceCell;
use std::collections::BTreeMap;

use serde::Serialize;

use crate::playback::SoundEventTable;
use crate::tree::Locator;

/// Duration of a quarter note in time units.
pub const DURATION_QUARTER: f64 = 64.0;
/// Duration of a whole note in time units.
pub const DURATION_WHOLE: f64 = 256.0;

/// Note type (head shape / flag count), without dots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoteType {
    Long,
    Breve,
    Whole,
    Half,
    #[default]
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
    SixtyFourth,
    OneHundredTwentyEighth,
}

impl NoteType {
    /// Parse an LDP duration letter: `w h q e s t i o` (plus `l`/`b` for long/breve).
    pub fn from_letter(c: char) -> Option<Self> {
        let t = match c {
            'l' => NoteType::Long,
            'b' => NoteType::Breve,
            'w' => NoteType::Whole,
            'h' => NoteType::Half,
            'q' => NoteType::Quarter,
            'e' => NoteType::Eighth,
            's' => NoteType::Sixteenth,
            't' => NoteType::ThirtySecond,
            'i' => NoteType::SixtyFourth,
            'o' => NoteType::OneHundredTwentyEighth,
            _ => return None,
        };
        Some(t)
    }

    /// Undotted duration in time units.
    pub fn units(self) -> f64 {
        match self {
            NoteType::Long => DURATION_WHOLE * 4.0,
            NoteType::Breve => DURATION_WHOLE * 2.0,
            NoteType::Whole => DURATION_WHOLE,
            NoteType::Half => DURATION_WHOLE / 2.0,
            NoteType::Quarter => DURATION_QUARTER,
            NoteType::Eighth => DURATION_QUARTER / 2.0,
            NoteType::Sixteenth => DURATION_QUARTER / 4.0,
            NoteType::ThirtySecond => DURATION_QUARTER / 8.0,
            NoteType::SixtyFourth => DURATION_QUARTER / 16.0,
            NoteType::OneHundredTwentyEighth => DURATION_QUARTER / 32.0,
        }
    }

    /// Maximum number of beams a note of this type carries (eighth = 1,
    /// sixteenth = 2, ...). Zero for quarter notes and longer.
    pub fn beam_levels(self) -> usize {
        match self {
            NoteType::Eighth => 1,
            NoteType::Sixteenth => 2,
            NoteType::ThirtySecond => 3,
            NoteType::SixtyFourth => 4,
            NoteType::OneHundredTwentyEighth => 5,
            _ => 0,
        }
    }
}

/// Parsed duration token, e.g. `q.` = dotted quarter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct NoteDuration {
    pub note_type: NoteType,
    pub dots: u8,
}

impl NoteDuration {
    pub fn parse(text: &str) -> Option<Self> {
        let mut chars = text.chars();
        let note_type = NoteType::from_letter(chars.next()?)?;
        let mut dots = 0u8;
        for c in chars {
            if c != '.' {
                return None;
            }
            dots += 1;
        }
        Some(Self { note_type, dots })
    }

    /// Duration in time units including dots.
    pub fn units(&self) -> f64 {
        let base = self.note_type.units();
        let mut total = base;
        let mut add = base;
        for _ in 0..self.dots {
            add /= 2.0;
            total += add;
        }
        total
    }
}

/// Diatonic step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub enum Step {
    #[default]
    C,
    D,
    E,
    F,
    G,
    A,
    B,
}

impl Step {
    pub fn from_letter(c: char) -> Option<Self> {
        let step = match c.to_ascii_lowercase() {
            'c' => Step::C,
            'd' => Step::D,
            'e' => Step::E,
            'f' => Step::F,
            'g' => Step::G,
            'a' => Step::A,
            'b' => Step::B,
            _ => return None,
        };
        Some(step)
    }

    /// Semitones above C
    pub fn semitone(self) -> i32 {
        match self {
            Step::C => 0,
            Step::D => 2,
            Step::E => 4,
            Step::F => 5,
            Step::G => 7,
            Step::A => 9,
            Step::B => 11,
        }
    }

    pub fn letter(self) -> char {
        match self {
            Step::C => 'c',
            Step::D => 'd',
            Step::E => 'e',
            Step::F => 'f',
            Step::G => 'g',
            Step::A => 'a',
            Step::B => 'b',
        }
    }
}

/// Written pitch of a note. `accidental` is the explicit alteration written
/// on the note (`None` when the note follows key and measure context);
/// `alter` is the resolved alteration in semitones.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct Pitch {
    pub step: Step,
    pub octave: i8,
    pub accidental: Option<i8>,
    pub alter: i8,
}

impl Pitch {
    /// Parse LDP pitch text: `[accidentals]<step><octave>`, e.g. `c4`, `+f4`, `--b3`, `=e5`.
    /// Returns the pitch with `alter` set to the explicit accidental (or 0).
    pub fn parse(text: &str) -> Option<Self> {
        let split = text.find(|c: char| c.is_ascii_alphabetic() && c != 'x')?;
        let (acc, rest) = text.split_at(split);
        let accidental = match acc {
            "" => None,
            "+" | "#" => Some(1),
            "-" => Some(-1),
            "++" | "x" | "##" => Some(2),
            "--" => Some(-2),
            "=" => Some(0),
            _ => return None,
        };
        let mut chars = rest.chars();
        let step = Step::from_letter(chars.next()?)?;
        let octave: i8 = chars.as_str().parse().ok()?;
        if !(0..=9).contains(&octave) {
            return None;
        }
        Some(Self {
            step,
            octave,
            accidental,
            alter: accidental.unwrap_or(0),
        })
    }

    /// MIDI key number (C4 = 60)
    pub fn midi(&self) -> u8 {
        let value = (self.octave as i32 + 1) * 12 + self.step.semitone() + self.alter as i32;
        value.clamp(0, 127) as u8
    }

    /// Same step and octave, and same sounding alteration.
    pub fn same_pitch(&self, other: &Pitch) -> bool {
        self.step == other.step && self.octave == other.octave && self.alter == other.alter
    }
}

impl std::fmt::Display for Pitch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let acc = match self.alter {
            2 => "++",
            1 => "+",
            -1 => "-",
            -2 => "--",
            _ => "",
        };
        write!(f, "{}{}{}", acc, self.step.letter(), self.octave)
    }
}

/// Mode for key signature
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum Mode {
    #[default]
    Major,
    Minor,
}

/// Key signature (number of sharps/flats)
/// Positive = sharps, Negative = flats, Zero = C major / A minor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct KeySignature {
    pub fifths: i8, // -7 to +7 (flats to sharps)
    pub mode: Mode,
}

impl KeySignature {
    /// Parse a key name. Accepts LDP names (`G`, `F+`, `B-`, lowercase for
    /// minor: `a`, `f+`, `b-`) and conventional spellings (`Bb`, `F#`, `Am`).
    pub fn from_name(s: &str) -> Option<Self> {
        let trimmed = s.trim();
        let mut chars = trimmed.chars();
        let first = chars.next()?;
        let tail: String = chars
            .as_str()
            .chars()
            .map(|c| match c {
                '+' => '#',
                '-' => 'b',
                other => other,
            })
            .collect();

        let (tonic, minor) = if first.is_ascii_lowercase() {
            (format!("{}{}", first.to_ascii_uppercase(), tail), true)
        } else if let Some(stripped) = tail.strip_suffix('m') {
            (format!("{}{}", first, stripped), true)
        } else {
            (format!("{}{}", first, tail), false)
        };

        if minor {
            let fifths = match tonic.as_str() {
                "A" => 0,
                "E" => 1,
                "B" => 2,
                "F#" => 3,
                "C#" => 4,
                "G#" => 5,
                "D#" => 6,
                "A#" => 7,
                "D" => -1,
                "G" => -2,
                "C" => -3,
                "F" => -4,
                "Bb" => -5,
                "Eb" => -6,
                "Ab" => -7,
                _ => return None,
            };
            return Some(Self { fifths, mode: Mode::Minor });
        }

        let fifths = match tonic.as_str() {
            "C" => 0,
            "G" => 1,
            "D" => 2,
            "A" => 3,
            "E" => 4,
            "B" => 5,
            "F#" => 6,
            "C#" => 7,
            "F" => -1,
            "Bb" => -2,
            "Eb" => -3,
            "Ab" => -4,
            "Db" => -5,
            "Gb" => -6,
            "Cb" => -7,
            _ => return None,
        };
        Some(Self { fifths, mode: Mode::Major })
    }

    /// Alteration this key applies to a step.
    /// Order of sharps: F C G D A E B
    /// Order of flats: B E A D G C F
    pub fn alter_for_step(&self, step: Step) -> i8 {
        const SHARPS: [Step; 7] = [Step::F, Step::C, Step::G, Step::D, Step::A, Step::E, Step::B];
        const FLATS: [Step; 7] = [Step::B, Step::E, Step::A, Step::D, Step::G, Step::C, Step::F];
        let count = self.fifths.unsigned_abs().min(7) as usize;
        if self.fifths > 0 && SHARPS[..count].contains(&step) {
            1
        } else if self.fifths < 0 && FLATS[..count].contains(&step) {
            -1
        } else {
            0
        }
    }
}

/// Time signature (e.g., 4/4, 3/4, 6/8)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeSignature {
    pub top: u8,
    pub bottom: u8,
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { top: 4, bottom: 4 }
    }
}

impl TimeSignature {
    pub fn is_compound(&self) -> bool {
        self.top > 3 && self.top % 3 == 0
    }

    /// Beats per measure: compound meters count dotted beats.
    pub fn pulses(&self) -> u8 {
        if self.is_compound() {
            self.top / 3
        } else {
            self.top
        }
    }

    /// Measure duration in time units (2/4 = 128, 6/8 = 192).
    pub fn measure_duration(&self) -> f64 {
        self.top as f64 * DURATION_WHOLE / self.bottom as f64
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ClefType {
    G,
    F4,
    F3,
    C1,
    C2,
    C3,
    C4,
    Percussion,
}

impl ClefType {
    pub fn from_name(s: &str) -> Option<Self> {
        let clef = match s {
            "G" | "G2" | "treble" => ClefType::G,
            "F" | "F4" | "bass" => ClefType::F4,
            "F3" => ClefType::F3,
            "C1" => ClefType::C1,
            "C2" => ClefType::C2,
            "C3" | "alto" => ClefType::C3,
            "C4" | "tenor" => ClefType::C4,
            "percussion" => ClefType::Percussion,
            _ => return None,
        };
        Some(clef)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BarlineType {
    #[default]
    Simple,
    Double,
    Start,
    End,
    StartRepetition,
    EndRepetition,
    DoubleRepetition,
}

impl BarlineType {
    pub fn from_name(s: &str) -> Option<Self> {
        let t = match s {
            "simple" => BarlineType::Simple,
            "double" => BarlineType::Double,
            "start" => BarlineType::Start,
            "end" => BarlineType::End,
            "startRepetition" => BarlineType::StartRepetition,
            "endRepetition" => BarlineType::EndRepetition,
            "doubleRepetition" => BarlineType::DoubleRepetition,
            _ => return None,
        };
        Some(t)
    }

    /// Closes a repeated section (`:|` or `:|:`).
    pub fn ends_repetition(self) -> bool {
        matches!(self, BarlineType::EndRepetition | BarlineType::DoubleRepetition)
    }

    /// Opens a repeated section (`|:` or `:|:`).
    pub fn starts_repetition(self) -> bool {
        matches!(self, BarlineType::StartRepetition | BarlineType::DoubleRepetition)
    }
}

/// Index of a note or rest in the score arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct NoteRestId(pub usize);

/// Index of a relation in the score arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct RelationId(pub usize);

/// Beam segment type of one note at one beam level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BeamType {
    #[default]
    None,
    Begin,
    Continue,
    End,
    ForwardHook,
    BackwardHook,
}

impl BeamType {
    pub fn from_name(s: &str) -> Option<Self> {
        let t = match s {
            "begin" | "+" => BeamType::Begin,
            "continue" | "=" => BeamType::Continue,
            "end" | "-" => BeamType::End,
            "forward" | "f" => BeamType::ForwardHook,
            "backward" | "b" => BeamType::BackwardHook,
            "none" => BeamType::None,
            _ => return None,
        };
        Some(t)
    }
}

/// A note or a rest.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NoteRest {
    /// `None` for rests
    pub pitch: Option<Pitch>,
    pub written: NoteDuration,
    /// Sounding duration in time units (dots and tuplets applied)
    pub duration: f64,
    pub visible: bool,
    pub voice: u8,
    pub staff: u8,
    /// Chord note after the first (shares the time stamp of the chord's first note)
    pub in_chord: bool,
    pub relations: Vec<RelationId>,
    /// Beam type per level, filled when the note belongs to a beam
    pub beam: Vec<BeamType>,
    pub locator: Locator,
}

impl NoteRest {
    pub fn is_rest(&self) -> bool {
        self.pitch.is_none()
    }

    pub fn is_note(&self) -> bool {
        self.pitch.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RelationKind {
    Tie,
    Slur,
    Beam,
    Tuplet,
}

impl RelationKind {
    pub fn name(self) -> &'static str {
        match self {
            RelationKind::Tie => "tie",
            RelationKind::Slur => "slur",
            RelationKind::Beam => "beam",
            RelationKind::Tuplet => "tuplet",
        }
    }
}

/// Kind-specific attributes of a relation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum RelationData {
    Tie,
    Slur,
    Beam,
    Tuplet {
        actual: u8,
        normal: u8,
        show_bracket: bool,
        show_number: bool,
    },
}

/// A closed relation linking two or more notes/rests, in score order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Relation {
    pub kind: RelationKind,
    pub parts: Vec<NoteRestId>,
    pub data: RelationData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum StaffObjectKind {
    NoteRest(NoteRestId),
    /// `times` is the repeat count of a repeat end (declared or configured default)
    Barline { barline: BarlineType, times: u32 },
    Clef(ClefType),
    KeySignature(KeySignature),
    TimeSignature(TimeSignature),
    /// Volta bracket for `ending`, starting in this object's measure and
    /// covering `span` measures.
    Volta { ending: u8, span: u32 },
}

/// A timed entry of an instrument's timeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StaffObject {
    pub time: f64,
    pub duration: f64,
    pub kind: StaffObjectKind,
    pub measure: u32,
    pub voice: u8,
    pub staff: u8,
    pub locator: Locator,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct MidiInfo {
    pub program: u8,
    pub channel: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Instrument {
    pub name: Option<String>,
    pub midi: MidiInfo,
    pub staves: u8,
    pub timeline: Vec<StaffObject>,
}

/// Declared score format version (`(vers 1.6)`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize)]
pub struct ScoreVersion {
    pub major: u16,
    pub minor: u16,
}

impl ScoreVersion {
    pub fn parse(text: &str) -> Option<Self> {
        let (major, minor) = text.split_once('.').unwrap_or((text, "0"));
        Some(Self {
            major: major.parse().ok()?,
            minor: minor.parse().ok()?,
        })
    }

    /// `100 * major + minor`
    pub fn number(&self) -> u32 {
        100 * self.major as u32 + self.minor as u32
    }
}

/// A complete analysed score
#[derive(Debug, Clone, Default, Serialize)]
pub struct ScoreModel {
    pub version: ScoreVersion,
    pub title: Option<String>,
    pub options: BTreeMap<String, String>,
    pub instruments: Vec<Instrument>,
    pub notes: Vec<NoteRest>,
    pub relations: Vec<Relation>,
    #[serde(skip)]
    midi_table: OnceCell<SoundEventTable>,
}

impl ScoreModel {
    pub fn note(&self, id: NoteRestId) -> &NoteRest {
        &self.notes[id.0]
    }

    pub fn relation(&self, id: RelationId) -> &Relation {
        &self.relations[id.0]
    }

    /// Relations of the given kind.
    pub fn relations_of(&self, kind: RelationKind) -> impl Iterator<Item = &Relation> {
        self.relations.iter().filter(move |r| r.kind == kind)
    }

    /// The tie, if any, in which `id` is not the last note.
    pub fn tie_after(&self, id: NoteRestId) -> Option<&Relation> {
        self.note(id)
            .relations
            .iter()
            .map(|&r| self.relation(r))
            .find(|r| r.kind == RelationKind::Tie && r.parts.first() == Some(&id))
    }

    /// The tie, if any, in which `id` is not the first note.
    pub fn tie_before(&self, id: NoteRestId) -> Option<&Relation> {
        self.note(id)
            .relations
            .iter()
            .map(|&r| self.relation(r))
            .find(|r| r.kind == RelationKind::Tie && r.parts.last() == Some(&id))
    }

    /// Add a note/rest to the arena.
    pub fn push_note(&mut self, note: NoteRest) -> NoteRestId {
        self.notes.push(note);
        NoteRestId(self.notes.len() - 1)
    }

    /// Add a closed relation and attach it to every participant.
    pub fn push_relation(&mut self, relation: Relation) -> RelationId {
        let id = RelationId(self.relations.len());
        for part in &relation.parts {
            self.notes[part.0].relations.push(id);
        }
        self.relations.push(relation);
        id
    }

    /// Sound events and jump table, compiled on first request.
    pub fn midi_table(&self) -> &SoundEventTable {
        self.midi_table.get_or_init(|| SoundEventTable::build(self))
    }
}

#[derive(Debug, Clone, Serialize)]
pub enum ContentItem {
    Score(ScoreModel),
    Paragraph(String),
}

/// Root of the model: one per analysis run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Document {
    pub version: String,
    pub content: Vec<ContentItem>,
}

impl Document {
    pub fn scores(&self) -> impl Iterator<Item = &ScoreModel> {
        self.content.iter().filter_map(|item| match item {
            ContentItem::Score(score) => Some(score),
            ContentItem::Paragraph(_) => None,
        })
    }

    pub fn score(&self, index: usize) -> Option<&ScoreModel> {
        self.scores().nth(index)
    }
}
