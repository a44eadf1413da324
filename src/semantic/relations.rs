//! Generic two-endpoint relation matching.
//!
//! One [`RelationBuilder`] exists per relation kind. It is parameterised by a
//! [`RelationRules`] implementation that says how a closed relation is
//! validated and what kind-specific data it carries.

use std::collections::BTreeMap;
use std::marker::PhantomData;

use crate::error::{DiagnosticKind, Diagnostics};
use crate::model::{BeamType, NoteRest, NoteRestId, Relation, RelationData, RelationKind};
use crate::tree::Locator;

/// Role of a relation marker on its note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Start,
    Continue,
    End,
}

/// One marker occurrence, bound to the note/rest that carries it.
#[derive(Debug, Clone, PartialEq)]
pub struct Endpoint<P> {
    pub key: u32,
    pub role: Role,
    pub note: NoteRestId,
    pub locator: Locator,
    pub payload: P,
}

/// Kind-specific behaviour of a relation builder.
pub trait RelationRules {
    /// Data carried by each marker.
    type Payload: Clone + Default + std::fmt::Debug;

    fn kind() -> RelationKind;

    /// Check a relation about to be built. A returned problem is reported
    /// but the relation is built anyway.
    fn validate(
        _start: &Endpoint<Self::Payload>,
        _end: &Endpoint<Self::Payload>,
        _notes: &[NoteRest],
    ) -> Option<(DiagnosticKind, String)> {
        None
    }

    fn build(parts: &[Endpoint<Self::Payload>]) -> RelationData;
}

/// A relation that has just been closed, with the markers that formed it.
#[derive(Debug)]
pub struct Closed<P> {
    pub relation: Relation,
    pub endpoints: Vec<Endpoint<P>>,
}

/// Pending-relations registry for one relation kind.
#[derive(Debug)]
pub struct RelationBuilder<R: RelationRules> {
    pending: BTreeMap<u32, Vec<Endpoint<R::Payload>>>,
    rules: PhantomData<R>,
}

impl<R: RelationRules> Default for RelationBuilder<R> {
    fn default() -> Self {
        Self {
            pending: BTreeMap::new(),
            rules: PhantomData,
        }
    }
}

impl<R: RelationRules> RelationBuilder<R> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Start markers of the relations still open, by key.
    pub fn open_starts(&self) -> impl Iterator<Item = &Endpoint<R::Payload>> {
        self.pending.values().filter_map(|parts| parts.first())
    }

    /// Feed one marker. Returns the relation when `endpoint` closes one.
    pub fn add(
        &mut self,
        endpoint: Endpoint<R::Payload>,
        notes: &[NoteRest],
        diagnostics: &mut Diagnostics,
    ) -> Option<Closed<R::Payload>> {
        let name = R::kind().name();
        match endpoint.role {
            Role::Start => {
                if let Some(previous) = self.pending.remove(&endpoint.key) {
                    let at = previous.first().map(|e| e.locator);
                    diagnostics.record(
                        DiagnosticKind::DuplicatedRelation,
                        Some(endpoint.locator),
                        format!(
                            "{} {} started again before it was closed{}",
                            name,
                            endpoint.key,
                            at.map(|l| format!(" (previous start at line {})", l.line))
                                .unwrap_or_default()
                        ),
                    );
                }
                self.pending.insert(endpoint.key, vec![endpoint]);
                None
            }
            Role::Continue => {
                match self.pending.get_mut(&endpoint.key) {
                    Some(parts) => parts.push(endpoint),
                    None => diagnostics.record(
                        DiagnosticKind::UnmatchedEnd,
                        Some(endpoint.locator),
                        format!("{} {} continued but never started", name, endpoint.key),
                    ),
                }
                None
            }
            Role::End => {
                let Some(mut parts) = self.pending.remove(&endpoint.key) else {
                    diagnostics.record(
                        DiagnosticKind::UnmatchedEnd,
                        Some(endpoint.locator),
                        format!("{} {} closed but never started", name, endpoint.key),
                    );
                    return None;
                };
                if let Some((kind, message)) = parts
                    .first()
                    .and_then(|start| R::validate(start, &endpoint, notes))
                {
                    diagnostics.record(kind, Some(endpoint.locator), message);
                }
                parts.push(endpoint);
                let relation = Relation {
                    kind: R::kind(),
                    parts: parts.iter().map(|e| e.note).collect(),
                    data: R::build(&parts),
                };
                log::debug!("closed {} with {} parts", name, relation.parts.len());
                Some(Closed {
                    relation,
                    endpoints: parts,
                })
            }
        }
    }

    /// Add `note` as an implicit continue to every open relation.
    pub fn continue_all(&mut self, note: NoteRestId, locator: Locator) {
        for (&key, parts) in self.pending.iter_mut() {
            parts.push(Endpoint {
                key,
                role: Role::Continue,
                note,
                locator,
                payload: R::Payload::default(),
            });
        }
    }

    /// Close the scope: every relation still open is reported and discarded.
    pub fn finish(&mut self, diagnostics: &mut Diagnostics) {
        let name = R::kind().name();
        for (key, parts) in std::mem::take(&mut self.pending) {
            let locator = parts.first().map(|e| e.locator);
            diagnostics.record(
                DiagnosticKind::UnterminatedRelation,
                locator,
                format!("{} {} is never closed", name, key),
            );
        }
    }
}

#[derive(Debug)]
pub struct TieRules;

impl RelationRules for TieRules {
    type Payload = ();

    fn kind() -> RelationKind {
        RelationKind::Tie
    }

    fn validate(
        start: &Endpoint<()>,
        end: &Endpoint<()>,
        notes: &[NoteRest],
    ) -> Option<(DiagnosticKind, String)> {
        let first = notes.get(start.note.0)?.pitch?;
        let last = notes.get(end.note.0)?.pitch?;
        if first.same_pitch(&last) {
            None
        } else {
            Some((
                DiagnosticKind::InvalidTie,
                format!("notes {} and {} cannot be tied", first, last),
            ))
        }
    }

    fn build(_parts: &[Endpoint<()>]) -> RelationData {
        RelationData::Tie
    }
}

#[derive(Debug)]
pub struct SlurRules;

impl RelationRules for SlurRules {
    type Payload = ();

    fn kind() -> RelationKind {
        RelationKind::Slur
    }

    fn build(_parts: &[Endpoint<()>]) -> RelationData {
        RelationData::Slur
    }
}

/// Beam markers carry the explicit segment type per level (may be empty).
#[derive(Debug)]
pub struct BeamRules;

impl RelationRules for BeamRules {
    type Payload = Vec<BeamType>;

    fn kind() -> RelationKind {
        RelationKind::Beam
    }

    fn build(_parts: &[Endpoint<Vec<BeamType>>]) -> RelationData {
        RelationData::Beam
    }
}

/// Ratio and display options given on a tuplet's start marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TupletSpec {
    pub actual: u8,
    pub normal: u8,
    pub show_bracket: bool,
    pub show_number: bool,
}

impl TupletSpec {
    /// Factor applied to the written duration of each member.
    pub fn scale(&self) -> f64 {
        self.normal as f64 / self.actual as f64
    }
}

#[derive(Debug)]
pub struct TupletRules;

impl RelationRules for TupletRules {
    type Payload = Option<TupletSpec>;

    fn kind() -> RelationKind {
        RelationKind::Tuplet
    }

    fn build(parts: &[Endpoint<Option<TupletSpec>>]) -> RelationData {
        let spec = parts.first().and_then(|e| e.payload).unwrap_or(TupletSpec {
            actual: 3,
            normal: 2,
            show_bracket: true,
            show_number: true,
        });
        RelationData::Tuplet {
            actual: spec.actual,
            normal: spec.normal,
            show_bracket: spec.show_bracket,
            show_number: spec.show_number,
        }
    }
}
