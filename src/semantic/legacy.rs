//! Resolvers for the keyless legacy markers: `l` (tie to the next note of
//! the same pitch) and `g+`/`g-` (open/close a beam).

use crate::error::{DiagnosticKind, Diagnostics};
use crate::model::{NoteRest, NoteRestId};
use crate::tree::Locator;

#[derive(Debug, Clone, Copy)]
struct PendingTie {
    note: NoteRestId,
    time: f64,
    voice: u8,
    locator: Locator,
}

/// One-slot state for legacy ties.
#[derive(Debug, Default)]
pub struct OldTieResolver {
    pending: Option<PendingTie>,
}

impl OldTieResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Register `note` as the start of a legacy tie. Only one tie may be
    /// open; a previous one is reported and dropped.
    pub fn start(
        &mut self,
        note: NoteRestId,
        time: f64,
        voice: u8,
        locator: Locator,
        diagnostics: &mut Diagnostics,
    ) {
        let previous = self.pending.replace(PendingTie {
            note,
            time,
            voice,
            locator,
        });
        if let Some(previous) = previous {
            diagnostics.record(
                DiagnosticKind::InvalidOldTie,
                Some(previous.locator),
                "legacy tie replaced by a later one before reaching its next note",
            );
        }
    }

    /// Offer the next note to the pending tie. Returns the tied pair when
    /// both sound the same pitch (alteration included); a mismatch drops the
    /// pending tie. Notes of other voices and notes sharing the start note's
    /// time stamp (chord members) are skipped.
    pub fn try_close(
        &mut self,
        note: NoteRestId,
        time: f64,
        notes: &[NoteRest],
        diagnostics: &mut Diagnostics,
    ) -> Option<[NoteRestId; 2]> {
        let pending = self.pending?;
        let candidate = notes.get(note.0)?;
        if time <= pending.time || candidate.voice != pending.voice {
            return None;
        }
        self.pending = None;

        let start = notes.get(pending.note.0)?.pitch?;
        let next = candidate.pitch?;
        if start.same_pitch(&next) {
            log::debug!("legacy tie {} closed", start);
            Some([pending.note, note])
        } else {
            diagnostics.record(
                DiagnosticKind::InvalidOldTie,
                Some(pending.locator),
                format!("legacy tie from {} does not reach a note of the same pitch ({} follows)", start, next),
            );
            None
        }
    }

    /// End of score: a tie still waiting for its note is reported.
    pub fn finish(&mut self, diagnostics: &mut Diagnostics) {
        if let Some(pending) = self.pending.take() {
            diagnostics.record(
                DiagnosticKind::InvalidOldTie,
                Some(pending.locator),
                "legacy tie has no following note",
            );
        }
    }
}

#[derive(Debug)]
struct OpenBeam {
    members: Vec<NoteRestId>,
    locator: Locator,
}

/// Stack of open legacy beams.
#[derive(Debug, Default)]
pub struct OldBeamResolver {
    open: Vec<OpenBeam>,
}

impl OldBeamResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_open(&self) -> bool {
        !self.open.is_empty()
    }

    /// `g+`: open a beam whose first member is `note`. Enclosing beams take
    /// the note too.
    pub fn open(&mut self, note: NoteRestId, locator: Locator) {
        self.add(note);
        self.open.push(OpenBeam {
            members: vec![note],
            locator,
        });
    }

    /// A note/rest without legacy beam marker joins every open beam.
    pub fn add(&mut self, note: NoteRestId) {
        for beam in &mut self.open {
            beam.members.push(note);
        }
    }

    /// `g-`: close the most recently opened beam with `note` as last member.
    pub fn close(
        &mut self,
        note: NoteRestId,
        locator: Locator,
        diagnostics: &mut Diagnostics,
    ) -> Option<Vec<NoteRestId>> {
        let Some(mut beam) = self.open.pop() else {
            diagnostics.record(
                DiagnosticKind::UnmatchedEnd,
                Some(locator),
                "legacy beam end 'g-' without an open beam",
            );
            return None;
        };
        beam.members.push(note);
        self.add(note);
        if beam.members.len() < 2 {
            return None;
        }
        Some(beam.members)
    }

    /// End of score: every beam still open is reported and discarded.
    pub fn finish(&mut self, diagnostics: &mut Diagnostics) {
        for beam in self.open.drain(..) {
            diagnostics.record(
                DiagnosticKind::UnterminatedOldBeam,
                Some(beam.locator),
                format!("legacy beam with {} notes is never closed", beam.members.len()),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{NoteDuration, Pitch};

    fn note(pitch: &str) -> NoteRest {
        NoteRest {
            pitch: Pitch::parse(pitch),
            written: NoteDuration::default(),
            duration: 64.0,
            visible: true,
            voice: 1,
            staff: 1,
            in_chord: false,
            relations: Vec::new(),
            beam: Vec::new(),
            locator: Locator::default(),
        }
    }

    #[test]
    fn test_old_tie_same_pitch() {
        let notes = vec![note("c4"), note("c4")];
        let mut diags = Diagnostics::new();
        let mut ties = OldTieResolver::new();
        ties.start(NoteRestId(0), 0.0, 1, Locator::default(), &mut diags);
        let pair = ties.try_close(NoteRestId(1), 64.0, &notes, &mut diags);
        assert_eq!(pair, Some([NoteRestId(0), NoteRestId(1)]));
        assert!(!ties.is_pending());
        assert!(diags.is_empty());
    }

    #[test]
    fn test_old_tie_different_pitch() {
        let notes = vec![note("c4"), note("d4")];
        let mut diags = Diagnostics::new();
        let mut ties = OldTieResolver::new();
        ties.start(NoteRestId(0), 0.0, 1, Locator::default(), &mut diags);
        assert!(ties.try_close(NoteRestId(1), 64.0, &notes, &mut diags).is_none());
        assert!(!ties.is_pending());
        assert_eq!(diags.count(DiagnosticKind::InvalidOldTie), 1);
    }

    #[test]
    fn test_old_tie_needs_same_alteration() {
        let notes = vec![note("c4"), note("+c4")];
        let mut diags = Diagnostics::new();
        let mut ties = OldTieResolver::new();
        ties.start(NoteRestId(0), 0.0, 1, Locator::default(), &mut diags);
        assert!(ties.try_close(NoteRestId(1), 64.0, &notes, &mut diags).is_none());
        assert_eq!(diags.count(DiagnosticKind::InvalidOldTie), 1);
    }

    #[test]
    fn test_old_tie_skips_other_voices() {
        let mut other = note("e4");
        other.voice = 2;
        let notes = vec![note("c4"), other, note("c4")];
        let mut diags = Diagnostics::new();
        let mut ties = OldTieResolver::new();
        ties.start(NoteRestId(0), 0.0, 1, Locator::default(), &mut diags);
        assert!(ties.try_close(NoteRestId(1), 64.0, &notes, &mut diags).is_none());
        assert!(ties.is_pending());
        let pair = ties.try_close(NoteRestId(2), 128.0, &notes, &mut diags);
        assert_eq!(pair, Some([NoteRestId(0), NoteRestId(2)]));
        assert!(diags.is_empty());
    }

    #[test]
    fn test_old_tie_replaced() {
        let mut diags = Diagnostics::new();
        let mut ties = OldTieResolver::new();
        ties.start(NoteRestId(0), 0.0, 1, Locator::default(), &mut diags);
        ties.start(NoteRestId(1), 0.0, 1, Locator::default(), &mut diags);
        assert_eq!(diags.count(DiagnosticKind::InvalidOldTie), 1);
        ties.finish(&mut diags);
        assert_eq!(diags.count(DiagnosticKind::InvalidOldTie), 2);
    }

    #[test]
    fn test_old_beams_nest() {
        let mut diags = Diagnostics::new();
        let mut beams = OldBeamResolver::new();
        beams.open(NoteRestId(0), Locator::default());
        beams.add(NoteRestId(1));
        beams.open(NoteRestId(2), Locator::default());
        let inner = beams.close(NoteRestId(3), Locator::default(), &mut diags).unwrap();
        assert_eq!(inner, vec![NoteRestId(2), NoteRestId(3)]);
        let outer = beams.close(NoteRestId(4), Locator::default(), &mut diags).unwrap();
        assert_eq!(
            outer,
            vec![NoteRestId(0), NoteRestId(1), NoteRestId(2), NoteRestId(3), NoteRestId(4)]
        );
        assert!(!beams.is_open());
    }

    #[test]
    fn test_old_beam_errors() {
        let mut diags = Diagnostics::new();
        let mut beams = OldBeamResolver::new();
        assert!(beams.close(NoteRestId(0), Locator::default(), &mut diags).is_none());
        assert_eq!(diags.count(DiagnosticKind::UnmatchedEnd), 1);
        beams.open(NoteRestId(1), Locator::default());
        beams.finish(&mut diags);
        assert_eq!(diags.count(DiagnosticKind::UnterminatedOldBeam), 1);
    }
}
