//! Beam segment types computed from the note types of a beamed group.
//!
//! Each note may carry as many beam levels as its flag count (eighth = 1,
//! sixteenth = 2, ...). At level L a note continues the beam towards every
//! neighbour that also reaches level L; a note with no such neighbour gets a
//! hook, forward on the first note of the group and backward elsewhere.

use crate::model::{BeamType, NoteType};

/// Segment type per level for each note of a group (rests already removed).
/// The result has one entry per note; entry `i` has one element per beam
/// level the note carries.
pub fn auto_beam(group: &[NoteType]) -> Vec<Vec<BeamType>> {
    let levels: Vec<usize> = group.iter().map(|t| t.beam_levels()).collect();

    levels
        .iter()
        .enumerate()
        .map(|(i, &own)| {
            let prev = i.checked_sub(1).map(|p| levels[p]).unwrap_or(0);
            let next = levels.get(i + 1).copied().unwrap_or(0);
            (1..=own)
                .map(|level| match (prev >= level, next >= level) {
                    (true, true) => BeamType::Continue,
                    (true, false) => BeamType::End,
                    (false, true) => BeamType::Begin,
                    (false, false) if i == 0 => BeamType::ForwardHook,
                    (false, false) => BeamType::BackwardHook,
                })
                .collect()
        })
        .collect()
}
