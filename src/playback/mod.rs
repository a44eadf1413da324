//! # Playback Module
//!
//! Compile an analysed score into timed sound events and a jump table.
//!
//! ## Purpose
//! The sound event table is what a player needs to perform a score:
//! 1. **Sound events** - program changes, note-on/off, visual highlights for
//!    rests and tied continuations, rhythm changes and one end-of-score event
//! 2. **Measure index** - the first event of every measure, so a player can
//!    start anywhere
//! 3. **Jump table** - repeat and volta structure, so a forward-only player
//!    can reproduce repeated sections and alternate endings
//!
//! ## Sub-modules
//! - `types` - SoundEvent, JumpEntry, JumpTable, SoundEventTable
//! - `engine` - Sound event generation and the measure index
//! - `jumps` - Jump table compilation
//!
//! ## Entry Point
//! [`ScoreModel::midi_table()`](crate::ScoreModel::midi_table) builds the
//! table on first request and keeps it with the score.
//!
//! ## Example
//! ```rust
//! use scorec::compile;
//! use scorec::playback::EventKind;
//!
//! let analysis = compile("(score (vers 2.0) (instrument (musicData (n c4 q))))").unwrap();
//! let table = analysis.document.score(0).unwrap().midi_table();
//! let kinds: Vec<EventKind> = table.events.iter().map(|e| e.kind).collect();
//! assert_eq!(
//!     kinds,
//!     vec![EventKind::ProgramChange, EventKind::NoteOn, EventKind::NoteOff, EventKind::EndOfScore]
//! );
//! ```
//!
//! ## Timing
//! All times are in duration units where a quarter note is 64. Each event
//! carries its absolute `time` and the `delta_time` since the previous event.
//!
//! ## Following the Jump Table
//! A player walks the events in order. Before playing each event (including
//! the one it just jumped to) it calls [`JumpTable::follow`] with the event
//! index and jumps when a target is returned. [`SoundEventTable::play_order`]
//! does exactly this.

mod types;
mod engine;
mod jumps;

#[cfg(test)]
mod tests;

pub use types::{
    EventKind, JumpEntry, JumpSlot, JumpTable, Rhythm, SoundEvent, SoundEventTable, StaffObjectRef,
};
pub use engine::{build_measure_index, generate_sound_events};
pub use jumps::compile_jumps;
