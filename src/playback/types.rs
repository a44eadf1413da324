//! Sound event and jump table type definitions
//!
//! This module defines the compiled playback data attached to a score.

use std::fmt::Write as _;

use serde::Serialize;

/// Kind of a sound event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum EventKind {
    /// Select the MIDI program of an instrument
    ProgramChange,
    NoteOn,
    NoteOff,
    /// Highlight a note or rest without sound (rests, tied continuations)
    VisualOn,
    VisualOff,
    /// New time signature
    RhythmChange,
    EndOfScore,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::ProgramChange => "program-change",
            EventKind::NoteOn => "note-on",
            EventKind::NoteOff => "note-off",
            EventKind::VisualOn => "visual-on",
            EventKind::VisualOff => "visual-off",
            EventKind::RhythmChange => "rhythm-change",
            EventKind::EndOfScore => "end-of-score",
        }
    }

    /// Ordering class among events sharing a time stamp: releases first,
    /// end of score last.
    pub(crate) fn rank(self) -> u8 {
        match self {
            EventKind::NoteOff | EventKind::VisualOff => 0,
            EventKind::EndOfScore => 2,
            _ => 1,
        }
    }
}

/// Staff object that produced an event: instrument index and position in
/// that instrument's timeline.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StaffObjectRef {
    pub instrument: usize,
    pub index: usize,
}

/// Parameters of a rhythm change
#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Rhythm {
    /// Beats per measure (dotted beats in compound meters)
    pub pulses: u8,
    /// Measure duration in time units
    pub measure_duration: f64,
}

/// One timed playback event
///
/// # Fields
/// - `time`: absolute time in units (quarter = 64)
/// - `delta_time`: time elapsed since the previous event of the table
/// - `channel`, `instrument`: MIDI channel and program of the instrument
/// - `pitch`: MIDI key number, 0 for events without pitch
/// - `measure`: 0 for program changes, `num_measures + 1` for end of score
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoundEvent {
    pub kind: EventKind,
    pub time: f64,
    pub delta_time: f64,
    pub channel: u8,
    pub instrument: u8,
    pub pitch: u8,
    pub measure: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub staff_object: Option<StaffObjectRef>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rhythm: Option<Rhythm>,
}

/// One decision of a jump entry.
///
/// When playback reaches `trigger_event` (the first event of
/// `trigger_measure`) and the slot is active, playback continues at
/// `target_event` (the first event of `target_measure`).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct JumpSlot {
    pub trigger_measure: u32,
    pub trigger_event: usize,
    pub required: u32,
    pub applied: u32,
    pub target_measure: u32,
    pub target_event: usize,
}

impl JumpSlot {
    pub fn is_exhausted(&self) -> bool {
        self.applied >= self.required
    }
}

/// A repeat (one slot) or a repeat closed by a volta bracket (two slots:
/// back-jump, then skip over the bracket).
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct JumpEntry {
    pub slots: Vec<JumpSlot>,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct JumpTable {
    pub entries: Vec<JumpEntry>,
    /// Informational notes about repeat structure that produced no entry
    pub notices: Vec<String>,
}

impl JumpTable {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Forget all applied counts.
    pub fn reset(&mut self) {
        for slot in self.entries.iter_mut().flat_map(|e| e.slots.iter_mut()) {
            slot.applied = 0;
        }
    }

    /// Playback has reached `event`. Returns the event to continue at when a
    /// jump is taken.
    ///
    /// Entries are tried in order. While slot 0 still has jumps left only
    /// its trigger is considered; slot 1 is consulted once slot 0 is
    /// exhausted.
    pub fn follow(&mut self, event: usize) -> Option<usize> {
        for entry in &mut self.entries {
            let Some((first, rest)) = entry.slots.split_first_mut() else {
                continue;
            };
            if !first.is_exhausted() {
                if first.trigger_event == event {
                    first.applied += 1;
                    return Some(first.target_event);
                }
                continue;
            }
            if let Some(second) = rest.first_mut() {
                if second.trigger_event == event && !second.is_exhausted() {
                    second.applied += 1;
                    return Some(second.target_event);
                }
            }
        }
        None
    }
}

/// Compiled playback data of a score: ordered events, the measure index
/// and the jump table.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SoundEventTable {
    pub events: Vec<SoundEvent>,
    /// Entry `m` is the index of the first event of measure `m`; entry 0 is
    /// the control measure, entry `num_measures + 1` the end of score.
    pub measures: Vec<usize>,
    pub num_measures: u32,
    pub jumps: JumpTable,
}

impl SoundEventTable {
    /// Index of the first event of `measure`, clamped to the end of score.
    pub fn first_event(&self, measure: u32) -> usize {
        let index = (measure as usize).min(self.measures.len().saturating_sub(1));
        self.measures.get(index).copied().unwrap_or(0)
    }

    /// Event indices in the order a forward player following the jump table
    /// visits them.
    pub fn play_order(&self) -> Vec<usize> {
        let mut jumps = self.jumps.clone();
        jumps.reset();
        let mut order = Vec::new();
        let mut index = 0;
        while index < self.events.len() {
            if let Some(target) = jumps.follow(index) {
                index = target;
                continue;
            }
            order.push(index);
            index += 1;
        }
        order
    }

    /// Measures in the order they are played, one entry per measure start
    /// reached.
    pub fn measure_sequence(&self) -> Vec<u32> {
        let mut sequence = Vec::new();
        for index in self.play_order() {
            for measure in 1..=self.num_measures {
                if self.measures.get(measure as usize) == Some(&index) {
                    sequence.push(measure);
                }
            }
        }
        sequence
    }

    /// Human readable listing of events, measure index and jumps.
    pub fn dump(&self) -> String {
        let mut out = self.dump_events();
        out.push_str(&self.jumps.dump());
        out
    }

    /// Listing of the events and the measure index.
    pub fn dump_events(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Events:");
        let _ = writeln!(
            out,
            "{:>5} {:>9} {:>9} {:>7}  {:<15} {:>3} {:>5} {:>5}",
            "#", "time", "delta", "measure", "kind", "ch", "instr", "pitch"
        );
        for (i, e) in self.events.iter().enumerate() {
            let _ = write!(
                out,
                "{:>5} {:>9.2} {:>9.2} {:>7}  {:<15} {:>3} {:>5} {:>5}",
                i,
                e.time,
                e.delta_time,
                e.measure,
                e.kind.name(),
                e.channel,
                e.instrument,
                e.pitch
            );
            if let Some(rhythm) = e.rhythm {
                let _ = write!(
                    out,
                    "  pulses={} duration={}",
                    rhythm.pulses, rhythm.measure_duration
                );
            }
            out.push('\n');
        }

        let _ = writeln!(out, "Measures:");
        for (measure, event) in self.measures.iter().enumerate() {
            let _ = writeln!(out, "  {:>4} -> event {}", measure, event);
        }
        out
    }
}

impl JumpTable {
    /// Human readable listing of entries and notices.
    pub fn dump(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "Jumps:");
        for (i, entry) in self.entries.iter().enumerate() {
            let _ = write!(out, "  {:>3}:", i);
            for (s, slot) in entry.slots.iter().enumerate() {
                let _ = write!(
                    out,
                    " [slot {}] at measure {} (event {}) x{} -> measure {} (event {})",
                    s,
                    slot.trigger_measure,
                    slot.trigger_event,
                    slot.required,
                    slot.target_measure,
                    slot.target_event
                );
            }
            out.push('\n');
        }
        for notice in &self.notices {
            let _ = writeln!(out, "  note: {}", notice);
        }
        out
    }
}
