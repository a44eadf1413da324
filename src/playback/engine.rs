//! Sound event generation engine
//!
//! Converts the timelines of an analysed score into the ordered sound event
//! list and its measure index.

use crate::model::{NoteRestId, ScoreModel, StaffObject, StaffObjectKind};
use super::jumps::compile_jumps;
use super::types::{EventKind, Rhythm, SoundEvent, SoundEventTable, StaffObjectRef};

/// Timeline positions of an instrument ordered by time, then voice.
/// Objects at the same time and voice keep their analysis order.
pub(crate) fn time_order(timeline: &[StaffObject]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..timeline.len()).collect();
    order.sort_by(|&a, &b| {
        timeline[a]
            .time
            .total_cmp(&timeline[b].time)
            .then(timeline[a].voice.cmp(&timeline[b].voice))
    });
    order
}

/// Highest measure holding a staff object. A trailing barline belongs to
/// the measure it closes, so it does not add a measure.
pub(crate) fn count_measures(score: &ScoreModel) -> u32 {
    score
        .instruments
        .iter()
        .flat_map(|i| i.timeline.iter())
        .map(|so| so.measure)
        .max()
        .unwrap_or(0)
}

/// `id` is tied to the following note and both sound the same pitch.
fn tied_to_next(score: &ScoreModel, id: NoteRestId) -> bool {
    score.tie_after(id).is_some_and(|tie| {
        tie.parts
            .get(1)
            .is_some_and(|next| same_sound(score, id, *next))
    })
}

/// `id` continues a tie from a previous note of the same pitch.
fn tied_from_previous(score: &ScoreModel, id: NoteRestId) -> bool {
    score.tie_before(id).is_some_and(|tie| {
        tie.parts
            .iter()
            .rev()
            .nth(1)
            .is_some_and(|prev| same_sound(score, *prev, id))
    })
}

fn same_sound(score: &ScoreModel, a: NoteRestId, b: NoteRestId) -> bool {
    match (score.note(a).pitch, score.note(b).pitch) {
        (Some(p), Some(q)) => p.midi() == q.midi(),
        _ => false,
    }
}

/// Generate the sound events of a score.
///
/// Rules per staff object:
/// - note: note-on at its time, note-off after its duration. A tie replaces
///   the note-off of the first note and the note-on of the next one with a
///   visual-off/visual-on pair, so the sound lasts for the whole tied group
/// - rest: visual-on/visual-off spanning its duration, nothing when invisible
/// - time signature: rhythm-change
///
/// Every instrument gets a program change at time 0. The list ends with one
/// end-of-score event. Events are stably sorted by time, with releases
/// before attacks at the same time, and `delta_time` is filled afterwards.
pub fn generate_sound_events(score: &ScoreModel) -> Vec<SoundEvent> {
    let num_measures = count_measures(score);
    let mut events = Vec::new();

    for instrument in &score.instruments {
        events.push(SoundEvent {
            kind: EventKind::ProgramChange,
            time: 0.0,
            delta_time: 0.0,
            channel: instrument.midi.channel,
            instrument: instrument.midi.program,
            pitch: 0,
            measure: 0,
            staff_object: None,
            rhythm: None,
        });
    }

    let mut end_time: f64 = 0.0;
    for (i, instrument) in score.instruments.iter().enumerate() {
        let event = |kind: EventKind, time: f64, pitch: u8, so: &StaffObject, index: usize| SoundEvent {
            kind,
            time,
            delta_time: 0.0,
            channel: instrument.midi.channel,
            instrument: instrument.midi.program,
            pitch,
            measure: so.measure,
            staff_object: Some(StaffObjectRef { instrument: i, index }),
            rhythm: None,
        };

        for index in time_order(&instrument.timeline) {
            let so = &instrument.timeline[index];
            let end = so.time + so.duration;
            end_time = end_time.max(end);

            match &so.kind {
                StaffObjectKind::NoteRest(id) => {
                    let note = score.note(*id);
                    match note.pitch {
                        Some(pitch) => {
                            let key = pitch.midi();
                            if tied_from_previous(score, *id) {
                                events.push(event(EventKind::VisualOn, so.time, key, so, index));
                            } else {
                                events.push(event(EventKind::NoteOn, so.time, key, so, index));
                            }
                            if tied_to_next(score, *id) {
                                events.push(event(EventKind::VisualOff, end, key, so, index));
                            } else {
                                events.push(event(EventKind::NoteOff, end, key, so, index));
                            }
                        }
                        None if note.visible => {
                            events.push(event(EventKind::VisualOn, so.time, 0, so, index));
                            events.push(event(EventKind::VisualOff, end, 0, so, index));
                        }
                        None => {}
                    }
                }
                StaffObjectKind::TimeSignature(ts) => {
                    let mut change = event(EventKind::RhythmChange, so.time, 0, so, index);
                    change.rhythm = Some(Rhythm {
                        pulses: ts.pulses(),
                        measure_duration: ts.measure_duration(),
                    });
                    events.push(change);
                }
                StaffObjectKind::Barline { .. }
                | StaffObjectKind::Clef(_)
                | StaffObjectKind::KeySignature(_)
                | StaffObjectKind::Volta { .. } => {}
            }
        }
    }

    events.push(SoundEvent {
        kind: EventKind::EndOfScore,
        time: end_time,
        delta_time: 0.0,
        channel: 0,
        instrument: 0,
        pitch: 0,
        measure: num_measures + 1,
        staff_object: None,
        rhythm: None,
    });

    events.sort_by(|a, b| {
        a.time
            .total_cmp(&b.time)
            .then(a.kind.rank().cmp(&b.kind.rank()))
    });

    let mut previous = 0.0;
    for e in &mut events {
        e.delta_time = e.time - previous;
        previous = e.time;
    }

    log::debug!(
        "generated {} sound events over {} measures",
        events.len(),
        num_measures
    );
    events
}

/// Index of the first event of each measure: entry 0 is the control measure
/// (program changes), entry `num_measures + 1` the end of score.
pub fn build_measure_index(events: &[SoundEvent], num_measures: u32) -> Vec<usize> {
    let last = events.len().saturating_sub(1);
    let mut index = vec![0];
    for measure in 1..=num_measures + 1 {
        let first = events
            .iter()
            .position(|e| e.measure >= measure)
            .unwrap_or(last);
        index.push(first);
    }
    index
}

impl SoundEventTable {
    /// Compile the events, measure index and jump table of a score.
    pub fn build(score: &ScoreModel) -> Self {
        let events = generate_sound_events(score);
        let num_measures = count_measures(score);
        let measures = build_measure_index(&events, num_measures);
        let jumps = compile_jumps(score, &measures);
        Self {
            events,
            measures,
            num_measures,
            jumps,
        }
    }
}
