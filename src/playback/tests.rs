use super::*;
use crate::{compile, Config, compile_with_config};
use pretty_assertions::assert_eq;

fn score_source(data: &str) -> String {
    format!("(score (vers 2.0) (instrument (musicData {})))", data)
}

fn table_of(source: &str) -> SoundEventTable {
    let analysis = compile(source).unwrap();
    analysis.document.score(0).unwrap().midi_table().clone()
}

fn table(data: &str) -> SoundEventTable {
    table_of(&score_source(data))
}

fn kinds(table: &SoundEventTable) -> Vec<EventKind> {
    table.events.iter().map(|e| e.kind).collect()
}

/// Six whole-note measures. `marks[m - 1]` is inserted before the music of
/// measure `m`, `bars[m - 1]` is the barline closing it.
fn six_measures(marks: [&str; 6], bars: [&str; 6]) -> String {
    let pitches = ["c4", "d4", "e4", "f4", "g4", "a4"];
    let mut data = String::new();
    for i in 0..6 {
        data.push_str(marks[i]);
        data.push_str(&format!("(n {} w)", pitches[i]));
        data.push_str(bars[i]);
    }
    score_source(&data)
}

const BAR: &str = "(barline)";

#[test]
fn test_single_note() {
    let table = table("(n c4 q)");
    assert_eq!(
        kinds(&table),
        vec![
            EventKind::ProgramChange,
            EventKind::NoteOn,
            EventKind::NoteOff,
            EventKind::EndOfScore
        ]
    );
    let on = &table.events[1];
    assert_eq!(on.pitch, 60);
    assert_eq!(on.time, 0.0);
    assert_eq!(on.measure, 1);
    assert_eq!(table.events[2].time, 64.0);
    assert_eq!(table.events[2].delta_time, 64.0);

    let end = &table.events[3];
    assert_eq!(end.time, 64.0);
    assert_eq!(end.delta_time, 0.0);
    assert_eq!(end.measure, 2);
    assert_eq!(table.num_measures, 1);
    assert!(table.jumps.is_empty());
}

#[test]
fn test_program_change_in_control_measure() {
    let table = table_of("(score (vers 2.0) (instrument (infoMIDI 41 3) (musicData (n a4 q))))");
    let program = &table.events[0];
    assert_eq!(program.kind, EventKind::ProgramChange);
    assert_eq!(program.measure, 0);
    assert_eq!(program.instrument, 41);
    assert_eq!(program.channel, 3);
    assert_eq!(program.staff_object, None);

    let on = &table.events[1];
    assert_eq!((on.channel, on.instrument, on.pitch), (3, 41, 69));
    assert_eq!(on.staff_object, Some(StaffObjectRef { instrument: 0, index: 0 }));
}

#[test]
fn test_config_program_applies_without_info_midi() {
    let config = Config {
        default_program: 19,
        default_channel: 2,
        ..Config::default()
    };
    let analysis = compile_with_config(&score_source("(n c4 q)"), &config).unwrap();
    let table = analysis.document.score(0).unwrap().midi_table();
    assert_eq!(table.events[0].instrument, 19);
    assert_eq!(table.events[0].channel, 2);
}

#[test]
fn test_rest_is_visual_only() {
    let table = table("(r q)(n c4 q)");
    assert_eq!(
        kinds(&table),
        vec![
            EventKind::ProgramChange,
            EventKind::VisualOn,
            EventKind::VisualOff,
            EventKind::NoteOn,
            EventKind::NoteOff,
            EventKind::EndOfScore
        ]
    );
    assert_eq!(table.events[1].pitch, 0);
    assert_eq!(table.events[3].time, 64.0);
}

#[test]
fn test_single_rest() {
    let table = table("(r q)");
    assert_eq!(
        kinds(&table),
        vec![
            EventKind::ProgramChange,
            EventKind::VisualOn,
            EventKind::VisualOff,
            EventKind::EndOfScore
        ]
    );
    assert_eq!(table.events[2].time, 64.0);
}

#[test]
fn test_invisible_rest_is_silent() {
    let table = table("(r q noVisible)(n c4 q)");
    assert_eq!(
        kinds(&table),
        vec![
            EventKind::ProgramChange,
            EventKind::NoteOn,
            EventKind::NoteOff,
            EventKind::EndOfScore
        ]
    );
    assert_eq!(table.events[1].time, 64.0);
    assert_eq!(table.events[1].delta_time, 64.0);
}

#[test]
fn test_trailing_rest_delays_end_of_score() {
    let table = table("(n c4 q)(r q noVisible)");
    let end = table.events.last().unwrap();
    assert_eq!(end.kind, EventKind::EndOfScore);
    assert_eq!(end.time, 128.0);
    assert_eq!(end.delta_time, 64.0);
}

#[test]
fn test_tie_sustains_sound() {
    let expected = vec![
        EventKind::ProgramChange,
        EventKind::NoteOn,
        EventKind::VisualOff,
        EventKind::VisualOn,
        EventKind::NoteOff,
        EventKind::EndOfScore,
    ];

    let explicit = table("(n c4 q (tie 1 start))(n c4 e (tie 1 stop))");
    assert_eq!(kinds(&explicit), expected);
    let times: Vec<f64> = explicit.events.iter().map(|e| e.time).collect();
    assert_eq!(times, vec![0.0, 0.0, 64.0, 64.0, 96.0, 96.0]);

    let legacy = table("(n c4 q l)(n c4 e)");
    assert_eq!(kinds(&legacy), expected);
}

#[test]
fn test_tie_between_different_pitches_is_ignored() {
    let table = table("(n c4 q (tie 1 start))(n d4 q (tie 1 stop))");
    assert_eq!(
        kinds(&table),
        vec![
            EventKind::ProgramChange,
            EventKind::NoteOn,
            EventKind::NoteOff,
            EventKind::NoteOn,
            EventKind::NoteOff,
            EventKind::EndOfScore
        ]
    );
}

#[test]
fn test_chord_notes_start_together() {
    let table = table("(chord (n c4 q)(n e4 q)(n g4 q))");
    let ons: Vec<(f64, u8)> = table
        .events
        .iter()
        .filter(|e| e.kind == EventKind::NoteOn)
        .map(|e| (e.time, e.pitch))
        .collect();
    assert_eq!(ons, vec![(0.0, 60), (0.0, 64), (0.0, 67)]);
}

#[test]
fn test_measures_follow_barlines() {
    let table = table("(n c4 h)(n d4 h)(barline)(n e4 w)(barline end)");
    let measures: Vec<(EventKind, u32)> = table.events.iter().map(|e| (e.kind, e.measure)).collect();
    assert_eq!(
        measures,
        vec![
            (EventKind::ProgramChange, 0),
            (EventKind::NoteOn, 1),
            (EventKind::NoteOff, 1),
            (EventKind::NoteOn, 1),
            (EventKind::NoteOff, 1),
            (EventKind::NoteOn, 2),
            (EventKind::NoteOff, 2),
            (EventKind::EndOfScore, 3),
        ]
    );
    assert_eq!(table.num_measures, 2);
    assert_eq!(table.measures, vec![0, 1, 5, 7]);
}

#[test]
fn test_events_sorted_with_releases_first() {
    let source = r#"(score (vers 2.0)
        (instrument (musicData (n c4 q)(barline)(n d4 q)))
        (instrument (infoMIDI 33 1) (musicData (n c3 q)(barline)(n d3 q))))"#;
    let table = table_of(source);
    let summary: Vec<(EventKind, f64, u8)> =
        table.events.iter().map(|e| (e.kind, e.time, e.channel)).collect();
    assert_eq!(
        summary,
        vec![
            (EventKind::ProgramChange, 0.0, 0),
            (EventKind::ProgramChange, 0.0, 1),
            (EventKind::NoteOn, 0.0, 0),
            (EventKind::NoteOn, 0.0, 1),
            (EventKind::NoteOff, 64.0, 0),
            (EventKind::NoteOff, 64.0, 1),
            (EventKind::NoteOn, 64.0, 0),
            (EventKind::NoteOn, 64.0, 1),
            (EventKind::NoteOff, 128.0, 0),
            (EventKind::NoteOff, 128.0, 1),
            (EventKind::EndOfScore, 128.0, 0),
        ]
    );
    for pair in table.events.windows(2) {
        assert!(pair[0].time <= pair[1].time);
    }
    let deltas: f64 = table.events.iter().map(|e| e.delta_time).sum();
    assert_eq!(deltas, 128.0);
    assert_eq!(table.measures, vec![0, 2, 6, 10]);
}

#[test]
fn test_measure_index_points_at_first_event() {
    let table = table_of(&six_measures(["", "", "", "", "", ""], [BAR, BAR, BAR, BAR, BAR, ""]));
    assert_eq!(table.num_measures, 6);
    assert_eq!(table.measures, vec![0, 1, 3, 5, 7, 9, 11, 13]);
    for (measure, &first) in table.measures.iter().enumerate().skip(1) {
        assert!(table.events[first].measure >= measure as u32);
        assert!(table.events[..first].iter().all(|e| e.measure < measure as u32));
    }
    assert_eq!(table.first_event(3), 5);
    assert_eq!(table.first_event(99), 13);
}

#[test]
fn test_rhythm_change() {
    let simple = table("(time 2 4)(n c4 q)(n d4 q)");
    assert_eq!(
        kinds(&simple)[..3].to_vec(),
        vec![EventKind::ProgramChange, EventKind::RhythmChange, EventKind::NoteOn]
    );
    assert_eq!(
        simple.events[1].rhythm,
        Some(Rhythm {
            pulses: 2,
            measure_duration: 128.0
        })
    );

    let compound = table("(time 6 8)(n c4 q.)(n d4 q.)");
    assert_eq!(
        compound.events[1].rhythm,
        Some(Rhythm {
            pulses: 2,
            measure_duration: 192.0
        })
    );
}

#[test]
fn test_implicit_repeat_goes_to_first_measure() {
    let table = table("(n c4 w)(barline)(n d4 w)(barline endRepetition)(n e4 w)");
    assert_eq!(table.jumps.len(), 1);
    let slots = &table.jumps.entries[0].slots;
    assert_eq!(slots.len(), 1);
    assert_eq!(
        slots[0],
        JumpSlot {
            trigger_measure: 2,
            trigger_event: 5,
            required: 1,
            applied: 0,
            target_measure: 1,
            target_event: 1,
        }
    );
    assert_eq!(table.measure_sequence(), vec![1, 2, 1, 2, 3]);
}

#[test]
fn test_repeat_times() {
    let table = table("(n c4 w)(barline)(n d4 w)(barline endRepetition (times 2))(n e4 w)");
    assert_eq!(table.jumps.entries[0].slots[0].required, 2);
    assert_eq!(table.measure_sequence(), vec![1, 2, 1, 2, 1, 2, 3]);
}

#[test]
fn test_explicit_repeat_start() {
    let source = six_measures(
        ["", "", "", "", "", ""],
        [BAR, "(barline startRepetition)", BAR, "(barline endRepetition)", BAR, ""],
    );
    let table = table_of(&source);
    assert_eq!(table.jumps.len(), 1);
    let slot = &table.jumps.entries[0].slots[0];
    assert_eq!(slot.trigger_measure, 4);
    assert_eq!(slot.target_measure, 3);
    assert_eq!(slot.target_event, table.measures[3]);
    assert_eq!(table.measure_sequence(), vec![1, 2, 3, 4, 3, 4, 5, 6]);
}

#[test]
fn test_two_volta_brackets() {
    let source = six_measures(
        ["", "", "", "(volta 1)", "(volta 2)", ""],
        [BAR, BAR, BAR, "(barline endRepetition)", BAR, "(barline end)"],
    );
    let table = table_of(&source);
    assert_eq!(table.jumps.len(), 1);
    assert_eq!(
        table.jumps.entries[0].slots,
        vec![
            JumpSlot {
                trigger_measure: 4,
                trigger_event: 9,
                required: 1,
                applied: 0,
                target_measure: 1,
                target_event: 1,
            },
            JumpSlot {
                trigger_measure: 4,
                trigger_event: 7,
                required: 1,
                applied: 0,
                target_measure: 5,
                target_event: 9,
            },
        ]
    );
    assert_eq!(table.measure_sequence(), vec![1, 2, 3, 4, 1, 2, 3, 5, 6]);
}

#[test]
fn test_three_volta_brackets() {
    let data = "(n c4 w)(barline)\
                (volta 1)(n d4 w)(barline endRepetition)\
                (volta 2)(n e4 w)(barline endRepetition)\
                (volta 3)(n f4 w)(barline end)";
    let table = table(data);
    assert_eq!(table.jumps.len(), 2);
    let skips: Vec<(u32, u32, u32)> = table
        .jumps
        .entries
        .iter()
        .map(|e| (e.slots[1].trigger_measure, e.slots[1].required, e.slots[1].target_measure))
        .collect();
    assert_eq!(skips, vec![(2, 2, 3), (3, 1, 4)]);
    assert_eq!(table.measure_sequence(), vec![1, 2, 1, 3, 1, 4]);
}

#[test]
fn test_volta_without_repeat_is_noted() {
    let table = table("(n c4 w)(barline)(volta 1)(n d4 w)(barline)(n e4 w)");
    assert!(table.jumps.is_empty());
    assert_eq!(table.jumps.notices.len(), 1);
    assert!(table.jumps.notices[0].contains("measure 2"));
    assert_eq!(table.measure_sequence(), vec![1, 2, 3]);
}

#[test]
fn test_volta_spanning_past_the_score() {
    let table = table("(n c4 w)(barline)(volta 1 4294967295)(n d4 w)(barline endRepetition)(n e4 w)");
    assert_eq!(table.jumps.len(), 1);
    let skip = &table.jumps.entries[0].slots[1];
    assert_eq!(skip.target_measure, u32::MAX);
    assert_eq!(skip.target_event, table.events.len() - 1);
}

#[test]
fn test_follow_counts_and_reset() {
    let mut jumps = table("(n c4 w)(barline endRepetition)(n d4 w)").jumps;
    let trigger = jumps.entries[0].slots[0].trigger_event;
    assert_eq!(jumps.follow(trigger), Some(1));
    assert_eq!(jumps.follow(trigger), None);
    assert_eq!(jumps.entries[0].slots[0].applied, 1);

    jumps.reset();
    assert_eq!(jumps.entries[0].slots[0].applied, 0);
    assert_eq!(jumps.follow(trigger), Some(1));
}

#[test]
fn test_table_is_built_once() {
    let analysis = compile(&score_source("(n c4 q)")).unwrap();
    let score = analysis.document.score(0).unwrap();
    assert!(std::ptr::eq(score.midi_table(), score.midi_table()));
}

#[test]
fn test_dump_lists_sections() {
    let dump = table("(n c4 w)(barline endRepetition)(n d4 w)").dump();
    assert!(dump.contains("Events:"));
    assert!(dump.contains("note-on"));
    assert!(dump.contains("Measures:"));
    assert!(dump.contains("Jumps:"));
    assert!(dump.contains("-> measure 1"));

    let events = table("(n c4 w)(barline endRepetition)(n d4 w)").dump_events();
    assert!(events.contains("Measures:"));
    assert!(!events.contains("Jumps:"));
    assert!(dump.starts_with(&events));
}
