//! Jump table compilation
//!
//! Scans the barlines and volta brackets of the first instrument and turns
//! repeat structure into [`JumpEntry`] values a forward-only player can
//! follow with [`JumpTable::follow`].
//!
//! ## Repeats
//! A repeat end closes the section that starts after the latest start-repeat
//! barline, or at measure 1 when there is none (after a previous repeat end,
//! the section starts at the measure that follows it). It produces one slot:
//! after its measure, jump back to the section start `times` times.
//!
//! ## Volta brackets
//! A repeat end inside volta bracket `n` produces two slots: the back jump
//! above, then, once it is used up, a skip from the bracket start to the
//! first measure past the bracket. The skip is taken `last - n` times (at
//! least once), where `last` is the highest ending of the section, so every
//! earlier bracket is skipped on the passes that belong to later endings.
//! Bracket entries are appended when their section closes, which is when
//! the last ending number is known.

use crate::model::{ScoreModel, StaffObjectKind};
use super::engine::time_order;
use super::types::{JumpEntry, JumpSlot, JumpTable};

#[derive(Debug, Clone)]
struct Bracket {
    ending: u8,
    start: u32,
    span: u32,
    /// Measure and repeat count of the repeat end it contains
    repeat_end: Option<(u32, u32)>,
}

impl Bracket {
    fn covers(&self, measure: u32) -> bool {
        measure >= self.start && measure < self.end()
    }

    fn end(&self) -> u32 {
        self.start.saturating_add(self.span)
    }
}

struct JumpCompiler<'a> {
    measures: &'a [usize],
    table: JumpTable,
    section_start: u32,
    brackets: Vec<Bracket>,
}

impl<'a> JumpCompiler<'a> {
    fn new(measures: &'a [usize]) -> Self {
        Self {
            measures,
            table: JumpTable::default(),
            section_start: 1,
            brackets: Vec::new(),
        }
    }

    fn first_event(&self, measure: u32) -> usize {
        let index = (measure as usize).min(self.measures.len().saturating_sub(1));
        self.measures.get(index).copied().unwrap_or(0)
    }

    fn slot(&self, trigger_measure: u32, required: u32, target_measure: u32) -> JumpSlot {
        JumpSlot {
            trigger_measure,
            trigger_event: self.first_event(trigger_measure),
            required,
            applied: 0,
            target_measure,
            target_event: self.first_event(target_measure),
        }
    }

    /// Jump taken when playback leaves `measure`, i.e. at the first event
    /// of the following measure.
    fn back_jump(&self, measure: u32, times: u32, target_measure: u32) -> JumpSlot {
        JumpSlot {
            trigger_measure: measure,
            trigger_event: self.first_event(measure + 1),
            ..self.slot(measure, times, target_measure)
        }
    }

    fn push(&mut self, entry: JumpEntry) {
        log::debug!("jump entry {}: {:?}", self.table.entries.len(), entry.slots);
        self.table.entries.push(entry);
    }

    fn notice(&mut self, message: String) {
        log::info!("{}", message);
        self.table.notices.push(message);
    }

    /// Measure `measure` holds music past every bracket of the section.
    fn leaves_brackets(&self, measure: u32) -> bool {
        !self.brackets.is_empty() && self.brackets.iter().all(|b| measure >= b.end())
    }

    fn volta(&mut self, ending: u8, measure: u32, span: u32) {
        self.brackets.push(Bracket {
            ending,
            start: measure,
            span,
            repeat_end: None,
        });
    }

    /// Repeat end at the end of `measure`.
    fn repeat_end(&mut self, measure: u32, times: u32) {
        let bracket = self
            .brackets
            .iter_mut()
            .rev()
            .find(|b| b.repeat_end.is_none() && b.covers(measure));
        match bracket {
            Some(bracket) => bracket.repeat_end = Some((measure, times)),
            None => {
                let back = self.back_jump(measure, times, self.section_start);
                self.close_section(measure + 1);
                self.push(JumpEntry { slots: vec![back] });
            }
        }
    }

    /// Append the entries of the pending brackets and start a new section at
    /// `next_start`.
    fn close_section(&mut self, next_start: u32) {
        let brackets = std::mem::take(&mut self.brackets);
        let start = self.section_start;
        self.section_start = next_start;
        if brackets.is_empty() {
            return;
        }

        let last = brackets.iter().map(|b| b.ending).max().unwrap_or(1);
        if brackets.iter().all(|b| b.repeat_end.is_none()) {
            for b in &brackets {
                self.notice(format!(
                    "volta bracket {} at measure {} closes no repeat; it is played straight through",
                    b.ending, b.start
                ));
            }
            return;
        }

        for b in &brackets {
            let Some((measure, times)) = b.repeat_end else {
                continue;
            };
            let back = self.back_jump(measure, times, start);
            let skips = u32::from(last.saturating_sub(b.ending)).max(1);
            let skip = self.slot(b.start, skips, b.end());
            self.push(JumpEntry {
                slots: vec![back, skip],
            });
        }
    }
}

/// Compile the jump table of a score from its first instrument.
/// `measures` is the measure index of the score's sound events.
pub fn compile_jumps(score: &ScoreModel, measures: &[usize]) -> JumpTable {
    let mut compiler = JumpCompiler::new(measures);
    let Some(instrument) = score.instruments.first() else {
        return compiler.table;
    };

    for index in time_order(&instrument.timeline) {
        let so = &instrument.timeline[index];
        if let StaffObjectKind::Volta { ending, span } = so.kind {
            compiler.volta(ending, so.measure, span);
            continue;
        }
        let holds_music = matches!(so.kind, StaffObjectKind::NoteRest(_) | StaffObjectKind::Barline { .. });
        if holds_music && compiler.leaves_brackets(so.measure) {
            compiler.close_section(so.measure);
        }
        if let StaffObjectKind::Barline { barline, times } = so.kind {
            if barline.ends_repetition() {
                compiler.repeat_end(so.measure, times);
            }
            if barline.starts_repetition() {
                compiler.close_section(so.measure + 1);
            }
        }
    }
    let end = compiler.section_start;
    compiler.close_section(end);

    log::debug!(
        "compiled {} jump entries ({} notices)",
        compiler.table.entries.len(),
        compiler.table.notices.len()
    );
    compiler.table
}
