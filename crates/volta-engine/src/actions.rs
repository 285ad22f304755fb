//! Time-indexed action scheduler.
//!
//! Records are kept sorted by time; a cursor advances as actions fire
//! between timesteps. Disabled records are skipped but preserved, and
//! UI edits (which happen between frames) re-sort and re-sync the
//! cursor against the current simulation time.

use volta_parser::{ActionKind, ActionRecord};

#[derive(Debug, Default)]
pub struct ActionSchedule {
    records: Vec<ActionRecord>,
    cursor: usize,
}

impl ActionSchedule {
    pub fn new(mut records: Vec<ActionRecord>) -> Self {
        records.sort_by(|a, b| a.time.total_cmp(&b.time));
        Self { records, cursor: 0 }
    }

    pub fn records(&self) -> &[ActionRecord] {
        &self.records
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Next enabled record due at or before `t`, advancing the cursor.
    pub fn pop_due(&mut self, t: f64) -> Option<&ActionRecord> {
        while self.cursor < self.records.len() && self.records[self.cursor].time <= t {
            let idx = self.cursor;
            self.cursor += 1;
            if self.records[idx].enabled {
                return Some(&self.records[idx]);
            }
        }
        None
    }

    /// Rewind for an engine reset.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Replace the record list (UI edit between frames) and position
    /// the cursor after everything that already fired by time `t`.
    pub fn replace(&mut self, mut records: Vec<ActionRecord>, t: f64) {
        records.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.records = records;
        self.cursor = self.records.partition_point(|r| r.time <= t);
    }

    /// Append one record, keeping order and cursor position.
    pub fn push(&mut self, record: ActionRecord, t: f64) {
        let mut records = std::mem::take(&mut self.records);
        records.push(record);
        self.replace(records, t);
    }
}

/// Convenience for the engine loop: drain everything due at `t`.
pub fn drain_due(schedule: &mut ActionSchedule, t: f64) -> Vec<ActionKind> {
    let mut fired = Vec::new();
    while let Some(record) = schedule.pop_due(t) {
        fired.push(record.kind.clone());
    }
    fired
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(name: &str, value: f64) -> ActionKind {
        ActionKind::Set {
            name: name.into(),
            value,
        }
    }

    fn record(time: f64, kind: ActionKind, enabled: bool) -> ActionRecord {
        ActionRecord {
            time,
            kind,
            enabled,
        }
    }

    #[test]
    fn test_fire_in_time_order_exactly_once() {
        let mut schedule = ActionSchedule::new(vec![
            record(2.0, ActionKind::Stop, true),
            record(0.5, set("a", 1.0), true),
            record(1.0, set("b", 2.0), true),
        ]);

        assert!(drain_due(&mut schedule, 0.4).is_empty());
        let fired = drain_due(&mut schedule, 1.0);
        assert_eq!(fired, vec![set("a", 1.0), set("b", 2.0)]);
        // Nothing refires
        assert!(drain_due(&mut schedule, 1.0).is_empty());
        assert_eq!(drain_due(&mut schedule, 5.0), vec![ActionKind::Stop]);
    }

    #[test]
    fn test_time_zero_actions_fire_first_call() {
        let mut schedule = ActionSchedule::new(vec![record(0.0, set("x", 3.0), true)]);
        assert_eq!(drain_due(&mut schedule, 0.0), vec![set("x", 3.0)]);
    }

    #[test]
    fn test_disabled_records_skipped_but_kept() {
        let mut schedule = ActionSchedule::new(vec![
            record(0.5, set("a", 1.0), false),
            record(0.6, set("b", 2.0), true),
        ]);
        assert_eq!(drain_due(&mut schedule, 1.0), vec![set("b", 2.0)]);
        assert_eq!(schedule.records().len(), 2);
    }

    #[test]
    fn test_replace_resyncs_cursor() {
        let mut schedule = ActionSchedule::new(vec![record(0.5, set("a", 1.0), true)]);
        let _ = drain_due(&mut schedule, 1.0);

        // Edit mid-run: the new record before t must not fire again,
        // the one after t must.
        schedule.replace(
            vec![
                record(0.5, set("a", 1.0), true),
                record(2.0, set("c", 9.0), true),
            ],
            1.0,
        );
        assert_eq!(drain_due(&mut schedule, 3.0), vec![set("c", 9.0)]);
    }

    #[test]
    fn test_rewind_refires_everything() {
        let mut schedule = ActionSchedule::new(vec![record(0.0, set("x", 1.0), true)]);
        let _ = drain_due(&mut schedule, 0.0);
        schedule.rewind();
        assert_eq!(drain_due(&mut schedule, 0.0), vec![set("x", 1.0)]);
    }
}
