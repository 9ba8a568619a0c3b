//! Broadcast scheduler.
//!
//! Runs the policy's scheduled tasks against each managed chat. The
//! policy document only carries a task's wall-clock anchor; the live
//! next-fire instant is runtime state keyed (chat, task id) so operator
//! edits re-seed a task without touching the others.

use std::sync::Arc;

use chrono::{Duration, NaiveDateTime, NaiveTime};
use dashmap::DashMap;

use crate::policy::ScheduledTask;

#[derive(Debug, Clone)]
struct TaskSlot {
    /// Definition fingerprint; a changed anchor or interval re-seeds.
    anchor: NaiveTime,
    interval_hours: u32,
    next_at: NaiveDateTime,
}

/// A broadcast due this tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DueBroadcast {
    pub task_id: String,
    pub content: String,
}

/// Runtime scheduling state for all (chat, task) pairs.
#[derive(Clone, Default)]
pub struct BroadcastBoard {
    slots: Arc<DashMap<(i64, String), TaskSlot>>,
}

impl BroadcastBoard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Collect the broadcasts due for one chat and advance their
    /// schedules.
    ///
    /// Tasks fire in ascending id order, each as an independent send.
    /// Inactive tasks are skipped but keep their `next_at`, so a stale
    /// instant fires on the first tick after re-enabling (catch-up).
    /// Slots for tasks no longer in the snapshot are dropped.
    pub fn collect_due(
        &self,
        chat_id: i64,
        now: NaiveDateTime,
        tasks: &[ScheduledTask],
    ) -> Vec<DueBroadcast> {
        self.prune(chat_id, tasks);

        let mut ordered: Vec<&ScheduledTask> = tasks.iter().collect();
        ordered.sort_by(|a, b| a.id.cmp(&b.id));

        let mut due = Vec::new();
        for task in ordered {
            let key = (chat_id, task.id.clone());

            let mut slot = self.slots.entry(key).or_insert_with(|| seed(task, now));
            if slot.anchor != task.next_run || slot.interval_hours != task.interval_hours {
                *slot = seed(task, now);
            }

            if !task.active {
                continue;
            }

            if now >= slot.next_at {
                slot.next_at = now + Duration::hours(i64::from(task.interval_hours));
                due.push(DueBroadcast {
                    task_id: task.id.clone(),
                    content: task.content.clone(),
                });
            }
        }

        due
    }

    fn prune(&self, chat_id: i64, tasks: &[ScheduledTask]) {
        self.slots.retain(|(chat, id), _| {
            *chat != chat_id || tasks.iter().any(|task| task.id == *id)
        });
    }
}

/// Seed a slot from the task's wall-clock anchor: today at that time.
/// An anchor already in the past fires catch-up on the next tick.
fn seed(task: &ScheduledTask, now: NaiveDateTime) -> TaskSlot {
    TaskSlot {
        anchor: task.next_run,
        interval_hours: task.interval_hours,
        next_at: now.date().and_time(task.next_run),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn task(id: &str, interval_hours: u32, next_run: (u32, u32), active: bool) -> ScheduledTask {
        ScheduledTask {
            id: id.to_string(),
            content: format!("broadcast {id}"),
            interval_hours,
            next_run: NaiveTime::from_hms_opt(next_run.0, next_run.1, 0).unwrap(),
            active,
        }
    }

    fn at(h: u32, m: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 10)
            .unwrap()
            .and_hms_opt(h, m, 0)
            .unwrap()
    }

    #[test]
    fn fires_once_when_crossing_and_reschedules() {
        let board = BroadcastBoard::new();
        let tasks = vec![task("1", 6, (14, 0), true)];

        assert!(board.collect_due(1, at(13, 59), &tasks).is_empty());

        let due = board.collect_due(1, at(14, 0), &tasks);
        assert_eq!(due.len(), 1);
        assert_eq!(due[0].task_id, "1");

        // Not again until 20:00.
        assert!(board.collect_due(1, at(14, 1), &tasks).is_empty());
        assert!(board.collect_due(1, at(19, 59), &tasks).is_empty());
        assert_eq!(board.collect_due(1, at(20, 0), &tasks).len(), 1);
    }

    #[test]
    fn inactive_task_is_suppressed_but_keeps_schedule() {
        let board = BroadcastBoard::new();
        let mut tasks = vec![task("1", 6, (14, 0), true)];
        board.collect_due(1, at(9, 0), &tasks);

        // Toggled off before 14:00: no fire.
        tasks[0].active = false;
        assert!(board.collect_due(1, at(14, 0), &tasks).is_empty());
        assert!(board.collect_due(1, at(15, 0), &tasks).is_empty());

        // Re-enabled after the instant passed: catch-up on next tick.
        tasks[0].active = true;
        assert_eq!(board.collect_due(1, at(16, 0), &tasks).len(), 1);
    }

    #[test]
    fn simultaneous_tasks_fire_in_ascending_id_order() {
        let board = BroadcastBoard::new();
        let tasks = vec![
            task("2", 12, (10, 0), true),
            task("1", 6, (10, 0), true),
        ];

        let due = board.collect_due(1, at(10, 0), &tasks);
        let ids: Vec<&str> = due.iter().map(|d| d.task_id.as_str()).collect();
        assert_eq!(ids, ["1", "2"]);
    }

    #[test]
    fn editing_a_task_reseeds_its_slot() {
        let board = BroadcastBoard::new();
        let mut tasks = vec![task("1", 6, (9, 0), true)];

        // Fires at 09:00, next at 15:00.
        assert_eq!(board.collect_due(1, at(9, 0), &tasks).len(), 1);

        // Anchor moved to 11:00: re-seed overrides the 15:00 schedule.
        tasks[0].next_run = NaiveTime::from_hms_opt(11, 0, 0).unwrap();
        assert!(board.collect_due(1, at(10, 0), &tasks).is_empty());
        assert_eq!(board.collect_due(1, at(11, 0), &tasks).len(), 1);
    }

    #[test]
    fn deleted_tasks_drop_their_slots() {
        let board = BroadcastBoard::new();
        let tasks = vec![task("1", 6, (9, 0), true), task("2", 6, (9, 0), true)];
        board.collect_due(1, at(8, 0), &tasks);
        assert_eq!(board.slots.len(), 2);

        let remaining = vec![task("2", 6, (9, 0), true)];
        board.collect_due(1, at(8, 1), &remaining);
        assert_eq!(board.slots.len(), 1);
    }

    #[test]
    fn chats_schedule_independently() {
        let board = BroadcastBoard::new();
        let tasks = vec![task("1", 6, (14, 0), true)];

        assert_eq!(board.collect_due(1, at(14, 0), &tasks).len(), 1);
        // Chat 2 sees its own slot and still fires.
        assert_eq!(board.collect_due(2, at(14, 0), &tasks).len(), 1);
    }
}
