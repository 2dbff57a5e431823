/*
Deadline reminder rules.
Pure functions over one (task, user) reminder record, kept apart from
the scheduler loop so the thresholds can be tested without I/O.
*/

use chrono::{DateTime, Duration, Utc};

use crate::mailer::{EmailContent, escape_html};
use crate::models::ReminderRecord;

// Periodic reminders sent before the 1 hour threshold
pub const MAX_PERIODIC: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReminderKind {
    Missed,
    OneHour,
    ThirtyMinutes,
    Periodic { number: u32 }, // 1..=MAX_PERIODIC
}

impl ReminderKind {
    pub fn subject(&self) -> &'static str {
        match self {
            Self::Missed => "Task Deadline Missed",
            Self::OneHour => "1 Hour Remaining",
            Self::ThirtyMinutes => "30 Minutes Remaining",
            Self::Periodic { .. } => "Task Deadline Reminder",
        }
    }

    pub fn content(&self, task_name: &str, deadline: DateTime<Utc>) -> EmailContent {
        let name = escape_html(task_name);
        let message = match self {
            Self::Missed => format!("You missed the deadline for <strong>{name}</strong>."),
            Self::OneHour => {
                format!("Only <strong>1 hour</strong> left for task <strong>{name}</strong>!")
            }
            Self::ThirtyMinutes => {
                format!("Only <strong>30 minutes</strong> left for task <strong>{name}</strong>!")
            }
            Self::Periodic { number } => format!(
                "Reminder {number} of {MAX_PERIODIC}: Task <strong>{name}</strong> is due at <strong>{}</strong>.",
                deadline.format("%Y-%m-%d %H:%M UTC")
            ),
        };
        EmailContent::new(self.subject(), message)
    }
}

/// Spacing between periodic reminders.
///
/// Tasks planned over a day or more get a fixed 8 hour gap. Shorter
/// tasks split the remaining time evenly over the remaining slots.
pub fn periodic_gap(
    created_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
    sent: u32,
) -> Duration {
    if deadline - created_at >= Duration::hours(24) {
        return Duration::hours(8);
    }
    let slots = MAX_PERIODIC.saturating_sub(sent).max(1);
    (deadline - now) / slots as i32
}

/// Reminders owed to one user at `now`, in send order.
pub fn due_reminders(
    record: &ReminderRecord,
    created_at: DateTime<Utc>,
    deadline: DateTime<Utc>,
    now: DateTime<Utc>,
) -> Vec<ReminderKind> {
    let time_left = deadline - now;

    if time_left <= Duration::zero() {
        // once missed, nothing else applies
        return if record.sent_missed {
            Vec::new()
        } else {
            vec![ReminderKind::Missed]
        };
    }

    let mut due = Vec::new();
    if time_left <= Duration::hours(1) && !record.sent_1hr {
        due.push(ReminderKind::OneHour);
    }
    if time_left <= Duration::minutes(30) && !record.sent_30min {
        due.push(ReminderKind::ThirtyMinutes);
    }

    if time_left > Duration::hours(1) && record.sent_reminders_count < MAX_PERIODIC {
        let gap = periodic_gap(created_at, deadline, now, record.sent_reminders_count);
        let last = record.last_reminder.unwrap_or(created_at);
        if now - last >= gap {
            due.push(ReminderKind::Periodic {
                number: record.sent_reminders_count + 1,
            });
        }
    }

    due
}

/// Record that `kind` was delivered at `now`.
pub fn mark_sent(record: &mut ReminderRecord, kind: ReminderKind, now: DateTime<Utc>) {
    match kind {
        ReminderKind::Missed => record.sent_missed = true,
        ReminderKind::OneHour => record.sent_1hr = true,
        ReminderKind::ThirtyMinutes => record.sent_30min = true,
        ReminderKind::Periodic { .. } => {
            record.sent_reminders_count = (record.sent_reminders_count + 1).min(MAX_PERIODIC);
            record.last_reminder = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 2, 9, 0, 0).unwrap()
    }

    fn mins(m: i64) -> DateTime<Utc> {
        t0() + Duration::minutes(m)
    }

    #[test]
    fn missed_is_terminal() {
        let mut r = ReminderRecord::default();
        let deadline = mins(120);

        assert_eq!(due_reminders(&r, t0(), deadline, mins(121)), vec![ReminderKind::Missed]);
        mark_sent(&mut r, ReminderKind::Missed, mins(121));
        assert!(due_reminders(&r, t0(), deadline, mins(200)).is_empty());
    }

    #[test]
    fn missed_fires_even_if_earlier_thresholds_were_skipped() {
        let r = ReminderRecord::default();
        let due = due_reminders(&r, t0(), mins(60), mins(500));
        assert_eq!(due, vec![ReminderKind::Missed]);
    }

    #[test]
    fn one_hour_then_thirty_minutes() {
        let mut r = ReminderRecord::default();
        let deadline = mins(120);

        assert_eq!(due_reminders(&r, t0(), deadline, mins(61)), vec![ReminderKind::OneHour]);
        mark_sent(&mut r, ReminderKind::OneHour, mins(61));
        assert!(due_reminders(&r, t0(), deadline, mins(75)).is_empty());

        assert_eq!(
            due_reminders(&r, t0(), deadline, mins(91)),
            vec![ReminderKind::ThirtyMinutes]
        );
        mark_sent(&mut r, ReminderKind::ThirtyMinutes, mins(91));
        assert!(due_reminders(&r, t0(), deadline, mins(100)).is_empty());
    }

    #[test]
    fn late_start_owes_both_thresholds() {
        let r = ReminderRecord::default();
        let due = due_reminders(&r, t0(), mins(120), mins(100));
        assert_eq!(due, vec![ReminderKind::OneHour, ReminderKind::ThirtyMinutes]);
    }

    #[test]
    fn long_tasks_use_eight_hour_gap() {
        let deadline = t0() + Duration::days(3);
        assert_eq!(periodic_gap(t0(), deadline, mins(10), 0), Duration::hours(8));

        let mut r = ReminderRecord::default();
        assert!(due_reminders(&r, t0(), deadline, t0() + Duration::hours(7)).is_empty());

        let first = t0() + Duration::hours(8);
        assert_eq!(
            due_reminders(&r, t0(), deadline, first),
            vec![ReminderKind::Periodic { number: 1 }]
        );
        mark_sent(&mut r, ReminderKind::Periodic { number: 1 }, first);

        // next one is measured from the previous send
        assert!(due_reminders(&r, t0(), deadline, first + Duration::hours(7)).is_empty());
        assert_eq!(
            due_reminders(&r, t0(), deadline, first + Duration::hours(8)),
            vec![ReminderKind::Periodic { number: 2 }]
        );
    }

    #[test]
    fn short_tasks_split_remaining_time() {
        // 10 hours planned, nothing sent: gap is a third of what is left
        let deadline = t0() + Duration::hours(10);
        assert_eq!(periodic_gap(t0(), deadline, mins(60), 0), Duration::hours(3));
        assert_eq!(periodic_gap(t0(), deadline, mins(60), 2), Duration::hours(9));
    }

    #[test]
    fn periodic_count_never_exceeds_cap() {
        let deadline = t0() + Duration::days(5);
        let mut r = ReminderRecord::default();
        let mut now = t0();
        let mut sent = 0;

        while now < deadline - Duration::hours(2) {
            for kind in due_reminders(&r, t0(), deadline, now) {
                if let ReminderKind::Periodic { number } = kind {
                    assert_eq!(number, r.sent_reminders_count + 1);
                    sent += 1;
                }
                mark_sent(&mut r, kind, now);
            }
            now += Duration::minutes(30);
        }

        assert_eq!(sent, MAX_PERIODIC);
        assert_eq!(r.sent_reminders_count, MAX_PERIODIC);
    }

    #[test]
    fn subjects_and_numbering() {
        let c = ReminderKind::Periodic { number: 2 }.content("Ship <v2>", mins(120));
        assert_eq!(c.title, "Task Deadline Reminder");
        assert!(c.message.starts_with("Reminder 2 of 3"));
        assert!(c.message.contains("Ship &lt;v2&gt;"));
        assert_eq!(ReminderKind::Missed.subject(), "Task Deadline Missed");
    }
}
