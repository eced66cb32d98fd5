use std::time::Duration;

use chrono::{NaiveDateTime, NaiveTime, TimeDelta};

/// How often the daemon checks the clock.
pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Fires each configured time of day once per day.
pub struct DailyScheduler {
    slots: Vec<Slot>,
}

#[derive(Debug, Clone)]
struct Slot {
    at: NaiveTime,
    next_run: NaiveDateTime,
}

impl DailyScheduler {
    /// Every slot is armed for its next occurrence strictly after `now`.
    pub fn new(times: &[NaiveTime], now: NaiveDateTime) -> Self {
        let slots = times
            .iter()
            .map(|&at| Slot {
                at,
                next_run: next_occurrence(at, now),
            })
            .collect();
        DailyScheduler { slots }
    }

    pub fn next_run(&self) -> Option<NaiveDateTime> {
        self.slots.iter().map(|s| s.next_run).min()
    }

    /// Slots whose time has come, re-armed for their next occurrence.
    ///
    /// A slot missed by more than a day (machine asleep, a long cycle) fires
    /// once, not once per missed day.
    pub fn due(&mut self, now: NaiveDateTime) -> Vec<NaiveTime> {
        let mut fired = Vec::new();
        for slot in &mut self.slots {
            if slot.next_run <= now {
                fired.push(slot.at);
                slot.next_run = next_occurrence(slot.at, now);
            }
        }
        fired
    }

    /// Poll `clock` until at least one slot is due; return the fired times.
    pub async fn wait_for_next<C>(&mut self, clock: C) -> Vec<NaiveTime>
    where
        C: Fn() -> NaiveDateTime,
    {
        if self.slots.is_empty() {
            // Nothing will ever fire.
            std::future::pending::<()>().await;
        }
        loop {
            let fired = self.due(clock());
            if !fired.is_empty() {
                return fired;
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// First instant after `after` whose time of day is `at`.
fn next_occurrence(at: NaiveTime, after: NaiveDateTime) -> NaiveDateTime {
    let today = after.date().and_time(at);
    if today > after {
        today
    } else {
        today + TimeDelta::days(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn t(h: u32, m: u32, s: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, s).unwrap()
    }

    fn at(day: u32, h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 7, day).unwrap().and_time(t(h, m, s))
    }

    #[test]
    fn test_fires_once_per_day() {
        let mut sched = DailyScheduler::new(&[t(9, 15, 59), t(15, 35, 59)], at(16, 8, 0, 0));
        assert_eq!(sched.next_run(), Some(at(16, 9, 15, 59)));
        assert!(sched.due(at(16, 9, 15, 58)).is_empty());
        assert_eq!(sched.due(at(16, 9, 15, 59)), vec![t(9, 15, 59)]);
        assert!(sched.due(at(16, 9, 16, 0)).is_empty());
        assert_eq!(sched.next_run(), Some(at(16, 15, 35, 59)));
        assert_eq!(sched.due(at(16, 15, 36, 0)), vec![t(15, 35, 59)]);
        assert_eq!(sched.next_run(), Some(at(17, 9, 15, 59)));
    }

    #[test]
    fn test_time_already_past_at_startup_waits_for_tomorrow() {
        let mut sched = DailyScheduler::new(&[t(9, 15, 59)], at(16, 10, 0, 0));
        assert!(sched.due(at(16, 10, 0, 1)).is_empty());
        assert_eq!(sched.next_run(), Some(at(17, 9, 15, 59)));
    }

    #[test]
    fn test_overdue_slots_coalesce() {
        let times = [t(9, 15, 59), t(9, 30, 59), t(10, 0, 59)];
        let mut sched = DailyScheduler::new(&times, at(16, 9, 0, 0));

        // A long cycle overran two slots; they fire together, once.
        let fired = sched.due(at(16, 9, 45, 0));
        assert_eq!(fired, vec![t(9, 15, 59), t(9, 30, 59)]);
        assert!(sched.due(at(16, 9, 45, 1)).is_empty());

        // Two days asleep: every slot fires exactly once.
        let fired = sched.due(at(18, 12, 0, 0));
        assert_eq!(fired.len(), 3);
        assert_eq!(sched.next_run(), Some(at(19, 9, 15, 59)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_for_next_polls_until_due() {
        let start = tokio::time::Instant::now();
        let base = at(16, 9, 15, 50);
        let clock = || base + TimeDelta::from_std(start.elapsed()).unwrap();

        let mut sched = DailyScheduler::new(&[t(9, 15, 59)], base);
        let fired = sched.wait_for_next(clock).await;
        assert_eq!(fired, vec![t(9, 15, 59)]);
        assert_eq!(start.elapsed(), Duration::from_secs(9));
    }
}
