use chrono::{DateTime, Duration, FixedOffset, Utc};
use serde::Serialize;

use super::{format_local_hm, local_date, OccupiedInterval, TimeWindow};

/// Candidate start times are generated on a fixed 30-minute grid.
pub const SLOT_STEP_MINUTES: i64 = 30;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Slot {
    #[serde(skip)]
    pub starts_at: DateTime<Utc>,
    /// Salon-local wall time, e.g. "09:30".
    pub time: String,
    pub available: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<SlotReason>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotReason {
    Past,
    Occupied,
}

/// Walk each working window at the fixed step and tag every candidate that
/// still fits the window. A candidate whose end would pass the window is
/// never emitted. Pure in all inputs, so identical inputs (including `now`)
/// always produce the identical slot list.
pub fn generate_slots(
    windows: &[TimeWindow],
    occupied: &[OccupiedInterval],
    duration_minutes: i64,
    now: DateTime<Utc>,
    zone: FixedOffset,
) -> Vec<Slot> {
    let duration = Duration::minutes(duration_minutes);
    let step = Duration::minutes(SLOT_STEP_MINUTES);
    let today = local_date(now, zone);

    let mut slots = Vec::new();
    for window in windows {
        let mut current = window.start;
        while current + duration <= window.end {
            let slot_end = current + duration;
            let slot_date = local_date(current, zone);

            let reason = if slot_date < today || (slot_date == today && current <= now) {
                Some(SlotReason::Past)
            } else if occupied.iter().any(|occ| occ.overlaps(current, slot_end)) {
                Some(SlotReason::Occupied)
            } else {
                None
            };

            slots.push(Slot {
                starts_at: current,
                time: format_local_hm(current, zone),
                available: reason.is_none(),
                reason,
            });
            current += step;
        }
    }
    slots
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::super::OccupancyKind;
    use super::*;

    fn booked(start: chrono::DateTime<Utc>, minutes: i64) -> OccupiedInterval {
        OccupiedInterval {
            start,
            end: start + Duration::minutes(minutes),
            kind: OccupancyKind::Appointment {
                id: "x".into(),
                service_name: "Corte".into(),
            },
        }
    }

    #[test]
    fn a_45_minute_service_in_a_one_hour_window_yields_a_single_candidate() {
        let windows = [window(2026, 8, 6, 9, 0, 10, 0)];
        let slots = generate_slots(&windows, &[], 45, instant(2026, 8, 1, 8, 0), zone());
        // 09:30 would end at 10:15, past the window, so it is not offered.
        assert_eq!(slots.len(), 1);
        assert_eq!(slots[0].time, "09:00");
        assert!(slots[0].available);
    }

    #[test]
    fn slot_touching_an_appointment_boundary_stays_available() {
        let windows = [window(2026, 8, 6, 9, 0, 13, 0)];
        let occupied = [booked(instant(2026, 8, 6, 10, 0), 60)];
        let slots = generate_slots(&windows, &occupied, 60, instant(2026, 8, 1, 8, 0), zone());

        let by_time = |t: &str| slots.iter().find(|s| s.time == t).unwrap();
        assert!(by_time("09:00").available);
        assert_eq!(by_time("09:30").reason, Some(SlotReason::Occupied));
        assert_eq!(by_time("10:00").reason, Some(SlotReason::Occupied));
        assert_eq!(by_time("10:30").reason, Some(SlotReason::Occupied));
        // Ends exactly where the booking starts / starts exactly where it ends.
        assert!(by_time("11:00").available);
    }

    #[test]
    fn same_day_candidates_at_or_before_now_are_past() {
        let windows = [window(2026, 8, 6, 9, 0, 12, 0)];
        let now = instant(2026, 8, 6, 10, 0);
        let slots = generate_slots(&windows, &[], 30, now, zone());

        let by_time = |t: &str| slots.iter().find(|s| s.time == t).unwrap();
        assert_eq!(by_time("09:00").reason, Some(SlotReason::Past));
        // A candidate exactly at `now` is already gone.
        assert_eq!(by_time("10:00").reason, Some(SlotReason::Past));
        assert!(by_time("10:30").available);
    }

    #[test]
    fn whole_days_before_today_are_past_regardless_of_time() {
        let windows = [window(2026, 8, 5, 9, 0, 10, 0)];
        let now = instant(2026, 8, 6, 0, 30);
        let slots = generate_slots(&windows, &[], 30, now, zone());
        assert!(slots.iter().all(|s| s.reason == Some(SlotReason::Past)));
    }

    #[test]
    fn blocks_mark_slots_occupied_even_inside_override_windows() {
        let windows = [window(2026, 8, 6, 9, 0, 12, 0)];
        let occupied = [OccupiedInterval {
            start: instant(2026, 8, 6, 10, 0),
            end: instant(2026, 8, 6, 11, 0),
            kind: OccupancyKind::Block { reason: None },
        }];
        let slots = generate_slots(&windows, &occupied, 30, instant(2026, 8, 1, 8, 0), zone());

        let by_time = |t: &str| slots.iter().find(|s| s.time == t).unwrap();
        assert!(by_time("09:30").available);
        assert_eq!(by_time("10:00").reason, Some(SlotReason::Occupied));
        assert_eq!(by_time("10:30").reason, Some(SlotReason::Occupied));
        assert!(by_time("11:00").available);
    }

    #[test]
    fn output_is_deterministic_for_fixed_inputs() {
        let windows = [window(2026, 8, 6, 9, 0, 13, 0)];
        let occupied = [booked(instant(2026, 8, 6, 11, 0), 30)];
        let now = instant(2026, 8, 6, 9, 45);
        let first = generate_slots(&windows, &occupied, 30, now, zone());
        let second = generate_slots(&windows, &occupied, 30, now, zone());
        assert_eq!(first, second);
    }
}
