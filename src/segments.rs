//! segments.rs: Normalização do agendamento em segmentos coalescidos
//!
//! Cada chave "HH:MM" vira um slot de 30 minutos a partir da meia-noite UTC do
//! dia de referência. Os slots são ordenados e slots vizinhos da mesma cor são
//! fundidos em um único segmento.

use crate::types::{DaySchedule, Segment, TimeSlotCode};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use std::collections::BTreeMap;

/// Duração de um slot do agendamento.
pub const SLOT_MINUTES: i64 = 30;

/// Tolerância para considerar que dois segmentos se tocam.
const TOUCH_TOLERANCE_MS: i64 = 1_000;

/// Converte "HH:MM" em minutos desde a meia-noite. Chaves inválidas retornam `None`.
fn parse_slot_key(key: &str) -> Option<i64> {
    let (h, m) = key.trim().split_once(':')?;
    let hours: i64 = h.parse().ok()?;
    let minutes: i64 = m.parse().ok()?;
    if !(0..24).contains(&hours) || !(0..60).contains(&minutes) {
        return None;
    }
    Some(hours * 60 + minutes)
}

fn day_start_utc(day: NaiveDate) -> DateTime<Utc> {
    day.and_time(chrono::NaiveTime::MIN).and_utc()
}

fn slots_for_day(day: NaiveDate, times: &BTreeMap<String, String>) -> impl Iterator<Item = Segment> + '_ {
    let base = day_start_utc(day);
    times.iter().filter_map(move |(key, code)| {
        let offset = parse_slot_key(key)?;
        let start = base + Duration::minutes(offset);
        Some(Segment {
            start,
            end: start + Duration::minutes(SLOT_MINUTES),
            color: TimeSlotCode::parse(code).color(),
        })
    })
}

/// Ordena e funde segmentos adjacentes da mesma cor.
///
/// Idempotente: aplicar duas vezes produz o mesmo resultado.
pub fn coalesce(mut segments: Vec<Segment>) -> Vec<Segment> {
    segments.sort_by_key(|s| s.start);

    let mut merged: Vec<Segment> = Vec::with_capacity(segments.len());
    for seg in segments {
        match merged.last_mut() {
            Some(prev)
                if prev.color == seg.color
                    && (prev.end - seg.start).num_milliseconds().abs() < TOUCH_TOLERANCE_MS =>
            {
                prev.end = prev.end.max(seg.end);
            }
            _ => merged.push(seg),
        }
    }
    merged
}

/// Constrói a sequência de segmentos de um único dia.
pub fn build_segments(reference_day: NaiveDate, times: &BTreeMap<String, String>) -> Vec<Segment> {
    coalesce(slots_for_day(reference_day, times).collect())
}

/// Constrói uma sequência única a partir de vários dias (hoje + amanhã),
/// fundindo também através da meia-noite.
pub fn build_schedule(days: &[DaySchedule]) -> Vec<Segment> {
    let slots = days
        .iter()
        .flat_map(|day| slots_for_day(day.reference_day, &day.times))
        .collect();
    coalesce(slots)
}

/// Início do slot de meia hora que contém `now`.
pub fn slot_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let secs = now.timestamp();
    let slot = SLOT_MINUTES * 60;
    DateTime::from_timestamp(secs - secs.rem_euclid(slot), 0).unwrap_or(now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SegmentColor;
    use chrono::TimeZone;
    use proptest::prelude::*;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 15, h, m, 0).unwrap()
    }

    fn times(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn full_day_of_power_is_one_green_segment() {
        let mut all = BTreeMap::new();
        for i in 0..48 {
            all.insert(format!("{:02}:{:02}", i / 2, (i % 2) * 30), "1".to_string());
        }
        let segs = build_segments(day(), &all);
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].start, at(0, 0));
        assert_eq!(segs[0].end, at(0, 0) + Duration::days(1));
        assert_eq!(segs[0].color, SegmentColor::Green);
    }

    #[test]
    fn mixed_slots_are_coalesced_by_color() {
        let segs = build_segments(day(), &times(&[("00:00", "0"), ("00:30", "0"), ("01:00", "1")]));
        assert_eq!(
            segs,
            vec![
                Segment { start: at(0, 0), end: at(1, 0), color: SegmentColor::Red },
                Segment { start: at(1, 0), end: at(1, 30), color: SegmentColor::Green },
            ]
        );
    }

    #[test]
    fn gaps_break_coalescing() {
        let segs = build_segments(day(), &times(&[("10:00", "0"), ("11:00", "0")]));
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].end, at(10, 30));
        assert_eq!(segs[1].start, at(11, 0));
    }

    #[test]
    fn unknown_codes_are_yellow_and_bad_keys_skipped() {
        let segs = build_segments(
            day(),
            &times(&[("08:00", "10"), ("08:30", "x"), ("25:00", "0"), ("noon", "0")]),
        );
        assert_eq!(segs.len(), 1);
        assert_eq!(segs[0].color, SegmentColor::Yellow);
        assert_eq!(segs[0].end, at(9, 0));
    }

    #[test]
    fn empty_times_yield_no_segments() {
        assert!(build_segments(day(), &BTreeMap::new()).is_empty());
    }

    #[test]
    fn schedule_joins_across_midnight() {
        let today = DaySchedule {
            reference_day: day(),
            times: times(&[("23:00", "0"), ("23:30", "0")]),
        };
        let tomorrow = DaySchedule {
            reference_day: day().succ_opt().unwrap(),
            times: times(&[("00:00", "0"), ("00:30", "1")]),
        };
        let segs = build_schedule(&[tomorrow, today]);
        assert_eq!(segs.len(), 2);
        assert_eq!(segs[0].start, at(23, 0));
        assert_eq!(segs[0].end, at(0, 30) + Duration::days(1));
        assert_eq!(segs[0].color, SegmentColor::Red);
        assert_eq!(segs[1].color, SegmentColor::Green);
    }

    #[test]
    fn coalesce_tolerates_sub_second_gaps() {
        let a = Segment { start: at(1, 0), end: at(1, 30), color: SegmentColor::Red };
        let b = Segment {
            start: at(1, 30) + Duration::milliseconds(500),
            end: at(2, 0),
            color: SegmentColor::Red,
        };
        let merged = coalesce(vec![b, a]);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].end, at(2, 0));
    }

    #[test]
    fn slot_start_rounds_down_to_half_hour() {
        assert_eq!(slot_start(at(10, 47)), at(10, 30));
        assert_eq!(slot_start(at(10, 0)), at(10, 0));
    }

    fn code_strategy() -> impl Strategy<Value = String> {
        prop_oneof![Just("0".to_string()), Just("1".to_string()), Just("10".to_string()), "[a-z]{0,2}"]
    }

    proptest! {
        #[test]
        fn built_segments_are_sorted_and_fully_coalesced(
            slots in prop::collection::btree_map(0u32..48, code_strategy(), 0..48)
        ) {
            let map: BTreeMap<String, String> = slots
                .into_iter()
                .map(|(i, code)| (format!("{:02}:{:02}", i / 2, (i % 2) * 30), code))
                .collect();
            let segs = build_segments(day(), &map);

            for pair in segs.windows(2) {
                prop_assert!(pair[0].start < pair[1].start);
                prop_assert!(pair[0].end <= pair[1].start);
                let touching = (pair[0].end - pair[1].start).num_milliseconds().abs() < 1_000;
                prop_assert!(!(touching && pair[0].color == pair[1].color));
            }
            for seg in &segs {
                prop_assert!(seg.start < seg.end);
            }
            prop_assert_eq!(coalesce(segs.clone()), segs);
        }
    }
}
