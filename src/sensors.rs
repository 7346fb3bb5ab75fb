//! Valores derivados expostos às entidades (sensores, sensores binários, seleção).
//!
//! Tudo aqui é calculado na hora a partir do estado dos coordenadores e do
//! instante atual; nada é guardado.

use crate::query::{self, ROLLING_WINDOW_HOURS};
use crate::scheduler::PollState;
use crate::types::{OutageGroup, PingResult, ProbeMethod, Segment, SegmentColor};
use chrono::{DateTime, Days, TimeZone, Utc};
use serde::Serialize;

/// Sensores do agendamento no instante `now`.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(bound(serialize = ""))]
pub struct ScheduleView<Tz: TimeZone> {
    pub planned_outage: bool,
    pub countdown: Option<i64>,
    pub next_change: Option<DateTime<Tz>>,
    pub next_color: Option<SegmentColor>,
    pub off_today: i64,
    pub off_tomorrow: i64,
    pub schedule_rolling_24h: Option<String>,
    pub current_color: Option<SegmentColor>,
    pub current_start: Option<DateTime<Tz>>,
    pub current_end: Option<DateTime<Tz>>,
}

impl<Tz: TimeZone> ScheduleView<Tz> {
    pub fn compute(segments: &[Segment], now: DateTime<Utc>, tz: &Tz) -> Self {
        let today = now.with_timezone(tz).date_naive();
        let tomorrow = today.checked_add_days(Days::new(1)).unwrap_or(today);
        let current = query::segment_at(segments, now);
        let next = query::next_transition(segments, now);

        Self {
            planned_outage: current.is_some_and(|s| s.color == SegmentColor::Red),
            countdown: query::countdown_seconds(segments, now),
            next_change: next.map(|t| t.at.with_timezone(tz)),
            next_color: next.map(|t| t.color),
            off_today: query::outage_minutes_on_date(segments, today, tz),
            off_tomorrow: query::outage_minutes_on_date(segments, tomorrow, tz),
            schedule_rolling_24h: query::rolling_encoding(segments, now, ROLLING_WINDOW_HOURS),
            current_color: current.map(|s| s.color),
            current_start: current.map(|s| s.start.with_timezone(tz)),
            current_end: current.map(|s| s.end.with_timezone(tz)),
        }
    }

    /// `None` quando o coordenador ainda não tem dados (entidade indisponível).
    pub fn from_state(state: &PollState<Vec<Segment>>, now: DateTime<Utc>, tz: &Tz) -> Option<Self> {
        let segments = state.last_good_data.as_ref()?;
        Some(Self::compute(segments, now, tz))
    }
}

/// Sensor binário de energia baseado na verificação de alcance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PowerView {
    pub power_ping: bool,
    pub host: String,
    pub port: Option<u16>,
    pub method: ProbeMethod,
    /// `false` quando o último ciclo falhou e o valor é antigo.
    pub fresh: bool,
}

impl PowerView {
    pub fn from_state(state: &PollState<PingResult>) -> Option<Self> {
        let result = state.last_good_data.as_ref()?;
        Some(Self {
            power_ping: result.reachable,
            host: result.target_host.clone(),
            port: result.target_port,
            method: result.method,
            fresh: state.last_update_succeeded,
        })
    }
}

/// Entidade de seleção do grupo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupView {
    pub current_option: OutageGroup,
    pub options: Vec<&'static str>,
}

impl GroupView {
    pub fn new(current_option: OutageGroup) -> Self {
        Self {
            current_option,
            options: crate::types::GROUP_OPTIONS.to_vec(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Phase;
    use chrono_tz::Europe::Kyiv;
    use std::sync::Arc;

    fn utc(d: u32, h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, d, h, m, 0).unwrap()
    }

    fn seg(start: DateTime<Utc>, end: DateTime<Utc>, color: SegmentColor) -> Segment {
        Segment { start, end, color }
    }

    fn schedule() -> Vec<Segment> {
        vec![
            seg(utc(15, 6, 0), utc(15, 8, 0), SegmentColor::Red),
            seg(utc(15, 8, 0), utc(15, 12, 0), SegmentColor::Green),
            seg(utc(15, 12, 0), utc(15, 13, 0), SegmentColor::Yellow),
            seg(utc(15, 13, 0), utc(16, 10, 0), SegmentColor::Green),
            seg(utc(16, 10, 0), utc(16, 11, 30), SegmentColor::Red),
        ]
    }

    #[test]
    fn schedule_view_during_outage() {
        let view = ScheduleView::compute(&schedule(), utc(15, 7, 0), &Kyiv);
        assert!(view.planned_outage);
        assert_eq!(view.countdown, Some(3600));
        assert_eq!(view.next_color, Some(SegmentColor::Green));
        assert_eq!(view.next_change.unwrap().naive_local().to_string(), "2025-01-15 10:00:00");
        assert_eq!(view.off_today, 120);
        assert_eq!(view.off_tomorrow, 90);
        assert_eq!(view.current_color, Some(SegmentColor::Red));
        assert_eq!(view.schedule_rolling_24h.as_deref(), Some("GYG"));
    }

    #[test]
    fn schedule_view_past_the_end() {
        let view = ScheduleView::compute(&schedule(), utc(17, 0, 0), &Utc);
        assert!(!view.planned_outage);
        assert_eq!(view.countdown, None);
        assert_eq!(view.next_change, None);
        assert_eq!(view.schedule_rolling_24h, None);
        assert_eq!(view.off_today, 0);
    }

    #[test]
    fn views_are_unavailable_without_data() {
        let empty: PollState<Vec<Segment>> = PollState::default();
        assert!(ScheduleView::from_state(&empty, utc(15, 7, 0), &Utc).is_none());
        assert!(PowerView::from_state(&PollState::default()).is_none());
    }

    #[test]
    fn power_view_marks_stale_results() {
        let state = PollState {
            last_good_data: Some(Arc::new(PingResult {
                reachable: true,
                target_host: "10.248.1.105".into(),
                target_port: Some(80),
                method: ProbeMethod::Tcp,
            })),
            last_update_succeeded: false,
            last_update_timestamp: Some(utc(15, 7, 0)),
            last_error: Some("timeout".into()),
            phase: Phase::Failed,
        };
        let view = PowerView::from_state(&state).unwrap();
        assert!(view.power_ping);
        assert!(!view.fresh);
        assert_eq!(view.port, Some(80));
    }

    #[test]
    fn group_view_lists_all_options() {
        let view = GroupView::new("2.2".parse().unwrap());
        assert_eq!(view.options.len(), 16);
        assert!(view.options.contains(&view.current_option.as_str()));
    }
}
