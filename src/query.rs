//! query.rs: Consultas puras sobre uma sequência de segmentos
//!
//! Nenhuma função aqui guarda estado; todas recebem os segmentos e o instante
//! de referência explicitamente. As sequências são pequenas (algumas dezenas de
//! entradas), então varredura linear basta.

use crate::types::{Segment, SegmentColor};
use chrono::{DateTime, Duration, LocalResult, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::Serialize;

/// Próxima mudança de cor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Transition {
    pub at: DateTime<Utc>,
    pub color: SegmentColor,
}

/// Janela padrão da codificação compacta.
pub const ROLLING_WINDOW_HOURS: i64 = 24;

/// Primeiro segmento com `start <= now < end`.
pub fn segment_at(segments: &[Segment], now: DateTime<Utc>) -> Option<&Segment> {
    segments.iter().find(|s| s.contains(now))
}

/// Primeiro início posterior a `now` cuja cor difere da cor atual.
///
/// Sem segmento atual, qualquer segmento futuro conta como mudança.
pub fn next_transition(segments: &[Segment], now: DateTime<Utc>) -> Option<Transition> {
    let current = segment_at(segments, now).map(|s| s.color);
    segments
        .iter()
        .filter(|s| s.start > now && Some(s.color) != current)
        .min_by_key(|s| s.start)
        .map(|s| Transition {
            at: s.start,
            color: s.color,
        })
}

/// Segundos até a próxima mudança, nunca negativo.
pub fn countdown_seconds(segments: &[Segment], now: DateTime<Utc>) -> Option<i64> {
    next_transition(segments, now).map(|t| (t.at - now).num_seconds().max(0))
}

/// `true` quando o segmento atual é de desligamento.
pub fn is_outage_now(segments: &[Segment], now: DateTime<Utc>) -> bool {
    segment_at(segments, now).is_some_and(|s| s.color == SegmentColor::Red)
}

fn local_midnight_utc<Tz: TimeZone>(date: NaiveDate, tz: &Tz) -> DateTime<Utc> {
    let naive = date.and_time(NaiveTime::MIN);
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => dt.with_timezone(&Utc),
        LocalResult::Ambiguous(earliest, _) => earliest.with_timezone(&Utc),
        // Meia-noite inexistente (transição de horário): usa a primeira hora válida.
        LocalResult::None => (1..=3)
            .find_map(|h| {
                tz.from_local_datetime(&(naive + Duration::hours(h)))
                    .earliest()
                    .map(|dt| dt.with_timezone(&Utc))
            })
            .unwrap_or_else(|| naive.and_utc()),
    }
}

/// Minutos de desligamento (apenas vermelho) dentro do dia local `date`.
///
/// Amarelo não entra na conta.
pub fn outage_minutes_on_date<Tz: TimeZone>(segments: &[Segment], date: NaiveDate, tz: &Tz) -> i64 {
    let window_start = local_midnight_utc(date, tz);
    let window_end = match date.succ_opt() {
        Some(next) => local_midnight_utc(next, tz),
        None => window_start + Duration::days(1),
    };

    let total_seconds: i64 = segments
        .iter()
        .filter(|s| s.color == SegmentColor::Red)
        .map(|s| {
            let a = s.start.max(window_start);
            let b = s.end.min(window_end);
            if b > a { (b - a).num_seconds() } else { 0 }
        })
        .sum();

    (total_seconds as f64 / 60.0).round() as i64
}

/// Uma letra por segmento cujo início cai em `[now, now + window_hours)`.
pub fn rolling_encoding(segments: &[Segment], now: DateTime<Utc>, window_hours: i64) -> Option<String> {
    let window_end = now + Duration::hours(window_hours);
    let mut in_window: Vec<&Segment> = segments
        .iter()
        .filter(|s| now <= s.start && s.start < window_end)
        .collect();
    in_window.sort_by_key(|s| s.start);

    let encoded: String = in_window.iter().map(|s| s.color.letter()).collect();
    if encoded.is_empty() { None } else { Some(encoded) }
}
