use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Código de status de meia hora, como vem da API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeSlotCode {
    Outage,
    Power,
    Uncertain,
}

impl TimeSlotCode {
    /// Interpreta o código bruto; qualquer valor desconhecido vira `Uncertain`.
    pub fn parse(raw: &str) -> Self {
        match raw.trim() {
            "0" => TimeSlotCode::Outage,
            "1" => TimeSlotCode::Power,
            _ => TimeSlotCode::Uncertain,
        }
    }

    pub fn color(self) -> SegmentColor {
        match self {
            TimeSlotCode::Outage => SegmentColor::Red,
            TimeSlotCode::Power => SegmentColor::Green,
            TimeSlotCode::Uncertain => SegmentColor::Yellow,
        }
    }
}

/// Cor de um segmento: vermelho = sem energia, amarelo = incerto, verde = com energia.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentColor {
    Red,
    Yellow,
    Green,
}

impl SegmentColor {
    /// Letra usada na codificação compacta (`R`/`Y`/`G`).
    pub fn letter(self) -> char {
        match self {
            SegmentColor::Red => 'R',
            SegmentColor::Yellow => 'Y',
            SegmentColor::Green => 'G',
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SegmentColor::Red => "red",
            SegmentColor::Yellow => "yellow",
            SegmentColor::Green => "green",
        }
    }
}

impl fmt::Display for SegmentColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Intervalo semiaberto `[start, end)` com uma única cor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Segment {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub color: SegmentColor,
}

impl Segment {
    pub fn contains(&self, instant: DateTime<Utc>) -> bool {
        self.start <= instant && instant < self.end
    }
}

/// Um membro utilizável da coleção: dia de referência + mapa "HH:MM" -> código.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DaySchedule {
    pub reference_day: NaiveDate,
    pub times: BTreeMap<String, String>,
}

/// Resultado normalizado de uma busca de agendamento.
#[derive(Debug, Clone, Serialize)]
pub struct RawFetchResult {
    pub raw: serde_json::Value,
    pub times: BTreeMap<String, String>,
    pub reference_day: Option<NaiveDate>,
    pub is_empty: bool,
    /// Todos os dias utilizáveis, na ordem em que apareceram.
    pub days: Vec<DaySchedule>,
}

impl RawFetchResult {
    pub fn empty(raw: serde_json::Value) -> Self {
        Self {
            raw,
            times: BTreeMap::new(),
            reference_day: None,
            is_empty: true,
            days: Vec::new(),
        }
    }
}

/// Método de verificação de alcance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    Icmp,
    Tcp,
}

impl FromStr for ProbeMethod {
    type Err = std::convert::Infallible;

    /// Valores desconhecidos caem em ICMP.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "tcp" => ProbeMethod::Tcp,
            _ => ProbeMethod::Icmp,
        })
    }
}

impl fmt::Display for ProbeMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeMethod::Icmp => f.write_str("icmp"),
            ProbeMethod::Tcp => f.write_str("tcp"),
        }
    }
}

/// Resultado de um ciclo de verificação de alcance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PingResult {
    pub reachable: bool,
    pub target_host: String,
    pub target_port: Option<u16>,
    pub method: ProbeMethod,
}

/// Rua retornada pela busca de ruas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Street {
    pub id: i64,
    pub name: String,
}

/// Grupos oferecidos na entidade de seleção.
pub const GROUP_OPTIONS: [&str; 16] = [
    "1.1", "1.2", "1.3", "1.4", "2.1", "2.2", "2.3", "2.4", "3.1", "3.2", "3.3", "3.4", "4.1",
    "4.2", "4.3", "4.4",
];

/// Grupo de desligamento atribuído pela API (ex.: "4.1"). Só exige texto não vazio.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct OutageGroup(String);

impl OutageGroup {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for OutageGroup {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            Err("grupo vazio".to_string())
        } else {
            Ok(OutageGroup(s.to_string()))
        }
    }
}

impl TryFrom<String> for OutageGroup {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<OutageGroup> for String {
    fn from(group: OutageGroup) -> Self {
        group.0
    }
}

impl fmt::Display for OutageGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_map_to_canonical_colors() {
        assert_eq!(TimeSlotCode::parse("0").color(), SegmentColor::Red);
        assert_eq!(TimeSlotCode::parse("1").color(), SegmentColor::Green);
        assert_eq!(TimeSlotCode::parse("10").color(), SegmentColor::Yellow);
        assert_eq!(TimeSlotCode::parse("7"), TimeSlotCode::Uncertain);
        assert_eq!(TimeSlotCode::parse(""), TimeSlotCode::Uncertain);
    }

    #[test]
    fn probe_method_falls_back_to_icmp() {
        assert_eq!("TCP ".parse::<ProbeMethod>().unwrap(), ProbeMethod::Tcp);
        assert_eq!("icmp".parse::<ProbeMethod>().unwrap(), ProbeMethod::Icmp);
        assert_eq!("udp".parse::<ProbeMethod>().unwrap(), ProbeMethod::Icmp);
    }

    #[test]
    fn outage_group_accepts_any_upstream_identifier() {
        assert_eq!("4.1".parse::<OutageGroup>().unwrap().as_str(), "4.1");
        assert_eq!(" 5.1 ".parse::<OutageGroup>().unwrap().as_str(), "5.1");
        assert!(!GROUP_OPTIONS.contains(&"5.1"));
        assert!("".parse::<OutageGroup>().is_err());
        assert!("   ".parse::<OutageGroup>().is_err());
    }

    #[test]
    fn outage_group_deserializes_with_validation() {
        let ok: OutageGroup = serde_json::from_str("\"2.3\"").unwrap();
        assert_eq!(ok.to_string(), "2.3");
        assert!(serde_json::from_str::<OutageGroup>("\"\"").is_err());
    }
}
