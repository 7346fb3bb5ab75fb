//! api.rs: Cliente HTTP da API de agendamento (toe-poweron.inneti.net)
//!
//! Endpoints usados:
//! - `a_gpv_g`: coleção JSON-LD com o gráfico de desligamentos por grupo;
//! - `pw_streets`: lista de ruas de uma cidade (usado só na configuração);
//! - `pw-accounts/building-groups`: grupo de uma rua (usado só na configuração).
//!
//! O parsing é tolerante: formatos inesperados viram resultado vazio, nunca erro.
//! Erros 5xx, falhas de transporte e respostas vazias são repetidos com backoff
//! exponencial; 4xx e corpo não-JSON falham na hora.

use crate::types::{DaySchedule, OutageGroup, RawFetchResult, Street};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Duration, NaiveDate, SecondsFormat, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use thiserror::Error;
use tracing::{debug, info, warn};

pub const API_BASE: &str = "https://api-toe-poweron.inneti.net/api";
pub const ORIGIN: &str = "https://toe-poweron.inneti.net";
pub const REFERER: &str = "https://toe-poweron.inneti.net/";

const ACCEPT_LD_JSON: &str = "application/ld+json";
const ACCEPT_JSON: &str = "application/json";
const BODY_SNIPPET_CHARS: usize = 200;
/// Janela pedida à API: hoje e amanhã.
const SCHEDULE_WINDOW_DAYS: i64 = 2;

/// Classificação de erro para a política de retry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Transient,
    Permanent,
}

#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("erro do servidor HTTP {status}: {body}")]
    Server { status: u16, body: String },
    #[error("requisição rejeitada HTTP {status}: {body}")]
    Client { status: u16, body: String },
    #[error("resposta não-JSON da API: {snippet}")]
    NonJson { snippet: String },
    #[error("falha de transporte: {0}")]
    Transport(String),
    #[error("resposta de consulta inválida: {0}")]
    Lookup(String),
}

impl UpstreamError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            UpstreamError::Server { .. } | UpstreamError::Transport(_) => ErrorKind::Transient,
            UpstreamError::Client { .. } | UpstreamError::NonJson { .. } | UpstreamError::Lookup(_) => {
                ErrorKind::Permanent
            }
        }
    }
}

/// Primeiros 200 caracteres do corpo, para mensagens de erro.
fn snippet(body: &str) -> String {
    body.chars().take(BODY_SNIPPET_CHARS).collect()
}

/// Chave de depuração exigida pela API: base64("{cidade}/{rua}").
pub fn debug_key(city_id: i64, street_id: i64) -> String {
    BASE64.encode(format!("{city_id}/{street_id}"))
}

/// Requisição GET relativa à base da API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub path: String,
    pub query: Vec<(String, String)>,
    pub accept: &'static str,
    pub debug_key: Option<String>,
}

impl HttpRequest {
    fn new(path: &str, accept: &'static str) -> Self {
        Self {
            path: path.to_string(),
            query: Vec::new(),
            accept,
            debug_key: None,
        }
    }

    fn param(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Valor do primeiro parâmetro com a chave dada.
    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: String,
}

/// Camada de transporte HTTP. Erros de rede devem virar `UpstreamError::Transport`.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, UpstreamError>;
}

/// Transporte de produção baseado em `reqwest`. Não segue redirecionamentos.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: reqwest::Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, timeout: StdDuration) -> Result<Self, UpstreamError> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .timeout(timeout)
            .build()
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn get(&self, request: &HttpRequest) -> Result<HttpResponse, UpstreamError> {
        let url = format!("{}/{}", self.base_url, request.path.trim_start_matches('/'));
        let mut builder = self
            .client
            .get(&url)
            .query(&request.query)
            .header(reqwest::header::ACCEPT, request.accept)
            .header(reqwest::header::ORIGIN, ORIGIN)
            .header(reqwest::header::REFERER, REFERER);
        if let Some(key) = &request.debug_key {
            builder = builder.header("x-debug-key", key);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::Transport(e.to_string()))?;
        Ok(HttpResponse { status, body })
    }
}

/// Política de retry: `base_delay * 2^tentativa` entre tentativas.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: StdDuration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: StdDuration::from_millis(500),
        }
    }
}

impl RetryPolicy {
    /// Espera antes da tentativa seguinte à tentativa `attempt` (0-based).
    pub fn delay_for(&self, attempt: u32) -> StdDuration {
        self.base_delay.saturating_mul(2u32.saturating_pow(attempt))
    }
}

/// Monta a requisição do gráfico para a janela `[hoje 00:00 UTC, +2 dias)`.
pub fn schedule_request(city_id: i64, street_id: i64, group: &str, now: DateTime<Utc>) -> HttpRequest {
    let after = now.date_naive().and_time(chrono::NaiveTime::MIN).and_utc();
    let before = after + Duration::days(SCHEDULE_WINDOW_DAYS);

    let mut request = HttpRequest::new("a_gpv_g", ACCEPT_LD_JSON)
        .param("after", after.to_rfc3339_opts(SecondsFormat::Secs, false))
        .param("before", before.to_rfc3339_opts(SecondsFormat::Secs, false))
        .param("group[]", group)
        .param("time", format!("{city_id}{street_id}"));
    request.debug_key = Some(debug_key(city_id, street_id));
    request
}

/// Membros de uma coleção JSON-LD (`member`, `hydra:member` ou array puro).
fn collection_members(payload: &Value) -> &[Value] {
    if let Some(items) = payload.as_array() {
        return items;
    }
    for key in ["member", "hydra:member"] {
        if let Some(items) = payload.get(key).and_then(Value::as_array) {
            return items;
        }
    }
    &[]
}

fn code_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// `dataJson[group].times` de um membro, se for um mapa não vazio.
fn member_times(member: &Value, group: &str) -> Option<BTreeMap<String, String>> {
    let data = member.get("dataJson")?;
    // Algumas respostas trazem dataJson como string JSON.
    let decoded;
    let data = match data {
        Value::String(raw) => {
            decoded = serde_json::from_str::<Value>(raw).ok()?;
            &decoded
        }
        other => other,
    };

    let times: BTreeMap<String, String> = data
        .get(group)?
        .get("times")?
        .as_object()?
        .iter()
        .filter_map(|(slot, code)| code_string(code).map(|c| (slot.clone(), c)))
        .collect();

    if times.is_empty() { None } else { Some(times) }
}

/// Data de calendário escrita em `dateGraph`, no próprio fuso do timestamp.
fn parse_reference_day(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(dt) = DateTime::parse_from_rfc3339(raw) {
        return Some(dt.date_naive());
    }
    NaiveDate::parse_from_str(raw.get(..10)?, "%Y-%m-%d").ok()
}

/// Normaliza o payload do gráfico. Nunca falha: formato desconhecido = vazio.
pub fn parse_schedule(payload: Value, group: &str, today: NaiveDate) -> RawFetchResult {
    let mut days: Vec<DaySchedule> = Vec::new();
    let mut first: Option<(Option<NaiveDate>, BTreeMap<String, String>)> = None;

    for member in collection_members(&payload) {
        let Some(times) = member_times(member, group) else {
            continue;
        };
        let declared = member
            .get("dateGraph")
            .and_then(Value::as_str)
            .and_then(parse_reference_day);
        let reference_day = declared.unwrap_or(today);
        if days.iter().any(|d| d.reference_day == reference_day) {
            continue;
        }
        if first.is_none() {
            first = Some((declared, times.clone()));
        }
        days.push(DaySchedule { reference_day, times });
    }

    match first {
        Some((reference_day, times)) => RawFetchResult {
            raw: payload,
            times,
            reference_day,
            is_empty: false,
            days,
        },
        None => RawFetchResult::empty(payload),
    }
}

/// Ruas com `id` inteiro e `name` string; o resto é ignorado.
pub fn parse_streets(payload: &Value) -> Vec<Street> {
    collection_members(payload)
        .iter()
        .filter_map(|item| {
            Some(Street {
                id: item.get("id")?.as_i64()?,
                name: item.get("name")?.as_str()?.to_string(),
            })
        })
        .collect()
}

/// `buildingGroups[0].chergGpv`.
pub fn parse_building_group(payload: &Value) -> Result<String, UpstreamError> {
    let groups = payload
        .get("buildingGroups")
        .and_then(Value::as_array)
        .filter(|groups| !groups.is_empty())
        .ok_or_else(|| UpstreamError::Lookup("nenhum buildingGroups retornado".into()))?;

    groups[0]
        .get("chergGpv")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|group| !group.is_empty())
        .map(str::to_string)
        .ok_or_else(|| UpstreamError::Lookup("payload de buildingGroups inválido".into()))
}

/// Cliente da API de agendamento.
#[derive(Clone)]
pub struct UpstreamClient {
    transport: Arc<dyn Transport>,
    retry: RetryPolicy,
}

impl UpstreamClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            retry: RetryPolicy::default(),
        }
    }

    /// Cliente de produção contra `base_url`.
    pub fn http(base_url: &str, timeout: StdDuration) -> Result<Self, UpstreamError> {
        Ok(Self::new(Arc::new(ReqwestTransport::new(base_url, timeout)?)))
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// GET + decodificação JSON, sem retry.
    async fn get_json(&self, request: &HttpRequest) -> Result<Value, UpstreamError> {
        let response = self.transport.get(request).await?;
        if response.status >= 500 {
            return Err(UpstreamError::Server {
                status: response.status,
                body: snippet(&response.body),
            });
        }
        if response.status >= 400 {
            return Err(UpstreamError::Client {
                status: response.status,
                body: snippet(&response.body),
            });
        }
        serde_json::from_str(&response.body).map_err(|_| UpstreamError::NonJson {
            snippet: snippet(&response.body),
        })
    }

    pub async fn fetch_schedule(
        &self,
        city_id: i64,
        street_id: i64,
        group: &str,
    ) -> Result<RawFetchResult, UpstreamError> {
        self.fetch_schedule_at(city_id, street_id, group, Utc::now()).await
    }

    /// Busca o gráfico com retry. Depois de esgotar as tentativas, um resultado
    /// vazio é devolvido como `Ok` (com `is_empty`) e um erro transitório como `Err`.
    pub async fn fetch_schedule_at(
        &self,
        city_id: i64,
        street_id: i64,
        group: &str,
        now: DateTime<Utc>,
    ) -> Result<RawFetchResult, UpstreamError> {
        let request = schedule_request(city_id, street_id, group, now);
        let attempts = self.retry.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            let is_last = attempt + 1 >= attempts;
            match self.get_json(&request).await {
                Ok(payload) => {
                    let result = parse_schedule(payload, group, now.date_naive());
                    if !result.is_empty {
                        info!(
                            "[API] Gráfico do grupo {} recebido: {} dia(s), {} slot(s) no primeiro.",
                            group,
                            result.days.len(),
                            result.times.len()
                        );
                        return Ok(result);
                    }
                    if is_last {
                        warn!(
                            "[API] Gráfico do grupo {} vazio após {} tentativa(s).",
                            group, attempts
                        );
                        return Ok(result);
                    }
                    warn!(
                        "[API] Gráfico vazio (tentativa {}/{}), nova tentativa...",
                        attempt + 1,
                        attempts
                    );
                }
                Err(err) if err.kind() == ErrorKind::Transient && !is_last => {
                    warn!(
                        "[API] Erro transitório (tentativa {}/{}): {}",
                        attempt + 1,
                        attempts,
                        err
                    );
                }
                Err(err) => return Err(err),
            }

            let delay = self.retry.delay_for(attempt);
            debug!("[API] Aguardando {:?} antes da próxima tentativa.", delay);
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    pub async fn fetch_streets(&self, city_id: i64, query: Option<&str>) -> Result<Vec<Street>, UpstreamError> {
        let mut request = HttpRequest::new("pw_streets", ACCEPT_LD_JSON)
            .param("pagination", "false")
            .param("city.id", city_id);
        if let Some(name) = query.map(str::trim).filter(|q| !q.is_empty()) {
            request = request.param("name", name);
        }
        let payload = self.get_json(&request).await?;
        Ok(parse_streets(&payload))
    }

    pub async fn fetch_building_group(&self, city_id: i64, street_id: i64) -> Result<String, UpstreamError> {
        let request = HttpRequest::new("pw-accounts/building-groups", ACCEPT_JSON)
            .param("cityId", city_id)
            .param("streetId", street_id);
        let payload = self.get_json(&request).await?;
        parse_building_group(&payload)
    }

    /// Grupo da rua como `OutageGroup`, aceito como a API o atribui.
    pub async fn resolve_group(&self, city_id: i64, street_id: i64) -> Result<OutageGroup, UpstreamError> {
        let raw = self.fetch_building_group(city_id, street_id).await?;
        raw.parse().map_err(UpstreamError::Lookup)
    }

    /// Mesma consulta, em forma de lista.
    pub async fn fetch_building_groups(&self, city_id: i64, street_id: i64) -> Result<Vec<String>, UpstreamError> {
        Ok(vec![self.fetch_building_group(city_id, street_id).await?])
    }
}
