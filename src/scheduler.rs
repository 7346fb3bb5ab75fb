// src/scheduler.rs

//! Coordenadores de polling: cada um roda no seu próprio intervalo, guarda o
//! último resultado bom e publica o estado inteiro por troca de ponteiro
//! (`watch` + `Arc`), então leitores nunca veem um estado parcial.

use crate::api::UpstreamClient;
use crate::ping::{self, Probe, ProbeTarget};
use crate::segments::{SLOT_MINUTES, build_schedule, slot_start};
use crate::types::{OutageGroup, PingResult, Segment, SegmentColor};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Estados do ciclo de atualização.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Phase {
    Idle,
    Refreshing,
    Succeeded,
    Failed,
}

/// Estado publicado por um coordenador. Somente leitura para os consumidores.
#[derive(Debug)]
pub struct PollState<T> {
    pub last_good_data: Option<Arc<T>>,
    pub last_update_succeeded: bool,
    pub last_update_timestamp: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub phase: Phase,
}

impl<T> Clone for PollState<T> {
    fn clone(&self) -> Self {
        Self {
            last_good_data: self.last_good_data.clone(),
            last_update_succeeded: self.last_update_succeeded,
            last_update_timestamp: self.last_update_timestamp,
            last_error: self.last_error.clone(),
            phase: self.phase,
        }
    }
}

impl<T> Default for PollState<T> {
    fn default() -> Self {
        Self {
            last_good_data: None,
            last_update_succeeded: false,
            last_update_timestamp: None,
            last_error: None,
            phase: Phase::Idle,
        }
    }
}

impl<T> PollState<T> {
    /// Entidades ficam indisponíveis apenas sem nenhum dado.
    pub fn is_available(&self) -> bool {
        self.last_good_data.is_some()
    }
}

/// Resultado de uma atualização.
pub enum RefreshOutcome<T> {
    Success(T),
    /// `placeholder` só é publicado se o coordenador ainda não tiver dados.
    Failed { error: String, placeholder: Option<T> },
}

/// Fonte de dados de um coordenador.
#[async_trait]
pub trait Refresher<T>: Send {
    async fn refresh(&mut self) -> RefreshOutcome<T>;
}

/// Coordenador genérico de polling.
pub struct Coordinator<T> {
    name: String,
    interval: Duration,
    refresher: Mutex<Box<dyn Refresher<T>>>,
    state: watch::Sender<Arc<PollState<T>>>,
    cycles: AtomicU64,
}

/// Restaura a fase anterior se a atualização for abandonada no meio.
struct PhaseGuard<'a, T: Send + Sync + 'static> {
    coordinator: &'a Coordinator<T>,
    previous: Arc<PollState<T>>,
    armed: bool,
}

impl<T: Send + Sync + 'static> Drop for PhaseGuard<'_, T> {
    fn drop(&mut self) {
        if self.armed {
            self.coordinator.state.send_replace(self.previous.clone());
        }
    }
}

impl<T: Send + Sync + 'static> Coordinator<T> {
    pub fn new<R>(name: impl Into<String>, interval: Duration, refresher: R) -> Self
    where
        R: Refresher<T> + 'static,
    {
        let refresher: Box<dyn Refresher<T>> = Box::new(refresher);
        let (state, _) = watch::channel(Arc::new(PollState::default()));
        Self {
            name: name.into(),
            interval,
            refresher: Mutex::new(refresher),
            state,
            cycles: AtomicU64::new(0),
        }
    }

    /// Snapshot atual (sempre completo).
    pub fn state(&self) -> Arc<PollState<T>> {
        self.state.borrow().clone()
    }

    pub fn last_good_data(&self) -> Option<Arc<T>> {
        self.state().last_good_data.clone()
    }

    pub fn last_update_succeeded(&self) -> bool {
        self.state().last_update_succeeded
    }

    /// Receptor notificado a cada novo estado publicado.
    pub fn subscribe(&self) -> watch::Receiver<Arc<PollState<T>>> {
        self.state.subscribe()
    }

    /// Chama `listener` a cada estado publicado até o cancelamento.
    pub fn add_listener<F>(&self, cancel: CancellationToken, listener: F) -> JoinHandle<()>
    where
        F: Fn(&PollState<T>) + Send + 'static,
    {
        let mut rx = self.subscribe();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    changed = rx.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        let snapshot = rx.borrow_and_update().clone();
                        listener(&snapshot);
                    }
                }
            }
        })
    }

    /// Executa uma atualização agora. Atualizações do mesmo coordenador são serializadas.
    pub async fn refresh_now(&self) -> Arc<PollState<T>> {
        let mut refresher = self.refresher.lock().await;
        let cycle = self.cycles.fetch_add(1, Ordering::Relaxed) + 1;

        let previous = self.state();
        let mut guard = PhaseGuard {
            coordinator: self,
            previous: previous.clone(),
            armed: true,
        };
        self.state.send_replace(Arc::new(PollState {
            phase: Phase::Refreshing,
            ..(*previous).clone()
        }));
        debug!("[{}][CICLO {}] Atualização iniciada.", self.name, cycle);

        let started = Instant::now();
        let outcome = refresher.refresh().await;
        guard.armed = false;

        let next = Arc::new(self.next_state(&previous, outcome, cycle));
        self.state.send_replace(next.clone());
        debug!(
            "[{}][CICLO {}] Fim do ciclo. Duração: {:?}",
            self.name,
            cycle,
            started.elapsed()
        );
        next
    }

    fn next_state(&self, previous: &PollState<T>, outcome: RefreshOutcome<T>, cycle: u64) -> PollState<T> {
        let now = Utc::now();
        match outcome {
            RefreshOutcome::Success(data) => {
                info!("[{}][CICLO {}] Atualização concluída.", self.name, cycle);
                PollState {
                    last_good_data: Some(Arc::new(data)),
                    last_update_succeeded: true,
                    last_update_timestamp: Some(now),
                    last_error: None,
                    phase: Phase::Succeeded,
                }
            }
            RefreshOutcome::Failed { error, placeholder } => {
                let last_good_data = match &previous.last_good_data {
                    Some(data) => {
                        warn!(
                            "[{}][CICLO {}] Falha na atualização, mantendo dados anteriores: {}",
                            self.name, cycle, error
                        );
                        Some(data.clone())
                    }
                    None => {
                        warn!(
                            "[{}][CICLO {}] Falha na atualização sem dados anteriores (placeholder: {}): {}",
                            self.name,
                            cycle,
                            placeholder.is_some(),
                            error
                        );
                        placeholder.map(Arc::new)
                    }
                };
                PollState {
                    last_good_data,
                    last_update_succeeded: false,
                    last_update_timestamp: Some(now),
                    last_error: Some(error),
                    phase: Phase::Failed,
                }
            }
        }
    }

    /// Loop periódico até `cancel`. Se ainda não houve atualização, a primeira é imediata.
    /// Uma atualização em andamento é abandonada no cancelamento, sem alterar o estado.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let first = if self.state().phase == Phase::Idle {
            Instant::now()
        } else {
            Instant::now() + self.interval
        };
        let mut ticker = interval_at(first, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!("[{}] Coordenador iniciado (intervalo {:?}).", self.name, self.interval);
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    warn!("[{}] Atualização em andamento abandonada.", self.name);
                    break;
                }
                _ = self.refresh_now() => {}
            }
        }
        info!("[{}] Coordenador encerrado.", self.name);
    }
}

pub type ScheduleCoordinator = Coordinator<Vec<Segment>>;
pub type ReachabilityCoordinator = Coordinator<PingResult>;

/// Segmento amarelo de 30 minutos publicado quando a primeira busca falha.
pub fn placeholder_schedule(now: DateTime<Utc>) -> Vec<Segment> {
    let start = slot_start(now);
    vec![Segment {
        start,
        end: start + chrono::Duration::minutes(SLOT_MINUTES),
        color: SegmentColor::Yellow,
    }]
}

/// Busca o gráfico e monta os segmentos.
pub struct ScheduleRefresher {
    client: UpstreamClient,
    city_id: i64,
    street_id: i64,
    group: OutageGroup,
}

impl ScheduleRefresher {
    pub fn new(client: UpstreamClient, city_id: i64, street_id: i64, group: OutageGroup) -> Self {
        Self {
            client,
            city_id,
            street_id,
            group,
        }
    }
}

#[async_trait]
impl Refresher<Vec<Segment>> for ScheduleRefresher {
    async fn refresh(&mut self) -> RefreshOutcome<Vec<Segment>> {
        let now = Utc::now();
        let failed = |error: String| RefreshOutcome::Failed {
            error,
            placeholder: Some(placeholder_schedule(now)),
        };

        match self
            .client
            .fetch_schedule_at(self.city_id, self.street_id, self.group.as_str(), now)
            .await
        {
            Ok(raw) if raw.is_empty => failed(format!("agendamento vazio para o grupo {}", self.group)),
            Ok(raw) => {
                let segments = build_schedule(&raw.days);
                if segments.is_empty() {
                    failed(format!("nenhum slot válido para o grupo {}", self.group))
                } else {
                    RefreshOutcome::Success(segments)
                }
            }
            Err(e) => failed(e.to_string()),
        }
    }
}

/// Executa a verificação de alcance; pânico ou travamento da sonda viram `false`.
pub struct ReachabilityRefresher {
    probe: Arc<dyn Probe>,
    target: ProbeTarget,
}

impl ReachabilityRefresher {
    pub fn new(probe: Arc<dyn Probe>, target: ProbeTarget) -> Self {
        Self { probe, target }
    }

    fn unreachable(&self) -> PingResult {
        PingResult {
            reachable: false,
            target_host: self.target.host.clone(),
            target_port: self.target.reported_port(),
            method: self.target.method,
        }
    }
}

#[async_trait]
impl Refresher<PingResult> for ReachabilityRefresher {
    async fn refresh(&mut self) -> RefreshOutcome<PingResult> {
        let deadline = self.target.timeout + Duration::from_secs(2);
        let attempt = AssertUnwindSafe(ping::check(self.probe.as_ref(), &self.target)).catch_unwind();

        let result = match tokio::time::timeout(deadline, attempt).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => {
                warn!("[PING] Sonda de {} entrou em pânico; tratando como inalcançável.", self.target.host);
                self.unreachable()
            }
            Err(_) => {
                warn!("[PING] Sonda de {} excedeu {:?}.", self.target.host, deadline);
                self.unreachable()
            }
        };
        RefreshOutcome::Success(result)
    }
}
