use anyhow::{Context, Result};
use chrono::Utc;
use grid_schedule::api::UpstreamClient;
use grid_schedule::config::Config;
use grid_schedule::ping::NetworkProbe;
use grid_schedule::scheduler::{
    Coordinator, Phase, ReachabilityCoordinator, ReachabilityRefresher, ScheduleCoordinator,
    ScheduleRefresher,
};
use grid_schedule::sensors::{GroupView, PowerView, ScheduleView};
use grid_schedule::types::OutageGroup;
use std::sync::{Arc, Mutex};
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Usa o grupo configurado ou pergunta à API qual é o grupo da rua.
async fn resolve_group(config: &Config, client: &UpstreamClient) -> Result<OutageGroup> {
    if let Some(group) = &config.group {
        return group.parse().map_err(anyhow::Error::msg);
    }
    client
        .resolve_group(config.city_id, config.street_id)
        .await
        .context("falha ao resolver o grupo da rua")
}

/// Nome da rua para exibição; em caso de falha, o próprio id.
async fn street_title(config: &Config, client: &UpstreamClient) -> String {
    if let Some(name) = &config.street_name {
        return name.clone();
    }
    match client.fetch_streets(config.city_id, None).await {
        Ok(streets) => streets
            .into_iter()
            .find(|s| s.id == config.street_id)
            .map(|s| s.name)
            .unwrap_or_else(|| config.street_id.to_string()),
        Err(e) => {
            warn!("Busca de ruas falhou: {}", e);
            config.street_id.to_string()
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Inicializa o sistema de logging (tracing)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::load()?;
    config.validate()?;
    let tz = config.tz()?;
    info!("Configuração feita: {}", config.diagnostics());

    let client = UpstreamClient::http(&config.api_base_url, config.http_timeout())?;
    let group = resolve_group(&config, &client).await?;
    let street = street_title(&config, &client).await;
    info!(
        "Monitorando {} (grupo {}); opções de grupo: {:?}",
        street,
        group,
        GroupView::new(group.clone()).options
    );

    let schedule: Arc<ScheduleCoordinator> = Arc::new(Coordinator::new(
        "AGENDA",
        config.schedule_interval(),
        ScheduleRefresher::new(client.clone(), config.city_id, config.street_id, group),
    ));
    let reachability: Arc<ReachabilityCoordinator> = Arc::new(Coordinator::new(
        "PING",
        config.ping_interval(),
        ReachabilityRefresher::new(Arc::new(NetworkProbe::new()), config.ping_target()),
    ));

    // Primeira atualização: falhas não impedem a inicialização (placeholder)
    schedule.refresh_now().await;
    reachability.refresh_now().await;

    let cancel = CancellationToken::new();

    let schedule_listener = schedule.add_listener(cancel.clone(), move |state| {
        if state.phase == Phase::Refreshing {
            return;
        }
        match ScheduleView::from_state(state, Utc::now(), &tz) {
            Some(view) => match serde_json::to_string(&view) {
                Ok(json) => info!("[AGENDA] ok={} {}", state.last_update_succeeded, json),
                Err(e) => error!("[AGENDA] Falha ao serializar sensores: {}", e),
            },
            None => warn!("[AGENDA] Sem dados; entidades indisponíveis."),
        }
    });

    let last_power: Mutex<Option<bool>> = Mutex::new(None);
    let ping_listener = reachability.add_listener(cancel.clone(), move |state| {
        let Some(view) = PowerView::from_state(state) else {
            return;
        };
        if let Ok(mut last) = last_power.lock() {
            if *last != Some(view.power_ping) {
                info!(
                    "[PING] {}:{:?} ({}) -> energia {}",
                    view.host,
                    view.port,
                    view.method,
                    if view.power_ping { "presente" } else { "ausente" }
                );
                *last = Some(view.power_ping);
            }
        }
    });

    println!("Iniciando os trabalhos");
    let handles: Vec<task::JoinHandle<()>> = vec![
        task::spawn(schedule.clone().run(cancel.clone())),
        task::spawn(reachability.clone().run(cancel.clone())),
        schedule_listener,
        ping_listener,
    ];

    tokio::signal::ctrl_c().await?;
    info!("Sinal de encerramento recebido.");
    cancel.cancel();

    for handle in handles {
        if let Err(e) = handle.await {
            error!("Tarefa terminou com erro: {:?}", e);
        }
    }

    Ok(())
}
