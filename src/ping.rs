//! ping.rs: Verificação de alcance (ICMP via `ping` do sistema ou conexão TCP)
//!
//! A verificação nunca propaga erro: qualquer falha (resolução, timeout,
//! processo, conexão recusada) vira `false`.

use crate::types::{PingResult, ProbeMethod};
use async_trait::async_trait;
use std::net::{IpAddr, SocketAddr};
use tokio::net::TcpStream;
use tokio::process::Command;
use tokio::time::{Duration, timeout};
use tracing::{debug, warn};
use trust_dns_resolver::TokioAsyncResolver;

/// Alvo da verificação.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeTarget {
    pub host: String,
    pub port: Option<u16>,
    pub timeout: Duration,
    pub method: ProbeMethod,
}

impl ProbeTarget {
    /// Porta informada no resultado; ICMP não tem porta.
    pub fn reported_port(&self) -> Option<u16> {
        match self.method {
            ProbeMethod::Tcp => self.port,
            ProbeMethod::Icmp => None,
        }
    }
}

/// Verificação de alcance como colaborador externo.
#[async_trait]
pub trait Probe: Send + Sync {
    async fn probe(&self, target: &ProbeTarget) -> bool;
}

/// Executa a verificação e monta o `PingResult` do ciclo.
pub async fn check(probe: &dyn Probe, target: &ProbeTarget) -> PingResult {
    let reachable = probe.probe(target).await;
    PingResult {
        reachable,
        target_host: target.host.clone(),
        target_port: target.reported_port(),
        method: target.method,
    }
}

/// Implementação de rede real.
pub struct NetworkProbe {
    resolver: Option<TokioAsyncResolver>,
}

impl Default for NetworkProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl NetworkProbe {
    /// Usa a configuração de DNS do sistema; sem ela, só endereços IP literais funcionam.
    pub fn new() -> Self {
        let resolver = match TokioAsyncResolver::tokio_from_system_conf() {
            Ok(resolver) => Some(resolver),
            Err(e) => {
                warn!("[PING] Resolver DNS indisponível, apenas IPs literais: {}", e);
                None
            }
        };
        Self { resolver }
    }

    async fn resolve(&self, host: &str) -> Option<IpAddr> {
        if let Ok(ip) = host.trim().parse::<IpAddr>() {
            return Some(ip);
        }
        let resolver = self.resolver.as_ref()?;
        match resolver.lookup_ip(host.trim()).await {
            Ok(lookup) => lookup.iter().next(),
            Err(e) => {
                debug!("[PING] Falha ao resolver {}: {}", host, e);
                None
            }
        }
    }

    async fn icmp(&self, address: IpAddr, wait: Duration) -> bool {
        // `ping -W` só aceita segundos inteiros.
        let wait_secs = wait.as_secs_f64().round().max(1.0) as u64;

        let mut cmd = Command::new("ping");
        if address.is_ipv6() {
            cmd.arg("-6");
        } else {
            cmd.arg("-4");
        }
        cmd.arg("-c")
            .arg("1")
            .arg("-W")
            .arg(wait_secs.to_string())
            .arg("-n")
            .arg(address.to_string())
            .kill_on_drop(true);

        match timeout(wait + Duration::from_secs(1), cmd.output()).await {
            Ok(Ok(output)) => output.status.success(),
            Ok(Err(e)) => {
                debug!("[PING] Falha ao executar ping: {}", e);
                false
            }
            Err(_) => false,
        }
    }

    async fn tcp(&self, address: IpAddr, port: u16, wait: Duration) -> bool {
        match timeout(wait, TcpStream::connect(SocketAddr::new(address, port))).await {
            Ok(Ok(_stream)) => true,
            Ok(Err(e)) => {
                debug!("[PING] Conexão TCP com {}:{} falhou: {}", address, port, e);
                false
            }
            Err(_) => false,
        }
    }
}

#[async_trait]
impl Probe for NetworkProbe {
    async fn probe(&self, target: &ProbeTarget) -> bool {
        let Some(address) = self.resolve(&target.host).await else {
            return false;
        };
        match (target.method, target.port) {
            (ProbeMethod::Icmp, _) => self.icmp(address, target.timeout).await,
            (ProbeMethod::Tcp, Some(port)) => self.tcp(address, port, target.timeout).await,
            (ProbeMethod::Tcp, None) => {
                warn!("[PING] Verificação TCP de {} sem porta configurada.", target.host);
                false
            }
        }
    }
}
