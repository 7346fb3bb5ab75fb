//! Agenda de desligamentos de energia (Ternopil) + verificação de alcance.
//!
//! Fluxo: `api` busca o gráfico, `segments` normaliza em segmentos coalescidos,
//! `scheduler` mantém o último resultado bom e `query`/`sensors` derivam os
//! valores expostos sob demanda.

pub mod api;
pub mod config;
pub mod ping;
pub mod query;
pub mod scheduler;
pub mod segments;
pub mod sensors;
pub mod types;
