pub mod cli;
pub mod collect;
pub mod config;
pub mod diagnostics;
pub mod emu;
pub mod eventlog;
pub mod layout;
pub mod metrics;
pub mod orchestrator;
pub mod plot;
pub mod scenario;
pub mod sweep;
pub mod topo;
pub mod trafficgen;

#[cfg(test)]
mod test;
