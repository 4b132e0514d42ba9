//! Run report aggregation and output files

use crate::proxy::checker::{Settlement, TerminalState};
use crate::proxy::models::{ProbeResult, ProxyRecord};
use crate::proxy::progress::ProgressSnapshot;
use crate::Result;
use anyhow::Context;
use std::fs;
use std::path::Path;

/// Everything a finished run produced
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    /// One entry per endpoint classified valid, in settlement order
    pub results: Vec<ProbeResult>,
    pub progress: ProgressSnapshot,
    /// Endpoints settled from the cache without probing
    pub cache_hits: usize,
    /// Endpoints that were probed live
    pub probed: usize,
    /// Tasks that died before settling
    pub aborted: usize,
}

impl RunReport {
    /// Collect the non-empty outcomes of a run
    pub fn from_settlements(settlements: Vec<Settlement>, progress: ProgressSnapshot) -> Self {
        let mut report = RunReport {
            progress,
            ..Default::default()
        };

        for settlement in settlements {
            match settlement.state {
                TerminalState::CachedValid | TerminalState::CachedInvalid => {
                    report.cache_hits += 1
                }
                TerminalState::ProbeSuccess | TerminalState::ProbeFailure => report.probed += 1,
                TerminalState::Aborted => report.aborted += 1,
            }
            if let Some(result) = settlement.result {
                report.results.push(result);
            }
        }

        report
    }

    pub fn valid_count(&self) -> usize {
        self.results.len()
    }

    /// `host:port` identities of every valid endpoint
    pub fn valid_endpoints(&self) -> Vec<String> {
        self.results.iter().map(|r| r.endpoint.to_string()).collect()
    }

    /// Flat records for structured output
    pub fn records(&self) -> Vec<ProxyRecord> {
        self.results.iter().map(ProbeResult::to_record).collect()
    }

    /// Write one host per line
    pub fn write_hosts<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = self
            .results
            .iter()
            .map(|r| r.endpoint.host.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }

    /// Write the records as a pretty-printed JSON array
    pub fn write_json<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let content = serde_json::to_string_pretty(&self.records())?;

        fs::write(path, content).with_context(|| format!("writing {}", path.display()))?;
        Ok(())
    }
}
