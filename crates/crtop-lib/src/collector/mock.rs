//! Synthetic collector for the mock backend

use super::{Collector, LogCollector, NoopLogCollector, Poller, Sampler};
use crate::error::CollectorError;
use crate::models::Metrics;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const MOCK_MEM_LIMIT: u64 = 2 * 1024 * 1024 * 1024;

/// Collector emitting deterministic, slowly varying metrics
pub struct MockCollector {
    poller: Poller,
}

impl MockCollector {
    pub fn new(id: impl Into<String>, period: Duration) -> Self {
        Self {
            poller: Poller::new(id, period),
        }
    }
}

#[async_trait]
impl Collector for MockCollector {
    async fn start(&self) -> Result<(), CollectorError> {
        let id = self.poller.id().to_string();
        let seed = id.bytes().map(u64::from).sum();
        self.poller.start(MockSampler {
            id,
            seed,
            tick: 0,
            net: (0, 0),
            io: (0, 0),
        })
    }

    async fn stop(&self) {
        self.poller.stop();
    }

    fn running(&self) -> bool {
        self.poller.running()
    }

    fn stream(&self) -> Option<mpsc::Receiver<Metrics>> {
        self.poller.stream()
    }

    fn logs(&self) -> Arc<dyn LogCollector> {
        Arc::new(NoopLogCollector)
    }
}

struct MockSampler {
    id: String,
    seed: u64,
    tick: u64,
    net: (u64, u64),
    io: (u64, u64),
}

#[async_trait]
impl Sampler for MockSampler {
    async fn sample(&mut self) -> Result<Option<Metrics>> {
        self.tick += 1;
        let phase = (self.seed + self.tick * 7) % 100;

        self.net.0 += 1_500 * (phase + 1);
        self.net.1 += 700 * (phase + 1);
        self.io.0 += 4_096 * (self.seed % 5);
        self.io.1 += 8_192 * (phase % 3);

        let mem_usage = MOCK_MEM_LIMIT / 100 * (10 + (self.seed + self.tick) % 40);

        Ok(Some(Metrics {
            id: self.id.clone(),
            cpu_util: phase as f64,
            net_rx: self.net.0,
            net_tx: self.net.1,
            mem_limit: MOCK_MEM_LIMIT,
            mem_percent: mem_usage as f64 / MOCK_MEM_LIMIT as f64 * 100.0,
            mem_usage,
            io_read: self.io.0,
            io_write: self.io.1,
            pids: 1 + self.seed % 12,
        }))
    }
}
