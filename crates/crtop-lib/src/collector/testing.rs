//! Test doubles shared by entity and connector tests

use super::{Collector, LogCollector, NoopLogCollector};
use crate::error::CollectorError;
use crate::models::Metrics;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// Collector driven by the test, counting starts and handed-out streams
#[derive(Default)]
pub(crate) struct InstrumentedCollector {
    running: AtomicBool,
    fail_start: AtomicBool,
    starts: AtomicUsize,
    streams: AtomicUsize,
    channel: Mutex<Channel>,
}

#[derive(Default)]
struct Channel {
    tx: Option<mpsc::Sender<Metrics>>,
    rx: Option<mpsc::Receiver<Metrics>>,
}

impl InstrumentedCollector {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub(crate) fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    pub(crate) fn streams(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    pub(crate) fn set_fail_start(&self, fail: bool) {
        self.fail_start.store(fail, Ordering::SeqCst);
    }

    /// Emit a sample on the open stream; false when no stream is open
    pub(crate) async fn push(&self, metrics: Metrics) -> bool {
        let tx = self.channel.lock().unwrap().tx.clone();
        match tx {
            Some(tx) => tx.send(metrics).await.is_ok(),
            None => false,
        }
    }

    /// Close the stream as if the underlying resource vanished
    pub(crate) fn lose_resource(&self) {
        self.channel.lock().unwrap().tx = None;
    }
}

#[async_trait]
impl Collector for InstrumentedCollector {
    async fn start(&self) -> Result<(), CollectorError> {
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(CollectorError::Io(std::io::Error::new(
                std::io::ErrorKind::Other,
                "injected start failure",
            )));
        }
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(CollectorError::AlreadyRunning("instrumented".into()));
        }
        self.starts.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(16);
        let mut channel = self.channel.lock().unwrap();
        channel.tx = Some(tx);
        channel.rx = Some(rx);
        Ok(())
    }

    async fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        let mut channel = self.channel.lock().unwrap();
        channel.tx = None;
        channel.rx = None;
    }

    fn running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    fn stream(&self) -> Option<mpsc::Receiver<Metrics>> {
        let rx = self.channel.lock().unwrap().rx.take();
        if rx.is_some() {
            self.streams.fetch_add(1, Ordering::SeqCst);
        }
        rx
    }

    fn logs(&self) -> Arc<dyn LogCollector> {
        Arc::new(NoopLogCollector)
    }
}

/// Poll `check` until it holds, failing the test after two seconds
pub(crate) async fn eventually(what: &str, check: impl Fn() -> bool) {
    for _ in 0..200 {
        if check() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition never held: {what}");
}
