//! Demo data sources for the leader.
//!
//! The coordinator calls [`DataSource::start`] once per leadership term.
//! Starting a new term aborts whatever the previous term left running.

use relay_core::{Deliver, RelayError};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum SourceKind {
    /// Emit a numbered tick every interval
    Ticker,
    /// Relay lines read from stdin
    Lines,
}

pub struct DataSource {
    kind: SourceKind,
    tick: Duration,
    current: Option<JoinHandle<()>>,
    terms: u64,
}

impl DataSource {
    pub fn new(kind: SourceKind, tick: Duration) -> Self {
        Self {
            kind,
            tick,
            current: None,
            terms: 0,
        }
    }

    /// Begin producing for a new leadership term.
    pub fn start(&mut self, deliver: Deliver) {
        if let Some(previous) = self.current.take() {
            previous.abort();
        }
        self.terms += 1;
        info!("Starting {:?} source (term {})", self.kind, self.terms);

        let task = match self.kind {
            SourceKind::Ticker => tokio::spawn(run_ticker(deliver, self.tick, self.terms)),
            SourceKind::Lines => tokio::spawn(run_lines(deliver)),
        };
        self.current = Some(task);
    }

    /// Terms started so far.
    pub fn terms(&self) -> u64 {
        self.terms
    }
}

impl Drop for DataSource {
    fn drop(&mut self) {
        if let Some(task) = self.current.take() {
            task.abort();
        }
    }
}

/// Returns false once the peer is gone and the source should stop.
fn forward(deliver: &Deliver, message: String) -> bool {
    match deliver.send(message) {
        Ok(()) => true,
        Err(RelayError::Stopped) => {
            debug!("Peer stopped, ending source");
            false
        }
        Err(e) => {
            warn!("{}", e);
            true
        }
    }
}

async fn run_ticker(deliver: Deliver, tick: Duration, term: u64) {
    let mut interval = tokio::time::interval(tick);
    // The first tick completes immediately
    interval.tick().await;

    let mut n: u64 = 0;
    loop {
        interval.tick().await;
        n += 1;
        if !forward(&deliver, format!("tick {} (term {})", n, term)) {
            break;
        }
    }
}

async fn run_lines(deliver: Deliver) {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                if !forward(&deliver, line) {
                    break;
                }
            }
            Ok(None) => {
                info!("Source input closed");
                break;
            }
            Err(e) => {
                warn!("Failed to read source input: {}", e);
                break;
            }
        }
    }
}
