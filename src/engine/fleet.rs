// Copyright 2025
// Licensed under the Elastic License v2.0

//! Supervises one stream controller per table.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use hashbrown::HashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, warn, Instrument};

use crate::core::{CloseSignal, Connectors, StreamId};
use crate::engine::controller::{StreamController, StreamOutcome, StreamSettings};
use crate::state_store::StateStore;

/// Shutdown flag and registry of running streams, shared by the fleet and its workers.
pub struct FleetState {
    shutdown_tx: watch::Sender<bool>,
    shutdown_requests: AtomicU32,
    active: Mutex<HashMap<StreamId, CloseSignal>>,
}

impl FleetState {
    pub fn new() -> Arc<Self> {
        let (shutdown_tx, _) = watch::channel(false);
        Arc::new(Self {
            shutdown_tx,
            shutdown_requests: AtomicU32::new(0),
            active: Mutex::new(HashMap::new()),
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Registers a running stream. A stream registered after shutdown was
    /// requested is closed right away.
    pub fn register(&self, stream: StreamId, signal: CloseSignal) {
        let mut active = self.active.lock();
        if self.is_shutting_down() {
            signal.close();
        }
        active.insert(stream, signal);
    }

    pub fn deregister(&self, stream: &StreamId) {
        self.active.lock().remove(stream);
    }

    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    /// Raises the shutdown flag and closes every active source connection so
    /// blocked reads return. Returns `true` for the first request only.
    pub fn request_shutdown(&self) -> bool {
        let first = self.shutdown_requests.fetch_add(1, Ordering::SeqCst) == 0;
        self.shutdown_tx.send_replace(true);

        let active = self.active.lock();
        for (stream, signal) in active.iter() {
            info!("Closing connection of {}", stream);
            signal.close();
        }
        first
    }
}

/// Final status of every stream.
#[derive(Debug, Default)]
pub struct FleetReport {
    pub outcomes: Vec<(StreamId, StreamOutcome)>,
}

impl FleetReport {
    pub fn failed_count(&self) -> usize {
        self.outcomes.iter().filter(|(_, o)| o.is_failed()).count()
    }

    pub fn exit_code(&self) -> i32 {
        if self.failed_count() > 0 {
            1
        } else {
            0
        }
    }
}

pub struct Fleet {
    state: Arc<FleetState>,
    workers: Vec<(StreamId, JoinHandle<StreamOutcome>)>,
}

impl Fleet {
    /// Spawns one controller per stream.
    pub fn start(
        streams: Vec<StreamId>,
        settings: StreamSettings,
        store: StateStore,
        connectors: Arc<dyn Connectors>,
    ) -> Self {
        let state = FleetState::new();
        let mut workers = Vec::with_capacity(streams.len());

        for stream in streams {
            let span = info_span!("stream", table = %stream);
            let worker = run_stream(
                stream.clone(),
                settings.clone(),
                store.clone(),
                connectors.clone(),
                state.clone(),
            )
            .instrument(span);
            workers.push((stream, tokio::spawn(worker)));
        }

        info!("Started {} streams", workers.len());
        Self { state, workers }
    }

    pub fn state(&self) -> Arc<FleetState> {
        self.state.clone()
    }

    /// See [`FleetState::request_shutdown`].
    pub fn shutdown(&self) -> bool {
        self.state.request_shutdown()
    }

    /// Waits for every stream to end.
    pub async fn join(self) -> FleetReport {
        let mut report = FleetReport::default();
        for (stream, worker) in self.workers {
            let outcome = match worker.await {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!("Stream {} worker panicked: {}", stream, e);
                    StreamOutcome::Failed(format!("worker panicked: {}", e))
                }
            };
            report.outcomes.push((stream, outcome));
        }

        let failed = report.failed_count();
        if failed > 0 {
            warn!("{} of {} streams failed", failed, report.outcomes.len());
        } else {
            info!("All {} streams stopped", report.outcomes.len());
        }
        report
    }
}

async fn run_stream(
    stream: StreamId,
    settings: StreamSettings,
    store: StateStore,
    connectors: Arc<dyn Connectors>,
    state: Arc<FleetState>,
) -> StreamOutcome {
    let sink = match connectors.sink().await {
        Ok(sink) => sink,
        Err(e) => {
            error!("Failed to connect to sink: {}", e);
            return StreamOutcome::Failed(e.to_string());
        }
    };
    let source = connectors.source(&stream);
    state.register(stream.clone(), source.close_signal());

    let controller =
        StreamController::new(stream.clone(), settings, source, sink, store, state.subscribe());
    let outcome = controller.run().await;

    state.deregister(&stream);
    outcome
}
