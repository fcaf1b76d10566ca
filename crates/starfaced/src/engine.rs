use starface_core::{ClassifyError, FaceResult, LoadedArtifacts};
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Classify(#[from] ClassifyError),
    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine workers exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the worker threads.
enum EngineRequest {
    Classify {
        payload: String,
        span: tracing::Span,
        reply: oneshot::Sender<Result<Vec<FaceResult>, EngineError>>,
    },
}

/// Clone-safe handle to the worker pool.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    artifacts: Arc<LoadedArtifacts>,
}

impl EngineHandle {
    /// Request classification of a base64 / data-URI image payload.
    pub async fn classify(&self, payload: String) -> Result<Vec<FaceResult>, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(EngineRequest::Classify {
                payload,
                span: tracing::Span::current(),
                reply: reply_tx,
            })
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)?
    }

    /// Known class names in id order.
    pub fn classes(&self) -> &[String] {
        self.artifacts.context.labels().names()
    }
}

/// Spawn `workers` OS threads sharing one request queue.
///
/// Classification is CPU-bound, so it never runs on the async runtime.
/// Workers exit once every handle has been dropped.
pub fn spawn_engine(artifacts: LoadedArtifacts, workers: usize) -> Result<EngineHandle, EngineError> {
    let workers = workers.max(1);
    let artifacts = Arc::new(artifacts);
    let (tx, rx) = mpsc::channel::<EngineRequest>(workers * 4);
    let rx = Arc::new(Mutex::new(rx));

    for id in 0..workers {
        let rx = Arc::clone(&rx);
        let artifacts = Arc::clone(&artifacts);
        std::thread::Builder::new()
            .name(format!("starface-worker-{id}"))
            .spawn(move || worker_loop(id, &rx, &artifacts))
            .map_err(EngineError::Spawn)?;
    }
    tracing::info!(workers, "engine workers started");

    Ok(EngineHandle { tx, artifacts })
}

fn worker_loop(id: usize, rx: &Mutex<mpsc::Receiver<EngineRequest>>, artifacts: &LoadedArtifacts) {
    tracing::debug!(worker = id, "engine worker started");
    loop {
        // Hold the lock only while waiting; the next idle worker takes over.
        let request = match rx.lock() {
            Ok(mut guard) => guard.blocking_recv(),
            Err(_) => break,
        };
        let Some(request) = request else {
            break;
        };

        match request {
            EngineRequest::Classify { payload, span, reply } => {
                let _entered = span.enter();
                let result = artifacts
                    .pipeline
                    .classify(&artifacts.context, &payload)
                    .map_err(EngineError::from);
                if reply.send(result).is_err() {
                    tracing::debug!(worker = id, "requester gone; result dropped");
                }
            }
        }
    }
    tracing::debug!(worker = id, "engine worker exiting");
}
