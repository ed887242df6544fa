use facecheck_core::{FaceComparator, FaceDetector, ReferenceStore, VerificationResult, Verifier, VerifyError};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

/// Queued requests beyond this wait in the D-Bus handler.
const QUEUE_DEPTH: usize = 16;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Verify(#[from] VerifyError),
    #[error("verification exceeded {0:?}")]
    Timeout(Duration),
    #[error("failed to spawn engine worker: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine workers exited")]
    ChannelClosed,
}

/// Message sent from D-Bus handlers to the worker pool.
struct VerifyRequest {
    subject: String,
    probe: Vec<u8>,
    reply: oneshot::Sender<Result<VerificationResult, VerifyError>>,
}

/// Clone-safe handle to the engine workers.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<VerifyRequest>,
    workers: usize,
}

impl EngineHandle {
    /// Verify `probe` against `subject`'s reference, giving up after `timeout`.
    ///
    /// A request whose caller timed out before a worker picked it up is skipped.
    pub async fn verify(
        &self,
        subject: String,
        probe: Vec<u8>,
        timeout: Duration,
    ) -> Result<VerificationResult, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        let request = VerifyRequest {
            subject,
            probe,
            reply: reply_tx,
        };

        let round_trip = async {
            self.tx.send(request).await.map_err(|_| EngineError::ChannelClosed)?;
            reply_rx.await.map_err(|_| EngineError::ChannelClosed)?.map_err(EngineError::from)
        };

        tokio::time::timeout(timeout, round_trip)
            .await
            .map_err(|_| EngineError::Timeout(timeout))?
    }

    pub fn workers(&self) -> usize {
        self.workers
    }
}

/// Spawn `workers` OS threads that share one request queue.
///
/// The pipeline is CPU-bound, so it runs off the async runtime. Every
/// worker borrows the same immutable verifier.
pub fn spawn_engine<D, S, C>(workers: usize, verifier: Arc<Verifier<D, S, C>>) -> Result<EngineHandle, EngineError>
where
    D: FaceDetector + 'static,
    S: ReferenceStore + 'static,
    C: FaceComparator + 'static,
{
    let workers = workers.max(1);
    let (tx, rx) = mpsc::channel::<VerifyRequest>(QUEUE_DEPTH);
    let rx = Arc::new(Mutex::new(rx));

    for id in 0..workers {
        let rx = Arc::clone(&rx);
        let verifier = Arc::clone(&verifier);
        std::thread::Builder::new()
            .name(format!("facecheck-worker-{id}"))
            .spawn(move || worker_loop(id, &rx, &verifier))
            .map_err(EngineError::Spawn)?;
    }
    tracing::info!(workers, "engine workers started");

    Ok(EngineHandle { tx, workers })
}

fn worker_loop<D, S, C>(id: usize, rx: &Mutex<mpsc::Receiver<VerifyRequest>>, verifier: &Verifier<D, S, C>)
where
    D: FaceDetector,
    S: ReferenceStore,
    C: FaceComparator,
{
    tracing::debug!(worker = id, "engine worker started");
    loop {
        // Lock only while waiting so other workers can pick up the next request.
        let next = match rx.lock() {
            Ok(mut guard) => guard.blocking_recv(),
            Err(_) => {
                tracing::error!(worker = id, "request queue lock poisoned");
                break;
            }
        };
        let Some(req) = next else {
            break;
        };

        if req.reply.is_closed() {
            tracing::debug!(worker = id, subject = %req.subject, "caller gone; skipping request");
            continue;
        }

        let result = verifier.verify(&req.subject, &req.probe);
        if let Err(e) = &result {
            tracing::debug!(worker = id, subject = %req.subject, error = %e, "verification failed");
        }
        if req.reply.send(result).is_err() {
            tracing::warn!(worker = id, subject = %req.subject, "caller gone before result was ready");
        }
    }
    tracing::debug!(worker = id, "engine worker exiting");
}
