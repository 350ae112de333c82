//! Background training thread with an async request handle.

use crate::detector::FaceDetector;
use crate::source::SampleSource;
use crate::trainer::{TrainError, Trainer, TrainingOutcome};
use crate::types::Sample;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("training failed: {0}")]
    Train(#[from] TrainError),
    #[error("training worker exited")]
    ChannelClosed,
    #[error("failed to spawn training thread: {0}")]
    Spawn(#[source] std::io::Error),
}

enum TrainRequest {
    Samples {
        samples: Vec<Sample>,
        reply: oneshot::Sender<Result<TrainingOutcome, TrainError>>,
    },
    Source {
        source: Box<dyn SampleSource + Send>,
        reply: oneshot::Sender<Result<TrainingOutcome, TrainError>>,
    },
}

/// Clone-safe handle to the training thread.
#[derive(Clone)]
pub struct TrainingHandle {
    tx: mpsc::Sender<TrainRequest>,
}

impl TrainingHandle {
    /// Train on an in-memory batch.
    pub async fn train(&self, samples: Vec<Sample>) -> Result<TrainingOutcome, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrainRequest::Samples { samples, reply }).await?;
        Ok(rx.await.map_err(|_| WorkerError::ChannelClosed)??)
    }

    /// Read `source` on the worker thread and train on it.
    pub async fn train_from(
        &self,
        source: Box<dyn SampleSource + Send>,
    ) -> Result<TrainingOutcome, WorkerError> {
        let (reply, rx) = oneshot::channel();
        self.send(TrainRequest::Source { source, reply }).await?;
        Ok(rx.await.map_err(|_| WorkerError::ChannelClosed)??)
    }

    async fn send(&self, req: TrainRequest) -> Result<(), WorkerError> {
        self.tx.send(req).await.map_err(|_| WorkerError::ChannelClosed)
    }
}

pub struct TrainingWorker;

impl TrainingWorker {
    /// Move `trainer` onto a dedicated OS thread.
    ///
    /// Requests are served one at a time, so at most one model write is in
    /// flight. The thread exits when every handle has been dropped.
    pub fn spawn<D>(trainer: Trainer<D>) -> Result<TrainingHandle, WorkerError>
    where
        D: FaceDetector + Send + 'static,
    {
        let (tx, mut rx) = mpsc::channel::<TrainRequest>(4);

        std::thread::Builder::new()
            .name("rollcall-trainer".into())
            .spawn(move || {
                tracing::info!(model = %trainer.model_path().display(), "training worker started");
                while let Some(req) = rx.blocking_recv() {
                    match req {
                        TrainRequest::Samples { samples, reply } => {
                            let _ = reply.send(trainer.train(samples));
                        }
                        TrainRequest::Source { source, reply } => {
                            let _ = reply.send(trainer.train_from(source.as_ref()));
                        }
                    }
                }
                tracing::info!("training worker exiting");
            })
            .map_err(WorkerError::Spawn)?;

        Ok(TrainingHandle { tx })
    }
}
