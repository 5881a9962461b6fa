use super::chunks::ChunkSource;
use super::transport::UploadTransport;
use crate::services::upload_service::{FileResponse, InitUploadRequest};
use std::collections::HashSet;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverState {
    Idle,
    Initiating,
    Uploading,
    Paused,
    Completing,
    Cancelled,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ControlSignal {
    Run,
    Pause,
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UploadProgress {
    pub completed_chunks: u32,
    pub total_chunks: u32,
}

impl UploadProgress {
    pub fn ratio(&self) -> f64 {
        if self.total_chunks == 0 {
            0.0
        } else {
            self.completed_chunks as f64 / self.total_chunks as f64
        }
    }
}

#[derive(Debug, Error)]
pub enum DriverError {
    #[error("upload was cancelled")]
    Cancelled,

    #[error("chunk {index} failed: {source}")]
    ChunkFailed {
        index: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

/// Pause/resume/cancel controls, cloneable into whatever task owns the UI.
#[derive(Clone)]
pub struct DriverHandle {
    control: watch::Sender<ControlSignal>,
}

impl DriverHandle {
    pub fn pause(&self) {
        let _ = self.control.send(ControlSignal::Pause);
    }

    pub fn resume(&self) {
        let _ = self.control.send(ControlSignal::Run);
    }

    pub fn cancel(&self) {
        let _ = self.control.send(ControlSignal::Cancel);
    }
}

/// Cooperative state machine driving one chunked upload.
///
/// `idle → initiating → uploading ⇄ paused → completing → idle`, with
/// `cancelled` and `failed` absorbing. Chunk jobs run in a bounded
/// worker pool; control signals are observed at the dispatch points
/// between chunks, never by interrupting in-flight I/O. A failed run
/// keeps its session id, so calling [`UploadDriver::run`] again resumes
/// from whatever the coordinator already has recorded.
pub struct UploadDriver {
    transport: Arc<dyn UploadTransport>,
    source: Arc<dyn ChunkSource>,
    concurrency: usize,
    control_tx: watch::Sender<ControlSignal>,
    control_rx: watch::Receiver<ControlSignal>,
    state_tx: watch::Sender<DriverState>,
    progress_tx: watch::Sender<UploadProgress>,
    session_id: Option<String>,
}

impl UploadDriver {
    pub fn new(transport: Arc<dyn UploadTransport>, source: Arc<dyn ChunkSource>) -> Self {
        let (control_tx, control_rx) = watch::channel(ControlSignal::Run);
        let (state_tx, _) = watch::channel(DriverState::Idle);
        let (progress_tx, _) = watch::channel(UploadProgress {
            completed_chunks: 0,
            total_chunks: source.total_chunks(),
        });

        Self {
            transport,
            source,
            concurrency: 4,
            control_tx,
            control_rx,
            state_tx,
            progress_tx,
            session_id: None,
        }
    }

    /// Bound on chunk jobs in flight at once.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Attach to an existing session instead of initiating a new one.
    /// The first thing `run` does then is ask the coordinator which
    /// chunks already landed.
    pub fn attach_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    pub fn handle(&self) -> DriverHandle {
        DriverHandle {
            control: self.control_tx.clone(),
        }
    }

    pub fn state(&self) -> watch::Receiver<DriverState> {
        self.state_tx.subscribe()
    }

    pub fn progress(&self) -> watch::Receiver<UploadProgress> {
        self.progress_tx.subscribe()
    }

    /// The session this driver is bound to, if any survives the last run.
    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub async fn run(&mut self) -> Result<FileResponse, DriverError> {
        let total = self.source.total_chunks();
        self.set_state(DriverState::Initiating);

        let (session_id, mut pending) = match self.session_id.clone() {
            Some(id) => {
                let status = self.transport.session_status(&id).await?;
                let done: HashSet<u32> =
                    status.uploaded_indices.iter().map(|i| *i as u32).collect();
                self.send_progress(done.len() as u32, total);
                let pending: Vec<u32> = (0..total).filter(|i| !done.contains(i)).collect();
                (id, pending)
            }
            None => {
                let res = self
                    .transport
                    .initiate(InitUploadRequest {
                        file_name: self.source.file_name().to_string(),
                        file_size: self.source.file_size() as i64,
                        total_chunks: total as i32,
                        content_type: self.source.content_type().map(|s| s.to_string()),
                    })
                    .await?;
                self.session_id = Some(res.session_id.clone());
                self.send_progress(0, total);
                (res.session_id, (0..total).collect())
            }
        };

        let mut completed = total - pending.len() as u32;
        // Dispatch ascending; pop() takes from the back.
        pending.reverse();

        self.set_state(DriverState::Uploading);

        let mut workers: JoinSet<Result<u32, DriverError>> = JoinSet::new();
        let mut failure: Option<DriverError> = None;
        let mut cancelled = false;

        loop {
            while !cancelled
                && failure.is_none()
                && workers.len() < self.concurrency
                && !pending.is_empty()
            {
                match self.wait_until_runnable().await {
                    ControlSignal::Cancel => cancelled = true,
                    _ => {
                        let index = pending.pop().expect("pending is non-empty");
                        let transport = Arc::clone(&self.transport);
                        let source = Arc::clone(&self.source);
                        let session_id = session_id.clone();
                        workers.spawn(async move {
                            upload_chunk(transport, source, &session_id, index)
                                .await
                                .map(|_| index)
                                .map_err(|e| DriverError::ChunkFailed { index, source: e })
                        });
                    }
                }
            }

            match workers.join_next().await {
                Some(Ok(Ok(_index))) => {
                    completed += 1;
                    self.send_progress(completed, total);
                }
                Some(Ok(Err(e))) => {
                    if failure.is_none() {
                        failure = Some(e);
                    }
                }
                Some(Err(join_err)) => {
                    if failure.is_none() {
                        failure = Some(DriverError::Transport(anyhow::anyhow!(join_err)));
                    }
                }
                None => break,
            }

            if *self.control_rx.borrow() == ControlSignal::Cancel {
                cancelled = true;
            }
        }

        if cancelled {
            return Err(self.finish_cancelled(&session_id).await);
        }

        if let Some(e) = failure {
            // Session stays bound; another run() resumes from its status.
            self.set_state(DriverState::Failed);
            return Err(e);
        }

        // Honor a pause or cancel that arrived after the last ack.
        if matches!(self.wait_until_runnable().await, ControlSignal::Cancel) {
            return Err(self.finish_cancelled(&session_id).await);
        }

        self.set_state(DriverState::Completing);
        match self
            .transport
            .complete(&session_id, self.source.file_name())
            .await
        {
            Ok(file) => {
                self.session_id = None;
                self.set_state(DriverState::Idle);
                Ok(file)
            }
            Err(e) => {
                self.set_state(DriverState::Failed);
                Err(DriverError::Transport(e))
            }
        }
    }

    /// Park between chunk dispatches while paused. Waits on the control
    /// channel rather than polling a flag.
    async fn wait_until_runnable(&mut self) -> ControlSignal {
        loop {
            let signal = *self.control_rx.borrow();
            match signal {
                ControlSignal::Run => return ControlSignal::Run,
                ControlSignal::Cancel => return ControlSignal::Cancel,
                ControlSignal::Pause => {
                    self.set_state(DriverState::Paused);
                    if self.control_rx.changed().await.is_err() {
                        return ControlSignal::Cancel;
                    }
                    if *self.control_rx.borrow() == ControlSignal::Run {
                        self.set_state(DriverState::Uploading);
                    }
                }
            }
        }
    }

    async fn finish_cancelled(&mut self, session_id: &str) -> DriverError {
        self.set_state(DriverState::Cancelled);

        // Best-effort server notify; local state resets either way.
        if let Err(e) = self.transport.cancel(session_id).await {
            tracing::warn!("server-side cancel failed: {e}");
        }

        self.session_id = None;
        self.send_progress(0, self.source.total_chunks());
        let _ = self.control_tx.send(ControlSignal::Run);
        DriverError::Cancelled
    }

    fn set_state(&self, state: DriverState) {
        let _ = self.state_tx.send(state);
    }

    fn send_progress(&self, completed: u32, total: u32) {
        let _ = self.progress_tx.send(UploadProgress {
            completed_chunks: completed,
            total_chunks: total,
        });
    }
}

async fn upload_chunk(
    transport: Arc<dyn UploadTransport>,
    source: Arc<dyn ChunkSource>,
    session_id: &str,
    index: u32,
) -> anyhow::Result<()> {
    let target = transport.chunk_target(session_id, index).await?;
    let bytes = source.read_chunk(index).await?;
    let etag = transport.put_part(&target.url, bytes).await?;
    transport.mark_uploaded(session_id, index, etag).await?;
    Ok(())
}
