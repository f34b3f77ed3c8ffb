use rollcall_engine::{
    Attendance, EngineError, EngineStatus, EnrollmentReport, EnrollmentRequest, RecognitionRequest, RecognitionResult,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum DaemonError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from D-Bus handlers to the engine thread.
enum EngineRequest {
    Enroll {
        request: EnrollmentRequest,
        reply: oneshot::Sender<Result<EnrollmentReport, EngineError>>,
    },
    Recognize {
        request: RecognitionRequest,
        reply: oneshot::Sender<Result<RecognitionResult, EngineError>>,
    },
    Remove {
        identity_id: String,
        reply: oneshot::Sender<Result<bool, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<Result<EngineStatus, EngineError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<Result<T, EngineError>>) -> EngineRequest,
    ) -> Result<T, DaemonError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| DaemonError::ChannelClosed)?;
        Ok(reply_rx.await.map_err(|_| DaemonError::ChannelClosed)??)
    }

    /// Enroll one identity from a set of photos.
    pub async fn enroll(&self, request: EnrollmentRequest) -> Result<EnrollmentReport, DaemonError> {
        self.call(|reply| EngineRequest::Enroll { request, reply }).await
    }

    /// Match every face in a classroom photo against a roster.
    pub async fn recognize(&self, request: RecognitionRequest) -> Result<RecognitionResult, DaemonError> {
        self.call(|reply| EngineRequest::Recognize { request, reply }).await
    }

    pub async fn remove(&self, identity_id: String) -> Result<bool, DaemonError> {
        self.call(|reply| EngineRequest::Remove { identity_id, reply }).await
    }

    pub async fn status(&self) -> Result<EngineStatus, DaemonError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// Inference and index access are blocking, so they stay off the async
/// runtime. Requests are served one at a time, in arrival order.
pub fn spawn_engine(attendance: Attendance, queue_depth: usize) -> std::io::Result<EngineHandle> {
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth);

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Enroll { request, reply } => {
                        let _ = reply.send(attendance.enroll(&request));
                    }
                    EngineRequest::Recognize { request, reply } => {
                        let _ = reply.send(attendance.recognize(&request));
                    }
                    EngineRequest::Remove { identity_id, reply } => {
                        let _ = reply.send(attendance.remove(&identity_id));
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(attendance.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })?;

    Ok(EngineHandle { tx })
}
