use crate::engine::{DaemonError, EngineHandle};
use rollcall_engine::{EngineError, EnrollmentRequest, RecognitionRequest};
use serde::Serialize;
use tracing::Instrument;
use uuid::Uuid;
use zbus::interface;

/// D-Bus interface for the Rollcall attendance daemon.
///
/// Bus name: org.rollcall.Attendance1
/// Object path: /org/rollcall/Attendance1
pub struct AttendanceService {
    pub engine: EngineHandle,
    pub index_backend: &'static str,
}

#[interface(name = "org.rollcall.Attendance1")]
impl AttendanceService {
    /// Enroll an identity from a JSON `EnrollmentRequest`. Returns the
    /// enrollment report as JSON.
    async fn enroll(&self, request_json: &str) -> zbus::fdo::Result<String> {
        let request: EnrollmentRequest = parse(request_json)?;
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("enroll", %request_id, identity_id = %request.identity_id);
        async move {
            tracing::info!(images = request.images.len(), "enroll requested");
            let report = self.engine.enroll(request).await.map_err(to_fdo)?;
            to_json(&report)
        }
        .instrument(span)
        .await
    }

    /// Recognize every face in a classroom photo from a JSON
    /// `RecognitionRequest`. Returns the recognition result as JSON.
    async fn recognize(&self, request_json: &str) -> zbus::fdo::Result<String> {
        let request: RecognitionRequest = parse(request_json)?;
        let request_id = Uuid::new_v4();
        let span = tracing::info_span!("recognize", %request_id);
        async move {
            tracing::info!(
                roster = request.roster.as_ref().map(Vec::len),
                threshold = request.threshold,
                "recognize requested"
            );
            let result = self.engine.recognize(request).await.map_err(to_fdo)?;
            to_json(&result)
        }
        .instrument(span)
        .await
    }

    /// Remove an enrolled identity. Returns whether it was enrolled.
    async fn remove_identity(&self, identity_id: &str) -> zbus::fdo::Result<bool> {
        let request_id = Uuid::new_v4();
        tracing::info!(%request_id, identity_id, "remove requested");
        self.engine.remove(identity_id.to_string()).await.map_err(to_fdo)
    }

    /// Return daemon status information.
    async fn status(&self) -> zbus::fdo::Result<String> {
        let status = self.engine.status().await.map_err(to_fdo)?;
        Ok(serde_json::json!({
            "version": env!("CARGO_PKG_VERSION"),
            "index_backend": self.index_backend,
            "engine": status,
        })
        .to_string())
    }
}

fn parse<T: serde::de::DeserializeOwned>(json: &str) -> zbus::fdo::Result<T> {
    serde_json::from_str(json).map_err(|e| zbus::fdo::Error::InvalidArgs(format!("malformed request: {e}")))
}

fn to_json<T: Serialize>(value: &T) -> zbus::fdo::Result<String> {
    serde_json::to_string(value).map_err(|e| zbus::fdo::Error::Failed(e.to_string()))
}

/// Caller mistakes become `InvalidArgs`, everything else `Failed`.
fn to_fdo(err: DaemonError) -> zbus::fdo::Error {
    match err {
        DaemonError::Engine(EngineError::InsufficientSamples {
            usable,
            total,
            required,
            samples,
        }) => {
            tracing::warn!(usable, total, required, "enrollment rejected");
            let detail = serde_json::json!({
                "error": "insufficient_samples",
                "usable": usable,
                "total": total,
                "required": required,
                "samples": samples,
            });
            zbus::fdo::Error::InvalidArgs(detail.to_string())
        }
        DaemonError::Engine(e) if e.is_caller_error() => {
            tracing::warn!(error = %e, "request rejected");
            zbus::fdo::Error::InvalidArgs(e.to_string())
        }
        other => {
            tracing::error!(error = %other, "request failed");
            zbus::fdo::Error::Failed(other.to_string())
        }
    }
}
