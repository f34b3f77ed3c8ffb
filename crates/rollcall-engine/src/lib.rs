//! rollcall-engine — Enrollment and classroom recognition on top of
//! `rollcall-core` and `rollcall-index`.

pub mod attendance;
pub mod config;
pub mod enroll;
pub mod error;
pub mod recognize;
pub mod roster;

#[cfg(test)]
mod testing;

pub use attendance::{Attendance, EngineStatus};
pub use config::{validate_threshold, Config, ConfigError, THRESHOLD_SAFE_RANGE};
pub use enroll::{
    Enroller, EnrollmentImage, EnrollmentPolicy, EnrollmentReport, EnrollmentRequest, SampleOutcome, SampleStatus,
};
pub use error::EngineError;
pub use recognize::{
    Assignment, GreedyAssignment, Match, RecognitionParams, RecognitionRequest, RecognitionResult, Recognizer,
};
pub use roster::Roster;
