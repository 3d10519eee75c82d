//! The unified error type for the ingestion core, and the error-taxonomy classification
//! the orchestrator uses to decide retry/continue/abort behavior (spec §7).

use snafu::{Backtrace, Snafu};

use crate::decode::DecodeError;
use crate::sources::rest::RestError;
use crate::sources::vision::VisionError;
use crate::transform::minute_builder::TransformError;
use crate::validation::dq::DataQualityError;
use crate::writer::atomic::WriterError;

/// The unified error type for the ingestion core.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum IngestError {
    /// Failure resolving or downloading from the daily-archive object store.
    #[snafu(display("vision error: {source}"))]
    Vision {
        #[snafu(backtrace)]
        source: VisionError,
    },

    /// Failure calling a REST endpoint, after exhausting retries where applicable.
    #[snafu(display("rest error: {source}"))]
    Rest {
        #[snafu(backtrace)]
        source: RestError,
    },

    /// Failure decoding a downloaded archive into raw rows.
    #[snafu(display("decode error: {source}"))]
    Decode {
        #[snafu(backtrace)]
        source: DecodeError,
    },

    /// Failure aligning raw rows onto the canonical minute grid.
    #[snafu(display("transform error: {source}"))]
    Transform {
        #[snafu(backtrace)]
        source: TransformError,
    },

    /// A built canonical frame failed data-quality validation.
    #[snafu(display("data quality error: {source}"))]
    DataQuality {
        #[snafu(backtrace)]
        source: DataQualityError,
    },

    /// Failure in the atomic partition writer.
    #[snafu(display("writer error: {source}"))]
    Writer {
        #[snafu(backtrace)]
        source: WriterError,
    },

    /// State database unreachable, root directory not writable, or invalid configuration.
    /// Surfaces as an overall run failure rather than an hour-level one.
    #[snafu(display("fatal error: {message}"))]
    Fatal { message: String, backtrace: Backtrace },
}

/// Classification of an [`IngestError`] used by the orchestrator to decide whether a
/// failing hour aborts the whole run or is recorded and skipped (spec §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Recovered locally by bounded retry already; a remaining failure is hour-level.
    TransientIo,
    /// HTTP 4xx (other than 429), unknown stream, missing expected archive. No retry.
    PermanentUpstream,
    /// Malformed archive or non-minute-aligned row.
    DecodeFailure,
    /// Missing column, duplicate timestamp, or a HARD_REQUIRED null.
    DataQualityFailure,
    /// State DB unreachable, root dir unwritable, bad configuration.
    Fatal,
}

impl IngestError {
    /// Classify this error for orchestrator control flow.
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::Vision { source } => source.kind(),
            IngestError::Rest { source } => source.kind(),
            IngestError::Decode { .. } => ErrorKind::DecodeFailure,
            IngestError::Transform { .. } => ErrorKind::DecodeFailure,
            IngestError::DataQuality { .. } => ErrorKind::DataQualityFailure,
            IngestError::Writer { source } => source.kind(),
            IngestError::Fatal { .. } => ErrorKind::Fatal,
        }
    }

    /// `true` when this error should abort the whole run rather than just the current hour.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}
