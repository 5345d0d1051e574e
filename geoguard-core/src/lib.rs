//! # GeoGuard Core
//!
//! Domain logic for the GeoGuard batch scanner: operators scan a fixed number
//! of codes against a punch number, optionally pairing a photo with each
//! scan, and a completed batch is turned into a spreadsheet report and mailed
//! to a fixed destination.
//!
//! ## Architecture
//!
//! - [`batch`]: scan validation, image pairing, the per-key batch state
//!   machine, and the [`batch::store::BatchStore`] abstraction behind it
//! - [`report`]: elapsed-time formatting, the pure report builder, and the
//!   XLSX writer
//! - [`delivery`]: credential resolution and the mail transport seam
//! - [`cleanup`]: scoped transient artifacts
//! - [`pipeline`]: the finalize pipeline tying the pieces together
//! - [`api_types`]: request schemas and their validation into parsed forms

#![cfg_attr(docsrs, feature(doc_cfg))]
#![allow(missing_docs)]

pub mod api_types;
pub mod batch;
pub mod cleanup;
pub mod delivery;
pub mod error;
pub mod pipeline;
pub mod report;

pub use api_types::{
    CaptureRequest, FinalizeRequest, ParsedCapture, ParsedFinalize,
    ParsedScan, ScanRequest,
};
pub use batch::{
    Batch, BatchKey, BatchPhase, BatchState, Scan,
    accumulator::{BatchAccumulator, BatchStatus, ScanReceipt},
    pairing::{ImagePairing, ImagePayload},
    store::{BatchStore, InMemoryBatchStore},
    validator::{OpenRegistry, OperatorRegistry, ScanValidator, StaticRegistry},
};
pub use cleanup::{ArtifactScope, CleanupManager};
pub use delivery::{
    CredentialSource, DeliveryService, MailCredentials, MailTransport,
    StaticCredentials, smtp::SmtpTransport,
};
pub use error::{
    ErrorCode, FinalizeError, ScanRejection, StoreError, ValidationError,
};
pub use pipeline::{FinalizeOutcome, FinalizePipeline};
pub use report::{
    builder::{Report, ReportBuilder, ReportContext},
    duration::duration,
    writer::{ReportWriter, XlsxReportWriter},
};
