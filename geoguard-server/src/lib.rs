//! # GeoGuard Server
//!
//! HTTP front end for batch scanning. Operators submit scans under their
//! punch number; once a batch holds its configured number of scans it is
//! finalized into an XLSX report and mailed to the configured destination.
//!
//! Routes:
//! - `POST /api/scan` (alias `/api/submit`), `POST /api/capture`
//! - `POST /api/finalize`
//! - `GET` / `DELETE /api/batches/{key}`
//! - `GET /` and `GET /health`

pub mod handlers;
pub mod infra;
pub mod routes;

pub use infra::app_state::AppState;
pub use routes::create_app;
