//! This crate serves purely as a rest api abstraction for the fit-summary server.
//! The canonical server implementation lives in the same repository.
//!
//! The server accepts an activity file, hands it to an external processor
//! and offers the resulting `_summary.csv` for download.
//!
//! ## Usage
//! For the complete usage, see the serde structs in [`api`].
//! * `GET /` serves the static upload page.
//! * `POST /upload` takes a multipart form with a `file` part and answers with an [`api::UploadResponse`].
//! * `GET /download?file=<name>` fetches a processed file as an attachment, see [`api::DownloadQuery`].
//! * `GET /health` answers `OK`.
//!
//! Any failure is answered with an [`api::ErrorResponse`] and a `4xx` or `5xx` status.
//!
//! ## Naming
//! The processor is expected to write `<stem>_summary.csv` into the processed directory,
//! where `<stem>` is the uploaded file name without its last extension.
//! [`api::summary_file_name`] implements this convention, so a client may compute the name
//! of the download before the upload finishes.
//!
//! ## Long running jobs
//! The upload call only returns once the processor terminated or was killed by the server timeout.
//! Configure your http client timeout above the server's processor timeout.
//!
//! ## Security
//! The api does not include any authentication, make sure it is only reachable from trusted hosts.
//! File names are restricted to plain names, anything resembling a path is rejected.

pub mod api;
