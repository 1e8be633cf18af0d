use std::borrow::Cow;
use std::path::Path;

use serde::{Deserialize, Serialize};

/// The version of this api, reported by the server at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Name of the multipart part that carries the uploaded file.
pub const UPLOAD_FIELD: &str = "file";

/// Appended to the upload's stem to form the processed file name.
pub const SUMMARY_SUFFIX: &str = "_summary.csv";

/// Describes the json response format of a successful `POST /upload`.
///
/// # Serialized Example
/// ```
/// # let ser = r#"
/// {
///     "message": "File processed successfully",
///     "download_link": "/download?file=ride_summary.csv"
/// }
/// # "#;
/// # let deser: fit_summary_api::api::UploadResponse
/// #    = serde_json::from_str(ser).expect("failed parsing");
/// # assert_eq!(deser.download_link, "/download?file=ride_summary.csv");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadResponse {
    pub message: String,
    /// Relative link to `GET /download` for the processed file.
    pub download_link: String,
}

impl UploadResponse {
    /// The success response for the processed file `summary_name`.
    pub fn processed(summary_name: &str) -> Self {
        UploadResponse {
            message: String::from("File processed successfully"),
            download_link: download_link(summary_name),
        }
    }
}

/// Query of `GET /download`.
///
/// The `file` is optional on the wire, so that a missing parameter is
/// answered with a proper error body instead of a query rejection.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct DownloadQuery {
    pub file: Option<String>,
}

/// Body of every `4xx` and `5xx` response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Human readable reason, may contain the processor output.
    pub error: String,
}

/// Derives the processed file name from an uploaded file name.
///
/// Only the last extension is removed, a name without extension is kept whole.
///
/// ```
/// use fit_summary_api::api::summary_file_name;
/// assert_eq!(summary_file_name("ride.fit"), "ride_summary.csv");
/// assert_eq!(summary_file_name("data"), "data_summary.csv");
/// ```
pub fn summary_file_name(upload_name: &str) -> String {
    let stem = match Path::new(upload_name).file_stem() {
        Some(stem) => stem.to_string_lossy(),
        None => Cow::Borrowed(upload_name),
    };
    format!("{stem}{SUMMARY_SUFFIX}")
}

/// Builds the relative download link for a processed file.
///
/// The name is form-urlencoded, so names with spaces or `&` survive the round trip.
pub fn download_link(summary_name: &str) -> String {
    let query = serde_urlencoded::to_string([(UPLOAD_FIELD, summary_name)])
        .unwrap_or_else(|_| format!("{UPLOAD_FIELD}={summary_name}"));
    format!("/download?{query}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_name_strips_last_extension_only() {
        assert_eq!(summary_file_name("sample.csv"), "sample_summary.csv");
        assert_eq!(summary_file_name("a.tar.gz"), "a.tar_summary.csv");
        assert_eq!(summary_file_name("activity.json"), "activity_summary.csv");
    }

    #[test]
    fn summary_name_of_dotfile_keeps_name() {
        assert_eq!(summary_file_name(".fit"), ".fit_summary.csv");
    }

    #[test]
    fn download_link_encodes_name() {
        assert_eq!(
            download_link("sample_summary.csv"),
            "/download?file=sample_summary.csv"
        );
        let link = download_link("my ride&co_summary.csv");
        assert_eq!(link, "/download?file=my+ride%26co_summary.csv");

        let query: DownloadQuery =
            serde_urlencoded::from_str(link.trim_start_matches("/download?")).unwrap();
        assert_eq!(query.file.as_deref(), Some("my ride&co_summary.csv"));
    }

    #[test]
    fn download_query_without_file() {
        let query: DownloadQuery = serde_urlencoded::from_str("").unwrap();
        assert!(query.file.is_none());
    }

    #[test]
    fn upload_response_shape() {
        let json = serde_json::to_value(UploadResponse::processed("ride_summary.csv")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "message": "File processed successfully",
                "download_link": "/download?file=ride_summary.csv",
            })
        );
    }
}
