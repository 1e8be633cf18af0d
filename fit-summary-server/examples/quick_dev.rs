//! Uploads a file to a locally running server and prints the summary.
//!
//! `cargo run --example quick_dev -- path/to/ride.fit`

use fit_summary_api::api::UploadResponse;
use reqwest::multipart::{Form, Part};

const URL: &str = "http://localhost:8080";

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let path = std::env::args()
        .nth(1)
        .ok_or_else(|| anyhow::anyhow!("usage: quick_dev <file>"))?;
    let name = std::path::Path::new(&path)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| anyhow::anyhow!("not a file name: {path}"))?
        .to_owned();

    let hc = httpc_test::new_client(URL)?;
    hc.do_get("/health").await?.print().await?;

    let part = Part::bytes(std::fs::read(&path)?).file_name(name);
    let response = reqwest::Client::new()
        .post(format!("{URL}/upload"))
        .multipart(Form::new().part("file", part))
        .send()
        .await?
        .error_for_status()?;
    let upload: UploadResponse = response.json().await?;
    println!("{}", upload.message);

    let summary = hc.do_get(&upload.download_link).await?;
    summary.print().await?;

    Ok(())
}
