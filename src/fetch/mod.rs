mod basic;
mod client;

pub use basic::BasicClient;
pub use client::HttpClient;

use crate::error::{Error, Result};

/// GETs `url` through `client` and returns the body.
///
/// Non-success statuses are errors, so an HTML error page never ends up on
/// disk as a feed archive.
pub async fn fetch_bytes<C: HttpClient>(client: &C, url: &str) -> Result<Vec<u8>> {
    let req = reqwest::Request::new(
        reqwest::Method::GET,
        url.parse().map_err(|e| Error::Url(format!("{url}: {e}")))?,
    );

    let resp = client.execute(req).await?.error_for_status()?;
    Ok(resp.bytes().await?.to_vec())
}
