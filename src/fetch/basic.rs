use std::time::Duration;

use super::client::HttpClient;
use crate::error::Result;
use async_trait::async_trait;

/// Static archives are tens of megabytes; give the download room.
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(DOWNLOAD_TIMEOUT)
            .build()?;
        Ok(Self(client))
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
