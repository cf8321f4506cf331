use async_trait::async_trait;
use reqwest::{Request, Response};

/// Seam for outbound HTTP, so the static feed cache can be driven without a
/// network in tests.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
