use async_trait::async_trait;

/// Sends a prepared request. Authentication and other middleware are expected to be
/// applied by the implementation.
#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn execute(&self, request: reqwest::Request) -> reqwest::Result<reqwest::Response>;
}

#[async_trait]
impl HttpTransport for reqwest::Client {
    async fn execute(&self, request: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        reqwest::Client::execute(self, request).await
    }
}
