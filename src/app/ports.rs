use async_trait::async_trait;

/// Transport used by the page client. Errors are transport-level only
/// (unreachable host, timeout, broken body); HTTP status is reported in the result.
#[async_trait]
pub trait HttpClientPort: Send + Sync {
    async fn get(&self, url: &str) -> Result<HttpResponse, String>;
    async fn post_form(&self, url: &str, form: &[(String, String)]) -> Result<HttpResponse, String>;
}

#[derive(Clone, Debug)]
pub struct HttpResponse {
    pub status: u16,
    /// Status line as reported by the server, e.g. "200 OK"
    pub status_text: String,
    pub body: String,
}

impl HttpResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}
