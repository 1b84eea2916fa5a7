use crate::app::ports::{HttpClientPort, HttpResponse};
use crate::config::CrawlConfig;
use crate::error::Result;
use async_trait::async_trait;

pub struct ReqwestHttp {
    client: reqwest::Client,
}

impl ReqwestHttp {
    /// Builds a client with the configured per-request timeout and user agent.
    pub fn new(crawl: &CrawlConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(crawl.request_timeout())
            .user_agent(crawl.user_agent.clone())
            .build()?;
        Ok(Self { client })
    }

    async fn into_response(resp: reqwest::Response) -> std::result::Result<HttpResponse, String> {
        let status = resp.status();
        let status_text = match status.canonical_reason() {
            Some(reason) => format!("{} {}", status.as_u16(), reason),
            None => status.as_u16().to_string(),
        };
        let body = resp.text().await.map_err(|e| e.to_string())?;
        Ok(HttpResponse { status: status.as_u16(), status_text, body })
    }
}

#[async_trait]
impl HttpClientPort for ReqwestHttp {
    async fn get(&self, url: &str) -> std::result::Result<HttpResponse, String> {
        let resp = self.client.get(url).send().await.map_err(|e| e.to_string())?;
        Self::into_response(resp).await
    }

    async fn post_form(
        &self,
        url: &str,
        form: &[(String, String)],
    ) -> std::result::Result<HttpResponse, String> {
        let resp = self
            .client
            .post(url)
            .form(form)
            .send()
            .await
            .map_err(|e| e.to_string())?;
        Self::into_response(resp).await
    }
}
