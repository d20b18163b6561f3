//! Pull-based project list.

use std::time::Duration;

use async_trait::async_trait;
use canopy_protocol::ProjectSnapshot;
use log::debug;

use crate::error::SourceError;

/// Timeout for one project list request.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Supplies the full project list on demand (mount, manual refresh).
#[async_trait]
pub trait ProjectSource: Send + Sync {
    async fn fetch_projects(&self) -> Result<Vec<ProjectSnapshot>, SourceError>;
}

/// `GET {base_url}/api/projects`.
#[derive(Debug, Clone)]
pub struct HttpProjectSource {
    client: reqwest::Client,
    base_url: String,
    token: Option<String>,
}

impl HttpProjectSource {
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Result<Self, SourceError> {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
        })
    }

    fn projects_url(&self) -> String {
        format!("{}/api/projects", self.base_url)
    }
}

#[async_trait]
impl ProjectSource for HttpProjectSource {
    async fn fetch_projects(&self) -> Result<Vec<ProjectSnapshot>, SourceError> {
        let url = self.projects_url();
        debug!("Fetching project list from {}", url);

        let mut request = self.client.get(&url);
        if let Some(token) = self.token.as_deref() {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        Ok(response.json::<Vec<ProjectSnapshot>>().await?)
    }
}
