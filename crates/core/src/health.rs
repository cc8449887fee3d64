use crate::error::PipelineError;
use reqwest::Client;
use std::time::Duration;
use tracing::debug;
use url::Url;

pub const HEALTH_TIMEOUT: Duration = Duration::from_secs(10);

pub fn health_url(endpoint: &str) -> Result<Url, PipelineError> {
    let mut url = Url::parse(endpoint)?;
    if url.cannot_be_a_base() || url.host_str().is_none() {
        return Err(PipelineError::InvalidArgument(format!(
            "endpoint has no host: {endpoint}"
        )));
    }
    url.set_path("/health");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

pub async fn probe_health(endpoint: &str, auth_token: Option<&str>) -> Result<u16, PipelineError> {
    let url = health_url(endpoint)?;
    let client = Client::builder().timeout(HEALTH_TIMEOUT).build()?;

    let mut request = client.get(url.clone());
    if let Some(token) = auth_token {
        request = request.bearer_auth(token);
    }

    let status = request.send().await?.status();
    debug!(url = %url, status = %status, "health check answered");
    Ok(status.as_u16())
}
