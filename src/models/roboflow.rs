use anyhow::{anyhow, Context, Result};
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::info;

use super::download::http_client;

pub const DEFAULT_API_BASE: &str = "https://api.roboflow.com";

#[derive(Debug, Clone)]
pub struct RoboflowClient {
    api_base: String,
    api_key: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WeightsResponse {
    weights_url: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

impl RoboflowClient {
    pub fn new(api_base: impl Into<String>, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(anyhow!("a Roboflow API key is required"));
        }
        Ok(Self {
            api_base: api_base.into(),
            api_key: api_key.trim().to_string(),
        })
    }

    pub fn weights_endpoint(
        &self,
        workspace: &str,
        project: &str,
        version: u32,
        format: &str,
    ) -> Result<Url> {
        let base = self.api_base.trim_end_matches('/');
        let mut url = Url::parse(&format!("{base}/{workspace}/{project}/{version}/{format}File"))
            .with_context(|| format!("invalid Roboflow API base {base:?}"))?;
        url.query_pairs_mut()
            .append_pair("api_key", &self.api_key)
            .append_pair("nocache", "true");
        Ok(url)
    }

    pub fn resolve_weights_url(
        &self,
        workspace: &str,
        project: &str,
        version: u32,
        format: &str,
    ) -> Result<String> {
        let endpoint = self.weights_endpoint(workspace, project, version, format)?;
        info!("requesting {workspace}/{project} v{version} weights from Roboflow");
        let response = http_client()?
            .get(endpoint)
            .send()
            .context("request Roboflow weights")?;
        let status = response.status();
        let body = response.text().context("read Roboflow response")?;
        if !status.is_success() {
            return Err(rejected(status, &body));
        }
        parse_weights_url(&body)
    }
}

fn rejected(status: StatusCode, body: &str) -> anyhow::Error {
    let detail = serde_json::from_str::<WeightsResponse>(body)
        .ok()
        .and_then(|response| response.error)
        .map(|error| error.to_string())
        .unwrap_or_else(|| body.trim().to_string());
    let hint = if matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN) {
        "; downloads need the private API key, the publishable key cannot fetch model weights"
    } else {
        ""
    };
    anyhow!("Roboflow rejected the weights request ({status}: {detail}){hint}")
}

fn parse_weights_url(body: &str) -> Result<String> {
    let response: WeightsResponse =
        serde_json::from_str(body).context("Roboflow response is not JSON")?;
    match response.weights_url {
        Some(url) if !url.is_empty() => Ok(url),
        _ => Err(anyhow!(
            "Roboflow returned no weights URL ({}); downloads need the private API key, \
             the publishable key cannot fetch model weights",
            response
                .error
                .map(|error| error.to_string())
                .unwrap_or_else(|| "no error given".into())
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_carries_key_as_query() {
        let client = RoboflowClient::new("https://api.roboflow.com/", " secret ").unwrap();
        let url = client
            .weights_endpoint("food-image-classification", "food-imgae-yolo", 1, "pt")
            .unwrap();
        assert_eq!(
            url.as_str(),
            "https://api.roboflow.com/food-image-classification/food-imgae-yolo/1/ptFile?api_key=secret&nocache=true"
        );
    }

    #[test]
    fn empty_key_is_rejected() {
        assert!(RoboflowClient::new(DEFAULT_API_BASE, "  ").is_err());
    }

    #[test]
    fn weights_url_is_read_from_response() {
        let body = r#"{"weightsUrl": "https://storage.example/best.pt"}"#;
        let url = parse_weights_url(body).unwrap();
        assert_eq!(url, "https://storage.example/best.pt");
    }

    #[test]
    fn missing_weights_url_mentions_private_key() {
        let error = parse_weights_url(r#"{"error": {"message": "Unauthorized"}}"#).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("private API key"), "{message}");
        assert!(message.contains("Unauthorized"), "{message}");
    }

    #[test]
    fn auth_failure_mentions_private_key() {
        let body = r#"{"error": {"message": "This API key does not have access"}}"#;
        let message = rejected(StatusCode::UNAUTHORIZED, body).to_string();
        assert!(message.contains("401"), "{message}");
        assert!(message.contains("does not have access"), "{message}");
        assert!(message.contains("private API key"), "{message}");
    }

    #[test]
    fn other_failures_keep_the_raw_body() {
        let message = rejected(StatusCode::BAD_GATEWAY, " upstream down \n").to_string();
        assert!(message.contains("upstream down"), "{message}");
        assert!(!message.contains("private API key"), "{message}");
    }
}
