use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use trelliscore::{namespaced, Executor, NodeContext, NodeError, NodeOutput, NodeStatus};

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
enum HttpMethod {
    #[default]
    Get,
    Post,
    Put,
    Patch,
    Delete,
}

impl HttpMethod {
    fn has_body(self) -> bool {
        matches!(self, HttpMethod::Post | HttpMethod::Put | HttpMethod::Patch)
    }
}

/// Configuration the editor stores for an HTTP request node
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HttpRequestData {
    variable_name: Option<String>,
    endpoint: Option<String>,
    #[serde(default)]
    method: HttpMethod,
    body: Option<Value>,
}

/// HTTP request node
pub struct HttpRequestNode {
    client: reqwest::Client,
}

impl HttpRequestNode {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
        }
    }
}

impl Default for HttpRequestNode {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Executor for HttpRequestNode {
    async fn execute(&self, ctx: NodeContext) -> Result<NodeOutput, NodeError> {
        ctx.publish.status(NodeStatus::Loading);

        let result = self.request(&ctx).await;
        ctx.publish.status(match &result {
            Ok(_) => NodeStatus::Success,
            Err(_) => NodeStatus::Error,
        });
        result
    }
}

impl HttpRequestNode {
    async fn request(&self, ctx: &NodeContext) -> Result<NodeOutput, NodeError> {
        let data: HttpRequestData = ctx.parse_data()?;
        let variable_name = data
            .variable_name
            .filter(|name| !name.is_empty())
            .ok_or_else(|| NodeError::Configuration("Missing config: variableName".to_string()))?;
        let endpoint = data
            .endpoint
            .filter(|endpoint| !endpoint.is_empty())
            .ok_or_else(|| NodeError::Configuration("Missing config: endpoint".to_string()))?;
        let url = reqwest::Url::parse(&endpoint)
            .map_err(|e| NodeError::Configuration(format!("Invalid endpoint '{}': {}", endpoint, e)))?;

        ctx.publish.info(format!("{:?} {}", data.method, url));

        let client = &self.client;
        let (url, method, body) = (&url, data.method, &data.body);
        let response: Value = ctx
            .step
            .run("http-request", move || async move {
                let mut request = match method {
                    HttpMethod::Get => client.get(url.clone()),
                    HttpMethod::Post => client.post(url.clone()),
                    HttpMethod::Put => client.put(url.clone()),
                    HttpMethod::Patch => client.patch(url.clone()),
                    HttpMethod::Delete => client.delete(url.clone()),
                };

                if method.has_body() {
                    match body {
                        Some(Value::String(text)) => {
                            request = request
                                .header(reqwest::header::CONTENT_TYPE, "application/json")
                                .body(text.clone());
                        }
                        Some(value) => request = request.json(value),
                        None => {}
                    }
                }

                let response = request
                    .send()
                    .await
                    .map_err(|e| NodeError::ExecutionFailed(format!("HTTP request failed: {}", e)))?;

                let status = response.status();
                let is_json = response
                    .headers()
                    .get(reqwest::header::CONTENT_TYPE)
                    .and_then(|v| v.to_str().ok())
                    .map(|v| v.contains("application/json"))
                    .unwrap_or(false);
                let text = response
                    .text()
                    .await
                    .map_err(|e| NodeError::ExecutionFailed(format!("Failed to read response: {}", e)))?;
                let data = if is_json {
                    serde_json::from_str(&text).unwrap_or(Value::String(text))
                } else {
                    Value::String(text)
                };

                Ok::<_, NodeError>(json!({
                    "status": status.as_u16(),
                    "statusText": status.canonical_reason().unwrap_or_default(),
                    "data": data,
                }))
            })
            .await?;

        Ok(namespaced(variable_name, json!({ "httpResponse": response })))
    }
}
