//! HTTP MCP client for capability listing
//!
//! Speaks JSON-RPC over streamable HTTP: `initialize` handshake, then
//! the three list calls. Servers answering with `text/event-stream`
//! get their single data frame parsed out; everything else is plain
//! JSON. The session ID handed out during `initialize` is echoed on
//! subsequent requests.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, header};
use serde_json::{Value, json};
use tracing::debug;

use url::Url;

use super::BackendClient;
use crate::backend::{BackendAuthStrategy, BackendTarget};
use crate::protocol::{
    CapabilityList, JsonRpcRequest, JsonRpcResponse, PROTOCOL_VERSION, PromptsListResult,
    RequestId, ResourcesListResult, ToolsListResult,
};
use crate::{Error, Result};

const METHOD_NOT_FOUND: i32 = -32601;

/// HTTP implementation of [`BackendClient`]
pub struct HttpBackendClient {
    client: Client,
}

impl HttpBackendClient {
    /// Create a client with the given per-request timeout
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .tcp_keepalive(Duration::from_secs(30))
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;

        Ok(Self { client })
    }

    /// Obtain the Authorization material mandated by the target's auth
    /// strategy, performing a token exchange where required
    async fn auth_header(
        &self,
        target: &BackendTarget,
    ) -> Result<Option<(String, String)>> {
        match &target.auth {
            None
            | Some(BackendAuthStrategy::None)
            | Some(BackendAuthStrategy::Passthrough) => Ok(None),
            Some(BackendAuthStrategy::HeaderInjection {
                header_name,
                header_value,
            }) => Ok(Some((header_name.clone(), header_value.clone()))),
            Some(BackendAuthStrategy::TokenExchange {
                token_url,
                client_id,
                client_secret,
                audience,
                scopes,
            }) => {
                let token = self
                    .exchange_token(token_url, client_id, client_secret, audience.as_deref(), scopes)
                    .await?;
                Ok(Some(("Authorization".to_string(), format!("Bearer {token}"))))
            }
            Some(BackendAuthStrategy::ExternalAuthConfigRef { name }) => {
                // Discovery resolves references before a backend is
                // ever routed to; reaching here is a pipeline bug.
                Err(Error::AuthResolution(format!(
                    "unresolved external auth config reference '{name}' on backend '{}'",
                    target.workload_id
                )))
            }
        }
    }

    /// Client-credentials grant against the strategy's token endpoint
    async fn exchange_token(
        &self,
        token_url: &str,
        client_id: &str,
        client_secret: &str,
        audience: Option<&str>,
        scopes: &[String],
    ) -> Result<String> {
        let mut form = vec![
            ("grant_type", "client_credentials".to_string()),
            ("client_id", client_id.to_string()),
            ("client_secret", client_secret.to_string()),
        ];
        if let Some(aud) = audience {
            form.push(("audience", aud.to_string()));
        }
        if !scopes.is_empty() {
            form.push(("scope", scopes.join(" ")));
        }

        let response = self.client.post(token_url).form(&form).send().await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::AuthResolution(format!(
                "token endpoint {token_url} returned {status}"
            )));
        }

        let body: Value = response.json().await?;
        body.get("access_token")
            .and_then(Value::as_str)
            .map(ToString::to_string)
            .ok_or_else(|| {
                Error::AuthResolution(format!(
                    "token endpoint {token_url} returned no access_token"
                ))
            })
    }
}

/// Per-call JSON-RPC session against one backend
struct RpcSession<'a> {
    client: &'a Client,
    url: &'a str,
    auth: Option<(String, String)>,
    session_id: Option<String>,
    next_id: i64,
}

impl RpcSession<'_> {
    async fn request(&mut self, method: &str, params: Option<Value>) -> Result<JsonRpcResponse> {
        let request = JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: RequestId::Number(self.next_id),
            method: method.to_string(),
            params,
        };
        self.next_id += 1;

        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert(
            header::ACCEPT,
            "application/json, text/event-stream".parse().unwrap(),
        );
        headers.insert("MCP-Protocol-Version", PROTOCOL_VERSION.parse().unwrap());

        if let Some(ref session_id) = self.session_id {
            if let Ok(value) = session_id.parse() {
                headers.insert("MCP-Session-Id", value);
            }
        }

        if let Some((name, value)) = &self.auth {
            if let (Ok(k), Ok(v)) = (
                name.parse::<header::HeaderName>(),
                value.parse::<header::HeaderValue>(),
            ) {
                headers.insert(k, v);
            } else {
                return Err(Error::Transport(format!(
                    "auth strategy produced an invalid header '{name}'"
                )));
            }
        }

        let response = self
            .client
            .post(self.url)
            .headers(headers)
            .json(&request)
            .send()
            .await
            .map_err(|e| Error::Transport(e.to_string()))?;

        if let Some(session_id) = response.headers().get("mcp-session-id") {
            if let Ok(id) = session_id.to_str() {
                self.session_id = Some(id.to_string());
            }
        }

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Transport(format!("HTTP error: {status}")));
        }

        let content_type = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        if content_type.contains("text/event-stream") {
            parse_sse_response(&response.text().await.map_err(|e| Error::Transport(e.to_string()))?)
        } else {
            response
                .json()
                .await
                .map_err(|e| Error::Transport(e.to_string()))
        }
    }

    /// Fire-and-forget notification (no request ID, response ignored)
    async fn notify(&mut self, method: &str) {
        let notification = json!({
            "jsonrpc": "2.0",
            "method": method,
        });

        let mut headers = header::HeaderMap::new();
        headers.insert(header::CONTENT_TYPE, "application/json".parse().unwrap());
        headers.insert("MCP-Protocol-Version", PROTOCOL_VERSION.parse().unwrap());
        if let Some(ref session_id) = self.session_id {
            if let Ok(value) = session_id.parse() {
                headers.insert("MCP-Session-Id", value);
            }
        }
        if let Some((name, value)) = &self.auth {
            if let (Ok(k), Ok(v)) = (
                name.parse::<header::HeaderName>(),
                value.parse::<header::HeaderValue>(),
            ) {
                headers.insert(k, v);
            }
        }

        let _ = self
            .client
            .post(self.url)
            .headers(headers)
            .json(&notification)
            .send()
            .await;
    }

    /// Issue a list call, tolerating backends that do not implement it
    async fn list<T>(&mut self, method: &str) -> Result<Option<T>>
    where
        T: serde::de::DeserializeOwned,
    {
        let response = self.request(method, None).await?;

        if let Some(error) = response.error {
            if error.code == METHOD_NOT_FOUND {
                debug!(method = %method, "Backend does not implement method");
                return Ok(None);
            }
            return Err(Error::Transport(format!(
                "{method} failed: {} ({})",
                error.message, error.code
            )));
        }

        match response.result {
            Some(result) => Ok(Some(serde_json::from_value(result)?)),
            None => Ok(None),
        }
    }
}

fn parse_sse_response(text: &str) -> Result<JsonRpcResponse> {
    for line in text.lines() {
        if let Some(data) = line.strip_prefix("data: ") {
            return serde_json::from_str(data).map_err(|e| Error::Transport(e.to_string()));
        }
    }
    Err(Error::Transport("No data in SSE response".to_string()))
}

#[async_trait]
impl BackendClient for HttpBackendClient {
    async fn list_capabilities(&self, target: &BackendTarget) -> Result<CapabilityList> {
        let base_url = Url::parse(&target.base_url).map_err(|e| {
            Error::Transport(format!(
                "backend '{}' has an invalid base URL '{}': {e}",
                target.workload_id, target.base_url
            ))
        })?;

        let auth = self.auth_header(target).await?;

        let mut session = RpcSession {
            client: &self.client,
            url: base_url.as_str(),
            auth,
            session_id: None,
            next_id: 1,
        };

        let init = session
            .request(
                "initialize",
                Some(json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "vmcp",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                })),
            )
            .await?;

        if let Some(error) = init.error {
            return Err(Error::Transport(format!(
                "initialize failed: {} ({})",
                error.message, error.code
            )));
        }

        let server_capabilities = init
            .result
            .as_ref()
            .and_then(|r| r.get("capabilities"))
            .cloned()
            .unwrap_or_else(|| json!({}));
        let supports_logging = server_capabilities.get("logging").is_some();
        let supports_sampling = server_capabilities.get("sampling").is_some();

        session.notify("notifications/initialized").await;

        let tools = session
            .list::<ToolsListResult>("tools/list")
            .await?
            .map(|r| r.tools)
            .unwrap_or_default();
        let resources = session
            .list::<ResourcesListResult>("resources/list")
            .await?
            .map(|r| r.resources)
            .unwrap_or_default();
        let prompts = session
            .list::<PromptsListResult>("prompts/list")
            .await?
            .map(|r| r.prompts)
            .unwrap_or_default();

        debug!(
            backend = %target.workload_id,
            tools = tools.len(),
            resources = resources.len(),
            prompts = prompts.len(),
            "Listed backend capabilities"
        );

        Ok(CapabilityList {
            tools,
            resources,
            prompts,
            supports_logging,
            supports_sampling,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sse_frame_parses_to_response() {
        let text = "event: message\ndata: {\"jsonrpc\":\"2.0\",\"id\":1,\"result\":{\"tools\":[]}}\n\n";
        let response = parse_sse_response(text).unwrap();
        assert!(response.result.is_some());
    }

    #[test]
    fn sse_without_data_is_an_error() {
        assert!(parse_sse_response("event: message\n\n").is_err());
    }
}
