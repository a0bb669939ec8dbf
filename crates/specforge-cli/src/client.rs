//! Minimal blocking JSON-RPC client for the SpecForge MCP endpoint.

use std::cell::Cell;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use serde_json::{json, Value};

pub const PROTOCOL_VERSION: &str = "2024-11-05";

const TIMEOUT: Duration = Duration::from_secs(30);

pub struct McpClient {
    url: String,
    token: Option<String>,
    agent: ureq::Agent,
    next_id: Cell<u64>,
}

impl McpClient {
    pub fn new(url: &str, token: Option<&str>) -> Self {
        Self {
            url: url.to_string(),
            token: token.filter(|t| !t.is_empty()).map(str::to_string),
            agent: ureq::AgentBuilder::new().timeout(TIMEOUT).build(),
            next_id: Cell::new(1),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn request(&self) -> ureq::Request {
        let req = self.agent.post(&self.url);
        match &self.token {
            Some(t) => req.set("Authorization", &format!("Bearer {t}")),
            None => req,
        }
    }

    /// Send a request and return its `result`; JSON-RPC errors become `Err`.
    pub fn call(&self, method: &str, params: Value) -> Result<Value> {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        let body = json!({ "jsonrpc": "2.0", "id": id, "method": method, "params": params });

        tracing::debug!(method, id, "mcp request");
        let response: Value = match self.request().send_json(body) {
            Ok(resp) => resp.into_json().context("MCP server returned a non-JSON body")?,
            Err(ureq::Error::Status(code, resp)) => match resp.into_json::<Value>() {
                Ok(v) if v.get("error").is_some() => v,
                _ => bail!("MCP server answered HTTP {code}"),
            },
            Err(e) => return Err(anyhow!(e)).with_context(|| format!("cannot reach {}", self.url)),
        };

        if let Some(err) = response.get("error") {
            let code = err["code"].as_i64().unwrap_or_default();
            let message = err["message"].as_str().unwrap_or("unknown error");
            bail!("{method} failed ({code}): {message}");
        }
        response
            .get("result")
            .cloned()
            .ok_or_else(|| anyhow!("{method}: response has neither result nor error"))
    }

    /// Fire-and-forget notification; the server answers 202 with no body.
    pub fn notify(&self, method: &str) -> Result<()> {
        let body = json!({ "jsonrpc": "2.0", "method": method });
        self.request()
            .send_json(body)
            .map(|_| ())
            .with_context(|| format!("cannot reach {}", self.url))
    }

    pub fn initialize(&self) -> Result<Value> {
        self.call(
            "initialize",
            json!({
                "protocolVersion": PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "specforge-cli", "version": env!("CARGO_PKG_VERSION") }
            }),
        )
    }

    /// `tools/call`, returning the tool's decoded JSON payload.
    pub fn call_tool(&self, name: &str, arguments: Value) -> Result<Value> {
        let result = self.call("tools/call", json!({ "name": name, "arguments": arguments }))?;
        let text = result["content"][0]["text"].as_str().unwrap_or_default();
        if result["isError"].as_bool().unwrap_or(false) {
            bail!("{name}: {text}");
        }
        Ok(serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string())))
    }
}
