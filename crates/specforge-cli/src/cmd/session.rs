use anyhow::{bail, Result};
use serde_json::json;

use crate::client::{McpClient, PROTOCOL_VERSION};
use crate::output::{print_json, print_table, scalar};

// ---------------------------------------------------------------------------
// connect
// ---------------------------------------------------------------------------

pub fn connect(client: &McpClient, json: bool) -> Result<()> {
    let result = client.initialize()?;
    let name = scalar(&result["serverInfo"]["name"]);
    let version = scalar(&result["serverInfo"]["version"]);

    if json {
        print_json(&json!({ "url": client.url(), "server": name, "version": version }))?;
    } else {
        println!("connected to {name} {version} at {}", client.url());
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// handshake
// ---------------------------------------------------------------------------

pub fn handshake(client: &McpClient, json: bool) -> Result<()> {
    let result = client.initialize()?;
    let negotiated = result["protocolVersion"].as_str().unwrap_or_default();
    if negotiated != PROTOCOL_VERSION {
        bail!("server speaks protocol '{negotiated}', expected '{PROTOCOL_VERSION}'");
    }
    client.notify("notifications/initialized")?;

    if json {
        return print_json(&result);
    }
    println!("protocol:     {negotiated}");
    println!(
        "server:       {} {}",
        scalar(&result["serverInfo"]["name"]),
        scalar(&result["serverInfo"]["version"])
    );
    let caps: Vec<&str> = result["capabilities"]
        .as_object()
        .map(|m| m.keys().map(String::as_str).collect())
        .unwrap_or_default();
    println!("capabilities: {}", if caps.is_empty() { "-".to_string() } else { caps.join(", ") });
    Ok(())
}

// ---------------------------------------------------------------------------
// tools
// ---------------------------------------------------------------------------

pub fn tools(client: &McpClient, json: bool) -> Result<()> {
    let result = client.call("tools/list", json!({}))?;
    let tools = result["tools"].as_array().cloned().unwrap_or_default();

    if json {
        return print_json(&tools);
    }
    if tools.is_empty() {
        println!("No tools.");
        return Ok(());
    }
    let rows = tools
        .iter()
        .map(|t| vec![scalar(&t["name"]), scalar(&t["description"])])
        .collect();
    print_table(&["NAME", "DESCRIPTION"], rows);
    Ok(())
}
