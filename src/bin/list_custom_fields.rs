//! Utility to list the GHL location's custom field definitions.
//!
//! Prints name, data type, and id for each field so the
//! `GHL_CUSTOM_FIELD_*` environment variables can be filled in.

use rust_inbound_api::config::Config;
use rust_inbound_api::ghl_client::GhlClient;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::from_env()?;
    let client = GhlClient::from_config(&config)
        .ok_or("GHL_API_KEY and GHL_LOCATION_ID must be set in the environment")?;

    let fields = client
        .list_custom_fields()
        .await
        .map_err(|e| e.to_string())?;

    println!("Custom fields for location:");
    for field in &fields {
        let name = field.get("name").and_then(|v| v.as_str()).unwrap_or("?");
        let data_type = field
            .get("dataType")
            .and_then(|v| v.as_str())
            .unwrap_or("?");
        let id = field.get("id").and_then(|v| v.as_str()).unwrap_or("?");
        println!("  {:<36} {:<14} {}", name, data_type, id);
    }
    println!("\n{} field(s) total", fields.len());

    Ok(())
}
