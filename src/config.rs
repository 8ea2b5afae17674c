use serde::Deserialize;

/// Immutable application configuration, loaded once at startup and passed
/// into services at construction (no ambient global state).
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub port: u16,
    /// DeepSeek API key; extraction degrades to a no-op when unset.
    pub deepseek_api_key: Option<String>,
    pub deepseek_base_url: String,
    /// GHL private integration token; CRM sync degrades to a no-op when unset.
    pub ghl_api_key: Option<String>,
    pub ghl_location_id: Option<String>,
    pub ghl_base_url: String,
    pub ghl_custom_fields: GhlCustomFieldIds,
    /// Display name of the GHL media folder receiving signed NDAs.
    pub signed_nda_folder: String,
    /// Local directory where rendered signed NDAs are written.
    pub nda_output_dir: String,
}

/// Remote custom-field identifiers for the GHL location. Each is optional:
/// an unset id removes that field from every sync payload.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GhlCustomFieldIds {
    pub listing_id: Option<String>,
    pub listing_name: Option<String>,
    pub ref_id: Option<String>,
    pub lead_source: Option<String>,
    pub purchase_timeframe: Option<String>,
    pub amount_to_invest: Option<String>,
    pub lead_message: Option<String>,
}

fn optional_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.trim().is_empty())
}

fn optional_url_env(key: &str, default: &str) -> anyhow::Result<String> {
    match optional_env(key) {
        Some(url) => {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                anyhow::bail!("{} must start with http:// or https://", key);
            }
            Ok(url)
        }
        None => Ok(default.to_string()),
    }
}

impl GhlCustomFieldIds {
    fn from_env() -> Self {
        Self {
            listing_id: optional_env("GHL_CUSTOM_FIELD_LISTING_ID"),
            listing_name: optional_env("GHL_CUSTOM_FIELD_LISTING_NAME"),
            ref_id: optional_env("GHL_CUSTOM_FIELD_REF_ID"),
            lead_source: optional_env("GHL_CUSTOM_FIELD_LEAD_SOURCE"),
            purchase_timeframe: optional_env("GHL_CUSTOM_FIELD_PURCHASE_TIMEFRAME"),
            amount_to_invest: optional_env("GHL_CUSTOM_FIELD_AMOUNT_TO_INVEST"),
            lead_message: optional_env("GHL_CUSTOM_FIELD_LEAD_MESSAGE"),
        }
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let config = Self {
            database_url: std::env::var("DB_URL")
                .or_else(|_| std::env::var("DATABASE_URL"))
                .map_err(|_| {
                    anyhow::anyhow!("DB_URL or DATABASE_URL environment variable required")
                })
                .and_then(|url| {
                    if url.trim().is_empty() {
                        anyhow::bail!("DB_URL cannot be empty");
                    }
                    if !url.starts_with("postgresql://") && !url.starts_with("postgres://") {
                        anyhow::bail!("DB_URL must start with postgresql:// or postgres://");
                    }
                    Ok(url)
                })?,
            port: std::env::var("PORT")
                .unwrap_or_else(|_| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            deepseek_api_key: optional_env("DEEPSEEK_API_KEY"),
            deepseek_base_url: optional_url_env("DEEPSEEK_BASE_URL", "https://api.deepseek.com")?,
            ghl_api_key: optional_env("GHL_API_KEY"),
            ghl_location_id: optional_env("GHL_LOCATION_ID"),
            ghl_base_url: optional_url_env(
                "GHL_BASE_URL",
                "https://services.leadconnectorhq.com",
            )?,
            ghl_custom_fields: GhlCustomFieldIds::from_env(),
            signed_nda_folder: optional_env("GHL_SIGNED_NDA_FOLDER")
                .unwrap_or_else(|| "Signed_NDA".to_string()),
            nda_output_dir: optional_env("NDA_OUTPUT_DIR")
                .unwrap_or_else(|| "nda_signed".to_string()),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!(
            "Database URL: {}...",
            &config.database_url[..20.min(config.database_url.len())]
        );
        tracing::debug!("GHL Base URL: {}", config.ghl_base_url);
        tracing::debug!("DeepSeek Base URL: {}", config.deepseek_base_url);
        tracing::debug!("Server Port: {}", config.port);
        if config.deepseek_api_key.is_none() {
            tracing::warn!("DEEPSEEK_API_KEY not set; lead extraction will be skipped");
        }
        if config.ghl_api_key.is_none() || config.ghl_location_id.is_none() {
            tracing::warn!("GHL_API_KEY or GHL_LOCATION_ID not set; CRM sync will be skipped");
        }

        Ok(config)
    }
}
