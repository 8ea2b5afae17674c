use crate::config::Config;
use crate::errors::AppError;
use reqwest;
use serde_json::Value;
use std::time::Duration;
use tracing;

/// Fixed API version header required by GHL API v2 on every call.
const GHL_API_VERSION: &str = "2021-07-28";

/// Client for the GoHighLevel (LeadConnector) REST API.
///
/// Covers the contact endpoints used by the reconciler plus the media
/// storage endpoints used for signed NDA uploads. Every call carries the
/// bearer token and the fixed `Version` header.
#[derive(Clone)]
pub struct GhlClient {
    client: reqwest::Client,
    base_url: String,
    token: String,
    location_id: String,
}

impl GhlClient {
    pub fn new(base_url: String, token: String, location_id: String) -> Result<Self, AppError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(15))
            .build()
            .map_err(|e| {
                AppError::ExternalApiError(format!("Failed to create GHL client: {}", e))
            })?;

        Ok(Self {
            client,
            base_url,
            token,
            location_id,
        })
    }

    /// Build a client from configuration; `None` when the API key or
    /// location id is missing (sync is then skipped entirely).
    pub fn from_config(config: &Config) -> Option<Self> {
        let token = config.ghl_api_key.clone()?;
        let location_id = config.ghl_location_id.clone()?;
        match Self::new(config.ghl_base_url.clone(), token, location_id) {
            Ok(client) => Some(client),
            Err(e) => {
                tracing::error!("Failed to initialize GHL client: {}", e);
                None
            }
        }
    }

    pub fn location_id(&self) -> &str {
        &self.location_id
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.client
            .request(method, format!("{}{}", self.base_url, path))
            .header("Authorization", format!("Bearer {}", self.token))
            .header("Version", GHL_API_VERSION)
            .header("Accept", "application/json")
    }

    /// POST /contacts/search. The search body carries `locationId` plus a
    /// `phone` filter and/or a generic `query` string; GHL cannot compound
    /// them with AND in one call, which is why the reconciler intersects two
    /// searches. Tolerates `contacts` returned as array, single object, or
    /// absent.
    pub async fn search_contacts(&self, body: Value) -> Result<Vec<Value>, AppError> {
        let response = self
            .request(reqwest::Method::POST, "/contacts/search")
            .json(&body)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("GHL search failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "GHL search returned {}: {}",
                status, error_text
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse GHL search response: {}", e))
        })?;

        let contacts = match data.get("contacts").or_else(|| data.get("contact")) {
            Some(Value::Array(items)) => items.clone(),
            Some(obj @ Value::Object(_)) => vec![obj.clone()],
            _ => Vec::new(),
        };
        Ok(contacts)
    }

    /// POST /contacts/: create a new contact, returning its id.
    pub async fn create_contact(&self, payload: Value) -> Result<String, AppError> {
        let response = self
            .request(reqwest::Method::POST, "/contacts/")
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("GHL create failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "GHL create failed {}: {}",
                status, error_text
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse GHL create response: {}", e))
        })?;

        extract_contact_id(&data).ok_or_else(|| {
            AppError::ExternalApiError(
                "GHL create response missing 'contact.id' or 'id' field".to_string(),
            )
        })
    }

    /// PUT /contacts/{id}: whole-payload contact update.
    pub async fn update_contact(&self, contact_id: &str, payload: Value) -> Result<(), AppError> {
        let response = self
            .request(reqwest::Method::PUT, &format!("/contacts/{}", contact_id))
            .json(&payload)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("GHL update failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "GHL update of contact {} failed {}: {}",
                contact_id, status, error_text
            )));
        }

        Ok(())
    }

    /// GET /locations/{id}/customFields: list the location's custom field
    /// definitions (used by the operator tool to fill the env mapping).
    pub async fn list_custom_fields(&self) -> Result<Vec<Value>, AppError> {
        let path = format!("/locations/{}/customFields", self.location_id);
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("GHL custom field listing failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(AppError::ExternalApiError(format!(
                "GHL custom field listing returned {}",
                status
            )));
        }

        let data: Value = response.json().await.map_err(|e| {
            AppError::ExternalApiError(format!("Failed to parse custom field listing: {}", e))
        })?;

        match data.get("customFields") {
            Some(Value::Array(items)) => Ok(items.clone()),
            _ => Ok(Vec::new()),
        }
    }

    /// Look up a media folder id by display name. The listing endpoint has
    /// moved between `/medias/files` and `/medias`; both are tried.
    pub async fn find_media_folder(&self, name: &str) -> Result<Option<String>, AppError> {
        let mut data: Option<Value> = None;
        for path in [
            format!("/medias/files?locationId={}", self.location_id),
            format!("/medias?locationId={}", self.location_id),
        ] {
            let response = self
                .request(reqwest::Method::GET, &path)
                .send()
                .await
                .map_err(|e| {
                    AppError::ExternalApiError(format!("GHL media listing failed: {}", e))
                })?;
            if response.status().is_success() {
                data = response.json().await.ok();
                break;
            }
        }
        let Some(data) = data else {
            return Err(AppError::ExternalApiError(
                "GHL media listing failed on all endpoints".to_string(),
            ));
        };

        let items = media_items(&data);
        for item in items {
            let item_name = item
                .get("name")
                .or_else(|| item.get("title"))
                .and_then(|v| v.as_str())
                .unwrap_or("")
                .trim();
            if item_name == name {
                if let Some(id) = item
                    .get("id")
                    .or_else(|| item.get("_id"))
                    .and_then(|v| v.as_str())
                {
                    return Ok(Some(id.to_string()));
                }
            }
        }
        Ok(None)
    }

    /// POST /medias/folder: create a media folder, returning its id.
    pub async fn create_media_folder(&self, name: &str) -> Result<Option<String>, AppError> {
        let body = serde_json::json!({
            "locationId": self.location_id,
            "name": name,
        });
        let response = self
            .request(reqwest::Method::POST, "/medias/folder")
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                AppError::ExternalApiError(format!("GHL folder creation failed: {}", e))
            })?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "GHL folder creation failed {}: {}",
                status, error_text
            )));
        }

        let data: Value = response.json().await.unwrap_or(Value::Null);
        let folder = data
            .get("folder")
            .or_else(|| data.get("media"))
            .unwrap_or(&data);
        Ok(folder
            .get("id")
            .and_then(|v| v.as_str())
            .map(|id| id.to_string()))
    }

    /// POST /medias/upload-file: multipart upload into an optional folder.
    /// Returns the media id when the response carries one.
    pub async fn upload_file(
        &self,
        file_name: &str,
        bytes: Vec<u8>,
        folder_id: Option<&str>,
    ) -> Result<Option<String>, AppError> {
        let part = reqwest::multipart::Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str("application/pdf")
            .map_err(|e| AppError::InternalError(format!("Invalid upload mime type: {}", e)))?;

        let mut form = reqwest::multipart::Form::new()
            .part("file", part)
            .text("locationId", self.location_id.clone())
            .text("name", file_name.to_string());
        if let Some(folder) = folder_id {
            form = form.text("folderId", folder.to_string());
        }

        let response = self
            .request(reqwest::Method::POST, "/medias/upload-file")
            .timeout(Duration::from_secs(30))
            .multipart(form)
            .send()
            .await
            .map_err(|e| AppError::ExternalApiError(format!("GHL upload failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(AppError::ExternalApiError(format!(
                "GHL media upload failed {}: {}",
                status, error_text
            )));
        }

        let body: Value = response.json().await.unwrap_or(Value::Null);
        let media_id = body
            .get("media")
            .and_then(|m| m.get("id"))
            .or_else(|| body.get("file").and_then(|f| f.get("id")))
            .or_else(|| body.get("id"))
            .and_then(|v| v.as_str())
            .map(|id| id.to_string());

        if media_id.is_none() {
            tracing::warn!("GHL upload succeeded but returned no media id: {}", body);
        }
        Ok(media_id)
    }
}

/// Contact id from a create/search response: `{contact: {id}}`, `{id}`, with
/// string or numeric ids.
pub fn extract_contact_id(data: &Value) -> Option<String> {
    let candidate = data.get("contact").and_then(|c| c.get("id")).or_else(|| data.get("id"));
    match candidate {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    }
}

/// Media listing items may arrive under `medias`, `files`, or `folders`,
/// possibly nested one level.
fn media_items(data: &Value) -> Vec<Value> {
    let top = data
        .get("medias")
        .or_else(|| data.get("files"))
        .or_else(|| data.get("folders"));
    match top {
        Some(Value::Array(items)) => items.clone(),
        Some(inner @ Value::Object(_)) => {
            let nested = inner
                .get("medias")
                .or_else(|| inner.get("files"))
                .or_else(|| inner.get("folders"));
            match nested {
                Some(Value::Array(items)) => items.clone(),
                _ => Vec::new(),
            }
        }
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_client_creation() {
        let client = GhlClient::new(
            "https://example.com".to_string(),
            "token".to_string(),
            "loc".to_string(),
        );
        assert!(client.is_ok());
    }

    #[test]
    fn contact_id_from_nested_and_flat_shapes() {
        assert_eq!(
            extract_contact_id(&json!({"contact": {"id": "abc"}})),
            Some("abc".to_string())
        );
        assert_eq!(
            extract_contact_id(&json!({"id": "xyz"})),
            Some("xyz".to_string())
        );
        assert_eq!(
            extract_contact_id(&json!({"id": 42})),
            Some("42".to_string())
        );
        assert_eq!(extract_contact_id(&json!({"ok": true})), None);
    }

    #[test]
    fn media_items_tolerates_shapes() {
        assert_eq!(media_items(&json!({"medias": [{"id": "1"}]})).len(), 1);
        assert_eq!(media_items(&json!({"files": {"files": [{}, {}]}})).len(), 2);
        assert!(media_items(&json!({"unexpected": 1})).is_empty());
    }
}
