//! AnkiConnect RPC client.
//!
//! Pure stateless transport: versioned JSON request/response over HTTP POST
//! to a local port, a configurable timeout enforced by the HTTP client, and
//! typed error classification. Retries belong to the connection supervisor
//! and the batch orchestrators, never here.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::{DeserializeOwned, IgnoredAny};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::util::compact_text;

/// AnkiConnect protocol version carried on every request
pub const RPC_VERSION: u32 = 6;

/// Wire request envelope: `{action, version, params}`
#[derive(Debug, Serialize)]
struct RpcRequest<'a, P: Serialize> {
    action: &'a str,
    version: u32,
    params: P,
}

/// Wire response envelope: `{result, error}`
#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<String>,
}

/// Transport seam so tests can script responses without a live peer
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// POST one JSON body and return the raw JSON response body
    async fn post(&self, body: serde_json::Value) -> Result<serde_json::Value>;
}

/// HTTP transport to a local AnkiConnect port
pub struct HttpTransport {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpTransport {
    /// Build a transport for the configured endpoint and timeout.
    ///
    /// The timeout is enforced by the HTTP client (request cancellation,
    /// not polling).
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post(&self, body: serde_json::Value) -> Result<serde_json::Value> {
        let response = self.client.post(&self.endpoint).json(&body).send().await?;
        if !response.status().is_success() {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Protocol(format!(
                "peer returned HTTP {status}: {}",
                compact_text(&body)
            )));
        }
        Ok(response.json::<serde_json::Value>().await?)
    }
}

/// Typed client over the wire protocol
#[derive(Clone)]
pub struct RpcClient {
    transport: Arc<dyn RpcTransport>,
}

impl RpcClient {
    /// Client talking HTTP to the configured endpoint
    pub fn connect(config: &SyncConfig) -> Result<Self> {
        let transport = HttpTransport::new(
            &config.endpoint,
            Duration::from_secs(config.request_timeout_secs),
        )?;
        Ok(Self {
            transport: Arc::new(transport),
        })
    }

    /// Client over an arbitrary transport (tests use a scripted one)
    pub fn with_transport(transport: Arc<dyn RpcTransport>) -> Self {
        Self { transport }
    }

    /// Issue one versioned call and decode its typed result.
    ///
    /// A peer-side `error` becomes [`Error::Remote`] with the peer's message
    /// verbatim; a response with neither result nor error is a protocol
    /// violation.
    pub async fn invoke<P: Serialize, R: DeserializeOwned>(
        &self,
        action: &str,
        params: P,
    ) -> Result<R> {
        let body = serde_json::to_value(RpcRequest {
            action,
            version: RPC_VERSION,
            params,
        })?;
        debug!(action, "rpc call");
        let raw = self.transport.post(body).await?;
        let response: RpcResponse<R> = serde_json::from_value(raw)
            .map_err(|error| Error::Protocol(format!("malformed {action} response: {error}")))?;
        if let Some(message) = response.error {
            return Err(Error::Remote(message));
        }
        response.result.ok_or_else(|| {
            Error::Protocol(format!("{action} response had neither result nor error"))
        })
    }

    /// Protocol version probe; also the heartbeat no-op
    pub async fn version(&self) -> Result<u32> {
        self.invoke("version", serde_json::json!({})).await
    }

    /// All deck names known to the peer
    pub async fn deck_names(&self) -> Result<Vec<String>> {
        self.invoke("deckNames", serde_json::json!({})).await
    }

    /// Create a deck; returns its id. Idempotent on the peer side.
    pub async fn create_deck(&self, deck: &str) -> Result<i64> {
        self.invoke("createDeck", serde_json::json!({ "deck": deck }))
            .await
    }

    /// Ordered field names of one note type
    pub async fn model_field_names(&self, model: &str) -> Result<Vec<String>> {
        self.invoke("modelFieldNames", serde_json::json!({ "modelName": model }))
            .await
    }

    /// Card templates of one note type, keyed by template name
    pub async fn model_templates(&self, model: &str) -> Result<BTreeMap<String, TemplateSides>> {
        self.invoke("modelTemplates", serde_json::json!({ "modelName": model }))
            .await
    }

    /// Create a note type on the peer
    pub async fn create_model(&self, request: &CreateModelRequest) -> Result<()> {
        // The peer echoes the full model object back; nothing downstream
        // needs it, so the body is discarded after validation.
        let _: IgnoredAny = self.invoke("createModel", request).await?;
        Ok(())
    }

    /// Create a note; returns the new remote note id
    pub async fn add_note(&self, note: &RemoteNote) -> Result<i64> {
        self.invoke("addNote", serde_json::json!({ "note": note }))
            .await
    }

    /// Replace the fields and tag list of an existing note
    pub async fn update_note(
        &self,
        remote_id: i64,
        fields: &BTreeMap<String, String>,
        tags: &[String],
    ) -> Result<()> {
        let _: IgnoredAny = self
            .invoke(
                "updateNote",
                serde_json::json!({
                    "note": { "id": remote_id, "fields": fields, "tags": tags }
                }),
            )
            .await?;
        Ok(())
    }

    /// Delete notes by remote id
    pub async fn delete_notes(&self, remote_ids: &[i64]) -> Result<()> {
        let _: IgnoredAny = self
            .invoke("deleteNotes", serde_json::json!({ "notes": remote_ids }))
            .await?;
        Ok(())
    }

    /// Remote ids of notes matching a peer-side search query
    pub async fn find_notes(&self, query: &str) -> Result<Vec<i64>> {
        self.invoke("findNotes", serde_json::json!({ "query": query }))
            .await
    }

    /// Full info for the given remote notes
    pub async fn notes_info(&self, remote_ids: &[i64]) -> Result<Vec<RemoteNoteInfo>> {
        self.invoke("notesInfo", serde_json::json!({ "notes": remote_ids }))
            .await
    }

    /// Store one media file (base64 payload); returns the stored filename
    pub async fn store_media_file(&self, filename: &str, data_b64: &str) -> Result<String> {
        self.invoke(
            "storeMediaFile",
            serde_json::json!({ "filename": filename, "data": data_b64 }),
        )
        .await
    }

    /// Retrieve one media file as base64, `None` when the peer lacks it.
    ///
    /// The peer signals a missing file as `result: false`, so this decodes
    /// into a permissive enum first.
    pub async fn retrieve_media_file(&self, filename: &str) -> Result<Option<String>> {
        let result: MediaRetrieval = self
            .invoke(
                "retrieveMediaFile",
                serde_json::json!({ "filename": filename }),
            )
            .await?;
        match result {
            MediaRetrieval::Data(data) => Ok(Some(data)),
            MediaRetrieval::Missing(_) => Ok(None),
        }
    }
}

/// One side pair of a remote card template
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct TemplateSides {
    /// Front-side template markup
    #[serde(rename = "Front")]
    pub front: String,
    /// Back-side template markup
    #[serde(rename = "Back")]
    pub back: String,
}

/// Payload for `createModel`
#[derive(Debug, Clone, Serialize)]
pub struct CreateModelRequest {
    #[serde(rename = "modelName")]
    pub model_name: String,
    #[serde(rename = "inOrderFields")]
    pub in_order_fields: Vec<String>,
    #[serde(rename = "cardTemplates")]
    pub card_templates: Vec<CreateModelTemplate>,
}

/// One template inside a `createModel` payload
#[derive(Debug, Clone, Serialize)]
pub struct CreateModelTemplate {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Front")]
    pub front: String,
    #[serde(rename = "Back")]
    pub back: String,
}

/// Payload for `addNote`
#[derive(Debug, Clone, Serialize)]
pub struct RemoteNote {
    #[serde(rename = "deckName")]
    pub deck_name: String,
    #[serde(rename = "modelName")]
    pub model_name: String,
    pub fields: BTreeMap<String, String>,
    pub tags: Vec<String>,
}

/// One entry of a `notesInfo` result
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteNoteInfo {
    #[serde(rename = "noteId")]
    pub note_id: i64,
    #[serde(rename = "modelName")]
    pub model_name: String,
    pub tags: Vec<String>,
    pub fields: BTreeMap<String, RemoteFieldValue>,
    /// Remote modification time (Unix seconds)
    #[serde(rename = "mod", default)]
    pub modified_at: i64,
}

impl RemoteNoteInfo {
    /// Field values flattened to name -> content, dropping order metadata
    #[must_use]
    pub fn field_values(&self) -> BTreeMap<String, String> {
        self.fields
            .iter()
            .map(|(name, field)| (name.clone(), field.value.clone()))
            .collect()
    }
}

/// One field value within a `notesInfo` entry
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteFieldValue {
    pub value: String,
    #[serde(default)]
    pub order: u32,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum MediaRetrieval {
    Missing(bool),
    Data(String),
}
