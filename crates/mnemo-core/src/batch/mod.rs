//! Batch import/export orchestration.
//!
//! Records are processed one at a time so RPC load stays bounded; read-only
//! enrichment calls may fan out behind a small concurrency cap. A failing
//! record is logged and skipped, never aborting the batch. Only an
//! orchestration-level error escaping the loop is fatal, and for imports it
//! rolls the local store back to the pre-import backup.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{debug, error, info, warn};

use crate::backup::{BackupManager, BackupReason};
use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::media::MediaTransfer;
use crate::models::{
    Card, CardSchema, MappingRecord, SyncDirection, SyncLogEntry, SyncStatus,
};
use crate::pipeline::{ContentPipeline, ConvertContext};
use crate::registry::MappingRegistry;
use crate::rpc::{RemoteNote, RemoteNoteInfo, RpcClient};
use crate::schema::{export_local_schema, import_remote_model, BOOKKEEPING_FIELDS};
use crate::tracker::SyncTracker;
use crate::util::unix_timestamp_ms;

const NOTES_INFO_CHUNK: usize = 50;

/// Cooperative cancellation flag, checked between record iterations
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the in-flight record still completes
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// Clear the flag before a new run
    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum ItemOutcome {
    Transferred,
    Skipped,
}

/// Pushes changed local cards to the peer
pub struct BatchExporter<'a, S: crate::store::CardStore> {
    pub client: &'a RpcClient,
    pub config: &'a SyncConfig,
    pub registry: &'a mut MappingRegistry,
    pub tracker: &'a mut SyncTracker,
    pub store: &'a S,
    pub media_root: &'a Path,
    pub cancel: &'a CancelFlag,
}

impl<S: crate::store::CardStore> BatchExporter<'_, S> {
    /// Export one deck. Per-item failures are recorded and skipped; the
    /// returned log carries the run's counts and error list.
    pub async fn run(&mut self, scope: &str) -> Result<SyncLogEntry> {
        let mut log = SyncLogEntry::begin();
        let cards = self.store.all_cards(scope)?;

        let changed = self.changed_set(&cards);
        log.skipped = cards.len() - changed.len();
        if changed.is_empty() {
            log.finish();
            debug!(scope, "nothing to export");
            return Ok(log);
        }

        self.ensure_deck(scope).await?;

        let pipeline = ContentPipeline::standard();
        let mut models: HashMap<String, String> = HashMap::new();

        for card in changed {
            if self.cancel.is_cancelled() {
                log.warnings.push("run cancelled before completion".to_string());
                break;
            }
            match self.export_one(&card, scope, &pipeline, &mut models, &mut log).await {
                Ok(ItemOutcome::Transferred) => log.succeeded += 1,
                Ok(ItemOutcome::Skipped) => log.skipped += 1,
                Err(error) => {
                    warn!(card = %card.id, %error, "export failed for card");
                    if self.registry.find_by_local_id(&card.id).is_some() {
                        self.registry.set_status(&card.id, SyncStatus::Error)?;
                    }
                    log.record_failure(Some(card.id.as_str()), error.to_string());
                }
            }
        }

        log.finish();
        info!(scope, summary = %log.summary(), "export finished");
        Ok(log)
    }

    /// The minimal changed set: new cards, cards edited since their last
    /// sync, and cards whose mapping hash no longer matches their content.
    fn changed_set(&self, cards: &[Card]) -> Vec<Card> {
        cards
            .iter()
            .filter(|card| {
                if self.tracker.should_sync(card, None) {
                    return true;
                }
                self.registry
                    .find_by_local_id(&card.id)
                    .map_or(true, |mapping| mapping.content_hash != card.content_hash())
            })
            .cloned()
            .collect()
    }

    async fn ensure_deck(&self, scope: &str) -> Result<()> {
        let decks = self.client.deck_names().await?;
        if !decks.iter().any(|deck| deck == scope) {
            self.client.create_deck(scope).await?;
            info!(deck = scope, "created remote deck");
        }
        Ok(())
    }

    async fn export_one(
        &mut self,
        card: &Card,
        scope: &str,
        pipeline: &ContentPipeline,
        models: &mut HashMap<String, String>,
        log: &mut SyncLogEntry,
    ) -> Result<ItemOutcome> {
        let existing = self.registry.find_by_local_id(&card.id).cloned();
        if let Some(mapping) = &existing {
            if mapping.direction == SyncDirection::Pull {
                debug!(card = %card.id, "pull-direction mapping; exporter skips");
                return Ok(ItemOutcome::Skipped);
            }
        }

        let model_name = match models.get(&card.schema_id) {
            Some(name) => name.clone(),
            None => {
                let schema = self.local_schema(&card.schema_id)?;
                let name = export_local_schema(self.client, self.registry, &schema).await?;
                models.insert(card.schema_id.clone(), name.clone());
                name
            }
        };

        let stable_uuid = existing
            .as_ref()
            .map_or_else(uuid::Uuid::now_v7, |mapping| mapping.stable_uuid);
        let content_hash = card.content_hash();

        let (fields, media_hash) = self
            .convert_fields(card, pipeline, log)
            .await?;
        let mut fields = fields;
        self.add_bookkeeping(&card.schema_id, &mut fields, &stable_uuid, &content_hash);

        let remote_id = if let Some(mapping) = &existing {
            // Tags ride along so a tag-only edit still reaches the peer;
            // the content hash covers tags, so dropping them here would
            // freeze the divergence as "synced".
            self.client
                .update_note(mapping.remote_id, &fields, &card.tags)
                .await?;
            mapping.remote_id
        } else {
            self.client
                .add_note(&RemoteNote {
                    deck_name: scope.to_string(),
                    model_name,
                    fields,
                    tags: card.tags.clone(),
                })
                .await?
        };

        let now = unix_timestamp_ms();
        self.registry.record_mapping(MappingRecord {
            local_id: card.id,
            remote_id,
            stable_uuid,
            content_hash,
            media_hash,
            schema_id: card.schema_id.clone(),
            local_modified_at: card.updated_at,
            remote_modified_at: now,
            sync_version: existing.map_or(1, |mapping| mapping.sync_version + 1),
            sync_status: SyncStatus::Synced,
            direction: SyncDirection::Push,
        })?;
        self.tracker.mark_synced(card.id, SyncDirection::Push, now)?;
        if self.registry.template_for(&card.schema_id).is_some() {
            self.registry.mark_template_sync_capable(&card.schema_id)?;
        }
        Ok(ItemOutcome::Transferred)
    }

    async fn convert_fields(
        &self,
        card: &Card,
        pipeline: &ContentPipeline,
        log: &mut SyncLogEntry,
    ) -> Result<(BTreeMap<String, String>, Option<String>)> {
        let ctx = ConvertContext {
            config: self.config,
            source_path: card.source_path.as_deref(),
        };
        let media = MediaTransfer::new(self.client, self.config, self.media_root);

        let mut fields = BTreeMap::new();
        let mut media_hashes = Vec::new();
        for (name, value) in &card.fields {
            let converted = pipeline.run(value, &ctx);
            log.warnings.extend(converted.warnings);

            let transferred = media
                .process(&converted.content, card.source_path.as_deref())
                .await?;
            log.warnings.extend(transferred.warnings);
            if let Some(hash) = transferred.media_hash {
                media_hashes.push(hash);
            }
            fields.insert(name.clone(), transferred.content);
        }

        media_hashes.sort_unstable();
        let media_hash = (!media_hashes.is_empty())
            .then(|| crate::util::sha256_hex(media_hashes.join("\u{1e}").as_bytes()));
        Ok((fields, media_hash))
    }

    fn add_bookkeeping(
        &self,
        schema_id: &str,
        fields: &mut BTreeMap<String, String>,
        stable_uuid: &uuid::Uuid,
        content_hash: &str,
    ) {
        // Only models synthesized by the exporter carry bookkeeping fields;
        // writing unknown fields to a foreign model is a remote error.
        let has_bookkeeping = self
            .registry
            .template_for(schema_id)
            .is_some_and(|template| {
                BOOKKEEPING_FIELDS
                    .iter()
                    .all(|name| template.field_roles.contains_key(*name))
            });
        if has_bookkeeping {
            fields.insert(BOOKKEEPING_FIELDS[0].to_string(), stable_uuid.to_string());
            fields.insert(BOOKKEEPING_FIELDS[1].to_string(), content_hash.to_string());
        }
    }

    fn local_schema(&self, schema_id: &str) -> Result<CardSchema> {
        match self.store.schema(schema_id)? {
            Some(schema) => Ok(schema),
            None if schema_id == "basic" => Ok(CardSchema::basic()),
            None => Err(Error::NotFound(format!("schema '{schema_id}'"))),
        }
    }
}

/// Pulls remote notes of one deck into the local store
pub struct BatchImporter<'a, S: crate::store::CardStore> {
    pub client: &'a RpcClient,
    pub config: &'a SyncConfig,
    pub registry: &'a mut MappingRegistry,
    pub tracker: &'a mut SyncTracker,
    pub store: &'a mut S,
    pub backups: &'a BackupManager,
    pub media_root: &'a Path,
    pub cancel: &'a CancelFlag,
}

impl<S: crate::store::CardStore> BatchImporter<'_, S> {
    /// Import one deck. A backup is taken first; an orchestration-level
    /// error restores it, while per-item failures only land in the log.
    pub async fn run(&mut self, scope: &str) -> Result<SyncLogEntry> {
        let pre_import = self.store.all_cards(scope)?;
        let backup_id = self
            .backups
            .create_backup(scope, &pre_import, BackupReason::Import)?;

        let mut log = SyncLogEntry::begin();
        match self.run_inner(scope, &mut log).await {
            Ok(()) => {
                log.finish();
                info!(scope, summary = %log.summary(), "import finished");
                Ok(log)
            }
            Err(run_error) => {
                error!(scope, %run_error, "import failed; restoring backup");
                match self
                    .backups
                    .restore_backup(backup_id)
                    .and_then(|cards| self.store.save_cards(scope, &cards))
                {
                    Ok(()) => info!(scope, "pre-import state restored"),
                    Err(restore_error) => {
                        error!(scope, %restore_error, "backup restore failed");
                    }
                }
                Err(run_error)
            }
        }
    }

    async fn run_inner(&mut self, scope: &str, log: &mut SyncLogEntry) -> Result<()> {
        let remote_ids = self
            .client
            .find_notes(&format!("deck:\"{scope}\""))
            .await?;
        if remote_ids.is_empty() {
            debug!(scope, "no remote notes to import");
            return Ok(());
        }

        let notes = self.enrich(&remote_ids, log).await;
        let mut cards = self.store.all_cards(scope)?;
        let mut schemas: HashMap<String, CardSchema> = HashMap::new();

        for note in notes {
            if self.cancel.is_cancelled() {
                log.warnings.push("run cancelled before completion".to_string());
                break;
            }
            match self.import_one(&note, scope, &mut cards, &mut schemas, log).await {
                Ok(ItemOutcome::Transferred) => {
                    // Persist after every record; the pre-import backup is
                    // the rollback point if the store gives out mid-run.
                    self.store.save_cards(scope, &cards)?;
                    log.succeeded += 1;
                }
                Ok(ItemOutcome::Skipped) => log.skipped += 1,
                Err(error) => {
                    warn!(note = note.note_id, %error, "import failed for note");
                    log.record_failure(None, format!("note {}: {error}", note.note_id));
                }
            }
        }
        Ok(())
    }

    /// Read-only enrichment with bounded fan-out and per-chunk error
    /// tolerance: one failed chunk is logged, the rest still import.
    async fn enrich(&self, remote_ids: &[i64], log: &mut SyncLogEntry) -> Vec<RemoteNoteInfo> {
        let results: Vec<Result<Vec<RemoteNoteInfo>>> = stream::iter(
            remote_ids
                .chunks(NOTES_INFO_CHUNK)
                .map(|chunk| self.client.notes_info(chunk)),
        )
        .buffered(self.config.concurrency_limit)
        .collect()
        .await;

        let mut notes = Vec::with_capacity(remote_ids.len());
        for result in results {
            match result {
                Ok(chunk) => notes.extend(chunk),
                Err(error) => {
                    log.record_failure(None, format!("notesInfo chunk failed: {error}"));
                }
            }
        }
        notes
    }

    async fn import_one(
        &mut self,
        note: &RemoteNoteInfo,
        scope: &str,
        cards: &mut Vec<Card>,
        schemas: &mut HashMap<String, CardSchema>,
        log: &mut SyncLogEntry,
    ) -> Result<ItemOutcome> {
        let existing = self.registry.find_by_remote_id(note.note_id).cloned();
        if let Some(mapping) = &existing {
            if mapping.direction == SyncDirection::Push {
                debug!(note = note.note_id, "push-direction mapping; importer skips");
                return Ok(ItemOutcome::Skipped);
            }
        }

        let remote_modified_ms = note.modified_at * 1000;
        if let Some(mapping) = &existing {
            if remote_modified_ms <= mapping.remote_modified_at {
                return Ok(ItemOutcome::Skipped);
            }
        }

        let schema = match schemas.get(&note.model_name) {
            Some(schema) => schema.clone(),
            None => {
                let schema =
                    import_remote_model(self.client, self.registry, &note.model_name).await?;
                self.store.save_schema(&schema)?;
                schemas.insert(note.model_name.clone(), schema.clone());
                schema
            }
        };

        let mut fields = note.field_values();
        for bookkeeping in BOOKKEEPING_FIELDS {
            fields.remove(bookkeeping);
        }
        for value in fields.values_mut() {
            *value = self.localize_media(value, log).await;
        }

        let now = unix_timestamp_ms();
        let card = if let Some(mapping) = &existing {
            let card = cards
                .iter_mut()
                .find(|card| card.id == mapping.local_id)
                .ok_or_else(|| {
                    Error::NotFound(format!("mapped local card {}", mapping.local_id))
                })?;
            card.fields = fields;
            card.tags = note.tags.clone();
            card.updated_at = now;
            card.clone()
        } else {
            let mut card = Card::new(scope, schema.id.clone());
            card.fields = fields;
            card.tags = note.tags.clone();
            cards.push(card.clone());
            card
        };

        self.registry.record_mapping(MappingRecord {
            local_id: card.id,
            remote_id: note.note_id,
            stable_uuid: existing
                .as_ref()
                .map_or_else(uuid::Uuid::now_v7, |mapping| mapping.stable_uuid),
            content_hash: card.content_hash(),
            media_hash: None,
            schema_id: schema.id,
            local_modified_at: card.updated_at,
            remote_modified_at: remote_modified_ms,
            sync_version: existing.map_or(1, |mapping| mapping.sync_version + 1),
            sync_status: SyncStatus::Synced,
            direction: SyncDirection::Pull,
        })?;
        self.tracker.mark_synced(card.id, SyncDirection::Pull, now)?;
        Ok(ItemOutcome::Transferred)
    }

    /// Rewrite peer media syntax back to local embeds, pulling files down
    /// into the media root. Failures degrade to warnings.
    async fn localize_media(&self, content: &str, log: &mut SyncLogEntry) -> String {
        let media = MediaTransfer::new(self.client, self.config, self.media_root);
        let mut result = content.to_string();

        let mut refs = crate::media::extract_media_refs(content);
        refs.extend(crate::media::extract_sound_refs(content));
        for media_ref in refs {
            match media.retrieve(&media_ref.path).await {
                Ok(Some(stored)) => {
                    // The embed carries the name the file was stored under,
                    // which may differ from the reference as written.
                    let embed = stored
                        .file_name()
                        .and_then(|name| name.to_str())
                        .map_or_else(|| media_ref.path.clone(), str::to_string);
                    result = result.replacen(&media_ref.raw, &format!("![[{embed}]]"), 1);
                }
                Ok(None) => log
                    .warnings
                    .push(format!("peer has no media file: {}", media_ref.path)),
                Err(error) => log
                    .warnings
                    .push(format!("media download failed for {}: {error}", media_ref.path)),
            }
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use pretty_assertions::assert_eq;

    use super::*;
    use crate::registry::MappingRegistry;
    use crate::rpc::tests::ScriptedTransport;
    use crate::store::{CardStore, MemoryStore};

    struct Harness {
        _dir: tempfile::TempDir,
        config: SyncConfig,
        registry: MappingRegistry,
        tracker: SyncTracker,
        backups: BackupManager,
        media_root: std::path::PathBuf,
        cancel: CancelFlag,
    }

    impl Harness {
        fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let registry = MappingRegistry::load(dir.path().join("mappings.json")).unwrap();
            let tracker = SyncTracker::load(dir.path().join("timestamps.json")).unwrap();
            let backups = BackupManager::new(dir.path().join("backups"), 5);
            let media_root = dir.path().join("media");
            std::fs::create_dir_all(&media_root).unwrap();
            Self {
                _dir: dir,
                config: SyncConfig::default(),
                registry,
                tracker,
                backups,
                media_root,
                cancel: CancelFlag::new(),
            }
        }
    }

    fn seeded_store(deck: &str, count: usize) -> MemoryStore {
        let mut store = MemoryStore::new();
        store.save_schema(&CardSchema::basic()).unwrap();
        for index in 0..count {
            store.insert_card(
                Card::new(deck, "basic")
                    .with_field("Front", format!("question {index}"))
                    .with_field("Back", format!("answer {index}")),
            );
        }
        store
    }

    fn exporter<'a>(
        harness: &'a mut Harness,
        client: &'a RpcClient,
        store: &'a MemoryStore,
    ) -> BatchExporter<'a, MemoryStore> {
        BatchExporter {
            client,
            config: &harness.config,
            registry: &mut harness.registry,
            tracker: &mut harness.tracker,
            store,
            media_root: &harness.media_root,
            cancel: &harness.cancel,
        }
    }

    #[tokio::test]
    async fn export_continues_past_failing_record() {
        let mut harness = Harness::new();
        let store = seeded_store("Deck", 10);

        let mut responses = vec![
            ScriptedTransport::ok(serde_json::json!(["Deck"])),
            ScriptedTransport::ok(serde_json::json!({})),
        ];
        for index in 0..10 {
            if index == 4 {
                responses.push(ScriptedTransport::remote_error("duplicate note"));
            } else {
                responses.push(ScriptedTransport::ok(serde_json::json!(2000 + index)));
            }
        }
        let transport = Arc::new(ScriptedTransport::new(responses));
        let client = RpcClient::with_transport(transport.clone());

        let log = exporter(&mut harness, &client, &store)
            .run("Deck")
            .await
            .unwrap();

        assert_eq!(log.succeeded, 9);
        assert_eq!(log.failed, 1);
        assert_eq!(log.errors.len(), 1);
        assert!(log.errors[0].message.contains("duplicate note"));
        assert_eq!(harness.registry.len(), 9);
        // deckNames + createModel + 10 addNote attempts
        assert_eq!(transport.request_count(), 12);
    }

    #[tokio::test]
    async fn unchanged_store_export_issues_no_calls() {
        let mut harness = Harness::new();
        let store = seeded_store("Deck", 3);

        let first = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::ok(serde_json::json!(["Deck"])),
            ScriptedTransport::ok(serde_json::json!({})),
            ScriptedTransport::ok(serde_json::json!(2001)),
            ScriptedTransport::ok(serde_json::json!(2002)),
            ScriptedTransport::ok(serde_json::json!(2003)),
        ]));
        let client = RpcClient::with_transport(first.clone());
        let log = exporter(&mut harness, &client, &store)
            .run("Deck")
            .await
            .unwrap();
        assert_eq!(log.succeeded, 3);
        let snapshot = harness.registry.snapshot_bytes().unwrap();

        let second = Arc::new(ScriptedTransport::new(vec![]));
        let client = RpcClient::with_transport(second.clone());
        let log = exporter(&mut harness, &client, &store)
            .run("Deck")
            .await
            .unwrap();

        assert_eq!(log.succeeded, 0);
        assert_eq!(log.skipped, 3);
        assert_eq!(second.request_count(), 0);
        assert_eq!(harness.registry.snapshot_bytes().unwrap(), snapshot);
    }

    #[tokio::test]
    async fn exporter_skips_pull_direction_mappings() {
        let mut harness = Harness::new();
        let store = seeded_store("Deck", 1);
        let card = &store.all_cards("Deck").unwrap()[0];
        harness
            .registry
            .record_mapping(MappingRecord {
                local_id: card.id,
                remote_id: 7001,
                stable_uuid: uuid::Uuid::now_v7(),
                content_hash: "stale".to_string(),
                media_hash: None,
                schema_id: "basic".to_string(),
                local_modified_at: 0,
                remote_modified_at: 0,
                sync_version: 1,
                sync_status: SyncStatus::Synced,
                direction: SyncDirection::Pull,
            })
            .unwrap();

        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::ok(
            serde_json::json!(["Deck"]),
        )]));
        let client = RpcClient::with_transport(transport.clone());
        let log = exporter(&mut harness, &client, &store)
            .run("Deck")
            .await
            .unwrap();

        assert_eq!(log.succeeded, 0);
        assert_eq!(log.skipped, 1);
        // only the deck listing; no note mutation for a pull-owned card
        assert_eq!(transport.request_count(), 1);
    }

    #[tokio::test]
    async fn tag_only_edit_reaches_the_peer_on_update() {
        let mut harness = Harness::new();
        let mut store = seeded_store("Deck", 1);

        let first = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::ok(serde_json::json!(["Deck"])),
            ScriptedTransport::ok(serde_json::json!({})),
            ScriptedTransport::ok(serde_json::json!(2001)),
        ]));
        let client = RpcClient::with_transport(first);
        exporter(&mut harness, &client, &store)
            .run("Deck")
            .await
            .unwrap();

        let mut card = store.all_cards("Deck").unwrap()[0].clone();
        card.tags.push("leitner".to_string());
        store.save_cards("Deck", &[card.clone()]).unwrap();

        let second = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::ok(serde_json::json!(["Deck"])),
            ScriptedTransport::ok(serde_json::json!({})),
        ]));
        let client = RpcClient::with_transport(second.clone());
        let log = exporter(&mut harness, &client, &store)
            .run("Deck")
            .await
            .unwrap();

        assert_eq!(log.succeeded, 1);
        let requests = second.requests.lock().unwrap();
        assert_eq!(requests[1]["action"], "updateNote");
        assert_eq!(
            requests[1]["params"]["note"]["tags"],
            serde_json::json!(["leitner"])
        );
        let mapping = harness.registry.find_by_local_id(&card.id).unwrap();
        assert_eq!(mapping.content_hash, card.content_hash());
    }

    #[tokio::test]
    async fn cancellation_stops_between_records() {
        let mut harness = Harness::new();
        let store = seeded_store("Deck", 5);
        harness.cancel.cancel();

        let transport = Arc::new(ScriptedTransport::new(vec![ScriptedTransport::ok(
            serde_json::json!(["Deck"]),
        )]));
        let client = RpcClient::with_transport(transport);
        let log = exporter(&mut harness, &client, &store)
            .run("Deck")
            .await
            .unwrap();

        assert_eq!(log.succeeded, 0);
        assert!(log.warnings.iter().any(|warning| warning.contains("cancelled")));
        assert!(harness.registry.is_empty());
    }

    /// Store that fails on the nth `save_cards` call, then recovers
    struct FlakyStore {
        inner: MemoryStore,
        saves: Cell<usize>,
        fail_on: usize,
    }

    impl CardStore for FlakyStore {
        fn all_cards(&self, scope: &str) -> crate::error::Result<Vec<Card>> {
            self.inner.all_cards(scope)
        }

        fn save_cards(&mut self, scope: &str, cards: &[Card]) -> crate::error::Result<()> {
            let call = self.saves.get() + 1;
            self.saves.set(call);
            if call == self.fail_on {
                return Err(Error::Store("disk full".to_string()));
            }
            self.inner.save_cards(scope, cards)
        }

        fn schema(&self, id: &str) -> crate::error::Result<Option<CardSchema>> {
            self.inner.schema(id)
        }

        fn save_schema(&mut self, schema: &CardSchema) -> crate::error::Result<()> {
            self.inner.save_schema(schema)
        }

        fn scopes(&self) -> crate::error::Result<Vec<String>> {
            self.inner.scopes()
        }
    }

    fn remote_note(note_id: i64, front: &str) -> serde_json::Value {
        serde_json::json!({
            "noteId": note_id,
            "modelName": "Basic",
            "tags": [],
            "fields": {
                "Front": { "value": front, "order": 0 },
                "Back": { "value": "answer", "order": 1 }
            },
            "mod": 1_700_000_000
        })
    }

    #[tokio::test]
    async fn failed_import_restores_pre_import_state() {
        let mut harness = Harness::new();
        let mut store = FlakyStore {
            inner: seeded_store("Deck", 1),
            saves: Cell::new(0),
            // pre-import state has one card; saves 1..=3 import notes,
            // save 4 blows up, save 5 is the restore
            fail_on: 4,
        };
        let pre_import = store.all_cards("Deck").unwrap();

        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::ok(serde_json::json!([1, 2, 3, 4])),
            ScriptedTransport::ok(serde_json::json!([
                remote_note(1, "uno"),
                remote_note(2, "dos"),
                remote_note(3, "tres"),
                remote_note(4, "cuatro"),
            ])),
            ScriptedTransport::ok(serde_json::json!(["Front", "Back"])),
            ScriptedTransport::ok(serde_json::json!({
                "Card 1": { "Front": "{{Front}}", "Back": "{{Back}}" }
            })),
        ]));
        let client = RpcClient::with_transport(transport);

        let mut importer = BatchImporter {
            client: &client,
            config: &harness.config,
            registry: &mut harness.registry,
            tracker: &mut harness.tracker,
            store: &mut store,
            backups: &harness.backups,
            media_root: &harness.media_root,
            cancel: &harness.cancel,
        };
        let error = importer.run("Deck").await.unwrap_err();

        assert!(matches!(error, Error::Store(_)));
        assert_eq!(store.all_cards("Deck").unwrap(), pre_import);
    }

    #[tokio::test]
    async fn import_creates_cards_and_takes_backup() {
        let mut harness = Harness::new();
        let mut store = seeded_store("Deck", 0);

        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::ok(serde_json::json!([1, 2])),
            ScriptedTransport::ok(serde_json::json!([
                remote_note(1, "uno"),
                remote_note(2, "dos"),
            ])),
            ScriptedTransport::ok(serde_json::json!(["Front", "Back"])),
            ScriptedTransport::ok(serde_json::json!({
                "Card 1": { "Front": "{{Front}}", "Back": "{{Back}}" }
            })),
        ]));
        let client = RpcClient::with_transport(transport);

        let mut importer = BatchImporter {
            client: &client,
            config: &harness.config,
            registry: &mut harness.registry,
            tracker: &mut harness.tracker,
            store: &mut store,
            backups: &harness.backups,
            media_root: &harness.media_root,
            cancel: &harness.cancel,
        };
        let log = importer.run("Deck").await.unwrap();

        assert_eq!(log.succeeded, 2);
        assert_eq!(log.failed, 0);
        assert_eq!(store.card_count(), 2);
        assert_eq!(harness.registry.len(), 2);
        let cards = store.all_cards("Deck").unwrap();
        assert!(cards.iter().any(|card| card.fields["Front"] == "uno"));

        // a backup of the (empty) pre-import state was taken first
        assert_eq!(harness.backups.list_backups().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn pulled_sound_marker_is_localized() {
        let mut harness = Harness::new();
        let mut store = seeded_store("Deck", 0);

        let audio = base64::Engine::encode(
            &base64::engine::general_purpose::STANDARD,
            b"audio bytes",
        );
        let transport = Arc::new(ScriptedTransport::new(vec![
            ScriptedTransport::ok(serde_json::json!([1])),
            ScriptedTransport::ok(serde_json::json!([{
                "noteId": 1,
                "modelName": "Basic",
                "tags": [],
                "fields": {
                    "Front": { "value": "[sound:clip.mp3]", "order": 0 },
                    "Back": { "value": "answer", "order": 1 }
                },
                "mod": 1_700_000_000
            }])),
            ScriptedTransport::ok(serde_json::json!(["Front", "Back"])),
            ScriptedTransport::ok(serde_json::json!({
                "Card 1": { "Front": "{{Front}}", "Back": "{{Back}}" }
            })),
            ScriptedTransport::ok(serde_json::json!(audio)),
        ]));
        let client = RpcClient::with_transport(transport);

        let mut importer = BatchImporter {
            client: &client,
            config: &harness.config,
            registry: &mut harness.registry,
            tracker: &mut harness.tracker,
            store: &mut store,
            backups: &harness.backups,
            media_root: &harness.media_root,
            cancel: &harness.cancel,
        };
        let log = importer.run("Deck").await.unwrap();

        assert_eq!(log.succeeded, 1);
        let cards = store.all_cards("Deck").unwrap();
        assert_eq!(cards[0].fields["Front"], "![[clip.mp3]]");
        assert_eq!(
            std::fs::read(harness.media_root.join("clip.mp3")).unwrap(),
            b"audio bytes"
        );
    }
}
