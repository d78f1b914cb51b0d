//! Template/schema conversion.
//!
//! Maps local card schemas to remote note types and back. Field display
//! roles are inferred from known name aliases and from which template
//! side(s) reference the field; undetermined fields fall back to "both".
//! Mappings are persisted through the registry so repeated imports of the
//! same remote note type reuse, rather than duplicate, the local schema.

use std::collections::BTreeMap;

use tracing::{debug, info};

use crate::error::Result;
use crate::models::{CardSchema, FieldRole, TemplateMapping};
use crate::registry::MappingRegistry;
use crate::rpc::{CreateModelRequest, CreateModelTemplate, RpcClient};

/// Bookkeeping fields appended to synthesized remote note types, used to
/// correlate records across future syncs.
pub const BOOKKEEPING_FIELDS: [&str; 2] = ["MnemoId", "MnemoHash"];

const FRONT_ALIASES: &[&str] = &["front", "question", "prompt", "term", "expression", "q"];
const BACK_ALIASES: &[&str] = &["back", "answer", "definition", "meaning", "response", "a"];
const CUSTOM_ALIASES: &[&str] = &["tags", "tag", "extra", "note", "source", "comment"];

/// Infer one field's display role.
///
/// Order of evidence: bookkeeping names, known aliases, then which
/// template side(s) reference the field as `{{Name}}`.
#[must_use]
pub fn infer_field_role(name: &str, front_template: &str, back_template: &str) -> FieldRole {
    if BOOKKEEPING_FIELDS.contains(&name) {
        return FieldRole::Custom;
    }

    let lowered = name.to_lowercase();
    if FRONT_ALIASES.contains(&lowered.as_str()) {
        return FieldRole::Front;
    }
    if BACK_ALIASES.contains(&lowered.as_str()) {
        return FieldRole::Back;
    }
    if CUSTOM_ALIASES.contains(&lowered.as_str()) {
        return FieldRole::Custom;
    }

    let marker = format!("{{{{{name}}}}}");
    let on_front = front_template.contains(&marker);
    let on_back = back_template.contains(&marker);
    match (on_front, on_back) {
        (true, false) => FieldRole::Front,
        (false, true) => FieldRole::Back,
        // Referenced on both sides, or on neither: both-sides neutral role.
        _ => FieldRole::Both,
    }
}

/// Import a remote note type as a local schema mirror.
///
/// Reuses the persisted mapping when this note type was imported before;
/// otherwise introspects fields and templates, infers roles, and records a
/// new mapping.
pub async fn import_remote_model(
    client: &RpcClient,
    registry: &mut MappingRegistry,
    model_name: &str,
) -> Result<CardSchema> {
    if let Some(existing) = registry.template_for_remote(model_name) {
        debug!(model = model_name, "reusing existing template mapping");
        let schema_id = existing.local_schema_id.clone();
        return build_local_mirror(client, &schema_id, model_name).await;
    }

    let schema_id = local_schema_id(model_name);
    let schema = build_local_mirror(client, &schema_id, model_name).await?;

    let mut field_roles = BTreeMap::new();
    for field in &schema.fields {
        field_roles.insert(
            field.clone(),
            infer_field_role(field, &schema.front_template, &schema.back_template),
        );
    }
    registry.record_template(TemplateMapping {
        local_schema_id: schema_id,
        remote_model: model_name.to_string(),
        field_roles,
        sync_capable: false,
    })?;
    info!(model = model_name, "imported remote note type");
    Ok(schema)
}

/// Ensure a remote note type exists for a local schema, creating one when
/// no mapping exists. Returns the remote model name to address notes with.
///
/// A synthesized note type carries the schema's fields in deterministic
/// order plus the two bookkeeping fields.
pub async fn export_local_schema(
    client: &RpcClient,
    registry: &mut MappingRegistry,
    schema: &CardSchema,
) -> Result<String> {
    if let Some(existing) = registry.template_for(&schema.id) {
        return Ok(existing.remote_model.clone());
    }

    let model_name = format!("Mnemo::{}", schema.name);
    let mut in_order_fields = schema.fields.clone();
    for bookkeeping in BOOKKEEPING_FIELDS {
        in_order_fields.push(bookkeeping.to_string());
    }

    let request = CreateModelRequest {
        model_name: model_name.clone(),
        in_order_fields: in_order_fields.clone(),
        card_templates: vec![CreateModelTemplate {
            name: "Card 1".to_string(),
            front: schema.front_template.clone(),
            back: schema.back_template.clone(),
        }],
    };
    client.create_model(&request).await?;

    let mut field_roles = BTreeMap::new();
    for field in &in_order_fields {
        field_roles.insert(
            field.clone(),
            infer_field_role(field, &schema.front_template, &schema.back_template),
        );
    }
    registry.record_template(TemplateMapping {
        local_schema_id: schema.id.clone(),
        remote_model: model_name.clone(),
        field_roles,
        sync_capable: false,
    })?;
    info!(model = %model_name, schema = %schema.id, "created remote note type");
    Ok(model_name)
}

async fn build_local_mirror(
    client: &RpcClient,
    schema_id: &str,
    model_name: &str,
) -> Result<CardSchema> {
    let fields = client.model_field_names(model_name).await?;
    let templates = client.model_templates(model_name).await?;
    // The first template pair stands in for the schema's front/back markup.
    let (front_template, back_template) = templates
        .into_iter()
        .next()
        .map_or_else(|| (String::new(), String::new()), |(_, sides)| (sides.front, sides.back));

    Ok(CardSchema {
        id: schema_id.to_string(),
        name: model_name.to_string(),
        fields,
        front_template,
        back_template,
    })
}

fn local_schema_id(model_name: &str) -> String {
    let mut id = String::with_capacity(model_name.len());
    for ch in model_name.chars() {
        if ch.is_ascii_alphanumeric() {
            id.extend(ch.to_lowercase());
        } else if !id.ends_with('-') && !id.is_empty() {
            id.push('-');
        }
    }
    id.trim_end_matches('-').to_string()
}
