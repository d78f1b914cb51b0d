//! Media transfer service.
//!
//! Extracts media references from note markup, pushes small files to the
//! peer's media store as base64, and rewrites large files into deep-link
//! backlinks instead of transferring their bytes. Missing files become
//! per-item warnings, never failures.

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use regex::Regex;
use tracing::debug;

use crate::config::SyncConfig;
use crate::error::{Error, Result};
use crate::pipeline::deep_link;
use crate::rpc::RpcClient;
use crate::util::sha256_hex;

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "gif", "webp", "svg", "bmp"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "wav", "ogg", "m4a", "flac", "opus"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "webm", "mov", "mkv"];

/// Media kind classified by file extension
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    Image,
    Audio,
    Video,
}

/// Which source syntax a reference was written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaSyntax {
    /// `![[file.png]]`
    WikiEmbed,
    /// `![alt](file.png)`
    Markdown,
    /// `<img src="file.png">`
    HtmlTag,
    /// `[sound:file.mp3]`, the peer's audio/video marker
    SoundMarker,
}

/// One media reference found in content
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaRef {
    /// The full matched text, replaced during rewriting
    pub raw: String,
    /// Referenced path as written, before resolution
    pub path: String,
    /// Display/alt text when the syntax carries one
    pub alt: Option<String>,
    pub syntax: MediaSyntax,
}

impl MediaRef {
    /// Kind by extension, `None` for unrecognized extensions
    #[must_use]
    pub fn kind(&self) -> Option<MediaKind> {
        classify(&self.path)
    }

    /// File name portion of the referenced path
    #[must_use]
    pub fn file_name(&self) -> &str {
        self.path.rsplit('/').next().unwrap_or(&self.path)
    }
}

/// Classify a path as image/audio/video by its extension
#[must_use]
pub fn classify(path: &str) -> Option<MediaKind> {
    let extension = path.rsplit('.').next()?.to_lowercase();
    if IMAGE_EXTENSIONS.contains(&extension.as_str()) {
        Some(MediaKind::Image)
    } else if AUDIO_EXTENSIONS.contains(&extension.as_str()) {
        Some(MediaKind::Audio)
    } else if VIDEO_EXTENSIONS.contains(&extension.as_str()) {
        Some(MediaKind::Video)
    } else {
        None
    }
}

fn wiki_embed_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[\[([^\[\]|]+)(?:\|([^\[\]]+))?\]\]").expect("Invalid regex"))
}

fn markdown_image_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"!\[([^\]]*)\]\(([^)\s]+)\)").expect("Invalid regex"))
}

fn html_tag_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r#"<(?:img|audio|video|source)[^>]*\bsrc\s*=\s*"([^"]+)"[^>]*>"#)
            .expect("Invalid regex")
    })
}

fn sound_marker_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\[sound:([^\[\]]+)\]").expect("Invalid regex"))
}

/// Extract the peer's `[sound:...]` markers from pulled note content
#[must_use]
pub fn extract_sound_refs(content: &str) -> Vec<MediaRef> {
    sound_marker_regex()
        .captures_iter(content)
        .map(|caps| MediaRef {
            raw: caps[0].to_string(),
            path: caps[1].trim().to_string(),
            alt: None,
            syntax: MediaSyntax::SoundMarker,
        })
        .collect()
}

/// Extract all media references across the three source syntaxes
#[must_use]
pub fn extract_media_refs(content: &str) -> Vec<MediaRef> {
    let mut refs = Vec::new();

    for caps in wiki_embed_regex().captures_iter(content) {
        refs.push(MediaRef {
            raw: caps[0].to_string(),
            path: caps[1].trim().to_string(),
            alt: caps.get(2).map(|alias| alias.as_str().trim().to_string()),
            syntax: MediaSyntax::WikiEmbed,
        });
    }
    for caps in markdown_image_regex().captures_iter(content) {
        let alt = caps[1].trim();
        refs.push(MediaRef {
            raw: caps[0].to_string(),
            path: caps[2].to_string(),
            alt: (!alt.is_empty()).then(|| alt.to_string()),
            syntax: MediaSyntax::Markdown,
        });
    }
    for caps in html_tag_regex().captures_iter(content) {
        refs.push(MediaRef {
            raw: caps[0].to_string(),
            path: caps[1].to_string(),
            alt: None,
            syntax: MediaSyntax::HtmlTag,
        });
    }
    refs
}

/// How one reference was handled
#[derive(Debug, Clone, PartialEq, Eq)]
enum Handling {
    /// Bytes pushed to the peer; carries the file's content hash
    Uploaded(String),
    Backlinked,
}

/// Result of the media pass over one record's content
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MediaOutcome {
    pub content: String,
    pub warnings: Vec<String>,
    pub uploaded: usize,
    pub backlinked: usize,
    /// Hash over the transferred media set, `None` when nothing was uploaded
    pub media_hash: Option<String>,
}

/// Uploads or backlinks the media referenced by record content
pub struct MediaTransfer<'a> {
    client: &'a RpcClient,
    config: &'a SyncConfig,
    media_root: &'a Path,
}

impl<'a> MediaTransfer<'a> {
    pub const fn new(client: &'a RpcClient, config: &'a SyncConfig, media_root: &'a Path) -> Self {
        Self {
            client,
            config,
            media_root,
        }
    }

    /// Process all media references in one record's content.
    ///
    /// Small files are base64-uploaded and rewritten to the peer's native
    /// media syntax; files at or above the size threshold become deep-link
    /// backlinks with no byte transfer. Missing files produce warnings and
    /// the reference stays as written.
    pub async fn process(&self, content: &str, source_path: Option<&str>) -> Result<MediaOutcome> {
        let mut outcome = MediaOutcome {
            content: content.to_string(),
            ..MediaOutcome::default()
        };
        let mut uploaded_hashes: Vec<String> = Vec::new();

        for media_ref in extract_media_refs(content) {
            let Some(kind) = media_ref.kind() else {
                continue;
            };
            let resolved = self.resolve(&media_ref.path);
            let Some(resolved) = resolved else {
                outcome
                    .warnings
                    .push(format!("media file not found: {}", media_ref.path));
                continue;
            };

            let handling = self
                .transfer_one(&media_ref, kind, &resolved, source_path, &mut outcome)
                .await;
            match handling {
                Ok(Handling::Uploaded(hash)) => uploaded_hashes.push(hash),
                Ok(Handling::Backlinked) => {}
                Err(error) => {
                    // Per-reference isolation: one bad file never fails the
                    // record.
                    outcome
                        .warnings
                        .push(format!("media transfer failed for {}: {error}", media_ref.path));
                }
            }
        }

        if !uploaded_hashes.is_empty() {
            uploaded_hashes.sort_unstable();
            outcome.media_hash = Some(sha256_hex(uploaded_hashes.join("\u{1e}").as_bytes()));
        }
        Ok(outcome)
    }

    /// Pull one remote media file into the local media root.
    ///
    /// Returns the written path, or `None` when the peer lacks the file.
    pub async fn retrieve(&self, filename: &str) -> Result<Option<PathBuf>> {
        // Peer-supplied names reduce to the bare file name; the write never
        // leaves the media root.
        let name = Path::new(filename)
            .file_name()
            .ok_or_else(|| Error::Protocol(format!("unusable media filename: {filename}")))?;
        let Some(data_b64) = self.client.retrieve_media_file(filename).await? else {
            return Ok(None);
        };
        let bytes = BASE64
            .decode(data_b64.as_bytes())
            .map_err(|error| Error::Protocol(format!("invalid media payload: {error}")))?;
        let target = self.media_root.join(name);
        std::fs::create_dir_all(self.media_root)?;
        std::fs::write(&target, bytes)?;
        Ok(Some(target))
    }

    async fn transfer_one(
        &self,
        media_ref: &MediaRef,
        kind: MediaKind,
        resolved: &Path,
        source_path: Option<&str>,
        outcome: &mut MediaOutcome,
    ) -> Result<Handling> {
        let size = std::fs::metadata(resolved)?.len();

        if size >= self.config.media_size_threshold {
            let target = source_path.unwrap_or(&media_ref.path);
            let replacement = format!(
                "<a href=\"{}\">{}</a>",
                deep_link(&self.config.vault_name, target),
                media_ref.alt.as_deref().unwrap_or_else(|| media_ref.file_name())
            );
            debug!(path = %media_ref.path, size, "large media becomes backlink");
            outcome.content = outcome.content.replacen(&media_ref.raw, &replacement, 1);
            outcome.backlinked += 1;
            return Ok(Handling::Backlinked);
        }

        let bytes = std::fs::read(resolved)?;
        let filename = media_ref.file_name().to_string();
        self.client
            .store_media_file(&filename, &BASE64.encode(&bytes))
            .await?;

        let replacement = match kind {
            MediaKind::Image => format!("<img src=\"{filename}\">"),
            // The peer plays audio and video through the same sound marker.
            MediaKind::Audio | MediaKind::Video => format!("[sound:{filename}]"),
        };
        outcome.content = outcome.content.replacen(&media_ref.raw, &replacement, 1);
        outcome.uploaded += 1;
        Ok(Handling::Uploaded(sha256_hex(&bytes)))
    }

    fn resolve(&self, path: &str) -> Option<PathBuf> {
        // References stay inside the media root; absolute paths and any
        // parent-directory component are treated as not found.
        let relative = Path::new(path);
        let contained = !relative.is_absolute()
            && relative
                .components()
                .all(|component| matches!(component, Component::Normal(_) | Component::CurDir));
        if !contained {
            debug!(path, "media reference leaves the vault; ignored");
            return None;
        }
        let candidate = self.media_root.join(relative);
        candidate.is_file().then_some(candidate)
    }
}
