//! Media records and their on-disk JSON form.

use super::Tag;
use crate::error::{Result, VaultError};
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Relation name used for perceptual-similarity edges.
pub const SIMILAR_RELATION: &str = "similar";

/// Aspect ratio written for crops that were not constrained to one.
pub const DEFAULT_ASPECT_RATIO: &str = "auto";

/// Fieldless discriminant of [`MediaKind`], as stored in the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Image,
    Mask,
    VideoFrame,
    Crop,
}

impl RecordKind {
    pub const ALL: [RecordKind; 4] = [
        RecordKind::Image,
        RecordKind::Mask,
        RecordKind::VideoFrame,
        RecordKind::Crop,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RecordKind::Image => "image",
            RecordKind::Mask => "mask",
            RecordKind::VideoFrame => "video_frame",
            RecordKind::Crop => "crop",
        }
    }

    /// Parse a stored discriminant. Unknown values are treated as images.
    pub fn parse_lenient(s: &str) -> Self {
        match s {
            "mask" => RecordKind::Mask,
            "video_frame" => RecordKind::VideoFrame,
            "crop" => RecordKind::Crop,
            _ => RecordKind::Image,
        }
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Variant-specific payload of a record.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum MediaKind {
    #[default]
    Image,
    Mask {
        source_image: String,
        mask_category: String,
    },
    VideoFrame {
        source_video: String,
        frame_index: u64,
        timestamp: f64,
    },
    /// A rectangle cut from `parent_image`; `crop_rect` is x, y, width, height
    /// in parent pixels.
    Crop {
        parent_image: String,
        crop_rect: [i64; 4],
        aspect_ratio: String,
        created_at: String,
    },
}

impl MediaKind {
    pub fn record_kind(&self) -> RecordKind {
        match self {
            MediaKind::Image => RecordKind::Image,
            MediaKind::Mask { .. } => RecordKind::Mask,
            MediaKind::VideoFrame { .. } => RecordKind::VideoFrame,
            MediaKind::Crop { .. } => RecordKind::Crop,
        }
    }
}

/// The persisted unit of the library.
///
/// The hash is the file stem of `images/{hash}.json` and is never written
/// into the file itself. `created`/`modified` are only tracked by the index.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaRecord {
    pub hash: String,
    pub kind: MediaKind,
    pub name: String,
    pub caption: String,
    /// Ordered; duplicates are kept as written.
    pub tags: Vec<Tag>,
    pub related: IndexMap<String, Vec<String>>,
    pub metadata: Map<String, Value>,
    /// Top-level file keys this crate does not model, written back unchanged.
    pub extra: Map<String, Value>,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl MediaRecord {
    /// A new image record for `hash`.
    pub fn image(hash: impl Into<String>) -> Self {
        Self {
            hash: hash.into(),
            ..Default::default()
        }
    }

    /// A new mask record derived from `source_image`.
    pub fn mask(
        hash: impl Into<String>,
        source_image: impl Into<String>,
        mask_category: impl Into<String>,
    ) -> Self {
        Self {
            hash: hash.into(),
            kind: MediaKind::Mask {
                source_image: source_image.into(),
                mask_category: mask_category.into(),
            },
            ..Default::default()
        }
    }

    /// A new frame record extracted from `source_video`.
    pub fn video_frame(
        hash: impl Into<String>,
        source_video: impl Into<String>,
        frame_index: u64,
        timestamp: f64,
    ) -> Self {
        Self {
            hash: hash.into(),
            kind: MediaKind::VideoFrame {
                source_video: source_video.into(),
                frame_index,
                timestamp,
            },
            ..Default::default()
        }
    }

    /// A new crop record cut from `parent_image`.
    pub fn crop(
        hash: impl Into<String>,
        parent_image: impl Into<String>,
        crop_rect: [i64; 4],
    ) -> Self {
        Self {
            hash: hash.into(),
            kind: MediaKind::Crop {
                parent_image: parent_image.into(),
                crop_rect,
                aspect_ratio: DEFAULT_ASPECT_RATIO.to_string(),
                created_at: Utc::now().to_rfc3339(),
            },
            ..Default::default()
        }
    }

    pub fn record_kind(&self) -> RecordKind {
        self.kind.record_kind()
    }

    pub fn add_tag(&mut self, category: impl Into<String>, value: impl Into<String>) {
        self.tags.push(Tag::new(category, value));
    }

    /// Remove the first tag equal to `tag`. Returns whether one was removed.
    pub fn remove_tag(&mut self, tag: &Tag) -> bool {
        match self.tags.iter().position(|t| t == tag) {
            Some(idx) => {
                self.tags.remove(idx);
                true
            }
            None => false,
        }
    }

    pub fn tags_by_category(&self, category: &str) -> Vec<&Tag> {
        self.tags.iter().filter(|t| t.category == category).collect()
    }

    /// Tags rendered as `category:value`, in record order.
    pub fn tag_strings(&self) -> Vec<String> {
        self.tags.iter().map(Tag::to_string).collect()
    }

    /// Add a directed edge. Adding an edge that already exists does nothing.
    pub fn add_related(&mut self, relation: impl Into<String>, hash: impl Into<String>) {
        let hash = hash.into();
        let targets = self.related.entry(relation.into()).or_default();
        if !targets.contains(&hash) {
            targets.push(hash);
        }
    }

    /// Remove an edge; the relation itself is dropped once it has no targets.
    pub fn remove_related(&mut self, relation: &str, hash: &str) -> bool {
        let Some(targets) = self.related.get_mut(relation) else {
            return false;
        };
        let before = targets.len();
        targets.retain(|h| h != hash);
        let removed = targets.len() != before;
        if targets.is_empty() {
            self.related.shift_remove(relation);
        }
        removed
    }

    pub fn related(&self, relation: &str) -> &[String] {
        self.related
            .get(relation)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn has_related(&self, relation: &str) -> bool {
        !self.related(relation).is_empty()
    }

    /// First `name:` tag value, else the name field, else "Unnamed".
    pub fn display_name(&self) -> &str {
        if let Some(tag) = self.tags.iter().find(|t| t.category == "name") {
            return &tag.value;
        }
        if !self.name.is_empty() {
            return &self.name;
        }
        "Unnamed"
    }

    /// The record this one was derived from, for masks, video frames and crops.
    pub fn source_media(&self) -> Option<&str> {
        let source = match &self.kind {
            MediaKind::Image => return None,
            MediaKind::Mask { source_image, .. } => source_image,
            MediaKind::VideoFrame { source_video, .. } => source_video,
            MediaKind::Crop { parent_image, .. } => parent_image,
        };
        (!source.is_empty()).then_some(source.as_str())
    }

    /// The JSON file form of this record.
    pub fn to_file(&self) -> RecordFile {
        let mut file = RecordFile {
            name: self.name.clone(),
            caption: self.caption.clone(),
            tags: self.tags.clone(),
            related: self.related.clone(),
            metadata: self.metadata.clone(),
            extra: self.extra.clone(),
            ..Default::default()
        };
        match &self.kind {
            MediaKind::Image => {
                // An unrecognised `type` read from disk goes back where it was.
                if let Some(Value::String(kind)) = file.extra.shift_remove("type") {
                    file.kind = Some(kind);
                }
            }
            MediaKind::Mask {
                source_image,
                mask_category,
            } => {
                file.kind = Some(RecordKind::Mask.as_str().to_string());
                file.source_image = Some(source_image.clone());
                file.mask_category = Some(mask_category.clone());
            }
            MediaKind::VideoFrame {
                source_video,
                frame_index,
                timestamp,
            } => {
                file.kind = Some(RecordKind::VideoFrame.as_str().to_string());
                file.source_video = Some(source_video.clone());
                file.frame_index = Some(*frame_index);
                file.timestamp = Some(*timestamp);
            }
            MediaKind::Crop {
                parent_image,
                crop_rect,
                aspect_ratio,
                created_at,
            } => {
                file.kind = Some(RecordKind::Crop.as_str().to_string());
                file.parent_image = Some(parent_image.clone());
                file.crop_rect = Some(*crop_rect);
                file.aspect_ratio = Some(aspect_ratio.clone());
                file.created_at = Some(created_at.clone());
            }
        }
        if self.record_kind() != RecordKind::Image {
            file.extra.shift_remove("type");
        }
        file
    }

    /// Build a record from its file form. Legacy `similar_images` lists are
    /// folded into the `similar` relation when that relation is empty.
    pub fn from_file(hash: impl Into<String>, file: RecordFile) -> Self {
        let RecordFile {
            kind,
            source_image,
            mask_category,
            source_video,
            frame_index,
            timestamp,
            parent_image,
            crop_rect,
            aspect_ratio,
            created_at,
            name,
            caption,
            tags,
            mut related,
            metadata,
            similar_images,
            mut extra,
        } = file;

        let kind_name = kind.unwrap_or_default();
        let kind = match RecordKind::parse_lenient(&kind_name) {
            RecordKind::Image => {
                if !kind_name.is_empty() && kind_name != RecordKind::Image.as_str() {
                    extra.insert("type".to_string(), Value::String(kind_name));
                }
                MediaKind::Image
            }
            RecordKind::Mask => MediaKind::Mask {
                source_image: source_image.unwrap_or_default(),
                mask_category: mask_category.unwrap_or_default(),
            },
            RecordKind::VideoFrame => MediaKind::VideoFrame {
                source_video: source_video.unwrap_or_default(),
                frame_index: frame_index.unwrap_or_default(),
                timestamp: timestamp.unwrap_or_default(),
            },
            RecordKind::Crop => MediaKind::Crop {
                parent_image: parent_image.unwrap_or_default(),
                crop_rect: crop_rect.unwrap_or_default(),
                aspect_ratio: aspect_ratio.unwrap_or_else(|| DEFAULT_ASPECT_RATIO.to_string()),
                created_at: created_at.unwrap_or_default(),
            },
        };

        if let Some(legacy) = similar_images {
            let has_similar = related
                .get(SIMILAR_RELATION)
                .is_some_and(|targets| !targets.is_empty());
            if !has_similar && !legacy.is_empty() {
                let migrated: Vec<String> = legacy
                    .iter()
                    .filter_map(|item| match item {
                        Value::Array(pair) => pair.first().and_then(Value::as_str),
                        Value::String(s) => Some(s.as_str()),
                        _ => None,
                    })
                    .map(str::to_string)
                    .collect();
                related.insert(SIMILAR_RELATION.to_string(), migrated);
            }
        }

        Self {
            hash: hash.into(),
            kind,
            name,
            caption,
            tags,
            related,
            metadata,
            extra,
            created: None,
            modified: None,
        }
    }
}

/// On-disk shape of `images/{hash}.json`.
///
/// Field order is the key order written for each kind; variant fields that
/// do not apply are skipped, so an image writes `name, caption, tags,
/// related` and nothing else unless it has metadata. Keys not listed here
/// are collected into `extra` and written after everything else.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecordFile {
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mask_category: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_video: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub frame_index: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub crop_rect: Option<[i64; 4]>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aspect_ratio: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub caption: String,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub related: IndexMap<String, Vec<String>>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub metadata: Map<String, Value>,
    /// Pre-`related` similarity list: `[[hash, distance], ...]`. Read only.
    #[serde(default, skip_serializing)]
    pub similar_images: Option<Vec<Value>>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Reject hashes that could escape the images directory.
pub fn validate_hash(hash: &str) -> Result<()> {
    let reason = if hash.is_empty() {
        "hash is empty"
    } else if hash.starts_with('.') {
        "hash starts with '.'"
    } else if hash.contains(['/', '\\']) {
        "hash contains a path separator"
    } else {
        return Ok(());
    };
    Err(VaultError::InvalidHash {
        hash: hash.to_string(),
        reason: reason.to_string(),
    })
}
