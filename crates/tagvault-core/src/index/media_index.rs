//! SQLite index over media records, tags, relationships and cached
//! perceptual hashes.

use crate::config::IndexConfig;
use crate::error::{Result, VaultError};
use crate::model::{MediaKind, MediaRecord, RecordKind, Tag, SIMILAR_RELATION};
use crate::store::RecordStore;
use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Keys of the `variant_json` column.
const MASK_CATEGORY_KEY: &str = "mask_category";
const FRAME_INDEX_KEY: &str = "frame_index";
const TIMESTAMP_KEY: &str = "timestamp";
const CROP_RECT_KEY: &str = "crop_rect";
const ASPECT_RATIO_KEY: &str = "aspect_ratio";
const CREATED_AT_KEY: &str = "created_at";

/// Outcome of re-projecting the filesystem tier into a fresh index.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RebuildReport {
    /// Record files found on disk.
    pub scanned: usize,
    /// Records written to the index.
    pub indexed: usize,
    /// Hashes whose record file was missing or malformed by the time it was read.
    pub unreadable: Vec<String>,
    /// Hashes whose index write failed.
    pub failed: Vec<String>,
    pub duration_ms: u128,
}

/// SQLite index of the library.
///
/// One connection, held for the lifetime of the library session.
pub struct IndexStore {
    db_path: PathBuf,
    conn: Connection,
}

impl IndexStore {
    /// Create or open the index at `db_path`.
    pub fn open(db_path: impl Into<PathBuf>) -> Result<Self> {
        let db_path = db_path.into();

        if let Some(parent) = db_path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| VaultError::Io {
                    message: format!("Failed to create directory {}", parent.display()),
                    path: Some(parent.to_path_buf()),
                    source: Some(e),
                })?;
            }
        }

        let conn = Connection::open(&db_path)?;
        Self::configure_connection(&conn)?;
        Self::ensure_schema(&conn)?;

        debug!("Opened index at {}", db_path.display());
        Ok(Self { db_path, conn })
    }

    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.busy_timeout(IndexConfig::BUSY_TIMEOUT)?;
        conn.execute_batch(
            "
            PRAGMA journal_mode=WAL;
            PRAGMA synchronous=NORMAL;
            PRAGMA foreign_keys=ON;
            PRAGMA temp_store=MEMORY;
            ",
        )?;
        Ok(())
    }

    fn ensure_schema(conn: &Connection) -> Result<()> {
        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
        if version > IndexConfig::SCHEMA_VERSION {
            return Err(VaultError::Database {
                message: format!(
                    "Index schema version {} is newer than supported version {}",
                    version,
                    IndexConfig::SCHEMA_VERSION
                ),
                source: None,
            });
        }
        if version > 0 && version < IndexConfig::SCHEMA_VERSION {
            // The index holds nothing that is not in the record files.
            info!(
                "Index schema version {} is outdated; recreating tables",
                version
            );
            Self::drop_tables(conn)?;
        }

        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS media (
                hash TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                source_media TEXT,
                name TEXT NOT NULL DEFAULT '',
                caption TEXT NOT NULL DEFAULT '',
                created TEXT NOT NULL,
                modified TEXT NOT NULL,
                metadata_json TEXT NOT NULL DEFAULT '{}',
                variant_json TEXT NOT NULL DEFAULT '{}',
                extra_json TEXT NOT NULL DEFAULT '{}'
            );

            CREATE TABLE IF NOT EXISTS tags (
                media_hash TEXT NOT NULL REFERENCES media(hash) ON DELETE CASCADE,
                category TEXT NOT NULL,
                value TEXT NOT NULL,
                position INTEGER NOT NULL
            );

            CREATE TABLE IF NOT EXISTS relationships (
                from_hash TEXT NOT NULL REFERENCES media(hash) ON DELETE CASCADE,
                to_hash TEXT NOT NULL,
                type TEXT NOT NULL,
                strength REAL,
                PRIMARY KEY (from_hash, to_hash, type)
            );

            CREATE TABLE IF NOT EXISTS perceptual_hashes (
                media_hash TEXT NOT NULL,
                algorithm TEXT NOT NULL,
                hash_value TEXT NOT NULL,
                computed TEXT NOT NULL,
                PRIMARY KEY (media_hash, algorithm)
            );

            CREATE INDEX IF NOT EXISTS idx_media_kind ON media(kind);
            CREATE INDEX IF NOT EXISTS idx_media_created ON media(created);
            CREATE INDEX IF NOT EXISTS idx_tags_media ON tags(media_hash, position);
            CREATE INDEX IF NOT EXISTS idx_tags_lookup ON tags(category COLLATE NOCASE, value COLLATE NOCASE);
            CREATE INDEX IF NOT EXISTS idx_rel_type ON relationships(from_hash, type);
            ",
        )?;

        conn.pragma_update(None, "user_version", IndexConfig::SCHEMA_VERSION)?;
        Ok(())
    }

    fn drop_tables(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "
            DROP TABLE IF EXISTS tags;
            DROP TABLE IF EXISTS relationships;
            DROP TABLE IF EXISTS perceptual_hashes;
            DROP TABLE IF EXISTS media;
            ",
        )?;
        Ok(())
    }

    /// Get the database path.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    // ========================================
    // Record projection
    // ========================================

    /// Replace the projection of `record`.
    ///
    /// The media row keeps its original `created` time. Tags and outgoing
    /// relationships are deleted and re-inserted in record order; scores of
    /// `similar` edges that survive the update are carried over.
    pub fn upsert(&mut self, hash: &str, record: &MediaRecord) -> bool {
        match self.try_upsert(hash, record) {
            Ok(()) => {
                debug!("Indexed {}", hash);
                true
            }
            Err(e) => {
                warn!("Failed to index {}: {}", hash, e);
                false
            }
        }
    }

    fn try_upsert(&mut self, hash: &str, record: &MediaRecord) -> Result<()> {
        let now = timestamp(Utc::now());
        let created = record.created.map(timestamp).unwrap_or_else(|| now.clone());
        let metadata_json = serde_json::to_string(&record.metadata)?;
        let variant_json = serde_json::to_string(&variant_blob(&record.kind))?;
        let extra_json = serde_json::to_string(&record.extra)?;

        let tx = self.conn.transaction()?;

        tx.execute(
            "INSERT INTO media (hash, kind, source_media, name, caption, created, modified,
                                metadata_json, variant_json, extra_json)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(hash) DO UPDATE SET
                 kind=excluded.kind,
                 source_media=excluded.source_media,
                 name=excluded.name,
                 caption=excluded.caption,
                 created=COALESCE(media.created, excluded.created),
                 modified=excluded.modified,
                 metadata_json=excluded.metadata_json,
                 variant_json=excluded.variant_json,
                 extra_json=excluded.extra_json",
            params![
                hash,
                record.record_kind().as_str(),
                record.source_media(),
                record.name,
                record.caption,
                created,
                now,
                metadata_json,
                variant_json,
                extra_json,
            ],
        )?;

        tx.execute("DELETE FROM tags WHERE media_hash = ?1", params![hash])?;
        {
            let mut insert = tx.prepare(
                "INSERT INTO tags (media_hash, category, value, position) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (position, tag) in record.tags.iter().enumerate() {
                insert.execute(params![hash, tag.category, tag.value, position as i64])?;
            }
        }

        let strengths: HashMap<(String, String), f64> = {
            let mut stmt = tx.prepare(
                "SELECT type, to_hash, strength FROM relationships
                 WHERE from_hash = ?1 AND strength IS NOT NULL",
            )?;
            let rows = stmt.query_map(params![hash], |row| {
                Ok(((row.get(0)?, row.get(1)?), row.get(2)?))
            })?;
            rows.collect::<std::result::Result<_, _>>()?
        };

        tx.execute("DELETE FROM relationships WHERE from_hash = ?1", params![hash])?;
        {
            let mut insert = tx.prepare(
                "INSERT OR IGNORE INTO relationships (from_hash, to_hash, type, strength)
                 VALUES (?1, ?2, ?3, ?4)",
            )?;
            for (relation, targets) in &record.related {
                for target in targets {
                    let strength = strengths.get(&(relation.clone(), target.clone()));
                    insert.execute(params![hash, target, relation, strength])?;
                }
            }
        }

        tx.commit()?;
        Ok(())
    }

    /// Reconstruct a record purely from the index tables.
    pub fn load(&self, hash: &str) -> Option<MediaRecord> {
        match self.try_load(hash) {
            Ok(record) => record,
            Err(e) => {
                warn!("Failed to read {} from index: {}", hash, e);
                None
            }
        }
    }

    fn try_load(&self, hash: &str) -> Result<Option<MediaRecord>> {
        let row = self
            .conn
            .query_row(
                "SELECT kind, source_media, name, caption, created, modified,
                        metadata_json, variant_json, extra_json
                 FROM media WHERE hash = ?1",
                params![hash],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, Option<String>>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, String>(3)?,
                        row.get::<_, String>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, String>(6)?,
                        row.get::<_, String>(7)?,
                        row.get::<_, String>(8)?,
                    ))
                },
            )
            .optional()?;

        let Some((
            kind,
            source_media,
            name,
            caption,
            created,
            modified,
            metadata_json,
            variant_json,
            extra_json,
        )) = row
        else {
            return Ok(None);
        };

        let metadata: Map<String, Value> = serde_json::from_str(&metadata_json)?;
        let variant: Map<String, Value> = serde_json::from_str(&variant_json)?;
        let extra: Map<String, Value> = serde_json::from_str(&extra_json)?;
        let kind = media_kind(
            RecordKind::parse_lenient(&kind),
            source_media.unwrap_or_default(),
            variant,
        );

        let mut record = MediaRecord {
            hash: hash.to_string(),
            kind,
            name,
            caption,
            tags: self.tags_for(hash)?,
            metadata,
            extra,
            created: parse_timestamp(&created),
            modified: parse_timestamp(&modified),
            ..Default::default()
        };

        let mut stmt = self.conn.prepare(
            "SELECT type, to_hash FROM relationships WHERE from_hash = ?1 ORDER BY rowid",
        )?;
        let edges = stmt.query_map(params![hash], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        for edge in edges {
            let (relation, target) = edge?;
            record.add_related(relation, target);
        }

        Ok(Some(record))
    }

    /// Remove a record's row; tags and outgoing edges cascade.
    pub fn delete(&mut self, hash: &str) -> bool {
        match self.try_delete(hash) {
            Ok(removed) => {
                debug!("Removed {} from index ({} rows)", hash, removed);
                true
            }
            Err(e) => {
                warn!("Failed to remove {} from index: {}", hash, e);
                false
            }
        }
    }

    fn try_delete(&mut self, hash: &str) -> Result<usize> {
        let tx = self.conn.transaction()?;
        let removed = tx.execute("DELETE FROM media WHERE hash = ?1", params![hash])?;
        tx.execute(
            "DELETE FROM perceptual_hashes WHERE media_hash = ?1",
            params![hash],
        )?;
        tx.commit()?;
        Ok(removed)
    }

    // ========================================
    // Queries
    // ========================================

    /// Every indexed hash in creation order, optionally of one kind.
    pub fn get_all_hashes(&self, kind: Option<RecordKind>) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT hash FROM media
             WHERE ?1 IS NULL OR kind = ?1
             ORDER BY created, hash",
        )?;
        let rows = stmt.query_map(params![kind.map(|k| k.as_str())], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// `similar` edges from `hash` scoring at least `threshold`, best first.
    ///
    /// Unscored edges count as 1.0.
    pub fn get_similar(&self, hash: &str, threshold: f64) -> Result<Vec<(String, f64)>> {
        let mut stmt = self.conn.prepare(
            "SELECT to_hash, COALESCE(strength, 1.0) AS score FROM relationships
             WHERE from_hash = ?1 AND type = ?2 AND COALESCE(strength, 1.0) >= ?3
             ORDER BY score DESC, rowid",
        )?;
        let rows = stmt.query_map(params![hash, SIMILAR_RELATION, threshold], |row| {
            Ok((row.get(0)?, row.get(1)?))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Record or rescore a `similar` edge. `from` must already be indexed.
    pub fn set_similarity(&mut self, from: &str, to: &str, strength: f64) -> Result<()> {
        self.conn.execute(
            "INSERT INTO relationships (from_hash, to_hash, type, strength)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(from_hash, to_hash, type) DO UPDATE SET strength=excluded.strength",
            params![from, to, SIMILAR_RELATION, strength],
        )?;
        Ok(())
    }

    /// Tags of `hash` in record order.
    pub fn tags_for(&self, hash: &str) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT category, value FROM tags WHERE media_hash = ?1 ORDER BY position",
        )?;
        let rows = stmt.query_map(params![hash], |row| {
            Ok(Tag::new(
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
            ))
        })?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM media", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Hashes carrying `category:value`, compared case-insensitively.
    pub fn hashes_with_tag(&self, category: &str, value: &str) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT m.hash FROM media m
             JOIN tags t ON t.media_hash = m.hash
             WHERE t.category = ?1 COLLATE NOCASE AND t.value = ?2 COLLATE NOCASE
             ORDER BY m.created, m.hash",
        )?;
        let rows = stmt.query_map(params![category, value], |row| row.get(0))?;
        Ok(rows.collect::<std::result::Result<_, _>>()?)
    }

    /// Hashes whose `category:value` tag strings satisfy `predicate`.
    ///
    /// The predicate is an opaque tag filter supplied by the caller.
    pub fn filter_hashes<F>(&self, predicate: F) -> Result<Vec<String>>
    where
        F: Fn(&[String]) -> bool,
    {
        let mut stmt = self.conn.prepare(
            "SELECT m.hash, t.category, t.value FROM media m
             LEFT JOIN tags t ON t.media_hash = m.hash
             ORDER BY m.created, m.hash, t.position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, Option<String>>(2)?,
            ))
        })?;

        let mut grouped: Vec<(String, Vec<String>)> = Vec::new();
        for row in rows {
            let (hash, category, value) = row?;
            if grouped.last().map(|(h, _)| h != &hash).unwrap_or(true) {
                grouped.push((hash, Vec::new()));
            }
            if let (Some(category), Some(value), Some((_, tags))) =
                (category, value, grouped.last_mut())
            {
                tags.push(format!("{}:{}", category, value));
            }
        }

        Ok(grouped
            .into_iter()
            .filter(|(_, tags)| predicate(tags))
            .map(|(hash, _)| hash)
            .collect())
    }

    // ========================================
    // Perceptual hash cache
    // ========================================

    pub fn get_perceptual_hash(&self, hash: &str, algorithm: &str) -> Option<String> {
        self.conn
            .query_row(
                "SELECT hash_value FROM perceptual_hashes WHERE media_hash = ?1 AND algorithm = ?2",
                params![hash, algorithm],
                |row| row.get(0),
            )
            .optional()
            .unwrap_or_else(|e| {
                warn!("Failed to read perceptual hash for {}: {}", hash, e);
                None
            })
    }

    pub fn save_perceptual_hash(&mut self, hash: &str, algorithm: &str, value: &str) -> bool {
        let result = self.conn.execute(
            "INSERT OR REPLACE INTO perceptual_hashes (media_hash, algorithm, hash_value, computed)
             VALUES (?1, ?2, ?3, ?4)",
            params![hash, algorithm, value, timestamp(Utc::now())],
        );
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!("Failed to save perceptual hash for {}: {}", hash, e);
                false
            }
        }
    }

    // ========================================
    // Maintenance
    // ========================================

    /// Drop and recreate every table.
    pub fn reset(&mut self) -> Result<()> {
        Self::drop_tables(&self.conn)?;
        Self::ensure_schema(&self.conn)?;
        debug!("Index tables recreated");
        Ok(())
    }

    /// Rebuild the whole index from the record files in `store`.
    pub fn rebuild_from<S: RecordStore + ?Sized>(&mut self, store: &S) -> Result<RebuildReport> {
        let start = Instant::now();
        self.reset()?;

        let hashes = store.scan_all();
        let mut report = RebuildReport {
            scanned: hashes.len(),
            ..Default::default()
        };

        for hash in hashes {
            let Some(record) = store.load(&hash) else {
                report.unreadable.push(hash);
                continue;
            };
            if self.upsert(&hash, &record) {
                report.indexed += 1;
            } else {
                report.failed.push(hash);
            }
        }

        if let Err(e) = self.checkpoint() {
            warn!("WAL checkpoint after rebuild failed: {}", e);
        }

        report.duration_ms = start.elapsed().as_millis();
        info!(
            "Rebuilt index: {} of {} records in {}ms",
            report.indexed, report.scanned, report.duration_ms
        );
        Ok(report)
    }

    /// Truncate the write-ahead log.
    pub fn checkpoint(&self) -> Result<()> {
        self.conn
            .query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))?;
        Ok(())
    }
}

/// Variant fields that have no column of their own. The source hash lives in
/// `source_media`.
fn variant_blob(kind: &MediaKind) -> Map<String, Value> {
    let mut blob = Map::new();
    match kind {
        MediaKind::Image => {}
        MediaKind::Mask { mask_category, .. } => {
            blob.insert(MASK_CATEGORY_KEY.to_string(), Value::from(mask_category.as_str()));
        }
        MediaKind::VideoFrame {
            frame_index,
            timestamp,
            ..
        } => {
            blob.insert(FRAME_INDEX_KEY.to_string(), Value::from(*frame_index));
            blob.insert(TIMESTAMP_KEY.to_string(), Value::from(*timestamp));
        }
        MediaKind::Crop {
            crop_rect,
            aspect_ratio,
            created_at,
            ..
        } => {
            blob.insert(CROP_RECT_KEY.to_string(), Value::from(crop_rect.to_vec()));
            blob.insert(ASPECT_RATIO_KEY.to_string(), Value::from(aspect_ratio.as_str()));
            blob.insert(CREATED_AT_KEY.to_string(), Value::from(created_at.as_str()));
        }
    }
    blob
}

fn media_kind(kind: RecordKind, source: String, mut variant: Map<String, Value>) -> MediaKind {
    match kind {
        RecordKind::Image => MediaKind::Image,
        RecordKind::Mask => MediaKind::Mask {
            source_image: source,
            mask_category: take_string(&mut variant, MASK_CATEGORY_KEY),
        },
        RecordKind::VideoFrame => MediaKind::VideoFrame {
            source_video: source,
            frame_index: variant
                .get(FRAME_INDEX_KEY)
                .and_then(Value::as_u64)
                .unwrap_or_default(),
            timestamp: variant
                .get(TIMESTAMP_KEY)
                .and_then(Value::as_f64)
                .unwrap_or_default(),
        },
        RecordKind::Crop => MediaKind::Crop {
            parent_image: source,
            crop_rect: variant
                .remove(CROP_RECT_KEY)
                .and_then(|v| serde_json::from_value(v).ok())
                .unwrap_or_default(),
            aspect_ratio: take_string(&mut variant, ASPECT_RATIO_KEY),
            created_at: take_string(&mut variant, CREATED_AT_KEY),
        },
    }
}

fn take_string(map: &mut Map<String, Value>, key: &str) -> String {
    match map.remove(key) {
        Some(Value::String(s)) => s,
        _ => String::new(),
    }
}

fn timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::store::FileSystemStore;
    use tempfile::TempDir;

    fn create_test_index() -> (IndexStore, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let index = IndexStore::open(temp_dir.path().join("library.db")).unwrap();
        (index, temp_dir)
    }

    fn create_test_record(hash: &str, tags: &[(&str, &str)]) -> MediaRecord {
        let mut record = MediaRecord::image(hash);
        record.name = format!("{}.png", hash);
        for (c, v) in tags {
            record.add_tag(*c, *v);
        }
        record
    }

    #[test]
    fn test_upsert_and_load() {
        let (mut index, _temp) = create_test_index();
        let mut record = create_test_record("abc", &[("class", "cat"), ("style", "photo")]);
        record.add_related("crops", "c1");
        record.metadata.insert("width".into(), Value::from(640));

        assert!(index.upsert("abc", &record));

        let loaded = index.load("abc").unwrap();
        assert_eq!(loaded.tags, record.tags);
        assert_eq!(loaded.related("crops"), ["c1"]);
        assert_eq!(loaded.metadata, record.metadata);
        assert!(loaded.created.is_some());
        assert!(index.load("missing").is_none());
    }

    #[test]
    fn test_variant_fields_round_trip() {
        let (mut index, _temp) = create_test_index();
        let mask = MediaRecord::mask("m", "src", "person");
        let frame = MediaRecord::video_frame("f", "vid", 42, 1.75);
        index.upsert("m", &mask);
        index.upsert("f", &frame);

        let loaded_mask = index.load("m").unwrap();
        assert_eq!(loaded_mask.kind, mask.kind);
        assert!(loaded_mask.metadata.is_empty());
        assert_eq!(index.load("f").unwrap().kind, frame.kind);

        let crop = MediaRecord::crop("c", "parent", [1, 2, 30, 40]);
        index.upsert("c", &crop);
        let loaded_crop = index.load("c").unwrap();
        assert_eq!(loaded_crop.kind, crop.kind);
        assert_eq!(loaded_crop.source_media(), Some("parent"));

        assert_eq!(index.get_all_hashes(Some(RecordKind::Mask)).unwrap(), ["m"]);
    }

    #[test]
    fn test_metadata_keys_named_like_variant_fields_survive() {
        let (mut index, _temp) = create_test_index();
        let mut frame = MediaRecord::video_frame("f", "vid", 7, 0.25);
        frame.metadata.insert("timestamp".into(), Value::from("2024-01-01T00:00:00"));
        frame.metadata.insert("frame_index".into(), Value::from("first"));
        let mut mask = MediaRecord::mask("m", "src", "person");
        mask.metadata.insert("mask_category".into(), Value::from("user note"));
        index.upsert("f", &frame);
        index.upsert("m", &mask);

        let loaded = index.load("f").unwrap();
        assert_eq!(loaded.kind, frame.kind);
        assert_eq!(loaded.metadata, frame.metadata);
        let loaded = index.load("m").unwrap();
        assert_eq!(loaded.kind, mask.kind);
        assert_eq!(loaded.metadata["mask_category"], "user note");
    }

    #[test]
    fn test_unmodelled_file_keys_kept_in_index() {
        let (mut index, _temp) = create_test_index();
        let mut record = create_test_record("h", &[]);
        record.extra.insert("rating".into(), Value::from(5));
        index.upsert("h", &record);
        assert_eq!(index.load("h").unwrap().extra, record.extra);
    }

    #[test]
    fn test_outdated_schema_is_recreated() {
        let temp = TempDir::new().unwrap();
        let db_path = temp.path().join("library.db");
        {
            let conn = Connection::open(&db_path).unwrap();
            conn.execute_batch(
                "CREATE TABLE media (hash TEXT PRIMARY KEY, kind TEXT NOT NULL,
                                     source_media TEXT, name TEXT, caption TEXT,
                                     created TEXT, modified TEXT, metadata_json TEXT);
                 INSERT INTO media VALUES ('old', 'image', NULL, '', '', '', '', '{}');
                 PRAGMA user_version = 1;",
            )
            .unwrap();
        }

        let mut index = IndexStore::open(&db_path).unwrap();
        assert_eq!(index.count().unwrap(), 0);
        assert!(index.upsert("h", &create_test_record("h", &[("a", "b")])));
        assert_eq!(index.load("h").unwrap().tags, [Tag::new("a", "b")]);
    }

    #[test]
    fn test_upsert_replaces_tags_in_order_and_keeps_created() {
        let (mut index, _temp) = create_test_index();
        index.upsert("h", &create_test_record("h", &[("a", "1"), ("b", "2")]));
        let created = index.load("h").unwrap().created;

        index.upsert("h", &create_test_record("h", &[("b", "2"), ("a", "1"), ("a", "1")]));
        let tags = index.tags_for("h").unwrap();
        assert_eq!(
            tags,
            vec![Tag::new("b", "2"), Tag::new("a", "1"), Tag::new("a", "1")]
        );
        assert_eq!(index.load("h").unwrap().created, created);
    }

    #[test]
    fn test_incoming_edges_survive_target_upsert() {
        let (mut index, _temp) = create_test_index();
        let mut a = create_test_record("a", &[]);
        a.add_related("similar", "b");
        index.upsert("a", &a);
        index.upsert("b", &create_test_record("b", &[]));
        index.upsert("b", &create_test_record("b", &[("x", "y")]));

        assert_eq!(index.load("a").unwrap().related("similar"), ["b"]);
    }

    #[test]
    fn test_get_similar_threshold_and_order() {
        let (mut index, _temp) = create_test_index();
        let mut a = create_test_record("a", &[]);
        a.add_related("similar", "b");
        a.add_related("similar", "c");
        a.add_related("similar", "d");
        index.upsert("a", &a);

        index.set_similarity("a", "b", 0.7).unwrap();
        index.set_similarity("a", "c", 0.95).unwrap();

        let similar = index.get_similar("a", 0.8).unwrap();
        assert_eq!(
            similar,
            vec![("d".to_string(), 1.0), ("c".to_string(), 0.95)]
        );

        // Scores survive a re-projection of the same edges
        index.upsert("a", &a);
        assert_eq!(index.get_similar("a", 0.0).unwrap().len(), 3);
        assert_eq!(index.get_similar("a", 0.9).unwrap()[1], ("c".to_string(), 0.95));
    }

    #[test]
    fn test_delete_cascades() {
        let (mut index, _temp) = create_test_index();
        let mut record = create_test_record("h", &[("class", "cat")]);
        record.add_related("crops", "c");
        index.upsert("h", &record);
        index.save_perceptual_hash("h", "phash", "ff00");

        assert!(index.delete("h"));
        assert!(index.load("h").is_none());
        assert!(index.tags_for("h").unwrap().is_empty());
        assert!(index.get_perceptual_hash("h", "phash").is_none());
        assert_eq!(index.count().unwrap(), 0);
    }

    #[test]
    fn test_perceptual_hash_cache() {
        let (mut index, _temp) = create_test_index();
        assert!(index.get_perceptual_hash("h", "dhash").is_none());
        assert!(index.save_perceptual_hash("h", "dhash", "abcd"));
        assert!(index.save_perceptual_hash("h", "dhash", "beef"));
        assert_eq!(index.get_perceptual_hash("h", "dhash").as_deref(), Some("beef"));
    }

    #[test]
    fn test_tag_queries() {
        let (mut index, _temp) = create_test_index();
        index.upsert("a", &create_test_record("a", &[("Class", "Cat")]));
        index.upsert("b", &create_test_record("b", &[("class", "dog")]));
        index.upsert("c", &create_test_record("c", &[]));

        assert_eq!(index.hashes_with_tag("class", "cat").unwrap(), ["a"]);

        let untagged = index.filter_hashes(|tags| tags.is_empty()).unwrap();
        assert_eq!(untagged, ["c"]);
        let dogs = index
            .filter_hashes(|tags| tags.iter().any(|t| t == "class:dog"))
            .unwrap();
        assert_eq!(dogs, ["b"]);
    }

    #[test]
    fn test_rebuild_from_store() {
        let (mut index, temp) = create_test_index();
        let store = FileSystemStore::new(temp.path(), &StoreConfig::default()).unwrap();
        store.save("a", &create_test_record("a", &[("k", "v"), ("k", "v")]));
        store.save("b", &create_test_record("b", &[]));
        std::fs::write(store.record_path("bad"), "not json").unwrap();

        index.upsert("stale", &create_test_record("stale", &[]));

        let report = index.rebuild_from(&store).unwrap();
        assert_eq!(report.scanned, 3);
        assert_eq!(report.indexed, 2);
        assert_eq!(report.unreadable, ["bad"]);

        let mut hashes = index.get_all_hashes(None).unwrap();
        hashes.sort();
        assert_eq!(hashes, ["a", "b"]);
        assert_eq!(index.tags_for("a").unwrap().len(), 2);
    }

    #[test]
    fn test_reopen_keeps_data() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("library.db");
        {
            let mut index = IndexStore::open(&path).unwrap();
            index.upsert("h", &create_test_record("h", &[]));
        }
        let index = IndexStore::open(&path).unwrap();
        assert_eq!(index.count().unwrap(), 1);
    }
}
