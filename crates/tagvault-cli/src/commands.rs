//! Subcommands and their implementations.

use anyhow::{bail, Result};
use clap::Subcommand;
use std::io::Write;
use std::path::PathBuf;
use tagvault_core::{CommitReport, MediaKind, MediaLibrary, RecordStore, Tag};
use tracing::{info, warn};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Drop the SQLite index and rebuild it from the record files
    RebuildIndex,
    /// Delete every cached preview
    ClearCache,
    /// Print the preview cache size
    CacheSize,
    /// Generate missing thumbnails
    Thumbnails,
    /// Print library statistics
    Stats,
    /// Print one record
    Show { hash: String },
    /// List or search known tags
    Tags {
        /// Only tags starting with this text
        #[arg(long, conflicts_with = "suggest")]
        prefix: Option<String>,
        /// Fuzzy autocomplete for this text
        #[arg(long)]
        suggest: Option<String>,
        /// Maximum number of suggestions
        #[arg(long, default_value = "10")]
        limit: usize,
    },
    /// Add (or with --remove, drop) category:value tags on a record
    Tag {
        hash: String,
        #[arg(required = true)]
        tags: Vec<Tag>,
        #[arg(long)]
        remove: bool,
    },
    /// Copy media files into the library and create their records
    Import {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Create records for media files in images/ that have none
    Scan,
    /// List records similar to a hash
    Similar {
        hash: String,
        #[arg(long, default_value = "0.0")]
        threshold: f64,
    },
    /// Move records and their media into deleted/
    Delete {
        #[arg(required = true)]
        hashes: Vec<String>,
    },
}

/// Run `command` against `library`, writing human-readable output to `out`.
pub fn run<S: RecordStore>(
    library: &mut MediaLibrary<S>,
    command: Command,
    out: &mut impl Write,
) -> Result<()> {
    match command {
        Command::RebuildIndex => {
            let report = library.rebuild_index()?;
            writeln!(
                out,
                "Indexed {} of {} records ({} unreadable, {} failed) in {} ms",
                report.indexed,
                report.scanned,
                report.unreadable.len(),
                report.failed.len(),
                report.duration_ms
            )?;
            for hash in &report.unreadable {
                writeln!(out, "  unreadable: {}", hash)?;
            }
            for hash in &report.failed {
                writeln!(out, "  not indexed: {}", hash)?;
            }
        }
        Command::ClearCache => {
            library.clear_cache()?;
            writeln!(out, "Preview cache cleared")?;
        }
        Command::CacheSize => {
            writeln!(out, "{}", format_bytes(library.cache_size()))?;
        }
        Command::Thumbnails => {
            let report = library.regenerate_thumbnails();
            writeln!(out, "{} thumbnails available", report.available)?;
            for hash in &report.missing_source {
                writeln!(out, "  no media file: {}", hash)?;
            }
            for hash in &report.failed {
                writeln!(out, "  could not decode: {}", hash)?;
            }
        }
        Command::Stats => {
            let stats = library.stats()?;
            writeln!(out, "Records:       {}", stats.records)?;
            writeln!(out, "Indexed:       {}", stats.indexed)?;
            for (kind, count) in &stats.by_kind {
                writeln!(out, "  {:<12} {}", kind, count)?;
            }
            writeln!(out, "Tags:          {}", stats.distinct_tags)?;
            writeln!(out, "Media size:    {}", format_bytes(stats.media_size_bytes))?;
            writeln!(out, "Cache size:    {}", format_bytes(stats.cache_size_bytes))?;
        }
        Command::Show { hash } => {
            let record = library.require(&hash)?;
            writeln!(out, "{} ({})", record.display_name(), record.record_kind())?;
            if let Some(source) = record.source_media() {
                writeln!(out, "source: {}", source)?;
            }
            if let MediaKind::Crop { crop_rect, .. } = &record.kind {
                let [x, y, w, h] = crop_rect;
                writeln!(out, "crop: {}x{} at {},{}", w, h, x, y)?;
            }
            if !record.caption.is_empty() {
                writeln!(out, "caption: {}", record.caption)?;
            }
            for tag in &record.tags {
                writeln!(out, "  {}", tag)?;
            }
            for (relation, targets) in &record.related {
                writeln!(out, "{}: {}", relation, targets.join(", "))?;
            }
        }
        Command::Tags {
            prefix,
            suggest,
            limit,
        } => {
            if let Some(query) = suggest {
                for (tag, score) in library.tag_index().suggest(&query, limit) {
                    writeln!(out, "{:.2}  {}", score, tag)?;
                }
            } else {
                let prefix = prefix.unwrap_or_default();
                for tag in library.all_tags() {
                    if tag.starts_with(&prefix) {
                        writeln!(out, "{}", tag)?;
                    }
                }
            }
        }
        Command::Tag { hash, tags, remove } => {
            let mut record = library.require(&hash)?;
            for tag in tags {
                if remove {
                    if !record.remove_tag(&tag) {
                        warn!("{} has no tag {}", hash, tag);
                    }
                } else {
                    record.add_tag(tag.category, tag.value);
                }
            }
            library.save(hash, record);
            commit(library, out)?;
        }
        Command::Import { files } => {
            for file in files {
                let hash = library.import_file(&file)?;
                writeln!(out, "{}  {}", hash, file.display())?;
            }
            commit(library, out)?;
        }
        Command::Scan => {
            let added = library.scan_new_files();
            writeln!(out, "Found {} new media files", added)?;
            commit(library, out)?;
        }
        Command::Similar { hash, threshold } => {
            for (other, strength) in library.index().get_similar(&hash, threshold)? {
                writeln!(out, "{:.3}  {}", strength, other)?;
            }
        }
        Command::Delete { hashes } => {
            for hash in hashes {
                if let Err(e) = library.require(&hash) {
                    if e.is_not_found() {
                        warn!("No record for {}; deleting its files anyway", hash);
                    }
                }
                library.remove(hash);
            }
            commit(library, out)?;
        }
    }
    Ok(())
}

fn commit<S: RecordStore>(library: &mut MediaLibrary<S>, out: &mut impl Write) -> Result<()> {
    let report = library.commit_all();
    print_report(&report, out)?;
    if !report.is_success() {
        bail!("{} change(s) could not be written", report.failed.len());
    }
    info!("Committed {} records", report.saved.len());
    Ok(())
}

fn print_report(report: &CommitReport, out: &mut impl Write) -> Result<()> {
    writeln!(
        out,
        "Saved {}, removed {}, failed {}",
        report.saved.len(),
        report.removed.len(),
        report.failed.len()
    )?;
    for (hash, reason) in &report.failed {
        writeln!(out, "  {}: {}", hash, reason)?;
    }
    if !report.index_drift.is_empty() {
        writeln!(
            out,
            "Index is behind for {} record(s); run rebuild-index",
            report.index_drift.len()
        )?;
    }
    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} B", bytes)
    } else {
        format!("{:.1} {}", value, UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tagvault_core::MediaRecord;
    use tempfile::TempDir;

    fn create_test_library() -> (MediaLibrary, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let library = MediaLibrary::open(temp_dir.path()).unwrap();
        (library, temp_dir)
    }

    fn run_to_string(library: &mut MediaLibrary, command: Command) -> Result<String> {
        let mut out = Vec::new();
        run(library, command, &mut out)?;
        Ok(String::from_utf8(out).unwrap())
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(3 * 1024 * 1024), "3.0 MiB");
    }

    #[test]
    fn test_tag_command_commits() {
        let (mut library, temp) = create_test_library();
        library.save("h", MediaRecord::image("h"));
        library.commit_all();

        let output = run_to_string(
            &mut library,
            Command::Tag {
                hash: "h".into(),
                tags: vec!["class:cat".parse().unwrap()],
                remove: false,
            },
        )
        .unwrap();
        assert!(output.starts_with("Saved 1"));

        let json = std::fs::read_to_string(temp.path().join("images/h.json")).unwrap();
        assert!(json.contains("\"class\""));

        let tags = run_to_string(
            &mut library,
            Command::Tags {
                prefix: Some("cl".into()),
                suggest: None,
                limit: 10,
            },
        )
        .unwrap();
        assert_eq!(tags, "class:\nclass:cat\n");
    }

    #[test]
    fn test_show_missing_record_fails() {
        let (mut library, _temp) = create_test_library();
        let err = run_to_string(&mut library, Command::Show { hash: "nope".into() }).unwrap_err();
        assert!(err.to_string().contains("Record not found: nope"));
    }

    #[test]
    fn test_show_crop_record() {
        let (mut library, _temp) = create_test_library();
        library.save("c", MediaRecord::crop("c", "parent", [5, 6, 70, 80]));
        library.commit_all();

        let output = run_to_string(&mut library, Command::Show { hash: "c".into() }).unwrap();
        assert_eq!(output, "Unnamed (crop)\nsource: parent\ncrop: 70x80 at 5,6\n");
    }

    #[test]
    fn test_rebuild_index_reports_counts() {
        let (mut library, temp) = create_test_library();
        library.save("h", MediaRecord::image("h"));
        library.commit_all();
        std::fs::write(temp.path().join("images/bad.json"), "{ not json").unwrap();

        let output = run_to_string(&mut library, Command::RebuildIndex).unwrap();
        assert!(output.starts_with("Indexed 1 of 2 records (1 unreadable, 0 failed)"));
        assert!(output.contains("  unreadable: bad\n"));
        assert_eq!(library.index().count().unwrap(), 1);
    }

    #[test]
    fn test_delete_command() {
        let (mut library, temp) = create_test_library();
        library.save("h", MediaRecord::image("h"));
        library.commit_all();

        run_to_string(
            &mut library,
            Command::Delete {
                hashes: vec!["h".into()],
            },
        )
        .unwrap();
        assert!(temp.path().join("deleted/h.json").exists());
    }
}
