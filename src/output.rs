//! CLI output formatting.
//!
//! # Information-First Display
//!
//! Every entity leads with its identity (collection slug, record id, size
//! name) and shows files, URLs and byte counts as indented context. The
//! output reads as an inventory of derivatives while still pointing at the
//! files on disk.
//!
//! # Output Format
//!
//! ## Check
//!
//! ```text
//! Collections
//! 001 media → uploads/media (/media)
//!     thumbnail: 400x300 cover centre
//!     card: 768xauto cover centre
//! Conversion
//!     quality 50, lossy, metadata stripped, async
//! ```
//!
//! ## Record
//!
//! ```text
//! 7d3c… photo.jpg (image/jpeg)
//!     primary: photo-1920x1080.webp 1920x1080 182.4 KiB
//!         https://cdn.example.com/media/photo-1920x1080.webp
//!     thumbnail: photo-400x300.webp 400x300 12.0 KiB
//!         https://cdn.example.com/media/photo-400x300.webp
//! ```
//!
//! ## Regeneration
//!
//! ```text
//! media: regeneration started
//!     [1/3] a.jpg
//!     [2/3] b.jpg
//!         skipped 42ab…: original file unavailable
//!     [3/3] c.jpg
//! media: regenerated 3 records
//! ```
//!
//! # Architecture
//!
//! Each entity has a `format_*` function (returns `Vec<String>` or `String`)
//! for testability and a `print_*` wrapper that writes to stdout. Format
//! functions are pure: no I/O, no side effects.

use crate::config::{CollectionConfig, Config, ExecutionMode};
use crate::naming::public_url;
use crate::records::Record;
use crate::regenerate::RegenerationEvent;
use crate::types::{DerivativeMetadata, RegenerationStatus};
use serde::Serialize;
use serde_json::Value;

// ============================================================================
// Shared helpers
// ============================================================================

/// Format a 1-based positional index as 3-digit zero-padded.
fn format_index(pos: usize) -> String {
    format!("{:0>3}", pos)
}

/// Return indentation string: 4 spaces per depth level.
fn indent(depth: usize) -> String {
    "    ".repeat(depth)
}

/// Human-readable byte count with binary units.
fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    if bytes < 1024 {
        return format!("{bytes} B");
    }
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{value:.1} {}", UNITS[unit])
}

fn side(value: Option<u32>) -> String {
    value.map_or_else(|| "auto".to_string(), |v| v.to_string())
}

/// The name a value is spelled with in the config file.
fn config_name<T: Serialize>(value: &T) -> String {
    match serde_json::to_value(value) {
        Ok(Value::String(name)) => name,
        _ => String::new(),
    }
}

fn derivative_lines(
    label: &str,
    meta: &DerivativeMetadata,
    server_url: &str,
    static_url: &str,
) -> Vec<String> {
    vec![
        format!(
            "{}{}: {} {}x{} {}",
            indent(1),
            label,
            meta.filename,
            meta.width,
            meta.height,
            format_bytes(meta.filesize)
        ),
        format!(
            "{}{}",
            indent(2),
            public_url(server_url, static_url, &meta.filename)
        ),
    ]
}

// ============================================================================
// Check
// ============================================================================

/// Summarize a validated config.
pub fn format_check(config: &Config) -> Vec<String> {
    let mut lines = vec!["Collections".to_string()];
    if config.collections.is_empty() {
        lines.push(format!("{}(none)", indent(1)));
    }
    for (i, collection) in config.collections.iter().enumerate() {
        lines.push(format!(
            "{} {} → {} ({})",
            format_index(i + 1),
            collection.slug,
            config.static_dir(collection).display(),
            collection.static_url()
        ));
        if collection.disable_local_storage {
            lines.push(format!("{}local storage disabled", indent(1)));
        }
        for size in &collection.sizes {
            lines.push(format!(
                "{}{}: {}x{} {} {}",
                indent(1),
                size.name,
                side(size.width),
                side(size.height),
                config_name(&size.fit.unwrap_or_default()),
                config_name(&size.crop)
            ));
        }
    }

    let conversion = &config.conversion;
    lines.push("Conversion".to_string());
    lines.push(format!(
        "{}quality {}, {}, metadata {}, {}",
        indent(1),
        conversion.quality.value(),
        if conversion.lossless { "lossless" } else { "lossy" },
        if conversion.metadata { "kept" } else { "stripped" },
        match conversion.mode {
            ExecutionMode::Sync => "sync",
            ExecutionMode::Async => "async",
        }
    ));
    lines.push(format!(
        "{}accepts {}",
        indent(1),
        conversion.mime_types.join(", ")
    ));
    lines
}

pub fn print_check(config: &Config) {
    for line in format_check(config) {
        println!("{}", line);
    }
}

// ============================================================================
// Records
// ============================================================================

/// A record and its derivatives with public URLs.
pub fn format_record(record: &Record, collection: &CollectionConfig, server_url: &str) -> Vec<String> {
    let mut header = record.id.clone();
    if let Some(filename) = record.filename() {
        header.push(' ');
        header.push_str(filename);
    }
    if let Some(mime) = record.mime_type() {
        header.push_str(&format!(" ({mime})"));
    }

    let mut lines = vec![header];
    let static_url = collection.static_url();
    match record.derivative() {
        Some(field) => {
            lines.extend(derivative_lines(
                "primary",
                &field.primary,
                server_url,
                &static_url,
            ));
            for (name, meta) in &field.sizes {
                lines.extend(derivative_lines(name, meta, server_url, &static_url));
            }
        }
        None => lines.push(format!("{}no derivatives", indent(1))),
    }
    lines
}

pub fn print_record(record: &Record, collection: &CollectionConfig, server_url: &str) {
    for line in format_record(record, collection, server_url) {
        println!("{}", line);
    }
}

// ============================================================================
// Regeneration
// ============================================================================

pub fn format_status(collection: &str, status: Option<&RegenerationStatus>) -> String {
    match status {
        None => format!("{collection}: idle"),
        Some(status) if status.total == 0 => format!("{collection}: nothing to regenerate"),
        Some(status) => format!(
            "{collection}: {}/{} {}",
            status.current,
            status.total,
            status.current_file.as_deref().unwrap_or("-")
        ),
    }
}

/// Format a single regeneration event as display lines.
pub fn format_event(event: &RegenerationEvent) -> Vec<String> {
    match event {
        RegenerationEvent::Started { collection } => {
            vec![format!("{collection}: regeneration started")]
        }
        RegenerationEvent::Progress { status, .. } if status.total == 0 => Vec::new(),
        RegenerationEvent::Progress { status, .. } => vec![format!(
            "{}[{}/{}] {}",
            indent(1),
            status.current,
            status.total,
            status.current_file.as_deref().unwrap_or("-")
        )],
        RegenerationEvent::Skipped { id, reason, .. } => {
            vec![format!("{}skipped {id}: {reason}", indent(2))]
        }
        RegenerationEvent::Finished { collection, total } => {
            let noun = if *total == 1 { "record" } else { "records" };
            vec![format!("{collection}: regenerated {total} {noun}")]
        }
        RegenerationEvent::Failed { collection, error } => {
            vec![format!("{collection}: regeneration failed: {error}")]
        }
        RegenerationEvent::Cancelled { collection, status } => vec![format!(
            "{collection}: regeneration cancelled at {}/{}",
            status.current, status.total
        )],
    }
}

pub fn print_event(event: &RegenerationEvent) {
    for line in format_event(event) {
        println!("{}", line);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{record_with_derivative, size_spec, test_config};
    use std::path::Path;

    // =========================================================================
    // Helper tests
    // =========================================================================

    #[test]
    fn format_bytes_units() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1024), "1.0 KiB");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MiB");
    }

    #[test]
    fn format_index_pads() {
        assert_eq!(format_index(1), "001");
        assert_eq!(format_index(42), "042");
    }

    // =========================================================================
    // Check
    // =========================================================================

    #[test]
    fn check_lists_collections_and_sizes() {
        let mut config = test_config(Path::new("/srv"), vec![size_spec("Thumb", 400, 300)]);
        config.collections[0].sizes[0].height = None;
        let lines = format_check(&config);

        assert_eq!(lines[0], "Collections");
        assert_eq!(lines[1], "001 media → /srv/media (/media)");
        assert_eq!(lines[2], "    Thumb: 400xauto cover centre");
        assert_eq!(lines[3], "Conversion");
        assert!(lines[4].starts_with("    quality 50, lossy, metadata stripped, async"));
    }

    #[test]
    fn check_without_collections() {
        let config = Config::default();
        let lines = format_check(&config);
        assert_eq!(lines[1], "    (none)");
    }

    // =========================================================================
    // Records
    // =========================================================================

    #[test]
    fn record_shows_public_urls() {
        let config = test_config(Path::new("/srv"), vec![]);
        let record = record_with_derivative("photo-1x1.webp", &["photo-2x2.webp"]);
        let lines = format_record(&record, &config.collections[0], "https://cdn.example.com/");

        assert_eq!(lines[0], "record-1 photo.jpg (image/jpeg)");
        assert_eq!(lines[1], "    primary: photo-1x1.webp 1x1 1 B");
        assert_eq!(lines[2], "        https://cdn.example.com/media/photo-1x1.webp");
        assert_eq!(lines[3], "    s0: photo-2x2.webp 1x1 1 B");
        assert_eq!(lines[4], "        https://cdn.example.com/media/photo-2x2.webp");
    }

    #[test]
    fn record_without_derivative() {
        let config = test_config(Path::new("/srv"), vec![]);
        let mut record = record_with_derivative("x.webp", &[]);
        record.fields.remove("derivative");
        let lines = format_record(&record, &config.collections[0], "");
        assert_eq!(lines, vec!["record-1 photo.jpg (image/jpeg)", "    no derivatives"]);
    }

    // =========================================================================
    // Regeneration
    // =========================================================================

    #[test]
    fn status_lines() {
        assert_eq!(format_status("media", None), "media: idle");
        assert_eq!(
            format_status("media", Some(&RegenerationStatus::starting())),
            "media: nothing to regenerate"
        );
        let status = RegenerationStatus {
            current_file: Some("a.jpg".into()),
            current: 2,
            total: 5,
        };
        assert_eq!(format_status("media", Some(&status)), "media: 2/5 a.jpg");
    }

    #[test]
    fn progress_event_line() {
        let event = RegenerationEvent::Progress {
            collection: "media".into(),
            status: RegenerationStatus {
                current_file: Some("b.jpg".into()),
                current: 2,
                total: 3,
            },
        };
        assert_eq!(format_event(&event), vec!["    [2/3] b.jpg"]);
    }

    #[test]
    fn empty_progress_is_silent() {
        let event = RegenerationEvent::Progress {
            collection: "media".into(),
            status: RegenerationStatus::starting(),
        };
        assert!(format_event(&event).is_empty());
    }

    #[test]
    fn finished_event_pluralizes() {
        let one = RegenerationEvent::Finished {
            collection: "media".into(),
            total: 1,
        };
        let many = RegenerationEvent::Finished {
            collection: "media".into(),
            total: 3,
        };
        assert_eq!(format_event(&one), vec!["media: regenerated 1 record"]);
        assert_eq!(format_event(&many), vec!["media: regenerated 3 records"]);
    }

    #[test]
    fn skipped_event_is_nested() {
        let event = RegenerationEvent::Skipped {
            collection: "media".into(),
            id: "abc".into(),
            reason: "original file unavailable".into(),
        };
        assert_eq!(
            format_event(&event),
            vec!["        skipped abc: original file unavailable"]
        );
    }
}
