//! Inspect command implementation.

use serde::Serialize;
use std::path::Path;

/// Catalog summary for output.
#[derive(Debug, Serialize)]
struct CatalogInfo {
    /// Log directory.
    path: String,
    /// Lowest stored sequence number.
    min_seqno: Option<i64>,
    /// Highest stored sequence number.
    max_seqno: Option<i64>,
    /// Per-segment details.
    segments: Vec<SegmentInfo>,
}

/// One segment row.
#[derive(Debug, Serialize)]
struct SegmentInfo {
    /// Segment file name.
    file: String,
    /// First sequence number in the file (absent while unassigned).
    start_seqno: Option<i64>,
    /// Last sequence number in the file (absent for a fresh tail).
    end_seqno: Option<i64>,
    /// File size in bytes.
    size: u64,
}

/// Runs the inspect command.
pub fn run(path: &Path, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log = super::open_observer(path)?;

    let mut segments = Vec::new();
    for entry in log.segments() {
        let size = std::fs::metadata(path.join(&entry.file_name))
            .map(|m| m.len())
            .unwrap_or(0);
        segments.push(SegmentInfo {
            file: entry.file_name,
            start_seqno: (!entry.start_seqno.is_unknown()).then(|| entry.start_seqno.as_i64()),
            end_seqno: (!entry.end_seqno.is_unknown()).then(|| entry.end_seqno.as_i64()),
            size,
        });
    }

    let info = CatalogInfo {
        path: path.display().to_string(),
        min_seqno: log.min_seqno(),
        max_seqno: log.max_seqno(),
        segments,
    };

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&info)?),
        _ => print_text(&info),
    }

    Ok(())
}

fn print_text(info: &CatalogInfo) {
    println!("Log directory: {}", info.path);
    println!(
        "Sequence range: {} .. {}",
        info.min_seqno.map_or("-".to_string(), |s| s.to_string()),
        info.max_seqno.map_or("-".to_string(), |s| s.to_string()),
    );
    println!("Segments: {}", info.segments.len());
    println!();
    println!("{:<24} {:>12} {:>12} {:>12}", "FILE", "START", "END", "BYTES");
    for seg in &info.segments {
        println!(
            "{:<24} {:>12} {:>12} {:>12}",
            seg.file,
            seg.start_seqno.map_or("-".to_string(), |s| s.to_string()),
            seg.end_seqno.map_or("-".to_string(), |s| s.to_string()),
            seg.size,
        );
    }
}
