//! Dump command implementation.

use serde::Serialize;
use std::path::Path;

/// Event representation for output.
#[derive(Debug, Serialize)]
struct EventInfo {
    /// Sequence number.
    seqno: i64,
    /// Fragment number.
    fragno: u16,
    /// Whether this fragment completes its transaction.
    last_frag: bool,
    /// Epoch number.
    epoch: i64,
    /// Source service identity.
    source_id: String,
    /// Payload size in bytes.
    payload_size: usize,
}

/// Runs the dump command.
pub fn run(
    path: &Path,
    file: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let log = super::open_observer(path)?;

    let file = match file {
        Some(name) => name.to_string(),
        None => log
            .segments()
            .first()
            .map(|e| e.file_name.clone())
            .ok_or("log has no segments")?,
    };

    let mut scanner = log.open_file(&file)?;
    let max_events = limit.unwrap_or(usize::MAX);
    let mut events = Vec::new();

    while events.len() < max_events {
        let Some(event) = log.read_next_event(&mut scanner)? else {
            break;
        };
        events.push(EventInfo {
            seqno: event.seqno,
            fragno: event.fragno,
            last_frag: event.last_frag,
            epoch: event.epoch,
            source_id: event.source_id,
            payload_size: event.payload.len(),
        });
    }

    match format {
        "json" => println!("{}", serde_json::to_string_pretty(&events)?),
        _ => print_text(&file, &events),
    }

    Ok(())
}

fn print_text(file: &str, events: &[EventInfo]) {
    println!("File: {file} ({} events)", events.len());
    println!(
        "{:>12} {:>8} {:>6} {:>8} {:<16} {:>10}",
        "SEQNO", "FRAGNO", "LAST", "EPOCH", "SOURCE", "BYTES"
    );
    for event in events {
        println!(
            "{:>12} {:>8} {:>6} {:>8} {:<16} {:>10}",
            event.seqno,
            event.fragno,
            event.last_frag,
            event.epoch,
            event.source_id,
            event.payload_size,
        );
    }
}
