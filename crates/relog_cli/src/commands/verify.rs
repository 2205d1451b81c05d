//! Verify command implementation.

use relog_core::ReadOutcome;
use std::path::Path;

/// Runs the verify command.
///
/// Checks the catalog first (files present, sequence ranges contiguous),
/// then scans every segment record by record, verifying checksums.
pub fn run(path: &Path, fail_fast: bool) -> Result<(), Box<dyn std::error::Error>> {
    let log = super::open_observer(path)?;

    let mut problems = 0usize;

    match log.validate() {
        Ok(()) => println!("catalog: OK ({} segments)", log.segments().len()),
        Err(e) => {
            println!("catalog: FAILED - {e}");
            problems += 1;
            if fail_fast {
                return Err("verification failed".into());
            }
        }
    }

    for entry in log.segments() {
        let mut scanner = log.open_file(&entry.file_name)?;
        let mut records = 0usize;
        let mut file_problems = 0usize;

        loop {
            match scanner.next_record() {
                Ok(ReadOutcome::Record(record)) => {
                    records += 1;
                    if let Err(e) = record.verify_crc() {
                        println!(
                            "{}: record at offset {}: {e}",
                            entry.file_name, record.offset
                        );
                        file_problems += 1;
                        if fail_fast {
                            return Err("verification failed".into());
                        }
                    }
                }
                Ok(ReadOutcome::Empty) => break,
                Ok(ReadOutcome::Truncated) => {
                    println!("{}: truncated record at end of file", entry.file_name);
                    file_problems += 1;
                    if fail_fast {
                        return Err("verification failed".into());
                    }
                    break;
                }
                Ok(ReadOutcome::TimedOut) => break,
                Err(e) => {
                    println!("{}: read failed - {e}", entry.file_name);
                    file_problems += 1;
                    break;
                }
            }
        }

        if file_problems == 0 {
            println!("{}: OK ({records} records)", entry.file_name);
        }
        problems += file_problems;
    }

    if problems > 0 {
        return Err(format!("verification found {problems} problem(s)").into());
    }
    println!("verification passed");
    Ok(())
}
