//! Output formatting for CLI client commands.
//!
//! Tables and status lines go to stdout. Pasteboard data is written raw
//! to stdout with its metadata on stderr, so `get` pipes cleanly.

use std::io::{self, Write};

use crate::ipc::protocol::PasteboardDescriptor;

/// Print pasteboard descriptors as a table to stdout.
pub fn print_pasteboards(pasteboards: &[PasteboardDescriptor]) {
    println!(
        "{:<38} {:>8} {:>5} {:>6} {:>7} {:>7} TYPES",
        "PASTEBOARD", "COUNT", "OWNER", "CACHED", "HISTORY", "PENDING"
    );
    println!("{}", "-".repeat(90));
    for p in pasteboards {
        println!(
            "{:<38} {:>8} {:>5} {:>6} {:>7} {:>7} {}",
            p.name,
            p.change_count,
            if p.has_owner { "yes" } else { "no" },
            p.cached,
            format!("{}/{}", p.retained, p.history_depth),
            p.pending,
            format_types(&p.types),
        );
    }
}

pub fn print_types(pasteboard: &str, change_count: u64, types: &[String]) {
    println!("Pasteboard: {pasteboard}");
    println!("Count:      {change_count}");
    println!("Types:      {}", format_types(types));
}

/// Raw data to stdout, a summary line to stderr.
pub fn print_data(type_name: &str, change_count: u64, data: &[u8]) -> Result<(), io::Error> {
    eprintln!("{type_name} @ {change_count}: {} bytes", data.len());
    let mut stdout = io::stdout().lock();
    stdout.write_all(data)?;
    stdout.flush()
}

pub fn print_copied(pasteboard: &str, change_count: u64, size: Option<usize>) {
    match size {
        Some(size) => println!("Copied {size} bytes to {pasteboard} (count {change_count})"),
        None => println!("Copied file to {pasteboard} (count {change_count})"),
    }
}

/// One line per ownership change seen by `watch`.
pub fn print_changed(pasteboard: &str, change_count: u64, types: &[String]) {
    println!("{pasteboard} {change_count} {}", format_types(types));
}

fn format_types(types: &[String]) -> String {
    if types.is_empty() {
        "-".to_string()
    } else {
        types.join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_types_empty() {
        assert_eq!(format_types(&[]), "-");
    }

    #[test]
    fn format_types_keeps_order() {
        let types = vec!["text/html".to_string(), "text/plain".to_string()];
        assert_eq!(format_types(&types), "text/html,text/plain");
    }
}
