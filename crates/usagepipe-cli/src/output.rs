//! Terminal output for admin commands.

use usagepipe_core::UploadedFileRecord;

/// Truncate a string to max_len characters, appending "..." if truncated.
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let kept: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", kept)
    }
}

/// Fixed-width table of files, in the order given.
pub fn file_table(records: &[UploadedFileRecord]) -> String {
    let mut out = format!(
        "{:<20} {:<48} {:<25} {:>12} {:>8}  {}\n",
        "TENANT", "FILE", "UPLOADED", "BYTES", "ATTEMPTS", "LAST ERROR"
    );
    for record in records {
        out.push_str(&format!(
            "{:<20} {:<48} {:<25} {:>12} {:>8}  {}\n",
            truncate_string(&record.tenant_id, 20),
            truncate_string(&record.file_name, 48),
            record.uploaded_at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
            record.content_length,
            record.attempts,
            truncate_string(record.last_error.as_deref().unwrap_or("-"), 60)
        ));
    }
    out
}
