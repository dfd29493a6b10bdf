//! Formatting helpers for terminal output.

/// Truncate a string to a maximum length, adding ellipsis if needed
pub fn truncate_string(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else if max_len <= 3 {
        s.chars().take(max_len).collect()
    } else {
        let truncated: String = s.chars().take(max_len - 3).collect();
        format!("{}...", truncated)
    }
}

/// Human-readable byte count: 512 B, 1.5 KiB, 2.0 MiB
pub fn format_bytes(bytes: usize) -> String {
    const KIB: f64 = 1024.0;
    const MIB: f64 = KIB * 1024.0;

    let b = bytes as f64;
    if b < KIB {
        format!("{} B", bytes)
    } else if b < MIB {
        format!("{:.1} KiB", b / KIB)
    } else {
        format!("{:.1} MiB", b / MIB)
    }
}

/// Single-line preview of a response body; binary bodies are summarized.
pub fn body_preview(body: &[u8], max_len: usize) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => truncate_string(&text.replace(['\n', '\r'], " "), max_len),
        Err(_) => format!("<{} binary>", format_bytes(body.len())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_string() {
        assert_eq!(truncate_string("Hello", 10), "Hello");
        assert_eq!(truncate_string("Hello World", 8), "Hello...");
        assert_eq!(truncate_string("Hi", 2), "Hi");
        assert_eq!(truncate_string("Ngorongoro", 3), "Ngo");
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(2 * 1024 * 1024), "2.0 MiB");
    }

    #[test]
    fn test_body_preview() {
        assert_eq!(body_preview(b"{\"error\":\"offline\"}\n", 40), "{\"error\":\"offline\"} ");
        assert_eq!(body_preview(&[0xff, 0xfe, 0x00], 40), "<3 B binary>");
    }
}
