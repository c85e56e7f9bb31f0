//! Hex-window formatting for patch diagnostics. The layout is for human
//! auditing only and is not a compatibility contract.

/// Format the bytes within `radius` of `center`, clamped to the buffer.
pub fn format_window(data: &[u8], center: usize, radius: usize) -> String {
    let start = center.saturating_sub(radius);
    let end = center.saturating_add(radius).min(data.len());
    format_range(data, start, end)
}

/// Format `data[start..end]` as rows of up to 16 bytes, each with an
/// offset column, hex bytes, and an ASCII gutter.
pub fn format_range(data: &[u8], start: usize, end: usize) -> String {
    let start = start.min(data.len());
    let end = end.min(data.len());

    let mut out = String::new();
    let mut row = start;
    while row < end {
        let row_end = (row + 16).min(end);
        let chunk = &data[row..row_end];

        let hex = chunk
            .iter()
            .map(|b| format!("{b:02X}"))
            .collect::<Vec<_>>()
            .join(" ");
        let ascii: String = chunk
            .iter()
            .map(|&b| if (0x20..=0x7E).contains(&b) { b as char } else { '.' })
            .collect();

        out.push_str(&format!("{row:08X}  {hex:<47}  |{ascii}|\n"));
        row = row_end;
    }
    out
}
