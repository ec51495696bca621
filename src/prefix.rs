//! Prefixing stream: every output line gets a (possibly colored, padded)
//! host tag inserted immediately after each newline — never before the
//! first line. Width is measured in display columns via `unicode-width` so
//! wide characters don't throw off alignment, matching the Go original's use
//! of `runewidth.StringWidth`. Coloring hashes the padded prefix into a
//! small fixed palette, following teacher's `progress.rs` `task_color`.

use colored::{Color, Colorize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use unicode_width::UnicodeWidthStr;

const PALETTE: &[Color] = &[
    Color::Cyan,
    Color::Magenta,
    Color::Yellow,
    Color::Blue,
];

/// Deterministic color assignment given a (padded) prefix string.
pub fn color_for(prefix: &str) -> Color {
    let sum: usize = prefix.bytes().map(|b| b as usize).sum();
    PALETTE[sum % PALETTE.len()]
}

/// Left-pad every name to the display-column width of the widest one, then
/// append the `" | "` separator the original source uses for its prefix.
pub fn align(names: &[String]) -> Vec<String> {
    let width = names
        .iter()
        .map(|n| UnicodeWidthStr::width(n.as_str()))
        .max()
        .unwrap_or(0);
    names
        .iter()
        .map(|n| {
            let pad = width.saturating_sub(UnicodeWidthStr::width(n.as_str()));
            format!("{}{} | ", " ".repeat(pad), n)
        })
        .collect()
}

/// Insert `prefix` immediately after every newline in `data`. `pending`
/// carries whether the *next* byte is due a prefix because the previous
/// chunk ended right after a newline — callers hold one `pending` flag per
/// logical stream across repeated calls. The first line of a stream never
/// gets a leading prefix.
pub fn apply_prefix(data: &[u8], prefix: &[u8], pending: &mut bool) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + prefix.len());
    for &b in data {
        if *pending {
            out.extend_from_slice(prefix);
            *pending = false;
        }
        out.push(b);
        if b == b'\n' {
            *pending = true;
        }
    }
    out
}

/// Copy `reader` to `writer`, inserting `prefix` (colored per [`color_for`])
/// after every newline. Used for the executor's stdout/stderr copiers in
/// debug mode.
pub async fn copy_with_prefix<R, W>(
    mut reader: R,
    mut writer: W,
    prefix: &str,
) -> std::io::Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let colored_prefix = prefix.color(color_for(prefix)).to_string();
    let mut buf = [0u8; 8192];
    let mut pending = false;
    loop {
        let n = reader.read(&mut buf).await?;
        if n == 0 {
            break;
        }
        let transformed = apply_prefix(&buf[..n], colored_prefix.as_bytes(), &mut pending);
        writer.write_all(&transformed).await?;
    }
    writer.flush().await
}
