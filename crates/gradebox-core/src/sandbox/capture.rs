//! Bounded capture of child output.

use tokio::io::{AsyncRead, AsyncReadExt};

/// Captured stream contents.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Captured {
    pub bytes: Vec<u8>,
    /// More output was produced than the cap allowed
    pub truncated: bool,
}

impl Captured {
    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// Read `reader` to EOF keeping at most `cap` bytes. The remainder is
/// drained and discarded so the child never blocks on a full pipe.
pub async fn read_capped<R>(mut reader: R, cap: usize) -> std::io::Result<Captured>
where
    R: AsyncRead + Unpin,
{
    let mut out = Captured::default();
    let mut chunk = [0u8; 8192];

    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        if out.truncated {
            continue;
        }
        let room = cap.saturating_sub(out.bytes.len());
        if n <= room {
            out.bytes.extend_from_slice(&chunk[..n]);
        } else {
            out.bytes.extend_from_slice(&chunk[..room]);
            out.truncated = true;
        }
    }

    Ok(out)
}

const TRUNCATION_MARKER: &str = " [truncated]";

/// Clip `text` to at most `cap` bytes on a char boundary, marking the cut.
pub fn bound_diagnostic(text: &str, cap: usize) -> String {
    if text.len() <= cap {
        return text.to_string();
    }
    let marker = if cap > TRUNCATION_MARKER.len() {
        TRUNCATION_MARKER
    } else {
        ""
    };
    let mut end = cap - marker.len();
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}{marker}", &text[..end])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn keeps_everything_under_cap() {
        let data = b"hello world".to_vec();
        let got = read_capped(&data[..], 64).await.unwrap();
        assert_eq!(got.bytes, data);
        assert!(!got.truncated);
    }

    #[tokio::test]
    async fn drains_past_cap() {
        let data = vec![b'x'; 100_000];
        let got = read_capped(&data[..], 10).await.unwrap();
        assert_eq!(got.bytes.len(), 10);
        assert!(got.truncated);
    }

    #[test]
    fn diagnostic_is_bounded_on_char_boundary() {
        let text = "ééééééééééé";
        let out = bound_diagnostic(text, 16);
        assert!(out.len() <= 16);
        assert!(out.ends_with("[truncated]"));

        assert_eq!(bound_diagnostic("short", 16), "short");
    }

    #[test]
    fn tiny_cap_has_no_marker() {
        assert_eq!(bound_diagnostic("abcdef", 3), "abc");
    }
}
