//! Trial-decode encoding detection for Chinese text files.
//!
//! The detector trial-decodes a bounded prefix of one sample file against a fixed
//! candidate list and commits to the first encoding that decodes it cleanly.
//! The decision is made once per detector and reused for every later file.

use std::cell::OnceCell;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use encoding_rs::{DecoderResult, Encoding, GB18030, GBK, UTF_8};
use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Bytes read from the sample file, roughly 1000 CJK characters.
pub const SAMPLE_BYTES: usize = 3000;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Gbk,
    Gb18030,
    /// Decoded with the GBK decoder, which is a superset.
    Gb2312,
}

impl TextEncoding {
    /// Trial order.
    pub const CANDIDATES: [TextEncoding; 4] = [
        TextEncoding::Utf8,
        TextEncoding::Gbk,
        TextEncoding::Gb18030,
        TextEncoding::Gb2312,
    ];

    pub fn label(self) -> &'static str {
        match self {
            TextEncoding::Utf8 => "utf-8",
            TextEncoding::Gbk => "gbk",
            TextEncoding::Gb18030 => "gb18030",
            TextEncoding::Gb2312 => "gb2312",
        }
    }

    fn encoding(self) -> &'static Encoding {
        match self {
            TextEncoding::Utf8 => UTF_8,
            TextEncoding::Gbk | TextEncoding::Gb2312 => GBK,
            TextEncoding::Gb18030 => GB18030,
        }
    }

    /// Decode `bytes` strictly; `None` on any malformed sequence.
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        let bytes = match self {
            TextEncoding::Utf8 => bytes.strip_prefix(UTF8_BOM).unwrap_or(bytes),
            _ => bytes,
        };
        self.encoding()
            .decode_without_bom_handling_and_without_replacement(bytes)
            .map(|text| text.into_owned())
    }

    /// Whether `prefix` decodes cleanly. When `truncated` is set the prefix
    /// was cut from a longer file, so an incomplete trailing sequence is
    /// accepted.
    fn accepts(self, prefix: &[u8], truncated: bool) -> bool {
        let mut decoder = self.encoding().new_decoder_without_bom_handling();
        let Some(capacity) = decoder.max_utf8_buffer_length_without_replacement(prefix.len())
        else {
            return false;
        };
        let mut out = String::with_capacity(capacity);
        let (result, _read) =
            decoder.decode_to_string_without_replacement(prefix, &mut out, !truncated);
        matches!(result, DecoderResult::InputEmpty)
    }
}

impl std::fmt::Display for TextEncoding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// First candidate that decodes `prefix` without error.
pub fn sniff(prefix: &[u8], truncated: bool) -> Option<TextEncoding> {
    let prefix = prefix.strip_prefix(UTF8_BOM).unwrap_or(prefix);
    TextEncoding::CANDIDATES
        .into_iter()
        .find(|enc| enc.accepts(prefix, truncated))
}

/// Read and strictly decode a whole file.
pub fn decode_file(path: &Path, encoding: TextEncoding) -> Result<String> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    encoding.decode(&bytes).ok_or_else(|| Error::Decode {
        path: path.to_path_buf(),
        encoding: encoding.label().to_string(),
    })
}

/// Caches one encoding decision for the lifetime of its owner.
#[derive(Debug, Default)]
pub struct EncodingDetector {
    committed: OnceCell<TextEncoding>,
}

impl EncodingDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// The committed encoding, probing `sample` on first use only.
    ///
    /// Never fails: an unreadable sample or a prefix no candidate accepts
    /// falls back to UTF-8 with a warning.
    pub fn detect(&self, sample: Option<&Path>) -> TextEncoding {
        *self.committed.get_or_init(|| match sample {
            Some(path) => sniff_file(path),
            None => {
                warn!("no sample file for encoding detection, assuming utf-8");
                TextEncoding::Utf8
            }
        })
    }

    pub fn committed(&self) -> Option<TextEncoding> {
        self.committed.get().copied()
    }
}

fn sniff_file(path: &Path) -> TextEncoding {
    let prefix = match read_prefix(path) {
        Ok(p) => p,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "cannot sample file, assuming utf-8");
            return TextEncoding::Utf8;
        }
    };
    let truncated = prefix.len() == SAMPLE_BYTES;
    match sniff(&prefix, truncated) {
        Some(enc) => {
            debug!(path = %path.display(), encoding = %enc, "detected encoding");
            enc
        }
        None => {
            warn!(path = %path.display(), "no candidate encoding fits, assuming utf-8");
            TextEncoding::Utf8
        }
    }
}

fn read_prefix(path: &Path) -> std::io::Result<Vec<u8>> {
    let mut buf = Vec::with_capacity(SAMPLE_BYTES);
    File::open(path)?
        .take(SAMPLE_BYTES as u64)
        .read_to_end(&mut buf)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gbk_bytes(s: &str) -> Vec<u8> {
        let (bytes, _, had_errors) = GBK.encode(s);
        assert!(!had_errors);
        bytes.into_owned()
    }

    // ── sniff ────────────────────────────────────────────────────────

    #[test]
    fn test_sniff_utf8() {
        let text = "第一部 风起\n第一章 开端\n他推开了门。\n";
        assert_eq!(sniff(text.as_bytes(), false), Some(TextEncoding::Utf8));
    }

    #[test]
    fn test_sniff_gbk() {
        let bytes = gbk_bytes("第一章 开端\n他推开了门。\n");
        assert_eq!(sniff(&bytes, false), Some(TextEncoding::Gbk));
    }

    #[test]
    fn test_sniff_accepts_cut_multibyte_sequence_when_truncated() {
        let text = "第一章 开端";
        let bytes = text.as_bytes();
        // cut inside the last three-byte character
        let cut = &bytes[..bytes.len() - 1];
        assert_eq!(sniff(cut, true), Some(TextEncoding::Utf8));
    }

    #[test]
    fn test_sniff_rejects_garbage() {
        assert_eq!(sniff(&[0xFF, 0xFF, 0xFF, 0xFF], false), None);
    }

    // ── decode ───────────────────────────────────────────────────────

    #[test]
    fn test_decode_strips_utf8_bom() {
        let mut bytes = UTF8_BOM.to_vec();
        bytes.extend_from_slice("正文".as_bytes());
        assert_eq!(TextEncoding::Utf8.decode(&bytes).as_deref(), Some("正文"));
    }

    #[test]
    fn test_decode_gbk_round_trip() {
        let bytes = gbk_bytes("林深见鹿");
        assert_eq!(TextEncoding::Gbk.decode(&bytes).as_deref(), Some("林深见鹿"));
        assert_eq!(TextEncoding::Gb2312.decode(&bytes).as_deref(), Some("林深见鹿"));
    }

    #[test]
    fn test_decode_file_reports_decode_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, [0x61, 0xFF, 0x62]).unwrap();
        let err = decode_file(&path, TextEncoding::Utf8).unwrap_err();
        assert!(matches!(err, Error::Decode { .. }));
    }

    #[test]
    fn test_decode_file_missing_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = decode_file(&dir.path().join("nope.txt"), TextEncoding::Utf8).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    // ── EncodingDetector ─────────────────────────────────────────────

    #[test]
    fn test_detector_commits_once() {
        let dir = tempfile::tempdir().unwrap();
        let gbk = dir.path().join("gbk.txt");
        let utf8 = dir.path().join("utf8.txt");
        std::fs::write(&gbk, gbk_bytes("第一章 开端\n")).unwrap();
        std::fs::write(&utf8, "第二章 继续\n").unwrap();

        let detector = EncodingDetector::new();
        assert_eq!(detector.committed(), None);
        assert_eq!(detector.detect(Some(&gbk)), TextEncoding::Gbk);
        // second call ignores the new sample
        assert_eq!(detector.detect(Some(&utf8)), TextEncoding::Gbk);
        assert_eq!(detector.committed(), Some(TextEncoding::Gbk));
    }

    #[test]
    fn test_detector_falls_back_to_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let junk = dir.path().join("junk.bin");
        std::fs::write(&junk, [0xFF; 16]).unwrap();
        assert_eq!(EncodingDetector::new().detect(Some(&junk)), TextEncoding::Utf8);
        assert_eq!(
            EncodingDetector::new().detect(Some(&dir.path().join("missing.txt"))),
            TextEncoding::Utf8
        );
        assert_eq!(EncodingDetector::new().detect(None), TextEncoding::Utf8);
    }

    #[test]
    fn test_detector_reads_only_prefix() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("long.txt");
        // valid prefix, garbage well past the sample window
        let mut bytes = "字".repeat(SAMPLE_BYTES).into_bytes();
        bytes.extend_from_slice(&[0xFF, 0xFF]);
        std::fs::write(&path, bytes).unwrap();
        assert_eq!(EncodingDetector::new().detect(Some(&path)), TextEncoding::Utf8);
    }
}
