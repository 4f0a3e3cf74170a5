//! Binary content detection.

use std::fs::File;
use std::io::Read;
use std::path::Path;

/// How much of a file is sampled.
pub const SAMPLE_BYTES: usize = 8 * 1024;

/// Share of control bytes above which a sample counts as binary.
const CONTROL_RATIO: f64 = 0.30;

/// Classify a byte sample.
///
/// Binary if it contains a NUL byte, or if more than 30% of the bytes are
/// control characters other than tab, LF and CR. Empty input is text.
pub fn is_binary_sample(sample: &[u8]) -> bool {
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let control = sample
        .iter()
        .filter(|&&b| (b < 0x20 && !matches!(b, b'\t' | b'\n' | b'\r')) || b == 0x7f)
        .count();
    control as f64 / sample.len() as f64 > CONTROL_RATIO
}

/// Sample the head of a file and classify it.
///
/// A file that cannot be opened or read counts as binary, so it is dropped
/// rather than failing the scan.
pub fn is_binary_file(path: &Path) -> bool {
    let mut file = match File::open(path) {
        Ok(f) => f,
        Err(_) => return true,
    };
    let mut buf = vec![0u8; SAMPLE_BYTES];
    let mut filled = 0;
    while filled < buf.len() {
        match file.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(_) => return true,
        }
    }
    is_binary_sample(&buf[..filled])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_text_is_not_binary() {
        assert!(!is_binary_sample(b"fn main() {\n\tprintln!(\"hi\");\r\n}\n"));
        assert!(!is_binary_sample(b""));
        assert!(!is_binary_sample("héllo wörld".as_bytes()));
    }

    #[test]
    fn test_nul_byte_is_binary() {
        assert!(is_binary_sample(b"abc\0def"));
    }

    #[test]
    fn test_control_ratio_threshold() {
        // 3 control bytes out of 10 is exactly 30%: still text.
        assert!(!is_binary_sample(b"\x01\x02\x03abcdefg"));
        // 4 out of 10 crosses the threshold.
        assert!(is_binary_sample(b"\x01\x02\x03\x7fabcdef"));
    }

    #[test]
    fn test_classification_is_deterministic() {
        let sample: Vec<u8> = (0u8..=255).cycle().skip(1).take(4096).collect();
        let first = is_binary_sample(&sample);
        for _ in 0..5 {
            assert_eq!(is_binary_sample(&sample), first);
        }
    }

    #[test]
    fn test_missing_file_counts_as_binary() {
        assert!(is_binary_file(Path::new("/definitely/not/here.txt")));
    }

    #[test]
    fn test_only_head_is_sampled() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("late_nul.txt");
        let mut content = vec![b'a'; SAMPLE_BYTES];
        content.push(0);
        std::fs::write(&path, content).unwrap();
        assert!(!is_binary_file(&path));
    }
}
