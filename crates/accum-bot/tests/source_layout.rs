//! Keeps the workspace sources within the 100-column width used by rustfmt.

use std::fs;
use std::path::{Path, PathBuf};

const MAX_WIDTH: usize = 100;

fn rust_files(dir: &Path, out: &mut Vec<PathBuf>) {
    let Ok(entries) = fs::read_dir(dir) else {
        return;
    };
    for entry in entries.flatten() {
        let path = entry.path();
        if path.is_dir() {
            if path.file_name().is_some_and(|n| n == "target") {
                continue;
            }
            rust_files(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

#[test]
fn test_no_line_exceeds_max_width() {
    let crates_dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("..");
    let mut files = Vec::new();
    rust_files(&crates_dir, &mut files);
    assert!(!files.is_empty());

    let mut long_lines = Vec::new();
    for file in &files {
        let content = fs::read_to_string(file).unwrap();
        for (i, line) in content.lines().enumerate() {
            if line.chars().count() > MAX_WIDTH {
                long_lines.push(format!("{}:{}", file.display(), i + 1));
            }
        }
    }
    assert!(long_lines.is_empty(), "lines over {} columns: {:?}", MAX_WIDTH, long_lines);
}
