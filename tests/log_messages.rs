//! Log lines read as sentences: every tracing message starts with a capital.

use std::fs;
use std::path::{Path, PathBuf};

const MACROS: &[&str] = &["trace!(", "debug!(", "info!(", "warn!(", "error!("];

fn sources(dir: &Path, out: &mut Vec<PathBuf>) {
    for entry in fs::read_dir(dir).unwrap() {
        let path = entry.unwrap().path();
        if path.is_dir() {
            sources(&path, out);
        } else if path.extension().is_some_and(|ext| ext == "rs") {
            out.push(path);
        }
    }
}

/// The message literal of a macro call: the string literal that closes it.
fn message(call: &str) -> Option<&str> {
    let close = call.match_indices('"').map(|(i, _)| i).find(|&i| {
        call[i + 1..]
            .trim_start()
            .trim_start_matches(',')
            .trim_start()
            .starts_with(')')
    })?;
    let open = call[..close].rfind('"')?;
    Some(&call[open + 1..close])
}

#[test]
fn test_log_messages_are_capitalized() {
    let mut files = Vec::new();
    sources(&Path::new(env!("CARGO_MANIFEST_DIR")).join("src"), &mut files);

    let mut offenders = Vec::new();
    for file in files {
        let text = fs::read_to_string(&file).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        for (i, line) in lines.iter().enumerate() {
            if !MACROS.iter().any(|m| line.contains(m)) {
                continue;
            }
            let call = lines[i..lines.len().min(i + 8)].join("\n");
            let Some(message) = message(&call) else {
                continue;
            };
            if message.chars().next().is_some_and(char::is_lowercase) {
                offenders.push(format!("{}:{}: {message}", file.display(), i + 1));
            }
        }
    }
    assert!(offenders.is_empty(), "lowercase log messages:\n{}", offenders.join("\n"));
}
