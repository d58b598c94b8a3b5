//! Writing extracted documents to disk.

use crate::{ExtractorError, Result};
use serde::de::IgnoredAny;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

const INDENT: &[u8] = b"\t";

/// Pretty-prints `raw` as tab-indented JSON into `dir/name`.
///
/// Creates `dir` and its parents when missing and replaces any existing file.
/// Only the final component of `name` is used.
pub fn write_json(dir: &Path, name: &str, raw: &[u8]) -> Result<PathBuf> {
    info!(output_directory = %dir.display(), file = name, "Writing file");

    fs::create_dir_all(dir).map_err(|source| ExtractorError::WriteFailed {
        path: dir.to_path_buf(),
        source,
    })?;

    let pretty = pretty_print(name, raw)?;

    let file_name = Path::new(name)
        .file_name()
        .ok_or_else(|| ExtractorError::ConfigError(format!("Invalid file name: {}", name)))?;
    let path = dir.join(file_name);

    write_file(&path, &pretty).map_err(|source| ExtractorError::WriteFailed {
        path: path.clone(),
        source,
    })?;

    Ok(path)
}

/// Re-indents `raw` the way `encoding/json.Indent` does.
///
/// Only whitespace between tokens changes. String and number tokens are
/// copied byte for byte, so escapes like `\u003c` and exponents survive.
/// Empty objects and arrays stay on one line.
fn pretty_print(name: &str, raw: &[u8]) -> Result<Vec<u8>> {
    serde_json::from_slice::<IgnoredAny>(raw).map_err(|source| ExtractorError::InvalidJson {
        name: name.to_string(),
        source,
    })?;

    let mut out = Vec::with_capacity(raw.len() + raw.len() / 4);
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    let mut opened = false;

    for &byte in raw {
        if in_string {
            out.push(byte);
            if escaped {
                escaped = false;
            } else if byte == b'\\' {
                escaped = true;
            } else if byte == b'"' {
                in_string = false;
            }
            continue;
        }

        if matches!(byte, b' ' | b'\t' | b'\n' | b'\r') {
            continue;
        }

        // Newline after `{` or `[` is deferred until the container proves non-empty.
        if opened && byte != b'}' && byte != b']' {
            opened = false;
            depth += 1;
            newline(&mut out, depth);
        }

        match byte {
            b'"' => {
                in_string = true;
                out.push(byte);
            }
            b'{' | b'[' => {
                out.push(byte);
                opened = true;
            }
            b'}' | b']' => {
                if opened {
                    opened = false;
                } else {
                    depth = depth.saturating_sub(1);
                    newline(&mut out, depth);
                }
                out.push(byte);
            }
            b',' => {
                out.push(byte);
                newline(&mut out, depth);
            }
            b':' => out.extend_from_slice(b": "),
            _ => out.push(byte),
        }
    }

    Ok(out)
}

fn newline(out: &mut Vec<u8>, depth: usize) {
    out.push(b'\n');
    for _ in 0..depth {
        out.extend_from_slice(INDENT);
    }
}

fn write_file(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(path)?;
    file.write_all(contents)?;
    file.sync_all()
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAYLOAD: &str = r#"{"swagger":"2.0","info":{"title":"Kubernetes","version":"v1.30.0"},"paths":{"/apis/":{"get":{"operationId":"getAPIVersions"}}},"definitions":{"z":1,"a":[true,null,1.5]}}"#;

    #[test]
    fn test_write_json_creates_directories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tmp.path().join("nested").join("v3");

        let path = write_json(&dir, "swagger.json", PAYLOAD.as_bytes()).unwrap();

        assert_eq!(path, dir.join("swagger.json"));
        let written = fs::read_to_string(&path).unwrap();
        assert!(written.starts_with("{\n\t\"swagger\": \"2.0\""));
        assert!(written.contains("\n\t\t\"title\": \"Kubernetes\""));
    }

    /// Drops whitespace outside string tokens.
    fn compact(pretty: &str) -> String {
        let mut out = String::with_capacity(pretty.len());
        let mut in_string = false;
        let mut escaped = false;
        for c in pretty.chars() {
            if in_string {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == '"' {
                    in_string = false;
                }
            } else if c == '"' {
                in_string = true;
            } else if c.is_ascii_whitespace() {
                continue;
            }
            out.push(c);
        }
        out
    }

    fn round_trip(payload: &str) -> String {
        let tmp = tempfile::tempdir().unwrap();
        let path = write_json(tmp.path(), "swagger.json", payload.as_bytes()).unwrap();
        fs::read_to_string(path).unwrap()
    }

    #[test]
    fn test_write_json_compacts_back_to_input() {
        assert_eq!(compact(&round_trip(PAYLOAD)), PAYLOAD);
    }

    #[test]
    fn test_write_json_keeps_escapes_verbatim() {
        let payload = r#"{"description":"GET /apis/\u003cgroup\u003e \u0026 more \"quoted\" {x}, [y]: z\\"}"#;

        let written = round_trip(payload);

        assert_eq!(compact(&written), payload);
        assert!(written.contains(r#""description": "GET /apis/\u003cgroup\u003e \u0026 more"#));
    }

    #[test]
    fn test_write_json_keeps_number_tokens_verbatim() {
        let payload = r#"{"max":1e3,"n":1e400,"big":123456789012345678901234567890,"f":-0.10}"#;

        let written = round_trip(payload);

        assert_eq!(compact(&written), payload);
        assert!(written.contains("\"max\": 1e3"));
        assert!(written.contains("\"n\": 1e400"));
    }

    #[test]
    fn test_write_json_indents_with_tabs() {
        let written = round_trip(r#" {"a": {}, "b": [ ], "c": [1, {"d": null}]} "#);

        assert_eq!(
            written,
            "{\n\t\"a\": {},\n\t\"b\": [],\n\t\"c\": [\n\t\t1,\n\t\t{\n\t\t\t\"d\": null\n\t\t}\n\t]\n}"
        );
    }

    #[test]
    fn test_write_json_overwrites_existing_file() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("swagger.json"), "stale contents that are longer").unwrap();

        write_json(tmp.path(), "swagger.json", b"{}").unwrap();

        assert_eq!(
            fs::read_to_string(tmp.path().join("swagger.json")).unwrap(),
            "{}"
        );
    }

    #[test]
    fn test_write_json_rejects_malformed_payload() {
        let tmp = tempfile::tempdir().unwrap();

        let err = write_json(tmp.path(), "swagger.json", b"{\"swagger\":").unwrap_err();

        assert!(matches!(err, ExtractorError::InvalidJson { .. }));
        assert!(!tmp.path().join("swagger.json").exists());
    }

    #[test]
    fn test_write_json_strips_directory_components() {
        let tmp = tempfile::tempdir().unwrap();

        let path = write_json(tmp.path(), "../escape.json", b"[]").unwrap();

        assert_eq!(path, tmp.path().join("escape.json"));
    }
}
