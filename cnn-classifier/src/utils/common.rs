//! File persistence helpers shared by every stage.
//!
//! Each helper is stateless and propagates the underlying failure.

use crate::errors::{PipelineError, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::path::Path;
use tracing::info;

/// Reads a YAML document into `T`.
///
/// Any failure (missing file, bad syntax, missing key, wrong type) is a
/// [`PipelineError::ConfigLoad`] naming the document.
pub fn read_yaml<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content =
        fs::read_to_string(path).map_err(|e| PipelineError::config(path, e.to_string()))?;
    let value = serde_yaml::from_str(&content)
        .map_err(|e| PipelineError::config(path, e.to_string()))?;
    info!("yaml file: {} loaded successfully", path.display());
    Ok(value)
}

/// Writes `content` as a YAML document, creating parent directories.
pub fn write_yaml<T: Serialize + ?Sized>(path: impl AsRef<Path>, content: &T) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    let text = serde_yaml::to_string(content)
        .map_err(|e| PipelineError::Serialization(e.to_string()))?;
    fs::write(path, text).map_err(|e| PipelineError::io(path, e))?;
    info!("yaml file: {} written successfully", path.display());
    Ok(())
}

/// Saves `data` as pretty-printed JSON (4-space indent).
pub fn save_json<T: Serialize + ?Sized>(path: impl AsRef<Path>, data: &T) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;

    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    data.serialize(&mut ser)?;

    fs::write(path, buf).map_err(|e| PipelineError::io(path, e))?;
    info!("json file: {} saved successfully", path.display());
    Ok(())
}

/// Loads a JSON document into `T`.
pub fn load_json<T: DeserializeOwned>(path: impl AsRef<Path>) -> Result<T> {
    let path = path.as_ref();
    let content = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    let value = serde_json::from_slice(&content)?;
    info!("json file: {} loaded successfully", path.display());
    Ok(value)
}

/// Writes an opaque blob, creating parent directories.
pub fn save_bin(data: impl AsRef<[u8]>, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    ensure_parent(path)?;
    fs::write(path, data.as_ref()).map_err(|e| PipelineError::io(path, e))?;
    info!("binary file: {} saved successfully", path.display());
    Ok(())
}

/// Reads an opaque blob.
pub fn load_bin(path: impl AsRef<Path>) -> Result<Vec<u8>> {
    let path = path.as_ref();
    let data = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    info!("binary file: {} loaded successfully", path.display());
    Ok(data)
}

/// Reports a file size as `"~ N KB"`, rounded to whole kilobytes.
pub fn get_size(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = fs::metadata(path)
        .map_err(|e| PipelineError::io(path, e))?
        .len();
    let size_in_kb = (bytes as f64 / 1024.0).round() as u64;
    info!("File: {} has size: {} KB", path.display(), size_in_kb);
    Ok(format!("~ {size_in_kb} KB"))
}

/// Creates every directory in `paths`. Existing directories are left alone.
pub fn create_directories<P: AsRef<Path>>(paths: &[P]) -> Result<()> {
    for path in paths {
        let path = path.as_ref();
        fs::create_dir_all(path).map_err(|e| PipelineError::io(path, e))?;
        info!("Directory: {} created successfully", path.display());
    }
    Ok(())
}

/// Reads a file and returns its contents as standard base64.
pub fn encode_image_base64(path: impl AsRef<Path>) -> Result<String> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|e| PipelineError::io(path, e))?;
    Ok(STANDARD.encode(bytes))
}

/// Decodes a base64 string and writes the bytes to `out_path`.
pub fn decode_image_base64(encoded: &str, out_path: impl AsRef<Path>) -> Result<()> {
    let out_path = out_path.as_ref();
    let bytes = STANDARD
        .decode(encoded.trim())
        .map_err(|e| PipelineError::Serialization(format!("invalid base64 image data: {e}")))?;
    ensure_parent(out_path)?;
    fs::write(out_path, bytes).map_err(|e| PipelineError::io(out_path, e))
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|e| PipelineError::io(dir, e))
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde::Deserialize;
    use tempfile::tempdir;

    #[test]
    fn test_json_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/scores.json");
        let data = serde_json::json!({
            "loss": 0.25,
            "accuracy": 0.9,
            "labels": ["cyst", "normal"],
            "meta": {"epochs": 3}
        });

        save_json(&path, &data).unwrap();
        let loaded: serde_json::Value = load_json(&path).unwrap();

        assert_eq!(loaded, data);
    }

    #[test]
    fn test_save_json_uses_four_space_indent() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.json");
        save_json(&path, &serde_json::json!({"a": 1})).unwrap();

        let text = fs::read_to_string(&path).unwrap();
        assert!(text.contains("\n    \"a\": 1"));
    }

    #[test]
    fn test_load_json_missing_file() {
        let dir = tempdir().unwrap();
        let err = load_json::<serde_json::Value>(dir.path().join("nope.json")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_bin_round_trip_creates_parents() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("a/b/c/blob.bin");
        let data: Vec<u8> = (0..=255).collect();

        save_bin(&data, &path).unwrap();
        assert_eq!(load_bin(&path).unwrap(), data);
    }

    #[test]
    fn test_base64_round_trip_is_byte_identical() {
        let dir = tempdir().unwrap();
        let source = dir.path().join("scan.png");
        let bytes: Vec<u8> = (0..2048u32).map(|i| (i * 31 % 251) as u8).collect();
        fs::write(&source, &bytes).unwrap();

        let encoded = encode_image_base64(&source).unwrap();
        let out = dir.path().join("decoded/scan.png");
        decode_image_base64(&encoded, &out).unwrap();

        assert_eq!(fs::read(&out).unwrap(), bytes);
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let dir = tempdir().unwrap();
        let err = decode_image_base64("not base64!!", dir.path().join("x.png")).unwrap_err();
        assert_eq!(err.kind(), "SerializationError");
    }

    #[test]
    fn test_get_size_rounds_to_kb() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("data.bin");
        fs::write(&path, vec![0u8; 3 * 1024 + 600]).unwrap();

        assert_eq!(get_size(&path).unwrap(), "~ 4 KB");
    }

    #[test]
    fn test_get_size_missing_file() {
        let dir = tempdir().unwrap();
        let err = get_size(dir.path().join("absent.zip")).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_create_directories_is_idempotent() {
        let dir = tempdir().unwrap();
        let paths = vec![dir.path().join("one"), dir.path().join("two/three")];

        create_directories(&paths).unwrap();
        create_directories(&paths).unwrap();

        assert!(paths.iter().all(|p| p.is_dir()));
    }

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        name: String,
        size: Vec<u32>,
    }

    #[test]
    fn test_yaml_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg/sample.yaml");
        let sample = Sample {
            name: "vgg".to_string(),
            size: vec![224, 224, 3],
        };

        write_yaml(&path, &sample).unwrap();
        let loaded: Sample = read_yaml(&path).unwrap();
        assert_eq!(loaded, sample);
    }

    #[test]
    fn test_read_yaml_malformed_is_config_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        fs::write(&path, "name: [unclosed").unwrap();

        let err = read_yaml::<Sample>(&path).unwrap_err();
        assert_eq!(err.kind(), "ConfigLoadError");
    }
}
