//! Properties codec: the `k=v` line format of snapshot metadata files.
//!
//! One property per line, split at the first `=`, whitespace trimmed
//! around key and value. No escaping, no comments; malformed lines are
//! dropped on read.

use std::io::ErrorKind;
use std::path::Path;

use tokio::fs;

use kozane_core::{types::Meta, Error, Result};

/// Read a properties file. A missing file is an empty map, not an error.
pub(crate) async fn read_props(path: &Path) -> Result<Meta> {
    let data = match fs::read(path).await {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Meta::new()),
        Err(e) => return Err(Error::io(format!("reading meta file '{}'", path.display()), e)),
    };

    let mut props = Meta::new();
    for line in String::from_utf8_lossy(&data).lines() {
        match line.find('=') {
            // The key must be non-empty; `=` inside the value is preserved.
            Some(idx) if idx > 0 => {
                let key = line[..idx].trim();
                let value = line[idx + 1..].trim();
                props.insert(key.to_string(), value.to_string());
            }
            _ => {}
        }
    }
    Ok(props)
}

/// Write a properties file, creating the parent directory on demand.
pub(crate) async fn write_props(path: &Path, props: &Meta) -> Result<()> {
    let mut buf = String::new();
    for (key, value) in props {
        buf.push_str(key);
        buf.push('=');
        buf.push_str(value);
        buf.push('\n');
    }

    match fs::write(path, buf.as_bytes()).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)
                    .await
                    .map_err(|e| Error::io("creating meta directory", e))?;
            }
            fs::write(path, buf.as_bytes())
                .await
                .map_err(|e| Error::io(format!("writing meta file '{}'", path.display()), e))
        }
        Err(e) => Err(Error::io(format!("writing meta file '{}'", path.display()), e)),
    }
}
