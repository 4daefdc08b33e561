use std::collections::BTreeMap;
use std::path::Path;

use crate::error::{Error, Result};
use crate::schema::Schema;

pub type SchemaSet = BTreeMap<String, Schema>;

/// Loads every `*.toml` file in `dir` as the schema of the service named by
/// its file stem. A file that fails to read or parse is logged and skipped;
/// it never prevents the remaining schemas from loading.
pub fn load_schemas(dir: &Path) -> Result<SchemaSet> {
    let entries = std::fs::read_dir(dir).map_err(|err| {
        Error::Config(format!("failed to read schema dir '{}': {err}", dir.display()))
    })?;

    let mut schemas = SchemaSet::new();
    for entry in entries {
        let path = entry?.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some("toml") {
            continue;
        }
        let Some(service) = path.file_stem().and_then(|stem| stem.to_str()) else {
            continue;
        };

        let loaded = std::fs::read_to_string(&path)
            .map_err(Error::from)
            .and_then(|content| Schema::from_toml_str(&content));
        match loaded {
            Ok(schema) => {
                tracing::debug!(service, path = %path.display(), "loaded schema");
                schemas.insert(service.to_owned(), schema);
            }
            Err(err) => {
                tracing::warn!(%err, path = %path.display(), "skipping invalid schema file");
            }
        }
    }

    Ok(schemas)
}

#[cfg(test)]
mod tests {
    use super::load_schemas;

    #[test]
    fn loads_valid_schemas_and_skips_broken_ones() {
        let dir = std::env::temp_dir().join(format!("ringsync-schemas-{}", uuid::Uuid::new_v4()));
        std::fs::create_dir_all(&dir).expect("create temp dir");
        std::fs::write(
            dir.join("reticulum.toml"),
            "[db.port]\ntype = \"number\"\ndefault = 5432\n",
        )
        .expect("write schema");
        std::fs::write(dir.join("broken.toml"), "[db]\nport = 5432\n").expect("write schema");
        std::fs::write(dir.join("notes.txt"), "not a schema").expect("write file");

        let schemas = load_schemas(&dir).expect("dir is readable");
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(schemas.keys().collect::<Vec<_>>(), vec!["reticulum"]);
        assert!(schemas["reticulum"].descriptor(&["db", "port"]).is_some());
    }

    #[test]
    fn missing_dir_is_a_config_error() {
        let dir = std::env::temp_dir().join(format!("ringsync-missing-{}", uuid::Uuid::new_v4()));
        let error = load_schemas(&dir).expect_err("dir does not exist");
        assert!(error.to_string().contains("schema dir"));
    }
}
