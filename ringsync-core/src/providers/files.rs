use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;

use crate::error::{Error, Result};
use crate::providers::types::{ObjectStore, SecretProvider};

#[derive(Debug, Clone)]
pub struct FsObjectStore {
    root: PathBuf,
}

impl FsObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn object_path(&self, bucket: &str, key: &str) -> Result<PathBuf> {
        let relative = Path::new(bucket).join(key);
        if relative
            .components()
            .any(|component| !matches!(component, Component::Normal(_)))
        {
            return Err(Error::Validation(format!(
                "object path '{bucket}/{key}' escapes the object root"
            )));
        }
        Ok(self.root.join(relative))
    }
}

#[async_trait]
impl ObjectStore for FsObjectStore {
    async fn get_object(&self, bucket: &str, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.object_path(bucket, key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Error::Provider(format!(
                "failed to read object '{}': {err}",
                path.display()
            ))),
        }
    }
}

/// Managed secrets kept in a JSON file mapping secret id to its secret
/// string. The file is re-read on every lookup so rotations apply without a
/// restart.
#[derive(Debug, Clone)]
pub struct FileSecrets {
    path: PathBuf,
}

impl FileSecrets {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    async fn load(&self) -> Result<HashMap<String, Value>> {
        let content = match tokio::fs::read_to_string(&self.path).await {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(HashMap::new()),
            Err(err) => {
                return Err(Error::Provider(format!(
                    "failed to read secrets file '{}': {err}",
                    self.path.display()
                )))
            }
        };
        serde_json::from_str(&content).map_err(|err| {
            Error::Provider(format!(
                "secrets file '{}' is not a JSON object: {err}",
                self.path.display()
            ))
        })
    }
}

#[async_trait]
impl SecretProvider for FileSecrets {
    async fn get_secret(&self, id: &str) -> Result<Option<String>> {
        let secrets = self.load().await?;
        Ok(secrets.get(id).map(|secret| match secret {
            Value::String(secret) => secret.clone(),
            other => other.to_string(),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir() -> PathBuf {
        std::env::temp_dir().join(format!("ringsync-files-{}", uuid::Uuid::new_v4()))
    }

    #[tokio::test]
    async fn reads_objects_below_the_root() {
        let root = scratch_dir();
        std::fs::create_dir_all(root.join("certs/web")).expect("create dirs");
        std::fs::write(root.join("certs/web/cert.pem"), "pem").expect("write object");

        let store = FsObjectStore::new(&root);
        let found = store.get_object("certs", "web/cert.pem").await.expect("readable");
        let missing = store.get_object("certs", "web/none.pem").await.expect("readable");
        let escaping = store.get_object("certs", "../../etc/passwd").await;
        std::fs::remove_dir_all(&root).ok();

        assert_eq!(found.as_deref(), Some(b"pem".as_slice()));
        assert!(missing.is_none());
        assert!(matches!(escaping, Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn secrets_file_maps_ids_to_secret_strings() {
        let dir = scratch_dir();
        std::fs::create_dir_all(&dir).expect("create dir");
        let path = dir.join("secrets.json");
        std::fs::write(&path, r#"{"db-pass": "{\"password\":\"pw\"}", "n": 5}"#)
            .expect("write secrets");

        let secrets = FileSecrets::new(&path);
        let db = secrets.get_secret("db-pass").await.expect("readable");
        let number = secrets.get_secret("n").await.expect("readable");
        let missing = secrets.get_secret("other").await.expect("readable");
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(db.as_deref(), Some(r#"{"password":"pw"}"#));
        assert_eq!(number.as_deref(), Some("5"));
        assert!(missing.is_none());
    }
}
