use std::path::{Path, PathBuf};

use async_stream::stream;
use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use crate::{AdapterError, ChunkStream, EventProvider, PayloadChunk};

/// Replays `*.json` documents from a directory in filename order.
#[derive(Debug, Clone)]
pub struct FixtureProvider {
    dir: PathBuf,
}

impl FixtureProvider {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self, AdapterError> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(AdapterError::Configuration(format!(
                "fixtures directory {} does not exist",
                dir.display()
            )));
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl EventProvider for FixtureProvider {
    fn provider_name(&self) -> &'static str {
        "fixtures"
    }

    fn fetch(&self) -> ChunkStream<'_> {
        Box::pin(stream! {
            let paths = match json_paths(&self.dir).await {
                Ok(paths) => paths,
                Err(err) => {
                    yield Err(err);
                    return;
                }
            };
            debug!(dir = %self.dir.display(), files = paths.len(), "replaying fixtures");

            for path in paths {
                match read_chunk(&path).await {
                    Ok(Some(chunk)) => {
                        yield Ok(chunk);
                    }
                    Ok(None) => {}
                    Err(err) => {
                        yield Err(err);
                        return;
                    }
                }
            }
        })
    }
}

async fn json_paths(dir: &Path) -> Result<Vec<PathBuf>, AdapterError> {
    let mut entries = tokio::fs::read_dir(dir)
        .await
        .map_err(|e| fixture_error(dir, e))?;
    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(|e| fixture_error(dir, e))? {
        let path = entry.path();
        let is_json = path.extension().is_some_and(|ext| ext == "json");
        if is_json && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

async fn read_chunk(path: &Path) -> Result<Option<PayloadChunk>, AdapterError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| fixture_error(path, e))?;
    let document: JsonValue = serde_json::from_str(&text).map_err(|e| fixture_error(path, e))?;
    match document {
        JsonValue::Object(chunk) => Ok(Some(chunk)),
        _ => {
            warn!(path = %path.display(), "skipping fixture that is not a JSON object");
            Ok(None)
        }
    }
}

fn fixture_error(path: &Path, err: impl std::fmt::Display) -> AdapterError {
    AdapterError::Fixture {
        path: path.to_path_buf(),
        message: err.to_string(),
    }
}
