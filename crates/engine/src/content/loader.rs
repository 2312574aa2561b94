use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::info;

use super::StageData;

const INLINE_SOURCE: &str = "<inline>";

#[derive(Debug, Error)]
pub enum ContentError {
    #[error("failed to read stage file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse stage {origin} at {json_path}: {source}")]
    Parse {
        origin: String,
        json_path: String,
        #[source]
        source: serde_json::Error,
    },
}

pub fn load_stage_file(path: &Path) -> Result<StageData, ContentError> {
    let raw = fs::read_to_string(path).map_err(|source| ContentError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let data = parse_stage_json(&raw, &path.display().to_string())?;
    info!(
        path = %path.display(),
        name = data.name.as_str(),
        tiles = data.tiles.len(),
        entities = data.entities.len(),
        instances = data.instances.len(),
        "stage_file_loaded"
    );
    Ok(data)
}

pub fn parse_stage_str(raw: &str) -> Result<StageData, ContentError> {
    parse_stage_json(raw, INLINE_SOURCE)
}

fn parse_stage_json(raw: &str, origin: &str) -> Result<StageData, ContentError> {
    let mut deserializer = serde_json::Deserializer::from_str(raw);
    serde_path_to_error::deserialize::<_, StageData>(&mut deserializer).map_err(|error| {
        let json_path = error.path().to_string();
        ContentError::Parse {
            origin: origin.to_string(),
            json_path: if json_path.is_empty() {
                ".".to_string()
            } else {
                json_path
            },
            source: error.into_inner(),
        }
    })
}
