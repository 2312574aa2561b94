use thiserror::Error;

use super::InstanceId;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    #[error("unknown tile id {0:?}")]
    UnknownTile(String),
    #[error("unknown entity id {0:?}")]
    UnknownEntity(String),
    #[error("unknown instance {0:?}")]
    UnknownInstance(InstanceId),
    #[error("unknown layer {0}")]
    UnknownLayer(i32),
    #[error("unknown view event {0:?}")]
    UnknownEvent(String),
    #[error("instance {0:?} was already removed or replaced")]
    InstanceRemoved(InstanceId),
    #[error("bucket size factor must be >= 1, got {0}")]
    InvalidBucketFactor(f64),
    #[error("viewport must be non-empty, got {width}x{height}")]
    InvalidViewport { width: u32, height: u32 },
    #[error("projection matrix is singular (det = {0})")]
    SingularProjection(f64),
    #[error("synchronizer delay must be in [0, 1), got {0}")]
    InvalidDelay(f64),
}
