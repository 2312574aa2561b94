mod asset_keys;
mod assets;
mod loader;
mod types;

pub use asset_keys::AssetKeyError;
pub use assets::{
    referenced_image_ids, AssetError, AssetErrorCallback, AssetProvider, ImageAssets, SoundHandle,
    SoundSink,
};
pub use loader::{load_stage_file, parse_stage_str, ContentError};
pub use types::{
    BoundingBox, EntityDescriptor, FrameDescriptor, InstanceDescriptor, LayerMap, Offset,
    StageData, StageId, TileDescriptor,
};
