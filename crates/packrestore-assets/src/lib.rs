mod assets_file;
mod imports;
mod msbuild;
mod no_op;
mod outputs;
mod tools;

pub use assets_file::{
    AssetsFile, Empty, LibraryEntry, LogEntry, ProjectSection, RestoreSection, TargetEntry,
    ASSETS_FILE_VERSION, LOCK_FILE_VERSION,
};
pub use imports::{import_groups, ImportGroup, ImportKind};
pub use msbuild::{render_props, render_targets, write_msbuild_files};
pub use no_op::{is_no_op, record_restore, restore_inputs_hash, RestoreCacheFile};
pub use outputs::{write_if_changed, AssetsFormat, ProjectOutputs};
pub use tools::tool_assets_path;
