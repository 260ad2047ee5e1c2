//! Local file helpers.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::error::PlatformError;

/// Copy `src` to `dst`, refusing anything that is not a regular file.
pub fn copy_regular_file(src: &Path, dst: &Path) -> Result<(), PlatformError> {
    let meta = fs::metadata(src)?;
    if !meta.is_file() {
        return Err(PlatformError::NotRegularFile {
            path: src.to_path_buf(),
        });
    }

    let bytes = fs::copy(src, dst)?;
    debug!(src = %src.display(), dst = %dst.display(), bytes, "Copied file");
    Ok(())
}
