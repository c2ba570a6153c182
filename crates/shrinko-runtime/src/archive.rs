use std::io::{Cursor, Read};

use zip::ZipArchive;

use crate::error::RuntimeError;
use crate::vfs::{MemFs, join_path};

/// Unpack a zip archive into `dest` inside the filesystem.
///
/// Entries whose names would escape `dest` are skipped. Returns the number
/// of files written.
pub fn unpack_zip(fs: &mut MemFs, bytes: &[u8], dest: &str) -> Result<usize, RuntimeError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    let mut written = 0;

    for i in 0..archive.len() {
        let mut entry = archive.by_index(i)?;
        let Some(rel) = entry.enclosed_name() else {
            tracing::warn!(name = entry.name(), "Skipping archive entry outside destination");
            continue;
        };
        let rel = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect::<Vec<_>>()
            .join("/");
        let path = join_path(dest, &rel);

        if entry.is_dir() {
            fs.mkdir_all(&path)?;
            continue;
        }
        if let Some((parent, _)) = path.rsplit_once('/') {
            fs.mkdir_all(parent)?;
        }

        let mut data = Vec::new();
        entry.read_to_end(&mut data)?;
        fs.write(&path, data)?;
        written += 1;
    }

    tracing::debug!(dest, files = written, "Archive unpacked");
    Ok(written)
}
