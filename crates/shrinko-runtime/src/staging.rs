use crate::error::RuntimeError;
use crate::vfs::{MemFs, join_path, parent_dir};

/// One caller-supplied file, addressed relative to the working root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualFile {
    pub path: String,
    pub data: Vec<u8>,
}

impl VirtualFile {
    pub fn new(path: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            data: data.into(),
        }
    }
}

/// Replace the working subtree at `root` with exactly `files` and return the
/// path of `main` inside it.
///
/// Anything left under `root` by an earlier call is removed first, so two
/// stagings never see each other's files.
pub fn stage(
    fs: &mut MemFs,
    root: &str,
    files: &[VirtualFile],
    main: &str,
) -> Result<String, RuntimeError> {
    for file in files {
        check_relative(&file.path)?;
    }
    check_relative(main)?;

    if fs.exists(root) {
        clear_dir(fs, root)?;
    }

    for file in files {
        let path = join_path(root, &file.path);
        create_parents(fs, &path)?;
        fs.write(&path, file.data.clone())?;
    }

    tracing::debug!(root, files = files.len(), main, "Working set staged");
    Ok(join_path(root, main))
}

/// Delete everything under `path`, leaving `path` itself in place.
fn clear_dir(fs: &mut MemFs, path: &str) -> Result<(), RuntimeError> {
    for name in fs.list(path)? {
        let child = join_path(path, &name);
        if fs.stat(&child)?.is_directory {
            clear_dir(fs, &child)?;
        }
        fs.delete(&child)?;
    }
    Ok(())
}

/// Create the missing ancestors of `path`, outermost first.
fn create_parents(fs: &mut MemFs, path: &str) -> Result<(), RuntimeError> {
    let info = fs.analyze(path);
    if !info.exists
        && !info.parent_exists
        && let Some(parent) = parent_dir(path)
    {
        create_parents(fs, parent)?;
        fs.mkdir(parent)?;
    }
    Ok(())
}

fn check_relative(path: &str) -> Result<(), RuntimeError> {
    let bad = path.is_empty()
        || path.starts_with('/')
        || path
            .split('/')
            .any(|segment| segment.is_empty() || segment == "." || segment == "..");
    if bad {
        return Err(RuntimeError::InvalidPath(path.to_string()));
    }
    Ok(())
}
