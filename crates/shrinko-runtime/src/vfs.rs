use std::collections::BTreeMap;
use std::path::Path;
use std::str::FromStr;

use crate::error::RuntimeError;

/// How `read_as` should hand back a file's contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Binary,
    Utf8,
}

impl Encoding {
    pub fn as_str(self) -> &'static str {
        match self {
            Encoding::Binary => "binary",
            Encoding::Utf8 => "utf8",
        }
    }
}

impl FromStr for Encoding {
    type Err = RuntimeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "binary" => Ok(Encoding::Binary),
            "utf8" | "utf-8" => Ok(Encoding::Utf8),
            _ => Err(RuntimeError::UnknownEncoding(s.to_string())),
        }
    }
}

/// File contents decoded according to an [`Encoding`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileData {
    Bytes(Vec<u8>),
    Text(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub is_directory: bool,
}

/// Result of [`MemFs::analyze`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PathInfo {
    pub exists: bool,
    pub parent_exists: bool,
}

#[derive(Debug, Clone)]
enum Node {
    File(Vec<u8>),
    Dir(BTreeMap<String, Node>),
}

/// In-process hierarchical byte store the tool reads and writes through.
///
/// Paths are `/`-separated strings. Leading slashes and `.` segments are
/// ignored and `..` steps up (never above the root), so `input.p8`,
/// `/input.p8` and `./input.p8` name the same file.
#[derive(Debug, Clone)]
pub struct MemFs {
    root: Node,
}

impl Default for MemFs {
    fn default() -> Self {
        Self::new()
    }
}

impl MemFs {
    pub fn new() -> Self {
        Self {
            root: Node::Dir(BTreeMap::new()),
        }
    }

    /// Create or overwrite a file. The parent directory must already exist.
    pub fn write(&mut self, path: &str, data: impl Into<Vec<u8>>) -> Result<(), RuntimeError> {
        let (parent, name) = split_last(path)?;
        let dir = self.dir_mut(&parent, path)?;
        match dir.get(&name) {
            Some(Node::Dir(_)) => Err(RuntimeError::IsADirectory(path.to_string())),
            _ => {
                dir.insert(name, Node::File(data.into()));
                Ok(())
            }
        }
    }

    /// Raw contents of a file.
    pub fn read(&self, path: &str) -> Result<Vec<u8>, RuntimeError> {
        match self.node(path)? {
            Node::File(data) => Ok(data.clone()),
            Node::Dir(_) => Err(RuntimeError::IsADirectory(path.to_string())),
        }
    }

    pub fn read_text(&self, path: &str) -> Result<String, RuntimeError> {
        String::from_utf8(self.read(path)?).map_err(|_| RuntimeError::Decode {
            path: path.to_string(),
            encoding: Encoding::Utf8.as_str(),
        })
    }

    pub fn read_as(&self, path: &str, encoding: Encoding) -> Result<FileData, RuntimeError> {
        match encoding {
            Encoding::Binary => self.read(path).map(FileData::Bytes),
            Encoding::Utf8 => self.read_text(path).map(FileData::Text),
        }
    }

    /// Remove a file or an empty directory.
    pub fn delete(&mut self, path: &str) -> Result<(), RuntimeError> {
        let (parent, name) = split_last(path)?;
        let dir = self.dir_mut(&parent, path)?;
        match dir.get(&name) {
            None => Err(RuntimeError::NotFound(path.to_string())),
            Some(Node::Dir(children)) if !children.is_empty() => {
                Err(RuntimeError::DirectoryNotEmpty(path.to_string()))
            }
            Some(_) => {
                dir.remove(&name);
                Ok(())
            }
        }
    }

    /// Names of the entries directly under a directory, sorted.
    pub fn list(&self, path: &str) -> Result<Vec<String>, RuntimeError> {
        match self.node(path)? {
            Node::Dir(children) => Ok(children.keys().cloned().collect()),
            Node::File(_) => Err(RuntimeError::NotADirectory(path.to_string())),
        }
    }

    pub fn stat(&self, path: &str) -> Result<Stat, RuntimeError> {
        let is_directory = matches!(self.node(path)?, Node::Dir(_));
        Ok(Stat { is_directory })
    }

    /// Create a single directory. The parent must exist; the entry must not.
    pub fn mkdir(&mut self, path: &str) -> Result<(), RuntimeError> {
        let (parent, name) = split_last(path)?;
        let dir = self.dir_mut(&parent, path)?;
        if dir.contains_key(&name) {
            return Err(RuntimeError::AlreadyExists(path.to_string()));
        }
        dir.insert(name, Node::Dir(BTreeMap::new()));
        Ok(())
    }

    /// Create a directory and any missing ancestors.
    pub fn mkdir_all(&mut self, path: &str) -> Result<(), RuntimeError> {
        let mut node = &mut self.root;
        for segment in segments(path) {
            let Node::Dir(children) = node else {
                return Err(RuntimeError::NotADirectory(path.to_string()));
            };
            node = children
                .entry(segment)
                .or_insert_with(|| Node::Dir(BTreeMap::new()));
        }
        match node {
            Node::Dir(_) => Ok(()),
            Node::File(_) => Err(RuntimeError::NotADirectory(path.to_string())),
        }
    }

    pub fn exists(&self, path: &str) -> bool {
        self.node(path).is_ok()
    }

    /// Whether `path` and its parent directory exist.
    pub fn analyze(&self, path: &str) -> PathInfo {
        let mut parts = segments(path);
        let exists = self.lookup(&parts).is_some();
        let parent_exists = match parts.pop() {
            Some(_) => matches!(self.lookup(&parts), Some(Node::Dir(_))),
            None => true,
        };
        PathInfo {
            exists,
            parent_exists,
        }
    }

    /// Write the whole tree under `dir` on the host filesystem.
    pub fn export_to(&self, dir: &Path) -> Result<(), RuntimeError> {
        fn walk(node: &Node, at: &Path) -> std::io::Result<()> {
            match node {
                Node::File(data) => std::fs::write(at, data),
                Node::Dir(children) => {
                    std::fs::create_dir_all(at)?;
                    for (name, child) in children {
                        walk(child, &at.join(name))?;
                    }
                    Ok(())
                }
            }
        }
        walk(&self.root, dir)?;
        Ok(())
    }

    /// Build a tree from the contents of a host directory.
    pub fn import_from(dir: &Path) -> Result<Self, RuntimeError> {
        fn walk(at: &Path) -> std::io::Result<Node> {
            let mut children = BTreeMap::new();
            for entry in std::fs::read_dir(at)? {
                let entry = entry?;
                let name = entry.file_name().to_string_lossy().into_owned();
                let node = if entry.file_type()?.is_dir() {
                    walk(&entry.path())?
                } else {
                    Node::File(std::fs::read(entry.path())?)
                };
                children.insert(name, node);
            }
            Ok(Node::Dir(children))
        }
        Ok(Self { root: walk(dir)? })
    }

    fn node(&self, path: &str) -> Result<&Node, RuntimeError> {
        self.lookup(&segments(path))
            .ok_or_else(|| RuntimeError::NotFound(path.to_string()))
    }

    fn lookup(&self, parts: &[String]) -> Option<&Node> {
        let mut node = &self.root;
        for part in parts {
            node = match node {
                Node::Dir(children) => children.get(part)?,
                Node::File(_) => return None,
            };
        }
        Some(node)
    }

    fn dir_mut(
        &mut self,
        parts: &[String],
        full: &str,
    ) -> Result<&mut BTreeMap<String, Node>, RuntimeError> {
        let mut node = &mut self.root;
        for part in parts {
            node = match node {
                Node::Dir(children) => children
                    .get_mut(part)
                    .ok_or_else(|| RuntimeError::NotFound(full.to_string()))?,
                Node::File(_) => return Err(RuntimeError::NotADirectory(full.to_string())),
            };
        }
        match node {
            Node::Dir(children) => Ok(children),
            Node::File(_) => Err(RuntimeError::NotADirectory(full.to_string())),
        }
    }
}

/// Join two `/`-separated paths.
pub fn join_path(base: &str, rel: &str) -> String {
    let base = base.trim_end_matches('/');
    let rel = rel.trim_start_matches('/');
    if base.is_empty() {
        rel.to_string()
    } else {
        format!("{base}/{rel}")
    }
}

/// Parent of a `/`-separated path, or `None` at the top level.
pub fn parent_dir(path: &str) -> Option<&str> {
    let trimmed = path.trim_end_matches('/');
    match trimmed.rfind('/') {
        Some(0) => Some("/"),
        Some(idx) => Some(&trimmed[..idx]),
        None => None,
    }
}

fn segments(path: &str) -> Vec<String> {
    let mut parts: Vec<String> = Vec::new();
    for segment in path.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                parts.pop();
            }
            other => parts.push(other.to_string()),
        }
    }
    parts
}

fn split_last(path: &str) -> Result<(Vec<String>, String), RuntimeError> {
    let mut parts = segments(path);
    let name = parts
        .pop()
        .ok_or_else(|| RuntimeError::InvalidPath(path.to_string()))?;
    Ok((parts, name))
}
