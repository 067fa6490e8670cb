use crate::ResourceId;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::{Error, ErrorKind};
use std::path::{Component, Path, PathBuf};

/// Provides the raw bytes of resources.
/// An error or an empty buffer both mean the resource is unavailable.
pub trait ByteSource: Send + Sync
{
    fn load_bytes(&self, id: &ResourceId) -> std::io::Result<Vec<u8>>;

    /// Persist the bytes of a resource, overwriting any existing data
    fn store_bytes(&self, id: &ResourceId, _bytes: &[u8]) -> std::io::Result<()>
    {
        Err(Error::new(ErrorKind::Unsupported, format!("Cannot store {id}, the byte source is read-only")))
    }
}

/// Reads resources as loose files under a root directory
pub struct DiskByteSource
{
    root: PathBuf,
}
impl DiskByteSource
{
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self
    {
        Self { root: root.into() }
    }

    #[inline] #[must_use]
    pub fn root(&self) -> &Path { &self.root }

    /// The file path of a resource. Ids may not escape the root.
    pub fn resource_path(&self, id: &ResourceId) -> std::io::Result<PathBuf>
    {
        let relative = Path::new(id.as_str());
        if !id.is_valid() || !relative.components().all(|c| matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::new(ErrorKind::InvalidInput, format!("Invalid resource path {id:?}")));
        }
        Ok(self.root.join(relative))
    }
}
impl ByteSource for DiskByteSource
{
    fn load_bytes(&self, id: &ResourceId) -> std::io::Result<Vec<u8>>
    {
        let path = self.resource_path(id)?;
        std::fs::read(path)
    }

    fn store_bytes(&self, id: &ResourceId, bytes: &[u8]) -> std::io::Result<()>
    {
        let path = self.resource_path(id)?;
        if let Some(parent) = path.parent()
        {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, bytes)
    }
}

/// An in-memory archive of resources, populated by the host
#[derive(Default)]
pub struct PackByteSource
{
    entries: Mutex<HashMap<ResourceId, Vec<u8>>>,
}
impl PackByteSource
{
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Pack every file under a directory, keyed by its path relative to the directory
    pub fn from_directory(root: impl AsRef<Path>) -> std::io::Result<Self>
    {
        let root = root.as_ref();
        let pack = Self::new();
        for entry in walkdir::WalkDir::new(root)
        {
            let entry = entry?;
            if !entry.file_type().is_file()
            {
                continue;
            }

            let relative = entry.path().strip_prefix(root)
                .map_err(|err| Error::new(ErrorKind::InvalidData, err))?;
            let bytes = std::fs::read(entry.path())?;
            pack.insert(ResourceId::new(&relative.to_string_lossy()), bytes);
        }

        log::debug!(target: "ResourceLoader", "Packed {} resource(s) from {root:?}", pack.len());
        Ok(pack)
    }

    /// Add or replace a resource. Returns the previous bytes, if any.
    pub fn insert(&self, id: ResourceId, bytes: impl Into<Vec<u8>>) -> Option<Vec<u8>>
    {
        self.entries.lock().insert(id, bytes.into())
    }

    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool { self.entries.lock().contains_key(id) }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.lock().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}
impl ByteSource for PackByteSource
{
    fn load_bytes(&self, id: &ResourceId) -> std::io::Result<Vec<u8>>
    {
        self.entries.lock().get(id).cloned()
            .ok_or_else(|| Error::new(ErrorKind::NotFound, format!("{id} is not in the pack")))
    }

    fn store_bytes(&self, id: &ResourceId, bytes: &[u8]) -> std::io::Result<()>
    {
        self.insert(id.clone(), bytes);
        Ok(())
    }
}
