use crate::{ByteSource, DiskByteSource, PackByteSource};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub trait TomlRead: DeserializeOwned
{
    fn load(reader: &mut impl Read) -> Result<Self, Box<dyn std::error::Error>>
    {
        let mut buf = String::new();
        reader.read_to_string(&mut buf)?;
        Ok(toml::from_str(&buf)?)
    }

    fn load_file(path: impl AsRef<Path>) -> Result<Self, Box<dyn std::error::Error>>
    {
        let mut file = std::fs::File::open(path)?;
        Self::load(&mut file)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ResourceConfig
{
    /// Where resources are read from (and saved to)
    pub resource_root: PathBuf,
    /// Read loose files from `resource_root`, otherwise pack them into memory up front
    pub use_raw_assets: bool,
    /// Load on a background worker. When false, queued loads run immediately on the caller
    pub threaded: bool,
}
impl ResourceConfig
{
    #[cfg(test)]
    pub fn test() -> Self
    {
        Self { resource_root: PathBuf::from("TEST_DIR"), use_raw_assets: true, threaded: true }
    }

    pub fn create_byte_source(&self) -> std::io::Result<Arc<dyn ByteSource>>
    {
        #[cfg(debug_assertions)]
        log::debug!(target: "ResourceLoader", "Serving resources from {:?} (raw: {})", self.resource_root, self.use_raw_assets);

        match self.use_raw_assets
        {
            true => Ok(Arc::new(DiskByteSource::new(&self.resource_root))),
            false => Ok(Arc::new(PackByteSource::from_directory(&self.resource_root)?)),
        }
    }
}
impl Default for ResourceConfig
{
    fn default() -> Self
    {
        Self
        {
            resource_root: PathBuf::from("resources"),
            use_raw_assets: true,
            threaded: true,
        }
    }
}
impl TomlRead for ResourceConfig { }

#[cfg(test)]
mod tests
{
    use super::*;
    use crate::ResourceId;

    #[test]
    fn read_partial_toml()
    {
        let toml = "resource_root = \"data/game\"\nthreaded = false\n";
        let config = ResourceConfig::load(&mut toml.as_bytes()).unwrap();
        assert_eq!(PathBuf::from("data/game"), config.resource_root);
        assert!(config.use_raw_assets);
        assert!(!config.threaded);
    }

    #[test]
    fn empty_toml_is_default()
    {
        let config = ResourceConfig::load(&mut "".as_bytes()).unwrap();
        assert_eq!(ResourceConfig::default(), config);
    }

    #[test]
    fn bad_toml()
    {
        assert!(ResourceConfig::load(&mut "threaded = \"sometimes\"".as_bytes()).is_err());
    }

    #[test]
    fn packed_source()
    {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "packed").unwrap();

        let config = ResourceConfig { resource_root: dir.path().to_path_buf(), use_raw_assets: false, ..ResourceConfig::test() };
        let source = config.create_byte_source().unwrap();
        dir.close().unwrap();

        // read from memory after the directory is gone
        assert_eq!(b"packed".to_vec(), source.load_bytes(&ResourceId::new("a.txt")).unwrap());
    }
}
