use crate::resource_types::{BlobResource, TextFileResource};
use crate::{Resource, ResourceId};
use std::collections::HashMap;
use unicase::UniCase;

/// Constructs the (empty, unloaded) resource for an id.
/// Returning None means the id is not a recognized resource type.
pub trait ResourceFactory: Send + Sync
{
    fn create_resource(&self, id: &ResourceId) -> Option<Box<dyn Resource>>;
}
impl<F: Fn(&ResourceId) -> Option<Box<dyn Resource>> + Send + Sync> ResourceFactory for F
{
    fn create_resource(&self, id: &ResourceId) -> Option<Box<dyn Resource>> { self(id) }
}

type ResourceConstructor = fn() -> Box<dyn Resource>;

fn construct<R: Resource + Default>() -> Box<dyn Resource> { Box::new(R::default()) }

/// Dispatches on the (case-insensitive) file extension of the id
#[derive(Default)]
pub struct ExtensionResourceFactory
{
    constructors: HashMap<UniCase<String>, ResourceConstructor>,
}
impl ExtensionResourceFactory
{
    #[must_use]
    pub fn new() -> Self { Self::default() }

    /// Text files for `txt`, `json`, `toml` and `tmx`, blobs for `bin`
    #[must_use]
    pub fn with_builtin_types() -> Self
    {
        Self::new()
            .add_type::<TextFileResource>(&["txt", "json", "toml", "tmx"])
            .add_type::<BlobResource>(&["bin"])
    }

    /// Register a resource type for a set of extensions (without the leading dot).
    /// Later registrations replace earlier ones for the same extension.
    #[must_use]
    pub fn add_type<R: Resource + Default>(mut self, extensions: &[&str]) -> Self
    {
        for ext in extensions
        {
            if self.constructors.insert(UniCase::new(ext.to_string()), construct::<R>).is_some()
            {
                log::debug!(target: "ResourceLoader", "Replacing resource type for extension '{ext}'");
            }
        }
        self
    }

    #[must_use]
    pub fn supports(&self, id: &ResourceId) -> bool
    {
        id.extension().is_some_and(|ext| self.constructors.contains_key(&UniCase::new(ext.to_string())))
    }
}
impl ResourceFactory for ExtensionResourceFactory
{
    fn create_resource(&self, id: &ResourceId) -> Option<Box<dyn Resource>>
    {
        let Some(ext) = id.extension() else
        {
            log::warn!(target: "ResourceLoader", "Cannot determine the resource type of {id}, it has no extension");
            return None;
        };

        match self.constructors.get(&UniCase::new(ext.to_string()))
        {
            Some(constructor) => Some(constructor()),
            None =>
            {
                log::warn!(target: "ResourceLoader", "Unsupported resource type '{ext}' for {id}");
                None
            }
        }
    }
}
