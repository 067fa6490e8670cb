use crate::ResourceId;
use std::any::Any;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::ops::Deref;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadResult
{
    Succeeded,
    SucceededKeepingRawBytes, // the resource took ownership of the raw bytes
    Failed,
}
impl LoadResult
{
    #[inline] #[must_use]
    pub fn is_success(self) -> bool { self != Self::Failed }
}

pub trait AsAny: Any
{
    fn as_any(&self) -> &dyn Any;
}
impl<T: Any> AsAny for T
{
    fn as_any(&self) -> &dyn Any { self }
}

/// A loadable asset (texture, text file, tilemap, ...).
///
/// Instances are created empty by a [`crate::ResourceFactory`] and then filled by [`Resource::load`]
/// on the loader thread. Once loaded a resource is shared immutably; types that need to be edited
/// after loading (e.g. for save-as flows) use interior mutability.
pub trait Resource: AsAny + Send + Sync
{
    /// Decode the raw bytes. On `Failed`, no partially-initialized state may remain reachable.
    fn load(&mut self, raw_bytes: Vec<u8>) -> LoadResult;

    /// Release any decoded state. Called exactly once, when the resource is evicted.
    fn unload(&mut self);

    /// Serialize the resource back into raw bytes, if the type supports saving
    fn save(&self) -> Option<Vec<u8>> { None }
}

/// A loaded resource, as stored in the cache.
///
/// [`Resource::unload`] runs when the last reference to this is dropped, which is normally the
/// cache's own during the unload sweep.
pub struct LoadedResource
{
    id: ResourceId,
    resource: Box<dyn Resource>,
}
impl LoadedResource
{
    #[must_use]
    pub(crate) fn new(id: ResourceId, resource: Box<dyn Resource>) -> Self
    {
        Self { id, resource }
    }

    #[inline] #[must_use]
    pub fn id(&self) -> &ResourceId { &self.id }

    #[inline] #[must_use]
    pub fn downcast_ref<T: Resource>(&self) -> Option<&T>
    {
        let resource: &dyn Resource = self.resource.as_ref();
        resource.as_any().downcast_ref::<T>()
    }

    #[inline] #[must_use]
    pub fn is<T: Resource>(&self) -> bool { self.downcast_ref::<T>().is_some() }
}
impl Deref for LoadedResource
{
    type Target = dyn Resource;
    fn deref(&self) -> &Self::Target { self.resource.as_ref() }
}
impl Drop for LoadedResource
{
    fn drop(&mut self)
    {
        #[cfg(feature = "debug_resource_lifetimes")]
        log::debug!(target: "ResourceDatabase", "{:?} unloading", self.id);

        self.resource.unload();
    }
}
impl Debug for LoadedResource
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("LoadedResource").field("id", &self.id).finish_non_exhaustive()
    }
}

/// A shared reference to a loaded resource.
/// Holding one does not keep the cache entry alive, use a [`crate::ResourceHandle`] for that.
pub type ResourceRef = Arc<LoadedResource>;

/// A [`ResourceRef`] known to hold a `T`
pub struct TypedResourceRef<T: Resource>
{
    resource: ResourceRef,
    phantom: PhantomData<fn() -> T>,
}
impl<T: Resource> TypedResourceRef<T>
{
    /// Gives the reference back if it does not hold a `T`
    pub fn new(resource: ResourceRef) -> Result<Self, ResourceRef>
    {
        match resource.is::<T>()
        {
            true => Ok(Self { resource, phantom: PhantomData }),
            false => Err(resource),
        }
    }

    #[inline] #[must_use]
    pub fn untyped(&self) -> &ResourceRef { &self.resource }
}
impl<T: Resource> Deref for TypedResourceRef<T>
{
    type Target = T;
    fn deref(&self) -> &Self::Target
    {
        match self.resource.downcast_ref::<T>()
        {
            Some(resource) => resource,
            None => unreachable!("Resource type was checked on construction"),
        }
    }
}
impl<T: Resource> Clone for TypedResourceRef<T>
{
    fn clone(&self) -> Self { Self { resource: self.resource.clone(), phantom: PhantomData } }
}
impl<T: Resource> Debug for TypedResourceRef<T>
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result
    {
        f.debug_tuple("TypedResourceRef").field(self.resource.id()).finish()
    }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Counted
    {
        unloads: Arc<AtomicUsize>,
    }
    impl Resource for Counted
    {
        fn load(&mut self, _raw_bytes: Vec<u8>) -> LoadResult { LoadResult::Succeeded }
        fn unload(&mut self) { self.unloads.fetch_add(1, Ordering::SeqCst); }
    }

    struct Other;
    impl Resource for Other
    {
        fn load(&mut self, _raw_bytes: Vec<u8>) -> LoadResult { LoadResult::Failed }
        fn unload(&mut self) { }
    }

    #[test]
    fn unload_on_last_drop()
    {
        let unloads = Arc::new(AtomicUsize::new(0));
        let loaded: ResourceRef = Arc::new(LoadedResource::new(
            ResourceId::new("counted.bin"),
            Box::new(Counted { unloads: unloads.clone() })));

        let borrowed = loaded.clone();
        drop(loaded);
        assert_eq!(0, unloads.load(Ordering::SeqCst));
        drop(borrowed);
        assert_eq!(1, unloads.load(Ordering::SeqCst));
    }

    #[test]
    fn downcast()
    {
        let loaded = LoadedResource::new(ResourceId::new("other.bin"), Box::new(Other));
        assert!(loaded.is::<Other>());
        assert!(loaded.downcast_ref::<Counted>().is_none());
        assert_eq!(&ResourceId::new("other.bin"), loaded.id());
    }

    #[test]
    fn typed_ref()
    {
        let loaded: ResourceRef = Arc::new(LoadedResource::new(ResourceId::new("other.bin"), Box::new(Other)));
        let loaded = match TypedResourceRef::<Counted>::new(loaded)
        {
            Ok(_) => panic!("Wrong type accepted"),
            Err(loaded) => loaded,
        };
        let typed = TypedResourceRef::<Other>::new(loaded).unwrap();
        assert_eq!(&ResourceId::new("other.bin"), typed.untyped().id());
        let _other: &Other = &typed;
    }

    #[test]
    fn load_results()
    {
        assert!(LoadResult::Succeeded.is_success());
        assert!(LoadResult::SucceededKeepingRawBytes.is_success());
        assert!(!LoadResult::Failed.is_success());
    }
}
