use crate::resource_loader::{LoaderInner, ReloadRequest};
use crate::*;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

const LOG_TARGET: &str = "ResourceHandle";

/// Owns (at most) one reference to a cached resource and releases it when dropped.
///
/// A handle can name a resource without holding it: it acquires lazily once the resource is loaded,
/// or immediately when it requests the load itself.
/// The reference is tied to the entry's generation, so a reference voided by a failed load is never
/// released against a later entry for the same id.
pub struct ResourceHandle
{
    id: ResourceId,
    held: Option<EntryGeneration>,
    loader: Arc<LoaderInner>,
}
impl ResourceHandle
{
    #[must_use]
    pub fn empty(loader: &ResourceLoader) -> Self
    {
        Self
        {
            id: ResourceId::default(),
            held: None,
            loader: loader.inner().clone(),
        }
    }

    /// Name a resource, loading it on this thread if `load_now`, otherwise taking a reference only if it is already loaded
    #[must_use]
    pub fn new(loader: &ResourceLoader, id: ResourceId, load_now: bool) -> Self
    {
        let mut handle = Self
        {
            id,
            held: None,
            loader: loader.inner().clone(),
        };

        match load_now
        {
            true => { handle.load_now(None); },
            false => { handle.try_acquire(); },
        }
        handle
    }

    #[inline] #[must_use]
    pub fn id(&self) -> &ResourceId { &self.id }

    #[inline] #[must_use]
    pub fn is_reference_held(&self) -> bool { self.held.is_some() }

    #[must_use]
    pub fn load_status(&self) -> ResourceLoadStatus { self.loader.load_status(&self.id) }

    /// Point the handle at a different resource, releasing the current one
    pub fn set_id(&mut self, id: ResourceId)
    {
        if id == self.id
        {
            return;
        }
        self.release();
        self.id = id;
        self.try_acquire();
    }

    /// The loaded resource, if available. Never blocks unless `force_load` is set and the resource is not loaded.
    pub fn get(&mut self, force_load: bool) -> Option<ResourceRef>
    {
        if !self.id.is_valid()
        {
            return None;
        }

        // a failed load voids the references to it
        if let Some(generation) = self.held
        {
            if !self.loader.is_current_generation(&self.id, generation)
            {
                log::debug!(target: LOG_TARGET, "{} was removed from the cache, dropping stale reference", self.id);
                self.held = None;
            }
        }

        if self.held.is_none()
        {
            match force_load
            {
                true => { self.load_now(None); },
                false => { self.try_acquire(); },
            }
        }

        match self.held
        {
            Some(_) => self.loader.get_resource(&self.id, false),
            None => None,
        }
    }

    /// Like [`Self::get`], but only if the resource is a `T`
    pub fn get_as<T: Resource>(&mut self, force_load: bool) -> Option<TypedResourceRef<T>>
    {
        let resource = self.get(force_load)?;
        match TypedResourceRef::new(resource)
        {
            Ok(typed) => Some(typed),
            Err(resource) =>
            {
                log::warn!(target: LOG_TARGET, "{} is not a {}", resource.id(), std::any::type_name::<T>());
                None
            }
        }
    }

    /// Request the resource be loaded in the background. Returns false if the handle already holds it
    pub fn queue_load(&mut self, signal_worker: bool, listener: Option<ListenerKey>) -> bool
    {
        if !self.can_request_load()
        {
            return false;
        }
        self.held = self.loader.queue_load(&self.id, signal_worker, listener);
        self.held.is_some()
    }

    /// Load the resource on this thread. Returns false if the handle already holds it or the load failed
    pub fn load_now(&mut self, listener: Option<ListenerKey>) -> bool
    {
        if !self.can_request_load()
        {
            return false;
        }
        self.held = self.loader.load_now(&self.id, listener);
        self.held.is_some()
    }

    /// Evict and load the resource again, or load it (and hold it) if it is not loaded.
    /// Returns false if the reload was refused (e.g. after shutdown) or a forced reload failed.
    pub fn reload(&mut self, force_load: bool, listener: Option<ListenerKey>) -> bool
    {
        if !self.id.is_valid()
        {
            log::warn!(target: LOG_TARGET, "Cannot reload an empty handle");
            return false;
        }

        match self.loader.reload_resource(&self.id, force_load, listener)
        {
            ReloadRequest::Failed => false,
            ReloadRequest::Reloading => true,
            ReloadRequest::Granted(generation) =>
            {
                // keep one reference, a stale previous one is ignored on release
                if let Some(previous) = self.held.replace(generation)
                {
                    self.loader.release_generation(&self.id, previous);
                }
                true
            },
        }
    }

    fn can_request_load(&self) -> bool
    {
        if !self.id.is_valid()
        {
            log::warn!(target: LOG_TARGET, "Cannot load an empty handle");
            return false;
        }
        if self.held.is_some()
        {
            log::warn!(target: LOG_TARGET, "Handle already holds a reference to {}", self.id);
            return false;
        }
        true
    }

    fn try_acquire(&mut self) -> bool
    {
        if self.held.is_none() && self.id.is_valid() && self.loader.is_resource_acquirable(&self.id)
        {
            self.held = self.loader.acquire_resource(&self.id, None);
        }
        self.held.is_some()
    }

    /// Release the held reference, if any
    pub fn release(&mut self)
    {
        if let Some(generation) = self.held.take()
        {
            self.loader.release_generation(&self.id, generation);
        }
    }

    /// Pin the resource. Independent of whether this handle holds a reference
    pub fn lock_resource(&self) -> bool
    {
        self.loader.lock_resource(&self.id)
    }

    pub fn unlock_resource(&self) -> bool
    {
        self.loader.unlock_resource(&self.id)
    }

    /// Create a brand new resource for an unused id and hold it (for save-as flows)
    pub fn create_new(&mut self, id: ResourceId) -> bool
    {
        self.release();
        self.id = id;
        self.held = self.loader.create_new_resource(&self.id);
        self.held.is_some()
    }

    pub fn save_resource(&self) -> std::io::Result<()>
    {
        self.loader.save_resource(&self.id)
    }
}
impl Clone for ResourceHandle
{
    fn clone(&self) -> Self
    {
        let held = self.held.and_then(|generation| self.loader.acquire_resource(&self.id, Some(generation)));
        Self
        {
            id: self.id.clone(),
            held,
            loader: self.loader.clone(),
        }
    }
}
impl Drop for ResourceHandle
{
    fn drop(&mut self)
    {
        self.release();
    }
}
impl PartialEq for ResourceHandle
{
    fn eq(&self, other: &Self) -> bool
    {
        self.id == other.id && Arc::ptr_eq(&self.loader, &other.loader)
    }
}
impl Debug for ResourceHandle
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result
    {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("held", &self.held)
            .finish()
    }
}
