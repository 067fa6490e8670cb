use crate::ResourceRef;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceLoadStatus
{
    Invalid, // no entry
    Loading,
    Loaded,
    Unloading,
    Unloaded,
}

/// One lifetime of an entry. An id is reused when its entry is removed and recreated, a generation is not.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EntryGeneration(pub(crate) u64);

/// The cache's record of one resource.
///
/// A new entry starts with one reference, owned by whoever requested its creation.
/// The resource is only ever present while the status is `Loaded`.
#[derive(Debug)]
pub struct ResourceEntry
{
    resource: Option<ResourceRef>,
    status: ResourceLoadStatus,
    generation: EntryGeneration,
    reference_count: u32,
    lock_count: u32,
}
impl ResourceEntry
{
    #[must_use]
    pub(crate) fn new(generation: EntryGeneration) -> Self
    {
        Self
        {
            resource: None,
            status: ResourceLoadStatus::Invalid,
            generation,
            reference_count: 1,
            lock_count: 0,
        }
    }

    #[inline] #[must_use]
    pub fn status(&self) -> ResourceLoadStatus { self.status }

    pub(crate) fn set_status(&mut self, status: ResourceLoadStatus)
    {
        debug_assert_ne!(status, ResourceLoadStatus::Invalid);
        if status != ResourceLoadStatus::Loaded
        {
            debug_assert!(self.resource.is_none(), "Resource must be taken before leaving the loaded state");
        }
        self.status = status;
    }

    #[inline] #[must_use]
    pub fn generation(&self) -> EntryGeneration { self.generation }

    #[inline] #[must_use]
    pub fn resource(&self) -> Option<&ResourceRef>
    {
        match self.status
        {
            ResourceLoadStatus::Loaded => self.resource.as_ref(),
            _ => None,
        }
    }

    // Store the loaded resource and mark the entry loaded
    pub(crate) fn set_resource(&mut self, resource: ResourceRef)
    {
        debug_assert!(self.resource.is_none());
        self.resource = Some(resource);
        self.status = ResourceLoadStatus::Loaded;
    }

    #[must_use]
    pub(crate) fn take_resource(&mut self) -> Option<ResourceRef>
    {
        self.resource.take()
    }

    #[inline] #[must_use]
    pub fn reference_count(&self) -> u32 { self.reference_count }

    #[inline] #[must_use]
    pub fn lock_count(&self) -> u32 { self.lock_count }

    #[inline] #[must_use]
    pub fn is_locked(&self) -> bool { self.lock_count > 0 }

    // No references and no locks
    #[inline] #[must_use]
    pub fn is_unheld(&self) -> bool { self.reference_count == 0 && self.lock_count == 0 }

    // Unheld and loaded
    #[inline] #[must_use]
    pub fn is_evictable(&self) -> bool { self.is_unheld() && self.status == ResourceLoadStatus::Loaded }

    pub(crate) fn increment_reference_count(&mut self)
    {
        self.reference_count += 1;
    }

    // Returns true if this released the last reference or lock
    #[must_use]
    pub(crate) fn decrement_reference_count(&mut self) -> bool
    {
        if self.reference_count == 0
        {
            log::warn!(target: "ResourceDatabase", "Reference count below 0, the resource is being over-released");
            return false;
        }
        self.reference_count -= 1;
        self.is_unheld()
    }

    pub(crate) fn increment_lock_count(&mut self)
    {
        self.lock_count += 1;
    }

    // Returns true if this released the last reference or lock
    #[must_use]
    pub(crate) fn decrement_lock_count(&mut self) -> bool
    {
        if self.lock_count == 0
        {
            log::warn!(target: "ResourceDatabase", "Lock count below 0, the resource is being over-unlocked");
            return false;
        }
        self.lock_count -= 1;
        self.is_unheld()
    }

    // Reuse a dead (unloading/unloaded) entry for a fresh load
    pub(crate) fn revive(&mut self, generation: EntryGeneration)
    {
        debug_assert!(matches!(self.status, ResourceLoadStatus::Unloading | ResourceLoadStatus::Unloaded | ResourceLoadStatus::Invalid));
        debug_assert!(generation > self.generation);
        self.generation = generation;
        self.reference_count += 1;
        self.status = ResourceLoadStatus::Loading;
    }

    // Void any outstanding references (e.g. to a failed load) so the entry can be destroyed quietly
    pub(crate) fn void_counts(&mut self)
    {
        self.reference_count = 0;
        self.lock_count = 0;
    }
}
impl Drop for ResourceEntry
{
    fn drop(&mut self)
    {
        if !self.is_unheld()
        {
            log::warn!(target: "ResourceDatabase",
                "Destroying resource entry {:?} with {} reference(s) and {} lock(s)",
                self.resource.as_ref().map(|r| r.id()),
                self.reference_count,
                self.lock_count);
        }
    }
}
