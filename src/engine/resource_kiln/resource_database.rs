use super::*;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

const LOG_TARGET: &str = "ResourceDatabase";

type EntryMap = HashMap<ResourceId, ResourceEntry>;

// The result of asking for an entry to be loaded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum LoadRequest
{
    Created, // new (or revived) entry, the caller must load it
    Loading, // joined an in-flight load
    Loaded, // already available
}

/// Maps resource ids to their entries and owns the deferred unload queue.
///
/// Every operation locks internally. Operations on unknown ids are logged no-ops.
/// Resources are always released (and so unloaded) outside of the map lock, so a resource's
/// `unload` may release other resources.
#[derive(Default)]
pub struct ResourceDatabase
{
    entries: Mutex<EntryMap>,
    unload_queue: Mutex<Vec<ResourceId>>,
    next_generation: AtomicU64,
}
impl ResourceDatabase
{
    fn next_generation(&self) -> EntryGeneration
    {
        EntryGeneration(self.next_generation.fetch_add(1, Ordering::Relaxed))
    }

    /// Create an entry for an unseen id. Returns false if one already exists.
    pub fn create_entry(&self, id: &ResourceId) -> bool
    {
        let mut entries = self.entries.lock();
        if entries.contains_key(id)
        {
            log::debug!(target: LOG_TARGET, "Resource entry for {id} already exists");
            return false;
        }
        entries.insert(id.clone(), ResourceEntry::new(self.next_generation()));
        true
    }

    // Create, join or take a reference to an entry, as one atomic step.
    // The reference taken belongs to the returned generation of the entry
    #[must_use]
    pub(crate) fn request_load(&self, id: &ResourceId) -> (LoadRequest, EntryGeneration)
    {
        let mut entries = self.entries.lock();
        match entries.get_mut(id)
        {
            None =>
            {
                let mut entry = ResourceEntry::new(self.next_generation());
                entry.set_status(ResourceLoadStatus::Loading);
                let generation = entry.generation();
                entries.insert(id.clone(), entry);
                (LoadRequest::Created, generation)
            },
            Some(entry) => match entry.status()
            {
                ResourceLoadStatus::Loading =>
                {
                    entry.increment_reference_count();
                    (LoadRequest::Loading, entry.generation())
                },
                ResourceLoadStatus::Loaded =>
                {
                    entry.increment_reference_count();
                    (LoadRequest::Loaded, entry.generation())
                },
                ResourceLoadStatus::Invalid | ResourceLoadStatus::Unloading | ResourceLoadStatus::Unloaded =>
                {
                    log::debug!(target: LOG_TARGET, "Reviving {:?} entry {id} for a new load", entry.status());
                    entry.revive(self.next_generation());
                    (LoadRequest::Created, entry.generation())
                },
            },
        }
    }

    /// The current generation of an id's entry, if it has one
    #[must_use]
    pub fn generation(&self, id: &ResourceId) -> Option<EntryGeneration>
    {
        self.entries.lock().get(id).map(|e| e.generation())
    }

    #[must_use]
    pub fn load_status(&self, id: &ResourceId) -> ResourceLoadStatus
    {
        let entries = self.entries.lock();
        entries.get(id).map_or(ResourceLoadStatus::Invalid, |e| e.status())
    }

    /// Transitions are not validated; callers drive Invalid -> Loading -> Loaded -> (Unloading -> Unloaded)
    pub fn set_load_status(&self, id: &ResourceId, status: ResourceLoadStatus)
    {
        let mut entries = self.entries.lock();
        match entries.get_mut(id)
        {
            Some(entry) => entry.set_status(status),
            None => log::debug!(target: LOG_TARGET, "Unable to set the status of unknown entry {id}"),
        }
    }

    pub fn increment_reference_count(&self, id: &ResourceId) -> bool
    {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(id) else
        {
            log::info!(target: LOG_TARGET, "Unable to increment reference count of unknown entry {id}");
            return false;
        };
        entry.increment_reference_count();

        #[cfg(feature = "debug_resource_lifetimes")]
        log::debug!(target: LOG_TARGET, "{id} increment ref to {}", entry.reference_count());
        true
    }

    // Take a reference only if the entry is loading or loaded, and (if given) still the expected generation
    #[must_use]
    pub(crate) fn acquire_live(&self, id: &ResourceId, expected: Option<EntryGeneration>) -> Option<EntryGeneration>
    {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        if expected.is_some_and(|generation| generation != entry.generation())
        {
            log::debug!(target: LOG_TARGET, "Not acquiring {id}, its entry was recreated");
            return None;
        }
        match entry.status()
        {
            ResourceLoadStatus::Loading | ResourceLoadStatus::Loaded =>
            {
                entry.increment_reference_count();
                Some(entry.generation())
            },
            status =>
            {
                log::debug!(target: LOG_TARGET, "Cannot acquire {id} while it is {status:?}");
                None
            },
        }
    }

    /// Returns true if the entry is left with no references or locks.
    /// Loaded entries that reach that point are queued for the unload sweep.
    pub fn decrement_reference_count(&self, id: &ResourceId) -> bool
    {
        self.decrement(id, None, ResourceEntry::decrement_reference_count, "reference")
    }

    // Release a reference taken on a specific generation of the entry.
    // References to a removed generation (e.g. a failed load) were voided with it and are ignored
    pub(crate) fn release_generation(&self, id: &ResourceId, generation: EntryGeneration) -> bool
    {
        self.decrement(id, Some(generation), ResourceEntry::decrement_reference_count, "reference")
    }

    pub fn increment_lock_count(&self, id: &ResourceId) -> bool
    {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(id) else
        {
            log::info!(target: LOG_TARGET, "Unable to increment lock count of unknown entry {id}");
            return false;
        };
        entry.increment_lock_count();

        #[cfg(feature = "debug_resource_lifetimes")]
        log::debug!(target: LOG_TARGET, "{id} increment lock to {}", entry.lock_count());
        true
    }

    /// Same contract as [`Self::decrement_reference_count`]
    pub fn decrement_lock_count(&self, id: &ResourceId) -> bool
    {
        self.decrement(id, None, ResourceEntry::decrement_lock_count, "lock")
    }

    fn decrement(&self, id: &ResourceId, generation: Option<EntryGeneration>, decrement_fn: fn(&mut ResourceEntry) -> bool, count_name: &str) -> bool
    {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(id) else
        {
            match generation
            {
                Some(_) => log::debug!(target: LOG_TARGET, "Ignoring {count_name} release of removed entry {id}"),
                None => log::info!(target: LOG_TARGET, "Unable to decrement {count_name} count of unknown entry {id}"),
            }
            return false;
        };
        if generation.is_some_and(|generation| generation != entry.generation())
        {
            log::debug!(target: LOG_TARGET, "Ignoring {count_name} release of a previous generation of {id}");
            return false;
        }

        let unheld = decrement_fn(entry);

        #[cfg(feature = "debug_resource_lifetimes")]
        log::debug!(target: LOG_TARGET, "{id} decrement {count_name} to {}/{}", entry.reference_count(), entry.lock_count());

        if unheld && entry.is_evictable()
        {
            drop(entries);
            self.queue_unload(id);
        }
        unheld
    }

    #[must_use]
    pub fn reference_count(&self, id: &ResourceId) -> u32
    {
        self.entries.lock().get(id).map_or(0, |e| e.reference_count())
    }

    #[must_use]
    pub fn lock_count(&self, id: &ResourceId) -> u32
    {
        self.entries.lock().get(id).map_or(0, |e| e.lock_count())
    }

    /// The resource, if loaded
    #[must_use]
    pub fn resource(&self, id: &ResourceId) -> Option<ResourceRef>
    {
        let entries = self.entries.lock();
        entries.get(id).and_then(|e| e.resource().cloned())
    }

    /// Store a loaded resource and mark its entry as loaded.
    /// Gives the resource back if the entry does not exist or already holds one.
    pub fn set_resource(&self, id: &ResourceId, resource: ResourceRef) -> Result<(), ResourceRef>
    {
        let mut entries = self.entries.lock();
        match entries.get_mut(id)
        {
            Some(entry) if entry.resource().is_none() =>
            {
                entry.set_resource(resource);
                Ok(())
            },
            _ => Err(resource),
        }
    }

    // Complete a load started by request_load(), queueing the entry for eviction if everyone lost interest while loading
    pub(crate) fn finish_load(&self, id: &ResourceId, resource: ResourceRef) -> Result<(), ResourceRef>
    {
        let mut entries = self.entries.lock();
        let Some(entry) = entries.get_mut(id) else { return Err(resource); };
        if entry.status() != ResourceLoadStatus::Loading
        {
            return Err(resource);
        }

        entry.set_resource(resource);
        if entry.is_evictable()
        {
            drop(entries);
            log::debug!(target: LOG_TARGET, "{id} was released while loading");
            self.queue_unload(id);
        }
        Ok(())
    }

    // Remove an entry whose load failed
    pub(crate) fn fail_load(&self, id: &ResourceId)
    {
        let mut entries = self.entries.lock();
        match entries.get(id).map(|e| e.status())
        {
            Some(ResourceLoadStatus::Loading) =>
            {
                if let Some(mut entry) = entries.remove(id)
                {
                    // references to a failed load are void
                    entry.void_counts();
                }
            },
            Some(status) => log::debug!(target: LOG_TARGET, "Not removing failed entry {id} in state {status:?}"),
            None => { },
        }
    }

    // Take the resource out of a loaded entry so it can be loaded again, keeping all references
    #[must_use]
    pub(crate) fn begin_reload(&self, id: &ResourceId) -> Option<ResourceRef>
    {
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(id)?;
        if entry.status() != ResourceLoadStatus::Loaded
        {
            return None;
        }
        let previous = entry.take_resource();
        entry.set_status(ResourceLoadStatus::Loading);
        previous
    }

    // Insert an entry that is loaded from birth, with the creator's reference
    pub(crate) fn insert_loaded(&self, id: &ResourceId, resource: ResourceRef) -> Result<EntryGeneration, ResourceRef>
    {
        let mut entries = self.entries.lock();
        if entries.contains_key(id)
        {
            return Err(resource);
        }
        let mut entry = ResourceEntry::new(self.next_generation());
        entry.set_resource(resource);
        let generation = entry.generation();
        entries.insert(id.clone(), entry);
        Ok(generation)
    }

    /// Queue an entry for the next unload sweep
    pub fn queue_unload(&self, id: &ResourceId)
    {
        log::trace!(target: LOG_TARGET, "Adding {id} to the unload queue");
        self.unload_queue.lock().push(id.clone());
    }

    #[must_use]
    pub fn unload_queue_len(&self) -> usize { self.unload_queue.lock().len() }

    /// Evict an entry: unload its resource and remove it.
    /// Only legal when the entry has no references or locks; returns false (and does nothing) otherwise.
    pub fn unload_entry(&self, id: &ResourceId) -> bool
    {
        let resource =
        {
            let mut entries = self.entries.lock();
            let Some(entry) = entries.get_mut(id) else { return false; };
            if !entry.is_evictable()
            {
                log::trace!(target: LOG_TARGET, "Skipping unload of {id} ({:?}, {} refs, {} locks)",
                    entry.status(), entry.reference_count(), entry.lock_count());
                return false;
            }
            let resource = entry.take_resource();
            entry.set_status(ResourceLoadStatus::Unloading);
            resource
        };

        log::info!(target: LOG_TARGET, "Unloading resource {id}");
        if let Some(resource) = resource
        {
            if std::sync::Arc::strong_count(&resource) > 1
            {
                log::debug!(target: LOG_TARGET, "{id} is still borrowed, unload is deferred to the last borrower");
            }
            drop(resource);
        }

        let mut entries = self.entries.lock();
        match entries.get(id).map(|e| e.status())
        {
            Some(ResourceLoadStatus::Unloading) =>
            {
                if let Some(mut entry) = entries.remove(id)
                {
                    entry.set_status(ResourceLoadStatus::Unloaded);
                    // acquired while unloading, those references are void
                    entry.void_counts();
                }
                true
            },
            // revived by a new load request while unloading
            _ => true,
        }
    }

    /// Run the unload sweep. Must only be called from one thread (typically the frame loop).
    pub fn process_unload_queue(&self)
    {
        loop
        {
            let queued = std::mem::take(&mut *self.unload_queue.lock());
            if queued.is_empty()
            {
                break;
            }

            for id in queued
            {
                self.unload_entry(&id);
            }
        }
    }

    /// Unload every resource and clear the database. Returns the number of entries that were still referenced.
    pub fn unload_all(&self) -> usize
    {
        let drained: Vec<(ResourceId, ResourceEntry)> = self.entries.lock().drain().collect();
        self.unload_queue.lock().clear();

        let mut leaked = 0;
        for (id, mut entry) in drained
        {
            if !entry.is_unheld()
            {
                log::error!(target: LOG_TARGET, "! Leak detected: {id} has {} reference(s) and {} lock(s)",
                    entry.reference_count(), entry.lock_count());
                leaked += 1;
            }

            let resource = entry.take_resource();
            entry.void_counts();
            drop(entry);
            drop(resource);
        }
        leaked
    }

    #[must_use]
    pub fn len(&self) -> usize { self.entries.lock().len() }

    #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::sync::Arc;
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

    fn counted(id: &ResourceId, unloads: &Arc<AtomicUsize>) -> ResourceRef
    {
        Arc::new(LoadedResource::new(id.clone(), Box::new(Counted { unloads: unloads.clone() })))
    }

    fn loaded_entry(db: &ResourceDatabase, id: &ResourceId, unloads: &Arc<AtomicUsize>)
    {
        assert_eq!(LoadRequest::Created, db.request_load(id).0);
        assert!(db.finish_load(id, counted(id, unloads)).is_ok());
    }

    mod entries
    {
        use super::*;

        #[test]
        fn create_once()
        {
            let db = ResourceDatabase::default();
            let id = ResourceId::new("a.txt");
            assert!(db.create_entry(&id));
            assert!(!db.create_entry(&id));
            assert_eq!(1, db.len());
            assert_eq!(1, db.reference_count(&id));
            assert_eq!(ResourceLoadStatus::Invalid, db.load_status(&id));
        }

        #[test]
        fn unknown_ids()
        {
            let db = ResourceDatabase::default();
            let id = ResourceId::new("nope.txt");
            assert_eq!(ResourceLoadStatus::Invalid, db.load_status(&id));
            assert!(!db.increment_reference_count(&id));
            assert!(!db.decrement_reference_count(&id));
            assert!(!db.increment_lock_count(&id));
            assert!(!db.decrement_lock_count(&id));
            assert!(db.resource(&id).is_none());
            assert!(!db.unload_entry(&id));
            db.set_load_status(&id, ResourceLoadStatus::Loaded);
            assert!(db.is_empty());
        }

        #[test]
        fn set_resource_marks_loaded()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let id = ResourceId::new("a.txt");
            assert!(db.create_entry(&id));
            db.set_load_status(&id, ResourceLoadStatus::Loading);
            assert!(db.resource(&id).is_none());

            assert!(db.set_resource(&id, counted(&id, &unloads)).is_ok());
            assert_eq!(ResourceLoadStatus::Loaded, db.load_status(&id));
            assert!(db.resource(&id).is_some());
            assert!(db.set_resource(&id, counted(&id, &unloads)).is_err());
            // the rejected duplicate was unloaded on drop
            assert_eq!(1, unloads.load(Ordering::SeqCst));
        }
    }

    mod requests
    {
        use super::*;

        #[test]
        fn join_and_reference()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let id = ResourceId::new("a.txt");

            let (request, generation) = db.request_load(&id);
            assert_eq!(LoadRequest::Created, request);
            assert_eq!((LoadRequest::Loading, generation), db.request_load(&id));
            assert_eq!(ResourceLoadStatus::Loading, db.load_status(&id));
            assert!(db.finish_load(&id, counted(&id, &unloads)).is_ok());
            assert_eq!((LoadRequest::Loaded, generation), db.request_load(&id));
            assert_eq!(3, db.reference_count(&id));
        }

        #[test]
        fn failed_load_removes_entry()
        {
            let db = ResourceDatabase::default();
            let id = ResourceId::new("bad.txt");
            assert_eq!(LoadRequest::Created, db.request_load(&id).0);
            assert_eq!(LoadRequest::Loading, db.request_load(&id).0);
            db.fail_load(&id);
            assert_eq!(ResourceLoadStatus::Invalid, db.load_status(&id));
            assert!(db.is_empty());
        }

        #[test]
        fn releases_of_a_removed_generation_are_ignored()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let id = ResourceId::new("later.txt");
            let (_, failed) = db.request_load(&id);
            db.fail_load(&id);
            assert!(!db.release_generation(&id, failed));

            loaded_entry(&db, &id, &unloads);
            let current = db.generation(&id).unwrap();
            assert_ne!(failed, current);
            assert!(db.acquire_live(&id, Some(failed)).is_none());
            assert!(!db.release_generation(&id, failed));
            assert_eq!(1, db.reference_count(&id));
            assert_eq!(0, db.unload_queue_len());

            assert!(db.release_generation(&id, current));
            db.process_unload_queue();
            assert_eq!(1, unloads.load(Ordering::SeqCst));
        }

        #[test]
        fn released_while_loading_is_queued_on_finish()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let id = ResourceId::new("a.txt");

            assert_eq!(LoadRequest::Created, db.request_load(&id).0);
            assert!(db.decrement_reference_count(&id));
            assert_eq!(0, db.unload_queue_len());

            assert!(db.finish_load(&id, counted(&id, &unloads)).is_ok());
            assert_eq!(1, db.unload_queue_len());
            db.process_unload_queue();
            assert_eq!(1, unloads.load(Ordering::SeqCst));
            assert!(db.is_empty());
        }

        #[test]
        fn reload_keeps_references()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let id = ResourceId::new("a.txt");
            loaded_entry(&db, &id, &unloads);
            assert!(db.increment_lock_count(&id));

            let previous = db.begin_reload(&id);
            assert!(previous.is_some());
            assert_eq!(ResourceLoadStatus::Loading, db.load_status(&id));
            drop(previous);
            assert_eq!(1, unloads.load(Ordering::SeqCst));

            assert!(db.finish_load(&id, counted(&id, &unloads)).is_ok());
            assert_eq!(1, db.reference_count(&id));
            assert_eq!(1, db.lock_count(&id));
        }

        #[test]
        fn insert_loaded_only_once()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let id = ResourceId::new("new.txt");
            assert!(db.insert_loaded(&id, counted(&id, &unloads)).is_ok());
            assert!(db.insert_loaded(&id, counted(&id, &unloads)).is_err());
            assert_eq!(ResourceLoadStatus::Loaded, db.load_status(&id));
            assert_eq!(1, db.reference_count(&id));
        }
    }

    mod unloading
    {
        use super::*;

        #[test]
        fn held_entries_are_not_unloaded()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let id = ResourceId::new("a.txt");
            loaded_entry(&db, &id, &unloads);

            assert!(!db.unload_entry(&id));
            assert!(db.increment_lock_count(&id));
            assert!(!db.decrement_reference_count(&id));
            assert!(!db.unload_entry(&id));
            assert_eq!(0, db.unload_queue_len());

            assert!(db.decrement_lock_count(&id));
            assert_eq!(1, db.unload_queue_len());
            assert_eq!(ResourceLoadStatus::Loaded, db.load_status(&id));

            db.process_unload_queue();
            assert_eq!(1, unloads.load(Ordering::SeqCst));
            assert_eq!(ResourceLoadStatus::Invalid, db.load_status(&id));
        }

        #[test]
        fn reacquired_before_sweep_survives()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let id = ResourceId::new("a.txt");
            loaded_entry(&db, &id, &unloads);

            assert!(db.decrement_reference_count(&id));
            assert!(db.increment_reference_count(&id));
            db.process_unload_queue();

            assert_eq!(0, unloads.load(Ordering::SeqCst));
            assert_eq!(ResourceLoadStatus::Loaded, db.load_status(&id));
        }

        #[test]
        fn borrowed_resource_unloads_on_last_borrow()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let id = ResourceId::new("a.txt");
            loaded_entry(&db, &id, &unloads);

            let borrowed = db.resource(&id);
            assert!(db.decrement_reference_count(&id));
            db.process_unload_queue();
            assert!(db.is_empty());
            assert_eq!(0, unloads.load(Ordering::SeqCst));

            drop(borrowed);
            assert_eq!(1, unloads.load(Ordering::SeqCst));
        }

        #[test]
        fn unload_all_reports_leaks()
        {
            let db = ResourceDatabase::default();
            let unloads = Arc::new(AtomicUsize::new(0));
            let held = ResourceId::new("held.txt");
            let free = ResourceId::new("free.txt");
            loaded_entry(&db, &held, &unloads);
            loaded_entry(&db, &free, &unloads);
            assert!(db.decrement_reference_count(&free));

            assert_eq!(1, db.unload_all());
            assert_eq!(2, unloads.load(Ordering::SeqCst));
            assert!(db.is_empty());
            assert_eq!(0, db.unload_queue_len());
        }
    }
}
