use crate::resource_database::LoadRequest;
use crate::*;
use crossbeam::channel::{bounded, unbounded, Receiver, Sender};
use nab_kiln::debug_panic;
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::io::ErrorKind;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{Builder, JoinHandle};

const LOG_TARGET: &str = "ResourceLoader";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceLoadError
{
    SourceUnavailable, // raw bytes could not be read, or were empty
    FactoryFailure, // the factory does not know this resource type
    DecodeFailure,
    Shutdown, // the loader has shut down and no new resources can be loaded
}
impl Display for ResourceLoadError
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Debug::fmt(self, f) }
}
impl Error for ResourceLoadError { }

enum WorkerSignal
{
    Process,
    Flush(Sender<()>), // acknowledged once the queue has been drained
    Stop(Sender<()>),
}

// How a reload request was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReloadRequest
{
    Failed, // refused, or a forced load failed
    Reloading, // the loaded resource was evicted and is loading (or has loaded) again, references kept
    Granted(EntryGeneration), // the resource was not loaded, this requested its load and granted a reference
}

#[derive(Default)]
struct PendingLoads
{
    queue: VecDeque<ResourceId>,
    listeners: HashMap<ResourceId, Vec<ListenerKey>>,
}
impl PendingLoads
{
    fn add_listener(&mut self, id: &ResourceId, listener: Option<ListenerKey>)
    {
        if let Some(key) = listener
        {
            self.listeners.entry(id.clone()).or_default().push(key);
        }
    }

    // Pull a load out of the queue if the worker has not picked it up yet
    fn steal(&mut self, id: &ResourceId) -> bool
    {
        let before = self.queue.len();
        self.queue.retain(|queued| queued != id);
        self.queue.len() != before
    }
}

// Shared by the loader, its worker and every handle
pub(crate) struct LoaderInner
{
    database: ResourceDatabase,
    // guards both the deferred queue and listener registration; entry creation happens under it
    pending: Mutex<PendingLoads>,
    listeners: Arc<ListenerTable>,
    factory: Box<dyn ResourceFactory>,
    source: Arc<dyn ByteSource>,
    threaded: bool,
    is_shut_down: AtomicBool,
    worker_signal: Sender<WorkerSignal>,
}
impl LoaderInner
{
    fn check_id(id: &ResourceId) -> bool
    {
        if !id.is_valid()
        {
            debug_panic!("Invalid resource id");
            return false;
        }
        true
    }

    // Returns the generation of the entry the caller was granted a reference to
    pub(crate) fn queue_load(&self, id: &ResourceId, signal_worker: bool, listener: Option<ListenerKey>) -> Option<EntryGeneration>
    {
        if !Self::check_id(id) { return None; }

        if !self.threaded
        {
            return self.load_now(id, listener);
        }

        let (request, generation) =
        {
            let mut pending = self.pending.lock();
            if self.is_shut_down.load(Ordering::Acquire)
            {
                log::warn!(target: LOG_TARGET, "Not queueing {id}: {}", ResourceLoadError::Shutdown);
                return None;
            }

            let (request, generation) = self.database.request_load(id);
            match request
            {
                LoadRequest::Created =>
                {
                    log::debug!(target: LOG_TARGET, "Queueing load of {id}");
                    pending.queue.push_back(id.clone());
                    pending.add_listener(id, listener);
                },
                LoadRequest::Loading => pending.add_listener(id, listener),
                LoadRequest::Loaded => { },
            }
            (request, generation)
        };

        match request
        {
            LoadRequest::Created if signal_worker => self.signal_worker(),
            LoadRequest::Loaded => self.notify_listeners(id, listener),
            _ => { },
        }
        Some(generation)
    }

    // Returns the generation of the entry the caller was granted a reference to
    pub(crate) fn load_now(&self, id: &ResourceId, listener: Option<ListenerKey>) -> Option<EntryGeneration>
    {
        if !Self::check_id(id) { return None; }

        let (request, generation) =
        {
            let mut pending = self.pending.lock();
            if self.is_shut_down.load(Ordering::Acquire)
            {
                log::warn!(target: LOG_TARGET, "Not loading {id}: {}", ResourceLoadError::Shutdown);
                return None;
            }

            let (request, generation) = match self.database.request_load(id)
            {
                (LoadRequest::Loading, generation) if pending.steal(id) => (LoadRequest::Created, generation),
                requested => requested,
            };
            if request != LoadRequest::Loaded
            {
                pending.add_listener(id, listener);
            }
            (request, generation)
        };

        match request
        {
            LoadRequest::Created =>
            {
                let result = self.load_resource(id);
                self.complete_load(id, result).then_some(generation)
            },
            // in flight elsewhere, the listener fires when that finishes
            LoadRequest::Loading => Some(generation),
            LoadRequest::Loaded =>
            {
                self.notify_listeners(id, listener);
                Some(generation)
            },
        }
    }

    pub(crate) fn load_status(&self, id: &ResourceId) -> ResourceLoadStatus
    {
        self.database.load_status(id)
    }

    pub(crate) fn is_resource_acquirable(&self, id: &ResourceId) -> bool
    {
        self.database.load_status(id) == ResourceLoadStatus::Loaded
    }

    // Acquire the current entry, or only `expected` if given
    pub(crate) fn acquire_resource(&self, id: &ResourceId, expected: Option<EntryGeneration>) -> Option<EntryGeneration>
    {
        self.database.acquire_live(id, expected)
    }

    pub(crate) fn release_resource(&self, id: &ResourceId) -> bool
    {
        self.database.decrement_reference_count(id)
    }

    // Release a reference granted on a specific generation of the entry
    pub(crate) fn release_generation(&self, id: &ResourceId, generation: EntryGeneration) -> bool
    {
        self.database.release_generation(id, generation)
    }

    pub(crate) fn is_current_generation(&self, id: &ResourceId, generation: EntryGeneration) -> bool
    {
        self.database.generation(id) == Some(generation)
    }

    pub(crate) fn lock_resource(&self, id: &ResourceId) -> bool
    {
        self.database.increment_lock_count(id)
    }

    pub(crate) fn unlock_resource(&self, id: &ResourceId) -> bool
    {
        self.database.decrement_lock_count(id)
    }

    pub(crate) fn get_resource(&self, id: &ResourceId, force_load: bool) -> Option<ResourceRef>
    {
        match self.database.load_status(id)
        {
            ResourceLoadStatus::Loaded => self.database.resource(id),
            ResourceLoadStatus::Loading => None,
            _ if force_load =>
            {
                let generation = self.load_now(id, None)?;
                let resource = self.database.resource(id);
                // a forced load is not retained on behalf of the caller
                self.release_generation(id, generation);
                resource
            },
            _ => None,
        }
    }

    pub(crate) fn reload_resource(&self, id: &ResourceId, force_load: bool, listener: Option<ListenerKey>) -> ReloadRequest
    {
        if !Self::check_id(id) { return ReloadRequest::Failed; }

        let previous =
        {
            let mut pending = self.pending.lock();
            if self.is_shut_down.load(Ordering::Acquire)
            {
                log::warn!(target: LOG_TARGET, "Not reloading {id}: {}", ResourceLoadError::Shutdown);
                return ReloadRequest::Failed;
            }

            match self.database.begin_reload(id)
            {
                Some(previous) =>
                {
                    pending.add_listener(id, listener);
                    if !force_load && self.threaded
                    {
                        pending.queue.push_back(id.clone());
                    }
                    previous
                },
                None =>
                {
                    drop(pending);
                    let granted = match force_load
                    {
                        true => self.load_now(id, listener),
                        false => self.queue_load(id, true, listener),
                    };
                    return granted.map_or(ReloadRequest::Failed, ReloadRequest::Granted);
                },
            }
        };

        log::info!(target: LOG_TARGET, "Reloading {id}");
        drop(previous);

        match force_load || !self.threaded
        {
            true =>
            {
                let result = self.load_resource(id);
                match self.complete_load(id, result)
                {
                    true => ReloadRequest::Reloading,
                    false => ReloadRequest::Failed,
                }
            },
            false =>
            {
                self.signal_worker();
                ReloadRequest::Reloading
            },
        }
    }

    pub(crate) fn create_new_resource(&self, id: &ResourceId) -> Option<EntryGeneration>
    {
        if !Self::check_id(id) { return None; }

        if self.database.load_status(id) != ResourceLoadStatus::Invalid
        {
            log::info!(target: LOG_TARGET, "Cannot create {id}, it already exists");
            return None;
        }

        let Some(resource) = self.factory.create_resource(id) else
        {
            log::warn!(target: LOG_TARGET, "Cannot create {id}: {}", ResourceLoadError::FactoryFailure);
            return None;
        };

        match self.database.insert_loaded(id, Arc::new(LoadedResource::new(id.clone(), resource)))
        {
            Ok(generation) =>
            {
                log::debug!(target: LOG_TARGET, "Created new resource {id}");
                Some(generation)
            },
            Err(_resource) =>
            {
                log::info!(target: LOG_TARGET, "Cannot create {id}, it was created concurrently");
                None
            }
        }
    }

    pub(crate) fn save_resource(&self, id: &ResourceId) -> std::io::Result<()>
    {
        let Some(resource) = self.database.resource(id) else
        {
            return Err(std::io::Error::new(ErrorKind::NotFound, format!("Cannot save {id}, it is not loaded")));
        };
        let Some(bytes) = resource.save() else
        {
            return Err(std::io::Error::new(ErrorKind::Unsupported, format!("{id} does not support saving")));
        };

        log::info!(target: LOG_TARGET, "Saving {id} ({} bytes)", bytes.len());
        self.source.store_bytes(id, &bytes)
    }

    fn load_resource(&self, id: &ResourceId) -> Result<ResourceRef, ResourceLoadError>
    {
        puffin::profile_scope!("Load resource", id.as_str());

        let bytes = match self.source.load_bytes(id)
        {
            Ok(bytes) if !bytes.is_empty() => bytes,
            Ok(_) =>
            {
                log::warn!(target: LOG_TARGET, "{id} is empty");
                return Err(ResourceLoadError::SourceUnavailable);
            },
            Err(err) =>
            {
                log::warn!(target: LOG_TARGET, "Failed to read {id}: {err}");
                return Err(ResourceLoadError::SourceUnavailable);
            },
        };

        let mut resource = self.factory.create_resource(id).ok_or(ResourceLoadError::FactoryFailure)?;
        match resource.load(bytes)
        {
            LoadResult::Failed => Err(ResourceLoadError::DecodeFailure),
            LoadResult::Succeeded | LoadResult::SucceededKeepingRawBytes =>
                Ok(Arc::new(LoadedResource::new(id.clone(), resource))),
        }
    }

    // Store the result of a load and notify its listeners. Returns true on success
    fn complete_load(&self, id: &ResourceId, result: Result<ResourceRef, ResourceLoadError>) -> bool
    {
        let resource = match result
        {
            Ok(resource) => resource,
            Err(err) =>
            {
                self.fail_load(id, err);
                return false;
            }
        };

        let (finished, listeners) =
        {
            let mut pending = self.pending.lock();
            let finished = self.database.finish_load(id, resource);
            (finished, pending.listeners.remove(id).unwrap_or_default())
        };

        match finished
        {
            Ok(()) =>
            {
                log::info!(target: LOG_TARGET, "Loaded {id}");
                for key in listeners
                {
                    self.notify_listeners(id, Some(key));
                }
                true
            },
            Err(_discarded) =>
            {
                log::warn!(target: LOG_TARGET, "Discarding load of {id}, it is no longer loading");
                false
            }
        }
    }

    fn fail_load(&self, id: &ResourceId, err: ResourceLoadError)
    {
        log::warn!(target: LOG_TARGET, "Failed to load {id}: {err}");

        let listeners =
        {
            let mut pending = self.pending.lock();
            self.database.fail_load(id);
            pending.listeners.remove(id)
        };

        // listeners only hear about successful loads
        if let Some(listeners) = listeners
        {
            log::debug!(target: LOG_TARGET, "{} listener(s) of {id} will not be notified", listeners.len());
        }
    }

    fn notify_listeners(&self, id: &ResourceId, listener: Option<ListenerKey>)
    {
        let Some(key) = listener else { return; };
        if self.listeners.notify(key, id).is_none()
        {
            log::trace!(target: LOG_TARGET, "Skipping expired {key:?} for {id}");
        }
    }

    fn signal_worker(&self)
    {
        // fails only if the worker has already exited
        let _ = self.worker_signal.send(WorkerSignal::Process);
    }

    // Swap out the queue and load everything in it, in order
    fn process_pending(&self)
    {
        let queue = std::mem::take(&mut self.pending.lock().queue);
        if queue.is_empty()
        {
            return;
        }

        puffin::profile_scope!("Process pending loads");
        log::trace!(target: LOG_TARGET, "Processing {} pending load(s)", queue.len());
        for id in queue
        {
            if self.database.load_status(&id) != ResourceLoadStatus::Loading
            {
                log::debug!(target: LOG_TARGET, "Skipping queued load of {id}, it is no longer loading");
                continue;
            }

            let result = self.load_resource(&id);
            self.complete_load(&id, result);
        }
    }

    fn worker_fn(self: Arc<Self>, signal_recv: Receiver<WorkerSignal>) -> impl FnOnce()
    {
        move ||
        {
            log::debug!(target: LOG_TARGET, "Starting resource worker thread");
            loop
            {
                match signal_recv.recv()
                {
                    Ok(WorkerSignal::Process) => self.process_pending(),
                    Ok(WorkerSignal::Flush(ack)) =>
                    {
                        self.process_pending();
                        let _ = ack.send(());
                    },
                    Ok(WorkerSignal::Stop(ack)) =>
                    {
                        log::debug!(target: LOG_TARGET, "Shutting down resource worker thread");

                        let abandoned = std::mem::take(&mut self.pending.lock().queue);
                        for id in abandoned
                        {
                            self.fail_load(&id, ResourceLoadError::Shutdown);
                        }

                        // release anyone still waiting on a flush
                        while let Ok(final_signal) = signal_recv.try_recv()
                        {
                            match final_signal
                            {
                                WorkerSignal::Process => { },
                                WorkerSignal::Flush(other_ack) | WorkerSignal::Stop(other_ack) => { let _ = other_ack.send(()); },
                            }
                        }

                        let _ = ack.send(());
                        break;
                    },
                    Err(_) => break,
                }
            }
        }
    }
}

/// The resource cache.
///
/// Loads are requested by id, deduplicated, and performed by a single background worker (or on the
/// calling thread with [`Self::load_now`]). Each successful `queue_load`/`load_now` grants the
/// caller one reference, which must be released with [`Self::release_resource`]; most callers should
/// use a [`ResourceHandle`] which does this automatically. Unreferenced resources are evicted by
/// [`Self::process_unload_queue`], which the host calls periodically from one thread.
pub struct ResourceLoader
{
    inner: Arc<LoaderInner>,
    worker: Mutex<Option<JoinHandle<()>>>,
}
impl ResourceLoader
{
    pub fn new(factory: impl ResourceFactory + 'static, source: Arc<dyn ByteSource>, config: &ResourceConfig) -> std::io::Result<Self>
    {
        let (signal_send, signal_recv) = unbounded::<WorkerSignal>();
        let inner = Arc::new(LoaderInner
        {
            database: ResourceDatabase::default(),
            pending: Mutex::new(PendingLoads::default()),
            listeners: Arc::new(ListenerTable::default()),
            factory: Box::new(factory),
            source,
            threaded: config.threaded,
            is_shut_down: AtomicBool::new(false),
            worker_signal: signal_send,
        });

        let worker = match config.threaded
        {
            true => Some(Builder::new()
                .name("Resource worker thread".to_string())
                .spawn(LoaderInner::worker_fn(inner.clone(), signal_recv))?),
            false =>
            {
                log::debug!(target: LOG_TARGET, "Running single-threaded, queued loads will complete immediately");
                None
            }
        };

        Ok(Self
        {
            inner,
            worker: Mutex::new(worker),
        })
    }

    /// Build a loader from configuration, reading resources with the configured byte source
    pub fn from_config(factory: impl ResourceFactory + 'static, config: &ResourceConfig) -> std::io::Result<Self>
    {
        let source = config.create_byte_source()?;
        Self::new(factory, source, config)
    }

    #[inline] #[must_use]
    pub(crate) fn inner(&self) -> &Arc<LoaderInner> { &self.inner }

    #[inline] #[must_use]
    pub fn database(&self) -> &ResourceDatabase { &self.inner.database }

    #[inline] #[must_use]
    pub fn is_threaded(&self) -> bool { self.inner.threaded }

    /// Register a listener. It stays registered until the returned subscription is dropped
    pub fn subscribe(&self, listener: impl ResourceListener + 'static) -> ListenerSubscription
    {
        self.inner.listeners.register(Arc::new(listener))
    }

    /// Request a resource be loaded in the background, deduplicating with in-flight requests.
    /// If the resource is already loaded the listener is notified immediately.
    /// Returns true if the caller was granted a reference.
    pub fn queue_load(&self, id: &ResourceId, signal_worker: bool, listener: Option<ListenerKey>) -> bool
    {
        self.inner.queue_load(id, signal_worker, listener).is_some()
    }

    /// Load a resource on this thread. Does not wait if another thread is already loading it.
    /// Returns true if the caller was granted a reference.
    pub fn load_now(&self, id: &ResourceId, listener: Option<ListenerKey>) -> bool
    {
        self.inner.load_now(id, listener).is_some()
    }

    #[must_use]
    pub fn is_resource_acquirable(&self, id: &ResourceId) -> bool { self.inner.is_resource_acquirable(id) }

    pub fn acquire_resource(&self, id: &ResourceId) -> bool { self.inner.acquire_resource(id, None).is_some() }

    /// Returns true if this released the last reference and lock
    pub fn release_resource(&self, id: &ResourceId) -> bool { self.inner.release_resource(id) }

    pub fn lock_resource(&self, id: &ResourceId) -> bool { self.inner.lock_resource(id) }

    /// Returns true if this released the last reference and lock
    pub fn unlock_resource(&self, id: &ResourceId) -> bool { self.inner.unlock_resource(id) }

    /// The loaded resource. Never blocks: returns None while loading.
    /// With `force_load`, an absent resource is loaded on this thread first. A forced load does not
    /// keep the resource cached, acquire it (or use a handle) for that.
    #[must_use]
    pub fn get_resource(&self, id: &ResourceId, force_load: bool) -> Option<ResourceRef>
    {
        self.inner.get_resource(id, force_load)
    }

    /// Evict and load again a loaded resource, keeping its references and locks.
    /// Resources that are not loaded are loaded as by `queue_load`/`load_now`.
    /// Returns true if the caller was granted a reference.
    pub fn reload_resource(&self, id: &ResourceId, force_load: bool, listener: Option<ListenerKey>) -> bool
    {
        matches!(self.inner.reload_resource(id, force_load, listener), ReloadRequest::Granted(_))
    }

    /// Create a new, empty resource for an unused id (for save-as flows).
    /// On success the caller holds the new resource's only reference.
    pub fn create_new_resource(&self, id: &ResourceId) -> bool { self.inner.create_new_resource(id).is_some() }

    pub fn save_resource(&self, id: &ResourceId) -> std::io::Result<()> { self.inner.save_resource(id) }

    /// Wait for the worker to finish all loads queued so far.
    /// Must not be called from a listener, which runs on the worker.
    pub fn signal_and_wait(&self)
    {
        if !self.inner.threaded || self.inner.is_shut_down.load(Ordering::Acquire)
        {
            return;
        }

        let (ack_send, ack_recv) = bounded(1);
        if self.inner.worker_signal.send(WorkerSignal::Flush(ack_send)).is_ok()
        {
            let _ = ack_recv.recv();
        }
    }

    /// Stop the worker, failing any loads it has not started. No new loads can be requested after this.
    pub fn shutdown(&self)
    {
        {
            let _pending = self.inner.pending.lock();
            if self.inner.is_shut_down.swap(true, Ordering::AcqRel)
            {
                return;
            }
        }
        log::debug!(target: LOG_TARGET, "Shutting down resource loader");

        let Some(worker) = self.worker.lock().take() else { return; };
        let (ack_send, ack_recv) = bounded(1);
        if self.inner.worker_signal.send(WorkerSignal::Stop(ack_send)).is_ok()
        {
            let _ = ack_recv.recv();
        }
        if worker.join().is_err()
        {
            log::error!(target: LOG_TARGET, "The resource worker thread panicked");
        }
    }

    #[inline]
    pub fn is_shut_down(&self) -> bool { self.inner.is_shut_down.load(Ordering::Acquire) }

    /// Evict every unreferenced, unlocked resource. Call from one thread only
    pub fn process_unload_queue(&self)
    {
        puffin::profile_function!();
        self.inner.database.process_unload_queue();
    }

    #[must_use]
    pub fn num_entries(&self) -> usize { self.inner.database.len() }

    #[must_use]
    pub fn load_status(&self, id: &ResourceId) -> ResourceLoadStatus { self.inner.database.load_status(id) }

    #[must_use]
    pub fn reference_count(&self, id: &ResourceId) -> u32 { self.inner.database.reference_count(id) }

    #[must_use]
    pub fn lock_count(&self, id: &ResourceId) -> u32 { self.inner.database.lock_count(id) }
}
impl Drop for ResourceLoader
{
    fn drop(&mut self)
    {
        self.shutdown();
        self.process_unload_queue();

        let leaked = self.inner.database.unload_all();
        if leaked > 0
        {
            log::error!(target: LOG_TARGET, "! Leak detected: {leaked} resource(s) were still referenced at shutdown");
        }
    }
}
