use crate::ResourceId;
use parking_lot::Mutex;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

/// Notified once when a requested resource finishes loading.
///
/// The return value reports whether the listener released its interest; the cache ignores it.
/// Listeners are not notified of failed loads.
pub trait ResourceListener: Send + Sync
{
    fn on_resource_loaded(&self, id: &ResourceId) -> bool;
}
impl<F: Fn(&ResourceId) -> bool + Send + Sync> ResourceListener for F
{
    fn on_resource_loaded(&self, id: &ResourceId) -> bool { self(id) }
}

/// A generational reference to a registered listener.
/// Keys outlive their listener safely: once the subscription is dropped the key no longer resolves.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerKey
{
    index: u32,
    generation: u32,
}
impl Debug for ListenerKey
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result
    {
        f.write_fmt(format_args!("Listener#{}.{}", self.index, self.generation))
    }
}

struct ListenerSlot
{
    generation: u32,
    listener: Option<Arc<dyn ResourceListener>>,
}

#[derive(Default)]
struct ListenerSlots
{
    slots: Vec<ListenerSlot>,
    free: Vec<u32>,
    live: usize,
}

#[derive(Default)]
pub struct ListenerTable
{
    slots: Mutex<ListenerSlots>,
}
impl ListenerTable
{
    #[must_use]
    pub fn register(self: &Arc<Self>, listener: Arc<dyn ResourceListener>) -> ListenerSubscription
    {
        let mut slots = self.slots.lock();
        slots.live += 1;

        let key = match slots.free.pop()
        {
            Some(index) =>
            {
                let slot = &mut slots.slots[index as usize];
                debug_assert!(slot.listener.is_none());
                slot.listener = Some(listener);
                ListenerKey { index, generation: slot.generation }
            },
            None =>
            {
                let index = slots.slots.len() as u32;
                slots.slots.push(ListenerSlot { generation: 0, listener: Some(listener) });
                ListenerKey { index, generation: 0 }
            },
        };

        ListenerSubscription { key, table: self.clone() }
    }

    fn unregister(&self, key: ListenerKey)
    {
        let mut slots = self.slots.lock();
        let Some(slot) = slots.slots.get_mut(key.index as usize) else { return; };
        if slot.generation != key.generation || slot.listener.is_none()
        {
            return;
        }

        slot.listener = None;
        slot.generation = slot.generation.wrapping_add(1);
        slots.free.push(key.index);
        slots.live -= 1;
    }

    #[must_use]
    pub fn resolve(&self, key: ListenerKey) -> Option<Arc<dyn ResourceListener>>
    {
        let slots = self.slots.lock();
        let slot = slots.slots.get(key.index as usize)?;
        match slot.generation == key.generation
        {
            true => slot.listener.clone(),
            false => None,
        }
    }

    /// Notify a listener if it is still registered. Returns None for expired listeners.
    /// The listener is invoked without any lock held so it may freely call back into the cache.
    pub fn notify(&self, key: ListenerKey, id: &ResourceId) -> Option<bool>
    {
        let listener = self.resolve(key)?;
        Some(listener.on_resource_loaded(id))
    }

    #[inline] #[must_use]
    pub fn len(&self) -> usize { self.slots.lock().live }

    #[inline] #[must_use]
    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

/// Keeps a listener registered. Dropping it unregisters the listener and invalidates its key,
/// so pending notifications for it are skipped.
#[must_use]
pub struct ListenerSubscription
{
    key: ListenerKey,
    table: Arc<ListenerTable>,
}
impl ListenerSubscription
{
    #[inline]
    pub fn key(&self) -> ListenerKey { self.key }
}
impl Drop for ListenerSubscription
{
    fn drop(&mut self)
    {
        self.table.unregister(self.key);
    }
}
impl Debug for ListenerSubscription
{
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { Debug::fmt(&self.key, f) }
}

#[cfg(test)]
mod tests
{
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_listener(count: &Arc<AtomicUsize>) -> Arc<dyn ResourceListener>
    {
        let count = count.clone();
        Arc::new(move |_id: &ResourceId|
        {
            count.fetch_add(1, Ordering::SeqCst);
            true
        })
    }

    #[test]
    fn notify_live_listener()
    {
        let table = Arc::new(ListenerTable::default());
        let count = Arc::new(AtomicUsize::new(0));
        let sub = table.register(counting_listener(&count));

        assert_eq!(Some(true), table.notify(sub.key(), &ResourceId::new("a.txt")));
        assert_eq!(1, count.load(Ordering::SeqCst));
        assert_eq!(1, table.len());
    }

    #[test]
    fn expired_listener_skipped()
    {
        let table = Arc::new(ListenerTable::default());
        let count = Arc::new(AtomicUsize::new(0));
        let sub = table.register(counting_listener(&count));
        let key = sub.key();
        drop(sub);

        assert!(table.is_empty());
        assert_eq!(None, table.notify(key, &ResourceId::new("a.txt")));
        assert_eq!(0, count.load(Ordering::SeqCst));
    }

    #[test]
    fn reused_slot_does_not_resolve_stale_key()
    {
        let table = Arc::new(ListenerTable::default());
        let first_count = Arc::new(AtomicUsize::new(0));
        let second_count = Arc::new(AtomicUsize::new(0));

        let first = table.register(counting_listener(&first_count));
        let stale_key = first.key();
        drop(first);

        let second = table.register(counting_listener(&second_count));
        assert_eq!(stale_key.index, second.key().index);
        assert_ne!(stale_key, second.key());

        assert_eq!(None, table.notify(stale_key, &ResourceId::new("a.txt")));
        assert_eq!(Some(true), table.notify(second.key(), &ResourceId::new("a.txt")));
        assert_eq!(0, first_count.load(Ordering::SeqCst));
        assert_eq!(1, second_count.load(Ordering::SeqCst));
    }

    #[test]
    fn listener_may_reenter_table()
    {
        let table = Arc::new(ListenerTable::default());
        let inner_table = table.clone();
        let sub = table.register(Arc::new(move |_id: &ResourceId| inner_table.len() == 1));

        assert_eq!(Some(true), table.notify(sub.key(), &ResourceId::new("a.txt")));
    }
}
