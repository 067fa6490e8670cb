#![cfg(test)]

use parking_lot::Mutex;
use rand::Rng;
use resource_kiln::resource_types::TextFileResource;
use resource_kiln::*;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::{tempdir, TempDir};

fn write_file(dir: &TempDir, relative: &str, contents: &str)
{
    let path = dir.path().join(relative);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

#[derive(Default)]
struct Counters
{
    loads: AtomicUsize,
    unloads: AtomicUsize,
    // held by a test to stall decoding on the worker
    decode_gate: Mutex<()>,
}

struct CountedText
{
    counters: Arc<Counters>,
}
impl Resource for CountedText
{
    fn load(&mut self, _raw_bytes: Vec<u8>) -> LoadResult
    {
        let _gate = self.counters.decode_gate.lock();
        self.counters.loads.fetch_add(1, Ordering::SeqCst);
        LoadResult::Succeeded
    }

    fn unload(&mut self)
    {
        self.counters.unloads.fetch_add(1, Ordering::SeqCst);
    }
}

fn counting_loader(pack: Arc<PackByteSource>) -> (ResourceLoader, Arc<Counters>)
{
    let counters = Arc::new(Counters::default());
    let factory_counters = counters.clone();
    let factory = move |_id: &ResourceId| -> Option<Box<dyn Resource>>
    {
        Some(Box::new(CountedText { counters: factory_counters.clone() }))
    };

    let config = ResourceConfig { resource_root: PathBuf::from("unused"), ..ResourceConfig::default() };
    (ResourceLoader::new(factory, pack, &config).unwrap(), counters)
}

mod scenarios
{
    use super::*;

    #[test]
    fn second_handle_survives_first()
    {
        let pack = Arc::new(PackByteSource::new());
        pack.insert(ResourceId::new("tex.png"), "pixels");
        let (loader, counters) = counting_loader(pack);

        let first = ResourceHandle::new(&loader, ResourceId::new("tex.png"), true);
        let mut second = ResourceHandle::new(&loader, ResourceId::new("tex.png"), true);
        let resource = second.get(false).unwrap();

        drop(first);
        loader.process_unload_queue();
        assert_eq!(0, counters.unloads.load(Ordering::SeqCst));
        assert!(Arc::ptr_eq(&resource, &second.get(false).unwrap()));

        drop(second);
        drop(resource);
        loader.process_unload_queue();
        assert_eq!(1, counters.loads.load(Ordering::SeqCst));
        assert_eq!(1, counters.unloads.load(Ordering::SeqCst));
        assert_eq!(0, loader.num_entries());
    }

    #[test]
    fn two_listeners_one_decode()
    {
        let pack = Arc::new(PackByteSource::new());
        pack.insert(ResourceId::new("tex.png"), "pixels");
        let (loader, counters) = counting_loader(pack);

        let notified = Arc::new(Mutex::new(Vec::new()));
        let notified_a = notified.clone();
        let notified_b = notified.clone();
        let listener_a = loader.subscribe(move |_id: &ResourceId| { notified_a.lock().push("A"); true });
        let listener_b = loader.subscribe(move |_id: &ResourceId| { notified_b.lock().push("B"); true });

        let mut handle_a = ResourceHandle::new(&loader, ResourceId::new("tex.png"), false);
        let mut handle_b = ResourceHandle::new(&loader, ResourceId::new("tex.png"), false);
        let decode_gate = counters.decode_gate.lock();
        assert!(handle_a.queue_load(true, Some(listener_a.key())));
        assert!(handle_b.queue_load(false, Some(listener_b.key())));
        assert_eq!(ResourceLoadStatus::Loading, loader.load_status(&ResourceId::new("tex.png")));
        drop(decode_gate);
        loader.signal_and_wait();

        assert_eq!(1, counters.loads.load(Ordering::SeqCst));
        assert_eq!(vec!["A", "B"], *notified.lock());
        assert_eq!(2, loader.reference_count(&ResourceId::new("tex.png")));
    }

    #[test]
    fn missing_resource()
    {
        let (loader, counters) = counting_loader(Arc::new(PackByteSource::new()));
        let fired = Arc::new(AtomicUsize::new(0));
        let listener_fired = fired.clone();
        let listener = loader.subscribe(move |_id: &ResourceId| { listener_fired.fetch_add(1, Ordering::SeqCst); true });

        let id = ResourceId::new("missing.json");
        assert!(!loader.load_now(&id, Some(listener.key())));
        assert_eq!(ResourceLoadStatus::Invalid, loader.load_status(&id));
        assert!(loader.get_resource(&id, false).is_none());
        assert_eq!(0, fired.load(Ordering::SeqCst));
        assert_eq!(0, counters.loads.load(Ordering::SeqCst));
    }
}

mod disk
{
    use super::*;

    fn disk_loader(dir: &TempDir) -> ResourceLoader
    {
        let config = ResourceConfig { resource_root: dir.path().to_path_buf(), use_raw_assets: true, threaded: true };
        ResourceLoader::from_config(ExtensionResourceFactory::with_builtin_types(), &config).unwrap()
    }

    #[test]
    fn save_as_and_reload()
    {
        let dir = tempdir().unwrap();
        write_file(&dir, "maps/level1.tmx", "<map width=\"4\"/>");
        let loader = disk_loader(&dir);

        let mut level = ResourceHandle::new(&loader, ResourceId::new("maps/level1.tmx"), false);
        assert!(level.queue_load(true, None));
        loader.signal_and_wait();
        let text = level.get_as::<TextFileResource>(false).unwrap().text();

        let mut copy = ResourceHandle::empty(&loader);
        assert!(copy.create_new(ResourceId::new("maps/level2.tmx")));
        copy.get_as::<TextFileResource>(false).unwrap().set_text(text.replace('4', "8"));
        copy.save_resource().unwrap();
        assert_eq!("<map width=\"8\"/>", std::fs::read_to_string(dir.path().join("maps/level2.tmx")).unwrap());

        write_file(&dir, "maps/level1.tmx", "<map width=\"16\"/>");
        assert!(level.reload(false, None));
        loader.signal_and_wait();
        assert_eq!("<map width=\"16\"/>", level.get_as::<TextFileResource>(false).unwrap().text());
    }

    #[test]
    fn packed_from_config()
    {
        let dir = tempdir().unwrap();
        write_file(&dir, "greeting.txt", "hello");
        let config = ResourceConfig { resource_root: dir.path().to_path_buf(), use_raw_assets: false, threaded: false };
        let loader = ResourceLoader::from_config(ExtensionResourceFactory::with_builtin_types(), &config).unwrap();
        dir.close().unwrap();

        let mut handle = ResourceHandle::new(&loader, ResourceId::new("greeting.txt"), false);
        assert!(handle.queue_load(false, None));
        assert_eq!("hello", handle.get_as::<TextFileResource>(false).unwrap().text());
    }

    #[test]
    fn toml_config()
    {
        let toml = "resource_root = \"somewhere\"\nuse_raw_assets = true\n";
        let config = ResourceConfig::load(&mut toml.as_bytes()).unwrap();
        assert_eq!(PathBuf::from("somewhere"), config.resource_root);
        assert!(config.threaded);
    }
}

mod stress
{
    use super::*;

    const RESOURCE_COUNT: usize = 8;
    const THREAD_COUNT: usize = 4;
    const ITERATIONS: usize = 500;

    #[test]
    fn concurrent_handles()
    {
        let pack = Arc::new(PackByteSource::new());
        let ids: Vec<ResourceId> = (0..RESOURCE_COUNT).map(|i| ResourceId::new(&format!("stress/{i}.bin"))).collect();
        for id in &ids
        {
            pack.insert(id.clone(), id.as_str());
        }
        let (loader, counters) = counting_loader(pack);

        std::thread::scope(|scope|
        {
            for _ in 0..THREAD_COUNT
            {
                scope.spawn(||
                {
                    let mut rng = rand::rng();
                    let mut handles: Vec<ResourceHandle> = Vec::new();
                    for _ in 0..ITERATIONS
                    {
                        let id = ids[rng.random_range(0..RESOURCE_COUNT)].clone();
                        match rng.random_range(0..5)
                        {
                            0 =>
                            {
                                let mut handle = ResourceHandle::new(&loader, id, false);
                                handle.queue_load(rng.random_bool(0.5), None);
                                handles.push(handle);
                            },
                            1 => handles.push(ResourceHandle::new(&loader, id, true)),
                            2 if !handles.is_empty() =>
                            {
                                let index = rng.random_range(0..handles.len());
                                handles.swap_remove(index);
                            },
                            3 if !handles.is_empty() =>
                            {
                                let index = rng.random_range(0..handles.len());
                                let cloned = handles[index].clone();
                                handles.push(cloned);
                            },
                            _ =>
                            {
                                for handle in &mut handles
                                {
                                    let _ = handle.get(false);
                                }
                            },
                        }
                    }
                });
            }

            // the sweep runs on one thread while the others churn
            for _ in 0..ITERATIONS
            {
                loader.process_unload_queue();
                std::thread::yield_now();
            }
        });

        loader.signal_and_wait();
        loader.process_unload_queue();

        assert_eq!(0, loader.num_entries());
        assert_eq!(counters.loads.load(Ordering::SeqCst), counters.unloads.load(Ordering::SeqCst));
        for id in &ids
        {
            assert_eq!(ResourceLoadStatus::Invalid, loader.load_status(id));
        }
    }
}
