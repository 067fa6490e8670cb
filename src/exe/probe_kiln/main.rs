use clap::Parser;
use nab_kiln::app::{set_panic_hook, AppRun, ExitReason};
use resource_kiln::resource_types::TextFileResource;
use resource_kiln::*;
use std::error::Error;
use std::path::PathBuf;

#[derive(Debug, Parser)]
struct CliArgs
{
    /// Directory to serve resources from (overrides the config)
    #[arg(long)]
    root: Option<PathBuf>,

    /// A TOML resource config
    #[arg(long)]
    config: Option<PathBuf>,

    /// Load on this thread instead of the worker
    #[arg(long)]
    sync: bool,

    /// Save a copy of the first (text) resource under this id
    #[arg(long)]
    save_as: Option<String>,

    /// Resource ids (paths relative to the root)
    ids: Vec<String>,
}

fn load_config(args: &CliArgs, default_root: PathBuf) -> Result<ResourceConfig, Box<dyn Error>>
{
    let mut config = match &args.config
    {
        Some(path) => ResourceConfig::load_file(path)?,
        None => ResourceConfig { resource_root: default_root, ..ResourceConfig::default() },
    };
    if let Some(root) = &args.root
    {
        config.resource_root = root.clone();
    }
    Ok(config)
}

fn save_copy(loader: &ResourceLoader, source: &mut ResourceHandle, target: &str) -> Result<(), Box<dyn Error>>
{
    let Some(text) = source.get_as::<TextFileResource>(false) else
    {
        return Err(format!("{} is not a loaded text resource", source.id()).into());
    };

    let mut copy = ResourceHandle::empty(loader);
    if !copy.create_new(ResourceId::new(target))
    {
        return Err(format!("Cannot create {target}").into());
    }
    let Some(copy_text) = copy.get_as::<TextFileResource>(false) else
    {
        return Err(format!("{target} is not a text resource").into());
    };

    copy_text.set_text(text.text());
    copy.save_resource()?;
    log::info!("Saved {} as {target}", source.id());
    Ok(())
}

// returns true if every resource loaded
fn probe(args: &CliArgs, default_root: PathBuf) -> Result<bool, Box<dyn Error>>
{
    let config = load_config(args, default_root)?;
    let loader = ResourceLoader::from_config(ExtensionResourceFactory::with_builtin_types(), &config)?;

    let loaded_listener = loader.subscribe(|id: &ResourceId|
    {
        log::info!("Loaded {id}");
        true
    });

    let mut handles: Vec<ResourceHandle> = args.ids.iter()
        .map(|id| ResourceHandle::new(&loader, ResourceId::new(id), false))
        .collect();
    for handle in &mut handles
    {
        match args.sync
        {
            true => handle.load_now(Some(loaded_listener.key())),
            false => handle.queue_load(true, Some(loaded_listener.key())),
        };
    }
    loader.signal_and_wait();

    let mut all_loaded = true;
    for handle in &mut handles
    {
        match handle.get(false)
        {
            Some(resource) =>
            {
                let size = resource.save().map_or_else(|| "?".to_string(), |bytes| bytes.len().to_string());
                println!("{:<40} {:?} ({size} bytes, {} ref(s))",
                    handle.id(),
                    handle.load_status(),
                    loader.reference_count(handle.id()));
            },
            None =>
            {
                all_loaded = false;
                println!("{:<40} {:?}", handle.id(), handle.load_status());
            },
        }
    }

    if let (Some(target), Some(first)) = (&args.save_as, handles.first_mut())
    {
        save_copy(&loader, first, target)?;
    }

    drop(handles);
    loader.process_unload_queue();
    log::debug!("{} resource(s) remain cached", loader.num_entries());
    Ok(all_loaded)
}

fn main() -> ExitReason
{
    let app_run = AppRun::<CliArgs>::startup("Kiln Probe", env!("CARGO_PKG_VERSION"));
    set_panic_hook();

    let exit_reason = match probe(&app_run.args, app_run.resources_dir())
    {
        Ok(true) => ExitReason::NormalExit,
        Ok(false) => ExitReason::Failure,
        Err(err) =>
        {
            log::error!("{err}");
            ExitReason::Failure
        }
    };
    app_run.set_exit_reason(exit_reason);
    exit_reason
}
