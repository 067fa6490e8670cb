use std::fmt::Debug;
use std::panic::PanicHookInfo;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicI32, Ordering};

// Panics in debug builds, logs and carries on in release builds
#[macro_export]
macro_rules! debug_panic
{
    ($($arg:tt)*) =>
    {
        if cfg!(debug_assertions)
        {
            panic!($($arg)*)
        }
        else
        {
            log::error!($($arg)*)
        }
    }
}

fn joined_args() -> String
{
    let mut out = String::new();
    for (i, arg) in std::env::args().enumerate()
    {
        if i > 0 { out.push(' '); }
        out.push_str(&arg);
    }
    out
}

pub trait CliArgs: clap::Parser + Debug { }
impl<T: clap::Parser + Debug> CliArgs for T { }

fn crate_name<T>() -> &'static str // hacky
{
    let name = std::any::type_name::<T>();
    match name.find("::")
    {
        Some(end) => &name[0..end],
        None => name,
    }
}

// Crates that log at the 'app' level rather than the global default
const ENGINE_CRATES: [&str; 2] = ["nab_kiln", "resource_kiln"];

#[derive(Debug)]
pub struct AppRun<TCliArgs: CliArgs>
{
    pub app_name: &'static str,
    pub version_str: &'static str,

    pub start_time: chrono::DateTime<chrono::Local>,
    pub args: TCliArgs,
    pub pid: u32,

    pub app_dir: PathBuf, // where the app exe is located (distinct from working dir)

    exit_reason: AtomicI32,
}
impl<TCliArgs: CliArgs> AppRun<TCliArgs>
{
    pub fn startup(app_name: &'static str, app_version: &'static str) -> Self
    {
        #[cfg(debug_assertions)]
        let default_log_levels = (log::LevelFilter::Warn, log::LevelFilter::Debug);
        #[cfg(not(debug_assertions))]
        let default_log_levels = (log::LevelFilter::Warn, log::LevelFilter::Info);

        let app_crate = crate_name::<TCliArgs>();
        let mut builder = colog::basic_builder();
        builder
            .filter_level(default_log_levels.0)
            .filter_module(app_crate, default_log_levels.1);
        for engine_crate in ENGINE_CRATES
        {
            builder.filter_module(engine_crate, default_log_levels.1);
        }
        // component targets (e.g. "ResourceLoader") are not module paths
        builder
            .filter_module("Resource", default_log_levels.1)
            .parse_default_env()
            .init();

        let app_dir = match std::env::current_exe()
        {
            Ok(mut path) =>
            {
                path.pop();
                path
            },
            Err(err) =>
            {
                log::warn!("Failed to get the bin dir, falling back to the working dir: {err}");
                PathBuf::from(".")
            },
        };

        let app_run = Self
        {
            app_name,
            version_str: app_version,
            start_time: chrono::Local::now(),
            args: TCliArgs::parse(),
            pid: std::process::id(),
            app_dir,
            exit_reason: AtomicI32::new(ExitReason::NormalExit as i32),
        };

        log::info!(target: app_crate,
            "=== Starting {} v{} [{}] (PID {}) at {} ===",
            app_run.app_name,
            app_run.version_str,
            joined_args(),
            app_run.pid,
            app_run.start_time);

        app_run
    }

    pub fn set_exit_reason(&self, exit_reason: ExitReason)
    {
        self.exit_reason.store(exit_reason as i32, Ordering::SeqCst);
    }
    pub fn get_exit_reason(&self) -> ExitReason
    {
        ExitReason::from_i32(self.exit_reason.load(Ordering::SeqCst))
    }

    // The default directory resources are served from
    pub fn resources_dir(&self) -> PathBuf
    {
        self.app_dir.join("resources")
    }
}
impl<TCliArgs: CliArgs> Drop for AppRun<TCliArgs>
{
    fn drop(&mut self)
    {
        log::info!(target: "app",
            "Exiting {} (PID {}) at {} with reason {:?}",
            self.app_name,
            self.pid,
            chrono::Local::now(),
            self.get_exit_reason());
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitReason
{
    NormalExit = 0,
    Failure = 1,
    Panic = -99,
}
impl ExitReason
{
    fn from_i32(value: i32) -> Self
    {
        match value
        {
            0 => Self::NormalExit,
            1 => Self::Failure,
            _ => Self::Panic,
        }
    }
}
impl std::process::Termination for ExitReason
{
    fn report(self) -> ExitCode
    {
        (self as u8).into()
    }
}

pub fn set_panic_hook()
{
    let default_panic_hook = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |panic: &PanicHookInfo|
    {
        default_panic_hook(panic);

        let location = panic.location().map(|l| l.to_string()).unwrap_or_default();
        log::error!(target: "app", "!!! FATAL: panicked at {location}");

        eprintln!("Exiting (PID {}) at {} with reason {:?}",
            std::process::id(),
            chrono::Local::now(),
            ExitReason::Panic);

        std::process::exit(ExitReason::Panic as i32)
    }));
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[derive(Debug, clap::Parser)]
    struct TestArgs { }

    #[test]
    fn crate_name_of_type()
    {
        assert_eq!("nab_kiln", crate_name::<TestArgs>());
        assert_eq!("u32", crate_name::<u32>());
    }

    #[test]
    fn exit_reason_round_trips()
    {
        for reason in [ExitReason::NormalExit, ExitReason::Failure, ExitReason::Panic]
        {
            assert_eq!(reason, ExitReason::from_i32(reason as i32));
        }
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic]
    fn debug_panic_panics_in_debug()
    {
        debug_panic!("misuse {}", 1);
    }
}
