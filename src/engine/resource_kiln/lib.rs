mod resource_id;
pub use resource_id::*;

mod resource;
pub use resource::*;

mod resource_listener;
pub use resource_listener::*;

mod resource_entry;
pub use resource_entry::*;

mod resource_database;
pub use resource_database::*;

mod resource_factory;
pub use resource_factory::*;

mod byte_source;
pub use byte_source::*;

mod resource_config;
pub use resource_config::*;

mod resource_loader;
pub use resource_loader::*;

mod resource_handle;
pub use resource_handle::*;

pub mod resource_types;
