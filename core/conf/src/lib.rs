//! Process configuration object and loading for the task-queue core.
mod loading;
mod object;
mod runtime;

pub use self::loading::load;
pub use self::loading::Error;
pub use self::object::BackendConf;
pub use self::object::Conf;
pub use self::object::ProcessorBackoff;
pub use self::object::ReplicationConf;
pub use self::object::ShardProcessorConf;
pub use self::object::SplitConf;
pub use self::runtime::RuntimeConf;
