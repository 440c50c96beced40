//! Admin subcommands for inspecting and repairing a shard's task queues, shared by the
//! `queued` binary's `admin` command group.
mod command;

pub use self::command::execute;
pub use self::command::AdminCommand;
pub use self::command::AdminContext;
pub use self::command::TaskCategoryArg;
pub use self::command::EX_OK;
pub use self::command::EX_UNAVAILABLE;
pub use self::command::EX_USAGE;
