mod fs_listener;
pub mod util;

pub use fs_listener::{ActivityKind, EventFilter, FsListener, RawFsEvent};
