mod remote_sync;
mod webdav;

pub use remote_sync::RemoteSync;
pub use webdav::{NextcloudClient, candidate_name};
