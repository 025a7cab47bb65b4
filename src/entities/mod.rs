pub mod prelude;

pub mod design_files;
pub mod designs;
pub mod download_events;
pub mod purchases;
pub mod users;
