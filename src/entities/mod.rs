pub mod prelude;

pub mod upload_parts;
pub mod upload_sessions;
pub mod user_files;
pub mod users;
