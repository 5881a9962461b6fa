pub use super::upload_parts::Entity as UploadParts;
pub use super::upload_sessions::Entity as UploadSessions;
pub use super::user_files::Entity as UserFiles;
pub use super::users::Entity as Users;
