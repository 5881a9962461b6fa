pub mod file_service;
pub mod reaper;
pub mod storage;
pub mod upload_service;
