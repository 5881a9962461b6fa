//! Client side of the resumable upload protocol.
//!
//! [`driver::UploadDriver`] owns the chunk loop: it initiates (or
//! re-attaches to) a session, streams chunks through presigned targets
//! with a bounded worker pool, acknowledges each part, and finalizes.
//! Pause, resume, and cancel arrive through a [`driver::DriverHandle`]
//! and are observed cooperatively between chunks.

pub mod chunks;
pub mod driver;
pub mod transport;
