pub mod blob;
pub mod media;

pub use blob::{BlobStore, Section};
pub use media::MediaType;
