mod object_store;
mod registry;
mod uploads;

pub use object_store::{ObjectStoreClient, PresignedUpload, StoredObject};
pub use registry::{FileCategory, FileTypeSpec, lookup, validate_upload};
pub use uploads::ActiveUploads;
