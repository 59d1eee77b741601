pub mod filestore;

pub use filestore::{DiskFileStore, FileStore, MemoryFileStore};
