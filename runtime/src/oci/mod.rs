//! OCI image support for Stevedore.
//!
//! - Reference parsing and short-name resolution
//! - Registry inspection (manifest only) and content fetch
//! - Disk image store with digest bookkeeping
//! - The `ImageServer` interface tying them together
//!
//! # Store layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │  <store_dir>/                                               │
//! │  ├── index.json           (reference → record index)        │
//! │  ├── tmp/                 (staging for in-flight pulls)     │
//! │  └── sha256/                                                │
//! │      └── <config hex>/    (OCI image layout per image)      │
//! │          ├── oci-layout                                     │
//! │          ├── index.json                                     │
//! │          └── blobs/sha256/<manifest|config|layers>          │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod backend;
pub mod reference;
pub mod registry;
pub mod store;

pub use backend::{ImageRecord, ImageServer, OciImageServer, RemoteHandle};
pub use reference::{resolve_names, ImageReference};
pub use registry::{RegistryAuth, RegistryClient, RemoteImage};
pub use store::{ImageStore, StoredImage};
