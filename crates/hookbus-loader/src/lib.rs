//! hookbus-loader: hook package discovery, manifest parsing and handler
//! resolution.
//!
//! A hook package is a directory holding a `HOOK.md` manifest and a
//! handler file:
//!
//! ```text
//! hooks/
//!   command-logger/
//!     HOOK.md
//!     handler.sh
//! ```
//!
//! Packages are scanned from the bundled, workspace, managed, third-party
//! and plugin directories in that order; later sources shadow earlier ones.

pub mod eligibility;
pub mod loader;
pub mod manifest;
pub mod resolver;

pub use eligibility::{Ineligible, should_include_hook};
pub use loader::{HANDLER_FILES, HookLoader, LoaderStats, SourceDir, find_handler_file, load_hook_entry};
pub use manifest::{MANIFEST_FILE, Manifest, ManifestError, parse_manifest, read_manifest};
pub use resolver::{
    ChainResolver, FactoryResolver, HandlerResolver, ProcessResolver, ResolveError,
    load_hook_handler,
};
