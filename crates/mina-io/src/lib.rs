//! mina-io: Filesystem and process collaborators for mina.
//!
//! Loads images and image stacks from disk, and runs pre- and
//! post-processing scripts as child processes. Everything here plugs
//! into the traits `mina-pipeline` defines for these concerns.

pub mod error;
pub mod load;
pub mod script;

pub use error::IoError;
pub use load::{FsImageSource, load_image};
pub use script::ProcessScriptRunner;
