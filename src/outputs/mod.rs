//! Rendering and persisting archived posts.
//!
//! # Submodules
//!
//! - [`render`]: Builds the per-post artifact in the selected format
//! - [`writer`]: Prepares the destination folder and writes artifacts
//!
//! # Output Structure
//!
//! ```text
//! dest_folder/
//! ├── first-post-slug.md
//! ├── second-post-slug.md
//! └── ...
//! ```
//!
//! One file per post, named after its slug. Re-running against the same
//! folder overwrites files in place, so unchanged posts produce identical
//! bytes.

pub mod render;
pub mod writer;

pub use render::render_artifact;
pub use writer::{WriteError, prepare_destination, write_artifact};
