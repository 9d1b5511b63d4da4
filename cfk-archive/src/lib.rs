//! Archive pipeline: extension-based tool dispatch, multi-part
//! assembly, and listing/extraction for the formats the virtual
//! filesystem treats as browsable folders.
//!
//! The façade crate reuses this for I/O on both sides of an archive
//! boundary — reading an inner file is "stage the archive, extract one
//! entry"; browsing one is "stage the archive, list its tree" — so the
//! logic here stays oblivious to which storage backend the archive
//! itself came from.

pub mod assembly;
pub mod pipeline;
pub mod registry;
pub mod tar_tool;
pub mod tool;
pub mod zip_tool;

pub use pipeline::ArchivePipeline;
pub use registry::{detect_multipart, format_part_name, ArchiveRegistry};
pub use tool::ArchiveTool;
