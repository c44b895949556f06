//! Harvest orchestration for kbharvest.
//!
//! Ties discovery, fetching, section extraction, Markdown assembly and the
//! output sink into one run (`pipeline::harvest`), and merges harvested
//! articles into a single document (`merge::merge_directory`).

pub mod assembler;
pub mod merge;
pub mod pipeline;
pub mod scheduler;
pub mod sink;
