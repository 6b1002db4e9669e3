// =============================================================================
// MorphMix CLI Crate
// =============================================================================
//
// The user-facing surface over `morphmix-core`: dataset file I/O, the
// linear analysis pipeline, chart rendering, report formatting, and a
// synthetic data generator. The core crate never touches the filesystem;
// everything that does lives here.
//
// =============================================================================

pub mod dataset;
pub mod pipeline;
pub mod plot;
pub mod report;
pub mod simulate;
