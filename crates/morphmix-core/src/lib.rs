// =============================================================================
// MorphMix Core Library
// =============================================================================
//
// This is the entry point for the pure Rust mixed-model library.
// All the mathematical heavy-lifting happens here - the CLI crate only does
// file I/O, charting and report formatting.
//
// STRUCTURE:
// ----------
// The library is organized into modules, each handling a specific concern:
//
//   - data:        The observation table (group labels + numeric columns)
//   - formula:     Model formulas like "y ~ x + (x | group)"
//   - design:      Design matrices X and Z built from a table + formula
//   - solvers:     The profiled-deviance LMM fitter and its optimizers
//   - inference:   Standard errors, p-values, likelihood-ratio tests
//   - diagnostics: Residuals, fit measures, shrinkage summaries
//   - error:       Error types used throughout the library
//
// FOR MAINTAINERS:
// ----------------
// When adding new functionality:
//   1. Add it to the appropriate module (or create a new one)
//   2. Write tests in that module (see existing tests for examples)
//   3. Re-export public items here so users can access them easily
//
// =============================================================================

// Declare our modules - each is in its own file or folder
pub mod convert;
pub mod data;
pub mod design;
pub mod diagnostics;
pub mod error;
pub mod formula;
pub mod inference;
pub mod solvers;

// Re-export commonly used items at the top level for convenience
// Users can write `use morphmix_core::fit_lmm` instead of
// `use morphmix_core::solvers::lmm::fit_lmm`
pub use data::ObservationTable;
pub use design::{build_design, ModelDesign};
pub use error::{MorphMixError, Result};
pub use formula::{parse_formula, ParsedFormula, RandomTerm};
pub use inference::{confidence_interval_t, likelihood_ratio_test, pvalue_t, pvalue_z, LrtResult};
pub use solvers::{fit_lmm, FixedEffect, LmmConfig, LmmFit, VarianceComponents};
