//! # Darkroom
//!
//! A parametric image-filter editing engine. An image is edited by moving
//! twelve named adjustments (brightness, exposure, contrast, ...); the engine
//! keeps those values valid, records every committed change as an invertible
//! operation, reports changes to collaborators as compact deltas, and renders
//! the result at preview or full resolution.
//!
//! # Architecture
//!
//! ```text
//! UI intent ──▶ EditSession ──▶ FilterParameterSet   (clamped, quantized)
//!                  │  ├──────▶ OperationHistory     (undo / redo)
//!                  │  └──────▶ ChangeTracker ──▶ FilterDelta stream
//!                  └─────────▶ FilterRenderPipeline ──▶ RenderContext
//!                                  preview base, synchronous
//!                                  full resolution on commit, worker thread
//! ```
//!
//! Parameter sets are small `Copy` values, so every layer passes snapshots
//! rather than sharing mutable state. Only the session mutates the live set.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`catalog`] | The twelve filter properties: ranges, defaults, steps, labels |
//! | [`params`] | `FilterParameterSet`, the one value per property, and its flat JSON schema |
//! | [`operation`] | Invertible state transitions and delta minimization |
//! | [`history`] | Linear undo/redo log with redo-branch truncation |
//! | [`tracker`] | Threshold/debounce change detection producing `FilterDelta`s |
//! | [`presets`] | Named partial parameter sets: built-ins and JSON libraries |
//! | [`imaging`] | Filter kernels, render backend, shared context, pipeline, preview slot |
//! | [`session`] | `EditSession` state machine, drag gestures, background commit |
//! | [`config`] | `darkroom.toml` loading, validation and stock defaults |
//!
//! # Design Decisions
//!
//! ## Values Are Always Valid
//!
//! Every write into a parameter set goes through the catalog's clamp. There is
//! no error path for an out-of-range value: NaN becomes the default, anything
//! else is pulled into range. Deserialization follows the same rule and only
//! warns about keys it does not know.
//!
//! ## Operations Carry Their Own Inverse
//!
//! A recorded operation stores the values it overwrote. Undo never consults the
//! live state or the catalog defaults, so an operation replayed against the
//! state it produced always restores the state before it.
//!
//! ## One Render Path
//!
//! Preview and final renders run the same stage list through the same
//! backend. Spatial filters scale their radius by the preview ratio, so a
//! preview is a faithful miniature of the final image.

pub mod catalog;
pub mod config;
pub mod history;
pub mod imaging;
pub mod operation;
pub mod params;
pub mod presets;
pub mod session;
pub mod tracker;
