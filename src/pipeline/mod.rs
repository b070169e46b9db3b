//! Pipeline stages that do not depend on a pluggable backend.
//!
//! Each submodule implements exactly one transformation step and is
//! independently testable.
//!
//! ## Data Flow
//!
//! ```text
//!  transcript ──▶ normalise ─────────────────────────┐
//!                                                    ▼
//!  media ──▶ sampler ──▶ grid ──▶ encode ──▶ synthesizer ──▶ postprocess ──▶ weave
//!              (frames)   (vision only)                                       ▲
//!                 └───────────────────────────────────────────────────────────┘
//! ```
//!
//! 1. [`transcript`] — enforce segment ordering, format `[HH:MM:SS]` lines
//! 2. [`sampler`] — extract one frame every N seconds as a lazy stream
//! 3. [`grid`] — tile consecutive frames into composites (`spawn_blocking`)
//! 4. [`encode`] — PNG + base64 for the multimodal request body
//! 5. [`postprocess`] — deterministic cleanup of synthesizer output
//! 6. [`weave`] — resolve `[[ts:…]]` / `[[frame:…]]` markers into links

pub mod encode;
pub mod grid;
pub mod postprocess;
pub mod sampler;
pub mod transcript;
pub mod weave;
