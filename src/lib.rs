//! # WebP Derive
//!
//! WebP derivatives for uploaded images. When a record in an upload
//! collection gains a new file, the file is re-encoded as a primary WebP plus
//! one WebP per configured size, written next to the original, and the
//! resulting metadata is stored on the record. Existing records can be
//! regenerated in bulk from their originals.
//!
//! # Architecture: Ports Around a Pipeline
//!
//! The host (a CMS, or the bundled CLI) owns records and files. This crate
//! only sees them through narrow ports:
//!
//! ```text
//!   host lifecycle ──► hooks ──► variants ──► convert ──► EncodeEngine
//!                        │          │            │
//!                        │          │            └──► naming ──► Storage
//!                        │          └──► RecordStore (derivative field)
//!                        └──► Storage (delete derivatives)
//!
//!   regenerate ──► RecordStore (one record per page) ──► variants
//! ```
//!
//! Every port is a trait, so tests swap in recording or failure-injecting
//! fakes without touching the filesystem layout the real adapters use.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`pipeline`] | Injected ports, config, extension points and the background task tracker |
//! | [`convert`] | One source in, one named and stored WebP out |
//! | [`variants`] | Primary plus every configured size, then the record update |
//! | [`hooks`] | Change and delete lifecycle handlers; sync or deferred conversion |
//! | [`regenerate`] | Per-collection bulk regeneration with a shared progress registry |
//! | [`naming`] | Dimension-tagged filename allocation under a collision policy |
//! | [`imaging`] | Resize planning, EXIF handling and the `image` + libwebp encode engine |
//! | [`storage`] | File storage port and the local filesystem adapter |
//! | [`records`] | Record store port and the JSON-file adapter |
//! | [`config`] | `derivatives.toml` loading, merging over stock defaults, validation |
//! | [`types`] | Shared types persisted on records (`DerivativeField`, `RegenerationStatus`) |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Names From Output Dimensions
//!
//! Derivative names carry the size that was actually written, not the size
//! that was asked for. An `inside` fit of a portrait photo into 400x400 is
//! named `-300x400`, so a URL alone tells a client what it will get.
//!
//! ## Primary First, Sizes Best-Effort
//!
//! A record never points at size variants without a primary. If the primary
//! encode fails nothing is recorded; a failed size is dropped from the map
//! and the rest still land.
//!
//! ## One Walk Per Collection
//!
//! Regeneration is claimed with an atomic check-and-insert in the registry,
//! so a second trigger for a running collection returns the live status
//! instead of starting a parallel walk over the same files. The walk itself,
//! page 1 included, runs on the pipeline's task tracker, so a caller that
//! stops waiting never leaves a collection marked as running.

pub mod config;
pub mod convert;
pub mod hooks;
pub mod imaging;
pub mod naming;
pub mod output;
pub mod pipeline;
pub mod records;
pub mod regenerate;
pub mod storage;
pub mod types;
pub mod variants;

#[cfg(test)]
pub(crate) mod test_helpers;
