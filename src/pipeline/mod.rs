//! Pipeline stages for viewer-to-PDF conversion.
//!
//! Each submodule implements one step. The fetch and delivery stages sit
//! behind traits ([`fetch::PageFetcher`], [`deliver::DeliverySink`]) so the
//! scan policy and the run orchestration can be tested without a network.
//!
//! ## Data Flow
//!
//! ```text
//! fetch ──▶ scan ──▶ assemble ──▶ deliver
//! (GET)    (policy)  (lopdf)     (relay, optional)
//!                      ▲
//!                    layout
//! ```
//!
//! 1. [`fetch`]: one authenticated GET per page, classified as accepted,
//!    retryable or stop
//! 2. [`scan`]: walk each module's pages until a stop condition, then
//!    every module in order
//! 3. [`layout`]: fit-to-box and centering math for the A4 canvas
//! 4. [`assemble`]: one PDF page per image, written atomically; runs in
//!    `spawn_blocking`
//! 5. [`deliver`]: stream the finished PDF to the messaging relay

pub mod assemble;
pub mod deliver;
pub mod fetch;
pub mod layout;
pub mod scan;
