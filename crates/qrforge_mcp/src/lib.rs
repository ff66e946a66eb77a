//! MCP (Model Context Protocol) Server for QRForge
//!
//! Serves QR image generation to an MCP peer. The engineering core of the
//! crate is the dynamic output-directory subsystem: the peer may announce
//! filesystem roots it permits the server to use, and those announcements are
//! untrusted input that directly influences filesystem paths.
//!
//! # Architecture
//!
//! ```text
//! peer notification ──► RootsManager.handle_roots_changed(roots)
//!                           │  rate-limit gate, then per candidate:
//!                           ▼
//!                      PathSecurityValidator.validate(path)
//!                           │  first-valid-wins selection, re-check
//!                           ▼
//!                      ConfigProvider.update_from_external(path)
//!                           │  snapshot swap + ordered async observers
//!                           ▼
//!                      consumers re-read get_current_directory()
//! ```
//!
//! # Design Principles
//!
//! 1. **Untrusted input never panics:** every validation failure is
//!    structured data; the server keeps running.
//!
//! 2. **Fixed precedence:** EXTERNAL_ROOTS > ENVIRONMENT > COMMAND_LINE >
//!    DEFAULT, compiled in, never configurable at runtime.
//!
//! 3. **Admission control first:** the rate limiter runs before any
//!    validation work so a hostile peer cannot drive filesystem probes.
//!
//! 4. **Snapshot reads, serialized writes:** readers clone an immutable
//!    configuration snapshot; all mutation goes through one writer path.

pub mod config;
pub mod protocol;
pub mod roots;
pub mod security;
pub mod server;
pub mod tools;
pub mod writer;

// Re-exports for convenience
pub use config::{ChangeEvent, ConfigProvider, ConfigSource, EffectiveConfiguration};
pub use protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse};
pub use roots::{RootsChangeResult, RootsManager, RootsValidationResult};
pub use security::{
    PathSecurityValidator, PolicyUpdate, SecurityPolicy, SecurityValidationResult,
    SecurityViolation,
};
pub use server::{McpServer, McpServerConfig};
pub use writer::{QrEncoder, QrFileWriter};
