//! Wire types shared between the tether session core and protocol front-ends.
//!
//! # Main Types
//!
//! - [`Capabilities`] / [`CapabilityRequest`] - requested and negotiated capabilities
//! - [`Protocol`] - protocol marker carried through every dispatch
//! - [`WireEnvelope`] - the `{value}` / `{error}` shape returned to clients
//! - [`SessionInfo`] / [`StatusInfo`] - introspection snapshots

pub mod capabilities;
pub mod envelope;
pub mod session;

pub use capabilities::{
	CAPABILITY_CONSTRAINTS, CapabilityError, CapabilityRequest, Capabilities, Constraint, DEFAULT_VENDOR_PREFIX, REQUIRED_CAPABILITIES,
};
pub use envelope::{ErrorPayload, Protocol, WireEnvelope};
pub use session::{BuildInfo, CreatedSession, SessionInfo, StatusInfo};
