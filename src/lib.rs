#![forbid(unsafe_code)]

pub mod agent;
pub mod config;
pub mod error;
pub mod event;
pub mod geometry;
pub mod proto;
pub mod session;
pub mod transport;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;

// Re-export the common surface at the crate root for convenience
pub use crate::agent::{
    Agent, AgentId, AgentKind, AgentState, DriveWaypoint, VehicleControl, WalkWaypoint,
};
pub use crate::config::ClientConfig;
pub use crate::event::{AgentEvent, EventKind};
pub use crate::geometry::{BoundingBox, RaycastHit, Transform, Vector, WeatherState};
pub use crate::session::{EventHandler, SessionError, Simulator};
pub use crate::transport::{Transport, TransportError};
