//! Crowd simulation on top of [`navweave_tiles`].
//!
//! A [`Crowd`] owns a bounded set of agents. Every agent follows a [`PathCorridor`] towards its
//! target, steers around its neighbours and the walls of its [`LocalBoundary`], and is kept on
//! the navmesh surface. Paths are planned synchronously during [`Crowd::update`].

mod crowd;
pub mod local_boundary;
pub mod obstacle_avoidance;
pub mod path_corridor;
mod proximity_grid;

pub use crowd::{
    AgentState, Crowd, CrowdAgent, CrowdAgentParams, CrowdError, CrowdNeighbour, MAX_CORNERS,
    MAX_NEIGHBOURS, MoveRequestState, UpdateFlags,
};
pub use local_boundary::{BoundarySegment, LocalBoundary};
pub use obstacle_avoidance::{ObstacleAvoidanceParams, ObstacleAvoidanceQuery};
pub use path_corridor::PathCorridor;
pub use proximity_grid::ProximityGrid;

slotmap::new_key_type! {
    /// Identifies an agent of a [`Crowd`].
    pub struct CrowdAgentId;
}
