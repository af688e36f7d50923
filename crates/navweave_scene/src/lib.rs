//! Navigation for a whole scene.
//!
//! [`NavigationScene`] ties the bake pipeline of [`navweave`], the tiled navmesh of
//! [`navweave_tiles`] and the crowd of [`navweave_crowd`] to a host scene graph. The host supplies
//! geometry through [`SceneGeometry`] and owns the transforms of the agents through [`SceneHost`].

pub mod geometry;
mod host;
pub mod registry;
mod scene;

pub use geometry::{
    GeometryCollector, Heightmap, MaterialFlags, MeshInstance, RenderableProvider, SceneGeometry,
    SubMesh, TerrainProvider,
};
pub use host::SceneHost;
pub use registry::{Agent, AgentKey, AgentRecord, AgentRegistry, EntityId};
pub use scene::{
    AgentNotFound, CROWD_MAX_AGENT_RADIUS, CROWD_MAX_AGENTS, DESTINATION_SEARCH_EXTENTS,
    MoveRequestError, NavigationScene, TELEPORT_DISTANCE_SQUARED, TileDebugData,
};
