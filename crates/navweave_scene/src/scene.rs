use std::path::Path;

use anyhow::{Context as _, bail};
use glam::{Quat, Vec3A};
use navweave::{
    Aabb3d, CompactHeightfield, ContourSet, Heightfield, NavmeshConfig, NavmeshConfigBuilder,
    TileIntermediates, build_tile,
};
use navweave_crowd::{Crowd, CrowdAgentId, CrowdAgentParams, CrowdError};
use navweave_tiles::{
    NavmeshParams, NavmeshQuery, NavmeshStore, StraightPathPoint, TileAssembler, TileBlob,
    TileCoord, load_navmesh, save_navmesh,
};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::{
    Agent, AgentKey, AgentRecord, AgentRegistry, EntityId, GeometryCollector, SceneGeometry,
    SceneHost,
};

/// Maximum number of agents simulated at once.
pub const CROWD_MAX_AGENTS: usize = 1000;
/// Largest agent radius the crowd supports.
pub const CROWD_MAX_AGENT_RADIUS: f32 = 4.0;
/// Half extents of the box searched for the polygon nearest to a move destination.
pub const DESTINATION_SEARCH_EXTENTS: Vec3A = Vec3A::new(1.0, 2.0, 1.0);
/// Squared distance between an entity and its crowd agent above which the agent is placed again.
pub const TELEPORT_DISTANCE_SQUARED: f32 = 0.1;

/// A resident navmesh together with the tile grid it was baked on.
#[derive(Debug, Clone)]
struct SceneNavmesh {
    store: NavmeshStore,
    world_bounds: Aabb3d,
    tiles_x: i32,
    tiles_z: i32,
}

/// The intermediate results of the last tile baked with debug data retained.
#[derive(Debug, Clone)]
pub struct TileDebugData {
    /// The tile the data belongs to.
    pub coord: TileCoord,
    /// The bounds of the heightfield, including the border.
    pub bounds: Aabb3d,
    /// The retained bake stages.
    pub intermediates: TileIntermediates,
}

/// Reasons a move request is rejected.
#[derive(Error, Debug, Clone, Copy, PartialEq)]
pub enum MoveRequestError {
    /// No navmesh has been baked or loaded.
    #[error("No navmesh is loaded")]
    NoNavmesh,
    /// The simulation is not running.
    #[error("The crowd simulation is not running")]
    NoCrowd,
    /// The entity is not an agent.
    #[error("Entity {0} has no navmesh agent")]
    UnknownEntity(EntityId),
    /// The agent is not part of the crowd.
    #[error("The agent of entity {0} is not bound to the crowd")]
    Unbound(EntityId),
    /// The destination is not on the navmesh.
    #[error("No navmesh polygon near {0}")]
    NoPolygonNear(Vec3A),
    /// The crowd rejected the request.
    #[error(transparent)]
    Crowd(#[from] CrowdError),
}

/// An operation referred to an entity without an agent.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Entity {0} has no navmesh agent")]
pub struct AgentNotFound(pub EntityId);

/// The navigation state of a scene: its navmesh, its agents and the crowd moving them.
///
/// Geometry and the host scene graph are passed into the operations that need them. All
/// operations block until they are done.
#[derive(Debug, Default)]
pub struct NavigationScene {
    generator: NavmeshConfigBuilder,
    navmesh: Option<SceneNavmesh>,
    crowd: Option<Crowd>,
    agents: AgentRegistry,
    debug_tile: Option<TileDebugData>,
    simulating: bool,
}

impl NavigationScene {
    /// Creates an empty scene baking with the default generator settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates an empty scene baking with `generator`.
    pub fn with_generator(generator: NavmeshConfigBuilder) -> Self {
        Self {
            generator,
            ..Self::default()
        }
    }

    /// The settings used for the next bake.
    pub fn generator(&self) -> &NavmeshConfigBuilder {
        &self.generator
    }

    /// Replaces the settings used for the next bake.
    pub fn set_generator(&mut self, generator: NavmeshConfigBuilder) {
        self.generator = generator;
    }

    /// Sets the designer inputs of the generator. They take effect on the next bake.
    pub fn set_generator_params(
        &mut self,
        cell_size: f32,
        cell_height: f32,
        agent_radius: f32,
        agent_height: f32,
        max_slope_degrees: f32,
        max_climb: f32,
    ) {
        self.generator = self.generator.clone().with_generator_params(
            cell_size,
            cell_height,
            agent_radius,
            agent_height,
            max_slope_degrees,
            max_climb,
        );
    }

    /// Whether a navmesh has been baked or loaded.
    pub fn is_navmesh_ready(&self) -> bool {
        self.navmesh.is_some()
    }

    /// The total number of polygons of all resident tiles.
    pub fn polygon_count(&self) -> usize {
        self.navmesh
            .as_ref()
            .map_or(0, |navmesh| navmesh.store.polygon_count())
    }

    /// The resident navmesh.
    pub fn navmesh(&self) -> Option<&NavmeshStore> {
        self.navmesh.as_ref().map(|navmesh| &navmesh.store)
    }

    /// The bounds the navmesh was baked for.
    pub fn world_bounds(&self) -> Option<Aabb3d> {
        self.navmesh.as_ref().map(|navmesh| navmesh.world_bounds)
    }

    /// The number of tiles along x and z of the navmesh grid.
    pub fn tile_grid(&self) -> Option<(i32, i32)> {
        self.navmesh
            .as_ref()
            .map(|navmesh| (navmesh.tiles_x, navmesh.tiles_z))
    }

    /// The crowd, while the simulation is running.
    pub fn crowd(&self) -> Option<&Crowd> {
        self.crowd.as_ref()
    }

    /// Mutable access to the crowd, e.g. to tune its filter or obstacle avoidance.
    pub fn crowd_mut(&mut self) -> Option<&mut Crowd> {
        self.crowd.as_mut()
    }

    /// Whether the simulation is running.
    pub fn is_simulating(&self) -> bool {
        self.simulating
    }

    /// The agents of the scene.
    pub fn agents(&self) -> &AgentRegistry {
        &self.agents
    }

    /// The retained debug data of the last tile baked with `keep_debug_data`.
    pub fn debug_tile(&self) -> Option<&TileDebugData> {
        self.debug_tile.as_ref()
    }

    /// The retained solid heightfield.
    pub fn debug_heightfield(&self) -> Option<&Heightfield> {
        self.debug_tile
            .as_ref()
            .map(|debug| &debug.intermediates.heightfield)
    }

    /// The retained compact heightfield.
    pub fn debug_compact_heightfield(&self) -> Option<&CompactHeightfield> {
        self.debug_tile
            .as_ref()
            .map(|debug| &debug.intermediates.compact_heightfield)
    }

    /// The retained contours.
    pub fn debug_contours(&self) -> Option<&ContourSet> {
        self.debug_tile
            .as_ref()
            .map(|debug| &debug.intermediates.contour_set)
    }

    /// Bakes a navmesh covering all of `geometry`, replacing the current one.
    ///
    /// The current navmesh is only replaced once every tile baked successfully. If the
    /// simulation is running, all agents are bound to a fresh crowd afterwards. When binding
    /// fails, the new navmesh stays in place without a crowd and every agent is unbound;
    /// [`NavigationScene::start_simulation`] tries binding again.
    pub fn generate_full_navmesh(
        &mut self,
        geometry: &SceneGeometry,
        host: &impl SceneHost,
    ) -> anyhow::Result<()> {
        let config = self.generator.build();
        let collector = GeometryCollector::new(geometry);
        let world_bounds = self.padded_world_bounds(collector.world_bounds().unwrap_or_default());
        let (tiles_x, tiles_z) = config.tile_count(&world_bounds);
        let params = NavmeshParams::for_tile_grid(
            world_bounds.min,
            config.tile_stride(),
            tiles_x as u32,
            tiles_z as u32,
        );
        let mut store = NavmeshStore::new(params)
            .inspect_err(|e| error!("Could not generate navmesh: {e}"))
            .context("Failed to initialize the navmesh")?;

        for z in 0..tiles_z {
            for x in 0..tiles_x {
                let coord = TileCoord::new(x, z);
                let baked = bake_tile(&collector, &config, &world_bounds, coord, false)
                    .inspect_err(|e| error!("Could not generate navmesh: {e:#}"))?;
                if let Some(blob) = baked.blob {
                    store
                        .add_tile(blob)
                        .inspect_err(|e| error!("Could not generate navmesh: {e}"))
                        .with_context(|| format!("Failed to add tile ({x}, {z})"))?;
                }
            }
        }
        debug!(
            tiles_x,
            tiles_z,
            polygons = store.polygon_count(),
            "generated navmesh"
        );

        self.clear();
        self.navmesh = Some(SceneNavmesh {
            store,
            world_bounds,
            tiles_x,
            tiles_z,
        });
        if self.simulating {
            self.init_crowd(host)?;
        }
        Ok(())
    }

    /// Bakes tile `(x, z)` of the current navmesh again.
    ///
    /// The tile is removed first. If the bake fails, it stays absent. With `keep_debug_data` the
    /// intermediate results are retained, otherwise any retained data is dropped.
    pub fn generate_tile(
        &mut self,
        x: i32,
        z: i32,
        keep_debug_data: bool,
        geometry: &SceneGeometry,
    ) -> anyhow::Result<()> {
        self.debug_tile = None;
        let config = self.generator.build();
        let Some(navmesh) = self.navmesh.as_mut() else {
            bail!("Cannot generate tile ({x}, {z}) without a navmesh");
        };
        if !(0..navmesh.tiles_x).contains(&x) || !(0..navmesh.tiles_z).contains(&z) {
            bail!(
                "Tile ({x}, {z}) is outside of the {}x{} navmesh grid",
                navmesh.tiles_x,
                navmesh.tiles_z
            );
        }
        if navmesh.store.params().tile_width != config.tile_stride() {
            bail!("The generator settings changed since the navmesh was baked");
        }

        let coord = TileCoord::new(x, z);
        navmesh.store.remove_tile(coord);
        let collector = GeometryCollector::new(geometry);
        let baked = bake_tile(&collector, &config, &navmesh.world_bounds, coord, keep_debug_data)
            .inspect_err(|e| error!("Could not generate tile: {e:#}"))?;
        if let Some(blob) = baked.blob {
            navmesh
                .store
                .add_tile(blob)
                .inspect_err(|e| error!("Could not generate tile: {e}"))
                .with_context(|| format!("Failed to add tile ({x}, {z})"))?;
        }
        self.debug_tile = baked.debug;
        Ok(())
    }

    /// Bakes the tile containing `position` again. See [`NavigationScene::generate_tile`].
    pub fn generate_tile_at(
        &mut self,
        position: Vec3A,
        keep_debug_data: bool,
        geometry: &SceneGeometry,
    ) -> anyhow::Result<()> {
        let Some(navmesh) = self.navmesh.as_ref() else {
            bail!("Cannot generate the tile at {position} without a navmesh");
        };
        let (x, z) = self
            .generator
            .build()
            .tile_at(&navmesh.world_bounds, position);
        self.generate_tile(x, z, keep_debug_data, geometry)
    }

    /// Writes the navmesh to `path`.
    pub fn save(&self, path: impl AsRef<Path>) -> anyhow::Result<()> {
        let path = path.as_ref();
        let bytes = self.save_to_bytes()?;
        std::fs::write(path, bytes)
            .inspect_err(|e| error!("Could not save navmesh to {}: {e}", path.display()))
            .with_context(|| format!("Failed to write {}", path.display()))
    }

    /// Serializes the navmesh.
    pub fn save_to_bytes(&self) -> anyhow::Result<Vec<u8>> {
        let Some(navmesh) = self.navmesh.as_ref() else {
            error!("Could not save navmesh: no navmesh");
            bail!("There is no navmesh to save");
        };
        save_navmesh(
            &navmesh.store,
            &navmesh.world_bounds,
            navmesh.tiles_x,
            navmesh.tiles_z,
        )
        .inspect_err(|e| error!("Could not save navmesh: {e}"))
        .context("Failed to serialize the navmesh")
    }

    /// Replaces the navmesh with the one stored at `path`.
    ///
    /// On failure the scene is left without a navmesh.
    pub fn load(&mut self, path: impl AsRef<Path>, host: &impl SceneHost) -> anyhow::Result<()> {
        let path = path.as_ref();
        self.clear();
        let bytes = std::fs::read(path)
            .inspect_err(|e| error!("Could not load navmesh from {}: {e}", path.display()))
            .with_context(|| format!("Failed to read {}", path.display()))?;
        self.load_from_bytes(&bytes, host)
    }

    /// Replaces the navmesh with one serialized by [`NavigationScene::save_to_bytes`].
    ///
    /// If the data cannot be read, the scene is left without a navmesh. If only binding the
    /// agents to a new crowd fails, the loaded navmesh stays in place without a crowd, as with
    /// [`NavigationScene::generate_full_navmesh`].
    pub fn load_from_bytes(&mut self, bytes: &[u8], host: &impl SceneHost) -> anyhow::Result<()> {
        self.clear();
        let loaded = load_navmesh(bytes)
            .inspect_err(|e| error!("Could not load navmesh: {e}"))
            .context("Failed to load the navmesh")?;
        self.navmesh = Some(SceneNavmesh {
            store: loaded.store,
            world_bounds: loaded.world_bounds,
            tiles_x: loaded.tiles_x,
            tiles_z: loaded.tiles_z,
        });
        if self.simulating {
            self.init_crowd(host)?;
        }
        Ok(())
    }

    /// Drops the navmesh, the crowd and any retained debug data. Agents are kept but unbound.
    pub fn clear(&mut self) {
        self.crowd = None;
        self.agents.unbind_all();
        self.navmesh = None;
        self.debug_tile = None;
    }

    /// Starts simulating agents. If a navmesh is ready, every agent is bound to a new crowd.
    ///
    /// Binding is all or nothing: on failure there is no crowd and every agent is unbound.
    pub fn start_simulation(&mut self, host: &impl SceneHost) -> anyhow::Result<()> {
        self.simulating = true;
        if self.navmesh.is_some() && self.crowd.is_none() {
            self.init_crowd(host)?;
        }
        Ok(())
    }

    /// Stops simulating agents. The crowd is dropped and every agent unbound.
    pub fn stop_simulation(&mut self) {
        self.simulating = false;
        self.crowd = None;
        self.agents.unbind_all();
    }

    fn init_crowd(&mut self, host: &impl SceneHost) -> anyhow::Result<()> {
        let Some(navmesh) = self.navmesh.as_ref() else {
            return Ok(());
        };
        let mut crowd = Crowd::new(CROWD_MAX_AGENTS, CROWD_MAX_AGENT_RADIUS);
        let bound = self
            .agents
            .iter()
            .map(|(key, agent)| bind(&mut crowd, &navmesh.store, agent, host).map(|id| (key, id)))
            .collect::<Result<Vec<_>, _>>();
        let bindings = match bound {
            Ok(bindings) => bindings,
            Err(e) => {
                error!("Could not start the crowd: {e}");
                self.crowd = None;
                self.agents.unbind_all();
                return Err(e).context("Failed to bind the agents to the crowd");
            }
        };
        for (key, agent) in self.agents.iter_mut() {
            agent.binding = bindings
                .iter()
                .find_map(|(bound, id)| (*bound == key).then_some(*id));
        }
        debug!(agents = crowd.agent_count(), "started crowd");
        self.crowd = Some(crowd);
        Ok(())
    }

    /// Registers `entity` as an agent. It is bound right away if the simulation is running.
    pub fn add_agent(&mut self, entity: EntityId, host: &impl SceneHost) -> AgentKey {
        let key = self.agents.insert(entity);
        if let (Some(crowd), Some(navmesh)) = (self.crowd.as_mut(), self.navmesh.as_ref())
            && let Some(agent) = self.agents.get_mut(entity)
            && agent.binding.is_none()
        {
            match bind(crowd, &navmesh.store, agent, host) {
                Ok(id) => agent.binding = Some(id),
                Err(e) => warn!("Agent of entity {entity} stays unbound: {e}"),
            }
        }
        key
    }

    /// Unregisters the agent of `entity` and removes it from the crowd.
    pub fn remove_agent(&mut self, entity: EntityId) -> Option<AgentRecord> {
        let agent = self.agents.remove(entity)?;
        if let (Some(crowd), Some(id)) = (self.crowd.as_mut(), agent.binding) {
            crowd.remove_agent(id);
        }
        Some(agent.record())
    }

    /// The radius of the agent of `entity`.
    pub fn agent_radius(&self, entity: EntityId) -> Option<f32> {
        self.agents.get(entity).map(|agent| agent.radius)
    }

    /// The height of the agent of `entity`.
    pub fn agent_height(&self, entity: EntityId) -> Option<f32> {
        self.agents.get(entity).map(|agent| agent.height)
    }

    /// Changes the radius of the agent of `entity`, updating its crowd agent if bound.
    pub fn set_agent_radius(&mut self, entity: EntityId, radius: f32) -> Result<(), AgentNotFound> {
        let agent = self.agents.get_mut(entity).ok_or(AgentNotFound(entity))?;
        agent.radius = radius;
        self.sync_agent_params(entity);
        Ok(())
    }

    /// Changes the height of the agent of `entity`, updating its crowd agent if bound.
    pub fn set_agent_height(&mut self, entity: EntityId, height: f32) -> Result<(), AgentNotFound> {
        let agent = self.agents.get_mut(entity).ok_or(AgentNotFound(entity))?;
        agent.height = height;
        self.sync_agent_params(entity);
        Ok(())
    }

    fn sync_agent_params(&mut self, entity: EntityId) {
        let (Some(crowd), Some(agent)) = (self.crowd.as_mut(), self.agents.get(entity)) else {
            return;
        };
        let Some(id) = agent.binding else {
            return;
        };
        let Some(current) = crowd.agent(id).map(|crowd_agent| *crowd_agent.params()) else {
            return;
        };
        let params = CrowdAgentParams {
            max_speed: current.max_speed,
            ..CrowdAgentParams::for_agent(agent.radius, agent.height)
        };
        if let Err(e) = crowd.update_agent_parameters(id, params) {
            warn!("Could not update the crowd agent of entity {entity}: {e}");
        }
    }

    /// The remaining corners of the path of the agent of `entity`.
    pub fn agent_path(&self, entity: EntityId) -> Option<&[StraightPathPoint]> {
        let id = self.agents.get(entity)?.binding?;
        self.crowd
            .as_ref()?
            .agent(id)
            .map(|crowd_agent| crowd_agent.corners())
    }

    /// The persisted state of every agent.
    pub fn snapshot(&self) -> Vec<AgentRecord> {
        self.agents.records()
    }

    /// Replaces every agent with the agents in `records`, binding them if the simulation is
    /// running.
    pub fn restore(&mut self, records: &[AgentRecord], host: &impl SceneHost) {
        if let Some(crowd) = self.crowd.as_mut() {
            for (_, agent) in self.agents.iter() {
                if let Some(id) = agent.binding {
                    crowd.remove_agent(id);
                }
            }
        }
        self.agents.restore(records);
        for record in records {
            self.add_agent(record.entity, host);
        }
    }

    /// Sends the agent of `entity` to the navmesh point nearest to `destination`.
    ///
    /// A rejected request leaves the previous target of the agent untouched.
    pub fn request_move(
        &mut self,
        entity: EntityId,
        destination: Vec3A,
        speed: f32,
    ) -> Result<(), MoveRequestError> {
        let navmesh = self.navmesh.as_ref().ok_or(MoveRequestError::NoNavmesh)?;
        let crowd = self.crowd.as_mut().ok_or(MoveRequestError::NoCrowd)?;
        let agent = self
            .agents
            .get(entity)
            .ok_or(MoveRequestError::UnknownEntity(entity))?;
        let id = agent.binding.ok_or(MoveRequestError::Unbound(entity))?;

        let query = NavmeshQuery::new(&navmesh.store);
        let Some((poly, target)) =
            query.find_nearest_poly(destination, DESTINATION_SEARCH_EXTENTS, crowd.filter())
        else {
            debug!("No navmesh polygon near {destination} for entity {entity}");
            return Err(MoveRequestError::NoPolygonNear(destination));
        };
        crowd.set_max_speed(id, speed)?;
        crowd.request_move_target(id, poly, target)?;
        Ok(())
    }

    /// Advances the simulation by `dt` seconds and writes the result to `host`.
    ///
    /// Agents that ran out of path corners are stopped and reported to
    /// [`SceneHost::path_finished`] once.
    pub fn update(&mut self, dt: f32, host: &mut impl SceneHost) {
        let (Some(crowd), Some(navmesh)) = (self.crowd.as_mut(), self.navmesh.as_ref()) else {
            return;
        };
        crowd.update(dt, &navmesh.store);

        for (_, agent) in self.agents.iter_mut() {
            let Some(id) = agent.binding else {
                continue;
            };
            let Some(crowd_agent) = crowd.agent(id) else {
                continue;
            };
            host.set_position(agent.entity, crowd_agent.position());
            let velocity = crowd_agent.velocity();
            if velocity.length_squared() > 0.0 {
                let yaw = velocity.x.atan2(velocity.z);
                host.set_rotation(agent.entity, Quat::from_rotation_y(yaw));
            }

            if crowd_agent.corners().is_empty() {
                if !agent.is_finished {
                    if let Err(e) = crowd.reset_move_target(id) {
                        warn!("Could not stop agent of entity {}: {e}", agent.entity);
                    }
                    agent.is_finished = true;
                    host.path_finished(agent.entity);
                }
            } else {
                agent.is_finished = false;
            }
        }
    }

    /// Reports that `entity` was moved by something other than the simulation.
    ///
    /// If the entity drifted away from its crowd agent, the agent is placed again at `position`.
    /// Returns whether that happened.
    pub fn on_entity_moved(&mut self, entity: EntityId, position: Vec3A) -> bool {
        let (Some(crowd), Some(navmesh)) = (self.crowd.as_mut(), self.navmesh.as_ref()) else {
            return false;
        };
        let Some(agent) = self.agents.get_mut(entity) else {
            return false;
        };
        let Some(id) = agent.binding else {
            return false;
        };
        let Some(current) = crowd.agent(id) else {
            return false;
        };
        if (position - current.position()).length_squared() <= TELEPORT_DISTANCE_SQUARED {
            return false;
        }

        let params = *current.params();
        crowd.remove_agent(id);
        agent.binding = match crowd.add_agent(position, params, &navmesh.store) {
            Ok(id) => Some(id),
            Err(e) => {
                warn!("Agent of entity {entity} was unbound after a teleport: {e}");
                None
            }
        };
        debug!("Placed agent of entity {entity} again at {position}");
        true
    }
}

impl NavigationScene {
    /// Grows the bounds vertically so surfaces at their top and bottom keep room for agents.
    fn padded_world_bounds(&self, mut bounds: Aabb3d) -> Aabb3d {
        bounds.min.y -= self.generator.agent_height;
        bounds.max.y += self.generator.agent_height;
        bounds
    }
}

fn bind(
    crowd: &mut Crowd,
    store: &NavmeshStore,
    agent: &Agent,
    host: &impl SceneHost,
) -> Result<CrowdAgentId, CrowdError> {
    let position = host.position(agent.entity);
    crowd.add_agent(
        position,
        CrowdAgentParams::for_agent(agent.radius, agent.height),
        store,
    )
}

struct BakedTile {
    blob: Option<TileBlob>,
    debug: Option<TileDebugData>,
}

fn bake_tile(
    collector: &GeometryCollector,
    config: &NavmeshConfig,
    world_bounds: &Aabb3d,
    coord: TileCoord,
    keep_debug_data: bool,
) -> anyhow::Result<BakedTile> {
    let tile_bounds = config.tile_bounds(world_bounds, coord.x, coord.z);
    let pad = (1 + config.border_size) as f32 * config.cell_size;
    let mut query = tile_bounds;
    query.min.x -= pad;
    query.min.z -= pad;
    query.max.x += pad;
    query.max.z += pad;

    let trimesh = collector.collect(query);
    let output = build_tile(&trimesh, config, tile_bounds, keep_debug_data)
        .with_context(|| format!("Failed to bake tile ({}, {})", coord.x, coord.z))?;
    let blob = TileAssembler::from_config(config)
        .assemble(&output, coord)
        .with_context(|| format!("Failed to assemble tile ({}, {})", coord.x, coord.z))?;

    let border = config.border_size as f32 * config.cell_size;
    let debug = output.intermediates.map(|intermediates| {
        let mut bounds = tile_bounds;
        bounds.min.x -= border;
        bounds.min.z -= border;
        bounds.max.x += border;
        bounds.max.z += border;
        TileDebugData {
            coord,
            bounds,
            intermediates,
        }
    });
    Ok(BakedTile { blob, debug })
}
