use bitflags::bitflags;
use glam::Vec3A;
use navweave_tiles::{
    NavmeshQuery, NavmeshStore, PolyRef, QueryFilter, StraightPathFlags, StraightPathPoint,
    geometry::tri_area_2d,
};
use slotmap::SlotMap;
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(feature = "serialize")]
use serde::{Deserialize, Serialize};

use crate::{
    CrowdAgentId,
    local_boundary::LocalBoundary,
    obstacle_avoidance::{ObstacleAvoidanceParams, ObstacleAvoidanceQuery},
    path_corridor::{PathCorridor, distance_2d, distance_2d_squared},
    proximity_grid::ProximityGrid,
};

/// Maximum number of neighbours an agent considers for separation and avoidance.
pub const MAX_NEIGHBOURS: usize = 6;
/// Number of straight path corners an agent keeps.
pub const MAX_CORNERS: usize = 4;

const MAX_PATH_RESULT: usize = 256;
const CHECK_LOOKAHEAD: usize = 10;
const TARGET_REPLAN_DELAY: f32 = 1.0;
const OPT_TIME_THRESHOLD: f32 = 0.5;
const OPT_MAX_AGENTS: usize = 1;
const COLLISION_RESOLVE_ITERATIONS: usize = 4;
const COLLISION_RESOLVE_FACTOR: f32 = 0.7;
const MAX_NEIGHBOUR_CANDIDATES: usize = 32;

bitflags! {
    /// Steering behaviours enabled for an agent.
    #[repr(transparent)]
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    #[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
    pub struct UpdateFlags: u8 {
        /// Steer towards a point between the next two corners to round turns.
        const ANTICIPATE_TURNS = 0x01;
        /// Sample velocities that avoid neighbours and walls.
        const OBSTACLE_AVOIDANCE = 0x02;
        /// Push away from close neighbours.
        const SEPARATION = 0x04;
        /// Shortcut the corridor when the next corners are visible.
        const OPTIMIZE_VIS = 0x08;
        /// Periodically search for a shorter corridor.
        const OPTIMIZE_TOPO = 0x10;
    }
}

/// Configuration of a crowd agent.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub struct CrowdAgentParams {
    /// Radius of the agent.
    pub radius: f32,
    /// Height of the agent.
    pub height: f32,
    /// Maximum change of velocity per second.
    pub max_acceleration: f32,
    /// Maximum speed.
    pub max_speed: f32,
    /// Distance within which neighbours and walls are taken into account.
    pub collision_query_range: f32,
    /// Maximum distance of a visibility shortcut.
    pub path_optimization_range: f32,
    /// How strongly the agent is pushed away from its neighbours.
    pub separation_weight: f32,
    /// Enabled steering behaviours.
    pub update_flags: UpdateFlags,
}

impl CrowdAgentParams {
    /// Parameters for an agent of the given size, with every steering behaviour enabled.
    pub fn for_agent(radius: f32, height: f32) -> Self {
        Self {
            radius,
            height,
            max_acceleration: 10.0,
            max_speed: 10.0,
            collision_query_range: radius * 12.0,
            path_optimization_range: radius * 30.0,
            separation_weight: 0.0,
            update_flags: UpdateFlags::all(),
        }
    }
}

impl Default for CrowdAgentParams {
    fn default() -> Self {
        Self::for_agent(0.5, 2.0)
    }
}

/// Whether an agent is standing on the navmesh.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum AgentState {
    /// The agent is not on the navmesh and does not move.
    #[default]
    Invalid,
    /// The agent is walking on the navmesh.
    Walking,
}

/// Progress of an agent's move request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serialize", derive(Serialize, Deserialize))]
pub enum MoveRequestState {
    /// The agent has no target.
    #[default]
    None,
    /// No path to the target could be found.
    Failed,
    /// The agent follows a path to its target.
    Valid,
    /// A path will be planned on the next update.
    Requesting,
    /// The agent is steered by a requested velocity.
    Velocity,
}

/// A neighbouring agent.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrowdNeighbour {
    /// The neighbour.
    pub id: CrowdAgentId,
    /// Squared distance on the xz-plane.
    pub distance_squared: f32,
}

/// Errors returned by [`Crowd`].
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CrowdError {
    /// The crowd holds its maximum number of agents.
    #[error("The crowd is full, it holds at most {capacity} agents")]
    Full {
        /// Maximum number of agents.
        capacity: usize,
    },
    /// The agent is not part of the crowd.
    #[error("Agent {0:?} is not part of the crowd")]
    UnknownAgent(CrowdAgentId),
}

/// An agent simulated by a [`Crowd`].
#[derive(Debug, Clone)]
pub struct CrowdAgent {
    state: AgentState,
    partial: bool,
    corridor: PathCorridor,
    boundary: LocalBoundary,
    topology_opt_time: f32,
    neighbours: Vec<CrowdNeighbour>,
    desired_speed: f32,
    npos: Vec3A,
    dvel: Vec3A,
    nvel: Vec3A,
    vel: Vec3A,
    params: CrowdAgentParams,
    corners: Vec<StraightPathPoint>,
    target_state: MoveRequestState,
    target_ref: Option<PolyRef>,
    target_pos: Vec3A,
    target_replan_time: f32,
}

impl CrowdAgent {
    /// Whether the agent is on the navmesh.
    #[inline]
    pub fn state(&self) -> AgentState {
        self.state
    }

    /// The current position.
    #[inline]
    pub fn position(&self) -> Vec3A {
        self.npos
    }

    /// The current velocity.
    #[inline]
    pub fn velocity(&self) -> Vec3A {
        self.vel
    }

    /// The velocity the agent would like to move with.
    #[inline]
    pub fn desired_velocity(&self) -> Vec3A {
        self.dvel
    }

    /// The speed the agent would like to move with.
    #[inline]
    pub fn desired_speed(&self) -> f32 {
        self.desired_speed
    }

    /// The next corners of the path to the target. Empty once the target is reached.
    #[inline]
    pub fn corners(&self) -> &[StraightPathPoint] {
        &self.corners
    }

    /// The corridor followed by the agent.
    #[inline]
    pub fn corridor(&self) -> &PathCorridor {
        &self.corridor
    }

    /// The walls around the agent.
    #[inline]
    pub fn boundary(&self) -> &LocalBoundary {
        &self.boundary
    }

    /// The closest neighbours, closest first.
    #[inline]
    pub fn neighbours(&self) -> &[CrowdNeighbour] {
        &self.neighbours
    }

    /// The agent's configuration.
    #[inline]
    pub fn params(&self) -> &CrowdAgentParams {
        &self.params
    }

    /// The state of the move request.
    #[inline]
    pub fn target_state(&self) -> MoveRequestState {
        self.target_state
    }

    /// The polygon containing the target.
    #[inline]
    pub fn target_poly(&self) -> Option<PolyRef> {
        self.target_ref
    }

    /// The requested target, or the requested velocity for [`MoveRequestState::Velocity`].
    #[inline]
    pub fn target_position(&self) -> Vec3A {
        self.target_pos
    }

    /// Whether the path only leads towards the target because the target is unreachable.
    #[inline]
    pub fn is_partial(&self) -> bool {
        self.partial
    }

    fn has_path_target(&self) -> bool {
        !matches!(
            self.target_state,
            MoveRequestState::None | MoveRequestState::Velocity
        )
    }

    fn request_target(&mut self, poly: PolyRef, position: Vec3A) {
        self.target_ref = Some(poly);
        self.target_pos = position;
        self.target_state = MoveRequestState::Requesting;
    }

    fn integrate(&mut self, dt: f32) {
        let max_delta = self.params.max_acceleration * dt;
        let mut dv = self.nvel - self.vel;
        let ds = dv.length();
        if ds > max_delta {
            dv *= max_delta / ds;
        }
        self.vel += dv;

        if self.vel.length() > 0.0001 {
            self.npos += self.vel * dt;
        } else {
            self.vel = Vec3A::ZERO;
        }
    }

    fn straight_steer_direction(&self) -> Vec3A {
        let Some(corner) = self.corners.first() else {
            return Vec3A::ZERO;
        };
        let mut direction = corner.position - self.npos;
        direction.y = 0.0;
        direction.normalize_or_zero()
    }

    /// Steers towards a point between the next two corners so that turns are rounded.
    fn smooth_steer_direction(&self) -> Vec3A {
        let Some(first) = self.corners.first() else {
            return Vec3A::ZERO;
        };
        let second = self.corners[1.min(self.corners.len() - 1)];

        let mut dir0 = first.position - self.npos;
        let mut dir1 = second.position - self.npos;
        dir0.y = 0.0;
        dir1.y = 0.0;

        let len0 = dir0.length();
        let len1 = dir1.length();
        if len1 > 0.001 {
            dir1 /= len1;
        }
        let mut direction = dir0 - dir1 * len0 * 0.5;
        direction.y = 0.0;
        direction.normalize_or_zero()
    }

    fn distance_to_goal(&self, range: f32) -> f32 {
        match self.corners.last() {
            Some(last) if last.flags.contains(StraightPathFlags::END) => {
                distance_2d(self.npos, last.position).min(range)
            }
            _ => range,
        }
    }
}

/// Simulates a bounded set of agents steering along a navmesh.
#[derive(Debug, Clone)]
pub struct Crowd {
    agents: SlotMap<CrowdAgentId, CrowdAgent>,
    max_agents: usize,
    max_agent_radius: f32,
    agent_placement_half_extents: Vec3A,
    filter: QueryFilter,
    obstacle_avoidance_params: ObstacleAvoidanceParams,
    obstacle_query: ObstacleAvoidanceQuery,
    grid: ProximityGrid,
    velocity_sample_count: usize,
}

impl Crowd {
    /// Creates a crowd holding at most `max_agents` agents no larger than `max_agent_radius`.
    pub fn new(max_agents: usize, max_agent_radius: f32) -> Self {
        Self {
            agents: SlotMap::with_capacity_and_key(max_agents),
            max_agents,
            max_agent_radius,
            agent_placement_half_extents: Vec3A::new(
                max_agent_radius * 2.0,
                max_agent_radius * 1.5,
                max_agent_radius * 2.0,
            ),
            filter: QueryFilter::default(),
            obstacle_avoidance_params: ObstacleAvoidanceParams::default(),
            obstacle_query: ObstacleAvoidanceQuery::new(),
            grid: ProximityGrid::new(max_agent_radius * 3.0),
            velocity_sample_count: 0,
        }
    }

    /// Maximum number of agents.
    #[inline]
    pub fn max_agents(&self) -> usize {
        self.max_agents
    }

    /// The radius the placement and proximity structures are sized for.
    #[inline]
    pub fn max_agent_radius(&self) -> f32 {
        self.max_agent_radius
    }

    /// The filter used by every navmesh query of the crowd.
    #[inline]
    pub fn filter(&self) -> &QueryFilter {
        &self.filter
    }

    /// Mutable access to the query filter.
    #[inline]
    pub fn filter_mut(&mut self) -> &mut QueryFilter {
        &mut self.filter
    }

    /// The obstacle avoidance configuration shared by all agents.
    #[inline]
    pub fn obstacle_avoidance_params(&self) -> &ObstacleAvoidanceParams {
        &self.obstacle_avoidance_params
    }

    /// Replaces the obstacle avoidance configuration.
    pub fn set_obstacle_avoidance_params(&mut self, params: ObstacleAvoidanceParams) {
        self.obstacle_avoidance_params = params;
    }

    /// Number of velocity samples taken during the last update.
    #[inline]
    pub fn velocity_sample_count(&self) -> usize {
        self.velocity_sample_count
    }

    /// Number of agents.
    #[inline]
    pub fn agent_count(&self) -> usize {
        self.agents.len()
    }

    /// Returns the agent with the given id.
    #[inline]
    pub fn agent(&self, id: CrowdAgentId) -> Option<&CrowdAgent> {
        self.agents.get(id)
    }

    /// Iterates over all agents.
    pub fn agents(&self) -> impl Iterator<Item = (CrowdAgentId, &CrowdAgent)> {
        self.agents.iter()
    }

    fn agent_mut(&mut self, id: CrowdAgentId) -> Result<&mut CrowdAgent, CrowdError> {
        self.agents.get_mut(id).ok_or(CrowdError::UnknownAgent(id))
    }

    /// Adds an agent at the point of the navmesh closest to `position`.
    ///
    /// If no polygon is close enough, the agent is added in the [`AgentState::Invalid`] state and
    /// is placed again once the navmesh below it appears.
    pub fn add_agent(
        &mut self,
        position: Vec3A,
        params: CrowdAgentParams,
        store: &NavmeshStore,
    ) -> Result<CrowdAgentId, CrowdError> {
        if self.agents.len() >= self.max_agents {
            return Err(CrowdError::Full {
                capacity: self.max_agents,
            });
        }
        let query = NavmeshQuery::new(store);
        let nearest =
            query.find_nearest_poly(position, self.agent_placement_half_extents, &self.filter);
        let (poly, npos, state) = match nearest {
            Some((poly, point)) => (Some(poly), point, AgentState::Walking),
            None => {
                warn!("Crowd agent at {position} is not on the navmesh");
                (None, position, AgentState::Invalid)
            }
        };

        let mut corridor = PathCorridor::new(MAX_PATH_RESULT);
        corridor.reset(poly, npos);
        let agent = CrowdAgent {
            state,
            partial: false,
            corridor,
            boundary: LocalBoundary::default(),
            topology_opt_time: 0.0,
            neighbours: Vec::new(),
            desired_speed: 0.0,
            npos,
            dvel: Vec3A::ZERO,
            nvel: Vec3A::ZERO,
            vel: Vec3A::ZERO,
            params,
            corners: Vec::new(),
            target_state: MoveRequestState::None,
            target_ref: None,
            target_pos: Vec3A::ZERO,
            target_replan_time: 0.0,
        };
        let id = self.agents.insert(agent);
        debug!("Added crowd agent {id:?} at {npos}");
        Ok(id)
    }

    /// Removes an agent, returning it if it existed.
    pub fn remove_agent(&mut self, id: CrowdAgentId) -> Option<CrowdAgent> {
        self.agents.remove(id)
    }

    /// Replaces the configuration of an agent.
    pub fn update_agent_parameters(
        &mut self,
        id: CrowdAgentId,
        params: CrowdAgentParams,
    ) -> Result<(), CrowdError> {
        self.agent_mut(id)?.params = params;
        Ok(())
    }

    /// Sets the speed limit of an agent.
    pub fn set_max_speed(&mut self, id: CrowdAgentId, max_speed: f32) -> Result<(), CrowdError> {
        self.agent_mut(id)?.params.max_speed = max_speed;
        Ok(())
    }

    /// Asks the agent to move to `position` inside `poly`. The path is planned on the next update.
    pub fn request_move_target(
        &mut self,
        id: CrowdAgentId,
        poly: PolyRef,
        position: Vec3A,
    ) -> Result<(), CrowdError> {
        self.agent_mut(id)?.request_target(poly, position);
        Ok(())
    }

    /// Asks the agent to move with a fixed velocity, ignoring any path.
    pub fn request_move_velocity(
        &mut self,
        id: CrowdAgentId,
        velocity: Vec3A,
    ) -> Result<(), CrowdError> {
        let agent = self.agent_mut(id)?;
        agent.target_ref = None;
        agent.target_pos = velocity;
        agent.target_state = MoveRequestState::Velocity;
        Ok(())
    }

    /// Drops the agent's target. The agent stops on the next update.
    pub fn reset_move_target(&mut self, id: CrowdAgentId) -> Result<(), CrowdError> {
        let agent = self.agent_mut(id)?;
        agent.target_ref = None;
        agent.target_pos = Vec3A::ZERO;
        agent.dvel = Vec3A::ZERO;
        agent.target_state = MoveRequestState::None;
        Ok(())
    }

    /// Advances the simulation by `dt` seconds.
    pub fn update(&mut self, dt: f32, store: &NavmeshStore) {
        let query = NavmeshQuery::new(store);
        self.velocity_sample_count = 0;
        let ids: Vec<CrowdAgentId> = self.agents.keys().collect();

        self.check_path_validity(&ids, dt, &query);
        self.update_move_requests(&ids, &query);
        self.update_topology_optimization(&ids, dt, &query);

        self.grid.clear();
        for (id, agent) in &self.agents {
            let p = agent.npos;
            let r = agent.params.radius;
            self.grid.add_item(id, p.x - r, p.z - r, p.x + r, p.z + r);
        }

        self.update_boundaries_and_neighbours(&ids, &query);
        self.update_corners(&ids, &query);
        self.update_steering(&ids);
        self.plan_velocities(&ids);

        for &id in &ids {
            let agent = &mut self.agents[id];
            if agent.state == AgentState::Walking {
                agent.integrate(dt);
            }
        }

        for _ in 0..COLLISION_RESOLVE_ITERATIONS {
            self.resolve_collisions(&ids);
        }

        for &id in &ids {
            let agent = &mut self.agents[id];
            if agent.state != AgentState::Walking {
                continue;
            }
            if let Err(err) = agent.corridor.move_position(agent.npos, &query, &self.filter) {
                debug!("Crowd agent {id:?} could not move along the navmesh: {err}");
            }
            agent.npos = agent.corridor.position();

            if !agent.has_path_target() {
                let first = agent.corridor.first_poly();
                agent.corridor.reset(first, agent.npos);
                agent.partial = false;
            }
        }
    }

    fn check_path_validity(&mut self, ids: &[CrowdAgentId], dt: f32, query: &NavmeshQuery) {
        let half_extents = self.agent_placement_half_extents;
        let filter = &self.filter;
        for &id in ids {
            let agent = &mut self.agents[id];
            agent.target_replan_time += dt;
            let mut replan = false;

            let current = agent.corridor.first_poly();
            if !current.is_some_and(|poly| query.is_valid_poly_ref(poly, filter)) {
                // The navmesh below the agent changed, place it again.
                let Some((poly, position)) =
                    query.find_nearest_poly(agent.npos, half_extents, filter)
                else {
                    agent.corridor.reset(None, agent.npos);
                    agent.partial = false;
                    agent.boundary.reset();
                    agent.state = AgentState::Invalid;
                    continue;
                };
                agent.corridor.fix_path_start(poly, position);
                agent.corridor.trim_invalid_path(poly, position, query, filter);
                agent.boundary.reset();
                agent.npos = position;
                agent.state = AgentState::Walking;
                replan = true;
            }
            if agent.state != AgentState::Walking || !agent.has_path_target() {
                continue;
            }

            if agent.target_state != MoveRequestState::Failed
                && !agent
                    .target_ref
                    .is_some_and(|poly| query.is_valid_poly_ref(poly, filter))
            {
                match query.find_nearest_poly(agent.target_pos, half_extents, filter) {
                    Some((poly, position)) => {
                        agent.target_ref = Some(poly);
                        agent.target_pos = position;
                        replan = true;
                    }
                    None => {
                        let first = agent.corridor.first_poly();
                        agent.corridor.reset(first, agent.npos);
                        agent.partial = false;
                        agent.target_ref = None;
                        agent.target_state = MoveRequestState::None;
                        continue;
                    }
                }
            }

            if !agent.corridor.is_valid(CHECK_LOOKAHEAD, query, filter) {
                replan = true;
            }
            // The end of the corridor is near but it does not lead to the target.
            if agent.target_state == MoveRequestState::Valid
                && agent.target_replan_time > TARGET_REPLAN_DELAY
                && agent.corridor.path().len() < CHECK_LOOKAHEAD
                && agent.corridor.last_poly() != agent.target_ref
            {
                replan = true;
            }

            if replan && let Some(target) = agent.target_ref {
                let position = agent.target_pos;
                agent.request_target(target, position);
            }
        }
    }

    fn update_move_requests(&mut self, ids: &[CrowdAgentId], query: &NavmeshQuery) {
        let filter = &self.filter;
        for &id in ids {
            let agent = &mut self.agents[id];
            if agent.state != AgentState::Walking
                || agent.target_state != MoveRequestState::Requesting
            {
                continue;
            }
            let (Some(start), Some(target)) = (agent.corridor.first_poly(), agent.target_ref)
            else {
                agent.target_state = MoveRequestState::Failed;
                continue;
            };

            match query.find_path(
                start,
                target,
                agent.npos,
                agent.target_pos,
                filter,
                MAX_PATH_RESULT,
            ) {
                Ok(path) => {
                    let mut target_pos = agent.target_pos;
                    if let Some(&last) = path.polygons.last()
                        && last != target
                    {
                        // Unreachable target, walk as close as possible.
                        target_pos = query
                            .closest_point_on_poly(last, target_pos)
                            .map_or(agent.npos, |(point, _)| point);
                    }
                    agent.corridor.set_corridor(target_pos, &path.polygons);
                    agent.boundary.reset();
                    agent.partial = path.partial;
                    agent.target_state = MoveRequestState::Valid;
                }
                Err(err) => {
                    debug!("Crowd agent {id:?} failed to plan a path: {err}");
                    agent.target_state = MoveRequestState::Failed;
                }
            }
            agent.target_replan_time = 0.0;
        }
    }

    fn update_topology_optimization(&mut self, ids: &[CrowdAgentId], dt: f32, query: &NavmeshQuery) {
        let mut queue: Vec<(CrowdAgentId, f32)> = Vec::new();
        for &id in ids {
            let agent = &mut self.agents[id];
            if agent.state != AgentState::Walking
                || !agent.has_path_target()
                || !agent.params.update_flags.contains(UpdateFlags::OPTIMIZE_TOPO)
            {
                continue;
            }
            agent.topology_opt_time += dt;
            if agent.topology_opt_time >= OPT_TIME_THRESHOLD {
                queue.push((id, agent.topology_opt_time));
            }
        }
        // Agents that waited the longest go first.
        queue.sort_by(|a, b| b.1.total_cmp(&a.1));
        for &(id, _) in queue.iter().take(OPT_MAX_AGENTS) {
            let agent = &mut self.agents[id];
            agent.corridor.optimize_path_topology(query, &self.filter);
            agent.topology_opt_time = 0.0;
        }
    }

    fn update_boundaries_and_neighbours(&mut self, ids: &[CrowdAgentId], query: &NavmeshQuery) {
        for &id in ids {
            let agent = &mut self.agents[id];
            if agent.state != AgentState::Walking {
                continue;
            }
            let range = agent.params.collision_query_range;
            let update_threshold = range * 0.25;
            if distance_2d_squared(agent.npos, agent.boundary.center())
                > update_threshold * update_threshold
                || !agent.boundary.is_valid(query, &self.filter)
            {
                let first = agent.corridor.first_poly();
                agent
                    .boundary
                    .update(first, agent.npos, range, query, &self.filter);
            }
            let neighbours = self.find_neighbours(id);
            self.agents[id].neighbours = neighbours;
        }
    }

    fn find_neighbours(&self, id: CrowdAgentId) -> Vec<CrowdNeighbour> {
        let agent = &self.agents[id];
        let position = agent.npos;
        let range = agent.params.collision_query_range;
        let candidates = self.grid.query_items(
            position.x - range,
            position.z - range,
            position.x + range,
            position.z + range,
            MAX_NEIGHBOUR_CANDIDATES,
        );

        let mut neighbours: Vec<CrowdNeighbour> = Vec::with_capacity(MAX_NEIGHBOURS);
        for other_id in candidates {
            if other_id == id {
                continue;
            }
            let Some(other) = self.agents.get(other_id) else {
                continue;
            };
            let mut diff = position - other.npos;
            if diff.y.abs() >= (agent.params.height + other.params.height) * 0.5 {
                continue;
            }
            diff.y = 0.0;
            let distance_squared = diff.length_squared();
            if distance_squared > range * range {
                continue;
            }
            let index = neighbours.partition_point(|n| n.distance_squared <= distance_squared);
            if index < MAX_NEIGHBOURS {
                neighbours.insert(
                    index,
                    CrowdNeighbour {
                        id: other_id,
                        distance_squared,
                    },
                );
                neighbours.truncate(MAX_NEIGHBOURS);
            }
        }
        neighbours
    }

    fn update_corners(&mut self, ids: &[CrowdAgentId], query: &NavmeshQuery) {
        for &id in ids {
            let agent = &mut self.agents[id];
            if agent.state != AgentState::Walking {
                continue;
            }
            if !agent.has_path_target() {
                agent.corners.clear();
                continue;
            }
            agent.corners = agent
                .corridor
                .find_corners(MAX_CORNERS, query)
                .unwrap_or_default();

            if agent.params.update_flags.contains(UpdateFlags::OPTIMIZE_VIS)
                && !agent.corners.is_empty()
            {
                let next = agent.corners[1.min(agent.corners.len() - 1)].position;
                let range = agent.params.path_optimization_range;
                agent
                    .corridor
                    .optimize_path_visibility(next, range, query, &self.filter);
            }
        }
    }

    fn update_steering(&mut self, ids: &[CrowdAgentId]) {
        let mut steering = Vec::with_capacity(ids.len());
        for &id in ids {
            let agent = &self.agents[id];
            if agent.state != AgentState::Walking || agent.target_state == MoveRequestState::None {
                continue;
            }

            let (mut dvel, desired_speed) = if agent.target_state == MoveRequestState::Velocity {
                (agent.target_pos, agent.target_pos.length())
            } else {
                let direction = if agent
                    .params
                    .update_flags
                    .contains(UpdateFlags::ANTICIPATE_TURNS)
                {
                    agent.smooth_steer_direction()
                } else {
                    agent.straight_steer_direction()
                };
                // Slow down close to the goal.
                let slow_down_radius = agent.params.radius * 2.0;
                let speed_scale = agent.distance_to_goal(slow_down_radius) / slow_down_radius;
                let desired_speed = agent.params.max_speed;
                (direction * desired_speed * speed_scale, desired_speed)
            };

            if agent.params.update_flags.contains(UpdateFlags::SEPARATION) {
                let separation_distance = agent.params.collision_query_range;
                let inv_separation_distance = 1.0 / separation_distance;
                let mut weight_sum = 0.0;
                let mut displacement = Vec3A::ZERO;
                for neighbour in &agent.neighbours {
                    let Some(other) = self.agents.get(neighbour.id) else {
                        continue;
                    };
                    let mut diff = agent.npos - other.npos;
                    diff.y = 0.0;
                    let distance_squared = diff.length_squared();
                    if distance_squared < 0.00001
                        || distance_squared > separation_distance * separation_distance
                    {
                        continue;
                    }
                    let distance = distance_squared.sqrt();
                    let weight = agent.params.separation_weight
                        * (1.0 - (distance * inv_separation_distance).powi(2));
                    displacement += diff * (weight / distance);
                    weight_sum += 1.0;
                }
                if weight_sum > 0.0001 {
                    dvel += displacement / weight_sum;
                    let speed_squared = dvel.length_squared();
                    let desired_squared = desired_speed * desired_speed;
                    if speed_squared > desired_squared {
                        dvel *= desired_squared / speed_squared;
                    }
                }
            }
            steering.push((id, dvel, desired_speed));
        }
        for (id, dvel, desired_speed) in steering {
            let agent = &mut self.agents[id];
            agent.dvel = dvel;
            agent.desired_speed = desired_speed;
        }
    }

    fn plan_velocities(&mut self, ids: &[CrowdAgentId]) {
        let Self {
            agents,
            obstacle_query,
            obstacle_avoidance_params,
            velocity_sample_count,
            ..
        } = self;

        let mut velocities = Vec::with_capacity(ids.len());
        for &id in ids {
            let agent = &agents[id];
            if agent.state != AgentState::Walking {
                continue;
            }
            if !agent
                .params
                .update_flags
                .contains(UpdateFlags::OBSTACLE_AVOIDANCE)
            {
                velocities.push((id, agent.dvel));
                continue;
            }

            obstacle_query.reset();
            for neighbour in &agent.neighbours {
                let Some(other) = agents.get(neighbour.id) else {
                    continue;
                };
                obstacle_query.add_circle(other.npos, other.params.radius, other.vel, other.dvel);
            }
            for segment in agent.boundary.segments() {
                let [p, q] = segment.segment;
                // Walls the agent is behind do not block it.
                if tri_area_2d(agent.npos, p, q) < 0.0 {
                    continue;
                }
                obstacle_query.add_segment(p, q);
            }
            let (nvel, samples) = obstacle_query.sample_velocity_adaptive(
                agent.npos,
                agent.params.radius,
                agent.desired_speed,
                agent.vel,
                agent.dvel,
                obstacle_avoidance_params,
            );
            *velocity_sample_count += samples;
            velocities.push((id, nvel));
        }
        for (id, nvel) in velocities {
            agents[id].nvel = nvel;
        }
    }

    fn resolve_collisions(&mut self, ids: &[CrowdAgentId]) {
        let mut displacements = Vec::with_capacity(ids.len());
        for &id in ids {
            let agent = &self.agents[id];
            if agent.state != AgentState::Walking {
                continue;
            }
            let mut displacement = Vec3A::ZERO;
            let mut weight_sum = 0.0;
            for neighbour in &agent.neighbours {
                let Some(other) = self.agents.get(neighbour.id) else {
                    continue;
                };
                let mut diff = agent.npos - other.npos;
                diff.y = 0.0;
                let combined_radius = agent.params.radius + other.params.radius;
                let distance_squared = diff.length_squared();
                if distance_squared > combined_radius * combined_radius {
                    continue;
                }
                let distance = distance_squared.sqrt();
                let penetration = if distance < 0.0001 {
                    // Agents on top of each other, push them apart sideways.
                    diff = if id > neighbour.id {
                        Vec3A::new(-agent.dvel.z, 0.0, agent.dvel.x)
                    } else {
                        Vec3A::new(agent.dvel.z, 0.0, -agent.dvel.x)
                    };
                    0.01
                } else {
                    (1.0 / distance)
                        * ((combined_radius - distance) * 0.5)
                        * COLLISION_RESOLVE_FACTOR
                };
                displacement += diff * penetration;
                weight_sum += 1.0;
            }
            if weight_sum > 0.0001 {
                displacement /= weight_sum;
            }
            displacements.push((id, displacement));
        }
        for (id, displacement) in displacements {
            self.agents[id].npos += displacement;
        }
    }
}
