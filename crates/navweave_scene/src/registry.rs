//! The agents of a scene and the entities they belong to.

use std::collections::HashMap;

use navweave_crowd::CrowdAgentId;
use serde::{Deserialize, Serialize};
use slotmap::SlotMap;

/// Radius given to new agents.
pub const DEFAULT_AGENT_RADIUS: f32 = 0.5;
/// Height given to new agents.
pub const DEFAULT_AGENT_HEIGHT: f32 = 2.0;

/// An entity of the host scene graph.
///
/// The lower 32 bits are the index of the entity, the upper 32 bits its generation.
/// Two entities that reuse the same index therefore never compare equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(u64);

impl EntityId {
    /// Creates an id from an entity index and its generation.
    #[inline]
    pub const fn new(index: u32, generation: u32) -> Self {
        Self(((generation as u64) << 32) | index as u64)
    }

    /// Reinterprets bits produced by [`EntityId::to_bits`].
    #[inline]
    pub const fn from_bits(bits: u64) -> Self {
        Self(bits)
    }

    /// The packed index and generation.
    #[inline]
    pub const fn to_bits(self) -> u64 {
        self.0
    }

    /// The index of the entity.
    #[inline]
    pub const fn index(self) -> u32 {
        self.0 as u32
    }

    /// How often the index has been reused.
    #[inline]
    pub const fn generation(self) -> u32 {
        (self.0 >> 32) as u32
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index(), self.generation())
    }
}

slotmap::new_key_type! {
    /// Identifies an [`Agent`] in an [`AgentRegistry`].
    pub struct AgentKey;
}

/// A navigating entity.
#[derive(Debug, Clone, PartialEq)]
pub struct Agent {
    /// The entity the agent moves.
    pub entity: EntityId,
    /// The radius used for steering and collision.
    pub radius: f32,
    /// The height used for steering.
    pub height: f32,
    /// The crowd agent simulating this agent, while the simulation is running.
    pub binding: Option<CrowdAgentId>,
    /// Whether the agent reached its last target.
    pub is_finished: bool,
}

impl Agent {
    /// An unbound agent with the default dimensions.
    pub fn new(entity: EntityId) -> Self {
        Self {
            entity,
            radius: DEFAULT_AGENT_RADIUS,
            height: DEFAULT_AGENT_HEIGHT,
            binding: None,
            is_finished: true,
        }
    }

    /// The part of the agent that is saved with the scene.
    pub fn record(&self) -> AgentRecord {
        AgentRecord {
            entity: self.entity,
            radius: self.radius,
            height: self.height,
        }
    }
}

/// The persisted state of an [`Agent`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    /// The entity the agent moves.
    pub entity: EntityId,
    /// The agent radius.
    pub radius: f32,
    /// The agent height.
    pub height: f32,
}

/// Owns every agent of a scene and maps entities to them.
#[derive(Debug, Clone, Default)]
pub struct AgentRegistry {
    agents: SlotMap<AgentKey, Agent>,
    by_entity: HashMap<EntityId, AgentKey>,
}

impl AgentRegistry {
    /// Registers a new agent for `entity`.
    ///
    /// If the entity already has an agent, that agent is kept and its key returned.
    pub fn insert(&mut self, entity: EntityId) -> AgentKey {
        if let Some(&key) = self.by_entity.get(&entity) {
            return key;
        }
        let key = self.agents.insert(Agent::new(entity));
        self.by_entity.insert(entity, key);
        key
    }

    /// Unregisters the agent of `entity`.
    pub fn remove(&mut self, entity: EntityId) -> Option<Agent> {
        let key = self.by_entity.remove(&entity)?;
        self.agents.remove(key)
    }

    /// The key of the agent of `entity`.
    pub fn key(&self, entity: EntityId) -> Option<AgentKey> {
        self.by_entity.get(&entity).copied()
    }

    /// The agent of `entity`.
    pub fn get(&self, entity: EntityId) -> Option<&Agent> {
        self.agents.get(self.key(entity)?)
    }

    /// Mutable access to the agent of `entity`.
    pub fn get_mut(&mut self, entity: EntityId) -> Option<&mut Agent> {
        let key = self.key(entity)?;
        self.agents.get_mut(key)
    }

    /// Whether `entity` has an agent.
    pub fn contains(&self, entity: EntityId) -> bool {
        self.by_entity.contains_key(&entity)
    }

    /// Number of agents.
    pub fn len(&self) -> usize {
        self.agents.len()
    }

    /// Whether there are no agents.
    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    /// Iterates over all agents.
    pub fn iter(&self) -> impl Iterator<Item = (AgentKey, &Agent)> {
        self.agents.iter()
    }

    /// Iterates mutably over all agents.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (AgentKey, &mut Agent)> {
        self.agents.iter_mut()
    }

    /// Removes every crowd binding. The agents themselves are kept.
    pub fn unbind_all(&mut self) {
        for agent in self.agents.values_mut() {
            agent.binding = None;
        }
    }

    /// Removes every agent.
    pub fn clear(&mut self) {
        self.agents.clear();
        self.by_entity.clear();
    }

    /// The persisted state of every agent, ordered by entity.
    pub fn records(&self) -> Vec<AgentRecord> {
        let mut records: Vec<_> = self.agents.values().map(Agent::record).collect();
        records.sort_by_key(|record| record.entity);
        records
    }

    /// Replaces every agent with unbound agents built from `records`.
    pub fn restore(&mut self, records: &[AgentRecord]) {
        self.clear();
        for record in records {
            let key = self.insert(record.entity);
            let agent = &mut self.agents[key];
            agent.radius = record.radius;
            agent.height = record.height;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn entity_ids_pack_index_and_generation() {
        let id = EntityId::new(7, 3);
        assert_eq!(id.index(), 7);
        assert_eq!(id.generation(), 3);
        assert_eq!(EntityId::from_bits(id.to_bits()), id);
        assert_ne!(EntityId::new(7, 4), id);
        assert_eq!(id.to_string(), "7v3");
    }

    #[test]
    fn new_agents_use_defaults() {
        let mut registry = AgentRegistry::default();
        let entity = EntityId::new(1, 0);
        let key = registry.insert(entity);
        assert_eq!(registry.insert(entity), key);
        assert_eq!(registry.len(), 1);

        let agent = registry.get(entity).unwrap();
        assert_eq!(agent.radius, DEFAULT_AGENT_RADIUS);
        assert_eq!(agent.height, DEFAULT_AGENT_HEIGHT);
        assert!(agent.binding.is_none());
        assert!(agent.is_finished);
    }

    #[test]
    fn removing_forgets_the_entity() {
        let mut registry = AgentRegistry::default();
        let entity = EntityId::new(1, 0);
        registry.insert(entity);
        assert!(registry.remove(entity).is_some());
        assert!(!registry.contains(entity));
        assert!(registry.get(entity).is_none());
        assert!(registry.remove(entity).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn records_survive_a_json_round_trip() {
        let mut registry = AgentRegistry::default();
        let a = EntityId::new(4, 1);
        let b = EntityId::new(2, 0);
        registry.insert(a);
        registry.insert(b);
        registry.get_mut(a).unwrap().radius = 0.75;
        registry.get_mut(b).unwrap().height = 1.5;

        let records = registry.records();
        assert_eq!(records[0].entity, b);
        let json = serde_json::to_string(&records).unwrap();
        let decoded: Vec<AgentRecord> = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, records);

        let mut restored = AgentRegistry::default();
        restored.insert(EntityId::new(9, 9));
        restored.restore(&decoded);
        assert_eq!(restored.len(), 2);
        assert!(!restored.contains(EntityId::new(9, 9)));
        assert_eq!(restored.get(a).unwrap().radius, 0.75);
        assert_eq!(restored.get(b).unwrap().height, 1.5);
        assert!(restored.get(a).unwrap().is_finished);
    }
}
