use glam::{Quat, Vec3A};

use crate::EntityId;

/// The scene graph the agents live in.
///
/// The host owns the authoritative transforms of all entities. The navigation scene reads
/// positions when agents are bound to the crowd, writes the simulated positions and rotations
/// back every frame and reports agents that arrived at their target.
pub trait SceneHost {
    /// The world position of `entity`.
    fn position(&self, entity: EntityId) -> Vec3A;

    /// Moves `entity` to `position`.
    fn set_position(&mut self, entity: EntityId, position: Vec3A);

    /// Rotates `entity`.
    fn set_rotation(&mut self, entity: EntityId, rotation: Quat);

    /// Called once when `entity` reaches the end of its path.
    fn path_finished(&mut self, entity: EntityId);
}
