use std::collections::HashMap;

use crate::CrowdAgentId;

/// A uniform grid on the xz-plane used to find nearby agents.
#[derive(Debug, Clone)]
pub struct ProximityGrid {
    inv_cell_size: f32,
    cells: HashMap<(i32, i32), Vec<CrowdAgentId>>,
}

impl ProximityGrid {
    /// Creates an empty grid with square cells of `cell_size`.
    pub fn new(cell_size: f32) -> Self {
        Self {
            inv_cell_size: 1.0 / cell_size.max(f32::EPSILON),
            cells: HashMap::new(),
        }
    }

    /// Removes every item.
    pub fn clear(&mut self) {
        self.cells.values_mut().for_each(Vec::clear);
    }

    fn cell_range(&self, min_x: f32, min_z: f32, max_x: f32, max_z: f32) -> (i32, i32, i32, i32) {
        (
            (min_x * self.inv_cell_size).floor() as i32,
            (min_z * self.inv_cell_size).floor() as i32,
            (max_x * self.inv_cell_size).floor() as i32,
            (max_z * self.inv_cell_size).floor() as i32,
        )
    }

    /// Adds `id` to every cell overlapping the rectangle.
    pub fn add_item(&mut self, id: CrowdAgentId, min_x: f32, min_z: f32, max_x: f32, max_z: f32) {
        let (x0, z0, x1, z1) = self.cell_range(min_x, min_z, max_x, max_z);
        for z in z0..=z1 {
            for x in x0..=x1 {
                self.cells.entry((x, z)).or_default().push(id);
            }
        }
    }

    /// Returns the distinct items in the cells overlapping the rectangle, at most `max_items`.
    pub fn query_items(
        &self,
        min_x: f32,
        min_z: f32,
        max_x: f32,
        max_z: f32,
        max_items: usize,
    ) -> Vec<CrowdAgentId> {
        let (x0, z0, x1, z1) = self.cell_range(min_x, min_z, max_x, max_z);
        let mut items = Vec::new();
        for z in z0..=z1 {
            for x in x0..=x1 {
                let Some(cell) = self.cells.get(&(x, z)) else {
                    continue;
                };
                for &id in cell {
                    if items.len() >= max_items {
                        return items;
                    }
                    if !items.contains(&id) {
                        items.push(id);
                    }
                }
            }
        }
        items
    }
}

#[cfg(test)]
mod tests {
    use slotmap::SlotMap;

    use super::*;

    #[test]
    fn items_are_found_once() {
        let mut keys = SlotMap::<CrowdAgentId, ()>::with_key();
        let a = keys.insert(());
        let b = keys.insert(());
        let mut grid = ProximityGrid::new(1.0);
        // Spans four cells.
        grid.add_item(a, -0.5, -0.5, 0.5, 0.5);
        grid.add_item(b, 10.0, 10.0, 10.5, 10.5);

        assert_eq!(grid.query_items(-1.0, -1.0, 1.0, 1.0, 8), vec![a]);
        assert!(grid.query_items(3.0, 3.0, 4.0, 4.0, 8).is_empty());

        grid.clear();
        assert!(grid.query_items(-1.0, -1.0, 1.0, 1.0, 8).is_empty());
    }
}
