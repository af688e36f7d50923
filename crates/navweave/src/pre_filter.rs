use crate::{
    heightfield::Heightfield,
    math::{dir_offset_x, dir_offset_z},
    span::AreaType,
};

impl Heightfield {
    const MAX_FILTER_HEIGHT: i32 = 0xffff;

    /// Marks non-walkable spans as walkable if their maximum is within `walkable_climb` of the span below them.
    ///
    /// This removes small obstacles and rasterization artifacts that the agent would be able to walk over
    /// such as curbs. It also allows agents to move up terraced structures like stairs.
    pub fn filter_low_hanging_walkable_obstacles(&mut self, walkable_climb: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                let mut previous: Option<(u16, bool, AreaType)> = None;
                for key in self.column_keys(x, z) {
                    let span = self.span_mut(key);
                    let walkable = span.area().is_walkable();
                    if let Some((previous_max, previous_walkable, previous_area)) = previous
                        && !walkable
                        && previous_walkable
                        && span.max().abs_diff(previous_max) <= walkable_climb
                    {
                        span.set_area(previous_area);
                    }
                    // Remember the original walkability so a stack of obstacles is not promoted
                    // one span at a time.
                    previous = Some((span.max(), walkable, span.area()));
                }
            }
        }
    }

    /// Marks spans that are ledges as not-walkable.
    ///
    /// A ledge is a span with one or more neighbors whose maximum is further away than `walkable_climb`
    /// from the current span's maximum.
    /// This method removes the impact of the overestimation of conservative voxelization
    /// so the resulting mesh will not have regions hanging in the air over ledges.
    pub fn filter_ledge_spans(&mut self, walkable_height: u16, walkable_climb: u16) {
        let walkable_height = walkable_height as i32;
        let walkable_climb = walkable_climb as i32;
        for z in 0..self.height {
            for x in 0..self.width {
                for key in self.column_keys(x, z) {
                    let span = self.span(key);
                    if !span.area().is_walkable() {
                        continue;
                    }
                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map(|next| self.span(next).min() as i32)
                        .unwrap_or(Self::MAX_FILTER_HEIGHT);

                    let mut lowest_neighbor_floor_difference = Self::MAX_FILTER_HEIGHT;
                    let mut lowest_traversable_floor = floor;
                    let mut highest_traversable_floor = floor;

                    for dir in 0..4 {
                        let neighbor_x = x as i32 + dir_offset_x(dir);
                        let neighbor_z = z as i32 + dir_offset_z(dir);
                        if !self.contains(neighbor_x, neighbor_z) {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }
                        let mut neighbor = self.span_key_at(neighbor_x as u16, neighbor_z as u16);
                        let neighbor_ceiling = neighbor
                            .map(|key| self.span(key).min() as i32)
                            .unwrap_or(Self::MAX_FILTER_HEIGHT);
                        // The open space under the lowest neighbor is a drop.
                        if ceiling.min(neighbor_ceiling) - floor >= walkable_height {
                            lowest_neighbor_floor_difference = -walkable_climb - 1;
                            break;
                        }

                        while let Some(neighbor_key) = neighbor {
                            let neighbor_span = self.span(neighbor_key);
                            neighbor = neighbor_span.next();
                            let neighbor_floor = neighbor_span.max() as i32;
                            let neighbor_ceiling = neighbor
                                .map(|key| self.span(key).min() as i32)
                                .unwrap_or(Self::MAX_FILTER_HEIGHT);
                            if ceiling.min(neighbor_ceiling) - floor.max(neighbor_floor)
                                < walkable_height
                            {
                                continue;
                            }
                            let difference = neighbor_floor - floor;
                            lowest_neighbor_floor_difference =
                                lowest_neighbor_floor_difference.min(difference);
                            if difference.abs() <= walkable_climb {
                                lowest_traversable_floor = lowest_traversable_floor.min(neighbor_floor);
                                highest_traversable_floor =
                                    highest_traversable_floor.max(neighbor_floor);
                            } else if difference < -walkable_climb {
                                // Already a ledge, no need to look further.
                                break;
                            }
                        }
                    }

                    let is_ledge = lowest_neighbor_floor_difference < -walkable_climb;
                    let is_steep = highest_traversable_floor - lowest_traversable_floor > walkable_climb;
                    if is_ledge || is_steep {
                        self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }

    /// Marks walkable spans as not walkable if the clearance above the span is less than the specified `walkable_height`.
    pub fn filter_walkable_low_height_spans(&mut self, walkable_height: u16) {
        for z in 0..self.height {
            for x in 0..self.width {
                for key in self.column_keys(x, z) {
                    let span = self.span(key);
                    let floor = span.max() as i32;
                    let ceiling = span
                        .next()
                        .map(|next| self.span(next).min() as i32)
                        .unwrap_or(Self::MAX_FILTER_HEIGHT);
                    if ceiling - floor < walkable_height as i32 {
                        self.span_mut(key).set_area(AreaType::NOT_WALKABLE);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use glam::Vec3A;

    use crate::{
        Aabb3d, HeightfieldBuilder,
        heightfield::SpanInsertion,
        span::{Span, SpanBuilder},
    };

    use super::*;

    fn heightfield() -> Heightfield {
        HeightfieldBuilder {
            aabb: Aabb3d {
                min: Vec3A::ZERO,
                max: Vec3A::new(3.0, 20.0, 3.0),
            },
            cell_size: 1.0,
            cell_height: 1.0,
        }
        .build()
        .unwrap()
    }

    fn add(heightfield: &mut Heightfield, x: u16, z: u16, min: u16, max: u16, area: AreaType) {
        heightfield
            .add_span(SpanInsertion {
                x,
                z,
                flag_merge_threshold: 0,
                span: SpanBuilder {
                    min,
                    max,
                    area,
                    next: None,
                }
                .build(),
            })
            .unwrap();
    }

    fn areas(heightfield: &Heightfield, x: u16, z: u16) -> Vec<AreaType> {
        heightfield.column(x, z).map(|(_, span)| span.area()).collect()
    }

    #[test]
    fn low_obstacle_on_walkable_floor_becomes_walkable() {
        let mut heightfield = heightfield();
        add(&mut heightfield, 1, 1, 0, 2, AreaType::DEFAULT_WALKABLE);
        add(&mut heightfield, 1, 1, 3, 4, AreaType::NOT_WALKABLE);
        add(&mut heightfield, 1, 1, 5, 6, AreaType::NOT_WALKABLE);
        heightfield.filter_low_hanging_walkable_obstacles(2);
        assert_eq!(
            areas(&heightfield, 1, 1),
            vec![
                AreaType::DEFAULT_WALKABLE,
                AreaType::DEFAULT_WALKABLE,
                AreaType::NOT_WALKABLE
            ]
        );
    }

    #[test]
    fn low_ceiling_is_unwalkable() {
        let mut heightfield = heightfield();
        add(&mut heightfield, 1, 1, 0, 2, AreaType::DEFAULT_WALKABLE);
        add(&mut heightfield, 1, 1, 4, 6, AreaType::DEFAULT_WALKABLE);
        heightfield.filter_walkable_low_height_spans(3);
        assert_eq!(
            areas(&heightfield, 1, 1),
            vec![AreaType::NOT_WALKABLE, AreaType::DEFAULT_WALKABLE]
        );
    }

    #[test]
    fn isolated_pillar_top_is_a_ledge() {
        let mut heightfield = heightfield();
        for z in 0..3 {
            for x in 0..3 {
                add(&mut heightfield, x, z, 0, 1, AreaType::DEFAULT_WALKABLE);
            }
        }
        add(&mut heightfield, 1, 1, 1, 10, AreaType::DEFAULT_WALKABLE);
        heightfield.filter_ledge_spans(2, 1);
        let top: Vec<&Span> = heightfield.column(1, 1).map(|(_, span)| span).collect();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].area(), AreaType::NOT_WALKABLE);
        // Edge cells border the outside of the field.
        assert_eq!(areas(&heightfield, 0, 0), vec![AreaType::NOT_WALKABLE]);
    }
}
