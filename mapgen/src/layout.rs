//! Chest and resource placement from the room seed.

use cove_core::types::{Resource, ResourceKind, Vec3};

use crate::island::{is_on_island, RANGE};
use crate::rng::Mulberry32;

/// Resources generated per room.
pub const RESOURCE_COUNT: usize = 200;

/// Minimum spacing between placed resources, meters.
const RESOURCE_SPACING: f64 = 5.0;

const CHEST_ATTEMPTS: usize = 200;

fn point_in_disc(rng: &mut Mulberry32, radius: f64) -> (f64, f64) {
    let angle = rng.next_f64() * std::f64::consts::TAU;
    let r = rng.next_f64().sqrt() * radius;
    (angle.cos() * r, angle.sin() * r)
}

/// The hidden chest position for `seed`. Uniform in a disc of radius
/// RANGE/2.5, rejecting water, with the origin as a fallback when no land
/// is found within the attempt budget.
pub fn chest_position(seed: u32) -> Vec3 {
    let mut rng = Mulberry32::new(seed.wrapping_mul(99991));
    for _ in 0..CHEST_ATTEMPTS {
        let (x, z) = point_in_disc(&mut rng, RANGE / 2.5);
        if is_on_island(x, z, seed, false) {
            return Vec3::new(x, 0.0, z);
        }
    }
    Vec3::default()
}

/// The resource field for `seed`: up to `count` nodes on strict land, at
/// least [`RESOURCE_SPACING`] apart, ids assigned in placement order. Both
/// sides must produce identical output, including order.
pub fn generate_resources(seed: u32, count: usize) -> Vec<Resource> {
    let mut rng = Mulberry32::new(seed.wrapping_mul(77777));
    let mut out: Vec<Resource> = Vec::with_capacity(count);

    // The attempt budget bounds hostile seeds whose islands are mostly
    // water; short fields are acceptable, nondeterministic spins are not.
    let mut attempts = 0;
    let max_attempts = count * 50;

    while out.len() < count && attempts < max_attempts {
        attempts += 1;
        let (x, z) = point_in_disc(&mut rng, RANGE / 2.2);
        if !is_on_island(x, z, seed, true) {
            continue;
        }
        let position = Vec3::new(x, 0.0, z);
        if out
            .iter()
            .any(|r| r.position.horizontal_distance(&position) < RESOURCE_SPACING)
        {
            continue;
        }
        let kind = match (rng.next_f64() * 3.0) as u32 {
            0 => ResourceKind::Wood,
            1 => ResourceKind::Stone,
            _ => ResourceKind::Berry,
        };
        out.push(Resource {
            id: format!("res_{}", out.len()),
            kind,
            position,
            harvested: false,
        });
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chest_regenerates_identically() {
        for seed in [12345u32, 999, 7, 0xCAFE_F00D] {
            assert_eq!(chest_position(seed), chest_position(seed));
        }
    }

    #[test]
    fn test_chest_lands_on_island_or_origin() {
        for seed in [12345u32, 999, 7] {
            let chest = chest_position(seed);
            let fallback = chest == Vec3::default();
            assert!(fallback || is_on_island(chest.x, chest.z, seed, false));
        }
    }

    #[test]
    fn test_resources_regenerate_identically() {
        // Two servers with the same seed must produce the same list, same
        // order, same positions, same kinds.
        let a = generate_resources(999, RESOURCE_COUNT);
        let b = generate_resources(999, RESOURCE_COUNT);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn test_resources_differ_across_seeds() {
        let a = generate_resources(1, RESOURCE_COUNT);
        let b = generate_resources(2, RESOURCE_COUNT);
        assert_ne!(a, b);
    }

    #[test]
    fn test_resource_constraints() {
        let resources = generate_resources(12345, RESOURCE_COUNT);
        assert!(resources.len() <= RESOURCE_COUNT);

        for (i, res) in resources.iter().enumerate() {
            assert_eq!(res.id, format!("res_{}", i));
            assert!(!res.harvested);
            assert!(is_on_island(res.position.x, res.position.z, 12345, true));
            for other in &resources[..i] {
                assert!(
                    res.position.horizontal_distance(&other.position) >= RESOURCE_SPACING,
                    "resources {} and {} too close",
                    other.id,
                    res.id
                );
            }
        }
    }

    #[test]
    fn test_resources_stay_in_disc() {
        let resources = generate_resources(555, RESOURCE_COUNT);
        let origin = Vec3::default();
        for res in &resources {
            assert!(res.position.horizontal_distance(&origin) <= RANGE / 2.2 + 1e-9);
        }
    }
}
