//! World registry
//!
//! The `World` is the single owner of all simulation entities. Ships are
//! keyed by string id; torpedoes and depth charges are kept in flat
//! lists stepped each tick. Everything outside the registry refers to
//! entities by id only.

use std::collections::BTreeMap;

use crate::models::{DepthCharge, Ship, Side, Torpedo};

/// Central entity registry for one simulation session
#[derive(Debug, Default)]
pub struct World {
    ships: BTreeMap<String, Ship>,
    pub torpedoes: Vec<Torpedo>,
    pub depth_charges: Vec<DepthCharge>,
}

impl World {
    pub fn new() -> Self {
        Self::default()
    }

    // ==================== Ship Registry ====================

    /// Register a ship; replaces any existing ship with the same id
    pub fn add_ship(&mut self, ship: Ship) -> String {
        let id = ship.id.clone();
        self.ships.insert(id.clone(), ship);
        id
    }

    pub fn get_ship(&self, id: &str) -> Option<&Ship> {
        self.ships.get(id)
    }

    pub fn get_ship_mut(&mut self, id: &str) -> Option<&mut Ship> {
        self.ships.get_mut(id)
    }

    pub fn remove_ship(&mut self, id: &str) -> Result<(), String> {
        self.ships
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| format!("Ship {} not found", id))
    }

    /// All ships in id order (deterministic iteration)
    pub fn all_ships(&self) -> impl Iterator<Item = &Ship> {
        self.ships.values()
    }

    pub fn all_ships_mut(&mut self) -> impl Iterator<Item = &mut Ship> {
        self.ships.values_mut()
    }

    pub fn ship_ids(&self) -> Vec<String> {
        self.ships.keys().cloned().collect()
    }

    pub fn ships_on_side(&self, side: Side) -> impl Iterator<Item = &Ship> {
        self.ships.values().filter(move |s| s.side == side)
    }

    pub fn ship_count(&self) -> usize {
        self.ships.len()
    }

    /// Remove every entity (used by mission application and restart)
    pub fn clear(&mut self) {
        self.ships.clear();
        self.torpedoes.clear();
        self.depth_charges.clear();
    }

    // ==================== Ordnance ====================

    /// Drop expired torpedoes and spent depth charges
    pub fn sweep_ordnance(&mut self) {
        self.torpedoes.retain(|t| !t.expired());
        self.depth_charges.retain(|dc| !dc.expired());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ShipCapabilities, ShipClass};

    fn test_ship(id: &str, side: Side) -> Ship {
        Ship {
            id: id.to_string(),
            side,
            ship_class: ShipClass::Ssn,
            kin: Default::default(),
            hull: Default::default(),
            acoustics: Default::default(),
            weapons: Default::default(),
            reactor: Default::default(),
            damage: Default::default(),
            power: Default::default(),
            systems: Default::default(),
            maintenance: Default::default(),
            capabilities: ShipCapabilities::default(),
        }
    }

    #[test]
    fn test_ship_registry() {
        let mut world = World::new();
        world.add_ship(test_ship("ownship", Side::Blue));
        world.add_ship(test_ship("red-01", Side::Red));

        assert_eq!(world.ship_count(), 2);
        assert!(world.get_ship("ownship").is_some());
        assert!(world.get_ship("red-99").is_none());
        assert_eq!(world.ships_on_side(Side::Red).count(), 1);

        world.remove_ship("red-01").unwrap();
        assert_eq!(world.ship_count(), 1);
        assert!(world.remove_ship("red-01").is_err());
    }

    #[test]
    fn test_iteration_is_id_ordered() {
        let mut world = World::new();
        world.add_ship(test_ship("b", Side::Red));
        world.add_ship(test_ship("a", Side::Red));
        let ids: Vec<&str> = world.all_ships().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b"]);
    }
}
