// devices/catalog.rs
use crate::models::{Bulb, BulbId, House, HouseId};
use std::collections::{BTreeMap, HashMap};
use thiserror::Error;
use tracing::warn;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Bulb {0} is defined more than once")]
    DuplicateBulb(BulbId),
    #[error("House {0} is defined more than once")]
    DuplicateHouse(HouseId),
    #[error("Bulb {bulb} is assigned to both house {first} and house {second}")]
    SharedBulb {
        bulb: BulbId,
        first: HouseId,
        second: HouseId,
    },
}

/// Immutable bulb and house lookup tables, built once from configuration.
#[derive(Debug, Default)]
pub struct Catalog {
    bulbs: Vec<Bulb>,
    index: HashMap<BulbId, usize>,
    houses: BTreeMap<HouseId, Vec<BulbId>>,
    owners: HashMap<BulbId, HouseId>,
}

impl Catalog {
    pub fn new(bulbs: Vec<Bulb>, houses: Vec<House>) -> Result<Self, CatalogError> {
        let mut index = HashMap::with_capacity(bulbs.len());
        for (position, bulb) in bulbs.iter().enumerate() {
            if index.insert(bulb.id, position).is_some() {
                return Err(CatalogError::DuplicateBulb(bulb.id));
            }
        }

        let mut owners = HashMap::new();
        let mut members = BTreeMap::new();
        for house in houses {
            if members.contains_key(&house.id) {
                return Err(CatalogError::DuplicateHouse(house.id));
            }

            let mut ids = Vec::with_capacity(house.bulbs.len());
            for bulb in house.bulbs {
                if !index.contains_key(&bulb) {
                    warn!(house = house.id, bulb, "House references an unknown bulb, ignoring");
                    continue;
                }
                match owners.insert(bulb, house.id) {
                    Some(first) if first != house.id => {
                        return Err(CatalogError::SharedBulb {
                            bulb,
                            first,
                            second: house.id,
                        });
                    }
                    Some(_) => continue,
                    None => ids.push(bulb),
                }
            }
            members.insert(house.id, ids);
        }

        Ok(Self {
            bulbs,
            index,
            houses: members,
            owners,
        })
    }

    pub fn bulbs(&self) -> &[Bulb] {
        &self.bulbs
    }

    pub fn bulb(&self, id: BulbId) -> Option<&Bulb> {
        self.index.get(&id).map(|&position| &self.bulbs[position])
    }

    /// Bulbs of a house in configuration order, or `None` if the house is unknown.
    pub fn house_bulbs(&self, house: HouseId) -> Option<Vec<&Bulb>> {
        let ids = self.houses.get(&house)?;
        Some(
            self.bulbs
                .iter()
                .filter(|bulb| ids.contains(&bulb.id))
                .collect(),
        )
    }

    pub fn house_of(&self, bulb: BulbId) -> Option<HouseId> {
        self.owners.get(&bulb).copied()
    }

    pub fn house_ids(&self) -> impl Iterator<Item = HouseId> + '_ {
        self.houses.keys().copied()
    }
}
