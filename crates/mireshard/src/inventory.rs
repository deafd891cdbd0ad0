//! A minimal carry model: item stacks in a pack plus floor piles per room.
//!
//! The full inventory ruleset is outside the shard core; this is just
//! enough state for get/drop/balance to work end to end.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemStack {
    pub id: String,
    pub name: String,
    pub quantity: u32,
}

pub const DEFAULT_PACK_SLOTS: usize = 20;

#[derive(Debug, Clone)]
pub struct Backpack {
    pub items: Vec<ItemStack>,
    pub slots: usize,
}

impl Default for Backpack {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            slots: DEFAULT_PACK_SLOTS,
        }
    }
}

impl Backpack {
    /// Add one unit of an item, stacking with an existing entry.
    pub fn add(&mut self, id: &str, name: &str) -> Result<(), &'static str> {
        if let Some(stack) = self.items.iter_mut().find(|s| s.id == id) {
            stack.quantity += 1;
            return Ok(());
        }
        if self.items.len() >= self.slots {
            return Err("your pack is full");
        }
        self.items.push(ItemStack {
            id: id.to_string(),
            name: name.to_string(),
            quantity: 1,
        });
        Ok(())
    }

    /// Remove one unit by id or name; returns the stack's display name.
    pub fn remove(&mut self, what: &str) -> Option<String> {
        let idx = self
            .items
            .iter()
            .position(|s| s.id == what || s.name.eq_ignore_ascii_case(what))?;
        let name = self.items[idx].name.clone();
        if self.items[idx].quantity > 1 {
            self.items[idx].quantity -= 1;
        } else {
            self.items.remove(idx);
        }
        Some(name)
    }
}

/// Items lying on room floors.
#[derive(Debug, Default)]
pub struct FloorItems {
    by_room: HashMap<String, Vec<ItemStack>>,
}

impl FloorItems {
    pub fn drop_item(&mut self, room_id: &str, id: &str, name: &str) {
        let pile = self.by_room.entry(room_id.to_string()).or_default();
        if let Some(stack) = pile.iter_mut().find(|s| s.id == id) {
            stack.quantity += 1;
        } else {
            pile.push(ItemStack {
                id: id.to_string(),
                name: name.to_string(),
                quantity: 1,
            });
        }
    }

    /// Pick one unit up by id or name.
    pub fn take(&mut self, room_id: &str, what: &str) -> Option<ItemStack> {
        let pile = self.by_room.get_mut(room_id)?;
        let idx = pile
            .iter()
            .position(|s| s.id == what || s.name.eq_ignore_ascii_case(what))?;
        let mut taken = pile[idx].clone();
        taken.quantity = 1;
        if pile[idx].quantity > 1 {
            pile[idx].quantity -= 1;
        } else {
            pile.remove(idx);
        }
        if pile.is_empty() {
            self.by_room.remove(room_id);
        }
        Some(taken)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_stacks_duplicates() {
        let mut p = Backpack::default();
        p.add("scrap", "Scrap Iron").unwrap();
        p.add("scrap", "Scrap Iron").unwrap();
        assert_eq!(p.items.len(), 1);
        assert_eq!(p.items[0].quantity, 2);
    }

    #[test]
    fn pack_remove_by_name_is_case_insensitive() {
        let mut p = Backpack::default();
        p.add("scrap", "Scrap Iron").unwrap();
        assert_eq!(p.remove("scrap iron").unwrap(), "Scrap Iron");
        assert!(p.items.is_empty());
    }

    #[test]
    fn full_pack_rejects_new_stacks() {
        let mut p = Backpack {
            items: Vec::new(),
            slots: 1,
        };
        p.add("a", "A").unwrap();
        assert!(p.add("b", "B").is_err());
        // Stacking into an existing slot still works.
        p.add("a", "A").unwrap();
    }

    #[test]
    fn floor_round_trip() {
        let mut f = FloorItems::default();
        f.drop_item("r1", "scrap", "Scrap Iron");
        f.drop_item("r1", "scrap", "Scrap Iron");
        let taken = f.take("r1", "Scrap Iron").unwrap();
        assert_eq!(taken.quantity, 1);
        assert!(f.take("r1", "scrap").is_some());
        assert!(f.take("r1", "scrap").is_none());
    }
}
