//! Layered attribute modifiers.
//!
//! An attribute is a base value plus an ordered stack of layers, each of a
//! fixed stacking kind and effect kind. A layer caches its modified value
//! as a function of the previous layer's value; mutations recompute the
//! touched layer and propagate upward only while values keep changing.

use common::defines::{BASE_ELEM_BEGIN, NB_BEING_ATTRIBUTES};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StackKind {
    /// Values combine: sums for additive layers, products for
    /// multiplicative ones.
    Stackable,
    /// Only the strongest value applies.
    NonStackable,
    /// The strongest value applies on top of the previous layer.
    NonStackableBonus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectKind {
    Add,
    Multiply,
}

/// Layer profile shared by every being attribute: equipment and permanent
/// effects sum on layer 0, spell buffs multiply on layer 1, blessings take
/// the best bonus on layer 2.
pub const LAYER_EQUIP: usize = 0;
pub const LAYER_BUFF: usize = 1;
pub const LAYER_BLESSING: usize = 2;

const LAYER_PROFILE: &[(StackKind, EffectKind)] = &[
    (StackKind::Stackable, EffectKind::Add),
    (StackKind::Stackable, EffectKind::Multiply),
    (StackKind::NonStackableBonus, EffectKind::Add),
];

/// Duration 0 marks a permanent modifier (equipment); it never expires and
/// is removed by value+id when the item comes off.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Modifier {
    pub value: f64,
    pub duration: u32,
    pub id: u32,
}

#[derive(Debug, Clone)]
struct Layer {
    stack: StackKind,
    effect: EffectKind,
    states: Vec<Modifier>,
    aggregate: f64,
    cached: f64,
}

impl Layer {
    fn new(stack: StackKind, effect: EffectKind) -> Layer {
        Layer {
            stack,
            effect,
            states: Vec::new(),
            aggregate: match effect {
                EffectKind::Add => 0.0,
                EffectKind::Multiply => 1.0,
            },
            cached: 0.0,
        }
    }

    fn recompute_aggregate(&mut self) {
        self.aggregate = match (self.stack, self.effect) {
            (StackKind::Stackable, EffectKind::Add) => {
                self.states.iter().map(|m| m.value).sum()
            }
            (StackKind::Stackable, EffectKind::Multiply) => {
                self.states.iter().map(|m| m.value).product()
            }
            (_, EffectKind::Add) => self
                .states
                .iter()
                .map(|m| m.value)
                .fold(0.0, f64::max),
            (_, EffectKind::Multiply) => self
                .states
                .iter()
                .map(|m| m.value)
                .fold(1.0, f64::max),
        };
    }

    /// Recomputes the cached value from the previous layer's value.
    /// Returns true when the cache changed.
    fn recalculate(&mut self, prev: f64) -> bool {
        let old = self.cached;
        self.cached = match (self.stack, self.effect) {
            (StackKind::Stackable, EffectKind::Add) => prev + self.aggregate,
            (StackKind::Stackable, EffectKind::Multiply) => prev * self.aggregate,
            (StackKind::NonStackable, EffectKind::Add) => prev.max(self.aggregate),
            (StackKind::NonStackable, EffectKind::Multiply) => prev.max(self.aggregate),
            (StackKind::NonStackableBonus, EffectKind::Add) => prev + self.aggregate,
            (StackKind::NonStackableBonus, EffectKind::Multiply) => prev * self.aggregate,
        };
        old != self.cached
    }
}

/// One attribute: base value plus its modifier layers.
#[derive(Debug, Clone)]
pub struct Attribute {
    base: f64,
    layers: Vec<Layer>,
}

impl Attribute {
    pub fn new(base: f64) -> Attribute {
        let mut attr = Attribute {
            base,
            layers: LAYER_PROFILE
                .iter()
                .map(|&(s, e)| Layer::new(s, e))
                .collect(),
        };
        attr.propagate_from(0);
        attr
    }

    pub fn base(&self) -> f64 {
        self.base
    }

    pub fn set_base(&mut self, base: f64) {
        self.base = base;
        self.propagate_from(0);
    }

    /// The fully modified value, floored at zero.
    pub fn modified(&self) -> i32 {
        let v = self
            .layers
            .last()
            .map(|l| l.cached)
            .unwrap_or(self.base);
        if v <= 0.0 {
            0
        } else {
            v.round() as i32
        }
    }

    fn prev_value(&self, layer: usize) -> f64 {
        if layer == 0 {
            self.base
        } else {
            self.layers[layer - 1].cached
        }
    }

    /// Recomputes `layer` and everything above it, stopping early when a
    /// layer's cache does not change.
    fn propagate_from(&mut self, layer: usize) -> bool {
        let mut changed = false;
        for i in layer..self.layers.len() {
            let prev = self.prev_value(i);
            if self.layers[i].recalculate(prev) {
                changed = true;
            } else if i > layer {
                break;
            }
        }
        changed
    }

    /// Adds a modifier to `layer`. Returns true when the modified value
    /// changed.
    pub fn add_modifier(&mut self, layer: usize, modifier: Modifier) -> bool {
        self.layers[layer].states.push(modifier);
        self.layers[layer].recompute_aggregate();
        self.propagate_from(layer)
    }

    /// Removes one modifier matching (value, id) from `layer`. Targeted
    /// dispel passes the id it stamped at add time.
    pub fn remove_modifier(&mut self, layer: usize, value: f64, id: u32) -> bool {
        let states = &mut self.layers[layer].states;
        let Some(pos) = states.iter().position(|m| m.value == value && m.id == id) else {
            return false;
        };
        states.remove(pos);
        self.layers[layer].recompute_aggregate();
        self.propagate_from(layer)
    }

    /// Ages timed modifiers by one tick, dropping expired ones. Returns
    /// true when the modified value changed.
    pub fn tick(&mut self) -> bool {
        let mut lowest_touched = None;
        for (i, layer) in self.layers.iter_mut().enumerate() {
            let before = layer.states.len();
            layer.states.retain_mut(|m| {
                if m.is_permanent() {
                    return true;
                }
                m.duration -= 1;
                m.duration > 0
            });
            if layer.states.len() != before {
                layer.recompute_aggregate();
                lowest_touched.get_or_insert(i);
            }
        }
        match lowest_touched {
            Some(i) => self.propagate_from(i),
            None => false,
        }
    }
}

impl Modifier {
    pub fn permanent(value: f64, id: u32) -> Modifier {
        Modifier {
            value,
            duration: 0,
            id,
        }
    }

    pub fn timed(value: f64, duration: u32, id: u32) -> Modifier {
        Modifier {
            value,
            duration,
            id,
        }
    }

    fn is_permanent(&self) -> bool {
        self.duration == 0
    }
}

/// The full attribute vector of a being, indexed by the `BASE_ATTR_*` /
/// `BASE_ELEM_*` constants.
#[derive(Debug, Clone)]
pub struct AttributeSet {
    attributes: Vec<Attribute>,
}

impl AttributeSet {
    /// All zero except element resistances, which start at 100 (normal
    /// damage).
    pub fn new() -> AttributeSet {
        let mut attributes = Vec::with_capacity(NB_BEING_ATTRIBUTES);
        for i in 0..NB_BEING_ATTRIBUTES {
            let base = if i >= BASE_ELEM_BEGIN { 100.0 } else { 0.0 };
            attributes.push(Attribute::new(base));
        }
        AttributeSet { attributes }
    }

    pub fn base(&self, attr: usize) -> i32 {
        self.attributes[attr].base() as i32
    }

    pub fn set_base(&mut self, attr: usize, base: i32) {
        self.attributes[attr].set_base(base as f64);
    }

    pub fn modified(&self, attr: usize) -> i32 {
        self.attributes[attr].modified()
    }

    pub fn add_modifier(&mut self, attr: usize, layer: usize, modifier: Modifier) -> bool {
        self.attributes[attr].add_modifier(layer, modifier)
    }

    pub fn remove_modifier(&mut self, attr: usize, layer: usize, value: f64, id: u32) -> bool {
        self.attributes[attr].remove_modifier(layer, value, id)
    }

    /// Per-tick timer step over every attribute. Returns the indices whose
    /// modified value changed, for client attribute updates.
    pub fn tick(&mut self) -> Vec<usize> {
        let mut changed = Vec::new();
        for (i, attr) in self.attributes.iter_mut().enumerate() {
            if attr.tick() {
                changed.push(i);
            }
        }
        changed
    }
}

impl Default for AttributeSet {
    fn default() -> Self {
        AttributeSet::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn additive_layer_stacks() {
        let mut attr = Attribute::new(10.0);
        attr.add_modifier(LAYER_EQUIP, Modifier::permanent(5.0, 1));
        attr.add_modifier(LAYER_EQUIP, Modifier::permanent(3.0, 2));
        assert_eq!(attr.modified(), 18);
        attr.remove_modifier(LAYER_EQUIP, 5.0, 1);
        assert_eq!(attr.modified(), 13);
    }

    #[test]
    fn multiplicative_layer_applies_over_equipment() {
        let mut attr = Attribute::new(10.0);
        attr.add_modifier(LAYER_EQUIP, Modifier::permanent(10.0, 1));
        attr.add_modifier(LAYER_BUFF, Modifier::timed(1.5, 10, 2));
        assert_eq!(attr.modified(), 30);
    }

    #[test]
    fn non_stackable_bonus_takes_the_best() {
        let mut attr = Attribute::new(10.0);
        attr.add_modifier(LAYER_BLESSING, Modifier::timed(4.0, 10, 1));
        attr.add_modifier(LAYER_BLESSING, Modifier::timed(7.0, 10, 2));
        assert_eq!(attr.modified(), 17);
        attr.remove_modifier(LAYER_BLESSING, 7.0, 2);
        assert_eq!(attr.modified(), 14);
    }

    #[test]
    fn timed_modifiers_expire() {
        let mut attr = Attribute::new(10.0);
        attr.add_modifier(LAYER_EQUIP, Modifier::timed(5.0, 2, 1));
        assert_eq!(attr.modified(), 15);
        assert!(!attr.tick()); // 2 -> 1, still active
        assert_eq!(attr.modified(), 15);
        assert!(attr.tick()); // 1 -> 0, expired
        assert_eq!(attr.modified(), 10);
    }

    #[test]
    fn permanent_modifiers_survive_ticks() {
        let mut attr = Attribute::new(10.0);
        attr.add_modifier(LAYER_EQUIP, Modifier::permanent(5.0, 9));
        for _ in 0..100 {
            attr.tick();
        }
        assert_eq!(attr.modified(), 15);
    }

    #[test]
    fn modified_value_floors_at_zero() {
        let mut attr = Attribute::new(5.0);
        attr.add_modifier(LAYER_EQUIP, Modifier::permanent(-20.0, 1));
        assert_eq!(attr.modified(), 0);
    }

    #[test]
    fn element_resistances_default_to_normal() {
        let set = AttributeSet::new();
        assert_eq!(set.modified(BASE_ELEM_BEGIN), 100);
        assert_eq!(set.modified(0), 0);
    }
}
