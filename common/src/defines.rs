//! Shared game constants and the wire error-code space.

/// Edge length of a map tile in pixels. Pixel and tile coordinates share
/// the same origin; tile (tx, ty) covers pixels [tx*32, tx*32+31].
pub const TILE_SIZE: i32 = 32;

/// Milliseconds per simulation tick. All residual action times are
/// progressed by this amount once per tick.
pub const TICK_MS: u32 = 100;

/// Ticks per second, for converting configured rates.
pub const TICKS_PER_SECOND: u32 = 10;

/// Ticks between two HP regeneration pulses.
pub const TICKS_PER_HP_REGEN: u32 = 10;

/// Manhattan distance, in pixels, within which entity events are delivered
/// to a character. One zone radius in practice.
pub const AROUND_AREA: i32 = 256;

/// Edge length of a spatial-index zone, in tiles.
pub const ZONE_TILES: i32 = 8;

/// Number of inventory slots a character owns.
pub const MAX_SLOTS: usize = 50;

/// Hard cap on a projectile stack held in the quiver slot.
pub const MAX_PROJECTILES: u32 = 255;

/// Attribute points a fresh level-1 character distributes. Creation requires
/// the submitted total to equal this value exactly.
pub const POINTS_TO_DISTRIBUTE_AT_LVL1: u32 = 60;

/// Maximum characters per account.
pub const MAX_CHARS_PER_ACCOUNT: usize = 3;

/// Channel ids below this value are public channels, ids at or above are
/// private (guild channels among them).
pub const PRIVATE_CHANNEL_START: u16 = 1000;
pub const MAX_PUBLIC_CHANNELS: usize = 128;
pub const MAX_PRIVATE_CHANNELS: usize = 4096;

/// Ticks a monster corpse stays on the map before it is removed.
pub const ROT_TICKS: u32 = 50;

// Character stats, in snapshot order.
pub const CHAR_ATTR_STRENGTH: usize = 0;
pub const CHAR_ATTR_AGILITY: usize = 1;
pub const CHAR_ATTR_DEXTERITY: usize = 2;
pub const CHAR_ATTR_VITALITY: usize = 3;
pub const CHAR_ATTR_INTELLIGENCE: usize = 4;
pub const CHAR_ATTR_WILLPOWER: usize = 5;
pub const CHAR_ATTR_NB: usize = 6;

/// Number of skills that accumulate experience independently.
pub const CHAR_SKILL_NB: usize = 8;

// Derived being attributes. Element resistances trail the fixed block, one
// slot per element, base 100 (= normal damage).
pub const BASE_ATTR_HP: usize = 0;
pub const BASE_ATTR_HP_REGEN: usize = 1;
pub const BASE_ATTR_PHY_ATK_MIN: usize = 2;
pub const BASE_ATTR_PHY_ATK_DELTA: usize = 3;
pub const BASE_ATTR_MAG_ATK: usize = 4;
pub const BASE_ATTR_HIT: usize = 5;
pub const BASE_ATTR_EVADE: usize = 6;
pub const BASE_ATTR_PHY_RES: usize = 7;
pub const BASE_ATTR_MAG_RES: usize = 8;
pub const BASE_ELEM_BEGIN: usize = 9;
pub const BASE_ELEM_NB: usize = 6;
pub const NB_BEING_ATTRIBUTES: usize = BASE_ELEM_BEGIN + BASE_ELEM_NB;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
#[repr(u8)]
pub enum Element {
    Neutral = 0,
    Fire = 1,
    Water = 2,
    Earth = 3,
    Air = 4,
    Shadow = 5,
}

impl Element {
    pub fn from_u8(v: u8) -> Element {
        match v {
            1 => Element::Fire,
            2 => Element::Water,
            3 => Element::Earth,
            4 => Element::Air,
            5 => Element::Shadow,
            _ => Element::Neutral,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum DamageType {
    Physical = 0,
    Magical = 1,
    Other = 2,
}

// Equipment slots, in snapshot order. The projectile reference rides in the
// last slot; its stack count lives in the inventory multiset whenever a
// snapshot is taken.
pub const EQUIP_TORSO_SLOT: usize = 0;
pub const EQUIP_ARMS_SLOT: usize = 1;
pub const EQUIP_HEAD_SLOT: usize = 2;
pub const EQUIP_LEGS_SLOT: usize = 3;
pub const EQUIP_FEET_SLOT: usize = 4;
pub const EQUIP_RING1_SLOT: usize = 5;
pub const EQUIP_RING2_SLOT: usize = 6;
pub const EQUIP_NECKLACE_SLOT: usize = 7;
pub const EQUIP_FIGHT1_SLOT: usize = 8;
pub const EQUIP_FIGHT2_SLOT: usize = 9;
pub const EQUIP_PROJECTILE_SLOT: usize = 10;
pub const EQUIPMENT_SLOTS: usize = 11;

/// Shared single-byte error-code space. Every client-visible failure is
/// surfaced as a reply carrying the request's message id and one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ErrorCode {
    Ok = 0,
    InvalidArgument = 1,
    Failure = 2,
    NoLogin = 3,
    InsufficientRights = 4,
    AlreadyTaken = 5,
    LimitReached = 6,
    Timeout = 7,
    // Category-specific extensions share the tail of the space.
    WrongPassword = 10,
    InventoryFull = 11,
    NoCharacterSelected = 12,
    ServerFull = 13,
}

impl ErrorCode {
    pub fn from_u8(v: u8) -> ErrorCode {
        match v {
            0 => ErrorCode::Ok,
            1 => ErrorCode::InvalidArgument,
            3 => ErrorCode::NoLogin,
            4 => ErrorCode::InsufficientRights,
            5 => ErrorCode::AlreadyTaken,
            6 => ErrorCode::LimitReached,
            7 => ErrorCode::Timeout,
            10 => ErrorCode::WrongPassword,
            11 => ErrorCode::InventoryFull,
            12 => ErrorCode::NoCharacterSelected,
            13 => ErrorCode::ServerFull,
            _ => ErrorCode::Failure,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Gender {
    Male = 0,
    Female = 1,
    Neutral = 2,
}

impl Gender {
    pub fn from_u8(v: u8) -> Gender {
        match v {
            0 => Gender::Male,
            1 => Gender::Female,
            _ => Gender::Neutral,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_code_round_trips() {
        for code in [
            ErrorCode::Ok,
            ErrorCode::InvalidArgument,
            ErrorCode::Failure,
            ErrorCode::NoLogin,
            ErrorCode::InsufficientRights,
            ErrorCode::AlreadyTaken,
            ErrorCode::LimitReached,
            ErrorCode::Timeout,
            ErrorCode::WrongPassword,
            ErrorCode::InventoryFull,
            ErrorCode::NoCharacterSelected,
            ErrorCode::ServerFull,
        ] {
            assert_eq!(ErrorCode::from_u8(code as u8), code);
        }
    }

    #[test]
    fn attribute_layout_is_contiguous() {
        assert_eq!(BASE_ELEM_BEGIN, BASE_ATTR_MAG_RES + 1);
        assert_eq!(NB_BEING_ATTRIBUTES, 15);
    }
}
