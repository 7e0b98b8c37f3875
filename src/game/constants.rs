// src/game/constants.rs
//! Game constants shared by processors and the sandbox bootstrap

use serde::{Deserialize, Serialize};

pub const ROOM_SIZE: u8 = 50;

pub const MAX_CREEP_SIZE: usize = 50;
pub const CREEP_LIFE_TIME: u32 = 1500;
pub const CREEP_SPAWN_TIME: u32 = 3;
pub const BODYPART_HITS: i32 = 100;
pub const CARRY_CAPACITY: i32 = 50;

pub const HARVEST_POWER: i32 = 2;
pub const ATTACK_POWER: i32 = 30;
pub const BUILD_POWER: i32 = 5;
pub const UPGRADE_CONTROLLER_POWER: i32 = 1;

pub const SOURCE_ENERGY_CAPACITY: i32 = 3000;
pub const ENERGY_REGEN_TIME: u32 = 300;
pub const ENERGY_DECAY: i32 = 1000;

pub const SPAWN_HITS: i32 = 5000;
pub const SPAWN_ENERGY_CAPACITY: i32 = 300;
pub const SPAWN_ENERGY_START: i32 = 300;
pub const EXTENSION_HITS: i32 = 1000;
pub const EXTENSION_ENERGY_CAPACITY: i32 = 50;

pub const ROAD_HITS: i32 = 5000;
pub const ROAD_DECAY_AMOUNT: i32 = 100;
pub const ROAD_DECAY_TIME: u32 = 1000;

pub const CONTAINER_HITS: i32 = 250_000;
pub const CONTAINER_CAPACITY: i32 = 2000;
pub const CONTAINER_DECAY: i32 = 5000;
pub const CONTAINER_DECAY_TIME: u32 = 500;

pub const MAX_CONTROLLER_LEVEL: u8 = 8;

/// Progress needed to leave each controller level (index = level - 1)
pub const CONTROLLER_LEVELS: [i32; 7] = [200, 45_000, 135_000, 405_000, 1_215_000, 3_645_000, 10_935_000];

pub const CONSTRUCTION_COST_SPAWN: i32 = 15_000;
pub const CONSTRUCTION_COST_EXTENSION: i32 = 3000;
pub const CONSTRUCTION_COST_ROAD: i32 = 300;
pub const CONSTRUCTION_COST_CONTAINER: i32 = 5000;

/// Creep body part types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum BodyPartType {
    Move = 1,
    Work = 2,
    Carry = 3,
    Attack = 4,
    RangedAttack = 5,
    Heal = 6,
    Tough = 7,
    Claim = 8,
}

impl BodyPartType {
    pub const ALL: [BodyPartType; 8] = [
        BodyPartType::Move,
        BodyPartType::Work,
        BodyPartType::Carry,
        BodyPartType::Attack,
        BodyPartType::RangedAttack,
        BodyPartType::Heal,
        BodyPartType::Tough,
        BodyPartType::Claim,
    ];

    /// Energy needed to spawn one part
    pub fn cost(self) -> i32 {
        match self {
            BodyPartType::Move => 50,
            BodyPartType::Work => 100,
            BodyPartType::Carry => 50,
            BodyPartType::Attack => 80,
            BodyPartType::RangedAttack => 150,
            BodyPartType::Heal => 250,
            BodyPartType::Tough => 10,
            BodyPartType::Claim => 600,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            BodyPartType::Move => "move",
            BodyPartType::Work => "work",
            BodyPartType::Carry => "carry",
            BodyPartType::Attack => "attack",
            BodyPartType::RangedAttack => "ranged_attack",
            BodyPartType::Heal => "heal",
            BodyPartType::Tough => "tough",
            BodyPartType::Claim => "claim",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|part| part.name() == name)
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|part| *part as u8 == value)
    }
}
