// VANALLIN RECIPE TABLE
// (LONGITUDINAL KIND x LIFECYCLE SLOT) -> ORDERED CATALOG OPS, RUN ONCE PER SAMPLED CPU

use std::fmt;
use std::str::FromStr;

use anyhow::{bail, Result};

use crate::msr::{self, OpTemplate};

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum Slot {
    Setup,
    Start,
    Stop,
    Read,
    Teardown,
}

impl Slot {
    pub const COUNT: usize = 5;
    pub const ALL: [Slot; Slot::COUNT] =
        [Slot::Setup, Slot::Start, Slot::Stop, Slot::Read, Slot::Teardown];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Setup => "SETUP",
            Self::Start => "START",
            Self::Stop => "STOP",
            Self::Read => "READ",
            Self::Teardown => "TEARDOWN",
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum LongitudinalKind {
    FixedFunctionCounters,
    EnergyCounters,
}

impl LongitudinalKind {
    pub const COUNT: usize = 2;
    pub const ALL: [LongitudinalKind; LongitudinalKind::COUNT] =
        [LongitudinalKind::FixedFunctionCounters, LongitudinalKind::EnergyCounters];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::FixedFunctionCounters => "FIXED_FUNCTION_COUNTERS",
            Self::EnergyCounters => "ENERGY_COUNTERS",
        }
    }
}

impl fmt::Display for LongitudinalKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for LongitudinalKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match Self::ALL.iter().find(|k| k.label() == s) {
            Some(k) => Ok(*k),
            None => bail!("UNKNOWN LONGITUDINAL TYPE ({})", s),
        }
    }
}

// --- RECIPES ---

const FIXED_FUNCTION_COUNTERS: [&[OpTemplate]; Slot::COUNT] = [
    &[msr::STOP_GLOBAL, msr::ZERO_FIXED_CTR0, msr::ZERO_FIXED_CTR1, msr::ZERO_FIXED_CTR2, msr::ENABLE_FIXED],
    &[msr::START_GLOBAL],
    &[msr::STOP_GLOBAL],
    &[msr::READ_FIXED_CTR0, msr::READ_FIXED_CTR1, msr::READ_FIXED_CTR2],
    &[],
];

const ENERGY_SNAPSHOT: &[OpTemplate] = &[
    msr::READ_PKG_ENERGY,
    msr::READ_DRAM_ENERGY,
    msr::READ_PP0_ENERGY,
    msr::READ_PP1_ENERGY,
    msr::READ_PLATFORM_ENERGY,
];

const ENERGY_COUNTERS: [&[OpTemplate]; Slot::COUNT] = [
    &[msr::READ_RAPL_POWER_UNIT],
    ENERGY_SNAPSHOT,
    ENERGY_SNAPSHOT,
    &[],
    &[],
];

pub struct RecipeTable {
    recipes: [[&'static [OpTemplate]; Slot::COUNT]; LongitudinalKind::COUNT],
    ops_per_slot: [[usize; Slot::COUNT]; LongitudinalKind::COUNT],
}

impl Default for RecipeTable {
    fn default() -> Self {
        Self::standard()
    }
}

impl RecipeTable {
    pub fn standard() -> Self {
        Self::from_recipes([FIXED_FUNCTION_COUNTERS, ENERGY_COUNTERS])
    }

    // OPS-PER-SLOT IS COUNTED HERE ONCE AND SHARED BY EVERY TASK OF THAT KIND
    pub fn from_recipes(
        recipes: [[&'static [OpTemplate]; Slot::COUNT]; LongitudinalKind::COUNT],
    ) -> Self {
        let mut ops_per_slot = [[0usize; Slot::COUNT]; LongitudinalKind::COUNT];
        for (kind_idx, slots) in recipes.iter().enumerate() {
            for (slot_idx, ops) in slots.iter().enumerate() {
                ops_per_slot[kind_idx][slot_idx] = ops.len();
            }
        }
        Self { recipes, ops_per_slot }
    }

    pub fn ops(&self, kind: LongitudinalKind, slot: Slot) -> &'static [OpTemplate] {
        self.recipes[kind.index()][slot.index()]
    }

    pub fn ops_per_cpu(&self, kind: LongitudinalKind, slot: Slot) -> usize {
        self.ops_per_slot[kind.index()][slot.index()]
    }
}
