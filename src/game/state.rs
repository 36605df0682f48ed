//! Screen state catalog
//!
//! Every battle state is a pure predicate over a frame, built from fixed
//! probe tables. The UI is laid out for a 1280x720 screen and the tables are
//! used as-is; there is no resolution scaling.

use std::fmt;
use std::str::FromStr;

use crate::vision::{match_color, match_colors, Color, ColorProbe, Frame, Region};

use super::world::WorldView;

/// Reference screen size the tables are tuned for
pub const SCREEN_SIZE: (u32, u32) = (1280, 720);

/// Party slots with a portrait and skill bar
pub const PARTY_SLOTS: usize = 4;

/// Skill buttons per character
pub const SKILLS_PER_SLOT: usize = 4;

// Probes

/// Battle HUD (menu gear and party gauge), present for the whole fight
pub const COMBAT_HUD: [ColorProbe; 2] = [
    ColorProbe::new(1200, 40, Color::hex(0xE8E8E8)),
    ColorProbe::new(40, 40, Color::hex(0xC9A227)),
];

/// Attack button and command bar, only while the game waits for orders
pub const COMMAND_ROUND: [ColorProbe; 2] = [
    ColorProbe::new(1160, 620, Color::hex(0x2F6FDF)),
    ColorProbe::new(1160, 560, Color::hex(0xF4D35E)),
];

pub const SKILL_PANEL: [ColorProbe; 2] = [
    ColorProbe::new(640, 120, Color::hex(0x6A3CB0)),
    ColorProbe::new(120, 360, Color::hex(0x2A9D8F)),
];

pub const SPECIAL_PANEL: [ColorProbe; 2] = [
    ColorProbe::new(640, 160, Color::hex(0xD64545)),
    ColorProbe::new(1160, 360, Color::hex(0xF2C14E)),
];

/// Delegate switch, lit
pub const AUTO_ON: ColorProbe = ColorProbe::new(1080, 40, Color::hex(0x3FD46B));

/// Delegate switch, dimmed
pub const AUTO_OFF: ColorProbe = ColorProbe::new(1080, 40, Color::hex(0x7F7F7F));

pub const AUTO_CONFIRM_DIALOG: ColorProbe = ColorProbe::new(640, 420, Color::hex(0xE0A030));

pub const FORMATION_FRONT: [ColorProbe; PARTY_SLOTS] = formation_probes(Color::hex(0x4A90E2));

pub const FORMATION_BACK: [ColorProbe; PARTY_SLOTS] = formation_probes(Color::hex(0xE2574A));

/// Health bars of the eight party members, probed for the empty-bar color
pub const HEALTH_BARS: [ColorProbe; 8] = {
    let dead = Color::hex(0x8B1A1A);
    let mut bars = [ColorProbe::new(0, 0, dead); 8];
    let mut i = 0;
    while i < bars.len() {
        bars[i] = ColorProbe::new(60 + 150 * i as u32, 700, dead).with_radius(3);
        i += 1;
    }
    bars
};

pub const PARTY_DOWN: [ColorProbe; 2] = [
    ColorProbe::new(640, 330, Color::hex(0x5C0A0A)),
    ColorProbe::new(640, 380, Color::hex(0xDDDDDD)),
];

/// Reward banner and continue arrow
pub const SETTLEMENT: [ColorProbe; 2] = [
    ColorProbe::new(640, 60, Color::hex(0xFFD700)),
    ColorProbe::new(1180, 680, Color::hex(0x20B2AA)),
];

pub const BATTLE_MENU: ColorProbe = ColorProbe::new(640, 200, Color::hex(0x2E3B8C));

pub const FORFEIT_DIALOG: ColorProbe = ColorProbe::new(640, 250, Color::hex(0x9B2D30));

pub const BOOST_ALL_ON: ColorProbe = ColorProbe::new(1160, 470, Color::hex(0xFF8C00));

// Tap points

pub const PORTRAITS: [(i32, i32); PARTY_SLOTS] = [(160, 600), (400, 600), (640, 600), (880, 600)];

pub const SKILL_BUTTONS: [(i32, i32); SKILLS_PER_SLOT] =
    [(320, 300), (520, 300), (720, 300), (920, 300)];

pub const SPECIAL_TAB: (i32, i32) = (1100, 200);
pub const SPECIAL_BUTTON: (i32, i32) = (640, 300);

/// Horizontal drag distance for each boost level
pub const BOOST_OFFSETS: [i32; 4] = [0, 70, 140, 210];

pub const FORMATION_TOGGLES: [(i32, i32); PARTY_SLOTS] =
    [(240, 530), (480, 530), (720, 530), (960, 530)];

pub const SWITCH_ALL_BUTTON: (i32, i32) = (1160, 400);
pub const BOOST_ALL_BUTTON: (i32, i32) = (1160, 470);
pub const ATTACK_BUTTON: (i32, i32) = (1160, 620);
pub const AUTO_BUTTON: (i32, i32) = (1080, 40);
pub const AUTO_CONFIRM_BUTTON: (i32, i32) = (640, 480);
pub const MENU_BUTTON: (i32, i32) = (1200, 40);
pub const FORFEIT_BUTTON: (i32, i32) = (640, 400);
pub const CONFIRM_FORFEIT_BUTTON: (i32, i32) = (760, 460);

/// Empty corner that advances animations without hitting anything
pub const SKIP_POINT: (i32, i32) = (1240, 360);
pub const SETTLEMENT_CONTINUE: (i32, i32) = (1180, 680);

/// "wave/total" readout
pub const ROUND_COUNTER: Region = Region::new(1000, 0, 1140, 30);

const fn formation_probes(color: Color) -> [ColorProbe; PARTY_SLOTS] {
    let mut probes = [ColorProbe::new(0, 0, color); PARTY_SLOTS];
    let mut i = 0;
    while i < PARTY_SLOTS {
        let (x, y) = FORMATION_TOGGLES[i];
        probes[i] = ColorProbe::new(x as u32, y as u32, color);
        i += 1;
    }
    probes
}

// Predicates

pub fn in_combat(frame: &Frame) -> bool {
    match_colors(frame, &COMBAT_HUD)
}

pub fn in_command_round(frame: &Frame) -> bool {
    match_colors(frame, &COMMAND_ROUND)
}

pub fn skill_panel_open(frame: &Frame) -> bool {
    match_colors(frame, &SKILL_PANEL)
}

pub fn special_panel_open(frame: &Frame) -> bool {
    match_colors(frame, &SPECIAL_PANEL)
}

pub fn auto_on(frame: &Frame) -> bool {
    match_color(frame, &AUTO_ON)
}

pub fn auto_off(frame: &Frame) -> bool {
    match_color(frame, &AUTO_OFF)
}

pub fn auto_confirm_open(frame: &Frame) -> bool {
    match_color(frame, &AUTO_CONFIRM_DIALOG)
}

pub fn party_down(frame: &Frame) -> bool {
    match_colors(frame, &PARTY_DOWN)
}

pub fn in_settlement(frame: &Frame) -> bool {
    match_colors(frame, &SETTLEMENT)
}

pub fn battle_menu_open(frame: &Frame) -> bool {
    match_color(frame, &BATTLE_MENU)
}

pub fn forfeit_dialog_open(frame: &Frame) -> bool {
    match_color(frame, &FORFEIT_DIALOG)
}

pub fn boost_all_on(frame: &Frame) -> bool {
    match_color(frame, &BOOST_ALL_ON)
}

/// Formation shown for a party slot (0-based), if readable
pub fn slot_formation(frame: &Frame, slot: usize) -> Option<Formation> {
    if match_color(frame, FORMATION_FRONT.get(slot)?) {
        Some(Formation::Front)
    } else if match_color(frame, &FORMATION_BACK[slot]) {
        Some(Formation::Back)
    } else {
        None
    }
}

/// Formation of the whole party, `None` unless every slot agrees
pub fn party_formation(frame: &Frame) -> Option<Formation> {
    if match_colors(frame, &FORMATION_FRONT) {
        Some(Formation::Front)
    } else if match_colors(frame, &FORMATION_BACK) {
        Some(Formation::Back)
    } else {
        None
    }
}

/// Whether a member (1-based, 0 = anyone) shows an empty health bar
pub fn member_down(frame: &Frame, member: usize) -> bool {
    match member {
        0 => HEALTH_BARS.iter().any(|bar| match_color(frame, bar)),
        n => HEALTH_BARS
            .get(n - 1)
            .map_or(false, |bar| match_color(frame, bar)),
    }
}

/// Which row a character stands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Formation {
    Front,
    Back,
}

impl Formation {
    pub fn opposite(self) -> Self {
        match self {
            Formation::Front => Formation::Back,
            Formation::Back => Formation::Front,
        }
    }
}

impl FromStr for Formation {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "front" => Ok(Formation::Front),
            "back" => Ok(Formation::Back),
            other => Err(format!("unknown formation '{}'", other)),
        }
    }
}

impl fmt::Display for Formation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Formation::Front => write!(f, "front"),
            Formation::Back => write!(f, "back"),
        }
    }
}

/// Named screen a frame shows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleScreen {
    Unknown,
    PartyDown,
    Settlement,
    ForfeitDialog,
    BattleMenu,
    AutoConfirm,
    SpecialPanel,
    SkillPanel,
    CommandRound,
    /// Fighting, but not waiting for orders (animations, enemy turn)
    InCombat,
    InWorld,
}

impl BattleScreen {
    /// First matching state, most specific overlays first
    pub fn detect(frame: &Frame, world: &dyn WorldView) -> Self {
        if party_down(frame) {
            BattleScreen::PartyDown
        } else if in_settlement(frame) {
            BattleScreen::Settlement
        } else if forfeit_dialog_open(frame) {
            BattleScreen::ForfeitDialog
        } else if battle_menu_open(frame) {
            BattleScreen::BattleMenu
        } else if auto_confirm_open(frame) {
            BattleScreen::AutoConfirm
        } else if special_panel_open(frame) {
            BattleScreen::SpecialPanel
        } else if skill_panel_open(frame) {
            BattleScreen::SkillPanel
        } else if in_command_round(frame) {
            BattleScreen::CommandRound
        } else if in_combat(frame) {
            BattleScreen::InCombat
        } else if world.is_in_world(frame) {
            BattleScreen::InWorld
        } else {
            BattleScreen::Unknown
        }
    }

    pub fn is_battle(&self) -> bool {
        matches!(
            self,
            BattleScreen::ForfeitDialog
                | BattleScreen::BattleMenu
                | BattleScreen::AutoConfirm
                | BattleScreen::SpecialPanel
                | BattleScreen::SkillPanel
                | BattleScreen::CommandRound
                | BattleScreen::InCombat
        )
    }

    pub fn is_battle_over(&self) -> bool {
        matches!(
            self,
            BattleScreen::PartyDown | BattleScreen::Settlement | BattleScreen::InWorld
        )
    }
}
