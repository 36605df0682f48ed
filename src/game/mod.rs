//! Game flow module
//!
//! Screen predicates, the world capability interface and the battle
//! transition routines built on top of them.

pub mod battle;
pub mod state;
pub mod world;

pub use battle::{Battle, CastKind, SkillCast};
pub use state::{BattleScreen, Formation};
pub use world::{MapScreen, WorldView};
