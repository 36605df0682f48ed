//! Script execution
//!
//! Runs a parsed script one instruction at a time against a set of battle
//! routines. A failed or erroring instruction is logged and the run moves
//! on; only the battle-level outcomes below end a run early.

use std::path::Path;
use std::time::Duration;

use crate::config::TimeoutSettings;
use crate::game::{CastKind, Formation, SkillCast};
use crate::runtime::{CancelToken, PollError};

use super::parser::{Command, Script, ScriptEntry, ScriptError};

/// Transitions the executor dispatches to.
///
/// Every routine answers "did it happen" with a bool; `Err` is reserved for
/// not being able to see the screen at all.
pub trait BattleRoutines {
    /// Wait for the first command round
    fn battle_start(&self, timeout: Duration) -> Result<bool, PollError>;

    /// Wait for the battle to finish on its own
    fn battle_end(&self, timeout: Duration) -> Result<bool, PollError>;

    /// Whether the battle has been decided (settlement or back in the world)
    fn await_resolution(&self) -> Result<bool, PollError>;

    fn attack(&self) -> Result<bool, PollError>;

    fn cast(&self, cast: &SkillCast) -> Result<bool, PollError>;

    /// Switch the whole party; `None` flips the current formation
    fn switch_formation(&self, target: Option<Formation>) -> Result<bool, PollError>;

    fn boost_all(&self) -> Result<bool, PollError>;

    fn auto_battle(&self, timeout: Duration) -> Result<bool, PollError>;

    /// Whether a member (1-based, 0 = anyone) is down
    fn check_dead(&self, member: usize, timeout: Duration) -> Result<bool, PollError>;

    fn exit_battle(&self, timeout: Duration) -> Result<bool, PollError>;

    fn skip(&self, timeout: Duration) -> Result<bool, PollError>;

    fn click(&self, x: i32, y: i32) -> Result<bool, PollError>;

    fn dismiss_dialogs(&self, count: u32) -> Result<bool, PollError>;
}

/// Why a run stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// Every instruction ran
    Completed,
    /// The battle was won or otherwise decided
    BattleConcluded,
    /// `BattleEnd` never saw the battle finish
    BattleEndFailed,
    /// A member went down and the battle was not decided; the party retreated
    PartyWiped,
    Cancelled,
    /// Nothing was loaded
    NoScript,
}

impl RunOutcome {
    /// Whether the run reached its goal
    pub fn is_success(&self) -> bool {
        matches!(self, RunOutcome::Completed | RunOutcome::BattleConcluded)
    }
}

/// Summary of one run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunReport {
    pub outcome: RunOutcome,
    /// Instructions dispatched
    pub executed: usize,
    /// Lines whose routine reported it did not happen
    pub failed: Vec<usize>,
    /// Lines whose routine could not observe the screen
    pub errored: Vec<usize>,
    /// Lines with an unknown opcode
    pub skipped: Vec<usize>,
}

impl RunReport {
    fn new() -> Self {
        Self {
            outcome: RunOutcome::Completed,
            executed: 0,
            failed: Vec::new(),
            errored: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Result of dispatching one instruction
enum Step {
    Continue { ok: bool },
    Skipped,
    Stop(RunOutcome),
}

/// Interprets one script at a time
pub struct CommandExecutor<R> {
    routines: R,
    timeouts: TimeoutSettings,
    cancel: CancelToken,
    script: Option<Script>,
    cursor: usize,
}

impl<R: BattleRoutines> CommandExecutor<R> {
    pub fn new(routines: R, timeouts: TimeoutSettings, cancel: CancelToken) -> Self {
        Self {
            routines,
            timeouts,
            cancel,
            script: None,
            cursor: 0,
        }
    }

    /// Replace the loaded script and rewind
    pub fn load(&mut self, script: Script) {
        log::info!("Loaded script with {} instruction(s)", script.len());
        self.script = Some(script);
        self.cursor = 0;
    }

    pub fn load_file(&mut self, path: impl AsRef<Path>) -> Result<(), ScriptError> {
        let script = Script::load(path)?;
        self.load(script);
        Ok(())
    }

    /// Drop the script so the executor can be reused
    pub fn reset(&mut self) {
        self.script = None;
        self.cursor = 0;
    }

    pub fn script(&self) -> Option<&Script> {
        self.script.as_ref()
    }

    /// Index of the next instruction to run
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn routines(&self) -> &R {
        &self.routines
    }

    /// Run from the cursor to the end or to a terminal outcome
    pub fn run(&mut self) -> RunReport {
        let mut report = RunReport::new();
        let Some(script) = self.script.as_ref() else {
            log::warn!("No script loaded");
            report.outcome = RunOutcome::NoScript;
            return report;
        };

        while let Some(entry) = script.entries().get(self.cursor) {
            if self.cancel.is_cancelled() {
                report.outcome = RunOutcome::Cancelled;
                break;
            }
            self.cursor += 1;

            log::info!("Line {}: {}", entry.line(), entry.text);
            let step = match dispatch(&self.routines, &self.timeouts, &self.cancel, entry) {
                Ok(step) => step,
                Err(e) => {
                    log::error!("Line {} '{}' failed: {}", entry.line(), entry.text, e);
                    report.executed += 1;
                    report.errored.push(entry.line());
                    continue;
                }
            };

            match step {
                Step::Continue { ok } => {
                    report.executed += 1;
                    if !ok {
                        log::warn!("Line {} '{}' did not complete", entry.line(), entry.text);
                        report.failed.push(entry.line());
                    }
                }
                Step::Skipped => report.skipped.push(entry.line()),
                Step::Stop(outcome) => {
                    report.executed += 1;
                    report.outcome = outcome;
                    break;
                }
            }
        }

        if report.outcome == RunOutcome::Completed && self.cancel.is_cancelled() {
            report.outcome = RunOutcome::Cancelled;
        }

        log::info!(
            "Run finished: {:?} ({} executed, {} failed, {} errored, {} skipped)",
            report.outcome,
            report.executed,
            report.failed.len(),
            report.errored.len(),
            report.skipped.len()
        );
        report
    }
}

fn dispatch<R: BattleRoutines>(
    routines: &R,
    timeouts: &TimeoutSettings,
    cancel: &CancelToken,
    entry: &ScriptEntry,
) -> Result<Step, PollError> {
    let or_ms = |timeout: Option<Duration>, default_ms: u64| {
        timeout.unwrap_or(Duration::from_millis(default_ms))
    };

    let ok = match &entry.command {
        Command::BattleStart { timeout } => {
            routines.battle_start(or_ms(*timeout, timeouts.battle_start_ms))?
        }
        Command::BattleEnd { timeout } => {
            let ended = routines.battle_end(or_ms(*timeout, timeouts.battle_end_ms))?;
            return Ok(Step::Stop(if ended {
                RunOutcome::BattleConcluded
            } else {
                log::warn!("Battle did not end");
                RunOutcome::BattleEndFailed
            }));
        }
        Command::Attack => {
            let attacked = routines.attack()?;
            if attacked && routines.await_resolution()? {
                log::info!("Battle concluded after attack");
                return Ok(Step::Stop(RunOutcome::BattleConcluded));
            }
            attacked
        }
        Command::Role {
            role,
            skill,
            boost,
            target,
            back_row,
        } => routines.cast(&SkillCast {
            slot: role - 1,
            kind: CastKind::Skill(skill - 1),
            boost: *boost,
            target: *target,
            formation: back_row.then_some(Formation::Back),
        })?,
        Command::Special {
            role,
            boost,
            target,
            back_row,
        } => routines.cast(&SkillCast {
            slot: role - 1,
            kind: CastKind::Special,
            boost: *boost,
            target: *target,
            formation: back_row.then_some(Formation::Back),
        })?,
        Command::Wait { duration } => {
            if !cancel.sleep(*duration) {
                return Ok(Step::Stop(RunOutcome::Cancelled));
            }
            true
        }
        Command::Skip { timeout } => routines.skip(or_ms(*timeout, timeouts.skip_ms))?,
        Command::Click { x, y } => routines.click(*x, *y)?,
        Command::Switch { target } => routines.switch_formation(*target)?,
        Command::Boost => routines.boost_all()?,
        Command::Auto { timeout } => {
            routines.auto_battle(or_ms(*timeout, timeouts.auto_battle_ms))?
        }
        Command::CheckDead { role, timeout } => {
            let timeout = or_ms(*timeout, timeouts.check_dead_ms);
            if routines.check_dead(*role, timeout)? {
                if routines.await_resolution()? {
                    log::info!("Member down but the battle is decided");
                    return Ok(Step::Stop(RunOutcome::BattleConcluded));
                }
                log::warn!("Member down, retreating");
                let retreat = Duration::from_millis(timeouts.exit_battle_ms);
                let retreated = routines.exit_battle(retreat);
                if !matches!(retreated, Ok(true)) {
                    log::error!("Retreat after party wipe did not complete");
                }
                return Ok(Step::Stop(RunOutcome::PartyWiped));
            }
            true
        }
        Command::Exit { timeout } => {
            routines.exit_battle(or_ms(*timeout, timeouts.exit_battle_ms))?
        }
        Command::Dialog { count } => routines.dismiss_dialogs(*count)?,
        Command::Unknown { opcode } => {
            log::warn!("Line {}: unknown opcode '{}', skipping", entry.line(), opcode);
            return Ok(Step::Skipped);
        }
    };

    Ok(Step::Continue { ok })
}
