//! Battle transitions
//!
//! Each routine is one or more bounded polls combining the state predicates
//! with touch actions. Routines answer `Ok(false)` when the game did not get
//! where it should in time and never assume the game moved on in that case.

use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use once_cell::sync::OnceCell;

use crate::config::TimeoutSettings;
use crate::runtime::{BackgroundTask, PollError, PollOptions, Poller};
use crate::script::BattleRoutines;
use crate::vision::{
    match_template, read_fraction, Frame, Template, TemplateLibrary, TemplateSpec, TextRecognizer,
};

use super::state::{self, BattleScreen, Formation};
use super::world::WorldView;

const SETTLEMENT_TEMPLATE: &str = "settlement";

/// What a cast fires
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CastKind {
    /// Skill button, 0-based
    Skill(usize),
    Special,
}

/// One skill or special activation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkillCast {
    /// Party slot, 0-based
    pub slot: usize,
    pub kind: CastKind,
    /// 0 taps the button; higher levels drag it further right
    pub boost: usize,
    /// Point to tap after the panel opens, for targeted casts
    pub target: Option<(i32, i32)>,
    /// Row the character must stand in before casting
    pub formation: Option<Formation>,
}

/// Battle transition routines over one device
pub struct Battle {
    poller: Poller,
    world: Arc<dyn WorldView>,
    templates: Arc<TemplateLibrary>,
    ocr: Option<Arc<dyn TextRecognizer>>,
    timeouts: TimeoutSettings,
    template_threshold: f32,
    settlement: OnceCell<Option<Arc<Template>>>,
}

impl Battle {
    pub fn new(
        poller: Poller,
        world: Arc<dyn WorldView>,
        templates: Arc<TemplateLibrary>,
        timeouts: TimeoutSettings,
        template_threshold: f32,
    ) -> Self {
        Self {
            poller,
            world,
            templates,
            ocr: None,
            timeouts,
            template_threshold,
            settlement: OnceCell::new(),
        }
    }

    /// Enable OCR readouts
    pub fn with_ocr(mut self, ocr: Arc<dyn TextRecognizer>) -> Self {
        self.ocr = Some(ocr);
        self
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    pub fn world(&self) -> &Arc<dyn WorldView> {
        &self.world
    }

    /// Named state of a frame
    pub fn screen(&self, frame: &Frame) -> BattleScreen {
        BattleScreen::detect(frame, self.world.as_ref())
    }

    /// Settlement screen or already back in the world
    pub fn is_settled(&self, frame: &Frame) -> bool {
        if state::in_settlement(frame) || self.world.is_in_world(frame) {
            return true;
        }
        self.settlement_template().map_or(false, |template| {
            let spec = TemplateSpec::new(template, self.template_threshold);
            match_template(frame, &spec).is_some()
        })
    }

    /// Current and total wave from the round counter, when OCR is wired
    pub fn read_round(&self) -> Option<(u32, u32)> {
        let ocr = self.ocr.as_ref()?;
        let frame = match self.poller.channel().capture() {
            Ok(frame) => frame,
            Err(e) => {
                log::debug!("Round counter unreadable: {}", e);
                return None;
            }
        };
        read_fraction(ocr.as_ref(), frame.image(), state::ROUND_COUNTER)
    }

    /// Tap through the settlement screens until the world shows up
    pub fn leave_settlement(&self, timeout: Duration) -> Result<bool, PollError> {
        let tapper = self
            .poller
            .channel()
            .keep_tapping(state::SETTLEMENT_CONTINUE, self.tapper_interval());
        let result = self
            .poller
            .wait_until(self.poller.options(timeout), |frame| self.world.is_in_world(frame));
        self.stop_tapper(tapper);

        let left = result?;
        if left {
            log::info!("Back in the world");
        } else {
            self.timed_out("leaving settlement");
        }
        Ok(left)
    }

    /// Move one character to `formation`
    pub fn ensure_formation(&self, slot: usize, formation: Formation) -> Result<bool, PollError> {
        let Some(&toggle) = state::FORMATION_TOGGLES.get(slot) else {
            return Ok(false);
        };
        let done = self.poller.tap_until(self.opts(self.timeouts.toggle_ms), toggle, |frame| {
            state::slot_formation(frame, slot) == Some(formation)
        })?;
        if !done {
            self.timed_out("formation toggle");
        }
        Ok(done)
    }

    fn settlement_template(&self) -> Option<Arc<Template>> {
        self.settlement
            .get_or_init(|| self.templates.get(SETTLEMENT_TEMPLATE))
            .clone()
    }

    fn opts(&self, timeout_ms: u64) -> PollOptions {
        self.poller.options(Duration::from_millis(timeout_ms))
    }

    fn tapper_interval(&self) -> Duration {
        Duration::from_millis(self.poller.channel().timings().tapper_interval_ms)
    }

    fn stop_tapper(&self, tapper: BackgroundTask) {
        let grace = self.poller.channel().timings().join_grace();
        tapper.stop(grace);
    }

    fn wait_command_round(&self) -> Result<bool, PollError> {
        let ready = self
            .poller
            .wait_until(self.opts(self.timeouts.command_round_ms), state::in_command_round)?;
        if !ready {
            self.timed_out("command round");
        }
        Ok(ready)
    }

    /// Log a timeout together with what the screen last looked like
    fn timed_out(&self, what: &str) {
        let screen = self
            .poller
            .channel()
            .cached()
            .map(|frame| self.screen(&frame));
        log::warn!("Timed out waiting for {} (screen: {:?})", what, screen);
    }

    fn tap(&self, point: (i32, i32)) -> bool {
        match self.poller.channel().tap_point(point) {
            Ok(()) => true,
            Err(e) => {
                log::error!("Tap at {:?} failed: {}", point, e);
                false
            }
        }
    }
}

impl BattleRoutines for Battle {
    fn battle_start(&self, timeout: Duration) -> Result<bool, PollError> {
        let started = self
            .poller
            .wait_until(self.poller.options(timeout), state::in_command_round)?;
        if !started {
            self.timed_out("battle start");
            return Ok(false);
        }

        match self.read_round() {
            Some((wave, total)) => log::info!("Battle started, wave {}/{}", wave, total),
            None => log::info!("Battle started"),
        }
        Ok(true)
    }

    fn battle_end(&self, timeout: Duration) -> Result<bool, PollError> {
        let ended = self
            .poller
            .wait_until(self.poller.options(timeout), |frame| self.is_settled(frame))?;
        if !ended {
            self.timed_out("battle end");
        }
        Ok(ended)
    }

    fn await_resolution(&self) -> Result<bool, PollError> {
        let outcome = self.poller.wait_for(self.opts(self.timeouts.resolution_ms), |frame| {
            if self.is_settled(frame) {
                Some(true)
            } else if state::in_command_round(frame) {
                Some(false)
            } else {
                None
            }
        })?;
        Ok(outcome.into_option().unwrap_or(false))
    }

    fn attack(&self) -> Result<bool, PollError> {
        if !self.wait_command_round()? {
            return Ok(false);
        }

        let pressed = self.poller.tap_until(
            self.opts(self.timeouts.toggle_ms),
            state::ATTACK_BUTTON,
            |frame| !state::in_command_round(frame),
        )?;
        if !pressed {
            self.timed_out("attack");
            return Ok(false);
        }

        let exited = self.poller.wait_until(self.opts(self.timeouts.round_exit_ms), |frame| {
            state::in_command_round(frame) || state::party_down(frame) || self.is_settled(frame)
        })?;
        if !exited {
            self.timed_out("round to finish");
        }
        Ok(exited)
    }

    fn cast(&self, cast: &SkillCast) -> Result<bool, PollError> {
        let button = match cast.kind {
            CastKind::Skill(index) => state::SKILL_BUTTONS.get(index).copied(),
            CastKind::Special => Some(state::SPECIAL_BUTTON),
        };
        let (Some(&portrait), Some(button), Some(&offset)) = (
            state::PORTRAITS.get(cast.slot),
            button,
            state::BOOST_OFFSETS.get(cast.boost),
        ) else {
            log::warn!("Cast out of range: {:?}", cast);
            return Ok(false);
        };

        if !self.wait_command_round()? {
            return Ok(false);
        }

        let panel = self.opts(self.timeouts.skill_panel_ms);
        if !self.poller.tap_until(panel, portrait, state::skill_panel_open)? {
            self.timed_out("skill panel");
            return Ok(false);
        }

        if let Some(formation) = cast.formation {
            if !self.ensure_formation(cast.slot, formation)? {
                return Ok(false);
            }
        }

        if cast.kind == CastKind::Special
            && !self
                .poller
                .tap_until(panel, state::SPECIAL_TAB, state::special_panel_open)?
        {
            self.timed_out("special panel");
            return Ok(false);
        }

        if let Some(target) = cast.target {
            if !self.tap(target) {
                return Ok(false);
            }
        }

        let fired = if offset == 0 {
            self.poller.channel().tap_point(button)
        } else {
            self.poller
                .channel()
                .drag(button, (button.0 + offset, button.1))
        };
        if let Err(e) = fired {
            log::error!("Cast {:?} failed: {}", cast, e);
            return Ok(false);
        }

        let closed = self.poller.wait_until(self.opts(self.timeouts.panel_close_ms), |frame| {
            state::in_command_round(frame)
                && !state::skill_panel_open(frame)
                && !state::special_panel_open(frame)
        })?;
        if closed {
            log::debug!("Cast {:?} done", cast);
        } else {
            self.timed_out("panel to close");
        }
        Ok(closed)
    }

    fn switch_formation(&self, target: Option<Formation>) -> Result<bool, PollError> {
        let opts = self.opts(self.timeouts.toggle_ms);
        let target = match target {
            Some(target) => target,
            None => match self.poller.wait_for(opts, state::party_formation)?.into_option() {
                Some(current) => current.opposite(),
                None => {
                    self.timed_out("formation readout");
                    return Ok(false);
                }
            },
        };

        let switched = self
            .poller
            .tap_until(opts, state::SWITCH_ALL_BUTTON, |frame| {
                state::party_formation(frame) == Some(target)
            })?;
        if switched {
            log::debug!("Party formation now {}", target);
        } else {
            self.timed_out("formation switch");
        }
        Ok(switched)
    }

    fn boost_all(&self) -> Result<bool, PollError> {
        let on = self.poller.tap_until(
            self.opts(self.timeouts.toggle_ms),
            state::BOOST_ALL_BUTTON,
            state::boost_all_on,
        )?;
        if !on {
            self.timed_out("boost toggle");
        }
        Ok(on)
    }

    fn auto_battle(&self, timeout: Duration) -> Result<bool, PollError> {
        let stable = Cell::new(0u32);
        let toggled = Cell::new(false);
        let confirmed = Cell::new(false);

        let outcome = self.poller.poll(
            self.poller.options(timeout),
            |frame| {
                if state::auto_on(frame) && !state::auto_confirm_open(frame) {
                    stable.set(stable.get() + 1);
                } else {
                    stable.set(0);
                }
                (stable.get() >= 2 && (!toggled.get() || confirmed.get())).then_some(())
            },
            |frame, channel| {
                let point = if state::auto_confirm_open(frame) {
                    confirmed.set(true);
                    state::AUTO_CONFIRM_BUTTON
                } else if state::auto_off(frame) {
                    toggled.set(true);
                    state::AUTO_BUTTON
                } else {
                    return;
                };
                if let Err(e) = channel.tap_point(point) {
                    log::warn!("Auto toggle tap failed: {}", e);
                }
            },
        )?;

        let on = outcome.is_satisfied();
        if on {
            log::info!("Auto battle on");
        } else {
            self.timed_out("auto battle");
        }
        Ok(on)
    }

    fn check_dead(&self, member: usize, timeout: Duration) -> Result<bool, PollError> {
        let dead = self
            .poller
            .wait_until(self.poller.options(timeout), |frame| {
                state::member_down(frame, member)
            })?;
        if dead {
            log::warn!("Party member {} is down", member);
        }
        Ok(dead)
    }

    fn exit_battle(&self, timeout: Duration) -> Result<bool, PollError> {
        let deadline = Instant::now() + timeout;
        let step = || self.poller.options(deadline.saturating_duration_since(Instant::now()));

        let menu = self.poller.tap_until(step(), state::MENU_BUTTON, |frame| {
            !state::in_command_round(frame) && state::battle_menu_open(frame)
        })?;
        if !menu {
            self.timed_out("battle menu");
            return Ok(false);
        }

        let forfeit = self.poller.tap_until(step(), state::FORFEIT_BUTTON, |frame| {
            !state::battle_menu_open(frame) && state::forfeit_dialog_open(frame)
        })?;
        if !forfeit {
            self.timed_out("forfeit dialog");
            return Ok(false);
        }

        let confirmed = self
            .poller
            .tap_until(step(), state::CONFIRM_FORFEIT_BUTTON, |frame| {
                !state::forfeit_dialog_open(frame)
            })?;
        if confirmed {
            log::info!("Retreated from battle");
        } else {
            self.timed_out("forfeit confirmation");
        }
        Ok(confirmed)
    }

    fn skip(&self, timeout: Duration) -> Result<bool, PollError> {
        let tapper = self
            .poller
            .channel()
            .keep_tapping(state::SKIP_POINT, self.tapper_interval());
        let result = self.poller.wait_until(self.poller.options(timeout), |frame| {
            state::in_command_round(frame) || self.is_settled(frame)
        });
        self.stop_tapper(tapper);

        let skipped = result?;
        if !skipped {
            self.timed_out("skip");
        }
        Ok(skipped)
    }

    fn click(&self, x: i32, y: i32) -> Result<bool, PollError> {
        Ok(self.tap((x, y)))
    }

    fn dismiss_dialogs(&self, count: u32) -> Result<bool, PollError> {
        self.world.dismiss_dialog(&self.poller, count)
    }
}
