use crate::pair::{self, PairManager, Paired};
use crate::{
    DeviceLocator, Error, ErrorKind, FirmwareImage, FirmwareUpdater, RunStatus, Section,
    UpdateSession,
};
use log::{debug, error, info, warn};
use std::time::{Duration, Instant};

/// Consecutive lost connections (or failed pairings) tolerated before giving up.
pub const DEFAULT_MAX_LOST_CONNECTIONS: u32 = 5;
/// Upper bound on resets, jumps and pairings per run.
pub const DEFAULT_MAX_TRANSITIONS: u32 = 10;
/// Pause before reconnecting.
pub const DEFAULT_BACKOFF: Duration = Duration::from_millis(500);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UpdaterConfig {
    pub locator: DeviceLocator,
    pub max_lost_connections: u32,
    /// Resets, jumps and pairings the base may ask for before the run gives
    /// up. Lost connections are bounded by `max_lost_connections` instead.
    pub max_transitions: u32,
    /// Pause before reconnecting after a reset, a jump or a failure.
    pub backoff: Duration,
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        UpdaterConfig {
            locator: DeviceLocator::default(),
            max_lost_connections: DEFAULT_MAX_LOST_CONNECTIONS,
            max_transitions: DEFAULT_MAX_TRANSITIONS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

/// State handed from one attempt to the next. Nothing else survives a session.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Carry {
    /// The previous attempt jumped to RW.
    pub post_rw_jump: bool,
    /// A pairing attempt is still owed.
    pub need_inject_entropy: bool,
}

/// Drives a base from whatever it runs to the target image with a valid
/// pairing key.
pub struct Updater<F, P> {
    image: Vec<u8>,
    fw: F,
    pair_manager: P,
    config: UpdaterConfig,
}

impl<F, P> Updater<F, P>
where
    F: FirmwareUpdater,
    P: PairManager,
{
    pub fn new(image: Vec<u8>, fw: F, pair_manager: P, config: UpdaterConfig) -> Self {
        Updater {
            image,
            fw,
            pair_manager,
            config,
        }
    }

    /// Runs the whole update and releases the image. Returns whether the base
    /// ended up running the target firmware with a valid pairing key.
    pub fn run(mut self) -> bool {
        let start = Instant::now();

        match FirmwareImage::parse(&self.image) {
            Ok(image) => info!(
                "updating {} base to RO {} RW {}",
                image.board().unwrap_or("unknown"),
                image.version(Section::Ro),
                image.version(Section::Rw)
            ),
            Err(e) => warn!("image does not parse: {}", e),
        }

        let status = self.run_loop();
        let success = status == RunStatus::NoUpdate;

        if success {
            info!("base is up to date after {:?}", start.elapsed());
        } else {
            error!("update failed with {:?} after {:?}", status, start.elapsed());
        }
        success
    }

    /// Opens one session per attempt until an attempt ends in a terminal status.
    pub fn run_loop(&mut self) -> RunStatus {
        let mut carry = Carry::default();
        let mut failures = 0;
        let mut transitions = 0;
        let mut attempt = 0;

        loop {
            attempt += 1;
            debug!("attempt {} with {:?}", attempt, carry);

            let mut session = match self.fw.open(&self.config.locator) {
                Ok(session) => session,
                Err(e) => {
                    warn!("failed to connect to base: {}", e);
                    if e.kind() != ErrorKind::Transport {
                        return RunStatus::from(e.kind());
                    }
                    if !self.note_failure(&mut failures) {
                        return RunStatus::FatalError;
                    }
                    continue;
                }
            };

            let status = self.run_once(&mut session, carry);
            info!("attempt {} finished with {:?}", attempt, status);

            match status {
                RunStatus::NoUpdate => match self.post_rw_process(&mut session) {
                    RunStatus::LostConnection => {
                        drop(session);
                        if !self.note_failure(&mut failures) {
                            return RunStatus::FatalError;
                        }
                    }
                    status => return status,
                },
                RunStatus::FatalError | RunStatus::InvalidFirmware => return status,
                RunStatus::NeedReset => {
                    if !self.note_transition(&mut transitions) {
                        return RunStatus::FatalError;
                    }
                    failures = 0;
                    carry.post_rw_jump = false;
                    //the base often drops off the bus before acknowledging
                    if let Err(e) = session.reset() {
                        match e.kind() {
                            ErrorKind::Transport => debug!("reset dropped the link: {}", e),
                            _ => {
                                error!("failed to reset base: {}", e);
                                return RunStatus::FatalError;
                            }
                        }
                    }
                    drop(session);
                    self.pause();
                }
                RunStatus::NeedJump => {
                    if !self.note_transition(&mut transitions) {
                        return RunStatus::FatalError;
                    }
                    failures = 0;
                    carry.post_rw_jump = true;
                    drop(session);
                    self.pause();
                }
                RunStatus::NeedInjectEntropy => {
                    carry.post_rw_jump = false;
                    match self.pair(&mut session) {
                        Ok(_) => {
                            if !self.note_transition(&mut transitions) {
                                return RunStatus::FatalError;
                            }
                            failures = 0;
                            carry.need_inject_entropy = false;
                        }
                        Err(e) => {
                            warn!("pairing failed: {}", e);
                            carry.need_inject_entropy = true;
                            drop(session);
                            if !self.note_failure(&mut failures) {
                                return RunStatus::FatalError;
                            }
                        }
                    }
                }
                RunStatus::LostConnection => {
                    drop(session);
                    if !self.note_failure(&mut failures) {
                        return RunStatus::FatalError;
                    }
                }
            }
        }
    }

    /// One attempt on an open session. Never retries; every failure is
    /// reported through the returned status.
    pub fn run_once<S>(&mut self, session: &mut S, carry: Carry) -> RunStatus
    where
        S: UpdateSession + ?Sized,
    {
        match self.try_run_once(session, carry) {
            Ok(status) => status,
            Err(e) => {
                let status = RunStatus::from(e.kind());
                warn!("attempt aborted: {}", e);
                status
            }
        }
    }

    fn try_run_once<S>(&mut self, session: &mut S, carry: Carry) -> Result<RunStatus, Error>
    where
        S: UpdateSession + ?Sized,
    {
        let image = match FirmwareImage::parse(&self.image) {
            Ok(image) => image,
            Err(e) => {
                error!("{}", e);
                return Ok(RunStatus::InvalidFirmware);
            }
        };
        if !session.is_compatible(&image)? {
            error!(
                "image for {} is not accepted by this base",
                image.board().unwrap_or("unknown board")
            );
            return Ok(RunStatus::InvalidFirmware);
        }

        let active = session.current_section()?;
        let version = session.section_version(active)?;
        info!("base runs {} {}", active, version);

        if carry.post_rw_jump && active == Section::Ro {
            //the jump did not take, RW is not running so it can be rewritten
            warn!("base is still in RO after jumping to RW");
            if session.section_version(Section::Rw)? != image.version(Section::Rw) {
                write_section(session, &image, Section::Rw)?;
                return Ok(RunStatus::NeedReset);
            }
            error!("RW is up to date but the base does not run it");
            return Ok(RunStatus::FatalError);
        }

        if version != image.version(active) {
            write_section(session, &image, active)?;
            return Ok(RunStatus::NeedReset);
        }

        match active {
            Section::Ro => {
                //never jump into an RW the image does not match
                if session.section_version(Section::Rw)? != image.version(Section::Rw) {
                    write_section(session, &image, Section::Rw)?;
                    return Ok(RunStatus::NeedReset);
                }
                info!("RO is up to date, jumping to RW");
                session.jump_to_rw()?;
                Ok(RunStatus::NeedJump)
            }
            Section::Rw => {
                if carry.need_inject_entropy || !self.pair_manager.has_valid_key()? {
                    info!("RW needs a pairing key");
                    Ok(RunStatus::NeedInjectEntropy)
                } else {
                    Ok(RunStatus::NoUpdate)
                }
            }
        }
    }

    /// Final checks once RW runs the target version with a valid key. Write
    /// protects RW if it is not already.
    pub fn post_rw_process<S>(&mut self, session: &mut S) -> RunStatus
    where
        S: UpdateSession + ?Sized,
    {
        match self.try_post_rw_process(session) {
            Ok(status) => status,
            Err(e) => {
                error!("post-RW processing failed: {}", e);
                match e.kind() {
                    ErrorKind::Transport => RunStatus::LostConnection,
                    _ => RunStatus::FatalError,
                }
            }
        }
    }

    fn try_post_rw_process<S>(&mut self, session: &mut S) -> Result<RunStatus, Error>
    where
        S: UpdateSession + ?Sized,
    {
        let image = FirmwareImage::parse(&self.image)?;

        let active = session.current_section()?;
        if active != Section::Rw {
            error!("expected base to run RW, it runs {}", active);
            return Ok(RunStatus::FatalError);
        }
        let version = session.section_version(Section::Rw)?;
        if version != image.version(Section::Rw) {
            error!(
                "RW reports {} instead of {}",
                version,
                image.version(Section::Rw)
            );
            return Ok(RunStatus::FatalError);
        }
        if !self.pair_manager.has_valid_key()? {
            error!("RW lost its pairing key");
            return Ok(RunStatus::FatalError);
        }

        if !session.is_section_locked(Section::Rw)? {
            info!("write protecting RW");
            session.lock_section(Section::Rw)?;
        }

        Ok(RunStatus::NoUpdate)
    }

    /// Injects a pairing key into RW unless it already holds one.
    pub fn pair<S>(&mut self, session: &mut S) -> Result<Paired, Error>
    where
        S: UpdateSession + ?Sized,
    {
        pair::pair(session, &mut self.pair_manager, &mut rand::thread_rng())
    }

    /// Counts a consecutive failure and backs off. Returns false once the
    /// budget is spent.
    fn note_failure(&self, failures: &mut u32) -> bool {
        *failures += 1;
        if *failures > self.config.max_lost_connections {
            error!("giving up after {} consecutive failures", *failures);
            return false;
        }
        warn!(
            "retrying ({}/{})",
            *failures, self.config.max_lost_connections
        );
        self.pause();
        true
    }

    /// Counts a reset, jump or pairing. Returns false once the base has asked
    /// for more of them than an update needs.
    fn note_transition(&self, transitions: &mut u32) -> bool {
        *transitions += 1;
        if *transitions > self.config.max_transitions {
            error!(
                "base did not settle after {} resets, jumps and pairings",
                self.config.max_transitions
            );
            return false;
        }
        true
    }

    fn pause(&self) {
        if !self.config.backoff.is_zero() {
            std::thread::sleep(self.config.backoff);
        }
    }
}

/// Writes one section and checks it reads back with the image's checksum.
fn write_section<S>(
    session: &mut S,
    image: &FirmwareImage<'_>,
    section: Section,
) -> Result<(), Error>
where
    S: UpdateSession + ?Sized,
{
    if session.is_section_locked(section)? {
        info!("unlocking {}", section);
        session.unlock_section(section)?;
    }

    info!(
        "writing {} {} ({} bytes)",
        section,
        image.version(section),
        image.section(section).len()
    );
    session.transfer_image(section, image)?;

    let expected = image.checksum(section);
    let actual = session.section_checksum(section)?;
    if actual != expected {
        error!(
            "{} reads back {:08x}, expected {:08x}",
            section, actual, expected
        );
        return Err(Error::Verify(section));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::test_image;
    use crate::mock::{ChallengeBehavior, MockBase};

    fn config(max_lost_connections: u32) -> UpdaterConfig {
        UpdaterConfig {
            max_lost_connections,
            backoff: Duration::from_millis(0),
            ..UpdaterConfig::default()
        }
    }

    fn updater(image: Vec<u8>, base: &MockBase) -> Updater<MockBase, MockBase> {
        Updater::new(image, base.clone(), base.clone(), config(3))
    }

    fn once(image: Vec<u8>, base: &MockBase, carry: Carry) -> RunStatus {
        let mut updater = updater(image, base);
        let mut fw = base.clone();
        let mut session = fw.open(&DeviceLocator::default()).unwrap();
        updater.run_once(&mut session, carry)
    }

    #[test]
    fn up_to_date_base_needs_nothing() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1")
            .running(Section::Rw)
            .paired();

        let status = once(test_image("hammer_v1", "hammer_v1"), &base, Carry::default());

        assert_eq!(status, RunStatus::NoUpdate);
        assert!(base.counters().writes.is_empty());
        assert_eq!(base.counters().jumps, 0);
    }

    #[test]
    fn stale_active_section_is_written_once() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");

        let status = once(test_image("hammer_v2", "hammer_v1"), &base, Carry::default());

        assert_eq!(status, RunStatus::NeedReset);
        assert_eq!(base.counters().writes, vec![Section::Ro]);
        assert_eq!(base.version(Section::Ro), "hammer_v2");
        //the reset itself belongs to the run loop
        assert_eq!(base.counters().resets, 0);
    }

    #[test]
    fn stale_rw_while_running_rw() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1")
            .running(Section::Rw)
            .paired();

        let status = once(test_image("hammer_v1", "hammer_v2"), &base, Carry::default());

        assert_eq!(status, RunStatus::NeedReset);
        assert_eq!(base.counters().writes, vec![Section::Rw]);
    }

    #[test]
    fn locked_section_is_unlocked_before_write() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").locked(Section::Ro);

        let status = once(test_image("hammer_v2", "hammer_v1"), &base, Carry::default());

        assert_eq!(status, RunStatus::NeedReset);
        assert_eq!(base.counters().unlocks, 1);
        assert_eq!(base.counters().writes, vec![Section::Ro]);
    }

    #[test]
    fn bad_readback_is_fatal() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");
        base.corrupt_writes(true);

        let status = once(test_image("hammer_v2", "hammer_v1"), &base, Carry::default());

        assert_eq!(status, RunStatus::FatalError);
    }

    #[test]
    fn current_ro_jumps() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");

        let status = once(test_image("hammer_v1", "hammer_v1"), &base, Carry::default());

        assert_eq!(status, RunStatus::NeedJump);
        assert_eq!(base.counters().jumps, 1);
        assert!(base.counters().writes.is_empty());
    }

    #[test]
    fn stale_rw_is_written_before_jumping() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v0");

        let status = once(test_image("hammer_v1", "hammer_v1"), &base, Carry::default());

        assert_eq!(status, RunStatus::NeedReset);
        assert_eq!(base.counters().writes, vec![Section::Rw]);
        assert_eq!(base.counters().jumps, 0);
        assert_eq!(base.active(), Section::Ro);
        assert_eq!(base.version(Section::Rw), "hammer_v1");
    }

    #[test]
    fn failed_jump_rewrites_rw() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");
        let carry = Carry {
            post_rw_jump: true,
            ..Carry::default()
        };

        let status = once(test_image("hammer_v1", "hammer_v2"), &base, carry);

        assert_eq!(status, RunStatus::NeedReset);
        assert_eq!(base.counters().writes, vec![Section::Rw]);
        assert_eq!(base.counters().jumps, 0);
    }

    #[test]
    fn failed_jump_with_current_rw_is_fatal() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");
        let carry = Carry {
            post_rw_jump: true,
            ..Carry::default()
        };

        let status = once(test_image("hammer_v1", "hammer_v1"), &base, carry);

        assert_eq!(status, RunStatus::FatalError);
        assert!(base.counters().writes.is_empty());
    }

    #[test]
    fn unpaired_rw_needs_entropy() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").running(Section::Rw);

        let status = once(test_image("hammer_v1", "hammer_v1"), &base, Carry::default());

        assert_eq!(status, RunStatus::NeedInjectEntropy);
    }

    #[test]
    fn owed_entropy_is_requested_again() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1")
            .running(Section::Rw)
            .paired();
        let carry = Carry {
            need_inject_entropy: true,
            ..Carry::default()
        };

        let status = once(test_image("hammer_v1", "hammer_v1"), &base, carry);

        assert_eq!(status, RunStatus::NeedInjectEntropy);
    }

    #[test]
    fn corrupt_image_is_invalid() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");

        let status = once(vec![0xff; 0x1000], &base, Carry::default());

        assert_eq!(status, RunStatus::InvalidFirmware);
        assert!(base.counters().writes.is_empty());
    }

    #[test]
    fn other_board_is_invalid() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");

        let status = once(test_image("staff_v2", "staff_v2"), &base, Carry::default());

        assert_eq!(status, RunStatus::InvalidFirmware);
        assert!(base.counters().writes.is_empty());
    }

    #[test]
    fn link_drop_mid_attempt_is_lost_connection() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");
        base.drop_next_ops(1);

        let status = once(test_image("hammer_v2", "hammer_v1"), &base, Carry::default());

        assert_eq!(status, RunStatus::LostConnection);
        assert!(base.counters().writes.is_empty());
    }

    #[test]
    fn post_rw_locks_rw() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1")
            .running(Section::Rw)
            .paired();
        let mut updater = updater(test_image("hammer_v1", "hammer_v1"), &base);
        let mut fw = base.clone();
        let mut session = fw.open(&DeviceLocator::default()).unwrap();

        assert_eq!(updater.post_rw_process(&mut session), RunStatus::NoUpdate);
        assert!(base.is_locked(Section::Rw));
        assert_eq!(updater.post_rw_process(&mut session), RunStatus::NoUpdate);
        assert_eq!(base.counters().locks, 1);
    }

    #[test]
    fn post_rw_without_key_is_fatal() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").running(Section::Rw);
        let mut updater = updater(test_image("hammer_v1", "hammer_v1"), &base);
        let mut fw = base.clone();
        let mut session = fw.open(&DeviceLocator::default()).unwrap();

        assert_eq!(updater.post_rw_process(&mut session), RunStatus::FatalError);
        assert!(!base.is_locked(Section::Rw));
    }

    #[test]
    fn update_ro_then_jump() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").paired();

        let ok = updater(test_image("hammer_v2", "hammer_v1"), &base).run();

        assert!(ok);
        let counters = base.counters();
        assert_eq!(counters.writes, vec![Section::Ro]);
        assert_eq!(counters.resets, 1);
        assert_eq!(counters.jumps, 1);
        assert_eq!(counters.opens, 3);
        assert_eq!(counters.persists, 0);
        assert_eq!(base.active(), Section::Rw);
        assert_eq!(base.version(Section::Ro), "hammer_v2");
    }

    #[test]
    fn pair_unpaired_rw() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").running(Section::Rw);

        let ok = updater(test_image("hammer_v1", "hammer_v1"), &base).run();

        assert!(ok);
        let counters = base.counters();
        assert_eq!(counters.persists, 1);
        assert_eq!(counters.opens, 2);
        assert_eq!(counters.challenges_in_ro, 0);
        assert!(counters.writes.is_empty());
        assert!(base.has_key());
    }

    #[test]
    fn incompatible_image_stops_at_once() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");

        let mut updater = updater(test_image("staff_v2", "staff_v1"), &base);

        assert_eq!(updater.run_loop(), RunStatus::InvalidFirmware);
        let counters = base.counters();
        assert_eq!(counters.opens, 1);
        assert!(counters.writes.is_empty());
        assert_eq!(counters.resets, 0);
    }

    #[test]
    fn lost_connections_exhaust_budget() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1")
            .running(Section::Rw)
            .paired();
        base.fail_next_opens(4);

        let mut updater = updater(test_image("hammer_v1", "hammer_v1"), &base);

        assert_eq!(updater.run_loop(), RunStatus::FatalError);
        assert_eq!(base.counters().opens, 0);
    }

    #[test]
    fn recovery_within_budget() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1")
            .running(Section::Rw)
            .paired();
        base.fail_next_opens(2);

        let mut updater = updater(test_image("hammer_v1", "hammer_v1"), &base);

        assert_eq!(updater.run_loop(), RunStatus::NoUpdate);
        assert_eq!(base.counters().opens, 1);
    }

    #[test]
    fn losses_up_to_budget_are_retried() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").paired();
        base.fail_next_opens(3);

        let mut updater = updater(test_image("hammer_v2", "hammer_v1"), &base);

        assert_eq!(updater.run_loop(), RunStatus::NoUpdate);
        assert_eq!(base.counters().writes, vec![Section::Ro]);
    }

    #[test]
    fn full_loss_budget_then_full_update() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");
        base.fail_next_opens(DEFAULT_MAX_LOST_CONNECTIONS);
        let config = UpdaterConfig {
            backoff: Duration::from_millis(0),
            ..UpdaterConfig::default()
        };
        let mut updater = Updater::new(
            test_image("hammer_v2", "hammer_v2"),
            base.clone(),
            base.clone(),
            config,
        );

        assert_eq!(updater.run_loop(), RunStatus::NoUpdate);
        let counters = base.counters();
        assert_eq!(counters.writes, vec![Section::Ro, Section::Rw]);
        assert_eq!(counters.resets, 2);
        assert_eq!(counters.jumps, 1);
        assert_eq!(counters.persists, 1);
        assert_eq!(counters.opens, 5);
    }

    #[test]
    fn large_loss_budget_is_honored() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1")
            .running(Section::Rw)
            .paired();
        base.fail_next_opens(10);

        let mut updater = Updater::new(
            test_image("hammer_v1", "hammer_v1"),
            base.clone(),
            base.clone(),
            config(10),
        );

        assert_eq!(updater.run_loop(), RunStatus::NoUpdate);
        assert_eq!(base.counters().opens, 1);
    }

    #[test]
    fn one_loss_past_large_budget_is_fatal() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1")
            .running(Section::Rw)
            .paired();
        base.fail_next_opens(11);

        let mut updater = Updater::new(
            test_image("hammer_v1", "hammer_v1"),
            base.clone(),
            base.clone(),
            config(10),
        );

        assert_eq!(updater.run_loop(), RunStatus::FatalError);
        assert_eq!(base.counters().opens, 0);
    }

    #[test]
    fn link_drop_mid_attempt_is_retried() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").paired();
        //compatibility and current section pass, the version query drops
        base.drop_ops_after(2, 1);

        let mut updater = updater(test_image("hammer_v2", "hammer_v1"), &base);

        assert_eq!(updater.run_loop(), RunStatus::NoUpdate);
        let counters = base.counters();
        assert_eq!(counters.writes, vec![Section::Ro]);
        assert_eq!(counters.opens, 4);
        assert_eq!(base.version(Section::Ro), "hammer_v2");
    }

    #[test]
    fn link_drops_past_budget_are_fatal() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").paired();
        base.drop_next_ops(100);

        let mut updater = updater(test_image("hammer_v2", "hammer_v1"), &base);

        assert_eq!(updater.run_loop(), RunStatus::FatalError);
        let counters = base.counters();
        assert_eq!(counters.opens, 4);
        assert!(counters.writes.is_empty());
    }

    #[test]
    fn link_drop_in_post_rw_is_retried() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1")
            .running(Section::Rw)
            .paired();
        //the attempt itself takes four operations, the fifth is the first post-RW check
        base.drop_ops_after(4, 1);

        let mut updater = updater(test_image("hammer_v1", "hammer_v1"), &base);

        assert_eq!(updater.run_loop(), RunStatus::NoUpdate);
        let counters = base.counters();
        assert_eq!(counters.opens, 2);
        assert_eq!(counters.locks, 1);
        assert!(base.is_locked(Section::Rw));
    }

    #[test]
    fn refused_jump_is_fatal() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").paired();
        base.refuse_jump(true);

        let mut updater = updater(test_image("hammer_v1", "hammer_v1"), &base);

        //base never leaves RO and RW is current: the second attempt must not jump again
        assert_eq!(updater.run_loop(), RunStatus::FatalError);
        assert_eq!(base.counters().jumps, 1);
        assert_eq!(base.counters().opens, 2);
    }

    #[test]
    fn failed_pairing_uses_failure_budget() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").running(Section::Rw);
        base.set_challenge(ChallengeBehavior::WrongNonce);

        let mut updater = updater(test_image("hammer_v1", "hammer_v1"), &base);

        assert_eq!(updater.run_loop(), RunStatus::FatalError);
        let counters = base.counters();
        assert_eq!(counters.challenges, 4);
        assert_eq!(counters.persists, 0);
        assert!(!base.has_key());
    }

    #[test]
    fn endless_resets_are_bounded() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1").paired();
        let mut updater = Updater::new(
            test_image("hammer_v2", "hammer_v1"),
            base.clone(),
            base.clone(),
            UpdaterConfig {
                max_transitions: 1,
                ..config(3)
            },
        );

        assert_eq!(updater.run_loop(), RunStatus::FatalError);
        assert_eq!(base.counters().resets, 1);
    }

    #[test]
    fn base_elsewhere_is_never_touched() {
        let base = MockBase::new("hammer", "hammer_v1", "hammer_v1");
        let mut updater = Updater::new(
            test_image("hammer_v2", "hammer_v1"),
            base.clone(),
            base.clone(),
            UpdaterConfig {
                locator: DeviceLocator::default().at(Some(3), None),
                ..config(1)
            },
        );

        assert_eq!(updater.run_loop(), RunStatus::FatalError);
        assert_eq!(base.counters(), Default::default());
    }
}
