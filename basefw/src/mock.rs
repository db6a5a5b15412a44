use crate::pair::{ChallengeStatus, PairChallenge, PairManager, PairResponse, PairingKey, KEY_SIZE};
use crate::{DeviceLocator, Error, FirmwareImage, FirmwareUpdater, Section, UpdateSession};
use std::cell::{RefCell, RefMut};
use std::rc::Rc;

/// How the simulated base answers a pair challenge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeBehavior {
    Honest,
    WrongNonce,
    Reject(u8),
    Timeout,
}

/// Everything the simulated base was asked to do.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Counters {
    pub opens: u32,
    /// Sections written, in order.
    pub writes: Vec<Section>,
    pub unlocks: u32,
    pub locks: u32,
    pub resets: u32,
    pub jumps: u32,
    pub challenges: u32,
    pub challenges_in_ro: u32,
    pub persists: u32,
}

#[derive(Debug)]
struct SectionState {
    version: String,
    checksum: u32,
    locked: bool,
}

impl SectionState {
    fn new(version: &str) -> Self {
        SectionState {
            version: version.into(),
            checksum: 0,
            locked: false,
        }
    }
}

#[derive(Debug)]
struct BaseState {
    board: String,
    vendor_id: u16,
    product_id: u16,
    bus: u8,
    port: u8,
    active: Section,
    ro: SectionState,
    rw: SectionState,
    key: Option<PairingKey>,
    session_open: bool,
    fail_opens: u32,
    ops_before_drop: u32,
    drop_ops: u32,
    corrupt_writes: bool,
    refuse_jump: bool,
    challenge: ChallengeBehavior,
    counters: Counters,
}

impl BaseState {
    fn section(&mut self, section: Section) -> &mut SectionState {
        match section {
            Section::Ro => &mut self.ro,
            Section::Rw => &mut self.rw,
        }
    }
}

/// Handle to a simulated base. Clones share the same base, so one clone can
/// serve as the [`FirmwareUpdater`] and another as the [`PairManager`].
#[derive(Clone, Debug)]
pub struct MockBase {
    state: Rc<RefCell<BaseState>>,
}

impl MockBase {
    /// A base running RO with both sections unlocked and no pairing key.
    pub fn new(board: &str, ro: &str, rw: &str) -> Self {
        let locator = DeviceLocator::default();
        let state = BaseState {
            board: board.into(),
            vendor_id: locator.vendor_id,
            product_id: locator.product_id,
            bus: 1,
            port: 1,
            active: Section::Ro,
            ro: SectionState::new(ro),
            rw: SectionState::new(rw),
            key: None,
            session_open: false,
            fail_opens: 0,
            ops_before_drop: 0,
            drop_ops: 0,
            corrupt_writes: false,
            refuse_jump: false,
            challenge: ChallengeBehavior::Honest,
            counters: Counters::default(),
        };

        MockBase {
            state: Rc::new(RefCell::new(state)),
        }
    }

    pub fn running(self, section: Section) -> Self {
        self.state.borrow_mut().active = section;
        self
    }

    /// Gives RW a valid pairing key.
    pub fn paired(self) -> Self {
        self.state.borrow_mut().key = Some(PairingKey::new([0x5a; KEY_SIZE]));
        self
    }

    pub fn locked(self, section: Section) -> Self {
        self.state.borrow_mut().section(section).locked = true;
        self
    }

    /// Places the base on the bus as described by `locator`; unset bus or
    /// port keep their current value.
    pub fn plugged_at(self, locator: &DeviceLocator) -> Self {
        {
            let mut state = self.state.borrow_mut();
            state.vendor_id = locator.vendor_id;
            state.product_id = locator.product_id;
            state.bus = locator.bus.unwrap_or(state.bus);
            state.port = locator.port.unwrap_or(state.port);
        }
        self
    }

    /// The next `n` attempts to open a session fail as if unplugged.
    pub fn fail_next_opens(&self, n: u32) {
        self.state.borrow_mut().fail_opens = n;
    }

    /// The next `n` operations on an open session fail as if the link dropped.
    pub fn drop_next_ops(&self, n: u32) {
        self.drop_ops_after(0, n);
    }

    /// Lets `ok` operations through, then fails the following `n`.
    pub fn drop_ops_after(&self, ok: u32, n: u32) {
        let mut state = self.state.borrow_mut();
        state.ops_before_drop = ok;
        state.drop_ops = n;
    }

    /// Written sections read back with a bad checksum.
    pub fn corrupt_writes(&self, corrupt: bool) {
        self.state.borrow_mut().corrupt_writes = corrupt;
    }

    /// Jumps are acknowledged but the base stays in RO.
    pub fn refuse_jump(&self, refuse: bool) {
        self.state.borrow_mut().refuse_jump = refuse;
    }

    pub fn set_challenge(&self, behavior: ChallengeBehavior) {
        self.state.borrow_mut().challenge = behavior;
    }

    pub fn counters(&self) -> Counters {
        self.state.borrow().counters.clone()
    }

    pub fn active(&self) -> Section {
        self.state.borrow().active
    }

    pub fn version(&self, section: Section) -> String {
        self.state.borrow_mut().section(section).version.clone()
    }

    pub fn is_locked(&self, section: Section) -> bool {
        self.state.borrow_mut().section(section).locked
    }

    pub fn has_key(&self) -> bool {
        self.state.borrow().key.is_some()
    }

    /// Borrows the state for one operation, failing while the link is down.
    fn link(&self) -> Result<RefMut<'_, BaseState>, Error> {
        let mut state = self.state.borrow_mut();
        if !state.session_open {
            return Err(Error::Transmission);
        }
        if state.ops_before_drop > 0 {
            state.ops_before_drop -= 1;
        } else if state.drop_ops > 0 {
            state.drop_ops -= 1;
            return Err(Error::Transmission);
        }
        Ok(state)
    }
}

impl FirmwareUpdater for MockBase {
    type Session = MockSession;

    fn open(&mut self, locator: &DeviceLocator) -> Result<MockSession, Error> {
        let mut state = self.state.borrow_mut();
        if state.session_open {
            return Err(Error::Busy);
        }
        if state.fail_opens > 0 {
            state.fail_opens -= 1;
            log::debug!("simulated base unplugged");
            return Err(Error::NotFound);
        }
        if !locator.matches(state.vendor_id, state.product_id, state.bus, state.port) {
            return Err(Error::NotFound);
        }

        state.session_open = true;
        state.counters.opens += 1;

        Ok(MockSession { base: self.clone() })
    }
}

impl PairManager for MockBase {
    fn has_valid_key(&mut self) -> Result<bool, Error> {
        Ok(self.link()?.key.is_some())
    }

    fn challenge(&mut self, challenge: &PairChallenge) -> Result<PairResponse, Error> {
        let mut state = self.link()?;
        state.counters.challenges += 1;
        if state.active == Section::Ro {
            state.counters.challenges_in_ro += 1;
        }

        //any non-zero function of the nonce will do for a derived key
        let mut key = [0_u8; KEY_SIZE];
        for (i, b) in key.iter_mut().enumerate() {
            *b = challenge.nonce[i % challenge.nonce.len()] ^ 0xa5;
        }

        match state.challenge {
            ChallengeBehavior::Honest => Ok(PairResponse {
                status: ChallengeStatus::Success,
                nonce: challenge.nonce,
                key: PairingKey::new(key),
            }),
            ChallengeBehavior::WrongNonce => {
                let mut nonce = challenge.nonce;
                nonce[0] ^= 0xff;
                Ok(PairResponse {
                    status: ChallengeStatus::Success,
                    nonce,
                    key: PairingKey::new(key),
                })
            }
            ChallengeBehavior::Reject(code) => Ok(PairResponse {
                status: ChallengeStatus::from(code),
                nonce: challenge.nonce,
                key: PairingKey::new([0; KEY_SIZE]),
            }),
            ChallengeBehavior::Timeout => Err(Error::Timeout),
        }
    }

    fn persist_key(&mut self, key: &PairingKey) -> Result<(), Error> {
        let mut state = self.link()?;
        if state.active != Section::Rw {
            return Err(Error::WrongSection(state.active));
        }
        state.counters.persists += 1;
        state.key = Some(key.clone());
        Ok(())
    }
}

/// Open connection to a [`MockBase`]; dropping it unplugs the cable.
#[derive(Debug)]
pub struct MockSession {
    base: MockBase,
}

impl Drop for MockSession {
    fn drop(&mut self) {
        self.base.state.borrow_mut().session_open = false;
    }
}

impl UpdateSession for MockSession {
    fn current_section(&mut self) -> Result<Section, Error> {
        Ok(self.base.link()?.active)
    }

    fn section_version(&mut self, section: Section) -> Result<String, Error> {
        Ok(self.base.link()?.section(section).version.clone())
    }

    fn is_section_locked(&mut self, section: Section) -> Result<bool, Error> {
        Ok(self.base.link()?.section(section).locked)
    }

    fn unlock_section(&mut self, section: Section) -> Result<(), Error> {
        let mut state = self.base.link()?;
        state.counters.unlocks += 1;
        state.section(section).locked = false;
        Ok(())
    }

    fn lock_section(&mut self, section: Section) -> Result<(), Error> {
        let mut state = self.base.link()?;
        state.counters.locks += 1;
        state.section(section).locked = true;
        Ok(())
    }

    fn is_compatible(&mut self, image: &FirmwareImage<'_>) -> Result<bool, Error> {
        let state = self.base.link()?;
        Ok(image.board() == Some(state.board.as_str()))
    }

    fn transfer_image(&mut self, section: Section, image: &FirmwareImage<'_>) -> Result<(), Error> {
        let mut state = self.base.link()?;
        if state.section(section).locked {
            return Err(Error::Write);
        }

        let checksum = if state.corrupt_writes {
            !image.checksum(section)
        } else {
            image.checksum(section)
        };
        let target = state.section(section);
        target.version = image.version(section).into();
        target.checksum = checksum;
        state.counters.writes.push(section);

        Ok(())
    }

    fn section_checksum(&mut self, section: Section) -> Result<u32, Error> {
        Ok(self.base.link()?.section(section).checksum)
    }

    fn jump_to_rw(&mut self) -> Result<(), Error> {
        let mut state = self.base.link()?;
        state.counters.jumps += 1;
        if !state.refuse_jump {
            state.active = Section::Rw;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), Error> {
        let mut state = self.base.link()?;
        state.counters.resets += 1;
        state.active = Section::Ro;
        Ok(())
    }
}
