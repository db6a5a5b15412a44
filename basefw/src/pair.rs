use crate::{Error, Section, UpdateSession};
use core::fmt;
use rand::RngCore;

pub const NONCE_SIZE: usize = 16;
/// Size of the pairing key stored in RW.
pub const KEY_SIZE: usize = 32;

//EC host command result codes the base answers a challenge with
const EC_RES_SUCCESS: u8 = 0x00;
const EC_RES_UNAVAILABLE: u8 = 0x09;

///Challenge sent to the base
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairChallenge {
    pub nonce: [u8; NONCE_SIZE],
}

impl PairChallenge {
    pub fn generate<R: RngCore + ?Sized>(rng: &mut R) -> Self {
        let mut nonce = [0_u8; NONCE_SIZE];
        rng.fill_bytes(&mut nonce);
        PairChallenge { nonce }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChallengeStatus {
    //challenge answered
    Success,
    //RW holds no pairing material to answer with
    Unavailable,
    Rejected(u8),
}

impl From<u8> for ChallengeStatus {
    fn from(val: u8) -> Self {
        match val {
            EC_RES_SUCCESS => ChallengeStatus::Success,
            EC_RES_UNAVAILABLE => ChallengeStatus::Unavailable,
            _ => ChallengeStatus::Rejected(val),
        }
    }
}

impl From<ChallengeStatus> for u8 {
    fn from(status: ChallengeStatus) -> Self {
        match status {
            ChallengeStatus::Success => EC_RES_SUCCESS,
            ChallengeStatus::Unavailable => EC_RES_UNAVAILABLE,
            ChallengeStatus::Rejected(val) => val,
        }
    }
}

/// Shared secret derived from a challenge. Never printed.
#[derive(Clone, PartialEq, Eq)]
pub struct PairingKey([u8; KEY_SIZE]);

impl PairingKey {
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        PairingKey(bytes)
    }

    pub fn is_zero(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for PairingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("PairingKey(..)")
    }
}

///Response to the pair challenge
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PairResponse {
    pub status: ChallengeStatus,
    pub nonce: [u8; NONCE_SIZE],
    pub key: PairingKey,
}

impl PairResponse {
    /// Checks the response answers `challenge` and returns the derived key.
    pub fn validate(&self, challenge: &PairChallenge) -> Result<&PairingKey, Error> {
        match self.status {
            ChallengeStatus::Success => {}
            status => return Err(Error::PairingRejected(status.into())),
        }
        if self.nonce != challenge.nonce {
            return Err(Error::PairingMismatch);
        }
        if self.key.is_zero() {
            return Err(Error::Malformed);
        }
        Ok(&self.key)
    }
}

/// Pairing backend. Talks to the RW firmware of the base the current
/// session is connected to.
pub trait PairManager {
    /// Whether RW already holds a valid pairing key.
    fn has_valid_key(&mut self) -> Result<bool, Error>;
    fn challenge(&mut self, challenge: &PairChallenge) -> Result<PairResponse, Error>;
    /// Stores the key in the pairing slot of RW.
    fn persist_key(&mut self, key: &PairingKey) -> Result<(), Error>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Paired {
    /// A new key was stored.
    Injected,
    /// RW already had a valid key; nothing was written.
    AlreadyPaired,
}

/// Runs the challenge/response exchange and stores the resulting key.
///
/// Fails closed: the key is persisted only after the response checks out,
/// and nothing is sent while the base runs RO.
pub fn pair<S, P, R>(session: &mut S, manager: &mut P, rng: &mut R) -> Result<Paired, Error>
where
    S: UpdateSession + ?Sized,
    P: PairManager + ?Sized,
    R: RngCore + ?Sized,
{
    let section = session.current_section()?;
    if section != Section::Rw {
        log::error!("refusing to pair while base runs {}", section);
        return Err(Error::WrongSection(section));
    }

    if manager.has_valid_key()? {
        log::info!("base is already paired");
        return Ok(Paired::AlreadyPaired);
    }

    let challenge = PairChallenge::generate(rng);
    log::debug!("sending pair challenge");
    let response = manager.challenge(&challenge)?;
    let key = response.validate(&challenge).map_err(|e| {
        log::warn!("pair challenge failed: {}", e);
        e
    })?;

    manager.persist_key(key)?;
    log::info!("pairing key injected");

    Ok(Paired::Injected)
}
