//! Deferred value handles.
//!
//! Register operations return immediately with a handle; the underlying
//! word storage is shared with the client's pending-transaction record and
//! filled in during reply validation. Until the batch dispatches, accessing
//! a handle fails with `NotYetValid`; after a failed dispatch it fails with
//! the dispatch error attached.

use std::{cell::RefCell, rc::Rc};

use regbus_core::{
    constants::NOMASK,
    error::{ErrorKind, Result},
};

/// Lifecycle of a deferred value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ValStatus {
    /// The batch has not dispatched yet.
    Pending,
    /// Reply words are in place.
    Valid,
    /// The batch failed; carries the dispatch error text.
    Invalid(String),
}

/// Shared storage behind every deferred handle. The client's transaction
/// record holds a clone of the same `Rc`, which keeps the reply target
/// stable for the life of the batch.
#[derive(Debug)]
pub(crate) struct ValState {
    pub(crate) words: Vec<u32>,
    pub(crate) mask: u32,
    pub(crate) status: ValStatus,
}

impl ValState {
    pub(crate) fn pending(word_count: usize, mask: u32) -> Rc<RefCell<ValState>> {
        Rc::new(RefCell::new(ValState {
            words: vec![0; word_count],
            mask,
            status: ValStatus::Pending,
        }))
    }
}

fn check_access(state: &ValState) -> Result<()> {
    match &state.status {
        ValStatus::Valid => Ok(()),
        ValStatus::Pending => Err(ErrorKind::NotYetValid),
        ValStatus::Invalid(cause) => Err(ErrorKind::ValueInvalidated(cause.clone())),
    }
}

/// Deferred acknowledgement of a write-style transaction. Carries no data,
/// only whether the endpoint confirmed the operation.
#[derive(Clone, Debug)]
pub struct ValHeader {
    state: Rc<RefCell<ValState>>,
}

impl ValHeader {
    pub(crate) fn from_state(state: Rc<RefCell<ValState>>) -> Self {
        Self { state }
    }

    /// Returns true once the batch dispatched and validated.
    pub fn valid(&self) -> bool {
        self.state.borrow().status == ValStatus::Valid
    }

    /// Like `valid`, but reports why the handle is not valid.
    pub fn check(&self) -> Result<()> {
        check_access(&self.state.borrow())
    }
}

/// Deferred single 32-bit register value.
#[derive(Clone, Debug)]
pub struct ValWord {
    state: Rc<RefCell<ValState>>,
}

impl ValWord {
    pub(crate) fn from_state(state: Rc<RefCell<ValState>>) -> Self {
        Self { state }
    }

    /// Returns true once the batch dispatched and validated.
    pub fn valid(&self) -> bool {
        self.state.borrow().status == ValStatus::Valid
    }

    /// The reply word, masked and shifted down to the field when the
    /// originating node carried a mask.
    pub fn value(&self) -> Result<u32> {
        let state = self.state.borrow();
        check_access(&state)?;
        let word = state.words[0];
        if state.mask == NOMASK || state.mask == 0 {
            Ok(word)
        } else {
            Ok((word & state.mask) >> state.mask.trailing_zeros())
        }
    }
}

/// Deferred vector of 32-bit register values from a block transfer.
#[derive(Clone, Debug)]
pub struct ValVector {
    state: Rc<RefCell<ValState>>,
}

impl ValVector {
    pub(crate) fn from_state(state: Rc<RefCell<ValState>>) -> Self {
        Self { state }
    }

    /// Returns true once the batch dispatched and validated.
    pub fn valid(&self) -> bool {
        self.state.borrow().status == ValStatus::Valid
    }

    /// Number of words this handle will hold once valid.
    pub fn len(&self) -> usize {
        self.state.borrow().words.len()
    }

    /// Returns true when the handle holds no words.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The reply words.
    pub fn value(&self) -> Result<Vec<u32>> {
        let state = self.state.borrow();
        check_access(&state)?;
        Ok(state.words.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_value_is_not_yet_valid() {
        let state = ValState::pending(1, NOMASK);
        let word = ValWord::from_state(state);
        assert!(!word.valid());
        assert!(matches!(word.value(), Err(ErrorKind::NotYetValid)));
    }

    #[test]
    fn test_masked_value_shifts_down() {
        let state = ValState::pending(1, 0x00FF_0000);
        state.borrow_mut().words[0] = 0xAA12_CCDD;
        state.borrow_mut().status = ValStatus::Valid;

        let word = ValWord::from_state(state);
        assert_eq!(word.value().unwrap(), 0x12);
    }

    #[test]
    fn test_invalidated_value_reports_cause() {
        let state = ValState::pending(4, NOMASK);
        state.borrow_mut().status = ValStatus::Invalid("transport timed out".to_string());

        let vector = ValVector::from_state(state);
        assert!(!vector.valid());
        match vector.value() {
            Err(ErrorKind::ValueInvalidated(cause)) => assert_eq!(cause, "transport timed out"),
            other => panic!("expected ValueInvalidated, got {:?}", other),
        }
    }
}
