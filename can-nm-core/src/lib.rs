#![no_std]
#![deny(unsafe_code)]

//! `can-nm-core` provides the small set of collaborator traits and value
//! types shared between [`can-nm`] and whatever host integrates it.
//!
//! Types from this crate are implemented by the host: a CAN interface
//! driver, an upper Network Management orchestrator, and (optionally) a
//! PDU router. `can-nm` only ever talks to these traits; it never assumes
//! a concrete transport or notification mechanism.
//!
//! [`can-nm`]: <https://docs.rs/can-nm/>

use core::fmt;

/// Identifier of a CAN NM PDU, as configured by the host.
///
/// This is deliberately decoupled from channel indices: a channel's
/// `tx_pdu_id` and `rx_pdu_id`s are looked up by value rather than assumed
/// to equal the channel's position in the driver's channel array.
pub type PduId = u16;

/// The outcome of every fallible CanNm operation.
///
/// There is deliberately no richer error taxonomy here: every failure in
/// this protocol layer collapses to the same two-valued outcome, and the
/// *reason* for a failure is only ever observable through the trace log,
/// never through the type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct NotOk;

impl fmt::Display for NotOk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "can-nm: operation failed")
    }
}

/// Result alias used throughout `can-nm` and its host integrations.
pub type NmResult<T = ()> = Result<T, NotOk>;

/// A channel's network management mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NmMode {
    BusSleep,
    PrepareBusSleep,
    Network,
}

/// A channel's network management state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum NmState {
    Uninit,
    BusSleep,
    PrepareBusSleep,
    RepeatMessage,
    NormalOperation,
    ReadySleep,
}

/// The lower-layer CAN interface.
///
/// Only the ability to hand a fully formed frame to the bus matters here;
/// arbitration, controller configuration and bus-off handling are the
/// host's concern.
pub trait CanTransmitter {
    /// Transmit `frame` under identifier `pdu_id`.
    ///
    /// Returning [`NotOk`] means the lower layer could not accept the
    /// frame right now (e.g. its transmit queue/mailbox is full); the Tx
    /// scheduler uses this to drive its retry policy.
    fn transmit(&mut self, pdu_id: PduId, frame: &[u8]) -> NmResult;
}

/// Upper-layer Network Management notifications.
///
/// Every method is fire-and-forget and synchronous, and every method has a
/// no-op default so a host only needs to implement the notifications it
/// actually cares about.
#[allow(unused_variables)]
pub trait NmIndication {
    fn bus_sleep_mode(&mut self, channel: usize) {}
    fn prepare_bus_sleep_mode(&mut self, channel: usize) {}
    fn network_mode(&mut self, channel: usize) {}
    fn network_start_indication(&mut self, channel: usize) {}
    fn state_change_notification(&mut self, channel: usize, from: NmState, to: NmState) {}
    fn remote_sleep_ind(&mut self, channel: usize) {}
    fn remote_sleep_cancellation(&mut self, channel: usize) {}
    fn tx_timeout_exception(&mut self, channel: usize) {}
    fn pdu_rx_indication(&mut self, channel: usize) {}
    fn repeat_message_indication(&mut self, channel: usize) {}
}

/// The PDU router sink.
///
/// When `com_user_data_support` is enabled, a successful `TxConfirmation`
/// is additionally forwarded here as an `RxIndication`, matching the
/// original AUTOSAR module's behavior of treating confirmed user-data
/// transmissions as locally "received" for the benefit of upper-layer COM.
pub trait PduRouterSink {
    fn rx_indication(&mut self, pdu_id: PduId, frame: &[u8]);
}
