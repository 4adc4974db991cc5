use can_nm_core::PduId;

/// A duration, expressed as a whole number of `MainFunction` ticks.
///
/// The original module expresses durations in seconds and derives a tick
/// count from `main_function_period` at configuration time; this crate
/// folds that division into the type itself; a [`Ticks`] value already
/// *is* the number of calls to [`crate::CanNm::main_function`] needed to
/// exhaust it, so [`GlobalConfig::main_function_period`] only documents
/// the real-world cadence for the host's scheduler and never participates
/// in [`crate::timer::Timer`] arithmetic beyond being handed through as
/// the generic `period` parameter every tick.
pub type Ticks = u32;

/// Sentinel meaning "this byte position is not present in the frame".
pub const PDU_OFF: u8 = 0xFF;

/// Per-channel, read-only configuration, constructed once before [`crate::CanNm::init`].
#[derive(Debug, Clone, Copy)]
pub struct ChannelConfig<const FRAME_LEN: usize, const RX_COUNT: usize> {
    /// Byte identifying this node in outgoing frames.
    pub node_id: u8,
    /// Byte offset of the NID field, or [`PDU_OFF`].
    pub nid_position: u8,
    /// Byte offset of the CBV field, or [`PDU_OFF`].
    pub cbv_position: u8,

    pub timeout_time: Ticks,
    pub msg_cycle_time: Ticks,
    pub msg_cycle_offset: Ticks,
    pub repeat_message_time: Ticks,
    pub wait_bus_sleep_time: Ticks,
    pub remote_sleep_ind_time: Ticks,
    pub immediate_nm_cycle_time: Ticks,
    pub msg_reduced_time: Ticks,

    pub node_detection_enabled: bool,
    pub active_wakeup_bit_enabled: bool,
    pub bus_load_reduction_active: bool,
    pub node_id_enabled: bool,
    pub pn_handle_multiple_network_requests: bool,
    /// Remaining fast-cycle transmissions on network request; 0 disables
    /// the immediate-transmission burst entirely.
    pub immediate_nm_transmissions: u8,

    /// PDU identifier this channel transmits under.
    pub tx_pdu_id: PduId,
    /// PDU identifiers this channel accepts on reception.
    pub rx_pdu_ids: [PduId; RX_COUNT],
}

impl<const FRAME_LEN: usize, const RX_COUNT: usize> ChannelConfig<FRAME_LEN, RX_COUNT> {
    /// Offset of the first user-data byte.
    ///
    /// Assumes, per the Design Notes this module is grounded on, that NID
    /// occupies byte 0 and CBV byte 1 when both are present; this is
    /// asserted once at [`crate::CanNm::init`] rather than re-derived from
    /// the individual positions on every access.
    pub const fn user_data_offset(&self) -> usize {
        let nid = if self.nid_position == PDU_OFF { 0 } else { 1 };
        let cbv = if self.cbv_position == PDU_OFF { 0 } else { 1 };
        nid + cbv
    }

    pub const fn user_data_length(&self) -> usize {
        FRAME_LEN - self.user_data_offset()
    }

    pub(crate) const fn layout_is_canonical(&self) -> bool {
        match (self.nid_position, self.cbv_position) {
            (PDU_OFF, PDU_OFF) => true,
            (0, PDU_OFF) => true,
            (PDU_OFF, 0) => true,
            (0, 1) => true,
            _ => false,
        }
    }
}

/// Module-wide, read-only configuration.
#[derive(Debug, Clone, Copy)]
pub struct GlobalConfig {
    /// Seconds per call to [`crate::CanNm::main_function`]; documentation
    /// for the host's scheduler only, see [`Ticks`].
    pub main_function_period: Ticks,
    pub passive_mode_enabled: bool,
    pub remote_sleep_ind_enabled: bool,
    pub state_change_ind_enabled: bool,
    pub com_user_data_support: bool,
    pub user_data_enabled: bool,
    pub global_pn_support: bool,
    pub immediate_restart_enabled: bool,
    pub coordination_sync_support: bool,
    pub pdu_rx_indication_enabled: bool,
}
