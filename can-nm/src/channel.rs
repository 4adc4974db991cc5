//! Per-channel state machine: state, mode, flags, five timers and the
//! transition table from the channel state machine component. All
//! transitions are methods that perform their entry actions atomically;
//! see the module-level note on why `RepeatMessage` has one entry method
//! per predecessor state rather than a single generic one.

use can_nm_core::{CanTransmitter, NmIndication, NmMode, NmState, NmResult, PduRouterSink};

use crate::config::{ChannelConfig, GlobalConfig, Ticks};
use crate::macros::{nm_debug, nm_trace};
use crate::pdu::ControlBitVector;
use crate::timer::Timer;

/// Borrowed bundle of the three host-implemented collaborators, threaded
/// through every operation that might need to transmit or notify.
pub struct Collaborators<'a, T, I, R> {
    pub transmitter: &'a mut T,
    pub indication: &'a mut I,
    pub router: &'a mut R,
}

#[derive(Debug, Clone, Copy)]
struct Timers {
    timeout: Timer,
    message_cycle: Timer,
    repeat_message: Timer,
    wait_bus_sleep: Timer,
    remote_sleep_ind: Timer,
}

impl Timers {
    const fn new() -> Self {
        Self {
            timeout: Timer::new(),
            message_cycle: Timer::new(),
            repeat_message: Timer::new(),
            wait_bus_sleep: Timer::new(),
            remote_sleep_ind: Timer::new(),
        }
    }

    fn stop_all(&mut self) {
        self.timeout.stop();
        self.message_cycle.stop();
        self.repeat_message.stop();
        self.wait_bus_sleep.stop();
        self.remote_sleep_ind.stop();
    }
}

/// Runtime state of one NM channel.
pub struct ChannelState<const FRAME_LEN: usize, const RX_COUNT: usize> {
    mode: NmMode,
    state: NmState,
    requested: bool,
    tx_enabled: bool,
    rx_last_pdu: Option<usize>,
    timers: Timers,
    immediate_transmissions: u8,
    /// Per-channel retry latch for the Tx scheduler. The source this is
    /// grounded on keeps this in a single process-wide static, which is
    /// incorrect for multi-channel configurations; here it is simply a
    /// field of the channel it belongs to.
    last_tx_failed: bool,
    bus_load_reduction: bool,
    remote_sleep_ind: bool,
    remote_sleep_ind_enabled: bool,
    nm_pdu_filter_algorithm: bool,
    tx_frame: [u8; FRAME_LEN],
    rx_frames: [[u8; FRAME_LEN]; RX_COUNT],
}

impl<const FRAME_LEN: usize, const RX_COUNT: usize> ChannelState<FRAME_LEN, RX_COUNT> {
    pub const fn new() -> Self {
        Self {
            mode: NmMode::BusSleep,
            state: NmState::Uninit,
            requested: false,
            tx_enabled: false,
            rx_last_pdu: None,
            timers: Timers::new(),
            immediate_transmissions: 0,
            last_tx_failed: false,
            bus_load_reduction: false,
            remote_sleep_ind: false,
            remote_sleep_ind_enabled: false,
            nm_pdu_filter_algorithm: false,
            tx_frame: [0u8; FRAME_LEN],
            rx_frames: [[0u8; FRAME_LEN]; RX_COUNT],
        }
    }

    pub const fn state(&self) -> NmState {
        self.state
    }

    pub const fn mode(&self) -> NmMode {
        self.mode
    }

    pub const fn tx_enabled(&self) -> bool {
        self.tx_enabled
    }

    pub fn tx_frame(&self) -> &[u8; FRAME_LEN] {
        &self.tx_frame
    }

    // ---- lifecycle -----------------------------------------------------

    pub fn init(&mut self, cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>, global: &GlobalConfig) {
        debug_assert!(
            cfg.layout_is_canonical(),
            "NID/CBV must occupy bytes 0/1 when both are present"
        );
        self.mode = NmMode::BusSleep;
        self.state = NmState::BusSleep;
        self.requested = false;
        self.tx_enabled = false;
        self.rx_last_pdu = None;
        self.timers.stop_all();
        self.immediate_transmissions = 0;
        self.last_tx_failed = false;
        self.bus_load_reduction = false;
        self.remote_sleep_ind = false;
        self.remote_sleep_ind_enabled = global.remote_sleep_ind_enabled;
        self.nm_pdu_filter_algorithm = false;

        self.tx_frame = [0xFFu8; FRAME_LEN];
        let layout = layout_of(cfg);
        layout.clear_cbv(&mut self.tx_frame);
        if cfg.node_id_enabled {
            layout.set_node_id(&mut self.tx_frame, cfg.node_id);
        }
        for rx in &mut self.rx_frames {
            *rx = [0xFFu8; FRAME_LEN];
        }
    }

    pub fn deinit(&mut self) {
        self.timers.stop_all();
        self.state = NmState::Uninit;
        self.mode = NmMode::BusSleep;
    }

    pub const fn is_bus_sleep(&self) -> bool {
        matches!(self.state, NmState::BusSleep)
    }

    // ---- shared helpers --------------------------------------------------

    fn notify_transition<T, I, R>(
        &self,
        global: &GlobalConfig,
        channel: usize,
        from: NmState,
        to: NmState,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        if global.state_change_ind_enabled {
            cx.indication.state_change_notification(channel, from, to);
        }
    }

    fn transmit_if_enabled<T: CanTransmitter>(
        &self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        transmitter: &mut T,
    ) -> NmResult {
        if self.tx_enabled {
            transmitter.transmit(cfg.tx_pdu_id, &self.tx_frame)
        } else {
            Ok(())
        }
    }

    // ---- RepeatMessage entry actions, one method per predecessor -------
    //
    // The entry actions genuinely differ by predecessor: whether `timeout`
    // is (re)started, whether `NetworkMode` fires, and whether a pending
    // `remote_sleep_ind` is cancelled are each predecessor-specific, so
    // they are not factored into one function parameterized by `from`.

    fn enter_repeat_message_common(&mut self, cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>) {
        self.mode = NmMode::Network;
        self.bus_load_reduction = false;
        self.timers.repeat_message.start(cfg.repeat_message_time);
        self.timers.message_cycle.start(cfg.msg_cycle_offset);
    }

    fn enter_repeat_message_from_bus_sleep<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        self.enter_repeat_message_common(cfg);
        self.timers.timeout.start(cfg.timeout_time);
        cx.indication.network_mode(channel);
        self.notify_transition(global, channel, NmState::BusSleep, NmState::RepeatMessage, cx);
        self.state = NmState::RepeatMessage;
    }

    fn enter_repeat_message_from_prepare_bus_sleep<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        self.enter_repeat_message_common(cfg);
        self.timers.timeout.start(cfg.timeout_time);
        cx.indication.network_mode(channel);
        self.notify_transition(
            global,
            channel,
            NmState::PrepareBusSleep,
            NmState::RepeatMessage,
            cx,
        );
        self.state = NmState::RepeatMessage;
    }

    fn cancel_remote_sleep_ind_if_set<T, I, R>(
        &mut self,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        if self.remote_sleep_ind {
            self.remote_sleep_ind = false;
            cx.indication.remote_sleep_cancellation(channel);
        }
    }

    fn enter_repeat_message_from_normal_operation<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        self.enter_repeat_message_common(cfg);
        self.cancel_remote_sleep_ind_if_set(channel, cx);
        self.notify_transition(
            global,
            channel,
            NmState::NormalOperation,
            NmState::RepeatMessage,
            cx,
        );
        self.state = NmState::RepeatMessage;
    }

    fn enter_repeat_message_from_ready_sleep<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        self.enter_repeat_message_common(cfg);
        self.cancel_remote_sleep_ind_if_set(channel, cx);
        self.notify_transition(global, channel, NmState::ReadySleep, NmState::RepeatMessage, cx);
        self.state = NmState::RepeatMessage;
    }

    fn enter_repeat_message_self_loop<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        self.enter_repeat_message_common(cfg);
        self.notify_transition(
            global,
            channel,
            NmState::RepeatMessage,
            NmState::RepeatMessage,
            cx,
        );
    }

    // ---- other state entries -------------------------------------------

    fn enter_bus_sleep<T, I, R>(
        &mut self,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        let from = self.state;
        self.mode = NmMode::BusSleep;
        self.state = NmState::BusSleep;
        cx.indication.bus_sleep_mode(channel);
        self.notify_transition(global, channel, from, NmState::BusSleep, cx);
    }

    fn enter_prepare_bus_sleep<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        let from = self.state;
        self.mode = NmMode::PrepareBusSleep;
        self.timers.wait_bus_sleep.start(cfg.wait_bus_sleep_time);
        self.state = NmState::PrepareBusSleep;
        cx.indication.prepare_bus_sleep_mode(channel);
        self.notify_transition(global, channel, from, NmState::PrepareBusSleep, cx);
    }

    fn enter_normal_operation_from_ready_sleep<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        self.mode = NmMode::Network;
        if cfg.bus_load_reduction_active {
            self.bus_load_reduction = true;
        }
        if !global.passive_mode_enabled {
            self.tx_enabled = true;
        }
        self.timers.message_cycle.start(cfg.msg_cycle_offset);
        if self.remote_sleep_ind_enabled {
            self.timers.remote_sleep_ind.start(cfg.remote_sleep_ind_time);
        }
        self.notify_transition(global, channel, NmState::ReadySleep, NmState::NormalOperation, cx);
        self.state = NmState::NormalOperation;
    }

    fn enter_normal_operation_from_repeat_message<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        self.mode = NmMode::Network;
        if cfg.bus_load_reduction_active {
            self.bus_load_reduction = true;
        }
        if self.remote_sleep_ind_enabled {
            self.timers.remote_sleep_ind.start(cfg.remote_sleep_ind_time);
        }
        self.notify_transition(
            global,
            channel,
            NmState::RepeatMessage,
            NmState::NormalOperation,
            cx,
        );
        self.state = NmState::NormalOperation;
    }

    fn enter_normal_operation_self_loop<T, I, R>(
        &mut self,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        self.notify_transition(
            global,
            channel,
            NmState::NormalOperation,
            NmState::NormalOperation,
            cx,
        );
    }

    fn enter_ready_sleep<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        from: NmState,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        self.mode = NmMode::Network;
        self.tx_enabled = false;
        if cfg.node_detection_enabled {
            layout_of(cfg).clear_cbv(&mut self.tx_frame);
        }
        self.notify_transition(global, channel, from, NmState::ReadySleep, cx);
        self.state = NmState::ReadySleep;
    }

    // ---- public triggers --------------------------------------------------

    pub fn passive_start_up<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) -> NmResult
    where
        I: NmIndication,
    {
        if !global.passive_mode_enabled || matches!(self.mode, NmMode::Network) {
            return Err(can_nm_core::NotOk);
        }
        match self.state {
            NmState::BusSleep => self.enter_repeat_message_from_bus_sleep(cfg, global, channel, cx),
            NmState::PrepareBusSleep => {
                self.enter_repeat_message_from_prepare_bus_sleep(cfg, global, channel, cx)
            }
            _ => return Err(can_nm_core::NotOk),
        }
        Ok(())
    }

    pub fn network_request<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) -> NmResult
    where
        I: NmIndication,
    {
        self.requested = true;
        match self.state {
            NmState::BusSleep => {
                self.enter_repeat_message_from_bus_sleep(cfg, global, channel, cx);
                if !global.passive_mode_enabled {
                    self.tx_enabled = true;
                }
                self.set_active_wakeup_bit_if_enabled(cfg);
                self.start_immediate_burst_if_configured(cfg);
            }
            NmState::PrepareBusSleep => {
                self.enter_repeat_message_from_prepare_bus_sleep(cfg, global, channel, cx);
                if !global.passive_mode_enabled {
                    self.tx_enabled = true;
                }
                self.set_active_wakeup_bit_if_enabled(cfg);
                if global.immediate_restart_enabled {
                    self.start_immediate_burst_if_configured(cfg);
                }
            }
            NmState::RepeatMessage => {
                if cfg.pn_handle_multiple_network_requests && cfg.immediate_nm_transmissions > 0 {
                    self.enter_repeat_message_self_loop(cfg, global, channel, cx);
                    self.start_immediate_burst_if_configured(cfg);
                }
            }
            NmState::ReadySleep => {
                if cfg.pn_handle_multiple_network_requests && cfg.immediate_nm_transmissions > 0 {
                    self.enter_repeat_message_from_ready_sleep(cfg, global, channel, cx);
                    self.start_immediate_burst_if_configured(cfg);
                } else {
                    self.enter_normal_operation_from_ready_sleep(cfg, global, channel, cx);
                }
            }
            NmState::NormalOperation => {
                if cfg.pn_handle_multiple_network_requests && cfg.immediate_nm_transmissions > 0 {
                    self.enter_repeat_message_from_normal_operation(cfg, global, channel, cx);
                    self.start_immediate_burst_if_configured(cfg);
                } else {
                    self.enter_normal_operation_self_loop(global, channel, cx);
                }
            }
            NmState::Uninit => return Err(can_nm_core::NotOk),
        }
        Ok(())
    }

    fn set_active_wakeup_bit_if_enabled(&mut self, cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>) {
        if cfg.active_wakeup_bit_enabled {
            layout_of(cfg).set_cbv_bit(&mut self.tx_frame, ControlBitVector::ACTIVE_WAKEUP);
        }
    }

    fn start_immediate_burst_if_configured(&mut self, cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>) {
        if cfg.immediate_nm_transmissions > 0 {
            self.immediate_transmissions = cfg.immediate_nm_transmissions;
            self.last_tx_failed = false;
        }
    }

    pub fn network_release<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) -> NmResult
    where
        I: NmIndication,
    {
        self.requested = false;
        if matches!(self.state, NmState::NormalOperation) {
            self.enter_ready_sleep(cfg, global, channel, NmState::NormalOperation, cx);
        }
        Ok(())
    }

    pub fn disable_communication<T, I, R>(
        &mut self,
        global: &GlobalConfig,
        _channel: usize,
        _cx: &mut Collaborators<T, I, R>,
    ) -> NmResult {
        if !matches!(self.mode, NmMode::Network) || global.passive_mode_enabled {
            return Err(can_nm_core::NotOk);
        }
        self.tx_enabled = false;
        self.timers.message_cycle.stop();
        self.timers.timeout.stop();
        if self.remote_sleep_ind_enabled {
            self.remote_sleep_ind_enabled = false;
            self.timers.remote_sleep_ind.stop();
        }
        Ok(())
    }

    pub fn enable_communication(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
    ) -> NmResult {
        if !matches!(self.mode, NmMode::Network)
            || global.passive_mode_enabled
            || self.timers.message_cycle.is_running()
        {
            return Err(can_nm_core::NotOk);
        }
        self.tx_enabled = true;
        self.timers.message_cycle.start(1);
        if global.remote_sleep_ind_enabled {
            self.remote_sleep_ind_enabled = true;
            self.timers.remote_sleep_ind.start(cfg.remote_sleep_ind_time);
        }
        Ok(())
    }

    pub fn repeat_message_request<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) -> NmResult
    where
        I: NmIndication,
    {
        if cfg.cbv_position == crate::config::PDU_OFF || !cfg.node_detection_enabled {
            return Err(can_nm_core::NotOk);
        }
        layout_of(cfg).set_cbv_bit(&mut self.tx_frame, ControlBitVector::REPEAT_MESSAGE_REQUEST);
        match self.state {
            NmState::ReadySleep => self.enter_repeat_message_from_ready_sleep(cfg, global, channel, cx),
            NmState::NormalOperation => {
                self.enter_repeat_message_from_normal_operation(cfg, global, channel, cx)
            }
            _ => return Err(can_nm_core::NotOk),
        }
        cx.indication.repeat_message_indication(channel);
        Ok(())
    }

    pub fn set_user_data(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        data: &[u8],
    ) -> NmResult {
        if !global.user_data_enabled || global.com_user_data_support {
            return Err(can_nm_core::NotOk);
        }
        layout_of(cfg).copy_user_data_in(&mut self.tx_frame, data);
        Ok(())
    }

    pub fn get_user_data(
        &self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        out: &mut [u8],
    ) -> NmResult {
        if !global.user_data_enabled {
            return Err(can_nm_core::NotOk);
        }
        let idx = self.rx_last_pdu.ok_or(can_nm_core::NotOk)?;
        layout_of(cfg).copy_user_data_out(&self.rx_frames[idx], out);
        Ok(())
    }

    pub fn get_node_identifier(
        &self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        out: &mut u8,
    ) -> NmResult {
        let idx = self.rx_last_pdu.ok_or(can_nm_core::NotOk)?;
        let nid = layout_of(cfg)
            .node_id(&self.rx_frames[idx])
            .ok_or(can_nm_core::NotOk)?;
        *out = nid;
        Ok(())
    }

    pub fn get_pdu_data(
        &self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        out: &mut [u8],
    ) -> NmResult {
        if !(cfg.node_detection_enabled || cfg.node_id_enabled || global.user_data_enabled) {
            return Err(can_nm_core::NotOk);
        }
        if out.len() < FRAME_LEN {
            return Err(can_nm_core::NotOk);
        }
        let idx = self.rx_last_pdu.ok_or(can_nm_core::NotOk)?;
        out[..FRAME_LEN].copy_from_slice(&self.rx_frames[idx]);
        Ok(())
    }

    pub const fn get_state(&self) -> (NmState, NmMode) {
        (self.state, self.mode)
    }

    pub fn request_bus_synchronization<T: CanTransmitter>(
        &self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        transmitter: &mut T,
    ) -> NmResult {
        if global.passive_mode_enabled || !matches!(self.mode, NmMode::Network) || !self.tx_enabled {
            return Err(can_nm_core::NotOk);
        }
        transmitter.transmit(cfg.tx_pdu_id, &self.tx_frame)
    }

    pub fn check_remote_sleep_ind(&self) -> NmResult<bool> {
        if matches!(
            self.state,
            NmState::BusSleep | NmState::PrepareBusSleep | NmState::RepeatMessage
        ) {
            return Err(can_nm_core::NotOk);
        }
        Ok(self.remote_sleep_ind)
    }

    pub fn set_sleep_ready_bit<T: CanTransmitter>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        bit: bool,
        transmitter: &mut T,
    ) -> NmResult {
        if cfg.cbv_position == crate::config::PDU_OFF || !global.coordination_sync_support {
            return Err(can_nm_core::NotOk);
        }
        let layout = layout_of(cfg);
        if bit {
            layout.set_cbv_bit(&mut self.tx_frame, ControlBitVector::NM_COORDINATOR_SLEEP_READY);
        } else {
            layout.clear_cbv_bit(&mut self.tx_frame, ControlBitVector::NM_COORDINATOR_SLEEP_READY);
        }
        self.transmit_if_enabled(cfg, transmitter)
    }

    pub fn tx_confirmation<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        result: NmResult,
        cx: &mut Collaborators<T, I, R>,
    ) where
        R: PduRouterSink,
    {
        if result.is_ok() && matches!(self.mode, NmMode::Network) {
            self.timers.timeout.start(cfg.timeout_time);
        }
        if global.com_user_data_support {
            cx.router.rx_indication(cfg.tx_pdu_id, &self.tx_frame);
        }
    }

    pub fn confirm_pn_availability(&mut self, global: &GlobalConfig) -> NmResult {
        if !global.global_pn_support {
            return Err(can_nm_core::NotOk);
        }
        self.nm_pdu_filter_algorithm = true;
        Ok(())
    }

    pub fn trigger_transmit(
        &self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        buf: &mut [u8],
    ) -> NmResult<usize> {
        let _ = cfg;
        if buf.len() < FRAME_LEN {
            return Err(can_nm_core::NotOk);
        }
        buf[..FRAME_LEN].copy_from_slice(&self.tx_frame);
        Ok(FRAME_LEN)
    }

    // ---- reception -------------------------------------------------------

    pub fn rx_indication<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        frame: &[u8],
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        let next = self.rx_last_pdu.map_or(0, |i| (i + 1) % RX_COUNT);
        let len = frame.len().min(FRAME_LEN);
        self.rx_frames[next][..len].copy_from_slice(&frame[..len]);
        self.rx_last_pdu = Some(next);

        let layout = layout_of(cfg);
        let rmr = layout.read_cbv_bit(&self.rx_frames[next], ControlBitVector::REPEAT_MESSAGE_REQUEST);

        let was_network = matches!(self.mode, NmMode::Network);

        match self.state {
            NmState::BusSleep => {
                cx.indication.network_start_indication(channel);
            }
            NmState::PrepareBusSleep => {
                self.enter_repeat_message_from_prepare_bus_sleep(cfg, global, channel, cx);
            }
            NmState::RepeatMessage => {
                self.timers.timeout.start(cfg.timeout_time);
                if rmr && cfg.node_detection_enabled {
                    self.enter_repeat_message_self_loop(cfg, global, channel, cx);
                }
            }
            NmState::ReadySleep => {
                self.timers.timeout.start(cfg.timeout_time);
                if rmr && cfg.node_detection_enabled {
                    self.enter_repeat_message_from_ready_sleep(cfg, global, channel, cx);
                }
            }
            NmState::NormalOperation => {
                self.timers.timeout.start(cfg.timeout_time);
                if rmr && cfg.node_detection_enabled {
                    self.enter_repeat_message_from_normal_operation(cfg, global, channel, cx);
                }
            }
            NmState::Uninit => {}
        }

        if self.bus_load_reduction {
            self.timers.message_cycle.start(cfg.msg_reduced_time);
        }

        if was_network {
            if self.remote_sleep_ind {
                self.remote_sleep_ind = false;
                cx.indication.remote_sleep_cancellation(channel);
            } else if self.remote_sleep_ind_enabled {
                self.timers.remote_sleep_ind.start(cfg.remote_sleep_ind_time);
            }
        }

        if global.pdu_rx_indication_enabled {
            cx.indication.pdu_rx_indication(channel);
        }
    }

    // ---- timer-driven transitions -----------------------------------------

    /// Tick this channel's five timers in the fixed order the driver is
    /// specified to observe (`timeout`, `message_cycle`, `repeat_message`,
    /// `wait_bus_sleep`, `remote_sleep_ind`) and run whichever expiry
    /// actions fired. Unlike the source this is grounded on — which ticks
    /// `repeat_message` twice per call and never ticks `remote_sleep_ind`
    /// — every timer here is ticked exactly once.
    pub fn tick<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        period: Ticks,
        cx: &mut Collaborators<T, I, R>,
    ) where
        T: CanTransmitter,
        I: NmIndication,
    {
        if self.timers.timeout.tick(period) {
            nm_trace!("channel {}: timeout timer expired", channel);
            self.on_timeout_expired(cfg, global, channel, cx);
        }
        if self.timers.message_cycle.tick(period) {
            nm_trace!("channel {}: message_cycle timer expired", channel);
            self.on_message_cycle_expired(cfg, channel, cx);
        }
        if self.timers.repeat_message.tick(period) {
            nm_trace!("channel {}: repeat_message timer expired", channel);
            self.on_repeat_message_expired(cfg, global, channel, cx);
        }
        if self.timers.wait_bus_sleep.tick(period) {
            nm_trace!("channel {}: wait_bus_sleep timer expired", channel);
            self.on_wait_bus_sleep_expired(global, channel, cx);
        }
        if self.timers.remote_sleep_ind.tick(period) {
            nm_trace!("channel {}: remote_sleep_ind timer expired", channel);
            self.on_remote_sleep_ind_expired(cfg, channel, cx);
        }
    }

    fn on_timeout_expired<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        match self.state {
            NmState::RepeatMessage => {
                self.timers.timeout.start(cfg.timeout_time);
                cx.indication.tx_timeout_exception(channel);
            }
            NmState::ReadySleep => {
                if cfg.active_wakeup_bit_enabled {
                    layout_of(cfg).clear_cbv_bit(&mut self.tx_frame, ControlBitVector::ACTIVE_WAKEUP);
                }
                self.enter_prepare_bus_sleep(cfg, global, channel, cx);
            }
            NmState::NormalOperation => {
                cx.indication.tx_timeout_exception(channel);
                self.timers.timeout.start(cfg.timeout_time);
            }
            _ => {}
        }
    }

    fn on_message_cycle_expired<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        T: CanTransmitter,
    {
        if !matches!(self.state, NmState::RepeatMessage | NmState::NormalOperation) {
            return;
        }
        let _ = channel;
        let tx_result = self.transmit_if_enabled(cfg, cx.transmitter);

        if self.immediate_transmissions > 0 {
            match tx_result {
                Ok(()) => {
                    self.immediate_transmissions -= 1;
                    self.last_tx_failed = false;
                    self.timers.message_cycle.start(cfg.immediate_nm_cycle_time);
                }
                Err(_) => {
                    if self.last_tx_failed {
                        nm_debug!(
                            "channel {}: immediate-tx burst abandoned after repeated failure",
                            channel
                        );
                        self.immediate_transmissions = 0;
                        self.timers.message_cycle.start(cfg.msg_cycle_time);
                    } else {
                        self.last_tx_failed = true;
                        self.timers.message_cycle.start(1);
                    }
                }
            }
        } else {
            self.timers.message_cycle.start(cfg.msg_cycle_time);
        }
    }

    fn on_repeat_message_expired<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        if !matches!(self.state, NmState::RepeatMessage) {
            return;
        }
        if self.requested {
            self.enter_normal_operation_from_repeat_message(cfg, global, channel, cx);
        } else {
            self.enter_ready_sleep(cfg, global, channel, NmState::RepeatMessage, cx);
        }
    }

    fn on_wait_bus_sleep_expired<T, I, R>(
        &mut self,
        global: &GlobalConfig,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        if matches!(self.state, NmState::PrepareBusSleep) {
            self.enter_bus_sleep(global, channel, cx);
        }
    }

    fn on_remote_sleep_ind_expired<T, I, R>(
        &mut self,
        cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
        channel: usize,
        cx: &mut Collaborators<T, I, R>,
    ) where
        I: NmIndication,
    {
        if !matches!(self.state, NmState::NormalOperation) {
            return;
        }
        self.remote_sleep_ind = true;
        cx.indication.remote_sleep_ind(channel);
        self.timers.remote_sleep_ind.start(cfg.remote_sleep_ind_time);
    }
}

impl<const FRAME_LEN: usize, const RX_COUNT: usize> Default for ChannelState<FRAME_LEN, RX_COUNT> {
    fn default() -> Self {
        Self::new()
    }
}

fn layout_of<const FRAME_LEN: usize, const RX_COUNT: usize>(
    cfg: &ChannelConfig<FRAME_LEN, RX_COUNT>,
) -> crate::pdu::FrameLayout {
    crate::pdu::FrameLayout::new(cfg.nid_position, cfg.cbv_position, FRAME_LEN)
}
