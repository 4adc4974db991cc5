//! Pure layout description and byte-field accessors for the fixed-length
//! NM PDU. `FrameLayout` owns no buffer; it only knows where the NID/CBV
//! fields live and leaves buffer storage to the caller, the way this
//! crate's teacher keeps wire-field offsets (`mod field { ... }`) separate
//! from the octets they describe.

use bitflags::bitflags;

use crate::config::PDU_OFF;

bitflags! {
    /// Control Bit Vector bits. Unlisted bits are reserved and always
    /// transmitted as 0.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct ControlBitVector: u8 {
        const REPEAT_MESSAGE_REQUEST      = 0b0000_0001;
        const NM_COORDINATOR_SLEEP_READY  = 0b0000_1000;
        const ACTIVE_WAKEUP               = 0b0001_0000;
        const PARTIAL_NETWORK_INFORMATION = 0b0010_0000;
    }
}

/// Describes the byte layout of a fixed-length NM PDU for one channel.
#[derive(Debug, Clone, Copy)]
pub struct FrameLayout {
    nid_position: u8,
    cbv_position: u8,
    frame_len: usize,
}

impl FrameLayout {
    pub const fn new(nid_position: u8, cbv_position: u8, frame_len: usize) -> Self {
        Self {
            nid_position,
            cbv_position,
            frame_len,
        }
    }

    pub const fn has_nid(&self) -> bool {
        self.nid_position != PDU_OFF
    }

    pub const fn has_cbv(&self) -> bool {
        self.cbv_position != PDU_OFF
    }

    pub const fn user_data_offset(&self) -> usize {
        (self.has_nid() as usize) + (self.has_cbv() as usize)
    }

    pub const fn user_data_length(&self) -> usize {
        self.frame_len - self.user_data_offset()
    }

    pub fn set_node_id(&self, frame: &mut [u8], node_id: u8) {
        if self.has_nid() {
            frame[self.nid_position as usize] = node_id;
        }
    }

    pub fn node_id(&self, frame: &[u8]) -> Option<u8> {
        self.has_nid()
            .then(|| frame[self.nid_position as usize])
    }

    pub fn set_cbv_bit(&self, frame: &mut [u8], bit: ControlBitVector) {
        if self.has_cbv() {
            let pos = self.cbv_position as usize;
            frame[pos] |= bit.bits();
        }
    }

    pub fn clear_cbv_bit(&self, frame: &mut [u8], bit: ControlBitVector) {
        if self.has_cbv() {
            let pos = self.cbv_position as usize;
            frame[pos] &= !bit.bits();
        }
    }

    pub fn clear_cbv(&self, frame: &mut [u8]) {
        if self.has_cbv() {
            frame[self.cbv_position as usize] = 0x00;
        }
    }

    pub fn read_cbv_bit(&self, frame: &[u8], bit: ControlBitVector) -> bool {
        if !self.has_cbv() {
            return false;
        }
        let pos = self.cbv_position as usize;
        ControlBitVector::from_bits_truncate(frame[pos]).contains(bit)
    }

    pub fn copy_user_data_in(&self, frame: &mut [u8], data: &[u8]) {
        let offset = self.user_data_offset();
        let len = self.user_data_length().min(data.len());
        frame[offset..offset + len].copy_from_slice(&data[..len]);
    }

    pub fn copy_user_data_out(&self, frame: &[u8], out: &mut [u8]) {
        let offset = self.user_data_offset();
        let len = self.user_data_length().min(out.len());
        out[..len].copy_from_slice(&frame[offset..offset + len]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn user_data_window_excludes_nid_and_cbv() {
        let layout = FrameLayout::new(0, 1, 8);
        assert_eq!(layout.user_data_offset(), 2);
        assert_eq!(layout.user_data_length(), 6);
    }

    #[test]
    fn user_data_window_with_no_fields() {
        let layout = FrameLayout::new(PDU_OFF, PDU_OFF, 8);
        assert_eq!(layout.user_data_offset(), 0);
        assert_eq!(layout.user_data_length(), 8);
    }

    #[test]
    fn cbv_bit_set_clear_roundtrip() {
        let layout = FrameLayout::new(0, 1, 8);
        let mut frame = [0u8; 8];
        layout.set_cbv_bit(&mut frame, ControlBitVector::REPEAT_MESSAGE_REQUEST);
        assert!(layout.read_cbv_bit(&frame, ControlBitVector::REPEAT_MESSAGE_REQUEST));
        layout.set_cbv_bit(&mut frame, ControlBitVector::ACTIVE_WAKEUP);
        assert_eq!(frame[1], 0b0001_0001);
        layout.clear_cbv_bit(&mut frame, ControlBitVector::REPEAT_MESSAGE_REQUEST);
        assert!(!layout.read_cbv_bit(&frame, ControlBitVector::REPEAT_MESSAGE_REQUEST));
        assert!(layout.read_cbv_bit(&frame, ControlBitVector::ACTIVE_WAKEUP));
        layout.clear_cbv(&mut frame);
        assert_eq!(frame[1], 0);
    }

    #[test]
    fn user_data_copy_roundtrip() {
        let layout = FrameLayout::new(0, 1, 8);
        let mut frame = [0xFFu8; 8];
        layout.copy_user_data_in(&mut frame, &[1, 2, 3, 4, 5, 6]);
        let mut out = [0u8; 6];
        layout.copy_user_data_out(&frame, &mut out);
        assert_eq!(out, [1, 2, 3, 4, 5, 6]);
    }

    #[test]
    fn node_id_absent_when_not_configured() {
        let layout = FrameLayout::new(PDU_OFF, 0, 8);
        let frame = [0u8; 8];
        assert_eq!(layout.node_id(&frame), None);
    }
}
