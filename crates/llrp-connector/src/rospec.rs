//! The reader operation spec this connector installs.
//!
//! One ROSpec per connector instance, always with the same id: it starts
//! immediately once enabled, never stops on its own, and runs a single
//! antenna inventory over every antenna, cycling each `tag_read_interval`.

use std::time::Duration;

use bytes::{BufMut, BytesMut};

use crate::params::{put_tlv, tlv};

/// `ROSpec.CurrentState`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RoSpecState {
    Disabled = 0,
    Inactive = 1,
    Active = 2,
}

const START_TRIGGER_IMMEDIATE: u8 = 1;
const STOP_TRIGGER_NULL: u8 = 0;
const AISPEC_STOP_TRIGGER_DURATION: u8 = 1;
const PROTOCOL_EPC_C1G2: u8 = 1;
/// Antenna id 0 in an AISpec means "all antennas".
const ALL_ANTENNAS: u16 = 0;

/// Continuous-inventory ROSpec.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoSpec {
    pub id: u32,
    pub priority: u8,
    pub current_state: RoSpecState,
    /// Duration stop trigger of the nested AISpec.
    pub tag_read_interval: Duration,
    pub inventory_parameter_spec_id: u16,
}

impl RoSpec {
    /// A disabled ROSpec with an immediate start and null stop trigger.
    pub fn continuous(id: u32, priority: u8, tag_read_interval: Duration) -> Self {
        Self {
            id,
            priority,
            current_state: RoSpecState::Disabled,
            tag_read_interval,
            inventory_parameter_spec_id: 1,
        }
    }

    /// Append the `ROSpec` parameter to `buf`.
    pub fn encode(&self, buf: &mut BytesMut) {
        let duration_ms = u32::try_from(self.tag_read_interval.as_millis()).unwrap_or(u32::MAX);
        put_tlv(buf, tlv::RO_SPEC, |b| {
            b.put_u32(self.id);
            b.put_u8(self.priority);
            b.put_u8(self.current_state as u8);

            put_tlv(b, tlv::RO_BOUNDARY_SPEC, |b| {
                put_tlv(b, tlv::RO_SPEC_START_TRIGGER, |b| {
                    b.put_u8(START_TRIGGER_IMMEDIATE)
                });
                put_tlv(b, tlv::RO_SPEC_STOP_TRIGGER, |b| {
                    b.put_u8(STOP_TRIGGER_NULL);
                    b.put_u32(0);
                });
            });

            put_tlv(b, tlv::AI_SPEC, |b| {
                b.put_u16(1);
                b.put_u16(ALL_ANTENNAS);
                put_tlv(b, tlv::AI_SPEC_STOP_TRIGGER, |b| {
                    b.put_u8(AISPEC_STOP_TRIGGER_DURATION);
                    b.put_u32(duration_ms);
                });
                put_tlv(b, tlv::INVENTORY_PARAMETER_SPEC, |b| {
                    b.put_u16(self.inventory_parameter_spec_id);
                    b.put_u8(PROTOCOL_EPC_C1G2);
                });
            });
        });
    }
}
