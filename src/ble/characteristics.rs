//! Command/telemetry channel selection.
//!
//! The vehicle firmware is not pinned to fixed UUIDs. The first
//! characteristic that accepts writes becomes the command channel.
//! Telemetry arrives on that same characteristic when it notifies,
//! otherwise on the first notifiable sibling.

use uuid::Uuid;

use crate::ble::transport::CharacteristicInfo;

/// The characteristics chosen for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSelection {
    /// Characteristic commands are written to.
    pub command: Uuid,
    /// Characteristic telemetry is read from, if any.
    pub telemetry: Option<Uuid>,
}

/// Pick the command and telemetry channels.
///
/// Returns `None` when no characteristic is writable.
pub fn select_channels(characteristics: &[CharacteristicInfo]) -> Option<ChannelSelection> {
    let command = characteristics.iter().find(|c| c.writable)?;

    let telemetry = if command.notifiable {
        Some(command.uuid)
    } else {
        characteristics
            .iter()
            .find(|c| c.notifiable)
            .map(|c| c.uuid)
    };

    Some(ChannelSelection {
        command: command.uuid,
        telemetry,
    })
}
