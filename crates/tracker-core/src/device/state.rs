//! Device modes and transition bookkeeping

use serde::Serialize;

/// Top-level operating mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceState {
    Boot,
    Error,
    BatteryCharging,
    BatteryLevelLow,
    LogFileFull,
    ProvisioningNeeded,
    Provisioning,
    Operational,
}

impl DeviceState {
    pub const ALL: [DeviceState; 8] = [
        Self::Boot,
        Self::Error,
        Self::BatteryCharging,
        Self::BatteryLevelLow,
        Self::LogFileFull,
        Self::ProvisioningNeeded,
        Self::Provisioning,
        Self::Operational,
    ];
}

/// Current, previous and requested mode.
///
/// A step requests its successor with [`ModeHandle::request`]; later requests
/// overwrite earlier ones, so checks are issued lowest precedence first.
#[derive(Debug, Clone, Copy)]
pub struct ModeHandle {
    current: DeviceState,
    /// Mode whose step ran last; differs from `current` right after a switch
    last_ticked: Option<DeviceState>,
    previous: Option<DeviceState>,
    requested: DeviceState,
}

impl ModeHandle {
    pub fn new(initial: DeviceState) -> Self {
        Self {
            current: initial,
            last_ticked: None,
            previous: None,
            requested: initial,
        }
    }

    pub fn current(&self) -> DeviceState {
        self.current
    }

    /// Mode the device was in before the current one
    pub fn previous(&self) -> Option<DeviceState> {
        self.previous
    }

    pub fn requested(&self) -> DeviceState {
        self.requested
    }

    pub fn request(&mut self, next: DeviceState) {
        self.requested = next;
    }

    /// True the first time the current mode is stepped
    pub(crate) fn entering(&self) -> bool {
        self.last_ticked != Some(self.current)
    }

    pub(crate) fn mark_ticked(&mut self) {
        self.last_ticked = Some(self.current);
    }

    /// Move to the requested mode; returns the mode that was left
    pub(crate) fn advance(&mut self) -> Option<DeviceState> {
        if self.requested == self.current {
            return None;
        }
        let left = self.current;
        self.previous = Some(left);
        self.current = self.requested;
        Some(left)
    }

    /// Force a mode, bypassing exit handling
    pub(crate) fn force(&mut self, state: DeviceState) {
        self.previous = Some(self.current);
        self.current = state;
        self.requested = state;
        self.last_ticked = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_request_wins() {
        let mut mode = ModeHandle::new(DeviceState::Operational);
        mode.request(DeviceState::Provisioning);
        mode.request(DeviceState::BatteryCharging);
        mode.request(DeviceState::BatteryLevelLow);

        assert_eq!(mode.advance(), Some(DeviceState::Operational));
        assert_eq!(mode.current(), DeviceState::BatteryLevelLow);
        assert_eq!(mode.previous(), Some(DeviceState::Operational));
    }

    #[test]
    fn test_entering_only_on_first_step() {
        let mut mode = ModeHandle::new(DeviceState::Boot);
        assert!(mode.entering());

        mode.mark_ticked();
        assert!(!mode.entering());

        mode.request(DeviceState::Error);
        mode.advance();
        assert!(mode.entering());
    }

    #[test]
    fn test_no_advance_without_request() {
        let mut mode = ModeHandle::new(DeviceState::Provisioning);
        assert_eq!(mode.advance(), None);
    }
}
