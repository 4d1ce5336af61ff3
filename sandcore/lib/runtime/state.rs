use std::fmt;

use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Where a sandbox process is in its lifecycle.
///
/// ```text
/// Absent -> Spawning -> ConfiguringBoot -> Running -> Stopping -> Absent
/// ```
///
/// A failure while spawning or configuring returns straight to `Absent`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LifecycleState {
    /// No process exists.
    #[default]
    Absent,

    /// The hypervisor process is being launched.
    Spawning,

    /// The process is up and being configured over its control socket.
    ConfiguringBoot,

    /// The guest has been started.
    Running,

    /// The process is being terminated.
    Stopping,
}

/// One step of the boot sequence, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootStep {
    /// Waiting for the control socket.
    Connect,

    /// `PUT /boot-source`.
    BootSource,

    /// `PUT /drives/{id}`.
    RootDrive,

    /// `PUT /machine-config`.
    MachineConfig,

    /// `PUT /actions` with `InstanceStart`.
    InstanceStart,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LifecycleState {
    /// Returns true if moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: LifecycleState) -> bool {
        use LifecycleState::*;

        matches!(
            (self, next),
            (Absent, Spawning)
                | (Spawning, ConfiguringBoot)
                | (Spawning, Absent)
                | (ConfiguringBoot, Running)
                | (ConfiguringBoot, Absent)
                | (Running, Stopping)
                | (Stopping, Absent)
        )
    }

    /// The state name as shown to operators.
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleState::Absent => "absent",
            LifecycleState::Spawning => "spawning",
            LifecycleState::ConfiguringBoot => "configuring_boot",
            LifecycleState::Running => "running",
            LifecycleState::Stopping => "stopping",
        }
    }
}

impl BootStep {
    /// The step name as shown in errors.
    pub fn as_str(&self) -> &'static str {
        match self {
            BootStep::Connect => "connect",
            BootStep::BootSource => "boot-source",
            BootStep::RootDrive => "root-drive",
            BootStep::MachineConfig => "machine-config",
            BootStep::InstanceStart => "instance-start",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for BootStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
