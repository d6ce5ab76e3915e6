//! Command names and the static danger table.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A command the dispatcher understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    ReadVariable,
    WriteVariable,
    GetState,
    Arm,
    Disarm,
    ArmStatus,
    Build,
    GetInfo,
    Clean,
    SetTarget,
    Activate,
    Restart,
    Deploy,
}

impl Command {
    pub const ALL: [Command; 13] = [
        Command::ReadVariable,
        Command::WriteVariable,
        Command::GetState,
        Command::Arm,
        Command::Disarm,
        Command::ArmStatus,
        Command::Build,
        Command::GetInfo,
        Command::Clean,
        Command::SetTarget,
        Command::Activate,
        Command::Restart,
        Command::Deploy,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Command::ReadVariable => "read_variable",
            Command::WriteVariable => "write_variable",
            Command::GetState => "get_state",
            Command::Arm => "arm",
            Command::Disarm => "disarm",
            Command::ArmStatus => "arm_status",
            Command::Build => "build",
            Command::GetInfo => "get_info",
            Command::Clean => "clean",
            Command::SetTarget => "set_target",
            Command::Activate => "activate",
            Command::Restart => "restart",
            Command::Deploy => "deploy",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Command::ReadVariable => "Read a controller variable by symbolic path",
            Command::WriteVariable => "Write a controller variable and report previous and new values",
            Command::GetState => "Report the controller's operating mode",
            Command::Arm => "Open the authorization window for dangerous commands",
            Command::Disarm => "Close the authorization window immediately",
            Command::ArmStatus => "Report whether the gate is armed and for how long",
            Command::Build => "Build the automation project",
            Command::GetInfo => "Report automation project information",
            Command::Clean => "Clean the automation project",
            Command::SetTarget => "Point the automation project at a controller",
            Command::Activate => "Activate the configuration on the controller",
            Command::Restart => "Restart the controller runtime",
            Command::Deploy => "Build, activate and restart in one step",
        }
    }

    /// Whether the command is carried out by the external automation tool.
    pub fn is_automation(self) -> bool {
        matches!(
            self,
            Command::Build
                | Command::GetInfo
                | Command::Clean
                | Command::SetTarget
                | Command::Activate
                | Command::Restart
                | Command::Deploy
        )
    }

    /// Danger flags for this command.
    pub fn spec(self) -> DangerousCommandSpec {
        dangerous_spec(self.name())
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Command {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Command::ALL
            .into_iter()
            .find(|c| c.name() == s)
            .ok_or_else(|| format!("unknown command {s:?}"))
    }
}

/// Safety requirements for one command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DangerousCommandSpec {
    pub requires_arm: bool,
    pub requires_confirm: bool,
}

const ARM_ONLY: DangerousCommandSpec = DangerousCommandSpec {
    requires_arm: true,
    requires_confirm: false,
};

const ARM_AND_CONFIRM: DangerousCommandSpec = DangerousCommandSpec {
    requires_arm: true,
    requires_confirm: true,
};

static DANGEROUS: &[(&str, DangerousCommandSpec)] = &[
    ("write_variable", ARM_ONLY),
    ("set_target", ARM_ONLY),
    ("activate", ARM_AND_CONFIRM),
    ("restart", ARM_AND_CONFIRM),
    ("deploy", ARM_AND_CONFIRM),
];

/// Look up a command's danger flags. Names absent from the table are not dangerous.
pub fn dangerous_spec(name: &str) -> DangerousCommandSpec {
    DANGEROUS
        .iter()
        .find(|(n, _)| *n == name)
        .map(|(_, spec)| *spec)
        .unwrap_or_default()
}

/// One row of the command listing served over IPC.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandInfo {
    pub name: String,
    pub description: String,
    #[serde(flatten)]
    pub spec: DangerousCommandSpec,
}

pub fn catalog() -> Vec<CommandInfo> {
    Command::ALL
        .into_iter()
        .map(|c| CommandInfo {
            name: c.name().to_string(),
            description: c.description().to_string(),
            spec: c.spec(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_names_round_trip() {
        for cmd in Command::ALL {
            assert_eq!(cmd.name().parse::<Command>(), Ok(cmd));
        }
        assert!("Deploy".parse::<Command>().is_err());
    }

    #[test]
    fn test_danger_table() {
        assert_eq!(dangerous_spec("read_variable"), DangerousCommandSpec::default());
        assert_eq!(dangerous_spec("write_variable"), ARM_ONLY);
        assert_eq!(dangerous_spec("set_target"), ARM_ONLY);
        assert_eq!(dangerous_spec("deploy"), ARM_AND_CONFIRM);
        assert_eq!(dangerous_spec("activate"), ARM_AND_CONFIRM);
        assert_eq!(dangerous_spec("restart"), ARM_AND_CONFIRM);
        assert_eq!(dangerous_spec("build"), DangerousCommandSpec::default());
        assert_eq!(dangerous_spec("no_such_command"), DangerousCommandSpec::default());
    }

    #[test]
    fn test_gate_commands_are_never_gated() {
        for cmd in [Command::Arm, Command::Disarm, Command::ArmStatus] {
            assert!(!cmd.spec().requires_arm);
        }
    }

    #[test]
    fn test_automation_commands() {
        let automation: Vec<_> = Command::ALL.into_iter().filter(|c| c.is_automation()).collect();
        assert_eq!(automation.len(), 7);
        assert!(!Command::ReadVariable.is_automation());
        assert!(!Command::Disarm.is_automation());
        assert!(Command::Deploy.is_automation());
    }

    #[test]
    fn test_catalog_flattens_danger_flags() {
        let json = serde_json::to_value(catalog()).unwrap();
        let deploy = json
            .as_array()
            .unwrap()
            .iter()
            .find(|c| c["name"] == "deploy")
            .unwrap();
        assert_eq!(deploy["requiresArm"], true);
        assert_eq!(deploy["requiresConfirm"], true);
    }
}
