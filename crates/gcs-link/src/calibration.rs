//! Sensor calibration runs driven through MAV_CMD_PREFLIGHT_CALIBRATION.

use mavlink::common::MavResult;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::LinkError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CalibrationKind {
    Gyro,
    Compass,
    Accel,
    Level,
    Baro,
    Radio,
}

pub const ACCEL_POSITIONS: [&str; 6] = [
    "place the vehicle level",
    "place the vehicle on its left side",
    "place the vehicle on its right side",
    "place the vehicle nose down",
    "place the vehicle nose up",
    "place the vehicle on its back",
];

impl CalibrationKind {
    /// PREFLIGHT_CALIBRATION params 1..7.
    pub fn command_params(self) -> [f32; 7] {
        let mut p = [0.0; 7];
        match self {
            Self::Gyro => p[0] = 1.0,
            Self::Compass => p[1] = 1.0,
            Self::Baro => p[2] = 1.0,
            Self::Radio => p[3] = 1.0,
            Self::Accel => p[4] = 1.0,
            Self::Level => p[4] = 2.0,
        }
        p
    }

    /// Operator confirmed steps before the run completes; zero means the
    /// vehicle's ack finishes it.
    pub fn operator_steps(self) -> u32 {
        match self {
            Self::Accel => ACCEL_POSITIONS.len() as u32,
            Self::Radio => 1,
            _ => 0,
        }
    }

    pub fn first_instruction(self) -> &'static str {
        match self {
            Self::Gyro | Self::Baro | Self::Level => "keep the vehicle still",
            Self::Compass => "rotate the vehicle around all axes",
            Self::Accel => ACCEL_POSITIONS[0],
            Self::Radio => "move all sticks and switches to their limits, then save",
        }
    }
}

impl fmt::Display for CalibrationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Gyro => "gyro",
            Self::Compass => "compass",
            Self::Accel => "accel",
            Self::Level => "level",
            Self::Baro => "baro",
            Self::Radio => "radio",
        };
        f.write_str(s)
    }
}

impl FromStr for CalibrationKind {
    type Err = LinkError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "gyro" => Ok(Self::Gyro),
            "compass" | "mag" => Ok(Self::Compass),
            "accel" | "accelerometer" => Ok(Self::Accel),
            "level" => Ok(Self::Level),
            "baro" | "barometer" => Ok(Self::Baro),
            "radio" | "rc" => Ok(Self::Radio),
            other => Err(LinkError::InvalidArgument(format!("calibration kind '{}'", other))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", content = "detail", rename_all = "snake_case")]
pub enum CalibrationStatus {
    Running,
    Succeeded,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CalibrationProgress {
    pub kind: CalibrationKind,
    pub progress: f32,
    pub instruction: String,
    pub status: CalibrationStatus,
}

#[derive(Debug, Clone)]
pub struct CalibrationRun {
    kind: CalibrationKind,
    step: u32,
    status: CalibrationStatus,
}

impl CalibrationRun {
    pub fn new(kind: CalibrationKind) -> Self {
        Self { kind, step: 0, status: CalibrationStatus::Running }
    }

    pub fn kind(&self) -> CalibrationKind {
        self.kind
    }

    pub fn status(&self) -> &CalibrationStatus {
        &self.status
    }

    pub fn is_running(&self) -> bool {
        self.status == CalibrationStatus::Running
    }

    pub fn progress(&self) -> f32 {
        match self.status {
            CalibrationStatus::Succeeded => 1.0,
            _ => match self.kind.operator_steps() {
                0 => 0.0,
                n => self.step as f32 / n as f32,
            },
        }
    }

    pub fn instruction(&self) -> String {
        match &self.status {
            CalibrationStatus::Succeeded => format!("{} calibration complete", self.kind),
            CalibrationStatus::Failed(why) => format!("{} calibration failed: {}", self.kind, why),
            CalibrationStatus::Running => match self.kind {
                CalibrationKind::Accel => ACCEL_POSITIONS
                    .get(self.step as usize)
                    .copied()
                    .unwrap_or(ACCEL_POSITIONS[0])
                    .to_string(),
                k => k.first_instruction().to_string(),
            },
        }
    }

    pub fn snapshot(&self) -> CalibrationProgress {
        CalibrationProgress {
            kind: self.kind,
            progress: self.progress(),
            instruction: self.instruction(),
            status: self.status.clone(),
        }
    }

    /// Operator confirms the current position (accel) or saves (radio).
    /// Returns true when this finished the run.
    pub fn next_step(&mut self) -> Result<bool, LinkError> {
        if !self.is_running() {
            return Err(LinkError::Refused(format!("{} calibration is not running", self.kind)));
        }
        let total = self.kind.operator_steps();
        if total == 0 {
            return Err(LinkError::InvalidArgument(format!(
                "{} calibration has no operator steps",
                self.kind
            )));
        }
        self.step += 1;
        if self.step >= total {
            self.status = CalibrationStatus::Succeeded;
            return Ok(true);
        }
        Ok(false)
    }

    pub fn on_ack(&mut self, result: MavResult) {
        if !self.is_running() {
            return;
        }
        match result {
            MavResult::MAV_RESULT_ACCEPTED if self.kind.operator_steps() == 0 => {
                self.status = CalibrationStatus::Succeeded;
            }
            MavResult::MAV_RESULT_ACCEPTED | MavResult::MAV_RESULT_IN_PROGRESS => {}
            other => self.status = CalibrationStatus::Failed(format!("{:?}", other)),
        }
    }

    pub fn cancel(&mut self) {
        if self.is_running() {
            self.status = CalibrationStatus::Failed("cancelled".into());
        }
    }
}
