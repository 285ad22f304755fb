//! Public types shared by both parsers.

use volta_elements::{Element, IntegrationMethod};

/// Options from the `$` line of a circuit dump.
#[derive(Debug, Clone, Copy)]
pub struct SimOptions {
    /// UI speed knob; maps monotonically to steps per frame.
    pub sim_speed: i32,
    /// Timestep in seconds.
    pub dt: f64,
    /// Current display speed (kept for round-trip; the core does not
    /// render).
    pub current_speed: f64,
    /// Bit 0 selects trapezoidal integration.
    pub flags: u32,
    /// Display voltage range (kept for round-trip).
    pub voltage_range: f64,
}

impl SimOptions {
    pub const FLAG_TRAPEZOIDAL: u32 = 1;

    pub fn integration_method(&self) -> IntegrationMethod {
        if self.flags & Self::FLAG_TRAPEZOIDAL != 0 {
            IntegrationMethod::Trapezoidal
        } else {
            IntegrationMethod::BackwardEuler
        }
    }
}

impl Default for SimOptions {
    fn default() -> Self {
        Self {
            sim_speed: 10,
            dt: 5e-6,
            current_speed: 0.05,
            flags: 0,
            voltage_range: 5.0,
        }
    }
}

/// What a scheduled action does when it fires.
#[derive(Debug, Clone, PartialEq)]
pub enum ActionKind {
    /// Write a named parameter (slider assignment).
    Set { name: String, value: f64 },
    /// Halt the run loop.
    Stop,
}

/// One schedule entry. Records stay in the schedule when disabled.
#[derive(Debug, Clone, PartialEq)]
pub struct ActionRecord {
    pub time: f64,
    pub kind: ActionKind,
    pub enabled: bool,
}

/// What a scope channel samples.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeKind {
    Voltage,
    Current,
    Power,
    Value,
}

impl ScopeKind {
    pub fn code(&self) -> &'static str {
        match self {
            ScopeKind::Voltage => "v",
            ScopeKind::Current => "i",
            ScopeKind::Power => "p",
            ScopeKind::Value => "x",
        }
    }

    pub fn from_code(code: &str) -> Option<Self> {
        match code {
            "v" => Some(ScopeKind::Voltage),
            "i" => Some(ScopeKind::Current),
            "p" => Some(ScopeKind::Power),
            "x" => Some(ScopeKind::Value),
            _ => None,
        }
    }
}

/// A scope channel request from the input file.
#[derive(Debug, Clone, PartialEq)]
pub struct ScopeRequest {
    /// Labeled node, computed-value name, or element label.
    pub target: String,
    pub kind: ScopeKind,
}

/// Result of parsing either input format.
#[derive(Debug)]
pub struct ParsedCircuit {
    pub options: SimOptions,
    pub elements: Vec<Box<dyn Element>>,
    pub actions: Vec<ActionRecord>,
    pub scopes: Vec<ScopeRequest>,
    /// Model constants applied to the value registry at load.
    pub parameters: Vec<(String, f64)>,
    /// Name → tooltip hints (SFC format).
    pub hints: Vec<(String, String)>,
    /// Opaque `%` comment lines, preserved for export.
    pub comments: Vec<String>,
}

impl ParsedCircuit {
    pub fn empty() -> Self {
        Self {
            options: SimOptions::default(),
            elements: Vec::new(),
            actions: Vec::new(),
            scopes: Vec::new(),
            parameters: Vec::new(),
            hints: Vec::new(),
            comments: Vec::new(),
        }
    }
}
