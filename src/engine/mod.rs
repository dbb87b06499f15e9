// Copyright 2025
// Licensed under the Elastic License v2.0

pub mod batch;
pub mod controller;
pub mod fleet;

pub use batch::{ApplyMode, BatchLimits, BatchTransaction};
pub use controller::{ControllerState, StreamController, StreamOutcome, StreamSettings};
pub use fleet::{Fleet, FleetReport, FleetState};
