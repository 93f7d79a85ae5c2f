// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

// Allow panic!/unwrap/expect in test code
#![cfg_attr(test, allow(clippy::panic))]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

//! ah-core: domain types for the autohoster backend.
//!
//! Everything here is runtime-free: config trees, the instance model,
//! the join-verdict lattice, port-spec parsing and the report data model.
//! The daemon crate owns all I/O.

pub mod clock;
pub mod conf;
pub mod instance;
pub mod ports;
pub mod report;
pub mod util;
pub mod verdict;

pub use clock::{Clock, FakeClock, SystemClock};
pub use conf::{overlay_get, overlay_get_or, Conf};
pub use instance::{
    AdminsPolicy, Instance, InstanceCommand, InstanceSettings, InstanceSpec, InstanceState,
    JoinDispatch, COMMAND_QUEUE_DEPTH,
};
pub use ports::parse_port_spec;
pub use report::{GameReport, GameReportExtended, GraphFrame, PlayerData, PlayerStatistics};
pub use verdict::JoinVerdict;
