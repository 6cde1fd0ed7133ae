// SPDX-License-Identifier: MIT

//! Transport and device executors (spec §4.7, §4.8) and the autonomous
//! plate passenger (spec §4.9).

pub mod device;
pub mod mover;
pub mod plate;
