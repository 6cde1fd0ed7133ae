// SPDX-License-Identifier: MIT

//! Resource dispatchers: mover pool (spec §4.5) and device pool (spec §4.6).

pub mod device_pool;
pub mod mover_pool;
