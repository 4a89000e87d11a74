// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Lock-free building blocks: the slab object pool and the bounded MPMC
//! ring the priority lanes are built from.

pub mod pool;
pub mod registry;
pub mod ring;

pub use pool::{ObjectPool, PoolBox, PoolStats};
pub use ring::MpmcRing;
