// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Process-wide registry of named object pools.
//!
//! Pools are meant to be constructed once at startup and passed explicitly
//! to the components that allocate from them. The registry exists for the
//! few places where threading a handle through is impractical (tooling,
//! admin introspection). Lifetime contract: register after construction,
//! deregister before teardown; a lookup never extends a pool's life beyond
//! the returned `Arc`.

use std::any::Any;
use std::sync::Arc;

use dashmap::DashMap;
use std::sync::OnceLock;

use super::pool::ObjectPool;

type AnyPool = Arc<dyn Any + Send + Sync>;

static REGISTRY: OnceLock<DashMap<String, AnyPool>> = OnceLock::new();

fn registry() -> &'static DashMap<String, AnyPool> {
    REGISTRY.get_or_init(DashMap::new)
}

/// Register a pool under its name. Replaces any previous entry with the
/// same name and returns `true` if one was replaced.
pub fn register<T: Send + 'static>(pool: Arc<ObjectPool<T>>) -> bool {
    let name = pool.name().to_string();
    registry().insert(name, pool as AnyPool).is_some()
}

/// Look up a pool by name and payload type.
///
/// Returns `None` when the name is unknown or registered with a different
/// payload type.
pub fn lookup<T: Send + 'static>(name: &str) -> Option<Arc<ObjectPool<T>>> {
    let entry = registry().get(name)?;
    entry.value().clone().downcast::<ObjectPool<T>>().ok()
}

/// Remove a pool from the registry. Returns `true` if it was present.
pub fn deregister(name: &str) -> bool {
    registry().remove(name).is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_lookup_deregister() {
        let pool = Arc::new(ObjectPool::<u64>::new(4, "reg_test_a").expect("pool should build"));
        assert!(!register(Arc::clone(&pool)));

        let found = lookup::<u64>("reg_test_a").expect("pool should be registered");
        assert_eq!(found.capacity(), 4);

        assert!(deregister("reg_test_a"));
        assert!(lookup::<u64>("reg_test_a").is_none());
    }

    #[test]
    fn test_lookup_wrong_type_fails() {
        let pool = Arc::new(ObjectPool::<u64>::new(4, "reg_test_b").expect("pool should build"));
        register(pool);

        assert!(lookup::<String>("reg_test_b").is_none());
        deregister("reg_test_b");
    }

    #[test]
    fn test_reregister_replaces() {
        let first = Arc::new(ObjectPool::<u32>::new(2, "reg_test_c").expect("pool should build"));
        let second = Arc::new(ObjectPool::<u32>::new(8, "reg_test_c").expect("pool should build"));

        assert!(!register(first));
        assert!(register(second));

        let found = lookup::<u32>("reg_test_c").expect("pool should be registered");
        assert_eq!(found.capacity(), 8);
        deregister("reg_test_c");
    }
}
