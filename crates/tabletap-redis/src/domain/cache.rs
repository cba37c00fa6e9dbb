//! Fixed-namespace cache wrappers.
//!
//! Each wrapper pins a namespace and TTL so call sites cannot drift. The
//! invalidation helpers walk [`CAFE_CACHE_ENTRIES`], the one table that must
//! grow with every new cafe-scoped wrapper below.

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::cache::CacheService;
use crate::error::Result;

pub const NS_MENU: &str = "menu";
pub const NS_CAFE: &str = "cafe";
pub const NS_INVENTORY: &str = "inventory";
pub const NS_AUTH: &str = "auth";

pub const MENU_TTL_SECS: i64 = 3600;
pub const CAFE_INFO_TTL_SECS: i64 = 7200;
pub const INVENTORY_TTL_SECS: i64 = 1800;
pub const PERMISSIONS_TTL_SECS: i64 = 3600;

/// (namespace, key suffix) pairs removed by [`CacheService::invalidate_cafe_cache`].
const CAFE_CACHE_ENTRIES: &[(&str, &str)] = &[
    (NS_MENU, "items"),
    (NS_CAFE, "info"),
    (NS_INVENTORY, "levels"),
];

impl CacheService {
    pub async fn cache_menu_items<T: Serialize>(&self, cafe_id: &str, items: &T) -> Result<()> {
        self.set(NS_MENU, &format!("{cafe_id}:items"), items, Some(MENU_TTL_SECS))
            .await
    }

    pub async fn get_cached_menu_items<T: DeserializeOwned>(&self, cafe_id: &str) -> Option<T> {
        self.get(NS_MENU, &format!("{cafe_id}:items")).await
    }

    pub async fn cache_cafe_info<T: Serialize>(&self, cafe_id: &str, info: &T) -> Result<()> {
        self.set(NS_CAFE, &format!("{cafe_id}:info"), info, Some(CAFE_INFO_TTL_SECS))
            .await
    }

    pub async fn get_cached_cafe_info<T: DeserializeOwned>(&self, cafe_id: &str) -> Option<T> {
        self.get(NS_CAFE, &format!("{cafe_id}:info")).await
    }

    pub async fn cache_inventory_levels<T: Serialize>(
        &self,
        cafe_id: &str,
        levels: &T,
    ) -> Result<()> {
        self.set(
            NS_INVENTORY,
            &format!("{cafe_id}:levels"),
            levels,
            Some(INVENTORY_TTL_SECS),
        )
        .await
    }

    pub async fn get_cached_inventory_levels<T: DeserializeOwned>(
        &self,
        cafe_id: &str,
    ) -> Option<T> {
        self.get(NS_INVENTORY, &format!("{cafe_id}:levels")).await
    }

    pub async fn cache_user_permissions<T: Serialize>(
        &self,
        user_id: &str,
        permissions: &T,
    ) -> Result<()> {
        self.set(
            NS_AUTH,
            &format!("permissions:{user_id}"),
            permissions,
            Some(PERMISSIONS_TTL_SECS),
        )
        .await
    }

    pub async fn get_cached_user_permissions<T: DeserializeOwned>(
        &self,
        user_id: &str,
    ) -> Option<T> {
        self.get(NS_AUTH, &format!("permissions:{user_id}")).await
    }

    /// Drop every cafe-scoped entry for one cafe. Returns how many keys were
    /// removed; keys attempted independently.
    pub async fn invalidate_cafe_cache(&self, cafe_id: &str) -> u64 {
        let mut removed = 0;
        for (namespace, suffix) in CAFE_CACHE_ENTRIES {
            if self.del(namespace, &format!("{cafe_id}:{suffix}")).await {
                removed += 1;
            }
        }
        removed
    }

    /// Drop the cached permissions for one user.
    pub async fn invalidate_user_cache(&self, user_id: &str) -> u64 {
        if self.del(NS_AUTH, &format!("permissions:{user_id}")).await {
            1
        } else {
            0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalidation_table_covers_all_cafe_namespaces() {
        let namespaces: Vec<&str> = CAFE_CACHE_ENTRIES.iter().map(|(ns, _)| *ns).collect();
        assert!(namespaces.contains(&NS_MENU));
        assert!(namespaces.contains(&NS_CAFE));
        assert!(namespaces.contains(&NS_INVENTORY));
        // Permissions are user-scoped, not cafe-scoped.
        assert!(!namespaces.contains(&NS_AUTH));
    }
}
