// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Hardware address cache: one file per machine at `<dir>/<address>`
//! holding the MAC in colon form. Lets Wake-on-LAN reach machines that are
//! currently off and so absent from the ARP table.

use async_trait::async_trait;
use std::net::IpAddr;
use std::path::PathBuf;
use tracing::debug;

use crate::domain::network::{HardwareAddressCache, MacAddress, NetworkError};

pub struct FileHardwareAddressCache {
    dir: PathBuf,
}

impl FileHardwareAddressCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn entry_path(&self, address: IpAddr) -> PathBuf {
        self.dir.join(address.to_string())
    }
}

#[async_trait]
impl HardwareAddressCache for FileHardwareAddressCache {
    async fn get(&self, address: IpAddr) -> Option<MacAddress> {
        let content = tokio::fs::read_to_string(self.entry_path(address)).await.ok()?;
        match content.parse() {
            Ok(mac) => Some(mac),
            Err(e) => {
                debug!(%address, "Ignoring corrupt cache entry: {}", e);
                None
            }
        }
    }

    async fn put(&self, address: IpAddr, mac: MacAddress) -> Result<(), NetworkError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        tokio::fs::write(self.entry_path(address), mac.to_string()).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_then_get() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileHardwareAddressCache::new(dir.path().join("macs"));
        let address: IpAddr = "192.168.1.21".parse().unwrap();
        assert_eq!(cache.get(address).await, None);

        let mac: MacAddress = "00-1A-2B-3C-4D-5E".parse().unwrap();
        cache.put(address, mac).await.unwrap();

        assert_eq!(cache.get(address).await, Some(mac));
        let stored = std::fs::read_to_string(dir.path().join("macs/192.168.1.21")).unwrap();
        assert_eq!(stored, "00:1a:2b:3c:4d:5e");
    }

    #[test]
    fn test_corrupt_entry_is_a_miss() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("10.0.0.1"), "zz").unwrap();
        let cache = FileHardwareAddressCache::new(dir.path());
        let cached = tokio_test::block_on(cache.get("10.0.0.1".parse().unwrap()));
        assert_eq!(cached, None);
    }
}
