// This file is part of Gascope.
//
// Gascope is free software: you can redistribute it and/or modify it under the
// terms of the GNU Lesser General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version.
//
// Gascope is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.
// See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with Gascope.
// If not, see https://www.gnu.org/licenses/.

/// Key value store for serialized fork state blobs
#[async_trait::async_trait]
pub trait StateStore: Send + Sync {
    /// Get the blob stored under `key`
    async fn get(&self, key: &str) -> anyhow::Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous blob
    async fn put(&self, key: &str, value: Vec<u8>) -> anyhow::Result<()>;

    /// Delete the blob stored under `key`, if any
    async fn delete(&self, key: &str) -> anyhow::Result<()>;
}
