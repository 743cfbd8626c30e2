//! The disk-based blob store used by leaf personas.
//!
//! A file-per-element store under one directory. Filenames embed a Base32
//! encoded SHA-512 of the content, so an element changing content changes
//! its name and external observers can notice. Reads may race concurrent
//! external writers; the contract is "the file as it was at some point
//! during the call, or an error".

use bytes::Bytes;
use data_encoding::BASE32_NOPAD;
use sha2::{Digest, Sha512};
use std::path::{Path, PathBuf};
use vault2_api::{BoxFut, VaultError, VaultResult};

use crate::DataId;

/// A file-per-element blob store rooted at one directory.
#[derive(Debug, Clone)]
pub struct DiskBasedStore {
    root: PathBuf,
}

fn io_err(ctx: &'static str) -> impl Fn(std::io::Error) -> VaultError {
    move |e| VaultError::failed_src(ctx, e)
}

fn element_stem(data: &DataId, version: u64) -> String {
    format!(
        "{}{}_{version}",
        data.kind as u8,
        BASE32_NOPAD.encode(&data.name),
    )
}

fn element_name(stem: &str, content: &[u8]) -> String {
    format!("{stem}.{}", BASE32_NOPAD.encode(&Sha512::digest(content)))
}

async fn find_element(
    root: &Path,
    stem: &str,
) -> VaultResult<Option<String>> {
    let prefix = format!("{stem}.");
    let mut entries = tokio::fs::read_dir(root)
        .await
        .map_err(io_err("disk store list"))?;
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(io_err("disk store list"))?
    {
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with(&prefix) {
            return Ok(Some(name));
        }
    }
    Ok(None)
}

impl DiskBasedStore {
    /// Open (creating if needed) a store at `root`.
    pub fn new(root: &Path) -> VaultResult<Self> {
        std::fs::create_dir_all(root)
            .map_err(io_err("disk store create"))?;
        Ok(Self {
            root: root.to_path_buf(),
        })
    }

    /// Write a file under the store's directory as-is.
    pub fn put_file(
        &self,
        name: &str,
        content: Bytes,
    ) -> BoxFut<'static, VaultResult<()>> {
        let path = self.root.join(name);
        Box::pin(async move {
            tokio::fs::write(&path, &content)
                .await
                .map_err(io_err("disk store put"))
        })
    }

    /// Read a file under the store's directory.
    pub fn get_file(&self, name: &str) -> BoxFut<'static, VaultResult<Bytes>> {
        let path = self.root.join(name);
        Box::pin(async move {
            match tokio::fs::read(&path).await {
                Ok(content) => Ok(Bytes::from(content)),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    Err(VaultError::NoSuchElement)
                }
                Err(e) => Err(VaultError::failed_src("disk store get", e)),
            }
        })
    }

    /// How many elements the store holds.
    pub fn get_file_count(&self) -> BoxFut<'static, VaultResult<usize>> {
        let names = self.get_file_names();
        Box::pin(async move { Ok(names.await?.len()) })
    }

    /// Every filename in the store.
    pub fn get_file_names(
        &self,
    ) -> BoxFut<'static, VaultResult<Vec<String>>> {
        let root = self.root.clone();
        Box::pin(async move {
            let mut out = Vec::new();
            let mut entries = tokio::fs::read_dir(&root)
                .await
                .map_err(io_err("disk store list"))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(io_err("disk store list"))?
            {
                out.push(entry.file_name().to_string_lossy().into_owned());
            }
            out.sort();
            Ok(out)
        })
    }

    /// Total bytes stored across every element.
    pub fn used_space(&self) -> BoxFut<'static, VaultResult<u64>> {
        let root = self.root.clone();
        Box::pin(async move {
            let mut used = 0;
            let mut entries = tokio::fs::read_dir(&root)
                .await
                .map_err(io_err("disk store list"))?;
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(io_err("disk store list"))?
            {
                used += entry
                    .metadata()
                    .await
                    .map_err(io_err("disk store list"))?
                    .len();
            }
            Ok(used)
        })
    }

    /// Store a new element. Fails if `(data, version)` is already stored.
    pub fn store(
        &self,
        data: &DataId,
        version: u64,
        content: Bytes,
    ) -> BoxFut<'static, VaultResult<()>> {
        let root = self.root.clone();
        let stem = element_stem(data, version);
        Box::pin(async move {
            if find_element(&root, &stem).await?.is_some() {
                return Err(VaultError::failed(
                    "element already stored, use modify",
                ));
            }
            let path = root.join(element_name(&stem, &content));
            tokio::fs::write(&path, &content)
                .await
                .map_err(io_err("disk store store"))
        })
    }

    /// Read an element's content.
    pub fn fetch(
        &self,
        data: &DataId,
        version: u64,
    ) -> BoxFut<'static, VaultResult<Bytes>> {
        let root = self.root.clone();
        let stem = element_stem(data, version);
        Box::pin(async move {
            let Some(name) = find_element(&root, &stem).await? else {
                return Err(VaultError::NoSuchElement);
            };
            tokio::fs::read(root.join(name))
                .await
                .map(Bytes::from)
                .map_err(io_err("disk store fetch"))
        })
    }

    /// Rewrite an element through `mutator`; returns the prior content.
    /// The new content gets a new hash-bearing filename.
    pub fn modify<F>(
        &self,
        data: &DataId,
        version: u64,
        mutator: F,
    ) -> BoxFut<'static, VaultResult<Bytes>>
    where
        F: FnOnce(Bytes) -> VaultResult<Bytes> + Send + 'static,
    {
        let root = self.root.clone();
        let stem = element_stem(data, version);
        Box::pin(async move {
            let Some(name) = find_element(&root, &stem).await? else {
                return Err(VaultError::NoSuchElement);
            };
            let old = Bytes::from(
                tokio::fs::read(root.join(&name))
                    .await
                    .map_err(io_err("disk store modify"))?,
            );
            let new = mutator(old.clone())?;
            let new_path = root.join(element_name(&stem, &new));
            tokio::fs::write(&new_path, &new)
                .await
                .map_err(io_err("disk store modify"))?;
            if new_path != root.join(&name) {
                tokio::fs::remove_file(root.join(&name))
                    .await
                    .map_err(io_err("disk store modify"))?;
            }
            Ok(old)
        })
    }

    /// Remove an element.
    pub fn delete(
        &self,
        data: &DataId,
        version: u64,
    ) -> BoxFut<'static, VaultResult<()>> {
        let root = self.root.clone();
        let stem = element_stem(data, version);
        Box::pin(async move {
            let Some(name) = find_element(&root, &stem).await? else {
                return Err(VaultError::NoSuchElement);
            };
            tokio::fs::remove_file(root.join(name))
                .await
                .map_err(io_err("disk store delete"))
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::DataKind;
    use vault2_test_utils::fill_id;

    fn data(fill: u8) -> DataId {
        DataId::new(DataKind::Immutable, fill_id(fill))
    }

    fn open() -> (tempfile::TempDir, DiskBasedStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = DiskBasedStore::new(&dir.path().join("store")).unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn store_fetch_delete() {
        let (_dir, store) = open();
        store
            .store(&data(1), 0, Bytes::from_static(b"content"))
            .await
            .unwrap();
        assert_eq!(
            Bytes::from_static(b"content"),
            store.fetch(&data(1), 0).await.unwrap(),
        );
        assert_eq!(1, store.get_file_count().await.unwrap());
        store.delete(&data(1), 0).await.unwrap();
        assert!(matches!(
            store.fetch(&data(1), 0).await,
            Err(VaultError::NoSuchElement),
        ));
    }

    #[tokio::test]
    async fn double_store_is_refused() {
        let (_dir, store) = open();
        store
            .store(&data(1), 0, Bytes::from_static(b"a"))
            .await
            .unwrap();
        assert!(store
            .store(&data(1), 0, Bytes::from_static(b"b"))
            .await
            .is_err());
    }

    #[tokio::test]
    async fn filenames_embed_content_hash() {
        let (_dir, store) = open();
        store
            .store(&data(1), 0, Bytes::from_static(b"content"))
            .await
            .unwrap();
        let names = store.get_file_names().await.unwrap();
        let expected_hash =
            BASE32_NOPAD.encode(&Sha512::digest(b"content"));
        assert!(names[0].ends_with(&format!(".{expected_hash}")));
    }

    #[tokio::test]
    async fn modify_renames_and_returns_old() {
        let (_dir, store) = open();
        store
            .store(&data(1), 0, Bytes::from_static(b"old"))
            .await
            .unwrap();
        let before = store.get_file_names().await.unwrap();
        let old = store
            .modify(&data(1), 0, |_| Ok(Bytes::from_static(b"new")))
            .await
            .unwrap();
        assert_eq!(Bytes::from_static(b"old"), old);
        assert_eq!(
            Bytes::from_static(b"new"),
            store.fetch(&data(1), 0).await.unwrap(),
        );
        let after = store.get_file_names().await.unwrap();
        assert_ne!(before, after);
        assert_eq!(1, after.len());
    }

    #[tokio::test]
    async fn versions_are_distinct_elements() {
        let (_dir, store) = open();
        store
            .store(&data(1), 0, Bytes::from_static(b"v0"))
            .await
            .unwrap();
        store
            .store(&data(1), 1, Bytes::from_static(b"v1"))
            .await
            .unwrap();
        assert_eq!(2, store.get_file_count().await.unwrap());
        assert_eq!(
            Bytes::from_static(b"v1"),
            store.fetch(&data(1), 1).await.unwrap(),
        );
    }

    #[tokio::test]
    async fn used_space_sums_content() {
        let (_dir, store) = open();
        store
            .store(&data(1), 0, Bytes::from_static(b"12345"))
            .await
            .unwrap();
        store
            .store(&data(2), 0, Bytes::from_static(b"123"))
            .await
            .unwrap();
        assert_eq!(8, store.used_space().await.unwrap());
    }
}
