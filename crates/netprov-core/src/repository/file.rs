// # File Repository
//
// JSON snapshot implementation of Repository with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: write-then-rename after every mutation
// - Backup: the previous good file is kept as `.backup`
// - Recovery: a corrupted file falls back to the backup
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "tables": { "routers": { "1": { ... } }, "contracts": { ... } }
// }
// ```

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::{MemoryRepository, Tables};
use crate::Error;
use crate::model::{
    Contract, DhcpNetwork, DhcpServer, IpClass, IpPool, PppProfile, PppoeServer, Router,
    RouterInterface, Scope, ServicePlan,
};
use crate::traits::{Repository, RepositoryFactory};

const SNAPSHOT_VERSION: &str = "1.0";

#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotFile {
    version: String,
    tables: Tables,
}

/// Repository persisted to one JSON file
///
/// Reads are served from memory; every write rewrites the file.
#[derive(Debug)]
pub struct FileRepository {
    path: PathBuf,
    inner: MemoryRepository,
    write_lock: Mutex<()>,
}

impl FileRepository {
    /// Load or create the repository at `path`
    ///
    /// A corrupted file is replaced by its backup; with no usable backup the
    /// repository starts empty.
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            fs::create_dir_all(parent).await.map_err(|e| {
                Error::config(format!(
                    "Failed to create repository directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        let tables = Self::load_with_recovery(&path).await?;
        Ok(Self {
            path,
            inner: MemoryRepository::from_tables(tables),
            write_lock: Mutex::new(()),
        })
    }

    /// Copy of every table
    pub async fn snapshot(&self) -> Tables {
        self.inner.snapshot().await
    }

    /// Mutate the tables directly and persist
    pub async fn seed(&self, f: impl FnOnce(&mut Tables)) -> Result<(), Error> {
        self.inner.seed(f).await;
        self.persist().await
    }

    async fn load_with_recovery(path: &Path) -> Result<Tables, Error> {
        match Self::load(path).await {
            Ok(tables) => Ok(tables),
            Err(Error::Json(e)) => {
                tracing::warn!(
                    "Repository file {} appears corrupted: {}. Attempting recovery from backup.",
                    path.display(),
                    e
                );
                let backup = Self::backup_path(path);
                if !backup.exists() {
                    tracing::warn!("No backup file found. Starting with empty repository.");
                    return Ok(Tables::default());
                }
                match Self::load(&backup).await {
                    Ok(tables) => {
                        if let Err(restore_err) = fs::copy(&backup, path).await {
                            tracing::error!(
                                "Failed to restore repository file from backup: {}",
                                restore_err
                            );
                        }
                        tracing::info!("Recovered repository from backup");
                        Ok(tables)
                    }
                    Err(backup_err) => {
                        tracing::error!(
                            "Backup also unusable: {}. Starting with empty repository.",
                            backup_err
                        );
                        Ok(Tables::default())
                    }
                }
            }
            Err(e) => Err(e),
        }
    }

    async fn load(path: &Path) -> Result<Tables, Error> {
        if !path.exists() {
            tracing::debug!("Repository file does not exist: {}", path.display());
            return Ok(Tables::default());
        }

        let content = fs::read_to_string(path).await?;
        let snapshot: SnapshotFile = serde_json::from_str(&content)?;
        if snapshot.version != SNAPSHOT_VERSION {
            tracing::warn!(
                "Repository file version mismatch: expected {}, got {}. Attempting to load anyway.",
                SNAPSHOT_VERSION,
                snapshot.version
            );
        }
        Ok(snapshot.tables)
    }

    /// Write the current tables atomically
    async fn persist(&self) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        let snapshot = SnapshotFile {
            version: SNAPSHOT_VERSION.to_string(),
            tables: self.inner.snapshot().await,
        };
        let json = serde_json::to_string_pretty(&snapshot)?;

        let temp_path = self.temp_path();
        {
            let mut file = fs::File::create(&temp_path).await.map_err(|e| {
                Error::repository(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            file.write_all(json.as_bytes()).await?;
            file.flush().await?;
        }

        if self.path.exists()
            && let Err(e) = fs::copy(&self.path, Self::backup_path(&self.path)).await
        {
            tracing::warn!("Failed to create backup: {}", e);
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::repository(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Repository written to {}", self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl Repository for FileRepository {
    async fn get_router(&self, id: i64) -> Result<Option<Router>, Error> {
        self.inner.get_router(id).await
    }

    async fn get_interface(&self, id: i64) -> Result<Option<RouterInterface>, Error> {
        self.inner.get_interface(id).await
    }

    async fn list_interfaces(&self, router_id: i64) -> Result<Vec<RouterInterface>, Error> {
        self.inner.list_interfaces(router_id).await
    }

    async fn get_ip_class(&self, id: i64) -> Result<Option<IpClass>, Error> {
        self.inner.get_ip_class(id).await
    }

    async fn get_pool(&self, id: i64) -> Result<Option<IpPool>, Error> {
        self.inner.get_pool(id).await
    }

    async fn list_pools(&self, scope: Scope) -> Result<Vec<IpPool>, Error> {
        self.inner.list_pools(scope).await
    }

    async fn create_pool(&self, pool: &IpPool) -> Result<IpPool, Error> {
        let row = self.inner.create_pool(pool).await?;
        self.persist().await?;
        Ok(row)
    }

    async fn update_pool(&self, pool: &IpPool) -> Result<(), Error> {
        self.inner.update_pool(pool).await?;
        self.persist().await
    }

    async fn get_profile(&self, id: i64) -> Result<Option<PppProfile>, Error> {
        self.inner.get_profile(id).await
    }

    async fn list_profiles(&self, scope: Scope) -> Result<Vec<PppProfile>, Error> {
        self.inner.list_profiles(scope).await
    }

    async fn create_profile(&self, profile: &PppProfile) -> Result<PppProfile, Error> {
        let row = self.inner.create_profile(profile).await?;
        self.persist().await?;
        Ok(row)
    }

    async fn update_profile(&self, profile: &PppProfile) -> Result<(), Error> {
        self.inner.update_profile(profile).await?;
        self.persist().await
    }

    async fn get_pppoe_server(&self, id: i64) -> Result<Option<PppoeServer>, Error> {
        self.inner.get_pppoe_server(id).await
    }

    async fn list_pppoe_servers(&self, scope: Scope) -> Result<Vec<PppoeServer>, Error> {
        self.inner.list_pppoe_servers(scope).await
    }

    async fn create_pppoe_server(&self, server: &PppoeServer) -> Result<PppoeServer, Error> {
        let row = self.inner.create_pppoe_server(server).await?;
        self.persist().await?;
        Ok(row)
    }

    async fn update_pppoe_server(&self, server: &PppoeServer) -> Result<(), Error> {
        self.inner.update_pppoe_server(server).await?;
        self.persist().await
    }

    async fn get_dhcp_server(&self, id: i64) -> Result<Option<DhcpServer>, Error> {
        self.inner.get_dhcp_server(id).await
    }

    async fn list_dhcp_servers(&self, scope: Scope) -> Result<Vec<DhcpServer>, Error> {
        self.inner.list_dhcp_servers(scope).await
    }

    async fn create_dhcp_server(&self, server: &DhcpServer) -> Result<DhcpServer, Error> {
        let row = self.inner.create_dhcp_server(server).await?;
        self.persist().await?;
        Ok(row)
    }

    async fn update_dhcp_server(&self, server: &DhcpServer) -> Result<(), Error> {
        self.inner.update_dhcp_server(server).await?;
        self.persist().await
    }

    async fn list_dhcp_networks(&self, dhcp_server_id: i64) -> Result<Vec<DhcpNetwork>, Error> {
        self.inner.list_dhcp_networks(dhcp_server_id).await
    }

    async fn get_plan(&self, id: i64) -> Result<Option<ServicePlan>, Error> {
        self.inner.get_plan(id).await
    }

    async fn get_contract(&self, id: i64) -> Result<Option<Contract>, Error> {
        self.inner.get_contract(id).await
    }

    async fn update_contract(&self, contract: &Contract) -> Result<(), Error> {
        self.inner.update_contract(contract).await?;
        self.persist().await
    }

    async fn delete_contract(&self, id: i64) -> Result<(), Error> {
        self.inner.delete_contract(id).await?;
        self.persist().await
    }
}

/// Factory for creating FileRepository instances
///
/// Expects the serialized `RepositoryConfig::File` form: `{"type": "file", "path": "..."}`.
pub struct FileRepositoryFactory;

#[async_trait]
impl RepositoryFactory for FileRepositoryFactory {
    async fn create(&self, config: &serde_json::Value) -> Result<Box<dyn Repository>, Error> {
        let path = config
            .get("path")
            .and_then(|p| p.as_str())
            .ok_or_else(|| Error::config("File repository requires a 'path'"))?;
        Ok(Box::new(FileRepository::open(path).await?))
    }
}
