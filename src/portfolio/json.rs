use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::debug;

use crate::rebalance::{Allocation, RebalancePlan};

use super::{PortfolioError, PortfolioResult, PortfolioStore, validate_id};

const ALLOCATION_FILE: &str = "allocation.json";
const PLANS_FILE: &str = "plans.jsonl";

/// 基于目录的组合存储：`{root}/{id}/allocation.json` 保存当前配置，
/// `plans.jsonl` 逐行追加计划。同一组合的读写串行化。
pub struct JsonPortfolioStore {
    root: PathBuf,
    locks: DashMap<String, Arc<Mutex<()>>>,
}

impl JsonPortfolioStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn save_allocation(
        &self,
        portfolio_id: &str,
        allocation: &Allocation,
    ) -> PortfolioResult<()> {
        validate_id(portfolio_id)?;
        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;

        let dir = self.portfolio_dir(portfolio_id);
        fs::create_dir_all(&dir).await.map_err(|source| io_error(&dir, source))?;
        let path = dir.join(ALLOCATION_FILE);
        let body = serde_json::to_vec_pretty(allocation).map_err(|source| PortfolioError::Corrupt {
            path: path.clone(),
            source,
        })?;

        let staging = dir.join(format!("{ALLOCATION_FILE}.tmp"));
        fs::write(&staging, body)
            .await
            .map_err(|source| io_error(&staging, source))?;
        fs::rename(&staging, &path)
            .await
            .map_err(|source| io_error(&path, source))?;
        debug!(
            target: "portfolio::json",
            portfolio = portfolio_id,
            entries = allocation.entries.len(),
            "当前配置已保存"
        );
        Ok(())
    }

    pub async fn plans(&self, portfolio_id: &str) -> PortfolioResult<Vec<RebalancePlan>> {
        validate_id(portfolio_id)?;
        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;

        let path = self.portfolio_dir(portfolio_id).join(PLANS_FILE);
        let body = match fs::read_to_string(&path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => return Err(io_error(&path, source)),
        };
        body.lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|source| PortfolioError::Corrupt {
                    path: path.clone(),
                    source,
                })
            })
            .collect()
    }

    fn portfolio_dir(&self, portfolio_id: &str) -> PathBuf {
        self.root.join(portfolio_id)
    }

    fn lock_for(&self, portfolio_id: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry(portfolio_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}

#[async_trait]
impl PortfolioStore for JsonPortfolioStore {
    async fn current_allocation(&self, portfolio_id: &str) -> PortfolioResult<Allocation> {
        validate_id(portfolio_id)?;
        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;

        let path = self.portfolio_dir(portfolio_id).join(ALLOCATION_FILE);
        let body = match fs::read(&path).await {
            Ok(body) => body,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(PortfolioError::NotFound(portfolio_id.to_string()));
            }
            Err(source) => return Err(io_error(&path, source)),
        };
        serde_json::from_slice(&body).map_err(|source| PortfolioError::Corrupt { path, source })
    }

    async fn record_plan(&self, portfolio_id: &str, plan: &RebalancePlan) -> PortfolioResult<()> {
        validate_id(portfolio_id)?;
        let lock = self.lock_for(portfolio_id);
        let _guard = lock.lock().await;

        let dir = self.portfolio_dir(portfolio_id);
        fs::create_dir_all(&dir).await.map_err(|source| io_error(&dir, source))?;
        let path = dir.join(PLANS_FILE);
        let mut line = serde_json::to_vec(plan).map_err(|source| PortfolioError::Corrupt {
            path: path.clone(),
            source,
        })?;
        line.push(b'\n');

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|source| io_error(&path, source))?;
        file.write_all(&line)
            .await
            .map_err(|source| io_error(&path, source))?;
        file.flush().await.map_err(|source| io_error(&path, source))?;
        debug!(
            target: "portfolio::json",
            portfolio = portfolio_id,
            plan_id = %plan.id(),
            "调仓计划已记录"
        );
        Ok(())
    }
}

fn io_error(path: &Path, source: std::io::Error) -> PortfolioError {
    PortfolioError::Io {
        path: path.to_path_buf(),
        source,
    }
}
