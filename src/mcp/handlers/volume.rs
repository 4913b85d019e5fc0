//! Volume tool handlers: scan_volume, list_assets, get_asset, list_volumes,
//! get_volume, update_volume, remove_volume, list_asset_keywords.
//!
//! Index work touches SQLite and the filesystem synchronously, so every call
//! runs on the blocking pool.

use serde::Serialize;
use serde_json::{json, Value};

use super::{optional_str, optional_usize, required_str, McpToolResult};
use crate::db::StorageError;
use crate::volumes::{AssetFilter, VolumeError, VolumeIndex};

async fn run_blocking<T, F>(f: F) -> McpToolResult
where
    F: FnOnce() -> Result<T, VolumeError> + Send + 'static,
    T: Serialize + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => McpToolResult::json(&value),
        Ok(Err(e)) => McpToolResult::failure(&e),
        Err(e) => McpToolResult::failure(&VolumeError::Storage(StorageError::new(format!(
            "index task failed: {}",
            e
        )))),
    }
}

pub async fn handle_scan_volume(args: &Value, index: &VolumeIndex) -> McpToolResult {
    let (root, name, description) = match (
        required_str(args, "root_path"),
        optional_str(args, "name"),
        optional_str(args, "description"),
    ) {
        (Ok(root), Ok(name), Ok(description)) => (
            root.to_string(),
            name.map(String::from),
            description.map(String::from),
        ),
        (Err(result), _, _) | (_, Err(result), _) | (_, _, Err(result)) => return result,
    };
    let index = index.clone();
    run_blocking(move || index.scan_volume(&root, name.as_deref(), description.as_deref())).await
}

pub async fn handle_list_assets(args: &Value, index: &VolumeIndex) -> McpToolResult {
    let root = match required_str(args, "root_path") {
        Ok(root) => root.to_string(),
        Err(result) => return result,
    };
    let filter = match build_filter(args) {
        Ok(filter) => filter,
        Err(result) => return result,
    };
    let index = index.clone();
    run_blocking(move || {
        let assets = index.list_assets(&root, &filter)?;
        Ok(json!({
            "count": assets.len(),
            "assets": assets,
        }))
    })
    .await
}

fn build_filter(args: &Value) -> Result<AssetFilter, McpToolResult> {
    let contains = optional_str(args, "contains")?.map(String::from);
    let extension = optional_str(args, "extension")?.map(String::from);
    let pattern = optional_str(args, "pattern")?;
    let limit = optional_usize(args, "limit")?;
    let offset = optional_usize(args, "offset")?;
    AssetFilter::build(contains, extension, pattern, limit, offset)
        .map_err(|e| McpToolResult::failure(&e))
}

pub async fn handle_get_asset(args: &Value, index: &VolumeIndex) -> McpToolResult {
    let (root, relative) = match (required_str(args, "root_path"), required_str(args, "relative_path")) {
        (Ok(root), Ok(relative)) => (root.to_string(), relative.to_string()),
        (Err(result), _) | (_, Err(result)) => return result,
    };
    let index = index.clone();
    run_blocking(move || index.get_asset(&root, &relative)).await
}

pub async fn handle_list_volumes(_args: &Value, index: &VolumeIndex) -> McpToolResult {
    let index = index.clone();
    run_blocking(move || {
        let volumes = index.list_volumes()?;
        Ok(json!({
            "count": volumes.len(),
            "volumes": volumes,
        }))
    })
    .await
}

pub async fn handle_get_volume(args: &Value, index: &VolumeIndex) -> McpToolResult {
    let root = match required_str(args, "root_path") {
        Ok(root) => root.to_string(),
        Err(result) => return result,
    };
    let index = index.clone();
    run_blocking(move || index.get_volume(&root)).await
}

pub async fn handle_update_volume(args: &Value, index: &VolumeIndex) -> McpToolResult {
    let (root, name, description) = match (
        required_str(args, "root_path"),
        optional_str(args, "name"),
        optional_str(args, "description"),
    ) {
        (Ok(root), Ok(name), Ok(description)) => (
            root.to_string(),
            name.map(String::from),
            description.map(String::from),
        ),
        (Err(result), _, _) | (_, Err(result), _) | (_, _, Err(result)) => return result,
    };
    let index = index.clone();
    run_blocking(move || index.update_volume(&root, name.as_deref(), description.as_deref())).await
}

pub async fn handle_list_asset_keywords(args: &Value, index: &VolumeIndex) -> McpToolResult {
    let (root, limit) = match (optional_str(args, "root_path"), optional_usize(args, "limit")) {
        (Ok(root), Ok(limit)) => (root.map(String::from), limit),
        (Err(result), _) | (_, Err(result)) => return result,
    };
    let index = index.clone();
    run_blocking(move || {
        let keywords = index.asset_keywords(root.as_deref(), limit)?;
        Ok(json!({
            "count": keywords.len(),
            "keywords": keywords,
        }))
    })
    .await
}

pub async fn handle_remove_volume(args: &Value, index: &VolumeIndex) -> McpToolResult {
    let root = match required_str(args, "root_path") {
        Ok(root) => root.to_string(),
        Err(result) => return result,
    };
    let index = index.clone();
    run_blocking(move || {
        let removed = index.remove_volume(&root)?;
        Ok(json!({
            "root_path": root,
            "removed_assets": removed,
        }))
    })
    .await
}
