//! 池化关系型后端接口

use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::explain::PlanNode;
use crate::core::error::{CoreResult, QueryError};
use crate::core::types::Row;

/// 后端返回的字段描述
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    pub name: String,
    /// 后端原生类型名，例如 `int8`、`timestamptz`
    pub type_name: String,
}

/// 一次查询返回的行集
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowSet {
    pub rows: Vec<Row>,
    /// 后端报告的行数，可能与 `rows.len()` 不同
    pub row_count: Option<u64>,
    pub fields: Vec<FieldDescriptor>,
}

impl RowSet {
    pub fn from_rows(rows: Vec<Row>) -> Self {
        Self {
            rows,
            row_count: None,
            fields: Vec::new(),
        }
    }
}

/// 单个池化连接
#[async_trait]
pub trait RelationalConnection: Send {
    /// 执行查询，参数按位置绑定（`$1`, `$2`, ...）
    async fn query(&mut self, sql: &str, params: &[Value]) -> CoreResult<RowSet>;

    /// 请求执行计划（不执行查询）
    async fn explain(&mut self, sql: &str) -> CoreResult<PlanNode>;

    /// 把连接归还连接池
    fn release(&mut self);
}

/// 关系型连接池
#[async_trait]
pub trait RelationalBackend: Send + Sync {
    async fn connect(&self) -> CoreResult<Box<dyn RelationalConnection>>;
}

/// 连接守卫
///
/// 无论调用方以成功、错误还是提前返回结束，连接都会在 `Drop` 中恰好归还一次
pub struct PooledConnection {
    conn: Box<dyn RelationalConnection>,
}

impl PooledConnection {
    pub async fn acquire(backend: &dyn RelationalBackend) -> CoreResult<Self> {
        let conn = backend
            .connect()
            .await
            .map_err(|e| QueryError::Backend(format!("获取连接失败: {}", e)))?;
        Ok(Self { conn })
    }
}

impl Deref for PooledConnection {
    type Target = dyn RelationalConnection;

    fn deref(&self) -> &Self::Target {
        self.conn.as_ref()
    }
}

impl DerefMut for PooledConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.conn.as_mut()
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        self.conn.release();
    }
}
