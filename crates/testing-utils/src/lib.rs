//! # Analysis Testing Utils
//!
//! 工作区内共用的测试工具：
//!
//! - **Mocks**: 作业与数据集作业仓储、任务队列、远程分析服务的内存实现
//! - **Builders**: 测试实体构建器
//! - **Database**: 已迁移的 SQLite 内存数据库与数据准备方法
//! - **Helpers**: 条件等待、测试日志、结果归档构造
//!
//! ```toml
//! [dev-dependencies]
//! analysis-testing-utils = { path = "../testing-utils" }
//! ```

pub mod builders;
pub mod database;
pub mod helpers;
pub mod mocks;

pub use builders::*;
pub use database::*;
pub use helpers::*;
pub use mocks::*;
