//! 设备查询语言编译器与动态组成员缓存
//!
//! 查询文本经 [`lexer`] 切分、[`parser`] 解析为 [`ast::Expression`]，由
//! [`sql_compiler`] 编译为带命名参数的 SQL，在 [`store`] 上执行；
//! [`group`] 维护动态组的成员缓存。

pub mod ast;
pub mod config;
pub mod error;
pub mod group;
pub mod lexer;
pub mod literal;
pub mod parser;
pub mod registry;
pub mod sql_compiler;
pub mod store;
pub mod token;

pub use error::{GroupError, ParseError, StoreError};
pub use parser::parse_query;
pub use sql_compiler::{CompiledQuery, Query};
