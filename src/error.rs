//! 查询编译与成员缓存的错误类型

use thiserror::Error;

/// 查询解析错误，`position` 为去除首尾空白后输入中的 1 基字符位置
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
    pub position: Option<usize>,
}

impl ParseError {
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), position: None }
    }

    pub fn at(position: usize, message: impl Into<String>) -> Self {
        Self { message: message.into(), position: Some(position) }
    }

    /// 词法分析阶段无法识别的 token
    pub fn unknown_token(position: usize) -> Self {
        Self::at(position, format!("Parsing error, unknown token at character {position}."))
    }

    /// 没有任何解析器认领的表达式
    pub fn unrecognized(position: usize) -> Self {
        Self::at(position, format!("Parsing error at character {position}."))
    }
}

/// 设备存储层错误
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("unsupported parameter value for {name}: {value}")]
    UnsupportedValue { name: String, value: String },
    #[error("unknown group {0}")]
    UnknownGroup(i64),
    #[error("unknown device column {0}")]
    UnknownColumn(String),
}

/// 成员缓存维护错误
#[derive(Debug, Error)]
pub enum GroupError {
    #[error("invalid query for group {group}: {source}")]
    Parse {
        group: i64,
        #[source]
        source: ParseError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}
