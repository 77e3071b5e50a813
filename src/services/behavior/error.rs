use crate::i18n;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BehaviorErrorKind {
    InvalidArgument,
    NotFound,
    Internal,
}

impl BehaviorErrorKind {
    pub const fn code(self) -> &'static str {
        match self {
            BehaviorErrorKind::InvalidArgument => "INVALID_ARGUMENT",
            BehaviorErrorKind::NotFound => "NOT_FOUND",
            BehaviorErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// 面向调用方的错误：带短标签便于日志关联，内部细节只进日志不进消息。
#[derive(Debug, Clone)]
pub struct BehaviorError {
    kind: BehaviorErrorKind,
    tag: &'static str,
    message: String,
}

impl BehaviorError {
    fn new(kind: BehaviorErrorKind, tag: &'static str, message: String) -> Self {
        Self { kind, tag, message }
    }

    pub(crate) fn invalid_argument(tag: &'static str, message_key: &str) -> Self {
        Self::new(BehaviorErrorKind::InvalidArgument, tag, i18n::t(message_key))
    }

    pub(crate) fn invalid_argument_with_max(
        tag: &'static str,
        message_key: &str,
        max: impl ToString,
    ) -> Self {
        let mut params = HashMap::new();
        params.insert("max".to_string(), max.to_string());
        Self::new(
            BehaviorErrorKind::InvalidArgument,
            tag,
            i18n::t_with_params(message_key, &params),
        )
    }

    pub(crate) fn not_found(tag: &'static str, message_key: &str) -> Self {
        Self::new(BehaviorErrorKind::NotFound, tag, i18n::t(message_key))
    }

    pub(crate) fn internal(tag: &'static str, message_key: &str) -> Self {
        Self::new(BehaviorErrorKind::Internal, tag, i18n::t(message_key))
    }

    pub fn kind(&self) -> BehaviorErrorKind {
        self.kind
    }

    pub fn code(&self) -> &'static str {
        self.kind.code()
    }

    pub fn tag(&self) -> &'static str {
        self.tag
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl std::fmt::Display for BehaviorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.tag, self.message)
    }
}

impl std::error::Error for BehaviorError {}
