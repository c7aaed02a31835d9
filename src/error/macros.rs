//! # 错误处理宏

/// 快速创建配置错误的宏
#[macro_export]
macro_rules! config_error {
    ($msg:expr) => {
        $crate::error::InterceptError::config($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::InterceptError::config(format!($fmt, $($arg)*))
    };
}

/// 快速创建解析错误的宏
#[macro_export]
macro_rules! parse_error {
    ($msg:expr) => {
        $crate::error::InterceptError::parse($msg)
    };
    ($fmt:expr, $($arg:tt)*) => {
        $crate::error::InterceptError::parse(format!($fmt, $($arg)*))
    };
}

/// 快速创建处理器错误的宏
#[macro_export]
macro_rules! handler_error {
    ($platform:expr, $msg:expr) => {
        $crate::error::InterceptError::handler($msg, $platform)
    };
    ($platform:expr, $fmt:expr, $($arg:tt)*) => {
        $crate::error::InterceptError::handler(format!($fmt, $($arg)*), $platform)
    };
}

/// 确保条件成立，否则返回配置错误
#[macro_export]
macro_rules! ensure_config {
    ($cond:expr, $msg:expr) => {
        if !($cond) {
            return Err($crate::config_error!($msg));
        }
    };
    ($cond:expr, $fmt:expr, $($arg:tt)*) => {
        if !($cond) {
            return Err($crate::config_error!($fmt, $($arg)*));
        }
    };
}
