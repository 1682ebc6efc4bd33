// 日志工具模块
//
// 封装 flexi_logger 的初始化和关闭操作，确保异步日志正确 flush

use crate::config::LogConfig;
use crate::core::error::{CoreResult, QueryError};
use flexi_logger::{Cleanup, Criterion, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use parking_lot::Mutex;

/// 全局日志句柄，用于程序退出时 flush
static LOGGER_HANDLE: Mutex<Option<LoggerHandle>> = Mutex::new(None);

fn logger_error(e: flexi_logger::FlexiLoggerError) -> QueryError {
    QueryError::Config(format!("日志初始化失败: {}", e))
}

/// 初始化文件日志：按大小轮转，异步写入
///
/// # Examples
/// ```no_run
/// use querycore::config::LogConfig;
/// use querycore::utils::logging;
///
/// logging::init(&LogConfig::default()).expect("日志初始化失败");
/// ```
pub fn init(config: &LogConfig) -> CoreResult<()> {
    let handle = Logger::try_with_str(&config.level)
        .map_err(logger_error)?
        .log_to_file(
            FileSpec::default()
                .basename(&config.file)
                .directory(&config.dir),
        )
        .rotate(
            Criterion::Size(config.max_file_size),
            Naming::Numbers,
            Cleanup::KeepLogFiles(config.max_files),
        )
        .write_mode(WriteMode::Async)
        .append()
        .start()
        .map_err(logger_error)?;

    *LOGGER_HANDLE.lock() = Some(handle);
    log::info!("日志系统初始化完成: {}/{}", config.dir, config.file);
    Ok(())
}

/// 命令行工具使用：日志输出到标准错误
pub fn init_stderr(level: &str) -> CoreResult<()> {
    let handle = Logger::try_with_str(level)
        .map_err(logger_error)?
        .log_to_stderr()
        .start()
        .map_err(logger_error)?;
    *LOGGER_HANDLE.lock() = Some(handle);
    Ok(())
}

/// 刷新并关闭日志系统
///
/// 在程序退出前调用，确保所有异步日志都已写入文件
pub fn shutdown() {
    if let Some(handle) = LOGGER_HANDLE.lock().take() {
        handle.flush();
        // handle 在这里被 drop，会等待异步线程完成
    }
}

pub fn is_initialized() -> bool {
    LOGGER_HANDLE.lock().is_some()
}
