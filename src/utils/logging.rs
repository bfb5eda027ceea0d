/// 日志工具模块
///
/// 提供日志初始化、格式化和输出的辅助函数
use tracing::info;
use tracing_subscriber::EnvFilter;

/// 初始化日志
///
/// `RUST_LOG` 优先，未设置时使用配置中的日志级别。重复调用无副作用。
///
/// # 参数
/// - `default_level`: 默认日志级别（如 "info"）
pub fn init(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_level))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 记录阶段启动信息
///
/// # 参数
/// - `stage_id`: 阶段ID
/// - `batch_size`: 每批案例数
/// - `max_concurrent`: 最大并发调用数
pub fn log_stage_start(stage_id: &str, batch_size: usize, max_concurrent: usize) {
    info!("{}", "=".repeat(60));
    info!("🚀 分类阶段启动 - {}", stage_id);
    info!("📊 每批 {} 个案例, 最大并发数: {}", batch_size, max_concurrent);
    info!("{}", "=".repeat(60));
}

/// 记录案例选择信息
///
/// # 参数
/// - `selected`: 本阶段选中的案例数
/// - `already_processed`: 检查点中已有终态结果的案例数
/// - `pending`: 待处理案例数
pub fn log_cases_selected(selected: usize, already_processed: usize, pending: usize) {
    info!("✓ 本阶段共 {} 个案例", selected);
    info!("♻️ 检查点中已完成: {}", already_processed);
    info!("📋 待处理: {}", pending);
    info!("💡 每批完成并写入检查点后再开始下一批\n");
}

/// 记录批次开始信息
///
/// # 参数
/// - `batch_num`: 批次编号（跨恢复连续）
/// - `start`: 起始案例序号
/// - `end`: 结束案例序号
/// - `total`: 本次待处理总数
pub fn log_batch_start(batch_num: usize, start: usize, end: usize, total: usize) {
    info!("\n{}", "=".repeat(60));
    info!("📦 开始处理第 {} 批", batch_num);
    info!("📄 本批案例: {}-{} / 共 {} 个", start, end, total);
    info!("{}", "=".repeat(60));
}

/// 记录批次完成信息
///
/// # 参数
/// - `batch_num`: 批次编号
/// - `success`: 成功数量
/// - `total`: 批次总数
pub fn log_batch_complete(batch_num: usize, success: usize, total: usize) {
    info!("\n{}", "─".repeat(60));
    info!("✓ 第 {} 批完成并已写入检查点: 成功 {}/{}", batch_num, success, total);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `success`: 成功数量
/// - `failed`: 失败数量
/// - `total`: 总数
/// - `output`: 结果表路径（未完成时为 None）
pub fn print_final_stats(success: usize, failed: usize, total: usize, output: Option<&str>) {
    info!("\n{}", "=".repeat(60));
    info!("📊 阶段处理统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 成功: {}/{}", success, total);
    info!("❌ 失败: {}", failed);
    info!("{}", "=".repeat(60));
    match output {
        Some(path) => info!("\n结果已保存至: {}", path),
        None => info!("\n阶段尚未完成，检查点已保留，可再次运行以继续"),
    }
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truncate_text_counts_chars() {
        assert_eq!(truncate_text("短文本", 10), "短文本");
        assert_eq!(truncate_text("受害人通过应用投资被骗", 4), "受害人通...");
    }
}
