//! 控制台输出 - 人类可读的进度行

use vrble_core::transfer::progress_percent;
use vrble_core::{DiscoveredDevice, FetchProgressCallback, FetchReport, TransferMetadata};

pub struct ConsoleCallback;

impl FetchProgressCallback for ConsoleCallback {
    fn on_status(&self, status: &str) {
        println!("   {}", status);
    }

    fn on_device(&self, device: &DiscoveredDevice) {
        println!("✓ 发现设备: {} ({})", device.display_name(), device.address);
    }

    fn on_metadata(&self, metadata: &TransferMetadata) {
        println!("📄 文件名: {}", metadata.file_name);
        println!("📊 文件大小: {} 字节", metadata.file_size);
        println!("📥 开始读取文件数据...");
    }

    fn on_progress(&self, received: u64, total: u64) {
        println!(
            "   进度: {:.1}% ({}/{} 字节)",
            progress_percent(received, total),
            received,
            total
        );
    }

    fn on_complete(&self, report: &FetchReport) {
        if report.is_complete() {
            println!("✅ 传输完成: {}", report.path.display());
        } else {
            println!(
                "⚠️  传输不完整 ({}): {}",
                report.end,
                report.path.display()
            );
        }
        println!(
            "   共收到 {} / {} 字节",
            report.bytes_received, report.metadata.file_size
        );
    }

    fn on_error(&self, error: &str) {
        eprintln!("❌ {}", error);
    }
}
