use crate::ble::{BleClientError, CONTROL_CHAR_UUID, ControlCommand, GattLink};
use std::time::Duration;

/// 向控制特征写入命令
///
/// 使用带响应写入，返回 `Ok` 即表示外设已确认收到。
pub async fn send_command<L: GattLink + ?Sized>(
    link: &L,
    command: ControlCommand,
) -> Result<(), BleClientError> {
    match link.write(CONTROL_CHAR_UUID, command.as_bytes()).await {
        Ok(()) => {
            log::info!("Sent {} command", command);
            Ok(())
        }
        Err(e) => {
            log::error!("Error sending {}: {}", command, e);
            Err(e)
        }
    }
}

/// 发送 START 并等待外设就绪
///
/// 外设在写响应之前已经归零读取偏移，写确认即同步点；
/// `settle_delay` 仅用于兼容响应较慢的外设，默认为 0。
pub async fn start_transfer<L: GattLink + ?Sized>(
    link: &L,
    settle_delay: Duration,
) -> Result<(), BleClientError> {
    send_command(link, ControlCommand::Start).await?;

    if !settle_delay.is_zero() {
        log::debug!("Waiting {:?} for peer to settle", settle_delay);
        tokio::time::sleep(settle_delay).await;
    }
    Ok(())
}
