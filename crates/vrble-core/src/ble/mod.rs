pub mod client;
pub mod gatt;
pub mod scanner;

pub use client::{BleClient, BleClientError, BtleplugLink};
pub use gatt::{ControlCommand, GattLink, Radio};
pub use scanner::{BleScanner, DeviceFilter, DiscoveredDevice};

use uuid::Uuid;

pub const SERVICE_UUID: Uuid = Uuid::from_u128(0x00001234_0000_1000_8000_00805f9b34fb);
pub const FILE_NAME_CHAR_UUID: Uuid = Uuid::from_u128(0x00001235_0000_1000_8000_00805f9b34fb);
pub const FILE_DATA_CHAR_UUID: Uuid = Uuid::from_u128(0x00001236_0000_1000_8000_00805f9b34fb);
pub const FILE_SIZE_CHAR_UUID: Uuid = Uuid::from_u128(0x00001237_0000_1000_8000_00805f9b34fb);
pub const CONTROL_CHAR_UUID: Uuid = Uuid::from_u128(0x00001238_0000_1000_8000_00805f9b34fb);

/// 外设每次读取返回的标称块大小 (默认 ATT MTU 23 - 3)
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// Quest 3 上的 GATT Server 默认广播名称片段
pub const DEFAULT_DEVICE_NAME: &str = "Quest";

/// 已知 Quest 3 在 macOS 下的外设标识
pub const DEFAULT_DEVICE_ADDRESS: &str = "9F5C44A9-E5AF-FFBC-A261-22273A89303D";

/// 服务中需要用到的全部特征
pub const REQUIRED_CHARACTERISTICS: [Uuid; 4] = [
    FILE_NAME_CHAR_UUID,
    FILE_DATA_CHAR_UUID,
    FILE_SIZE_CHAR_UUID,
    CONTROL_CHAR_UUID,
];
