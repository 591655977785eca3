//! 输出设备枚举与选择

use std::fmt;

use cpal::traits::{DeviceTrait, HostTrait};

/// 输出设备
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// 在 host 完整设备列表中的位置
    pub index: usize,
    pub name: String,
    pub is_default: bool,
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.index, self.name)
    }
}

/// 列出所有支持输出的设备
///
/// 索引取自 `host.devices()` 的顺序，输入设备也占位，
/// 因此与设备选择器中的索引一致
pub fn list_output_devices(host: &cpal::Host) -> Vec<DeviceInfo> {
    let devices = match host.devices() {
        Ok(devices) => devices,
        Err(e) => {
            log::warn!("Failed to enumerate devices: {}", e);
            return Vec::new();
        }
    };

    let default_name = host
        .default_output_device()
        .and_then(|d| d.name().ok());

    let list: Vec<DeviceInfo> = devices
        .enumerate()
        .filter(|(_, device)| has_output(device))
        .map(|(index, device)| {
            let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
            let is_default = default_name.as_deref() == Some(name.as_str());
            DeviceInfo {
                index,
                name,
                is_default,
            }
        })
        .collect();

    log::debug!("Found {} output devices", list.len());
    list
}

fn has_output(device: &cpal::Device) -> bool {
    device
        .supported_output_configs()
        .map(|mut configs| configs.next().is_some())
        .unwrap_or(false)
}

/// 设备选择器：`"3"`、`"3: Speakers"` 按索引，其余按名称（大小写不敏感）
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceSelector {
    Index(usize),
    Name(String),
}

impl DeviceSelector {
    pub fn parse(selector: &str) -> Self {
        let selector = selector.trim();
        let prefix = selector
            .split_once(':')
            .map(|(head, _)| head)
            .unwrap_or(selector);

        match prefix.trim().parse::<usize>() {
            Ok(index) => Self::Index(index),
            Err(_) => Self::Name(selector.to_string()),
        }
    }

    pub fn matches(&self, index: usize, name: &str) -> bool {
        match self {
            Self::Index(i) => *i == index,
            Self::Name(n) => n.eq_ignore_ascii_case(name),
        }
    }
}

impl fmt::Display for DeviceSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Index(i) => write!(f, "#{}", i),
            Self::Name(n) => f.write_str(n),
        }
    }
}

/// 选择输出设备
///
/// 找不到指定设备时回退到默认设备；连默认设备都没有则返回 `None`
pub fn select_output_device(host: &cpal::Host, selector: Option<&str>) -> Option<cpal::Device> {
    if let Some(selector) = selector {
        let selector = DeviceSelector::parse(selector);

        if let Ok(devices) = host.devices() {
            for (index, device) in devices.enumerate() {
                let name = device.name().unwrap_or_default();
                if selector.matches(index, &name) && has_output(&device) {
                    log::info!("Using requested audio device: {}", name);
                    return Some(device);
                }
            }
        }

        log::warn!(
            "Requested device '{}' not found, falling back to default device",
            selector
        );
    }

    let device = host.default_output_device()?;
    log::info!(
        "Using default audio device: {}",
        device.name().unwrap_or_else(|_| "Unknown".to_string())
    );
    Some(device)
}
